//! Assembly-time validation: acyclicity, wiring and type compatibility.
//!
//! A pipeline is runnable only after `Validator::validate` succeeds; the
//! returned `Schedule` is what the execution engine follows.
pub mod error;
pub mod validator;
mod rules {
    pub mod cycles;
    pub mod structure;
}

pub use error::{ValidationError, ValidationErrorKind};
pub use validator::{Schedule, Validator};
