//! Guest access codes: generation and hashing, validation, and the grant
//! lifecycle built on top of them.

pub mod codec;
pub mod service;
pub mod validation;

pub use codec::AccessCodeCodec;
pub use service::AccessService;
pub use validation::{AccessValidationEngine, ValidationReason, ValidationResult};
