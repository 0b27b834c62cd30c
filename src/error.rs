//! Typed configuration and invariant errors.
//!
//! These travel inside [`anyhow::Error`]; callers that need to branch on the
//! kind recover them with `downcast_ref::<ConfigError>()`.

use thiserror::Error;

/// Errors that abort a run before (or, for invariant violations, during) the round loop.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{strategy} is missing required property {property:?}")]
    MissingRequiredProperty { strategy: String, property: String },

    #[error("{strategy} property {property:?} must be {expected}")]
    InvalidPropertyValue {
        strategy: String,
        property: String,
        expected: &'static str,
    },

    #[error("no {family} strategy registered under {name:?}")]
    UnregisteredStrategyClass { family: &'static str, name: String },

    #[error("{family} strategy {name:?} lacks required capabilities {missing}")]
    InvalidStrategyClass {
        family: &'static str,
        name: String,
        missing: String,
    },

    #[error("{family} strategy {name:?} is already registered")]
    DuplicateRegistration { family: &'static str, name: String },

    #[error("malformed result list for user {user:?}: {reason}")]
    MalformedResultList { user: String, reason: String },

    #[error("non-finite value produced by {origin}")]
    NonFiniteValue { origin: String },
}

/// Fail with [`ConfigError::NonFiniteValue`] unless `val` is finite.
pub fn ensure_finite(val: f64, origin: &str) -> anyhow::Result<f64> {
    if !val.is_finite() {
        return Err(ConfigError::NonFiniteValue {
            origin: origin.to_string(),
        }
        .into());
    }
    Ok(val)
}
