//! Error types for powerbase control.
//!
//! Every fallible operation in this crate returns [`PowerbaseError`]. Errors
//! carry structured context and can be classified for retry decisions.
//!
//! ## Error Categories
//!
//! - **Decode Errors**: Malformed or truncated notification payloads
//! - **Transport Errors**: A write to the powerbase did not complete
//! - **Timeout Errors**: A bounded operation ran out of time
//! - **Configuration Errors**: Invalid settings or throttle curves
//! - **Slot Errors**: Slot ids outside 1..=6
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use powerbase::PowerbaseError;
//!
//! let error = PowerbaseError::transport_failed("link dropped");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

/// Result type alias for powerbase operations.
pub type Result<T, E = PowerbaseError> = std::result::Result<T, E>;

/// Main error type for powerbase operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PowerbaseError {
    #[error("Decode error in {context}: {details}")]
    Decode { context: String, details: String },

    #[error("Invalid slot id {slot} (expected 1..=6)")]
    InvalidSlot { slot: u8 },

    #[error("Transport write failed: {reason}")]
    Transport {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Invalid throttle curve: {reason}")]
    InvalidCurve { reason: String },

    #[error("Lap storage error: {reason}")]
    Storage {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Powerbase session is closed")]
    SessionClosed,
}

impl PowerbaseError {
    /// Returns whether this error is potentially recoverable through retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            PowerbaseError::Transport { .. } => true,
            PowerbaseError::Timeout { .. } => true,
            PowerbaseError::Storage { .. } => true,
            PowerbaseError::Decode { .. } => false,
            PowerbaseError::InvalidSlot { .. } => false,
            PowerbaseError::Configuration { .. } => false,
            PowerbaseError::InvalidCurve { .. } => false,
            PowerbaseError::SessionClosed => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            PowerbaseError::Decode { .. } => vec![
                "Ignore the notification and wait for the next one",
                "Check powerbase firmware version",
            ],
            PowerbaseError::InvalidSlot { .. } => {
                vec!["Use slot ids between 1 and 6", "Check the configured slot count"]
            }
            PowerbaseError::Transport { .. } => vec![
                "Check the powerbase is switched on and in range",
                "Reconnect the wireless link",
                "Disable track power if failures persist",
            ],
            PowerbaseError::Timeout { .. } => vec![
                "Increase the write timeout",
                "Move closer to the powerbase",
                "Check the wireless link is still connected",
            ],
            PowerbaseError::Configuration { .. } => vec![
                "Check configuration values against documented ranges",
                "Fall back to PowerbaseConfig::default()",
            ],
            PowerbaseError::InvalidCurve { .. } => vec![
                "Use a finite exponent greater than zero",
                "Use at least two steps for stepped curves",
            ],
            PowerbaseError::Storage { .. } => {
                vec!["Check the lap store is reachable", "Retry saving the recorded laps"]
            }
            PowerbaseError::SessionClosed => {
                vec!["Start a new powerbase session", "Avoid using a handle after shutdown"]
            }
        }
    }

    /// Helper constructor for decode errors.
    pub fn decode_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        PowerbaseError::Decode { context: context.into(), details: details.into() }
    }

    /// Helper constructor for transport errors.
    pub fn transport_failed(reason: impl Into<String>) -> Self {
        PowerbaseError::Transport { reason: reason.into(), source: None }
    }

    /// Helper constructor for transport errors with source.
    pub fn transport_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        PowerbaseError::Transport { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for configuration errors.
    pub fn configuration(reason: impl Into<String>) -> Self {
        PowerbaseError::Configuration { reason: reason.into() }
    }

    /// Helper constructor for throttle curve errors.
    pub fn invalid_curve(reason: impl Into<String>) -> Self {
        PowerbaseError::InvalidCurve { reason: reason.into() }
    }

    /// Helper constructor for storage errors.
    pub fn storage_failed(reason: impl Into<String>) -> Self {
        PowerbaseError::Storage { reason: reason.into(), source: None }
    }
}

impl From<serde_yaml_ng::Error> for PowerbaseError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        PowerbaseError::Configuration { reason: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn error_messages_carry_their_context(
            reason in ".*",
            slot in 0u8..=255u8,
            duration_ms in 1u64..60000u64,
        ) {
            let transport = PowerbaseError::transport_failed(reason.clone());
            prop_assert!(transport.to_string().contains(&reason));

            let slot_error = PowerbaseError::InvalidSlot { slot };
            prop_assert!(slot_error.to_string().contains(&slot.to_string()));

            let timeout = PowerbaseError::Timeout { duration: Duration::from_millis(duration_ms) };
            prop_assert!(!timeout.to_string().is_empty());
        }

        #[test]
        fn source_chain_is_preserved(base_message in ".*") {
            let io = std::io::Error::other(base_message.clone());
            let error = PowerbaseError::transport_failed_with_source("write", Box::new(io));

            let source = std::error::Error::source(&error).expect("source should be kept");
            prop_assert_eq!(source.to_string(), base_message);
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<PowerbaseError>();

        let error = PowerbaseError::transport_failed("test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn retry_classification() {
        assert!(PowerbaseError::transport_failed("x").is_retryable());
        assert!(PowerbaseError::Timeout { duration: Duration::from_millis(10) }.is_retryable());
        assert!(!PowerbaseError::decode_error("slot", "short").is_retryable());
        assert!(!PowerbaseError::InvalidSlot { slot: 7 }.is_retryable());
        assert!(!PowerbaseError::SessionClosed.is_retryable());
    }

    #[test]
    fn every_variant_has_suggestions() {
        let errors = [
            PowerbaseError::decode_error("slot", "short"),
            PowerbaseError::InvalidSlot { slot: 0 },
            PowerbaseError::transport_failed("x"),
            PowerbaseError::Timeout { duration: Duration::from_millis(1) },
            PowerbaseError::configuration("bad"),
            PowerbaseError::invalid_curve("bad"),
            PowerbaseError::storage_failed("bad"),
            PowerbaseError::SessionClosed,
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty(), "{error} has no suggestions");
            assert!(suggestions.iter().all(|s| s.len() > 5));
        }
    }

    #[test]
    fn yaml_errors_become_configuration_errors() {
        let yaml_err = serde_yaml_ng::from_str::<u32>("not: [a number").unwrap_err();
        let error: PowerbaseError = yaml_err.into();
        assert!(matches!(error, PowerbaseError::Configuration { .. }));
    }
}
