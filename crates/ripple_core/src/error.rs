//! Error types for the Ripple runtime

use thiserror::Error;

/// Errors that can occur while declaring flows or processing events
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RippleError {
    /// Malformed flow or event registration, rejected before it reaches any table
    #[error("declaration rejected for `{id}`: {reason}")]
    Declaration { id: String, reason: String },

    /// The declared flow set contains a direct or indirect cycle
    #[error("flow graph contains a cycle; unresolved flows: {0:?}")]
    GraphCycle(Vec<String>),

    /// A flow input references a flow id that was never declared
    #[error("flow `{from}` references undeclared flow `{to}`")]
    DanglingFlow { from: String, to: String },

    /// An interceptor step or terminal handler failed while processing an event
    #[error("handler `{id}` failed: {message}")]
    Handler { id: String, message: String },

    /// An associative operation was applied to a value that is not a mapping
    #[error("expected a mapping, found {found}")]
    TypeMismatch { found: &'static str },
}

impl RippleError {
    /// Shorthand for a declaration rejection
    pub fn declaration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        RippleError::Declaration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a handler failure
    pub fn handler(id: impl Into<String>, message: impl Into<String>) -> Self {
        RippleError::Handler {
            id: id.into(),
            message: message.into(),
        }
    }
}

/// Result type for Ripple operations
pub type Result<T> = std::result::Result<T, RippleError>;
