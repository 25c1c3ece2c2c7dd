//! Error types for handle resolution and the user-data bridge

use thiserror::Error;
use uuid::Uuid;

use crate::userdata::SerialNumber;

/// Main error type for geomhandle operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// The parent chain of a referencing wrapper can no longer produce a
    /// native handle (closed document, deleted object, disposed owner).
    ///
    /// Recoverable: callers may treat the wrapper as stale.
    #[error("Object collected: the data behind this wrapper no longer exists")]
    ObjectCollected,

    /// A mutating call on a wrapper whose container is read-only
    #[error("Read-only violation: {container} does not allow modification")]
    ReadOnlyViolation {
        /// Kind of container that refused the write
        container: &'static str,
    },

    /// Malformed or out-of-range subobject index
    #[error("Component index error: index {index} is out of range (count {count})")]
    ComponentIndex {
        /// Requested index
        index: i64,
        /// Number of components available at the call site
        count: usize,
    },

    /// The native engine rejected an operation
    #[error("Native failure: {0}")]
    NativeFailure(String),

    /// No user-data type has been registered under this class id
    #[error("Unknown user data type: {0}")]
    UnknownUserDataType(Uuid),

    /// The serial number was deleted (or never issued)
    #[error("Stale serial number: {0}")]
    StaleSerialNumber(SerialNumber),

    /// The instance is checked out by an outer call on the same serial
    #[error("User data in use: {0} is already borrowed")]
    UserDataInUse(SerialNumber),

    /// A registry entry exists but holds a different concrete type
    #[error("User data type mismatch: expected {expected}")]
    UserDataTypeMismatch {
        /// Rust type name that was requested
        expected: &'static str,
    },

    /// A configuration document could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BindingError {
    /// Create a native failure from any displayable message.
    pub fn native(message: impl Into<String>) -> Self {
        BindingError::NativeFailure(message.into())
    }

    /// Whether this error means the wrapper has outlived its backing store.
    pub fn is_collected(&self) -> bool {
        matches!(self, BindingError::ObjectCollected)
    }
}

/// Result type alias for geomhandle operations
pub type Result<T> = std::result::Result<T, BindingError>;
