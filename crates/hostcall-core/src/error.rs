//! Error types for the hostcall bridge

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge-level failures.
///
/// These are distinct from the `Ok`/`Error` status carried by a
/// [`PayloadBuffer`](crate::payload::PayloadBuffer), which is the host
/// method's own outcome and is passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The calling thread could not be attached to the host runtime
    #[error("Host runtime environment unavailable on this thread")]
    EnvironmentUnavailable,

    /// The bridge has not been initialized, or was already torn down
    #[error("Bridge is not initialized")]
    NotInitialized,

    /// Lookup of a class name that was never registered
    #[error("Class not registered: {0}")]
    ClassNotRegistered(String),

    /// The host runtime could not resolve a class during registration
    #[error("Failed to load class {name}: {reason}")]
    ClassLoadFailed {
        /// Class name as given by the caller
        name: String,
        /// Host-side reason
        reason: String,
    },

    /// Missing method or signature mismatch on the host side
    #[error("Method resolution failed: {class}.{method}{signature}")]
    MethodResolutionFailed {
        /// Class name
        class: String,
        /// Method name
        method: String,
        /// Signature string used for resolution
        signature: String,
    },

    /// A caller-owned buffer could not be allocated
    #[error("Failed to allocate {0} bytes")]
    AllocationFailure(usize),

    /// Payload length does not fit the 32-bit wire size field
    #[error("Payload of {0} bytes exceeds the maximum payload size")]
    PayloadTooLarge(usize),

    /// A host byte buffer has no directly addressable storage
    #[error("Host buffer is not a direct buffer")]
    NotDirectBuffer,

    /// The host runtime raised an exception during the call
    #[error("Host exception: {0}")]
    HostException(String),

    /// Invalid argument at the bridge boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A panic was caught before it could cross the bridge boundary
    #[error("Bridge panicked: {0}")]
    Panic(String),
}

impl BridgeError {
    /// Stable numeric code, exported over the C ABI
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::EnvironmentUnavailable => 1,
            BridgeError::NotInitialized => 2,
            BridgeError::ClassNotRegistered(_) => 3,
            BridgeError::ClassLoadFailed { .. } => 4,
            BridgeError::MethodResolutionFailed { .. } => 5,
            BridgeError::AllocationFailure(_) => 6,
            BridgeError::PayloadTooLarge(_) => 7,
            BridgeError::NotDirectBuffer => 8,
            BridgeError::HostException(_) => 9,
            BridgeError::InvalidArgument(_) => 10,
            BridgeError::Panic(_) => 11,
        }
    }

    pub(crate) fn method_resolution(class: &str, method: &str, signature: &str) -> Self {
        BridgeError::MethodResolutionFailed {
            class: class.to_string(),
            method: method.to_string(),
            signature: signature.to_string(),
        }
    }
}
