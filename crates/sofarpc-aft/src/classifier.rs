//! Separates fault-tolerance-relevant failures from ordinary business errors.

use thiserror::Error;

/// Failure of one invocation, as reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    /// The provider did not answer in time.
    #[error("invocation timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline that expired.
        timeout_ms: u64,
    },
    /// The provider rejected the call because its worker pool was exhausted.
    #[error("provider busy: {reason}")]
    ServerBusy {
        /// Provider-supplied detail.
        reason: String,
    },
    /// The provider's handler failed; the provider itself is fine.
    #[error("business exception: {message}")]
    Business {
        /// Exception message.
        message: String,
    },
    /// Connection or codec failure before the call reached the provider.
    #[error("transport error: {message}")]
    Transport {
        /// Error detail.
        message: String,
    },
}

/// Decides whether a failed invocation counts against the provider.
///
/// Closures `Fn(&InvocationError) -> bool` implement this trait.
pub trait FaultClassifier: Send + Sync {
    /// True when `error` should raise the provider's fault count.
    fn is_fault(&self, error: &InvocationError) -> bool;
}

/// Counts timeouts and server-busy rejections as faults.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFaultClassifier;

impl FaultClassifier for DefaultFaultClassifier {
    fn is_fault(&self, error: &InvocationError) -> bool {
        matches!(
            error,
            InvocationError::Timeout { .. } | InvocationError::ServerBusy { .. }
        )
    }
}

impl<F> FaultClassifier for F
where
    F: Fn(&InvocationError) -> bool + Send + Sync,
{
    fn is_fault(&self, error: &InvocationError) -> bool {
        self(error)
    }
}
