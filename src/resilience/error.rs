/// Final outcome of a protected call that did not succeed
///
/// `E` is the caller's own error type. Rejections (`RateLimited`,
/// `CircuitOpen`) mean the operation was never invoked.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    /// Admission denied by the token bucket
    #[error("rate limit exceeded for {dependency}")]
    RateLimited { dependency: String },
    /// Admission denied by the circuit breaker
    #[error("circuit breaker is open for {dependency}")]
    CircuitOpen { dependency: String },
    /// Every attempt failed with a retryable error
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: E,
    },
    /// The operation failed with an error the caller marked non-retryable
    #[error("operation failed on attempt {attempt}: {source}")]
    Terminal {
        attempt: u32,
        #[source]
        source: E,
    },
    /// The last attempt ran past the per-attempt time limit
    #[error("attempt {attempts} timed out")]
    TimedOut { attempts: u32 },
    /// The caller cancelled or the deadline passed before completion
    #[error("operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E> ResilienceError<E> {
    /// True when no attempt was made because admission was denied
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::RateLimited { .. } | ResilienceError::CircuitOpen { .. }
        )
    }

    /// The underlying operation error, if there is one
    pub fn into_inner(self) -> Option<E> {
        match self {
            ResilienceError::RetriesExhausted { source, .. }
            | ResilienceError::Terminal { source, .. } => Some(source),
            _ => None,
        }
    }

    /// HTTP status an API layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            ResilienceError::RateLimited { .. } | ResilienceError::CircuitOpen { .. } => 503,
            ResilienceError::RetriesExhausted { .. } => 502,
            ResilienceError::Terminal { .. } => 500,
            ResilienceError::TimedOut { .. } => 504,
            ResilienceError::Cancelled { .. } => 499,
        }
    }
}
