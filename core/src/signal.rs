//! Cancellation signal shared between a caller and the fetcher.
//!
//! A caller hands an `AbortSignal` to a request; the fetcher derives a child
//! signal per attempt and aborts that child on timeout. Aborting the parent
//! reaches every child, aborting a child never reaches the parent.

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    token: CancellationToken,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this signal (or any ancestor) is aborted.
    pub async fn aborted(&self) {
        self.token.cancelled().await;
    }

    pub fn child(&self) -> AbortSignal {
        AbortSignal {
            token: self.token.child_token(),
        }
    }
}
