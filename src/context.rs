use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Caller-owned cancellation scope for one or more requests.
///
/// A context completes when its token is cancelled or its deadline passes.
/// It governs both the network send and the wait between attempts.
#[derive(Clone, Debug, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    /// Keeps the earlier of the existing and the given deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A context cancelled together with `self` that can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves with the cancellation error once the context completes.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    () = self.token.cancelled() => Error::Cancelled,
                    () = sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Context;
    use crate::error::Error;

    #[tokio::test(start_paused = true)]
    async fn background_context_never_completes_on_its_own() {
        let context = Context::background();
        assert!(context.err().is_none());
        let outcome = tokio::time::timeout(Duration::from_secs(3600), context.done()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_completes_with_deadline_exceeded() {
        let context = Context::background().with_timeout(Duration::from_millis(50));
        assert!(context.err().is_none());
        assert!(matches!(context.done().await, Error::DeadlineExceeded));
        assert!(matches!(context.err(), Some(Error::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = Context::background();
        let child = parent.child();
        parent.cancel();
        assert!(matches!(child.done().await, Error::Cancelled));
        assert!(matches!(child.err(), Some(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancelling_child_leaves_parent_running() {
        let parent = Context::background();
        let child = parent.child();
        child.cancel();
        assert!(child.err().is_some());
        assert!(parent.err().is_none());
    }

    #[test]
    fn earlier_deadline_wins() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime should build");
        runtime.block_on(async {
            let short = Context::background().with_timeout(Duration::from_secs(1));
            let kept = short.clone().with_timeout(Duration::from_secs(60));
            assert_eq!(kept.deadline(), short.deadline());
        });
    }
}
