//! Optimistic mutation: apply locally, call remote, then reconcile or roll back.
//!
//! Used by the ledger mirror for save/unsave and by the preference store for commit.

use std::future::Future;

use tracing::debug;

use crate::errors::ClientError;

/// The three local steps of an optimistic mutation.
///
/// `apply` runs before the remote call and returns whatever `reconcile` or
/// `roll_back` need to finish the job (typically the state it replaced).
pub trait OptimisticMutation {
    type Applied;
    type Output;

    fn label(&self) -> &'static str;

    fn apply(&self) -> Self::Applied;

    fn reconcile(&self, applied: Self::Applied, output: &Self::Output);

    fn roll_back(&self, applied: Self::Applied, error: &ClientError);
}

/// Runs `mutation` around the remote call produced by `remote`.
///
/// Exactly one of `reconcile` / `roll_back` runs, after the remote call settles.
pub async fn run_optimistic<M, F, Fut>(mutation: &M, remote: F) -> Result<M::Output, ClientError>
where
    M: OptimisticMutation,
    F: FnOnce(&M::Applied) -> Fut,
    Fut: Future<Output = Result<M::Output, ClientError>>,
{
    let applied = mutation.apply();
    let call = remote(&applied);

    match call.await {
        Ok(output) => {
            mutation.reconcile(applied, &output);
            Ok(output)
        }
        Err(e) => {
            debug!("{} rolled back: {e}", mutation.label());
            mutation.roll_back(applied, &e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::signal::lock;

    /// Counter that optimistically increments and remembers the confirmed value.
    struct Counter {
        shown: Mutex<i32>,
        confirmed: Mutex<i32>,
    }

    impl OptimisticMutation for Counter {
        type Applied = i32;
        type Output = i32;

        fn label(&self) -> &'static str {
            "increment"
        }

        fn apply(&self) -> i32 {
            let mut shown = lock(&self.shown);
            let previous = *shown;
            *shown += 1;
            previous
        }

        fn reconcile(&self, _previous: i32, output: &i32) {
            *lock(&self.confirmed) = *output;
            *lock(&self.shown) = *output;
        }

        fn roll_back(&self, previous: i32, _error: &ClientError) {
            *lock(&self.shown) = previous;
        }
    }

    fn counter() -> Counter {
        Counter {
            shown: Mutex::new(0),
            confirmed: Mutex::new(0),
        }
    }

    #[tokio::test]
    async fn test_success_reconciles_with_server_value() {
        let c = counter();
        let result = run_optimistic(&c, |_| async { Ok(10) }).await.unwrap();
        assert_eq!(result, 10);
        assert_eq!(*lock(&c.shown), 10);
        assert_eq!(*lock(&c.confirmed), 10);
    }

    #[tokio::test]
    async fn test_failure_rolls_back() {
        let c = counter();
        let err = run_optimistic(&c, |_| async { Err::<i32, _>(ClientError::Remote("boom".into())) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(*lock(&c.shown), 0);
        assert_eq!(*lock(&c.confirmed), 0);
    }

    #[tokio::test]
    async fn test_local_change_is_visible_while_remote_is_pending() {
        let c = counter();
        let observed = run_optimistic(&c, |previous| {
            let previous = *previous;
            let shown_now = *lock(&c.shown);
            async move { Ok(previous * 100 + shown_now) }
        })
        .await
        .unwrap();
        // previous 0, shown 1 during the call
        assert_eq!(observed, 1);
    }
}
