//! Debounced caller: coalesces bursts of calls into a single execution.
//!
//! Repeated invocations within the delay window collapse into one underlying
//! call using the arguments of the *last* invocation received before the
//! window elapses. Every caller in the window awaits the same shared outcome,
//! so the result and error types must be `Clone`. Once the underlying call
//! settles the pending state is cleared and the next invocation starts a
//! fresh window.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

type OutcomeFuture<T, E> = Shared<BoxFuture<'static, Option<Result<T, E>>>>;

/// State of one coalescing window: the newest arguments, the armed timer,
/// and the channel every waiting caller is parked on.
struct Pending<A, T, E> {
    latest: A,
    timer: JoinHandle<()>,
    settle: oneshot::Sender<Result<T, E>>,
    outcome: OutcomeFuture<T, E>,
}

/// Wraps an async function so rapid repeated calls execute it once.
pub struct Debouncer<A, T, E> {
    delay: Duration,
    operation: Arc<dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>,
    pending: Arc<Mutex<Option<Pending<A, T, E>>>>,
}

impl<A, T, E> Clone for Debouncer<A, T, E> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            operation: self.operation.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<A, T, E> std::fmt::Debug for Debouncer<A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debouncer").field("delay", &self.delay).finish()
    }
}

impl<A, T, E> Debouncer<A, T, E>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wrap `operation` so calls within `delay` of each other coalesce.
    pub fn new<F, Fut>(delay: Duration, operation: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            delay,
            operation: Arc::new(move |args| operation(args).boxed()),
            pending: Arc::new(Mutex::new(None)),
        }
    }

    /// Schedule (or reschedule) the underlying call with `args` and wait for
    /// the coalesced outcome.
    ///
    /// A call arriving while a window is open cancels the armed timer,
    /// replaces the stored arguments, and re-arms the timer, so the
    /// underlying function runs once per quiet period with the freshest
    /// arguments.
    ///
    /// # Panics
    /// Panics if the underlying operation panicked, propagating the failure
    /// to every coalesced caller.
    pub async fn call(&self, args: A) -> Result<T, E> {
        let outcome = {
            let mut slot = self.pending.lock().unwrap();
            match slot.as_mut() {
                Some(pending) => {
                    pending.timer.abort();
                    pending.latest = args;
                    pending.timer = self.arm_timer();
                    pending.outcome.clone()
                }
                None => {
                    let (settle, receiver) = oneshot::channel();
                    let outcome: OutcomeFuture<T, E> =
                        async move { receiver.await.ok() }.boxed().shared();
                    *slot = Some(Pending {
                        latest: args,
                        timer: self.arm_timer(),
                        settle,
                        outcome: outcome.clone(),
                    });
                    outcome
                }
            }
        };

        match outcome.await {
            Some(result) => result,
            None => panic!("debounced operation panicked before settling"),
        }
    }

    fn arm_timer(&self) -> JoinHandle<()> {
        let delay = self.delay;
        let operation = Arc::clone(&self.operation);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Taking the slot ends the window; callers arriving from here on
            // start a fresh one.
            let fired = pending.lock().unwrap().take();
            let Some(state) = fired else { return };
            let result = (operation)(state.latest).await;
            let _ = state.settle.send(result);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording() -> (Arc<Mutex<Vec<String>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test]
    async fn burst_coalesces_into_one_call_with_last_args() {
        let (seen, count) = recording();
        let seen_op = seen.clone();
        let count_op = count.clone();
        let debouncer = Debouncer::new(Duration::from_millis(20), move |args: String| {
            let seen = seen_op.clone();
            let count = count_op.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(args.clone());
                Ok::<_, String>(format!("handled {}", args))
            }
        });

        let (a, b, c) = tokio::join!(
            debouncer.call("a".to_string()),
            debouncer.call("b".to_string()),
            debouncer.call("c".to_string()),
        );

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["c".to_string()]);
        assert_eq!(a.unwrap(), "handled c");
        assert_eq!(b.unwrap(), "handled c");
        assert_eq!(c.unwrap(), "handled c");
    }

    #[tokio::test]
    async fn completed_window_resets_state() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_op = count.clone();
        let debouncer = Debouncer::new(Duration::from_millis(10), move |args: u32| {
            let count = count_op.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(args * 2)
            }
        });

        assert_eq!(debouncer.call(1).await.unwrap(), 2);
        assert_eq!(debouncer.call(5).await.unwrap(), 10);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_shared_by_all_callers() {
        let debouncer = Debouncer::new(Duration::from_millis(20), |_: u32| async {
            Err::<u32, _>("backend rejected the batch".to_string())
        });

        let (first, second) = tokio::join!(debouncer.call(1), debouncer.call(2));
        assert_eq!(first.unwrap_err(), "backend rejected the batch");
        assert_eq!(second.unwrap_err(), "backend rejected the batch");
    }

    #[tokio::test]
    async fn late_call_extends_the_window() {
        let (seen, count) = recording();
        let seen_op = seen.clone();
        let count_op = count.clone();
        let debouncer = Debouncer::new(Duration::from_millis(60), move |args: String| {
            let seen = seen_op.clone();
            let count = count_op.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(args);
                Ok::<_, String>(())
            }
        });

        let early = debouncer.clone();
        let first = tokio::spawn(async move { early.call("first".to_string()).await });
        // Arrives inside the window, so the pending call reschedules with the
        // newer arguments.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = debouncer.call("second".to_string()).await;

        assert!(second.is_ok());
        assert!(first.await.expect("join").is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["second".to_string()]);
    }
}
