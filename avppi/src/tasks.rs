//! Background control loop runner
//!
//! Each supervisor loop is a task that runs one tick, then waits for the
//! first of: its interval elapsing, a wake signal ("re-check now"), or its
//! cancellation token. Tick errors and panics are logged and the loop keeps
//! going.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// One periodic unit of supervisor work
#[async_trait]
pub trait ControlLoop: Send + 'static {
    /// Name used in logs
    fn name(&self) -> &'static str;

    async fn tick(&mut self) -> Result<()>;
}

/// Wakes a loop for an immediate re-check
#[derive(Debug, Clone, Default)]
pub struct LoopWaker(Arc<Notify>);

impl LoopWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a re-check; coalesces with any pending request
    pub fn wake(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await
    }
}

/// Running loop: waker, stop signal and task handle
pub struct LoopHandle {
    name: &'static str,
    waker: LoopWaker,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn waker(&self) -> LoopWaker {
        self.waker.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop to stop and wait for it to exit
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(task = self.name, "Loop task ended abnormally: {}", e);
        }
    }
}

/// Spawn `task`, ticking every `interval`
///
/// `cancel` is typically a child of the application's shutdown token.
pub fn spawn_loop<T: ControlLoop>(
    task: T,
    interval: Duration,
    waker: LoopWaker,
    cancel: CancellationToken,
) -> LoopHandle {
    let name = task.name();
    let join = tokio::spawn(run_loop(task, interval, waker.clone(), cancel.clone()));
    LoopHandle {
        name,
        waker,
        cancel,
        join,
    }
}

async fn run_loop<T: ControlLoop>(mut task: T, interval: Duration, waker: LoopWaker, cancel: CancellationToken) {
    let name = task.name();
    info!(task = name, interval_ms = interval.as_millis() as u64, "Loop started");

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match AssertUnwindSafe(task.tick()).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = name, "Tick failed: {}", e),
            Err(_) => error!(task = name, "Tick panicked, continuing"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = waker.notified() => debug!(task = name, "Woken for re-check"),
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!(task = name, "Loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counting {
        ticks: Arc<AtomicU32>,
        fail_every: u32,
    }

    #[async_trait]
    impl ControlLoop for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&mut self) -> Result<()> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                if n % (2 * self.fail_every) == 0 {
                    panic!("tick {} exploded", n);
                }
                return Err(Error::Internal(format!("tick {} failed", n)));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_and_wake() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = spawn_loop(
            Counting {
                ticks: ticks.clone(),
                fail_every: 0,
            },
            Duration::from_secs(30),
            LoopWaker::new(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        handle.waker().wake();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_and_panics_do_not_stop_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let handle = spawn_loop(
            Counting {
                ticks: ticks.clone(),
                fail_every: 2,
            },
            Duration::from_secs(1),
            LoopWaker::new(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(5500)).await;
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        assert!(!handle.is_finished());
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_loop() {
        let parent = CancellationToken::new();
        let handle = spawn_loop(
            Counting {
                ticks: Arc::new(AtomicU32::new(0)),
                fail_every: 0,
            },
            Duration::from_secs(60),
            LoopWaker::new(),
            parent.child_token(),
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
        parent.cancel();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(handle.is_finished());
    }
}
