//! Block delay timer
//!
//! A single resettable one-shot timer driven by its own task. Arming replaces
//! any pending deadline. The fire callback runs on the timer task, so a
//! callback that re-arms takes effect once it returns.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

enum TimerCommand {
    Arm(Duration),
    Cancel,
}

/// Handle to the timer task
#[derive(Clone)]
pub struct BlockDelayTimer {
    commands: mpsc::UnboundedSender<TimerCommand>,
}

impl BlockDelayTimer {
    /// Spawn the timer task; it exits on shutdown or when every handle is dropped
    pub fn spawn<F, Fut>(on_fire: F, mut shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (commands, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut deadline: Option<Instant> = None;
            loop {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(TimerCommand::Arm(after)) => deadline = Some(Instant::now() + after),
                        Some(TimerCommand::Cancel) => deadline = None,
                        None => break,
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        deadline = None;
                        trace!("[evm] Block delay timer fired");
                        on_fire().await;
                    }
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }
            }
            trace!("[evm] Block delay timer stopped");
        });
        (Self { commands }, handle)
    }

    /// Fire once after `after`, replacing any pending deadline
    pub fn arm(&self, after: Duration) {
        // Send fails only after the task exited on shutdown
        let _ = self.commands.send(TimerCommand::Arm(after));
    }

    /// Drop any pending deadline
    pub fn cancel(&self) {
        let _ = self.commands.send(TimerCommand::Cancel);
    }
}
