//! Idle-session supervision.
//!
//! The host delivers user-interaction signals through an [`ActivityHub`].
//! While a session is live, one task owns the single deadline: every signal
//! pushes it out by the idle timeout, and reaching it ends the session.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

/// Capacity of the activity channel. A lagging supervisor still counts the
/// missed signals as activity.
const ACTIVITY_CHANNEL_CAPACITY: usize = 256;

/// User-interaction signals that keep a session alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivitySignal {
    #[serde(rename = "mousedown")]
    PointerDown,
    #[serde(rename = "mousemove")]
    PointerMove,
    #[serde(rename = "keypress")]
    KeyPress,
    #[serde(rename = "scroll")]
    Scroll,
    #[serde(rename = "touchstart")]
    TouchStart,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 5] = [
        ActivitySignal::PointerDown,
        ActivitySignal::PointerMove,
        ActivitySignal::KeyPress,
        ActivitySignal::Scroll,
        ActivitySignal::TouchStart,
    ];

    /// The DOM event name of the signal.
    pub fn as_str(self) -> &'static str {
        match self {
            ActivitySignal::PointerDown => "mousedown",
            ActivitySignal::PointerMove => "mousemove",
            ActivitySignal::KeyPress => "keypress",
            ActivitySignal::Scroll => "scroll",
            ActivitySignal::TouchStart => "touchstart",
        }
    }
}

impl fmt::Display for ActivitySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fan-out point for activity signals.
#[derive(Clone)]
pub struct ActivityHub {
    sender: broadcast::Sender<ActivitySignal>,
}

impl ActivityHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(ACTIVITY_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publishes a signal. Signals with no live session are dropped.
    pub fn notify(&self, signal: ActivitySignal) {
        if self.sender.send(signal).is_err() {
            tracing::trace!("Activity '{}' with no supervised session", signal);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivitySignal> {
        self.sender.subscribe()
    }
}

impl Default for ActivityHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No session is supervised.
    Idle,
    /// The session ends at `deadline` unless activity is seen first.
    Active { deadline: Instant },
    /// The deadline passed and the expiry handler was invoked.
    Expired,
}

/// Invoked once when a supervised session expires.
pub type ExpiryHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Slot {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

/// Ends sessions that see no activity for the idle timeout.
#[derive(Clone)]
pub struct SessionSupervisor {
    idle_timeout: Duration,
    hub: ActivityHub,
    state: Arc<watch::Sender<SupervisorState>>,
    slot: Arc<Mutex<Slot>>,
}

impl SessionSupervisor {
    pub fn new(idle_timeout: Duration, hub: ActivityHub) -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            idle_timeout,
            hub,
            state: Arc::new(state),
            slot: Arc::new(Mutex::new(Slot {
                epoch: 0,
                task: None,
            })),
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn hub(&self) -> &ActivityHub {
        &self.hub
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Starts supervising a session and arms the first deadline.
    ///
    /// Any previous supervision is torn down first, so calling this twice
    /// never leaves two timers running.
    pub fn initialize(&self, on_expire: ExpiryHandler) {
        let mut slot = self.lock_slot();
        let epoch = Self::cancel(&mut slot);

        let signals = self.hub.subscribe();
        let deadline = Instant::now() + self.idle_timeout;
        self.state.send_replace(SupervisorState::Active { deadline });

        let watcher = Watcher {
            idle_timeout: self.idle_timeout,
            state: self.state.clone(),
            slot: self.slot.clone(),
            epoch,
            on_expire,
        };
        slot.task = Some(tokio::spawn(watcher.run(signals, deadline)));
        tracing::info!(
            "⏰ Session supervision started (idle timeout {}s)",
            self.idle_timeout.as_secs()
        );
    }

    /// Stops supervising and cancels the pending deadline. Safe to call
    /// when nothing is supervised.
    pub fn teardown(&self) {
        let mut slot = self.lock_slot();
        let had_task = slot.task.is_some();
        Self::cancel(&mut slot);
        self.state.send_replace(SupervisorState::Idle);
        if had_task {
            tracing::info!("⏰ Session supervision stopped");
        }
    }

    /// Invalidates the running watcher and returns the new epoch.
    fn cancel(slot: &mut Slot) -> u64 {
        slot.epoch += 1;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.epoch
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        lock(&self.slot)
    }
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    // The slot holds no invariant a panicking holder could break.
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Watcher {
    idle_timeout: Duration,
    state: Arc<watch::Sender<SupervisorState>>,
    slot: Arc<Mutex<Slot>>,
    epoch: u64,
    on_expire: ExpiryHandler,
}

impl Watcher {
    async fn run(self, mut signals: broadcast::Receiver<ActivitySignal>, mut deadline: Instant) {
        let mut listening = true;
        loop {
            tokio::select! {
                biased;
                received = signals.recv(), if listening => match received {
                    Ok(signal) => {
                        deadline = Instant::now() + self.idle_timeout;
                        self.state.send_replace(SupervisorState::Active { deadline });
                        tracing::trace!("Activity '{}' extends the session", signal);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        deadline = Instant::now() + self.idle_timeout;
                        self.state.send_replace(SupervisorState::Active { deadline });
                        tracing::trace!("Supervisor lagged by {} signals", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::debug!("Activity channel closed, waiting out the deadline");
                        listening = false;
                    }
                },
                _ = sleep_until(deadline) => break,
            }
        }

        let expired = {
            let mut slot = lock(&self.slot);
            if slot.epoch == self.epoch {
                slot.task = None;
                self.state.send_replace(SupervisorState::Expired);
                true
            } else {
                false
            }
        };

        if expired {
            tracing::info!("⏰ Session expired after {}s of inactivity", self.idle_timeout.as_secs());
            // Detached: the handler usually tears this supervisor down.
            tokio::spawn((self.on_expire)());
        }
    }
}
