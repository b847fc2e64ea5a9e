use crate::store::EventStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(7 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IdleConfig {
    pub threshold: Duration,
    pub poll_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_IDLE_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdleState {
    #[default]
    Active,
    Idle,
}

impl IdleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdleState::Active => "active",
            IdleState::Idle => "idle",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleTransition {
    EnteredIdle { idle_for: Duration },
    Resumed,
}

#[derive(Debug)]
pub struct IdleMonitor {
    config: IdleConfig,
    state: IdleState,
}

impl IdleMonitor {
    pub fn new(config: IdleConfig) -> Self {
        Self {
            config,
            state: IdleState::Active,
        }
    }

    pub fn config(&self) -> IdleConfig {
        self.config
    }

    pub fn state(&self) -> IdleState {
        self.state
    }

    /// Advances the state machine. Returns a transition only when the state
    /// changes, so staying idle never fires `EnteredIdle` twice.
    pub fn tick(&mut self, last_activity: Instant, now: Instant) -> Option<IdleTransition> {
        let elapsed = now.saturating_duration_since(last_activity);
        match self.state {
            IdleState::Active if elapsed >= self.config.threshold => {
                self.state = IdleState::Idle;
                Some(IdleTransition::EnteredIdle { idle_for: elapsed })
            }
            IdleState::Idle if elapsed < self.config.threshold => {
                self.state = IdleState::Active;
                Some(IdleTransition::Resumed)
            }
            _ => None,
        }
    }

    /// Polls `store` every `poll_interval` and re-checks right after each
    /// store write, so incoming messages wake the kiosk without waiting for
    /// the next poll.
    pub fn spawn(self, store: Arc<EventStore>) -> IdleHandle {
        let (state_tx, state_rx) = watch::channel(self.state);
        let task = tokio::spawn(idle_loop(self, store, state_tx));
        IdleHandle {
            state: state_rx,
            task,
        }
    }
}

async fn idle_loop(mut monitor: IdleMonitor, store: Arc<EventStore>, state_tx: watch::Sender<IdleState>) {
    let mut poll = tokio::time::interval(monitor.config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut changes = store.changes();
    let mut listening = true;
    loop {
        tokio::select! {
            _ = poll.tick() => {}
            changed = changes.recv(), if listening => {
                if let Err(RecvError::Closed) = changed {
                    listening = false;
                }
            }
        }
        let Some(transition) = monitor.tick(store.last_activity(), Instant::now()) else {
            continue;
        };
        match transition {
            IdleTransition::EnteredIdle { idle_for } => {
                info!(event = "idle_entered", idle_secs = idle_for.as_secs());
            }
            IdleTransition::Resumed => info!(event = "idle_resumed"),
        }
        state_tx.send_replace(monitor.state());
    }
}

pub struct IdleHandle {
    state: watch::Receiver<IdleState>,
    task: JoinHandle<()>,
}

impl IdleHandle {
    pub fn state(&self) -> IdleState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<IdleState> {
        self.state.clone()
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for IdleHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
