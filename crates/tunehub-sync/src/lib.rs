use thiserror::Error;
use tunehub_core::WireError;

pub mod channel;
pub mod config;
pub mod cover_art;
pub mod debounce;
pub mod idle;
pub mod player;
pub mod session;
pub mod store;
pub mod transport;
pub mod weather;

pub use channel::{DebouncedSetter, EventChannel, Setter};
pub use config::{ClientConfig, ConfigError};
pub use idle::{IdleConfig, IdleHandle, IdleMonitor, IdleState, IdleTransition};
pub use player::{Player, PlayerConfig};
pub use session::SyncSession;
pub use store::{Entry, EventStore, Origin, StoreChange, StoreSnapshot};
pub use transport::{Backoff, Lease, ReadyState, Subscription, Transport, TransportConfig};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("payload encode failed for `{key}`: {message}")]
    Serialize { key: String, message: String },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}
