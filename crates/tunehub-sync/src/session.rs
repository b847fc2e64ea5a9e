use crate::channel::EventChannel;
use crate::store::EventStore;
use crate::transport::{ReadyState, Subscription, Transport, TransportConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tunehub_core::{ErrorPayload, EventKey, SocketEvent};

/// Root object of the sync layer: one store, one shared transport and the
/// task that applies every inbound message to the store.
pub struct SyncSession {
    store: Arc<EventStore>,
    transport: Arc<Transport>,
    pump: JoinHandle<()>,
}

impl SyncSession {
    /// Must be called inside a tokio runtime; the session's own subscription
    /// starts the connection.
    pub fn start(config: TransportConfig) -> Self {
        Self::with_parts(EventStore::new(), Transport::new(config))
    }

    pub fn with_parts(store: Arc<EventStore>, transport: Arc<Transport>) -> Self {
        let subscription = transport.subscribe();
        let pump = tokio::spawn(apply_inbound_loop(Arc::clone(&store), subscription));
        Self {
            store,
            transport,
            pump,
        }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn status(&self) -> ReadyState {
        self.transport.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ReadyState> {
        self.transport.watch_status()
    }

    pub fn bind<T>(&self, key: &str, default: Option<T>) -> EventChannel<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        EventChannel::bind(&self.store, &self.transport, key, default)
    }

    /// Stops the pump and the connection. Channels bound earlier keep
    /// reading the store but nothing reaches the controller any more.
    pub fn shutdown(&self) {
        self.pump.abort();
        self.transport.shutdown();
    }
}

impl Drop for SyncSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn apply_inbound_loop(store: Arc<EventStore>, mut subscription: Subscription) {
    while let Some(event) = subscription.recv().await {
        if event.kind == EventKey::Error.as_str() {
            log_peer_error(&event);
        }
        store.apply_inbound(event);
    }
    debug!(event = "session_pump_stopped");
}

fn log_peer_error(event: &SocketEvent) {
    match event.payload::<ErrorPayload>() {
        Ok(payload) => warn!(event = "peer_error", message = %payload.message),
        Err(_) => warn!(event = "peer_error", data = %event.data),
    }
}
