use crate::SyncError;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tunehub_core::{decode_event, encode_event, SocketEvent, DEFAULT_MAX_FRAME_BYTES};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MIN_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadyState {
    Uninstantiated,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadyState::Uninstantiated => "uninstantiated",
            ReadyState::Connecting => "connecting",
            ReadyState::Open => "open",
            ReadyState::Closing => "closing",
            ReadyState::Closed => "closed",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, ReadyState::Open)
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capped exponential reconnect delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        let next = (current + current).max(MIN_BACKOFF);
        if next > self.max {
            self.max
        } else {
            next
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub url: Url,
    pub reconnect: Backoff,
    pub connect_timeout: Duration,
    pub outbound_capacity: usize,
    /// Frames buffered per subscriber. A subscriber that falls further behind
    /// skips the oldest frames and logs `inbound_lagged`.
    pub inbound_capacity: usize,
    pub max_frame_bytes: usize,
}

impl TransportConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            reconnect: Backoff::default(),
            connect_timeout: Duration::from_secs(5),
            outbound_capacity: 256,
            inbound_capacity: 256,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

#[derive(Debug, Clone)]
struct Outgoing {
    key: String,
    frame: String,
}

/// Messages waiting for a connection, newest value per key.
#[derive(Default)]
struct Outbox {
    pending: VecDeque<Outgoing>,
}

impl Outbox {
    fn push(&mut self, message: Outgoing) {
        if let Some(slot) = self.pending.iter_mut().find(|queued| queued.key == message.key) {
            *slot = message;
        } else {
            self.pending.push_back(message);
        }
    }

    fn pop_front(&mut self) -> Option<Outgoing> {
        self.pending.pop_front()
    }

    fn push_front(&mut self, message: Outgoing) {
        self.pending.push_front(message);
    }

    fn len(&self) -> usize {
        self.pending.len()
    }
}

struct Connection {
    leases: usize,
    task: Option<JoinHandle<()>>,
    // Bumped for every spawned connection task; an aborted task that is
    // still running compares stale and may no longer publish status.
    generation: u64,
    shut_down: bool,
}

pub struct Transport {
    config: TransportConfig,
    status: watch::Sender<ReadyState>,
    inbound: broadcast::Sender<SocketEvent>,
    outbound: mpsc::Sender<Outgoing>,
    outbound_rx: Arc<AsyncMutex<mpsc::Receiver<Outgoing>>>,
    connection: Mutex<Connection>,
    autostart: bool,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Arc<Self> {
        Self::build(config, true)
    }

    /// A transport that never opens a socket; sends stay queued.
    #[cfg(test)]
    pub(crate) fn detached(config: TransportConfig) -> Arc<Self> {
        Self::build(config, false)
    }

    fn build(config: TransportConfig, autostart: bool) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::channel(config.outbound_capacity.max(1));
        Arc::new(Self {
            status: watch::channel(ReadyState::Uninstantiated).0,
            inbound: broadcast::channel(config.inbound_capacity.max(1)).0,
            outbound,
            outbound_rx: Arc::new(AsyncMutex::new(outbound_rx)),
            connection: Mutex::new(Connection {
                leases: 0,
                task: None,
                generation: 0,
                shut_down: false,
            }),
            autostart,
            config,
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn status(&self) -> ReadyState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ReadyState> {
        self.status.subscribe()
    }

    pub fn lease_count(&self) -> usize {
        self.connection.lock().leases
    }

    /// Keeps the connection alive for as long as the lease is held. The first
    /// lease starts the connection task, so it has to be taken inside a tokio
    /// runtime.
    pub fn acquire(self: &Arc<Self>) -> Lease {
        let mut connection = self.connection.lock();
        connection.leases += 1;
        if connection.task.is_none() && !connection.shut_down && self.autostart {
            connection.generation += 1;
            let generation = connection.generation;
            let transport = Arc::clone(self);
            connection.task = Some(tokio::spawn(async move {
                transport.connection_loop(generation).await;
            }));
        }
        Lease {
            transport: Arc::clone(self),
        }
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let inbound = self.inbound.subscribe();
        Subscription {
            inbound,
            _lease: self.acquire(),
        }
    }

    /// Queues a message for the controller. Only encoding failures are
    /// reported; a full queue drops the message with a warning.
    pub fn send(&self, event: SocketEvent) -> Result<(), SyncError> {
        let frame = encode_event(&event, self.config.max_frame_bytes)?;
        let message = Outgoing {
            key: event.kind,
            frame,
        };
        match self.outbound.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!(event = "outbound_dropped", key = %message.key, reason = "queue_full");
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                warn!(event = "outbound_dropped", key = %message.key, reason = "closed");
            }
        }
        Ok(())
    }

    /// Stops the connection task for good; later leases do not restart it.
    pub fn shutdown(&self) {
        let mut connection = self.connection.lock();
        connection.shut_down = true;
        if let Some(task) = connection.task.take() {
            task.abort();
        }
        self.set_status(ReadyState::Closed);
    }

    fn release(&self) {
        let mut connection = self.connection.lock();
        connection.leases = connection.leases.saturating_sub(1);
        if connection.leases > 0 {
            return;
        }
        if let Some(task) = connection.task.take() {
            task.abort();
            self.set_status(ReadyState::Closed);
            drop(connection);
            debug!(event = "transport_released", url = %self.config.url);
        }
    }

    /// Status update from a connection task. Ignored once that task has been
    /// released or shut down; the check and the update happen under the same
    /// lock as `release` and `shutdown`.
    fn publish_status(&self, generation: u64, next: ReadyState) -> bool {
        let connection = self.connection.lock();
        let current = connection.task.is_some()
            && !connection.shut_down
            && connection.generation == generation;
        if current {
            self.set_status(next);
        }
        current
    }

    fn set_status(&self, next: ReadyState) {
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    async fn connection_loop(self: Arc<Self>, generation: u64) {
        let mut outbound = Arc::clone(&self.outbound_rx).lock_owned().await;
        let mut outbox = Outbox::default();
        let mut backoff = self.config.reconnect.initial;
        loop {
            self.publish_status(generation, ReadyState::Connecting);
            let mut socket = match self.connect().await {
                Some(socket) => socket,
                None => {
                    self.publish_status(generation, ReadyState::Closed);
                    hold(backoff, &mut outbound, &mut outbox).await;
                    backoff = self.config.reconnect.next(backoff);
                    continue;
                }
            };
            backoff = self.config.reconnect.initial;

            while let Ok(message) = outbound.try_recv() {
                outbox.push(message);
            }
            self.publish_status(generation, ReadyState::Open);
            info!(event = "ws_open", url = %self.config.url, queued = outbox.len());

            if self.flush(&mut socket, &mut outbox).await {
                self.pump(&mut socket, &mut outbound, &mut outbox).await;
            }

            self.publish_status(generation, ReadyState::Closing);
            let _ = socket.close(None).await;
            self.publish_status(generation, ReadyState::Closed);
            info!(event = "ws_closed", url = %self.config.url, retry_ms = backoff.as_millis() as u64);
            hold(backoff, &mut outbound, &mut outbox).await;
            backoff = self.config.reconnect.next(backoff);
        }
    }

    async fn connect(&self) -> Option<Socket> {
        let attempt =
            tokio::time::timeout(self.config.connect_timeout, connect_async(self.config.url.as_str()))
                .await;
        match attempt {
            Ok(Ok((socket, _))) => Some(socket),
            Ok(Err(err)) => {
                warn!(event = "ws_connect_error", url = %self.config.url, error = %err);
                None
            }
            Err(_) => {
                warn!(event = "ws_connect_timeout", url = %self.config.url);
                None
            }
        }
    }

    async fn flush(&self, socket: &mut Socket, outbox: &mut Outbox) -> bool {
        while let Some(message) = outbox.pop_front() {
            if let Err(err) = socket.send(Message::Text(message.frame.clone())).await {
                warn!(event = "ws_write_error", key = %message.key, error = %err);
                outbox.push_front(message);
                return false;
            }
        }
        true
    }

    async fn pump(
        &self,
        socket: &mut Socket,
        outbound: &mut mpsc::Receiver<Outgoing>,
        outbox: &mut Outbox,
    ) {
        loop {
            tokio::select! {
                incoming = socket.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text),
                        Some(Ok(Message::Close(frame))) => {
                            debug!(event = "ws_close_frame", frame = ?frame);
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "ws_read_error", error = %err);
                            break;
                        }
                        None => break,
                    }
                }
                next = outbound.recv() => {
                    let Some(message) = next else {
                        break;
                    };
                    if let Err(err) = socket.send(Message::Text(message.frame.clone())).await {
                        warn!(event = "ws_write_error", key = %message.key, error = %err);
                        outbox.push(message);
                        break;
                    }
                }
            }
        }
    }

    pub(crate) fn dispatch(&self, text: &str) {
        match decode_event(text, self.config.max_frame_bytes) {
            Ok(event) => {
                let _ = self.inbound.send(event);
            }
            Err(err) => {
                debug!(event = "ws_frame_dropped", error = %err);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn drain_queued(&self) -> Vec<SocketEvent> {
        let mut queued = Vec::new();
        if let Ok(mut outbound) = self.outbound_rx.try_lock() {
            while let Ok(message) = outbound.try_recv() {
                if let Ok(event) = decode_event(&message.frame, self.config.max_frame_bytes) {
                    queued.push(event);
                }
            }
        }
        queued
    }
}

/// Waits out the reconnect delay while folding new sends into the outbox.
async fn hold(delay: Duration, outbound: &mut mpsc::Receiver<Outgoing>, outbox: &mut Outbox) {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => break,
            next = outbound.recv() => {
                match next {
                    Some(message) => outbox.push(message),
                    None => {
                        sleep.as_mut().await;
                        break;
                    }
                }
            }
        }
    }
}

pub struct Lease {
    transport: Arc<Transport>,
}

impl Lease {
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl Clone for Lease {
    fn clone(&self) -> Self {
        self.transport.acquire()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.transport.release();
    }
}

pub struct Subscription {
    inbound: broadcast::Receiver<SocketEvent>,
    _lease: Lease,
}

impl Subscription {
    /// Next well-formed inbound message. Returns `None` once the transport is gone.
    pub async fn recv(&mut self) -> Option<SocketEvent> {
        loop {
            match self.inbound.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(event = "inbound_lagged", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outgoing(key: &str, frame: &str) -> Outgoing {
        Outgoing {
            key: key.to_string(),
            frame: frame.to_string(),
        }
    }

    fn test_config() -> TransportConfig {
        TransportConfig::new(Url::parse("ws://127.0.0.1:9/ws").expect("url"))
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let backoff = Backoff::default();
        let mut delay = backoff.initial;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay.as_secs());
            delay = backoff.next(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn backoff_never_stalls_at_zero() {
        let backoff = Backoff {
            initial: Duration::ZERO,
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.next(Duration::ZERO), MIN_BACKOFF);
    }

    #[test]
    fn outbox_keeps_latest_message_per_key_in_first_seen_order() {
        let mut outbox = Outbox::default();
        outbox.push(outgoing("volume", "v10"));
        outbox.push(outgoing("active-device", "kitchen"));
        outbox.push(outgoing("volume", "v30"));

        assert_eq!(outbox.len(), 2);
        let first = outbox.pop_front().expect("first");
        assert_eq!((first.key.as_str(), first.frame.as_str()), ("volume", "v30"));
        let second = outbox.pop_front().expect("second");
        assert_eq!(second.key, "active-device");
        assert!(outbox.pop_front().is_none());
    }

    #[test]
    fn send_rejects_oversized_frames() {
        let mut config = test_config();
        config.max_frame_bytes = 32;
        let transport = Transport::detached(config);
        let result = transport.send(SocketEvent::new("favorites", json!("x".repeat(64))));
        assert!(matches!(result, Err(SyncError::Wire(_))));
        assert!(transport.drain_queued().is_empty());
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let mut config = test_config();
        config.outbound_capacity = 2;
        let transport = Transport::detached(config);
        for volume in [10, 20, 30] {
            transport
                .send(SocketEvent::new("volume", json!(volume)))
                .expect("send");
        }
        let queued = transport.drain_queued();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].data, json!(20));
    }

    #[tokio::test]
    async fn leases_are_reference_counted() {
        let transport = Transport::detached(test_config());
        assert_eq!(transport.status(), ReadyState::Uninstantiated);
        let first = transport.acquire();
        let second = first.clone();
        let subscription = transport.subscribe();
        assert_eq!(transport.lease_count(), 3);
        drop(first);
        drop(subscription);
        assert_eq!(transport.lease_count(), 1);
        drop(second);
        assert_eq!(transport.lease_count(), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_each_frame_in_order_and_skip_malformed_ones() {
        let transport = Transport::detached(test_config());
        let mut first = transport.subscribe();
        let mut second = transport.subscribe();

        transport.dispatch(r#"{"type":"volume"}"#);
        transport.dispatch(r#"{"type":"volume","data":40}"#);
        transport.dispatch("not json");
        transport.dispatch(r#"{"type":"devices","data":["Kitchen"]}"#);

        for subscription in [&mut first, &mut second] {
            let volume = subscription.recv().await.expect("volume");
            assert_eq!(volume, SocketEvent::new("volume", json!(40)));
            let devices = subscription.recv().await.expect("devices");
            assert_eq!(devices.kind, "devices");
        }
    }

    #[tokio::test]
    async fn aborted_connection_task_cannot_reopen_after_shutdown() {
        let transport = Transport::new(test_config());
        let lease = transport.acquire();
        let generation = transport.connection.lock().generation;
        transport.shutdown();
        assert_eq!(transport.status(), ReadyState::Closed);

        assert!(!transport.publish_status(generation, ReadyState::Open));
        assert_eq!(transport.status(), ReadyState::Closed);
        drop(lease);
    }

    #[tokio::test]
    async fn released_connection_task_cannot_overwrite_its_successor() {
        let transport = Transport::new(test_config());
        let lease = transport.acquire();
        let stale = transport.connection.lock().generation;
        drop(lease);
        assert_eq!(transport.status(), ReadyState::Closed);
        assert!(!transport.publish_status(stale, ReadyState::Open));
        assert_eq!(transport.status(), ReadyState::Closed);

        let lease = transport.acquire();
        let current = transport.connection.lock().generation;
        assert_ne!(current, stale);
        assert!(!transport.publish_status(stale, ReadyState::Open));
        assert!(transport.publish_status(current, ReadyState::Connecting));
        assert_eq!(transport.status(), ReadyState::Connecting);
        transport.shutdown();
        drop(lease);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_oldest_frames() {
        let mut config = test_config();
        config.inbound_capacity = 2;
        let transport = Transport::detached(config);
        let mut subscription = transport.subscribe();

        for volume in [10, 20, 30, 40] {
            transport.dispatch(&format!(r#"{{"type":"volume","data":{volume}}}"#));
        }

        let first = subscription.recv().await.expect("frame");
        assert_eq!(first.data, json!(30));
        let second = subscription.recv().await.expect("frame");
        assert_eq!(second.data, json!(40));
    }
}
