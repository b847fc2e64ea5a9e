use crate::debounce::Debouncer;
use crate::store::{Entry, EventStore};
use crate::transport::{Lease, ReadyState, Transport};
use crate::SyncError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use tunehub_core::{canonical_key, SocketEvent};

/// Writes one key: locally first, then to the controller.
pub struct Setter<T> {
    key: Arc<str>,
    store: Arc<EventStore>,
    transport: Arc<Transport>,
    marker: PhantomData<fn(T)>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            marker: PhantomData,
        }
    }
}

impl<T: Serialize> Setter<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Optimistic local write plus fire-and-forget send. The local value
    /// stands until a later inbound message for the key replaces it.
    pub fn set(&self, value: &T) -> Result<(), SyncError> {
        let raw = self.set_local(value)?;
        self.transport.send(SocketEvent::new(self.key.as_ref(), raw))
    }

    pub fn set_local(&self, value: &T) -> Result<Value, SyncError> {
        let raw = self.encode(value)?;
        self.store.write(&self.key, raw.clone());
        Ok(raw)
    }

    pub fn publish(&self, value: &T) -> Result<(), SyncError> {
        let raw = self.encode(value)?;
        self.transport.send(SocketEvent::new(self.key.as_ref(), raw))
    }

    fn encode(&self, value: &T) -> Result<Value, SyncError> {
        serde_json::to_value(value).map_err(|err| SyncError::Serialize {
            key: self.key.to_string(),
            message: err.to_string(),
        })
    }
}

/// Live read/write handle for one event key.
pub struct EventChannel<T> {
    setter: Setter<T>,
    default: Option<T>,
    updates: watch::Receiver<Option<Entry>>,
    _lease: Lease,
}

impl<T> EventChannel<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Binds `key`. A default is seeded into the store only when the key has
    /// no value yet, so every binding of a key sees the same value.
    pub fn bind(
        store: &Arc<EventStore>,
        transport: &Arc<Transport>,
        key: &str,
        default: Option<T>,
    ) -> Self {
        let key: Arc<str> = Arc::from(canonical_key(key));
        if let Some(value) = &default {
            match serde_json::to_value(value) {
                Ok(raw) => {
                    store.init_default(&key, raw);
                }
                Err(err) => warn!(event = "default_encode_failed", key = %key, error = %err),
            }
        }
        let updates = store.watch(&key);
        Self {
            setter: Setter {
                key,
                store: Arc::clone(store),
                transport: Arc::clone(transport),
                marker: PhantomData,
            },
            default,
            updates,
            _lease: transport.acquire(),
        }
    }

    pub fn key(&self) -> &str {
        self.setter.key()
    }

    /// Current value, or the bound default when the key is absent or its
    /// stored shape does not decode as `T`.
    pub fn get(&self) -> Option<T> {
        let current = self.updates.borrow().as_ref().map(|entry| entry.value.clone());
        self.decode(current)
    }

    pub fn entry(&self) -> Option<Entry> {
        self.updates.borrow().clone()
    }

    pub fn set(&self, value: T) -> Result<(), SyncError> {
        self.setter.set(&value)
    }

    pub fn set_local(&self, value: &T) -> Result<(), SyncError> {
        self.setter.set_local(value).map(|_| ())
    }

    pub fn publish(&self, value: &T) -> Result<(), SyncError> {
        self.setter.publish(value)
    }

    pub fn status(&self) -> ReadyState {
        self.setter.transport.status()
    }

    pub fn setter(&self) -> Setter<T> {
        self.setter.clone()
    }

    /// `(value, setter, status)`, the shape UI code binds against.
    pub fn parts(&self) -> (Option<T>, Setter<T>, ReadyState) {
        (self.get(), self.setter(), self.status())
    }

    /// Waits for the next write to the key. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<T> {
        self.updates.changed().await.ok()?;
        let current = self.updates.borrow_and_update().as_ref().map(|entry| entry.value.clone());
        self.decode(current)
    }

    fn decode(&self, current: Option<Value>) -> Option<T> {
        let Some(raw) = current else {
            return self.default.clone();
        };
        match serde_json::from_value(raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(event = "channel_decode_failed", key = %self.key(), error = %err);
                self.default.clone()
            }
        }
    }
}

impl<T> EventChannel<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
    /// Setter that updates the store on every call but sends only the last
    /// value of a burst, after `quiet` without calls.
    pub fn debounced(&self, quiet: Duration) -> DebouncedSetter<T> {
        let setter = self.setter();
        let publisher = self.setter();
        let debouncer = Debouncer::new(quiet, move |value: T| {
            if let Err(err) = publisher.publish(&value) {
                warn!(event = "debounced_send_failed", key = %publisher.key(), error = %err);
            }
        });
        DebouncedSetter { setter, debouncer }
    }
}

pub struct DebouncedSetter<T> {
    setter: Setter<T>,
    debouncer: Debouncer<T>,
}

impl<T> DebouncedSetter<T>
where
    T: Serialize + Send + 'static,
{
    pub fn set(&self, value: T) -> Result<(), SyncError> {
        self.setter.set_local(&value)?;
        self.debouncer.call(value);
        Ok(())
    }

    pub fn dispose(&self) {
        self.debouncer.dispose();
    }
}
