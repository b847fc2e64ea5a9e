use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::debug;
use tunehub_core::{canonical_key, SocketEvent};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Remote,
    Local,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub revision: u64,
    pub origin: Origin,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub entry: Entry,
}

pub type StoreSnapshot = BTreeMap<String, Value>;

struct Slots {
    by_key: HashMap<String, watch::Sender<Option<Entry>>>,
    revision: u64,
}

struct Activity {
    at: Instant,
    wall: DateTime<Utc>,
}

/// Observers must not write back into the store from inside a change handler.
pub struct EventStore {
    slots: RwLock<Slots>,
    changes: broadcast::Sender<StoreChange>,
    activity: Mutex<Activity>,
}

impl EventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slots: RwLock::new(Slots {
                by_key: HashMap::new(),
                revision: 0,
            }),
            changes: broadcast::channel(CHANGE_CHANNEL_CAPACITY).0,
            activity: Mutex::new(Activity {
                at: Instant::now(),
                wall: Utc::now(),
            }),
        })
    }

    pub fn read(&self, key: &str) -> Option<Value> {
        self.entry(key).map(|entry| entry.value)
    }

    pub fn entry(&self, key: &str) -> Option<Entry> {
        let slots = self.slots.read();
        slots
            .by_key
            .get(key)
            .and_then(|slot| slot.borrow().clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    /// Local write: overwrites the value and counts as activity.
    pub fn write(&self, key: &str, value: Value) -> Entry {
        let entry = self.put(key, value, Origin::Local);
        self.touch();
        entry
    }

    /// Applies a message received from the controller. Legacy key spellings
    /// are folded onto their canonical key.
    pub fn apply_inbound(&self, event: SocketEvent) -> Entry {
        let key = canonical_key(&event.kind);
        let entry = self.put(key, event.data, Origin::Remote);
        self.touch();
        entry
    }

    /// Seeds `key` unless it already holds a value. Seeding is not activity.
    pub fn init_default(&self, key: &str, value: Value) -> bool {
        let mut slots = self.slots.write();
        let present = slots
            .by_key
            .get(key)
            .is_some_and(|slot| slot.borrow().is_some());
        if present {
            return false;
        }
        self.put_locked(&mut slots, key, value, Origin::Default);
        true
    }

    pub fn watch(&self, key: &str) -> watch::Receiver<Option<Entry>> {
        let mut slots = self.slots.write();
        slots
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let slots = self.slots.read();
        slots
            .by_key
            .iter()
            .filter_map(|(key, slot)| {
                slot.borrow()
                    .as_ref()
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    /// Records activity without changing any value, e.g. a touch on the screen.
    pub fn touch(&self) {
        let mut activity = self.activity.lock();
        activity.at = Instant::now();
        activity.wall = Utc::now();
    }

    pub fn last_activity(&self) -> Instant {
        self.activity.lock().at
    }

    pub fn last_event_at(&self) -> DateTime<Utc> {
        self.activity.lock().wall
    }

    fn put(&self, key: &str, value: Value, origin: Origin) -> Entry {
        let mut slots = self.slots.write();
        self.put_locked(&mut slots, key, value, origin)
    }

    fn put_locked(&self, slots: &mut Slots, key: &str, value: Value, origin: Origin) -> Entry {
        slots.revision += 1;
        let entry = Entry {
            value,
            revision: slots.revision,
            origin,
            updated_at: Utc::now(),
        };
        slots
            .by_key
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(entry.clone()));
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            entry: entry.clone(),
        });
        debug!(event = "store_write", key = %key, revision = entry.revision, origin = ?origin);
        entry
    }
}
