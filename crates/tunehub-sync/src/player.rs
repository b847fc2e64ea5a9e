use crate::channel::{DebouncedSetter, EventChannel};
use crate::session::SyncSession;
use crate::store::EventStore;
use crate::transport::ReadyState;
use crate::SyncError;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tunehub_core::{
    DeviceRef, ErrorPayload, EventKey, Favorite, NowPlaying, PlaybackState, Volume,
    DEFAULT_VOLUME,
};

pub const DEFAULT_VOLUME_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug)]
pub struct PlayerConfig {
    pub volume_debounce: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume_debounce: DEFAULT_VOLUME_DEBOUNCE,
        }
    }
}

/// Typed operations over the well-known keys.
pub struct Player {
    store: Arc<EventStore>,
    volume: EventChannel<Volume>,
    volume_slider: DebouncedSetter<Volume>,
    devices: EventChannel<Vec<String>>,
    active_device: EventChannel<DeviceRef>,
    // Entries are decoded one by one so a single bad preset does not hide the rest.
    favorites: EventChannel<Vec<Value>>,
    now_playing: EventChannel<NowPlaying>,
    playback: EventChannel<PlaybackState>,
    error: EventChannel<ErrorPayload>,
}

impl Player {
    pub fn new(session: &SyncSession, config: PlayerConfig) -> Self {
        let volume = session.bind(EventKey::Volume.as_str(), Some(Volume(DEFAULT_VOLUME)));
        let volume_slider = volume.debounced(config.volume_debounce);
        Self {
            store: Arc::clone(session.store()),
            volume,
            volume_slider,
            devices: session.bind(EventKey::Devices.as_str(), Some(Vec::new())),
            active_device: session.bind(EventKey::ActiveDevice.as_str(), None),
            favorites: session.bind(EventKey::Favorites.as_str(), Some(Vec::new())),
            now_playing: session.bind(EventKey::Play.as_str(), None),
            playback: session.bind(
                EventKey::PlaybackState.as_str(),
                Some(PlaybackState::default()),
            ),
            error: session.bind(EventKey::Error.as_str(), None),
        }
    }

    pub fn status(&self) -> ReadyState {
        self.volume.status()
    }

    pub fn volume(&self) -> u8 {
        self.volume.get().map_or(DEFAULT_VOLUME, Volume::get)
    }

    /// The store follows every call; the controller only sees the level
    /// the slider settles on.
    pub fn change_volume(&self, level: u8) -> Result<(), SyncError> {
        self.volume_slider.set(Volume::from(level))
    }

    pub fn devices(&self) -> Vec<String> {
        self.devices.get().unwrap_or_default()
    }

    pub fn active_device(&self) -> Option<String> {
        self.active_device
            .get()
            .and_then(|device| device.identifier().map(str::to_string))
    }

    /// Label for the active device; the controller's display name when it sent one.
    pub fn active_device_name(&self) -> Option<String> {
        self.active_device
            .get()
            .and_then(|device| device.display_name().map(str::to_string))
    }

    pub fn change_active_device(&self, name: &str) -> Result<(), SyncError> {
        self.active_device.set(DeviceRef::named(name))
    }

    pub fn needs_device_selection(&self) -> bool {
        self.active_device().is_none()
    }

    pub fn favorites(&self) -> Vec<Favorite> {
        self.favorites
            .get()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Favorite>(raw) {
                Ok(favorite) => Some(favorite),
                Err(err) => {
                    debug!(event = "favorite_skipped", error = %err);
                    None
                }
            })
            .collect()
    }

    pub fn current_track(&self) -> Option<NowPlaying> {
        self.now_playing.get()
    }

    /// Asks the controller to start a favorite. Nothing is written locally;
    /// the controller answers with the resolved `play` event.
    pub fn play(&self, favorite_id: &str) -> Result<(), SyncError> {
        self.now_playing.publish(&NowPlaying::request(favorite_id))
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.get().unwrap_or_default()
    }

    pub fn toggle_playback(&self) -> Result<PlaybackState, SyncError> {
        let next = self.playback_state().toggled();
        self.playback.set(next)?;
        Ok(next)
    }

    pub fn last_error(&self) -> Option<String> {
        self.error.get().map(|payload| payload.message)
    }

    pub fn last_event_time(&self) -> DateTime<Utc> {
        self.store.last_event_at()
    }

    pub fn dispose(&self) {
        self.volume_slider.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Transport, TransportConfig};
    use serde_json::json;
    use tunehub_core::SocketEvent;
    use url::Url;

    fn detached_session() -> SyncSession {
        let url = Url::parse("ws://127.0.0.1:9/ws").expect("url");
        SyncSession::with_parts(
            EventStore::new(),
            Transport::detached(TransportConfig::new(url)),
        )
    }

    #[tokio::test]
    async fn defaults_are_seeded_without_traffic() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        assert_eq!(player.volume(), 50);
        assert!(player.devices().is_empty());
        assert!(player.favorites().is_empty());
        assert!(player.playback_state().paused);
        assert!(player.needs_device_selection());
        assert_eq!(player.last_error(), None);
        assert!(session.transport().drain_queued().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn volume_changes_are_clamped_and_debounced() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        player.change_volume(30).expect("volume");
        player.change_volume(180).expect("volume");
        assert_eq!(player.volume(), 100);
        assert!(session.transport().drain_queued().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            session.transport().drain_queued(),
            vec![SocketEvent::new("volume", json!(100))]
        );
    }

    #[tokio::test]
    async fn device_change_sends_device_name() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        player.change_active_device("Kitchen").expect("device");

        assert_eq!(player.active_device().as_deref(), Some("Kitchen"));
        assert!(!player.needs_device_selection());
        assert_eq!(
            session.transport().drain_queued(),
            vec![SocketEvent::new(
                "active-device",
                json!({"device_name": "Kitchen"})
            )]
        );
    }

    #[tokio::test]
    async fn play_is_sent_but_not_stored() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        player.play("fav-3").expect("play");

        assert_eq!(player.current_track(), None);
        assert_eq!(
            session.transport().drain_queued(),
            vec![SocketEvent::new("play", json!({"favorite_id": "fav-3"}))]
        );
    }

    #[tokio::test]
    async fn toggle_flips_the_stored_state() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        let next = player.toggle_playback().expect("toggle");
        assert!(next.is_playing());
        assert!(player.playback_state().is_playing());
        assert_eq!(
            session.transport().drain_queued(),
            vec![SocketEvent::new("playback-state", json!({"paused": false}))]
        );
    }

    #[tokio::test]
    async fn controller_state_is_decoded() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());
        let store = session.store();

        store.apply_inbound(SocketEvent::new("devices", json!(["Kitchen", "Office"])));
        store.apply_inbound(SocketEvent::new(
            "favorites",
            json!([["Radio SRF 3", "srf3", "Pop", null]]),
        ));
        store.apply_inbound(SocketEvent::new("pause", json!({"isPlaying": true})));
        store.apply_inbound(SocketEvent::new(
            "play",
            json!({"favorite_id": "srf3", "track_info": {"title": "Song", "artist": "Band"}}),
        ));
        store.apply_inbound(SocketEvent::new("error", json!({"message": "no device"})));

        assert_eq!(player.devices(), vec!["Kitchen", "Office"]);
        assert_eq!(player.favorites()[0].id, "srf3");
        assert!(player.playback_state().is_playing());
        let track = player.current_track().expect("track");
        assert_eq!(track.favorite_id.as_deref(), Some("srf3"));
        assert_eq!(
            track.track_info.and_then(|info| info.title).as_deref(),
            Some("Song")
        );
        assert_eq!(player.last_error().as_deref(), Some("no device"));
    }

    #[tokio::test]
    async fn fractional_controller_volume_is_rounded() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());
        let store = session.store();

        store.apply_inbound(SocketEvent::new("volume", json!(42.0)));
        assert_eq!(player.volume(), 42);
        store.apply_inbound(SocketEvent::new("volume", json!(42.5)));
        assert_eq!(player.volume(), 43);
        store.apply_inbound(SocketEvent::new("volume", json!(150.2)));
        assert_eq!(player.volume(), 100);
    }

    #[tokio::test]
    async fn one_bad_favorite_does_not_hide_the_others() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());

        session.store().apply_inbound(SocketEvent::new(
            "favorites",
            json!([
                ["SRF 3", "srf3", "Pop", null],
                [null, "jazz", null, null],
                ["Energy", "energy", null, null]
            ]),
        ));

        let ids: Vec<String> = player.favorites().into_iter().map(|fav| fav.id).collect();
        assert_eq!(ids, vec!["srf3", "energy"]);
    }

    #[tokio::test]
    async fn controller_device_id_and_name_are_both_kept() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());
        let store = session.store();

        store.apply_inbound(SocketEvent::new(
            "active-device",
            json!({"device_name": "Kitchen", "id": "RINCON_1"}),
        ));
        assert_eq!(player.active_device().as_deref(), Some("Kitchen"));
        assert!(!player.needs_device_selection());

        store.apply_inbound(SocketEvent::new(
            "active-device",
            json!({"id": "RINCON_2", "name": "Living Room"}),
        ));
        assert_eq!(player.active_device().as_deref(), Some("RINCON_2"));
        assert_eq!(player.active_device_name().as_deref(), Some("Living Room"));
    }

    #[tokio::test]
    async fn blank_device_name_still_needs_selection() {
        let session = detached_session();
        let player = Player::new(&session, PlayerConfig::default());
        session
            .store()
            .apply_inbound(SocketEvent::new("active-device", json!({"device_name": ""})));
        assert!(player.needs_device_selection());
    }
}
