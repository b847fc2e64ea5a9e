use std::fmt;
use std::str::FromStr;

pub mod payloads;
pub mod wire;

pub use payloads::{
    clamp_volume, DeviceRef, ErrorPayload, Favorite, NowPlaying, PlaybackState, TrackInfo, Volume,
    DEFAULT_VOLUME, MAX_VOLUME, MIN_VOLUME,
};
pub use wire::{decode_event, encode_event, SocketEvent, WireError, DEFAULT_MAX_FRAME_BYTES};

/// Event keys with a fixed payload shape. The wire schema stays open: any
/// other key is carried as a plain string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKey {
    Volume,
    Devices,
    ActiveDevice,
    TargetDevice,
    Favorites,
    Play,
    PlaybackState,
    Error,
}

impl EventKey {
    pub const ALL: [EventKey; 8] = [
        EventKey::Volume,
        EventKey::Devices,
        EventKey::ActiveDevice,
        EventKey::TargetDevice,
        EventKey::Favorites,
        EventKey::Play,
        EventKey::PlaybackState,
        EventKey::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKey::Volume => "volume",
            EventKey::Devices => "devices",
            EventKey::ActiveDevice => "active-device",
            EventKey::TargetDevice => "target-device",
            EventKey::Favorites => "favorites",
            EventKey::Play => "play",
            EventKey::PlaybackState => "playback-state",
            EventKey::Error => "error",
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "volume" => Ok(EventKey::Volume),
            "devices" => Ok(EventKey::Devices),
            "active-device" => Ok(EventKey::ActiveDevice),
            "target-device" => Ok(EventKey::TargetDevice),
            "favorites" => Ok(EventKey::Favorites),
            "play" => Ok(EventKey::Play),
            "playback-state" | "pause" => Ok(EventKey::PlaybackState),
            "error" => Ok(EventKey::Error),
            other => Err(format!("Unknown event key: {other}")),
        }
    }
}

impl From<EventKey> for String {
    fn from(key: EventKey) -> Self {
        key.as_str().to_string()
    }
}

/// Maps legacy key spellings onto the key they are stored under.
/// Unknown keys pass through untouched.
pub fn canonical_key(raw: &str) -> &str {
    match raw {
        "pause" => EventKey::PlaybackState.as_str(),
        other => other,
    }
}
