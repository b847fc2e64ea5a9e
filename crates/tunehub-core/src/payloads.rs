use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

pub const MIN_VOLUME: u8 = 0;
pub const MAX_VOLUME: u8 = 100;
pub const DEFAULT_VOLUME: u8 = 50;

pub fn clamp_volume(raw: i64) -> u8 {
    raw.clamp(i64::from(MIN_VOLUME), i64::from(MAX_VOLUME)) as u8
}

/// Reference to a playback target, used by `active-device` and `target-device`.
/// Kiosk writes carry `device_name`; the controller may answer with its own
/// `id` and a display `name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceRef {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl DeviceRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// The value to send back when selecting this device: `device_name`,
    /// falling back to the controller's `id`.
    pub fn identifier(&self) -> Option<&str> {
        non_blank(self.device_name.as_deref()).or_else(|| non_blank(self.id.as_deref()))
    }

    pub fn display_name(&self) -> Option<&str> {
        non_blank(self.name.as_deref()).or_else(|| self.identifier())
    }
}

fn non_blank(text: Option<&str>) -> Option<&str> {
    text.filter(|text| !text.trim().is_empty())
}

/// Volume in `0..=100`. Fractional and out-of-range numbers from the
/// controller are rounded and clamped; numeric strings are accepted.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Volume(pub u8);

impl Volume {
    pub fn new(raw: i64) -> Self {
        Self(clamp_volume(raw))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    fn from_f64(raw: f64) -> Option<Self> {
        if !raw.is_finite() {
            return None;
        }
        let rounded = raw.round().clamp(f64::from(MIN_VOLUME), f64::from(MAX_VOLUME));
        Some(Self(rounded as u8))
    }
}

impl From<u8> for Volume {
    fn from(raw: u8) -> Self {
        Self(raw.min(MAX_VOLUME))
    }
}

impl<'de> Deserialize<'de> for Volume {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        let parsed = match &val {
            Value::Number(n) => match n.as_i64() {
                Some(raw) => Some(Volume::new(raw)),
                None => n.as_f64().and_then(Volume::from_f64),
            },
            Value::String(s) => s.trim().parse::<f64>().ok().and_then(Volume::from_f64),
            _ => None,
        };
        parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid volume: {val}")))
    }
}

/// A preset. On the wire favorites travel as `[name, id, description, album_art]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Favorite {
    pub name: String,
    pub id: String,
    pub description: Option<String>,
    pub album_art: Option<String>,
}

impl Serialize for Favorite {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.name)?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.description)?;
        seq.serialize_element(&self.album_art)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Favorite {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let val = Value::deserialize(deserializer)?;
        match val {
            Value::Array(items) => {
                let mut items = items.into_iter();
                let name = items
                    .next()
                    .and_then(text_field)
                    .ok_or_else(|| serde::de::Error::custom("favorite is missing a name"))?;
                let id = items
                    .next()
                    .and_then(text_field)
                    .ok_or_else(|| serde::de::Error::custom("favorite is missing an id"))?;
                Ok(Favorite {
                    name,
                    id,
                    description: items.next().and_then(text_field),
                    album_art: items.next().and_then(text_field),
                })
            }
            Value::Object(mut map) => {
                let name = map
                    .remove("name")
                    .or_else(|| map.remove("title"))
                    .and_then(text_field)
                    .ok_or_else(|| serde::de::Error::custom("favorite is missing a name"))?;
                let id = map
                    .remove("id")
                    .and_then(text_field)
                    .ok_or_else(|| serde::de::Error::custom("favorite is missing an id"))?;
                Ok(Favorite {
                    name,
                    id,
                    description: map.remove("description").and_then(text_field),
                    album_art: map.remove("album_art").and_then(text_field),
                })
            }
            _ => Err(serde::de::Error::custom(
                "expected array or object for favorite",
            )),
        }
    }
}

/// Ids arrive as strings or numbers depending on the controller.
fn text_field(val: Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackInfo {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album_art: Option<String>,
    #[serde(default, flatten)]
    pub extra: HashMap<String, Value>,
}

/// Payload of `play`: the request carries only `favorite_id`, the peer answers
/// with the resolved track.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_info: Option<TrackInfo>,
}

impl NowPlaying {
    pub fn request(favorite_id: impl Into<String>) -> Self {
        Self {
            favorite_id: Some(favorite_id.into()),
            track_info: None,
        }
    }
}

/// Canonical form is `{"paused": bool}`; `{"isPlaying": bool}` is still accepted.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PlaybackState {
    pub paused: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self { paused: true }
    }
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        !self.paused
    }

    pub fn toggled(self) -> Self {
        Self {
            paused: !self.paused,
        }
    }
}

impl<'de> Deserialize<'de> for PlaybackState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawPlaybackState {
            #[serde(default)]
            paused: Option<bool>,
            #[serde(default, rename = "isPlaying", alias = "is_playing")]
            is_playing: Option<bool>,
        }

        let raw = RawPlaybackState::deserialize(deserializer)?;
        match (raw.paused, raw.is_playing) {
            (Some(paused), _) => Ok(PlaybackState { paused }),
            (None, Some(is_playing)) => Ok(PlaybackState { paused: !is_playing }),
            (None, None) => Err(serde::de::Error::custom(
                "expected `paused` or `isPlaying` in playback state",
            )),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub message: String,
}
