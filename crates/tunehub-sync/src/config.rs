use crate::idle::IdleConfig;
use crate::transport::TransportConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_WEBSOCKET_URL: &str = "ws://localhost:8000/ws";
pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_LOCALE: &str = "de-CH";
const DEFAULT_SCREEN_WIDTH: u32 = 1280;
const DEFAULT_SCREEN_HEIGHT: u32 = 400;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 7 * 60;
const DEFAULT_IDLE_POLL_SECS: u64 = 5;
const DEFAULT_VOLUME_DEBOUNCE_MS: u64 = 250;
const DEFAULT_RECONNECT_MAX_SECS: u64 = 10;
const DEFAULT_INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid url: {value} ({reason})")]
    InvalidUrl {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{key} is not a valid number: {value}")]
    InvalidNumber { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub websocket_url: Url,
    pub api_base: Url,
    pub locale: String,
    pub debug: bool,
    pub screen: ScreenSize,
    pub idle: IdleConfig,
    pub transport: TransportConfig,
    pub volume_debounce: Duration,
    pub location: Option<GeoLocation>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source; blank values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let websocket_url = resolve_websocket_url(&lookup)?;
        let api_base = match lookup_text(&lookup, &["TUNEHUB_API_BASE"]) {
            Some(value) => parse_url("TUNEHUB_API_BASE", &value)?,
            None => parse_url("TUNEHUB_API_BASE", DEFAULT_API_BASE)?,
        };
        let locale = lookup_text(&lookup, &["TUNEHUB_LOCALE", "VITE_LOCALE"])
            .unwrap_or_else(|| DEFAULT_LOCALE.to_string());
        let debug = lookup_text(&lookup, &["TUNEHUB_DEBUG"])
            .and_then(|value| parse_bool(&value))
            .unwrap_or(false);
        let screen = ScreenSize {
            width: lookup_number(&lookup, "TUNEHUB_SCREEN_WIDTH", DEFAULT_SCREEN_WIDTH)?,
            height: lookup_number(&lookup, "TUNEHUB_SCREEN_HEIGHT", DEFAULT_SCREEN_HEIGHT)?,
        };
        let idle = IdleConfig {
            threshold: Duration::from_secs(lookup_number(
                &lookup,
                "TUNEHUB_IDLE_TIMEOUT_SECS",
                DEFAULT_IDLE_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_secs(
                lookup_number(&lookup, "TUNEHUB_IDLE_POLL_SECS", DEFAULT_IDLE_POLL_SECS)?.max(1),
            ),
        };
        let mut transport = TransportConfig::new(websocket_url.clone());
        transport.reconnect.max = Duration::from_secs(
            lookup_number(&lookup, "TUNEHUB_RECONNECT_MAX_SECS", DEFAULT_RECONNECT_MAX_SECS)?
                .max(1),
        );
        if transport.reconnect.initial > transport.reconnect.max {
            transport.reconnect.initial = transport.reconnect.max;
        }
        transport.inbound_capacity =
            lookup_number(&lookup, "TUNEHUB_INBOUND_CAPACITY", DEFAULT_INBOUND_CAPACITY)?.max(1);
        let volume_debounce = Duration::from_millis(lookup_number(
            &lookup,
            "TUNEHUB_VOLUME_DEBOUNCE_MS",
            DEFAULT_VOLUME_DEBOUNCE_MS,
        )?);
        let latitude = lookup_optional_number::<f64, _>(&lookup, "TUNEHUB_LATITUDE")?;
        let longitude = lookup_optional_number::<f64, _>(&lookup, "TUNEHUB_LONGITUDE")?;
        let location = match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoLocation {
                latitude,
                longitude,
            }),
            _ => None,
        };
        let log_level = if debug {
            "debug".to_string()
        } else {
            lookup_text(&lookup, &["TUNEHUB_LOG_LEVEL"]).unwrap_or_else(|| "info".to_string())
        };
        let log_dir = lookup_text(&lookup, &["TUNEHUB_LOG_DIR"]).map(PathBuf::from);

        Ok(Self {
            websocket_url,
            api_base,
            locale,
            debug,
            screen,
            idle,
            transport,
            volume_debounce,
            location,
            log_level,
            log_dir,
        })
    }
}

fn resolve_websocket_url<F>(lookup: &F) -> Result<Url, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let (key, value) = if let Some(value) = lookup_text(lookup, &["TUNEHUB_WEBSOCKET_URL"]) {
        ("TUNEHUB_WEBSOCKET_URL", value)
    } else if let Some(value) = lookup_text(lookup, &["VITE_WEBSOCKET_URL"]) {
        ("VITE_WEBSOCKET_URL", value)
    } else {
        ("TUNEHUB_WEBSOCKET_URL", DEFAULT_WEBSOCKET_URL.to_string())
    };
    let url = parse_url(key, &value)?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::InvalidUrl {
            key,
            value,
            reason: format!("unsupported scheme `{other}`, expected ws or wss"),
        }),
    }
}

fn parse_url(key: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim()).map_err(|err| ConfigError::InvalidUrl {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn lookup_text<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn lookup_number<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    Ok(lookup_optional_number(lookup, key)?.unwrap_or(default))
}

fn lookup_optional_number<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup_text(lookup, &[key]) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { key, value }),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.websocket_url.as_str(), DEFAULT_WEBSOCKET_URL);
        assert_eq!(config.transport.url, config.websocket_url);
        assert_eq!(config.locale, "de-CH");
        assert!(!config.debug);
        assert_eq!(config.idle.threshold, Duration::from_secs(420));
        assert_eq!(config.idle.poll_interval, Duration::from_secs(5));
        assert_eq!(config.volume_debounce, Duration::from_millis(250));
        assert_eq!(config.transport.reconnect.max, Duration::from_secs(10));
        assert!(config.location.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn vite_variables_are_honoured_as_fallback() {
        let config = config_from(&[
            ("VITE_WEBSOCKET_URL", "ws://kiosk.local:9000/ws"),
            ("VITE_LOCALE", "en-GB"),
        ])
        .expect("config");
        assert_eq!(config.websocket_url.as_str(), "ws://kiosk.local:9000/ws");
        assert_eq!(config.locale, "en-GB");

        let config = config_from(&[
            ("TUNEHUB_WEBSOCKET_URL", "wss://controller/ws"),
            ("VITE_WEBSOCKET_URL", "ws://ignored/ws"),
            ("TUNEHUB_LOCALE", "  "),
            ("VITE_LOCALE", "fr-CH"),
        ])
        .expect("config");
        assert_eq!(config.websocket_url.as_str(), "wss://controller/ws");
        assert_eq!(config.locale, "fr-CH");
    }

    #[test]
    fn debug_flag_forces_debug_logging() {
        let config = config_from(&[("TUNEHUB_DEBUG", "yes"), ("TUNEHUB_LOG_LEVEL", "warn")])
            .expect("config");
        assert!(config.debug);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn location_requires_both_coordinates() {
        let config = config_from(&[("TUNEHUB_LATITUDE", "47.37")]).expect("config");
        assert!(config.location.is_none());

        let config = config_from(&[("TUNEHUB_LATITUDE", "47.37"), ("TUNEHUB_LONGITUDE", "8.54")])
            .expect("config");
        assert_eq!(
            config.location,
            Some(GeoLocation {
                latitude: 47.37,
                longitude: 8.54
            })
        );
    }

    #[test]
    fn invalid_values_are_reported() {
        assert!(matches!(
            config_from(&[("TUNEHUB_WEBSOCKET_URL", "http://controller/ws")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            config_from(&[("TUNEHUB_WEBSOCKET_URL", "not a url")]),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert_eq!(
            config_from(&[("TUNEHUB_IDLE_TIMEOUT_SECS", "soon")]).err(),
            Some(ConfigError::InvalidNumber {
                key: "TUNEHUB_IDLE_TIMEOUT_SECS",
                value: "soon".to_string()
            })
        );
    }

    #[test]
    fn reconnect_cap_bounds_the_initial_delay() {
        let config = config_from(&[("TUNEHUB_RECONNECT_MAX_SECS", "0")]).expect("config");
        assert_eq!(config.transport.reconnect.max, Duration::from_secs(1));
        assert!(config.transport.reconnect.initial <= config.transport.reconnect.max);
    }

    #[test]
    fn inbound_capacity_is_configurable() {
        let config = config_from(&[]).expect("config");
        assert_eq!(config.transport.inbound_capacity, 256);

        let config = config_from(&[("TUNEHUB_INBOUND_CAPACITY", "1024")]).expect("config");
        assert_eq!(config.transport.inbound_capacity, 1024);

        let config = config_from(&[("TUNEHUB_INBOUND_CAPACITY", "0")]).expect("config");
        assert_eq!(config.transport.inbound_capacity, 1);
    }
}
