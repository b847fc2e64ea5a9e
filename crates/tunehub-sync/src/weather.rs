use crate::config::GeoLocation;
use crate::SyncError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const OPEN_METEO_FORECAST: &str = "https://api.open-meteo.com/v1/forecast";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct Forecast {
    current: Option<CurrentConditions>,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: Option<f64>,
}

/// Current temperature for the screen-saver clock.
#[derive(Clone)]
pub struct WeatherClient {
    http: Client,
    endpoint: String,
}

impl WeatherClient {
    pub fn new() -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(http, OPEN_METEO_FORECAST)
    }

    pub fn with_client(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
        }
    }

    pub fn forecast_url(&self, location: GeoLocation) -> Result<Url, SyncError> {
        Url::parse_with_params(
            &self.endpoint,
            &[
                ("latitude", location.latitude.to_string()),
                ("longitude", location.longitude.to_string()),
                ("current", "temperature_2m".to_string()),
            ],
        )
        .map_err(|err| SyncError::InvalidUrl(format!("{}: {err}", self.endpoint)))
    }

    /// Degrees Celsius, or `None` when the request or the payload fails.
    pub async fn current_temperature(&self, location: GeoLocation) -> Option<f64> {
        let url = match self.forecast_url(location) {
            Ok(url) => url,
            Err(err) => {
                debug!(event = "weather_request_failed", error = %err);
                return None;
            }
        };
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(event = "weather_request_failed", error = %err);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(event = "weather_unexpected_status", status = %response.status());
            return None;
        }
        match response.json::<Forecast>().await {
            Ok(forecast) => temperature_of(forecast),
            Err(err) => {
                debug!(event = "weather_decode_failed", error = %err);
                None
            }
        }
    }
}

impl Default for WeatherClient {
    fn default() -> Self {
        Self::new()
    }
}

fn temperature_of(forecast: Forecast) -> Option<f64> {
    forecast
        .current
        .and_then(|current| current.temperature_2m)
        .filter(|value| value.is_finite())
}
