mod logging;
mod screen;

use anyhow::Context;
use screen::{resolve_screen, ScreenRouter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tunehub_core::{EventKey, NowPlaying};
use tunehub_sync::config::GeoLocation;
use tunehub_sync::cover_art::track_art_url;
use tunehub_sync::weather::WeatherClient;
use tunehub_sync::{
    ClientConfig, IdleMonitor, Player, PlayerConfig, StoreChange, SyncSession,
};
use url::Url;

const WEATHER_REFRESH: Duration = Duration::from_secs(15 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env().context("invalid kiosk configuration")?;
    let _log_guard = logging::init(&config);
    info!(
        event = "kiosk_start",
        url = %config.websocket_url,
        locale = %config.locale,
        width = config.screen.width,
        height = config.screen.height
    );

    let session = SyncSession::start(config.transport.clone());
    let player = Player::new(
        &session,
        PlayerConfig {
            volume_debounce: config.volume_debounce,
        },
    );
    let idle = IdleMonitor::new(config.idle).spawn(Arc::clone(session.store()));
    let mut idle_rx = idle.watch();
    let mut status_rx = session.watch_status();
    let mut changes = session.store().changes();
    let (temperature_tx, mut temperature_rx) = watch::channel(None);
    let weather = config
        .location
        .map(|location| tokio::spawn(weather_loop(WeatherClient::new(), location, temperature_tx)));
    let mut weather_live = weather.is_some();

    let mut router = ScreenRouter::new(resolve_screen(
        idle.state(),
        player.needs_device_selection(),
    ));
    info!(event = "screen", screen = %router.current());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(event = "kiosk_stop");
                break;
            }
            changed = idle_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = *status_rx.borrow_and_update();
                info!(event = "connection_status", status = %status);
                continue;
            }
            changed = temperature_rx.changed(), if weather_live => {
                if changed.is_err() {
                    weather_live = false;
                } else if let Some(celsius) = *temperature_rx.borrow_and_update() {
                    info!(event = "temperature", celsius);
                }
                continue;
            }
            change = changes.recv() => {
                match change {
                    Ok(change) => log_change(&change, &config.api_base),
                    Err(RecvError::Lagged(skipped)) => warn!(event = "store_changes_lagged", skipped),
                    Err(RecvError::Closed) => break,
                }
            }
        }
        let idle_state = *idle_rx.borrow_and_update();
        if let Some(screen) = router.next(idle_state, player.needs_device_selection()) {
            info!(
                event = "screen",
                screen = %screen,
                idle = idle_state.as_str(),
                last_event = %player.last_event_time().to_rfc3339()
            );
        }
    }

    if let Some(task) = weather {
        task.abort();
    }
    player.dispose();
    idle.shutdown();
    session.shutdown();
    Ok(())
}

fn log_change(change: &StoreChange, api_base: &Url) {
    debug!(
        event = "state_changed",
        key = %change.key,
        revision = change.entry.revision,
        origin = ?change.entry.origin
    );
    if change.key != EventKey::Play.as_str() {
        return;
    }
    let Ok(now_playing) = serde_json::from_value::<NowPlaying>(change.entry.value.clone()) else {
        return;
    };
    let Some(track) = now_playing.track_info else {
        return;
    };
    let art = track_art_url(api_base, &track);
    info!(
        event = "now_playing",
        title = track.title.as_deref().unwrap_or(""),
        artist = track.artist.as_deref().unwrap_or(""),
        art = art.as_ref().map(Url::as_str).unwrap_or("")
    );
}

async fn weather_loop(
    client: WeatherClient,
    location: GeoLocation,
    temperature: watch::Sender<Option<f64>>,
) {
    let mut refresh = tokio::time::interval(WEATHER_REFRESH);
    loop {
        refresh.tick().await;
        let reading = client.current_temperature(location).await;
        temperature.send_replace(reading);
    }
}
