//! Periodic live broadcast.

use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::classifier::triage_or_fallback;
use crate::protocol::{LiveDebug, OutboundMessage};
use crate::state::AppState;

/// Run live ticks at the configured interval until `shutdown` fires.
pub async fn live_tick_task(state: AppState, shutdown: CancellationToken) {
    let period = state.config().tick_interval();
    let mut interval = tokio::time::interval(period);
    // A slow classifier delays the next tick instead of causing a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(tick_ms = period.as_millis() as u64, "live tick task started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                run_tick(&state, Instant::now()).await;
            }
        }
    }
    info!("live tick task stopped");
}

/// One tick: summarize, score and fan out.
///
/// Returns the number of subscribers the live message was sent to, or
/// `None` when nobody was listening and only the window was trimmed.
pub async fn run_tick(state: &AppState, now: Instant) -> Option<usize> {
    let config = state.config();
    if state.hub().subscriber_count() == 0 {
        state.with_core(|core| core.live.trim(now, config.window_seconds));
        return None;
    }

    let policy = state.staleness();
    let (view, audio, tick) = state.with_core(|core| {
        core.tick += 1;
        let view = policy.live_view(
            &mut core.live,
            core.last_packet_at,
            now,
            config.window_seconds,
            config.top_regions,
        );
        (view, core.audio.clone(), core.tick)
    });

    let triage = triage_or_fallback(
        state.classifier(),
        &view.summary,
        &audio,
        config.classifier_timeout(),
    )
    .await;

    let message = OutboundMessage::Live {
        presage: view.summary,
        triage,
        debug: LiveDebug {
            last_packet_age_ms: view.last_packet_age_ms,
            simulated: view.simulated,
            tick,
        },
    };
    match state.hub().publish_live(&message) {
        Ok(receivers) => {
            debug!(tick, receivers, simulated = view.simulated, "live tick");
            Some(receivers)
        }
        Err(e) => {
            error!(tick, error = %e, "cannot encode live message");
            Some(0)
        }
    }
}
