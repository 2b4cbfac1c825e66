use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::AppState;

// ─── GET /api/alerts/stream ──────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes one `alerts` event per cycle that raised at least one alert,
/// carrying that cycle's full `AlertEvent` sequence in evaluation order.
/// A subscriber that falls behind gets a `lagged` event with the number
/// of cycles it missed.
pub async fn alerts_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.monitor.subscribe_alerts()).map(|msg| {
        let event = match msg {
            Ok(cycle) => {
                let json = serde_json::to_string(&cycle).unwrap_or_default();
                Event::default().event("alerts").data(json)
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                Event::default().event("lagged").data(missed.to_string())
            }
        };
        Ok(event)
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
