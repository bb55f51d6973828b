/**
 * Presence Subscription Handler
 *
 * `GET /events` streams presence changes as Server-Sent Events.
 *
 * # Event Filtering
 *
 * - `?kinds=online,offline` - both (the default)
 * - `?kinds=offline` - disconnections only
 *
 * Unknown kinds are ignored; a filter with no known kind means "all".
 *
 * # Connection Management
 *
 * - Keep-alive comments are injected by axum's `KeepAlive`
 * - A lagging subscriber skips the events it missed and keeps streaming
 * - 503 when the broker is disabled, since presence events only flow
 *   through the broker
 *
 * # Example Response
 *
 * ```text
 * event: online
 * data: {"kind":"online","identity":"alice","metadata":{"shard_id":"0"},"timestamp":"..."}
 * ```
 */

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream;
use tokio::sync::broadcast::error::RecvError;

use crate::backend::error::BackendError;
use crate::backend::realtime::broadcast::BroadcastBroker;
use crate::backend::services::{BrokerEvent, PresenceKind};

/// Parse `kinds=online,offline`; `None` means every kind
pub fn parse_kinds(query: &HashMap<String, String>) -> Option<Vec<PresenceKind>> {
    query
        .get("kinds")
        .map(|kinds| kinds.split(',').filter_map(PresenceKind::parse).collect::<Vec<_>>())
        .filter(|kinds| !kinds.is_empty())
}

pub async fn handle_presence_stream(
    State(broker): State<Option<BroadcastBroker>>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, axum::Error>>>, BackendError> {
    let broker = broker.ok_or_else(|| {
        BackendError::handler(StatusCode::SERVICE_UNAVAILABLE, "presence events need the broker enabled")
    })?;
    let filter = parse_kinds(&query);
    tracing::info!("[Broker] Presence subscriber attached (kinds {:?})", filter);

    let events = broker.subscribe();
    let stream = stream::unfold((events, filter), |(mut events, filter)| async move {
        loop {
            let presence = match events.recv().await {
                Ok(BrokerEvent::Presence(presence)) => presence,
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("[Broker] Presence subscriber lagged, skipped {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };
            if filter.as_ref().is_some_and(|kinds| !kinds.contains(&presence.kind)) {
                continue;
            }
            let data = match serde_json::to_string(&presence) {
                Ok(data) => data,
                Err(err) => {
                    tracing::error!("[Broker] Failed to serialize presence event: {}", err);
                    continue;
                }
            };
            let event = Event::default().event(presence.kind.as_str()).data(data);
            return Some((Ok(event), (events, filter)));
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
