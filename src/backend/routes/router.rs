/**
 * Router Configuration
 *
 * Assembles every HTTP route into a single axum router:
 *
 * - `GET /ws` - WebSocket upgrade (gateway)
 * - `GET /events` - presence stream (SSE)
 * - monitor routes (`/monitor/...`, `/health`)
 * - offline message routes (`/messages/...`)
 *
 * Requests are traced with `tower_http::trace::TraceLayer`.
 */

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::backend::gateway::handle_upgrade;
use crate::backend::realtime::handle_presence_stream;
use crate::backend::routes::message_routes::configure_message_routes;
use crate::backend::routes::monitor_routes::configure_monitor_routes;
use crate::backend::server::state::AppState;

pub fn create_router(app_state: AppState) -> Router<()> {
    let router = Router::new()
        .route("/ws", get(handle_upgrade))
        .route("/events", get(handle_presence_stream));

    let router = configure_monitor_routes(router);
    let router = configure_message_routes(router);

    router
        .fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "404 Not Found") })
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
