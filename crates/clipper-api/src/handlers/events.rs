//! Live status event stream (Server-Sent Events).

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use tracing::info;

use crate::auth::AuthUser;
use crate::state::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// `GET /api/v1/events`
///
/// Streams the caller's status updates as `status_update` events. The
/// subscription lives inside the stream, so a client disconnect drops it and
/// unregisters the connection.
pub async fn stream_events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let subscription = state.notifier.subscribe(&user.user_id);
    info!(
        user_id = %user.user_id,
        connection = subscription.id(),
        "Live event stream opened"
    );

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse = Event::default().event(event.name).json_data(&event.payload);
        Some((sse, subscription))
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}
