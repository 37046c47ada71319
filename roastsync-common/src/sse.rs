//! Server-Sent Events (SSE) utilities

use crate::events::NotificationHub;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// SSE stream of the notifications addressed to `user_id`
///
/// Emits a `ConnectionStatus` event first, then one `notification` event per
/// matching message. A lagging client skips what it missed and keeps going.
pub fn notification_stream(
    hub: &NotificationHub,
    user_id: Uuid,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected for user {}", user_id);
    let mut rx = hub.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            match rx.recv().await {
                Ok(notification) if notification.target_user_id == user_id => {
                    match serde_json::to_string(&notification) {
                        Ok(data) => yield Ok(Event::default().event("notification").data(data)),
                        Err(e) => warn!("Failed to serialize notification: {}", e),
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("SSE client for user {} lagged, skipped {} notifications", user_id, skipped);
                }
                Err(RecvError::Closed) => {
                    debug!("Notification hub closed, ending SSE stream for {}", user_id);
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
