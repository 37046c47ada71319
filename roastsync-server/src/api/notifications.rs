//! Notification stream

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use super::Caller;
use crate::AppState;

/// GET /api/v1/notifications/stream
///
/// Production-task notifications addressed to the caller.
pub async fn notification_stream(
    State(state): State<AppState>,
    Caller(user_id): Caller,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    roastsync_common::sse::notification_stream(&state.hub, user_id)
}
