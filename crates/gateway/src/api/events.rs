//! `GET /api/events`: server-sent stream of status snapshots.
//!
//! The first event is the current snapshot; after that one event per
//! published change.  Event ids are the snapshot `seq`, which only grows.

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::Stream;
use tokio::sync::broadcast::error::RecvError;

use wb_session::StatusSnapshot;

use crate::state::AppState;

fn status_event(snapshot: &StatusSnapshot) -> Option<Event> {
    let data = serde_json::to_string(snapshot).ok()?;
    Some(
        Event::default()
            .event("status")
            .id(snapshot.seq.to_string())
            .data(data),
    )
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    // Subscribe before reading the current snapshot so nothing published
    // in between is missed.
    let mut rx = state.session.subscribe();
    let initial = state.session.get_status().await.ok();

    let stream = async_stream::stream! {
        let mut last_seq = 0;
        if let Some(snapshot) = initial {
            last_seq = snapshot.seq;
            if let Some(event) = status_event(&snapshot) {
                yield Ok(event);
            }
        }
        loop {
            match rx.recv().await {
                Ok(snapshot) => {
                    if snapshot.seq <= last_seq {
                        continue;
                    }
                    last_seq = snapshot.seq;
                    if let Some(event) = status_event(&snapshot) {
                        yield Ok(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "status subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
