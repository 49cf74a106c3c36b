use time::OffsetDateTime;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::rooms::Room;
use crate::rooms::submission::Submission;
use crate::{AppResult, AppState};

/// Tear down everything a room owns: file area, cached bundles,
/// submissions, then the room record itself. Shared by the periodic
/// sweep and the lazy per-request expiry path, and idempotent — running
/// it against a half-cleaned or already-gone room finishes the job
/// without error.
pub async fn teardown_room(state: &AppState, room_id: Uuid) -> AppResult<u64> {
    state.files.remove_room_area(room_id).await;
    state.archives.invalidate(room_id).await;
    Submission::delete_all_by_room(&state.db_pool, room_id).await?;
    let removed = Room::delete(&state.db_pool, room_id).await?;
    state.locks.forget_room(room_id);
    state.archives.forget_room(room_id);
    Ok(removed)
}

/// One sweep pass: collect every room past its expiry and tear each
/// down. A failure on one room is logged and does not stop the rest;
/// the half-cleaned room still matches the expiry query next tick.
pub async fn sweep_once(state: &AppState) -> AppResult<usize> {
    let expired = Room::list_expired(&state.db_pool, OffsetDateTime::now_utc()).await?;
    let mut cleaned = 0;
    for room in &expired {
        match teardown_room(state, room.id).await {
            Ok(_) => {
                cleaned += 1;
                tracing::info!(room = %room.id, "removed expired room");
            }
            Err(err) => {
                tracing::warn!(room = %room.id, error = %err, "failed to tear down expired room");
            }
        }
    }
    if cleaned > 0 {
        tracing::info!(cleaned, "expiry sweep finished");
    }
    Ok(cleaned)
}

/// Background sweeper. The first tick fires immediately, so stale rooms
/// left over from a previous run are cleared at startup.
pub async fn run(state: AppState) {
    let mut ticker = tokio::time::interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = sweep_once(&state).await {
            tracing::error!(error = %err, "expiry sweep failed");
        }
    }
}
