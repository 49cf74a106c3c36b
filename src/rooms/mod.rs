pub mod submission;

use axum::{
    Json, debug_handler,
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::classify::FileCategory;
use crate::identity::ClientIdentity;
use crate::{AppError, AppResult, AppState, sweep};

use submission::Submission;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_room))
        .route("/{room_id}", get(get_room))
        .route("/{room_id}/stats", get(room_stats))
        .route("/{room_id}/download/{category}", get(download_bundle))
        .route(
            "/{room_id}/submission",
            get(submission::get_submission).delete(submission::cancel_submission),
        )
        .route("/{room_id}/submission/files", delete(submission::remove_files))
        .route("/{room_id}/upload", post(submission::upload_files))
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub creator_id: String,
}

impl Room {
    /// Insert a new room. Expiry is fixed at creation and never extended.
    pub async fn create(
        pool: &SqlitePool,
        creator: &ClientIdentity,
        retention: time::Duration,
    ) -> AppResult<Room> {
        let id = Uuid::now_v7();
        let created_at = OffsetDateTime::now_utc();
        let expires_at = created_at + retention;
        sqlx::query("INSERT INTO rooms (id, created_at, expires_at, creator_id) VALUES (?,?,?,?)")
            .bind(id.to_string())
            .bind(created_at.unix_timestamp())
            .bind(expires_at.unix_timestamp())
            .bind(creator.as_str())
            .execute(pool)
            .await?;
        Ok(Room {
            id,
            created_at,
            expires_at,
            creator_id: creator.as_str().to_owned(),
        })
    }

    /// Fetch by id. Does not filter expired rows; callers decide what
    /// "expired but still present" means for them.
    pub async fn get(pool: &SqlitePool, id: Uuid) -> AppResult<Option<Room>> {
        let row: Option<(String, i64, i64, String)> =
            sqlx::query_as("SELECT id, created_at, expires_at, creator_id FROM rooms WHERE id=?")
                .bind(id.to_string())
                .fetch_optional(pool)
                .await?;
        row.map(Room::from_row).transpose()
    }

    pub async fn delete(pool: &SqlitePool, id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM rooms WHERE id=?")
            .bind(id.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_expired(pool: &SqlitePool, now: OffsetDateTime) -> AppResult<Vec<Room>> {
        let rows: Vec<(String, i64, i64, String)> = sqlx::query_as(
            "SELECT id, created_at, expires_at, creator_id FROM rooms WHERE expires_at < ?",
        )
        .bind(now.unix_timestamp())
        .fetch_all(pool)
        .await?;
        rows.into_iter().map(Room::from_row).collect()
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at < now
    }

    fn from_row((id, created_at, expires_at, creator_id): (String, i64, i64, String)) -> AppResult<Room> {
        Ok(Room {
            id: Uuid::parse_str(&id)?,
            created_at: OffsetDateTime::from_unix_timestamp(created_at)?,
            expires_at: OffsetDateTime::from_unix_timestamp(expires_at)?,
            creator_id,
        })
    }
}

/// Resolve a room that is present and not past its expiry. A room found
/// past its expiry is torn down on the spot and reported as Gone, so
/// staleness is bounded by a single request rather than the sweep
/// cadence.
pub async fn load_live_room(state: &AppState, room_id: Uuid) -> AppResult<Room> {
    let Some(room) = Room::get(&state.db_pool, room_id).await? else {
        return Err(AppError::NotFound("Room not found"));
    };
    if room.is_expired(OffsetDateTime::now_utc()) {
        if let Err(err) = sweep::teardown_room(state, room_id).await {
            tracing::warn!(room = %room_id, error = %err, "lazy expiry teardown failed");
        }
        return Err(AppError::RoomExpired);
    }
    Ok(room)
}

pub(crate) fn rfc3339(ts: OffsetDateTime) -> AppResult<String> {
    Ok(ts.format(&Rfc3339)?)
}

#[debug_handler]
pub(crate) async fn create_room(
    State(state): State<AppState>,
    identity: ClientIdentity,
) -> AppResult<Response> {
    let room = Room::create(&state.db_pool, &identity, state.config.retention).await?;
    tracing::info!(room = %room.id, "room created");

    Ok(Json(json!({
        "success": true,
        "roomId": room.id,
        "expiresAt": rfc3339(room.expires_at)?,
    }))
    .into_response())
}

#[debug_handler]
pub(crate) async fn get_room(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
) -> AppResult<Response> {
    let room = load_live_room(&state, room_id).await?;

    Ok(Json(json!({
        "success": true,
        "room": {
            "id": room.id,
            "createdAt": rfc3339(room.created_at)?,
            "expiresAt": rfc3339(room.expires_at)?,
        },
    }))
    .into_response())
}

/// Submission count and per-category file totals, creator only.
#[debug_handler]
pub(crate) async fn room_stats(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    identity: ClientIdentity,
) -> AppResult<Response> {
    let room = load_live_room(&state, room_id).await?;
    if room.creator_id != identity.as_str() {
        return Err(AppError::Forbidden);
    }

    let submissions = Submission::list_by_room(&state.db_pool, room_id).await?;
    let total_yaml: usize = submissions.iter().map(|s| s.yaml_files.len()).sum();
    let total_apworld: usize = submissions.iter().map(|s| s.apworld_files.len()).sum();

    Ok(Json(json!({
        "success": true,
        "stats": {
            "totalSubmissions": submissions.len(),
            "totalYamlFiles": total_yaml,
            "totalApworldFiles": total_apworld,
            "roomCreatedAt": rfc3339(room.created_at)?,
            "roomExpiresAt": rfc3339(room.expires_at)?,
        },
    }))
    .into_response())
}

/// Serve the bundle for one category, building it lazily. Not gated on
/// the creator: knowing the room id is the sharing capability here,
/// same as for uploads.
#[debug_handler]
pub(crate) async fn download_bundle(
    State(state): State<AppState>,
    Path((room_id, category)): Path<(Uuid, String)>,
) -> AppResult<Response> {
    let category: FileCategory = category.parse()?;
    load_live_room(&state, room_id).await?;

    let submissions = Submission::list_by_room(&state.db_pool, room_id).await?;
    if submissions.is_empty() {
        return Err(AppError::NotFound("No files found"));
    }

    let path = state
        .archives
        .get_or_build(&state.db_pool, &state.files, room_id, category)
        .await?;
    let file = tokio::fs::File::open(&path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/gzip".to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{room_id}_{category}.tar.gz\""),
            ),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
