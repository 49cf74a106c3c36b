use std::sync::Arc;

use axum::{
    Json, debug_handler,
    body::Bytes,
    extract::{Multipart, Path, State},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::classify::{FileCategory, classify};
use crate::identity::ClientIdentity;
use crate::rooms::{load_live_room, rfc3339};
use crate::{AppError, AppResult, AppState};

/// One participant's mutable file set within a room. At most one row
/// per (room, client); both file lists are JSON arrays of stored names
/// in the database, mirroring how they are returned to the client.
#[derive(Debug, Clone)]
pub struct Submission {
    pub room_id: Uuid,
    pub client_id: String,
    pub yaml_files: Vec<String>,
    pub apworld_files: Vec<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Submission {
    pub fn files_in(&self, category: FileCategory) -> &[String] {
        match category {
            FileCategory::Yaml => &self.yaml_files,
            FileCategory::Apworld => &self.apworld_files,
        }
    }

    pub async fn get(
        pool: &SqlitePool,
        room_id: Uuid,
        client_id: &str,
    ) -> AppResult<Option<Submission>> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT yaml_files, apworld_files, created_at, updated_at
             FROM submissions WHERE room_id=? AND client_id=?",
        )
        .bind(room_id.to_string())
        .bind(client_id)
        .fetch_optional(pool)
        .await?;

        row.map(|(yaml, apworld, created_at, updated_at)| {
            Submission::from_row(room_id, client_id.to_owned(), yaml, apworld, created_at, updated_at)
        })
        .transpose()
    }

    pub async fn create(
        pool: &SqlitePool,
        room_id: Uuid,
        client_id: &str,
        yaml_files: &[String],
        apworld_files: &[String],
    ) -> AppResult<()> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        sqlx::query(
            "INSERT INTO submissions (room_id, client_id, yaml_files, apworld_files, created_at, updated_at)
             VALUES (?,?,?,?,?,?)",
        )
        .bind(room_id.to_string())
        .bind(client_id)
        .bind(serde_json::to_string(yaml_files)?)
        .bind(serde_json::to_string(apworld_files)?)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Whole-list replacement; callers read-modify-write under the
    /// per-(room, client) lock.
    pub async fn update(
        pool: &SqlitePool,
        room_id: Uuid,
        client_id: &str,
        yaml_files: &[String],
        apworld_files: &[String],
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE submissions SET yaml_files=?, apworld_files=?, updated_at=?
             WHERE room_id=? AND client_id=?",
        )
        .bind(serde_json::to_string(yaml_files)?)
        .bind(serde_json::to_string(apworld_files)?)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .bind(room_id.to_string())
        .bind(client_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn list_by_room(pool: &SqlitePool, room_id: Uuid) -> AppResult<Vec<Submission>> {
        let rows: Vec<(String, String, String, i64, i64)> = sqlx::query_as(
            "SELECT client_id, yaml_files, apworld_files, created_at, updated_at
             FROM submissions WHERE room_id=?",
        )
        .bind(room_id.to_string())
        .fetch_all(pool)
        .await?;

        rows.into_iter()
            .map(|(client_id, yaml, apworld, created_at, updated_at)| {
                Submission::from_row(room_id, client_id, yaml, apworld, created_at, updated_at)
            })
            .collect()
    }

    pub async fn delete(pool: &SqlitePool, room_id: Uuid, client_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM submissions WHERE room_id=? AND client_id=?")
            .bind(room_id.to_string())
            .bind(client_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_all_by_room(pool: &SqlitePool, room_id: Uuid) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM submissions WHERE room_id=?")
            .bind(room_id.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }

    fn from_row(
        room_id: Uuid,
        client_id: String,
        yaml: String,
        apworld: String,
        created_at: i64,
        updated_at: i64,
    ) -> AppResult<Submission> {
        Ok(Submission {
            room_id,
            client_id,
            yaml_files: serde_json::from_str(&yaml)?,
            apworld_files: serde_json::from_str(&apworld)?,
            created_at: OffsetDateTime::from_unix_timestamp(created_at)?,
            updated_at: OffsetDateTime::from_unix_timestamp(updated_at)?,
        })
    }
}

/// Logical write locks keyed by (room, client). Every read-modify-write
/// of a submission's file lists runs under its lock, so two concurrent
/// uploads from the same participant cannot drop each other's files.
#[derive(Clone, Default)]
pub struct SubmissionLocks(Arc<DashMap<(Uuid, String), Arc<Mutex<()>>>>);

impl SubmissionLocks {
    pub fn lock_for(&self, room_id: Uuid, client_id: &str) -> Arc<Mutex<()>> {
        self.0
            .entry((room_id, client_id.to_owned()))
            .or_default()
            .clone()
    }

    pub fn forget_room(&self, room_id: Uuid) {
        self.0.retain(|(id, _), _| *id != room_id);
    }
}

/// Accept any multipart field that carries a filename; categorization
/// is by extension alone. Appends to an existing submission or creates
/// one on first upload.
#[debug_handler]
pub(crate) async fn upload_files(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    identity: ClientIdentity,
    mut multipart: Multipart,
) -> AppResult<Response> {
    load_live_room(&state, room_id).await?;

    let mut incoming: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.file_name().map(ToOwned::to_owned) else {
            continue;
        };
        incoming.push((name, field.bytes().await?));
    }
    if incoming.is_empty() {
        return Err(AppError::BadRequest("No files provided".into()));
    }
    // reject the whole batch before any byte hits disk
    for (_, bytes) in &incoming {
        if bytes.len() as u64 > state.config.max_file_bytes {
            return Err(AppError::PayloadTooLarge(state.config.max_file_bytes));
        }
    }

    let gate = state.locks.lock_for(room_id, identity.as_str());
    let _guard = gate.lock().await;

    let mut new_yaml = Vec::new();
    let mut new_apworld = Vec::new();
    for (name, bytes) in &incoming {
        let stored = state.files.store(room_id, name, bytes).await?;
        match classify(name) {
            FileCategory::Apworld => new_apworld.push(stored),
            FileCategory::Yaml => new_yaml.push(stored),
        }
    }

    let existing = Submission::get(&state.db_pool, room_id, identity.as_str()).await?;
    let appended = existing.is_some();
    let (yaml_files, apworld_files) = match existing {
        Some(mut submission) => {
            submission.yaml_files.append(&mut new_yaml);
            submission.apworld_files.append(&mut new_apworld);
            Submission::update(
                &state.db_pool,
                room_id,
                identity.as_str(),
                &submission.yaml_files,
                &submission.apworld_files,
            )
            .await?;
            (submission.yaml_files, submission.apworld_files)
        }
        None => {
            Submission::create(&state.db_pool, room_id, identity.as_str(), &new_yaml, &new_apworld)
                .await?;
            (new_yaml, new_apworld)
        }
    };

    state.archives.invalidate(room_id).await;
    tracing::info!(room = %room_id, client = %identity, files = incoming.len(), "files uploaded");

    let message = if appended {
        "Files added to submission successfully"
    } else {
        "Files uploaded successfully"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "yamlFiles": yaml_files,
        "apworldFiles": apworld_files,
    }))
    .into_response())
}

#[debug_handler]
pub(crate) async fn get_submission(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    identity: ClientIdentity,
) -> AppResult<Response> {
    load_live_room(&state, room_id).await?;

    let body = match Submission::get(&state.db_pool, room_id, identity.as_str()).await? {
        Some(submission) => json!({
            "success": true,
            "hasSubmission": true,
            "submission": {
                "yamlFiles": submission.yaml_files,
                "apworldFiles": submission.apworld_files,
                "createdAt": rfc3339(submission.created_at)?,
                "updatedAt": rfc3339(submission.updated_at)?,
            },
        }),
        None => json!({
            "success": true,
            "hasSubmission": false,
            "submission": null,
        }),
    };

    Ok(Json(body).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoveFilesRequest {
    file_names: Vec<String>,
}

/// Selectively drop stored files from the caller's own submission. Only
/// names the submission actually references are deleted from disk. The
/// submission row stays even when both lists end up empty; only an
/// explicit cancel removes it.
#[debug_handler]
pub(crate) async fn remove_files(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    identity: ClientIdentity,
    Json(request): Json<RemoveFilesRequest>,
) -> AppResult<Response> {
    if request.file_names.is_empty() {
        return Err(AppError::BadRequest("No file names provided".into()));
    }
    load_live_room(&state, room_id).await?;

    let gate = state.locks.lock_for(room_id, identity.as_str());
    let _guard = gate.lock().await;

    let Some(submission) = Submission::get(&state.db_pool, room_id, identity.as_str()).await?
    else {
        return Err(AppError::NotFound("No submission found"));
    };

    for name in &request.file_names {
        if submission.yaml_files.contains(name) || submission.apworld_files.contains(name) {
            state.files.remove(room_id, name).await;
        }
    }

    let mut yaml_files = submission.yaml_files.clone();
    let mut apworld_files = submission.apworld_files.clone();
    yaml_files.retain(|name| !request.file_names.contains(name));
    apworld_files.retain(|name| !request.file_names.contains(name));

    Submission::update(&state.db_pool, room_id, identity.as_str(), &yaml_files, &apworld_files)
        .await?;
    state.archives.invalidate(room_id).await;

    Ok(Json(json!({
        "success": true,
        "message": "Files removed successfully",
        "yamlFiles": yaml_files,
        "apworldFiles": apworld_files,
    }))
    .into_response())
}

/// Delete the caller's submission and every stored file it owns.
#[debug_handler]
pub(crate) async fn cancel_submission(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    identity: ClientIdentity,
) -> AppResult<Response> {
    load_live_room(&state, room_id).await?;

    let gate = state.locks.lock_for(room_id, identity.as_str());
    let _guard = gate.lock().await;

    let Some(submission) = Submission::get(&state.db_pool, room_id, identity.as_str()).await?
    else {
        return Err(AppError::NotFound("No submission found"));
    };

    for name in submission.yaml_files.iter().chain(&submission.apworld_files) {
        state.files.remove(room_id, name).await;
    }

    Submission::delete(&state.db_pool, room_id, identity.as_str()).await?;
    state.archives.invalidate(room_id).await;
    tracing::info!(room = %room_id, client = %identity, "submission cancelled");

    Ok(Json(json!({
        "success": true,
        "message": "Submission cancelled successfully",
    }))
    .into_response())
}
