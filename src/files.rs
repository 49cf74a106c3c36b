use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::{AppError, AppResult};

/// Owns the on-disk placement of uploaded bytes, one directory per room.
/// Nothing outside the room namespace is ever touched. Removal is
/// best-effort throughout: the submission rows are the authoritative
/// state, filesystem debris self-heals on the next teardown.
#[derive(Clone)]
pub struct FileArea {
    root: Arc<PathBuf>,
    max_file_bytes: u64,
}

impl FileArea {
    pub fn new(root: impl Into<PathBuf>, max_file_bytes: u64) -> Self {
        Self {
            root: Arc::new(root.into()),
            max_file_bytes,
        }
    }

    pub fn room_dir(&self, room_id: Uuid) -> PathBuf {
        self.root.join(room_id.to_string())
    }

    pub fn path_of(&self, room_id: Uuid, stored_name: &str) -> PathBuf {
        self.room_dir(room_id).join(sanitize(stored_name))
    }

    /// Write an uploaded file under the room's namespace and return the
    /// stored name that submission rows reference from now on. The name
    /// is an ingestion-timestamp prefix plus the sanitized original
    /// name, bumped until unique within the room. Uniqueness is claimed
    /// with `create_new`, so two racing uploads of the same filename can
    /// never end up sharing one stored name.
    pub async fn store(&self, room_id: Uuid, original_name: &str, bytes: &[u8]) -> AppResult<String> {
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(AppError::PayloadTooLarge(self.max_file_bytes));
        }
        let name = sanitize(original_name);
        if name.is_empty() {
            return Err(AppError::BadRequest(format!(
                "invalid file name: {original_name:?}"
            )));
        }

        let dir = self.room_dir(room_id);
        fs::create_dir_all(&dir).await?;

        let mut stamp = unix_millis();
        loop {
            let candidate = format!("{stamp}_{name}");
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(dir.join(&candidate))
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(candidate);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Idempotent delete. A reference that is already gone from disk is
    /// a no-op; any other failure is logged and swallowed.
    pub async fn remove(&self, room_id: Uuid, stored_name: &str) {
        let name = sanitize(stored_name);
        if name.is_empty() {
            return;
        }
        if let Err(err) = fs::remove_file(self.room_dir(room_id).join(&name)).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(room = %room_id, file = %name, error = %err, "failed to remove stored file");
            }
        }
    }

    /// Recursively drop the whole room namespace. Idempotent.
    pub async fn remove_room_area(&self, room_id: Uuid) {
        if let Err(err) = fs::remove_dir_all(self.room_dir(room_id)).await {
            if err.kind() != ErrorKind::NotFound {
                tracing::warn!(room = %room_id, error = %err, "failed to remove room file area");
            }
        }
    }
}

/// Keep only the final path component and strip control characters, so
/// neither an original filename nor a stored reference taken from a
/// request can escape the room directory.
fn sanitize(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base == "." || base == ".." {
        return String::new();
    }
    base.chars().filter(|c| !c.is_control()).collect()
}

fn unix_millis() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn area(tmp: &TempDir) -> FileArea {
        FileArea::new(tmp.path().join("rooms"), 1024)
    }

    #[tokio::test]
    async fn store_places_bytes_under_the_room_namespace() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        let stored = files.store(room, "player.yaml", b"name: x").await.unwrap();
        assert!(stored.ends_with("_player.yaml"));
        assert_eq!(
            std::fs::read(files.path_of(room, &stored)).unwrap(),
            b"name: x"
        );
    }

    #[tokio::test]
    async fn same_name_uploads_get_distinct_stored_names() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        let first = files.store(room, "a.yaml", b"1").await.unwrap();
        let second = files.store(room, "a.yaml", b"2").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(std::fs::read(files.path_of(room, &first)).unwrap(), b"1");
        assert_eq!(std::fs::read(files.path_of(room, &second)).unwrap(), b"2");
    }

    #[tokio::test]
    async fn racing_same_name_stores_never_share_a_stored_name() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        // two participants uploading the same filename at once must get
        // distinct stored names, with neither payload clobbered
        for _ in 0..32 {
            let (first, second) = tokio::join!(
                files.store(room, "x.yaml", b"AAAA"),
                files.store(room, "x.yaml", b"BBBB"),
            );
            let first = first.unwrap();
            let second = second.unwrap();
            assert_ne!(first, second);
            assert_eq!(std::fs::read(files.path_of(room, &first)).unwrap(), b"AAAA");
            assert_eq!(std::fs::read(files.path_of(room, &second)).unwrap(), b"BBBB");
        }
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_writing() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        let err = files
            .store(room, "big.bin", &vec![0u8; 2048])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge(1024)));
        assert!(!files.room_dir(room).exists());
    }

    #[tokio::test]
    async fn traversal_attempts_stay_inside_the_room() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        let stored = files
            .store(room, "../../etc/passwd", b"nope")
            .await
            .unwrap();
        assert!(stored.ends_with("_passwd"));
        assert!(files.path_of(room, &stored).starts_with(files.room_dir(room)));

        assert!(files.store(room, "..", b"nope").await.is_err());
        assert!(files.store(room, "  ", b"nope").await.is_err());
    }

    #[tokio::test]
    async fn removal_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let files = area(&tmp);
        let room = Uuid::now_v7();

        let stored = files.store(room, "a.yaml", b"1").await.unwrap();
        files.remove(room, &stored).await;
        assert!(!files.path_of(room, &stored).exists());
        // second removal of the same file, and of a name never stored
        files.remove(room, &stored).await;
        files.remove(room, "ghost.yaml").await;

        files.remove_room_area(room).await;
        files.remove_room_area(room).await;
        assert!(!files.room_dir(room).exists());
    }
}
