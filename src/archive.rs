use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use flate2::Compression;
use flate2::write::GzEncoder;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::classify::FileCategory;
use crate::files::FileArea;
use crate::rooms::submission::Submission;
use crate::AppResult;

/// Cached per-(room, category) tar.gz bundles of every stored file the
/// room's submissions reference. Purely derived state: a bundle can be
/// deleted at any time and rebuilt from the submission rows.
#[derive(Clone)]
pub struct ArchiveCache {
    dir: Arc<PathBuf>,
    builds: Arc<DashMap<(Uuid, FileCategory), Arc<Mutex<()>>>>,
}

impl ArchiveCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
            builds: Arc::new(DashMap::new()),
        }
    }

    pub fn bundle_path(&self, room_id: Uuid, category: FileCategory) -> PathBuf {
        self.dir.join(format!("{room_id}_{category}.tar.gz"))
    }

    /// Return the cached bundle if one exists, else build it. Builds are
    /// single-flighted per (room, category); the mutex covers nothing
    /// but that one key, so compressing one room never stalls another.
    /// The bundle is written to a temp path and renamed into place, so a
    /// cache file is only ever observed fully written.
    pub async fn get_or_build(
        &self,
        pool: &SqlitePool,
        files: &FileArea,
        room_id: Uuid,
        category: FileCategory,
    ) -> AppResult<PathBuf> {
        let path = self.bundle_path(room_id, category);
        if fs::try_exists(&path).await? {
            return Ok(path);
        }

        let gate = self
            .builds
            .entry((room_id, category))
            .or_default()
            .clone();
        let _guard = gate.lock().await;

        // another caller may have finished the build while we waited
        if fs::try_exists(&path).await? {
            return Ok(path);
        }

        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for submission in Submission::list_by_room(pool, room_id).await? {
            for stored in submission.files_in(category) {
                entries.push((stored.clone(), files.path_of(room_id, stored)));
            }
        }

        fs::create_dir_all(self.dir.as_ref()).await?;
        let tmp = self.dir.join(format!("{room_id}_{category}.tar.gz.tmp"));
        let build_path = tmp.clone();
        let built = tokio::task::spawn_blocking(move || build_bundle(&build_path, &entries))
            .await
            .map_err(std::io::Error::other)?;

        if let Err(err) = built {
            if let Err(cleanup) = fs::remove_file(&tmp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    tracing::warn!(room = %room_id, error = %cleanup, "failed to remove partial bundle");
                }
            }
            return Err(err.into());
        }

        fs::rename(&tmp, &path).await?;
        Ok(path)
    }

    /// Drop both category bundles for a room. Called by every mutation
    /// before it reports success. Takes each category's build gate
    /// first: builds hold the gate across their rename, so a bundle
    /// snapshotted before the mutation is deleted here rather than left
    /// installed behind the delete. Safe under concurrent callers:
    /// deleting an absent bundle is a no-op, other failures are logged
    /// and swallowed.
    pub async fn invalidate(&self, room_id: Uuid) {
        for category in FileCategory::ALL {
            let gate = self
                .builds
                .entry((room_id, category))
                .or_default()
                .clone();
            let _guard = gate.lock().await;
            if let Err(err) = fs::remove_file(self.bundle_path(room_id, category)).await {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(room = %room_id, %category, error = %err, "failed to remove stale bundle");
                }
            }
        }
    }

    /// Forget the build gates for a room being torn down.
    pub fn forget_room(&self, room_id: Uuid) {
        self.builds.retain(|(id, _), _| *id != room_id);
    }
}

/// Tar every referenced file that is still on disk, gzip the result.
/// References whose bytes have gone missing are skipped rather than
/// failing the whole bundle.
fn build_bundle(tmp: &Path, entries: &[(String, PathBuf)]) -> std::io::Result<()> {
    let file = std::fs::File::create(tmp)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    let mtime = OffsetDateTime::now_utc().unix_timestamp().max(0) as u64;

    for (name, path) in entries {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append_data(&mut header, name, bytes.as_slice())?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn invalidate_deletes_after_an_in_flight_build_installs() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("bundles");
        std::fs::create_dir_all(&dir).unwrap();
        let cache = ArchiveCache::new(&dir);
        let room = Uuid::now_v7();

        // hold the yaml build gate, as get_or_build does across its rename
        let gate = cache
            .builds
            .entry((room, FileCategory::Yaml))
            .or_default()
            .clone();
        let guard = gate.lock().await;

        let waiting = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.invalidate(room).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished(), "invalidate must wait for the build gate");

        // the build installs a bundle snapshotted before the mutation,
        // then releases the gate; the delete must land after it
        std::fs::write(cache.bundle_path(room, FileCategory::Yaml), b"stale").unwrap();
        drop(guard);
        waiting.await.unwrap();
        assert!(!cache.bundle_path(room, FileCategory::Yaml).exists());
    }

    #[tokio::test]
    async fn invalidate_is_a_noop_without_bundles() {
        let tmp = TempDir::new().unwrap();
        let cache = ArchiveCache::new(tmp.path().join("bundles"));
        cache.invalidate(Uuid::now_v7()).await;
    }
}
