//! File enumerator: walks the source tree once, in resumable windows.
//!
//! The walk order is made deterministic by sorting directory entries, so
//! the persisted cursor stays meaningful across requests. Re-walks are
//! safe because every unit is keyed by its path hash and looked up before
//! insert.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{MigrateError, Result};
use crate::store::{
    hash_identity, FileStatus, NewFileRecord, TrackingStore, OPT_CURRENT_FILE_INDEX,
    OPT_TOTAL_FILES,
};

/// Characters never legal in a transferable file name.
const DISALLOWED_NAME_CHARS: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Result of one enumeration window.
#[derive(Debug, Clone, Copy)]
pub struct WindowOutcome {
    /// Units recorded for the first time in this window (any status).
    pub newly_recorded: usize,
    /// Total files counted for this pass, as persisted.
    pub total_files: i64,
}

/// Walks the source tree and records one unit per eligible file.
pub struct FileEnumerator {
    store: Arc<dyn TrackingStore>,
    root: PathBuf,
    skip_folders: Vec<String>,
    window_size: usize,
    /// A site-config file living one directory above the root, seeded as
    /// an extra unit when the root itself has none.
    external_config: Option<PathBuf>,
}

impl FileEnumerator {
    pub fn new(
        store: Arc<dyn TrackingStore>,
        root: PathBuf,
        skip_folders: Vec<String>,
        window_size: usize,
        external_config: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            root,
            skip_folders,
            window_size,
            external_config,
        }
    }

    /// Run one enumeration window.
    ///
    /// Visits `window_size` entries starting at the persisted cursor,
    /// records each unseen one, then advances the cursor. A window that
    /// records nothing means enumeration for this pass is complete.
    pub async fn run_window(&self) -> Result<WindowOutcome> {
        if !self.root.is_dir() {
            return Err(MigrateError::precondition(format!(
                "migration root not found: {}",
                self.root.display()
            )));
        }

        let entries = self.walk_files();
        let mut total_files = entries.len() as i64;

        if let Some(config_path) = &self.external_config {
            total_files += 1;
            self.seed_external_config(config_path).await?;
        }

        self.store
            .set_option(OPT_TOTAL_FILES, &total_files.to_string())
            .await?;

        let cursor = self
            .store
            .get_int_option(OPT_CURRENT_FILE_INDEX, 0)
            .await?
            .max(0) as usize;

        let mut newly_recorded = 0;
        for path in entries.iter().skip(cursor).take(self.window_size) {
            if self.record_file(path).await? {
                newly_recorded += 1;
            }
        }

        self.store
            .set_option(
                OPT_CURRENT_FILE_INDEX,
                &(cursor + self.window_size).to_string(),
            )
            .await?;

        debug!(
            cursor,
            newly_recorded, total_files, "file enumeration window finished"
        );

        Ok(WindowOutcome {
            newly_recorded,
            total_files,
        })
    }

    /// Full deterministic walk, skip rules applied, files only.
    fn walk_files(&self) -> Vec<PathBuf> {
        let root = self.root.clone();
        let skip = self.skip_folders.clone();
        WalkDir::new(&root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .into_owned();
                relative.is_empty() || !skip.iter().any(|s| s == &relative)
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable walk entry");
                    None
                }
            })
            .filter(|entry| !entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Record one walked path. Returns `true` when a new unit was inserted.
    ///
    /// Ineligible files are recorded with status `Unreadable` so they are
    /// never retried; a failure to record an eligible file is fatal because
    /// the protocol cannot safely continue without a durable record.
    async fn record_file(&self, path: &Path) -> Result<bool> {
        let filepath = path.to_string_lossy().into_owned();
        let filepath_hash = hash_identity(&filepath);

        if self.store.find_file_by_hash(&filepath_hash).await?.is_some() {
            return Ok(false);
        }

        let (size, status) = match classify(path) {
            Ok(size) => (size, FileStatus::Pending),
            Err(reason) => {
                debug!(path = %filepath, reason, "recording ineligible file");
                (0, FileStatus::Unreadable)
            }
        };

        let record = NewFileRecord {
            filepath,
            filepath_hash,
            size,
            status,
        };

        if status == FileStatus::Unreadable {
            // Best-effort: a lost unreadable record only means one extra
            // classification on a later pass.
            if let Err(err) = self.store.insert_file(record).await {
                warn!(error = %err, "could not record ineligible file");
            }
            return Ok(true);
        }

        self.store.insert_file(record).await?;
        Ok(true)
    }

    async fn seed_external_config(&self, config_path: &Path) -> Result<()> {
        let filepath = config_path.to_string_lossy().into_owned();
        let filepath_hash = hash_identity(&filepath);
        if self.store.find_file_by_hash(&filepath_hash).await?.is_some() {
            return Ok(());
        }
        let size = std::fs::metadata(config_path)?.len() as i64;
        self.store
            .insert_file(NewFileRecord {
                filepath,
                filepath_hash,
                size,
                status: FileStatus::Pending,
            })
            .await?;
        Ok(())
    }
}

/// Check a walked path's eligibility, returning its size or a reason.
fn classify(path: &Path) -> std::result::Result<i64, &'static str> {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if !name.is_empty() => name,
        _ => return Err("empty or non-utf8 file name"),
    };
    if name == "." || name == ".." {
        return Err("dot entry");
    }
    if name.chars().any(|c| DISALLOWED_NAME_CHARS.contains(&c)) {
        return Err("name contains disallowed characters");
    }

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return Err("metadata unavailable"),
    };
    if !metadata.is_file() {
        return Err("not a regular file");
    }
    if std::fs::File::open(path).is_err() {
        return Err("unreadable");
    }

    Ok(metadata.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    fn enumerator(
        store: Arc<MemoryStore>,
        root: &Path,
        skip: &[&str],
        window: usize,
    ) -> FileEnumerator {
        FileEnumerator::new(
            store,
            root.to_path_buf(),
            skip.iter().map(|s| s.to_string()).collect(),
            window,
            None,
        )
    }

    #[tokio::test]
    async fn records_every_eligible_file_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "sub/b.txt", "bb");
        let store = Arc::new(MemoryStore::new());

        let e = enumerator(store.clone(), dir.path(), &[], 100);
        let window = e.run_window().await.unwrap();
        assert_eq!(window.newly_recorded, 2);
        assert_eq!(window.total_files, 2);
        assert_eq!(store.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn second_pass_records_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        write(dir.path(), "b.txt", "b");
        let store = Arc::new(MemoryStore::new());

        let e = enumerator(store.clone(), dir.path(), &[], 100);
        assert_eq!(e.run_window().await.unwrap().newly_recorded, 2);

        // Reset the cursor as a fresh pass would.
        store.set_option(OPT_CURRENT_FILE_INDEX, "0").await.unwrap();
        let second = e.run_window().await.unwrap();
        assert_eq!(second.newly_recorded, 0);
        assert_eq!(store.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn skip_folders_are_never_recorded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.txt", "k");
        write(dir.path(), "cache/drop.txt", "d");
        write(dir.path(), "wp-content/cache/drop2.txt", "d");
        let store = Arc::new(MemoryStore::new());

        let e = enumerator(
            store.clone(),
            dir.path(),
            &["cache", "wp-content/cache"],
            100,
        );
        let window = e.run_window().await.unwrap();
        assert_eq!(window.newly_recorded, 1);

        let kept = store
            .find_file_by_hash(&hash_identity(
                &dir.path().join("keep.txt").to_string_lossy(),
            ))
            .await
            .unwrap();
        assert!(kept.is_some());
        let dropped = store
            .find_file_by_hash(&hash_identity(
                &dir.path().join("cache/drop.txt").to_string_lossy(),
            ))
            .await
            .unwrap();
        assert!(dropped.is_none());
    }

    #[tokio::test]
    async fn windows_resume_from_cursor() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("f{i}.txt"), "x");
        }
        let store = Arc::new(MemoryStore::new());

        let e = enumerator(store.clone(), dir.path(), &[], 2);
        assert_eq!(e.run_window().await.unwrap().newly_recorded, 2);
        assert_eq!(e.run_window().await.unwrap().newly_recorded, 2);
        assert_eq!(e.run_window().await.unwrap().newly_recorded, 1);
        assert_eq!(e.run_window().await.unwrap().newly_recorded, 0);
        assert_eq!(store.count_files().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn invalid_names_are_recorded_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.txt", "g");
        // ':' is legal on unix filesystems but not on common destination ones.
        write(dir.path(), "bad:name.txt", "b");
        let store = Arc::new(MemoryStore::new());

        let e = enumerator(store.clone(), dir.path(), &[], 100);
        let window = e.run_window().await.unwrap();
        assert_eq!(window.newly_recorded, 2);
        assert_eq!(
            store
                .count_files_with_status(FileStatus::Pending)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .count_files_with_status(FileStatus::Unreadable)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn external_config_is_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("public_html");
        std::fs::create_dir(&root).unwrap();
        write(&root, "a.txt", "a");
        write(dir.path(), "wp-config.php", "<?php\n");
        let store = Arc::new(MemoryStore::new());

        let e = FileEnumerator::new(
            store.clone(),
            root.clone(),
            vec![],
            100,
            Some(dir.path().join("wp-config.php")),
        );
        let window = e.run_window().await.unwrap();
        assert_eq!(window.total_files, 2);
        assert_eq!(store.count_files().await.unwrap(), 2);

        store.set_option(OPT_CURRENT_FILE_INDEX, "0").await.unwrap();
        let second = e.run_window().await.unwrap();
        assert_eq!(second.newly_recorded, 0);
        assert_eq!(store.count_files().await.unwrap(), 2);
    }
}
