//! File transfer engine.
//!
//! One call serves one step: an enumeration window while the walk is
//! unfinished, then one archive batch or one single large file, and
//! finally a completion signal once nothing is pending. Units are moved
//! to `Sending` before the body leaves and only stamped `Sent` after the
//! caller confirms the stream finished; a crash in between leaves them
//! `Sending` until the stale-flight sweep reclaims them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempPath;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TransferConfig;
use crate::context::ServeContext;
use crate::enumerate::FileEnumerator;
use crate::error::{MigrateError, Result};
use crate::policy::{transform_for_transfer, PolicySettings};
use crate::store::{
    FileRecord, FileStatus, TrackingStore, OPT_CURRENT_FILE_INDEX, OPT_DEST_URL, OPT_SITE_URL,
    OPT_TOTAL_FILES,
};
use crate::transfer::archive::{archive_checksum, Archiver};

/// Media folder skipped when the orchestrator asks for it.
const MEDIA_FOLDER: &str = "wp-content/uploads";

/// Outcome of one file-serving request.
pub enum FileServeOutcome {
    /// An enumeration window ran; the puller should call again.
    Enumerated {
        newly_recorded: usize,
        total_files: i64,
        progress: f64,
    },
    /// A batch of small files bundled into one archive.
    Archive(ArchiveDelivery),
    /// One large file streamed on its own.
    Single(SingleDelivery),
    /// Nothing pending; the file phase is done.
    Complete,
}

/// A prepared archive response, ready to stream.
pub struct ArchiveDelivery {
    /// Scratch file holding the archive; deleted on drop.
    pub archive_path: TempPath,
    /// Generated archive name, echoed back for reconciliation.
    pub sent_filename: String,
    pub checksum: String,
    pub size: u64,
    pub progress: f64,
    /// Units inside the archive, still `Sending` until completion.
    pub unit_ids: Vec<i64>,
    /// Per-unit failures that did not abort the batch.
    pub unit_errors: Vec<String>,
}

/// A prepared single-file response, ready to stream.
pub struct SingleDelivery {
    pub unit_id: i64,
    /// Path to stream from; the transformed copy when a policy applied.
    pub path: PathBuf,
    /// Keeps a transformed temp copy alive while it streams.
    pub transformed: Option<TempPath>,
    /// Destination-relative path, doubling as the sent name.
    pub sent_filename: String,
    pub checksum: String,
    pub size: u64,
    pub progress: f64,
}

/// Drives the file side of the migration.
pub struct FileTransferEngine {
    store: Arc<dyn TrackingStore>,
    archiver: Option<Arc<dyn Archiver>>,
    root: PathBuf,
    transfer: TransferConfig,
}

impl FileTransferEngine {
    pub fn new(ctx: &ServeContext) -> Self {
        Self {
            store: ctx.store.clone(),
            archiver: ctx.archiver.clone(),
            root: ctx.config.site.root.clone(),
            transfer: ctx.config.transfer.clone(),
        }
    }

    /// Serve one step of the file phase.
    pub async fn serve(&self) -> Result<FileServeOutcome> {
        let reclaimed = self
            .store
            .reclaim_stale_sending(Utc::now() - Duration::seconds(self.transfer.sending_lease_secs))
            .await?;
        if reclaimed > 0 {
            info!(reclaimed, "reclaimed stale in-flight units");
        }

        let settings = self.store.migrate_settings().await?;
        let skip_media = settings.has_option("skip_media_folder");
        let mut skip_folders = self.transfer.base_skip_folders.clone();
        skip_folders.extend(settings.excluded_paths.iter().cloned());
        if skip_media {
            skip_folders.push(MEDIA_FOLDER.to_string());
        }

        // Enumeration interleaves with serving: a window runs only once
        // the pending pool drains, so recorded units move immediately.
        let pending = self
            .store
            .count_files_with_status(FileStatus::Pending)
            .await?;
        if pending == 0 {
            if let Some(window) = self.enumerate_if_unfinished(&skip_folders).await? {
                return Ok(window);
            }
        }

        let policy = PolicySettings {
            site_url: self.store.get_option(OPT_SITE_URL).await?,
            dest_url: self.store.get_option(OPT_DEST_URL).await?,
            skip_media_folder: skip_media,
        };

        if let Some(archiver) = &self.archiver {
            let batch = self
                .store
                .pending_files_under(
                    self.transfer.max_archive_file_size,
                    self.transfer.max_archive_files,
                )
                .await?;
            if !batch.is_empty() {
                return Ok(FileServeOutcome::Archive(
                    self.build_archive(archiver.as_ref(), batch, &policy).await?,
                ));
            }
        }

        match self.store.next_pending_file().await? {
            Some(unit) => Ok(FileServeOutcome::Single(
                self.prepare_single(unit, &policy).await?,
            )),
            None => {
                let in_flight = self
                    .store
                    .count_files_with_status(FileStatus::Sending)
                    .await?;
                if in_flight > 0 {
                    return Err(MigrateError::Busy(format!(
                        "{in_flight} units still in flight"
                    )));
                }
                Ok(FileServeOutcome::Complete)
            }
        }
    }

    /// Stamp every unit of a delivered archive as sent.
    pub async fn complete_archive(&self, delivery: &ArchiveDelivery) -> Result<()> {
        for id in &delivery.unit_ids {
            self.store
                .mark_file_sent(*id, &delivery.sent_filename, &delivery.checksum)
                .await?;
        }
        Ok(())
    }

    /// Stamp a delivered single file as sent.
    pub async fn complete_single(&self, delivery: &SingleDelivery) -> Result<()> {
        self.store
            .mark_file_sent(delivery.unit_id, &delivery.sent_filename, &delivery.checksum)
            .await
    }

    /// Run an enumeration window when the walk has not finished yet.
    async fn enumerate_if_unfinished(
        &self,
        skip_folders: &[String],
    ) -> Result<Option<FileServeOutcome>> {
        let total = self.store.get_option(OPT_TOTAL_FILES).await?;
        let cursor = self.store.get_int_option(OPT_CURRENT_FILE_INDEX, 0).await?;
        let unfinished = match &total {
            None => true,
            Some(raw) => cursor < raw.parse::<i64>().unwrap_or(0),
        };
        if !unfinished {
            return Ok(None);
        }

        let enumerator = FileEnumerator::new(
            self.store.clone(),
            self.root.clone(),
            skip_folders.to_vec(),
            self.transfer.files_per_window,
            self.external_config(),
        );
        let window = enumerator.run_window().await?;
        Ok(Some(FileServeOutcome::Enumerated {
            newly_recorded: window.newly_recorded,
            total_files: window.total_files,
            progress: self.progress().await?,
        }))
    }

    /// A wp-config.php living one directory above the root, when the root
    /// itself has none.
    fn external_config(&self) -> Option<PathBuf> {
        if self.root.join("wp-config.php").is_file() {
            return None;
        }
        let outside = self.root.parent()?.join("wp-config.php");
        outside.is_file().then_some(outside)
    }

    async fn build_archive(
        &self,
        archiver: &dyn Archiver,
        batch: Vec<FileRecord>,
        policy: &PolicySettings,
    ) -> Result<ArchiveDelivery> {
        let sent_filename = format!("batch-{}.zip", Uuid::new_v4());
        let archive_path = tempfile::NamedTempFile::new()?.into_temp_path();
        let mut writer = archiver.begin(&archive_path)?;

        let mut unit_ids = Vec::with_capacity(batch.len());
        let mut unit_errors = Vec::new();
        for unit in &batch {
            self.store
                .set_file_status(unit.id, FileStatus::Sending)
                .await?;

            match self.add_unit(writer.as_mut(), unit, policy) {
                Ok(()) => unit_ids.push(unit.id),
                Err(err) => {
                    warn!(path = %unit.filepath, error = %err, "unit failed, continuing batch");
                    self.store
                        .set_file_status(unit.id, FileStatus::SendFailed)
                        .await?;
                    unit_errors.push(format!("{}: {err}", unit.filepath));
                }
            }
        }
        writer.finish()?;

        if unit_ids.is_empty() {
            return Err(MigrateError::transfer(
                &sent_filename,
                "every unit in the batch failed",
            ));
        }

        let size = std::fs::metadata(&archive_path)?.len();
        let checksum = archive_checksum(&sent_filename, size);
        let progress = self.progress().await?;
        debug!(
            archive = %sent_filename,
            units = unit_ids.len(),
            size,
            "archive batch prepared"
        );

        Ok(ArchiveDelivery {
            archive_path,
            sent_filename,
            checksum,
            size,
            progress,
            unit_ids,
            unit_errors,
        })
    }

    fn add_unit(
        &self,
        writer: &mut (dyn crate::transfer::ArchiveWriter + Send),
        unit: &FileRecord,
        policy: &PolicySettings,
    ) -> Result<()> {
        let source = Path::new(&unit.filepath);
        let relative = self.relative_name(source);
        match transform_for_transfer(source, &relative, policy)? {
            Some(temp) => writer.add_file(temp.path(), &relative),
            None => writer.add_file(source, &relative),
        }
    }

    async fn prepare_single(
        &self,
        unit: FileRecord,
        policy: &PolicySettings,
    ) -> Result<SingleDelivery> {
        self.store
            .set_file_status(unit.id, FileStatus::Sending)
            .await?;

        let source = PathBuf::from(&unit.filepath);
        let relative = self.relative_name(&source);

        let (path, transformed) = match transform_for_transfer(&source, &relative, policy)? {
            Some(temp) => {
                let temp_path = temp.into_temp_path();
                (temp_path.to_path_buf(), Some(temp_path))
            }
            None => (source, None),
        };

        let size = std::fs::metadata(&path)
            .map_err(|err| MigrateError::transfer(&unit.filepath, format!("stat failed: {err}")))?
            .len();
        let checksum = archive_checksum(&relative, size);
        let progress = self.progress().await?;

        Ok(SingleDelivery {
            unit_id: unit.id,
            path,
            transformed,
            sent_filename: relative,
            checksum,
            size,
            progress,
        })
    }

    /// Destination-relative path for a unit; files outside the root keep
    /// only their file name so they land inside the destination root.
    fn relative_name(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .ok()
            .or_else(|| path.file_name().map(Path::new))
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Percentage of units no longer pending, over the persisted total.
    ///
    /// In-flight, failed, and ineligible units all count as handled; the
    /// completion signal is the empty-pending check, not this number.
    async fn progress(&self) -> Result<f64> {
        let total = self.store.get_int_option(OPT_TOTAL_FILES, 0).await?.max(1);
        let pending = self
            .store
            .count_files_with_status(FileStatus::Pending)
            .await?;
        let handled = (total - pending).max(0);
        Ok(((handled as f64 / total as f64) * 10000.0).round() / 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DatabaseConfig, SiteConfig};
    use crate::store::MemoryStore;
    use crate::transfer::ZipArchiver;
    use std::fs::File;

    fn test_config(root: &Path) -> Config {
        Config {
            site: SiteConfig {
                root: root.to_path_buf(),
            },
            database: DatabaseConfig {
                host: "localhost".into(),
                port: 3306,
                database: "test".into(),
                user: "test".into(),
                password: "test".into(),
            },
            transfer: TransferConfig::default(),
        }
    }

    fn engine(config: Config, store: Arc<MemoryStore>) -> FileTransferEngine {
        let ctx = ServeContext::new(config, store, None, Some(Arc::new(ZipArchiver)));
        FileTransferEngine::new(&ctx)
    }

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn first_call_enumerates_then_archives_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        write(dir.path(), "sub/b.txt", b"beta");
        let store = Arc::new(MemoryStore::new());
        let e = engine(test_config(dir.path()), store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated {
                newly_recorded,
                total_files,
                ..
            } => {
                assert_eq!(newly_recorded, 2);
                assert_eq!(total_files, 2);
            }
            _ => panic!("expected enumeration first"),
        }

        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };
        assert_eq!(delivery.unit_ids.len(), 2);
        assert!(delivery.unit_errors.is_empty());
        assert!(delivery.size > 0);
        assert_eq!(delivery.progress, 100.0);

        let mut archive =
            zip::ZipArchive::new(File::open(&delivery.archive_path).unwrap()).unwrap();
        assert!(archive.by_name("sub/b.txt").is_ok());

        e.complete_archive(&delivery).await.unwrap();
        drop(delivery);

        match e.serve().await.unwrap() {
            FileServeOutcome::Complete => {}
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn oversized_files_are_streamed_individually() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "big.bin", &vec![0u8; 64]);
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config(dir.path());
        config.transfer.max_archive_file_size = 16;
        let e = engine(config, store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { .. } => {}
            _ => panic!("expected enumeration first"),
        }

        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Single(d) => d,
            _ => panic!("expected single-file delivery"),
        };
        assert_eq!(delivery.sent_filename, "big.bin");
        assert_eq!(delivery.size, 64);
        assert!(delivery.transformed.is_none());
        assert_eq!(
            store
                .count_files_with_status(FileStatus::Sending)
                .await
                .unwrap(),
            1
        );

        e.complete_single(&delivery).await.unwrap();
        assert_eq!(
            store.count_files_with_status(FileStatus::Sent).await.unwrap(),
            1
        );

        match e.serve().await.unwrap() {
            FileServeOutcome::Complete => {}
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn unacknowledged_delivery_blocks_completion() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        let e = engine(test_config(dir.path()), store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { .. } => {}
            _ => panic!("expected enumeration first"),
        }
        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };
        drop(delivery); // never acknowledged

        match e.serve().await {
            Err(MigrateError::Busy(_)) => {}
            Err(err) => panic!("expected busy, got {err}"),
            Ok(_) => panic!("expected busy, got an outcome"),
        }
    }

    #[tokio::test]
    async fn policy_transform_applies_inside_archives() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".htaccess", b"php_value memory_limit 256M\n");
        let store = Arc::new(MemoryStore::new());
        let e = engine(test_config(dir.path()), store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { .. } => {}
            _ => panic!("expected enumeration first"),
        }
        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };

        let mut archive =
            zip::ZipArchive::new(File::open(&delivery.archive_path).unwrap()).unwrap();
        let mut content = String::new();
        std::io::Read::read_to_string(&mut archive.by_name(".htaccess").unwrap(), &mut content)
            .unwrap();
        assert!(content.contains("# php_value memory_limit 256M"));
    }

    #[tokio::test]
    async fn missing_file_fails_its_unit_but_not_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.txt", b"k");
        write(dir.path(), "gone.txt", b"g");
        let store = Arc::new(MemoryStore::new());
        let e = engine(test_config(dir.path()), store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { .. } => {}
            _ => panic!("expected enumeration first"),
        }
        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();

        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };
        assert_eq!(delivery.unit_ids.len(), 1);
        assert_eq!(delivery.unit_errors.len(), 1);
        assert_eq!(
            store
                .count_files_with_status(FileStatus::SendFailed)
                .await
                .unwrap(),
            1
        );

        e.complete_archive(&delivery).await.unwrap();
        drop(delivery);

        // The failed unit never blocks completion.
        match e.serve().await.unwrap() {
            FileServeOutcome::Complete => {}
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn progress_counts_every_non_pending_unit() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "small.txt", b"s");
        // ':' is rejected by the name rules, so this unit lands Unreadable.
        write(dir.path(), "bad:name.txt", b"b");
        write(dir.path(), "big.bin", &vec![0u8; 64]);
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config(dir.path());
        config.transfer.max_archive_file_size = 16;
        let e = engine(config, store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { progress, .. } => {
                // The unreadable unit already counts as handled.
                assert_eq!(progress, 33.33);
            }
            _ => panic!("expected enumeration first"),
        }

        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };
        // small.txt in flight, the unreadable unit handled, big.bin pending.
        assert_eq!(delivery.progress, 66.67);
    }

    #[tokio::test]
    async fn serving_resumes_between_enumeration_windows() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"a");
        write(dir.path(), "b.txt", b"b");
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config(dir.path());
        config.transfer.files_per_window = 1;
        let e = engine(config, store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { newly_recorded, .. } => assert_eq!(newly_recorded, 1),
            _ => panic!("expected the first enumeration window"),
        }

        // The recorded unit is served before the walk finishes.
        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected the first unit to be served"),
        };
        assert_eq!(delivery.unit_ids.len(), 1);
        e.complete_archive(&delivery).await.unwrap();
        drop(delivery);

        // Pool drained: the next window runs, then its unit is served.
        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { newly_recorded, .. } => assert_eq!(newly_recorded, 1),
            _ => panic!("expected the second enumeration window"),
        }
        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected the second unit to be served"),
        };
        e.complete_archive(&delivery).await.unwrap();
        drop(delivery);

        match e.serve().await.unwrap() {
            FileServeOutcome::Complete => {}
            _ => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn stale_in_flight_units_are_reclaimed_and_reserved() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.txt", b"alpha");
        let store = Arc::new(MemoryStore::new());
        let mut config = test_config(dir.path());
        config.transfer.sending_lease_secs = 0;
        let e = engine(config, store.clone());

        match e.serve().await.unwrap() {
            FileServeOutcome::Enumerated { .. } => {}
            _ => panic!("expected enumeration first"),
        }
        let delivery = match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => d,
            _ => panic!("expected an archive batch"),
        };
        drop(delivery); // simulated crash before acknowledgment

        // With a zero lease the unit is immediately reclaimed and re-served.
        match e.serve().await.unwrap() {
            FileServeOutcome::Archive(d) => {
                assert_eq!(d.unit_ids.len(), 1);
            }
            _ => panic!("expected the reclaimed unit to be re-served"),
        }
    }
}
