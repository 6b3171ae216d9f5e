//! Archive delivery strategy.
//!
//! The decision between archive and single-file delivery is made once at
//! startup by installing (or not installing) an [`Archiver`] on the serve
//! context, not re-probed on every call.

use std::fs::File;
use std::io;
use std::path::Path;

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Result;

/// Strategy for bundling a batch of small files into one response.
pub trait Archiver: Send + Sync {
    /// Format label reported in response metadata.
    fn format_name(&self) -> &'static str;

    /// Start writing an archive at `scratch_path`.
    fn begin(&self, scratch_path: &Path) -> Result<Box<dyn ArchiveWriter + Send>>;
}

/// An in-progress archive.
pub trait ArchiveWriter: Send {
    /// Add one file under its relative path. A failure here fails only
    /// this entry; the caller continues with the rest of the batch.
    fn add_file(&mut self, source: &Path, relative_path: &str) -> Result<()>;

    /// Finish and flush the archive.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Zip-format archiver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl Archiver for ZipArchiver {
    fn format_name(&self) -> &'static str {
        "zip"
    }

    fn begin(&self, scratch_path: &Path) -> Result<Box<dyn ArchiveWriter + Send>> {
        let file = File::create(scratch_path)?;
        Ok(Box::new(ZipArchiveWriter {
            writer: ZipWriter::new(file),
        }))
    }
}

struct ZipArchiveWriter {
    writer: ZipWriter<File>,
}

impl ArchiveWriter for ZipArchiveWriter {
    fn add_file(&mut self, source: &Path, relative_path: &str) -> Result<()> {
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);
        self.writer.start_file(relative_path, options)?;
        let mut reader = File::open(source)?;
        io::copy(&mut reader, &mut self.writer)?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.finish()?;
        Ok(())
    }
}

/// Archive checksum: crc32 over the generated name and byte size.
///
/// Deliberately cheap; it identifies a delivery for reconciliation, it
/// does not authenticate the payload.
pub fn archive_checksum(name: &str, size: u64) -> String {
    format!("{:08x}", crc32fast::hash(format!("{name}{size}").as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn zip_archiver_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "alpha").unwrap();
        std::fs::write(&b, "beta").unwrap();
        let archive_path = dir.path().join("out.zip");

        let archiver = ZipArchiver;
        let mut writer = archiver.begin(&archive_path).unwrap();
        writer.add_file(&a, "a.txt").unwrap();
        writer.add_file(&b, "sub/b.txt").unwrap();
        writer.finish().unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
        let mut content = String::new();
        archive
            .by_name("sub/b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "beta");
    }

    #[test]
    fn adding_a_missing_file_fails_only_that_entry() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        std::fs::write(&a, "alpha").unwrap();
        let archive_path = dir.path().join("out.zip");

        let archiver = ZipArchiver;
        let mut writer = archiver.begin(&archive_path).unwrap();
        assert!(writer
            .add_file(&dir.path().join("missing.txt"), "missing.txt")
            .is_err());
        writer.add_file(&a, "a.txt").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn checksum_depends_on_name_and_size() {
        let c1 = archive_checksum("batch-1.zip", 100);
        let c2 = archive_checksum("batch-1.zip", 101);
        let c3 = archive_checksum("batch-2.zip", 100);
        assert_ne!(c1, c2);
        assert_ne!(c1, c3);
        assert_eq!(c1, archive_checksum("batch-1.zip", 100));
        assert_eq!(c1.len(), 8);
    }
}
