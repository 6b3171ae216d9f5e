//! Per-file content policies applied before transfer.
//!
//! Each policy is a pure text transform keyed on the file's relative path.
//! Transforms always operate on a temporary copy; the source file on disk
//! is never mutated.

mod htaccess;
mod index_php;
mod wp_config;

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::Result;

/// URL and option context the policies need.
#[derive(Debug, Clone, Default)]
pub struct PolicySettings {
    /// The source site URL.
    pub site_url: Option<String>,
    /// The destination site URL.
    pub dest_url: Option<String>,
    /// Whether the media folder is skipped and uploads should redirect
    /// back to the source.
    pub skip_media_folder: bool,
}

/// Apply the content policy for `relative_path`, if any.
///
/// Returns `Some(temp_file)` holding the transformed copy to transfer in
/// place of the original, or `None` when no policy applies. The caller
/// must keep the handle alive for as long as it reads from it.
pub fn transform_for_transfer(
    source: &Path,
    relative_path: &str,
    settings: &PolicySettings,
) -> Result<Option<NamedTempFile>> {
    let file_name = Path::new(relative_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let transformed = if file_name == ".htaccess" {
        let content = read_text(source)?;
        Some(htaccess::rewrite(
            &content,
            settings.site_url.as_deref(),
            settings.skip_media_folder,
        )?)
    } else if relative_path == "wp-config.php" {
        let content = read_text(source)?;
        Some(wp_config::rewrite(
            &content,
            settings.site_url.as_deref(),
            settings.dest_url.as_deref(),
        )?)
    } else if relative_path == "index.php" {
        let content = read_text(source)?;
        Some(index_php::rewrite(&content))
    } else {
        None
    };

    match transformed {
        Some(content) => {
            let mut file = NamedTempFile::new()?;
            file.write_all(content.as_bytes())?;
            file.flush()?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn htaccess_transform_leaves_source_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(".htaccess");
        let original = "php_value memory_limit 256M\nRewriteEngine On\n";
        std::fs::write(&source, original).unwrap();

        let settings = PolicySettings::default();
        let transformed = transform_for_transfer(&source, ".htaccess", &settings)
            .unwrap()
            .expect("policy applies");

        let out = std::fs::read_to_string(transformed.path()).unwrap();
        assert!(out.contains("# php_value memory_limit 256M"));
        // The file on disk is byte-identical to what was written.
        assert_eq!(std::fs::read_to_string(&source).unwrap(), original);
    }

    #[test]
    fn nested_htaccess_matches_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("htaccess-nested");
        std::fs::write(&source, "php_flag log_errors on\n").unwrap();

        let settings = PolicySettings::default();
        let transformed =
            transform_for_transfer(&source, "wp-content/uploads/.htaccess", &settings).unwrap();
        assert!(transformed.is_some());
    }

    #[test]
    fn unrelated_files_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("style.css");
        std::fs::write(&source, "body {}\n").unwrap();

        let settings = PolicySettings::default();
        let transformed = transform_for_transfer(&source, "style.css", &settings).unwrap();
        assert!(transformed.is_none());
    }

    #[test]
    fn nested_index_php_is_not_transformed() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("index.php");
        std::fs::write(&source, "<?php // silence\n").unwrap();

        let settings = PolicySettings::default();
        // Only the root index.php carries the bootstrap include.
        let transformed =
            transform_for_transfer(&source, "wp-content/plugins/index.php", &settings).unwrap();
        assert!(transformed.is_none());
    }
}
