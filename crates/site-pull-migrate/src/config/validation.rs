//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.site.root.as_os_str().is_empty() {
        return Err(MigrateError::Config("site.root is required".into()));
    }
    if !config.site.root.is_absolute() {
        return Err(MigrateError::Config(format!(
            "site.root must be an absolute path, got '{}'",
            config.site.root.display()
        )));
    }

    if config.database.host.is_empty() {
        return Err(MigrateError::Config("database.host is required".into()));
    }
    if config.database.database.is_empty() {
        return Err(MigrateError::Config("database.database is required".into()));
    }
    if config.database.user.is_empty() {
        return Err(MigrateError::Config("database.user is required".into()));
    }

    if config.transfer.chunk_size == 0 {
        return Err(MigrateError::Config(
            "transfer.chunk_size must be at least 1".into(),
        ));
    }
    if config.transfer.max_archive_files < 1 {
        return Err(MigrateError::Config(
            "transfer.max_archive_files must be at least 1".into(),
        ));
    }
    if config.transfer.db_slice_rows < 1 {
        return Err(MigrateError::Config(
            "transfer.db_slice_rows must be at least 1".into(),
        ));
    }
    if config.transfer.files_per_window == 0 {
        return Err(MigrateError::Config(
            "transfer.files_per_window must be at least 1".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    fn minimal_yaml() -> &'static str {
        r#"
site:
  root: /var/www/site
database:
  host: localhost
  database: wordpress
  user: wp
  password: secret
"#
    }

    #[test]
    fn accepts_minimal_config_with_defaults() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(config.transfer.chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.transfer.max_archive_files, 50);
        assert_eq!(config.transfer.max_archive_file_size, 1024 * 1024);
        assert_eq!(config.transfer.db_slice_rows, 100);
        assert_eq!(config.transfer.files_per_window, 100);
        assert!(config
            .transfer
            .base_skip_folders
            .contains(&"wp-content/cache".to_string()));
    }

    #[test]
    fn rejects_relative_root() {
        let yaml = minimal_yaml().replace("/var/www/site", "www/site");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn rejects_missing_database_user() {
        let yaml = minimal_yaml().replace("user: wp", "user: \"\"");
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
