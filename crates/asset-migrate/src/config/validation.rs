//! Configuration validation.

use super::{Config, StoreConfig, StoreSide};
use crate::asset::Scope;
use crate::error::{MigrateError, Result};

/// Largest page a ListObjectsV2 call will return.
const MAX_PAGE_SIZE: usize = 1000;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store(&config.source, StoreSide::Source)?;
    validate_store(&config.destination, StoreSide::Destination)?;

    // Cannot migrate a store onto itself
    if same_store(&config.source, &config.destination) {
        return Err(MigrateError::Config(
            "source and destination cannot be the same store".into(),
        ));
    }

    let migration = &config.migration;
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.checkpoint_interval {
        return Err(MigrateError::Config(
            "migration.checkpoint_interval must be at least 1".into(),
        ));
    }
    if let Some(size) = migration.page_size {
        if size == 0 || size > MAX_PAGE_SIZE {
            return Err(MigrateError::Config(format!(
                "migration.page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
    }
    if let Some(0) = migration.max_attempts {
        return Err(MigrateError::Config(
            "migration.max_attempts must be at least 1".into(),
        ));
    }
    if migration.ledger_path.as_os_str().is_empty() {
        return Err(MigrateError::Config(
            "migration.ledger_path is required".into(),
        ));
    }
    if migration.base_prefix.split('/').any(|seg| seg == "..") {
        return Err(MigrateError::Config(
            "migration.base_prefix must not contain '..'".into(),
        ));
    }
    if let Some(collection) = &migration.collection {
        Scope::parse(Some(collection))?;
    }

    Ok(())
}

/// Names of required credential variables that `lookup` cannot resolve.
pub fn missing_env_vars<F>(config: &Config, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();
    for (store, side) in [
        (&config.source, StoreSide::Source),
        (&config.destination, StoreSide::Destination),
    ] {
        if let StoreConfig::S3(s3) = store {
            for var in s3.credential_vars(side) {
                if lookup(&var).map_or(true, |v| v.is_empty()) {
                    missing.push(var);
                }
            }
        }
    }
    missing
}

fn validate_store(store: &StoreConfig, side: StoreSide) -> Result<()> {
    match store {
        StoreConfig::Local(local) => {
            if local.root.as_os_str().is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.root is required",
                    side.as_str()
                )));
            }
        }
        StoreConfig::S3(s3) => {
            if s3.bucket.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.bucket is required",
                    side.as_str()
                )));
            }
            if let Some(endpoint) = &s3.endpoint {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(MigrateError::Config(format!(
                        "{}.endpoint must be an http(s) URL, got '{}'",
                        side.as_str(),
                        endpoint
                    )));
                }
            }
        }
    }
    Ok(())
}

fn same_store(a: &StoreConfig, b: &StoreConfig) -> bool {
    match (a, b) {
        (StoreConfig::Local(a), StoreConfig::Local(b)) => a.root == b.root,
        (StoreConfig::S3(a), StoreConfig::S3(b)) => a.bucket == b.bucket && a.endpoint == b.endpoint,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalStoreConfig, MigrationConfig, S3StoreConfig, S3Credentials};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn s3(bucket: &str) -> S3StoreConfig {
        S3StoreConfig {
            bucket: bucket.to_string(),
            endpoint: Some("https://account.r2.cloudflarestorage.com".to_string()),
            region: "auto".to_string(),
            force_path_style: true,
            env_prefix: None,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: StoreConfig::S3(s3("old-images")),
            destination: StoreConfig::S3(s3("new-images")),
            migration: MigrationConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_bucket() {
        let mut config = valid_config();
        config.source = StoreConfig::S3(s3(""));
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_store_rejected() {
        let mut config = valid_config();
        config.destination = StoreConfig::S3(s3("old-images"));
        assert!(validate(&config).is_err());

        config.source = StoreConfig::Local(LocalStoreConfig {
            root: PathBuf::from("/data"),
        });
        config.destination = StoreConfig::Local(LocalStoreConfig {
            root: PathBuf::from("/data"),
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid_config();
        config.migration.workers = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_page_size_bounds() {
        let mut config = valid_config();
        config.migration.page_size = Some(1001);
        assert!(validate(&config).is_err());
        config.migration.page_size = Some(1000);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_bad_endpoint_rejected() {
        let mut config = valid_config();
        let mut store = s3("x");
        store.endpoint = Some("ftp://nope".into());
        config.source = StoreConfig::S3(store);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_collection_rejected() {
        let mut config = valid_config();
        config.migration.collection = Some("../etc".into());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_env_vars_lists_every_name() {
        let config = valid_config();
        let env: HashMap<&str, &str> = [("SOURCE_ACCESS_KEY_ID", "key")].into_iter().collect();
        let missing = missing_env_vars(&config, |name| env.get(name).map(|v| v.to_string()));
        assert_eq!(
            missing,
            vec![
                "SOURCE_SECRET_ACCESS_KEY".to_string(),
                "DEST_ACCESS_KEY_ID".to_string(),
                "DEST_SECRET_ACCESS_KEY".to_string(),
            ]
        );
    }

    #[test]
    fn test_custom_env_prefix() {
        let mut config = valid_config();
        let mut store = s3("custom");
        store.env_prefix = Some("R2".into());
        config.destination = StoreConfig::S3(store);
        let missing = missing_env_vars(&config, |_| None);
        assert!(missing.contains(&"R2_ACCESS_KEY_ID".to_string()));
        assert!(!missing.contains(&"DEST_ACCESS_KEY_ID".to_string()));
    }

    #[test]
    fn test_local_stores_need_no_env() {
        let config = Config {
            source: StoreConfig::Local(LocalStoreConfig {
                root: PathBuf::from("/a"),
            }),
            destination: StoreConfig::Local(LocalStoreConfig {
                root: PathBuf::from("/b"),
            }),
            migration: MigrationConfig::default(),
        };
        assert!(missing_env_vars(&config, |_| None).is_empty());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = S3Credentials {
            access_key_id: "AKIAEXAMPLE".to_string(),
            secret_access_key: "super_secret_value_123".to_string(),
        };
        let debug_output = format!("{:?}", creds);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_value_123"),
            "Debug output should not contain actual secret value"
        );
    }
}
