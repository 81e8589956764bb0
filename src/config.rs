use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{RefKeeperError, Result};
use crate::resolution::{default_descriptors, FieldDescriptor, IdentifierPolicy};
use crate::types::Collection;

/// Name of the configuration file stored inside the `.refkeeper` directory.
pub const CONFIG_FILENAME: &str = "config.json";

/// Name of the database file stored inside the `.refkeeper` directory.
pub const DB_FILENAME: &str = "refkeeper.db";

/// Name of the hidden directory holding the store.
pub const REFKEEPER_DIR: &str = ".refkeeper";

/// Settings of the consistency sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Pages processed at the same time.
    pub concurrency: usize,
    /// Records per keyset page.
    pub page_size: usize,
    /// How identifiers already present are treated during repairs.
    pub identifier_policy: IdentifierPolicy,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            page_size: 200,
            identifier_policy: IdentifierPolicy::Verify,
        }
    }
}

/// Per-collection overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Replaces the built-in reference fields when set.
    pub references: Option<Vec<FieldDescriptor>>,
    /// Added on top of the built-in (or replaced) reference fields.
    pub extra_references: Vec<FieldDescriptor>,
    /// Fields whose value must be unique in the collection (case-insensitive).
    pub unique_fields: Vec<String>,
    /// Array-aware paths compared by duplicate detection.
    pub duplicate_fields: Vec<String>,
}

/// Configuration for a refkeeper store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefKeeperConfig {
    /// Schema version of the configuration.
    pub version: u32,
    /// Root directory holding the `.refkeeper` directory.
    pub root_dir: String,
    /// Identifier policy used on normal writes.
    pub identifier_policy: IdentifierPolicy,
    /// Lifetime of cached lookup answers.
    pub cache_ttl_secs: u64,
    /// How often the service purges expired cache entries.
    pub cache_purge_interval_secs: u64,
    pub sweep: SweepConfig,
    pub collections: BTreeMap<Collection, CollectionConfig>,
}

fn fields(paths: &[&str]) -> Vec<String> {
    paths.iter().map(|p| p.to_string()).collect()
}

fn default_collections() -> BTreeMap<Collection, CollectionConfig> {
    let mut collections = BTreeMap::new();
    let mut set = |collection, unique: &[&str], duplicate: &[&str]| {
        collections.insert(
            collection,
            CollectionConfig {
                unique_fields: fields(unique),
                duplicate_fields: fields(duplicate),
                ..CollectionConfig::default()
            },
        );
    };
    set(Collection::Contacts, &[], &["phones.number", "emails.address"]);
    set(Collection::Companies, &[], &["name", "phones.phoneNumber", "emails.address"]);
    set(Collection::Projects, &["name"], &["name"]);
    set(Collection::Inventory, &[], &["unitNumber"]);
    set(Collection::Leads, &[], &["mobile", "email"]);
    set(Collection::Deals, &[], &[]);
    set(Collection::Users, &["email"], &["email"]);
    collections
}

impl Default for RefKeeperConfig {
    fn default() -> Self {
        Self {
            version: 1,
            root_dir: String::new(),
            identifier_policy: IdentifierPolicy::Trust,
            cache_ttl_secs: 3600,
            cache_purge_interval_secs: 300,
            sweep: SweepConfig::default(),
            collections: default_collections(),
        }
    }
}

impl RefKeeperConfig {
    fn collection(&self, collection: Collection) -> Option<&CollectionConfig> {
        self.collections.get(&collection)
    }

    /// Reference fields of `collection`: built-ins unless replaced, plus any
    /// configured extras.
    pub fn descriptors(&self, collection: Collection) -> Vec<FieldDescriptor> {
        let Some(cfg) = self.collection(collection) else {
            return default_descriptors(collection);
        };
        let mut descriptors = cfg
            .references
            .clone()
            .unwrap_or_else(|| default_descriptors(collection));
        descriptors.extend(cfg.extra_references.iter().cloned());
        descriptors
    }

    pub fn unique_fields(&self, collection: Collection) -> &[String] {
        self.collection(collection)
            .map(|c| c.unique_fields.as_slice())
            .unwrap_or(&[])
    }

    pub fn duplicate_fields(&self, collection: Collection) -> &[String] {
        self.collection(collection)
            .map(|c| c.duplicate_fields.as_slice())
            .unwrap_or(&[])
    }

    /// Rejects settings that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.sweep.concurrency == 0 {
            return Err(RefKeeperError::Config {
                message: "sweep.concurrency must be at least 1".to_string(),
            });
        }
        if self.sweep.page_size == 0 {
            return Err(RefKeeperError::Config {
                message: "sweep.page_size must be at least 1".to_string(),
            });
        }
        for (collection, cfg) in &self.collections {
            let refs = cfg.references.iter().flatten().chain(&cfg.extra_references);
            for descriptor in refs {
                if descriptor.path.trim().is_empty() {
                    return Err(RefKeeperError::Config {
                        message: format!("{collection}: reference with an empty path"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Returns the path to the `.refkeeper` directory within the given root.
pub fn get_refkeeper_dir(project_root: &Path) -> PathBuf {
    project_root.join(REFKEEPER_DIR)
}

/// Returns the path to `config.json` within the `.refkeeper` directory.
pub fn get_config_path(project_root: &Path) -> PathBuf {
    get_refkeeper_dir(project_root).join(CONFIG_FILENAME)
}

/// Returns the path to the SQLite database within the `.refkeeper` directory.
pub fn get_db_path(project_root: &Path) -> PathBuf {
    get_refkeeper_dir(project_root).join(DB_FILENAME)
}

/// Loads the configuration from disk.
///
/// If the file does not exist, returns the default configuration with
/// `root_dir` set to the given root. Missing keys take their defaults.
pub fn load_config(project_root: &Path) -> Result<RefKeeperConfig> {
    let config_path = get_config_path(project_root);

    if !config_path.exists() {
        return Ok(RefKeeperConfig {
            root_dir: project_root.to_string_lossy().to_string(),
            ..RefKeeperConfig::default()
        });
    }

    let contents = fs::read_to_string(&config_path).map_err(|e| RefKeeperError::Config {
        message: format!(
            "failed to read config file '{}': {}",
            config_path.display(),
            e
        ),
    })?;

    let config: RefKeeperConfig =
        serde_json::from_str(&contents).map_err(|e| RefKeeperError::Config {
            message: format!(
                "failed to parse config file '{}': {}",
                config_path.display(),
                e
            ),
        })?;

    config.validate()?;
    Ok(config)
}

/// Saves the configuration using an atomic write (temp file, then rename).
pub fn save_config(project_root: &Path, config: &RefKeeperConfig) -> Result<()> {
    let refkeeper_dir = get_refkeeper_dir(project_root);
    fs::create_dir_all(&refkeeper_dir).map_err(|e| RefKeeperError::Config {
        message: format!(
            "failed to create refkeeper directory '{}': {}",
            refkeeper_dir.display(),
            e
        ),
    })?;

    let config_path = get_config_path(project_root);
    let tmp_path = config_path.with_extension("tmp");

    let json = serde_json::to_string_pretty(config).map_err(|e| RefKeeperError::Config {
        message: format!("failed to serialize config: {}", e),
    })?;

    fs::write(&tmp_path, &json).map_err(|e| RefKeeperError::Config {
        message: format!(
            "failed to write temporary config file '{}': {}",
            tmp_path.display(),
            e
        ),
    })?;

    fs::rename(&tmp_path, &config_path).map_err(|e| RefKeeperError::Config {
        message: format!(
            "failed to rename temporary config file '{}' to '{}': {}",
            tmp_path.display(),
            config_path.display(),
            e
        ),
    })?;

    Ok(())
}
