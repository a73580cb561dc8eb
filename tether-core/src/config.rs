use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory holding tether's config and persistent stores, relative to the
/// project root.
pub const TETHER_DIR: &str = ".tether";
pub const CONFIG_FILE: &str = "config.toml";
pub const DB_FILE: &str = "tether.db";

/// Prefix for environment overrides: `UNITY_SCANNER_<SECTION>_<KEY>`.
const ENV_PREFIX: &str = "UNITY_SCANNER_";

/// Top-level configuration, matching `.tether/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TetherConfig {
    #[serde(default)]
    pub scan: ScanSection,
    #[serde(default)]
    pub performance: PerformanceSection,
    #[serde(default)]
    pub graph: GraphSection,
    #[serde(default)]
    pub query: QuerySection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

impl TetherConfig {
    /// Load from `.tether/config.toml` under the project root, then apply
    /// environment overrides.
    pub fn load(project_root: &Path) -> Result<Self, ConfigError> {
        let path = project_root.join(TETHER_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;
        let mut config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides(std::env::vars());
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file; refuses to overwrite an existing one.
    pub fn write_default(project_root: &Path) -> Result<PathBuf, ConfigError> {
        let dir = project_root.join(TETHER_DIR);
        std::fs::create_dir_all(&dir)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", dir.display())))?;
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            return Err(ConfigError::Invalid(format!(
                "{} already exists",
                path.display()
            )));
        }
        let rendered = toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(&path, rendered)
            .map_err(|e| ConfigError::Invalid(format!("{}: {e}", path.display())))?;
        Ok(path)
    }

    pub fn db_path(&self, project_root: &Path) -> PathBuf {
        match &self.persistence.store_path {
            Some(path) => project_root.join(path),
            None => project_root.join(TETHER_DIR).join(DB_FILE),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.performance.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if self.graph.max_cycle_length == 0 {
            return Err(ConfigError::Invalid(
                "max_cycle_length must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply `UNITY_SCANNER_<SECTION>_<KEY>` overrides. Unknown keys are
    /// ignored; unparsable values keep the configured default.
    pub fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            match section {
                "SCAN" => self.scan.apply(&key, &value),
                "PERFORMANCE" => self.performance.apply(&key, &value),
                "GRAPH" => self.graph.apply(&key, &value),
                "QUERY" => self.query.apply(&key, &value),
                "PERSISTENCE" => self.persistence.apply(&key, &value),
                _ => {}
            }
        }
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanSection {
    /// Roots to walk, relative to the project root.
    pub paths: Vec<String>,
    /// Glob patterns excluded from the walk.
    pub exclude_paths: Vec<String>,
    /// Extensions considered scan candidates (without dots).
    pub file_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub ignore_hidden_files: bool,
    pub follow_symlinks: bool,
    /// Confirm size/mtime changes with a streaming content hash.
    pub deep_check: bool,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            paths: vec!["Assets".into()],
            exclude_paths: vec![
                "Library/**".into(),
                "Temp/**".into(),
                "Logs/**".into(),
                "obj/**".into(),
            ],
            file_extensions: vec![
                "meta".into(),
                "prefab".into(),
                "unity".into(),
                "scene".into(),
                "asset".into(),
                "mat".into(),
                "controller".into(),
                "anim".into(),
                "cs".into(),
            ],
            max_file_size_mb: 50,
            ignore_hidden_files: true,
            follow_symlinks: false,
            deep_check: true,
        }
    }
}

impl ScanSection {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "paths" => self.paths = parse_list(value),
            "exclude_paths" => self.exclude_paths = parse_list(value),
            "file_extensions" => self.file_extensions = parse_list(value),
            "max_file_size_mb" => {
                if let Ok(v) = value.parse() {
                    self.max_file_size_mb = v;
                }
            }
            "ignore_hidden_files" => {
                if let Some(v) = parse_bool(value) {
                    self.ignore_hidden_files = v;
                }
            }
            "follow_symlinks" => {
                if let Some(v) = parse_bool(value) {
                    self.follow_symlinks = v;
                }
            }
            "deep_check" => {
                if let Some(v) = parse_bool(value) {
                    self.deep_check = v;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceSection {
    /// Worker cap; the effective count is `min(cpu_count, max_workers)`.
    pub max_workers: usize,
    pub batch_size: usize,
    pub memory_limit_mb: u64,
    pub per_file_timeout_s: u64,
    /// Unity YAML files above this size skip per-document tree building and
    /// use the flat streaming scan.
    pub yaml_tree_threshold_mb: u64,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism().map_or(4, |n| n.get()),
            batch_size: 1000,
            memory_limit_mb: 512,
            per_file_timeout_s: 60,
            yaml_tree_threshold_mb: 16,
        }
    }
}

impl PerformanceSection {
    pub fn effective_workers(&self) -> usize {
        let cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
        self.max_workers.clamp(1, cpus.max(1))
    }

    pub fn yaml_tree_threshold_bytes(&self) -> u64 {
        self.yaml_tree_threshold_mb * 1024 * 1024
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "max_workers" => {
                if let Ok(v) = value.parse() {
                    self.max_workers = v;
                }
            }
            "batch_size" => {
                if let Ok(v) = value.parse() {
                    self.batch_size = v;
                }
            }
            "memory_limit_mb" => {
                if let Ok(v) = value.parse() {
                    self.memory_limit_mb = v;
                }
            }
            "per_file_timeout_s" => {
                if let Ok(v) = value.parse() {
                    self.per_file_timeout_s = v;
                }
            }
            "yaml_tree_threshold_mb" => {
                if let Ok(v) = value.parse() {
                    self.yaml_tree_threshold_mb = v;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphSection {
    /// Reject transactions that would introduce a new SCC of size ≥ 2.
    pub reject_new_cycles: bool,
    pub max_cycle_length: usize,
}

impl Default for GraphSection {
    fn default() -> Self {
        Self {
            reject_new_cycles: false,
            max_cycle_length: 20,
        }
    }
}

impl GraphSection {
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "reject_new_cycles" => {
                if let Some(v) = parse_bool(value) {
                    self.reject_new_cycles = v;
                }
            }
            "max_cycle_length" => {
                if let Ok(v) = value.parse() {
                    self.max_cycle_length = v;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QuerySection {
    pub cache_ttl_s: u64,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self { cache_ttl_s: 300 }
    }
}

impl QuerySection {
    fn apply(&mut self, key: &str, value: &str) {
        if key == "cache_ttl_s" {
            if let Ok(v) = value.parse() {
                self.cache_ttl_s = v;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceSection {
    /// Database location relative to the project root; defaults to
    /// `.tether/tether.db`.
    pub store_path: Option<String>,
    pub backup_enabled: bool,
}

impl Default for PersistenceSection {
    fn default() -> Self {
        Self {
            store_path: None,
            backup_enabled: true,
        }
    }
}

impl PersistenceSection {
    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "store_path" => self.store_path = Some(value.to_string()),
            "backup_enabled" => {
                if let Some(v) = parse_bool(value) {
                    self.backup_enabled = v;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = TetherConfig::default();
        assert_eq!(config.scan.max_file_size_mb, 50);
        assert!(config.scan.ignore_hidden_files);
        assert!(!config.scan.follow_symlinks);
        assert!(config.scan.deep_check);
        assert_eq!(config.performance.batch_size, 1000);
        assert_eq!(config.performance.memory_limit_mb, 512);
        assert_eq!(config.performance.per_file_timeout_s, 60);
        assert_eq!(config.performance.yaml_tree_threshold_mb, 16);
        assert!(!config.graph.reject_new_cycles);
        assert_eq!(config.graph.max_cycle_length, 20);
        assert_eq!(config.query.cache_ttl_s, 300);
        assert!(config.persistence.backup_enabled);
        assert!(config.persistence.store_path.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml_str = r#"
[scan]
paths = ["Assets", "Packages"]
max_file_size_mb = 10
deep_check = false

[performance]
max_workers = 2
batch_size = 250

[graph]
reject_new_cycles = true

[query]
cache_ttl_s = 60

[persistence]
store_path = "custom/tether.db"
"#;
        let config: TetherConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scan.paths, vec!["Assets", "Packages"]);
        assert_eq!(config.scan.max_file_size_mb, 10);
        assert!(!config.scan.deep_check);
        assert_eq!(config.performance.max_workers, 2);
        assert_eq!(config.performance.batch_size, 250);
        assert!(config.graph.reject_new_cycles);
        assert_eq!(config.query.cache_ttl_s, 60);
        assert_eq!(config.persistence.store_path.as_deref(), Some("custom/tether.db"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[scan]
max_file_size_mb = 5
"#;
        let config: TetherConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scan.max_file_size_mb, 5);
        // Unspecified fields get defaults
        assert!(config.scan.deep_check);
        assert_eq!(config.performance.batch_size, 1000);
        assert_eq!(config.query.cache_ttl_s, 300);
    }

    #[test]
    fn toml_round_trip() {
        let config = TetherConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let back: TetherConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn env_overrides_scalars_and_lists() {
        let mut config = TetherConfig::default();
        let vars = vec![
            ("UNITY_SCANNER_SCAN_MAX_FILE_SIZE_MB".to_string(), "7".to_string()),
            ("UNITY_SCANNER_SCAN_DEEP_CHECK".to_string(), "false".to_string()),
            ("UNITY_SCANNER_SCAN_PATHS".to_string(), "Assets,Packages".to_string()),
            ("UNITY_SCANNER_PERFORMANCE_MAX_WORKERS".to_string(), "3".to_string()),
            ("UNITY_SCANNER_PERFORMANCE_YAML_TREE_THRESHOLD_MB".to_string(), "4".to_string()),
            ("UNITY_SCANNER_GRAPH_REJECT_NEW_CYCLES".to_string(), "true".to_string()),
            ("UNITY_SCANNER_QUERY_CACHE_TTL_S".to_string(), "30".to_string()),
            ("UNITY_SCANNER_PERSISTENCE_BACKUP_ENABLED".to_string(), "no".to_string()),
        ];
        config.apply_env_overrides(vars.into_iter());

        assert_eq!(config.scan.max_file_size_mb, 7);
        assert!(!config.scan.deep_check);
        assert_eq!(config.scan.paths, vec!["Assets", "Packages"]);
        assert_eq!(config.performance.max_workers, 3);
        assert_eq!(config.performance.yaml_tree_threshold_mb, 4);
        assert!(config.graph.reject_new_cycles);
        assert_eq!(config.query.cache_ttl_s, 30);
        assert!(!config.persistence.backup_enabled);
    }

    #[test]
    fn env_overrides_ignore_garbage() {
        let mut config = TetherConfig::default();
        let vars = vec![
            ("UNITY_SCANNER_SCAN_MAX_FILE_SIZE_MB".to_string(), "lots".to_string()),
            ("UNITY_SCANNER_NOPE_KEY".to_string(), "1".to_string()),
            ("OTHER_VAR".to_string(), "1".to_string()),
        ];
        config.apply_env_overrides(vars.into_iter());
        assert_eq!(config.scan.max_file_size_mb, 50);
    }

    #[test]
    fn validate_rejects_zero_batch() {
        let mut config = TetherConfig::default();
        config.performance.batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn write_default_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = TetherConfig::write_default(dir.path()).unwrap();
        assert!(path.exists());
        let loaded = TetherConfig::load(dir.path()).unwrap();
        assert_eq!(loaded, TetherConfig::default());
        // Second init refuses to clobber.
        assert!(TetherConfig::write_default(dir.path()).is_err());
    }

    #[test]
    fn db_path_default_and_override() {
        let config = TetherConfig::default();
        let root = Path::new("/proj");
        assert_eq!(config.db_path(root), root.join(".tether/tether.db"));

        let mut config = TetherConfig::default();
        config.persistence.store_path = Some("elsewhere/g.db".into());
        assert_eq!(config.db_path(root), root.join("elsewhere/g.db"));
    }
}
