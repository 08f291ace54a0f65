use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::services::hashing::HashAlgorithm;
use super::normalizations::DecadeFormat;

const UNDO_CAPACITY: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FailedToReadConfig { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config: {0}")]
    FailedToParseConfig(#[from] serde_yaml::Error),

    #[error("Refusing runtime change to state-affecting field(s) {fields:?} without force")]
    StateAffectingChange { fields: Vec<String> },

    #[error("Failed to write config atomically: {0}")]
    AtomicWrite(String),
}

/// How safe a field is to change at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSafetyLevel {
    /// Value substitution only.
    Safe,
    /// Historical level; the runtime now swaps clients in place, so these
    /// behave like `Safe`.
    RequiresReload,
    /// Moves persistent paths or connections; needs an explicit force and
    /// operator follow-up.
    AffectsState,
}

/* ---------------- the typed tree ---------------- */

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub config_dir: Option<PathBuf>,
    pub library_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub http: HttpSettings,
    pub apis: BTreeMap<String, ApiConfig>,
    pub ytdlp: YtdlpSettings,
    pub ffprobe: FfprobeSettings,
    pub thumbnail: ThumbnailSettings,
    pub nfo: NfoSettings,
    pub organizer: OrganizerSettings,
    pub tags: TagsSettings,
    pub backup: BackupSettings,
    pub trash: TrashSettings,
    pub file_manager: FileManagerSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_seconds: f64,
    pub max_redirects: usize,
    pub verify_tls: bool,
    pub max_keepalive_connections: usize,
    pub retry: RetrySettings,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 30.0,
            max_redirects: 10,
            verify_tls: true,
            max_keepalive_connections: 20,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_multiplier: f64,
    pub min_wait_seconds: f64,
    pub max_wait_seconds: f64,
    pub status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            min_wait_seconds: 1.0,
            max_wait_seconds: 10.0,
            status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Public config only carries credentials; base URLs, rates and cache
/// filenames are hardcoded per service client.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub auth: BTreeMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YtdlpSettings {
    pub binary_path: PathBuf,
    pub format_spec: String,
    pub geo_bypass: bool,
}

impl Default for YtdlpSettings {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("yt-dlp"),
            format_spec: "bestvideo*+bestaudio/best".to_string(),
            geo_bypass: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FfprobeSettings {
    pub binary_path: PathBuf,
    pub timeout_seconds: f64,
}

impl Default for FfprobeSettings {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("ffprobe"),
            timeout_seconds: 30.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    pub cache_dir: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NfoSettings {
    pub featured_artists: bool,
    pub write_artist_nfo: bool,
    pub write_musicvideo_nfo: bool,
}

impl Default for NfoSettings {
    fn default() -> Self {
        Self {
            featured_artists: true,
            write_artist_nfo: true,
            write_musicvideo_nfo: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrganizerSettings {
    pub path_pattern: String,
    pub normalize_filenames: bool,
}

impl Default for OrganizerSettings {
    fn default() -> Self {
        Self {
            path_pattern: "{artist}/{title}".to_string(),
            normalize_filenames: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagsSettings {
    pub normalize: bool,
    pub auto_decade: AutoDecadeSettings,
}

impl Default for TagsSettings {
    fn default() -> Self {
        Self {
            normalize: true,
            auto_decade: AutoDecadeSettings::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoDecadeSettings {
    pub enabled: bool,
    pub format: DecadeFormat,
}

impl Default for AutoDecadeSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            format: DecadeFormat::Short,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub enabled: bool,
    pub schedule: Option<String>,
    pub retention_count: u32,
    pub output_dir: Option<PathBuf>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            schedule: None,
            retention_count: 5,
            output_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrashSettings {
    pub trash_dir: Option<PathBuf>,
    pub enabled: bool,
    pub schedule: Option<String>,
    pub retention_days: u32,
}

impl Default for TrashSettings {
    fn default() -> Self {
        Self {
            trash_dir: None,
            enabled: true,
            schedule: None,
            retention_days: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileManagerSettings {
    pub hash_algorithm: HashAlgorithm,
    pub hash_chunk_size: usize,
    pub max_hash_size: Option<u64>,
}

impl Default for FileManagerSettings {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::Sha256,
            hash_chunk_size: 8192,
            max_hash_size: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FailedToReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Atomic write: temp file in the same directory, fsync, rename over.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let yaml = self.to_yaml_string()?;

        let dir = path.parent().unwrap_or(Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::AtomicWrite(e.to_string()))?;

        let mut temp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| ConfigError::AtomicWrite(e.to_string()))?;
        temp.write_all(yaml.as_bytes())
            .map_err(|e| ConfigError::AtomicWrite(e.to_string()))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| ConfigError::AtomicWrite(e.to_string()))?;
        temp.persist(path).map_err(|e| ConfigError::AtomicWrite(e.to_string()))?;

        Ok(())
    }

    /// Environment resolution in one pass: `FUZZBIN_DOCKER=1` selects the
    /// containerized defaults, explicit `FUZZBIN_*` dirs win over the file.
    pub fn resolve(&self) -> ResolvedConfig {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(&self, env: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let docker = env("FUZZBIN_DOCKER").as_deref() == Some("1");

        let (default_config_dir, default_library_dir) = if docker {
            (PathBuf::from("/config"), PathBuf::from("/music_videos"))
        } else {
            (PathBuf::from("./config"), PathBuf::from("./music_videos"))
        };

        let config_dir = env("FUZZBIN_CONFIG_DIR")
            .map(PathBuf::from)
            .or_else(|| self.config_dir.clone())
            .unwrap_or(default_config_dir);
        let library_dir = env("FUZZBIN_LIBRARY_DIR")
            .map(PathBuf::from)
            .or_else(|| self.library_dir.clone())
            .unwrap_or(default_library_dir);

        let db_path = config_dir.join("fuzzbin.db");
        let cache_dir = config_dir.join(".cache");
        let thumbnail_dir = self
            .thumbnail
            .cache_dir
            .clone()
            .unwrap_or_else(|| config_dir.join(".thumbnails"));
        let trash_dir = self
            .trash
            .trash_dir
            .clone()
            .unwrap_or_else(|| library_dir.join(".trash"));
        let backups_dir = self
            .backup
            .output_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("backups"));

        ResolvedConfig {
            config_dir,
            library_dir,
            db_path,
            cache_dir,
            thumbnail_dir,
            trash_dir,
            backups_dir,
            config: self.clone(),
        }
    }
}

/// Every path populated; what the rest of the system consumes.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub config_dir: PathBuf,
    pub library_dir: PathBuf,
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub trash_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub config: Config,
}

impl ResolvedConfig {
    pub fn service_cache_path(&self, service: &str) -> PathBuf {
        self.cache_dir.join(format!("{service}.sqlite"))
    }
}

/* ---------------- field safety ---------------- */

const AFFECTS_STATE_FIELDS: &[&str] = &[
    "config_dir",
    "library_dir",
    "trash.trash_dir",
    "thumbnail.cache_dir",
    "backup.output_dir",
];

const REQUIRES_RELOAD_PREFIXES: &[&str] = &["apis."];

pub fn classify_field(path: &str) -> ConfigSafetyLevel {
    if AFFECTS_STATE_FIELDS.contains(&path) {
        return ConfigSafetyLevel::AffectsState;
    }

    if REQUIRES_RELOAD_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
        return ConfigSafetyLevel::RequiresReload;
    }

    ConfigSafetyLevel::Safe
}

/* ---------------- diffing + change history ---------------- */

#[derive(Clone, Debug)]
pub struct ConfigChange {
    pub path: String,
    pub old: Option<serde_yaml::Value>,
    pub new: Option<serde_yaml::Value>,
    pub safety: ConfigSafetyLevel,
}

#[derive(Debug, Default)]
pub struct ChangeReport {
    pub changes: Vec<ConfigChange>,
    /// Forced state-affecting paths the operator still has to act on
    /// (moving files, reopening stores).
    pub needs_operator_action: Vec<String>,
}

pub fn diff_configs(old: &Config, new: &Config) -> Result<Vec<ConfigChange>, ConfigError> {
    let old_value = serde_yaml::to_value(old)?;
    let new_value = serde_yaml::to_value(new)?;

    let mut old_flat = BTreeMap::new();
    flatten("", &old_value, &mut old_flat);
    let mut new_flat = BTreeMap::new();
    flatten("", &new_value, &mut new_flat);

    let mut changes = Vec::new();
    let paths: std::collections::BTreeSet<&String> = old_flat.keys().chain(new_flat.keys()).collect();

    for path in paths {
        let old_leaf = old_flat.get(path);
        let new_leaf = new_flat.get(path);

        if old_leaf != new_leaf {
            changes.push(ConfigChange {
                path: path.clone(),
                old: old_leaf.cloned(),
                new: new_leaf.cloned(),
                safety: classify_field(path),
            });
        }
    }

    Ok(changes)
}

fn flatten(prefix: &str, value: &serde_yaml::Value, out: &mut BTreeMap<String, serde_yaml::Value>) {
    match value {
        serde_yaml::Value::Mapping(mapping) => {
            for (key, child) in mapping {
                let key = match key.as_str() {
                    Some(key) => key.to_string(),
                    None => continue,
                };
                let path = if prefix.is_empty() { key } else { format!("{prefix}.{key}") };
                flatten(&path, child, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// Holds the live config and a bounded undo/redo history of snapshots.
/// State-affecting changes are refused unless forced.
pub struct ConfigManager {
    current: Config,
    undo: VecDeque<Config>,
    redo: Vec<Config>,
    capacity: usize,
}

impl ConfigManager {
    pub fn new(config: Config) -> Self {
        Self {
            current: config,
            undo: VecDeque::new(),
            redo: Vec::new(),
            capacity: UNDO_CAPACITY,
        }
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    pub fn apply(&mut self, new: Config, force: bool) -> Result<ChangeReport, ConfigError> {
        let changes = diff_configs(&self.current, &new)?;

        if changes.is_empty() {
            return Ok(ChangeReport::default());
        }

        let state_affecting: Vec<String> = changes
            .iter()
            .filter(|change| change.safety == ConfigSafetyLevel::AffectsState)
            .map(|change| change.path.clone())
            .collect();

        if !state_affecting.is_empty() && !force {
            return Err(ConfigError::StateAffectingChange { fields: state_affecting });
        }

        for change in &changes {
            log::info!(
                "config change: {} ({:?}) {:?} -> {:?}",
                change.path,
                change.safety,
                change.old,
                change.new
            );
        }

        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(std::mem::replace(&mut self.current, new));
        self.redo.clear();

        Ok(ChangeReport { changes, needs_operator_action: state_affecting })
    }

    pub fn undo(&mut self) -> Option<&Config> {
        let previous = self.undo.pop_back()?;
        self.redo.push(std::mem::replace(&mut self.current, previous));
        Some(&self.current)
    }

    pub fn redo(&mut self) -> Option<&Config> {
        let next = self.redo.pop()?;

        if self.undo.len() == self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(std::mem::replace(&mut self.current, next));
        Some(&self.current)
    }
}
