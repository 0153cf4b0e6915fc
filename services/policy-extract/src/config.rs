//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! API keys are preferably supplied through GEMINI_API_KEYS / GEMINI_API_KEY
//! or key files rather than written into the TOML directly.

use backend::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use common::Secret;
use extraction::{Credentials, InsurerProfile, InsurerRegistry};
use key_pool::KeyPool;
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Env var holding the rotation pool (newline or comma separated)
const KEYS_ENV: &str = "GEMINI_API_KEYS";

/// Env var holding a single key
const KEY_ENV: &str = "GEMINI_API_KEY";

const DEFAULT_CONFIG_FILE: &str = "policy-extract.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Additional document types beyond the built-in insurers
    #[serde(default)]
    pub insurers: Vec<InsurerConfig>,
    /// Directory relative paths in the file are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Generation backend settings
#[derive(Debug, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// API key sources
#[derive(Debug, Default, Deserialize)]
pub struct KeysConfig {
    /// Rotation pool written inline. Replaced by the resolved pool on load.
    #[serde(default, deserialize_with = "secret_list")]
    pub api_keys: Vec<Secret<String>>,
    /// File with one pool key per line
    #[serde(default)]
    pub keys_file: Option<PathBuf>,
    /// File containing a single key
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
    #[serde(skip)]
    pub single: Option<Secret<String>>,
}

/// HTTP API settings for `serve`
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Extractions processed at once; further requests queue
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_max_body_mb")]
    pub max_body_mb: usize,
}

/// Where `extract` writes result files
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

/// Extra document type with its own rules
#[derive(Debug, Clone, Deserialize)]
pub struct InsurerConfig {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub canonical_name: String,
    /// Defaults to the lower-cased id
    #[serde(default)]
    pub name_fragment: Option<String>,
    pub rules_file: PathBuf,
}

fn secret_list<'de, D>(deserializer: D) -> Result<Vec<Secret<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let keys = Vec::<String>::deserialize(deserializer)?;
    Ok(keys.into_iter().map(Secret::new).collect())
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_concurrent() -> usize {
    1
}

fn default_max_body_mb() -> usize {
    20
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_concurrent: default_max_concurrent(),
            max_body_mb: default_max_body_mb(),
        }
    }
}

impl ServerConfig {
    /// Request body limit in bytes, `None` if it overflows `usize`.
    pub fn max_body_bytes(&self) -> Option<usize> {
        self.max_body_mb.checked_mul(1024 * 1024)
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Split a key list on newlines and commas, dropping blanks.
pub fn parse_key_list(raw: &str) -> Vec<Secret<String>> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(Secret::from)
        .collect()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Pool resolution order:
    /// 1. GEMINI_API_KEYS env var
    /// 2. keys_file path from config
    /// 3. api_keys from config
    ///
    /// Single key resolution order:
    /// 1. GEMINI_API_KEY env var
    /// 2. api_key_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.finish()
    }

    /// Like [`Config::load`], but a missing file yields the defaults unless
    /// the path was given explicitly.
    pub fn load_or_default(path: &Path, explicit: bool) -> common::Result<Self> {
        if !explicit && !path.exists() {
            return Config::default().finish();
        }
        Self::load(path)
    }

    fn finish(mut self) -> common::Result<Self> {
        self.validate()?;
        self.resolve_keys()?;
        Ok(self)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.backend.base_url
            )));
        }

        if self.backend.model.trim().is_empty() {
            return Err(common::Error::Config("model must not be empty".into()));
        }

        if self.backend.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.server.max_concurrent == 0 {
            return Err(common::Error::Config(
                "max_concurrent must be greater than 0".into(),
            ));
        }

        if self.server.max_body_mb == 0 {
            return Err(common::Error::Config(
                "max_body_mb must be greater than 0".into(),
            ));
        }

        if self.server.max_body_bytes().is_none() {
            return Err(common::Error::Config(format!(
                "max_body_mb is too large: {}",
                self.server.max_body_mb
            )));
        }

        let mut seen = HashSet::new();
        for insurer in &self.insurers {
            let id = insurer.id.trim().to_lowercase();
            if id.is_empty() {
                return Err(common::Error::Config("insurer id must not be empty".into()));
            }
            if !seen.insert(id.clone()) {
                return Err(common::Error::Config(format!(
                    "duplicate insurer id: {id}"
                )));
            }
            if let Some(ref fragment) = insurer.name_fragment
                && fragment.trim().is_empty()
            {
                return Err(common::Error::Config(format!(
                    "name_fragment for insurer {id} must not be empty"
                )));
            }
        }

        Ok(())
    }

    fn resolve_keys(&mut self) -> common::Result<()> {
        let env_pool = std::env::var(KEYS_ENV)
            .map(|raw| parse_key_list(&raw))
            .unwrap_or_default();
        if !env_pool.is_empty() {
            self.keys.api_keys = env_pool;
        } else if let Some(ref keys_file) = self.keys.keys_file {
            let path = self.base_dir.join(keys_file);
            let raw = std::fs::read_to_string(&path).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read keys_file {}: {e}",
                    path.display()
                ))
            })?;
            self.keys.api_keys = parse_key_list(&raw);
        }

        if let Ok(key) = std::env::var(KEY_ENV)
            && !key.trim().is_empty()
        {
            self.keys.single = Some(Secret::new(key.trim().to_owned()));
        } else if let Some(ref key_file) = self.keys.api_key_file {
            let path = self.base_dir.join(key_file);
            let key = std::fs::read_to_string(&path).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read api_key_file {}: {e}",
                    path.display()
                ))
            })?;
            let key = key.trim().to_owned();
            if !key.is_empty() {
                self.keys.single = Some(Secret::new(key));
            }
        }

        Ok(())
    }

    /// Credentials for the orchestrator.
    ///
    /// More than one distinct pool key selects rotation; exactly one key from
    /// any source selects single-key mode.
    pub fn credentials(&self) -> common::Result<Credentials> {
        let mut pool = KeyPool::from_keys(self.keys.api_keys.iter().map(|k| k.expose()));
        if pool.len() > 1 {
            return Ok(Credentials::Pool(pool));
        }
        if let Some(selected) = pool.next() {
            return Ok(Credentials::Single(selected.key));
        }
        if let Some(ref key) = self.keys.single {
            return Ok(Credentials::Single(key.clone()));
        }
        Err(common::Error::Config(format!(
            "no Gemini API key configured: set {KEYS_ENV} or {KEY_ENV}, or keys.api_keys / keys.keys_file / keys.api_key_file"
        )))
    }

    /// Built-in insurers plus the configured ones (which may override them).
    pub fn registry(&self) -> common::Result<InsurerRegistry> {
        let mut registry = InsurerRegistry::builtin();
        for insurer in &self.insurers {
            let path = self.base_dir.join(&insurer.rules_file);
            let rules = std::fs::read_to_string(&path).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read rules_file {} for insurer {}: {e}",
                    path.display(),
                    insurer.id
                ))
            })?;
            let fragment = insurer
                .name_fragment
                .clone()
                .unwrap_or_else(|| insurer.id.clone());
            registry.register(InsurerProfile::new(
                insurer.id.clone(),
                insurer
                    .display_name
                    .clone()
                    .unwrap_or_else(|| insurer.canonical_name.clone()),
                insurer.canonical_name.clone(),
                fragment,
                rules,
            ));
        }
        Ok(registry)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    ///
    /// The flag reports whether the path was chosen explicitly.
    pub fn resolve_path(cli_path: Option<&str>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (PathBuf::from(p), true);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from(DEFAULT_CONFIG_FILE), false)
    }
}
