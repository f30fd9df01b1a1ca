use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "bantay.toml";

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub news_bucket: String,
    pub happenings_bucket: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            news_bucket: "news".to_string(),
            happenings_bucket: "happenings".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub heartbeat_interval_secs: u64,
    pub join_timeout_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 25,
            join_timeout_secs: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub supabase: SupabaseConfig,
    pub storage: StorageConfig,
    pub realtime: RealtimeConfig,
    /// Rows per page on paginated lists.
    pub page_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase: SupabaseConfig::default(),
            storage: StorageConfig::default(),
            realtime: RealtimeConfig::default(),
            page_size: 5,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

impl AppConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads `path` if given (or `bantay.toml` in the working directory if it exists), then
    /// applies `BANTAY_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::from_toml_str(&contents)?
        } else {
            log::debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(url) = lookup("BANTAY_SUPABASE_URL") {
            self.supabase.supabase_url = url;
        }
        if let Some(key) = lookup("BANTAY_SUPABASE_ANON_KEY") {
            self.supabase.supabase_anon_key = key;
        }
        if let Some(page_size) = lookup("BANTAY_PAGE_SIZE") {
            self.page_size = page_size
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid {
                    name: "BANTAY_PAGE_SIZE",
                    value: page_size.clone(),
                })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.supabase.supabase_url.trim().is_empty() {
            return Err(ConfigError::Missing("BANTAY_SUPABASE_URL"));
        }
        if self.supabase.supabase_anon_key.trim().is_empty() {
            return Err(ConfigError::Missing("BANTAY_SUPABASE_ANON_KEY"));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "page_size",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}
