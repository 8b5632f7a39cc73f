use crate::core::poll::PollOptions;
use crate::domain::model::NhgisExtract;
use crate::domain::ports::{
    ConfigProvider, DEFAULT_API_VERSION, DEFAULT_BASE_URL, DEFAULT_METADATA_URL,
    DEFAULT_NUM_RETRIES, DEFAULT_PAGE_SIZE, DEFAULT_RETRY_DELAY_MS,
};
use crate::utils::error::{NhgisError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// An extract request file: API client settings, the extract itself, and
/// how to wait for and store the result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientSection,
    pub extract: NhgisExtract,
    #[serde(default)]
    pub poll: PollSection,
    #[serde(default)]
    pub download: DownloadSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub metadata_url: Option<String>,
    pub api_version: Option<u32>,
    pub num_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollSection {
    pub initial_wait_seconds: Option<u64>,
    pub max_wait_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadSection {
    pub dir: Option<String>,
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| NhgisError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${IPUMS_API_KEY})，未設定的保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        if let Some(url) = &self.client.base_url {
            validation::validate_url("client.base_url", url)?;
        }
        if let Some(url) = &self.client.metadata_url {
            validation::validate_url("client.metadata_url", url)?;
        }
        if let Some(version) = self.client.api_version {
            validation::validate_positive_number("client.api_version", version as usize, 1)?;
        }
        if let Some(retries) = self.client.num_retries {
            validation::validate_range("client.num_retries", retries, 0, 10)?;
        }
        if let Some(page_size) = self.client.page_size {
            validation::validate_range("client.page_size", page_size, 1, 2500)?;
        }
        if let Some(dir) = &self.download.dir {
            validation::validate_path("download.dir", dir)?;
        }

        if let Some(initial) = self.poll.initial_wait_seconds {
            validation::validate_positive_number("poll.initial_wait_seconds", initial as usize, 1)?;
        }
        if let Some(max) = self.poll.max_wait_seconds {
            validation::validate_positive_number("poll.max_wait_seconds", max as usize, 1)?;
        }

        if let (Some(initial), Some(max)) =
            (self.poll.initial_wait_seconds, self.poll.max_wait_seconds)
        {
            if initial > max {
                return Err(NhgisError::InvalidConfigValueError {
                    field: "poll.initial_wait_seconds".to_string(),
                    value: initial.to_string(),
                    reason: format!("Must not exceed poll.max_wait_seconds ({})", max),
                });
            }
        }

        self.extract.validate()
    }

    pub fn poll_options(&self) -> PollOptions {
        let defaults = PollOptions::default();
        PollOptions {
            initial_wait: self
                .poll
                .initial_wait_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.initial_wait),
            max_wait: self
                .poll
                .max_wait_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_wait),
            timeout: self.poll.timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn download_dir(&self) -> Option<&str> {
        self.download.dir.as_deref()
    }
}

/// A placeholder left by a missing environment variable is not a key.
fn resolved(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty() && !v.contains("${"))
}

impl ConfigProvider for TomlConfig {
    fn api_key(&self) -> Option<&str> {
        resolved(self.client.api_key.as_deref())
    }

    fn base_url(&self) -> &str {
        self.client.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    fn metadata_url(&self) -> &str {
        self.client
            .metadata_url
            .as_deref()
            .unwrap_or(DEFAULT_METADATA_URL)
    }

    fn api_version(&self) -> u32 {
        self.client.api_version.unwrap_or(DEFAULT_API_VERSION)
    }

    fn num_retries(&self) -> u32 {
        self.client.num_retries.unwrap_or(DEFAULT_NUM_RETRIES)
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.client.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS))
    }

    fn page_size(&self) -> usize {
        self.client.page_size.unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
