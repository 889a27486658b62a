//! Configuration types for repo-harvest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Pipeline behavior configuration (concurrency, queueing, delete policy)
///
/// Groups the settings consumed by [`PipelineController`](crate::PipelineController).
/// Used as a flattened sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent transfer workers (default: 5)
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Delete the remote resource once its download is complete (default: false)
    ///
    /// Deletion is irreversible. It is only ever attempted after the local file
    /// has been atomically moved into place.
    #[serde(default)]
    pub delete_after_transfer: bool,

    /// Directory downloaded archives are written to (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum number of descriptors waiting between producer and workers (default: 64)
    ///
    /// When the queue is full the inventory listing pauses until a worker
    /// picks up the next descriptor.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Grace period in-flight operations get after cancellation (default: 10 seconds)
    #[serde(default = "default_shutdown_grace", with = "duration_serde")]
    pub shutdown_grace: Duration,

    /// Retry policy for fetch and delete calls (default: single attempt)
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            delete_after_transfer: false,
            download_dir: default_download_dir(),
            channel_capacity: default_channel_capacity(),
            shutdown_grace: default_shutdown_grace(),
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Check the settings the pipeline cannot run without
    pub fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::config(
                "parallelism",
                "parallelism must be at least 1",
            ));
        }
        if self.channel_capacity == 0 {
            return Err(Error::config(
                "channel_capacity",
                "channel_capacity must be at least 1",
            ));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(Error::config(
                "download_dir",
                "download_dir must not be empty",
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff_multiplier must be a finite number >= 1.0",
            ));
        }
        Ok(())
    }
}

/// GitHub account and API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GithubConfig {
    /// Personal access token (sent as `Authorization: token ...`)
    #[serde(default)]
    pub token: Option<String>,

    /// Login whose repositories are harvested
    pub login: String,

    /// API base URL (default: "https://api.github.com")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Repositories requested per listing page (default: 100, GitHub's maximum)
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Git ref to archive (None = the repository's default branch)
    #[serde(default)]
    pub archive_ref: Option<String>,

    /// User-Agent header value (GitHub rejects requests without one)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for establishing connections (default: 30 seconds)
    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            login: String::new(),
            api_base_url: default_api_base_url(),
            per_page: default_per_page(),
            archive_ref: None,
            user_agent: default_user_agent(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl GithubConfig {
    /// Check that the account settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.login.trim().is_empty() {
            return Err(Error::config("github.login", "login must not be empty"));
        }
        if let Err(e) = url::Url::parse(&self.api_base_url) {
            return Err(Error::config(
                "github.api_base_url",
                format!("invalid API base URL '{}': {}", self.api_base_url, e),
            ));
        }
        if self.per_page == 0 || self.per_page > 100 {
            return Err(Error::config(
                "github.per_page",
                "per_page must be between 1 and 100",
            ));
        }
        Ok(())
    }
}

/// Main configuration for repo-harvest
///
/// Pipeline settings are flattened to the top level; GitHub settings live
/// under a `github` key:
///
/// ```json
/// {
///   "parallelism": 5,
///   "delete_after_transfer": false,
///   "download_dir": "archives",
///   "github": { "login": "octocat", "token": "ghp_..." }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pipeline behavior settings
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    /// GitHub account settings
    pub github: GithubConfig,
}

impl Config {
    /// Parse configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read configuration from a JSON file
    pub async fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Validate every sub-config
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()?;
        self.github.validate()
    }

    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.pipeline.download_dir
    }
}

/// Retry configuration for fetch and delete calls
///
/// The default performs a single attempt; raise `max_attempts` to retry
/// transient failures with exponential backoff.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try (default: 0)
    #[serde(default)]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

// Default value functions
fn default_parallelism() -> usize {
    5
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_channel_capacity() -> usize {
    64
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_api_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_per_page() -> u32 {
    100
}

fn default_user_agent() -> String {
    concat!("repo-harvest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
