//! Configuration types for uploading and tracking statements.
//!
//! All client behaviour is controlled through [`UploaderConfig`], built via
//! its [`UploaderConfigBuilder`]. Endpoints, timer cadences and the poll cap
//! live in one struct so a coordinator and every tracker it spawns agree on
//! them.

use crate::error::UploadError;
use crate::estimate::MAX_FILE_BYTES;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Header carrying the session id on upload requests.
pub const DEFAULT_SESSION_HEADER: &str = "X-Session-Id";

/// Query parameter carrying the session id on listing requests.
pub const DEFAULT_SESSION_QUERY_PARAM: &str = "sessionId";

/// Multipart part name shared by every file in a batch.
pub const DEFAULT_UPLOAD_FIELD: &str = "files";

/// Where the upload and listing requests go.
///
/// In local development the upload path is served by a separate backend
/// process on a fixed port while the listing comes from the web server; in
/// deployment both resolve to same-origin API paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub upload_url: String,
    pub listing_url: String,
}

impl Endpoints {
    /// Conversion backend address used during local development.
    pub const DEV_BACKEND: &'static str = "http://127.0.0.1:5328";

    /// Web server address used during local development.
    pub const DEV_WEB: &'static str = "http://127.0.0.1:3000";

    /// Split development routing: uploads straight to the backend process.
    pub fn development() -> Self {
        Self {
            upload_url: format!("{}/api/python", Self::DEV_BACKEND),
            listing_url: format!("{}/api/files", Self::DEV_WEB),
        }
    }

    /// Same-origin routing under `base`, e.g. `https://statements.example.com`.
    pub fn for_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            upload_url: format!("{base}/api/python"),
            listing_url: format!("{base}/api/files"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::development()
    }
}

/// How many confirmation polls a tracker may issue before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollLimit {
    /// Poll until the artifact appears, however long that takes. (default)
    #[default]
    Unbounded,
    /// Stop after this many polls, successful or not.
    MaxAttempts(u32),
}

impl PollLimit {
    /// True once `attempts` polls have used up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        match self {
            PollLimit::Unbounded => false,
            PollLimit::MaxAttempts(max) => attempts >= *max,
        }
    }
}

/// Cadences driving one tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerTiming {
    /// Animation tick. One tick counts as one estimated second. Default: 1 s.
    pub tick_interval: Duration,
    /// Delay between confirmation polls. Default: 2 s.
    pub poll_interval: Duration,
    /// Ticks before the estimated end at which animation stalls. Default: 2.
    pub stall_ticks: u64,
    /// Default: [`PollLimit::Unbounded`].
    pub poll_limit: PollLimit,
}

impl Default for TrackerTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            poll_interval: Duration::from_secs(2),
            stall_ticks: 2,
            poll_limit: PollLimit::Unbounded,
        }
    }
}

/// Configuration for an [`crate::coordinator::UploadCoordinator`].
///
/// # Example
/// ```rust
/// use stmt2csv::{Endpoints, PollLimit, UploaderConfig};
///
/// let config = UploaderConfig::builder()
///     .endpoints(Endpoints::for_base("https://statements.example.com"))
///     .poll_limit(PollLimit::MaxAttempts(150))
///     .build()
///     .unwrap();
/// assert_eq!(config.endpoints.upload_url, "https://statements.example.com/api/python");
/// ```
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub endpoints: Endpoints,
    pub timing: TrackerTiming,
    /// Per-request timeout for uploads and polls, in seconds. Default: 120.
    pub request_timeout_secs: u64,
    /// Largest accepted file. Default: 50 MiB.
    pub max_file_bytes: u64,
    pub session_header: String,
    pub session_query_param: String,
    pub upload_field: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            timing: TrackerTiming::default(),
            request_timeout_secs: 120,
            max_file_bytes: MAX_FILE_BYTES,
            session_header: DEFAULT_SESSION_HEADER.to_string(),
            session_query_param: DEFAULT_SESSION_QUERY_PARAM.to_string(),
            upload_field: DEFAULT_UPLOAD_FIELD.to_string(),
        }
    }
}

impl UploaderConfig {
    /// Create a new builder for `UploaderConfig`.
    pub fn builder() -> UploaderConfigBuilder {
        UploaderConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`UploaderConfig`].
#[derive(Debug)]
pub struct UploaderConfigBuilder {
    config: UploaderConfig,
}

impl UploaderConfigBuilder {
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.config.endpoints = endpoints;
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.upload_url = url.into();
        self
    }

    pub fn listing_url(mut self, url: impl Into<String>) -> Self {
        self.config.endpoints.listing_url = url.into();
        self
    }

    pub fn tick_interval(mut self, d: Duration) -> Self {
        self.config.timing.tick_interval = d;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.config.timing.poll_interval = d;
        self
    }

    pub fn stall_ticks(mut self, n: u64) -> Self {
        self.config.timing.stall_ticks = n;
        self
    }

    pub fn poll_limit(mut self, limit: PollLimit) -> Self {
        self.config.timing.poll_limit = limit;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_file_bytes(mut self, n: u64) -> Self {
        self.config.max_file_bytes = n;
        self
    }

    pub fn session_header(mut self, name: impl Into<String>) -> Self {
        self.config.session_header = name.into();
        self
    }

    pub fn session_query_param(mut self, name: impl Into<String>) -> Self {
        self.config.session_query_param = name.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<UploaderConfig, UploadError> {
        let c = &self.config;
        if c.endpoints.upload_url.is_empty() || c.endpoints.listing_url.is_empty() {
            return Err(UploadError::InvalidConfig(
                "upload and listing URLs must be set".into(),
            ));
        }
        if c.timing.tick_interval.is_zero() || c.timing.poll_interval.is_zero() {
            return Err(UploadError::InvalidConfig(
                "tick and poll intervals must be > 0".into(),
            ));
        }
        if c.timing.stall_ticks == 0 {
            return Err(UploadError::InvalidConfig(
                "stall ticks must be ≥ 1 so 100% is left for a confirmed artifact".into(),
            ));
        }
        if c.timing.poll_limit == PollLimit::MaxAttempts(0) {
            return Err(UploadError::InvalidConfig(
                "max poll attempts must be ≥ 1 (use Unbounded to poll forever)".into(),
            ));
        }
        if c.max_file_bytes == 0 {
            return Err(UploadError::InvalidConfig(
                "max file size must be > 0".into(),
            ));
        }
        if c.session_header.is_empty() {
            return Err(UploadError::InvalidConfig(
                "session header name must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
