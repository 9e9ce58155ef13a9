use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::error::{Result, TracingError};

/// How a server span ends when its request never reached a terminal event,
/// e.g. because the connection dropped mid-handler or the response body was
/// dropped before it was fully written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbandonPolicy {
    /// End the span as failed with `"abandoned"`, after the tag hook ran.
    #[default]
    Fail,
    /// End the span as it stands: no response tags, no error.
    Ignore,
}

/// Serializable settings for [`HttpTracing`](crate::HttpTracing).
///
/// ```toml
/// service_name = "frontend"
/// extra_fields = ["x-request-id", "user-id"]
/// abandon_policy = "ignore"
/// log_level = "info"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    pub service_name: String,
    /// Header names propagated as extra fields (baggage).
    pub extra_fields: Vec<String>,
    pub abandon_policy: AbandonPolicy,
    /// Level of the per-request log span.
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "http-server".to_string(),
            extra_fields: Vec::new(),
            abandon_policy: AbandonPolicy::default(),
            log_level: "debug".to_string(),
        }
    }
}

impl TracingConfig {
    pub(crate) fn level(&self) -> Result<Level> {
        self.log_level
            .parse()
            .map_err(|_| TracingError::Config(format!("unknown log level {:?}", self.log_level)))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(TracingError::Config("service_name must not be empty".into()));
        }
        self.level().map(|_| ())
    }
}
