use super::config::Config;
use url::Url;

/// Validation errors for configuration
#[derive(Debug)]
pub enum ValidationError {
    /// `retry_attempts` must allow at least one request
    ZeroRetryAttempts,
    /// Metadata base URL is not an absolute http(s) URL
    InvalidMetadataUrl { url: String, reason: String },
    /// A network timeout of zero would fail every request
    ZeroTimeout(&'static str),
    EmptyUserAgent,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::ZeroRetryAttempts => {
                write!(f, "download.retry_attempts must be at least 1")
            }
            ValidationError::InvalidMetadataUrl { url, reason } => {
                write!(f, "network.metadata_base_url '{}' is invalid: {}", url, reason)
            }
            ValidationError::ZeroTimeout(field) => {
                write!(f, "network.{} must be greater than 0", field)
            }
            ValidationError::EmptyUserAgent => write!(f, "network.user_agent must not be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate configuration values
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.download.retry_attempts == 0 {
        errors.push(ValidationError::ZeroRetryAttempts);
    }

    match Url::parse(&config.network.metadata_base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::InvalidMetadataUrl {
            url: config.network.metadata_base_url.clone(),
            reason: format!("unsupported scheme '{}'", url.scheme()),
        }),
        Err(e) => errors.push(ValidationError::InvalidMetadataUrl {
            url: config.network.metadata_base_url.clone(),
            reason: e.to_string(),
        }),
    }

    if config.network.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("timeout_secs"));
    }
    if config.network.connect_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_timeout_secs"));
    }
    if config.network.user_agent.trim().is_empty() {
        errors.push(ValidationError::EmptyUserAgent);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
