use thiserror::Error;

/// Common result type for core operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("unresolvable reference: {0}")]
    UnresolvableReference(String),
    #[error("image could not be resolved: {0}")]
    ImageResolution(String),
    #[error("policy text could not be scanned: {0}")]
    Scan(String),
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PolicyError {
    /// Shorthand for a `MalformedInput` built from a field path and a reason.
    pub fn malformed(field: impl AsRef<str>, reason: impl AsRef<str>) -> Self {
        PolicyError::MalformedInput(format!(
            "field [{}] {}",
            field.as_ref(),
            reason.as_ref()
        ))
    }
}
