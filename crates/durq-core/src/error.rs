use thiserror::Error;

/// Failure reported by a processor through `Done::fail`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcessError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse queue options: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read queue options: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid queue options: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("queue name must not be empty")]
    EmptyName,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no clock supplied and no tokio runtime available: {0}")]
    NoRuntime(String),
}
