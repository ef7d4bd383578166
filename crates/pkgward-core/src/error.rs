use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkgError {
    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("environment already exists: {0}")]
    EnvironmentExists(String),

    #[error("package not found: {0}")]
    PackageNotFound(String),

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    #[error("install failed: {0}")]
    InstallFailed(String),

    #[error("environment '{0}' is locked by another request")]
    ConcurrencyConflict(String),

    #[error("invalid name '{0}': must start with a letter or digit and contain only letters, digits, '.', '_' or '-'")]
    InvalidName(String),

    #[error("invalid version '{0}'")]
    InvalidVersion(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PkgError {
    /// Process exit status for this error. Every failure class has its own
    /// non-zero code so callers can branch without parsing messages.
    pub fn exit_code(&self) -> i32 {
        match self {
            PkgError::ApprovalDenied(_) => 1,
            PkgError::InstallFailed(_) | PkgError::Backend(_) => 2,
            PkgError::PolicyRejected(_) => 3,
            PkgError::EnvironmentNotFound(_) | PkgError::PackageNotFound(_) => 4,
            PkgError::RegistryUnavailable(_) => 5,
            PkgError::ConcurrencyConflict(_) => 6,
            PkgError::EnvironmentExists(_) => 7,
            PkgError::InvalidName(_)
            | PkgError::InvalidVersion(_)
            | PkgError::InvalidArgument(_) => 8,
            PkgError::Io(_) | PkgError::Yaml(_) | PkgError::Json(_) => 10,
        }
    }
}

pub type Result<T> = std::result::Result<T, PkgError>;
