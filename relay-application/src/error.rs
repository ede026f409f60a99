use relay_domain::error::DomainError;

#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("domain: {0}")]
    Domain(#[from] DomainError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("subscription not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),
}
