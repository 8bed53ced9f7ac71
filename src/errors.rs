use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AppError {
    /// Neither Redis nor the in-process fallback could serve the operation.
    #[error("state backend unavailable: {0}")]
    StateUnavailable(String),

    #[error("access code generation exhausted after {attempts} attempts")]
    CodeGenerationExhausted { attempts: u32 },

    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    #[error("access grant {0} not found")]
    GrantNotFound(Uuid),

    #[error("access grant {0} is already revoked")]
    AlreadyRevoked(Uuid),

    #[error("rate limit exceeded, retry in {reset_secs}s")]
    RateLimited { reset_secs: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for logs and callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::StateUnavailable(_) => "state_unavailable",
            AppError::CodeGenerationExhausted { .. } => "code_generation_exhausted",
            AppError::InvalidGrant(_) => "invalid_grant",
            AppError::GrantNotFound(_) => "grant_not_found",
            AppError::AlreadyRevoked(_) => "already_revoked",
            AppError::RateLimited { .. } => "rate_limit_exceeded",
            AppError::Serialization(_) => "serialization_error",
            AppError::Redis(_) | AppError::Database(_) | AppError::Internal(_) => {
                "internal_server_error"
            }
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(
            AppError::CodeGenerationExhausted { attempts: 10 }.code(),
            "code_generation_exhausted"
        );
        assert_eq!(
            AppError::RateLimited { reset_secs: 5 }.code(),
            "rate_limit_exceeded"
        );
        assert_eq!(
            AppError::Internal(anyhow::anyhow!("boom")).code(),
            "internal_server_error"
        );
    }

    #[test]
    fn test_error_messages() {
        let id = Uuid::nil();
        assert_eq!(
            AppError::AlreadyRevoked(id).to_string(),
            format!("access grant {} is already revoked", id)
        );
        assert_eq!(
            AppError::CodeGenerationExhausted { attempts: 10 }.to_string(),
            "access code generation exhausted after 10 attempts"
        );
    }
}
