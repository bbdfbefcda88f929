use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChronicleError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("database corruption: {message}")]
    Corruption { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("migration error: {message}")]
    Migration { message: String },
}

impl ChronicleError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }
}

pub type ChronicleResult<T> = Result<T, ChronicleError>;

impl From<sea_orm::DbErr> for ChronicleError {
    fn from(value: sea_orm::DbErr) -> Self {
        ChronicleError::storage(value.to_string())
    }
}
