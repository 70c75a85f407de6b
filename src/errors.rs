use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AppError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(rolegraph::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(rolegraph::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(rolegraph::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(rolegraph::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Password hashing failed: {0}")]
    #[diagnostic(code(rolegraph::password_hash))]
    PasswordHash(String),

    #[error("{0}")]
    #[diagnostic(code(rolegraph::other))]
    Other(String),
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(value: argon2::password_hash::Error) -> Self {
        AppError::PasswordHash(value.to_string())
    }
}
