// Error taxonomy for the arena. Every caller-facing failure maps to a stable
// kind with a fixed HTTP status; store errors are logged and sanitized.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::rate_limit::RateLimitError;

#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("Battle not found")]
    BattleNotFound,
    #[error("Challenge not found")]
    ChallengeNotFound,
    #[error("Opponent not found")]
    OpponentNotFound,
    #[error("Not your turn")]
    OutOfTurn,
    #[error("You are not in this battle")]
    NotYourBattle,
    #[error("Battle is already streaming")]
    AlreadyActive,
    #[error("Battle already completed")]
    AlreadyCompleted,
    #[error("You cannot challenge yourself")]
    InvalidOpponent,
    #[error("Fighter name already taken")]
    NameTaken,
    #[error("Challenge has expired")]
    ChallengeExpired,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error("Already voted")]
    DuplicateVote,
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Internal server error")]
    Store(#[from] sqlx::Error),
}

impl ArenaError {
    pub fn status(&self) -> StatusCode {
        match self {
            ArenaError::BattleNotFound
            | ArenaError::ChallengeNotFound
            | ArenaError::OpponentNotFound => StatusCode::NOT_FOUND,
            ArenaError::OutOfTurn
            | ArenaError::AlreadyActive
            | ArenaError::AlreadyCompleted
            | ArenaError::DuplicateVote
            | ArenaError::NameTaken => StatusCode::CONFLICT,
            ArenaError::NotYourBattle => StatusCode::FORBIDDEN,
            ArenaError::InvalidOpponent | ArenaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ArenaError::ChallengeExpired => StatusCode::GONE,
            ArenaError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ArenaError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ArenaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Remap a unique-constraint violation to a domain error, keeping every
    /// other store error as-is.
    pub fn from_unique_violation(e: sqlx::Error, mapped: ArenaError) -> ArenaError {
        if e.to_string().contains("UNIQUE") {
            mapped
        } else {
            ArenaError::Store(e)
        }
    }
}

impl IntoResponse for ArenaError {
    fn into_response(self) -> axum::response::Response {
        if let ArenaError::Store(ref e) = self {
            tracing::error!("Database error: {e}");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
