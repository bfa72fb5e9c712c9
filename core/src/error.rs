use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

use crate::models::MealType;

/// One (day, meal type) slot that could not be generated.
#[derive(Debug, Clone, Serialize)]
pub struct SlotFailure {
    pub date: NaiveDate,
    pub meal_type: MealType,
    pub attempts: usize,
    pub error: String,
}

/// Errors surfaced by [`crate::service::PlannerService`], one variant per
/// response class the HTTP layer distinguishes.
#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{message}")]
    Upstream {
        message: String,
        failures: Vec<SlotFailure>,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PlannerError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

pub type PlannerResult<T> = Result<T, PlannerError>;
