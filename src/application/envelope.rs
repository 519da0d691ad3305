//! A serializable response wrapper for callers that want to expose portfolio
//! service output over a future HTTP layer. No routes live in this crate;
//! `rustfolio-report` is the only consumer, printing `Envelope` JSON to
//! stdout.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            generated_at: Utc::now(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            generated_at: Utc::now(),
        }
    }

    pub fn from_result(result: anyhow::Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(format!("{e:#}")),
        }
    }
}
