//! Query parameter structs for the chat endpoints

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use std::str::FromStr;

/// Helper to deserialize numbers from query string (which are always strings)
fn deserialize_from_str<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Default,
    T::Err: std::fmt::Display,
{
    use serde::de::Error;
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => s.parse().map_err(D::Error::custom),
        _ => Ok(T::default()),
    }
}

/// Helper to deserialize optional values from query string
fn deserialize_option_from_str<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    use serde::de::Error;
    let s: Option<String> = Option::deserialize(deserializer)?;
    match s {
        Some(s) if !s.is_empty() => s.parse().map(Some).map_err(D::Error::custom),
        _ => Ok(None),
    }
}

/// Pagination parameters for the thread list (limit defaults to 20, capped at 100)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaginationParams {
    #[serde(default, deserialize_with = "deserialize_option_from_str")]
    pub limit: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_from_str")]
    pub offset: usize,
}

/// `?q=...&limit=...`
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    #[serde(default, deserialize_with = "deserialize_option_from_str")]
    pub limit: Option<usize>,
}

/// Optional RFC 3339 range for statistics
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DateRangeParams {
    #[serde(default, deserialize_with = "deserialize_option_from_str")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_option_from_str")]
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextParams {
    pub persona_id: String,
}
