use std::fmt::Display;

use chrono::{NaiveDateTime, Utc};
use tokio::task_local;

task_local! {
    pub static FIXED_NOW: DateTime;
}

const OFFSET_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M%:z"];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DateTime {
    delegate: chrono::DateTime<Utc>,
}

impl DateTime {
    fn new<T: chrono::TimeZone>(delegate: chrono::DateTime<T>) -> Self {
        Self {
            delegate: delegate.with_timezone(&Utc),
        }
    }

    pub fn now() -> Self {
        FIXED_NOW.try_with(|t| *t).unwrap_or_else(|_| Utc::now().into())
    }

    pub fn from_iso(iso8601: &str) -> anyhow::Result<Self> {
        Ok(chrono::DateTime::parse_from_rfc3339(iso8601)?.into())
    }

    //Accepts whatever the upstream sends; values without offset are taken as UTC
    pub fn parse_lenient(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
            return Some(dt.into());
        }

        let with_offset = match value.strip_suffix(['Z', 'z']) {
            Some(stripped) => format!("{stripped}+00:00"),
            None => value.to_owned(),
        };

        if let Some(dt) = OFFSET_FORMATS
            .iter()
            .find_map(|fmt| chrono::DateTime::parse_from_str(&with_offset, fmt).ok())
        {
            return Some(dt.into());
        }

        NAIVE_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
            .map(|naive| naive.and_utc().into())
    }
}

impl Display for DateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.delegate)
    }
}

impl<T: chrono::TimeZone> From<chrono::DateTime<T>> for DateTime {
    fn from(val: chrono::DateTime<T>) -> Self {
        DateTime::new(val)
    }
}
