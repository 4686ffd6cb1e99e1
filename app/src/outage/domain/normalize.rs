use serde_json::Value;

use crate::core::time::DateTime;

use super::{Event, EventSet, RawRecord};

const REFERENCE: &str = "Reference";
const AFFECTED_CUSTOMERS: &str = "TotalConfirmedPowerCut";
const STATUS: &str = "CustomerStageSequenceMessage";
const REASON: &str = "Reason";
const START_TIME: &str = "LoggedTime";
const ESTIMATED_RESTORATION: &str = "EstimatedTimeTillResolution";
const NATURE: &str = "NatureOfOutage";

/// Non-fatal problem with a single upstream record.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum DataQualityWarning {
    #[display("record #{index} has no reference and was dropped")]
    MissingReference { index: usize },
    #[display("{reference}: unparsable {field} {value:?}, using null")]
    InvalidTimestamp {
        reference: String,
        field: &'static str,
        value: String,
    },
    #[display("{reference}: invalid affected customer count {value:?}, using 0")]
    InvalidCustomerCount { reference: String, value: String },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub events: EventSet,
    pub warnings: Vec<DataQualityWarning>,
}

impl Normalized {
    pub fn dropped(&self) -> usize {
        self.warnings
            .iter()
            .filter(|w| matches!(w, DataQualityWarning::MissingReference { .. }))
            .count()
    }

    pub fn defaulted(&self) -> usize {
        self.warnings.len() - self.dropped()
    }
}

pub fn normalize<'a>(records: impl IntoIterator<Item = &'a RawRecord>) -> Normalized {
    let mut result = Normalized::default();

    for (index, record) in records.into_iter().enumerate() {
        match normalize_record(record, &mut result.warnings) {
            Some(event) => {
                if let Some(replaced) = result.events.insert(event) {
                    tracing::debug!("Duplicate power cut {} in one response, keeping last", replaced.reference);
                }
            }
            None => result.warnings.push(DataQualityWarning::MissingReference { index }),
        }
    }

    for warning in &result.warnings {
        tracing::warn!("Data quality issue in power cut data: {}", warning);
    }

    result
}

fn normalize_record(record: &RawRecord, warnings: &mut Vec<DataQualityWarning>) -> Option<Event> {
    let reference = text(record, REFERENCE)?;

    let affected_customers = match customer_count(record.get(AFFECTED_CUSTOMERS)) {
        Ok(count) => count,
        Err(value) => {
            warnings.push(DataQualityWarning::InvalidCustomerCount {
                reference: reference.clone(),
                value,
            });
            0
        }
    };

    let start_time = timestamp(record, START_TIME, &reference, warnings);
    let estimated_restoration = timestamp(record, ESTIMATED_RESTORATION, &reference, warnings);

    Some(Event {
        affected_customers,
        status: text(record, STATUS),
        reason: text(record, REASON),
        start_time,
        estimated_restoration,
        nature: text(record, NATURE),
        reference,
    })
}

fn text(record: &RawRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

//absent counts as 0 without complaint, anything unusable is reported back
fn customer_count(value: Option<&Value>) -> Result<u64, String> {
    let parsed = match value {
        None | Some(Value::Null) => return Ok(0),
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().and_then(non_negative)),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(non_negative))
        }
        Some(_) => None,
    };

    parsed.ok_or_else(|| value.map(|v| v.to_string()).unwrap_or_default())
}

fn non_negative(value: f64) -> Option<u64> {
    (value.is_finite() && value >= 0.0).then(|| value.trunc() as u64)
}

fn timestamp(
    record: &RawRecord,
    key: &'static str,
    reference: &str,
    warnings: &mut Vec<DataQualityWarning>,
) -> Option<DateTime> {
    let value = match record.get(key) {
        None | Some(Value::Null) => return None,
        Some(Value::String(s)) if s.trim().is_empty() => return None,
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            warnings.push(DataQualityWarning::InvalidTimestamp {
                reference: reference.to_owned(),
                field: key,
                value: other.to_string(),
            });
            return None;
        }
    };

    let parsed = DateTime::parse_lenient(value);
    if parsed.is_none() {
        warnings.push(DataQualityWarning::InvalidTimestamp {
            reference: reference.to_owned(),
            field: key,
            value: value.to_owned(),
        });
    }

    parsed
}
