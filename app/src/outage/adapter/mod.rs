mod northern_powergrid;

pub use northern_powergrid::{DEFAULT_API_URL, NorthernPowergridSource, normalize_postcode};

use crate::outage::RawRecord;

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display, derive_more::Error)]
pub enum FetchError {
    //network, timeout, 5xx - retried on the next regular tick
    #[display("Transient error fetching power cuts: {message}")]
    Transient { message: String },
    //upstream no longer matches the expected contract
    #[display("Power cut source contract violated: {message}")]
    Permanent { message: String },
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message } | Self::Permanent { message } => message,
        }
    }
}

/// Upstream providing the raw power cut records of a postcode.
pub trait OutageSource: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn fetch(&self, postcode: &str) -> impl Future<Output = Result<Vec<RawRecord>, FetchError>> + Send;
}
