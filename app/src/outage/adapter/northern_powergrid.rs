use std::time::Duration;

use infrastructure::HttpClientConfig;
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;

use crate::outage::RawRecord;

use super::{FetchError, OutageSource};

pub const DEFAULT_API_URL: &str = "https://power.northernpowergrid.com/Powercut_API/rest/powercuts/getall";

const POSTCODE: &str = "Postcode";

/// Northern Powergrid only offers a list of all current power cuts, scoping to the
/// configured postcode happens client-side.
#[derive(Debug, Clone)]
pub struct NorthernPowergridSource {
    client: ClientWithMiddleware,
    url: String,
}

impl NorthernPowergridSource {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = HttpClientConfig::default().with_timeout(timeout).new_tracing_client()?;

        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }
}

impl OutageSource for NorthernPowergridSource {
    fn name(&self) -> &str {
        "NorthernPowergrid"
    }

    #[tracing::instrument(skip(self))]
    async fn fetch(&self, postcode: &str) -> Result<Vec<RawRecord>, FetchError> {
        let response = self.client.get(&self.url).send().await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        //served as text/plain, so no response.json()
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::transient(format!("Error reading response body: {e}")))?;

        let records = parse_records(&body)?;
        let total = records.len();
        let matching = filter_by_postcode(records, postcode);

        tracing::debug!("{} of {} power cuts match postcode {}", matching.len(), total, postcode);

        Ok(matching)
    }
}

pub fn normalize_postcode(postcode: &str) -> String {
    postcode
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

fn request_error(error: reqwest_middleware::Error) -> FetchError {
    match &error {
        reqwest_middleware::Error::Reqwest(e) if e.is_builder() => {
            FetchError::permanent(format!("Invalid power cut request: {error}"))
        }
        _ => FetchError::transient(format!("Error requesting power cuts: {error}")),
    }
}

fn status_error(status: StatusCode) -> FetchError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::REQUEST_TIMEOUT {
        FetchError::transient(format!("Power cut API responded with {status}"))
    } else {
        FetchError::permanent(format!("Power cut API responded with {status}"))
    }
}

fn parse_records(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    if body.trim().is_empty() {
        tracing::debug!("Empty power cut response, treating as no power cuts");
        return Ok(vec![]);
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::permanent(format!("Power cut response is not valid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(FetchError::permanent("Power cut response is not a JSON array"));
    };

    let records = items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match item {
            Value::Object(record) => Some(record),
            other => {
                tracing::warn!("Skipping power cut entry #{} as it is not an object: {}", index, other);
                None
            }
        })
        .collect();

    Ok(records)
}

fn filter_by_postcode(records: Vec<RawRecord>, postcode: &str) -> Vec<RawRecord> {
    let wanted = normalize_postcode(postcode);

    records
        .into_iter()
        .filter(|record| match record.get(POSTCODE) {
            Some(Value::String(area)) => normalize_postcode(area).contains(&wanted),
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    const BODY: &str = r#"[
        {"Reference": "INCD-1", "Postcode": "NE1 1AA", "TotalConfirmedPowerCut": 12},
        {"Reference": "INCD-2", "Postcode": "ne1 1aa, NE1 1AB", "TotalConfirmedPowerCut": 3},
        {"Reference": "INCD-3", "Postcode": "DH1 3LE"},
        {"Reference": "INCD-4"}
    ]"#;

    async fn source_for(server: &Server) -> NorthernPowergridSource {
        NorthernPowergridSource::new(&format!("{}/getall", server.url()), Duration::from_secs(5)).unwrap()
    }

    fn references(records: &[RawRecord]) -> Vec<&str> {
        records
            .iter()
            .filter_map(|r| r.get("Reference").and_then(Value::as_str))
            .collect()
    }

    #[test]
    fn postcode_normalization_ignores_case_and_spaces() {
        assert_eq!(normalize_postcode(" ne1  1aa "), "NE11AA");
    }

    #[tokio::test]
    async fn returns_records_matching_postcode() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/getall")
            .with_status(200)
            .with_header("content-type", "text/plain")
            .with_body(BODY)
            .create_async()
            .await;

        let records = source_for(&server).await.fetch("ne11aa").await.unwrap();

        assert_eq!(references(&records), vec!["INCD-1", "INCD-2"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn partial_postcode_matches_whole_district() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/getall")
            .with_status(200)
            .with_body(BODY)
            .create_async()
            .await;

        let records = source_for(&server).await.fetch("DH1").await.unwrap();

        assert_eq!(references(&records), vec!["INCD-3"]);
    }

    #[tokio::test]
    async fn empty_array_is_no_power_cuts() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/getall")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let records = source_for(&server).await.fetch("NE11AA").await.unwrap();

        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/getall").with_status(503).create_async().await;

        let error = source_for(&server).await.fetch("NE11AA").await.unwrap_err();

        assert!(error.is_transient(), "{error}");
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/getall").with_status(429).create_async().await;

        let error = source_for(&server).await.fetch("NE11AA").await.unwrap_err();

        assert!(error.is_transient(), "{error}");
    }

    #[tokio::test]
    async fn missing_endpoint_is_permanent() {
        let mut server = Server::new_async().await;
        server.mock("GET", "/getall").with_status(404).create_async().await;

        let error = source_for(&server).await.fetch("NE11AA").await.unwrap_err();

        assert!(!error.is_transient(), "{error}");
    }

    #[tokio::test]
    async fn html_instead_of_json_is_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/getall")
            .with_status(200)
            .with_body("<html><body>Maintenance</body></html>")
            .create_async()
            .await;

        let error = source_for(&server).await.fetch("NE11AA").await.unwrap_err();

        assert!(matches!(error, FetchError::Permanent { .. }), "{error}");
    }

    #[tokio::test]
    async fn object_instead_of_array_is_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/getall")
            .with_status(200)
            .with_body(r#"{"powercuts": []}"#)
            .create_async()
            .await;

        let error = source_for(&server).await.fetch("NE11AA").await.unwrap_err();

        assert!(matches!(error, FetchError::Permanent { .. }), "{error}");
    }

    #[tokio::test]
    async fn non_object_entries_are_skipped() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/getall")
            .with_status(200)
            .with_body(r#"[42, {"Reference": "INCD-1", "Postcode": "NE1 1AA"}, "oops"]"#)
            .create_async()
            .await;

        let records = source_for(&server).await.fetch("NE11AA").await.unwrap();

        assert_eq!(references(&records), vec!["INCD-1"]);
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let source = NorthernPowergridSource::new("http://127.0.0.1:9/getall", Duration::from_secs(2)).unwrap();

        let error = source.fetch("NE11AA").await.unwrap_err();

        assert!(error.is_transient(), "{error}");
    }
}
