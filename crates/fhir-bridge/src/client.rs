use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use tracing::{debug, info};

use crate::fhir::Bundle;

const POST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("could not reach the endpoint: {0}")]
    Request(reqwest::Error),
    #[error("endpoint rejected the bundle: http {0}")]
    Rejected(reqwest::StatusCode),
}

/// Posts observation bundles to one FHIR endpoint.
///
/// Delivery is fire and forget per window: a failed post is reported and
/// the next window is attempted regardless.
pub struct FhirClient {
    http: reqwest::Client,
    url: String,
}

impl FhirClient {
    pub fn new(url: &str, api_key: Option<&str>) -> color_eyre::Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert("X-API-KEY", HeaderValue::from_str(key)?);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(POST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: url.to_owned(),
        })
    }

    pub async fn post_bundle(&self, bundle: &Bundle) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.url.as_str())
            .json(bundle)
            .header(CONTENT_TYPE, "application/fhir+json")
            .send()
            .await
            .map_err(DeliveryError::Request)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        info!("posted {} observations | http {status}", bundle.len());
        debug!("response body: {:.500}", body);

        if !status.is_success() {
            return Err(DeliveryError::Rejected(status));
        }
        Ok(())
    }
}
