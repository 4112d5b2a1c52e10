use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::StatusCode;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;

use crate::domain::entities::{Platform, PlatformOptions, PostPayload, PublishError};
use crate::domain::ports::platform_publisher::PlatformPublisher;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Postfanout-Signature";

/// Sign a relay request body using HMAC-SHA256.
///
/// Returns a signature string in the format "sha256=<hex>".
pub fn sign_payload(payload: &str, secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Maps a relay response status onto the publisher contract. Throttling and
/// server errors are worth retrying; any other rejection is final.
pub fn classify_status(status: StatusCode) -> Result<(), PublishError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(PublishError::Transient(format!("HTTP {}", status)))
    } else {
        Err(PublishError::Permanent(format!("HTTP {}", status)))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayRequest<'a> {
    platform: Platform,
    post: &'a PostPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a PlatformOptions>,
}

/// Forwards a post to an HTTP relay that owns the actual platform credentials.
/// Each platform is posted to `{base_url}/{platform}`.
pub struct RelayPublisher {
    platform: Platform,
    client: reqwest::Client,
    base_url: String,
    secret: Option<String>,
}

impl RelayPublisher {
    pub fn new(
        platform: Platform,
        base_url: &str,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            platform,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/{}", self.base_url, self.platform)
    }
}

#[async_trait]
impl PlatformPublisher for RelayPublisher {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn publish(&self, payload: &PostPayload) -> Result<(), PublishError> {
        let body = serde_json::to_string(&RelayRequest {
            platform: self.platform,
            post: payload,
            options: payload.options_for(self.platform),
        })
        .map_err(|e| PublishError::Permanent(format!("Failed to encode payload: {}", e)))?;

        let mut request = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret));
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;

        let status = response.status();
        tracing::debug!(
            platform = %self.platform,
            post_id = %payload.post_id,
            status = status.as_u16(),
            "Relay responded"
        );
        classify_status(status)
    }
}
