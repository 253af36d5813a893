use crate::backend::error::{GatewayError, GatewayResult};
use crate::campaign::CampaignConfig;
use crate::config::ApiConfig;
use crate::draft::PaymentFile;
use crate::extraction::{ExtractionReply, ExtractionResponse, TransactionExtractor};
use crate::gallery::{GalleryPhoto, GallerySource, GALLERY_PATH};
use crate::submission::{SubmissionReply, SubmissionRequest, SubmissionResponse, SubmissionTransport};
use crate::uniqueness::{TransactionIdCheck, UniquenessAuthority};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

pub const CHECK_TRANSACTION_ID_PATH: &str = "/check-transaction-id";
pub const EXTRACT_TRANSACTION_ID_PATH: &str = "/extract-transaction-id";
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const FILE_FIELD: &str = "file";
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Debug, Clone)]
pub struct DonationApiConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// Exponential backoff in seconds, capped so large retry counts cannot overflow.
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(MAX_BACKOFF_SHIFT))
}

impl From<&ApiConfig> for DonationApiConfig {
    fn from(config: &ApiConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
            max_retries: config.max_retries,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmailLookup {
    exists: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for one campaign's donation backend.
#[derive(Clone)]
pub struct DonationApiClient {
    client: Client,
    base_url: Url,
    check_email_path: String,
    timeout: Duration,
    max_retries: u32,
}

impl DonationApiClient {
    pub fn new(config: DonationApiConfig, campaign: &CampaignConfig) -> GatewayResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|e| GatewayError::RequestError {
            message: format!("invalid base URL '{}': {}", config.base_url, e),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::RequestError {
                message: format!("base URL '{}' cannot carry paths", config.base_url),
            });
        }

        let client =
            Client::builder()
                .timeout(config.timeout)
                .build()
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self {
            client,
            base_url,
            check_email_path: campaign.check_email_path.clone(),
            timeout: config.timeout,
            max_retries: config.max_retries,
        })
    }

    /// `base` + `path`, with `extra` appended as one percent-encoded segment.
    fn endpoint(&self, path: &str, extra: Option<&str>) -> GatewayResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GatewayError::RequestError {
                    message: "base URL cannot carry paths".to_string(),
                })?;
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            if let Some(extra) = extra {
                segments.push(extra);
            }
        }
        Ok(url)
    }

    /// Sends the request built by `build`, retrying transport failures, 429
    /// and 5xx up to `max_retries` times. Any other response is returned as
    /// status plus body for the caller to interpret.
    async fn send_with_retry<F>(
        &self,
        operation: &str,
        max_retries: u32,
        build: F,
    ) -> GatewayResult<(StatusCode, String)>
    where
        F: Fn() -> GatewayResult<RequestBuilder>,
    {
        let mut last_error = None;
        for attempt in 0..=max_retries {
            let request = build()?.timeout(self.timeout);

            let response = request
                .send()
                .await
                .map_err(|e| GatewayError::NetworkError {
                    message: format!("{} request failed: {}", operation, e),
                });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt < max_retries {
                            tokio::time::sleep(backoff(attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimitError {
                            message: format!("{} rate limited", operation),
                            retry_after_seconds: None,
                        });
                    }

                    if status.is_server_error() && attempt < max_retries {
                        warn!(
                            operation = operation,
                            status = %status,
                            attempt = attempt + 1,
                            "backend server error, retrying"
                        );
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }

                    debug!(operation = operation, status = %status, "backend responded");
                    return Ok((status, text));
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < max_retries {
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::NetworkError {
            message: format!("{} request failed", operation),
        }))
    }

    fn decode<T: DeserializeOwned>(operation: &str, text: &str) -> GatewayResult<T> {
        serde_json::from_str::<T>(text).map_err(|e| GatewayError::DecodeError {
            message: format!("invalid {} response: {}", operation, e),
        })
    }

    fn status_error(status: StatusCode, text: &str) -> GatewayError {
        let message = serde_json::from_str::<ErrorBody>(text)
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| text.to_string());
        GatewayError::StatusError {
            status: status.as_u16(),
            message,
        }
    }

    fn file_part(file: &PaymentFile) -> GatewayResult<Part> {
        let part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
        match file.content_type.as_deref() {
            Some(content_type) => {
                part.mime_str(content_type)
                    .map_err(|e| GatewayError::RequestError {
                        message: format!("invalid content type '{}': {}", content_type, e),
                    })
            }
            None => Ok(part),
        }
    }
}

#[async_trait]
impl UniquenessAuthority for DonationApiClient {
    async fn check_email_unique(&self, email: &str) -> GatewayResult<bool> {
        let url = self.endpoint(&self.check_email_path, Some(email))?;
        let (status, text) = self
            .send_with_retry("check-email", self.max_retries, || {
                Ok(self.client.get(url.clone()))
            })
            .await?;

        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }
        let lookup: EmailLookup = Self::decode("check-email", &text)?;
        Ok(!lookup.exists)
    }

    async fn check_transaction_id_unique(
        &self,
        transaction_id: &str,
    ) -> GatewayResult<TransactionIdCheck> {
        let url = self.endpoint(CHECK_TRANSACTION_ID_PATH, None)?;
        let payload = serde_json::json!({ "transactionId": transaction_id });
        let (status, text) = self
            .send_with_retry("check-transaction-id", self.max_retries, || {
                Ok(self.client.post(url.clone()).json(&payload))
            })
            .await?;

        if status.is_success() {
            return Ok(TransactionIdCheck::Ok);
        }
        if status.is_client_error() {
            if let Some(error) = serde_json::from_str::<ErrorBody>(&text)
                .ok()
                .and_then(|body| body.error)
            {
                return Ok(TransactionIdCheck::Conflict(error));
            }
        }
        Err(Self::status_error(status, &text))
    }
}

#[async_trait]
impl TransactionExtractor for DonationApiClient {
    async fn extract(&self, file: &PaymentFile) -> GatewayResult<ExtractionReply> {
        let url = self.endpoint(EXTRACT_TRANSACTION_ID_PATH, None)?;
        let (status, text) = self
            .send_with_retry("extract-transaction-id", self.max_retries, || {
                let form = Form::new().part(FILE_FIELD, Self::file_part(file)?);
                Ok(self.client.post(url.clone()).multipart(form))
            })
            .await?;

        if status.is_server_error() {
            return Err(Self::status_error(status, &text));
        }
        let body = if status.is_success() {
            Self::decode::<ExtractionResponse>("extract-transaction-id", &text)?
        } else {
            serde_json::from_str::<ExtractionResponse>(&text).unwrap_or_default()
        };
        Ok(ExtractionReply {
            accepted: status.is_success(),
            body,
        })
    }
}

#[async_trait]
impl SubmissionTransport for DonationApiClient {
    async fn submit(&self, request: &SubmissionRequest) -> GatewayResult<SubmissionReply> {
        let url = self.endpoint(&request.path, None)?;
        // Never retried here; the idempotency key lets the backend drop a
        // duplicate if the caller resubmits.
        let (status, text) = self
            .send_with_retry("submit-donation", 0, || {
                let mut form = Form::new();
                for (name, value) in &request.fields {
                    form = form.text(name.clone(), value.clone());
                }
                form = form.part(FILE_FIELD, Self::file_part(&request.file)?);
                Ok(self
                    .client
                    .post(url.clone())
                    .header(IDEMPOTENCY_HEADER, request.idempotency_key.as_str())
                    .multipart(form))
            })
            .await?;

        let body = serde_json::from_str::<SubmissionResponse>(&text).unwrap_or_else(|_| {
            SubmissionResponse {
                error: (!status.is_success() && !text.trim().is_empty()).then(|| text.clone()),
                ..SubmissionResponse::default()
            }
        });
        Ok(SubmissionReply {
            accepted: status.is_success(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl GallerySource for DonationApiClient {
    async fn fetch_gallery(&self) -> GatewayResult<Vec<GalleryPhoto>> {
        let url = self.endpoint(GALLERY_PATH, None)?;
        let (status, text) = self
            .send_with_retry("gallery", self.max_retries, || Ok(self.client.get(url.clone())))
            .await?;

        if !status.is_success() {
            return Err(Self::status_error(status, &text));
        }
        Self::decode("gallery", &text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> DonationApiClient {
        DonationApiClient::new(
            DonationApiConfig {
                base_url: base_url.to_string(),
                timeout: Duration::from_secs(5),
                max_retries: 0,
            },
            &CampaignConfig::stray_dog(),
        )
        .expect("client should build")
    }

    #[test]
    fn email_is_appended_as_encoded_segment() {
        let client = client("http://localhost:5000");
        let url = client
            .endpoint("/api/straydog/check-email", Some("a b/c@example.com"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:5000/api/straydog/check-email/a%20b%2Fc@example.com"
        );
    }

    #[test]
    fn base_path_is_preserved() {
        let client = client("http://localhost:5000/backend/");
        let url = client.endpoint(CHECK_TRANSACTION_ID_PATH, None).unwrap();
        assert_eq!(url.as_str(), "http://localhost:5000/backend/check-transaction-id");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let result = DonationApiClient::new(
            DonationApiConfig {
                base_url: "not a url".to_string(),
                timeout: Duration::from_secs(5),
                max_retries: 0,
            },
            &CampaignConfig::default(),
        );
        assert!(matches!(result, Err(GatewayError::RequestError { .. })));
    }

    #[test]
    fn status_errors_prefer_json_error_text() {
        let err = DonationApiClient::status_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":"Email already exists"}"#,
        );
        assert_eq!(
            err,
            GatewayError::StatusError {
                status: 400,
                message: "Email already exists".to_string()
            }
        );
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(6), Duration::from_secs(64));
        assert_eq!(backoff(64), Duration::from_secs(64));
        assert_eq!(backoff(u32::MAX), Duration::from_secs(64));
    }
}
