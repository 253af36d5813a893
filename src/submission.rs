//! Final donation submission
//!
//! Assembles the multipart request, tags it with an idempotency key, keeps at
//! most one request in flight and routes backend errors to the field they
//! concern.

use crate::backend::error::{GatewayError, GatewayResult};
use crate::campaign::CampaignConfig;
use crate::draft::{DonationDraft, Field, PaymentEvidence, PaymentFile};
use crate::error::{FormError, SubmissionError, TransitionError};
use crate::validation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

pub const FILE_REQUIRED_MESSAGE: &str = "Please upload a payment screenshot";
pub const TRANSACTION_ID_REQUIRED_MESSAGE: &str = "Transaction ID is required";
pub const EMAIL_USED_MESSAGE: &str = "This email is already used.";
const FALLBACK_SERVER_MESSAGE: &str = "Please check your form and try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    /// Campaign-specific endpoint path.
    pub path: String,
    pub fields: Vec<(String, String)>,
    pub file: PaymentFile,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubmissionResponse {
    #[serde(default)]
    pub success: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionReply {
    pub accepted: bool,
    pub status: u16,
    pub body: SubmissionResponse,
}

#[async_trait]
pub trait SubmissionTransport: Send + Sync {
    async fn submit(&self, request: &SubmissionRequest) -> GatewayResult<SubmissionReply>;
}

/// Key letting the backend recognise retried or duplicated submissions.
pub fn idempotency_key(donor_name: &str, captcha_code: &str, submitted_at: DateTime<Utc>) -> String {
    let compact_name: String = donor_name.split_whitespace().collect();
    let raw_key = format!(
        "{}:{}:{}",
        compact_name,
        captcha_code,
        submitted_at.timestamp_millis()
    );

    let mut hasher = Sha256::new();
    hasher.update(raw_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// `{donorName}_{totalAmount}_{app}.{ext}`, `payment` when no app is known.
pub fn evidence_file_name(draft: &DonationDraft, evidence: &PaymentEvidence) -> String {
    let app = evidence
        .detected_app
        .app()
        .map(|app| app.display_name().to_string())
        .unwrap_or_else(|| "payment".to_string());
    let base = format!(
        "{}_{}_{}",
        draft.donor_name.trim(),
        draft.value(Field::TotalAmount),
        app
    );
    match evidence.file.extension() {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    }
}

/// Everything that must hold before dispatch, apart from the captcha which
/// the controller verifies first.
pub fn missing_preconditions(
    draft: &DonationDraft,
    evidence: Option<&PaymentEvidence>,
) -> Vec<FormError> {
    let mut problems: Vec<FormError> = validation::validate_entry(draft)
        .iter()
        .map(|(_, error)| error.clone())
        .collect();
    if evidence.is_none() {
        problems.push(FormError::local(Field::File, FILE_REQUIRED_MESSAGE));
    }
    if draft.transaction_id.trim().is_empty() {
        problems.push(FormError::local(
            Field::TransactionId,
            TRANSACTION_ID_REQUIRED_MESSAGE,
        ));
    }
    problems
}

/// Maps a backend error text to the field it concerns, or to the banner.
pub fn route_error_message(error: Option<&str>) -> SubmissionError {
    let Some(message) = error.map(str::trim).filter(|m| !m.is_empty()) else {
        return SubmissionError::ServerError {
            message: format!("Error in submission: {}", FALLBACK_SERVER_MESSAGE),
        };
    };
    let lowered = message.to_lowercase();

    if lowered.contains("email") && lowered.contains("already") {
        SubmissionError::FieldConflict {
            field: Field::DonorEmail,
            message: EMAIL_USED_MESSAGE.to_string(),
        }
    } else if lowered.contains("transaction id") && lowered.contains("already") {
        SubmissionError::FieldConflict {
            field: Field::TransactionId,
            message: message.to_string(),
        }
    } else if lowered.contains("amount not matched") {
        SubmissionError::FieldConflict {
            field: Field::FoodCount,
            message: message.to_string(),
        }
    } else {
        SubmissionError::ServerError {
            message: format!("Error in submission: {}", message),
        }
    }
}

pub fn route_reply(result: GatewayResult<SubmissionReply>) -> Result<(), SubmissionError> {
    match result {
        Ok(reply) if reply.accepted => Ok(()),
        Ok(reply) => Err(route_error_message(reply.body.error.as_deref())),
        Err(
            err @ (GatewayError::NetworkError { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::RateLimitError { .. }),
        ) => Err(SubmissionError::NetworkFailure {
            message: err.user_message(),
        }),
        Err(err) => Err(SubmissionError::ServerError {
            message: err.user_message(),
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionCoordinator {
    in_flight: Option<String>,
    /// Key of the last attempt that failed retryably. A resubmit of the
    /// unchanged form carries it again.
    retry_key: Option<String>,
}

impl SubmissionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Builds the request and marks it in flight. Fails while another
    /// request is outstanding. Reuses the key of a failed attempt when the
    /// form has not changed since.
    pub fn begin(
        &mut self,
        campaign: &CampaignConfig,
        draft: &DonationDraft,
        captcha_code: &str,
        evidence: &PaymentEvidence,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionRequest, TransitionError> {
        if self.in_flight.is_some() {
            return Err(TransitionError::SubmissionInFlight);
        }

        let key = match self.retry_key.take() {
            Some(key) => {
                debug!(idempotency_key = %key, "resubmitting with previous key");
                key
            }
            None => idempotency_key(&draft.donor_name, captcha_code, submitted_at),
        };
        let mut fields: Vec<(String, String)> = draft
            .form_fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();
        fields.push(("uniqueId".to_string(), key.clone()));

        let request = SubmissionRequest {
            path: campaign.submit_path.clone(),
            fields,
            file: evidence
                .file
                .renamed(evidence_file_name(draft, evidence)),
            idempotency_key: key.clone(),
        };

        info!(
            campaign = %campaign.slug,
            idempotency_key = %key,
            total_amount = ?draft.total_amount,
            "dispatching donation submission"
        );
        self.in_flight = Some(key);
        Ok(request)
    }

    /// Routes the reply for `key`. Returns `None` when `key` is not the
    /// request in flight.
    pub fn finish(
        &mut self,
        key: &str,
        result: GatewayResult<SubmissionReply>,
    ) -> Option<Result<(), SubmissionError>> {
        if self.in_flight.as_deref() != Some(key) {
            warn!(idempotency_key = %key, "ignoring reply for a submission not in flight");
            return None;
        }
        self.in_flight = None;
        let routed = route_reply(result);
        if matches!(&routed, Err(err) if err.is_retryable()) {
            self.retry_key = Some(key.to_string());
        }
        Some(routed)
    }

    pub fn retry_key(&self) -> Option<&str> {
        self.retry_key.as_deref()
    }

    /// Drops the key kept for a resubmit. Called whenever the submitted
    /// content changes.
    pub fn forget_retry_key(&mut self) {
        self.retry_key = None;
    }

    pub fn reset(&mut self) {
        self.in_flight = None;
        self.retry_key = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectedApp, PaymentApp};
    use chrono::TimeZone;

    fn draft() -> DonationDraft {
        DonationDraft {
            donor_name: "Asha Rao".to_string(),
            donor_email: "asha@example.com".to_string(),
            phone_number: "9876543210".to_string(),
            parcel_name: "Lunch box".to_string(),
            food_count: "3".to_string(),
            total_amount: Some(75),
            birthdate: "1990-04-12".to_string(),
            transaction_id: "T123".to_string(),
            captcha_input: "AB12CD".to_string(),
            ..DonationDraft::default()
        }
    }

    fn evidence() -> PaymentEvidence {
        let mut evidence =
            PaymentEvidence::new(PaymentFile::from_named_bytes("gpay_receipt.PNG", vec![1, 2]));
        evidence.detected_app = DetectedApp::Heuristic(PaymentApp::GooglePay);
        evidence
    }

    #[test]
    fn idempotency_key_depends_on_name_captcha_and_time() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let key = idempotency_key("Asha Rao", "AB12CD", at);
        assert_eq!(key.len(), 64);
        assert_eq!(key, idempotency_key("Asha  Rao", "AB12CD", at));
        assert_ne!(key, idempotency_key("Asha Rao", "AB12CE", at));
        assert_ne!(
            key,
            idempotency_key("Asha Rao", "AB12CD", at + chrono::Duration::milliseconds(1))
        );
    }

    #[test]
    fn evidence_is_renamed_after_donor_amount_and_app() {
        assert_eq!(
            evidence_file_name(&draft(), &evidence()),
            "Asha Rao_75_Google Pay.png"
        );
        let unknown = PaymentEvidence::new(PaymentFile::from_named_bytes("IMG_1.jpg", vec![1]));
        assert_eq!(evidence_file_name(&draft(), &unknown), "Asha Rao_75_payment.jpg");
    }

    #[test]
    fn preconditions_cover_file_and_transaction_id() {
        let mut draft = draft();
        assert!(missing_preconditions(&draft, Some(&evidence())).is_empty());

        draft.transaction_id = "  ".to_string();
        let problems = missing_preconditions(&draft, None);
        let fields: Vec<Field> = problems.iter().filter_map(FormError::field).collect();
        assert_eq!(fields, vec![Field::File, Field::TransactionId]);
    }

    #[test]
    fn known_conflicts_route_to_fields() {
        assert_eq!(
            route_error_message(Some("Email already exists")),
            SubmissionError::FieldConflict {
                field: Field::DonorEmail,
                message: EMAIL_USED_MESSAGE.to_string(),
            }
        );
        assert_eq!(
            route_error_message(Some("This transaction ID has already been used.")),
            SubmissionError::FieldConflict {
                field: Field::TransactionId,
                message: "This transaction ID has already been used.".to_string(),
            }
        );
        assert!(matches!(
            route_error_message(Some("Amount not matched! Expected 75")),
            SubmissionError::FieldConflict {
                field: Field::FoodCount,
                ..
            }
        ));
        assert!(matches!(
            route_error_message(Some("database exploded")),
            SubmissionError::ServerError { .. }
        ));
        assert!(matches!(
            route_error_message(None),
            SubmissionError::ServerError { .. }
        ));
    }

    #[test]
    fn transport_failures_are_retryable_banners() {
        let routed = route_reply(Err(GatewayError::NetworkError {
            message: "connection reset".to_string(),
        }));
        assert!(matches!(routed, Err(SubmissionError::NetworkFailure { .. })));
    }

    #[test]
    fn only_one_request_in_flight() {
        let mut coordinator = SubmissionCoordinator::new();
        let campaign = CampaignConfig::homeless();
        let request = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), Utc::now())
            .expect("first submission should dispatch");
        assert_eq!(request.path, "/donate");
        assert!(request
            .fields
            .iter()
            .any(|(name, value)| name == "uniqueId" && value == &request.idempotency_key));

        assert_eq!(
            coordinator.begin(&campaign, &draft(), "AB12CD", &evidence(), Utc::now()),
            Err(TransitionError::SubmissionInFlight)
        );

        assert!(coordinator.finish("other-key", Ok(accepted())).is_none());
        assert_eq!(
            coordinator.finish(&request.idempotency_key, Ok(accepted())),
            Some(Ok(()))
        );
        assert!(!coordinator.is_in_flight());
    }

    #[test]
    fn retryable_failure_keeps_key_for_resubmit() {
        let mut coordinator = SubmissionCoordinator::new();
        let campaign = CampaignConfig::homeless();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();

        let first = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), at)
            .unwrap();
        let routed = coordinator.finish(
            &first.idempotency_key,
            Err(GatewayError::NetworkError {
                message: "connection reset".to_string(),
            }),
        );
        assert!(matches!(routed, Some(Err(SubmissionError::NetworkFailure { .. }))));
        assert_eq!(coordinator.retry_key(), Some(first.idempotency_key.as_str()));

        let later = at + chrono::Duration::seconds(30);
        let second = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), later)
            .unwrap();
        assert_eq!(second.idempotency_key, first.idempotency_key);
        assert_eq!(coordinator.finish(&second.idempotency_key, Ok(accepted())), Some(Ok(())));
        assert_eq!(coordinator.retry_key(), None);

        let third = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), later)
            .unwrap();
        assert_ne!(third.idempotency_key, first.idempotency_key);
    }

    #[test]
    fn field_conflict_or_edit_drops_retry_key() {
        let mut coordinator = SubmissionCoordinator::new();
        let campaign = CampaignConfig::homeless();

        let first = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), Utc::now())
            .unwrap();
        coordinator.finish(
            &first.idempotency_key,
            Ok(SubmissionReply {
                accepted: false,
                status: 400,
                body: SubmissionResponse {
                    error: Some("Email already exists".to_string()),
                    ..SubmissionResponse::default()
                },
            }),
        );
        assert_eq!(coordinator.retry_key(), None);

        let second = coordinator
            .begin(&campaign, &draft(), "AB12CD", &evidence(), Utc::now())
            .unwrap();
        coordinator.finish(
            &second.idempotency_key,
            Err(GatewayError::NetworkError {
                message: "timed out".to_string(),
            }),
        );
        assert!(coordinator.retry_key().is_some());
        coordinator.forget_retry_key();
        assert_eq!(coordinator.retry_key(), None);
    }

    fn accepted() -> SubmissionReply {
        SubmissionReply {
            accepted: true,
            status: 200,
            body: SubmissionResponse {
                success: Some(serde_json::json!(true)),
                ..SubmissionResponse::default()
            },
        }
    }
}
