//! Screenshot upload round trip
//!
//! Sends the payment screenshot to the extraction service and turns its reply
//! into one of four outcomes. Guidance text depends on the provider and UI
//! variant the service reports. Only the most recently selected file may
//! apply its outcome.

use crate::backend::error::{GatewayError, GatewayResult};
use crate::detector::{PaymentApp, UiType};
use crate::draft::PaymentFile;
use crate::sequence::{RequestSequence, RequestToken};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const MANUAL_ENTRY_MESSAGE: &str = "Please enter transaction ID manually";
const GENERIC_EXTRACTED: &str = "Transaction ID successfully extracted!";
const GENERIC_NOT_FOUND: &str =
    "Transaction ID not found in the screenshot. Please enter manually.";
const PROCESSING_FAILED: &str = "Error processing image. Please enter transaction ID manually.";

/// Body of the extraction endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    #[serde(default)]
    pub payment_app: Option<String>,
    #[serde(default, rename = "appUIType")]
    pub app_ui_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reply from the extraction service: HTTP success plus decoded body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionReply {
    pub accepted: bool,
    pub body: ExtractionResponse,
}

#[async_trait]
pub trait TransactionExtractor: Send + Sync {
    async fn extract(&self, file: &PaymentFile) -> GatewayResult<ExtractionReply>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Extracted {
        transaction_id: String,
        guidance: String,
    },
    NeedsManualEntry {
        reason: String,
        guidance: String,
    },
    /// The id in the screenshot is already on record.
    Conflict { message: String },
    TransientFailure { guidance: String },
}

impl ExtractionOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractionOutcome::Extracted { .. } => "extracted",
            ExtractionOutcome::NeedsManualEntry { .. } => "needs_manual_entry",
            ExtractionOutcome::Conflict { .. } => "conflict",
            ExtractionOutcome::TransientFailure { .. } => "transient_failure",
        }
    }
}

/// Outcome plus the provider classification the service confirmed, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedExtraction {
    pub confirmed: Option<(PaymentApp, UiType)>,
    pub outcome: ExtractionOutcome,
}

impl ResolvedExtraction {
    pub fn transient() -> Self {
        Self {
            confirmed: None,
            outcome: ExtractionOutcome::TransientFailure {
                guidance: PROCESSING_FAILED.to_string(),
            },
        }
    }
}

/// Provider-specific texts for one (app, ui type) pair.
struct Guidance {
    extracted: &'static str,
    /// Field error and guidance when no id was found.
    missing: Option<(&'static str, &'static str)>,
}

fn guidance_for(app: &PaymentApp, ui_type: &UiType) -> Option<Guidance> {
    match (app, ui_type) {
        (PaymentApp::GooglePay, _) => Some(Guidance {
            extracted: "Google Pay Transaction ID successfully extracted!",
            missing: Some((
                MANUAL_ENTRY_MESSAGE,
                "Transaction ID not found in the Google Pay screenshot. Please enter manually.",
            )),
        }),
        (PaymentApp::Bhim, _) => Some(Guidance {
            extracted: "BHIM Transaction ID successfully extracted!",
            missing: None,
        }),
        (PaymentApp::PhonePe, _) => Some(Guidance {
            extracted: "PhonePe Transaction ID successfully extracted!",
            missing: Some((
                MANUAL_ENTRY_MESSAGE,
                "Transaction ID not found in the PhonePe screenshot. Please enter manually.",
            )),
        }),
        (PaymentApp::Paytm, UiType::Type1) => Some(Guidance {
            extracted: "Paytm Reference Number successfully extracted!",
            missing: Some((
                MANUAL_ENTRY_MESSAGE,
                "For this Paytm receipt, please enter the Reference Number manually.",
            )),
        }),
        (PaymentApp::Paytm, UiType::Type2) => Some(Guidance {
            extracted: "Paytm Reference Number successfully extracted!",
            missing: Some((
                "Please enter UPI Reference Number manually",
                "UPI Reference Number not found. Please check at the bottom of your screenshot and enter manually.",
            )),
        }),
        _ => None,
    }
}

/// Interprets an extraction reply. Every reply maps to one of the four
/// outcome kinds; nothing is dropped.
pub fn resolve(reply: &ExtractionReply) -> ResolvedExtraction {
    let body = &reply.body;
    let confirmed = body
        .payment_app
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            (
                PaymentApp::from_reported(name),
                UiType::from_reported(body.app_ui_type.as_deref()),
            )
        });

    if !reply.accepted {
        let outcome = match body.error.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(error) => ExtractionOutcome::Conflict {
                message: error.to_string(),
            },
            None => ExtractionOutcome::TransientFailure {
                guidance: PROCESSING_FAILED.to_string(),
            },
        };
        return ResolvedExtraction { confirmed, outcome };
    }

    let transaction_id = body
        .transaction_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let guidance = confirmed
        .as_ref()
        .and_then(|(app, ui_type)| guidance_for(app, ui_type));
    let server_message = body.message.clone().filter(|m| !m.trim().is_empty());

    let outcome = match (transaction_id, guidance) {
        (Some(id), Some(texts)) => ExtractionOutcome::Extracted {
            transaction_id: id.to_string(),
            guidance: texts.extracted.to_string(),
        },
        (Some(id), None) => ExtractionOutcome::Extracted {
            transaction_id: id.to_string(),
            guidance: server_message.unwrap_or_else(|| GENERIC_EXTRACTED.to_string()),
        },
        (
            None,
            Some(Guidance {
                missing: Some((reason, guidance)),
                ..
            }),
        ) => ExtractionOutcome::NeedsManualEntry {
            reason: reason.to_string(),
            guidance: guidance.to_string(),
        },
        (None, _) => ExtractionOutcome::NeedsManualEntry {
            reason: MANUAL_ENTRY_MESSAGE.to_string(),
            guidance: server_message.unwrap_or_else(|| GENERIC_NOT_FOUND.to_string()),
        },
    };

    ResolvedExtraction { confirmed, outcome }
}

/// Issued when a file is selected; redeemed when its extraction completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTicket {
    pub token: RequestToken,
    pub file: PaymentFile,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractionCoordinator {
    sequence: RequestSequence,
}

impl ExtractionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a round trip for `file`; outcomes of earlier files become stale.
    pub fn begin(&mut self, file: &PaymentFile) -> ExtractionTicket {
        ExtractionTicket {
            token: self.sequence.issue(),
            file: file.clone(),
        }
    }

    pub fn accept(&mut self, token: RequestToken) -> bool {
        self.sequence.settle(token)
    }

    pub fn invalidate(&mut self) {
        self.sequence.invalidate();
    }

    pub fn is_processing(&self) -> bool {
        self.sequence.is_outstanding()
    }
}

/// Uploads the ticket's file and resolves the reply, bounded by `timeout`.
pub async fn run_extraction(
    extractor: &dyn TransactionExtractor,
    ticket: &ExtractionTicket,
    timeout: Duration,
) -> ResolvedExtraction {
    let result = match tokio::time::timeout(timeout, extractor.extract(&ticket.file)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout("extract-transaction-id", timeout)),
    };

    match result {
        Ok(reply) => {
            let resolved = resolve(&reply);
            info!(
                token = %ticket.token,
                outcome = resolved.outcome.kind(),
                app = ?resolved.confirmed.as_ref().map(|(app, _)| app.display_name().to_string()),
                "extraction completed"
            );
            resolved
        }
        Err(err) => {
            warn!(token = %ticket.token, error = %err, "extraction failed");
            ResolvedExtraction::transient()
        }
    }
}
