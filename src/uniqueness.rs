//! Remote uniqueness checks for email and transaction id
//!
//! Checks run after the local format check passes and on every later edit.
//! Responses are applied last-input-wins; a failed or timed-out check is
//! "unknown" and never blocks the donor. The backend re-checks the
//! transaction id on submission.

use crate::backend::error::{GatewayError, GatewayResult};
use crate::draft::Field;
use crate::sequence::{RequestSequence, RequestToken};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

pub const EMAIL_TAKEN_MESSAGE: &str = "This email is already used";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionIdCheck {
    Ok,
    Conflict(String),
}

/// Remote authority over which emails and transaction ids are on record.
#[async_trait]
pub trait UniquenessAuthority: Send + Sync {
    /// True when no donation uses this email yet.
    async fn check_email_unique(&self, email: &str) -> GatewayResult<bool>;

    async fn check_transaction_id_unique(
        &self,
        transaction_id: &str,
    ) -> GatewayResult<TransactionIdCheck>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniquenessVerdict {
    Unique,
    Conflict(String),
    /// Service failed or timed out.
    Unknown,
}

/// A check the controller wants run, tagged with its sequence token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniquenessCheck {
    pub field: Field,
    pub token: RequestToken,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct UniquenessGate {
    email: RequestSequence,
    transaction_id: RequestSequence,
}

impl UniquenessGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn sequence_mut(&mut self, field: Field) -> Option<&mut RequestSequence> {
        match field {
            Field::DonorEmail => Some(&mut self.email),
            Field::TransactionId => Some(&mut self.transaction_id),
            _ => None,
        }
    }

    /// Issues a check for `value`. Returns `None` for fields without a remote
    /// uniqueness rule.
    pub fn request(&mut self, field: Field, value: &str) -> Option<UniquenessCheck> {
        let token = self.sequence_mut(field)?.issue();
        debug!(field = %field, token = %token, "uniqueness check issued");
        Some(UniquenessCheck {
            field,
            token,
            value: value.to_string(),
        })
    }

    /// Drops interest in any in-flight check for `field`.
    pub fn invalidate(&mut self, field: Field) {
        if let Some(sequence) = self.sequence_mut(field) {
            sequence.invalidate();
        }
    }

    /// Accepts the response for `token` only if it is the latest for `field`.
    pub fn accept(&mut self, field: Field, token: RequestToken) -> bool {
        self.sequence_mut(field)
            .map(|sequence| sequence.settle(token))
            .unwrap_or(false)
    }

    pub fn is_pending(&self, field: Field) -> bool {
        match field {
            Field::DonorEmail => self.email.is_outstanding(),
            Field::TransactionId => self.transaction_id.is_outstanding(),
            _ => false,
        }
    }
}

/// Runs one check against the authority, bounded by `timeout`.
pub async fn run_check(
    authority: &dyn UniquenessAuthority,
    check: &UniquenessCheck,
    timeout: Duration,
) -> UniquenessVerdict {
    let call = async {
        match check.field {
            Field::DonorEmail => authority
                .check_email_unique(&check.value)
                .await
                .map(|unique| {
                    if unique {
                        UniquenessVerdict::Unique
                    } else {
                        UniquenessVerdict::Conflict(EMAIL_TAKEN_MESSAGE.to_string())
                    }
                }),
            Field::TransactionId => authority
                .check_transaction_id_unique(&check.value)
                .await
                .map(|result| match result {
                    TransactionIdCheck::Ok => UniquenessVerdict::Unique,
                    TransactionIdCheck::Conflict(message) => UniquenessVerdict::Conflict(message),
                }),
            other => Err(GatewayError::RequestError {
                message: format!("{} has no uniqueness rule", other),
            }),
        }
    };

    let result = match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::timeout("uniqueness-check", timeout)),
    };

    match result {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(
                field = %check.field,
                token = %check.token,
                error = %err,
                "uniqueness check failed, treating as unknown"
            );
            UniquenessVerdict::Unknown
        }
    }
}
