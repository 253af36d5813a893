//! Async driver for one donation form
//!
//! The controller never awaits. The session runs every backend call it asks
//! for as a spawned task and queues the result as a [`Completion`]; callers
//! feed completions back with [`DonationSession::apply`], typically from a
//! `tokio::select!` loop that also reads user input.

use crate::backend::error::{GatewayError, GatewayResult};
use crate::campaign::CampaignConfig;
use crate::controller::{FormEvent, FormStateController};
use crate::draft::{Field, PaymentFile};
use crate::error::{SubmissionError, TransitionError};
use crate::extraction::{self, ResolvedExtraction, TransactionExtractor};
use crate::logging::{mask_email, mask_phone};
use crate::sequence::RequestToken;
use crate::submission::{SubmissionReply, SubmissionTransport};
use crate::uniqueness::{self, UniquenessAuthority, UniquenessCheck, UniquenessVerdict};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPLETION_BUFFER: usize = 128;

/// Backend collaborators used by a session.
#[derive(Clone)]
pub struct Backends {
    pub uniqueness: Arc<dyn UniquenessAuthority>,
    pub extractor: Arc<dyn TransactionExtractor>,
    pub transport: Arc<dyn SubmissionTransport>,
}

impl Backends {
    /// One backend serving every contract, e.g. the HTTP client.
    pub fn shared<B>(backend: Arc<B>) -> Self
    where
        B: UniquenessAuthority + TransactionExtractor + SubmissionTransport + 'static,
    {
        Self {
            uniqueness: backend.clone(),
            extractor: backend.clone(),
            transport: backend,
        }
    }
}

/// Result of a finished backend task, waiting to be applied.
#[derive(Debug)]
pub enum Completion {
    Uniqueness {
        check: UniquenessCheck,
        verdict: UniquenessVerdict,
    },
    Extraction {
        token: RequestToken,
        resolved: ResolvedExtraction,
    },
    Submission {
        idempotency_key: String,
        result: GatewayResult<SubmissionReply>,
    },
}

pub struct DonationSession {
    session_id: Uuid,
    controller: FormStateController,
    backends: Backends,
    timeout: Duration,
    sender: mpsc::Sender<Completion>,
    receiver: mpsc::Receiver<Completion>,
    in_flight: usize,
}

impl DonationSession {
    pub fn new(campaign: CampaignConfig, backends: Backends, timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(COMPLETION_BUFFER);
        let session_id = Uuid::new_v4();
        info!(
            session_id = %session_id,
            campaign = %campaign.slug,
            unit_price = campaign.unit_price,
            "donation session started"
        );
        Self {
            session_id,
            controller: FormStateController::new(campaign),
            backends,
            timeout,
            sender,
            receiver,
            in_flight: 0,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn controller(&self) -> &FormStateController {
        &self.controller
    }

    /// Number of backend tasks whose completion has not been applied yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn take_events(&mut self) -> Vec<FormEvent> {
        self.controller.take_events()
    }

    // =========================================================================
    // User actions
    // =========================================================================

    pub fn set_field(&mut self, field: Field, value: &str) -> Result<(), TransitionError> {
        if let Some(check) = self.controller.set_field(field, value)? {
            self.spawn_uniqueness(check);
        }
        Ok(())
    }

    pub fn confirm(&mut self) -> Result<(), TransitionError> {
        self.controller.confirm()?;
        let draft = self.controller.draft();
        info!(
            session_id = %self.session_id,
            donor_email = %mask_email(&draft.donor_email),
            phone = %mask_phone(&draft.phone_number),
            total_amount = ?draft.total_amount,
            "donor details confirmed"
        );
        Ok(())
    }

    pub fn back(&mut self) -> Result<(), TransitionError> {
        self.controller.back()
    }

    pub fn start_over(&mut self) -> Result<(), TransitionError> {
        self.controller.start_over()
    }

    pub fn select_file(&mut self, file: PaymentFile) -> Result<(), TransitionError> {
        if let Some(ticket) = self.controller.select_file(file)? {
            let extractor = self.backends.extractor.clone();
            let timeout = self.timeout;
            self.spawn(async move {
                let resolved = extraction::run_extraction(extractor.as_ref(), &ticket, timeout).await;
                Completion::Extraction {
                    token: ticket.token,
                    resolved,
                }
            });
        }
        Ok(())
    }

    pub fn clear_file(&mut self) -> Result<(), TransitionError> {
        self.controller.clear_file()
    }

    /// Dispatches the final submission. Rejected without a request while
    /// another submission is in flight.
    pub fn submit(&mut self) -> Result<(), TransitionError> {
        let request = self.controller.begin_submit(Utc::now())?;
        let transport = self.backends.transport.clone();
        let timeout = self.timeout;
        info!(
            session_id = %self.session_id,
            idempotency_key = %request.idempotency_key,
            path = %request.path,
            "submitting donation"
        );
        self.spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.submit(&request)).await {
                Ok(result) => result,
                Err(_) => Err(GatewayError::timeout("submit-donation", timeout)),
            };
            Completion::Submission {
                idempotency_key: request.idempotency_key,
                result,
            }
        });
        Ok(())
    }

    // =========================================================================
    // Completions
    // =========================================================================

    fn spawn_uniqueness(&mut self, check: UniquenessCheck) {
        let shown = match check.field {
            Field::DonorEmail => mask_email(&check.value),
            _ => check.value.clone(),
        };
        debug!(
            session_id = %self.session_id,
            field = %check.field,
            token = %check.token,
            value = %shown,
            "dispatching uniqueness check"
        );
        let authority = self.backends.uniqueness.clone();
        let timeout = self.timeout;
        self.spawn(async move {
            let verdict = uniqueness::run_check(authority.as_ref(), &check, timeout).await;
            Completion::Uniqueness { check, verdict }
        });
    }

    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        self.in_flight += 1;
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let completion = task.await;
            let _ = sender.send(completion).await;
        });
    }

    /// Waits for the next completion. Returns `None` when nothing is in
    /// flight.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if self.in_flight == 0 {
            return None;
        }
        self.receiver.recv().await
    }

    /// Applies a completion to the form. Returns false when it was stale and
    /// discarded.
    pub fn apply(&mut self, completion: Completion) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Uniqueness { check, verdict } => {
                self.controller
                    .apply_uniqueness(check.field, check.token, verdict)
            }
            Completion::Extraction { token, resolved } => {
                self.controller.apply_extraction(token, resolved)
            }
            Completion::Submission {
                idempotency_key,
                result,
            } => match self.controller.finish_submit(&idempotency_key, result) {
                Some(Ok(())) => {
                    info!(
                        session_id = %self.session_id,
                        idempotency_key = %idempotency_key,
                        "donation completed"
                    );
                    true
                }
                Some(Err(err)) => {
                    log_submission_failure(&self.session_id, &idempotency_key, &err);
                    true
                }
                None => false,
            },
        }
    }

    /// Applies completions until nothing is in flight.
    pub async fn settle(&mut self) {
        while let Some(completion) = self.next_completion().await {
            self.apply(completion);
        }
    }

    /// Applies every completion that has already arrived, without waiting.
    pub fn try_process(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }
}

fn log_submission_failure(session_id: &Uuid, idempotency_key: &str, err: &SubmissionError) {
    match err {
        SubmissionError::FieldConflict { field, .. } => warn!(
            session_id = %session_id,
            idempotency_key = %idempotency_key,
            field = %field,
            "submission rejected for field"
        ),
        other => warn!(
            session_id = %session_id,
            idempotency_key = %idempotency_key,
            error = %other,
            "submission failed"
        ),
    }
}
