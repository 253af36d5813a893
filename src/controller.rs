//! Form state controller
//!
//! Owns the draft, the payment evidence and the captcha, and moves the form
//! through `Entry -> Confirmed -> Submitting -> Done`. Backend work is never
//! awaited here: operations that need the backend hand back a request
//! (uniqueness check, extraction ticket, submission request) and the result
//! is applied later through the matching `apply_*` / `finish_*` method, which
//! discards anything that is no longer the latest request.

use crate::backend::error::GatewayResult;
use crate::campaign::CampaignConfig;
use crate::captcha::CaptchaChallenge;
use crate::detector::DetectedApp;
use crate::draft::{DonationDraft, Field, PaymentEvidence, PaymentFile, ValidationErrors};
use crate::error::{FormError, SubmissionError, TransitionError};
use crate::extraction::{ExtractionCoordinator, ExtractionOutcome, ExtractionTicket, ResolvedExtraction};
use crate::sequence::RequestToken;
use crate::submission::{self, SubmissionCoordinator, SubmissionReply, SubmissionRequest};
use crate::uniqueness::{UniquenessCheck, UniquenessGate, UniquenessVerdict};
use crate::validation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

pub const REQUIRED_FIELDS_MESSAGE: &str = "Please fill in all required fields";
pub const IMAGE_REQUIRED_MESSAGE: &str = "Please upload an image file";
pub const FILE_MISSING_MESSAGE: &str = "Please select a file";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Donor details being entered
    Entry,
    /// Details confirmed, payment evidence and captcha pending
    Confirmed,
    /// Final request in flight
    Submitting,
    /// Donation accepted
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Entry => write!(f, "entry"),
            Stage::Confirmed => write!(f, "confirmed"),
            Stage::Submitting => write!(f, "submitting"),
            Stage::Done => write!(f, "done"),
        }
    }
}

impl Stage {
    pub fn valid_transitions(&self) -> Vec<Stage> {
        match self {
            Stage::Entry => vec![Stage::Confirmed],
            Stage::Confirmed => vec![Stage::Entry, Stage::Submitting],
            Stage::Submitting => vec![Stage::Done, Stage::Confirmed],
            Stage::Done => vec![Stage::Entry],
        }
    }

    pub fn can_transition_to(&self, target: Stage) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done)
    }
}

/// Notifications drained by whoever renders the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormEvent {
    StageChanged { from: Stage, to: Stage },
    /// Donation accepted; the draft has been reset.
    Completed { idempotency_key: String },
}

pub struct FormStateController {
    campaign: CampaignConfig,
    stage: Stage,
    draft: DonationDraft,
    errors: ValidationErrors,
    banner: Option<FormError>,
    captcha: Option<CaptchaChallenge>,
    evidence: Option<PaymentEvidence>,
    uniqueness: UniquenessGate,
    extraction: ExtractionCoordinator,
    submission: SubmissionCoordinator,
    events: Vec<FormEvent>,
}

impl FormStateController {
    pub fn new(campaign: CampaignConfig) -> Self {
        Self {
            campaign,
            stage: Stage::Entry,
            draft: DonationDraft::default(),
            errors: ValidationErrors::new(),
            banner: None,
            captcha: None,
            evidence: None,
            uniqueness: UniquenessGate::new(),
            extraction: ExtractionCoordinator::new(),
            submission: SubmissionCoordinator::new(),
            events: Vec::new(),
        }
    }

    // =========================================================================
    // Read access
    // =========================================================================

    pub fn campaign(&self) -> &CampaignConfig {
        &self.campaign
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn draft(&self) -> &DonationDraft {
        &self.draft
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    pub fn error_message(&self, field: Field) -> Option<String> {
        self.errors.message(field)
    }

    pub fn banner(&self) -> Option<&FormError> {
        self.banner.as_ref()
    }

    pub fn captcha_code(&self) -> Option<&str> {
        self.captcha.as_ref().map(CaptchaChallenge::code)
    }

    pub fn evidence(&self) -> Option<&PaymentEvidence> {
        self.evidence.as_ref()
    }

    pub fn detected_app(&self) -> DetectedApp {
        self.evidence
            .as_ref()
            .map(|evidence| evidence.detected_app.clone())
            .unwrap_or_default()
    }

    pub fn transaction_id_label(&self) -> &'static str {
        self.evidence
            .as_ref()
            .map(|evidence| evidence.detected_app.transaction_id_label())
            .unwrap_or_else(|| DetectedApp::Unknown.transaction_id_label())
    }

    pub fn is_processing_image(&self) -> bool {
        self.extraction.is_processing()
    }

    pub fn is_submitting(&self) -> bool {
        self.stage == Stage::Submitting
    }

    /// Whether a submit action would currently be accepted.
    pub fn can_submit(&self) -> bool {
        self.stage == Stage::Confirmed && !self.submission.is_in_flight()
    }

    pub fn take_events(&mut self) -> Vec<FormEvent> {
        std::mem::take(&mut self.events)
    }

    // =========================================================================
    // Stage transitions
    // =========================================================================

    fn transition(&mut self, target: Stage) -> Result<(), TransitionError> {
        if !self.stage.can_transition_to(target) {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: target,
            });
        }
        info!(
            campaign = %self.campaign.slug,
            from_stage = %self.stage,
            to_stage = %target,
            "form stage transitioned"
        );
        self.events.push(FormEvent::StageChanged {
            from: self.stage,
            to: target,
        });
        self.stage = target;
        Ok(())
    }

    fn require_stage(&self, target: Stage) -> Result<(), TransitionError> {
        if self.stage.can_transition_to(target) {
            Ok(())
        } else if self.stage == Stage::Submitting && target == Stage::Submitting {
            Err(TransitionError::SubmissionInFlight)
        } else {
            Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: target,
            })
        }
    }

    /// Entry -> Confirmed when every required field is present and every
    /// field check passes. Issues a fresh captcha and clears prior evidence.
    pub fn confirm(&mut self) -> Result<(), TransitionError> {
        if self.stage != Stage::Entry {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: Stage::Confirmed,
            });
        }

        let local = validation::validate_entry(&self.draft);
        let mut failed = local.fields();
        for (field, error) in self.errors.iter() {
            if field.is_entry_field() && error.is_blocking() && !failed.contains(&field) {
                failed.push(field);
            }
        }

        if !failed.is_empty() {
            for (_, error) in local.iter() {
                self.errors.insert(error.clone());
            }
            if !validation::required_fields_present(&self.draft) {
                self.banner = Some(FormError::Incomplete {
                    message: REQUIRED_FIELDS_MESSAGE.to_string(),
                });
            }
            failed.sort();
            debug!(fields = ?failed, "confirm rejected");
            return Err(TransitionError::ValidationFailed { fields: failed });
        }

        self.banner = None;
        self.enter_payment_stage();
        self.transition(Stage::Confirmed)
    }

    /// Confirmed -> Entry. Discards the evidence and the captcha; the next
    /// confirm issues a new one.
    pub fn back(&mut self) -> Result<(), TransitionError> {
        if self.stage != Stage::Confirmed {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: Stage::Entry,
            });
        }
        self.leave_payment_stage();
        self.transition(Stage::Entry)
    }

    /// Done -> Entry with a blank draft.
    pub fn start_over(&mut self) -> Result<(), TransitionError> {
        if self.stage != Stage::Done {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: Stage::Entry,
            });
        }
        self.transition(Stage::Entry)
    }

    fn enter_payment_stage(&mut self) {
        self.leave_payment_stage();
        self.captcha = Some(CaptchaChallenge::generate());
    }

    fn leave_payment_stage(&mut self) {
        self.captcha = None;
        self.evidence = None;
        self.draft.captcha_input.clear();
        self.draft.transaction_id.clear();
        self.errors.clear_where(|field| field.is_payment_field());
        self.extraction.invalidate();
        self.uniqueness.invalidate(Field::TransactionId);
        self.submission.forget_retry_key();
    }

    fn reset_after_completion(&mut self) {
        self.draft = DonationDraft::default();
        self.errors = ValidationErrors::new();
        self.banner = None;
        self.captcha = None;
        self.evidence = None;
        self.extraction.invalidate();
        self.uniqueness.invalidate(Field::DonorEmail);
        self.uniqueness.invalidate(Field::TransactionId);
        self.submission.reset();
    }

    // =========================================================================
    // Field edits
    // =========================================================================

    fn check_editable(&self, field: Field) -> Result<(), TransitionError> {
        if field == Field::TotalAmount {
            return Err(TransitionError::ReadOnly(field));
        }
        let editable = match self.stage {
            Stage::Entry => field.is_entry_field(),
            Stage::Confirmed => matches!(field, Field::TransactionId | Field::Captcha),
            Stage::Submitting | Stage::Done => false,
        };
        if editable {
            Ok(())
        } else {
            Err(TransitionError::NotEditable {
                field,
                stage: self.stage,
            })
        }
    }

    /// Applies one edit. Returns the uniqueness check to run, if the edit
    /// calls for one.
    pub fn set_field(
        &mut self,
        field: Field,
        value: &str,
    ) -> Result<Option<UniquenessCheck>, TransitionError> {
        self.check_editable(field)?;

        self.submission.forget_retry_key();
        self.errors.clear(field);
        if matches!(
            self.banner.as_ref().map(FormError::scope),
            Some(crate::error::ErrorScope::Stage)
        ) {
            self.banner = None;
        }

        let stored = match field {
            Field::PhoneNumber => validation::sanitize_phone(value),
            _ => value.to_string(),
        };
        self.draft.store(field, stored);

        if field == Field::FoodCount {
            self.draft.total_amount =
                validation::total_amount(&self.draft.food_count, self.campaign.unit_price);
        }

        if let Some(error) = validation::validate_field(field, &self.draft) {
            self.errors.insert(error);
        }

        let check = match field {
            Field::DonorEmail => {
                let email = self.draft.donor_email.clone();
                if !email.is_empty() && validation::is_valid_email(&email) {
                    self.uniqueness.request(field, &email)
                } else {
                    self.uniqueness.invalidate(field);
                    None
                }
            }
            Field::TransactionId => {
                let transaction_id = self.draft.transaction_id.trim().to_string();
                if transaction_id.is_empty() {
                    self.uniqueness.invalidate(field);
                    None
                } else {
                    self.uniqueness.request(field, &transaction_id)
                }
            }
            _ => None,
        };
        Ok(check)
    }

    /// Applies a uniqueness verdict. Returns false when the response was
    /// stale and discarded.
    pub fn apply_uniqueness(
        &mut self,
        field: Field,
        token: RequestToken,
        verdict: UniquenessVerdict,
    ) -> bool {
        if !self.uniqueness.accept(field, token) {
            debug!(field = %field, token = %token, "discarding stale uniqueness response");
            return false;
        }

        match verdict {
            UniquenessVerdict::Conflict(message) => {
                self.errors.insert(FormError::conflict(field, message));
            }
            UniquenessVerdict::Unique => {
                if matches!(
                    self.errors.get(field),
                    Some(FormError::UniquenessConflict { .. })
                ) {
                    self.errors.clear(field);
                }
            }
            UniquenessVerdict::Unknown => {}
        }
        true
    }

    // =========================================================================
    // Payment evidence
    // =========================================================================

    /// Attaches a payment screenshot. Returns the extraction ticket to run;
    /// `None` when the file was rejected.
    pub fn select_file(
        &mut self,
        file: PaymentFile,
    ) -> Result<Option<ExtractionTicket>, TransitionError> {
        if self.stage != Stage::Confirmed {
            return Err(TransitionError::NotEditable {
                field: Field::File,
                stage: self.stage,
            });
        }

        self.submission.forget_retry_key();
        self.errors.clear(Field::File);
        if !file.is_image() {
            warn!(file_name = %file.file_name, "rejected non-image payment evidence");
            self.evidence = None;
            self.extraction.invalidate();
            self.errors
                .insert(FormError::local(Field::File, IMAGE_REQUIRED_MESSAGE));
            return Ok(None);
        }

        if matches!(
            self.errors.get(Field::TransactionId),
            Some(FormError::ExtractionGuidance { .. })
                | Some(FormError::UniquenessConflict { .. })
        ) {
            self.errors.clear(Field::TransactionId);
        }

        let mut evidence = PaymentEvidence::new(file);
        evidence
            .detected_app
            .refine_from_filename(&evidence.file.file_name);
        let ticket = self.extraction.begin(&evidence.file);
        info!(
            file_name = %evidence.file.file_name,
            detected = ?evidence.detected_app,
            token = %ticket.token,
            "payment evidence selected"
        );
        self.evidence = Some(evidence);
        Ok(Some(ticket))
    }

    /// Clears the selected file, e.g. when the picker was dismissed empty.
    pub fn clear_file(&mut self) -> Result<(), TransitionError> {
        if self.stage != Stage::Confirmed {
            return Err(TransitionError::NotEditable {
                field: Field::File,
                stage: self.stage,
            });
        }
        self.submission.forget_retry_key();
        self.evidence = None;
        self.extraction.invalidate();
        self.errors
            .insert(FormError::local(Field::File, FILE_MISSING_MESSAGE));
        Ok(())
    }

    /// Applies an extraction outcome. Returns false when it belongs to a file
    /// that is no longer selected.
    pub fn apply_extraction(&mut self, token: RequestToken, resolved: ResolvedExtraction) -> bool {
        if !self.extraction.accept(token) {
            debug!(token = %token, "discarding stale extraction outcome");
            return false;
        }
        let Some(evidence) = self.evidence.as_mut() else {
            return false;
        };

        if let Some((app, ui_type)) = resolved.confirmed {
            evidence.detected_app.confirm(app, ui_type);
        }

        match resolved.outcome {
            ExtractionOutcome::Extracted {
                transaction_id,
                guidance,
            } => {
                self.draft.transaction_id = transaction_id.clone();
                self.errors.clear(Field::TransactionId);
                evidence.extracted_transaction_id = Some(transaction_id);
                evidence.manual_entry_required = false;
                evidence.guidance = Some(guidance);
            }
            ExtractionOutcome::NeedsManualEntry { reason, guidance } => {
                self.draft.transaction_id.clear();
                self.errors
                    .insert(FormError::ExtractionGuidance { message: reason });
                evidence.extracted_transaction_id = None;
                evidence.manual_entry_required = true;
                evidence.guidance = Some(guidance);
            }
            ExtractionOutcome::Conflict { message } => {
                self.errors
                    .insert(FormError::conflict(Field::TransactionId, message));
                evidence.extracted_transaction_id = None;
                evidence.guidance = None;
            }
            ExtractionOutcome::TransientFailure { guidance } => {
                self.draft.transaction_id.clear();
                self.errors.insert(FormError::ExtractionGuidance {
                    message: crate::extraction::MANUAL_ENTRY_MESSAGE.to_string(),
                });
                evidence.extracted_transaction_id = None;
                evidence.manual_entry_required = true;
                evidence.guidance = Some(guidance);
            }
        }
        // The field value changed under any typed-in check still running.
        self.uniqueness.invalidate(Field::TransactionId);
        true
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Verifies the captcha and the payment preconditions, then moves to
    /// `Submitting` and returns the request to dispatch. A second call while
    /// a request is in flight is rejected without side effects.
    pub fn begin_submit(
        &mut self,
        submitted_at: DateTime<Utc>,
    ) -> Result<SubmissionRequest, TransitionError> {
        self.require_stage(Stage::Submitting)?;
        if self.submission.is_in_flight() {
            return Err(TransitionError::SubmissionInFlight);
        }
        self.banner = None;

        let Some(captcha) = self.captcha.as_ref() else {
            return Err(TransitionError::InvalidTransition {
                from: self.stage,
                to: Stage::Submitting,
            });
        };
        if captcha.verify(&self.draft.captcha_input).is_err() {
            self.errors.insert(FormError::CaptchaMismatch);
            return Err(TransitionError::CaptchaMismatch);
        }

        let problems = submission::missing_preconditions(&self.draft, self.evidence.as_ref());
        let mut unmet: Vec<Field> = problems.iter().filter_map(FormError::field).collect();
        for problem in problems {
            self.errors.insert(problem);
        }
        for (field, error) in self.errors.iter() {
            if error.is_blocking() && !unmet.contains(&field) {
                unmet.push(field);
            }
        }
        if !unmet.is_empty() {
            unmet.sort();
            debug!(fields = ?unmet, "submission preconditions not met");
            return Err(TransitionError::PreconditionsUnmet { fields: unmet });
        }

        let (Some(captcha), Some(evidence)) = (self.captcha.as_ref(), self.evidence.as_ref())
        else {
            return Err(TransitionError::PreconditionsUnmet {
                fields: vec![Field::File],
            });
        };
        let request = self.submission.begin(
            &self.campaign,
            &self.draft,
            captcha.code(),
            evidence,
            submitted_at,
        )?;
        self.transition(Stage::Submitting)?;
        Ok(request)
    }

    /// Routes the reply of the in-flight submission. Returns `None` when the
    /// reply does not belong to it.
    pub fn finish_submit(
        &mut self,
        idempotency_key: &str,
        result: GatewayResult<SubmissionReply>,
    ) -> Option<Result<(), SubmissionError>> {
        if self.stage != Stage::Submitting {
            return None;
        }
        let routed = self.submission.finish(idempotency_key, result)?;

        match &routed {
            Ok(()) => {
                info!(
                    campaign = %self.campaign.slug,
                    idempotency_key = %idempotency_key,
                    "donation accepted"
                );
                // Dropping the challenge spends the code.
                self.reset_after_completion();
                let moved = self.transition(Stage::Done);
                debug_assert!(moved.is_ok(), "submitting must be able to complete");
                self.events.push(FormEvent::Completed {
                    idempotency_key: idempotency_key.to_string(),
                });
            }
            Err(err) => {
                warn!(
                    idempotency_key = %idempotency_key,
                    error = %err,
                    retryable = err.is_retryable(),
                    "donation submission rejected"
                );
                let error = FormError::from(err.clone());
                if error.field().is_some() {
                    self.errors.insert(error);
                } else {
                    self.banner = Some(error);
                }
                let moved = self.transition(Stage::Confirmed);
                debug_assert!(moved.is_ok(), "failed submission must return to confirmed");
            }
        }
        Some(routed)
    }
}
