//! Error taxonomy for the donation workflow
//!
//! Every user-visible problem is a [`FormError`] and knows the narrowest
//! scope it belongs to: a single field, the current stage, or the global
//! banner. Stage-machine misuse is reported separately as [`TransitionError`].

use crate::controller::Stage;
use crate::draft::Field;

/// Where an error is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    Field(Field),
    Stage,
    Banner,
}

/// Failures of the final submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    /// Transport failure or timeout; the request may be retried.
    #[error("{message}")]
    NetworkFailure { message: String },

    /// Backend rejected a specific field value.
    #[error("{message}")]
    FieldConflict { field: Field, message: String },

    /// Backend error that maps to no field.
    #[error("{message}")]
    ServerError { message: String },
}

impl SubmissionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::NetworkFailure { .. } => true,
            SubmissionError::FieldConflict { .. } => false,
            SubmissionError::ServerError { .. } => true,
        }
    }
}

/// User-visible problem attached to the most specific scope available.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormError {
    /// Field format or presence check failed locally.
    #[error("{message}")]
    LocalValidation { field: Field, message: String },

    /// Backend reports the value is already on record.
    #[error("{message}")]
    UniquenessConflict { field: Field, message: String },

    /// Extraction could not fill the transaction id; asks for manual entry.
    #[error("{message}")]
    ExtractionGuidance { message: String },

    #[error("Invalid CAPTCHA")]
    CaptchaMismatch,

    /// Stage cannot advance; shown above the form.
    #[error("{message}")]
    Incomplete { message: String },

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

impl FormError {
    pub fn local(field: Field, message: impl Into<String>) -> Self {
        FormError::LocalValidation {
            field,
            message: message.into(),
        }
    }

    pub fn conflict(field: Field, message: impl Into<String>) -> Self {
        FormError::UniquenessConflict {
            field,
            message: message.into(),
        }
    }

    pub fn field(&self) -> Option<Field> {
        match self {
            FormError::LocalValidation { field, .. } => Some(*field),
            FormError::UniquenessConflict { field, .. } => Some(*field),
            FormError::ExtractionGuidance { .. } => Some(Field::TransactionId),
            FormError::CaptchaMismatch => Some(Field::Captcha),
            FormError::Incomplete { .. } => None,
            FormError::Submission(SubmissionError::FieldConflict { field, .. }) => Some(*field),
            FormError::Submission(_) => None,
        }
    }

    pub fn scope(&self) -> ErrorScope {
        match (self.field(), self) {
            (Some(field), _) => ErrorScope::Field(field),
            (None, FormError::Incomplete { .. }) => ErrorScope::Stage,
            (None, _) => ErrorScope::Banner,
        }
    }

    /// Whether the error prevents advancing or submitting.
    pub fn is_blocking(&self) -> bool {
        match self {
            FormError::LocalValidation { .. } => true,
            FormError::UniquenessConflict { .. } => true,
            FormError::ExtractionGuidance { .. } => false,
            FormError::CaptchaMismatch => true,
            FormError::Incomplete { .. } => true,
            FormError::Submission(err) => !err.is_retryable(),
        }
    }
}

/// Rejected controller operation. The controller state is unchanged except
/// for any field errors it recorded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("validation failed for {fields:?}")]
    ValidationFailed { fields: Vec<Field> },

    #[error("field {field} is not editable while {stage}")]
    NotEditable { field: Field, stage: Stage },

    #[error("field {0} is derived and cannot be edited")]
    ReadOnly(Field),

    #[error("captcha does not match")]
    CaptchaMismatch,

    #[error("submission preconditions not met for {fields:?}")]
    PreconditionsUnmet { fields: Vec<Field> },

    #[error("a submission is already in flight")]
    SubmissionInFlight,
}
