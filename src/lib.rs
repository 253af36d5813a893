//! Donation intake workflow
//!
//! Collects donor details for a campaign, verifies payment evidence and
//! submits the donation exactly once. Campaign forms share one parametrized
//! workflow driven by [`campaign::CampaignConfig`].

pub mod backend;
pub mod campaign;
pub mod captcha;
pub mod config;
pub mod controller;
pub mod detector;
pub mod draft;
pub mod error;
pub mod extraction;
pub mod gallery;
pub mod logging;
pub mod sequence;
pub mod session;
pub mod submission;
pub mod uniqueness;
pub mod validation;

pub use campaign::CampaignConfig;
pub use controller::{FormEvent, FormStateController, Stage};
pub use draft::{DonationDraft, Field, PaymentEvidence, PaymentFile, ValidationErrors};
pub use error::{ErrorScope, FormError, TransitionError};
pub use session::{Backends, Completion, DonationSession};
