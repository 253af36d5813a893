//! Backend collaborators
//!
//! The workflow talks to the donation backend only through the traits in
//! `uniqueness`, `extraction`, `submission` and `gallery`. The reqwest client
//! here implements all of them over HTTP.

#[cfg(feature = "http-backend")]
pub mod client;
pub mod error;

#[cfg(feature = "http-backend")]
pub use client::{DonationApiClient, DonationApiConfig};
pub use error::{GatewayError, GatewayResult};
