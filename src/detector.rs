//! Payment app classification
//!
//! Classification only ever moves forward: `Unknown` -> `Heuristic` (from the
//! file name) -> `Confirmed` (from the extraction service). Once confirmed,
//! later file-name guesses for the same evidence are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentApp {
    Bhim,
    GooglePay,
    Paytm,
    PhonePe,
    Other(String),
}

impl PaymentApp {
    pub fn display_name(&self) -> &str {
        match self {
            PaymentApp::Bhim => "BHIM",
            PaymentApp::GooglePay => "Google Pay",
            PaymentApp::Paytm => "Paytm",
            PaymentApp::PhonePe => "PhonePe",
            PaymentApp::Other(name) => name.as_str(),
        }
    }

    /// Maps a provider name as reported by the extraction service.
    pub fn from_reported(name: &str) -> Self {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "bhim" => PaymentApp::Bhim,
            "googlepay" | "gpay" => PaymentApp::GooglePay,
            "paytm" => PaymentApp::Paytm,
            "phonepe" => PaymentApp::PhonePe,
            _ => PaymentApp::Other(name.trim().to_string()),
        }
    }
}

impl fmt::Display for PaymentApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Screenshot layout reported alongside the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UiType {
    Standard,
    Type1,
    Type2,
    Other(String),
}

impl UiType {
    pub fn from_reported(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => UiType::Standard,
            Some(v) if v.eq_ignore_ascii_case("standard") => UiType::Standard,
            Some(v) if v.eq_ignore_ascii_case("type1") => UiType::Type1,
            Some(v) if v.eq_ignore_ascii_case("type2") => UiType::Type2,
            Some(v) => UiType::Other(v.to_string()),
        }
    }
}

impl fmt::Display for UiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiType::Standard => write!(f, "Standard"),
            UiType::Type1 => write!(f, "Type1"),
            UiType::Type2 => write!(f, "Type2"),
            UiType::Other(value) => write!(f, "{}", value),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DetectedApp {
    #[default]
    Unknown,
    Heuristic(PaymentApp),
    Confirmed(PaymentApp, UiType),
}

impl DetectedApp {
    pub fn app(&self) -> Option<&PaymentApp> {
        match self {
            DetectedApp::Unknown => None,
            DetectedApp::Heuristic(app) | DetectedApp::Confirmed(app, _) => Some(app),
        }
    }

    pub fn ui_type(&self) -> Option<&UiType> {
        match self {
            DetectedApp::Confirmed(_, ui_type) => Some(ui_type),
            _ => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, DetectedApp::Confirmed(..))
    }

    /// Applies the file-name guess unless the server already confirmed.
    pub fn refine_from_filename(&mut self, file_name: &str) {
        if self.is_confirmed() {
            return;
        }
        if let Some(app) = detect_from_filename(file_name) {
            *self = DetectedApp::Heuristic(app);
        }
    }

    pub fn confirm(&mut self, app: PaymentApp, ui_type: UiType) {
        *self = DetectedApp::Confirmed(app, ui_type);
    }

    pub fn transaction_id_label(&self) -> &'static str {
        transaction_id_label(self.app())
    }
}

// Checked in order, first match wins.
const FILENAME_KEYWORDS: &[(&str, &[&str])] = &[
    ("BHIM", &["bhim"]),
    ("Google Pay", &["google", "gpay", "g pay", "googlepay"]),
    ("Paytm", &["paytm"]),
    ("PhonePe", &["phonepe", "phone pe", "phonepay"]),
];

pub fn detect_from_filename(file_name: &str) -> Option<PaymentApp> {
    let lowered = file_name.to_lowercase();
    FILENAME_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(name, _)| PaymentApp::from_reported(name))
}

/// Label for the transaction id field given the detected provider.
pub fn transaction_id_label(app: Option<&PaymentApp>) -> &'static str {
    match app {
        Some(PaymentApp::PhonePe) => "PhonePe Transaction ID",
        Some(PaymentApp::GooglePay) => "Google Pay UPI ID",
        Some(PaymentApp::Paytm) => "Paytm Reference Number",
        Some(PaymentApp::Bhim) => "BHIM Transaction ID",
        Some(PaymentApp::Other(_)) | None => "Transaction ID",
    }
}
