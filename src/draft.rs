//! Donation draft and payment evidence records
//!
//! The draft is the in-progress donor record; the evidence is the uploaded
//! payment screenshot together with what is known about it. Both are owned by
//! the form controller and never mutated elsewhere.

use crate::detector::DetectedApp;
use crate::error::FormError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Form fields addressable by edits and error routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    DonorName,
    DonorEmail,
    PhoneNumber,
    ParcelName,
    FoodCount,
    TotalAmount,
    Birthdate,
    #[serde(rename = "instagramID")]
    InstagramId,
    TransactionId,
    Captcha,
    File,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::DonorName => "donorName",
            Field::DonorEmail => "donorEmail",
            Field::PhoneNumber => "phoneNumber",
            Field::ParcelName => "parcelName",
            Field::FoodCount => "foodCount",
            Field::TotalAmount => "totalAmount",
            Field::Birthdate => "birthdate",
            Field::InstagramId => "instagramID",
            Field::TransactionId => "transactionId",
            Field::Captcha => "captcha",
            Field::File => "file",
        }
    }

    /// Fields edited on the entry stage.
    pub fn is_entry_field(&self) -> bool {
        matches!(
            self,
            Field::DonorName
                | Field::DonorEmail
                | Field::PhoneNumber
                | Field::ParcelName
                | Field::FoodCount
                | Field::Birthdate
                | Field::InstagramId
        )
    }

    /// Fields that only exist while the payment stage is shown.
    pub fn is_payment_field(&self) -> bool {
        matches!(self, Field::TransactionId | Field::Captcha | Field::File)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown form field: {0}")]
pub struct UnknownField(pub String);

impl FromStr for Field {
    type Err = UnknownField;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "donorName" => Ok(Field::DonorName),
            "donorEmail" => Ok(Field::DonorEmail),
            "phoneNumber" => Ok(Field::PhoneNumber),
            "parcelName" => Ok(Field::ParcelName),
            "foodCount" => Ok(Field::FoodCount),
            "totalAmount" => Ok(Field::TotalAmount),
            "birthdate" => Ok(Field::Birthdate),
            "instagramID" | "instagramId" => Ok(Field::InstagramId),
            "transactionId" => Ok(Field::TransactionId),
            "captcha" => Ok(Field::Captcha),
            "file" => Ok(Field::File),
            other => Err(UnknownField(other.to_string())),
        }
    }
}

/// In-progress donor record.
///
/// `food_count` keeps the raw text as typed so that non-numeric input can be
/// represented; `total_amount` is derived from it and never set directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationDraft {
    pub donor_name: String,
    pub donor_email: String,
    pub phone_number: String,
    pub parcel_name: String,
    pub food_count: String,
    pub total_amount: Option<u64>,
    pub birthdate: String,
    #[serde(rename = "instagramID")]
    pub instagram_id: String,
    pub transaction_id: String,
    #[serde(rename = "captcha")]
    pub captcha_input: String,
}

impl DonationDraft {
    /// Current text of a field. The derived total renders empty when cleared.
    pub fn value(&self, field: Field) -> String {
        match field {
            Field::DonorName => self.donor_name.clone(),
            Field::DonorEmail => self.donor_email.clone(),
            Field::PhoneNumber => self.phone_number.clone(),
            Field::ParcelName => self.parcel_name.clone(),
            Field::FoodCount => self.food_count.clone(),
            Field::TotalAmount => self
                .total_amount
                .map(|amount| amount.to_string())
                .unwrap_or_default(),
            Field::Birthdate => self.birthdate.clone(),
            Field::InstagramId => self.instagram_id.clone(),
            Field::TransactionId => self.transaction_id.clone(),
            Field::Captcha => self.captcha_input.clone(),
            Field::File => String::new(),
        }
    }

    /// Stores a raw value. Returns false for fields that are not text slots.
    pub(crate) fn store(&mut self, field: Field, value: String) -> bool {
        let slot = match field {
            Field::DonorName => &mut self.donor_name,
            Field::DonorEmail => &mut self.donor_email,
            Field::PhoneNumber => &mut self.phone_number,
            Field::ParcelName => &mut self.parcel_name,
            Field::FoodCount => &mut self.food_count,
            Field::Birthdate => &mut self.birthdate,
            Field::InstagramId => &mut self.instagram_id,
            Field::TransactionId => &mut self.transaction_id,
            Field::Captcha => &mut self.captcha_input,
            Field::TotalAmount | Field::File => return false,
        };
        *slot = value;
        true
    }

    /// Multipart text fields in the order the donation endpoint expects.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        [
            Field::DonorName,
            Field::DonorEmail,
            Field::PhoneNumber,
            Field::ParcelName,
            Field::FoodCount,
            Field::TotalAmount,
            Field::Birthdate,
            Field::InstagramId,
            Field::Captcha,
            Field::TransactionId,
        ]
        .into_iter()
        .map(|field| (field.as_str(), self.value(field)))
        .collect()
    }
}

/// Field-level errors, one per field, most recent wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    entries: BTreeMap<Field, FormError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an error to the field it is scoped to. Errors without a field
    /// scope are ignored here; they belong in the banner.
    pub fn insert(&mut self, error: FormError) {
        if let Some(field) = error.field() {
            self.entries.insert(field, error);
        }
    }

    pub fn clear(&mut self, field: Field) -> Option<FormError> {
        self.entries.remove(&field)
    }

    pub fn clear_where(&mut self, predicate: impl Fn(Field) -> bool) {
        self.entries.retain(|field, _| !predicate(*field));
    }

    pub fn get(&self, field: Field) -> Option<&FormError> {
        self.entries.get(&field)
    }

    pub fn message(&self, field: Field) -> Option<String> {
        self.entries.get(&field).map(|error| error.to_string())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.entries.contains_key(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn fields(&self) -> Vec<Field> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FormError)> {
        self.entries.iter().map(|(field, error)| (*field, error))
    }

    pub fn has_blocking(&self) -> bool {
        self.entries.values().any(FormError::is_blocking)
    }
}

const IMAGE_EXTENSIONS: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("heic", "image/heic"),
];

/// Uploaded payment screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl PaymentFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    /// Builds a file whose content type is inferred from its extension.
    pub fn from_named_bytes(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = Self::guess_content_type(&file_name).map(str::to_string);
        Self {
            file_name,
            content_type,
            bytes,
        }
    }

    pub fn extension(&self) -> Option<String> {
        let (stem, ext) = self.file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_lowercase())
    }

    pub fn is_image(&self) -> bool {
        match self.content_type.as_deref() {
            Some(content_type) => content_type.trim().to_lowercase().starts_with("image/"),
            None => Self::guess_content_type(&self.file_name).is_some(),
        }
    }

    /// Copy carrying a different file name, same bytes and type.
    pub fn renamed(&self, file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: self.content_type.clone(),
            bytes: self.bytes.clone(),
        }
    }

    fn guess_content_type(file_name: &str) -> Option<&'static str> {
        let (_, ext) = file_name.rsplit_once('.')?;
        let ext = ext.to_lowercase();
        IMAGE_EXTENSIONS
            .iter()
            .find(|(known, _)| *known == ext)
            .map(|(_, content_type)| *content_type)
    }
}

/// Evidence attached during the payment stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvidence {
    pub file: PaymentFile,
    pub detected_app: DetectedApp,
    pub extracted_transaction_id: Option<String>,
    pub manual_entry_required: bool,
    /// User-facing note produced by the last extraction outcome.
    pub guidance: Option<String>,
}

impl PaymentEvidence {
    pub fn new(file: PaymentFile) -> Self {
        Self {
            file,
            detected_app: DetectedApp::Unknown,
            extracted_transaction_id: None,
            manual_entry_required: false,
            guidance: None,
        }
    }
}
