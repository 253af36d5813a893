//! Field format and derived-value rules
//!
//! Pure functions only. Keystroke-level checks report format problems for
//! non-empty values; presence is checked when the entry stage is confirmed.

use crate::draft::{DonationDraft, Field, ValidationErrors};
use crate::error::FormError;
use chrono::{NaiveDate, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Fields that must be non-empty before the entry stage can be confirmed.
pub const REQUIRED_FIELDS: [Field; 6] = [
    Field::DonorName,
    Field::DonorEmail,
    Field::PhoneNumber,
    Field::ParcelName,
    Field::FoodCount,
    Field::Birthdate,
];

pub const PHONE_DIGITS: usize = 10;

pub const REQUIRED_MESSAGE: &str = "This field is required";
pub const PHONE_MESSAGE: &str = "Phone number must be 10 digits";
pub const EMAIL_MESSAGE: &str = "Please enter a valid .com email address";
pub const FOOD_COUNT_MESSAGE: &str = "Food count must be a positive whole number";
pub const BIRTHDATE_MESSAGE: &str = "Please enter a valid birthdate";

// Domain must end in the literal ".com".
static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.com$").expect("email pattern is a valid regex")
});

/// Keeps digits only, truncated to [`PHONE_DIGITS`].
pub fn sanitize_phone(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(PHONE_DIGITS)
        .collect()
}

pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == PHONE_DIGITS && phone.chars().all(|c| c.is_ascii_digit())
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

/// Positive food count, or `None` for empty, non-numeric or non-positive input.
pub fn parse_food_count(raw: &str) -> Option<u64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|count| *count > 0)
        .map(|count| count as u64)
}

/// `food_count × unit_price`, cleared whenever the count is not positive.
pub fn total_amount(raw_food_count: &str, unit_price: u64) -> Option<u64> {
    parse_food_count(raw_food_count).and_then(|count| count.checked_mul(unit_price))
}

/// Birthdate as entered by a date input (`YYYY-MM-DD`), not in the future.
pub fn is_valid_birthdate(raw: &str) -> bool {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|date| date <= Utc::now().date_naive())
        .unwrap_or(false)
}

pub fn missing_required(draft: &DonationDraft) -> Vec<Field> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| draft.value(*field).trim().is_empty())
        .collect()
}

pub fn required_fields_present(draft: &DonationDraft) -> bool {
    missing_required(draft).is_empty()
}

/// Format check for a single field. Empty values pass; presence is checked
/// by [`validate_entry`].
pub fn validate_field(field: Field, draft: &DonationDraft) -> Option<FormError> {
    let value = draft.value(field);
    if value.trim().is_empty() {
        return None;
    }

    let message = match field {
        Field::PhoneNumber if !is_valid_phone(&value) => PHONE_MESSAGE,
        Field::DonorEmail if !is_valid_email(&value) => EMAIL_MESSAGE,
        Field::FoodCount if parse_food_count(&value).is_none() => FOOD_COUNT_MESSAGE,
        Field::Birthdate if !is_valid_birthdate(&value) => BIRTHDATE_MESSAGE,
        _ => return None,
    };
    Some(FormError::local(field, message))
}

/// Full entry-stage check: presence of every required field plus every
/// per-field format rule.
pub fn validate_entry(draft: &DonationDraft) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    for field in missing_required(draft) {
        errors.insert(FormError::local(field, REQUIRED_MESSAGE));
    }
    for field in [
        Field::PhoneNumber,
        Field::DonorEmail,
        Field::FoodCount,
        Field::Birthdate,
    ] {
        if let Some(error) = validate_field(field, draft) {
            errors.insert(error);
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_draft() -> DonationDraft {
        DonationDraft {
            donor_name: "Asha Rao".to_string(),
            donor_email: "asha@example.com".to_string(),
            phone_number: "9876543210".to_string(),
            parcel_name: "Lunch box".to_string(),
            food_count: "3".to_string(),
            total_amount: Some(75),
            birthdate: "1990-04-12".to_string(),
            ..DonationDraft::default()
        }
    }

    #[test]
    fn email_requires_literal_com_suffix() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last@mail.example.com"));
        assert!(!is_valid_email("a@b.org"));
        assert!(!is_valid_email("a@b.co.in"));
        assert!(!is_valid_email("a@ccc"));
        assert!(!is_valid_email("a@ocm"));
        assert!(!is_valid_email("a@b.mco"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("@b.com"));
    }

    #[test]
    fn phone_is_digits_only_and_capped() {
        assert_eq!(sanitize_phone("(987) 654-3210"), "9876543210");
        assert_eq!(sanitize_phone("98765432109999"), "9876543210");
        assert_eq!(sanitize_phone("abc"), "");

        let mut value = String::new();
        for key in "+91 98765-43210 ext 7".chars() {
            value.push(key);
            value = sanitize_phone(&value);
            assert!(value.len() <= PHONE_DIGITS);
            assert!(value.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn phone_validity_needs_exactly_ten_digits() {
        assert!(is_valid_phone("9876543210"));
        assert!(!is_valid_phone("987654321"));
        assert!(!is_valid_phone("98765432ab"));
    }

    #[test]
    fn total_amount_tracks_positive_counts_only() {
        for price in [20, 25, 80, 200] {
            for n in 1..=50u64 {
                assert_eq!(total_amount(&n.to_string(), price), Some(n * price));
            }
        }
        assert_eq!(total_amount("0", 25), None);
        assert_eq!(total_amount("-4", 25), None);
        assert_eq!(total_amount("three", 25), None);
        assert_eq!(total_amount("", 25), None);
    }

    #[test]
    fn entry_validation_reports_missing_and_malformed_fields() {
        let mut draft = complete_draft();
        assert!(validate_entry(&draft).is_empty());

        draft.parcel_name.clear();
        draft.phone_number = "12345".to_string();
        let errors = validate_entry(&draft);
        assert_eq!(
            errors.message(Field::ParcelName).as_deref(),
            Some(REQUIRED_MESSAGE)
        );
        assert_eq!(
            errors.message(Field::PhoneNumber).as_deref(),
            Some(PHONE_MESSAGE)
        );
        assert!(!required_fields_present(&draft));
    }

    #[test]
    fn instagram_id_is_optional() {
        let draft = complete_draft();
        assert!(draft.instagram_id.is_empty());
        assert!(required_fields_present(&draft));
    }

    #[test]
    fn future_birthdate_is_rejected() {
        assert!(is_valid_birthdate("2001-02-03"));
        assert!(!is_valid_birthdate("2999-01-01"));
        assert!(!is_valid_birthdate("03/02/2001"));
    }
}
