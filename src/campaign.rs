//! Campaign configuration
//!
//! All campaign forms share one workflow; they differ only in imagery, unit
//! price and backend paths.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub slug: String,
    pub title: String,
    /// Price of one parcel in whole currency units.
    pub unit_price: u64,
    pub imagery: String,
    pub qr_code: String,
    /// Path of the final multipart submission.
    pub submit_path: String,
    /// Path prefix of the email lookup; the email is appended as a segment.
    pub check_email_path: String,
}

pub const DEFAULT_CAMPAIGN: &str = "homeless";

impl CampaignConfig {
    pub fn homeless() -> Self {
        Self {
            slug: "homeless".to_string(),
            title: "Feed the homeless".to_string(),
            unit_price: 25,
            imagery: "homeless.jpg".to_string(),
            qr_code: "munni qrcode.jpg".to_string(),
            submit_path: "/donate".to_string(),
            check_email_path: "/api/check-email".to_string(),
        }
    }

    pub fn stray_dog() -> Self {
        Self {
            slug: "stray-dog".to_string(),
            title: "Feed a stray dog".to_string(),
            unit_price: 20,
            imagery: "Feedastraydog.jpg".to_string(),
            qr_code: "qr code.jpg".to_string(),
            submit_path: "/api/straydog/donate".to_string(),
            check_email_path: "/api/straydog/check-email".to_string(),
        }
    }

    pub fn wish_video() -> Self {
        Self {
            slug: "wish-video".to_string(),
            title: "Birthday wish video".to_string(),
            unit_price: 80,
            imagery: "wishvideo.jpg".to_string(),
            qr_code: "qr code.jpg".to_string(),
            submit_path: "/api/donations".to_string(),
            check_email_path: "/api/check-email".to_string(),
        }
    }

    pub fn educate_child() -> Self {
        Self {
            slug: "educate-child".to_string(),
            title: "Educate a child".to_string(),
            unit_price: 200,
            imagery: "educateachild.jpg".to_string(),
            qr_code: "qr code.jpg".to_string(),
            submit_path: "/Birthday-wishes/api/donate".to_string(),
            check_email_path: "/Birthday-wishes/api/check-email".to_string(),
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![
            Self::homeless(),
            Self::stray_dog(),
            Self::wish_video(),
            Self::educate_child(),
        ]
    }

    pub fn by_slug(slug: &str) -> Option<Self> {
        let wanted = slug.trim().to_lowercase();
        Self::builtin().into_iter().find(|c| c.slug == wanted)
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self::homeless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_campaigns_have_distinct_prices_and_paths() {
        let campaigns = CampaignConfig::builtin();
        let mut prices: Vec<u64> = campaigns.iter().map(|c| c.unit_price).collect();
        prices.sort_unstable();
        assert_eq!(prices, vec![20, 25, 80, 200]);

        let mut paths: Vec<&str> = campaigns.iter().map(|c| c.submit_path.as_str()).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), 4);
    }

    #[test]
    fn lookup_by_slug_is_case_insensitive() {
        assert_eq!(
            CampaignConfig::by_slug("Stray-Dog").map(|c| c.unit_price),
            Some(20)
        );
        assert!(CampaignConfig::by_slug("unknown").is_none());
        assert_eq!(
            CampaignConfig::by_slug(DEFAULT_CAMPAIGN),
            Some(CampaignConfig::default())
        );
    }
}
