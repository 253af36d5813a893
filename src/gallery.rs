//! Campaign photo gallery records

use crate::backend::error::GatewayResult;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

pub const GALLERY_PATH: &str = "/api/gallery";
pub const GALLERY_UNAVAILABLE_MESSAGE: &str =
    "Failed to load gallery images. Please try again later.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryPhoto {
    /// Backends send either numeric or string ids.
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    pub src: String,
    #[serde(default)]
    pub caption: String,
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(id) => Ok(id),
        serde_json::Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unsupported gallery id: {}",
            other
        ))),
    }
}

#[async_trait]
pub trait GallerySource: Send + Sync {
    /// Photos in display order.
    async fn fetch_gallery(&self) -> GatewayResult<Vec<GalleryPhoto>>;
}
