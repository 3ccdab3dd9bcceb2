//! AppleDB image enrichment.
//!
//! Resolves a product photo for an Apple model identifier against the public
//! AppleDB dataset (`GET /device/main.json`) and returns it as a base64 data
//! URI suitable for the Snipe-IT `image` field. Best-effort by contract:
//! every failure path (disabled, fetch error, no match, bad image) degrades
//! to `None` and never blocks model or asset processing.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::AppleDbSettings;

const DEFAULT_COLOR: &str = "Silver";

pub struct AppleDb {
    client: Client,
    api_url: String,
    img_url: String,
    enabled: bool,
    /// `main.json` rows, fetched lazily once per run. The dataset is static
    /// within a pass.
    catalog: Option<Vec<Value>>,
}

impl AppleDb {
    pub fn new(settings: &AppleDbSettings, enabled: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build AppleDB http client")?;
        Ok(Self {
            client,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            img_url: settings.img_url.trim_end_matches('/').to_string(),
            enabled,
            catalog: None,
        })
    }

    /// Look up a representative photo for `model_identifier` (e.g.
    /// "MacBookPro15,2"). Returns a `data:image/png;...` URI, or `None` when
    /// disabled, unmatched, or on any network failure.
    pub async fn find_image(&mut self, model_identifier: &str) -> Option<String> {
        if !self.enabled {
            debug!("appledb: image lookup disabled by configuration");
            return None;
        }

        let img_url = self.img_url.clone();
        let catalog = match self.catalog().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "appledb: failed to load device catalog");
                return None;
            }
        };

        let Some(device) = catalog.iter().find(|d| matches_identifier(d, model_identifier))
        else {
            info!(model = model_identifier, "appledb: no matching identifier or deviceMap");
            return None;
        };

        let key = device_key(device, model_identifier);
        let color = color_key(device);
        let url = format!("{}/device@256/{}/{}.png", img_url, key, color);
        info!(model = model_identifier, %url, "appledb: match found, fetching image");

        match self.fetch_image(&url).await {
            Ok(bytes) => Some(image_data_uri(&bytes)),
            Err(e) => {
                warn!(model = model_identifier, %url, error = %e, "appledb: image fetch failed");
                None
            }
        }
    }

    async fn catalog(&mut self) -> Result<&[Value]> {
        if self.catalog.is_none() {
            let url = format!("{}/device/main.json", self.api_url);
            let devices: Vec<Value> = self
                .client
                .get(&url)
                .send()
                .await
                .context("AppleDB request failed")?
                .error_for_status()
                .context("AppleDB returned an error status")?
                .json()
                .await
                .context("AppleDB catalog was not a JSON array")?;
            info!(devices = devices.len(), "appledb: device catalog loaded");
            self.catalog = Some(devices);
        }
        Ok(self.catalog.as_deref().unwrap_or_default())
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await
            .context("image request failed")?
            .error_for_status()
            .context("image URL returned an error status")?
            .bytes()
            .await
            .context("failed to read image body")?;
        Ok(bytes.to_vec())
    }
}

fn string_list_contains(value: Option<&Value>, needle: &str) -> bool {
    match value {
        // Usually a list of identifiers, occasionally a bare string.
        Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(needle)),
        Some(Value::String(s)) => s == needle,
        _ => false,
    }
}

/// Case-sensitive exact match against the device's `identifier` list or its
/// `deviceMap` alias list; a hit in either is a match.
pub fn matches_identifier(device: &Value, model_identifier: &str) -> bool {
    string_list_contains(device.get("identifier"), model_identifier)
        || string_list_contains(device.get("deviceMap"), model_identifier)
}

/// The AppleDB image path component; falls back to the queried identifier
/// when the record has no `key`.
pub fn device_key<'a>(device: &'a Value, model_identifier: &'a str) -> &'a str {
    device
        .get("key")
        .and_then(|k| k.as_str())
        .unwrap_or(model_identifier)
}

/// First declared color variant's key; `Silver` when the device declares no
/// colors or the first entry is malformed.
pub fn color_key(device: &Value) -> &str {
    device
        .get("colors")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("key"))
        .and_then(|k| k.as_str())
        .unwrap_or(DEFAULT_COLOR)
}

/// Re-encode raw image bytes as the data URI format the Snipe-IT `image`
/// field accepts on create/update.
pub fn image_data_uri(bytes: &[u8]) -> String {
    format!("data:image/png;name=image.png;base64,{}", BASE64.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_primary_identifier() {
        let device = json!({"identifier": ["MacBookPro15,2"], "deviceMap": []});
        assert!(matches_identifier(&device, "MacBookPro15,2"));
        assert!(!matches_identifier(&device, "MacBookPro15,4"));
    }

    #[test]
    fn matches_device_map_alias_without_primary_hit() {
        let device = json!({
            "identifier": ["iPad13,4", "iPad13,5"],
            "deviceMap": ["iPad Pro 11-inch (3rd generation)"]
        });
        assert!(matches_identifier(
            &device,
            "iPad Pro 11-inch (3rd generation)"
        ));
    }

    #[test]
    fn match_is_case_sensitive() {
        let device = json!({"identifier": ["AppleTV14,1"]});
        assert!(!matches_identifier(&device, "appletv14,1"));
    }

    #[test]
    fn bare_string_identifier_still_matches() {
        let device = json!({"identifier": "Macmini9,1"});
        assert!(matches_identifier(&device, "Macmini9,1"));
    }

    #[test]
    fn first_color_key_is_used() {
        let device = json!({"colors": [{"key": "Midnight"}, {"key": "Starlight"}]});
        assert_eq!(color_key(&device), "Midnight");
    }

    #[test]
    fn malformed_or_missing_colors_default_to_silver() {
        assert_eq!(color_key(&json!({})), "Silver");
        assert_eq!(color_key(&json!({"colors": []})), "Silver");
        assert_eq!(color_key(&json!({"colors": ["Midnight"]})), "Silver");
        assert_eq!(color_key(&json!({"colors": [{"name": "Midnight"}]})), "Silver");
    }

    #[test]
    fn device_key_falls_back_to_identifier() {
        let device = json!({"key": "MacBook-Pro-13-2018"});
        assert_eq!(device_key(&device, "MacBookPro15,2"), "MacBook-Pro-13-2018");
        assert_eq!(device_key(&json!({}), "MacBookPro15,2"), "MacBookPro15,2");
    }

    #[test]
    fn data_uri_has_snipe_compatible_prefix() {
        let uri = image_data_uri(b"png-bytes");
        assert!(uri.starts_with("data:image/png;name=image.png;base64,"));
        assert!(uri.ends_with(&BASE64.encode(b"png-bytes")));
    }
}
