//! Runtime configuration assembled from environment variables (.env aware).
//!
//! Required:
//! - MOSYLE_TOKEN / MOSYLE_USER / MOSYLE_PASSWORD: Mosyle API credentials
//! - SNIPE_URL / SNIPE_API_KEY: Snipe-IT base URL (with /api/v1) and token
//! - SNIPE_MANUFACTURER_ID: Snipe manufacturer id for Apple
//! - SNIPE_{MACOS,IOS,TVOS}_CATEGORY_ID / SNIPE_{MACOS,IOS,TVOS}_FIELDSET_ID
//!
//! Optional (with defaults):
//! - MOSYLE_URL (https://managerapi.mosyle.com/v2)
//! - MOSYLE_DEVICE_TYPES (mac,ios,tvos)
//! - MOSYLE_CALL_TYPE (paginated | timestamp)
//! - SNIPE_DEFAULT_STATUS_ID (2), SNIPE_RATE_LIMIT (110)
//! - APPLE_IMAGE_CHECK (true), APPLEDB_URL, APPLEDB_IMG_URL

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};

use crate::util::env::{env_csv, env_flag, env_opt, env_parse, env_req};

pub const DEFAULT_MOSYLE_URL: &str = "https://managerapi.mosyle.com/v2";
pub const DEFAULT_APPLEDB_URL: &str = "https://api.appledb.dev";
pub const DEFAULT_APPLEDB_IMG_URL: &str = "https://img.appledb.dev";

/// OS family reported by Mosyle for a managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOs {
    Mac,
    Ios,
    Tvos,
}

impl DeviceOs {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOs::Mac => "mac",
            DeviceOs::Ios => "ios",
            DeviceOs::Tvos => "tvos",
        }
    }

    /// Human label written into the Snipe "OS info" custom field.
    pub fn os_label(&self) -> &'static str {
        match self {
            DeviceOs::Mac => "MacOS",
            DeviceOs::Ios => "iOS",
            DeviceOs::Tvos => "tvos",
        }
    }
}

impl FromStr for DeviceOs {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mac" => Ok(DeviceOs::Mac),
            "ios" => Ok(DeviceOs::Ios),
            "tvos" => Ok(DeviceOs::Tvos),
            other => Err(anyhow::anyhow!("unrecognized device os {other:?}")),
        }
    }
}

impl fmt::Display for DeviceOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the Mosyle device list is pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListMode {
    #[default]
    Paginated,
    Timestamp,
}

impl FromStr for ListMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paginated" | "list" => Ok(ListMode::Paginated),
            "timestamp" => Ok(ListMode::Timestamp),
            other => Err(anyhow::anyhow!("unrecognized MOSYLE_CALL_TYPE {other:?}")),
        }
    }
}

/// Category + fieldset pair a Model is created under.
#[derive(Debug, Clone, Copy)]
pub struct ModelClassIds {
    pub category_id: i64,
    pub fieldset_id: i64,
}

#[derive(Debug, Clone)]
pub struct MosyleSettings {
    pub url: String,
    pub access_token: String,
    pub email: String,
    pub password: String,
    pub device_types: Vec<DeviceOs>,
    pub list_mode: ListMode,
}

#[derive(Debug, Clone)]
pub struct SnipeSettings {
    pub url: String,
    pub api_key: String,
    pub default_status_id: i64,
    pub manufacturer_id: i64,
    pub macos: ModelClassIds,
    pub ios: ModelClassIds,
    pub tvos: ModelClassIds,
    /// Requests per minute the Snipe instance tolerates.
    pub rate_limit: u32,
    pub apple_image_check: bool,
}

impl SnipeSettings {
    /// Category/fieldset ids a model for this OS is filed under.
    pub fn class_ids(&self, os: DeviceOs) -> ModelClassIds {
        match os {
            DeviceOs::Mac => self.macos,
            DeviceOs::Ios => self.ios,
            DeviceOs::Tvos => self.tvos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppleDbSettings {
    pub api_url: String,
    pub img_url: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub mosyle: MosyleSettings,
    pub snipe: SnipeSettings,
    pub appledb: AppleDbSettings,
}

impl Settings {
    /// Read and validate the whole configuration surface. Any missing or
    /// malformed required variable is fatal.
    pub fn from_env() -> Result<Self> {
        let device_types = env_csv("MOSYLE_DEVICE_TYPES", &["mac", "ios", "tvos"])
            .iter()
            .map(|s| s.parse::<DeviceOs>())
            .collect::<Result<Vec<_>>>()
            .context("MOSYLE_DEVICE_TYPES must be a csv of mac/ios/tvos")?;

        let list_mode = match env_opt("MOSYLE_CALL_TYPE") {
            Some(raw) => raw.parse::<ListMode>()?,
            None => ListMode::default(),
        };

        let mosyle = MosyleSettings {
            url: env_opt("MOSYLE_URL").unwrap_or_else(|| DEFAULT_MOSYLE_URL.to_string()),
            access_token: env_req("MOSYLE_TOKEN")?,
            email: env_req("MOSYLE_USER")?,
            password: env_req("MOSYLE_PASSWORD")?,
            device_types,
            list_mode,
        };

        let snipe = SnipeSettings {
            url: env_req("SNIPE_URL")?.trim_end_matches('/').to_string(),
            api_key: env_req("SNIPE_API_KEY")?,
            default_status_id: env_parse("SNIPE_DEFAULT_STATUS_ID", 2),
            manufacturer_id: req_id("SNIPE_MANUFACTURER_ID")?,
            macos: ModelClassIds {
                category_id: req_id("SNIPE_MACOS_CATEGORY_ID")?,
                fieldset_id: req_id("SNIPE_MACOS_FIELDSET_ID")?,
            },
            ios: ModelClassIds {
                category_id: req_id("SNIPE_IOS_CATEGORY_ID")?,
                fieldset_id: req_id("SNIPE_IOS_FIELDSET_ID")?,
            },
            tvos: ModelClassIds {
                category_id: req_id("SNIPE_TVOS_CATEGORY_ID")?,
                fieldset_id: req_id("SNIPE_TVOS_FIELDSET_ID")?,
            },
            rate_limit: env_parse("SNIPE_RATE_LIMIT", 110u32),
            apple_image_check: env_flag("APPLE_IMAGE_CHECK", true),
        };

        let appledb = AppleDbSettings {
            api_url: env_opt("APPLEDB_URL").unwrap_or_else(|| DEFAULT_APPLEDB_URL.to_string()),
            img_url: env_opt("APPLEDB_IMG_URL")
                .unwrap_or_else(|| DEFAULT_APPLEDB_IMG_URL.to_string()),
        };

        Ok(Settings {
            mosyle,
            snipe,
            appledb,
        })
    }
}

fn req_id(key: &str) -> Result<i64> {
    env_req(key)?
        .trim()
        .parse::<i64>()
        .with_context(|| format!("{key} must be a numeric id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_os_round_trip() {
        for raw in ["mac", "ios", "tvos"] {
            let os: DeviceOs = raw.parse().unwrap();
            assert_eq!(os.as_str(), raw);
        }
        assert!("watchos".parse::<DeviceOs>().is_err());
        // Mosyle reports lowercase; anything else is a config mismatch.
        assert!("Mac".parse::<DeviceOs>().is_err());
    }

    #[test]
    fn os_labels_match_snipe_field_values() {
        assert_eq!(DeviceOs::Mac.os_label(), "MacOS");
        assert_eq!(DeviceOs::Ios.os_label(), "iOS");
        assert_eq!(DeviceOs::Tvos.os_label(), "tvos");
    }

    #[test]
    fn list_mode_parses() {
        assert_eq!("timestamp".parse::<ListMode>().unwrap(), ListMode::Timestamp);
        assert_eq!("paginated".parse::<ListMode>().unwrap(), ListMode::Paginated);
        assert!("delta".parse::<ListMode>().is_err());
    }
}
