//! Mosyle Manager API client.
//!
//! Endpoints used (base: https://managerapi.mosyle.com/v2):
//! - POST /login        - credentials in, JWT back in the Authorization header
//! - POST /listdevices  - device listing, paginated or by modification window
//! - POST /devices      - per-device mutations (asset tag write-back)
//!
//! Mosyle wants the account access token inside every request body on top of
//! the bearer JWT header, so [`Mosyle::post`] injects it centrally.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::{DeviceOs, MosyleSettings};

/// Seconds subtracted from "now" for the timestamp listing window, covering
/// clock skew between us and Mosyle.
const TIMESTAMP_SKEW_SECS: i64 = 200;

/// One device row from `listdevices`. Snapshot only; never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Device {
    pub serial_number: Option<String>,
    pub device_model: Option<String>,
    pub os: Option<String>,
    pub osversion: Option<String>,
    pub device_name: Option<String>,
    pub wifi_mac_address: Option<String>,
    pub ethernet_mac_address: Option<String>,
    pub bluetooth_mac_address: Option<String>,
    pub percent_disk: Option<String>,
    pub available_disk: Option<String>,
    pub cpu_model: Option<String>,
    pub useremail: Option<String>,
    #[serde(rename = "CurrentConsoleManagedUser")]
    pub current_console_managed_user: Option<String>,
    pub asset_tag: Option<String>,
}

impl Device {
    /// Non-empty serial number, or `None` for records Mosyle returns without
    /// one (pending enrollments).
    pub fn serial(&self) -> Option<&str> {
        self.serial_number.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Email of the user currently on the console, when Mosyle reports a
    /// managed console session at all.
    pub fn current_user_email(&self) -> Option<&str> {
        let has_console_user = self
            .current_console_managed_user
            .as_deref()
            .is_some_and(|u| !u.trim().is_empty());
        if !has_console_user {
            return None;
        }
        self.useremail.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    status: Option<String>,
    message: Option<String>,
    #[serde(default)]
    response: DeviceList,
}

#[derive(Debug, Default, Deserialize)]
struct DeviceList {
    #[serde(default)]
    devices: Vec<Device>,
}

pub struct Mosyle {
    client: Client,
    url: String,
    access_token: String,
    jwt: String,
}

impl Mosyle {
    /// Log in and hold the session JWT. A failed login is fatal: there is no
    /// degraded mode without the MDM side.
    pub async fn connect(settings: &MosyleSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build Mosyle http client")?;
        let url = settings.url.trim_end_matches('/').to_string();

        let response = client
            .post(format!("{url}/login"))
            .json(&json!({
                "accessToken": settings.access_token,
                "email": settings.email,
                "password": settings.password,
            }))
            .send()
            .await
            .context("Mosyle login request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Mosyle login failed: {status} - {body}");
        }

        let jwt = response
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string)
            .context("Mosyle login response had no Bearer Authorization header")?;

        info!("mosyle: login ok, session token acquired");
        Ok(Self {
            client,
            url,
            access_token: settings.access_token.clone(),
            jwt,
        })
    }

    async fn post(&self, endpoint: &str, mut body: Value) -> Result<Value> {
        body["accessToken"] = json!(self.access_token);
        let response = self
            .client
            .post(format!("{}/{}", self.url, endpoint))
            .bearer_auth(&self.jwt)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Mosyle {endpoint} request failed"))?;

        let status = response.status();
        let value: Value = response
            .json()
            .await
            .with_context(|| format!("Mosyle {endpoint} returned non-JSON ({status})"))?;
        Ok(value)
    }

    fn devices_from(envelope: Value, context: &str) -> Result<Vec<Device>> {
        let parsed: ListEnvelope = serde_json::from_value(envelope)
            .with_context(|| format!("malformed Mosyle listdevices response ({context})"))?;
        if parsed.status.as_deref() != Some("OK") {
            anyhow::bail!(
                "Mosyle API reported failure ({context}): {}",
                parsed.message.unwrap_or_else(|| "no message".into())
            );
        }
        Ok(parsed.response.devices)
    }

    /// Full device listing for one OS family, walking pages until Mosyle
    /// returns an empty one.
    pub async fn list_devices(&self, os: DeviceOs) -> Result<Vec<Device>> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            debug!(os = %os, page, "mosyle: listing devices");
            let envelope = self
                .post(
                    "listdevices",
                    json!({
                        "operation": "list",
                        "options": { "os": os.as_str(), "page": page },
                    }),
                )
                .await?;
            let devices = Self::devices_from(envelope, os.as_str())?;
            if devices.is_empty() {
                break;
            }
            all.extend(devices);
            page += 1;
        }
        info!(os = %os, devices = all.len(), "mosyle: device listing complete");
        Ok(all)
    }

    /// Devices modified inside `[from, to]` (unix seconds) for one OS family.
    pub async fn list_devices_by_timestamp(
        &self,
        from: i64,
        to: i64,
        os: DeviceOs,
    ) -> Result<Vec<Device>> {
        debug!(os = %os, from, to, "mosyle: listing devices by modification window");
        let envelope = self
            .post(
                "listdevices",
                json!({
                    "operation": "list",
                    "options": {
                        "os": os.as_str(),
                        "date_modification_start": from,
                        "date_modification_end": to,
                    },
                }),
            )
            .await?;
        let devices = Self::devices_from(envelope, os.as_str())?;
        info!(os = %os, devices = devices.len(), "mosyle: window listing complete");
        Ok(devices)
    }

    /// Write an asset tag back onto the MDM record for `serial`.
    pub async fn set_asset_tag(&self, serial: &str, tag: &str) -> Result<()> {
        let result = self
            .post(
                "devices",
                json!({
                    "operation": "update_device",
                    "serialnumber": serial,
                    "asset_tag": tag,
                }),
            )
            .await?;
        if result.get("status").and_then(|s| s.as_str()) == Some("OK") {
            info!(serial, tag, "mosyle: asset tag synced back");
        } else {
            warn!(serial, tag, response = %result, "mosyle: asset tag update not acknowledged");
        }
        Ok(())
    }
}

/// Modification window for timestamp-mode listing: a point slightly in the
/// past, matching the original cadence of running the sync on a short timer.
pub fn timestamp_window() -> (i64, i64) {
    let ts = Utc::now().timestamp() - TIMESTAMP_SKEW_SECS;
    (ts, ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_rows_deserialize_with_missing_fields() {
        let raw = json!({
            "serial_number": "C02XL0GTJGH5",
            "device_model": "MacBookPro15,2",
            "os": "mac",
            "CurrentConsoleManagedUser": "jdoe",
            "useremail": "jdoe@example.org"
        });
        let device: Device = serde_json::from_value(raw).unwrap();
        assert_eq!(device.serial(), Some("C02XL0GTJGH5"));
        assert_eq!(device.current_user_email(), Some("jdoe@example.org"));
        assert!(device.asset_tag.is_none());
    }

    #[test]
    fn blank_serial_reads_as_absent() {
        let device = Device {
            serial_number: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(device.serial(), None);
    }

    #[test]
    fn user_email_requires_console_session() {
        // Email on file but nobody at the console: no assignment source.
        let device = Device {
            useremail: Some("jdoe@example.org".into()),
            ..Default::default()
        };
        assert_eq!(device.current_user_email(), None);
    }

    #[test]
    fn envelope_status_gate() {
        let ok = json!({"status": "OK", "response": {"devices": [{"serial_number": "X"}]}});
        assert_eq!(Mosyle::devices_from(ok, "mac").unwrap().len(), 1);

        let err = json!({"status": "ERROR", "message": "bad token"});
        let failure = Mosyle::devices_from(err, "mac").unwrap_err();
        assert!(failure.to_string().contains("bad token"));
    }

    #[test]
    fn empty_page_deserializes_to_no_devices() {
        let page = json!({"status": "OK", "response": {}});
        assert!(Mosyle::devices_from(page, "ios").unwrap().is_empty());
    }
}
