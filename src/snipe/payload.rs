//! Maps a Mosyle device snapshot onto the Snipe-IT hardware schema.
//!
//! The custom-field keys (`_snipeit_*`) are the column names Snipe-IT
//! generates for the Apple fieldsets this tool expects; they appear
//! verbatim in PATCH/POST bodies.

use serde::Serialize;

use crate::config::DeviceOs;
use crate::mosyle::Device;

/// POST/PATCH body for `/hardware`. Absent optionals are omitted from the
/// wire payload entirely, so an update never nulls a field it does not set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssetPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<i64>,
    #[serde(rename = "_snipeit_mac_address_1", skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(
        rename = "_snipeit_bluetooth_mac_address_11",
        skip_serializing_if = "Option::is_none"
    )]
    pub bluetooth_mac_address: Option<String>,
    #[serde(rename = "_snipeit_os_info_6")]
    pub os_info: String,
    #[serde(rename = "_snipeit_osversion_12", skip_serializing_if = "Option::is_none")]
    pub osversion: Option<String>,
    #[serde(rename = "_snipeit_cpu_family_7", skip_serializing_if = "Option::is_none")]
    pub cpu_family: Option<String>,
    #[serde(rename = "_snipeit_percent_disk_5", skip_serializing_if = "Option::is_none")]
    pub percent_disk: Option<String>,
    #[serde(
        rename = "_snipeit_available_disk_5",
        skip_serializing_if = "Option::is_none"
    )]
    pub available_disk: Option<String>,
}

impl AssetPayload {
    /// Body for creating the asset: serial doubles as the asset tag, and
    /// the model/status come from the resolver.
    pub fn for_create(mut self, model_id: i64, status_id: i64) -> Self {
        self.status_id = Some(status_id);
        self.model_id = Some(model_id);
        self.asset_tag = self.serial.clone();
        self
    }

    /// Body for updating in place: serial is immutable in Snipe-IT and must
    /// not ride along on PATCH.
    pub fn for_update(mut self, model_id: Option<i64>) -> Self {
        self.serial = None;
        if model_id.is_some() {
            self.model_id = model_id;
        }
        self
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Ethernet wins when both MACs are reported; wifi is the fallback; neither
/// leaves the field unset.
fn pick_mac_address(wifi: Option<&str>, ethernet: Option<&str>) -> Option<String> {
    non_empty(ethernet).or_else(|| non_empty(wifi))
}

fn with_gb_suffix(value: Option<&str>) -> Option<String> {
    non_empty(value).map(|v| format!("{v} GB"))
}

/// Build the Snipe-IT hardware payload from one Mosyle device row.
///
/// CPU family is Mac-only (Mosyle does not report it elsewhere); disk usage
/// is reported for mac and ios. tvOS carries neither.
pub fn build_asset_payload(device: &Device) -> AssetPayload {
    let os = device.os.as_deref().and_then(|s| s.parse::<DeviceOs>().ok());
    let os_info = os.map(|o| o.os_label()).unwrap_or("Not Known").to_string();

    let mut payload = AssetPayload {
        name: non_empty(device.device_name.as_deref()),
        serial: non_empty(device.serial_number.as_deref()),
        mac_address: pick_mac_address(
            device.wifi_mac_address.as_deref(),
            device.ethernet_mac_address.as_deref(),
        ),
        bluetooth_mac_address: non_empty(device.bluetooth_mac_address.as_deref()),
        os_info,
        osversion: non_empty(device.osversion.as_deref()),
        ..Default::default()
    };

    match os {
        Some(DeviceOs::Mac) => {
            payload.cpu_family = non_empty(device.cpu_model.as_deref());
            payload.percent_disk = with_gb_suffix(device.percent_disk.as_deref());
            payload.available_disk = with_gb_suffix(device.available_disk.as_deref());
        }
        Some(DeviceOs::Ios) => {
            payload.percent_disk = with_gb_suffix(device.percent_disk.as_deref());
            payload.available_disk = with_gb_suffix(device.available_disk.as_deref());
        }
        Some(DeviceOs::Tvos) | None => {}
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac_device() -> Device {
        Device {
            serial_number: Some("C02XL0GTJGH5".into()),
            device_model: Some("MacBookPro15,2".into()),
            os: Some("mac".into()),
            osversion: Some("14.5".into()),
            device_name: Some("kitchen-mbp".into()),
            wifi_mac_address: Some("AA:BB:CC:DD:EE:01".into()),
            ethernet_mac_address: None,
            bluetooth_mac_address: Some("AA:BB:CC:DD:EE:02".into()),
            percent_disk: Some("120".into()),
            available_disk: Some("380".into()),
            cpu_model: Some("Intel Core i7".into()),
            ..Default::default()
        }
    }

    #[test]
    fn wifi_mac_used_when_ethernet_absent() {
        let payload = build_asset_payload(&mac_device());
        assert_eq!(payload.mac_address.as_deref(), Some("AA:BB:CC:DD:EE:01"));
    }

    #[test]
    fn ethernet_mac_wins_over_wifi() {
        let mut device = mac_device();
        device.ethernet_mac_address = Some("11:22:33:44:55:66".into());
        let payload = build_asset_payload(&device);
        assert_eq!(payload.mac_address.as_deref(), Some("11:22:33:44:55:66"));
    }

    #[test]
    fn no_mac_reported_leaves_field_unset() {
        let mut device = mac_device();
        device.wifi_mac_address = None;
        device.ethernet_mac_address = Some("".into());
        let payload = build_asset_payload(&device);
        assert!(payload.mac_address.is_none());
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("_snipeit_mac_address_1").is_none());
    }

    #[test]
    fn mac_gets_cpu_and_disk_fields() {
        let payload = build_asset_payload(&mac_device());
        assert_eq!(payload.cpu_family.as_deref(), Some("Intel Core i7"));
        assert_eq!(payload.percent_disk.as_deref(), Some("120 GB"));
        assert_eq!(payload.available_disk.as_deref(), Some("380 GB"));
        assert_eq!(payload.os_info, "MacOS");
    }

    #[test]
    fn ios_gets_disk_but_not_cpu() {
        let mut device = mac_device();
        device.os = Some("ios".into());
        let payload = build_asset_payload(&device);
        assert!(payload.cpu_family.is_none());
        assert_eq!(payload.percent_disk.as_deref(), Some("120 GB"));
        assert_eq!(payload.os_info, "iOS");
    }

    #[test]
    fn tvos_gets_neither_cpu_nor_disk() {
        let mut device = mac_device();
        device.os = Some("tvos".into());
        let payload = build_asset_payload(&device);
        assert!(payload.cpu_family.is_none());
        assert!(payload.percent_disk.is_none());
        assert_eq!(payload.os_info, "tvos");
    }

    #[test]
    fn unknown_os_is_labeled_not_known() {
        let mut device = mac_device();
        device.os = Some("watchos".into());
        let payload = build_asset_payload(&device);
        assert_eq!(payload.os_info, "Not Known");
    }

    #[test]
    fn create_body_derives_tag_from_serial() {
        let payload = build_asset_payload(&mac_device()).for_create(42, 2);
        assert_eq!(payload.asset_tag.as_deref(), Some("C02XL0GTJGH5"));
        assert_eq!(payload.model_id, Some(42));
        assert_eq!(payload.status_id, Some(2));
    }

    #[test]
    fn update_body_strips_serial() {
        let payload = build_asset_payload(&mac_device()).for_update(Some(42));
        assert!(payload.serial.is_none());
        assert_eq!(payload.model_id, Some(42));
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("serial").is_none());
    }
}
