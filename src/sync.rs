//! Per-device reconciliation between Mosyle and Snipe-IT.
//!
//! For every device in the fleet listing: resolve (or create) its Model,
//! create or update its Asset, settle user assignment drift, and push the
//! asset tag back to Mosyle. Devices are processed strictly in list order,
//! one at a time; the Snipe rate window is shared state. A failure on one
//! device is logged and the loop moves on; only startup and top-level
//! listing failures abort a run.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::{DeviceOs, ListMode, MosyleSettings};
use crate::mosyle::{timestamp_window, Device, Mosyle};
use crate::snipe::{build_asset_payload, Snipe};

/// What to do about an asset's user assignment, given who the directory says
/// holds it and who Mosyle says is at the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction<'a> {
    Assign(&'a str),
    /// Unconditional check-in; also taken when nobody is at the console and
    /// the asset already sits unassigned (checkin is idempotent server-side).
    Unassign,
    /// Check in from the stale holder, then out to the new one, in that order.
    Reassign(&'a str),
    Keep,
}

/// Decide the assignment step. `assigned` is the directory-side username
/// (empty string when an assignment exists without a username); `reported`
/// is the console user email from the MDM snapshot.
pub fn user_action<'a>(assigned: Option<&'a str>, reported: Option<&'a str>) -> UserAction<'a> {
    match (assigned, reported) {
        (None, Some(email)) => UserAction::Assign(email),
        (_, None) => UserAction::Unassign,
        (Some(current), Some(email)) if current != email => UserAction::Reassign(email),
        _ => UserAction::Keep,
    }
}

/// Tag to push back to Mosyle, if any: only when the directory holds a
/// non-empty tag the device does not already carry. A blank directory tag
/// never overwrites anything.
pub fn tag_to_write_back<'a>(
    device_tag: Option<&str>,
    directory_tag: Option<&'a str>,
) -> Option<&'a str> {
    let tag = directory_tag.map(str::trim).filter(|t| !t.is_empty())?;
    match device_tag.map(str::trim).filter(|t| !t.is_empty()) {
        Some(existing) if existing == tag => None,
        _ => Some(tag),
    }
}

/// Totals for one run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct SyncEngine {
    mosyle: Mosyle,
    snipe: Snipe,
    stats: RunStats,
}

impl SyncEngine {
    pub fn new(mosyle: Mosyle, snipe: Snipe) -> Self {
        Self {
            mosyle,
            snipe,
            stats: RunStats::default(),
        }
    }

    /// One full pass over every configured device type.
    pub async fn run(&mut self, settings: &MosyleSettings) -> Result<RunStats> {
        for os in &settings.device_types {
            let devices = match settings.list_mode {
                ListMode::Paginated => self.mosyle.list_devices(*os).await?,
                ListMode::Timestamp => {
                    let (from, to) = timestamp_window();
                    self.mosyle.list_devices_by_timestamp(from, to, *os).await?
                }
            };
            info!(os = %os, devices = devices.len(), "sync: starting device pass");

            for device in &devices {
                let Some(serial) = device.serial() else {
                    warn!(os = %os, name = device.device_name.as_deref().unwrap_or("?"),
                        "sync: skipping device with no serial number");
                    self.stats.skipped += 1;
                    continue;
                };

                match self.reconcile_device(device, serial).await {
                    Ok(()) => self.stats.processed += 1,
                    Err(e) => {
                        error!(serial, error = format!("{e:#}"), "sync: device reconciliation failed");
                        self.stats.failed += 1;
                    }
                }
            }
            info!(os = %os, processed = self.stats.processed, "sync: device pass finished");
        }

        info!(
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            failed = self.stats.failed,
            "sync: run complete"
        );
        Ok(self.stats)
    }

    async fn reconcile_device(&mut self, device: &Device, serial: &str) -> Result<()> {
        let model_number = device
            .device_model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .context("device reports no model identifier")?;
        // An OS outside mac/ios/tvos is a device-type filter mismatch;
        // surface it rather than guessing a category.
        let os: DeviceOs = device
            .os
            .as_deref()
            .unwrap_or_default()
            .parse()
            .context("device os does not map to a configured category")?;

        let existing = self.snipe.find_asset_by_serial(serial).await?;
        let model_id = match self.snipe.search_model(model_number).await? {
            Some(model) => model.id,
            None => self.snipe.create_model(model_number, os).await?,
        };

        let payload = build_asset_payload(device);

        let Some(asset) = existing else {
            let asset_id = self.snipe.create_asset(model_id, payload).await?;
            info!(serial, asset_id, "sync: asset created");
            if let Some(email) = device.current_user_email() {
                self.snipe.assign_user(email, asset_id).await?;
            }
            // Fresh assets get their tag from the serial; nothing to drift.
            return Ok(());
        };

        self.snipe.update_asset(asset.id, payload, Some(model_id)).await?;

        let assigned = asset
            .assigned_to
            .as_ref()
            .map(|u| u.username.as_deref().unwrap_or(""));
        match user_action(assigned, device.current_user_email()) {
            UserAction::Assign(email) => self.snipe.assign_user(email, asset.id).await?,
            UserAction::Unassign => self.snipe.unassign_user(asset.id).await?,
            UserAction::Reassign(email) => {
                self.snipe.unassign_user(asset.id).await?;
                self.snipe.assign_user(email, asset.id).await?;
            }
            UserAction::Keep => {}
        }

        if let Some(tag) = tag_to_write_back(device.asset_tag.as_deref(), asset.asset_tag.as_deref())
        {
            self.mosyle.set_asset_tag(serial, tag).await?;
        }

        Ok(())
    }
}

/// Model-photo backfill pass: walk every Snipe model, and for Apple models
/// without an image try to attach one from AppleDB. Per-model failures are
/// logged and the pass continues.
pub async fn fix_model_images(snipe: &mut Snipe) -> Result<u64> {
    let models = snipe.list_all_models().await?;
    let mut updated = 0u64;

    for model in models {
        let apple = model
            .manufacturer
            .as_ref()
            .is_some_and(|m| m.id == snipe.manufacturer_id());
        if !apple || model.image.is_some() {
            continue;
        }

        let Some(identifier) = model.lookup_identifier() else {
            warn!(model_id = model.id, "fix-images: model has no usable identifier");
            continue;
        };

        let Some(image) = snipe.model_image(identifier).await else {
            info!(model_id = model.id, model = identifier, "fix-images: no photo found");
            continue;
        };

        match snipe.update_model(model.id, &json!({ "image": image })).await {
            Ok(()) => {
                info!(model_id = model.id, model = identifier, "fix-images: photo attached");
                updated += 1;
            }
            Err(e) => {
                warn!(model_id = model.id, error = %e, "fix-images: model update failed");
            }
        }
    }

    info!(updated, "fix-images: pass complete");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_asset_with_console_user_gets_assigned() {
        assert_eq!(
            user_action(None, Some("jdoe@example.org")),
            UserAction::Assign("jdoe@example.org")
        );
    }

    #[test]
    fn assignment_is_idempotent_when_user_matches() {
        assert_eq!(
            user_action(Some("jdoe@example.org"), Some("jdoe@example.org")),
            UserAction::Keep
        );
    }

    #[test]
    fn no_console_user_checks_the_asset_in() {
        assert_eq!(user_action(Some("jdoe@example.org"), None), UserAction::Unassign);
        // Check-in happens even when nothing is assigned; it is a server-side no-op.
        assert_eq!(user_action(None, None), UserAction::Unassign);
    }

    #[test]
    fn user_drift_reassigns_via_checkin_then_checkout() {
        assert_eq!(
            user_action(Some("alice@example.org"), Some("bob@example.org")),
            UserAction::Reassign("bob@example.org")
        );
    }

    #[test]
    fn tag_backsync_fires_only_on_real_drift() {
        // Device has no tag yet.
        assert_eq!(tag_to_write_back(None, Some("SNIPE-001")), Some("SNIPE-001"));
        // Device tag differs.
        assert_eq!(
            tag_to_write_back(Some("OLD-9"), Some("SNIPE-001")),
            Some("SNIPE-001")
        );
        // Already in sync.
        assert_eq!(tag_to_write_back(Some("SNIPE-001"), Some("SNIPE-001")), None);
    }

    #[test]
    fn blank_directory_tag_never_writes_back() {
        assert_eq!(tag_to_write_back(Some("OLD-9"), None), None);
        assert_eq!(tag_to_write_back(Some("OLD-9"), Some("")), None);
        assert_eq!(tag_to_write_back(None, Some("  ")), None);
    }
}
