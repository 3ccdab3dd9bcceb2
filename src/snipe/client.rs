//! Snipe-IT API client: models, hardware, and user checkouts.
//!
//! Endpoints used (base: `<SNIPE_URL>`, usually `.../api/v1`):
//! - GET  /hardware/byserial/{serial}
//! - GET  /models (search + paging), POST /models, PATCH /models/{id}
//! - POST /hardware, PATCH /hardware/{id}
//! - POST /hardware/{id}/checkout, POST /hardware/{id}/checkin
//! - GET  /users?search=
//!
//! Every call rides through [`SnipeHttp`](super::retry::SnipeHttp) for rate
//! limiting and retries. Lookups return `Option`: `None` is the "not found"
//! answer, never a missing-key surprise at the call site.

use anyhow::{Context, Result};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::payload::AssetPayload;
use super::retry::SnipeHttp;
use crate::appledb::AppleDb;
use crate::config::{DeviceOs, SnipeSettings};

/// Standard Snipe-IT list envelope.
#[derive(Debug, Deserialize)]
pub struct Rows<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(default = "Vec::new")]
    pub rows: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManufacturerRef {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub id: i64,
    pub name: Option<String>,
    pub model_number: Option<String>,
    pub image: Option<String>,
    pub manufacturer: Option<ManufacturerRef>,
}

impl Model {
    /// Model number when set, else the display name: the identifier we key
    /// AppleDB lookups on.
    pub fn lookup_identifier(&self) -> Option<&str> {
        self.model_number
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignedUser {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Asset {
    pub id: i64,
    pub serial: Option<String>,
    pub asset_tag: Option<String>,
    pub assigned_to: Option<AssignedUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedEnvelope {
    status: Option<String>,
    payload: Option<CreatedPayload>,
    messages: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CreatedPayload {
    id: i64,
}

/// Snipe-IT returns 200 with `status: "error"` for validation failures, so
/// the created id has to be dug out of the success envelope explicitly.
fn created_id(body: Value, what: &str) -> Result<i64> {
    let envelope: CreatedEnvelope = serde_json::from_value(body)
        .with_context(|| format!("malformed Snipe response creating {what}"))?;
    if envelope.status.as_deref() == Some("error") {
        anyhow::bail!(
            "Snipe rejected {what}: {}",
            envelope.messages.unwrap_or_else(|| json!("no messages"))
        );
    }
    envelope
        .payload
        .map(|p| p.id)
        .with_context(|| format!("Snipe response creating {what} had no payload id"))
}

pub struct Snipe {
    http: SnipeHttp,
    settings: SnipeSettings,
    appledb: AppleDb,
}

impl Snipe {
    pub fn new(settings: SnipeSettings, appledb: AppleDb) -> Result<Self> {
        let http = SnipeHttp::new(&settings.url, &settings.api_key, settings.rate_limit)?;
        Ok(Self {
            http,
            settings,
            appledb,
        })
    }

    pub fn manufacturer_id(&self) -> i64 {
        self.settings.manufacturer_id
    }

    async fn get_rows<T: for<'de> Deserialize<'de>>(
        &mut self,
        path: &str,
        query: Option<&[(&str, String)]>,
        what: &str,
    ) -> Result<Rows<T>> {
        let response = self.http.execute(Method::GET, path, query, None).await?;
        response
            .json::<Rows<T>>()
            .await
            .with_context(|| format!("malformed Snipe response listing {what}"))
    }

    /// Zero-or-one asset for a serial number (serials are unique in Snipe).
    pub async fn find_asset_by_serial(&mut self, serial: &str) -> Result<Option<Asset>> {
        debug!(serial, "snipe: looking up hardware by serial");
        let found: Rows<Asset> = self
            .get_rows(&format!("/hardware/byserial/{serial}"), None, "hardware")
            .await?;
        Ok(found.rows.into_iter().next())
    }

    /// Search models by model number. When the model exists but carries no
    /// image yet, opportunistically backfill one from AppleDB.
    pub async fn search_model(&mut self, model_number: &str) -> Result<Option<Model>> {
        debug!(model = model_number, "snipe: searching models");
        let query = [
            ("limit", "50".to_string()),
            ("offset", "0".to_string()),
            ("search", model_number.to_string()),
            ("sort", "created_at".to_string()),
            ("order", "asc".to_string()),
        ];
        let found: Rows<Model> = self.get_rows("/models", Some(&query), "models").await?;
        let Some(model) = found.rows.into_iter().next() else {
            info!(model = model_number, "snipe: model not found");
            return Ok(None);
        };

        if model.image.is_none() {
            if let Some(image) = self.appledb.find_image(model_number).await {
                info!(model = model_number, model_id = model.id, "snipe: backfilling model image");
                if let Err(e) = self.update_model(model.id, &json!({ "image": image })).await {
                    warn!(model_id = model.id, error = %e, "snipe: image backfill failed");
                }
            }
        }
        Ok(Some(model))
    }

    /// Create a model for `model_number` under the category/fieldset that
    /// belongs to its OS family. Image enrichment is best-effort: a failed
    /// lookup creates the model without one.
    pub async fn create_model(&mut self, model_number: &str, os: DeviceOs) -> Result<i64> {
        let class = self.settings.class_ids(os);
        let image = self.appledb.find_image(model_number).await;
        let has_image = image.is_some();
        let payload = json!({
            "name": model_number,
            "model_number": model_number,
            "category_id": class.category_id,
            "fieldset_id": class.fieldset_id,
            "manufacturer_id": self.settings.manufacturer_id,
            "image": image,
        });
        info!(model = model_number, os = %os, has_image, "snipe: creating model");
        let response = self
            .http
            .execute(Method::POST, "/models", None, Some(&payload))
            .await?;
        let body: Value = response.json().await.context("Snipe create-model response was not JSON")?;
        created_id(body, "model")
    }

    /// All models, paged. Used by the image backfill pass.
    pub async fn list_all_models(&mut self) -> Result<Vec<Model>> {
        const PAGE: usize = 200;
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let query = [
                ("limit", PAGE.to_string()),
                ("offset", offset.to_string()),
                ("sort", "created_at".to_string()),
                ("order", "asc".to_string()),
            ];
            let page: Rows<Model> = self.get_rows("/models", Some(&query), "models").await?;
            let fetched = page.rows.len();
            all.extend(page.rows);
            if fetched < PAGE {
                break;
            }
            offset += PAGE;
        }
        info!(models = all.len(), "snipe: model listing complete");
        Ok(all)
    }

    pub async fn update_model(&mut self, model_id: i64, payload: &Value) -> Result<()> {
        debug!(model_id, "snipe: updating model");
        self.http
            .execute(Method::PATCH, &format!("/models/{model_id}"), None, Some(payload))
            .await?;
        Ok(())
    }

    /// Create the hardware record; returns its id. Tag defaults to the
    /// serial and status to the configured default.
    pub async fn create_asset(&mut self, model_id: i64, payload: AssetPayload) -> Result<i64> {
        let body = serde_json::to_value(payload.for_create(model_id, self.settings.default_status_id))
            .context("failed to serialize asset payload")?;
        info!(model_id, "snipe: creating hardware record");
        let response = self
            .http
            .execute(Method::POST, "/hardware", None, Some(&body))
            .await?;
        let value: Value = response.json().await.context("Snipe create-asset response was not JSON")?;
        created_id(value, "asset")
    }

    /// PATCH the hardware record in place (serial stripped; optionally
    /// rebind the model).
    pub async fn update_asset(
        &mut self,
        asset_id: i64,
        payload: AssetPayload,
        model_id: Option<i64>,
    ) -> Result<()> {
        let body = serde_json::to_value(payload.for_update(model_id))
            .context("failed to serialize asset payload")?;
        info!(asset_id, "snipe: updating hardware record");
        self.http
            .execute(Method::PATCH, &format!("/hardware/{asset_id}"), None, Some(&body))
            .await?;
        Ok(())
    }

    /// Check the asset out to the first user matching `query`. Unknown users
    /// are a logged no-op: this tool never creates directory users.
    pub async fn assign_user(&mut self, query: &str, asset_id: i64) -> Result<()> {
        let params = [("search", query.to_string()), ("limit", "2".to_string())];
        let users: Rows<User> = self.get_rows("/users", Some(&params), "users").await?;
        let Some(user) = users.rows.into_iter().next() else {
            warn!(user = query, asset_id, "snipe: no matching user, leaving asset unassigned");
            return Ok(());
        };

        info!(user = query, user_id = user.id, asset_id, "snipe: checking out asset");
        let body = json!({
            "assigned_user": user.id,
            "checkout_to_type": "user",
        });
        self.http
            .execute(
                Method::POST,
                &format!("/hardware/{asset_id}/checkout"),
                None,
                Some(&body),
            )
            .await?;
        Ok(())
    }

    /// AppleDB photo lookup for a model identifier; used by the image
    /// backfill pass.
    pub async fn model_image(&mut self, identifier: &str) -> Option<String> {
        self.appledb.find_image(identifier).await
    }

    /// Check the asset in, clearing any assignment.
    pub async fn unassign_user(&mut self, asset_id: i64) -> Result<()> {
        info!(asset_id, "snipe: checking in asset");
        self.http
            .execute(
                Method::POST,
                &format!("/hardware/{asset_id}/checkin"),
                None,
                Some(&json!({})),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_envelope_tolerates_missing_fields() {
        let rows: Rows<Asset> = serde_json::from_value(json!({})).unwrap();
        assert_eq!(rows.total, 0);
        assert!(rows.rows.is_empty());
    }

    #[test]
    fn asset_row_deserializes_with_assignment() {
        let raw = json!({
            "id": 7,
            "serial": "C02XL0GTJGH5",
            "asset_tag": "C02XL0GTJGH5",
            "assigned_to": {"id": 3, "username": "jdoe@example.org", "type": "user"}
        });
        let asset: Asset = serde_json::from_value(raw).unwrap();
        assert_eq!(asset.assigned_to.unwrap().username.as_deref(), Some("jdoe@example.org"));
    }

    #[test]
    fn created_id_reads_success_payload() {
        let body = json!({"status": "success", "payload": {"id": 91, "name": "MacBookPro15,2"}});
        assert_eq!(created_id(body, "model").unwrap(), 91);
    }

    #[test]
    fn created_id_surfaces_validation_errors() {
        let body = json!({"status": "error", "messages": {"model_number": ["taken"]}});
        let err = created_id(body, "model").unwrap_err();
        assert!(err.to_string().contains("taken"));
    }

    #[test]
    fn model_lookup_identifier_prefers_model_number() {
        let model: Model = serde_json::from_value(json!({
            "id": 1, "name": "MacBook Pro 13\"", "model_number": "MacBookPro15,2"
        }))
        .unwrap();
        assert_eq!(model.lookup_identifier(), Some("MacBookPro15,2"));

        let unnumbered: Model =
            serde_json::from_value(json!({"id": 2, "name": "Apple TV 4K", "model_number": ""}))
                .unwrap();
        assert_eq!(unnumbered.lookup_identifier(), Some("Apple TV 4K"));
    }
}
