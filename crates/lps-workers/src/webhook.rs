//! Outgoing-webhook worker: signed status notifications to per-country
//! banking endpoints.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::{json, Map, Value};
use sha2::Sha256;
use tracing::info;

use lps_config::Settings;
use lps_db::JobRow;
use lps_service::QUEUE_NOTIFICATIONS;

use crate::JobHandler;

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct WebhookHandler {
    client: reqwest::Client,
    settings: Settings,
}

impl WebhookHandler {
    pub fn new(settings: Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, settings })
    }

    /// Per-country notification endpoint. Unknown countries fall back to the
    /// Spanish provider's endpoint.
    fn endpoint(&self, country_code: &str) -> String {
        let provider = self
            .settings
            .provider_for(country_code)
            .or_else(|| self.settings.provider_for("ES"))
            .expect("ES provider always configured");
        format!("{}/webhooks/loan-update", provider.base_url)
    }
}

/// Outbound payload: everything from the job except routing fields goes
/// under `data`.
pub fn build_webhook_payload(job_payload: &Value, now_iso: &str) -> Result<Value> {
    let loan_id = job_payload
        .get("loan_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("loan_id is required"))?;
    let notification_type = job_payload
        .get("notification_type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("notification_type is required"))?;

    let mut data = Map::new();
    if let Some(object) = job_payload.as_object() {
        for (key, value) in object {
            if !matches!(key.as_str(), "loan_id" | "notification_type" | "country_code") {
                data.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(json!({
        "event_type": notification_type,
        "loan_reference": loan_id,
        "timestamp": now_iso,
        "data": data,
    }))
}

/// Stable serialisation: object keys sorted recursively, compact output.
/// The signature is computed over exactly these bytes.
pub fn canonical_json(value: &Value) -> String {
    fn sort_keys(v: &Value) -> Value {
        match v {
            Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                let mut new = Map::new();
                for k in keys {
                    new.insert(k.clone(), sort_keys(&map[&k]));
                }
                Value::Object(new)
            }
            Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
            _ => v.clone(),
        }
    }
    serde_json::to_string(&sort_keys(value)).expect("json serialization must not fail")
}

pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn queue_name(&self) -> &'static str {
        QUEUE_NOTIFICATIONS
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn process(&self, job: &JobRow) -> Result<Value> {
        let country_code = job
            .payload
            .get("country_code")
            .and_then(Value::as_str)
            .unwrap_or("ES");

        let payload = build_webhook_payload(&job.payload, &Utc::now().to_rfc3339())?;
        let body = canonical_json(&payload);
        let signature = sign_payload(&self.settings.webhook_secret, &body);
        let endpoint = self.endpoint(country_code);

        info!(
            job_id = job.id,
            endpoint = %endpoint,
            event_type = payload["event_type"].as_str().unwrap_or("-"),
            "sending webhook"
        );

        let response = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", &signature)
            .header("X-Webhook-Source", "loan-system")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Non-2xx raises so the queue retries with backoff.
            bail!("webhook delivery failed: HTTP {status}");
        }

        info!(job_id = job.id, status = %status, "webhook delivered");

        Ok(json!({
            "endpoint": endpoint,
            "status_code": status.as_u16(),
            "success": true,
            "sent_at": Utc::now().to_rfc3339(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_moves_extras_under_data() {
        let job_payload = json!({
            "loan_id": "abc-123",
            "notification_type": "loan_approved",
            "country_code": "ES",
            "risk_score": 250,
        });
        let payload = build_webhook_payload(&job_payload, "2025-01-01T00:00:00+00:00").unwrap();

        assert_eq!(payload["event_type"], "loan_approved");
        assert_eq!(payload["loan_reference"], "abc-123");
        assert_eq!(payload["data"]["risk_score"], 250);
        assert!(payload["data"].get("country_code").is_none());
        assert!(payload["data"].get("loan_id").is_none());
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"z": 1, "a": {"c": 2, "b": 3}});
        assert_eq!(canonical_json(&value), r#"{"a":{"b":3,"c":2},"z":1}"#);
    }

    #[test]
    fn signature_matches_independent_hmac() {
        let body = r#"{"event_type":"loan_approved"}"#;
        let signature = sign_payload("webhook-secret-key", body);

        let mut mac = HmacSha256::new_from_slice(b"webhook-secret-key").unwrap();
        mac.update(body.as_bytes());
        assert_eq!(signature, hex::encode(mac.finalize().into_bytes()));
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn signature_changes_with_body_and_secret() {
        let base = sign_payload("secret", "body");
        assert_ne!(base, sign_payload("secret", "body2"));
        assert_ne!(base, sign_payload("secret2", "body"));
    }

    #[test]
    fn missing_routing_fields_error() {
        assert!(build_webhook_payload(&json!({"loan_id": "x"}), "t").is_err());
        assert!(build_webhook_payload(&json!({"notification_type": "x"}), "t").is_err());
    }
}
