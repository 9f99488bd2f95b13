//! Post-create webhook notifications.
//!
//! Delivery is fire-and-forget: the create response never waits on the
//! webhook, and a failed delivery is logged but does not fail the request.

use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config;

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    fn from_config() -> Self {
        let cfg = &config::CONFIG.notify;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, webhook_url: cfg.webhook_url.clone() }
    }

    async fn entity_created(&self, entity: &'static str, id: Uuid) {
        let Some(url) = &self.webhook_url else {
            debug!(entity, %id, "no webhook configured, skipping notification");
            return;
        };
        let body = json!({
            "event": "entity.created",
            "entity": entity,
            "id": id,
        });
        match self.client.post(url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(entity, %id, "notification delivered");
            }
            Ok(response) => {
                warn!(entity, %id, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(entity, %id, error = %e, "notification delivery failed");
            }
        }
    }
}

static NOTIFIER: Lazy<Notifier> = Lazy::new(Notifier::from_config);

/// Queue an entity-created notification without blocking the response.
pub fn notify_created(entity: &'static str, id: Uuid) {
    tokio::spawn(async move {
        NOTIFIER.entity_created(entity, id).await;
    });
}
