/*!
 * Requests the hub sends to the bridge.
 *
 * An external web layer parses the HTTP request into an `InboundRequest` and
 * writes the returned `InboundResponse` back. `/update` carries attribute
 * changes and is open; the control routes need the configured access token
 * and app id.
 */
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use hubbridge_core::utils::spawn_and_log;

use crate::bridge::{Bridge, Preferences};
use crate::pipeline::{EnqueueOutcome, UpdateEvent};

/// Failure body for rejected credentials
pub const AUTH_FAILURE: &str = "Failed: Missing access_token or app_id";

/// A request from the hub, already parsed by the web layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundRequest {
    /// Request path, e.g. `/update`
    pub path: String,
    /// `access_token` query parameter
    pub access_token: Option<String>,
    /// `app_id` query parameter
    pub app_id: Option<String>,
    /// JSON body
    pub body: JsonValue,
}

impl InboundRequest {
    /// Create a request without credentials
    pub fn new(path: impl Into<String>, body: JsonValue) -> Self {
        Self {
            path: path.into(),
            body,
            ..Self::default()
        }
    }

    /// Attach credentials
    pub fn with_credentials(mut self, access_token: &str, app_id: &str) -> Self {
        self.access_token = Some(access_token.to_string());
        self.app_id = Some(app_id.to_string());
        self
    }

    fn route(&self) -> &str {
        let path = self.path.split('?').next().unwrap_or_default();
        path.trim_matches('/')
    }

    /// Credentials from the query, falling back to the body
    fn credential(&self, field: Option<&String>, key: &str) -> Option<String> {
        field
            .cloned()
            .or_else(|| self.body.get(key).and_then(|v| v.as_str()).map(str::to_string))
            .filter(|v| !v.is_empty())
    }
}

/// Answer for the web layer
#[derive(Debug, Clone, PartialEq)]
pub struct InboundResponse {
    /// HTTP status code
    pub status_code: u16,
    /// JSON body
    pub body: JsonValue,
}

impl InboundResponse {
    fn ok(body: JsonValue) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    fn failed(status_code: u16, message: &str) -> Self {
        Self {
            status_code,
            body: json!({ "status": message }),
        }
    }
}

/// What happened to an inbound attribute update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvtStatus {
    /// Applied right away
    #[serde(rename = "OK")]
    Ok,
    /// Dropped
    Failed,
    /// Accepted by the update queue
    Queued,
}

impl From<EnqueueOutcome> for EvtStatus {
    fn from(outcome: EnqueueOutcome) -> Self {
        match outcome {
            EnqueueOutcome::Queued => EvtStatus::Queued,
            EnqueueOutcome::Failed => EvtStatus::Failed,
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Compare two digests without stopping at the first difference
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Routes hub requests to the bridge
pub struct WebhookHandler {
    bridge: Arc<Bridge>,
    token_digest: [u8; 32],
    app_id_digest: [u8; 32],
}

impl WebhookHandler {
    /// Create a handler checking the hub credentials of the bridge's config
    pub fn new(bridge: Arc<Bridge>) -> Self {
        let hub = &bridge.config().hub;
        let token_digest = digest(&hub.access_token);
        let app_id_digest = digest(&hub.app_id);
        Self {
            bridge,
            token_digest,
            app_id_digest,
        }
    }

    fn authenticate(&self, request: &InboundRequest) -> bool {
        let token = request.credential(request.access_token.as_ref(), "access_token");
        let app_id = request.credential(request.app_id.as_ref(), "app_id");
        match (token, app_id) {
            (Some(token), Some(app_id)) => {
                // Both are checked so timing does not reveal which one failed
                let token_ok = digests_match(&digest(&token), &self.token_digest);
                let app_ok = digests_match(&digest(&app_id), &self.app_id_digest);
                token_ok & app_ok
            }
            _ => false,
        }
    }

    /// Handle one request
    pub async fn handle(&self, request: InboundRequest) -> InboundResponse {
        let route = request.route().to_string();
        debug!("Inbound request {}", route);

        if route == "update" {
            return self.handle_update(request.body);
        }

        let known = matches!(
            route.as_str(),
            "initial" | "refreshDevices" | "updateprefs" | "healthCheck"
        );
        if !known {
            warn!("Unknown inbound route {}", request.path);
            return InboundResponse::failed(404, &format!("Failed: unknown route {}", route));
        }
        if !self.authenticate(&request) {
            warn!("Rejected {} request with bad credentials", route);
            return InboundResponse::failed(401, AUTH_FAILURE);
        }

        match route.as_str() {
            "initial" => {
                info!("Hub connected, refreshing devices");
                self.spawn_refresh("initial refresh");
                InboundResponse::ok(json!({ "status": "OK" }))
            }
            "refreshDevices" => {
                self.spawn_refresh("requested refresh");
                InboundResponse::ok(json!({ "status": "OK" }))
            }
            "updateprefs" => self.handle_preferences(request.body),
            _ => self.handle_health_check(),
        }
    }

    fn handle_update(&self, body: JsonValue) -> InboundResponse {
        let event: UpdateEvent = match serde_json::from_value(body) {
            Ok(event) => event,
            Err(e) => {
                warn!("Unreadable update: {}", e);
                return InboundResponse::failed(400, "Failed: unreadable update");
            }
        };
        let evt_status = self.bridge.submit_update(event);
        InboundResponse::ok(json!({ "status": "OK", "evtStatus": evt_status }))
    }

    fn handle_preferences(&self, body: JsonValue) -> InboundResponse {
        let prefs: Preferences = match serde_json::from_value(body) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Unreadable preferences: {}", e);
                return InboundResponse::failed(400, "Failed: unreadable preferences");
            }
        };
        let reclassify = self.bridge.update_preferences(&prefs);
        if reclassify {
            self.spawn_refresh("refresh after preference change");
        }
        InboundResponse::ok(json!({ "status": "OK", "reclassify": reclassify }))
    }

    fn handle_health_check(&self) -> InboundResponse {
        InboundResponse::ok(json!({
            "status": "OK",
            "version": self.bridge.config().general.app_version,
            "accCount": self.bridge.registry().count(),
            "uptime": self.bridge.uptime().as_secs(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    fn spawn_refresh(&self, name: &str) {
        let bridge = self.bridge.clone();
        spawn_and_log(name, async move { bridge.refresh_from_hub().await.map(|_| ()) });
    }
}

impl std::fmt::Debug for WebhookHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookHandler")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}
