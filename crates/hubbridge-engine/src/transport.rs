/*!
 * Hub transport.
 *
 * `HubTransport` is the narrow interface the bridge uses to talk to the hub's
 * installed app. `HttpHubClient` implements it over the app's REST api with
 * reqwest: every call carries the access token as a query parameter and an
 * `isLocal` header telling the hub which route the request took.
 */
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, trace};
use url::Url;

use hubbridge_core::config::HubConfig;
use hubbridge_core::types::Value;

use crate::error::{TransportError, TransportResult};

/// Route names, also used as circuit breaker keys
pub mod routes {
    /// Device list
    pub const DEVICES: &str = "devices";
    /// Single device command
    pub const COMMAND: &str = "command";
    /// Batched device commands
    pub const BATCH: &str = "deviceCmds";
    /// Bridge status report
    pub const STATUS: &str = "pluginStatus";
    /// Registration of the bridge's direct address
    pub const REGISTER: &str = "registerPluginForUpdates";
}

/// Location block of the device list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubLocation {
    /// Temperature scale used by the hub ("F" or "C")
    #[serde(default)]
    pub temperature_scale: Option<String>,
    /// Local address of the hub
    #[serde(default, rename = "hubIP")]
    pub hub_ip: Option<String>,
    /// Whether the hub expects cloud routing
    #[serde(default)]
    pub use_cloud: Option<bool>,
}

/// Answer of the device list request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceListResponse {
    /// Raw device entries
    #[serde(default, rename = "deviceList")]
    pub device_list: Vec<JsonValue>,
    /// Hub location, if reported
    #[serde(default)]
    pub location: Option<HubLocation>,
}

/// One command of a batched request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchCommand {
    /// Target device
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Command name
    pub command: String,
    /// Positional arguments
    pub params: Vec<Value>,
}

/// Status report sent to the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginStatus {
    /// Whether a newer bridge version is available
    pub has_update: bool,
    /// The newer version, if any
    pub new_version: Option<String>,
    /// Running version
    pub version: String,
    /// Number of exposed accessories
    pub acc_count: usize,
    /// Resident memory in bytes, when known
    pub memory: Option<u64>,
    /// Seconds since the bridge started
    pub uptime: u64,
}

/// Address the hub should post attribute updates to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRegistration {
    /// Bridge address
    pub plugin_ip: String,
    /// Bridge port
    pub plugin_port: u16,
    /// Bridge version
    pub plugin_version: String,
}

/// Requests the bridge makes to the hub
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Fetch the full device list
    async fn fetch_devices(&self) -> TransportResult<DeviceListResponse>;

    /// Send one command to one device
    async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        params: &[Value],
    ) -> TransportResult<()>;

    /// Send several commands in one request
    async fn send_batch(&self, commands: &[BatchCommand]) -> TransportResult<()>;

    /// Report the bridge's status
    async fn report_status(&self, status: &PluginStatus) -> TransportResult<()>;

    /// Tell the hub where to post attribute updates
    async fn register_for_updates(&self, registration: &UpdateRegistration)
        -> TransportResult<()>;
}

/// Body of a single command: `{value1, value2, ...}`
pub fn command_body(params: &[Value]) -> JsonValue {
    let values: Map<String, JsonValue> = params
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("value{}", i + 1), JsonValue::from(v.clone())))
        .collect();
    JsonValue::Object(values)
}

/// Request timeouts of the client
#[derive(Debug, Clone, Copy)]
pub struct HubTimeouts {
    /// Device list request
    pub device_list: Duration,
    /// Command requests
    pub command: Duration,
    /// Status and registration requests
    pub status: Duration,
}

impl Default for HubTimeouts {
    fn default() -> Self {
        Self {
            device_list: Duration::from_secs(10),
            command: Duration::from_secs(10),
            status: Duration::from_secs(5),
        }
    }
}

/// reqwest client for the hub's app api
#[derive(Debug, Clone)]
pub struct HttpHubClient {
    client: Client,
    base_url: String,
    access_token: String,
    is_local: bool,
    timeouts: HubTimeouts,
}

impl HttpHubClient {
    /// Create a client for an api base url (`.../apps/api/{app_id}`)
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        is_local: bool,
        timeouts: HubTimeouts,
    ) -> TransportResult<Self> {
        let base_url = base_url.into();
        Url::parse(&base_url)?;

        let client = ClientBuilder::new()
            .user_agent(format!("hubbridge/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            is_local,
            timeouts,
        })
    }

    /// Create a client from the hub configuration
    pub fn from_config(hub: &HubConfig, command_timeout: Duration) -> TransportResult<Self> {
        let timeouts = HubTimeouts {
            device_list: Duration::from_millis(hub.device_list_timeout_ms),
            command: command_timeout,
            status: Duration::from_millis(hub.status_timeout_ms),
        };
        Self::new(hub.base_url(), hub.access_token.clone(), !hub.use_cloud, timeouts)
    }

    /// Build the url of a route
    fn build_url(&self, path: &str) -> TransportResult<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, path))?;
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token);
        Ok(url)
    }

    async fn post(&self, path: &str, body: &JsonValue, timeout: Duration) -> TransportResult<Response> {
        let url = self.build_url(path)?;
        trace!("POST {} {}", path, body);
        let response = self
            .client
            .post(url)
            .header("isLocal", self.is_local.to_string())
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> TransportResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl HubTransport for HttpHubClient {
    async fn fetch_devices(&self) -> TransportResult<DeviceListResponse> {
        let url = self.build_url(routes::DEVICES)?;
        let response = self
            .client
            .get(url)
            .header("isLocal", self.is_local.to_string())
            .timeout(self.timeouts.device_list)
            .send()
            .await?;
        let response = check_status(response).await?;
        let list: DeviceListResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        debug!("Fetched {} devices from the hub", list.device_list.len());
        Ok(list)
    }

    async fn send_command(
        &self,
        device_id: &str,
        command: &str,
        params: &[Value],
    ) -> TransportResult<()> {
        let path = format!("{}/command/{}", device_id, command);
        self.post(&path, &command_body(params), self.timeouts.command)
            .await?;
        Ok(())
    }

    async fn send_batch(&self, commands: &[BatchCommand]) -> TransportResult<()> {
        let body = serde_json::json!({ "commands": commands });
        self.post(routes::BATCH, &body, self.timeouts.command).await?;
        Ok(())
    }

    async fn report_status(&self, status: &PluginStatus) -> TransportResult<()> {
        let body = serde_json::to_value(status)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.post(routes::STATUS, &body, self.timeouts.status).await?;
        Ok(())
    }

    async fn register_for_updates(
        &self,
        registration: &UpdateRegistration,
    ) -> TransportResult<()> {
        let body = serde_json::to_value(registration)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        self.post(routes::REGISTER, &body, self.timeouts.status).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpHubClient {
        HttpHubClient::new(
            format!("{}/apps/api/12", server.uri()),
            "secret",
            true,
            HubTimeouts::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_command_body_numbers_values() {
        assert_eq!(command_body(&[]), json!({}));
        assert_eq!(
            command_body(&[Value::from(50), Value::from("fast")]),
            json!({"value1": 50, "value2": "fast"})
        );
    }

    #[test]
    fn test_from_config_uses_selected_route() {
        let hub = HubConfig {
            app_url_local: "http://10.0.0.2".into(),
            app_url_cloud: "https://cloud.example.com/abc".into(),
            app_id: "77".into(),
            access_token: "t".into(),
            use_cloud: true,
            ..HubConfig::default()
        };
        let client = HttpHubClient::from_config(&hub, Duration::from_secs(10)).unwrap();
        assert_eq!(client.base_url, "https://cloud.example.com/abc/apps/api/77");
        assert!(!client.is_local);
        assert_eq!(client.timeouts.status, Duration::from_millis(5000));
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = HttpHubClient::new("not a url", "t", true, HubTimeouts::default()).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_fetch_devices_sends_token_and_route_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apps/api/12/devices"))
            .and(query_param("access_token", "secret"))
            .and(header("isLocal", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "deviceList": [{"deviceid": 1, "name": "Lamp"}],
                "location": {"temperature_scale": "C", "hubIP": "10.0.0.2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let list = client(&server).fetch_devices().await.unwrap();
        assert_eq!(list.device_list.len(), 1);
        let location = list.location.unwrap();
        assert_eq!(location.temperature_scale.as_deref(), Some("C"));
        assert_eq!(location.hub_ip.as_deref(), Some("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_send_command_posts_values() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/api/12/42/command/setLevel"))
            .and(query_param("access_token", "secret"))
            .and(body_json(json!({"value1": 30})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .send_command("42", "setLevel", &[Value::from(30)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_status_errors_carry_code() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/api/12/deviceCmds"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let err = client(&server)
            .send_batch(&[BatchCommand {
                device_id: "1".into(),
                command: "on".into(),
                params: vec![],
            }])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 503,
                body: "busy".into()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_status_report_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps/api/12/pluginStatus"))
            .and(body_json(json!({
                "hasUpdate": false,
                "newVersion": null,
                "version": "0.0.1",
                "accCount": 3,
                "memory": null,
                "uptime": 60
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .report_status(&PluginStatus {
                has_update: false,
                new_version: None,
                version: "0.0.1".into(),
                acc_count: 3,
                memory: None,
                uptime: 60,
            })
            .await
            .unwrap();
    }
}
