//! 📡 Elasticsearch backend — the cluster client that actually speaks HTTP.
//!
//! 🎬 *[a reqwest::Client walks into a cluster. the cluster says "404". the client says "perfect".]*
//!
//! Five endpoints, one version probe, and a sorting hat for failures:
//! - `PUT  /_ilm/policy/<policy>`        lifecycle policy
//! - `PUT  /_index_template/<template>`  template with `data_stream: {}`
//! - `GET  /_data_stream/<stream>`       existence check
//! - `PUT  /_data_stream/<stream>`       creation
//! - `POST /<stream>/_bulk`              the part where logs actually arrive
//! - `GET  /`                            "what version are you?"
//!
//! 🧠 Knowledge graph: which statuses count as "not found" and "already exists" is
//! config, not code. Real clusters send 404 and 400/`resource_already_exists_exception`,
//! but proxies and forks have opinions, so the knobs are there.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::backends::{ClusterClient, ClusterError, VersionDetector};
use crate::bulk::BulkRequestBody;

/// 🔧 Where the cluster lives, how to get in, and how to read its moods.
#[derive(Debug, Deserialize, Clone)]
pub struct ClusterConfig {
    /// 📡 Base URL. Trailing slash optional, we trim it anyway.
    #[serde(default = "default_url")]
    pub url: String,
    /// 🔒 Username. The bouncer at the club.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key. Wins over basic auth when both are set.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// 🔍 Statuses that mean "that resource doesn't exist".
    #[serde(default = "default_not_found_statuses")]
    pub not_found_statuses: Vec<u16>,
    /// 👯 Statuses that may mean "that resource already exists".
    #[serde(default = "default_already_exists_statuses")]
    pub already_exists_statuses: Vec<u16>,
    /// 👯 The `error.type` that confirms an already-exists on a non-409 status.
    #[serde(default = "default_already_exists_error_type")]
    pub already_exists_error_type: String,
    /// 📜 Custom lifecycle policy body. None means a plain hot-phase rollover policy.
    #[serde(default)]
    pub lifecycle_policy: Option<Value>,
    #[serde(default = "default_template_priority")]
    pub template_priority: u32,
}

fn default_url() -> String {
    "http://localhost:9200".to_string()
}

// -- ⏱️ 10s to shake hands, 30s for a meaty bulk. we will wait, but not forever.
fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_not_found_statuses() -> Vec<u16> {
    vec![404]
}

fn default_already_exists_statuses() -> Vec<u16> {
    vec![400, 409]
}

fn default_already_exists_error_type() -> String {
    "resource_already_exists_exception".to_string()
}

fn default_template_priority() -> u32 {
    200
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            username: None,
            password: None,
            api_key: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            not_found_statuses: default_not_found_statuses(),
            already_exists_statuses: default_already_exists_statuses(),
            already_exists_error_type: default_already_exists_error_type(),
            lifecycle_policy: None,
            template_priority: default_template_priority(),
        }
    }
}

/// 🕰️ The bit of `GET /` we care about.
#[derive(Debug, Deserialize)]
struct ClusterInfo {
    version: ClusterVersion,
}

#[derive(Debug, Deserialize)]
struct ClusterVersion {
    number: String,
}

impl ClusterVersion {
    fn major(&self) -> Option<u32> {
        self.number
            .split('.')
            .next()
            .and_then(|major| major.parse::<u32>().ok())
    }
}

/// 📦 The bit of a `_bulk` reply we care about: did anything inside it fail?
#[derive(Debug, Deserialize)]
struct BulkReply {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

/// 📡 A data-stream-aware Elasticsearch client. Holds one pooled `reqwest::Client`.
#[derive(Debug)]
pub struct ElasticsearchCluster {
    client: Client,
    config: ClusterConfig,
}

impl ElasticsearchCluster {
    /// 🚀 Build the HTTP client. No request is sent here.
    pub fn new(config: ClusterConfig) -> Result<Self, ClusterError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| {
                ClusterError::other_with_source(
                    "The HTTP client refused to be born. Probably a TLS stack having a day.",
                    e,
                )
            })?;
        Ok(Self { client, config })
    }

    // -- 📡 one slash of difference, infinite suffering of difference
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        let request = self.client.request(method, url);
        // -- 🔒 api_key is the premium tier. basic auth gets what's left.
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        resource: &str,
    ) -> Result<(StatusCode, String), ClusterError> {
        let response = request.send().await.map_err(|e| {
            ClusterError::other_with_source(
                format!("request for '{resource}' never made it to the cluster"),
                e,
            )
        })?;
        let status = response.status();
        // -- 📭 a reply we can't read can't be classified, so it doesn't get to pretend it was empty
        let body = response.text().await.map_err(|e| {
            ClusterError::other_with_source(
                format!("cluster answered {status} for '{resource}' but the body could not be read"),
                e,
            )
        })?;
        trace!("📡 '{}' answered {} with {} bytes", resource, status, body.len());
        Ok((status, body))
    }

    /// 🗂️ Sort a failed response into NotFound / AlreadyExists / Other.
    fn classify(&self, status: StatusCode, body: &str, resource: &str) -> ClusterError {
        let code = status.as_u16();
        if self.config.not_found_statuses.contains(&code) {
            return ClusterError::NotFound(resource.to_owned());
        }
        if self.config.already_exists_statuses.contains(&code) {
            let error_type = error_type_of(body);
            if status == StatusCode::CONFLICT
                || error_type.as_deref() == Some(self.config.already_exists_error_type.as_str())
            {
                return ClusterError::AlreadyExists(resource.to_owned());
            }
        }
        ClusterError::other(format!(
            "cluster answered {status} for '{resource}': {body}"
        ))
    }

    async fn put_json(&self, path: &str, resource: &str, body: &Value) -> Result<(), ClusterError> {
        let request = self.request(Method::PUT, path).json(body);
        let (status, reply) = self.send(request, resource).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(self.classify(status, &reply, resource))
        }
    }

    fn lifecycle_policy_body(&self) -> Value {
        self.config.lifecycle_policy.clone().unwrap_or_else(|| {
            json!({
                "policy": {
                    "phases": {
                        "hot": {
                            "actions": {
                                "rollover": {
                                    "max_age": "30d",
                                    "max_primary_shard_size": "50gb"
                                }
                            }
                        }
                    }
                }
            })
        })
    }
}

fn error_type_of(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed["error"]["type"].as_str().map(str::to_owned)
}

// -- 🔍 first item that carries an `error`, whatever its action key happens to be
fn first_item_error(items: &[Value]) -> Option<&Value> {
    items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .find_map(|result| result.get("error"))
}

#[async_trait]
impl ClusterClient for ElasticsearchCluster {
    async fn put_lifecycle_policy(&self, name: &str) -> Result<(), ClusterError> {
        debug!("📜 PUT _ilm/policy/{}", name);
        self.put_json(
            &format!("_ilm/policy/{name}"),
            name,
            &self.lifecycle_policy_body(),
        )
        .await
    }

    async fn put_index_template(
        &self,
        name: &str,
        pattern: &str,
        lifecycle_policy: &str,
    ) -> Result<(), ClusterError> {
        debug!("🧩 PUT _index_template/{} for {}", name, pattern);
        let body = json!({
            "index_patterns": [pattern],
            "data_stream": {},
            "priority": self.config.template_priority,
            "template": {
                "settings": {
                    "index.lifecycle.name": lifecycle_policy
                }
            }
        });
        self.put_json(&format!("_index_template/{name}"), name, &body)
            .await
    }

    async fn data_stream_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let request = self.request(Method::GET, &format!("_data_stream/{name}"));
        let (status, reply) = self.send(request, name).await?;
        if status.is_success() {
            return Ok(true);
        }
        match self.classify(status, &reply, name) {
            ClusterError::NotFound(_) => Ok(false),
            other => Err(other),
        }
    }

    async fn put_data_stream(&self, name: &str) -> Result<(), ClusterError> {
        debug!("🌊 PUT _data_stream/{}", name);
        let request = self.request(Method::PUT, &format!("_data_stream/{name}"));
        let (status, reply) = self.send(request, name).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(self.classify(status, &reply, name))
        }
    }

    async fn bulk_write(&self, stream: &str, body: &BulkRequestBody) -> Result<(), ClusterError> {
        let payload = body
            .to_ndjson()
            .map_err(|e| ClusterError::other_with_source("bulk body refused to become NDJSON", e))?;
        debug!(
            "📡 POST {}/_bulk with {} docs, {} bytes",
            stream,
            body.len(),
            payload.len()
        );
        // ⚠️ application/x-ndjson, not application/json. The cluster cares. Deeply.
        let request = self
            .request(Method::POST, &format!("{stream}/_bulk"))
            .header("Content-Type", "application/x-ndjson")
            .body(payload);
        let (status, reply) = self.send(request, stream).await?;
        if !status.is_success() {
            return Err(self.classify(status, &reply, stream));
        }

        // -- 🕵️ a 200 can still be hiding per-document failures
        let parsed: BulkReply = serde_json::from_str(&reply).map_err(|e| {
            ClusterError::other_with_source(format!("bulk reply for '{stream}' was not JSON"), e)
        })?;
        if parsed.errors {
            let first = first_item_error(&parsed.items)
                .map(Value::to_string)
                .unwrap_or_else(|| "no item carried an error body".to_string());
            return Err(ClusterError::other(format!(
                "bulk write into '{stream}' had item failures, first one: {first}"
            )));
        }
        trace!("🚀 bulk landed in '{}'", stream);
        Ok(())
    }
}

#[async_trait]
impl VersionDetector for ElasticsearchCluster {
    async fn detect_major_version(&self) -> Result<u32, ClusterError> {
        let (status, reply) = self.send(self.request(Method::GET, ""), "/").await?;
        if !status.is_success() {
            return Err(self.classify(status, &reply, "/"));
        }
        let info: ClusterInfo = serde_json::from_str(&reply).map_err(|e| {
            ClusterError::other_with_source("cluster root answered without a version", e)
        })?;
        info.version.major().ok_or_else(|| {
            ClusterError::other(format!(
                "could not read a major version out of '{}'",
                info.version.number
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::BulkBatchEncoder;
    use chrono::Utc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn cluster_for(server: &MockServer) -> ElasticsearchCluster {
        ElasticsearchCluster::new(ClusterConfig {
            url: format!("{}/", server.uri()),
            ..ClusterConfig::default()
        })
        .expect("💀 reqwest client should build in tests")
    }

    #[tokio::test]
    async fn the_one_where_the_version_comes_from_the_root_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"version": {"number": "8.11.3"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(cluster_for(&server).detect_major_version().await.unwrap(), 8);
    }

    #[tokio::test]
    async fn the_one_where_the_version_number_is_gibberish() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"version": {"number": "banana"}})),
            )
            .mount(&server)
            .await;

        assert!(cluster_for(&server).detect_major_version().await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_the_policy_and_template_land_on_the_right_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_ilm/policy/foo_policy"))
            .and(body_partial_json(json!({"policy": {"phases": {"hot": {}}}})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/_index_template/foo_template"))
            .and(body_partial_json(json!({
                "index_patterns": ["foo*"],
                "data_stream": {},
                "template": {"settings": {"index.lifecycle.name": "foo_policy"}}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster_for(&server);
        cluster.put_lifecycle_policy("foo_policy").await.unwrap();
        cluster
            .put_index_template("foo_template", "foo*", "foo_policy")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn the_one_where_404_means_the_stream_is_not_there_yet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"type": "index_not_found_exception"},
                "status": 404
            })))
            .mount(&server)
            .await;

        assert!(!cluster_for(&server).data_stream_exists("foo").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_200_means_the_stream_is_home() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data_streams": []})))
            .mount(&server)
            .await;

        assert!(cluster_for(&server).data_stream_exists("foo").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_a_500_on_the_check_is_not_a_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        assert!(matches!(
            cluster_for(&server).data_stream_exists("foo").await,
            Err(ClusterError::Other { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_custom_not_found_status_is_respected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let cluster = ElasticsearchCluster::new(ClusterConfig {
            url: server.uri(),
            not_found_statuses: vec![410],
            ..ClusterConfig::default()
        })
        .unwrap();
        assert!(!cluster.data_stream_exists("foo").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_already_exists_is_classified_not_thrown() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "resource_already_exists_exception"},
                "status": 400
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            cluster_for(&server).put_data_stream("foo").await,
            Err(ClusterError::AlreadyExists(name)) if name == "foo"
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_plain_bad_request_is_just_bad() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_data_stream/foo"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"type": "illegal_argument_exception"},
                "status": 400
            })))
            .mount(&server)
            .await;

        assert!(matches!(
            cluster_for(&server).put_data_stream("foo").await,
            Err(ClusterError::Other { .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_the_reply_body_dies_halfway_and_we_say_so() {
        // 🧪 wiremock always sends whole bodies, so a bare socket plays the flaky proxy:
        // it promises 500 bytes, sends a few, and hangs up.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let read = socket.read(&mut chunk).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..read]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 400 Bad Request\r\ncontent-type: application/json\r\ncontent-length: 500\r\n\r\n{\"error\":",
                )
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let cluster = ElasticsearchCluster::new(ClusterConfig {
            url: format!("http://{address}"),
            ..ClusterConfig::default()
        })
        .unwrap();

        match cluster.put_data_stream("foo").await {
            Err(err @ ClusterError::Other { .. }) => {
                assert!(err.to_string().contains("body could not be read"), "💀 got {err}");
                assert!(std::error::Error::source(&err).is_some());
            }
            other => panic!("💀 a truncated reply should be a read failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_bulk_posts_ndjson_to_the_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/foo/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"errors": false, "items": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let cluster = cluster_for(&server);
        let body = BulkBatchEncoder::encode([(Utc::now(), json!({"message": "hello"}))]);
        cluster.bulk_write("foo", &body).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let wire = String::from_utf8(received[0].body.clone()).unwrap();
        assert_eq!(wire.lines().count(), 2);
        assert_eq!(wire.lines().next(), Some(r#"{"create":{}}"#));
    }

    #[tokio::test]
    async fn the_one_where_a_200_bulk_still_hides_item_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/foo/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    {"create": {"status": 201}},
                    {"create": {"status": 400, "error": {"type": "mapper_parsing_exception"}}}
                ]
            })))
            .mount(&server)
            .await;

        let body = BulkBatchEncoder::encode([
            (Utc::now(), json!({"ok": true})),
            (Utc::now(), json!({"ok": false})),
        ]);
        let err = cluster_for(&server).bulk_write("foo", &body).await.unwrap_err();
        assert!(err.to_string().contains("mapper_parsing_exception"));
    }

    #[tokio::test]
    async fn the_one_where_the_api_key_beats_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/_data_stream/foo"))
            .and(header("authorization", "ApiKey sekrit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let cluster = ElasticsearchCluster::new(ClusterConfig {
            url: server.uri(),
            username: Some("elastic".into()),
            password: Some("changeme".into()),
            api_key: Some("sekrit".into()),
            ..ClusterConfig::default()
        })
        .unwrap();
        cluster.put_data_stream("foo").await.unwrap();
    }
}
