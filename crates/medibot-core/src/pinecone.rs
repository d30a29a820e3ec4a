//! Pinecone serverless index over its REST API.
//!
//! The control plane (`api.pinecone.io`) lists, creates and describes indexes; each
//! index has its own data-plane host that receives upserts and deletes. Hosts are
//! looked up once and cached per index name.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::{IndexSpec, Metric, StoreError, VectorRecord, VectorStore};

pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";
const API_VERSION: &str = "2024-07";

pub struct PineconeStore {
    http: reqwest::Client,
    api_key: String,
    control_url: String,
    namespace: String,
    ready_timeout: Duration,
    poll_interval: Duration,
    hosts: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for PineconeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PineconeStore")
            .field("control_url", &self.control_url)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PineconeStore {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            control_url: DEFAULT_CONTROL_URL.to_string(),
            namespace: String::new(),
            ready_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_control_url(mut self, url: impl Into<String>) -> Self {
        self.control_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Namespace within the index that upserts go to. Empty means the default namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// How long `ensure_index` waits for a new index to report ready.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn list_indexes(&self) -> Result<Vec<IndexModel>, StoreError> {
        let resp = self
            .control(reqwest::Method::GET, "/indexes")
            .send()
            .await?;
        let list: IndexList = check(resp).await?.json().await?;
        Ok(list.indexes)
    }

    /// Creates the index. A 409 means someone else created it first, which is fine.
    async fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let body = CreateIndex {
            name: &spec.name,
            dimension: spec.dimension,
            metric: spec.metric,
            spec: CreateSpec {
                serverless: Serverless {
                    cloud: &spec.cloud,
                    region: &spec.region,
                },
            },
        };
        let resp = self
            .control(reqwest::Method::POST, "/indexes")
            .json(&body)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            tracing::info!(index = %spec.name, "index was created concurrently");
            return Ok(());
        }
        check(resp).await?;
        tracing::info!(
            index = %spec.name,
            dimension = spec.dimension,
            metric = %spec.metric,
            "created index in {}/{}",
            spec.cloud,
            spec.region
        );
        Ok(())
    }

    async fn describe_index(&self, name: &str) -> Result<IndexModel, StoreError> {
        let resp = self
            .control(reqwest::Method::GET, &format!("/indexes/{name}"))
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::IndexNotFound(name.to_string()));
        }
        Ok(check(resp).await?.json().await?)
    }

    async fn wait_until_ready(&self, name: &str) -> Result<(), StoreError> {
        let started = Instant::now();
        loop {
            let model = self.describe_index(name).await?;
            if model.status.as_ref().is_some_and(|s| s.ready) && !model.host.is_empty() {
                self.cache_host(name, &model.host);
                return Ok(());
            }
            if started.elapsed() >= self.ready_timeout {
                return Err(StoreError::NotReady(name.to_string()));
            }
            tracing::debug!(index = %name, "waiting for index to become ready");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn host_for(&self, name: &str) -> Result<String, StoreError> {
        if let Some(host) = self.cached_host(name) {
            return Ok(host);
        }
        let model = self.describe_index(name).await?;
        if model.host.is_empty() {
            return Err(StoreError::NotReady(name.to_string()));
        }
        self.cache_host(name, &model.host);
        Ok(host_url(&model.host))
    }

    fn cached_host(&self, name: &str) -> Option<String> {
        self.hosts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    fn cache_host(&self, name: &str, host: &str) {
        self.hosts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), host_url(host));
    }

    fn control(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.authed(self.http.request(method, format!("{}{}", self.control_url, path)))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
    }
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn ensure_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let indexes = self.list_indexes().await?;
        match indexes.iter().find(|i| i.name == spec.name) {
            Some(existing) => {
                if let Some(dimension) = existing.dimension.filter(|d| *d != spec.dimension) {
                    return Err(StoreError::DimensionMismatch {
                        index: spec.name.clone(),
                        existing: dimension,
                        requested: spec.dimension,
                    });
                }
                tracing::info!(index = %spec.name, "index already exists");
            }
            None => self.create_index(spec).await?,
        }
        self.wait_until_ready(&spec.name).await
    }

    async fn upsert(&self, index_name: &str, records: &[VectorRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        let host = self.host_for(index_name).await?;
        let body = UpsertRequest {
            vectors: records.iter().map(UpsertVector::from).collect(),
            namespace: &self.namespace,
        };
        let resp = self
            .authed(self.http.post(format!("{host}/vectors/upsert")))
            .json(&body)
            .send()
            .await?;
        let parsed: UpsertResponse = check(resp).await?.json().await?;
        tracing::debug!(index = %index_name, count = parsed.upserted_count, "upserted vectors");
        Ok(parsed.upserted_count)
    }

    async fn delete(&self, index_name: &str, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let host = self.host_for(index_name).await?;
        let body = DeleteRequest {
            ids,
            namespace: &self.namespace,
        };
        let resp = self
            .authed(self.http.post(format!("{host}/vectors/delete")))
            .json(&body)
            .send()
            .await?;
        check(resp).await?;
        tracing::debug!(index = %index_name, count = ids.len(), "deleted vectors");
        Ok(())
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

/// Index hosts come back without a scheme; tests point them at plain http.
fn host_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StoreError::Status { status, body })
}

#[derive(Debug, Deserialize)]
struct IndexList {
    #[serde(default)]
    indexes: Vec<IndexModel>,
}

#[derive(Debug, Deserialize)]
struct IndexModel {
    name: String,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    host: String,
    #[serde(default)]
    status: Option<IndexStatus>,
}

#[derive(Debug, Deserialize)]
struct IndexStatus {
    ready: bool,
}

#[derive(Serialize)]
struct CreateIndex<'a> {
    name: &'a str,
    dimension: usize,
    metric: Metric,
    spec: CreateSpec<'a>,
}

#[derive(Serialize)]
struct CreateSpec<'a> {
    serverless: Serverless<'a>,
}

#[derive(Serialize)]
struct Serverless<'a> {
    cloud: &'a str,
    region: &'a str,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<UpsertVector<'a>>,
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: Map<String, Value>,
}

impl<'a> From<&'a VectorRecord> for UpsertVector<'a> {
    /// Pinecone rejects null metadata values, so a missing source is left out.
    fn from(r: &'a VectorRecord) -> Self {
        let mut metadata = Map::new();
        metadata.insert("text".into(), Value::String(r.content.clone()));
        if let Some(source) = &r.source {
            metadata.insert("source".into(), Value::String(source.clone()));
        }
        metadata.insert("chunk_index".into(), Value::from(r.chunk_index));
        Self {
            id: &r.id,
            values: &r.values,
            metadata,
        }
    }
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "str::is_empty")]
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::retry::Retryable;

    fn spec() -> IndexSpec {
        IndexSpec {
            name: "medi-bot".into(),
            dimension: 3,
            metric: Metric::Cosine,
            cloud: "aws".into(),
            region: "us-east-1".into(),
        }
    }

    fn store(server: &MockServer) -> PineconeStore {
        PineconeStore::new("test-key")
            .with_control_url(server.uri())
            .with_ready_timeout(Duration::from_millis(50))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn ready_index(server: &MockServer, dimension: usize) -> Value {
        json!({
            "name": "medi-bot",
            "dimension": dimension,
            "metric": "cosine",
            "host": server.uri(),
            "status": { "ready": true, "state": "Ready" }
        })
    }

    async fn mount_describe(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/indexes/medi-bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ready_index(server, 3)))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn creates_missing_index_as_serverless() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .and(header("Api-Key", "test-key"))
            .and(header("X-Pinecone-API-Version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "indexes": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .and(body_partial_json(json!({
                "name": "medi-bot",
                "dimension": 3,
                "metric": "cosine",
                "spec": { "serverless": { "cloud": "aws", "region": "us-east-1" } }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(ready_index(&server, 3)))
            .expect(1)
            .mount(&server)
            .await;
        mount_describe(&server).await;

        store(&server).ensure_index(&spec()).await.unwrap();
    }

    #[tokio::test]
    async fn existing_index_is_not_recreated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "indexes": [ready_index(&server, 3)] })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;
        mount_describe(&server).await;

        store(&server).ensure_index(&spec()).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_creation_conflict_is_tolerated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "indexes": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "error": { "code": "ALREADY_EXISTS", "message": "Resource already exists" }
            })))
            .mount(&server)
            .await;
        mount_describe(&server).await;

        store(&server).ensure_index(&spec()).await.unwrap();
    }

    #[tokio::test]
    async fn dimension_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "indexes": [ready_index(&server, 768)] })),
            )
            .mount(&server)
            .await;

        let err = store(&server).ensure_index(&spec()).await.unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { existing: 768, requested: 3, .. }));
    }

    #[tokio::test]
    async fn index_that_never_becomes_ready_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "indexes": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/indexes"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/indexes/medi-bot"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "medi-bot",
                "dimension": 3,
                "host": "",
                "status": { "ready": false, "state": "Initializing" }
            })))
            .mount(&server)
            .await;

        let err = store(&server).ensure_index(&spec()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotReady(_)));
    }

    #[tokio::test]
    async fn upsert_sends_vectors_with_metadata() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        let record = VectorRecord {
            id: "id-0".into(),
            values: vec![0.1, 0.2, 0.3],
            content: "Hello world".into(),
            source: Some("a.pdf".into()),
            chunk_index: 0,
        };
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .and(header("Api-Key", "test-key"))
            .and(body_partial_json(json!({
                "vectors": [{
                    "id": "id-0",
                    "metadata": { "text": "Hello world", "source": "a.pdf", "chunk_index": 0 }
                }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "upsertedCount": 1 })))
            .expect(1)
            .mount(&server)
            .await;

        let n = store(&server).upsert("medi-bot", &[record]).await.unwrap();
        assert_eq!(n, 1);
    }

    #[tokio::test]
    async fn upsert_server_error_is_retryable() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        Mock::given(method("POST"))
            .and(path("/vectors/upsert"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;
        let record = VectorRecord {
            id: "id-0".into(),
            values: vec![0.0; 3],
            content: "x".into(),
            source: None,
            chunk_index: 0,
        };

        let err = store(&server).upsert("medi-bot", &[record]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, StoreError::Status { ref body, .. } if body == "overloaded"));
    }

    #[tokio::test]
    async fn delete_posts_ids_to_index_host() {
        let server = MockServer::start().await;
        mount_describe(&server).await;
        Mock::given(method("POST"))
            .and(path("/vectors/delete"))
            .and(header("Api-Key", "test-key"))
            .and(body_partial_json(json!({ "ids": ["id-3", "id-4"], "namespace": "books" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        store(&server)
            .with_namespace("books")
            .delete("medi-bot", &["id-3".to_string(), "id-4".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn empty_delete_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        store(&server).delete("medi-bot", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn upsert_to_unknown_index_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/indexes/medi-bot"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let record = VectorRecord {
            id: "id-0".into(),
            values: vec![0.0; 3],
            content: "x".into(),
            source: None,
            chunk_index: 0,
        };

        let err = store(&server).upsert("medi-bot", &[record]).await.unwrap_err();
        assert!(matches!(err, StoreError::IndexNotFound(_)));
    }

    #[test]
    fn null_source_omitted_from_metadata() {
        let record = VectorRecord {
            id: "id".into(),
            values: vec![],
            content: "x".into(),
            source: None,
            chunk_index: 4,
        };
        let v = UpsertVector::from(&record);
        assert!(!v.metadata.contains_key("source"));
        assert_eq!(v.metadata["chunk_index"], json!(4));
    }

    #[test]
    fn host_url_adds_https_only_when_missing() {
        assert_eq!(host_url("idx-123.svc.pinecone.io"), "https://idx-123.svc.pinecone.io");
        assert_eq!(host_url("http://127.0.0.1:9000/"), "http://127.0.0.1:9000");
    }
}
