//! REST client for the hosted pharmacy document API.
//!
//! Replays queued operations and implements the per-tenant document store on top of
//! `{base}/v1/pharmacies/{tenant}/{collection}[/{id}]`.

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use std::time::Duration;

use pharmapos_core::outbox::OperationRequest;
use pharmapos_core::remote::{
    collection_path, document_path, with_document_id, OperationTransportTrait,
    RemoteDocumentStoreTrait, TenantCollection, TenantDocument, BATCH_DELETE_LIMIT,
};

use crate::error::{RemoteError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
pub struct RemoteApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RemoteApiClient {
    fn log_response(status: StatusCode, body: &str) {
        if status.is_success() {
            debug!("[RemoteApi] response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[RemoteApi] response error ({}): {}", status, preview);
    }

    /// Create a client for `base_url` (e.g. "https://api.example-pharmacy.app").
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        Self::with_timeout(base_url, token, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reachability check against the base URL. Any HTTP answer counts, whatever its
    /// status; only transport failures are errors.
    pub async fn ping(&self, timeout: Duration) -> Result<StatusCode> {
        let response = self
            .client
            .get(&self.base_url)
            .timeout(timeout)
            .send()
            .await?;
        debug!("[RemoteApi] ping answered {}", response.status());
        Ok(response.status())
    }

    /// Absolute URLs pass through; relative ones are joined to the base URL.
    fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        if url.starts_with('/') {
            format!("{}{}", self.base_url, url)
        } else {
            format!("{}/{}", self.base_url, url)
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.token {
            let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| RemoteError::invalid_request("Invalid access token format"))?;
            headers.insert(AUTHORIZATION, auth_value);
        }
        Ok(headers)
    }

    /// Read the body of a response, turning non-2xx answers into `RemoteError::Api`.
    async fn read_success_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
                let message = if error.code.is_empty() {
                    error.message
                } else {
                    format!("{}: {}", error.code, error.message)
                };
                return Err(RemoteError::api(status.as_u16(), message));
            }
            return Err(RemoteError::api(
                status.as_u16(),
                format!("Request failed: {}", body),
            ));
        }
        Ok(body)
    }

    async fn parse_response<T: serde::de::DeserializeOwned + Default>(
        response: reqwest::Response,
    ) -> Result<T> {
        let body = Self::read_success_body(response).await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Replay one HTTP-shaped operation.
    ///
    /// The idempotency key, when given, is sent as `Idempotency-Key` and overrides any
    /// header of the same name in the request.
    pub async fn send_operation(
        &self,
        request: &OperationRequest,
        idempotency_key: Option<&str>,
    ) -> Result<()> {
        let url = self.resolve_url(&request.url);
        let method = Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|_| RemoteError::invalid_request("Unsupported method"))?;

        let mut headers = self.headers()?;
        for (name, value) in &request.options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| RemoteError::invalid_request(format!("Invalid header '{}'", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                RemoteError::invalid_request(format!("Invalid value for header '{}'", name))
            })?;
            headers.insert(name, value);
        }
        if let Some(key) = idempotency_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| RemoteError::invalid_request("Invalid idempotency key"))?;
            headers.insert(HeaderName::from_static("idempotency-key"), value);
        }

        debug!("[RemoteApi] {} {}", method, url);
        let mut builder = self.client.request(method, &url).headers(headers);
        if let Some(body) = &request.options.body {
            builder = builder.json(body);
        }
        let response = builder.send().await?;
        Self::read_success_body(response).await?;
        Ok(())
    }

    /// GET `.../{collection}/{id}`; 404 is `None`.
    pub async fn get_document(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        let url = self.resolve_url(&document_path(tenant, collection, id));
        let response = self.client.get(&url).headers(self.headers()?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::read_success_body(response).await?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&body)?))
    }

    /// PATCH `.../{collection}/{id}?merge=true`
    pub async fn set_document(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let url = format!(
            "{}?merge=true",
            self.resolve_url(&document_path(tenant, collection, id))
        );
        let response = self
            .client
            .patch(&url)
            .headers(self.headers()?)
            .json(&with_document_id(value, id))
            .send()
            .await?;
        Self::read_success_body(response).await?;
        Ok(())
    }

    /// GET `.../{collection}`
    pub async fn list_documents(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<Vec<TenantDocument>> {
        let url = self.resolve_url(&collection_path(tenant, collection));
        let response = self.client.get(&url).headers(self.headers()?).send().await?;
        let listed: ListDocumentsResponse = Self::parse_response(response).await?;
        Ok(listed.documents)
    }

    /// DELETE `.../{collection}/{id}`; a missing document counts as deleted.
    pub async fn delete_document(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> Result<()> {
        let url = self.resolve_url(&document_path(tenant, collection, id));
        let response = self
            .client
            .delete(&url)
            .headers(self.headers()?)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("[RemoteApi] {} already absent", url);
            return Ok(());
        }
        Self::read_success_body(response).await?;
        Ok(())
    }

    /// POST `.../{collection}:batchDelete` with at most `BATCH_DELETE_LIMIT` ids.
    pub async fn batch_delete(
        &self,
        tenant: &str,
        collection: TenantCollection,
        ids: Vec<String>,
    ) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if ids.len() > BATCH_DELETE_LIMIT {
            return Err(RemoteError::invalid_request(format!(
                "Batch delete accepts at most {} ids, got {}",
                BATCH_DELETE_LIMIT,
                ids.len()
            )));
        }
        let requested = ids.len();
        let url = format!(
            "{}:batchDelete",
            self.resolve_url(&collection_path(tenant, collection))
        );
        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&BatchDeleteRequest { ids })
            .send()
            .await?;
        let deleted: BatchDeleteResponse = Self::parse_response(response).await?;
        Ok(deleted.deleted.unwrap_or(requested))
    }

    /// List the collection, then delete it in batches.
    pub async fn delete_all_documents(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<usize> {
        let ids: Vec<String> = self
            .list_documents(tenant, collection)
            .await?
            .into_iter()
            .map(|doc| doc.id)
            .collect();
        let mut deleted = 0;
        for chunk in ids.chunks(BATCH_DELETE_LIMIT) {
            deleted += self.batch_delete(tenant, collection, chunk.to_vec()).await?;
        }
        debug!(
            "[RemoteApi] Deleted {} document(s) from {}/{}",
            deleted,
            tenant,
            collection.as_str()
        );
        Ok(deleted)
    }
}

fn into_core<T>(result: Result<T>, action: &str) -> pharmapos_core::Result<T> {
    result.map_err(|err| {
        warn!("[RemoteApi] {} failed: {}", action, err);
        pharmapos_core::Error::from(err)
    })
}

#[async_trait]
impl OperationTransportTrait for RemoteApiClient {
    async fn send(
        &self,
        request: &OperationRequest,
        idempotency_key: Option<&str>,
    ) -> pharmapos_core::Result<()> {
        into_core(
            self.send_operation(request, idempotency_key).await,
            "send_operation",
        )
    }
}

#[async_trait]
impl RemoteDocumentStoreTrait for RemoteApiClient {
    async fn get_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> pharmapos_core::Result<Option<serde_json::Value>> {
        into_core(self.get_document(tenant, collection, id).await, "get_doc")
    }

    async fn set_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
        value: serde_json::Value,
    ) -> pharmapos_core::Result<()> {
        into_core(
            self.set_document(tenant, collection, id, value).await,
            "set_doc",
        )
    }

    async fn get_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> pharmapos_core::Result<Vec<TenantDocument>> {
        into_core(
            self.list_documents(tenant, collection).await,
            "get_collection",
        )
    }

    async fn delete_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> pharmapos_core::Result<()> {
        into_core(
            self.delete_document(tenant, collection, id).await,
            "delete_doc",
        )
    }

    async fn delete_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> pharmapos_core::Result<usize> {
        into_core(
            self.delete_all_documents(tenant, collection).await,
            "delete_collection",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: String,
    }

    #[derive(Debug, Clone)]
    enum MockOutcome {
        DropConnection,
        Respond { status: u16, body: String },
    }

    fn respond(status: u16, body: impl Into<String>) -> MockOutcome {
        MockOutcome::Respond {
            status,
            body: body.into(),
        }
    }

    fn api_error_body(code: &str, message: &str) -> String {
        format!(
            r#"{{"error":"error","code":"{}","message":"{}"}}"#,
            code, message
        )
    }

    fn header_end_offset(buffer: &[u8]) -> Option<usize> {
        buffer.windows(4).position(|window| window == b"\r\n\r\n")
    }

    async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Option<CapturedRequest> {
        let mut buffer = Vec::new();
        loop {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                return None;
            }
            buffer.extend_from_slice(&chunk[..read]);
            if header_end_offset(&buffer).is_some() {
                break;
            }
        }

        let header_end = header_end_offset(&buffer)?;
        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.lines();
        let request_line = lines.next()?.to_string();
        let mut parts = request_line.split_whitespace();
        let method = parts.next()?.to_string();
        let path = parts.next()?.to_string();

        let mut headers = HashMap::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        let mut body = buffer[header_end + 4..].to_vec();
        while body.len() < content_length {
            let mut chunk = [0_u8; 2048];
            let read = stream.read(&mut chunk).await.ok()?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }

        Some(CapturedRequest {
            method,
            path,
            headers,
            body: String::from_utf8_lossy(&body).to_string(),
        })
    }

    fn status_text(status: u16) -> &'static str {
        match status {
            200 => "OK",
            201 => "Created",
            204 => "No Content",
            404 => "Not Found",
            422 => "Unprocessable Entity",
            503 => "Service Unavailable",
            _ => "Error",
        }
    }

    async fn write_http_response(
        stream: &mut tokio::net::TcpStream,
        status: u16,
        body: &str,
    ) -> std::io::Result<()> {
        let response = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            status_text(status),
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        stream.flush().await
    }

    async fn start_mock_server(
        outcomes: Vec<MockOutcome>,
    ) -> (
        String,
        Arc<TokioMutex<Vec<CapturedRequest>>>,
        tokio::task::JoinHandle<()>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        let captured = Arc::new(TokioMutex::new(Vec::<CapturedRequest>::new()));
        let scripted = Arc::new(TokioMutex::new(VecDeque::from(outcomes)));
        let captured_clone = Arc::clone(&captured);
        let scripted_clone = Arc::clone(&scripted);

        let handle = tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(value) => value,
                    Err(_) => break,
                };
                let Some(request) = read_http_request(&mut stream).await else {
                    continue;
                };
                // Requests are handled one at a time so the script lines up with them.
                captured_clone.lock().await.push(request);
                let outcome = scripted_clone
                    .lock()
                    .await
                    .pop_front()
                    .unwrap_or_else(|| respond(500, api_error_body("INTERNAL", "unexpected")));
                match outcome {
                    MockOutcome::DropConnection => drop(stream),
                    MockOutcome::Respond { status, body } => {
                        let _ = write_http_response(&mut stream, status, &body).await;
                    }
                }
            }
        });

        (format!("http://{}", addr), captured, handle)
    }

    fn client(base_url: &str) -> RemoteApiClient {
        RemoteApiClient::with_timeout(
            base_url,
            Some("secret-token".to_string()),
            Duration::from_secs(5),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn replay_sends_idempotency_key_token_and_headers() {
        let (base_url, captured, server) = start_mock_server(vec![respond(201, "{}")]).await;
        let request = OperationRequest::post(
            "/v1/pharmacies/ph-1/sales",
            json!({ "id": "S1", "total": 12.5 }),
        )
        .with_header("X-Register", "till-2");

        client(&base_url)
            .send_operation(&request, Some("0190-key"))
            .await
            .expect("replay succeeds");

        let seen = captured.lock().await.clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].path, "/v1/pharmacies/ph-1/sales");
        assert_eq!(
            seen[0].headers.get("idempotency-key").map(String::as_str),
            Some("0190-key")
        );
        assert_eq!(
            seen[0].headers.get("authorization").map(String::as_str),
            Some("Bearer secret-token")
        );
        assert_eq!(
            seen[0].headers.get("x-register").map(String::as_str),
            Some("till-2")
        );
        let body: serde_json::Value = serde_json::from_str(&seen[0].body).expect("json body");
        assert_eq!(body, json!({ "id": "S1", "total": 12.5 }));
        server.abort();
    }

    #[tokio::test]
    async fn transport_status_mapping() {
        let (base_url, _captured, server) = start_mock_server(vec![
            respond(503, api_error_body("UNAVAILABLE", "maintenance")),
            respond(422, api_error_body("INVALID", "missing total")),
            MockOutcome::DropConnection,
        ])
        .await;
        let client = client(&base_url);
        let request = OperationRequest::post("/v1/pharmacies/ph-1/payments", json!({}));

        let err = client.send(&request, None).await.unwrap_err();
        assert!(err.is_connectivity_failure(), "503 should be retryable: {}", err);

        let err = client.send(&request, None).await.unwrap_err();
        match err {
            pharmapos_core::Error::Remote { status, message } => {
                assert_eq!(status, 422);
                assert_eq!(message, "INVALID: missing total");
            }
            other => panic!("expected a rejection, got {:?}", other),
        }

        let err = client.send(&request, None).await.unwrap_err();
        assert!(err.is_connectivity_failure(), "dropped connection: {}", err);
        server.abort();
    }

    #[tokio::test]
    async fn unreachable_host_is_remote_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let err = client(&format!("http://{}", addr))
            .get_doc("ph-1", TenantCollection::Inventory, "I1")
            .await
            .unwrap_err();
        assert!(err.is_connectivity_failure());
    }

    #[tokio::test]
    async fn get_doc_maps_404_to_none() {
        let (base_url, captured, server) = start_mock_server(vec![
            respond(404, api_error_body("NOT_FOUND", "no such document")),
            respond(200, r#"{"id":"I1","name":"Ibuprofen","qty":40}"#),
        ])
        .await;
        let client = client(&base_url);

        assert_eq!(
            client
                .get_doc("ph-1", TenantCollection::Inventory, "missing")
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            client
                .get_doc("ph-1", TenantCollection::Inventory, "I1")
                .await
                .unwrap(),
            Some(json!({ "id": "I1", "name": "Ibuprofen", "qty": 40 }))
        );
        let seen = captured.lock().await.clone();
        assert_eq!(seen[1].path, "/v1/pharmacies/ph-1/inventory/I1");
        server.abort();
    }

    #[tokio::test]
    async fn set_doc_patches_with_merge_and_forced_id() {
        let (base_url, captured, server) = start_mock_server(vec![respond(200, "{}")]).await;

        client(&base_url)
            .set_doc(
                "ph-1",
                TenantCollection::PurchaseOrders,
                "PO-7",
                json!({ "id": "other", "status": "received" }),
            )
            .await
            .expect("set_doc");

        let seen = captured.lock().await.clone();
        assert_eq!(seen[0].method, "PATCH");
        assert_eq!(
            seen[0].path,
            "/v1/pharmacies/ph-1/purchaseOrders/PO-7?merge=true"
        );
        let body: serde_json::Value = serde_json::from_str(&seen[0].body).expect("json body");
        assert_eq!(body, json!({ "id": "PO-7", "status": "received" }));
        server.abort();
    }

    #[tokio::test]
    async fn delete_doc_treats_missing_as_success() {
        let (base_url, _captured, server) =
            start_mock_server(vec![respond(404, api_error_body("NOT_FOUND", "gone"))]).await;

        client(&base_url)
            .delete_doc("ph-1", TenantCollection::Trash, "T1")
            .await
            .expect("missing document is fine");
        server.abort();
    }

    #[tokio::test]
    async fn delete_collection_batches_ids() {
        let documents: Vec<serde_json::Value> = (0..1201)
            .map(|n| json!({ "id": format!("S{:04}", n), "data": { "total": n } }))
            .collect();
        let listing = json!({ "documents": documents }).to_string();
        let (base_url, captured, server) = start_mock_server(vec![
            respond(200, listing),
            respond(200, r#"{"deleted":500}"#),
            respond(200, r#"{"deleted":500}"#),
            respond(200, "{}"),
        ])
        .await;

        let deleted = client(&base_url)
            .delete_collection("ph-1", TenantCollection::Sales)
            .await
            .expect("delete collection");
        assert_eq!(deleted, 1201);

        let seen = captured.lock().await.clone();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].path, "/v1/pharmacies/ph-1/sales");
        let batch_sizes: Vec<usize> = seen[1..]
            .iter()
            .map(|request| {
                assert_eq!(request.method, "POST");
                assert_eq!(request.path, "/v1/pharmacies/ph-1/sales:batchDelete");
                let body: BatchDeleteRequest =
                    serde_json::from_str(&request.body).expect("batch body");
                body.ids.len()
            })
            .collect();
        assert_eq!(batch_sizes, vec![500, 500, 201]);
        server.abort();
    }

    #[tokio::test]
    async fn ping_accepts_any_http_answer() {
        let (base_url, captured, server) =
            start_mock_server(vec![respond(404, api_error_body("NOT_FOUND", "no root"))]).await;

        let status = client(&base_url)
            .ping(Duration::from_secs(2))
            .await
            .expect("server answered");
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(captured.lock().await[0].method, "GET");
        server.abort();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        assert!(client(&format!("http://{}", addr))
            .ping(Duration::from_secs(2))
            .await
            .is_err());
    }

    #[test]
    fn relative_urls_join_the_base() {
        let client = RemoteApiClient::new("https://api.test/", None).expect("client");
        assert_eq!(client.base_url(), "https://api.test");
        assert_eq!(client.resolve_url("/v1/x"), "https://api.test/v1/x");
        assert_eq!(client.resolve_url("v1/x"), "https://api.test/v1/x");
        assert_eq!(
            client.resolve_url("https://other.test/v1/x"),
            "https://other.test/v1/x"
        );
    }
}
