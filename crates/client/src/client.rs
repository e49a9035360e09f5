//! Authenticated request gateway
//!
//! Every call to the certscan API goes through [`ApiClient`]. The bearer
//! token is read from the [`SessionStore`] for each request as it is
//! assembled for sending, so a logout takes effect on the very next call.
//! Authorization failures on authenticated calls clear the session and fire
//! the `on_unauthorized` hook in one place.

use crate::error::ApiError;
use crate::progress::{MultipartUpload, ProgressCallback, UploadProgress};
use crate::session::SessionStore;
use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, ClientBuilder, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use url::Url;

/// Base address of the hosted certscan API
pub const DEFAULT_BASE_URL: &str = "https://cerisuckback.onrender.com/api";

const DEFAULT_USER_AGENT: &str = concat!("certscan-client/", env!("CARGO_PKG_VERSION"));

/// Invoked after an authenticated call was rejected and the session cleared
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: HeaderMap,
    query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override or add a header for this call
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(MultipartUpload, Option<ProgressCallback>),
}

impl RequestBody {
    const fn is_multipart(&self) -> bool {
        matches!(self, Self::Multipart(..))
    }
}

/// Certscan API client
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionStore>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a new client with an in-memory session
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Session store consulted for every request
    pub const fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let response = self
            .send(Method::GET, path, RequestBody::Empty, options)
            .await?;
        decode(response).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let body = RequestBody::Json(serde_json::to_value(body)?);
        let response = self.send(Method::POST, path, body, options).await?;
        decode(response).await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let body = RequestBody::Json(serde_json::to_value(body)?);
        let response = self.send(Method::PUT, path, body, options).await?;
        decode(response).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<T, ApiError> {
        let response = self
            .send(Method::DELETE, path, RequestBody::Empty, options)
            .await?;
        decode(response).await
    }

    /// GET returning the raw body, for file downloads
    pub async fn get_bytes(&self, path: &str, options: &RequestOptions) -> Result<Bytes, ApiError> {
        let response = self
            .send(Method::GET, path, RequestBody::Empty, options)
            .await?;
        Ok(response.bytes().await?)
    }

    /// POST a multipart body, reporting progress as file bytes are handed off
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        upload: MultipartUpload,
        options: &RequestOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<T, ApiError> {
        let body = RequestBody::Multipart(upload, progress);
        let response = self.send(Method::POST, path, body, options).await?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Assemble headers for one call; the token is read here, at send time.
    /// Also returns the token the call carries.
    fn headers(
        &self,
        body: &RequestBody,
        options: &RequestOptions,
    ) -> Result<(HeaderMap, Option<String>), ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if !body.is_multipart() {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        for (name, value) in &options.headers {
            // The transport supplies the multipart boundary
            if body.is_multipart() && name == header::CONTENT_TYPE {
                continue;
            }
            headers.insert(name.clone(), value.clone());
        }

        let token = self.session.token();
        match &token {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    ApiError::Configuration("session token is not a valid header value".into())
                })?;
                headers.insert(header::AUTHORIZATION, value);
            }
            None => {
                headers.remove(header::AUTHORIZATION);
            }
        }

        Ok((headers, token))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
        options: &RequestOptions,
    ) -> Result<Response, ApiError> {
        let (headers, token) = self.headers(&body, options)?;
        let mut request = self
            .client
            .request(method.clone(), self.url(path))
            .headers(headers);
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }

        request = match body {
            RequestBody::Empty => request,
            RequestBody::Json(value) => request.json(&value),
            RequestBody::Multipart(upload, callback) => {
                let progress =
                    callback.map(|callback| UploadProgress::new(upload.total_bytes(), callback));
                request.multipart(upload.into_form(progress.as_ref())?)
            }
        };

        debug!(%method, path, authenticated = token.is_some(), "Sending API request");
        let response = request.send().await.map_err(|e| {
            warn!(%method, path, "API request did not reach the server: {e}");
            ApiError::from(e)
        })?;

        let status = response.status();
        debug!(%method, path, status = status.as_u16(), "API response received");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await.unwrap_or_else(|e| {
            debug!(%method, path, "Failed to read error response body: {e}");
            Bytes::new()
        });
        let err = ApiError::from_response(status, &body);
        self.observe_failure(&method, path, &err, token.as_deref());
        Err(err)
    }

    fn observe_failure(&self, method: &Method, path: &str, err: &ApiError, token: Option<&str>) {
        match err {
            ApiError::Auth { status, .. } => match token {
                // Concurrent rejections of the same token end the session once
                Some(token) if self.session.revoke(token) => {
                    warn!(%method, path, status, "Session rejected by the server, signing out");
                    if let Some(hook) = &self.on_unauthorized {
                        hook();
                    }
                }
                Some(_) => debug!(%method, path, status, "Stale session rejected"),
                None => debug!(%method, path, status, "Unauthenticated request rejected"),
            },
            ApiError::Validation { errors, .. } => {
                warn!(%method, path, fields = ?errors.keys().collect::<Vec<_>>(), "Validation failed");
            }
            ApiError::Server {
                status, message, ..
            } => {
                error!(%method, path, status, "API call failed: {message}");
            }
            _ => {}
        }
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::from_slice(b"null")?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

/// Builder for ApiClient
#[derive(Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    session: Option<Arc<SessionStore>>,
    on_unauthorized: Option<UnauthorizedHook>,
}

impl ApiClientBuilder {
    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set a request timeout. There is none by default.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Session store to read credentials from
    #[must_use]
    pub fn session(mut self, session: Arc<SessionStore>) -> Self {
        self.session = Some(session);
        self
    }

    /// Hook run after a 401/403 on an authenticated call
    #[must_use]
    pub fn on_unauthorized(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unauthorized = Some(Arc::new(hook));
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ApiError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ApiError::Configuration("base_url is required".into()))?;

        let parsed = Url::parse(&base_url)
            .map_err(|e| ApiError::Configuration(format!("invalid base_url {base_url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::Configuration(format!(
                "base_url must be http or https, got {}",
                parsed.scheme()
            )));
        }

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new()
            .user_agent(self.user_agent.unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()));
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }
        let client = client_builder.build().map_err(|e| {
            ApiError::Configuration(format!("failed to build HTTP client: {e}"))
        })?;

        Ok(ApiClient {
            client,
            base_url,
            session: self
                .session
                .unwrap_or_else(|| Arc::new(SessionStore::in_memory())),
            on_unauthorized: self.on_unauthorized,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_base_url() {
        let result = ApiClient::builder().build();
        assert!(matches!(result, Err(ApiError::Configuration(_))));
    }

    #[test]
    fn test_builder_rejects_non_http_scheme() {
        let result = ApiClient::new("ftp://example.com");
        assert!(matches!(result, Err(ApiError::Configuration(_))));
        assert!(ApiClient::new("not a url").is_err());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = ApiClient::new("http://localhost:8080/api/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(client.url("/login"), "http://localhost:8080/api/login");
        assert_eq!(client.url("login"), "http://localhost:8080/api/login");
    }

    #[test]
    fn test_headers_follow_session_at_call_time() {
        let client = ApiClient::new("http://localhost").unwrap();
        let options = RequestOptions::new();

        let (headers, token) = client.headers(&RequestBody::Empty, &options).unwrap();
        assert!(token.is_none());
        assert!(headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCEPT], "application/json");

        client.session().set_token("abc123");
        let (headers, token) = client.headers(&RequestBody::Empty, &options).unwrap();
        assert_eq!(token.as_deref(), Some("abc123"));
        assert_eq!(headers[header::AUTHORIZATION], "Bearer abc123");

        client.session().clear_token();
        let (headers, _) = client.headers(&RequestBody::Empty, &options).unwrap();
        assert!(headers.get(header::AUTHORIZATION).is_none());
    }

    #[test]
    fn test_multipart_drops_json_content_type() {
        let client = ApiClient::new("http://localhost").unwrap();
        let options = RequestOptions::new().header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data"),
        );
        let body = RequestBody::Multipart(MultipartUpload::new(), None);

        let (headers, _) = client.headers(&body, &options).unwrap();
        assert!(headers.get(header::CONTENT_TYPE).is_none());
        assert_eq!(headers[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_per_call_header_override() {
        let client = ApiClient::new("http://localhost").unwrap();
        let options =
            RequestOptions::new().header(header::ACCEPT, HeaderValue::from_static("application/pdf"));

        let (headers, _) = client.headers(&RequestBody::Empty, &options).unwrap();
        assert_eq!(headers[header::ACCEPT], "application/pdf");
    }
}
