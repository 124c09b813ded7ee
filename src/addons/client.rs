//! Marketplace API client.
//!
//! Every JSON endpoint answers with a `{code, data, msg}` envelope.
//! Downloads answer with raw archive bytes, or with a `{msg}` error body
//! recognisable by its leading `{`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{FileCache, KeyValueCache};
use crate::config::{DEFAULT_TIMEOUT_SECS, ManagerConfig, SitePaths};

/// Cache key of the login payload.
pub const TOKEN_CACHE_KEY: &str = "cloud_token";

/// How long a login token is kept.
pub const TOKEN_TTL: Duration = Duration::from_secs(86_400);

/// Header carrying the login token.
pub const TOKEN_HEADER: &str = "token";

const ABNORMAL_DATA: &str = "server returned abnormal data";

/// Marketplace failures.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("404 Not Found")]
    NotFound,

    #[error("request failed: {0}")]
    Transport(String),

    /// Envelope carried a non-200 code.
    #[error("{msg}")]
    Api { code: i64, msg: String },

    #[error("{ABNORMAL_DATA}")]
    AbnormalData,

    #[error("no permission to save {}", path.display())]
    SaveDenied { path: PathBuf },

    #[error("filter type must not be empty")]
    EmptyFilterType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

/// One call against the marketplace.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    endpoint: String,
    query: Vec<(String, String)>,
    form: Vec<(String, String)>,
}

impl ApiRequest {
    #[must_use]
    pub fn get(endpoint: &str) -> Self {
        Self::new(Method::Get, endpoint)
    }

    #[must_use]
    pub fn post(endpoint: &str) -> Self {
        Self::new(Method::Post, endpoint)
    }

    fn new(method: Method, endpoint: &str) -> Self {
        Self {
            method,
            endpoint: endpoint.trim_start_matches('/').to_string(),
            query: Vec::new(),
            form: Vec::new(),
        }
    }

    /// Adds a query-string parameter.
    #[must_use]
    pub fn query(mut self, key: &str, value: &str) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Adds a form field (POST body).
    #[must_use]
    pub fn form(mut self, key: &str, value: &str) -> Self {
        self.form.push((key.to_string(), value.to_string()));
        self
    }
}

/// Blocking marketplace client.
///
/// The login token lives in the injected [`KeyValueCache`] and is read
/// again on every request, so a login through one client is visible to
/// every client sharing the cache.
pub struct PackageClient {
    http: Client,
    base_url: String,
    host_app_version: String,
    scratch_dir: PathBuf,
    cache: Arc<dyn KeyValueCache>,
}

impl PackageClient {
    /// Creates a client downloading into `scratch_dir`.
    #[must_use]
    pub fn new(
        base_url: &str,
        host_app_version: &str,
        scratch_dir: &Path,
        cache: Arc<dyn KeyValueCache>,
    ) -> Self {
        Self {
            http: build_http(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            base_url: base_url.trim_end_matches('/').to_string(),
            host_app_version: host_app_version.to_string(),
            scratch_dir: scratch_dir.to_path_buf(),
            cache,
        }
    }

    /// Builds a client from the config, caching tokens on disk.
    #[must_use]
    pub fn from_config(config: &ManagerConfig, paths: &SitePaths) -> Self {
        let cache: Arc<dyn KeyValueCache> = Arc::new(FileCache::new(&paths.cache_dir()));
        Self::new(
            &config.api_url,
            &config.host_app_version,
            &paths.scratch(),
            cache,
        )
        .with_timeout(Duration::from_secs(config.request_timeout_secs))
    }

    /// Replaces the HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = build_http(timeout);
        self
    }

    /// Directory downloads are written to.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    fn token(&self) -> Option<String> {
        let payload = self.cache.get(TOKEN_CACHE_KEY)?;
        payload
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    fn builder(&self, req: &ApiRequest) -> RequestBuilder {
        let url = self.url(&req.endpoint);
        let mut builder = match req.method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
        };
        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if !req.form.is_empty() {
            builder = builder.form(&req.form);
        }
        if let Some(token) = self.token() {
            builder = builder.header(TOKEN_HEADER, token);
        }
        builder
    }

    fn send(&self, req: &ApiRequest) -> Result<Vec<u8>, RemoteError> {
        debug!("[ADDON-CLIENT] {:?} {}", req.method, req.endpoint);

        let response = self
            .builder(req)
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        if !status.is_success() {
            return Err(RemoteError::Transport(format!("HTTP {}", status)));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    /// Performs a JSON-envelope call and returns its `data`.
    pub fn request(&self, req: &ApiRequest) -> Result<Value, RemoteError> {
        self.request_with(req, |data| data)
    }

    /// Performs a JSON-envelope call and maps `data` through `on_success`.
    pub fn request_with<T, F>(&self, req: &ApiRequest, on_success: F) -> Result<T, RemoteError>
    where
        F: FnOnce(Value) -> T,
    {
        let body = self.send(req)?;
        let data = unwrap_envelope(&body)?;
        Ok(on_success(data))
    }

    /// Lists marketplace packages matching `filters`.
    pub fn list(&self, filters: &[(&str, &str)]) -> Result<Value, RemoteError> {
        let req = filters
            .iter()
            .fold(ApiRequest::get("appcenter/getlist"), |req, (k, v)| req.query(k, v));
        self.request(&req)
    }

    /// Details of one package.
    pub fn info(&self, name: &str) -> Result<Value, RemoteError> {
        self.request(&ApiRequest::get("appcenter/getinfo").query("name", name))
    }

    /// Details of several packages at once.
    pub fn infos(&self, names: &[&str]) -> Result<Value, RemoteError> {
        self.request(&ApiRequest::get("appcenter/getinfos").query("names", &names.join(",")))
    }

    /// Available filter values for a listing type.
    pub fn filter(&self, kind: &str) -> Result<Value, RemoteError> {
        if kind.trim().is_empty() {
            return Err(RemoteError::EmptyFilterType);
        }
        self.request(&ApiRequest::get("appcenter/getfilter").query("type", kind))
    }

    /// Logs in and caches the returned user info for 24 hours.
    pub fn login(&self, username: &str, password: &str) -> Result<Value, RemoteError> {
        let req = ApiRequest::post("user/login")
            .form("username", username)
            .form("password", password);

        let userinfo = self.request_with(&req, |data| {
            data.get("userinfo").cloned().unwrap_or(Value::Null)
        })?;

        if let Err(e) = self.cache.set(TOKEN_CACHE_KEY, userinfo.clone(), TOKEN_TTL) {
            warn!("[ADDON-CLIENT] Could not cache login token: {}", e);
        }
        info!("[ADDON-CLIENT] Logged in as {}", username);
        Ok(userinfo)
    }

    /// Downloads `name@version` to `<scratch>/<name>.zip`.
    pub fn download(&self, name: &str, version: &str) -> Result<PathBuf, RemoteError> {
        self.download_as(name, version, name)
    }

    /// Downloads `name@version` to `<scratch>/<stem>.zip`.
    pub fn download_as(
        &self,
        name: &str,
        version: &str,
        stem: &str,
    ) -> Result<PathBuf, RemoteError> {
        let req = ApiRequest::get("appcenter/download")
            .query("name", name)
            .query("version", version)
            .query("host_app_version", &self.host_app_version);

        let body = self.send(&req)?;
        if body.first() == Some(&b'{') {
            let msg = serde_json::from_slice::<Value>(&body)
                .ok()
                .and_then(|v| v.get("msg").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| ABNORMAL_DATA.to_string());
            return Err(RemoteError::Api { code: 0, msg });
        }

        let path = self.scratch_dir.join(format!("{}.zip", stem));
        if path.exists() {
            let _ = fs::remove_file(&path);
        }

        if let Err(e) = write_archive(&path, &body) {
            warn!("[ADDON-CLIENT] Writing {:?} failed: {}", path, e);
            let _ = fs::remove_file(&path);
            return Err(RemoteError::SaveDenied { path });
        }

        info!(
            "[ADDON-CLIENT] Downloaded {} {} ({} bytes)",
            name,
            version,
            body.len()
        );
        Ok(path)
    }
}

fn build_http(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(concat!("cms-addons/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn write_archive(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.flush()
}

/// Extracts `data` from a `{code, data, msg}` body.
fn unwrap_envelope(body: &[u8]) -> Result<Value, RemoteError> {
    let json: Value = serde_json::from_slice(body).map_err(|_| RemoteError::AbnormalData)?;
    let code = json
        .get("code")
        .and_then(|c| c.as_i64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
        .ok_or(RemoteError::AbnormalData)?;

    if code == 200 {
        return Ok(json.get("data").cloned().unwrap_or(Value::Null));
    }

    let msg = json
        .get("msg")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Err(RemoteError::Api { code, msg })
}
