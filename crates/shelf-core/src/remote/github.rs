//! GitHub-backed remote store.
//!
//! Catalogs live in a repository (contents API, one commit per write) and
//! binaries live as release assets (releases API plus the uploads host).

use super::retry::{retry_async, RetryConfig};
use super::{AssetHandle, ByteStream, FileContent, ReleaseHandle, RemoteStore};
use crate::config::NetworkConfig;
use crate::error::{Result, ShelfError};
use async_trait::async_trait;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

const JSON_ACCEPT: &str = "application/vnd.github+json";
const RAW_ACCEPT: &str = "application/vnd.github.raw+json";
const BINARY_ACCEPT: &str = "application/octet-stream";

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReleaseResponse {
    id: u64,
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct AssetResponse {
    id: u64,
    name: String,
    size: u64,
}

impl From<ReleaseResponse> for ReleaseHandle {
    fn from(r: ReleaseResponse) -> Self {
        ReleaseHandle {
            id: r.id,
            tag: r.tag_name,
        }
    }
}

impl From<AssetResponse> for AssetHandle {
    fn from(a: AssetResponse) -> Self {
        AssetHandle {
            id: a.id,
            name: a.name,
            size: a.size,
        }
    }
}

/// [`RemoteStore`] over the GitHub REST API.
pub struct GitHubStore {
    client: Client,
    api_base: String,
    uploads_base: String,
    retry: RetryConfig,
}

impl GitHubStore {
    /// Create a store. Without a token only public reads will succeed.
    pub fn new(token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(JSON_ACCEPT));
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(NetworkConfig::GITHUB_API_VERSION),
        );
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ShelfError::Config {
                    message: "GitHub token contains invalid header characters".to_string(),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        // No client-wide timeout: asset transfers may legitimately run long.
        let client = Client::builder()
            .default_headers(headers)
            .user_agent(NetworkConfig::USER_AGENT)
            .connect_timeout(NetworkConfig::CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ShelfError::Remote {
                message: format!("Failed to create HTTP client: {}", e),
                status_code: None,
            })?;

        Ok(Self {
            client,
            api_base: NetworkConfig::GITHUB_API_BASE.to_string(),
            uploads_base: NetworkConfig::GITHUB_UPLOADS_BASE.to_string(),
            retry: RetryConfig::new(),
        })
    }

    /// Point the store at a GitHub Enterprise host.
    pub fn with_base_urls(mut self, api_base: &str, uploads_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self.uploads_base = uploads_base.trim_end_matches('/').to_string();
        self
    }

    /// Replace the backoff used for reads and get-or-create lookups.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn repo_url(&self, owner: &str, repo: &str, rest: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            rest
        )
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str, git_ref: Option<&str>) -> String {
        let encoded: Vec<String> = path
            .trim_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        let mut url = self.repo_url(owner, repo, &format!("contents/{}", encoded.join("/")));
        if let Some(git_ref) = git_ref {
            url.push_str(&format!("?ref={}", urlencoding::encode(git_ref)));
        }
        url
    }

    /// GET with retries for transient failures.
    async fn get_checked(&self, url: &str, accept: &str, context: &str) -> Result<Response> {
        let (result, stats) = retry_async(&self.retry, context, || async move {
            let request = self
                .client
                .get(url)
                .header(header::ACCEPT, accept)
                .timeout(NetworkConfig::REQUEST_TIMEOUT);
            send_checked(request, context).await
        })
        .await;

        if stats.attempts > 1 {
            debug!("{} took {} attempts", context, stats.attempts);
        }
        result
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, context: &str) -> Result<T> {
        let response = self.get_checked(url, JSON_ACCEPT, context).await?;
        response.json().await.map_err(|e| ShelfError::Remote {
            message: format!("Failed to parse response for {}: {}", context, e),
            status_code: None,
        })
    }

    async fn current_sha(&self, owner: &str, repo: &str, path: &str) -> Result<Option<String>> {
        let url = self.contents_url(owner, repo, path, None);
        match self
            .get_json::<ContentsResponse>(&url, &format!("{}/{}:{}", owner, repo, path))
            .await
        {
            Ok(contents) => Ok(Some(contents.sha)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

async fn send_checked(request: RequestBuilder, context: &str) -> Result<Response> {
    let response = request.send().await.map_err(|e| ShelfError::Remote {
        message: format!("{} failed: {}", context, e),
        status_code: e.status().map(|s| s.as_u16()),
    })?;
    check_status(response, context).await
}

/// Map non-success responses onto the error taxonomy.
async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::NOT_FOUND {
        return Err(ShelfError::not_found(context));
    }

    let headers = response.headers();
    let remaining = header_u64(headers, "x-ratelimit-remaining");
    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && remaining == Some(0))
    {
        let retry_after_secs = header_u64(headers, "retry-after").or_else(|| {
            header_u64(headers, "x-ratelimit-reset")
                .map(|reset| reset.saturating_sub(Utc::now().timestamp().max(0) as u64))
        });
        return Err(ShelfError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(200).collect();
    Err(ShelfError::Remote {
        message: format!("{} returned {}: {}", context, status, body),
        status_code: Some(status.as_u16()),
    })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn decode_base64_content(content: &str) -> Result<Bytes> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map(Bytes::from)
        .map_err(|e| ShelfError::Remote {
            message: format!("Invalid base64 file content: {}", e),
            status_code: None,
        })
}

#[async_trait]
impl RemoteStore for GitHubStore {
    async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> Result<FileContent> {
        let url = self.contents_url(owner, repo, path, git_ref);
        let context = format!("{}/{}:{}", owner, repo, path);
        let contents: ContentsResponse = self.get_json(&url, &context).await?;

        let bytes = match (contents.encoding.as_deref(), contents.content.as_deref()) {
            (Some("base64"), Some(content)) if !content.is_empty() => {
                decode_base64_content(content)?
            }
            // Files over 1 MB come back without inline content.
            _ => self.get_checked(&url, RAW_ACCEPT, &context).await?.bytes().await?,
        };

        Ok(FileContent {
            bytes,
            revision: contents.sha,
        })
    }

    async fn commit_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        bytes: Bytes,
        message: &str,
    ) -> Result<()> {
        let sha = self.current_sha(owner, repo, path).await?;
        let mut body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(&bytes),
        });
        if let Some(sha) = sha {
            body["sha"] = serde_json::Value::String(sha);
        }

        let url = self.contents_url(owner, repo, path, None);
        let request = self
            .client
            .put(&url)
            .json(&body)
            .timeout(NetworkConfig::REQUEST_TIMEOUT);
        send_checked(request, &format!("commit {}/{}:{}", owner, repo, path)).await?;

        info!("Committed {}/{}:{} ({})", owner, repo, path, message);
        Ok(())
    }

    async fn ensure_release(&self, owner: &str, repo: &str, tag: &str) -> Result<ReleaseHandle> {
        match self.get_release_by_tag(owner, repo, tag).await {
            Ok(release) => return Ok(release),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let url = self.repo_url(owner, repo, "releases");
        let request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "tag_name": tag, "name": tag }))
            .timeout(NetworkConfig::REQUEST_TIMEOUT);
        match send_checked(request, &format!("create release '{}'", tag)).await {
            Ok(response) => {
                let release: ReleaseResponse = response.json().await?;
                info!("Created release '{}' in {}/{}", tag, owner, repo);
                Ok(release.into())
            }
            // Lost a create race: the release exists now.
            Err(ShelfError::Remote {
                status_code: Some(422),
                ..
            }) => self.get_release_by_tag(owner, repo, tag).await,
            Err(e) => Err(e),
        }
    }

    async fn get_release_by_tag(
        &self,
        owner: &str,
        repo: &str,
        tag: &str,
    ) -> Result<ReleaseHandle> {
        let url = self.repo_url(
            owner,
            repo,
            &format!("releases/tags/{}", urlencoding::encode(tag)),
        );
        let release: ReleaseResponse = self
            .get_json(&url, &format!("release '{}' in {}/{}", tag, owner, repo))
            .await?;
        Ok(release.into())
    }

    async fn list_releases(&self, owner: &str, repo: &str) -> Result<Vec<ReleaseHandle>> {
        let per_page = NetworkConfig::PER_PAGE;
        let mut releases = Vec::new();

        for page in 1..=NetworkConfig::MAX_PAGES {
            let url = self.repo_url(
                owner,
                repo,
                &format!("releases?per_page={}&page={}", per_page, page),
            );
            let batch: Vec<ReleaseResponse> = self
                .get_json(&url, &format!("releases of {}/{}", owner, repo))
                .await?;
            let count = batch.len();
            releases.extend(batch.into_iter().map(ReleaseHandle::from));
            if count < per_page as usize {
                break;
            }
        }

        Ok(releases)
    }

    async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> Result<Vec<AssetHandle>> {
        let per_page = NetworkConfig::PER_PAGE;
        let mut assets = Vec::new();

        for page in 1..=NetworkConfig::MAX_PAGES {
            let url = self.repo_url(
                owner,
                repo,
                &format!(
                    "releases/{}/assets?per_page={}&page={}",
                    release_id, per_page, page
                ),
            );
            let batch: Vec<AssetResponse> = self
                .get_json(&url, &format!("assets of release {}", release_id))
                .await?;
            let count = batch.len();
            assets.extend(batch.into_iter().map(AssetHandle::from));
            if count < per_page as usize {
                break;
            }
        }

        Ok(assets)
    }

    async fn upload_asset(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
        name: &str,
        source: &Path,
        size: u64,
        content_type: &str,
    ) -> Result<AssetHandle> {
        let file = tokio::fs::File::open(source)
            .await
            .map_err(|e| ShelfError::io_with_path(e, source))?;
        let url = format!(
            "{}/repos/{}/{}/releases/{}/assets?name={}",
            self.uploads_base,
            urlencoding::encode(owner),
            urlencoding::encode(repo),
            release_id,
            urlencoding::encode(name)
        );

        let request = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, size)
            .body(reqwest::Body::from(file));
        let response = send_checked(request, &format!("upload '{}'", name)).await?;
        let asset: AssetResponse = response.json().await?;

        info!("Uploaded '{}' ({} bytes) to {}/{}", name, size, owner, repo);
        Ok(asset.into())
    }

    async fn download_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<ByteStream> {
        let url = self.repo_url(owner, repo, &format!("releases/assets/{}", asset_id));
        let response = self
            .get_checked(&url, BINARY_ACCEPT, &format!("asset {} in {}/{}", asset_id, owner, repo))
            .await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ShelfError::from))
            .boxed())
    }

    async fn delete_asset(&self, owner: &str, repo: &str, asset_id: u64) -> Result<()> {
        let url = self.repo_url(owner, repo, &format!("releases/assets/{}", asset_id));
        let request = self
            .client
            .delete(&url)
            .timeout(NetworkConfig::REQUEST_TIMEOUT);
        send_checked(
            request,
            &format!("asset {} in {}/{}", asset_id, owner, repo),
        )
        .await?;
        debug!("Deleted asset {} from {}/{}", asset_id, owner, repo);
        Ok(())
    }
}
