//! File download capabilities.
//!
//! - `POST /v1/downloads`  mint a token for `{scope, path}` (protected)
//! - `GET  /v1/downloads/:token`  serve the file the token names (public;
//!   the token is the credential)

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use sb_auth::{Claims, TokenError};

use super::error::ApiError;
use crate::state::AppState;

/// Subject recorded on grants minted without an authenticated caller.
const DEV_SUBJECT: &str = "dev";

#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub scope: String,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DownloadResponse {
    pub token: String,
    pub url: String,
    pub expires_at: i64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/downloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn create_download(
    State(state): State<AppState>,
    claims: Option<Extension<Claims>>,
    Json(body): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let tokens = state.tokens.as_ref().ok_or_else(ApiError::tokens_unconfigured)?;
    if !state.config.downloads.scopes.contains_key(&body.scope) {
        return Err(ApiError::not_found(format!("unknown scope '{}'", body.scope)));
    }

    let subject = claims
        .as_ref()
        .map(|Extension(c)| c.sub.as_str())
        .unwrap_or(DEV_SUBJECT);
    let (token, grant) = tokens.issue_download(subject, &body.scope, &body.path)?;

    let base = state
        .config
        .downloads
        .public_base_url
        .as_deref()
        .unwrap_or("")
        .trim_end_matches('/');
    let url = format!("{base}/v1/downloads/{token}");

    Ok(Json(DownloadResponse {
        token,
        url,
        expires_at: grant.exp,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/downloads/:token
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn serve_download(
    State(state): State<AppState>,
    UrlPath(token): UrlPath<String>,
) -> Result<Response, ApiError> {
    let tokens = state.tokens.as_ref().ok_or_else(ApiError::tokens_unconfigured)?;
    let grant = tokens.verify_download(&token).map_err(|e| match e {
        TokenError::TokenExpired => ApiError::new(StatusCode::GONE, e.code(), e.to_string()),
        other => other.into(),
    })?;

    let root = state
        .config
        .downloads
        .scopes
        .get(&grant.scope)
        .ok_or_else(|| ApiError::not_found(format!("unknown scope '{}'", grant.scope)))?;

    let file_path = resolve_within(root, &grant.path).await?;
    let file = tokio::fs::File::open(&file_path).await.map_err(|e| {
        tracing::warn!(path = %file_path.display(), error = %e, "failed to open download");
        ApiError::not_found("file not found")
    })?;
    let len = file.metadata().await.ok().map(|m| m.len());

    tracing::info!(
        subject = %grant.sub,
        scope = %grant.scope,
        path = %grant.path,
        "serving download"
    );

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&content_disposition(&file_path)) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(len) = len {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    Ok(response)
}

/// Join `relative` onto `root` and make sure the canonical result is a
/// regular file inside the canonical root.  Symlinks pointing out of the
/// root are refused along with `..` traversal.
async fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, ApiError> {
    let canonical_root = tokio::fs::canonicalize(root).await.map_err(|e| {
        tracing::warn!(root = %root.display(), error = %e, "download scope root unavailable");
        ApiError::not_found("scope root unavailable")
    })?;
    let candidate = tokio::fs::canonicalize(root.join(relative))
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;

    if !candidate.starts_with(&canonical_root) {
        tracing::warn!(path = relative, "download path escapes its scope root");
        return Err(TokenError::PathRejected(relative.to_owned()).into());
    }
    let is_file = tokio::fs::metadata(&candidate)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(candidate)
}

fn content_disposition(path: &Path) -> String {
    let name: String = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".into())
        .chars()
        .filter(|c| !c.is_control() && *c != '"' && *c != '\\')
        .collect();
    format!("attachment; filename=\"{name}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_within_accepts_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("reports")).unwrap();
        std::fs::write(dir.path().join("reports/q1.csv"), "a,b\n").unwrap();

        let resolved = resolve_within(dir.path(), "reports/q1.csv").await.unwrap();
        assert!(resolved.ends_with("reports/q1.csv"));
    }

    #[tokio::test]
    async fn resolve_within_refuses_directories_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("reports")).unwrap();

        let err = resolve_within(dir.path(), "reports").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        let err = resolve_within(dir.path(), "missing.txt").await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn resolve_within_refuses_symlink_escape() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "x").unwrap();
        let root = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), root.path().join("link.txt"))
            .unwrap();

        let err = resolve_within(root.path(), "link.txt").await.unwrap_err();
        assert_eq!(err.code, "path_rejected");
    }

    #[test]
    fn content_disposition_strips_quotes() {
        let value = content_disposition(Path::new("/tmp/we\"ird.txt"));
        assert_eq!(value, "attachment; filename=\"weird.txt\"");
    }
}
