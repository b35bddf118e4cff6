//! API version negotiation.
//!
//! Precedence: `/api/v{N}/…` path prefix, `API-Version` header,
//! `Accept: application/vnd.fashion-api.v{N}+json`, `version` query
//! parameter. The resolved version is echoed on every response together with
//! the current and supported versions. Only v1 exists today.

use axum::{
    extract::Request,
    http::{HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

pub const CURRENT_VERSION: u32 = 1;
pub const SUPPORTED_VERSIONS: [u32; 1] = [1];

pub async fn versioning(mut req: Request, next: Next) -> Response {
    let (requested, rewritten_path) = version_from_path(req.uri().path());

    let requested = requested
        .or_else(|| header_version(&req, "api-version"))
        .or_else(|| accept_version(&req))
        .or_else(|| query_version(req.uri().query().unwrap_or("")));

    let resolved = match requested {
        Some(Ok(version)) if SUPPORTED_VERSIONS.contains(&version) => version,
        Some(Ok(version)) => {
            return versioned(
                AppError::UnsupportedVersion(format!("v{version}")).into_response(),
                CURRENT_VERSION,
            )
        }
        Some(Err(raw)) => {
            return versioned(
                AppError::UnsupportedVersion(raw).into_response(),
                CURRENT_VERSION,
            );
        }
        None => CURRENT_VERSION,
    };

    if let Some(path) = rewritten_path {
        if let Some(uri) = rebuild_uri(req.uri(), &path) {
            *req.uri_mut() = uri;
        }
    }

    versioned(next.run(req).await, resolved)
}

fn versioned(mut response: Response, resolved: u32) -> Response {
    let supported = SUPPORTED_VERSIONS
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&resolved.to_string()) {
        headers.insert("API-Version", value);
    }
    if let Ok(value) = HeaderValue::from_str(&CURRENT_VERSION.to_string()) {
        headers.insert("API-Current-Version", value);
    }
    if let Ok(value) = HeaderValue::from_str(&supported) {
        headers.insert("API-Supported-Versions", value);
    }
    response
}

type VersionParse = Result<u32, String>;

/// `/api/v{N}/rest` → (version, `/api/rest`)
fn version_from_path(path: &str) -> (Option<VersionParse>, Option<String>) {
    let Some(rest) = path.strip_prefix("/api/v") else {
        return (None, None);
    };
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return (None, None);
    }
    let remainder = &rest[digits.len()..];
    if !(remainder.is_empty() || remainder.starts_with('/')) {
        return (None, None);
    }
    let version = digits
        .parse::<u32>()
        .map_err(|_| format!("v{digits}"));
    let rewritten = format!("/api{remainder}");
    (Some(version), Some(rewritten))
}

fn header_version(req: &Request, name: &str) -> Option<VersionParse> {
    let raw = req.headers().get(name)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    let digits = raw.trim_start_matches(['v', 'V']);
    Some(digits.parse::<u32>().map_err(|_| raw.to_string()))
}

fn accept_version(req: &Request) -> Option<VersionParse> {
    let accept = req.headers().get("accept")?.to_str().ok()?;
    let marker = "vnd.fashion-api.v";
    let start = accept.find(marker)? + marker.len();
    let digits: String = accept[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Some(Err(accept.to_string()));
    }
    Some(digits.parse::<u32>().map_err(|_| accept.to_string()))
}

fn query_version(query: &str) -> Option<VersionParse> {
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("version=") {
            let digits = value.trim_start_matches(['v', 'V']);
            return Some(digits.parse::<u32>().map_err(|_| value.to_string()));
        }
    }
    None
}

fn rebuild_uri(uri: &Uri, new_path: &str) -> Option<Uri> {
    let path_and_query = match uri.query() {
        Some(query) => format!("{new_path}?{query}"),
        None => new_path.to_string(),
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = path_and_query.parse().ok();
    Uri::from_parts(parts).ok()
}
