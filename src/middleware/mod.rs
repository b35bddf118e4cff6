pub mod dedup;
pub mod error_handling;
pub mod logging;
pub mod rate_limit;
pub mod versioning;

use axum::extract::ConnectInfo;
use axum::http::{Extensions, HeaderMap};
use std::net::{IpAddr, SocketAddr};

/// Source IP for rate limiting and fingerprinting. Honors the first entry of
/// `X-Forwarded-For`, then falls back to the connection peer.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                if let Ok(ip) = first.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]))
}
