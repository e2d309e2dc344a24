//! HTTP decision surface: a thin axum router over the evaluator.
//!
//! Enforcement (redirects, error pages) belongs to the reverse proxy in
//! front of this service; these endpoints only report the required policy.

use std::collections::HashMap;
use std::net::IpAddr;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::access::errors::error_count;
use crate::access::evaluator;
use crate::access::types::{DecisionResponse, ReloadResponse, RequestDescriptor, Subject};
use crate::access::{validator, AccessControlHandle};
use crate::settings::Settings;

#[derive(Clone)]
struct AppState {
    handle: AccessControlHandle,
    config_path: String,
}

pub fn router(handle: AccessControlHandle, config_path: String) -> Router {
    Router::new()
        .route("/api/v1/decision", post(handle_decision))
        .route("/api/v1/forward", get(handle_forward))
        .route("/api/v1/reload", post(handle_reload))
        .route("/healthz", get(health))
        .with_state(AppState {
            handle,
            config_path,
        })
}

pub async fn serve(
    settings: Settings,
    handle: AccessControlHandle,
    config_path: String,
) -> Result<(), crate::errors::GatewayError> {
    let app = router(handle, config_path);
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_decision(
    State(state): State<AppState>,
    Json(req): Json<RequestDescriptor>,
) -> impl IntoResponse {
    let acl = state.handle.current();
    let decision = evaluator::decide(&acl, &req);
    tracing::debug!(
        domain = %req.domain,
        policy = %decision.policy,
        rule = ?decision.rule,
        "Evaluated request"
    );
    Json(DecisionResponse {
        policy: decision.policy,
    })
}

/// Forward-auth style entry point: the reverse proxy copies the original
/// request's routing headers (`X-Forwarded-*`) and the session layer's
/// identity headers (`Remote-User`, `Remote-Groups`) onto a body-less GET.
async fn handle_forward(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let req = match descriptor_from_headers(&headers) {
        Ok(req) => req,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let acl = state.handle.current();
    let decision = evaluator::decide(&acl, &req);
    tracing::debug!(
        domain = %req.domain,
        path = %req.path,
        user = %req.subject.username,
        policy = %decision.policy,
        rule = ?decision.rule,
        "Evaluated forwarded request"
    );
    Json(DecisionResponse {
        policy: decision.policy,
    })
    .into_response()
}

async fn handle_reload(State(state): State<AppState>) -> Response {
    let settings = match Settings::load(&state.config_path) {
        Ok(settings) => settings,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let (acl, diagnostics) = validator::validate(&settings.access_control);
    let messages: Vec<String> = diagnostics.iter().map(|d| d.to_string()).collect();
    match acl {
        Some(acl) => {
            state.handle.replace(acl);
            tracing::info!("Reloaded access control configuration");
            Json(ReloadResponse {
                reloaded: true,
                diagnostics: messages,
            })
            .into_response()
        }
        None => {
            tracing::warn!(
                errors = error_count(&diagnostics),
                "Reload rejected; keeping the current rule set"
            );
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ReloadResponse {
                    reloaded: false,
                    diagnostics: messages,
                }),
            )
                .into_response()
        }
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

fn descriptor_from_headers(headers: &HeaderMap) -> Result<RequestDescriptor, String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let domain = header("x-forwarded-host")
        .ok_or("missing X-Forwarded-Host header")?
        .to_string();
    let uri = header("x-forwarded-uri").unwrap_or("/");
    let method = header("x-forwarded-method").unwrap_or("GET").to_string();
    let source_ip: IpAddr = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .ok_or("missing X-Forwarded-For header")?
        .parse()
        .map_err(|_| "X-Forwarded-For does not contain a valid IP address".to_string())?;

    let subject = match header("remote-user") {
        Some(user) => Subject {
            username: user.to_string(),
            groups: header("remote-groups")
                .map(|groups| {
                    groups
                        .split(',')
                        .map(str::trim)
                        .filter(|g| !g.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        },
        None => Subject::anonymous(),
    };

    let (path, query) = split_uri(uri);
    Ok(RequestDescriptor {
        domain,
        path,
        method,
        source_ip,
        subject,
        query,
    })
}

fn split_uri(uri: &str) -> (String, HashMap<String, Vec<String>>) {
    match uri.split_once('?') {
        Some((path, qs)) => (path.to_string(), parse_query_string(qs)),
        None => (uri.to_string(), HashMap::new()),
    }
}

fn parse_query_string(qs: &str) -> HashMap<String, Vec<String>> {
    let mut query: HashMap<String, Vec<String>> = HashMap::new();
    for pair in qs.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        query
            .entry(decode_component(key))
            .or_default()
            .push(decode_component(value));
    }
    query
}

/// Percent-decode one query-string component so rule conditions compare
/// against the text the client actually sent. `+` means space in query
/// strings. Undecodable input is kept verbatim.
fn decode_component(component: &str) -> String {
    let component = component.replace('+', " ");
    urlencoding::decode(&component)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(component)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_descriptor_from_headers_full() {
        let map = headers(&[
            ("x-forwarded-host", "app.example.com"),
            ("x-forwarded-uri", "/dashboard?tab=usage&tab=billing"),
            ("x-forwarded-method", "POST"),
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("remote-user", "alice"),
            ("remote-groups", "dev, oncall"),
        ]);
        let req = descriptor_from_headers(&map).unwrap();
        assert_eq!(req.domain, "app.example.com");
        assert_eq!(req.path, "/dashboard");
        assert_eq!(req.method, "POST");
        assert_eq!(req.source_ip, "203.0.113.9".parse::<IpAddr>().unwrap());
        assert_eq!(req.subject.username, "alice");
        assert_eq!(req.subject.groups, vec!["dev", "oncall"]);
        assert_eq!(
            req.query.get("tab"),
            Some(&vec!["usage".to_string(), "billing".to_string()])
        );
    }

    #[test]
    fn test_descriptor_anonymous_defaults() {
        let map = headers(&[
            ("x-forwarded-host", "example.com"),
            ("x-forwarded-for", "198.51.100.4"),
        ]);
        let req = descriptor_from_headers(&map).unwrap();
        assert_eq!(req.path, "/");
        assert_eq!(req.method, "GET");
        assert!(req.subject.is_anonymous());
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_descriptor_missing_host_rejected() {
        let map = headers(&[("x-forwarded-for", "198.51.100.4")]);
        let err = descriptor_from_headers(&map).unwrap_err();
        assert!(err.contains("X-Forwarded-Host"));
    }

    #[test]
    fn test_descriptor_bad_ip_rejected() {
        let map = headers(&[
            ("x-forwarded-host", "example.com"),
            ("x-forwarded-for", "not-an-ip"),
        ]);
        let err = descriptor_from_headers(&map).unwrap_err();
        assert!(err.contains("valid IP"));
    }

    #[test]
    fn test_parse_query_string() {
        let q = parse_query_string("a=1&b&a=2&=x&");
        assert_eq!(q.get("a"), Some(&vec!["1".to_string(), "2".to_string()]));
        assert_eq!(q.get("b"), Some(&vec![String::new()]));
        assert_eq!(q.get(""), Some(&vec!["x".to_string()]));
    }

    #[test]
    fn test_parse_query_string_percent_decodes() {
        let q = parse_query_string("mode=a%20b&name=sp%C3%A4t&plus=1+2&raw=%zz");
        assert_eq!(q.get("mode"), Some(&vec!["a b".to_string()]));
        assert_eq!(q.get("name"), Some(&vec!["spät".to_string()]));
        assert_eq!(q.get("plus"), Some(&vec!["1 2".to_string()]));
        // Invalid escapes are kept as-is rather than dropped.
        assert_eq!(q.get("raw"), Some(&vec!["%zz".to_string()]));
    }

    #[test]
    fn test_decoded_key_collision_merges_values() {
        let q = parse_query_string("a%20b=1&a+b=2");
        assert_eq!(
            q.get("a b"),
            Some(&vec!["1".to_string(), "2".to_string()])
        );
    }

    #[test]
    fn test_split_uri_without_query() {
        let (path, query) = split_uri("/plain/path");
        assert_eq!(path, "/plain/path");
        assert!(query.is_empty());
    }
}
