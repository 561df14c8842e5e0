//! Path rewrite middleware — map the external path space onto the upstream's
//!
//! Requests are rewritten before forwarding; `Location` headers on the way
//! back are mapped from the upstream origin into the external path space.

use super::{Middleware, RequestContext};
use crate::error::Result;
use crate::service::{Origin, PathRewrite, ServiceProxyConfig};
use async_trait::async_trait;
use http::{HeaderValue, Response};

/// Rewrite an inbound path (with optional query) for the upstream
pub fn rewrite_request_path(path_and_query: &str, config: &ServiceProxyConfig) -> String {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let rewritten = match &config.rewrite {
        PathRewrite::StripPrefix => strip(path, &config.base_path),
        PathRewrite::PrependBase(base) => {
            let relative = strip(path, &config.base_path);
            join(base, &relative)
        }
        PathRewrite::FixedRemap(prefix) => strip(path, prefix),
    };

    match query {
        Some(q) => format!("{}?{}", rewritten, q),
        None => rewritten,
    }
}

/// External base that upstream redirects are mapped back under
pub fn external_base(config: &ServiceProxyConfig) -> &str {
    match &config.rewrite {
        PathRewrite::StripPrefix => &config.base_path,
        PathRewrite::PrependBase(_) => "",
        PathRewrite::FixedRemap(prefix) => prefix,
    }
}

/// Replace a leading upstream origin in `location` with `external_base`.
/// The origin must end at the authority boundary: `http://radarr` does not
/// own `http://radarr.example.com`, nor `:80` own `:8080`. Anything else
/// (relative paths, third-party URLs) passes through.
pub fn rewrite_location(location: &str, origin: &str, external_base: &str) -> String {
    if origin.is_empty() {
        return location.to_string();
    }
    match location.strip_prefix(origin) {
        Some(rest) if at_authority_end(rest) => {
            let mapped = format!("{}{}", external_base, rest);
            if mapped.is_empty() || mapped.starts_with(['?', '#']) {
                format!("/{}", mapped)
            } else {
                mapped
            }
        }
        _ => location.to_string(),
    }
}

fn at_authority_end(rest: &str) -> bool {
    rest.is_empty() || rest.starts_with(['/', '?', '#'])
}

/// Remove `prefix` at a segment boundary; an empty remainder becomes `/`.
/// Paths not under the prefix are returned unchanged.
fn strip(path: &str, prefix: &str) -> String {
    if prefix.is_empty() || prefix == "/" {
        return path.to_string();
    }
    match path.strip_prefix(prefix) {
        Some("") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path.to_string(),
    }
}

fn join(base: &str, relative: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), relative)
}

/// Request path and `Location` rewriting for one service
pub struct PathRewriteMiddleware {
    config: ServiceProxyConfig,
}

impl PathRewriteMiddleware {
    pub fn new(config: ServiceProxyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Middleware for PathRewriteMiddleware {
    async fn handle_request(
        &self,
        req: &mut http::request::Parts,
        _ctx: &RequestContext,
    ) -> Result<Option<Response<Vec<u8>>>> {
        let original = req
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let rewritten = rewrite_request_path(original, &self.config);

        if rewritten != original {
            let mut builder = http::Uri::builder();
            if let Some(scheme) = req.uri.scheme() {
                builder = builder.scheme(scheme.clone());
            }
            if let Some(authority) = req.uri.authority() {
                builder = builder.authority(authority.clone());
            }
            if let Ok(uri) = builder.path_and_query(rewritten).build() {
                req.uri = uri;
            }
        }

        Ok(None)
    }

    async fn handle_response(
        &self,
        resp: &mut http::response::Parts,
        ctx: &RequestContext,
    ) -> Result<()> {
        let Some(target) = ctx.target.as_ref() else {
            return Ok(());
        };

        let location = resp
            .headers
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(location) = location {
            let mapped = map_location(&location, target, external_base(&self.config));
            if mapped != location {
                if let Ok(value) = HeaderValue::from_str(&mapped) {
                    resp.headers.insert(http::header::LOCATION, value);
                }
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "path-rewrite"
    }
}

/// Upstreams may redirect with or without the default port spelled out
fn map_location(location: &str, target: &Origin, external_base: &str) -> String {
    let with_port = target.to_string();
    let mapped = rewrite_location(location, &with_port, external_base);
    if mapped != location {
        return mapped;
    }
    let default_port = matches!((target.tls, target.port), (true, 443) | (false, 80));
    if default_port {
        let bare = format!("{}://{}", target.scheme(), target.host);
        return rewrite_location(location, &bare, external_base);
    }
    mapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceKind, TargetResolver};
    use std::sync::Arc;

    fn config(base: &str, rewrite: PathRewrite) -> ServiceProxyConfig {
        let target: TargetResolver = Arc::new(|| Origin::new(false, Some("10.0.0.7"), Some(7878)));
        let mut config = ServiceProxyConfig::new("Radarr", ServiceKind::Radarr, target);
        config.base_path = base.to_string();
        config.rewrite = rewrite;
        config
    }

    #[test]
    fn test_strip_prefix() {
        let c = config("/tautulli", PathRewrite::StripPrefix);
        assert_eq!(rewrite_request_path("/tautulli/home", &c), "/home");
        assert_eq!(rewrite_request_path("/tautulli", &c), "/");
        assert_eq!(rewrite_request_path("/tautulli?x=1", &c), "/?x=1");
    }

    #[test]
    fn test_strip_prefix_idempotent() {
        let c = config("/tautulli", PathRewrite::StripPrefix);
        for path in ["/tautulli/home", "/tautulli", "/other/x", "/tautullix", "/"] {
            let once = rewrite_request_path(path, &c);
            let twice = rewrite_request_path(&once, &c);
            assert_eq!(once, twice, "path {}", path);
        }
        assert_eq!(rewrite_request_path("/other/x", &c), "/other/x");
    }

    #[test]
    fn test_prepend_base() {
        let c = config("/radarr", PathRewrite::PrependBase("/radarr".to_string()));
        assert_eq!(
            rewrite_request_path("/radarr/api/v3/movie?page=2", &c),
            "/radarr/api/v3/movie?page=2"
        );
        assert_eq!(rewrite_request_path("/radarr", &c), "/radarr/");

        let c = config("/movies", PathRewrite::PrependBase("/radarr".to_string()));
        assert_eq!(rewrite_request_path("/movies/calendar", &c), "/radarr/calendar");
    }

    #[test]
    fn test_prepend_empty_base_is_passthrough() {
        let c = config("", PathRewrite::PrependBase(String::new()));
        assert_eq!(rewrite_request_path("/api/v1/status?x=1", &c), "/api/v1/status?x=1");
    }

    #[test]
    fn test_fixed_remap() {
        let c = config("/tdarr", PathRewrite::FixedRemap("/tdarr".to_string()));
        assert_eq!(rewrite_request_path("/tdarr/dashboard", &c), "/dashboard");
        assert_eq!(rewrite_request_path("/tdarr", &c), "/");
        assert_eq!(external_base(&c), "/tdarr");
    }

    #[test]
    fn test_rewrite_location_same_origin() {
        assert_eq!(
            rewrite_location("http://10.0.0.7:7878/radarr/login", "http://10.0.0.7:7878", ""),
            "/radarr/login"
        );
        assert_eq!(
            rewrite_location("http://10.0.0.9:8265/settings", "http://10.0.0.9:8265", "/tdarr"),
            "/tdarr/settings"
        );
    }

    #[test]
    fn test_rewrite_location_third_party_passthrough() {
        let origin = "http://10.0.0.7:7878";
        for location in [
            "https://accounts.example.com/oauth",
            "/relative/path",
            "http://10.0.0.8:7878/x",
        ] {
            let rewritten = rewrite_location(location, origin, "");
            assert_eq!(rewritten, location);
            assert!(!rewritten.starts_with(origin));
        }
    }

    #[test]
    fn test_rewrite_location_requires_authority_boundary() {
        assert_eq!(
            rewrite_location("http://radarr.example.com/login", "http://radarr", ""),
            "http://radarr.example.com/login"
        );
        assert_eq!(
            rewrite_location("http://10.0.0.7:8080/x", "http://10.0.0.7:80", ""),
            "http://10.0.0.7:8080/x"
        );
        assert_eq!(rewrite_location("http://radarr", "http://radarr", ""), "/");
        assert_eq!(rewrite_location("http://radarr?next=1", "http://radarr", ""), "/?next=1");
        assert_eq!(
            rewrite_location("http://radarr#top", "http://radarr", "/tdarr"),
            "/tdarr#top"
        );
    }

    #[test]
    fn test_rewritten_location_never_contains_origin() {
        let origin = "http://10.0.0.7:7878";
        let rewritten = rewrite_location("http://10.0.0.7:7878/a", origin, "");
        assert!(!rewritten.contains(origin));
    }

    #[tokio::test]
    async fn test_middleware_rewrites_uri() {
        let mw = PathRewriteMiddleware::new(config(
            "/tdarr",
            PathRewrite::FixedRemap("/tdarr".to_string()),
        ));
        let (mut parts, _) = http::Request::builder()
            .uri("/tdarr/api/v2/status?full=1")
            .body(())
            .unwrap()
            .into_parts();
        let ctx = RequestContext::for_peer(None);
        mw.handle_request(&mut parts, &ctx).await.unwrap();
        assert_eq!(parts.uri.path(), "/api/v2/status");
        assert_eq!(parts.uri.query(), Some("full=1"));
    }

    #[tokio::test]
    async fn test_middleware_maps_location() {
        let mw = PathRewriteMiddleware::new(config(
            "/radarr",
            PathRewrite::PrependBase("/radarr".to_string()),
        ));
        let ctx = RequestContext::for_peer(None)
            .with_service("Radarr", Origin::new(false, Some("10.0.0.7"), Some(7878)));

        let (mut parts, _) = Response::builder()
            .status(302)
            .header("location", "http://10.0.0.7:7878/radarr/login")
            .body(())
            .unwrap()
            .into_parts();
        mw.handle_response(&mut parts, &ctx).await.unwrap();
        assert_eq!(parts.headers["location"], "/radarr/login");
    }

    #[tokio::test]
    async fn test_middleware_maps_location_without_default_port() {
        let mw = PathRewriteMiddleware::new(config("/x", PathRewrite::PrependBase("/x".to_string())));
        let ctx = RequestContext::for_peer(None)
            .with_service("X", Origin::new(true, Some("x.lan"), None));
        let (mut parts, _) = Response::builder()
            .status(301)
            .header("location", "https://x.lan/x/home")
            .body(())
            .unwrap()
            .into_parts();
        mw.handle_response(&mut parts, &ctx).await.unwrap();
        assert_eq!(parts.headers["location"], "/x/home");
    }

    #[tokio::test]
    async fn test_middleware_leaves_lookalike_host_alone() {
        let mw = PathRewriteMiddleware::new(config(
            "/radarr",
            PathRewrite::PrependBase("/radarr".to_string()),
        ));
        let ctx = RequestContext::for_peer(None)
            .with_service("Radarr", Origin::new(false, Some("radarr"), Some(80)));
        let (mut parts, _) = Response::builder()
            .status(302)
            .header("location", "http://radarr.example.com/login")
            .body(())
            .unwrap()
            .into_parts();
        mw.handle_response(&mut parts, &ctx).await.unwrap();
        assert_eq!(parts.headers["location"], "http://radarr.example.com/login");
    }
}
