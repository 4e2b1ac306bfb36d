//! Server mode: startup sequence and the axum front end.
//!
//! Startup order is fixed: verify the signed bundle (when requested)
//! before any interpreter exists, then spawn the worker (interpreter
//! init → load → manifest → sandbox), then wire the script's routes
//! into the router and enter the request loop.

use std::collections::HashSet;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use axum::routing::{any, delete, get, patch, post, put};
use axum::Router;

use hull_runtime::{RequestData, RouteDef, RuntimeConfig};

use crate::bundle;
use crate::cli::ServeArgs;
use crate::error::StartupError;
use crate::worker::{self, RuntimeClient};

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Run the server. Blocks until the process is terminated.
pub fn run(args: ServeArgs) -> Result<(), StartupError> {
    // 1. Signature verification, strictly before the interpreter loads
    //    any script.
    if let Some(pubkey) = &args.verify_sig {
        bundle::verify_bundle(&args.app, pubkey)?;
        tracing::info!("bundle signature verified");
    }

    // 2. Worker startup: interpreter, app, manifest, kernel sandbox.
    let entry = worker::find_entry(&args.app)?;
    let mut config = RuntimeConfig::new(&args.app, entry, args.db.clone());
    if let Some(heap) = args.memory {
        config.heap_bytes = heap as usize;
    }
    if let Some(stack) = args.stack {
        config.stack_bytes = stack as usize;
    }
    let handle = worker::spawn(config)?;
    tracing::info!(
        routes = handle.routes.len(),
        fs_read = handle.manifest.fs.read.len(),
        fs_write = handle.manifest.fs.write.len(),
        hosts = handle.manifest.hosts.len(),
        "application loaded"
    );

    // 3. Route wiring and the request loop.
    let router = build_router(handle.client.clone(), &handle.routes);
    let runtime = tokio::runtime::Runtime::new().map_err(StartupError::fatal)?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind((args.bind.as_str(), args.port))
            .await
            .map_err(StartupError::fatal)?;
        tracing::info!(bind = %args.bind, port = args.port, "listening");
        axum::serve(listener, router)
            .await
            .map_err(StartupError::fatal)
    })
}

/// Translate a script route pattern (`/greet/:name`) into axum syntax
/// (`/greet/{name}`).
pub fn axum_pattern(pattern: &str) -> String {
    if pattern == "*" {
        return "/{*rest}".to_string();
    }
    let segments: Vec<String> = pattern
        .split('/')
        .map(|seg| match seg.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => seg.to_string(),
        })
        .collect();
    segments.join("/")
}

/// Register every script route with the router. Each handler closure
/// carries only the worker client and its route id.
pub fn build_router(client: Arc<RuntimeClient>, routes: &[RouteDef]) -> Router {
    let mut router = Router::new();
    let mut seen: HashSet<(String, String)> = HashSet::new();

    for (id, route) in routes.iter().enumerate() {
        if !seen.insert((route.method.clone(), route.pattern.clone())) {
            tracing::warn!(
                method = %route.method,
                pattern = %route.pattern,
                "duplicate route registration ignored"
            );
            continue;
        }

        let client = client.clone();
        let handler = move |request: Request| {
            let client = client.clone();
            async move { dispatch_http(client, id, request).await }
        };

        let pattern = axum_pattern(&route.pattern);
        let method_router = match route.method.as_str() {
            "GET" => get(handler),
            "POST" => post(handler),
            "PUT" => put(handler),
            "DELETE" => delete(handler),
            "PATCH" => patch(handler),
            _ => any(handler),
        };
        router = router.route(&pattern, method_router);
    }

    router
}

/// Marshal one wire request through the worker and back.
async fn dispatch_http(client: Arc<RuntimeClient>, route_id: usize, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return plain_response(413, "request body too large");
        }
    };

    let mut data = RequestData {
        method: parts.method.as_str().to_ascii_uppercase(),
        path: parts.uri.path().to_string(),
        ..RequestData::default()
    };
    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            data.query.push((name.into_owned(), value.into_owned()));
        }
    }
    for (name, value) in parts.headers.iter() {
        data.headers.push((
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ));
    }
    data.body = body.to_vec();

    let resp = client.dispatch(route_id, data).await;

    let mut builder = axum::http::Response::builder().status(resp.status);
    for (name, value) in &resp.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(resp.body))
        .unwrap_or_else(|_| plain_response(500, "internal server error"))
}

fn plain_response(status: u16, body: &'static str) -> Response {
    axum::http::Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(body))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axum_pattern_translation() {
        assert_eq!(axum_pattern("/echo"), "/echo");
        assert_eq!(axum_pattern("/greet/:name"), "/greet/{name}");
        assert_eq!(axum_pattern("/u/:id/posts/:post"), "/u/{id}/posts/{post}");
        assert_eq!(axum_pattern("*"), "/{*rest}");
    }
}
