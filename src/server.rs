use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

const API_DISABLED_BODY: &str =
    r#"{"ok":false,"error":"No API routes are enabled in dictation-only mode."}"#;

/// Spawn the boundary HTTP server on the app's async runtime. Failure to
/// bind is logged, not fatal; dictation works without the web surface.
pub fn spawn(host: String, port: u16, public_dir: PathBuf) {
    tauri::async_runtime::spawn(async move {
        let addr = format!("{}:{}", host, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("failed to bind static server on {}: {}", addr, err);
                return;
            }
        };
        info!("static server listening on http://{}", addr);
        if let Err(err) = axum::serve(listener, router(public_dir).into_make_service()).await {
            error!("static server failed: {}", err);
        }
    });
}

pub fn router(public_dir: PathBuf) -> Router {
    let root = Arc::new(public_dir);
    Router::new()
        .route("/api", any(api_not_enabled))
        .route("/api/*rest", any(api_not_enabled))
        .fallback(serve_static)
        .with_state(root)
}

async fn api_not_enabled() -> Response {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(API_DISABLED_BODY))
        .unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
}

async fn serve_static(
    State(root): State<Arc<PathBuf>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::NOT_FOUND.into_response();
    }

    let raw_path = uri.path();
    let Some(resolved) = safe_public_path(&root, raw_path) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let candidate = if resolved.is_dir() {
        resolved.join("index.html")
    } else {
        resolved
    };

    if candidate.is_file() {
        return file_response(&candidate).await;
    }

    // SPA fallback: browsers navigating to app routes get the shell.
    let wants_html = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false);
    let has_extension = Path::new(raw_path)
        .extension()
        .map(|ext| !ext.is_empty())
        .unwrap_or(false);

    if wants_html || !has_extension {
        let index = root.join("index.html");
        if index.is_file() {
            return file_response(&index).await;
        }
    }

    StatusCode::NOT_FOUND.into_response()
}

async fn file_response(path: &Path) -> Response {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let mut builder = Response::builder().status(StatusCode::OK);
            if let Some(content_type) = content_type_for(path) {
                builder = builder.header(header::CONTENT_TYPE, content_type);
            }
            builder
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Resolve a request path to a location strictly inside the public root, or
/// `None` when decoding fails or the path tries to escape. Purely lexical:
/// nothing is read from disk before the check passes.
pub fn safe_public_path(root: &Path, raw_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode_str(raw_path).decode_utf8().ok()?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut depth: Vec<String> = Vec::new();
    for component in Path::new(decoded.as_ref()).components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Normal(part) => depth.push(part.to_string_lossy().to_string()),
            // Escaping above the root is an attack, not a 404.
            Component::ParentDir => {
                if depth.pop().is_none() {
                    return None;
                }
            }
            Component::Prefix(_) => return None,
        }
    }

    let mut resolved = root.to_path_buf();
    for part in depth {
        resolved.push(part);
    }
    if !resolved.starts_with(root) {
        return None;
    }
    Some(resolved)
}

fn content_type_for(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "html" => Some("text/html; charset=utf-8"),
        "css" => Some("text/css"),
        "js" => Some("text/javascript"),
        "json" => Some("application/json"),
        "svg" => Some("image/svg+xml"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use tower::util::ServiceExt;

    fn test_root() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html>shell</html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();
        std::fs::write(dir.path().join("assets/logo.svg"), "<svg/>").unwrap();
        let root = dir.path().to_path_buf();
        (dir, root)
    }

    async fn get(router: &Router, path: &str, accept: Option<&str>) -> (StatusCode, String) {
        let mut builder = Request::builder().uri(path).method("GET");
        if let Some(accept) = accept {
            builder = builder.header("accept", accept);
        }
        let response = router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    #[tokio::test]
    async fn api_routes_are_disabled_with_the_exact_body() {
        let (_dir, root) = test_root();
        let router = router(root);

        let (status, body) = get(&router, "/api/anything", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, API_DISABLED_BODY);

        let (status, body) = get(&router, "/api", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, API_DISABLED_BODY);
    }

    #[tokio::test]
    async fn existing_files_are_served_with_content_type() {
        let (_dir, root) = test_root();
        let router = router(root);

        let (status, body) = get(&router, "/app.js", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "console.log(1)");

        let (status, body) = get(&router, "/assets/logo.svg", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<svg/>");
    }

    #[tokio::test]
    async fn traversal_is_rejected_with_400() {
        let (_dir, root) = test_root();
        let router = router(root);

        let (status, _) = get(&router, "/../etc/hosts", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(&router, "/%2e%2e/%2e%2e/etc/hosts", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn spa_routes_fall_back_to_the_shell() {
        let (_dir, root) = test_root();
        let router = router(root);

        // Extensionless app route.
        let (status, body) = get(&router, "/settings/audio", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>shell</html>");

        // Browser navigation with an Accept header.
        let (status, body) = get(&router, "/missing.png", Some("text/html,*/*")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>shell</html>");
    }

    #[tokio::test]
    async fn missing_assets_without_html_accept_are_404() {
        let (_dir, root) = test_root();
        let router = router(root);

        let (status, _) = get(&router, "/missing.png", Some("image/png")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn root_serves_the_shell() {
        let (_dir, root) = test_root();
        let router = router(root);

        let (status, body) = get(&router, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "<html>shell</html>");
    }

    #[test]
    fn safe_public_path_stays_inside_the_root() {
        let root = Path::new("/srv/public");
        assert_eq!(
            safe_public_path(root, "/app.js"),
            Some(PathBuf::from("/srv/public/app.js"))
        );
        assert_eq!(
            safe_public_path(root, "/a/../b.css"),
            Some(PathBuf::from("/srv/public/b.css"))
        );
        assert_eq!(safe_public_path(root, "/../etc/hosts"), None);
        assert_eq!(safe_public_path(root, "/a/../../etc/hosts"), None);
        assert_eq!(safe_public_path(root, "/%2e%2e/secret"), None);
        assert_eq!(safe_public_path(root, "/ok%20file.js"), Some(PathBuf::from("/srv/public/ok file.js")));
        assert_eq!(safe_public_path(root, "/bad\\path"), None);
    }
}
