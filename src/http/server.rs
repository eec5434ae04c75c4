//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create Axum Router with the admin routes and a whiteboard fallback
//! - Wire up middleware (tracing, timeout, request ID)
//! - Dispatch every other request through the whiteboard
//! - Serve resource files with `ServeFile`
//! - Notify the context's request listeners around each dispatch
//! - Run the filter chain and map error statuses to error pages

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeFile,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::WhiteboardConfig;
use crate::handler::{DispatcherType, Handler, ListenerType, ResourceServlet};
use crate::http::admin;
use crate::lifecycle::Shutdown;
use crate::provision::{EventLogListener, HeaderFilter, StaticServlet};
use crate::registry::{Route, Whiteboard};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub whiteboard: Arc<Whiteboard>,
    pub started: Instant,
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(whiteboard: Arc<Whiteboard>, config: &WhiteboardConfig) -> Self {
        Self {
            whiteboard,
            started: Instant::now(),
            admin_key: config.admin.api_key.as_deref().map(Arc::from),
        }
    }
}

/// HTTP container embedding the whiteboard.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(whiteboard: Arc<Whiteboard>, config: &WhiteboardConfig) -> Self {
        let state = AppState::new(whiteboard, config);
        Self {
            router: Self::build_router(config, state),
        }
    }

    /// The fully layered router, for serving or for in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &WhiteboardConfig, state: AppState) -> Router {
        let mut router = Router::new();
        if config.admin.enabled {
            router = router.merge(admin::routes(state.clone()));
        }
        router
            .fallback(dispatch_handler)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_millis(
                config.server.request_timeout_ms,
            )))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve until the shutdown signal fires.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut stop = shutdown.subscribe();
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                stop.recv().await.ok();
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Route a request through the whiteboard.
async fn dispatch_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let route = state.whiteboard.route(&path, DispatcherType::Request);
    let context_id = match &route {
        Some(route) => route.target.context_id,
        None => state.whiteboard.context_for(&path),
    };
    let listeners = state.whiteboard.listeners(context_id, ListenerType::Request);
    notify(&listeners, |l| l.request_initialized(&request_id, &path));

    let response = match route {
        Some(route) => serve(&state, &path, &request_id, route, request).await,
        None => {
            tracing::debug!(request_id = %request_id, path = %path, "No servlet matched");
            error_response(&state, &path, context_id, StatusCode::NOT_FOUND)
        }
    };

    notify(&listeners, |l| l.request_destroyed(&request_id, &path, response.status()));
    response
}

async fn serve(
    state: &AppState,
    path: &str,
    request_id: &str,
    route: Route,
    request: Request<Body>,
) -> Response {
    let target = &route.target;
    tracing::debug!(
        request_id = %request_id,
        path = %path,
        servlet = target.handler.id(),
        context = target.context_id,
        pattern = %target.pattern,
        "Dispatching request"
    );

    let mut response = if let Some(resource) = target.handler.instance_as::<ResourceServlet>() {
        let relative = target.path_info.as_deref().unwrap_or("");
        match resource.resolve(relative) {
            Some(file) => serve_file(state, path, target.context_id, file, request).await,
            None => error_response(state, path, target.context_id, StatusCode::NOT_FOUND),
        }
    } else {
        match target.handler.instance_as::<StaticServlet>() {
            Some(servlet) if is_error(servlet.status()) => {
                error_response(state, path, target.context_id, servlet.status())
            }
            Some(servlet) => render(servlet, servlet.status()),
            None => {
                tracing::error!(servlet = target.handler.id(), "Servlet instance cannot be served");
                error_response(state, path, target.context_id, StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    };
    apply_filters(&route.filters, response.headers_mut());
    response
}

/// Stream one file; misses (including directories) go to the error pages.
async fn serve_file(
    state: &AppState,
    path: &str,
    context_id: i64,
    file: std::path::PathBuf,
    request: Request<Body>,
) -> Response {
    let response = match ServeFile::new(&file).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };
    let status = response.status();
    if is_error(status) {
        tracing::debug!(file = %file.display(), status = status.as_u16(), "Resource not served");
        return error_response(state, path, context_id, status);
    }
    response.map(Body::new)
}

fn notify(listeners: &[Arc<Handler>], event: impl Fn(&EventLogListener)) {
    for listener in listeners {
        if let Some(listener) = listener.instance_as::<EventLogListener>() {
            event(listener);
        }
    }
}

fn is_error(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

/// Error page of the context (or the default context) for `status`, run
/// through the filters bound to the error dispatch.
fn error_response(state: &AppState, path: &str, context_id: i64, status: StatusCode) -> Response {
    let Some(handler) = state
        .whiteboard
        .resolve_error(context_id, None, status.as_u16())
    else {
        return plain(status);
    };
    let Some(page) = handler.instance_as::<StaticServlet>() else {
        return plain(status);
    };

    let mut response = render(page, status);
    let filters = state.whiteboard.filter_chain(
        path,
        handler.context_id(),
        Some(&handler),
        DispatcherType::Error,
    );
    apply_filters(&filters, response.headers_mut());
    response
}

fn render(servlet: &StaticServlet, status: StatusCode) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, servlet.content_type().clone())],
        servlet.body().to_string(),
    )
        .into_response()
}

fn plain(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or("Error")).into_response()
}

fn apply_filters(filters: &[Arc<Handler>], headers: &mut HeaderMap) {
    for filter in filters {
        if let Some(filter) = filter.instance_as::<HeaderFilter>() {
            filter.apply(headers);
        }
    }
}
