//! Application assembly.
//!
//! # Responsibilities
//! - Collect routes, resources and stages contributed before bind
//! - Let pre-start hooks extend the application
//! - Compose the final router: framework stages, user stages, route
//!   handlers, streaming endpoint, error stage

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::http::Method;
use axum::routing::MethodRouter;
use axum::Router;

use crate::config::GatewayConfig;
use crate::http::crud::{BridgeError, CrudBridge, ResourceDescriptor};
use crate::http::middleware::{framework_stages, ChainBuilder, ErrorStage, Stage};
use crate::http::websocket::{self, StreamBroadcaster, StreamingState};
use crate::hub::Bus;
use crate::observability::{AccessLog, Stats};

/// Runs during `start()`, before the socket binds.
pub trait PreStartHook: Send + Sync + 'static {
    fn before_bind(&self, app: &mut AppBuilder);
}

impl<F> PreStartHook for F
where
    F: Fn(&mut AppBuilder) + Send + Sync + 'static,
{
    fn before_bind(&self, app: &mut AppBuilder) {
        self(app)
    }
}

/// Routing key with every `{param}` segment collapsed, so `/a/{id}` and
/// `/a/{key}` compare equal.
pub(crate) fn route_key(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    trimmed
        .split('/')
        .map(|segment| if segment.starts_with('{') { "{}" } else { segment })
        .fold(String::new(), |mut key, segment| {
            key.push('/');
            key.push_str(segment);
            key
        })
}

/// Whether `key` is `prefix` or lies below it.
fn is_under(key: &str, prefix: &str) -> bool {
    key == prefix
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// What is already bound at one routing key.
#[derive(Debug, Clone)]
enum Claim {
    /// CRUD bindings; other methods may still share the path.
    Methods(HashSet<Method>),
    /// A `route` call owns every method.
    Whole,
}

/// Everything collaborators contribute to the application.
///
/// Registration never panics: a resource, route or mount that would bind a
/// method and path someone else already holds is skipped with a warning and
/// the call returns `false`.
#[derive(Clone, Default)]
pub struct AppBuilder {
    stages: Vec<Arc<dyn Stage>>,
    resources: Vec<ResourceDescriptor>,
    paths: HashMap<String, Claim>,
    mounts: Vec<String>,
    router: Router,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage after those already registered.
    pub fn use_stage(&mut self, stage: impl Stage) -> &mut Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn use_shared(&mut self, stage: Arc<dyn Stage>) -> &mut Self {
        self.stages.push(stage);
        self
    }

    /// Register CRUD routes for a resource. Invalid descriptors and those
    /// overlapping an existing binding are skipped with a warning.
    pub fn crud(&mut self, descriptor: ResourceDescriptor) -> bool {
        match self.try_crud(descriptor) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "skipping CRUD registration");
                false
            }
        }
    }

    fn try_crud(&mut self, descriptor: ResourceDescriptor) -> Result<(), BridgeError> {
        descriptor.validate()?;
        let bindings = descriptor.bindings();
        if let Some(taken) = bindings
            .iter()
            .find(|b| self.is_claimed(&route_key(&b.path), Some(&b.method)))
        {
            return Err(BridgeError::Overlap(format!("{} {}", taken.method, taken.path)));
        }
        for binding in &bindings {
            let claim = self
                .paths
                .entry(route_key(&binding.path))
                .or_insert_with(|| Claim::Methods(HashSet::new()));
            if let Claim::Methods(methods) = claim {
                methods.insert(binding.method.clone());
            }
        }
        tracing::debug!(resource = %descriptor.name, path = %descriptor.base_path(), "registered CRUD resource");
        self.resources.push(descriptor);
        Ok(())
    }

    /// Add a route. Give every method for one path in a single
    /// `MethodRouter`; a path that is already bound is skipped.
    pub fn route(&mut self, path: &str, handler: MethodRouter) -> bool {
        let key = route_key(path);
        if self.is_claimed(&key, None) {
            tracing::warn!(path, "route already bound; skipping");
            return false;
        }
        self.paths.insert(key, Claim::Whole);
        self.router = std::mem::take(&mut self.router).route(path, handler);
        true
    }

    /// Nest a sub-router under `prefix`, which it then owns entirely.
    pub fn mount(&mut self, prefix: &str, router: Router) -> bool {
        let key = route_key(prefix);
        let overlaps = key == "/"
            || key.contains('{')
            || self.paths.keys().any(|bound| is_under(bound, &key))
            || self
                .mounts
                .iter()
                .any(|mounted| is_under(&key, mounted) || is_under(mounted, &key));
        if overlaps {
            tracing::warn!(prefix, "mount prefix overlaps existing routes; skipping");
            return false;
        }
        self.router = std::mem::take(&mut self.router).nest(&key, router);
        self.mounts.push(key);
        true
    }

    /// Whether anything registered so far answers at `path`.
    pub fn claims(&self, path: &str) -> bool {
        self.is_claimed(&route_key(path), None)
    }

    fn is_claimed(&self, key: &str, method: Option<&Method>) -> bool {
        if self.mounts.iter().any(|prefix| is_under(key, prefix)) {
            return true;
        }
        match (self.paths.get(key), method) {
            (None, _) => false,
            (Some(Claim::Methods(taken)), Some(method)) => taken.contains(method),
            (Some(_), _) => true,
        }
    }

    pub fn stages(&self) -> &[Arc<dyn Stage>] {
        &self.stages
    }

    pub fn resources(&self) -> &[ResourceDescriptor] {
        &self.resources
    }

    /// Split into user stages and the route handlers, with CRUD routes
    /// bound to `bridge`.
    pub fn assemble(self, bridge: &Arc<CrudBridge>) -> (Vec<Arc<dyn Stage>>, Router) {
        let router = self
            .resources
            .iter()
            .fold(self.router, |router, descriptor| {
                router.merge(bridge.routes(descriptor))
            });
        (self.stages, router)
    }
}

/// Shared collaborators for building an application.
#[derive(Clone)]
pub struct AppContext {
    pub bus: Arc<dyn Bus>,
    pub stats: Arc<Stats>,
    pub log: Arc<dyn AccessLog>,
}

/// The composed application plus the streaming handle when enabled.
pub struct BuiltApp {
    pub router: Router,
    pub streaming: Option<StreamBroadcaster>,
    pub stage_names: Vec<String>,
}

/// Compose the whole application for one start.
pub fn build_app(config: &GatewayConfig, app: AppBuilder, ctx: &AppContext) -> BuiltApp {
    let streaming = if !config.enable_socket_io {
        None
    } else if app.claims(&config.socket_io_path) {
        tracing::warn!(
            path = %config.socket_io_path,
            "streaming path already bound by a route; streaming endpoint disabled"
        );
        None
    } else {
        Some(StreamBroadcaster::new())
    };

    let bridge = Arc::new(CrudBridge::new(Arc::clone(&ctx.bus), &config.bridge));
    let (user_stages, mut routes) = app.assemble(&bridge);

    if let Some(broadcaster) = &streaming {
        tracing::info!(path = %config.socket_io_path, "starting streaming endpoint");
        routes = routes.merge(websocket::router(
            &config.socket_io_path,
            StreamingState {
                broadcaster: broadcaster.clone(),
                stats: Arc::clone(&ctx.stats),
                bus: Arc::clone(&ctx.bus),
            },
        ));
    }

    let chain = ChainBuilder::new(framework_stages(
        config,
        Arc::clone(&ctx.stats),
        Arc::clone(&ctx.log),
    ))
    .with_user(user_stages);
    let stage_names = chain.stage_names();

    tracing::debug!("adding default error handler");
    let pipeline = chain.finish(
        routes,
        ErrorStage::new(config.logging, Arc::clone(&ctx.log)),
        config.trust_proxy,
    );

    BuiltApp {
        router: pipeline.into_router(),
        streaming,
        stage_names,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{DataRequest, LocalHub};
    use crate::http::middleware::{stage_fn, Outcome};
    use crate::observability::logging::testing::CollectingLog;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use serde_json::json;
    use tower::ServiceExt;

    fn context(hub: &Arc<LocalHub>) -> AppContext {
        AppContext {
            bus: Arc::clone(hub) as Arc<dyn Bus>,
            stats: Stats::new(),
            log: Arc::new(CollectingLog::default()),
        }
    }

    #[test]
    fn crud_rejects_invalid_and_duplicate_descriptors() {
        let mut app = AppBuilder::new();
        assert!(!app.crud(ResourceDescriptor::new("", "/widgets")));
        assert!(!app.crud(ResourceDescriptor::new("widgets", "")));
        assert!(app.crud(ResourceDescriptor::new("widgets", "/widgets")));
        assert!(!app.crud(ResourceDescriptor::new("gadgets", "widgets/")));
        assert!(!app.crud(ResourceDescriptor::new("queries", "/widgets/query")));
        assert!(app.crud(ResourceDescriptor::new("parts", "/widgets/parts")));
        assert_eq!(app.resources().len(), 2);
    }

    #[test]
    fn routes_and_mounts_respect_existing_bindings() {
        let mut app = AppBuilder::new();
        assert!(app.crud(ResourceDescriptor::new("widgets", "/widgets")));
        assert!(!app.route("/widgets/{key}", get(|| async { "shadow" })));
        assert!(!app.route("/widgets", get(|| async { "shadow" })));
        assert!(app.route("/ping", get(|| async { "pong" })));
        assert!(!app.route("/ping/", get(|| async { "again" })));

        assert!(!app.mount("/widgets", Router::new()));
        assert!(!app.mount("/", Router::new()));
        assert!(app.mount("/admin", Router::new().route("/status", get(|| async { "up" }))));
        assert!(!app.mount("/admin/deep", Router::new()));
        assert!(!app.crud(ResourceDescriptor::new("admin", "/admin/users")));
        assert!(app.claims("/admin/status"));
        assert!(!app.claims("/elsewhere"));
    }

    #[tokio::test]
    async fn claimed_streaming_path_disables_streaming() {
        let hub = Arc::new(LocalHub::new());
        let mut app = AppBuilder::new();
        app.route("/socket.io", get(|| async { "mine" }));
        let config = GatewayConfig {
            enable_socket_io: true,
            ..GatewayConfig::default()
        };
        let built = build_app(&config, app, &context(&hub));
        assert!(built.streaming.is_none());

        let response = built
            .router
            .oneshot(Request::get("/socket.io").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn mounted_router_serves_under_prefix() {
        let hub = Arc::new(LocalHub::new());
        let mut app = AppBuilder::new();
        app.mount("/admin", Router::new().route("/status", get(|| async { "up" })));
        let config = GatewayConfig {
            enable_socket_io: false,
            ..GatewayConfig::default()
        };
        let response = build_app(&config, app, &context(&hub))
            .router
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn hooks_extend_a_builder() {
        let hook = |app: &mut AppBuilder| {
            app.use_stage(stage_fn("hooked", |_| Outcome::Continue));
        };
        let mut app = AppBuilder::new();
        hook.before_bind(&mut app);
        assert_eq!(app.stages()[0].name(), "hooked");
    }

    #[tokio::test]
    async fn built_app_serves_routes_and_resources() {
        let hub = Arc::new(LocalHub::new());
        let mut requests = hub.take_data_requests().unwrap();
        tokio::spawn(async move {
            while let Some(envelope) = requests.recv().await {
                if let DataRequest::Create { body, .. } = envelope.request {
                    envelope.reply.ok(body);
                }
            }
        });

        let mut app = AppBuilder::new();
        app.route("/ping", get(|| async { "pong" }));
        app.crud(ResourceDescriptor::new("widgets", "/widgets"));
        let config = GatewayConfig {
            enable_socket_io: false,
            ..GatewayConfig::default()
        };
        let built = build_app(&config, app, &context(&hub));
        assert!(built.streaming.is_none());

        let pong = built
            .router
            .clone()
            .oneshot(Request::get("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(pong.status(), StatusCode::OK);

        let created = built
            .router
            .oneshot(
                Request::post("/widgets")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"a":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        let bytes = to_bytes(created.into_body(), usize::MAX).await.unwrap();
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&bytes).unwrap(), json!({"a": 1}));
    }
}
