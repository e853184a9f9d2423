//! Lifecycle controller.
//!
//! # Responsibilities
//! - Hold the configuration, registered middleware, resources and hooks
//! - Drive the state machine through configure, start and stop
//! - Own the listening socket and the server task
//! - Apply the bind-failure policy
//!
//! `Gateway` is the state machine itself. `Gateway::spawn` moves it onto a
//! task and returns a `GatewayHandle` that hosts use to send commands.

use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::Handle;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{validate_config, GatewayConfig, ValidationError};
use crate::http::middleware::Stage;
use crate::http::{build_app, AppBuilder, AppContext, PreStartHook, ResourceDescriptor};
use crate::hub::{Bus, GatewayEvent};
use crate::lifecycle::LifecycleState;
use crate::net::{self, BindError, BoundListener};
use crate::observability::{AccessLog, Stats, TracingAccessLog};

/// Errors returned by lifecycle operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot {op} while {state}")]
    InvalidState {
        op: &'static str,
        state: LifecycleState,
    },

    #[error(transparent)]
    Bind(#[from] BindError),

    #[error("invalid configuration: {}", join(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error("gateway controller is no longer running")]
    ControllerGone,
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

struct RunningServer {
    handle: Handle,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
    scheme: &'static str,
}

/// The gateway's lifecycle state machine.
pub struct Gateway {
    bus: Arc<dyn Bus>,
    stats: Arc<Stats>,
    log: Arc<dyn AccessLog>,
    config: Option<GatewayConfig>,
    /// Stages and resources registered through host commands.
    registered: AppBuilder,
    /// Stages supplied with the configured options.
    middleware: Vec<Arc<dyn Stage>>,
    hooks: Vec<Arc<dyn PreStartHook>>,
    state: LifecycleState,
    server: Option<RunningServer>,
}

impl Gateway {
    pub fn new(bus: Arc<dyn Bus>) -> Self {
        Self {
            bus,
            stats: Stats::new(),
            log: Arc::new(TracingAccessLog),
            config: None,
            registered: AppBuilder::new(),
            middleware: Vec::new(),
            hooks: Vec::new(),
            state: LifecycleState::Unconfigured,
            server: None,
        }
    }

    /// Replace the default `tracing` access log sink.
    pub fn with_access_log(mut self, log: Arc<dyn AccessLog>) -> Self {
        self.log = log;
        self
    }

    /// Middleware that runs after command-registered stages and before
    /// pre-start hook stages.
    pub fn with_middleware<I>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        self.middleware.extend(stages);
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> Option<&GatewayConfig> {
        self.config.as_ref()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(|s| s.local_addr)
    }

    /// Store a validated configuration. A running server keeps its socket;
    /// the new options apply at the next start.
    pub fn configure(&mut self, config: GatewayConfig) -> Result<LifecycleState, LifecycleError> {
        validate_config(&config).map_err(LifecycleError::InvalidConfig)?;
        match self.state {
            LifecycleState::Failed => {
                return Err(LifecycleError::InvalidState {
                    op: "configure",
                    state: self.state,
                })
            }
            LifecycleState::Binding | LifecycleState::Listening | LifecycleState::Closing => {
                tracing::info!(
                    state = %self.state,
                    "configuration stored; the running server is not re-bound"
                );
            }
            LifecycleState::Unconfigured | LifecycleState::Configured | LifecycleState::Closed => {
                self.state = LifecycleState::Configured;
            }
        }
        tracing::debug!(bind = %config.bind, port = config.port, "configured");
        self.config = Some(config);
        Ok(self.state)
    }

    /// Append stages after those already registered.
    pub fn use_stages<I>(&mut self, stages: I)
    where
        I: IntoIterator<Item = Arc<dyn Stage>>,
    {
        tracing::debug!("adding middleware through command");
        for stage in stages {
            self.registered.use_shared(stage);
        }
    }

    /// Register CRUD routes for a resource. Invalid descriptors, overlapping
    /// ones and those colliding with the streaming path are skipped with a
    /// warning.
    pub fn crud(&mut self, descriptor: ResourceDescriptor) -> bool {
        let streaming_path = self
            .config
            .as_ref()
            .filter(|config| config.enable_socket_io)
            .map(|config| config.socket_io_path.as_str());
        if let Some(path) = streaming_path.filter(|path| descriptor.binds(path)) {
            tracing::warn!(resource = %descriptor.name, path, "resource collides with the streaming path; skipping");
            return false;
        }
        self.registered.crud(descriptor)
    }

    pub fn pre_start(&mut self, hook: Arc<dyn PreStartHook>) {
        self.hooks.push(hook);
    }

    /// Build the application and bind the listener.
    pub async fn start(&mut self) -> Result<LifecycleState, LifecycleError> {
        let config = match (&self.config, self.state) {
            (Some(config), LifecycleState::Configured) => config.clone(),
            _ => {
                return Err(LifecycleError::InvalidState {
                    op: "start",
                    state: self.state,
                })
            }
        };
        tracing::debug!("starting HTTP gateway");

        let mut app = self.registered.clone();
        for stage in &self.middleware {
            app.use_shared(Arc::clone(stage));
        }
        self.bus.publish(GatewayEvent::PreStart);
        for hook in &self.hooks {
            hook.before_bind(&mut app);
        }

        let ctx = AppContext {
            bus: Arc::clone(&self.bus),
            stats: Arc::clone(&self.stats),
            log: Arc::clone(&self.log),
        };
        let built = build_app(&config, app, &ctx);
        tracing::debug!(stages = ?built.stage_names, "application assembled");

        self.state = LifecycleState::Binding;
        let bound = match net::bind(&config).await {
            Ok(bound) => bound,
            Err(e) => return Err(self.bind_failed(&config, e)),
        };

        let local_addr = bound.local_addr;
        let tls = bound.tls.is_some();
        let scheme = config.scheme_label();
        let handle = Handle::new();
        let task = serve(bound, built.router, handle.clone());
        self.server = Some(RunningServer {
            handle: handle.clone(),
            task,
            local_addr,
            scheme,
        });
        self.state = LifecycleState::Listening;

        self.bus.publish(GatewayEvent::Listening {
            bind: config.bind.clone(),
            port: local_addr.port(),
            local_addr,
            tls,
            server: handle,
        });
        let ready = format!("listening for {} on {}:{}", scheme, config.bind, local_addr.port());
        tracing::info!("{}", ready);
        self.bus.publish(GatewayEvent::Ready(ready));
        if let Some(broadcaster) = built.streaming {
            self.bus.publish(GatewayEvent::Streaming(broadcaster));
        }
        Ok(self.state)
    }

    fn bind_failed(&mut self, config: &GatewayConfig, error: BindError) -> LifecycleError {
        if config.error_on_bind_fail {
            if error.is_addr_in_use() {
                tracing::error!(
                    "Port {} is already in use, is another instance running?",
                    config.port
                );
            } else {
                tracing::error!(error = %error, "unable to open listen port");
            }
            self.state = LifecycleState::Failed;
            self.bus.request_shutdown(&error.to_string());
        } else {
            tracing::warn!(
                error = %error,
                "Couldn't bind {}, set error_on_bind_fail=true to exit here",
                config.port
            );
            self.state = LifecycleState::Configured;
        }
        LifecycleError::Bind(error)
    }

    /// Close the listener and wait for the server task. A no-op when no
    /// server is running.
    pub async fn stop(&mut self) -> Result<LifecycleState, LifecycleError> {
        let Some(server) = self.server.take() else {
            tracing::debug!(state = %self.state, "stop requested with no running server");
            return Ok(self.state);
        };

        tracing::debug!("closing server");
        self.state = LifecycleState::Closing;
        let grace = self
            .config
            .as_ref()
            .map(GatewayConfig::shutdown_grace)
            .unwrap_or_default();
        server.handle.graceful_shutdown(Some(grace));
        if let Err(e) = server.task.await {
            tracing::error!(error = %e, "server task did not finish cleanly");
        }

        self.state = LifecycleState::Closed;
        tracing::info!("closed {} server", server.scheme);
        self.bus.publish(GatewayEvent::Closed);
        Ok(self.state)
    }

    /// Move the controller onto its own task.
    pub fn spawn(self) -> GatewayHandle {
        let (tx, rx) = mpsc::channel(32);
        let stats = self.stats();
        tokio::spawn(self.run(rx));
        GatewayHandle { tx, stats }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Use(stages) => self.use_stages(stages),
                Command::Crud(descriptor, reply) => {
                    let _ = reply.send(self.crud(descriptor));
                }
                Command::PreStart(hook) => self.pre_start(hook),
                Command::Configure(config, reply) => {
                    let _ = reply.send(self.configure(*config));
                }
                Command::Start(reply) => {
                    let _ = reply.send(self.start().await);
                }
                Command::Stop(reply) => {
                    let _ = reply.send(self.stop().await);
                }
                Command::State(reply) => {
                    let _ = reply.send(self.state);
                }
                Command::LocalAddr(reply) => {
                    let _ = reply.send(self.local_addr());
                }
            }
        }
        // Every handle is gone; nobody can stop the server any more.
        let _ = self.stop().await;
    }
}

fn serve(bound: BoundListener, router: axum::Router, handle: Handle) -> JoinHandle<()> {
    let app = router.into_make_service_with_connect_info::<SocketAddr>();
    let BoundListener { listener, tls, .. } = bound;
    tokio::spawn(async move {
        let result = match tls {
            Some(tls) => {
                axum_server::tls_rustls::from_tcp_rustls(listener, tls)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            None => axum_server::from_tcp(listener).handle(handle).serve(app).await,
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "HTTP server terminated");
        }
    })
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Use(Vec<Arc<dyn Stage>>),
    Crud(ResourceDescriptor, Reply<bool>),
    PreStart(Arc<dyn PreStartHook>),
    Configure(Box<GatewayConfig>, Reply<Result<LifecycleState, LifecycleError>>),
    Start(Reply<Result<LifecycleState, LifecycleError>>),
    Stop(Reply<Result<LifecycleState, LifecycleError>>),
    State(Reply<LifecycleState>),
    LocalAddr(Reply<Option<SocketAddr>>),
}

/// Cloneable command channel to a spawned `Gateway`.
#[derive(Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Command>,
    stats: Arc<Stats>,
}

impl GatewayHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| LifecycleError::ControllerGone)?;
        rx.await.map_err(|_| LifecycleError::ControllerGone)
    }

    async fn notify(&self, command: Command) -> Result<(), LifecycleError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| LifecycleError::ControllerGone)
    }

    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.stats)
    }

    pub async fn use_stages(&self, stages: Vec<Arc<dyn Stage>>) -> Result<(), LifecycleError> {
        self.notify(Command::Use(stages)).await
    }

    pub async fn crud(&self, descriptor: ResourceDescriptor) -> Result<bool, LifecycleError> {
        self.request(|reply| Command::Crud(descriptor, reply)).await
    }

    pub async fn pre_start(&self, hook: impl PreStartHook) -> Result<(), LifecycleError> {
        self.notify(Command::PreStart(Arc::new(hook))).await
    }

    pub async fn configure(&self, config: GatewayConfig) -> Result<LifecycleState, LifecycleError> {
        self.request(|reply| Command::Configure(Box::new(config), reply))
            .await?
    }

    pub async fn start(&self) -> Result<LifecycleState, LifecycleError> {
        self.request(Command::Start).await?
    }

    pub async fn stop(&self) -> Result<LifecycleState, LifecycleError> {
        self.request(Command::Stop).await?
    }

    pub async fn state(&self) -> Result<LifecycleState, LifecycleError> {
        self.request(Command::State).await
    }

    pub async fn local_addr(&self) -> Result<Option<SocketAddr>, LifecycleError> {
        self.request(Command::LocalAddr).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::LocalHub;

    fn config() -> GatewayConfig {
        GatewayConfig {
            port: 0,
            enable_socket_io: false,
            ..GatewayConfig::default()
        }
    }

    fn gateway(hub: &Arc<LocalHub>) -> Gateway {
        Gateway::new(Arc::clone(hub) as Arc<dyn Bus>)
    }

    #[tokio::test]
    async fn start_requires_configuration() {
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        let err = gw.start().await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::InvalidState {
                op: "start",
                state: LifecycleState::Unconfigured
            }
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        let err = gw
            .configure(GatewayConfig {
                bind: String::new(),
                ..config()
            })
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidConfig(_)));
        assert_eq!(gw.state(), LifecycleState::Unconfigured);
    }

    #[tokio::test]
    async fn start_and_stop_walk_the_states() {
        let hub = Arc::new(LocalHub::new());
        let mut events = hub.subscribe();
        let mut gw = gateway(&hub);

        assert_eq!(gw.configure(config()).unwrap(), LifecycleState::Configured);
        assert_eq!(gw.start().await.unwrap(), LifecycleState::Listening);
        let addr = gw.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        assert!(matches!(events.recv().await.unwrap(), GatewayEvent::PreStart));
        match events.recv().await.unwrap() {
            GatewayEvent::Listening {
                port, tls, server, ..
            } => {
                assert_eq!(port, addr.port());
                assert!(!tls);
                assert_eq!(server.listening().await, Some(addr));
            }
            other => panic!("expected listening event, got {:?}", other),
        }
        match events.recv().await.unwrap() {
            GatewayEvent::Ready(message) => {
                assert_eq!(message, format!("listening for HTTP on 127.0.0.1:{}", addr.port()))
            }
            other => panic!("expected ready event, got {:?}", other),
        }

        let err = gw.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidState { op: "start", .. }));

        assert_eq!(gw.stop().await.unwrap(), LifecycleState::Closed);
        assert!(matches!(events.recv().await.unwrap(), GatewayEvent::Closed));
        assert_eq!(gw.stop().await.unwrap(), LifecycleState::Closed);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn fatal_bind_failure_requests_one_shutdown() {
        let (_held, addr) = net::bind_tcp("127.0.0.1", 0).unwrap();
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        gw.configure(GatewayConfig {
            port: addr.port(),
            ..config()
        })
        .unwrap();

        let err = gw.start().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Bind(BindError::AddrInUse { .. })));
        assert_eq!(gw.state(), LifecycleState::Failed);
        assert_eq!(hub.shutdown_requests(), 1);
        assert!(gw.configure(config()).is_err());
    }

    #[tokio::test]
    async fn non_fatal_bind_failure_stays_configured() {
        let (_held, addr) = net::bind_tcp("127.0.0.1", 0).unwrap();
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        gw.configure(GatewayConfig {
            port: addr.port(),
            error_on_bind_fail: false,
            ..config()
        })
        .unwrap();

        assert!(gw.start().await.is_err());
        assert_eq!(gw.state(), LifecycleState::Configured);
        assert_eq!(hub.shutdown_requests(), 0);
    }

    #[tokio::test]
    async fn reconfigure_while_listening_keeps_socket() {
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        gw.configure(config()).unwrap();
        gw.start().await.unwrap();
        let addr = gw.local_addr();

        let state = gw
            .configure(GatewayConfig {
                port: 1,
                ..config()
            })
            .unwrap();
        assert_eq!(state, LifecycleState::Listening);
        assert_eq!(gw.local_addr(), addr);
        gw.stop().await.unwrap();

        assert_eq!(gw.configure(config()).unwrap(), LifecycleState::Configured);
    }

    #[tokio::test]
    async fn handle_forwards_commands() {
        let hub = Arc::new(LocalHub::new());
        let handle = gateway(&hub).spawn();

        assert_eq!(handle.state().await.unwrap(), LifecycleState::Unconfigured);
        assert!(!handle.crud(ResourceDescriptor::new("", "/x")).await.unwrap());
        assert!(handle.crud(ResourceDescriptor::new("widgets", "/widgets")).await.unwrap());
        handle.configure(config()).await.unwrap();
        assert_eq!(handle.start().await.unwrap(), LifecycleState::Listening);
        assert!(handle.local_addr().await.unwrap().is_some());
        assert_eq!(handle.stop().await.unwrap(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn overlapping_resources_never_reach_the_router() {
        let hub = Arc::new(LocalHub::new());
        let handle = gateway(&hub).spawn();

        assert!(handle.crud(ResourceDescriptor::new("a", "/a")).await.unwrap());
        assert!(!handle.crud(ResourceDescriptor::new("q", "/a/query")).await.unwrap());
        handle.configure(config()).await.unwrap();
        assert_eq!(handle.start().await.unwrap(), LifecycleState::Listening);
        assert_eq!(handle.state().await.unwrap(), LifecycleState::Listening);
        handle.stop().await.unwrap();
    }

    #[test]
    fn resources_keep_off_the_streaming_path() {
        let hub = Arc::new(LocalHub::new());
        let mut gw = gateway(&hub);
        gw.configure(GatewayConfig {
            enable_socket_io: true,
            socket_io_path: "/live".into(),
            ..config()
        })
        .unwrap();

        assert!(!gw.crud(ResourceDescriptor::new("live", "/live")));
        assert!(gw.crud(ResourceDescriptor::new("widgets", "/widgets")));
    }
}
