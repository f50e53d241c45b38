use crate::concurrency::InstallLock;
use crate::dispatcher::Dispatcher;
use crate::executor::Executor;
use crate::server::DESCRIPTOR_FILE;
use crate::task::Task;
use crate::CoreError;
use bosun_provision::{FeatureProvider, InstallLayout, RuntimeProvider};
use bosun_process::{FanoutSink, LogSink};
use bosun_schema::{parse_endpoints, Endpoint, OrchestratorSettings, ServerConfig};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

/// The server lifecycle orchestrator.
///
/// An explicit object with constructor-injected settings and providers,
/// not a process-wide singleton, so tests run any number of independent
/// orchestrators side by side. All lifecycle methods are asynchronous
/// fire-and-forget submissions to the internal dispatcher; errors surface
/// in the log, not at the call site.
pub struct Orchestrator {
    dispatcher: Dispatcher,
    layout: InstallLayout,
    sink: Arc<FanoutSink>,
    started: Arc<RwLock<HashSet<String>>>,
    _lock: InstallLock,
}

impl Orchestrator {
    /// Construct and take exclusive ownership of the install tree.
    ///
    /// Fails fast when another orchestrator already holds the base
    /// directory's lock.
    pub fn new(
        settings: OrchestratorSettings,
        runtime_providers: Vec<Box<dyn RuntimeProvider>>,
        feature_providers: Vec<Box<dyn FeatureProvider>>,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        let layout = InstallLayout::new(&settings.install.base_dir, settings.dist_dir_name());
        let lock = InstallLock::try_acquire(&layout.lock_file())?
            .ok_or_else(|| CoreError::LockHeld(layout.base().display().to_string()))?;

        let sink = Arc::new(FanoutSink::new());
        let started = Arc::new(RwLock::new(HashSet::new()));
        let executor = Executor::new(
            settings,
            runtime_providers,
            feature_providers,
            Arc::clone(&sink) as Arc<dyn LogSink>,
            Arc::clone(&started),
        );
        let dispatcher = Dispatcher::spawn(executor);

        info!("orchestrator ready at {}", layout.base().display());
        Ok(Self {
            dispatcher,
            layout,
            sink,
            started,
            _lock: lock,
        })
    }

    pub fn create_server(&self, name: impl Into<String>, config: ServerConfig) {
        self.dispatcher.submit(Task::CreateServer {
            name: name.into(),
            config,
        });
    }

    pub fn start_server(&self, name: impl Into<String>) {
        self.dispatcher.submit(Task::Start { name: name.into() });
    }

    pub fn stop_server(&self, name: impl Into<String>) {
        self.dispatcher.submit(Task::Stop { name: name.into() });
    }

    pub fn deploy_dropin(
        &self,
        name: impl Into<String>,
        artifact: Option<String>,
        path: PathBuf,
        delete_after: bool,
    ) {
        self.dispatcher.submit(Task::DeployDropin {
            name: name.into(),
            artifact,
            path,
            delete_after,
        });
    }

    pub fn update_configuration(&self, name: impl Into<String>, config: ServerConfig) {
        self.dispatcher.submit(Task::UpdateConfig {
            name: name.into(),
            config,
        });
    }

    /// Ask every started server to report status. Observational only; the
    /// reports land in the log sink.
    pub fn show_status(&self) {
        self.dispatcher.submit(Task::Status);
    }

    /// Names currently in the started set, sorted for stable output.
    pub fn started_servers(&self) -> Vec<String> {
        let set = match self.started.read() {
            Ok(set) => set.iter().cloned().collect::<Vec<_>>(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        };
        let mut names = set;
        names.sort();
        names
    }

    /// Register an additional consumer for all server output and log lines.
    pub fn watch_logs(&self, sink: Arc<dyn LogSink>) {
        self.sink.register(sink);
    }

    /// Host of the last endpoint declared in the server's written
    /// descriptor.
    pub fn listening_host(&self, name: &str) -> Result<Option<String>, CoreError> {
        Ok(self.last_endpoint(name)?.and_then(|e| e.host))
    }

    /// Ports of the last endpoint declared in the server's written
    /// descriptor, plain port first.
    pub fn listening_ports(&self, name: &str) -> Result<Vec<u16>, CoreError> {
        let Some(endpoint) = self.last_endpoint(name)? else {
            return Ok(Vec::new());
        };
        Ok(endpoint
            .port
            .into_iter()
            .chain(endpoint.secure_port)
            .collect())
    }

    fn last_endpoint(&self, name: &str) -> Result<Option<Endpoint>, CoreError> {
        let path = self.layout.server_dir(name).join(DESCRIPTOR_FILE);
        if !path.exists() {
            return Err(CoreError::UnknownServer(name.to_owned()));
        }
        let descriptor = std::fs::read_to_string(path)?;
        Ok(parse_endpoints(&descriptor).into_iter().last())
    }

    /// Drain the queue, then best-effort stop every started server
    /// (each stop awaited) and join the worker.
    pub fn shutdown(&mut self) {
        info!("orchestrator shutting down");
        self.dispatcher.shutdown();
    }
}
