use crate::dispatcher::TaskRunner;
use crate::lifecycle::{validate_transition, ServerState};
use crate::server::ServerInstance;
use crate::task::Task;
use crate::CoreError;
use bosun_provision::{
    extract_archive, DistributionProvisioner, ExtensionAssembler, FeatureProvider, InstallLayout,
    RuntimeProvider, RuntimeResolver,
};
use bosun_process::{LogSink, LogTailer, ProcessSupervisor, SpawnEnv};
use bosun_schema::{validate_server_name, OrchestratorSettings, ServerConfig};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Runs every task on the dispatcher worker, owning all per-server state.
///
/// Nothing here locks around the caches or instances: the dispatcher is the
/// single writer. The started-name set is the one structure shared with
/// other threads (queries from the orchestrator facade), hence the RwLock.
pub struct Executor {
    settings: OrchestratorSettings,
    layout: InstallLayout,
    provisioner: DistributionProvisioner,
    resolver: RuntimeResolver,
    assembler: ExtensionAssembler,
    features: Vec<Box<dyn FeatureProvider>>,
    supervisor: ProcessSupervisor,
    sink: Arc<dyn LogSink>,
    servers: HashMap<String, ServerInstance>,
    started: Arc<RwLock<HashSet<String>>>,
}

impl Executor {
    pub fn new(
        settings: OrchestratorSettings,
        runtime_providers: Vec<Box<dyn RuntimeProvider>>,
        features: Vec<Box<dyn FeatureProvider>>,
        sink: Arc<dyn LogSink>,
        started: Arc<RwLock<HashSet<String>>>,
    ) -> Self {
        let layout = InstallLayout::new(&settings.install.base_dir, settings.dist_dir_name());
        Self {
            provisioner: DistributionProvisioner::new(settings.clone(), layout.clone()),
            resolver: RuntimeResolver::new(runtime_providers),
            assembler: ExtensionAssembler::new(layout.clone()),
            features,
            supervisor: ProcessSupervisor::new(Arc::clone(&sink)),
            sink,
            servers: HashMap::new(),
            started,
            settings,
            layout,
        }
    }

    fn instance_mut(&mut self, name: &str) -> Result<&mut ServerInstance, CoreError> {
        self.servers
            .get_mut(name)
            .ok_or_else(|| CoreError::UnknownServer(name.to_owned()))
    }

    fn started_snapshot(&self) -> Vec<String> {
        match self.started.read() {
            Ok(set) => set.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn mark_started(&self, name: &str, started: bool) {
        let mut set = match self.started.write() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        if started {
            set.insert(name.to_owned());
        } else {
            set.remove(name);
        }
    }

    fn spawn_env(&self, runtime_home: PathBuf) -> SpawnEnv {
        SpawnEnv {
            runtime_home,
            callback_url: self.settings.callback_url(),
            extra: Vec::new(),
        }
    }

    fn create_server(&mut self, name: &str, config: ServerConfig) -> Result<(), CoreError> {
        validate_server_name(name)?;
        config.validate()?;

        if !self.servers.contains_key(name) {
            self.servers
                .insert(name.to_owned(), ServerInstance::new(name, config.clone()));
        }
        let state = self.instance_mut(name)?.state;
        validate_transition(state, ServerState::Deployed)?;

        let dist_root = self.provisioner.deploy()?;
        self.assembler.assemble(&self.features)?;

        let layout = self.layout.clone();
        let instance = self.instance_mut(name)?;
        instance.config = config;
        instance.state = ServerState::Deployed;
        instance.ensure_skeleton(&layout)?;
        instance.write_config_files(&layout)?;

        let server_dir = instance.dir(&layout);
        for archive in instance.config.asset_archives.clone() {
            if !archive.exists() {
                warn!("asset archive {} missing; skipped", archive.display());
                continue;
            }
            extract_archive(&archive, &server_dir)?;
            std::fs::remove_file(&archive)?;
            debug!("extracted and removed asset archive {}", archive.display());
        }

        let instance = self.instance_mut(name)?;
        instance.state = ServerState::Configured;
        info!("server '{name}' configured under {}", dist_root.display());
        Ok(())
    }

    fn start(&mut self, name: &str) -> Result<(), CoreError> {
        let state = self.instance_mut(name)?.state;
        validate_transition(state, ServerState::Running)?;

        let kit = {
            let runtime = self.instance_mut(name)?.config.runtime.clone();
            self.resolver.resolve(&runtime)?
        };
        let dist_root = self.provisioner.deploy()?;
        let env = self.spawn_env(kit);

        // The start verb is the one control invocation the task blocks on:
        // its return means the start request was accepted, not that the
        // server is fully ready.
        let mut handle = self.supervisor.spawn(&dist_root, name, "start", &[], &env)?;
        let status = handle.wait()?;
        if !status.success() {
            return Err(CoreError::ControlFailed {
                server: name.to_owned(),
                verb: "start".to_owned(),
                status: status.to_string(),
            });
        }

        let log_path = self.layout.server_console_log(name);
        let tailer = match LogTailer::start(&log_path, name, Arc::clone(&self.sink)) {
            Ok(tailer) => Some(tailer),
            Err(e) => {
                // Degraded but running: the server is up, only log
                // following is unavailable.
                warn!("log tailer for '{name}' failed to start: {e}");
                None
            }
        };

        let instance = self.instance_mut(name)?;
        if let Some(mut old) = instance.handle.take() {
            let _ = old.try_wait();
        }
        instance.handle = Some(handle);
        instance.tailer = tailer;
        instance.state = ServerState::Running;
        self.mark_started(name, true);
        info!("server '{name}' running");
        Ok(())
    }

    fn stop(&mut self, name: &str, awaited: bool) -> Result<(), CoreError> {
        let state = self.instance_mut(name)?.state;
        validate_transition(state, ServerState::Stopped)?;

        let kit = {
            let runtime = self.instance_mut(name)?.config.runtime.clone();
            self.resolver.resolve(&runtime)?
        };
        let dist_root = self.provisioner.deploy()?;
        let env = self.spawn_env(kit);

        if let Some(mut tailer) = self.instance_mut(name)?.tailer.take() {
            tailer.close();
        }

        let mut handle = self.supervisor.spawn(&dist_root, name, "stop", &[], &env)?;
        if awaited {
            // Shutdown path: every stop is awaited before the worker exits.
            let status = handle.wait()?;
            if !status.success() {
                warn!("control 'stop' for '{name}' exited with {status}");
            }
        }

        let instance = self.instance_mut(name)?;
        if let Some(mut old) = instance.handle.take() {
            let _ = old.try_wait();
        }
        instance.handle = Some(handle);
        instance.state = ServerState::Stopped;
        self.mark_started(name, false);
        info!("server '{name}' stopped");
        Ok(())
    }

    fn deploy_dropin(
        &mut self,
        name: &str,
        artifact: Option<&str>,
        path: &std::path::Path,
        delete_after: bool,
    ) -> Result<(), CoreError> {
        let layout = self.layout.clone();
        self.instance_mut(name)?
            .deploy_dropin(&layout, artifact, path, delete_after)
    }

    fn update_config(&mut self, name: &str, config: ServerConfig) -> Result<(), CoreError> {
        config.validate()?;
        let layout = self.layout.clone();
        let instance = self.instance_mut(name)?;
        if instance.state == ServerState::Unconfigured || instance.state == ServerState::Deployed {
            return Err(CoreError::InvalidTransition {
                from: instance.state.to_string(),
                to: "update-config requires a configured server".to_owned(),
            });
        }

        instance.config = config;
        instance.write_descriptor(&layout)?;
        // Listening ports may have moved; consumers of listening_host/ports
        // (e.g. a fronting proxy) are not told. Deliberate: see DESIGN.md.
        warn!("descriptor for '{name}' rewritten in place; port consumers are not notified");
        Ok(())
    }

    fn status(&mut self) -> Result<(), CoreError> {
        for name in self.started_snapshot() {
            let created = self
                .servers
                .get(&name)
                .map(|i| i.created_at.clone())
                .unwrap_or_default();
            let result = self.control_status(&name);
            match result {
                Ok(()) => debug!("status for '{name}' (created {created}) reported"),
                Err(e) => warn!("status for '{name}' failed: {e}"),
            }
        }
        Ok(())
    }

    fn control_status(&mut self, name: &str) -> Result<(), CoreError> {
        let runtime = self.instance_mut(name)?.config.runtime.clone();
        let kit = self.resolver.resolve(&runtime)?;
        let dist_root = self.provisioner.deploy()?;
        let env = self.spawn_env(kit);
        let mut handle = self.supervisor.spawn(&dist_root, name, "status", &[], &env)?;
        handle.wait()?;
        Ok(())
    }
}

impl TaskRunner for Executor {
    fn run(&mut self, task: Task) -> Result<(), CoreError> {
        match task {
            Task::CreateServer { name, config } => self.create_server(&name, config),
            Task::Start { name } => self.start(&name),
            Task::Stop { name } => self.stop(&name, false),
            Task::DeployDropin {
                name,
                artifact,
                path,
                delete_after,
            } => self.deploy_dropin(&name, artifact.as_deref(), &path, delete_after),
            Task::UpdateConfig { name, config } => self.update_config(&name, config),
            Task::Status => self.status(),
        }
    }

    /// Shutdown: best-effort stop of every started server, each awaited.
    fn finish(&mut self) {
        for name in self.started_snapshot() {
            info!("shutdown: stopping '{name}'");
            if let Err(e) = self.stop(&name, true) {
                warn!("shutdown stop for '{name}' failed: {e}");
            }
        }
    }
}
