use crate::ProcessError;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Environment variable naming the resolved runtime kit for the launcher.
pub const RUNTIME_HOME_VAR: &str = "RUNTIME_HOME";
/// Environment variable carrying the managing host's callback base URL.
pub const CALLBACK_URL_VAR: &str = "BOSUN_CALLBACK_URL";

/// Receives log lines from process forwarders and tailers.
///
/// `stream` identifies the origin: `stdout`, `stderr`, or `log`.
pub trait LogSink: Send + Sync {
    fn line(&self, server: &str, stream: &str, line: &str);
}

/// Multiplexes lines to dynamically registered sinks.
///
/// The orchestrator owns one of these as the shared sink; `watch_logs`
/// registrations land here.
#[derive(Default)]
pub struct FanoutSink {
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sink: Arc<dyn LogSink>) {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.push(sink);
        }
    }
}

impl LogSink for FanoutSink {
    fn line(&self, server: &str, stream: &str, line: &str) {
        if let Ok(sinks) = self.sinks.read() {
            for sink in sinks.iter() {
                sink.line(server, stream, line);
            }
        }
    }
}

/// Environment handed to a spawned control process.
#[derive(Debug, Clone)]
pub struct SpawnEnv {
    /// Resolved runtime kit the launcher should run the server on.
    pub runtime_home: PathBuf,
    /// Base URL the spawned process can call the managing host back on.
    pub callback_url: String,
    /// Additional variables, set last (may override the standard ones).
    pub extra: Vec<(String, String)>,
}

/// A spawned control process plus its stream forwarders.
pub struct ProcessHandle {
    child: Child,
    forwarders: Vec<JoinHandle<()>>,
    server: String,
    verb: String,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    #[inline]
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Block until the control invocation returns, then join the
    /// forwarders so every line reaches the sink before this returns.
    pub fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait()?;
        for handle in self.forwarders.drain(..) {
            if handle.join().is_err() {
                warn!("output forwarder for '{}' panicked", self.server);
            }
        }
        debug!(
            "control '{}' for '{}' exited with {status}",
            self.verb, self.server
        );
        Ok(status)
    }

    /// Non-blocking poll; `None` while the process is still running.
    pub fn try_wait(&mut self) -> Result<Option<ExitStatus>, ProcessError> {
        Ok(self.child.try_wait()?)
    }
}

/// Spawns the distribution's control launcher and forwards its output.
pub struct ProcessSupervisor {
    sink: Arc<dyn LogSink>,
}

impl ProcessSupervisor {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Spawn `bin/server <verb> <server> <args...>` under `dist_root`.
    ///
    /// Returns as soon as the child is running; two forwarder threads copy
    /// stdout and stderr into the shared sink until end-of-stream. The
    /// caller decides whether to wait on the returned handle.
    pub fn spawn(
        &self,
        dist_root: &Path,
        server: &str,
        verb: &str,
        args: &[String],
        env: &SpawnEnv,
    ) -> Result<ProcessHandle, ProcessError> {
        let launcher = launcher_path(dist_root);
        let mut cmd = Command::new(&launcher);
        cmd.arg(verb)
            .arg(server)
            .args(args)
            .current_dir(dist_root)
            .env(RUNTIME_HOME_VAR, &env.runtime_home)
            .env(CALLBACK_URL_VAR, &env.callback_url)
            .env("PATH", augmented_path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &env.extra {
            cmd.env(key, value);
        }

        debug!("spawning {} {verb} {server}", launcher.display());
        let mut child = cmd.spawn().map_err(|e| ProcessError::Launch {
            program: launcher.display().to_string(),
            detail: e.to_string(),
        })?;

        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(forward(stdout, server.to_owned(), "stdout", Arc::clone(&self.sink)));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(forward(stderr, server.to_owned(), "stderr", Arc::clone(&self.sink)));
        }

        Ok(ProcessHandle {
            child,
            forwarders,
            server: server.to_owned(),
            verb: verb.to_owned(),
        })
    }
}

fn launcher_path(dist_root: &Path) -> PathBuf {
    let script = if cfg!(windows) { "server.bat" } else { "server" };
    dist_root.join("bin").join(script)
}

/// Inherited search path with the host program's directory prepended, so
/// helper binaries shipped next to the orchestrator are found first.
fn augmented_path() -> std::ffi::OsString {
    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let Some(program_dir) = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
    else {
        return inherited;
    };
    let mut parts = vec![program_dir];
    parts.extend(std::env::split_paths(&inherited));
    std::env::join_paths(parts).unwrap_or(inherited)
}

fn forward(
    stream: impl std::io::Read + Send + 'static,
    server: String,
    name: &'static str,
    sink: Arc<dyn LogSink>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let reader = BufReader::new(stream);
        for line in reader.lines() {
            match line {
                Ok(line) => sink.line(&server, name, &line),
                Err(e) => {
                    debug!("{name} forwarder for '{server}' ended: {e}");
                    break;
                }
            }
        }
    })
}
