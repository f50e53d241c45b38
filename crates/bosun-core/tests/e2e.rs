//! End-to-end lifecycle tests driving a stub control launcher shipped
//! inside the mock distribution archive.

#![cfg(unix)]

use bosun_core::Orchestrator;
use bosun_process::LogSink;
use bosun_provision::{HostRuntimeProvider, InstallLayout, RuntimeProvider};
use bosun_schema::{parse_settings_str, OrchestratorSettings, RuntimeId, ServerConfig};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Stub launcher: records every control invocation and emits a log line on
/// start, mimicking a server technology's control script.
const STUB_LAUNCHER: &str = r#"#!/bin/sh
verb="$1"
name="$2"
dir="usr/servers/$name"
mkdir -p "$dir/logs"
echo "$verb" >> "$dir/invocations.txt"
case "$verb" in
  start) echo "launched $name" >> "$dir/logs/console.log" ;;
  status) echo "status $name ok" ;;
esac
exit 0
"#;

fn dist_zip_bytes() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut buf);
        let opts = zip::write::SimpleFileOptions::default();
        writer.start_file("serverd/bin/server", opts).unwrap();
        writer.write_all(STUB_LAUNCHER.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buf.into_inner()
}

fn start_repo() -> (String, Arc<AtomicUsize>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let url = format!("http://{}", server.server_addr());
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            let _ = request.respond(tiny_http::Response::from_data(dist_zip_bytes()));
        }
    });
    (url, hits)
}

fn settings(base: &Path, repo_url: &str) -> OrchestratorSettings {
    parse_settings_str(&format!(
        r#"
[install]
base_dir = "{}"
[distribution]
group = "io.bosun"
artifact = "serverd"
version = "1.0"
repository = "{repo_url}"
"#,
        base.display()
    ))
    .unwrap()
}

fn runtime_providers(base: &Path) -> Vec<Box<dyn RuntimeProvider>> {
    let kit = base.join("kit");
    std::fs::create_dir_all(&kit).unwrap();
    vec![Box::new(HostRuntimeProvider::new(kit))]
}

fn orchestrator(base: &Path, repo_url: &str) -> Orchestrator {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    Orchestrator::new(settings(base, repo_url), runtime_providers(base), Vec::new()).unwrap()
}

fn config() -> ServerConfig {
    ServerConfig::new(
        "<server><httpEndpoint host=\"localhost\" httpPort=\"9080\"/></server>",
        RuntimeId::new("21", "hotspot"),
    )
}

fn wait_for<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

fn invocations(base: &Path, name: &str) -> Vec<String> {
    let layout = InstallLayout::new(base, "serverd-1.0");
    std::fs::read_to_string(layout.server_dir(name).join("invocations.txt"))
        .map(|s| s.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

struct CollectingSink {
    lines: Mutex<Vec<(String, String, String)>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
        })
    }

    fn snapshot(&self) -> Vec<(String, String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl LogSink for CollectingSink {
    fn line(&self, server: &str, stream: &str, line: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((server.to_owned(), stream.to_owned(), line.to_owned()));
    }
}

#[test]
fn create_start_stop_lifecycle() {
    let base = tempfile::tempdir().unwrap();
    let (url, _hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    let sink = CollectingSink::new();
    orch.watch_logs(sink.clone());

    orch.create_server("app1", config());
    orch.start_server("app1");
    assert!(wait_for(|| orch.started_servers() == vec!["app1".to_owned()]));
    assert_eq!(invocations(base.path(), "app1"), vec!["start"]);

    // The tailer is live on logs/console.log: an externally appended line
    // reaches the registered sink.
    let layout = InstallLayout::new(base.path(), "serverd-1.0");
    let log = layout.server_console_log("app1");
    {
        let mut f = std::fs::OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(b"external line\n").unwrap();
        f.sync_all().unwrap();
    }
    assert!(wait_for(|| sink
        .snapshot()
        .iter()
        .any(|(s, stream, l)| s == "app1" && stream == "log" && l == "external line")));

    orch.stop_server("app1");
    assert!(wait_for(|| orch.started_servers().is_empty()));
    assert!(wait_for(|| invocations(base.path(), "app1") == vec!["start", "stop"]));

    orch.shutdown();
    // Already stopped: shutdown records no extra control invocation.
    assert_eq!(invocations(base.path(), "app1"), vec!["start", "stop"]);
}

#[test]
fn rapid_start_stop_start_serializes_in_order() {
    let base = tempfile::tempdir().unwrap();
    let (url, _hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    orch.create_server("app1", config());
    orch.start_server("app1");
    orch.stop_server("app1");
    orch.start_server("app1");

    // Task serialization guarantees the state walk Running -> Stopped ->
    // Running; externally that shows up as exactly two accepted starts and
    // one stop, with the name back in the started set at the end. (The
    // unawaited stop process races the next start's file append, so the
    // line order itself is not asserted.)
    assert!(wait_for(|| {
        let inv = invocations(base.path(), "app1");
        inv.iter().filter(|v| *v == "start").count() == 2
            && inv.iter().filter(|v| *v == "stop").count() == 1
    }));
    assert!(wait_for(|| orch.started_servers() == vec!["app1".to_owned()]));
    orch.shutdown();
}

#[test]
fn stdout_of_control_processes_is_forwarded() {
    let base = tempfile::tempdir().unwrap();
    let (url, _hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    let sink = CollectingSink::new();
    orch.watch_logs(sink.clone());

    orch.create_server("app1", config());
    orch.start_server("app1");
    assert!(wait_for(|| !orch.started_servers().is_empty()));

    orch.show_status();
    assert!(wait_for(|| sink
        .snapshot()
        .iter()
        .any(|(s, stream, l)| s == "app1" && stream == "stdout" && l == "status app1 ok")));
    orch.shutdown();
}

#[test]
fn shutdown_stops_every_started_server() {
    let base = tempfile::tempdir().unwrap();
    let (url, _hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    for name in ["app1", "app2"] {
        orch.create_server(name, config());
        orch.start_server(name);
    }
    assert!(wait_for(|| orch.started_servers().len() == 2));

    orch.shutdown();
    // Shutdown-time stops are awaited, so the records are final here.
    assert_eq!(invocations(base.path(), "app1"), vec!["start", "stop"]);
    assert_eq!(invocations(base.path(), "app2"), vec!["start", "stop"]);
    assert!(orch.started_servers().is_empty());
}

#[test]
fn start_of_missing_server_leaves_no_trace_and_later_tasks_run() {
    let base = tempfile::tempdir().unwrap();
    let (url, _hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    orch.start_server("ghost");
    orch.create_server("app1", config());
    orch.start_server("app1");

    assert!(wait_for(|| orch.started_servers() == vec!["app1".to_owned()]));
    assert!(invocations(base.path(), "ghost").is_empty());
    orch.shutdown();
}

#[test]
fn distribution_downloaded_once_across_whole_lifecycle() {
    let base = tempfile::tempdir().unwrap();
    let (url, hits) = start_repo();
    let mut orch = orchestrator(base.path(), &url);

    orch.create_server("app1", config());
    orch.start_server("app1");
    orch.create_server("app2", config());
    assert!(wait_for(|| !orch.started_servers().is_empty()));
    orch.shutdown();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
