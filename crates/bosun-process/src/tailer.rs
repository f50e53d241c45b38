use crate::supervisor::LogSink;
use crate::ProcessError;
use notify::{RecursiveMode, Watcher};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Event-poll timeout for the watch loop.
const POLL: Duration = Duration::from_millis(200);
/// Stat the file directly every N idle polls. Change notification is
/// unreliable on some platforms; the periodic stat nudges detection.
const NUDGE_EVERY: u32 = 5;

/// Follows a server's primary log file, streaming appended text to the
/// shared sink.
///
/// Tolerates truncation: when the file shrinks below the recorded offset,
/// the offset resets to zero and the new content is read from the start.
/// Bytes written before a truncation are never re-emitted.
pub struct LogTailer {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LogTailer {
    /// Register a watch on the log file's parent directory and start the
    /// tail loop. The file itself may not exist yet; it is picked up on
    /// first write.
    pub fn start(
        path: impl Into<PathBuf>,
        server: impl Into<String>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, ProcessError> {
        let path = path.into();
        let server = server.into();
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ProcessError::Watch {
                path: path.display().to_string(),
                detail: "log path has no parent directory".to_owned(),
            })?;

        let (tx, rx) = std::sync::mpsc::channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .map_err(|e| ProcessError::Watch {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| ProcessError::Watch {
                path: path.display().to_string(),
                detail: e.to_string(),
            })?;

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let thread = std::thread::spawn(move || {
            // The watcher must live as long as the loop.
            let _watcher = watcher;
            let mut cursor = TailCursor::new(path.clone(), server, sink);
            let mut idle_polls = 0u32;

            // Content written before the tailer started is not replayed.
            cursor.skip_existing();

            while !stop_flag.load(Ordering::SeqCst) {
                match rx.recv_timeout(POLL) {
                    Ok(Ok(event)) => {
                        let names_file = event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == path.file_name());
                        if names_file {
                            cursor.read_new();
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("watch error on {}: {e}", path.display());
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        idle_polls += 1;
                        if idle_polls >= NUDGE_EVERY {
                            idle_polls = 0;
                            cursor.read_new();
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("tailer for {} stopped", path.display());
        });

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Cancel the watch loop. Best-effort: an in-flight read may or may not
    /// complete, but the thread is joined before this returns.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LogTailer {
    fn drop(&mut self) {
        self.close();
    }
}

struct TailCursor {
    path: PathBuf,
    server: String,
    sink: Arc<dyn LogSink>,
    offset: u64,
    pending: String,
}

impl TailCursor {
    fn new(path: PathBuf, server: String, sink: Arc<dyn LogSink>) -> Self {
        Self {
            path,
            server,
            sink,
            offset: 0,
            pending: String::new(),
        }
    }

    fn skip_existing(&mut self) {
        if let Ok(meta) = std::fs::metadata(&self.path) {
            self.offset = meta.len();
        }
    }

    /// Emit everything past the recorded offset, resetting on truncation.
    fn read_new(&mut self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        let len = meta.len();
        if len < self.offset {
            debug!("{} truncated, restarting from offset 0", self.path.display());
            self.offset = 0;
            self.pending.clear();
        }
        if len == self.offset {
            return;
        }

        let Ok(mut file) = File::open(&self.path) else {
            return;
        };
        if file.seek(SeekFrom::Start(self.offset)).is_err() {
            return;
        }
        let mut buf = Vec::new();
        match file.read_to_end(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                self.offset += n as u64;
                self.emit(&String::from_utf8_lossy(&buf));
            }
            Err(e) => warn!("tail read failed on {}: {e}", self.path.display()),
        }
    }

    /// Line-buffer decoded text; a trailing partial line is held back until
    /// its newline arrives.
    fn emit(&mut self, text: &str) {
        self.pending.push_str(text);
        while let Some(nl) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=nl).collect();
            self.sink.line(&self.server, "log", line.trim_end_matches(['\n', '\r']));
        }
    }
}
