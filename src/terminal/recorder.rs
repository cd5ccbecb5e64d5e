//! asciinema v2 session recorder.
//!
//! A recording is newline-delimited JSON: one header object followed by one
//! `[time, kind, data]` event per line, where `time` is seconds since the
//! recorder was created and `kind` is `"o"` (sent to the client) or `"i"`
//! (received from the client).
//!
//! The recorder is shared by the output pumps and the input loop of one
//! session. Every write happens under a single mutex that is never held
//! across network I/O; event times are taken inside that lock so they are
//! non-decreasing in file order.
//!
//! Events go through a `BufWriter` and reach the disk on [`Recorder::close`].
//! `create` and `close` touch the filesystem synchronously; async callers run
//! them on the blocking pool.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::terminal::error::TerminalError;
use crate::terminal::types::TerminalSize;

/// Recording file extension.
pub const RECORDING_EXTENSION: &str = "cast";

/// First line of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub version: u32,
    pub width: u16,
    pub height: u16,
    /// Unix seconds at which the recording started.
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "o")]
    Output,
    #[serde(rename = "i")]
    Input,
}

/// One recorded event, serialized as a 3-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEvent(pub f64, pub EventKind, pub String);

impl RecordingEvent {
    pub fn time(&self) -> f64 {
        self.0
    }

    pub fn kind(&self) -> EventKind {
        self.1
    }

    pub fn data(&self) -> &str {
        &self.2
    }
}

/// Parsed recording file.
#[derive(Debug, Clone)]
pub struct Recording {
    pub header: RecordingHeader,
    pub events: Vec<RecordingEvent>,
}

struct RecorderState {
    file: Option<BufWriter<File>>,
    last_time: f64,
}

/// Append-only asciinema writer for one terminal session.
pub struct Recorder {
    path: PathBuf,
    started: Instant,
    state: Mutex<RecorderState>,
}

fn recorder_error(context: &str, e: impl std::fmt::Display) -> TerminalError {
    TerminalError::RecorderUnavailable(format!("{}: {}", context, e))
}

/// Create `<dir>/<stamp>.cast` without clobbering an existing file.
fn create_recording_file(dir: &Path, stamp: &str) -> io::Result<(PathBuf, File)> {
    let primary = dir.join(format!("{}.{}", stamp, RECORDING_EXTENSION));
    match OpenOptions::new().write(true).create_new(true).open(&primary) {
        Ok(file) => Ok((primary, file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let suffix = Uuid::new_v4().simple().to_string();
            let fallback = dir.join(format!("{}-{}.{}", stamp, &suffix[..8], RECORDING_EXTENSION));
            debug!("{} exists, recording to {}", primary.display(), fallback.display());
            let file = OpenOptions::new().write(true).create_new(true).open(&fallback)?;
            Ok((fallback, file))
        }
        Err(e) => Err(e),
    }
}

impl Recorder {
    /// Create a recording in `dir` sized to `size` and write its header.
    ///
    /// The directory is created if needed. The header is fsynced before this
    /// returns.
    pub fn create(dir: &Path, size: TerminalSize) -> Result<Self, TerminalError> {
        fs::create_dir_all(dir).map_err(|e| recorder_error("create recording directory", e))?;

        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let (path, mut file) =
            create_recording_file(dir, &stamp).map_err(|e| recorder_error("create recording file", e))?;
        let started = Instant::now();

        let header = RecordingHeader {
            version: 2,
            width: size.cols,
            height: size.rows,
            timestamp: Utc::now().timestamp(),
        };

        let written = serde_json::to_string(&header)
            .map_err(|e| recorder_error("serialize header", e))
            .and_then(|line| {
                writeln!(file, "{}", line).map_err(|e| recorder_error("write header", e))
            })
            .and_then(|_| file.sync_all().map_err(|e| recorder_error("sync header", e)));

        if let Err(e) = written {
            drop(file);
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!("Failed to remove partial recording {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }

        Ok(Self {
            path,
            started,
            state: Mutex::new(RecorderState {
                file: Some(BufWriter::new(file)),
                last_time: 0.0,
            }),
        })
    }

    /// Record bytes sent to the client.
    pub fn record_output(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.record(EventKind::Output, data)
    }

    /// Record bytes received from the client.
    pub fn record_input(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.record(EventKind::Input, data)
    }

    fn record(&self, kind: EventKind, data: &[u8]) -> Result<(), TerminalError> {
        if data.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let time = self.started.elapsed().as_secs_f64().max(state.last_time);
        let Some(file) = state.file.as_mut() else {
            return Err(TerminalError::RecorderUnavailable(
                "recorder is closed".to_string(),
            ));
        };

        let event = RecordingEvent(time, kind, String::from_utf8_lossy(data).into_owned());
        let line = serde_json::to_string(&event).map_err(|e| recorder_error("serialize event", e))?;
        writeln!(file, "{}", line).map_err(|e| recorder_error("write event", e))?;

        state.last_time = time;
        Ok(())
    }

    /// Flush buffered events, fsync and close the file. Later calls are no-ops.
    pub fn close(&self) -> Result<(), TerminalError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(writer) = state.file.take() else {
            return Ok(());
        };
        let file = writer
            .into_inner()
            .map_err(|e| recorder_error("flush recording", e.error()))?;
        file.sync_all().map_err(|e| recorder_error("sync recording", e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole seconds since the recorder was created.
    pub fn duration_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Current size of the recording on disk, 0 if it cannot be read.
    /// Buffered events count once the recorder is closed.
    pub fn file_size(&self) -> u64 {
        fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }
}

/// Parse a recording file into its header and events.
pub fn read_recording(path: &Path) -> Result<Recording, TerminalError> {
    let file = File::open(path).map_err(|e| recorder_error("open recording", e))?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next()
        .ok_or_else(|| TerminalError::RecorderUnavailable("recording is empty".to_string()))?
        .map_err(|e| recorder_error("read header", e))?;
    let header: RecordingHeader =
        serde_json::from_str(&header_line).map_err(|e| recorder_error("parse header", e))?;

    let mut events = Vec::new();
    for (index, line) in lines.enumerate() {
        let line = line.map_err(|e| recorder_error("read event", e))?;
        if line.trim().is_empty() {
            continue;
        }
        let event: RecordingEvent = serde_json::from_str(&line)
            .map_err(|e| recorder_error(&format!("parse event {}", index + 1), e))?;
        events.push(event);
    }

    Ok(Recording { header, events })
}
