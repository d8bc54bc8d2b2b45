//! Data sources feeding monitors.
//!
//! A source hands back already-normalized [`RawRecord`]s; it never decides
//! whether anything is alert-worthy. Sources are pulled once per monitor
//! cycle under the monitor's timeout, and any failure only affects that
//! cycle.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, SourceError};

/// Boxed future returned by [`DataSource::pull`].
pub type PullFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<RawRecord>, SourceError>> + Send + 'a>>;

/// One normalized observation from a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Tracked key (source address, service name, budget name, path).
    pub key: String,
    /// When it happened; defaults to the time of the pull.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Observed value for value-mode monitors.
    #[serde(default)]
    pub value: Option<f64>,
    /// Free-form context carried into alert fields.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RawRecord {
    /// Creates a record for `key` with no timestamp or value.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            timestamp: None,
            value: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the value.
    #[must_use]
    pub const fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Something a monitor can pull records from.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Short description used in logs.
    fn describe(&self) -> String;

    /// Returns the records that appeared since the last pull.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the source cannot be read.
    fn pull(&self) -> PullFuture<'_>;

    /// Read position worth keeping across restarts, if the source has one.
    fn checkpoint(&self) -> Option<SourceCursor> {
        None
    }

    /// Continues from a position returned by [`DataSource::checkpoint`].
    fn resume(&self, _cursor: SourceCursor) {}
}

/// Saved read position of a file-backed source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCursor {
    /// Byte offset just past the last consumed line.
    pub offset: u64,
    /// Identity of the file the offset belongs to (inode on unix).
    #[serde(default)]
    pub file_id: Option<u64>,
}

/// Declarative source configuration, as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Tail a JSON-lines file.
    JsonLines {
        /// File to tail.
        path: PathBuf,
        /// Read records already in the file on the first pull.
        #[serde(default)]
        read_existing: bool,
    },
    /// Run a command that prints JSON lines.
    Command {
        /// Program to run.
        program: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// GET a JSON array of records.
    Http {
        /// Endpoint URL.
        url: String,
        /// Extra request headers.
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    /// Emit a fixed set of records once.
    Static {
        /// Records to emit.
        #[serde(default)]
        records: Vec<RawRecord>,
    },
}

impl SourceConfig {
    /// Builds the configured source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMonitor` if the source settings are
    /// unusable.
    pub fn build(&self, monitor_id: &str) -> Result<Arc<dyn DataSource>, ConfigError> {
        self.build_with(monitor_id, false)
    }

    /// Builds the configured source; with `replay_backlog` set, file
    /// sources also read what is already in the file on the first pull.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidMonitor` if the source settings are
    /// unusable.
    pub fn build_with(
        &self,
        monitor_id: &str,
        replay_backlog: bool,
    ) -> Result<Arc<dyn DataSource>, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidMonitor {
            monitor: monitor_id.to_string(),
            reason,
        };

        match self {
            Self::JsonLines { path, read_existing } => {
                if path.as_os_str().is_empty() {
                    return Err(invalid("json_lines source needs a path".to_string()));
                }
                let source = JsonLinesSource::new(path).read_existing(*read_existing || replay_backlog);
                Ok(Arc::new(source))
            }
            Self::Command { program, args } => {
                if program.trim().is_empty() {
                    return Err(invalid("command source needs a program".to_string()));
                }
                Ok(Arc::new(CommandSource::new(program.clone(), args.clone())))
            }
            Self::Http { url, headers } => {
                let source = HttpSource::new(url.clone(), headers.clone()).map_err(|e| invalid(e.to_string()))?;
                Ok(Arc::new(source))
            }
            Self::Static { records } => {
                let source = StaticSource::new(monitor_id);
                source.push(records.clone());
                Ok(Arc::new(source))
            }
        }
    }
}

fn parse_lines(origin: &str, text: &str) -> Vec<RawRecord> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<RawRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(source = %origin, line = idx + 1, error = %e, "skipping malformed record"),
        }
    }
    records
}

// ============ JSON lines file ============

#[derive(Debug, Default)]
struct Cursor {
    offset: u64,
    file_id: Option<u64>,
    primed: bool,
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Tails a JSON-lines file.
///
/// The read position can be checkpointed and resumed across restarts. A
/// file that shrinks or is replaced under the same path is re-read from the
/// start. A trailing line without a newline is left for the next pull.
#[derive(Debug)]
pub struct JsonLinesSource {
    path: PathBuf,
    read_existing: bool,
    cursor: Mutex<Cursor>,
}

impl JsonLinesSource {
    /// Creates a source tailing `path`, starting at its current end.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_existing: false,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Reads records already present on the first pull.
    #[must_use]
    pub const fn read_existing(mut self, read_existing: bool) -> Self {
        self.read_existing = read_existing;
        self
    }

    /// The tailed file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte offset.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.cursor.lock().offset
    }

    async fn read_new(&self) -> Result<Vec<RawRecord>, SourceError> {
        let (len, file_id) = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => (meta.len(), file_identity(&meta)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "source file does not exist yet");
                let mut cursor = self.cursor.lock();
                cursor.offset = 0;
                cursor.file_id = None;
                cursor.primed = true;
                return Ok(Vec::new());
            }
            Err(e) => return Err(SourceError::io(&self.path, e)),
        };

        let start = {
            let mut cursor = self.cursor.lock();
            if !cursor.primed {
                cursor.primed = true;
                if !self.read_existing {
                    cursor.offset = len;
                }
            }
            if matches!((cursor.file_id, file_id), (Some(known), Some(current)) if known != current) {
                info!(path = %self.path.display(), "source file replaced, reading from start");
                cursor.offset = 0;
            }
            if len < cursor.offset {
                info!(path = %self.path.display(), "source file shrank, reading from start");
                cursor.offset = 0;
            }
            cursor.file_id = file_id;
            cursor.offset
        };

        if start == len {
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| SourceError::io(&self.path, e))?;
        file.seek(std::io::SeekFrom::Start(start))
            .await
            .map_err(|e| SourceError::io(&self.path, e))?;
        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf)
            .await
            .map_err(|e| SourceError::io(&self.path, e))?;

        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let complete = &buf[..=last_newline];
        let text = String::from_utf8_lossy(complete);
        let records = parse_lines(&self.path.display().to_string(), &text);

        self.cursor.lock().offset = start + complete.len() as u64;
        Ok(records)
    }
}

impl DataSource for JsonLinesSource {
    fn describe(&self) -> String {
        format!("json_lines:{}", self.path.display())
    }

    fn pull(&self) -> PullFuture<'_> {
        Box::pin(self.read_new())
    }

    fn checkpoint(&self) -> Option<SourceCursor> {
        let cursor = self.cursor.lock();
        cursor.primed.then_some(SourceCursor {
            offset: cursor.offset,
            file_id: cursor.file_id,
        })
    }

    fn resume(&self, saved: SourceCursor) {
        let mut cursor = self.cursor.lock();
        cursor.offset = saved.offset;
        cursor.file_id = saved.file_id;
        cursor.primed = true;
    }
}

// ============ Command ============

/// Runs a command and parses its stdout as JSON lines.
///
/// The child is killed if the pull is dropped, so a monitor timeout never
/// leaves a stray process behind.
#[derive(Debug, Clone)]
pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    /// Creates a command source.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }
}

impl DataSource for CommandSource {
    fn describe(&self) -> String {
        format!("command:{}", self.program)
    }

    fn pull(&self) -> PullFuture<'_> {
        Box::pin(async move {
            let output = tokio::process::Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| SourceError::io(&self.program, e))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let excerpt: String = stderr.trim().chars().take(200).collect();
                return Err(SourceError::Command {
                    reason: format!("{} exited with {}: {excerpt}", self.program, output.status),
                });
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(parse_lines(&self.program, &stdout))
        })
    }
}

// ============ HTTP ============

/// Fetches a JSON array of records with a GET request.
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl HttpSource {
    /// Creates an HTTP source.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::Http` if the URL is not http(s) or the client
    /// cannot be built.
    pub fn new(url: String, headers: HashMap<String, String>) -> Result<Self, SourceError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(SourceError::Http {
                reason: format!("url must start with http:// or https://: {url}"),
            });
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SourceError::Http {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            url,
            headers,
            client,
        })
    }
}

impl DataSource for HttpSource {
    fn describe(&self) -> String {
        format!("http:{}", self.url)
    }

    fn pull(&self) -> PullFuture<'_> {
        Box::pin(async move {
            let mut request = self.client.get(&self.url);
            for (key, value) in &self.headers {
                request = request.header(key, value);
            }

            let response = request.send().await.map_err(|e| SourceError::Http {
                reason: format!("request to {} failed: {e}", self.url),
            })?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Http {
                    reason: format!("{} returned {status}", self.url),
                });
            }

            let body = response.bytes().await.map_err(|e| SourceError::Http {
                reason: format!("reading body from {} failed: {e}", self.url),
            })?;
            serde_json::from_slice::<Vec<RawRecord>>(&body).map_err(|e| SourceError::Malformed {
                reason: format!("{}: {e}", self.url),
            })
        })
    }
}

// ============ In-memory ============

#[derive(Debug)]
enum Scripted {
    Records(Vec<RawRecord>),
    Fail(String),
    Stall(Duration),
}

/// An in-memory queue of scripted pull results.
///
/// Each pull takes the next queued entry; an empty queue yields no records.
#[derive(Debug)]
pub struct StaticSource {
    name: String,
    queue: Mutex<VecDeque<Scripted>>,
}

impl StaticSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a batch of records.
    pub fn push(&self, records: Vec<RawRecord>) {
        self.queue.lock().push_back(Scripted::Records(records));
    }

    /// Queues a failing pull.
    pub fn push_failure(&self, reason: impl Into<String>) {
        self.queue.lock().push_back(Scripted::Fail(reason.into()));
    }

    /// Queues a pull that sleeps for `duration` before returning nothing.
    pub fn push_stall(&self, duration: Duration) {
        self.queue.lock().push_back(Scripted::Stall(duration));
    }

    /// Number of queued pulls.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl DataSource for StaticSource {
    fn describe(&self) -> String {
        format!("static:{}", self.name)
    }

    fn pull(&self) -> PullFuture<'_> {
        let next = self.queue.lock().pop_front();
        Box::pin(async move {
            match next {
                None => Ok(Vec::new()),
                Some(Scripted::Records(records)) => Ok(records),
                Some(Scripted::Fail(reason)) => Err(SourceError::Malformed { reason }),
                Some(Scripted::Stall(duration)) => {
                    tokio::time::sleep(duration).await;
                    Ok(Vec::new())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    mod record_tests {
        use super::*;

        #[test]
        fn record_defaults() {
            let record: RawRecord = serde_json::from_str(r#"{"key":"sshd"}"#).unwrap();
            assert_eq!(record.key, "sshd");
            assert!(record.timestamp.is_none());
            assert!(record.value.is_none());
            assert!(record.metadata.is_empty());
        }

        #[test]
        fn record_with_metadata() {
            let record: RawRecord = serde_json::from_str(
                r#"{"key":"203.0.113.42","timestamp":"2024-05-01T12:00:00Z","metadata":{"user":"root","port":22}}"#,
            )
            .unwrap();
            assert_eq!(record.metadata["user"], "root");
            assert_eq!(record.metadata["port"], 22);
        }

        #[test]
        fn parse_lines_skips_garbage() {
            let text = "{\"key\":\"a\"}\nnot json\n\n{\"key\":\"b\"}\n";
            let records = parse_lines("test", text);
            let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
            assert_eq!(keys, vec!["a", "b"]);
        }
    }

    mod json_lines_tests {
        use super::*;

        #[tokio::test]
        async fn starts_at_end_by_default() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"old\"}\n");

            let source = JsonLinesSource::new(&path);
            assert!(source.pull().await.unwrap().is_empty());

            append(&path, "{\"key\":\"new\"}\n");
            let records = source.pull().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].key, "new");
        }

        #[tokio::test]
        async fn read_existing_reads_backlog() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n{\"key\":\"b\"}\n");

            let source = JsonLinesSource::new(&path).read_existing(true);
            assert_eq!(source.pull().await.unwrap().len(), 2);
            assert!(source.pull().await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn partial_line_waits_for_newline() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n{\"key\":");

            let source = JsonLinesSource::new(&path).read_existing(true);
            assert_eq!(source.pull().await.unwrap().len(), 1);

            append(&path, "\"b\"}\n");
            let records = source.pull().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].key, "b");
        }

        #[tokio::test]
        async fn truncation_resets_cursor() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n{\"key\":\"b\"}\n");

            let source = JsonLinesSource::new(&path).read_existing(true);
            assert_eq!(source.pull().await.unwrap().len(), 2);

            std::fs::write(&path, "{\"key\":\"c\"}\n").unwrap();
            let records = source.pull().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].key, "c");
        }

        #[tokio::test]
        async fn missing_file_yields_nothing() {
            let dir = tempfile::tempdir().unwrap();
            let source = JsonLinesSource::new(dir.path().join("absent.jsonl"));
            assert!(source.pull().await.unwrap().is_empty());
            assert_eq!(source.offset(), 0);
        }

        #[tokio::test]
        async fn resumed_cursor_picks_up_appends_only() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n{\"key\":\"b\"}\n");

            let first = JsonLinesSource::new(&path).read_existing(true);
            assert!(first.checkpoint().is_none());
            assert_eq!(first.pull().await.unwrap().len(), 2);
            let saved = first.checkpoint().unwrap();
            assert_eq!(saved.offset, first.offset());

            append(&path, "{\"key\":\"c\"}\n");
            let second = JsonLinesSource::new(&path).read_existing(true);
            second.resume(saved);
            let records = second.pull().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].key, "c");
        }

        #[cfg(unix)]
        #[tokio::test]
        async fn replaced_file_is_read_from_start() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n");

            let source = JsonLinesSource::new(&path).read_existing(true);
            assert_eq!(source.pull().await.unwrap().len(), 1);
            let saved = source.checkpoint().unwrap();
            assert!(saved.file_id.is_some());

            // Rotated: the new file is longer than the old offset.
            std::fs::rename(&path, dir.path().join("events.jsonl.1")).unwrap();
            append(&path, "{\"key\":\"x\"}\n{\"key\":\"y\"}\n");

            let resumed = JsonLinesSource::new(&path);
            resumed.resume(saved);
            let keys: Vec<_> = resumed
                .pull()
                .await
                .unwrap()
                .into_iter()
                .map(|r| r.key)
                .collect();
            assert_eq!(keys, vec!["x", "y"]);
        }

        #[tokio::test]
        async fn replay_backlog_overrides_tail_start() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("events.jsonl");
            append(&path, "{\"key\":\"a\"}\n");
            let config = SourceConfig::JsonLines {
                path: path.clone(),
                read_existing: false,
            };

            assert!(config.build("m").unwrap().pull().await.unwrap().is_empty());
            assert_eq!(config.build_with("m", true).unwrap().pull().await.unwrap().len(), 1);
        }
    }

    #[cfg(unix)]
    mod command_tests {
        use super::*;

        #[tokio::test]
        async fn parses_stdout() {
            let source = CommandSource::new(
                "sh".to_string(),
                vec!["-c".to_string(), r#"echo '{"key":"nginx","value":1}'"#.to_string()],
            );
            let records = source.pull().await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].value, Some(1.0));
        }

        #[tokio::test]
        async fn non_zero_exit_is_error() {
            let source = CommandSource::new(
                "sh".to_string(),
                vec!["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            );
            match source.pull().await {
                Err(SourceError::Command { reason }) => assert!(reason.contains("boom")),
                other => panic!("expected Command error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn missing_program_is_io_error() {
            let source = CommandSource::new("/nonexistent/warden-missing".to_string(), Vec::new());
            assert!(matches!(source.pull().await, Err(SourceError::Io { .. })));
        }
    }

    mod static_tests {
        use super::*;

        #[tokio::test]
        async fn replays_queue_in_order() {
            let source = StaticSource::new("test");
            source.push(vec![RawRecord::new("a")]);
            source.push_failure("boom");

            assert_eq!(source.pull().await.unwrap().len(), 1);
            assert!(source.pull().await.is_err());
            assert!(source.pull().await.unwrap().is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn stall_can_be_timed_out() {
            let source = StaticSource::new("slow");
            source.push_stall(Duration::from_secs(60));

            let result = tokio::time::timeout(Duration::from_secs(5), source.pull()).await;
            assert!(result.is_err());
        }
    }

    mod config_tests {
        use super::*;

        #[test]
        fn source_config_from_toml() {
            #[derive(Deserialize)]
            struct Wrapper {
                source: SourceConfig,
            }

            let parsed: Wrapper = toml::from_str(
                r#"
                [source]
                type = "json_lines"
                path = "/var/log/warden/ssh.jsonl"
                "#,
            )
            .unwrap();
            assert_eq!(
                parsed.source,
                SourceConfig::JsonLines {
                    path: PathBuf::from("/var/log/warden/ssh.jsonl"),
                    read_existing: false,
                }
            );
        }

        #[test]
        fn http_source_rejects_bad_url() {
            let config = SourceConfig::Http {
                url: "ftp://example.com".to_string(),
                headers: HashMap::new(),
            };
            assert!(config.build("cost").is_err());
        }

        #[test]
        fn empty_program_rejected() {
            let config = SourceConfig::Command {
                program: " ".to_string(),
                args: Vec::new(),
            };
            assert!(config.build("health").is_err());
        }
    }
}
