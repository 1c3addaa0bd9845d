use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::ser::Formatter;

use crate::backend::MemoryBackend;
use crate::error::MemoryError;
use crate::graph::{Entity, KnowledgeGraph, ObservationInput};
use crate::settings::McpSettings;

/// How long an availability probe result is trusted.
pub const AVAILABILITY_TTL: Duration = Duration::from_secs(60);

/// Default result cap for `search_nodes`.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

type Sleeper = Box<dyn Fn(Duration) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct AvailabilityCheck {
    available: bool,
    checked_at: Instant,
}

/// Client for the knowledge-graph memory store.
///
/// Every transport call runs with a timeout and is retried with exponential
/// backoff. Failures never escape: read operations return `None` and write
/// operations return `false` once retries are exhausted.
pub struct MemoryClient {
    backend: Arc<dyn MemoryBackend>,
    settings: McpSettings,
    availability: Mutex<Option<AvailabilityCheck>>,
    sleep: Sleeper,
}

impl std::fmt::Debug for MemoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryClient")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl MemoryClient {
    pub fn new(backend: Arc<dyn MemoryBackend>, settings: McpSettings) -> Self {
        Self {
            backend,
            settings,
            availability: Mutex::new(None),
            sleep: Box::new(thread::sleep),
        }
    }

    /// Replace the blocking sleep used between retries.
    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn settings(&self) -> &McpSettings {
        &self.settings
    }

    /// Probe the store with `read_graph`, caching the answer for [`AVAILABILITY_TTL`].
    pub fn is_available(&self) -> bool {
        let mut cache = self
            .availability
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(check) = *cache {
            if check.checked_at.elapsed() < AVAILABILITY_TTL {
                return check.available;
            }
        }

        let available = self
            .retry_operation("read_graph", self.settings.connection_timeout(), |b| {
                b.read_graph()
            })
            .is_ok();
        tracing::debug!(available, "Memory store availability probed");

        *cache = Some(AvailabilityCheck {
            available,
            checked_at: Instant::now(),
        });
        available
    }

    /// Search the graph; at most `limit` entities are returned.
    pub fn search_nodes(&self, query: &str, limit: usize) -> Option<KnowledgeGraph> {
        let query = query.to_string();
        let graph = self
            .retry_operation("search_nodes", self.settings.query_timeout(), move |b| {
                b.search_nodes(&query)
            })
            .ok()?;

        if graph.entities.len() <= limit {
            return Some(graph);
        }
        let relations = graph.relations;
        let mut entities = graph.entities;
        entities.truncate(limit);
        Some(
            KnowledgeGraph {
                entities,
                relations: Vec::new(),
            }
            .with_relations_from(&relations),
        )
    }

    pub fn open_nodes(&self, names: &[String]) -> Option<KnowledgeGraph> {
        let names = names.to_vec();
        self.retry_operation("open_nodes", self.settings.query_timeout(), move |b| {
            b.open_nodes(&names)
        })
        .ok()
    }

    /// Read the entire graph. Expensive on large graphs; prefer `search_nodes`.
    pub fn read_graph(&self) -> Option<KnowledgeGraph> {
        self.retry_operation("read_graph", self.settings.query_timeout(), |b| {
            b.read_graph()
        })
        .ok()
    }

    pub fn create_entities(&self, entities: &[Entity]) -> bool {
        let entities = entities.to_vec();
        self.retry_operation("create_entities", self.settings.query_timeout(), move |b| {
            b.create_entities(&entities)
        })
        .is_ok()
    }

    pub fn add_observations(&self, observations: &[ObservationInput]) -> bool {
        let observations = observations.to_vec();
        self.retry_operation("add_observations", self.settings.query_timeout(), move |b| {
            b.add_observations(&observations)
        })
        .is_ok()
    }

    /// Token cost of a query result. See [`estimate_tokens`].
    pub fn estimate_tokens<T: Serialize>(&self, result: Option<&T>) -> u64 {
        estimate_tokens(result)
    }

    /// Run `op` up to `retry_attempts + 1` times, sleeping
    /// `retry_backoff * 2^attempt` between attempts (never after the last one).
    pub fn retry_operation<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        op: F,
    ) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: Fn(&dyn MemoryBackend) -> Result<T, MemoryError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let mut attempt: u32 = 0;
        loop {
            let op = Arc::clone(&op);
            match self.call_with_timeout(operation, timeout, move |b| op(b)) {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.settings.retry_attempts => {
                    let delay = self.settings.backoff_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Memory operation failed, backing off"
                    );
                    (self.sleep)(delay);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        operation,
                        attempts = attempt + 1,
                        error = %e,
                        "Memory operation failed after all attempts"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Run one transport call on a worker thread and wait at most `timeout`.
    /// A call that overruns is abandoned, not cancelled.
    fn call_with_timeout<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        op: F,
    ) -> Result<T, MemoryError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MemoryBackend) -> Result<T, MemoryError> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("memory-{operation}"))
            .spawn(move || {
                let _ = tx.send(op(backend.as_ref()));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(MemoryError::Timeout {
                operation: operation.to_string(),
                seconds: timeout.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(MemoryError::Transport(format!(
                "{operation} worker exited without a result"
            ))),
        }
    }
}

/// `len(json) / 4`, `0` for `None`.
///
/// The JSON is laid out as the memory server's own tooling dumps it: `", "`
/// and `": "` separators, non-ASCII escaped as `\uXXXX`. This is the only
/// token-accounting primitive; budget bookkeeping everywhere else is built
/// on it.
pub fn estimate_tokens<T: Serialize>(result: Option<&T>) -> u64 {
    let Some(result) = result else {
        return 0;
    };
    dumps(result).map(|json| (json.len() / 4) as u64).unwrap_or(0)
}

fn dumps<T: Serialize>(value: &T) -> Result<String, MemoryError> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedAsciiFormatter);
    value.serialize(&mut ser)?;
    // Every non-ASCII char was escaped, so the buffer is ASCII.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// `serde_json` formatter for the spaced, ASCII-only layout.
struct SpacedAsciiFormatter;

impl Formatter for SpacedAsciiFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
        }
        Ok(())
    }
}
