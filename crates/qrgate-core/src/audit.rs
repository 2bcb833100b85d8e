// crates/qrgate-core/src/audit.rs
// ============================================================================
// Module: QR Gate Audit Logging
// Description: Structured audit events and sinks for gate activity.
// Purpose: Emit redacted JSON-line logs without hard logging dependencies.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every decision, webhook call, backend failure, and ledger fault produces a
//! structured event. Events carry key fingerprints only; raw keys and secrets
//! never reach a sink. Deployments route events to stderr, a JSON-lines file,
//! or their own pipeline by implementing [`AuditSink`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use std::thread;
use std::thread::JoinHandle;

use serde::Serialize;
use serde_json::Value;

use crate::core::Tier;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lines queued for the file writer before new events are dropped.
pub const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 8_192;

// ============================================================================
// SECTION: Types
// ============================================================================

/// How a decision resolved its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    /// Fresh session found in the cache.
    Cache,
    /// Backend validation (fresh or coalesced).
    Backend,
    /// Last-known-good session reused under fail-open grace.
    Grace,
    /// Internal admin key verified locally.
    AdminKey,
    /// No session was resolved.
    None,
}

/// Access decision audit event.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// API key fingerprint.
    pub key_fingerprint: String,
    /// Resolved user when available.
    pub user_id: Option<String>,
    /// Resolved tier when available.
    pub tier: Option<Tier>,
    /// Requested style.
    pub style: String,
    /// Verdict.
    pub allow: bool,
    /// Stable reason code.
    pub reason: &'static str,
    /// Stable sub-reason code.
    pub detail: Option<&'static str>,
    /// Retry delay for rate-limited denials.
    pub retry_after_ms: Option<u64>,
    /// Session resolution path.
    pub session_source: SessionSource,
}

/// Webhook audit event.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Webhook action label.
    pub action: &'static str,
    /// Outcome label (`applied`, `not_cached`, `rejected`).
    pub outcome: &'static str,
    /// Target key fingerprint (omitted for rejected calls).
    pub key_fingerprint: Option<String>,
}

/// Backend validation audit event.
#[derive(Debug, Clone, Serialize)]
pub struct BackendAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// API key fingerprint.
    pub key_fingerprint: String,
    /// Outcome label (`retrying`, `unavailable`).
    pub outcome: &'static str,
    /// Error text from the backend client.
    pub detail: String,
}

/// Usage ledger audit event.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Fault kind (`dropped`, `append_failed`, `cleanup_failed`).
    pub kind: &'static str,
    /// Error text.
    pub detail: String,
}

/// Security posture audit event.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Security event kind.
    pub kind: &'static str,
    /// Message.
    pub message: String,
}

impl WebhookAuditEvent {
    /// Builds a webhook event.
    #[must_use]
    pub fn new(
        at: Timestamp,
        action: &'static str,
        outcome: &'static str,
        key_fingerprint: Option<String>,
    ) -> Self {
        Self {
            event: "webhook_auth",
            timestamp_ms: at.as_unix_millis(),
            action,
            outcome,
            key_fingerprint,
        }
    }
}

impl BackendAuditEvent {
    /// Builds a backend validation event.
    #[must_use]
    pub fn new(
        at: Timestamp,
        key_fingerprint: String,
        outcome: &'static str,
        detail: String,
    ) -> Self {
        Self {
            event: "backend_validation",
            timestamp_ms: at.as_unix_millis(),
            key_fingerprint,
            outcome,
            detail,
        }
    }
}

impl LedgerAuditEvent {
    /// Builds a ledger fault event.
    #[must_use]
    pub fn new(at: Timestamp, kind: &'static str, detail: String) -> Self {
        Self {
            event: "usage_ledger",
            timestamp_ms: at.as_unix_millis(),
            kind,
            detail,
        }
    }
}

impl SecurityAuditEvent {
    /// Builds a security event.
    #[must_use]
    pub fn new(at: Timestamp, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            event: "security",
            timestamp_ms: at.as_unix_millis(),
            kind,
            message: message.into(),
        }
    }
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Audit sink for gate events.
pub trait AuditSink: Send + Sync {
    /// Records an access decision.
    fn record_decision(&self, event: &DecisionAuditEvent);

    /// Records a webhook call.
    fn record_webhook(&self, _event: &WebhookAuditEvent) {}

    /// Records a backend validation fault.
    fn record_backend(&self, _event: &BackendAuditEvent) {}

    /// Records a usage ledger fault.
    fn record_ledger(&self, _event: &LedgerAuditEvent) {}

    /// Records a security posture event.
    fn record_security(&self, _event: &SecurityAuditEvent) {}

    /// Blocks until every event recorded so far has been written out.
    fn flush(&self) {}
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl StderrAuditSink {
    /// Writes one event line.
    fn emit<T: Serialize>(event: &T) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

impl AuditSink for StderrAuditSink {
    fn record_decision(&self, event: &DecisionAuditEvent) {
        Self::emit(event);
    }

    fn record_webhook(&self, event: &WebhookAuditEvent) {
        Self::emit(event);
    }

    fn record_backend(&self, event: &BackendAuditEvent) {
        Self::emit(event);
    }

    fn record_ledger(&self, event: &LedgerAuditEvent) {
        Self::emit(event);
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        Self::emit(event);
    }
}

/// Command for the audit file writer thread.
enum AuditWrite {
    /// One serialized event.
    Line(String),
    /// Flush barrier; acknowledged once everything before it is written.
    Flush(mpsc::Sender<()>),
}

/// Audit sink that appends JSON lines to a file.
///
/// Events are queued to a dedicated writer thread, so recording never waits
/// on disk I/O. A full queue drops the event and counts it.
pub struct FileAuditSink {
    /// Bounded queue into the writer; `None` once dropped.
    sender: Option<SyncSender<AuditWrite>>,
    /// Writer thread handle, joined on drop.
    writer: Option<JoinHandle<()>>,
    /// Events dropped because the queue was full.
    dropped: AtomicU64,
}

impl FileAuditSink {
    /// Opens (or creates) an append-only audit log.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened or the writer
    /// thread cannot be spawned.
    pub fn new(path: &Path) -> io::Result<Self> {
        Self::with_capacity(path, DEFAULT_AUDIT_QUEUE_CAPACITY)
    }

    /// Opens the log with a writer queue of `capacity` lines (at least one).
    ///
    /// # Errors
    ///
    /// See [`FileAuditSink::new`].
    pub fn with_capacity(path: &Path, capacity: usize) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = mpsc::sync_channel(capacity.max(1));
        let writer = thread::Builder::new()
            .name("qrgate-audit-writer".to_string())
            .spawn(move || audit_writer_loop(BufWriter::new(file), &receiver))?;
        Ok(Self {
            sender: Some(sender),
            writer: Some(writer),
            dropped: AtomicU64::new(0),
        })
    }

    /// Returns the number of events dropped on a full queue.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Acquire)
    }

    /// Queues one event line.
    fn emit<T: Serialize>(&self, event: &T) {
        let (Some(sender), Ok(payload)) = (&self.sender, serde_json::to_string(event)) else {
            return;
        };
        if let Err(TrySendError::Full(_)) = sender.try_send(AuditWrite::Line(payload)) {
            self.dropped.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for FileAuditSink {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Drains queued lines, flushing the buffer whenever the queue runs empty.
fn audit_writer_loop(mut out: BufWriter<File>, receiver: &Receiver<AuditWrite>) {
    while let Ok(first) = receiver.recv() {
        let mut next = Some(first);
        while let Some(command) = next {
            match command {
                AuditWrite::Line(line) => {
                    let _ = writeln!(out, "{line}");
                }
                AuditWrite::Flush(done) => {
                    let _ = out.flush();
                    let _ = done.send(());
                }
            }
            next = receiver.try_recv().ok();
        }
        let _ = out.flush();
    }
    let _ = out.flush();
}

impl AuditSink for FileAuditSink {
    fn record_decision(&self, event: &DecisionAuditEvent) {
        self.emit(event);
    }

    fn record_webhook(&self, event: &WebhookAuditEvent) {
        self.emit(event);
    }

    fn record_backend(&self, event: &BackendAuditEvent) {
        self.emit(event);
    }

    fn record_ledger(&self, event: &LedgerAuditEvent) {
        self.emit(event);
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        self.emit(event);
    }

    fn flush(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done, acked) = mpsc::channel();
        if sender.send(AuditWrite::Flush(done)).is_ok() {
            let _ = acked.recv();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record_decision(&self, _event: &DecisionAuditEvent) {}
}

/// Audit sink that keeps events in memory as JSON values.
#[derive(Default)]
pub struct MemoryAuditSink {
    /// Captured events in arrival order.
    events: Mutex<Vec<Value>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every captured event.
    #[must_use]
    pub fn events(&self) -> Vec<Value> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Returns captured events whose `event` field equals `kind`.
    #[must_use]
    pub fn events_of(&self, kind: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|event| event.get("event").and_then(Value::as_str) == Some(kind))
            .collect()
    }

    /// Stores one event.
    fn push<T: Serialize>(&self, event: &T) {
        if let Ok(value) = serde_json::to_value(event)
            && let Ok(mut events) = self.events.lock()
        {
            events.push(value);
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_decision(&self, event: &DecisionAuditEvent) {
        self.push(event);
    }

    fn record_webhook(&self, event: &WebhookAuditEvent) {
        self.push(event);
    }

    fn record_backend(&self, event: &BackendAuditEvent) {
        self.push(event);
    }

    fn record_ledger(&self, event: &LedgerAuditEvent) {
        self.push(event);
    }

    fn record_security(&self, event: &SecurityAuditEvent) {
        self.push(event);
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
