//! Security audit trail.
//!
//! One JSON object per line, appended to a dedicated file (or any writer).
//! The file is separate from operational `tracing` output so it can be
//! shipped, retained and access-controlled on its own.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth_success` | A request was authenticated by certificate or token |
//! | `auth_failure` | A request was rejected (see `reason`) |
//! | `token_created` | A bearer token was minted |
//! | `token_revoked` | A bearer token record was deleted |
//! | `server_start` | The listener is about to bind |
//! | `server_stop` | The process is shutting down |
//!
//! Free-text fields (`reason`, `details`) go through [`sanitize`] before they
//! are written.

mod sanitize;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use sanitize::{MAX_FIELD_CHARS, REDACTION_MARKER, TRUNCATION_MARKER, sanitize};

use crate::identity::{AuthMethod, CallerIdentity};

/// Audit event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Request authenticated.
    AuthSuccess,
    /// Request rejected.
    AuthFailure,
    /// Bearer token minted.
    TokenCreated,
    /// Bearer token deleted.
    TokenRevoked,
    /// Process started.
    ServerStart,
    /// Process stopping.
    ServerStop,
}

impl EventType {
    /// Wire name (`auth_success`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::TokenCreated => "token_created",
            Self::TokenRevoked => "token_revoked",
            Self::ServerStart => "server_start",
            Self::ServerStop => "server_stop",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single audit record.
///
/// `timestamp` is left empty by the constructors and stamped by
/// [`SecurityLogger::log`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// RFC 3339 UTC, second precision.
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// Event type.
    pub event: EventType,
    /// Common Name of the caller.
    #[serde(rename = "user", default, skip_serializing_if = "Option::is_none")]
    pub user_cn: Option<String>,
    /// How the caller authenticated.
    #[serde(rename = "method", default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    /// Token record id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,
    /// Client address.
    #[serde(rename = "ip", default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    /// Short machine-readable reason tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Sanitized free text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SecurityEvent {
    fn new(event: EventType) -> Self {
        Self {
            timestamp: String::new(),
            event,
            user_cn: None,
            auth_method: None,
            token_id: None,
            source_ip: None,
            reason: None,
            details: None,
        }
    }

    /// `auth_success` for a resolved identity.
    #[must_use]
    pub fn auth_success(identity: &CallerIdentity, source_ip: &str) -> Self {
        Self {
            user_cn: non_empty(identity.common_name()),
            auth_method: Some(identity.auth_method()),
            token_id: non_empty(identity.token_id()),
            source_ip: non_empty(source_ip),
            ..Self::new(EventType::AuthSuccess)
        }
    }

    /// `auth_failure` with a reason tag and free-text details.
    #[must_use]
    pub fn auth_failure(reason: &str, details: &str, source_ip: &str) -> Self {
        Self {
            reason: non_empty(&sanitize(reason)),
            details: non_empty(&sanitize(details)),
            source_ip: non_empty(source_ip),
            ..Self::new(EventType::AuthFailure)
        }
    }

    /// `token_created`; the token name is caller-supplied and gets sanitized.
    #[must_use]
    pub fn token_created(
        user_cn: &str,
        token_id: &str,
        token_name: &str,
        expires_at: DateTime<Utc>,
        source_ip: &str,
    ) -> Self {
        Self {
            user_cn: non_empty(user_cn),
            token_id: non_empty(token_id),
            details: Some(format!(
                "name={}, expires={}",
                sanitize(token_name),
                format_timestamp(expires_at)
            )),
            source_ip: non_empty(source_ip),
            ..Self::new(EventType::TokenCreated)
        }
    }

    /// `token_revoked`.
    #[must_use]
    pub fn token_revoked(user_cn: &str, token_id: &str, source_ip: &str) -> Self {
        Self {
            user_cn: non_empty(user_cn),
            token_id: non_empty(token_id),
            source_ip: non_empty(source_ip),
            ..Self::new(EventType::TokenRevoked)
        }
    }

    /// `server_start` with the listener mode and, for mTLS, the CA path.
    #[must_use]
    pub fn server_start(mode: &str, ca_file: Option<&str>) -> Self {
        let mut details = format!("mode={mode}");
        if let Some(ca) = ca_file.filter(|ca| !ca.is_empty()) {
            details.push_str(", ca=");
            details.push_str(ca);
        }
        Self {
            details: Some(sanitize(&details)),
            ..Self::new(EventType::ServerStart)
        }
    }

    /// `server_stop`.
    #[must_use]
    pub fn server_stop(reason: &str) -> Self {
        Self {
            reason: non_empty(&sanitize(reason)),
            ..Self::new(EventType::ServerStop)
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

enum Sink {
    File { path: PathBuf, file: File },
    Writer(Box<dyn Write + Send>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::File { file, .. } => file,
            Self::Writer(w) => w.as_mut(),
        }
    }
}

/// Append-only JSON Lines writer for [`SecurityEvent`]s.
///
/// Safe to share across request tasks; every record is serialized and
/// written under one lock so lines never interleave.
pub struct SecurityLogger {
    sink: Mutex<Sink>,
}

impl fmt::Debug for SecurityLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match &*self.sink.lock() {
            Sink::File { path, .. } => path.display().to_string(),
            Sink::Writer(_) => "<writer>".to_string(),
        };
        f.debug_struct("SecurityLogger").field("sink", &target).finish()
    }
}

impl SecurityLogger {
    /// Open (or create) an audit file in append mode, owner-only on Unix.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            sink: Mutex::new(Sink::File { path, file }),
        })
    }

    /// Wrap an arbitrary writer. [`reopen`](Self::reopen) is a no-op.
    pub fn from_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            sink: Mutex::new(Sink::Writer(Box::new(writer))),
        }
    }

    /// Stamp and append one event.
    ///
    /// Write failures are reported through `tracing` and otherwise ignored:
    /// a broken audit sink must not turn into failed requests.
    pub fn log(&self, mut event: SecurityEvent) {
        event.timestamp = format_timestamp(Utc::now());
        debug!(event = %event.event, "security event");

        let mut sink = self.sink.lock();
        if let Err(e) = write_record(sink.writer(), &event) {
            warn!(event = %event.event, error = %e, "Failed to write security event");
        }
    }

    /// Close and reopen the audit file at the same path (log rotation).
    pub fn reopen(&self) -> io::Result<()> {
        let mut sink = self.sink.lock();
        if let Sink::File { path, file } = &mut *sink {
            file.flush()?;
            *file = open_append(path)?;
        }
        Ok(())
    }

    /// Log a successful authentication.
    pub fn log_auth_success(&self, identity: &CallerIdentity, source_ip: &str) {
        self.log(SecurityEvent::auth_success(identity, source_ip));
    }

    /// Log a rejected request.
    pub fn log_auth_failure(&self, reason: &str, details: &str, source_ip: &str) {
        self.log(SecurityEvent::auth_failure(reason, details, source_ip));
    }

    /// Log a minted token.
    pub fn log_token_created(
        &self,
        user_cn: &str,
        token_id: &str,
        token_name: &str,
        expires_at: DateTime<Utc>,
        source_ip: &str,
    ) {
        self.log(SecurityEvent::token_created(
            user_cn, token_id, token_name, expires_at, source_ip,
        ));
    }

    /// Log a deleted token.
    pub fn log_token_revoked(&self, user_cn: &str, token_id: &str, source_ip: &str) {
        self.log(SecurityEvent::token_revoked(user_cn, token_id, source_ip));
    }

    /// Log process start.
    pub fn log_server_start(&self, mode: &str, ca_file: Option<&str>) {
        self.log(SecurityEvent::server_start(mode, ca_file));
    }

    /// Log process stop.
    pub fn log_server_stop(&self, reason: &str) {
        self.log(SecurityEvent::server_stop(reason));
    }
}

fn write_record(writer: &mut dyn Write, event: &SecurityEvent) -> io::Result<()> {
    let mut line = serde_json::to_vec(event).map_err(io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()
}

fn open_append(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
