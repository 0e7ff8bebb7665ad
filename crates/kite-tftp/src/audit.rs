//! Structured audit events for the server.
//!
//! Every security-relevant event is emitted as one JSON object on the
//! `audit` tracing target, so log pipelines can route them separately from
//! the diagnostic output. Emission is gated by the server's `--audit` flag;
//! callers check the flag, the logger only formats and emits.

use std::net::SocketAddr;

use serde::Serialize;
use tracing::{Level, event};
use uuid::Uuid;

use crate::packet::TransferMode;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    ServerStarted {
        #[serde(flatten)]
        common: CommonFields,
        bind_addr: String,
        root_dir: String,
    },

    ReadRequest {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        mode: String,
    },

    /// A request answered with an ERROR datagram instead of a session.
    RequestDenied {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: Option<String>,
        reason: String,
    },

    TransferStarted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        file_size: u64,
        mode: String,
    },

    TransferCompleted {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        bytes_transferred: u64,
        blocks_sent: u64,
        duration_ms: u64,
    },

    TransferFailed {
        #[serde(flatten)]
        common: CommonFields,
        client_addr: String,
        filename: String,
        reason: String,
    },
}

/// Fields present in every audit record.
#[derive(Debug, Clone, Serialize)]
pub struct CommonFields {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    /// Hostname of the emitting system.
    pub hostname: String,
    /// Service name, fixed for this crate.
    pub service: String,
    /// Unique id of this record.
    pub event_id: String,
    /// Severity level (info, warn, error).
    pub severity: String,
}

impl CommonFields {
    fn new(severity: &str) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: "kite-tftp".to_string(),
            event_id: Uuid::new_v4().to_string(),
            severity: severity.to_string(),
        }
    }
}

impl AuditEvent {
    /// Emits this event on the `audit` target.
    pub fn log(&self) {
        let severity = self.common().severity.clone();
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"error\": \"failed to serialize audit event: {:?}\"}}", self)
        });
        match severity.as_str() {
            "error" => event!(target: "audit", Level::ERROR, audit_event = %json),
            "warn" => event!(target: "audit", Level::WARN, audit_event = %json),
            _ => event!(target: "audit", Level::INFO, audit_event = %json),
        }
    }

    fn common(&self) -> &CommonFields {
        match self {
            AuditEvent::ServerStarted { common, .. }
            | AuditEvent::ReadRequest { common, .. }
            | AuditEvent::RequestDenied { common, .. }
            | AuditEvent::TransferStarted { common, .. }
            | AuditEvent::TransferCompleted { common, .. }
            | AuditEvent::TransferFailed { common, .. } => common,
        }
    }
}

/// Convenience constructors for the server paths.
pub struct AuditLogger;

impl AuditLogger {
    pub fn server_started(bind_addr: &str, root_dir: &str) {
        AuditEvent::ServerStarted {
            common: CommonFields::new("info"),
            bind_addr: bind_addr.to_string(),
            root_dir: root_dir.to_string(),
        }
        .log();
    }

    pub fn read_request(client_addr: SocketAddr, filename: &str, mode: TransferMode) {
        AuditEvent::ReadRequest {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            mode: mode.as_str().to_string(),
        }
        .log();
    }

    pub fn request_denied(client_addr: SocketAddr, filename: Option<&str>, reason: &str) {
        AuditEvent::RequestDenied {
            common: CommonFields::new("warn"),
            client_addr: client_addr.to_string(),
            filename: filename.map(str::to_string),
            reason: reason.to_string(),
        }
        .log();
    }

    pub fn transfer_started(
        client_addr: SocketAddr,
        filename: &str,
        file_size: u64,
        mode: TransferMode,
    ) {
        AuditEvent::TransferStarted {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            file_size,
            mode: mode.as_str().to_string(),
        }
        .log();
    }

    pub fn transfer_completed(
        client_addr: SocketAddr,
        filename: &str,
        bytes_transferred: u64,
        blocks_sent: u64,
        duration_ms: u64,
    ) {
        AuditEvent::TransferCompleted {
            common: CommonFields::new("info"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            bytes_transferred,
            blocks_sent,
            duration_ms,
        }
        .log();
    }

    pub fn transfer_failed(client_addr: SocketAddr, filename: &str, reason: &str) {
        AuditEvent::TransferFailed {
            common: CommonFields::new("error"),
            client_addr: client_addr.to_string(),
            filename: filename.to_string(),
            reason: reason.to_string(),
        }
        .log();
    }
}
