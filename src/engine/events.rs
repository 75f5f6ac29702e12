//! Decision events, emitted through `tracing`.

use tracing::{debug, info, warn};

use crate::policy::WriteOperation;

/// Something the decision engine decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionEvent {
    /// Candidate rows were filtered for a read
    RowsFiltered {
        table: String,
        subject: String,
        candidates: usize,
        visible: usize,
    },

    /// A write was permitted
    WriteGranted {
        table: String,
        subject: String,
        operation: WriteOperation,
        policy: String,
    },

    /// A write was refused
    WriteDenied {
        table: String,
        subject: String,
        operation: WriteOperation,
    },

    /// A service-role identity skipped policy evaluation
    Bypassed { table: String, subject: String },

    /// The caller cancelled; everything was denied
    Cancelled { table: String, subject: String },

    /// A collaborator failed or timed out; rows depending on it are denied
    SourceUnavailable {
        table: String,
        source: String,
        reason: String,
    },
}

impl DecisionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionEvent::RowsFiltered { .. } => "rows_filtered",
            DecisionEvent::WriteGranted { .. } => "write_granted",
            DecisionEvent::WriteDenied { .. } => "write_denied",
            DecisionEvent::Bypassed { .. } => "bypassed",
            DecisionEvent::Cancelled { .. } => "cancelled",
            DecisionEvent::SourceUnavailable { .. } => "source_unavailable",
        }
    }

    pub fn emit(&self) {
        let event = self.as_str();
        match self {
            DecisionEvent::RowsFiltered {
                table,
                subject,
                candidates,
                visible,
            } => debug!(event, %table, %subject, candidates, visible, "read filtered"),
            DecisionEvent::WriteGranted {
                table,
                subject,
                operation,
                policy,
            } => debug!(event, %table, %subject, %operation, %policy, "write permitted"),
            DecisionEvent::WriteDenied {
                table,
                subject,
                operation,
            } => info!(event, %table, %subject, %operation, "write denied"),
            DecisionEvent::Bypassed { table, subject } => {
                info!(event, %table, %subject, "service role bypassed row policies")
            }
            DecisionEvent::Cancelled { table, subject } => {
                info!(event, %table, %subject, "decision cancelled; denying")
            }
            DecisionEvent::SourceUnavailable {
                table,
                source,
                reason,
            } => warn!(event, %table, %source, %reason, "source unavailable; dependent rows denied"),
        }
    }
}
