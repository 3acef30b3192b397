//! Notification event types for podwarden.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity levels for incident notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational - the workload recovered or needs no action
    Info,
    /// Warning - something needs attention
    Warning,
    /// Critical - a human has to step in
    Critical,
}

impl Severity {
    /// Get display name for this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Critical => "Critical",
        }
    }
}

/// Events that can trigger notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifyEvent {
    /// Final report of a multi-stage incident investigation
    IncidentReport {
        namespace: String,
        pod: String,
        /// Rendered report body
        content: String,
        severity: Severity,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },

    /// One-shot log analysis flagged for reporting
    AnalysisReport {
        namespace: String,
        pod: String,
        reason: String,
        solution: String,
        #[serde(default = "Utc::now")]
        timestamp: DateTime<Utc>,
    },
}

impl NotifyEvent {
    /// Get a short title for this event type.
    #[must_use]
    pub fn title(&self) -> String {
        match self {
            Self::IncidentReport { namespace, pod, .. } => {
                format!("Incident Report: {namespace}/{pod}")
            }
            Self::AnalysisReport { namespace, pod, .. } => {
                format!("Log Analysis: {namespace}/{pod}")
            }
        }
    }

    /// Namespace of the workload the event is about.
    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::IncidentReport { namespace, .. } | Self::AnalysisReport { namespace, .. } => {
                namespace
            }
        }
    }

    /// Pod the event is about.
    #[must_use]
    pub fn pod(&self) -> &str {
        match self {
            Self::IncidentReport { pod, .. } | Self::AnalysisReport { pod, .. } => pod,
        }
    }

    /// Message body, without the workload header.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::IncidentReport { content, .. } => content.clone(),
            Self::AnalysisReport {
                reason, solution, ..
            } => format!("Reason: {reason}\nSolution: {solution}"),
        }
    }

    /// Get the severity for this event.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::IncidentReport { severity, .. } => *severity,
            Self::AnalysisReport { .. } => Severity::Warning,
        }
    }

    /// Get the timestamp for this event.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::IncidentReport { timestamp, .. } | Self::AnalysisReport { timestamp, .. } => {
                *timestamp
            }
        }
    }
}
