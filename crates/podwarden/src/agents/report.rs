use notify::Severity;
use serde::{Deserialize, Serialize};

use super::state::IncidentState;
use crate::tools::PatchResult;

/// Final artifact of an investigation, handed to the notification sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkMessage {
    pub original_input: String,
    pub auto_fix_result: String,
    pub search_result: String,
    pub human_help_result: String,
    #[serde(default)]
    pub patch_outcomes: Vec<PatchResult>,
    pub host_visits: u32,
    /// The step budget ran out before triage chose to finish
    pub forced_finish: bool,
}

impl SinkMessage {
    #[must_use]
    pub fn from_state(state: &IncidentState) -> Self {
        Self {
            original_input: state.original_input().to_string(),
            auto_fix_result: state.auto_fix_result().unwrap_or_default().to_string(),
            search_result: state.search_result().unwrap_or_default().to_string(),
            human_help_result: state.human_help_result().unwrap_or_default().to_string(),
            patch_outcomes: state.patch_outcomes().to_vec(),
            host_visits: state.host_visits(),
            forced_finish: state.forced_finish(),
        }
    }

    /// At least one patch was applied.
    #[must_use]
    pub fn remediated(&self) -> bool {
        self.patch_outcomes.iter().any(|p| p.success)
    }

    /// Escalations and unfinished runs are critical, applied fixes are informational.
    #[must_use]
    pub fn severity(&self) -> Severity {
        if !self.human_help_result.is_empty() || self.forced_finish {
            Severity::Critical
        } else if self.remediated() {
            Severity::Info
        } else {
            Severity::Warning
        }
    }

    /// Plain-text report body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut sections = vec![format!("Original input:\n{}", self.original_input)];
        if !self.auto_fix_result.is_empty() {
            sections.push(format!("Auto-fix result:\n{}", self.auto_fix_result));
        }
        if !self.search_result.is_empty() {
            sections.push(format!("Search result:\n{}", self.search_result));
        }
        if !self.human_help_result.is_empty() {
            sections.push(format!("Incident document:\n{}", self.human_help_result));
        }
        if self.forced_finish {
            sections.push(format!(
                "Investigation stopped after {} triage steps without a final decision.",
                self.host_visits
            ));
        }
        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> SinkMessage {
        SinkMessage {
            original_input: "Logs:\nOOMKilled".to_string(),
            host_visits: 2,
            ..SinkMessage::default()
        }
    }

    #[test]
    fn test_render_skips_empty_sections() {
        let mut msg = message();
        msg.auto_fix_result = "raised memory to 512Mi".to_string();

        assert_eq!(
            msg.render(),
            "Original input:\nLogs:\nOOMKilled\n\nAuto-fix result:\nraised memory to 512Mi"
        );
    }

    #[test]
    fn test_render_forced_finish() {
        let mut msg = message();
        msg.forced_finish = true;
        assert!(msg
            .render()
            .ends_with("Investigation stopped after 2 triage steps without a final decision."));
    }

    #[test]
    fn test_severity() {
        let mut msg = message();
        assert_eq!(msg.severity(), Severity::Warning);

        msg.patch_outcomes.push(PatchResult {
            success: true,
            message: "Successfully applied patch".to_string(),
        });
        assert_eq!(msg.severity(), Severity::Info);

        msg.human_help_result = "incident document".to_string();
        assert_eq!(msg.severity(), Severity::Critical);
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(message()).unwrap();
        assert!(value.get("autoFixResult").is_some());
        assert!(value.get("humanHelpResult").is_some());
    }
}
