use crate::incident::{Incident, Language};
use crate::tools::PatchResult;

use super::decision::RoutingDecision;

/// Per-invocation record threaded through the stages.
///
/// Owned by exactly one orchestrator run. Each result field is written only
/// by the stage that produces it; `has_knowledge_base` is fixed at creation.
#[derive(Debug, Clone)]
pub struct IncidentState {
    original_input: String,
    language: Language,
    has_knowledge_base: bool,
    auto_fix_result: Option<String>,
    search_result: Option<String>,
    human_help_result: Option<String>,
    patch_outcomes: Vec<PatchResult>,
    host_visits: u32,
    last_decision: Option<RoutingDecision>,
    forced_finish: bool,
}

impl IncidentState {
    #[must_use]
    pub fn new(incident: &Incident, has_knowledge_base: bool) -> Self {
        Self {
            original_input: incident.original_input().to_string(),
            language: incident.language(),
            has_knowledge_base,
            auto_fix_result: None,
            search_result: None,
            human_help_result: None,
            patch_outcomes: Vec::new(),
            host_visits: 0,
            last_decision: None,
            forced_finish: false,
        }
    }

    #[must_use]
    pub fn original_input(&self) -> &str {
        &self.original_input
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }

    #[must_use]
    pub fn has_knowledge_base(&self) -> bool {
        self.has_knowledge_base
    }

    #[must_use]
    pub fn auto_fix_result(&self) -> Option<&str> {
        self.auto_fix_result.as_deref()
    }

    #[must_use]
    pub fn search_result(&self) -> Option<&str> {
        self.search_result.as_deref()
    }

    #[must_use]
    pub fn human_help_result(&self) -> Option<&str> {
        self.human_help_result.as_deref()
    }

    /// Patch outcomes across every auto-fix attempt, in order.
    #[must_use]
    pub fn patch_outcomes(&self) -> &[PatchResult] {
        &self.patch_outcomes
    }

    #[must_use]
    pub fn host_visits(&self) -> u32 {
        self.host_visits
    }

    #[must_use]
    pub fn last_decision(&self) -> Option<&RoutingDecision> {
        self.last_decision.as_ref()
    }

    #[must_use]
    pub fn forced_finish(&self) -> bool {
        self.forced_finish
    }

    /// Count a triage visit and return the new total.
    pub(crate) fn enter_host(&mut self) -> u32 {
        self.host_visits += 1;
        self.host_visits
    }

    pub(crate) fn record_decision(&mut self, decision: RoutingDecision) {
        self.last_decision = Some(decision);
    }

    pub(crate) fn record_auto_fix(&mut self, text: String, outcomes: Vec<PatchResult>) {
        self.auto_fix_result = Some(text);
        self.patch_outcomes.extend(outcomes);
    }

    pub(crate) fn record_search(&mut self, text: String) {
        self.search_result = Some(text);
    }

    pub(crate) fn record_human_help(&mut self, text: String) {
        self.human_help_result = Some(text);
    }

    pub(crate) fn force_finish(&mut self) {
        self.forced_finish = true;
    }

    /// Prior stage results as labeled blocks, `None` before any stage ran.
    #[must_use]
    pub fn history(&self) -> Option<String> {
        let mut blocks = Vec::new();
        if let Some(auto_fix) = &self.auto_fix_result {
            blocks.push(format!("AutoFix result: {auto_fix}"));
        }
        if !self.patch_outcomes.is_empty() {
            let lines: Vec<String> = self
                .patch_outcomes
                .iter()
                .map(|outcome| {
                    let status = if outcome.success { "succeeded" } else { "failed" };
                    format!("- {status}: {}", outcome.message)
                })
                .collect();
            blocks.push(format!("Patch outcomes:\n{}", lines.join("\n")));
        }
        if let Some(search) = &self.search_result {
            blocks.push(format!("Search result: {search}"));
        }
        (!blocks.is_empty()).then(|| blocks.join("\n"))
    }
}
