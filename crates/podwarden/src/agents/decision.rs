//! Decoding the triage stage's routing decision.
//!
//! The model is asked for `{option, context: {autofix, search}}`. Anything
//! that does not decode falls back to keyword matching, which always yields
//! a valid option.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ai::strip_code_fence;

/// Keywords checked, in order, when the decision does not decode.
const FALLBACK_KEYWORDS: [(&str, StageOption); 3] = [
    ("autofixer", StageOption::AutoFixer),
    ("searcher", StageOption::Searcher),
    ("humanhelper", StageOption::HumanHelper),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageOption {
    AutoFixer,
    Searcher,
    HumanHelper,
    Finish,
}

impl StageOption {
    /// Case-insensitive name match; anything unknown is `None`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "autofixer" => Some(Self::AutoFixer),
            "searcher" => Some(Self::Searcher),
            "humanhelper" => Some(Self::HumanHelper),
            "finish" => Some(Self::Finish),
            _ => None,
        }
    }
}

impl fmt::Display for StageOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AutoFixer => "AutoFixer",
            Self::Searcher => "Searcher",
            Self::HumanHelper => "HumanHelper",
            Self::Finish => "Finish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionContext {
    #[serde(default)]
    pub autofix: String,
    #[serde(default)]
    pub search: String,
}

/// How a decision was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    Structured,
    Keyword,
    /// Nothing matched; routed to `Finish`
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub option: StageOption,
    pub context: DecisionContext,
    pub source: DecisionSource,
}

impl RoutingDecision {
    #[must_use]
    pub fn finish() -> Self {
        Self {
            option: StageOption::Finish,
            context: DecisionContext::default(),
            source: DecisionSource::Default,
        }
    }

    /// Describe a context that does not fit the chosen option.
    ///
    /// AutoFixer and Searcher expect exactly one populated field, HumanHelper
    /// expects both.
    #[must_use]
    pub fn context_violation(&self) -> Option<String> {
        let autofix = !self.context.autofix.trim().is_empty();
        let search = !self.context.search.trim().is_empty();
        match self.option {
            StageOption::AutoFixer | StageOption::Searcher if autofix == search => Some(format!(
                "{} expects exactly one context field, got autofix={autofix} search={search}",
                self.option
            )),
            StageOption::HumanHelper if !(autofix && search) => Some(format!(
                "HumanHelper expects both context fields, got autofix={autofix} search={search}"
            )),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct RawDecision {
    option: String,
    #[serde(default)]
    context: DecisionContext,
}

/// Decode a triage response. Total: every input yields a decision.
#[must_use]
pub fn parse_decision(text: &str) -> RoutingDecision {
    if let Ok(raw) = serde_json::from_str::<RawDecision>(strip_code_fence(text)) {
        // A decoded but unknown option ends the run
        let option = StageOption::from_name(&raw.option).unwrap_or(StageOption::Finish);
        return RoutingDecision {
            option,
            context: raw.context,
            source: DecisionSource::Structured,
        };
    }

    let lowered = text.to_lowercase();
    FALLBACK_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map_or_else(RoutingDecision::finish, |(_, option)| RoutingDecision {
            option: *option,
            context: DecisionContext::default(),
            source: DecisionSource::Keyword,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_decision() {
        let decision = parse_decision(
            r#"{"option":"AutoFixer","context":{"autofix":"raise memory","search":""}}"#,
        );
        assert_eq!(decision.option, StageOption::AutoFixer);
        assert_eq!(decision.context.autofix, "raise memory");
        assert_eq!(decision.source, DecisionSource::Structured);
        assert!(decision.context_violation().is_none());
    }

    #[test]
    fn test_fenced_and_lowercase_option() {
        let decision = parse_decision("```json\n{\"option\":\"searcher\",\"context\":{\"search\":\"why\"}}\n```");
        assert_eq!(decision.option, StageOption::Searcher);
        assert_eq!(decision.source, DecisionSource::Structured);
    }

    #[test]
    fn test_unknown_structured_option_finishes() {
        let decision = parse_decision(r#"{"option":"Escalate","context":{}}"#);
        assert_eq!(decision.option, StageOption::Finish);
    }

    #[test]
    fn test_keyword_fallback_order() {
        // autofixer wins even when it appears later in the text
        let decision = parse_decision("call the HumanHelper, or maybe the AUTOFIXER");
        assert_eq!(decision.option, StageOption::AutoFixer);
        assert_eq!(decision.source, DecisionSource::Keyword);

        assert_eq!(
            parse_decision("option: Searcher then humanhelper").option,
            StageOption::Searcher
        );
        assert_eq!(parse_decision("{\"option\": HumanHelper").option, StageOption::HumanHelper);
    }

    #[test]
    fn test_fallback_defaults_to_finish() {
        for text in ["", "all good now", "{\"option\": ", "```\n```"] {
            let decision = parse_decision(text);
            assert_eq!(decision.option, StageOption::Finish, "input {text:?}");
            assert_eq!(decision.source, DecisionSource::Default);
        }
    }

    #[test]
    fn test_context_violation() {
        let mut decision = parse_decision(r#"{"option":"Searcher","context":{"autofix":"","search":""}}"#);
        assert!(decision.context_violation().is_some());

        decision.option = StageOption::HumanHelper;
        decision.context = DecisionContext {
            autofix: "patch rejected".to_string(),
            search: "raise the limit".to_string(),
        };
        assert!(decision.context_violation().is_none());

        decision.option = StageOption::Finish;
        decision.context = DecisionContext::default();
        assert!(decision.context_violation().is_none());
    }
}
