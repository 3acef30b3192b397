//! Incident records handed from the detector to the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Language the stages answer in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ch,
}

impl Language {
    /// Human readable name injected into prompts.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::En => "English",
            Self::Ch => "Chinese",
        }
    }

    /// Short code as used in configuration.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ch => "ch",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "ch" | "zh" => Ok(Self::Ch),
            other => Err(format!("unsupported language: {other}")),
        }
    }
}

/// One unhealthy workload, captured at detection time.
///
/// Immutable once created: the orchestrator only ever reads it.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    id: Uuid,
    namespace: String,
    pod: String,
    resource_descriptor: String,
    logs: String,
    original_input: String,
    language: Language,
}

impl Incident {
    /// Build an incident from the rendered resource manifest and its logs.
    pub fn new(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        resource_descriptor: impl Into<String>,
        logs: impl Into<String>,
        language: Language,
    ) -> Self {
        let resource_descriptor = resource_descriptor.into();
        let logs = logs.into();
        let original_input = format!("Resource YAML:\n{resource_descriptor}\nLogs:\n{logs}");
        Self {
            id: Uuid::new_v4(),
            namespace: namespace.into(),
            pod: pod.into(),
            resource_descriptor,
            logs,
            original_input,
            language,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Rendered manifest of the affected resource.
    #[must_use]
    pub fn resource_descriptor(&self) -> &str {
        &self.resource_descriptor
    }

    #[must_use]
    pub fn logs(&self) -> &str {
        &self.logs
    }

    /// Text the triage stage starts from: manifest followed by logs.
    #[must_use]
    pub fn original_input(&self) -> &str {
        &self.original_input
    }

    #[must_use]
    pub fn language(&self) -> Language {
        self.language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parse() {
        assert_eq!("en".parse::<Language>().unwrap(), Language::En);
        assert_eq!("CH".parse::<Language>().unwrap(), Language::Ch);
        assert_eq!("zh".parse::<Language>().unwrap(), Language::Ch);
        assert!("fr".parse::<Language>().is_err());
        assert_eq!(Language::Ch.display_name(), "Chinese");
    }

    #[test]
    fn test_original_input_layout() {
        let incident = Incident::new("shop", "cart-0", "kind: Pod", "OOMKilled", Language::En);
        assert_eq!(
            incident.original_input(),
            "Resource YAML:\nkind: Pod\nLogs:\nOOMKilled"
        );
        assert_eq!(incident.namespace(), "shop");
        assert_eq!(incident.pod(), "cart-0");
    }
}
