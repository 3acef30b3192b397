//! Stage prompt templates and output schemas.

use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};

use super::{AgentError, StageKind};
use crate::ai::ChatMessage;

/// (stage, system template, user template)
const TEMPLATES: [(StageKind, &str, &str); 5] = [
    (StageKind::Host, HOST_SYSTEM, HOST_USER),
    (StageKind::AutoFixer, AUTOFIXER_SYSTEM, AUTOFIXER_USER),
    (StageKind::Searcher, SEARCHER_SYSTEM, SEARCHER_USER),
    (StageKind::HumanHelper, HUMANHELPER_SYSTEM, HUMANHELPER_USER),
    (StageKind::Analyzer, ANALYZER_SYSTEM, ANALYZER_USER),
];

/// Stage prompts: a system and a user template per stage, plus output schemas.
///
/// Every template receives a `language` variable plus stage-specific fields.
pub struct PromptRegistry {
    handlebars: Handlebars<'static>,
}

impl PromptRegistry {
    pub fn new() -> Result<Self, AgentError> {
        let mut handlebars = Handlebars::new();
        // Logs and manifests go in verbatim
        handlebars.register_escape_fn(handlebars::no_escape);

        for (stage, system, user) in TEMPLATES {
            handlebars
                .register_template_string(&system_key(stage), system)
                .map_err(|e| AgentError::Prompt {
                    stage,
                    message: e.to_string(),
                })?;
            handlebars
                .register_template_string(&user_key(stage), user)
                .map_err(|e| AgentError::Prompt {
                    stage,
                    message: e.to_string(),
                })?;
        }

        Ok(Self { handlebars })
    }

    /// Render the system and user message for `stage`.
    pub fn messages<T: Serialize>(
        &self,
        stage: StageKind,
        data: &T,
    ) -> Result<Vec<ChatMessage>, AgentError> {
        let render = |key: String| {
            self.handlebars
                .render(&key, data)
                .map_err(|e| AgentError::Prompt {
                    stage,
                    message: e.to_string(),
                })
        };
        Ok(vec![
            ChatMessage::system(render(system_key(stage))?),
            ChatMessage::user(render(user_key(stage))?),
        ])
    }

    /// Structured-output schema for `stage`, if it has one.
    #[must_use]
    pub fn schema(&self, stage: StageKind) -> Option<Value> {
        match stage {
            StageKind::Host => Some(host_schema()),
            StageKind::Analyzer => Some(analyzer_schema()),
            _ => None,
        }
    }
}

fn system_key(stage: StageKind) -> String {
    format!("{stage}.system")
}

fn user_key(stage: StageKind) -> String {
    format!("{stage}.user")
}

fn host_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "option": {
                "type": "string",
                "enum": ["AutoFixer", "Searcher", "HumanHelper", "Finish"]
            },
            "context": {
                "type": "object",
                "properties": {
                    "autofix": {"type": "string"},
                    "search": {"type": "string"}
                },
                "required": ["autofix", "search"]
            }
        },
        "required": ["option", "context"]
    })
}

fn analyzer_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "reason": {"type": "string"},
            "solution": {"type": "string"},
            "sink": {"type": "boolean"}
        },
        "required": ["reason", "solution", "sink"]
    })
}

const HOST_SYSTEM: &str = r#"You are the on-call owner of a Kubernetes cluster. Based on the incident below, choose the next action from the options list.
Respond with JSON only, in this shape:
{
  "option": "AutoFixer",
  "context": {
    "autofix": "memory limit of container app is too low",
    "search": ""
  }
}
or
{
  "option": "HumanHelper",
  "context": {
    "autofix": "auto-fix failed, context is ...",
    "search": "search result ..."
  }
}
Options: ["AutoFixer", "Searcher", "HumanHelper", "Finish"]
- AutoFixer: attempt an automatic fix. Choose this when the input is only the resource and its logs. Put what should be fixed in context.autofix and leave context.search empty.
- Searcher: research a solution. Choose this after an automatic fix failed. Put the question to research in context.search and leave context.autofix empty.
- HumanHelper: ask a human for help. Choose this when the automatic fix failed and research was already done. Put a summary of the failed fix in context.autofix and a summary of the research in context.search.
- Finish: the work is done, for example the automatic fix succeeded or a human was asked for help.
Answer in {{language}}."#;

const HOST_USER: &str = "{{original_input}}{{#if history}}

Previous results:
{{history}}{{/if}}";

const AUTOFIXER_SYSTEM: &str = "You are a Kubernetes remediation expert. Analyze the problem and try to fix it.
You may only fix problems that can be fixed by applying a JSON patch to a resource with the kubectl_patch tool.
When the pod is managed by a controller, patch the owning workload (for example the Deployment or StatefulSet) instead of the pod.
If the problem cannot be fixed this way, do not call the tool and explain why.
When you are done, state clearly whether the fix succeeded and what was changed.
Answer in {{language}}.";

const AUTOFIXER_USER: &str = "{{#if has_knowledge_base}}Fix the following Kubernetes problem with the help of the operations knowledge below:
{{else}}Fix the following Kubernetes problem:
{{/if}}{{original_input}}{{#if guidance}}

Triage notes:
{{guidance}}{{/if}}{{#if has_knowledge_base}}

Operations knowledge:
{{#if knowledge}}{{knowledge}}{{else}}(no documents found){{/if}}

Look for the solution in the operations knowledge first. If it is empty or nothing in it is relevant, use your own judgment.{{/if}}";

const SEARCHER_SYSTEM: &str = "You are a research expert for Kubernetes incidents.
Find solutions to the problem from known issues, documentation and community reports.
Start your answer with \"Search result:\" followed by the relevant solutions.
Answer in {{language}}.";

const SEARCHER_USER: &str = "Find solutions for the following Kubernetes problem.
Original problem: {{original_input}}
Auto-fix result: {{auto_fix_result}}{{#if query}}
Focus: {{query}}{{/if}}";

const HUMANHELPER_SYSTEM: &str = "You are a technical writer for an operations team.
Based on the original problem, the auto-fix outcome and the research results, write a detailed incident document for a human operator.
Do not attempt any further remediation.
Answer in {{language}}.";

const HUMANHELPER_USER: &str = "Write the incident document.
Original problem: {{original_input}}
Auto-fix result: {{auto_fix_result}}
Search result: {{search_result}}

Include a problem description, a failure analysis and a suggested resolution.";

const ANALYZER_SYSTEM: &str = r#"You are a Kubernetes operations expert. Assess how severe the logs below are.
For severe problems give a root-cause analysis and a solution, and decide whether the incident should be reported.
{{#if has_knowledge_base}}Look for the solution in the operations knowledge. If it is empty or nothing in it is relevant, give your own solution.
{{/if}}Respond with JSON only, with these fields:
  reason: root-cause analysis
  solution: proposed solution
  sink: true if the incident should be reported, otherwise false
Example:
{
  "reason": "error reason",
  "solution": "error solution",
  "sink": true
}
Answer in {{language}}."#;

const ANALYZER_USER: &str = "Pod yaml: {{pod_yaml}}
Logs: {{logs}}{{#if has_knowledge_base}}
Operations knowledge:
{{#if knowledge}}{{knowledge}}{{else}}(no documents found){{/if}}{{/if}}";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ChatRole;

    #[test]
    fn test_all_templates_register() {
        assert!(PromptRegistry::new().is_ok());
    }

    #[test]
    fn test_host_prompt_with_history() {
        let registry = PromptRegistry::new().unwrap();
        let messages = registry
            .messages(
                StageKind::Host,
                &json!({
                    "language": "Chinese",
                    "original_input": "Logs:\n<OOMKilled> \"exit 137\"",
                    "history": "AutoFix result: patched"
                }),
            )
            .unwrap();

        assert_eq!(messages[0].role, ChatRole::System);
        assert!(messages[0].content.ends_with("Answer in Chinese."));
        assert_eq!(
            messages[1].content,
            "Logs:\n<OOMKilled> \"exit 137\"\n\nPrevious results:\nAutoFix result: patched"
        );
    }

    #[test]
    fn test_autofixer_prompt_knowledge_block() {
        let registry = PromptRegistry::new().unwrap();

        let without = registry
            .messages(
                StageKind::AutoFixer,
                &json!({"language": "English", "original_input": "crash", "has_knowledge_base": false}),
            )
            .unwrap();
        assert_eq!(without[1].content, "Fix the following Kubernetes problem:\ncrash");

        let empty = registry
            .messages(
                StageKind::AutoFixer,
                &json!({"language": "English", "original_input": "crash", "has_knowledge_base": true, "knowledge": ""}),
            )
            .unwrap();
        assert!(empty[1].content.contains("(no documents found)"));
        assert!(empty[1].content.contains("use your own judgment"));

        let with = registry
            .messages(
                StageKind::AutoFixer,
                &json!({
                    "language": "English",
                    "original_input": "crash",
                    "has_knowledge_base": true,
                    "knowledge": "raise memory",
                    "guidance": "limit too low"
                }),
            )
            .unwrap();
        assert!(with[1].content.contains("Operations knowledge:\nraise memory"));
        assert!(with[1].content.contains("Triage notes:\nlimit too low"));
    }

    #[test]
    fn test_schemas() {
        let registry = PromptRegistry::new().unwrap();
        assert_eq!(
            registry.schema(StageKind::Host).unwrap()["required"],
            json!(["option", "context"])
        );
        assert_eq!(
            registry.schema(StageKind::Analyzer).unwrap()["properties"]["sink"]["type"],
            "boolean"
        );
        assert!(registry.schema(StageKind::Searcher).is_none());
    }
}
