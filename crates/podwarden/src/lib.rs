//! # podwarden
//!
//! An in-cluster incident agent. It finds unhealthy pods, hands their
//! manifest and logs to a language-model driven investigation, and reports
//! what happened.
//!
//! The investigation is a bounded state machine (see [`agents::Orchestrator`]):
//! a triage stage (host) routes the incident to an auto-fixer that may apply
//! JSON patches to cluster resources, to a research stage, or to a stage that
//! writes an incident document for human operators. When a knowledge base is
//! configured, the auto-fixer prompt is enriched by a hybrid dense + lexical
//! retriever ([`knowledge::HybridRetriever`]).
//!
//! ```rust,ignore
//! use podwarden::agents::Orchestrator;
//!
//! let orchestrator = Orchestrator::builder(model)
//!     .patch_executor(executor)
//!     .max_steps(6)
//!     .build()?;
//! let report = orchestrator.run(&incident, &cancel).await?;
//! ```

pub mod agents;
pub mod ai;
pub mod cancel;
pub mod config;
pub mod detect;
pub mod incident;
pub mod knowledge;
pub mod scheduler;
pub mod secrets;
pub mod tools;

pub use agents::{AgentError, IncidentState, Orchestrator, RoutingDecision, SinkMessage};
pub use config::{Config, ConfigError};
pub use incident::{Incident, Language};
