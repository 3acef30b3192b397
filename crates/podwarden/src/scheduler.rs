//! Periodic detection and incident dispatch.
//!
//! Each tick scans for unhealthy pods and runs one invocation per incident,
//! at most `max_concurrent` at a time. Every invocation gets its own
//! cancellation scope (child of the shutdown token) and a timeout. A failed
//! invocation is logged and produces no notification; it is picked up again
//! on the next tick if the pod is still unhealthy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::stream::{self, StreamExt};
use notify::{Notifier, NotifyEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agents::{AgentError, LogAnalyzer, Orchestrator};
use crate::detect::{DetectError, Detector};
use crate::incident::Incident;

/// Produces the incidents of one detection pass.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    async fn scan(&self) -> Result<Vec<Incident>, DetectError>;
}

#[async_trait]
impl IncidentSource for Detector {
    async fn scan(&self) -> Result<Vec<Incident>, DetectError> {
        Detector::scan(self).await
    }
}

/// First fire time strictly after `after`.
#[must_use]
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// How incidents are investigated.
pub enum Pipeline {
    Multi(Arc<Orchestrator>),
    Single(Arc<LogAnalyzer>),
}

impl Pipeline {
    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Multi(_) => "multi",
            Self::Single(_) => "single",
        }
    }
}

/// Result of one successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Whether a report was produced for delivery
    pub reported: bool,
    pub delivered: usize,
    pub failed: usize,
}

/// Runs one incident through the pipeline and delivers the report.
pub struct IncidentRunner {
    pipeline: Pipeline,
    notifier: Arc<Notifier>,
    timeout: Duration,
}

impl IncidentRunner {
    #[must_use]
    pub fn new(pipeline: Pipeline, notifier: Arc<Notifier>, timeout: Duration) -> Self {
        Self {
            pipeline,
            notifier,
            timeout,
        }
    }

    /// Investigate and notify. Failures are logged with the incident identity.
    pub async fn handle(
        &self,
        incident: &Incident,
        shutdown: &CancellationToken,
    ) -> Result<Delivery, AgentError> {
        match self.report(incident, shutdown).await? {
            Some(event) => Ok(self.deliver(incident, event).await),
            None => Ok(Delivery::default()),
        }
    }

    /// Investigate within the invocation timeout; `None` when nothing should be reported.
    pub async fn report(
        &self,
        incident: &Incident,
        shutdown: &CancellationToken,
    ) -> Result<Option<NotifyEvent>, AgentError> {
        let scope = shutdown.child_token();
        let result = match tokio::time::timeout(self.timeout, self.investigate(incident, &scope)).await {
            Ok(result) => result,
            Err(_) => {
                scope.cancel();
                Err(AgentError::Timeout(self.timeout))
            }
        };

        match &result {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(incident = %incident.id(), namespace = incident.namespace(), pod = incident.pod(), "Nothing to report");
            }
            Err(e) => {
                error!(
                    incident = %incident.id(),
                    namespace = incident.namespace(),
                    pod = incident.pod(),
                    mode = self.pipeline.mode(),
                    stage = e.stage().map(|s| s.as_str()),
                    error = %e,
                    "Incident invocation failed"
                );
            }
        }
        result
    }

    async fn investigate(
        &self,
        incident: &Incident,
        cancel: &CancellationToken,
    ) -> Result<Option<NotifyEvent>, AgentError> {
        match &self.pipeline {
            Pipeline::Multi(orchestrator) => {
                let message = orchestrator.run(incident, cancel).await?;
                Ok(Some(NotifyEvent::IncidentReport {
                    namespace: incident.namespace().to_string(),
                    pod: incident.pod().to_string(),
                    content: message.render(),
                    severity: message.severity(),
                    timestamp: Utc::now(),
                }))
            }
            Pipeline::Single(analyzer) => {
                let outcome = analyzer.analyze(incident, cancel).await?;
                Ok(outcome.sink.then(|| NotifyEvent::AnalysisReport {
                    namespace: incident.namespace().to_string(),
                    pod: incident.pod().to_string(),
                    reason: outcome.reason,
                    solution: outcome.solution,
                    timestamp: Utc::now(),
                }))
            }
        }
    }

    /// Send a report to every sink; per-sink failures are logged and counted.
    pub async fn deliver(&self, incident: &Incident, event: NotifyEvent) -> Delivery {
        if !self.notifier.has_channels() {
            warn!(incident = %incident.id(), "Report produced but no notification sink is active");
        }

        let mut delivery = Delivery {
            reported: true,
            ..Delivery::default()
        };
        for (channel, result) in self.notifier.notify_and_wait(event).await {
            match result {
                Ok(()) => delivery.delivered += 1,
                Err(e) => {
                    delivery.failed += 1;
                    error!(incident = %incident.id(), %channel, error = %e, "Notification delivery failed");
                }
            }
        }
        info!(
            incident = %incident.id(),
            namespace = incident.namespace(),
            pod = incident.pod(),
            delivered = delivery.delivered,
            failed = delivery.failed,
            "Incident reported"
        );
        delivery
    }
}

/// Counts for one detection pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub incidents: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub reported: usize,
}

pub struct Scheduler {
    schedule: Schedule,
    source: Arc<dyn IncidentSource>,
    runner: Arc<IncidentRunner>,
    max_concurrent: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        schedule: Schedule,
        source: Arc<dyn IncidentSource>,
        runner: Arc<IncidentRunner>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            schedule,
            source,
            runner,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Fire on schedule until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(max_concurrent = self.max_concurrent, "Scheduler started");
        loop {
            let now = Utc::now();
            let Some(next) = next_fire(&self.schedule, now) else {
                warn!("Schedule has no upcoming fire time, stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            debug!(next = %next, "Waiting for next detection pass");

            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    return;
                }
                () = tokio::time::sleep(wait) => {}
            }

            self.tick(&shutdown).await;
        }
    }

    /// One detection pass with bounded concurrency.
    pub async fn tick(&self, shutdown: &CancellationToken) -> TickSummary {
        let incidents = match self.source.scan().await {
            Ok(incidents) => incidents,
            Err(e) => {
                error!(error = %e, "Detection pass failed");
                return TickSummary::default();
            }
        };

        let mut summary = TickSummary {
            incidents: incidents.len(),
            ..TickSummary::default()
        };
        let runner = &self.runner;
        let results: Vec<Result<Delivery, AgentError>> = stream::iter(incidents)
            .map(|incident| async move { runner.handle(&incident, shutdown).await })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for result in results {
            match result {
                Ok(delivery) => {
                    summary.succeeded += 1;
                    if delivery.reported {
                        summary.reported += 1;
                    }
                }
                Err(_) => summary.failed += 1,
            }
        }

        info!(
            incidents = summary.incidents,
            succeeded = summary.succeeded,
            failed = summary.failed,
            reported = summary.reported,
            "Tick finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, ChatMessage, ChatModel, ChatResponse, GenerateOptions};
    use crate::config::parse_schedule;
    use crate::incident::Language;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedIncidents(Vec<Incident>);

    #[async_trait]
    impl IncidentSource for FixedIncidents {
        async fn scan(&self) -> Result<Vec<Incident>, DetectError> {
            Ok(self.0.clone())
        }
    }

    /// Answers every analysis; fails for pods named `broken-*`, hangs for `slow-*`.
    struct Analyst {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for Analyst {
        fn name(&self) -> &'static str {
            "analyst"
        }

        fn model(&self) -> &str {
            "analyst-1"
        }

        async fn generate(
            &self,
            messages: &[ChatMessage],
            _options: &GenerateOptions,
        ) -> Result<ChatResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let prompt = &messages[1].content;
            if prompt.contains("broken") {
                return Err(AiError::Api {
                    provider: "analyst",
                    status: 500,
                    message: "overloaded".to_string(),
                });
            }
            if prompt.contains("slow") {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let sink = prompt.contains("panic");
            Ok(ChatResponse {
                text: format!(r#"{{"reason":"r","solution":"s","sink":{sink}}}"#),
                ..ChatResponse::default()
            })
        }
    }

    fn incident(pod: &str, logs: &str) -> Incident {
        Incident::new("shop", pod, format!("name: {pod}"), logs, Language::En)
    }

    fn runner(timeout: Duration) -> (Arc<IncidentRunner>, Arc<Analyst>) {
        let model = Arc::new(Analyst {
            calls: AtomicUsize::new(0),
        });
        let analyzer = LogAnalyzer::new(model.clone(), None, 200).unwrap();
        let runner = IncidentRunner::new(
            Pipeline::Single(Arc::new(analyzer)),
            Arc::new(Notifier::disabled()),
            timeout,
        );
        (Arc::new(runner), model)
    }

    #[test]
    fn test_next_fire() {
        let schedule = parse_schedule("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2025, 3, 1, 12, 3, 10).unwrap();
        assert_eq!(
            next_fire(&schedule, after),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 5, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_tick_counts_outcomes() {
        let (runner, model) = runner(Duration::from_secs(30));
        let source = Arc::new(FixedIncidents(vec![
            incident("cart-1", "panic: nil map"),
            incident("cart-2", "GET /healthz 200"),
            incident("broken-3", "panic: x"),
        ]));
        let scheduler = Scheduler::new(parse_schedule("0 * * * * *").unwrap(), source, runner, 2);

        let summary = scheduler.tick(&CancellationToken::new()).await;

        assert_eq!(
            summary,
            TickSummary {
                incidents: 3,
                succeeded: 2,
                failed: 1,
                reported: 1,
            }
        );
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invocation_timeout() {
        let (runner, _) = runner(Duration::from_secs(5));
        let err = runner
            .handle(&incident("slow-1", "hang"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(d) if d == Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_invocation() {
        let (runner, _) = runner(Duration::from_secs(30));
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let err = runner
            .handle(&incident("slow-1", "hang"), &shutdown)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
    }
}
