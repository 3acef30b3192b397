//! Incident notification delivery for podwarden.
//!
//! This crate delivers the final report of an incident investigation to
//! the messaging platforms configured as notification sinks.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use notify::{FeishuChannel, Notifier, NotifyEvent, Severity};
//!
//! # async fn run() -> Result<(), notify::ChannelError> {
//! let feishu = FeishuChannel::new("ops", "https://open.feishu.cn/...", "signing-secret")?;
//! let notifier = Notifier::with_channels(vec![Arc::new(feishu)]);
//!
//! let results = notifier
//!     .notify_and_wait(NotifyEvent::IncidentReport {
//!         namespace: "shop".to_string(),
//!         pod: "cart-7d9f".to_string(),
//!         content: "...".to_string(),
//!         severity: Severity::Warning,
//!         timestamp: chrono::Utc::now(),
//!     })
//!     .await;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the interface for notification channels
//! - [`FeishuChannel`] implements signed Feishu (Lark) webhook delivery
//! - [`Notifier`] dispatches events to all enabled channels

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;

pub use channels::feishu::{gen_sign, FeishuChannel};
pub use channels::NotifyChannel;
pub use error::ChannelError;
pub use events::{NotifyEvent, Severity};

use std::sync::Arc;
use tracing::{info, warn};

/// Environment variable to disable all notifications.
const ENV_NOTIFY_DISABLED: &str = "NOTIFY_DISABLED";

/// Central notification dispatcher.
///
/// The `Notifier` owns the configured channels and dispatches events to all
/// enabled ones.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    disabled: bool,
}

impl Notifier {
    /// Create a notifier with specific channels.
    ///
    /// Setting `NOTIFY_DISABLED=true` in the environment turns every
    /// dispatch into a no-op.
    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        let disabled = std::env::var(ENV_NOTIFY_DISABLED)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if disabled {
            info!("Notifications disabled via NOTIFY_DISABLED");
        } else if channels.is_empty() {
            warn!("No notification channels configured");
        } else {
            info!(
                channel_count = channels.len(),
                "Notification system initialized"
            );
        }

        Self { channels, disabled }
    }

    /// Create a disabled notifier (for testing or when notifications are off).
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            channels: vec![],
            disabled: true,
        }
    }

    /// Check if any notification channels are enabled.
    #[must_use]
    pub fn has_channels(&self) -> bool {
        !self.disabled && !self.channels.is_empty()
    }

    /// Get the number of enabled channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.disabled {
            0
        } else {
            self.channels.len()
        }
    }

    /// Send a notification and wait for all channels to complete.
    ///
    /// Channels are tried in order; every channel is attempted even when an
    /// earlier one fails. Returns one `(channel name, result)` pair per channel.
    pub async fn notify_and_wait(
        &self,
        event: NotifyEvent,
    ) -> Vec<(String, Result<(), ChannelError>)> {
        if !self.has_channels() {
            return vec![];
        }

        let mut results = vec![];

        for channel in &self.channels {
            if !channel.enabled() {
                continue;
            }
            let channel_name = channel.name().to_string();
            let result = channel.send(&event).await;
            results.push((channel_name, result));
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl NotifyChannel for CountingChannel {
        fn name(&self) -> &str {
            "counting"
        }

        fn enabled(&self) -> bool {
            true
        }

        async fn send(&self, _event: &NotifyEvent) -> Result<(), ChannelError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ChannelError::NotConfigured("counting".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn event() -> NotifyEvent {
        NotifyEvent::AnalysisReport {
            namespace: "default".to_string(),
            pod: "web-0".to_string(),
            reason: "OOMKilled".to_string(),
            solution: "raise memory limit".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_disabled_notifier() {
        let notifier = Notifier::disabled();
        assert!(!notifier.has_channels());
        assert_eq!(notifier.channel_count(), 0);
    }

    #[test]
    fn test_event_titles() {
        assert_eq!(event().title(), "Log Analysis: default/web-0");
        assert_eq!(event().body(), "Reason: OOMKilled\nSolution: raise memory limit");
        assert_eq!(event().severity(), Severity::Warning);
    }

    #[tokio::test]
    async fn test_notify_and_wait_attempts_every_channel() {
        let failing = Arc::new(CountingChannel {
            sent: AtomicUsize::new(0),
            fail: true,
        });
        let healthy = Arc::new(CountingChannel {
            sent: AtomicUsize::new(0),
            fail: false,
        });
        let notifier = Notifier {
            channels: vec![failing.clone(), healthy.clone()],
            disabled: false,
        };

        let results = notifier.notify_and_wait(event()).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert!(results[1].1.is_ok());
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
    }
}
