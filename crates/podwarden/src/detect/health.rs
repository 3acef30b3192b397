//! Pod health classification.

use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};

/// Waiting reasons that mark a container as broken.
const FAILING_WAIT_REASONS: [&str; 4] = ["CrashLoopBackOff", "Error", "ImagePullBackOff", "ErrImagePull"];

fn waiting_on_failure(status: &ContainerStatus) -> bool {
    status
        .state
        .as_ref()
        .and_then(|s| s.waiting.as_ref())
        .and_then(|w| w.reason.as_deref())
        .is_some_and(|reason| FAILING_WAIT_REASONS.contains(&reason))
}

fn terminated_with_error(status: &ContainerStatus) -> bool {
    status
        .state
        .as_ref()
        .and_then(|s| s.terminated.as_ref())
        .is_some_and(|t| t.exit_code != 0)
}

/// Whether a pod needs no attention.
///
/// Pods outside `Running`/`Succeeded` are unhealthy. Running pods are
/// unhealthy when a container is not ready, waits on a failure reason or
/// exited non-zero, or when an init container waits on a failure reason.
#[must_use]
pub fn is_pod_healthy(status: &PodStatus) -> bool {
    let phase = status.phase.as_deref().unwrap_or("Unknown");
    match phase {
        "Succeeded" => true,
        "Running" => {
            let containers = status.container_statuses.as_deref().unwrap_or_default();
            let init_containers = status.init_container_statuses.as_deref().unwrap_or_default();

            let containers_ok = containers
                .iter()
                .all(|c| c.ready && !waiting_on_failure(c) && !terminated_with_error(c));
            let init_ok = init_containers.iter().all(|c| !waiting_on_failure(c));
            containers_ok && init_ok
        }
        _ => false,
    }
}

/// Whether any container is currently running.
#[must_use]
pub fn has_running_container(status: &PodStatus) -> bool {
    status
        .container_statuses
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|c| c.state.as_ref().is_some_and(|s| s.running.is_some()))
}

/// Phase plus per-container waiting/terminated reasons.
#[must_use]
pub fn status_summary(status: &PodStatus) -> String {
    let mut lines = vec![format!(
        "Pod Phase: {}",
        status.phase.as_deref().unwrap_or("Unknown")
    )];

    for container in status.container_statuses.as_deref().unwrap_or_default() {
        let Some(state) = &container.state else {
            continue;
        };
        if let Some(waiting) = &state.waiting {
            lines.push(format!(
                "Container {}: {} - {}",
                container.name,
                waiting.reason.as_deref().unwrap_or_default(),
                waiting.message.as_deref().unwrap_or_default()
            ));
        } else if let Some(terminated) = &state.terminated {
            lines.push(format!(
                "Container {}: Terminated - {}",
                container.name,
                terminated.reason.as_deref().unwrap_or_default()
            ));
        }
    }

    lines.join("\n")
}
