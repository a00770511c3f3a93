//! Best-effort push notifications.
//!
//! The notifier subscribes to issue-failed, sprint-complete, and
//! sprint-error events and posts each as JSON to a configured webhook.
//! Pushes are fire-and-forget: failures are logged and swallowed, never
//! propagated into the orchestration flow.

use crate::events::{EventBus, EventKind, SprintEvent};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Notifier {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    /// Subscribe this notifier to the bus. A notifier without a webhook
    /// URL subscribes to nothing.
    pub fn attach(self: Arc<Self>, bus: &EventBus) {
        if self.webhook_url.is_none() {
            return;
        }
        let notifier = self.clone();
        bus.subscribe_many(
            &[
                EventKind::IssueFail,
                EventKind::SprintComplete,
                EventKind::SprintError,
            ],
            move |event| notifier.dispatch(event),
        );
    }

    fn dispatch(&self, event: &SprintEvent) {
        let Some(url) = self.webhook_url.clone() else {
            return;
        };
        let payload = payload_for(event);
        let client = self.client.clone();

        // Handlers run synchronously on the emitting task; the push itself
        // must not block orchestration. Outside a runtime there is nothing
        // to push from, so the notification is dropped.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match client.post(&url).json(&payload).send().await {
                        Ok(resp) if resp.status().is_success() => {
                            debug!(%url, "notification delivered");
                        }
                        Ok(resp) => {
                            warn!(%url, status = %resp.status(), "notification rejected");
                        }
                        Err(e) => {
                            warn!(%url, error = %e, "notification failed");
                        }
                    }
                });
            }
            Err(_) => warn!(%url, "no async runtime; notification dropped"),
        }
    }
}

fn payload_for(event: &SprintEvent) -> serde_json::Value {
    match event {
        SprintEvent::IssueFailed {
            issue_number,
            title,
            reason,
        } => json!({
            "event": "issue-failed",
            "issue": issue_number,
            "title": title,
            "reason": reason,
        }),
        SprintEvent::SprintComplete { sprint_number } => json!({
            "event": "sprint-complete",
            "sprint": sprint_number,
        }),
        SprintEvent::SprintError { message } => json!({
            "event": "sprint-error",
            "message": message,
        }),
        other => json!({ "event": format!("{:?}", other.kind()) }),
    }
}
