use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisio_application::RoleEventGenerator;
use provisio_core::AppResult;
use provisio_domain::{DeferredRequest, Identity};
use tokio::sync::RwLock;
use tracing::debug;

/// What a scheduled event does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledChange {
    /// A dated role assignment becomes active.
    Sunrise {
        /// Assignment id.
        assignment_id: String,
        /// Role name.
        role_name: String,
    },
    /// A dated role assignment ends.
    Sunset {
        /// Assignment id.
        assignment_id: String,
        /// Role name.
        role_name: String,
    },
    /// A dated account change held back at compilation.
    Deferred(DeferredRequest),
}

/// One scheduled event.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    /// Stable event id.
    pub id: String,
    /// Subject identity name.
    pub identity_name: String,
    /// When the event fires.
    pub due_at: DateTime<Utc>,
    /// The change to apply.
    pub change: ScheduledChange,
}

/// In-memory sunrise and sunset scheduler.
///
/// Event ids are derived from their subject so rescheduling replaces the
/// previous event instead of adding another one.
#[derive(Debug, Default)]
pub struct InMemoryRoleEventGenerator {
    events: RwLock<BTreeMap<String, ScheduledEvent>>,
}

impl InMemoryRoleEventGenerator {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists the events of one identity ordered by due date.
    pub async fn events_for(&self, identity_name: &str) -> Vec<ScheduledEvent> {
        let mut events: Vec<ScheduledEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|event| event.identity_name == identity_name)
            .cloned()
            .collect();
        events.sort_by(|left, right| left.due_at.cmp(&right.due_at));
        events
    }

    /// Removes and returns every event due at `now`.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<ScheduledEvent> {
        let mut events = self.events.write().await;
        let due_ids: Vec<String> = events
            .values()
            .filter(|event| event.due_at <= now)
            .map(|event| event.id.clone())
            .collect();
        due_ids
            .iter()
            .filter_map(|id| events.remove(id))
            .collect()
    }
}

fn planned_events(
    identity: &Identity,
    deferred: &[DeferredRequest],
    now: DateTime<Utc>,
) -> Vec<ScheduledEvent> {
    let mut planned = Vec::new();
    for assignment in identity.role_assignments.iter() {
        if assignment.negative {
            continue;
        }
        if let Some(start) = assignment.start_date.filter(|start| *start > now) {
            planned.push(ScheduledEvent {
                id: format!("sunrise:{}:{}", identity.name, assignment.assignment_id),
                identity_name: identity.name.clone(),
                due_at: start,
                change: ScheduledChange::Sunrise {
                    assignment_id: assignment.assignment_id.clone(),
                    role_name: assignment.role_name.clone(),
                },
            });
        }
        if let Some(end) = assignment.end_date.filter(|end| *end > now) {
            planned.push(ScheduledEvent {
                id: format!("sunset:{}:{}", identity.name, assignment.assignment_id),
                identity_name: identity.name.clone(),
                due_at: end,
                change: ScheduledChange::Sunset {
                    assignment_id: assignment.assignment_id.clone(),
                    role_name: assignment.role_name.clone(),
                },
            });
        }
    }

    for request in deferred {
        let Some(due_at) = request.due_at() else {
            continue;
        };
        let operation = request.request.operation.as_str();
        planned.push(ScheduledEvent {
            id: format!(
                "deferred:{}:{}:{}:{}:{}",
                identity.name,
                request.application,
                request.native_identity.as_deref().unwrap_or("-"),
                request.request.name,
                operation
            ),
            identity_name: identity.name.clone(),
            due_at,
            change: ScheduledChange::Deferred(request.clone()),
        });
    }
    planned
}

#[async_trait]
impl RoleEventGenerator for InMemoryRoleEventGenerator {
    async fn schedule_events(
        &self,
        identity: &Identity,
        deferred: &[DeferredRequest],
        now: DateTime<Utc>,
    ) -> AppResult<Vec<String>> {
        let planned = planned_events(identity, deferred, now);
        let mut events = self.events.write().await;

        // Dated assignments that disappeared lose their events; deferred
        // changes stay until they fire.
        events.retain(|id, event| {
            event.identity_name != identity.name
                || matches!(event.change, ScheduledChange::Deferred(_))
                || planned.iter().any(|next| next.id == *id)
        });

        let mut ids = Vec::with_capacity(planned.len());
        for event in planned {
            debug!(
                identity = %identity.name,
                event_id = %event.id,
                due_at = %event.due_at,
                "scheduled identity event"
            );
            ids.push(event.id.clone());
            events.insert(event.id.clone(), event);
        }
        Ok(ids)
    }
}
