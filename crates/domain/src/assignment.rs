use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use provisio_core::{AppError, AssignmentId, is_temporary_assignment_id};
use serde::{Deserialize, Serialize};

/// What caused a role assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Interactive request.
    Ui,
    /// Assignment rule.
    Rule,
    /// Scheduled task.
    Task,
    /// Batch request.
    Batch,
    /// Identity lifecycle event.
    LifecycleEvent,
    /// Change pushed from a modified role definition.
    RoleChangePropagation,
    /// Workflow step.
    Workflow,
    /// Anything else.
    Unknown,
}

impl AssignmentSource {
    /// Returns stable source value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ui => "ui",
            Self::Rule => "rule",
            Self::Task => "task",
            Self::Batch => "batch",
            Self::LifecycleEvent => "lifecycle_event",
            Self::RoleChangePropagation => "role_change_propagation",
            Self::Workflow => "workflow",
            Self::Unknown => "unknown",
        }
    }

    /// Reads a source carried as a free-form request argument.
    ///
    /// Unrecognised names fall back to `Unknown`.
    #[must_use]
    pub fn from_argument(value: &str) -> Self {
        value.parse().unwrap_or(Self::Unknown)
    }

    /// Returns the source an existing assignment keeps after a new request.
    ///
    /// `Rule` gives way to any other source. `RoleChangePropagation` never
    /// replaces a source. Every other source is kept.
    #[must_use]
    pub fn promote(self, incoming: Self) -> Self {
        match (self, incoming) {
            (_, Self::RoleChangePropagation) => self,
            (Self::Rule, incoming) => incoming,
            _ => self,
        }
    }
}

impl FromStr for AssignmentSource {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "ui" | "lcm" => Ok(Self::Ui),
            "rule" => Ok(Self::Rule),
            "task" => Ok(Self::Task),
            "batch" => Ok(Self::Batch),
            "lifecycle_event" | "identitylifecycleevent" => Ok(Self::LifecycleEvent),
            "role_change_propagation" | "rolechangepropagation" => Ok(Self::RoleChangePropagation),
            "workflow" => Ok(Self::Workflow),
            "unknown" => Ok(Self::Unknown),
            _ => Err(AppError::Validation(format!(
                "unknown assignment source '{value}'"
            ))),
        }
    }
}

/// Backend account that satisfies a role assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleTarget {
    /// Application name.
    pub application: String,
    /// Application instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    /// Native identity of the account.
    pub native_identity: String,
}

/// Changes carried by one role assignment request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentUpdate {
    /// Identity that asked for the change.
    pub assigner: Option<String>,
    /// Origin of the change.
    pub source: AssignmentSource,
    /// Whether the assignment becomes negative.
    pub negative: bool,
    /// Sunrise date.
    pub start_date: Option<DateTime<Utc>>,
    /// Sunset date.
    pub end_date: Option<DateTime<Utc>>,
    /// Free-text note.
    pub comments: Option<String>,
}

/// One instance of a role granted to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Stable correlation key.
    pub assignment_id: String,
    /// Role name.
    pub role_name: String,
    /// Identity that made the assignment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigner: Option<String>,
    /// Origin of the assignment.
    pub source: AssignmentSource,
    /// Negative assignments block the role instead of granting it.
    #[serde(default)]
    pub negative: bool,
    /// Sunrise date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// Sunset date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Accounts that satisfy the assignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<RoleTarget>,
    /// Permitted roles requested under this assignment.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permitted_roles: Vec<String>,
    /// Free-text note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// When the assignment was first recorded.
    pub assigned_at: DateTime<Utc>,
}

impl RoleAssignment {
    /// Creates a positive, immediately active assignment.
    #[must_use]
    pub fn new(assignment_id: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            assignment_id: assignment_id.into(),
            role_name: role_name.into(),
            assigner: None,
            source: AssignmentSource::Unknown,
            negative: false,
            start_date: None,
            end_date: None,
            targets: Vec::new(),
            permitted_roles: Vec::new(),
            comments: None,
            assigned_at: Utc::now(),
        }
    }

    /// Creates an assignment from a request.
    #[must_use]
    pub fn from_update(
        assignment_id: impl Into<String>,
        role_name: impl Into<String>,
        update: AssignmentUpdate,
    ) -> Self {
        let mut assignment = Self::new(assignment_id, role_name);
        assignment.source = update.source;
        assignment.apply(update);
        assignment
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_source(mut self, source: AssignmentSource) -> Self {
        self.source = source;
        self
    }

    /// Sets the sunrise date.
    #[must_use]
    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    /// Marks the assignment negative.
    #[must_use]
    pub fn negative(mut self) -> Self {
        self.negative = true;
        self
    }

    /// Adds a target account.
    #[must_use]
    pub fn with_target(mut self, target: RoleTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Refreshes the assignment from a new request.
    ///
    /// A negative assignment turns positive again on any request that is
    /// not itself negative, and then takes the request's source.
    pub fn refresh(&mut self, update: AssignmentUpdate) {
        if self.negative && !update.negative {
            if update.source != AssignmentSource::RoleChangePropagation {
                self.source = update.source;
            }
        } else {
            self.source = self.source.promote(update.source);
        }
        self.apply(update);
    }

    fn apply(&mut self, update: AssignmentUpdate) {
        self.negative = update.negative;
        if update.assigner.is_some() {
            self.assigner = update.assigner;
        }
        self.start_date = update.start_date;
        self.end_date = update.end_date;
        if update.comments.is_some() {
            self.comments = update.comments;
        }
    }

    /// Returns whether the assignment grants its role at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.negative && self.start_date.is_none_or(|start| start <= now)
    }

    /// Returns whether the assignment waits for a sunrise date.
    #[must_use]
    pub fn awaits_sunrise(&self, now: DateTime<Utc>) -> bool {
        self.start_date.is_some_and(|start| start > now)
    }

    /// Returns whether the id was generated for a not yet committed assignment.
    #[must_use]
    pub fn has_temporary_id(&self) -> bool {
        is_temporary_assignment_id(self.assignment_id.as_str())
    }
}

/// Authoritative role assignment metadata keyed by assignment id.
///
/// The plain assigned-role list is derived from the active entries, so the
/// two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<RoleAssignment>", into = "Vec<RoleAssignment>")]
pub struct RoleAssignmentIndex {
    entries: BTreeMap<String, RoleAssignment>,
}

impl RoleAssignmentIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of assignments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an assignment.
    pub fn insert(&mut self, assignment: RoleAssignment) {
        self.entries
            .insert(assignment.assignment_id.clone(), assignment);
    }

    /// Removes one assignment.
    pub fn remove(&mut self, assignment_id: &str) -> Option<RoleAssignment> {
        self.entries.remove(assignment_id)
    }

    /// Returns one assignment.
    #[must_use]
    pub fn get(&self, assignment_id: &str) -> Option<&RoleAssignment> {
        self.entries.get(assignment_id)
    }

    /// Returns one assignment for mutation.
    pub fn get_mut(&mut self, assignment_id: &str) -> Option<&mut RoleAssignment> {
        self.entries.get_mut(assignment_id)
    }

    /// Iterates all assignments.
    pub fn iter(&self) -> impl Iterator<Item = &RoleAssignment> {
        self.entries.values()
    }

    /// Iterates the assignments of one role.
    pub fn for_role<'a>(&'a self, role_name: &'a str) -> impl Iterator<Item = &'a RoleAssignment> {
        self.entries
            .values()
            .filter(move |assignment| assignment.role_name == role_name)
    }

    /// Returns the earliest recorded assignment of a role.
    ///
    /// Used when a request names a role without an assignment id. With
    /// several assignments of the same role the choice is arbitrary.
    #[must_use]
    pub fn first_for_role<'a>(&'a self, role_name: &str) -> Option<&'a RoleAssignment> {
        self.entries
            .values()
            .filter(|assignment| assignment.role_name == role_name)
            .min_by(|left, right| {
                left.assigned_at
                    .cmp(&right.assigned_at)
                    .then_with(|| left.assignment_id.cmp(&right.assignment_id))
            })
    }

    /// Removes every assignment of a role matching a predicate.
    pub fn remove_role_where(
        &mut self,
        role_name: &str,
        predicate: impl Fn(&RoleAssignment) -> bool,
    ) -> Vec<RoleAssignment> {
        let ids: Vec<String> = self
            .for_role(role_name)
            .filter(|assignment| predicate(assignment))
            .map(|assignment| assignment.assignment_id.clone())
            .collect();
        ids.iter()
            .filter_map(|assignment_id| self.entries.remove(assignment_id))
            .collect()
    }

    /// Returns the distinct roles with at least one active assignment.
    #[must_use]
    pub fn assigned_roles(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut roles: Vec<String> = self
            .entries
            .values()
            .filter(|assignment| assignment.is_active(now))
            .map(|assignment| assignment.role_name.clone())
            .collect();
        roles.sort();
        roles.dedup();
        roles
    }

    /// Returns whether a role is currently granted.
    #[must_use]
    pub fn has_active_role(&self, role_name: &str, now: DateTime<Utc>) -> bool {
        self.for_role(role_name)
            .any(|assignment| assignment.is_active(now))
    }

    /// Returns whether a role is blocked by a negative assignment.
    #[must_use]
    pub fn is_negated(&self, role_name: &str) -> bool {
        self.for_role(role_name).any(|assignment| assignment.negative)
    }

    /// Replaces temporary ids with permanent ones and returns the renames.
    pub fn commit_temporary_ids(&mut self) -> Vec<(String, String)> {
        let temporary: Vec<String> = self
            .entries
            .keys()
            .filter(|assignment_id| is_temporary_assignment_id(assignment_id))
            .cloned()
            .collect();

        let mut renames = Vec::with_capacity(temporary.len());
        for old_id in temporary {
            if let Some(mut assignment) = self.entries.remove(&old_id) {
                let new_id = AssignmentId::generate().to_string();
                assignment.assignment_id = new_id.clone();
                self.entries.insert(new_id.clone(), assignment);
                renames.push((old_id, new_id));
            }
        }
        renames
    }
}

impl From<Vec<RoleAssignment>> for RoleAssignmentIndex {
    fn from(assignments: Vec<RoleAssignment>) -> Self {
        let mut index = Self::new();
        for assignment in assignments {
            index.insert(assignment);
        }
        index
    }
}

impl From<RoleAssignmentIndex> for Vec<RoleAssignment> {
    fn from(index: RoleAssignmentIndex) -> Self {
        index.entries.into_values().collect()
    }
}
