use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity_attributes::is_identity_application;
use crate::operation::{AccountOperation, AttributeOperation};
use crate::request::{AbstractRequest, GenericRequest, RequestKey, RequestKind};
use crate::result::ProvisioningResult;
use crate::tracking::TrackingIds;

mod merge;
mod simplify;

pub use simplify::simplify_requests;

/// Named bag of account and object requests.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Integration that executes this plan; absent for master, identity and unmanaged plans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_integration: Option<String>,
    /// Subject identity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_name: Option<String>,
    /// Account and object requests in arrival order.
    #[serde(default)]
    pub requests: Vec<AbstractRequest>,
    /// Free-form plan arguments.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub arguments: Map<String, Value>,
    /// Names of the requesters.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requesters: Vec<String>,
    /// Origin of the plan (UI, task, rule and so on).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Plan-level correlation ids.
    #[serde(default, skip_serializing_if = "TrackingIds::is_empty")]
    pub tracking_ids: TrackingIds,
    /// Plan-level result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProvisioningResult>,
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty plan executed by one integration.
    #[must_use]
    pub fn for_integration(integration: impl Into<String>) -> Self {
        Self {
            target_integration: Some(integration.into()),
            ..Self::default()
        }
    }

    /// Sets the subject identity name.
    #[must_use]
    pub fn with_identity_name(mut self, identity_name: impl Into<String>) -> Self {
        self.identity_name = Some(identity_name.into());
        self
    }

    /// Appends one request.
    #[must_use]
    pub fn with_request(mut self, request: AbstractRequest) -> Self {
        self.requests.push(request);
        self
    }

    /// Adds a plan argument.
    #[must_use]
    pub fn with_argument(mut self, name: &str, value: Value) -> Self {
        self.arguments.insert(name.to_owned(), value);
        self
    }

    /// Appends a request without merging.
    pub fn add_request(&mut self, request: AbstractRequest) {
        self.requests.push(request);
    }

    /// Returns the request targeting the keyed entity.
    #[must_use]
    pub fn find_request(&self, key: &RequestKey) -> Option<&AbstractRequest> {
        self.requests.iter().find(|request| request.matches(key))
    }

    /// Returns the request targeting the keyed entity for mutation.
    pub fn find_request_mut(&mut self, key: &RequestKey) -> Option<&mut AbstractRequest> {
        self.requests.iter_mut().find(|request| request.matches(key))
    }

    /// Iterates account requests.
    pub fn account_requests(&self) -> impl Iterator<Item = &AbstractRequest> {
        self.requests
            .iter()
            .filter(|request| request.kind == RequestKind::Account)
    }

    /// Returns the first account request addressing the identity record.
    #[must_use]
    pub fn identity_request(&self) -> Option<&AbstractRequest> {
        self.account_requests()
            .find(|request| is_identity_application(request.application.as_str()))
    }

    /// Returns whether the plan holds no requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Returns whether every request of the plan lacks children and operations.
    #[must_use]
    pub fn has_no_effect(&self) -> bool {
        self.requests.iter().all(|request| {
            request.has_no_children() && request.effective_operation() == AccountOperation::Modify
        })
    }

    /// Returns whether any request of this plan serves the tracking id.
    #[must_use]
    pub fn has_tracking_id(&self, tracking_id: &str) -> bool {
        self.tracking_ids.contains(tracking_id)
            || self.requests.iter().any(|request| {
                request.tracking_ids.contains(tracking_id)
                    || request
                        .all_generic_requests()
                        .any(|(_, generic)| generic.tracking_ids.contains(tracking_id))
            })
    }

    /// Returns the result governing a request, falling back to its parents.
    #[must_use]
    pub fn effective_result<'a>(
        &'a self,
        request: &'a AbstractRequest,
        generic: Option<&'a GenericRequest>,
    ) -> Option<&'a ProvisioningResult> {
        generic
            .and_then(|generic| generic.result.as_ref())
            .or(request.result.as_ref())
            .or(self.result.as_ref())
    }

    /// Removes empty generic requests and empty modify requests.
    ///
    /// A `Set` with no value stays because it clears the attribute.
    /// Returns whether anything was removed.
    pub fn cleanup(&mut self) -> bool {
        let before = self.count_entries();
        for request in &mut self.requests {
            request.attribute_requests.retain(keeps_effect);
            request.permission_requests.retain(keeps_effect);
        }
        self.requests.retain(|request| {
            !(request.has_no_children()
                && (request.effective_operation() == AccountOperation::Modify || request.cleanable))
        });
        before != self.count_entries()
    }

    fn count_entries(&self) -> usize {
        self.requests
            .iter()
            .map(|request| 1 + request.attribute_requests.len() + request.permission_requests.len())
            .sum()
    }
}

fn keeps_effect(generic: &GenericRequest) -> bool {
    generic.operation == AttributeOperation::Set || !generic.has_empty_value()
}
