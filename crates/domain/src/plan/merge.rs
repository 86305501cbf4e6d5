use super::*;
use crate::operation::AttributeOperation;
use crate::provenance::{FilterReason, FilteredValue};
use crate::request::{GenericRequest, GenericRequestKind, arguments};
use crate::values::ValueMatcher;

impl Plan {
    /// Merges one request into this plan without taking ownership of it.
    ///
    /// A request for an entity not yet in the plan is copied in; otherwise
    /// its operation, tracking ids, assignment ids, arguments and children
    /// are folded into the existing request. Dated changes are only kept
    /// for the identity record. Returns the values dropped while merging.
    pub fn assimilate(
        &mut self,
        source: &AbstractRequest,
        matcher: ValueMatcher,
    ) -> Vec<FilteredValue> {
        let key = source.key();
        let index = match self.requests.iter().position(|request| request.matches(&key)) {
            Some(index) => {
                let destination = &mut self.requests[index];
                if let Some(winner) =
                    AccountOperation::reconcile(destination.operation, source.operation)
                {
                    destination.operation = Some(winner);
                    if !source.tracking_ids.is_empty() {
                        destination.tracking_ids = source.tracking_ids.clone();
                    }
                } else {
                    destination.tracking_ids.merge(&source.tracking_ids);
                }
                for assignment_id in &source.assignment_ids {
                    destination.add_assignment_id(assignment_id);
                }
                index
            }
            None => {
                self.requests.push(source.empty_copy());
                self.requests.len() - 1
            }
        };

        let destination = &mut self.requests[index];
        for (name, value) in &source.arguments {
            destination.arguments.insert(name.clone(), value.clone());
        }

        let keep_dated = is_identity_application(source.application.as_str());
        let mut filtered = Vec::new();
        for (kind, generic) in source.all_generic_requests() {
            if generic.is_deferred() && !keep_dated {
                continue;
            }
            filtered.extend(destination.assimilate_generic(kind, generic.clone(), matcher));
        }
        filtered
    }

    /// Merges every request of another plan into this one.
    pub fn assimilate_plan(&mut self, source: &Plan, matcher: ValueMatcher) -> Vec<FilteredValue> {
        source
            .requests
            .iter()
            .flat_map(|request| self.assimilate(request, matcher))
            .collect::<Vec<_>>()
    }
}

impl AbstractRequest {
    /// Merges one attribute or permission change into this request.
    ///
    /// Same-name requests are adjusted in place and the new request is
    /// always appended so per-request tracking ids survive:
    /// an earlier `Retain` strips its values from a later subtraction
    /// (unless the subtraction prefers to win), a `Set` clears earlier
    /// values, and opposite polarities cancel the overlap on the earlier
    /// request.
    pub fn assimilate_generic(
        &mut self,
        kind: GenericRequestKind,
        mut source: GenericRequest,
        matcher: ValueMatcher,
    ) -> Vec<FilteredValue> {
        let key = self.key();
        let source_subtracts = source.operation.is_subtractive();
        let prefer_remove = source.flag(arguments::PREFER_REMOVE_OVER_RETAIN);
        let mut filtered = Vec::new();

        for existing in self.generic_requests_mut(kind).iter_mut() {
            if !matcher.names_match(source.name.as_str(), existing.name.as_str()) {
                continue;
            }

            if existing.operation == AttributeOperation::Retain {
                if !source_subtracts {
                    continue;
                }
                if prefer_remove {
                    matcher.subtract(&mut existing.value, source.value.as_ref());
                } else {
                    let protected = matcher.subtract(&mut source.value, existing.value.as_ref());
                    if !protected.is_empty() {
                        filtered.push(FilteredValue::new(
                            &key,
                            kind,
                            &source,
                            protected,
                            FilterReason::Dependency,
                        ));
                    }
                }
            } else if source.operation == AttributeOperation::Set {
                existing.value = None;
            } else if source_subtracts != existing.operation.is_subtractive() {
                let cancelled = matcher.subtract(&mut existing.value, source.value.as_ref());
                if !cancelled.is_empty() {
                    let reason = if source_subtracts {
                        FilterReason::DoesNotExist
                    } else {
                        FilterReason::Dependency
                    };
                    filtered.push(FilteredValue::new(&key, kind, existing, cancelled, reason));
                }
            }
        }

        self.generic_requests_mut(kind).push(source);
        filtered
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use provisio_core::AppResult;
    use serde_json::{Value, json};

    use crate::operation::{AccountOperation, AttributeOperation};
    use crate::plan::Plan;
    use crate::provenance::FilterReason;
    use crate::request::{AbstractRequest, GenericRequest, GenericRequestKind, arguments};
    use crate::values::ValueMatcher;

    fn account(operation: Option<AccountOperation>) -> AppResult<AbstractRequest> {
        let request = AbstractRequest::account("AD")?.with_native_identity("jane");
        Ok(match operation {
            Some(operation) => request.with_operation(operation),
            None => request,
        })
    }

    fn groups(operation: AttributeOperation, value: serde_json::Value) -> GenericRequest {
        GenericRequest::new("groups", operation, Some(value))
    }

    #[test]
    fn new_entity_is_copied_in() -> AppResult<()> {
        let mut plan = Plan::new();
        let source = account(None)?.with_attribute(groups(AttributeOperation::Add, json!("G1")));

        plan.assimilate(&source, ValueMatcher::exact());

        assert_eq!(plan.requests.len(), 1);
        assert_eq!(plan.requests[0].attribute_requests[0].value, Some(json!("G1")));
        Ok(())
    }

    #[test]
    fn retain_protects_values_from_later_removal() -> AppResult<()> {
        let mut plan = Plan::new();
        plan.assimilate(
            &account(None)?.with_attribute(groups(AttributeOperation::Retain, json!(["G1"]))),
            ValueMatcher::exact(),
        );

        let filtered = plan.assimilate(
            &account(None)?.with_attribute(groups(AttributeOperation::Remove, json!(["G1", "G2"]))),
            ValueMatcher::exact(),
        );

        let requests = &plan.requests[0].attribute_requests;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].value, Some(json!(["G2"])));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].reason, FilterReason::Dependency);
        Ok(())
    }

    #[test]
    fn prefer_remove_flag_lets_removal_beat_retain() -> AppResult<()> {
        let mut plan = Plan::new();
        plan.assimilate(
            &account(None)?.with_attribute(groups(AttributeOperation::Retain, json!(["G1"]))),
            ValueMatcher::exact(),
        );
        plan.assimilate(
            &account(None)?.with_attribute(
                groups(AttributeOperation::Remove, json!(["G1"]))
                    .with_argument(arguments::PREFER_REMOVE_OVER_RETAIN, json!(true)),
            ),
            ValueMatcher::exact(),
        );

        let requests = &plan.requests[0].attribute_requests;
        assert_eq!(requests[0].value, None);
        assert_eq!(requests[1].value, Some(json!(["G1"])));
        Ok(())
    }

    #[test]
    fn later_add_cancels_earlier_remove_of_same_value() -> AppResult<()> {
        let mut plan = Plan::new();
        plan.assimilate(
            &account(None)?.with_attribute(groups(AttributeOperation::Remove, json!(["G1", "G2"]))),
            ValueMatcher::exact(),
        );
        let filtered = plan.assimilate(
            &account(None)?.with_attribute(groups(AttributeOperation::Add, json!("G1"))),
            ValueMatcher::exact(),
        );

        let requests = &plan.requests[0].attribute_requests;
        assert_eq!(requests[0].value, Some(json!(["G2"])));
        assert_eq!(requests[1].value, Some(json!("G1")));
        assert_eq!(filtered[0].reason, FilterReason::Dependency);
        Ok(())
    }

    #[test]
    fn set_clears_earlier_values_but_keeps_history() -> AppResult<()> {
        let mut plan = Plan::new();
        plan.assimilate(
            &account(None)?
                .with_attribute(groups(AttributeOperation::Add, json!("A")))
                .with_attribute(groups(AttributeOperation::Add, json!("B")))
                .with_attribute(groups(AttributeOperation::Set, json!("C"))),
            ValueMatcher::exact(),
        );

        let requests = &plan.requests[0].attribute_requests;
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0].value, None);
        assert_eq!(requests[1].value, None);
        assert_eq!(requests[2].value, Some(json!("C")));
        Ok(())
    }

    #[test]
    fn operation_change_moves_tracking_id_to_winner() -> AppResult<()> {
        let mut plan = Plan::new();
        plan.assimilate(&account(None)?.with_tracking_id("first"), ValueMatcher::exact());
        plan.assimilate(
            &account(Some(AccountOperation::Delete))?.with_tracking_id("second"),
            ValueMatcher::exact(),
        );
        plan.assimilate(&account(None)?.with_tracking_id("third"), ValueMatcher::exact());

        let request = &plan.requests[0];
        assert_eq!(request.operation, Some(AccountOperation::Delete));
        assert_eq!(request.tracking_ids.to_string(), "second,third");
        Ok(())
    }

    #[test]
    fn dated_backend_changes_are_not_merged() -> AppResult<()> {
        let mut plan = Plan::new();
        let dated = groups(AttributeOperation::Add, json!("G1")).with_add_date(chrono::Utc::now());
        plan.assimilate(&account(None)?.with_attribute(dated), ValueMatcher::exact());

        assert!(plan.requests[0].attribute_requests.is_empty());
        Ok(())
    }

    #[test]
    fn names_follow_case_rules() -> AppResult<()> {
        let mut request = account(None)?.with_attribute(groups(AttributeOperation::Add, json!("G1")));
        request.assimilate_generic(
            GenericRequestKind::Attribute,
            GenericRequest::new("GROUPS", AttributeOperation::Remove, Some(json!("g1"))),
            ValueMatcher::new(true),
        );

        assert_eq!(request.attribute_requests[0].value, None);
        Ok(())
    }

    fn generic_strategy() -> impl Strategy<Value = GenericRequest> {
        (
            prop::sample::select(vec!["groups", "roles"]),
            prop_oneof![
                Just(AttributeOperation::Add),
                Just(AttributeOperation::Remove),
                Just(AttributeOperation::Set),
                Just(AttributeOperation::Retain),
                Just(AttributeOperation::Revoke),
            ],
            prop::sample::subsequence(vec!["x", "y", "z"], 1..=3),
        )
            .prop_map(|(name, operation, values)| {
                let values: Vec<Value> = values.into_iter().map(Value::from).collect();
                GenericRequest::new(name, operation, Some(Value::Array(values)))
            })
    }

    fn merged_and_simplified(source: &AbstractRequest, times: usize) -> Plan {
        let mut plan = Plan::new();
        for _ in 0..times {
            plan.assimilate(source, ValueMatcher::exact());
        }
        plan.simplify(|_| ValueMatcher::exact());
        plan
    }

    proptest! {
        #[test]
        fn assimilating_twice_matches_assimilating_once(
            generics in prop::collection::vec(generic_strategy(), 0..8)
        ) {
            let mut source = AbstractRequest::account("AD")
                .map_err(|error| TestCaseError::fail(error.to_string()))?
                .with_native_identity("jane");
            source.attribute_requests = generics;

            let once = merged_and_simplified(&source, 1);
            let twice = merged_and_simplified(&source, 2);

            let matcher = ValueMatcher::exact();
            let once_requests = &once.requests[0].attribute_requests;
            let twice_requests = &twice.requests[0].attribute_requests;
            prop_assert_eq!(once_requests.len(), twice_requests.len());
            for request in once_requests {
                let found = twice_requests.iter().any(|other| {
                    other.name == request.name
                        && other.operation == request.operation
                        && matcher.same_values(other.value.as_ref(), request.value.as_ref())
                });
                prop_assert!(found);
            }
        }
    }
}
