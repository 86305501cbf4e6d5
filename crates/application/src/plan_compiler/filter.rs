use super::*;

/// Drops requests for applications outside the requested scope.
pub(super) fn scope(project: &mut Project) {
    if project.options.scope.is_empty() {
        return;
    }

    let options = project.options.clone();
    let mut dropped = 0_usize;
    for plan in backend_plans_mut(project) {
        let before = plan.requests.len();
        plan.requests
            .retain(|request| options.in_scope(request.application.as_str()));
        dropped += before - plan.requests.len();
    }
    if dropped > 0 {
        debug!(identity = %project.identity_name, dropped, "dropped out-of-scope requests");
    }
}

/// Removes retains once merging no longer needs them.
pub(super) fn filter_retains(project: &mut Project) {
    for plan in backend_plans_mut(project) {
        for request in &mut plan.requests {
            for kind in GENERIC_KINDS {
                request
                    .generic_requests_mut(kind)
                    .retain(|generic| generic.operation != AttributeOperation::Retain);
            }
        }
    }
}

/// Drops changes the identity's accounts and record already reflect.
///
/// Requests still waiting for an account selection are left alone, and a
/// creation compares against an empty account.
pub(super) fn filter(project: &mut Project, context: &CompileContext) {
    let mut filtered = Vec::new();

    for plan in backend_plans_mut(project) {
        for request in &mut plan.requests {
            if request.kind != RequestKind::Account {
                continue;
            }
            let link = if request.is_create() {
                None
            } else {
                let Some(native_identity) = request.native_identity.as_deref() else {
                    continue;
                };
                let Some(link) = context.identity.find_link(
                    request.application.as_str(),
                    request.instance.as_deref(),
                    native_identity,
                ) else {
                    continue;
                };
                Some(link)
            };

            let key = request.key();
            let matcher = context.matcher(request.application.as_str());
            for kind in GENERIC_KINDS {
                let generics = request.generic_requests_mut(kind);
                filter_against_account(generics, link, matcher, &key, kind, &mut filtered);
                drop_duplicates(generics, matcher);
            }
        }
    }

    if let Some(plan) = project.identity_plan.as_mut() {
        for request in &mut plan.requests {
            let key = request.key();
            request.attribute_requests.retain(|generic| {
                let unchanged = generic.operation == AttributeOperation::Set
                    && !is_reserved_attribute(generic.name.as_str())
                    && !generic.is_deferred()
                    && ValueMatcher::exact().same_values(
                        generic.value.as_ref(),
                        context.identity.attribute(generic.name.as_str()),
                    );
                if unchanged {
                    filtered.push(FilteredValue::new(
                        &key,
                        GenericRequestKind::Attribute,
                        generic,
                        to_list(generic.value.as_ref()),
                        FilterReason::Exists,
                    ));
                }
                !unchanged
            });
        }
    }

    project.log_filtered(filtered);
}

fn filter_against_account(
    generics: &mut Vec<GenericRequest>,
    link: Option<&Link>,
    matcher: ValueMatcher,
    key: &RequestKey,
    kind: GenericRequestKind,
    filtered: &mut Vec<FilteredValue>,
) {
    generics.retain_mut(|generic| {
        let current = link.and_then(|link| link.attribute(generic.name.as_str()));
        let (dropped, reason) = match generic.operation {
            AttributeOperation::Add | AttributeOperation::Retain => {
                (matcher.subtract(&mut generic.value, current), FilterReason::Exists)
            }
            AttributeOperation::Remove | AttributeOperation::Revoke => {
                (matcher.retain(&mut generic.value, current), FilterReason::DoesNotExist)
            }
            AttributeOperation::Set => {
                if link.is_some() && matcher.same_values(generic.value.as_ref(), current) {
                    filtered.push(FilteredValue::new(
                        key,
                        kind,
                        generic,
                        to_list(generic.value.as_ref()),
                        FilterReason::Exists,
                    ));
                    return false;
                }
                (Vec::new(), FilterReason::Exists)
            }
        };
        if !dropped.is_empty() {
            filtered.push(FilteredValue::new(key, kind, generic, dropped, reason));
        }
        true
    });
}

/// Drops a change repeating the previous change of the same name.
///
/// The dropped change's tracking ids move to the one that is kept.
fn drop_duplicates(generics: &mut Vec<GenericRequest>, matcher: ValueMatcher) {
    let mut kept: Vec<GenericRequest> = Vec::with_capacity(generics.len());
    for generic in std::mem::take(generics) {
        let previous = kept
            .iter_mut()
            .rev()
            .find(|existing| matcher.names_match(existing.name.as_str(), generic.name.as_str()));
        if let Some(previous) = previous {
            if previous.operation == generic.operation
                && previous.assignment_id == generic.assignment_id
                && previous.add_date == generic.add_date
                && previous.remove_date == generic.remove_date
                && matcher.same_values(previous.value.as_ref(), generic.value.as_ref())
            {
                previous.tracking_ids.merge(&generic.tracking_ids);
                continue;
            }
        }
        kept.push(generic);
    }
    *generics = kept;
}

/// Removes generic requests left empty and plans left without requests.
pub(super) fn cleanup(project: &mut Project) {
    for plan in project.all_plans_mut() {
        plan.cleanup();
    }

    project.plans.retain(|plan| !plan.is_empty());
    if project.identity_plan.as_ref().is_some_and(Plan::is_empty) {
        project.identity_plan = None;
    }
    if project.unmanaged_plan.as_ref().is_some_and(Plan::is_empty) {
        project.unmanaged_plan = None;
    }
}

impl PlanCompiler {
    /// Subtracts changes an earlier, still unconfirmed provisioning already sent.
    ///
    /// Non-modify requests repeating a pending operation are marked cleanable.
    pub(super) async fn filter_pending_requests(
        &self,
        project: &mut Project,
        context: &CompileContext,
    ) -> AppResult<()> {
        let Some(repository) = self.pending_requests.as_ref() else {
            return Ok(());
        };

        let records: Vec<PendingRequest> = repository
            .list_pending_requests(project.identity_name.as_str())
            .await?
            .into_iter()
            .filter(|record| !record.is_expired(context.now))
            .collect();
        if records.is_empty() {
            return Ok(());
        }

        let mut sent = Plan::new();
        for record in &records {
            for request in &record.plan.requests {
                let mut copy = request.empty_copy();
                if !PendingRequest::counts_as_pending(
                    record
                        .plan
                        .effective_result(request, None)
                        .map(|result| result.status),
                ) {
                    copy.operation = None;
                }
                for (kind, generic) in request.all_generic_requests() {
                    let status = record
                        .plan
                        .effective_result(request, Some(generic))
                        .map(|result| result.status);
                    if PendingRequest::counts_as_pending(status) {
                        copy.generic_requests_mut(kind).push(generic.clone());
                    }
                }
                let matcher = context.matcher(request.application.as_str());
                // Values dropped while folding earlier sends are irrelevant here.
                let _dropped = sent.assimilate(&copy, matcher);
            }
        }

        let mut filtered = Vec::new();
        for plan in backend_plans_mut(project) {
            for request in &mut plan.requests {
                let Some(previous) = sent.find_request(&request.key()) else {
                    continue;
                };
                let key = request.key();
                let matcher = context.matcher(request.application.as_str());

                for kind in GENERIC_KINDS {
                    let earlier = previous.generic_requests(kind);
                    request.generic_requests_mut(kind).retain_mut(|generic| {
                        let operation = generic.operation;
                        let name = generic.name.clone();
                        for old in earlier.iter().filter(|old| {
                            old.operation == operation
                                && matcher.names_match(old.name.as_str(), name.as_str())
                        }) {
                            if operation == AttributeOperation::Set {
                                if matcher.same_values(old.value.as_ref(), generic.value.as_ref()) {
                                    filtered.push(FilteredValue::new(
                                        &key,
                                        kind,
                                        generic,
                                        to_list(generic.value.as_ref()),
                                        FilterReason::Requested,
                                    ));
                                    return false;
                                }
                                continue;
                            }
                            let dropped = matcher.subtract(&mut generic.value, old.value.as_ref());
                            if !dropped.is_empty() {
                                filtered.push(FilteredValue::new(
                                    &key,
                                    kind,
                                    generic,
                                    dropped,
                                    FilterReason::Requested,
                                ));
                            }
                        }
                        true
                    });
                }

                if request.effective_operation() != AccountOperation::Modify
                    && previous.operation == request.operation
                {
                    request.cleanable = true;
                }
            }
        }

        if !filtered.is_empty() {
            info!(
                identity = %project.identity_name,
                filtered = filtered.len(),
                "filtered pending changes"
            );
        }
        project.log_filtered(filtered);
        Ok(())
    }
}
