use super::*;

/// Drops sunrise and sunset dates that are already due.
///
/// With `ignoreStartDate` every sunrise date is dropped.
pub(super) fn preclean(master: &mut Plan, options: &CompilerOptions, now: DateTime<Utc>) {
    let ignore_start = options.is_enabled(CompilerOption::IgnoreStartDate);
    for request in &mut master.requests {
        for kind in GENERIC_KINDS {
            for generic in request.generic_requests_mut(kind) {
                if ignore_start || generic.add_date.is_some_and(|date| date <= now) {
                    generic.add_date = None;
                }
                if generic.remove_date.is_some_and(|date| date <= now) {
                    generic.remove_date = None;
                }
            }
        }
    }
}

/// Rewrites assignment ids before partitioning.
///
/// Every `new` placeholder on an identity request becomes its own fresh id.
/// Placeholders elsewhere name no assignment yet and are cleared, temporary
/// ids of an earlier compilation are cleared, and role removals naming an
/// unknown assignment lose their id.
pub(super) fn normalize_assignment_ids(master: &mut Plan, identity: &Identity) {
    for request in &mut master.requests {
        let identity_request = is_identity_application(request.application.as_str());
        for kind in GENERIC_KINDS {
            for generic in request.generic_requests_mut(kind) {
                let replacement = match generic.assignment_id.as_deref() {
                    Some(NEW_ASSIGNMENT_PLACEHOLDER) if identity_request => {
                        Some(Some(AssignmentId::generate().to_string()))
                    }
                    Some(NEW_ASSIGNMENT_PLACEHOLDER) => Some(None),
                    Some(id) if is_temporary_assignment_id(id) => Some(None),
                    Some(id)
                        if identity_request
                            && generic.name == ASSIGNED_ROLES
                            && generic.operation.is_subtractive()
                            && identity.role_assignments.get(id).is_none() =>
                    {
                        Some(None)
                    }
                    _ => None,
                };
                if let Some(replacement) = replacement {
                    generic.assignment_id = replacement;
                }
            }
        }

        request.assignment_ids.retain(|id| {
            id != NEW_ASSIGNMENT_PLACEHOLDER && !is_temporary_assignment_id(id.as_str())
        });
    }
}
