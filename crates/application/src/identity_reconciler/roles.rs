use provisio_core::NEW_ASSIGNMENT_PLACEHOLDER;

use super::*;

/// Applies assignedRoles changes to the assignment index.
pub(super) fn assigned_roles(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    let roles = values_as_text(generic.value.as_ref());
    match generic.operation {
        AttributeOperation::Retain => return Ok(()),
        AttributeOperation::Set => set_roles(context, generic, &roles)?,
        AttributeOperation::Add => {
            for role in &roles {
                add_role(context, generic, role)?;
            }
        }
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            for role in &roles {
                remove_role(context, generic, role)?;
            }
        }
    }
    context.roles_changed = true;
    Ok(())
}

/// Applies detectedRoles edits. Targets are left to re-detection.
pub(super) fn detected_roles(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    let roles = values_as_text(generic.value.as_ref());
    let detected = &mut context.identity.detected_roles;
    match generic.operation {
        AttributeOperation::Add => {
            for role in roles {
                if !detected.iter().any(|detection| detection.role_name == role) {
                    detected.push(RoleDetection {
                        role_name: role,
                        targets: Vec::new(),
                    });
                }
            }
        }
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            detected.retain(|detection| !roles.contains(&detection.role_name));
        }
        AttributeOperation::Set => {
            detected.retain(|detection| roles.contains(&detection.role_name));
            for role in roles {
                if !detected.iter().any(|detection| detection.role_name == role) {
                    detected.push(RoleDetection {
                        role_name: role,
                        targets: Vec::new(),
                    });
                }
            }
        }
        AttributeOperation::Retain => {}
    }
    Ok(())
}

fn assignment_update(
    context: &ReconcileContext<'_>,
    generic: &GenericRequest,
    negative: bool,
) -> AppResult<AssignmentUpdate> {
    let source = generic
        .argument_str(arguments::SOURCE)
        .map_or(AssignmentSource::Unknown, AssignmentSource::from_argument);
    let assigner = generic
        .argument_str(arguments::ASSIGNER)
        .map(str::to_owned)
        .unwrap_or_else(|| context.requester.name().to_owned());

    Ok(AssignmentUpdate {
        assigner: Some(assigner),
        source,
        negative,
        start_date: generic.add_date,
        end_date: generic.remove_date,
        comments: generic
            .argument_str(arguments::ASSIGNMENT_NOTE)
            .map(str::to_owned),
    })
}

/// Existing assignment a change refers to: its own id, else the first for the role.
fn target_assignment_id(
    context: &ReconcileContext<'_>,
    generic: &GenericRequest,
    role: &str,
) -> Option<String> {
    let index = &context.identity.role_assignments;
    generic
        .assignment_id
        .as_deref()
        .filter(|assignment_id| *assignment_id != NEW_ASSIGNMENT_PLACEHOLDER)
        .filter(|assignment_id| {
            index
                .get(assignment_id)
                .is_some_and(|assignment| assignment.role_name == role)
        })
        .map(str::to_owned)
        .or_else(|| {
            index
                .first_for_role(role)
                .map(|assignment| assignment.assignment_id.clone())
        })
}

fn add_role(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
    role: &str,
) -> AppResult<()> {
    let update = assignment_update(context, generic, false)?;
    let assignment_id = match target_assignment_id(context, generic, role) {
        Some(assignment_id) => {
            if let Some(existing) = context.identity.role_assignments.get_mut(&assignment_id) {
                existing.refresh(update);
            }
            assignment_id
        }
        None => {
            let assignment_id = generic
                .assignment_id
                .clone()
                .filter(|assignment_id| {
                    assignment_id != NEW_ASSIGNMENT_PLACEHOLDER
                        && context.identity.role_assignments.get(assignment_id).is_none()
                })
                .unwrap_or_else(|| AssignmentId::temporary(role).to_string());
            context
                .identity
                .role_assignments
                .insert(RoleAssignment::from_update(
                    assignment_id.as_str(),
                    role,
                    update,
                ));
            assignment_id
        }
    };

    let cleared = context
        .identity
        .role_assignments
        .remove_role_where(role, |assignment| {
            assignment.negative && assignment.assignment_id != assignment_id
        });
    if !cleared.is_empty() {
        debug!(role, cleared = cleared.len(), "cleared negative assignments");
    }

    let name = context.identity.name.clone();
    context.audit(
        ProvisioningAuditEvent::new(ProvisioningAuditKind::RoleAssigned, name)
            .with_attribute(ASSIGNED_ROLES, Some(Value::String(role.to_owned())))
            .with_detail(assignment_id),
    );
    Ok(())
}

fn remove_role(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
    role: &str,
) -> AppResult<()> {
    let negative =
        generic.operation == AttributeOperation::Revoke || generic.flag(arguments::NEGATIVE_ASSIGNMENT);
    let existing = target_assignment_id(context, generic, role);

    if let Some(remove_date) = generic.remove_date.filter(|date| *date > context.now) {
        if let Some(assignment) = existing
            .as_deref()
            .and_then(|assignment_id| context.identity.role_assignments.get_mut(assignment_id))
        {
            assignment.end_date = Some(remove_date);
        }
        return Ok(());
    }

    let removed_id = if negative {
        let mut update = assignment_update(context, generic, true)?;
        update.end_date = None;
        match existing {
            Some(assignment_id) => {
                if let Some(assignment) = context.identity.role_assignments.get_mut(&assignment_id) {
                    assignment.refresh(update);
                }
                Some(assignment_id)
            }
            None => {
                let assignment_id = AssignmentId::temporary(role).to_string();
                context
                    .identity
                    .role_assignments
                    .insert(RoleAssignment::from_update(
                        assignment_id.as_str(),
                        role,
                        update,
                    ));
                Some(assignment_id)
            }
        }
    } else {
        existing.and_then(|assignment_id| {
            context
                .identity
                .role_assignments
                .remove(assignment_id.as_str())
                .map(|assignment| assignment.assignment_id)
        })
    };

    let Some(removed_id) = removed_id else {
        debug!(role, "no assignment to remove");
        return Ok(());
    };
    let name = context.identity.name.clone();
    context.audit(
        ProvisioningAuditEvent::new(ProvisioningAuditKind::RoleRemoved, name)
            .with_attribute(ASSIGNED_ROLES, Some(Value::String(role.to_owned())))
            .with_detail(removed_id),
    );
    Ok(())
}

/// Replaces the assigned role list, keeping metadata of roles that stay.
fn set_roles(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
    roles: &[String],
) -> AppResult<()> {
    let now = context.now;
    let stale: Vec<String> = context
        .identity
        .role_assignments
        .iter()
        .filter(|assignment| assignment.is_active(now) && !roles.contains(&assignment.role_name))
        .map(|assignment| assignment.role_name.clone())
        .collect();
    let mut removal = generic.clone();
    removal.operation = AttributeOperation::Remove;
    removal.assignment_id = None;
    removal.remove_date = None;
    for role in stale {
        remove_role(context, &removal, role.as_str())?;
    }

    for role in roles {
        if !context.identity.role_assignments.has_active_role(role, now) {
            add_role(context, generic, role)?;
        }
    }
    Ok(())
}
