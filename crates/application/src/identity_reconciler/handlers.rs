use super::*;

fn apply_list(list: &mut Vec<String>, generic: &GenericRequest) {
    let values = values_as_text(generic.value.as_ref());
    match generic.operation {
        AttributeOperation::Add => {
            for value in values {
                if !list.contains(&value) {
                    list.push(value);
                }
            }
        }
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            list.retain(|existing| !values.contains(existing));
        }
        AttributeOperation::Set => *list = values,
        AttributeOperation::Retain => {}
    }
}

fn is_clearing(generic: &GenericRequest) -> bool {
    matches!(
        generic.operation,
        AttributeOperation::Remove | AttributeOperation::Revoke
    ) || generic.value.is_none()
}

fn flag_value(generic: &GenericRequest) -> bool {
    if is_clearing(generic) {
        return false;
    }
    match generic.value.as_ref() {
        Some(Value::Bool(flag)) => *flag,
        Some(other) => value_as_text(other).is_some_and(|text| text.eq_ignore_ascii_case("true")),
        None => false,
    }
}

fn text_value(generic: &GenericRequest) -> Option<String> {
    if is_clearing(generic) {
        return None;
    }
    generic
        .value
        .as_ref()
        .and_then(value_as_text)
        .filter(|text| !text.is_empty())
}

pub(super) fn capabilities(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    apply_list(&mut context.identity.capabilities, generic);
    Ok(())
}

pub(super) fn controlled_scopes(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    apply_list(&mut context.identity.controlled_scopes, generic);
    Ok(())
}

pub(super) fn workgroups(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    apply_list(&mut context.identity.workgroups, generic);
    Ok(())
}

pub(super) fn assigned_scope(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation == AttributeOperation::Retain {
        return Ok(());
    }
    if is_clearing(generic) {
        let removed = generic.value.as_ref().and_then(value_as_text);
        if removed.is_none() || removed == context.identity.assigned_scope {
            context.identity.assigned_scope = None;
        }
        return Ok(());
    }
    context.identity.assigned_scope = text_value(generic);
    Ok(())
}

pub(super) fn controls_assigned_scope(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.controls_assigned_scope = flag_value(generic);
    }
    Ok(())
}

/// Stores a new password after the optional history check.
///
/// An empty password is ignored. The stored value is encrypted and the
/// history keeps hashes only.
pub(super) fn password(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation == AttributeOperation::Retain || is_clearing(generic) {
        return Ok(());
    }
    let Some(supplied) = text_value(generic) else {
        debug!(identity = %context.identity.name, "ignoring empty password");
        return Ok(());
    };
    let cipher = context
        .secret_cipher
        .ok_or_else(|| AppError::Dependency("no secret cipher configured".to_owned()))?;
    let plaintext = if generic.flag(arguments::SECRET) {
        cipher.decrypt(supplied.as_str())?
    } else {
        supplied
    };

    if generic.flag(arguments::CHECK_POLICY) && !context.requester.is_password_admin() {
        if let Some(hasher) = context.password_hasher {
            if hasher
                .find_in_history(plaintext.as_str(), &context.identity.password_history)?
                .is_some()
            {
                return Err(AppError::Validation(
                    "password was used recently".to_owned(),
                ));
            }
        }
    }

    context.identity.password = Some(cipher.encrypt(plaintext.as_str())?);
    if let Some(hasher) = context.password_hasher {
        hasher.record_in_history(
            plaintext.as_str(),
            &mut context.identity.password_history,
            context.password_history_length,
        )?;
    }

    let name = context.identity.name.clone();
    context.audit(
        ProvisioningAuditEvent::new(ProvisioningAuditKind::PasswordChanged, name)
            .with_attribute(PASSWORD, None),
    );
    Ok(())
}

pub(super) fn activity_config(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.activity_config = if is_clearing(generic) {
            None
        } else {
            generic.value.clone()
        };
    }
    Ok(())
}

fn clear_named(list: &mut Vec<String>, generic: &GenericRequest) {
    if !is_clearing(generic) && generic.operation != AttributeOperation::Set {
        debug!(attribute = %generic.name, "only removals apply to this attribute");
        return;
    }
    let named = values_as_text(generic.value.as_ref());
    if generic.operation == AttributeOperation::Set {
        list.retain(|existing| named.contains(existing));
    } else {
        list.retain(|existing| !named.contains(existing));
    }
}

pub(super) fn archives(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    clear_named(&mut context.identity.archives, generic);
    Ok(())
}

pub(super) fn snapshots(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    clear_named(&mut context.identity.snapshots, generic);
    Ok(())
}

pub(super) fn events(context: &mut ReconcileContext<'_>, generic: &GenericRequest) -> AppResult<()> {
    clear_named(&mut context.identity.events, generic);
    Ok(())
}

pub(super) fn provisioning_requests(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    clear_named(&mut context.identity.provisioning_requests, generic);
    Ok(())
}

/// Removes links named by `{application, instance, nativeIdentity}` values.
pub(super) fn links(context: &mut ReconcileContext<'_>, generic: &GenericRequest) -> AppResult<()> {
    if !matches!(
        generic.operation,
        AttributeOperation::Remove | AttributeOperation::Revoke
    ) {
        debug!(identity = %context.identity.name, "links are only removed through the identity plan");
        return Ok(());
    }
    for value in to_list(generic.value.as_ref()) {
        let Some(application) = value.get("application").and_then(Value::as_str) else {
            warn!(value = %value, "link removal without application");
            continue;
        };
        let Some(native_identity) = value.get("nativeIdentity").and_then(Value::as_str) else {
            warn!(value = %value, "link removal without native identity");
            continue;
        };
        let instance = value.get("instance").and_then(Value::as_str);
        if context
            .identity
            .remove_link(application, instance, native_identity)
            .is_none()
        {
            debug!(application, native_identity, "link already gone");
        }
    }
    Ok(())
}

/// Forwarding settings live in the preferences map.
pub(super) fn preference(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation == AttributeOperation::Retain {
        return Ok(());
    }
    if is_clearing(generic) {
        context.identity.preferences.remove(generic.name.as_str());
    } else if let Some(value) = generic.value.clone() {
        context
            .identity
            .preferences
            .insert(generic.name.clone(), value);
    }
    Ok(())
}

pub(super) fn use_by(context: &mut ReconcileContext<'_>, generic: &GenericRequest) -> AppResult<()> {
    if generic.operation == AttributeOperation::Retain {
        return Ok(());
    }
    context.identity.use_by = match text_value(generic) {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(text.as_str())
                .map_err(|error| AppError::Validation(format!("invalid useBy date '{text}': {error}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };
    Ok(())
}

pub(super) fn protected(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.protected = flag_value(generic);
    }
    Ok(())
}

pub(super) fn manager(context: &mut ReconcileContext<'_>, generic: &GenericRequest) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.manager = text_value(generic);
    }
    Ok(())
}

pub(super) fn needs_refresh(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.needs_refresh = flag_value(generic);
    }
    Ok(())
}

pub(super) fn identity_type(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    if generic.operation != AttributeOperation::Retain {
        context.identity.identity_type = text_value(generic);
    }
    Ok(())
}

/// Any attribute without a dedicated handler.
pub(super) fn extended_attribute(
    context: &mut ReconcileContext<'_>,
    generic: &GenericRequest,
) -> AppResult<()> {
    let matcher = ValueMatcher::exact();
    let attributes = &mut context.identity.attributes;
    let mut current = attributes.get(generic.name.as_str()).cloned();
    match generic.operation {
        AttributeOperation::Retain => return Ok(()),
        AttributeOperation::Set => current = generic.value.clone(),
        AttributeOperation::Add => {
            matcher.union(&mut current, generic.value.as_ref());
        }
        AttributeOperation::Remove | AttributeOperation::Revoke => {
            if generic.value.is_none() {
                current = None;
            } else {
                let _ = matcher.subtract(&mut current, generic.value.as_ref());
            }
        }
    }

    match current {
        Some(value) if !is_empty_value(Some(&value)) => {
            attributes.insert(generic.name.clone(), value);
        }
        _ => {
            attributes.remove(generic.name.as_str());
        }
    }
    Ok(())
}
