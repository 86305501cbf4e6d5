use super::*;
use crate::request::{GenericRequest, GenericRequestKind};
use crate::values::ValueMatcher;

#[derive(Debug, Default)]
struct NameSlots {
    name: String,
    set: Option<usize>,
    add: Option<usize>,
    remove: Option<usize>,
    revoke: Option<usize>,
    retained: Option<Value>,
}

/// Collapses a list of generic requests into at most one request per name
/// and operation.
///
/// Requests carrying arguments or dates pass through untouched. A `Set`
/// replaces earlier adds and removes of the same name and `Retain` only
/// protects values and is never emitted. `Revoke` strips its values from
/// earlier sets, adds and removes, while later adds and retains of the same
/// values take them back out of the revoke. The result is stable under a
/// second pass.
#[must_use]
pub fn simplify_requests(requests: Vec<GenericRequest>, matcher: ValueMatcher) -> Vec<GenericRequest> {
    let mut output: Vec<GenericRequest> = Vec::with_capacity(requests.len());
    let mut canonical: Vec<bool> = Vec::with_capacity(requests.len());
    let mut slots: Vec<NameSlots> = Vec::new();

    for mut request in requests {
        if !request.ok_to_simplify() {
            output.push(request);
            canonical.push(false);
            continue;
        }

        let position = match slots
            .iter()
            .position(|slot| matcher.names_match(slot.name.as_str(), request.name.as_str()))
        {
            Some(position) => position,
            None => {
                slots.push(NameSlots {
                    name: request.name.clone(),
                    ..NameSlots::default()
                });
                slots.len() - 1
            }
        };
        let slot = &mut slots[position];

        match request.operation {
            AttributeOperation::Set => {
                if let Some(index) = slot.set {
                    fold_into(&mut output[index], &request, matcher);
                } else {
                    for index in [slot.add, slot.remove].into_iter().flatten() {
                        output[index].value = None;
                    }
                    if let Some(index) = slot.revoke {
                        matcher.subtract(&mut request.value, output[index].value.as_ref());
                    }
                    slot.set = Some(push_canonical(&mut output, &mut canonical, request));
                }
            }
            AttributeOperation::Add => {
                subtract_slot(&mut output, slot.revoke, request.value.as_ref(), matcher);
                if let Some(index) = slot.set {
                    fold_into(&mut output[index], &request, matcher);
                } else {
                    subtract_slot(&mut output, slot.remove, request.value.as_ref(), matcher);
                    match slot.add {
                        Some(index) => fold_into(&mut output[index], &request, matcher),
                        None => {
                            slot.add = Some(push_canonical(&mut output, &mut canonical, request));
                        }
                    }
                }
            }
            AttributeOperation::Retain => {
                matcher.union(&mut slot.retained, request.value.as_ref());
                subtract_slot(&mut output, slot.revoke, request.value.as_ref(), matcher);
                if slot.set.is_none() {
                    subtract_slot(&mut output, slot.remove, request.value.as_ref(), matcher);
                }
            }
            AttributeOperation::Remove => {
                matcher.subtract(&mut request.value, slot.retained.as_ref());
                if let Some(index) = slot.set {
                    matcher.subtract(&mut output[index].value, request.value.as_ref());
                    output[index].tracking_ids.merge(&request.tracking_ids);
                } else {
                    subtract_slot(&mut output, slot.add, request.value.as_ref(), matcher);
                    if let Some(index) = slot.revoke {
                        matcher.subtract(&mut request.value, output[index].value.as_ref());
                    }
                    match slot.remove {
                        Some(index) => fold_into(&mut output[index], &request, matcher),
                        None => {
                            slot.remove = Some(push_canonical(&mut output, &mut canonical, request));
                        }
                    }
                }
            }
            AttributeOperation::Revoke => {
                matcher.subtract(&mut request.value, slot.retained.as_ref());
                for index in [slot.set, slot.add, slot.remove].into_iter().flatten() {
                    matcher.subtract(&mut output[index].value, request.value.as_ref());
                }
                match slot.revoke {
                    Some(index) => fold_into(&mut output[index], &request, matcher),
                    None => {
                        slot.revoke = Some(push_canonical(&mut output, &mut canonical, request));
                    }
                }
            }
        }
    }

    output
        .into_iter()
        .zip(canonical)
        .filter(|(request, canonical)| {
            !canonical || request.operation == AttributeOperation::Set || !request.has_empty_value()
        })
        .map(|(request, _)| request)
        .collect()
}

fn push_canonical(
    output: &mut Vec<GenericRequest>,
    canonical: &mut Vec<bool>,
    request: GenericRequest,
) -> usize {
    output.push(request);
    canonical.push(true);
    output.len() - 1
}

fn fold_into(target: &mut GenericRequest, source: &GenericRequest, matcher: ValueMatcher) {
    matcher.union(&mut target.value, source.value.as_ref());
    target.tracking_ids.merge(&source.tracking_ids);
}

fn subtract_slot(
    output: &mut [GenericRequest],
    slot: Option<usize>,
    values: Option<&Value>,
    matcher: ValueMatcher,
) {
    if let Some(index) = slot {
        matcher.subtract(&mut output[index].value, values);
    }
}

impl Plan {
    /// Simplifies the attribute and permission lists of every request.
    pub fn simplify(&mut self, matcher_for: impl Fn(&str) -> ValueMatcher) {
        for request in &mut self.requests {
            let matcher = matcher_for(request.application.as_str());
            for kind in [GenericRequestKind::Attribute, GenericRequestKind::Permission] {
                let generic = std::mem::take(request.generic_requests_mut(kind));
                *request.generic_requests_mut(kind) = simplify_requests(generic, matcher);
            }
        }
    }
}
