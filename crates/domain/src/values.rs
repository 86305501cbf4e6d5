use serde_json::Value;

/// Compares and combines request values, honoring application case rules.
///
/// A request value is either absent, one scalar, or a JSON array of
/// scalars. Helpers here treat all three shapes as an ordered list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueMatcher {
    case_insensitive: bool,
}

impl ValueMatcher {
    /// Creates a matcher for one application's comparison rules.
    #[must_use]
    pub fn new(case_insensitive: bool) -> Self {
        Self { case_insensitive }
    }

    /// Matcher with exact, case-sensitive comparisons.
    #[must_use]
    pub fn exact() -> Self {
        Self::new(false)
    }

    /// Returns whether string comparisons ignore case.
    #[must_use]
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    /// Compares two names (attributes or permission targets).
    #[must_use]
    pub fn names_match(&self, left: &str, right: &str) -> bool {
        if self.case_insensitive {
            left.eq_ignore_ascii_case(right)
        } else {
            left == right
        }
    }

    /// Compares two scalar values.
    #[must_use]
    pub fn values_equal(&self, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::String(left), Value::String(right)) => self.names_match(left, right),
            _ => left == right,
        }
    }

    /// Returns whether the list contains the scalar value.
    #[must_use]
    pub fn contains(&self, haystack: &[Value], needle: &Value) -> bool {
        haystack
            .iter()
            .any(|candidate| self.values_equal(candidate, needle))
    }

    /// Returns the values of `left` that also appear in `right`.
    #[must_use]
    pub fn intersection(&self, left: Option<&Value>, right: Option<&Value>) -> Vec<Value> {
        let right = to_list(right);
        to_list(left)
            .into_iter()
            .filter(|value| self.contains(right.as_slice(), value))
            .collect()
    }

    /// Removes every value in `removals` from `target` and returns what was removed.
    pub fn subtract(&self, target: &mut Option<Value>, removals: Option<&Value>) -> Vec<Value> {
        let removals = to_list(removals);
        if removals.is_empty() || target.is_none() {
            return Vec::new();
        }

        let was_list = matches!(target, Some(Value::Array(_)));
        let mut kept = Vec::new();
        let mut removed = Vec::new();
        for value in to_list(target.as_ref()) {
            if self.contains(removals.as_slice(), &value) {
                removed.push(value);
            } else {
                kept.push(value);
            }
        }

        if !removed.is_empty() {
            *target = from_list(kept, was_list);
        }
        removed
    }

    /// Keeps only the values of `target` that also appear in `allowed`.
    pub fn retain(&self, target: &mut Option<Value>, allowed: Option<&Value>) -> Vec<Value> {
        let allowed = to_list(allowed);
        let was_list = matches!(target, Some(Value::Array(_)));
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        for value in to_list(target.as_ref()) {
            if self.contains(allowed.as_slice(), &value) {
                kept.push(value);
            } else {
                dropped.push(value);
            }
        }

        if !dropped.is_empty() {
            *target = from_list(kept, was_list);
        }
        dropped
    }

    /// Adds every value in `additions` to `target`, skipping duplicates.
    ///
    /// The target becomes a list once anything is added to it.
    pub fn union(&self, target: &mut Option<Value>, additions: Option<&Value>) {
        let mut merged = to_list(target.as_ref());
        let before = merged.len();
        for value in to_list(additions) {
            if !self.contains(merged.as_slice(), &value) {
                merged.push(value);
            }
        }

        if merged.len() != before {
            *target = Some(Value::Array(merged));
        }
    }

    /// Compares two values as unordered sets.
    #[must_use]
    pub fn same_values(&self, left: Option<&Value>, right: Option<&Value>) -> bool {
        let left = to_list(left);
        let right = to_list(right);
        left.len() == right.len()
            && left
                .iter()
                .all(|value| self.contains(right.as_slice(), value))
            && right
                .iter()
                .all(|value| self.contains(left.as_slice(), value))
    }
}

/// Flattens a request value into its list form.
#[must_use]
pub fn to_list(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => values.clone(),
        Some(other) => vec![other.clone()],
    }
}

/// Rebuilds a request value from its list form.
///
/// An empty list collapses to `None`; a single value stays scalar unless
/// the original value was a list.
#[must_use]
pub fn from_list(values: Vec<Value>, keep_list: bool) -> Option<Value> {
    match values.len() {
        0 => None,
        1 if !keep_list => values.into_iter().next(),
        _ => Some(Value::Array(values)),
    }
}

/// Returns whether a request value carries nothing.
#[must_use]
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(values)) => values.is_empty(),
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Renders a scalar value as text for names and identifiers.
#[must_use]
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Renders every value as text, dropping nulls.
#[must_use]
pub fn values_as_text(value: Option<&Value>) -> Vec<String> {
    to_list(value).iter().filter_map(value_as_text).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ValueMatcher, from_list, is_empty_value, to_list};

    #[test]
    fn subtract_reports_removed_values_and_collapses_empty() {
        let matcher = ValueMatcher::exact();
        let mut target = Some(json!(["G1", "G2"]));

        let removed = matcher.subtract(&mut target, Some(&json!("G1")));
        assert_eq!(removed, vec![json!("G1")]);
        assert_eq!(target, Some(json!(["G2"])));

        matcher.subtract(&mut target, Some(&json!(["G2"])));
        assert_eq!(target, None);
    }

    #[test]
    fn case_insensitive_matching_ignores_case_for_strings_only() {
        let matcher = ValueMatcher::new(true);
        assert!(matcher.values_equal(&json!("Admins"), &json!("ADMINS")));
        assert!(!matcher.values_equal(&json!(1), &json!("1")));

        let mut target = Some(json!("Admins"));
        matcher.subtract(&mut target, Some(&json!(["admins"])));
        assert_eq!(target, None);
    }

    #[test]
    fn union_skips_duplicates_and_promotes_to_list() {
        let matcher = ValueMatcher::exact();
        let mut target = Some(json!("A"));
        matcher.union(&mut target, Some(&json!(["A", "B"])));
        assert_eq!(target, Some(json!(["A", "B"])));

        let mut empty = None;
        matcher.union(&mut empty, Some(&json!("C")));
        assert_eq!(empty, Some(json!(["C"])));
    }

    #[test]
    fn same_values_ignores_order() {
        let matcher = ValueMatcher::exact();
        assert!(matcher.same_values(Some(&json!(["A", "B"])), Some(&json!(["B", "A"]))));
        assert!(!matcher.same_values(Some(&json!(["A"])), Some(&json!(["A", "B"]))));
        assert!(matcher.same_values(None, Some(&json!([]))));
    }

    #[test]
    fn list_helpers_round_trip_shapes() {
        assert!(to_list(None).is_empty());
        assert_eq!(from_list(vec![json!("x")], false), Some(json!("x")));
        assert_eq!(from_list(vec![json!("x")], true), Some(json!(["x"])));
        assert!(is_empty_value(Some(&json!(""))));
        assert!(!is_empty_value(Some(&json!(false))));
    }
}
