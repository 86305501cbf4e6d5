use std::fmt::{Display, Formatter};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered set of correlation ids, persisted as one comma-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackingIds(Vec<String>);

impl TrackingIds {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a comma-joined value, ignoring blanks and duplicates.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let mut ids = Self::new();
        for id in value.split(',') {
            ids.insert(id);
        }
        ids
    }

    /// Creates a set holding one id.
    #[must_use]
    pub fn single(id: impl Into<String>) -> Self {
        let mut ids = Self::new();
        ids.insert(id.into().as_str());
        ids
    }

    /// Adds one id when it is not already present.
    pub fn insert(&mut self, id: &str) {
        let id = id.trim();
        if !id.is_empty() && !self.contains(id) {
            self.0.push(id.to_owned());
        }
    }

    /// Adds every id from another set.
    pub fn merge(&mut self, other: &Self) {
        for id in &other.0 {
            self.insert(id);
        }
    }

    /// Returns whether the set contains an id.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|existing| existing == id)
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates ids in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl Display for TrackingIds {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.join(",").as_str())
    }
}

impl Serialize for TrackingIds {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for TrackingIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        Ok(value.as_deref().map(Self::parse).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::TrackingIds;

    #[test]
    fn parse_skips_blanks_and_duplicates() {
        let ids = TrackingIds::parse("a, b,,a");
        assert_eq!(ids.to_string(), "a,b");
    }

    #[test]
    fn merge_keeps_insertion_order() {
        let mut ids = TrackingIds::single("1");
        ids.merge(&TrackingIds::parse("2,1,3"));
        assert_eq!(ids.iter().collect::<Vec<_>>(), vec!["1", "2", "3"]);
    }

    #[test]
    fn serializes_as_joined_string() -> Result<(), serde_json::Error> {
        let ids = TrackingIds::parse("x,y");
        let encoded = serde_json::to_string(&ids)?;
        assert_eq!(encoded, "\"x,y\"");

        let decoded: TrackingIds = serde_json::from_str("null")?;
        assert!(decoded.is_empty());
        Ok(())
    }
}
