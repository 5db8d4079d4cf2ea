use serde::ser::{Serialize, SerializeMap, Serializer};

/// Field name used as the identifying field when a target does not name one.
pub const DEFAULT_PRIMARY_FIELD: &str = "name";

/// One extracted entity, e.g. a staff member.
///
/// Fields keep their insertion order so that serialised output is stable and
/// reads the way the extractor produced it. Setting an existing field replaces
/// its value in place.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Value of `name`, or an empty string when the field is absent.
    pub fn value_or_empty(&self, name: &str) -> &str {
        self.get(name).unwrap_or("")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A record is retained only when its primary field holds non-blank text.
    pub fn has_identity(&self, primary_field: &str) -> bool {
        self.get(primary_field)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn has_email(&self) -> bool {
        !self.value_or_empty("email").trim().is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for RawRecord
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

impl Serialize for RawRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Splits `records` into those carrying the primary field and the number dropped.
pub fn retain_identified(records: Vec<RawRecord>, primary_field: &str) -> (Vec<RawRecord>, usize) {
    let before = records.len();
    let kept: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| r.has_identity(primary_field))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
