//! Dotted field paths and value-tree access.
//!
//! A path like `items.2.rawMaterialId` addresses a value inside a record.
//! Numeric segments address array elements; everything else is an object key.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{FieldsError, Result};

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// A parsed dotted path. The empty path addresses the whole record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<Segment>);

impl FieldPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn parse(s: &str) -> Self {
        Self(
            s.split('.')
                .filter(|part| !part.is_empty())
                .map(|part| match part.parse::<usize>() {
                    Ok(i) => Segment::Index(i),
                    Err(_) => Segment::Key(part.to_string()),
                })
                .collect(),
        )
    }

    pub fn from_segments(segments: &[Segment]) -> Self {
        Self(segments.to_vec())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append an object key
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Key(key.into()));
        next
    }

    /// Append an array index
    pub fn index(&self, index: usize) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Index(index));
        next
    }

    /// Append every segment of `other`
    pub fn join(&self, other: &FieldPath) -> Self {
        let mut next = self.clone();
        next.0.extend(other.0.iter().cloned());
        next
    }

    pub fn parent(&self) -> Option<FieldPath> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The segments after `prefix`, if `prefix` is a prefix of this path
    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<FieldPath> {
        self.starts_with(prefix)
            .then(|| Self(self.0[prefix.0.len()..].to_vec()))
    }

    /// Match against a pattern where `*` stands for any array index
    pub fn matches_pattern(&self, pattern: &str) -> bool {
        let parts: Vec<&str> = pattern.split('.').filter(|p| !p.is_empty()).collect();
        parts.len() == self.0.len()
            && parts.iter().zip(&self.0).all(|(part, seg)| match seg {
                Segment::Index(i) => *part == "*" || part.parse::<usize>() == Ok(*i),
                Segment::Key(k) => part == k,
            })
    }

    /// Re-address this path after element `removed` of the array at `array`
    /// was excised.
    ///
    /// Returns `None` when the path lived inside the removed element. Paths
    /// inside later elements move down by one; everything else is unchanged.
    pub fn shift_after_removal(&self, array: &FieldPath, removed: usize) -> Option<FieldPath> {
        let Some(rest) = self.strip_prefix(array) else {
            return Some(self.clone());
        };
        match rest.0.first() {
            Some(Segment::Index(i)) if *i == removed => None,
            Some(Segment::Index(i)) if *i > removed => {
                let mut shifted = self.clone();
                shifted.0[array.0.len()] = Segment::Index(i - 1);
                Some(shifted)
            }
            _ => Some(self.clone()),
        }
    }

    /// The array index directly below `array` on this path, if any
    pub fn index_under(&self, array: &FieldPath) -> Option<usize> {
        match self.strip_prefix(array)?.0.first() {
            Some(Segment::Index(i)) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Read the value at `path`. Numeric segments also address object keys
/// spelled as digits.
pub fn get<'a>(root: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments()
        .iter()
        .try_fold(root, |current, seg| match (seg, current) {
            (Segment::Key(k), Value::Object(map)) => map.get(k),
            (Segment::Index(i), Value::Array(items)) => items.get(*i),
            (Segment::Index(i), Value::Object(map)) => map.get(&i.to_string()),
            _ => None,
        })
}

/// Mutable access to the array at `path`, creating it when the slot is
/// missing or null.
pub fn array_mut<'a>(root: &'a mut Value, path: &FieldPath) -> Result<&'a mut Vec<Value>> {
    let slot = slot_mut(root, path)?;
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(FieldsError::PathConflict {
            path: path.to_string(),
            segment: path.last().map(ToString::to_string).unwrap_or_default(),
        }),
    }
}

/// Write `value` at `path`, creating missing intermediate objects.
///
/// Array elements must already exist: an index at or past the end is
/// `IndexOutOfRange`, never a padded array.
pub fn set(root: &mut Value, path: &FieldPath, value: Value) -> Result<()> {
    *slot_mut(root, path)? = value;
    Ok(())
}

fn slot_mut<'a>(root: &'a mut Value, path: &FieldPath) -> Result<&'a mut Value> {
    let mut current = root;
    for (depth, seg) in path.segments().iter().enumerate() {
        if current.is_null() {
            if let Segment::Index(index) = seg {
                return Err(FieldsError::IndexOutOfRange {
                    path: FieldPath::from_segments(&path.segments()[..depth]).to_string(),
                    index: *index,
                    len: 0,
                });
            }
            *current = Value::Object(Map::new());
        }
        current = match (seg, current) {
            (Segment::Key(k), Value::Object(map)) => map.entry(k.clone()).or_insert(Value::Null),
            (Segment::Index(i), Value::Array(items)) => {
                let len = items.len();
                match items.get_mut(*i) {
                    Some(item) => item,
                    None => {
                        return Err(FieldsError::IndexOutOfRange {
                            path: FieldPath::from_segments(&path.segments()[..depth]).to_string(),
                            index: *i,
                            len,
                        })
                    }
                }
            }
            (Segment::Index(i), Value::Object(map)) => {
                map.entry(i.to_string()).or_insert(Value::Null)
            }
            _ => {
                return Err(FieldsError::PathConflict {
                    path: path.to_string(),
                    segment: seg.to_string(),
                })
            }
        };
    }
    Ok(current)
}

/// Whether a value counts as "nothing entered": null, blank string, empty
/// array or empty object.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

/// Render a scalar as plain text; containers render as JSON.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn parse_and_display() {
        let path = FieldPath::parse("items.2.rawMaterialId");
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("items".into()),
                Segment::Index(2),
                Segment::Key("rawMaterialId".into())
            ]
        );
        assert_eq!(path.to_string(), "items.2.rawMaterialId");
        assert!(FieldPath::parse("").is_root());
    }

    #[test]
    fn get_nested_values() {
        let record = json!({"supplier": {"id": 7}, "items": [{"qty": 1}, {"qty": 4}]});
        assert_eq!(get(&record, &"supplier.id".into()), Some(&json!(7)));
        assert_eq!(get(&record, &"items.1.qty".into()), Some(&json!(4)));
        assert_eq!(get(&record, &"items.5.qty".into()), None);
        assert_eq!(get(&record, &FieldPath::root()), Some(&record));
    }

    #[test]
    fn set_creates_intermediates() {
        let mut record = json!({"items": [{"qty": 1}]});
        set(&mut record, &"supplier.address.city".into(), json!("Oslo")).unwrap();
        set(&mut record, &"items.0.unit".into(), json!("kg")).unwrap();
        assert_eq!(
            record,
            json!({"supplier": {"address": {"city": "Oslo"}}, "items": [{"qty": 1, "unit": "kg"}]})
        );
    }

    #[test]
    fn set_never_grows_arrays() {
        let mut record = json!({"items": [{"qty": 1}]});
        let err = set(&mut record, &"items.5.qty".into(), json!(3)).unwrap_err();
        assert!(matches!(
            err,
            FieldsError::IndexOutOfRange { ref path, index: 5, len: 1 } if path == "items"
        ));
        let err = set(&mut record, &"lines.0".into(), json!("x")).unwrap_err();
        assert!(matches!(err, FieldsError::IndexOutOfRange { index: 0, len: 0, .. }));
        assert_eq!(record["items"], json!([{"qty": 1}]));
    }

    #[test]
    fn set_through_scalar_is_conflict() {
        let mut record = json!({"name": "Steel"});
        let err = set(&mut record, &"name.first".into(), json!("x")).unwrap_err();
        assert!(matches!(err, FieldsError::PathConflict { .. }));
    }

    #[test]
    fn pattern_matching() {
        let path = FieldPath::parse("items.3.quantity");
        assert!(path.matches_pattern("items.*.quantity"));
        assert!(path.matches_pattern("items.3.quantity"));
        assert!(!path.matches_pattern("items.2.quantity"));
        assert!(!path.matches_pattern("items.*"));
        assert!(!FieldPath::parse("items.name.quantity").matches_pattern("items.*.quantity"));
    }

    #[test]
    fn shift_after_removal() {
        let array = FieldPath::parse("items");
        let removed = 1;
        assert_eq!(
            FieldPath::parse("items.0.qty").shift_after_removal(&array, removed),
            Some(FieldPath::parse("items.0.qty"))
        );
        assert_eq!(
            FieldPath::parse("items.1.qty").shift_after_removal(&array, removed),
            None
        );
        assert_eq!(
            FieldPath::parse("items.3.qty").shift_after_removal(&array, removed),
            Some(FieldPath::parse("items.2.qty"))
        );
        assert_eq!(
            FieldPath::parse("note").shift_after_removal(&array, removed),
            Some(FieldPath::parse("note"))
        );
    }

    #[test]
    fn blank_values() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&json!("  "))));
        assert!(is_blank(Some(&json!([]))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(!is_blank(Some(&json!(false))));
    }

    proptest! {
        #[test]
        fn shift_follows_vec_remove(len in 1usize..12, pick in 0usize..12) {
            let removed = pick % len;
            let array = FieldPath::parse("items");
            let mut model: Vec<usize> = (0..len).collect();
            model.remove(removed);

            for original in 0..len {
                let path = array.index(original).key("qty");
                let expected = model
                    .iter()
                    .position(|&item| item == original)
                    .map(|now| array.index(now).key("qty"));
                prop_assert_eq!(path.shift_after_removal(&array, removed), expected);
            }
        }

        #[test]
        fn parse_display_roundtrip(parts in proptest::collection::vec("[a-z]{1,6}|[0-9]{1,2}", 0..5)) {
            let text = parts.join(".");
            let path = FieldPath::parse(&text);
            prop_assert_eq!(FieldPath::parse(&path.to_string()), path);
        }
    }

    #[test]
    fn serde_as_string() {
        let path: FieldPath = serde_json::from_str("\"items.0.qty\"").unwrap();
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"items.0.qty\"");
    }
}
