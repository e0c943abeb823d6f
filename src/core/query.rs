//! Order-preserving query parameters with bracket notation for nesting.
//!
//! The upstream gateway rebuilds the query string from its parsed parameters
//! before verifying a signature, so the proxy has to produce the very same
//! string: keys in first-seen order, nested maps as `a[b]=..`, lists as
//! `a[0]=..&a[1]=..` ordered by index, and nothing escaped.
//!
//! Indices above [`LIST_INDEX_LIMIT`] are object keys, and a list that
//! receives a non-index key becomes a map keyed by its indices.
use std::fmt::Write;

/// Largest bracket index still treated as a list position.
pub const LIST_INDEX_LIMIT: usize = 20;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Scalar(String),
    /// Items keyed by the index they arrived with, kept sorted by that index.
    /// Gaps are closed when serializing.
    List(Vec<(usize, QueryValue)>),
    Map(QueryParams),
}

/// Ordered collection of top-level query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    entries: Vec<(String, QueryValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw (still percent-encoded) query string such as `a=1&filter[status]=active`.
    pub fn parse(raw: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            if key.is_empty() {
                continue;
            }
            let (root, segments) = split_key(&key);
            params.insert_path(root, &segments, value.into_owned());
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Append a scalar, turning repeated keys into a list.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.insert_path(&key.into(), &[], value.into());
    }

    /// Canonical form used in the signed message: nothing is escaped.
    pub fn to_canonical_string(&self) -> String {
        self.serialize(|s| s.to_string())
    }

    /// Form used on the wire: keys (brackets included) and values are percent-encoded.
    pub fn to_encoded_string(&self) -> String {
        self.serialize(|s| urlencoding::encode(s).into_owned())
    }

    fn serialize(&self, encode: impl Fn(&str) -> String) -> String {
        let mut pairs = Vec::new();
        for (key, value) in js_property_order(self.iter()) {
            collect_pairs(key.to_string(), value, &mut pairs);
        }

        let mut out = String::new();
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i > 0 {
                out.push('&');
            }
            let _ = write!(out, "{}={}", encode(key), encode(value));
        }
        out
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut QueryValue> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    fn insert_path(&mut self, key: &str, segments: &[String], value: String) {
        match self.entry_mut(key) {
            Some(existing) => insert_into(existing, segments, value),
            None => {
                let fresh = build_value(segments, value);
                self.entries.push((key.to_string(), fresh));
            }
        }
    }
}

/// Split `a[b][]` into `("a", ["b", ""])`. Text after the last bracket group
/// becomes one more segment.
fn split_key(key: &str) -> (&str, Vec<String>) {
    let Some(open) = key.find('[') else {
        return (key, Vec::new());
    };
    if open == 0 {
        return (key, Vec::new());
    }

    let (root, mut rest) = key.split_at(open);
    let mut segments = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        match stripped.find(']') {
            Some(close) => {
                segments.push(stripped[..close].to_string());
                rest = &stripped[close + 1..];
            }
            None => break,
        }
    }
    if !rest.is_empty() {
        segments.push(rest.to_string());
    }
    (root, segments)
}

/// How a bracket segment addresses a list.
enum Segment<'a> {
    /// `[]`
    Push,
    /// `[3]`
    Index(usize),
    /// `[name]`, or an index too large to be a list position
    Key(&'a str),
}

fn classify(segment: &str) -> Segment<'_> {
    if segment.is_empty() {
        return Segment::Push;
    }
    if segment.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(index) = segment.parse::<usize>() {
            if index <= LIST_INDEX_LIMIT {
                return Segment::Index(index);
            }
        }
    }
    Segment::Key(segment)
}

fn build_value(segments: &[String], value: String) -> QueryValue {
    match segments.split_first() {
        None => QueryValue::Scalar(value),
        Some((head, rest)) => match classify(head) {
            Segment::Push => QueryValue::List(vec![(0, build_value(rest, value))]),
            Segment::Index(index) => QueryValue::List(vec![(index, build_value(rest, value))]),
            Segment::Key(key) => {
                let mut map = QueryParams::new();
                map.entries.push((key.to_string(), build_value(rest, value)));
                QueryValue::Map(map)
            }
        },
    }
}

fn next_index(items: &[(usize, QueryValue)]) -> usize {
    items.last().map_or(0, |(index, _)| index + 1)
}

/// Combine a second value into an existing non-list one: `[previous, value]`.
fn combine(target: &mut QueryValue, value: QueryValue) {
    let previous = std::mem::replace(target, QueryValue::List(Vec::new()));
    *target = QueryValue::List(vec![(0, previous), (1, value)]);
}

/// Re-key a list as a map whose keys are the item indices.
fn list_to_map(items: Vec<(usize, QueryValue)>) -> QueryParams {
    QueryParams {
        entries: items
            .into_iter()
            .map(|(index, item)| (index.to_string(), item))
            .collect(),
    }
}

fn insert_into(target: &mut QueryValue, segments: &[String], value: String) {
    let Some((head, rest)) = segments.split_first() else {
        match target {
            QueryValue::List(items) => {
                let index = next_index(items);
                items.push((index, QueryValue::Scalar(value)));
            }
            other => combine(other, QueryValue::Scalar(value)),
        }
        return;
    };

    match target {
        QueryValue::List(items) => match classify(head) {
            Segment::Push => {
                let index = next_index(items);
                items.push((index, build_value(rest, value)));
            }
            Segment::Index(index) => match items.binary_search_by_key(&index, |(i, _)| *i) {
                Ok(pos) => insert_into(&mut items[pos].1, rest, value),
                Err(pos) => items.insert(pos, (index, build_value(rest, value))),
            },
            Segment::Key(key) => {
                let mut map = list_to_map(std::mem::take(items));
                map.insert_path(key, rest, value);
                *target = QueryValue::Map(map);
            }
        },
        QueryValue::Map(map) => {
            let key = if head.is_empty() {
                map.len().to_string()
            } else {
                head.clone()
            };
            map.insert_path(&key, rest, value);
        }
        other => combine(other, build_value(segments, value)),
    }
}

/// `key` as an array index (`0`, `17`, never `017`), the keys a JavaScript
/// object enumerates first and in ascending order.
pub(crate) fn array_index_key(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

/// Enumeration order of a JavaScript object: array-index keys ascending,
/// then every other key in insertion order.
pub(crate) fn js_property_order<'a, T>(
    entries: impl Iterator<Item = (&'a str, T)>,
) -> Vec<(&'a str, T)> {
    let (mut ordered, named): (Vec<_>, Vec<_>) =
        entries.partition(|(key, _)| array_index_key(key).is_some());
    ordered.sort_by_key(|(key, _)| array_index_key(key));
    ordered.extend(named);
    ordered
}

fn collect_pairs(prefix: String, value: &QueryValue, out: &mut Vec<(String, String)>) {
    match value {
        QueryValue::Scalar(s) => out.push((prefix, s.clone())),
        QueryValue::List(items) => {
            for (i, (_, item)) in items.iter().enumerate() {
                collect_pairs(format!("{prefix}[{i}]"), item, out);
            }
        }
        QueryValue::Map(map) => {
            for (key, item) in js_property_order(map.iter()) {
                collect_pairs(format!("{prefix}[{key}]"), item, out);
            }
        }
    }
}
