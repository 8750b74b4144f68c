//! Coordinate addressing for the knowledge graph
//!
//! A coordinate is a `#`-prefixed path of segments joined by `-`, e.g.
//! `#2-1-3`. Upstream data also writes a `.` variant (`#2.1.3`, and mixed
//! forms such as `#4.0-1`). Every comparison in this crate runs on the
//! normalized form, so `#4.0` and `#4-0` address the same node.
//!
//! The functions here are pure and total over arbitrary strings. The
//! [`Coordinate`] newtype normalizes on construction (and on
//! deserialization), so code holding a `Coordinate` never has to think
//! about notation again.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// The coordinate of the hierarchy root.
pub const ROOT: &str = "#";

const SEPARATOR: char = '-';

fn mention_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#[0-5](?:[-.][0-5])*").expect("static regex"))
}

fn exact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#(?:[0-5](?:[-.][0-5])*)?$").expect("static regex"))
}

fn root_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#[0-5]?$").expect("static regex"))
}

/// Replace every `.` with `-` (surrounding whitespace is dropped too).
pub fn normalize(coord: &str) -> String {
    coord.trim().replace('.', "-")
}

fn segments_of(normalized: &str) -> Vec<&str> {
    let body = normalized.strip_prefix('#').unwrap_or(normalized);
    if body.is_empty() {
        Vec::new()
    } else {
        body.split(SEPARATOR).collect()
    }
}

/// Number of segments after normalization. The root has depth 0.
pub fn depth(coord: &str) -> usize {
    segments_of(&normalize(coord)).len()
}

/// Parent of a coordinate.
///
/// `"#"` has no parent, a single-segment coordinate's parent is `"#"`,
/// otherwise the parent is every segment but the last. Strings without a
/// leading `#` or with an empty segment have no parent, which keeps
/// `is_child(c, parent(c))` true whenever a parent exists.
pub fn parent(coord: &str) -> Option<String> {
    let normalized = normalize(coord);
    if !normalized.starts_with('#') {
        return None;
    }
    let segments = segments_of(&normalized);
    if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    match normalized.rfind(SEPARATOR) {
        Some(pos) => Some(normalized[..pos].to_string()),
        None => Some(ROOT.to_string()),
    }
}

/// True iff `a` sits exactly one level below `b`.
///
/// Top-level coordinates (`#0`..`#5`) are children of the root `#` even
/// though they do not start with `"#-"`.
pub fn is_child(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    if a == b || depth(&a) != depth(&b) + 1 {
        return false;
    }
    if b == ROOT {
        return a.starts_with('#');
    }
    a.strip_prefix(b.as_str())
        .is_some_and(|rest| rest.starts_with(SEPARATOR))
}

/// True for `#` itself and for `#` followed by one digit `0`-`5`.
pub fn is_root_coordinate(coord: &str) -> bool {
    root_pattern().is_match(coord.trim())
}

/// Every coordinate mentioned in `text`, normalized, in order of first
/// appearance and without duplicates.
pub fn find_coordinates(text: &str) -> Vec<Coordinate> {
    let mut found: Vec<Coordinate> = Vec::new();
    for m in mention_pattern().find_iter(text) {
        let coordinate = Coordinate::new(m.as_str());
        if !found.contains(&coordinate) {
            found.push(coordinate);
        }
    }
    found
}

/// `text` as a coordinate when the whole trimmed string is one.
///
/// Unlike [`first_coordinate`], surrounding words or trailing
/// out-of-range segments (`#4-0-9`) reject the value.
pub fn parse_coordinate(text: &str) -> Option<Coordinate> {
    let text = text.trim();
    exact_pattern().is_match(text).then(|| Coordinate::new(text))
}

/// The first coordinate mentioned in `text`, if any.
pub fn first_coordinate(text: &str) -> Option<Coordinate> {
    mention_pattern()
        .find(text)
        .map(|m| Coordinate::new(m.as_str()))
}

/// A normalized coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Coordinate(String);

impl Coordinate {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    pub fn root() -> Self {
        Self(ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT
    }

    pub fn depth(&self) -> usize {
        segments_of(&self.0).len()
    }

    pub fn segments(&self) -> Vec<&str> {
        segments_of(&self.0)
    }

    pub fn parent(&self) -> Option<Coordinate> {
        parent(&self.0).map(Coordinate)
    }

    /// True iff `self` is exactly one level below `other`.
    pub fn is_child_of(&self, other: &Coordinate) -> bool {
        is_child(&self.0, &other.0)
    }

    pub fn is_parent_of(&self, other: &Coordinate) -> bool {
        is_child(&other.0, &self.0)
    }

    /// True iff both coordinates share the same parent and differ.
    pub fn is_sibling_of(&self, other: &Coordinate) -> bool {
        self != other && self.parent().is_some() && self.parent() == other.parent()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Coordinate {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Coordinate {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Coordinate {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<Coordinate> for String {
    fn from(c: Coordinate) -> Self {
        c.0
    }
}

/// Hierarchy tree keyed by coordinate segment.
///
/// Intermediate levels that have no node of their own are still present
/// (with `node_id == None`) so the tree always mirrors the coordinate
/// arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hierarchy {
    pub coordinate: Coordinate,
    pub node_id: Option<String>,
    pub name: Option<String>,
    pub children: BTreeMap<String, Hierarchy>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::new()
    }
}

impl Hierarchy {
    /// An empty tree rooted at `#`.
    pub fn new() -> Self {
        Self::at(Coordinate::root())
    }

    fn at(coordinate: Coordinate) -> Self {
        Self {
            coordinate,
            node_id: None,
            name: None,
            children: BTreeMap::new(),
        }
    }

    /// Attach a node at `coordinate`, creating intermediate levels.
    ///
    /// The first node inserted at a coordinate keeps the slot.
    pub fn insert(&mut self, coordinate: &Coordinate, node_id: &str, name: &str) {
        let mut cursor = self;
        let mut path = String::from(ROOT);
        for (i, segment) in coordinate.segments().into_iter().enumerate() {
            if i > 0 {
                path.push(SEPARATOR);
            }
            path.push_str(segment);
            cursor = cursor
                .children
                .entry(segment.to_string())
                .or_insert_with(|| Hierarchy::at(Coordinate(path.clone())));
        }
        if cursor.node_id.is_none() {
            cursor.node_id = Some(node_id.to_string());
            cursor.name = Some(name.to_string());
        }
    }

    pub fn find(&self, coordinate: &Coordinate) -> Option<&Hierarchy> {
        let mut cursor = self;
        for segment in coordinate.segments() {
            cursor = cursor.children.get(segment)?;
        }
        Some(cursor)
    }

    /// Copy of the tree cut off below `max_depth` levels.
    pub fn slice(&self, max_depth: usize) -> Hierarchy {
        let mut copy = Hierarchy {
            coordinate: self.coordinate.clone(),
            node_id: self.node_id.clone(),
            name: self.name.clone(),
            children: BTreeMap::new(),
        };
        if max_depth > 0 {
            for (segment, child) in &self.children {
                copy.children
                    .insert(segment.clone(), child.slice(max_depth - 1));
            }
        }
        copy
    }

    /// Pre-order walk, the root first.
    pub fn walk(&self) -> Vec<&Hierarchy> {
        let mut out = vec![self];
        for child in self.children.values() {
            out.extend(child.walk());
        }
        out
    }

    /// Number of levels below this entry.
    pub fn height(&self) -> usize {
        self.children
            .values()
            .map(|c| c.height() + 1)
            .max()
            .unwrap_or(0)
    }
}
