//! Resource declarations and attribute values
//!
//! A declaration is a typed, named bag of attributes. Attribute values may
//! contain references to other resources, written `${kind.name.attribute}`
//! in string form. References become edges in the resource graph and are
//! resolved to concrete values (usually ARNs) once their target exists.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static KIND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));
static ATTRIBUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

/// Attribute map of a resource.
pub type Attributes = BTreeMap<String, Value>;

/// Identity of a declared resource: its kind plus a name unique within the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Parse `kind.name`, validating both halves.
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let (kind, name) = text
            .split_once('.')
            .ok_or_else(|| invalid("expected kind.name"))?;

        if !KIND_RE.is_match(kind) {
            return Err(invalid("kind must be lowercase snake_case"));
        }
        if !NAME_RE.is_match(name) {
            return Err(invalid("name may only contain letters, digits, '_' and '-'"));
        }

        Ok(Self::new(kind, name))
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ResourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// A reference from one resource's attribute to another resource's attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    pub target: ResourceId,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parse the body of `${...}`: `kind.name.attribute`.
    pub fn parse(text: &str) -> Result<Self> {
        let (id, attribute) = text.rsplit_once('.').ok_or_else(|| Error::InvalidReference {
            text: text.to_string(),
            reason: "expected kind.name.attribute".to_string(),
        })?;

        let target = ResourceId::parse(id).map_err(|_| Error::InvalidReference {
            text: text.to_string(),
            reason: "expected kind.name.attribute".to_string(),
        })?;

        if !ATTRIBUTE_RE.is_match(attribute) {
            return Err(Error::InvalidReference {
                text: text.to_string(),
                reason: format!("invalid attribute name '{}'", attribute),
            });
        }

        Ok(Self::new(target, attribute))
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.target, self.attribute)
    }
}

/// Piece of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Literal(String),
    Ref(Reference),
}

/// An attribute value.
///
/// Maps are ordered so structural comparison and hashing are deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A whole-value reference; resolves to the target attribute as-is
    Ref(Reference),
    /// A string with embedded references
    Template(Vec<Segment>),
}

impl Value {
    /// Parse a string, turning `${kind.name.attribute}` into references.
    ///
    /// `$${` escapes a literal `${`.
    pub fn parse_string(text: &str) -> Result<Self> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut literal = String::new();
        let mut rest = text;

        while let Some(pos) = rest.find("${") {
            if pos > 0 && rest[..pos].ends_with('$') {
                literal.push_str(&rest[..pos - 1]);
                literal.push_str("${");
                rest = &rest[pos + 2..];
                continue;
            }

            literal.push_str(&rest[..pos]);
            let body_start = pos + 2;
            let end = rest[body_start..]
                .find('}')
                .ok_or_else(|| Error::InvalidReference {
                    text: text.to_string(),
                    reason: "unterminated ${".to_string(),
                })?;
            let reference = Reference::parse(rest[body_start..body_start + end].trim())?;

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Ref(reference));
            rest = &rest[body_start + end + 1..];
        }
        literal.push_str(rest);

        if segments.is_empty() {
            return Ok(Value::String(literal));
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        if let [Segment::Ref(reference)] = segments.as_slice() {
            return Ok(Value::Ref(reference.clone()));
        }
        Ok(Value::Template(segments))
    }

    /// Convert from JSON, parsing references out of strings.
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Ok(match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::parse_string(&s)?,
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<_>>()?,
            ),
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| Ok((k, Value::from_json(v)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }

    /// Convert JSON reported by a control plane, keeping `${` literal.
    pub fn from_plain_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_plain_json).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from_plain_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON, writing references back in `${...}` form.
    ///
    /// Literal `${` in strings is escaped so the output parses back to the
    /// same value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.replace("${", "$${")),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            Value::Ref(reference) => serde_json::Value::String(reference.to_string()),
            Value::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => out.push_str(&s.replace("${", "$${")),
                        Segment::Ref(r) => out.push_str(&r.to_string()),
                    }
                }
                serde_json::Value::String(out)
            }
        }
    }

    /// Convert a fully resolved value to plain JSON for a control plane.
    ///
    /// Returns `None` if the value still contains references.
    pub fn to_plain_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(Value::to_plain_json)
                    .collect::<Option<_>>()?,
            ),
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Some((k.clone(), v.to_plain_json()?)))
                    .collect::<Option<_>>()?,
            ),
            Value::Ref(_) | Value::Template(_) => return None,
        })
    }

    /// Every reference contained in this value, depth first.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            Value::Ref(r) => out.push(r),
            Value::Template(segments) => {
                for segment in segments {
                    if let Segment::Ref(r) = segment {
                        out.push(r);
                    }
                }
            }
            Value::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Value::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            _ => {}
        }
    }

    /// Substitute references using `lookup`.
    ///
    /// Returns `None` when any reference is not yet known.
    pub fn resolve<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        Some(match self {
            Value::Ref(r) => lookup(r)?,
            Value::Template(segments) => {
                let mut out = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(s) => out.push_str(s),
                        Segment::Ref(r) => out.push_str(&lookup(r)?.to_display_string()),
                    }
                }
                Value::String(out)
            }
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| v.resolve(lookup))
                    .collect::<Option<_>>()?,
            ),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Some((k.clone(), v.resolve(lookup)?)))
                    .collect::<Option<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// String form used when interpolating into a template.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
            other => other.to_json().to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_json(json).map_err(serde::de::Error::custom)
    }
}

/// A declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub id: ResourceId,
    #[serde(default)]
    pub attributes: Attributes,
    /// Ordering-only dependencies (no value flows along these edges)
    #[serde(default)]
    pub depends_on: Vec<ResourceId>,
}

impl ResourceDecl {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            attributes: Attributes::new(),
            depends_on: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(attribute.into(), value.into());
        self
    }

    /// Builder-style ordering dependency.
    pub fn after(mut self, id: ResourceId) -> Self {
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }

    /// All references made by this resource's attributes.
    pub fn references(&self) -> Vec<&Reference> {
        self.attributes
            .values()
            .flat_map(Value::references)
            .collect()
    }

    /// Ids this resource depends on, in first-mention order, without duplicates.
    pub fn dependency_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = Vec::new();
        let referenced = self.references().into_iter().map(|r| &r.target);
        for id in referenced.chain(self.depends_on.iter()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}
