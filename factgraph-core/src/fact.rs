//! Facts, references and content addressing.
//!
//! A [`Fact`] is an immutable record: a type tag, a map of scalar fields,
//! and a map of named predecessor lists. Two facts with identical canonical
//! form are the same fact -- a fact has no identity beyond its content.

use crate::error::FactError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use time::macros::format_description;
use time::OffsetDateTime;

/// ISO-8601 UTC with fixed millisecond precision -- the one canonical date
/// rendering, independent of the value's own offset or subsecond precision.
const CANONICAL_DATE_FORMAT: &[time::format_description::FormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");

/// A blake3 digest over a fact's canonical serialization.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex encoding of the digest, used as the wire and storage key form.
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl From<blake3::Hash> for Hash {
    fn from(h: blake3::Hash) -> Self {
        Self(*h.as_bytes())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[0..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("expected a 32 byte hash"))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A `(type, hash)` pair that uniquely names a fact.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// The fact's declared type.
    pub fact_type: String,
    /// The digest of the fact's canonical serialization.
    pub hash: Hash,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.fact_type, self.hash)
    }
}

/// A scalar value held by one of a fact's fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FieldValue {
    /// A UTF-8 string.
    String(String),
    /// An IEEE-754 double. Integral field values round-trip through this too.
    Number(f64),
    /// A boolean.
    Bool(bool),
    /// An instant, encoded canonically as ISO-8601 UTC with millisecond precision.
    Date(OffsetDateTime),
}

impl FieldValue {
    /// Renders this value into the canonical `{"type": .., "value": ..}` shape.
    /// Field order is fixed (not alphabetical) so it round-trips unambiguously
    /// regardless of how the surrounding object preserves key order.
    fn to_canonical_value(&self) -> serde_json::Value {
        let (tag, value) = match self {
            FieldValue::String(s) => ("string", serde_json::Value::String(s.clone())),
            FieldValue::Number(n) => ("number", serde_json::json!(n)),
            FieldValue::Bool(b) => ("bool", serde_json::Value::Bool(*b)),
            FieldValue::Date(dt) => (
                "date",
                serde_json::Value::String(
                    dt.to_offset(time::UtcOffset::UTC)
                        .format(CANONICAL_DATE_FORMAT)
                        .expect("fixed millisecond UTC formatting never fails"),
                ),
            ),
        };
        let mut map = serde_json::Map::new();
        map.insert("type".to_owned(), serde_json::Value::String(tag.to_owned()));
        map.insert("value".to_owned(), value);
        serde_json::Value::Object(map)
    }
}

/// An immutable record naming zero or more predecessors by reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Fact {
    /// The fact's stable textual type tag.
    pub fact_type: String,
    /// Scalar fields, keyed by field name.
    pub fields: BTreeMap<String, FieldValue>,
    /// Predecessor lists, keyed by role name. Order within a role is
    /// significant and preserved verbatim in the canonical form.
    pub predecessors: BTreeMap<String, Vec<Reference>>,
}

impl Fact {
    /// Builds a fact with no fields or predecessors.
    pub fn new(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: fact_type.into(),
            fields: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    /// Adds a scalar field, returning `self` for chaining during construction.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Adds a predecessor role, returning `self` for chaining during construction.
    pub fn with_predecessors(mut self, role: impl Into<String>, refs: Vec<Reference>) -> Self {
        self.predecessors.insert(role.into(), refs);
        self
    }
}

/// Checks the constraints `canonicalize` relies on: a non-empty type, and
/// non-empty field/role names. Field *values* are already well-typed by
/// construction (`FieldValue` has no "unsupported type" variant to reject).
fn validate(fact: &Fact) -> Result<(), FactError> {
    if fact.fact_type.is_empty() {
        return Err(FactError::InvalidFact {
            reason: "fact type must not be empty".to_owned(),
        });
    }
    for name in fact.fields.keys() {
        if name.is_empty() {
            return Err(FactError::InvalidFact {
                reason: "field name must not be empty".to_owned(),
            });
        }
    }
    for (role, refs) in &fact.predecessors {
        if role.is_empty() {
            return Err(FactError::InvalidFact {
                reason: "predecessor role must not be empty".to_owned(),
            });
        }
        for r in refs {
            if r.fact_type.is_empty() {
                return Err(FactError::InvalidFact {
                    reason: format!("predecessor in role {role} has an empty type"),
                });
            }
        }
    }
    Ok(())
}

/// Produces the canonical byte serialization of a fact: `{type, fields,
/// predecessors}` with field and role names sorted lexicographically, and
/// each predecessor rendered as `{"type": .., "hash": ..}` in that order.
pub fn canonicalize(fact: &Fact) -> Result<Vec<u8>, FactError> {
    validate(fact)?;

    let mut fields = serde_json::Map::new();
    for (name, value) in &fact.fields {
        fields.insert(name.clone(), value.to_canonical_value());
    }

    let mut predecessors = serde_json::Map::new();
    for (role, refs) in &fact.predecessors {
        let rendered = refs
            .iter()
            .map(|r| {
                let mut m = serde_json::Map::new();
                m.insert(
                    "type".to_owned(),
                    serde_json::Value::String(r.fact_type.clone()),
                );
                m.insert(
                    "hash".to_owned(),
                    serde_json::Value::String(r.hash.to_hex()),
                );
                serde_json::Value::Object(m)
            })
            .collect();
        predecessors.insert(role.clone(), serde_json::Value::Array(rendered));
    }

    let mut root = serde_json::Map::new();
    root.insert(
        "type".to_owned(),
        serde_json::Value::String(fact.fact_type.clone()),
    );
    root.insert("fields".to_owned(), serde_json::Value::Object(fields));
    root.insert(
        "predecessors".to_owned(),
        serde_json::Value::Object(predecessors),
    );

    serde_json::to_vec(&serde_json::Value::Object(root)).map_err(|err| FactError::InvalidFact {
        reason: format!("canonicalization failed: {err}"),
    })
}

/// Hashes a fact's canonical serialization.
pub fn hash(fact: &Fact) -> Result<Hash, FactError> {
    Ok(blake3::hash(&canonicalize(fact)?).into())
}

/// Computes the `(type, hash)` reference naming a fact.
pub fn reference(fact: &Fact) -> Result<Reference, FactError> {
    Ok(Reference {
        fact_type: fact.fact_type.clone(),
        hash: hash(fact)?,
    })
}

/// A fact plus zero or more opaque signatures.
///
/// Signatures are never interpreted by this crate; authorization rules only
/// check presence or absence of at least one signature when a rule demands
/// authentication. Signing and verification are an external collaborator.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// The signed fact.
    pub fact: Fact,
    /// Opaque signature blobs, one per signer.
    pub signatures: Vec<Vec<u8>>,
}

impl Envelope {
    /// Wraps a fact with no signatures.
    pub fn unsigned(fact: Fact) -> Self {
        Self {
            fact,
            signatures: Vec::new(),
        }
    }

    /// Computes this envelope's fact reference.
    pub fn reference(&self) -> Result<Reference, FactError> {
        reference(&self.fact)
    }
}
