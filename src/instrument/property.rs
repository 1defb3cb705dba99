//! Property descriptors and value marshalling.
//!
//! A [`PropertyDescriptor`] declares one instrument setting: how to write it
//! (a command template with a `{value}` hole), how to read it back (a query
//! command plus a [`ReturnKind`] coercion), and which values are admissible
//! (exactly one [`Validation`] mode). The descriptor is pure data; the
//! [`Instrument`](crate::instrument::Instrument) binds it to a channel.
//!
//! Validation modes:
//! - `Values` — a discrete admissible set, checked by equality.
//! - `Range` — an inclusive numeric interval `[lo, hi]`.
//! - `IndexedValues` — the user sees elements, the wire carries positions.
//! - `DictValues` — an insertion-ordered map from user-facing keys to wire
//!   values; replies reverse-map to the *first* key with a matching wire
//!   value, so duplicate wire values act as aliases.

use crate::error::{ScanError, ScanResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A value passing through a property binding.
///
/// `Int` and `Float` compare equal when numerically equal, mirroring how
/// instrument value lists are written in practice (`[1, 2.5]` admits `1.0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean, rendered `1`/`0` on the wire
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Free text
    Str(String),
}

impl PropertyValue {
    /// Numeric view for range checks (`Bool` and `Str` are not numeric).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Float view, also parsing `Str` contents (used by scan targets).
    pub fn to_f64_lossy(&self) -> Option<f64> {
        match self {
            PropertyValue::Str(s) => s.trim().parse().ok(),
            PropertyValue::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => self.as_f64(),
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        use PropertyValue::{Bool, Float, Int, Str};
        match (self, other) {
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Float(a), Float(b)) => a == b,
            (Int(a), Float(b)) | (Float(b), Int(a)) => (*a as f64) == *b,
            (Str(a), Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyValue {
    /// The wire rendering used in command templates.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", u8::from(*v)),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(i64::from(v))
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Str(v)
    }
}

/// How raw reply text is coerced into a [`PropertyValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    /// Parse as `f64`
    Float,
    /// Parse as `i64`
    Int,
    /// Accept `1`/`0`, `on`/`off`, `true`/`false` (case-insensitive)
    Bool,
    /// Keep the trimmed text
    Str,
}

impl ReturnKind {
    /// Coerce trimmed reply text. This is the single coercion point for a
    /// reply; callers must not convert again.
    pub fn parse(self, property: &str, raw: &str) -> ScanResult<PropertyValue> {
        let text = raw.trim();
        match self {
            ReturnKind::Float => text
                .parse::<f64>()
                .map(PropertyValue::Float)
                .map_err(|_| bad_reply(property, raw)),
            ReturnKind::Int => text
                .parse::<i64>()
                .map(PropertyValue::Int)
                .map_err(|_| bad_reply(property, raw)),
            ReturnKind::Bool => match text.to_ascii_lowercase().as_str() {
                "1" | "on" | "true" => Ok(PropertyValue::Bool(true)),
                "0" | "off" | "false" => Ok(PropertyValue::Bool(false)),
                _ => Err(bad_reply(property, raw)),
            },
            ReturnKind::Str => Ok(PropertyValue::Str(text.to_string())),
        }
    }
}

/// Read/write direction of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Settable and queryable (the default)
    ReadWrite,
    /// Queryable only; `set` is rejected
    ReadOnly,
    /// Settable only; `get` is rejected and the property is never polled
    WriteOnly,
}

/// Admissible-value rule for a property. Exactly one per descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    /// Discrete admissible set
    Values(Vec<PropertyValue>),
    /// Inclusive numeric interval
    Range {
        /// Lower bound
        lo: f64,
        /// Upper bound
        hi: f64,
    },
    /// User sees elements, the wire carries their positions
    IndexedValues(Vec<PropertyValue>),
    /// User-facing key to wire value, insertion-ordered
    DictValues(IndexMap<String, PropertyValue>),
}

impl Validation {
    /// Validate a user value and produce `(wire text, cached value)`.
    pub(crate) fn marshal(
        &self,
        property: &str,
        value: &PropertyValue,
    ) -> ScanResult<(String, PropertyValue)> {
        match self {
            Validation::Values(admissible) => {
                if admissible.iter().any(|v| v == value) {
                    Ok((value.to_string(), value.clone()))
                } else {
                    Err(invalid(property, value))
                }
            }
            Validation::Range { lo, hi } => {
                let v = value.as_f64().ok_or_else(|| invalid(property, value))?;
                if !v.is_finite() {
                    return Err(invalid(property, value));
                }
                if v < *lo || v > *hi {
                    return Err(ScanError::OutOfRange {
                        property: property.to_string(),
                        value: v,
                        lo: *lo,
                        hi: *hi,
                    });
                }
                Ok((value.to_string(), value.clone()))
            }
            Validation::IndexedValues(sequence) => {
                let position = sequence
                    .iter()
                    .position(|v| v == value)
                    .ok_or_else(|| invalid(property, value))?;
                Ok((position.to_string(), sequence[position].clone()))
            }
            Validation::DictValues(map) => {
                let key = match value {
                    PropertyValue::Str(s) => s.clone(),
                    other => other.to_string(),
                };
                let wire = map.get(&key).ok_or_else(|| invalid(property, value))?.to_string();
                // Cache the first key carrying this wire value, the same key
                // a read of the echoed reply would decode to.
                let canonical = map
                    .iter()
                    .find(|(_, w)| w.to_string() == wire)
                    .map_or(key, |(k, _)| k.clone());
                Ok((wire, PropertyValue::Str(canonical)))
            }
        }
    }

    /// Decode trimmed reply text into the user-facing value.
    pub(crate) fn decode(
        &self,
        property: &str,
        kind: ReturnKind,
        raw: &str,
    ) -> ScanResult<PropertyValue> {
        match self {
            Validation::Values(_) | Validation::Range { .. } => kind.parse(property, raw),
            Validation::IndexedValues(sequence) => {
                let position: usize = raw.trim().parse().map_err(|_| bad_reply(property, raw))?;
                sequence
                    .get(position)
                    .cloned()
                    .ok_or_else(|| bad_reply(property, raw))
            }
            Validation::DictValues(map) => {
                let text = raw.trim();
                map.iter()
                    .find(|(_, wire)| wire.to_string() == text)
                    .map(|(key, _)| PropertyValue::Str(key.clone()))
                    .ok_or_else(|| bad_reply(property, raw))
            }
        }
    }
}

fn invalid(property: &str, value: &PropertyValue) -> ScanError {
    ScanError::InvalidValue {
        property: property.to_string(),
        value: value.to_string(),
    }
}

fn bad_reply(property: &str, raw: &str) -> ScanError {
    ScanError::BadReply {
        property: property.to_string(),
        reply: raw.to_string(),
    }
}

/// Declarative description of one instrument property.
///
/// Built with chained setters and checked by
/// [`Instrument::add_property`](crate::instrument::Instrument::add_property):
///
/// ```
/// use labscan::instrument::{PropertyDescriptor, ReturnKind};
///
/// let voltage = PropertyDescriptor::new("voltage")
///     .write("VOLT {value}")
///     .query("VOLT?")
///     .returns(ReturnKind::Float)
///     .range(0.0, 10.0);
/// assert!(voltage.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    name: String,
    write_template: Option<String>,
    query_command: Option<String>,
    return_kind: ReturnKind,
    validation: Option<Validation>,
    modes_declared: u8,
    access: Access,
}

impl PropertyDescriptor {
    /// Start a descriptor; defaults to read-write with a `Float` return kind
    /// and no validation mode (one must be declared before install).
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            write_template: None,
            query_command: None,
            return_kind: ReturnKind::Float,
            validation: None,
            modes_declared: 0,
            access: Access::ReadWrite,
        }
    }

    /// Set the write command template; must contain a `{value}` hole.
    #[must_use]
    pub fn write(mut self, template: &str) -> Self {
        self.write_template = Some(template.to_string());
        self
    }

    /// Set the query command.
    #[must_use]
    pub fn query(mut self, command: &str) -> Self {
        self.query_command = Some(command.to_string());
        self
    }

    /// Set how replies are coerced.
    #[must_use]
    pub fn returns(mut self, kind: ReturnKind) -> Self {
        self.return_kind = kind;
        self
    }

    /// Mark the property read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.access = Access::ReadOnly;
        self
    }

    /// Mark the property write-only.
    #[must_use]
    pub fn write_only(mut self) -> Self {
        self.access = Access::WriteOnly;
        self
    }

    /// Declare a discrete admissible set.
    #[must_use]
    pub fn values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PropertyValue>,
    {
        self.validation = Some(Validation::Values(
            values.into_iter().map(Into::into).collect(),
        ));
        self.modes_declared += 1;
        self
    }

    /// Declare an inclusive numeric range.
    #[must_use]
    pub fn range(mut self, lo: f64, hi: f64) -> Self {
        self.validation = Some(Validation::Range { lo, hi });
        self.modes_declared += 1;
        self
    }

    /// Declare an indexed sequence (wire carries positions).
    #[must_use]
    pub fn indexed_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<PropertyValue>,
    {
        self.validation = Some(Validation::IndexedValues(
            values.into_iter().map(Into::into).collect(),
        ));
        self.modes_declared += 1;
        self
    }

    /// Declare a key-to-wire-value map; insertion order decides reverse
    /// lookups, so put canonical keys before aliases.
    #[must_use]
    pub fn dict_values<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<PropertyValue>,
    {
        self.validation = Some(Validation::DictValues(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ));
        self.modes_declared += 1;
        self
    }

    /// Property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared access direction.
    pub fn access(&self) -> Access {
        self.access
    }

    /// True unless declared write-only.
    pub fn is_readable(&self) -> bool {
        self.access != Access::WriteOnly
    }

    /// True unless declared read-only.
    pub fn is_writable(&self) -> bool {
        self.access != Access::ReadOnly
    }

    /// Reply coercion kind.
    pub fn return_kind(&self) -> ReturnKind {
        self.return_kind
    }

    /// Write template, if any.
    pub fn write_template(&self) -> Option<&str> {
        self.write_template.as_deref()
    }

    /// Query command, if any.
    pub fn query_command(&self) -> Option<&str> {
        self.query_command.as_deref()
    }

    /// The declared validation mode.
    pub(crate) fn mode(&self) -> ScanResult<&Validation> {
        self.validation.as_ref().ok_or_else(|| ScanError::Descriptor {
            property: self.name.clone(),
            reason: "no validation mode declared".to_string(),
        })
    }

    /// Check the descriptor is well-formed. Called on install.
    pub fn validate(&self) -> ScanResult<()> {
        let malformed = |reason: &str| ScanError::Descriptor {
            property: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.modes_declared == 0 {
            return Err(malformed("no validation mode declared"));
        }
        if self.modes_declared > 1 {
            return Err(malformed("more than one validation mode declared"));
        }

        match self.mode()? {
            Validation::Values(v) | Validation::IndexedValues(v) if v.is_empty() => {
                return Err(malformed("empty admissible value set"));
            }
            Validation::DictValues(m) if m.is_empty() => {
                return Err(malformed("empty admissible value set"));
            }
            Validation::Range { lo, hi } => {
                if !lo.is_finite() || !hi.is_finite() {
                    return Err(malformed("range bounds must be finite"));
                }
                if lo > hi {
                    return Err(malformed("range lower bound exceeds upper bound"));
                }
            }
            _ => {}
        }

        if self.is_writable() {
            match &self.write_template {
                None => return Err(malformed("writable property needs a write template")),
                Some(t) if !t.contains("{value}") => {
                    return Err(malformed("write template is missing the {value} hole"));
                }
                Some(_) => {}
            }
        }
        if self.is_readable() && self.query_command.is_none() {
            return Err(malformed("readable property needs a query command"));
        }

        Ok(())
    }

    /// Render the write command for an already-marshalled wire value.
    pub(crate) fn format_write(&self, wire: &str) -> ScanResult<String> {
        let template = self.write_template.as_ref().ok_or_else(|| ScanError::Descriptor {
            property: self.name.clone(),
            reason: "writable property needs a write template".to_string(),
        })?;
        let mut ctx = HashMap::new();
        ctx.insert("value".to_string(), wire.to_string());
        Ok(strfmt::strfmt(template, &ctx)?)
    }
}
