//! Device identity extraction.
//!
//! The fields listed in [`ID_FIELDS`] are used to separate and tag unique
//! sensors instead of being exported as readings.

use std::fmt;

use tracing::debug;

use crate::event::{Event, FieldValue, Fields};

/// Declared type of an identity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Int,
}

/// One entry of the identity schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdField {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Number of identity fields.
pub const ID_FIELD_COUNT: usize = 6;

/// Identity schema, in tag order.
pub const ID_FIELDS: [IdField; ID_FIELD_COUNT] = [
    IdField {
        name: "brand",
        kind: FieldKind::Text,
    },
    IdField {
        name: "model",
        kind: FieldKind::Text,
    },
    IdField {
        name: "type",
        kind: FieldKind::Text,
    },
    IdField {
        name: "subtype",
        kind: FieldKind::Text,
    },
    IdField {
        name: "channel",
        kind: FieldKind::Int,
    },
    IdField {
        name: "id",
        kind: FieldKind::Int,
    },
];

/// Value of one identity field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum IdValue {
    /// Field missing from the event or not coercible to its type.
    #[default]
    Absent,
    Text(String),
    Int(i64),
}

impl IdValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, IdValue::Absent)
    }

    fn coerce(value: &FieldValue, kind: FieldKind) -> Self {
        let coerced = match kind {
            FieldKind::Text => value.as_text().map(IdValue::Text),
            FieldKind::Int => value.as_i64().map(IdValue::Int),
        };
        coerced.unwrap_or(IdValue::Absent)
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Absent => f.write_str("-"),
            IdValue::Text(s) => f.write_str(s),
            IdValue::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Stable per-device identity tuple.
///
/// Two identities are equal only if every field matches, absent markers
/// included, so partial identities never collapse into complete ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity {
    values: [IdValue; ID_FIELD_COUNT],
}

impl Identity {
    pub fn from_values(values: [IdValue; ID_FIELD_COUNT]) -> Self {
        Self { values }
    }

    /// Remove the identity fields from `fields` and build the identity.
    pub fn take_from(fields: &mut Fields) -> Self {
        let values = ID_FIELDS.map(|field| match fields.remove(field.name) {
            Some(value) => {
                let coerced = IdValue::coerce(&value, field.kind);
                if coerced.is_absent() && value != FieldValue::Null {
                    debug!(field = field.name, value = %value, "identity field not coercible");
                }
                coerced
            }
            None => IdValue::Absent,
        });
        Self { values }
    }

    /// Set a text field. Unknown names are ignored.
    pub fn with_text(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Some(idx) = field_index(name) {
            self.values[idx] = IdValue::Text(value.into());
        }
        self
    }

    /// Set an integer field. Unknown names are ignored.
    pub fn with_int(mut self, name: &str, value: i64) -> Self {
        if let Some(idx) = field_index(name) {
            self.values[idx] = IdValue::Int(value);
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&IdValue> {
        field_index(name).map(|idx| &self.values[idx])
    }

    pub fn values(&self) -> &[IdValue; ID_FIELD_COUNT] {
        &self.values
    }

    /// Non-absent fields with their schema names, in schema order.
    pub fn present(&self) -> impl Iterator<Item = (&'static str, &IdValue)> {
        ID_FIELDS
            .iter()
            .zip(self.values.iter())
            .filter(|(_, value)| !value.is_absent())
            .map(|(field, value)| (field.name, value))
    }

    /// True if no identity field was found.
    pub fn is_anonymous(&self) -> bool {
        self.values.iter().all(IdValue::is_absent)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str(")")
    }
}

fn field_index(name: &str) -> Option<usize> {
    ID_FIELDS.iter().position(|field| field.name == name)
}

/// Split an event into its identity and the remaining value fields.
pub fn split_identity(mut event: Event) -> (Identity, Event) {
    let identity = Identity::take_from(&mut event.fields);
    (identity, event)
}
