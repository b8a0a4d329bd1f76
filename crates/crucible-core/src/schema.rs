//! Inferred field schemas for result sets.

use serde::{Deserialize, Serialize};

use crate::value::Kind;

/// A named field with its inferred kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Inferred kind after promotion.
    pub kind: Kind,
}

/// The effect a single observation had on a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChange {
    /// The field already existed with a compatible kind.
    Unchanged,
    /// The field was added to the schema.
    Added,
    /// The field's kind was widened under the promotion lattice.
    Promoted,
}

/// An ordered vector of (name, kind) pairs inferred from observed records.
///
/// Fields keep the order in which they were first observed; observing a value
/// of a conflicting kind widens the stored kind under [`Kind::unify`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an observation of `name` with `kind`, promoting on conflict.
    pub fn observe(&mut self, name: &str, kind: Kind) -> SchemaChange {
        match self.fields.iter_mut().find(|field| field.name == name) {
            Some(field) => {
                let unified = Kind::unify(field.kind, kind);
                if unified == field.kind {
                    SchemaChange::Unchanged
                } else {
                    field.kind = unified;
                    SchemaChange::Promoted
                }
            }
            None => {
                self.fields.push(Field {
                    name: name.to_string(),
                    kind,
                });
                SchemaChange::Added
            }
        }
    }

    /// Returns the inferred kind for a field, if observed.
    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.kind)
    }

    /// True when the schema contains the named field.
    pub fn contains(&self, name: &str) -> bool {
        self.kind_of(name).is_some()
    }

    /// Iterates fields in first-observation order.
    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields have been observed.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
