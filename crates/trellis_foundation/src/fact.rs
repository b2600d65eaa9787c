//! Facts, fact identities, and fact type definitions.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Type;
use crate::value::Value;

/// Field name to value map of a fact.
///
/// Persistent, so cloning a fact for an undo record is O(1).
pub type FieldMap = im::OrdMap<Arc<str>, Value>;

/// Unique identifier of a fact.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactId(u64);

impl FactId {
    /// Creates a fact id from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this id.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({})", self.0)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A typed fact.
///
/// Facts are logically immutable; an update produces a new `Fact` with the
/// same id and a fresh timestamp.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fact {
    /// Unique identity.
    pub id: FactId,
    /// Name of the fact's type.
    pub type_name: Arc<str>,
    /// Field values.
    pub fields: FieldMap,
    /// Logical time of the last assertion or update.
    pub timestamp: u64,
}

impl Fact {
    /// Creates a fact with no fields.
    #[must_use]
    pub fn new(id: FactId, type_name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            fields: FieldMap::new(),
            timestamp: 0,
        }
    }

    /// Builder method to set a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<Arc<str>>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder method to set the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns a copy of this fact with `changes` merged over its fields.
    #[must_use]
    pub fn merged(&self, changes: &FieldMap, timestamp: u64) -> Self {
        Self {
            id: self.id,
            type_name: self.type_name.clone(),
            fields: changes.clone().union(self.fields.clone()),
            timestamp,
        }
    }

    /// Rough heap footprint in bytes, used for transaction accounting.
    #[must_use]
    pub fn footprint(&self) -> usize {
        let fields: usize = self
            .fields
            .iter()
            .map(|(name, value)| {
                name.len()
                    + std::mem::size_of::<Value>()
                    + value.as_str().map_or(0, str::len)
            })
            .sum();
        std::mem::size_of::<Self>() + self.type_name.len() + fields
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}(", self.type_name, self.id)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value:?}")?;
        }
        write!(f, ")")
    }
}

/// A declared field of a fact type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldDef {
    /// Field name.
    pub name: Arc<str>,
    /// Field type.
    pub ty: Type,
}

impl FieldDef {
    /// Creates a field definition.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Schema definition for a fact type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeDefinition {
    /// Type name (e.g., `Person`).
    pub name: Arc<str>,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
}

impl TypeDefinition {
    /// Creates a new type definition with no fields.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field to the definition.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.fields.push(FieldDef::new(name, ty));
        self
    }

    /// Returns the field definition by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Validates a fact against this definition.
    ///
    /// Every field present on the fact must be declared and its value must
    /// be accepted by the declared type. Declared fields may be absent;
    /// conditions reading them fail at evaluation time instead.
    ///
    /// # Errors
    /// Returns `UnknownField` or `TypeMismatch`.
    pub fn validate(&self, fact: &Fact) -> Result<()> {
        for (name, value) in &fact.fields {
            let Some(def) = self.field(name) else {
                return Err(Error::unknown_field(&*self.name, &**name));
            };
            let actual = value.value_type();
            if !def.ty.accepts(&actual) {
                return Err(Error::type_mismatch(def.ty.clone(), actual));
            }
        }
        Ok(())
    }
}
