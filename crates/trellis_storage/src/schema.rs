//! Registered fact types.
//!
//! The registry is the reference for semantic validation: facts are
//! checked against it at submit time and rule patterns at compile time.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_foundation::{Error, ErrorKind, Fact, FieldDef, Result, TypeDefinition};

/// Name-indexed set of fact type definitions.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<Arc<str>, TypeDefinition>,
    /// Registration order, for stable listing.
    order: Vec<Arc<str>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type definition.
    ///
    /// Registering an identical definition twice is a no-op; returns
    /// `true` if the type was newly added.
    ///
    /// # Errors
    /// Returns `DuplicateType` if a different definition exists under the same name.
    pub fn register(&mut self, definition: TypeDefinition) -> Result<bool> {
        if let Some(existing) = self.types.get(&definition.name) {
            if *existing == definition {
                return Ok(false);
            }
            return Err(Error::new(ErrorKind::DuplicateType(
                definition.name.to_string(),
            )));
        }
        self.order.push(definition.name.clone());
        self.types.insert(definition.name.clone(), definition);
        Ok(true)
    }

    /// Returns a type definition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    /// Returns true if the type is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Looks up a declared field, failing with a schema error.
    ///
    /// # Errors
    /// Returns `UnknownType` or `UnknownField`.
    pub fn field(&self, type_name: &str, field: &str) -> Result<&FieldDef> {
        let definition = self
            .get(type_name)
            .ok_or_else(|| Error::unknown_type(type_name))?;
        definition
            .field(field)
            .ok_or_else(|| Error::unknown_field(type_name, field))
    }

    /// Validates a fact against its registered type.
    ///
    /// Returns `Ok(false)` when the type is unregistered and `strict` is off;
    /// such facts are stored but never enter the network.
    ///
    /// # Errors
    /// Returns `UnknownType` (strict mode), `UnknownField`, or `TypeMismatch`.
    pub fn validate(&self, fact: &Fact, strict: bool) -> Result<bool> {
        match self.get(&fact.type_name) {
            Some(definition) => definition.validate(fact).map(|()| true),
            None if strict => Err(Error::unknown_type(&*fact.type_name)),
            None => Ok(false),
        }
    }

    /// Iterates definitions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.order.iter().filter_map(|name| self.types.get(name))
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no types are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Forgets every definition.
    pub fn clear(&mut self) {
        self.types.clear();
        self.order.clear();
    }
}
