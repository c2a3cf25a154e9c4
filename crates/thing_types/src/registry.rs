//! Registry - the fixed, ordered collection of things handed to the server
//!
//! Built once at startup and never mutated, so it can be shared across any
//! number of request-handling tasks without locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Thing, ThingDescription, ThingError, ThingResult};

#[derive(Debug, Clone)]
pub struct Registry {
    name: String,
    things: Vec<Arc<Thing>>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Build a registry. Thing ids must be unique.
    pub fn new(name: impl Into<String>, things: Vec<Arc<Thing>>) -> ThingResult<Self> {
        let name = name.into();
        let mut index = HashMap::with_capacity(things.len());

        for (idx, thing) in things.iter().enumerate() {
            if index.insert(thing.id().to_string(), idx).is_some() {
                return Err(ThingError::DuplicateName {
                    scope: format!("registry '{}'", name),
                    name: thing.id().to_string(),
                });
            }
        }

        Ok(Self {
            name,
            things,
            index,
        })
    }

    /// Group name the things are advertised under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Thing>> {
        self.things.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&Arc<Thing>> {
        self.index.get(id).map(|&idx| &self.things[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Thing>> {
        self.things.iter()
    }

    pub fn len(&self) -> usize {
        self.things.len()
    }

    pub fn is_empty(&self) -> bool {
        self.things.is_empty()
    }

    /// Descriptions of every thing, in registry order
    pub fn describe(&self) -> Vec<ThingDescription> {
        self.things.iter().map(|t| t.describe()).collect()
    }
}
