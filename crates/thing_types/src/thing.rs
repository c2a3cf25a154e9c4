//! Thing - a simulated device aggregating properties, event schemas and an
//! append-only event log.
//!
//! A thing is assembled once with `&mut self` builders and then shared as an
//! `Arc<Thing>`. After that only the event log and the emitted-event hooks
//! change, both behind their own locks.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{
    ActionSchema, Event, EventSchema, Property, PropertyDescription, SchemaValue, ThingError,
    ThingProperty, ThingResult,
};

/// Hook invoked for every event appended to a thing
pub type EventHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies a registered event hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Named schema entry in a description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSchema<S> {
    pub name: String,
    #[serde(flatten)]
    pub schema: S,
}

/// Full description of a thing, as served to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingDescription {
    pub id: String,
    pub title: String,
    #[serde(rename = "@type")]
    pub types: Vec<String>,
    pub description: String,
    pub properties: Vec<PropertyDescription>,
    pub events: Vec<NamedSchema<EventSchema>>,
    pub actions: Vec<NamedSchema<ActionSchema>>,
}

impl ThingDescription {
    pub fn property(&self, name: &str) -> Option<&PropertyDescription> {
        self.properties.iter().find(|p| p.name == name)
    }
}

pub struct Thing {
    id: String,
    title: String,
    types: Vec<String>,
    description: String,

    /// Insertion-ordered properties with a name index
    properties: Vec<Box<dyn ThingProperty>>,
    property_index: HashMap<String, usize>,

    available_events: Vec<(String, EventSchema)>,
    available_actions: Vec<(String, ActionSchema)>,

    events: RwLock<Vec<Event>>,
    hooks: RwLock<Vec<(HookId, EventHook)>>,
    next_hook: AtomicU64,
}

impl Thing {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        types: Vec<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            types,
            description: description.into(),
            properties: Vec::new(),
            property_index: HashMap::new(),
            available_events: Vec::new(),
            available_actions: Vec::new(),
            events: RwLock::new(Vec::new()),
            hooks: RwLock::new(Vec::new()),
            next_hook: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn types(&self) -> &[String] {
        &self.types
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Properties
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a property. Fails with `DuplicateName` if the name is taken,
    /// leaving the existing registration in place, and with `ForeignProperty`
    /// if the property was built for another thing.
    pub fn add_property<T: SchemaValue>(&mut self, property: Property<T>) -> ThingResult<()> {
        let name = ThingProperty::name(&property).to_string();
        let owner = ThingProperty::thing_id(&property);
        if owner != self.id {
            return Err(ThingError::ForeignProperty {
                property: name,
                owner: owner.to_string(),
                thing: self.id.clone(),
            });
        }
        if self.property_index.contains_key(&name) {
            return Err(ThingError::DuplicateName {
                scope: format!("thing '{}' properties", self.id),
                name,
            });
        }

        self.property_index.insert(name, self.properties.len());
        self.properties.push(Box::new(property));
        Ok(())
    }

    pub fn property(&self, name: &str) -> Option<&dyn ThingProperty> {
        self.property_index
            .get(name)
            .map(|&idx| self.properties[idx].as_ref())
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.property_index.contains_key(name)
    }

    /// Properties in insertion order
    pub fn properties(&self) -> impl Iterator<Item = &dyn ThingProperty> {
        self.properties.iter().map(|p| p.as_ref())
    }

    /// Current value of a property as JSON
    pub fn property_value(&self, name: &str) -> Option<serde_json::Value> {
        self.property(name).map(|p| p.current())
    }

    /// Route an external write to the named property
    pub fn set_property(&self, name: &str, value: serde_json::Value) -> ThingResult<()> {
        let property = self
            .property(name)
            .ok_or_else(|| ThingError::NotFound(format!("{}/properties/{}", self.id, name)))?;
        property.write_json(value)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Events & Actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Declare an event this thing may emit.
    ///
    /// The declaration is advisory: `add_event` does not check it.
    pub fn add_available_event(
        &mut self,
        name: impl Into<String>,
        schema: EventSchema,
    ) -> ThingResult<()> {
        let name = name.into();
        if self.available_events.iter().any(|(n, _)| *n == name) {
            return Err(ThingError::DuplicateName {
                scope: format!("thing '{}' events", self.id),
                name,
            });
        }
        self.available_events.push((name, schema));
        Ok(())
    }

    pub fn add_available_action(
        &mut self,
        name: impl Into<String>,
        schema: ActionSchema,
    ) -> ThingResult<()> {
        let name = name.into();
        if self.available_actions.iter().any(|(n, _)| *n == name) {
            return Err(ThingError::DuplicateName {
                scope: format!("thing '{}' actions", self.id),
                name,
            });
        }
        self.available_actions.push((name, schema));
        Ok(())
    }

    pub fn event_schema(&self, name: &str) -> Option<&EventSchema> {
        self.available_events
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Append an event to the log and run every emitted-event hook
    pub fn add_event(&self, event: Event) {
        if self.event_schema(&event.name).is_none() {
            tracing::debug!(thing_id = %self.id, event = %event.name, "Emitting undeclared event");
        }

        self.events.write().push(event.clone());

        let hooks: Vec<_> = self.hooks.read().clone();
        for (id, hook) in &hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
                tracing::error!(thing_id = %self.id, hook = id.0, "Event hook panicked");
            }
        }
    }

    /// Register a hook called for every event appended after this point
    pub fn on_event_emitted(&self, hook: impl Fn(&Event) + Send + Sync + 'static) -> HookId {
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, Arc::new(hook)));
        id
    }

    pub fn remove_event_hook(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(existing, _)| *existing != id);
        hooks.len() != before
    }

    /// Snapshot of the event log, oldest first
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn events_named(&self, name: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Description
    // ─────────────────────────────────────────────────────────────────────────

    pub fn describe(&self) -> ThingDescription {
        ThingDescription {
            id: self.id.clone(),
            title: self.title.clone(),
            types: self.types.clone(),
            description: self.description.clone(),
            properties: self.properties().map(|p| p.describe()).collect(),
            events: self
                .available_events
                .iter()
                .map(|(name, schema)| NamedSchema {
                    name: name.clone(),
                    schema: schema.clone(),
                })
                .collect(),
            actions: self
                .available_actions
                .iter()
                .map(|(name, schema)| NamedSchema {
                    name: name.clone(),
                    schema: schema.clone(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Thing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thing")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("properties", &self.property_index.len())
            .field("events", &self.events.read().len())
            .finish()
    }
}
