//! Thing Gateway
//!
//! The call surface a protocol server drives: listing things, describing
//! them, reading and writing properties and subscribing to their events.
//! No transport lives here.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thing_types::{Event, HookId, Registry, Thing, ThingDescription, ThingError};
use tokio::sync::broadcast;
use tracing::{debug, trace};
use uuid::Uuid;
use wildmatch::WildMatch;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Thing not found: {0}")]
    ThingNotFound(String),

    #[error(transparent)]
    Thing(#[from] ThingError),
}

impl GatewayError {
    pub fn is_write_rejected(&self) -> bool {
        matches!(self, GatewayError::Thing(e) if e.is_write_rejected())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Handle for removing a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Registry front door for an external server
pub struct ThingGateway {
    registry: Arc<Registry>,
    /// Subscription -> (thing id, hook) pairs it installed
    subscriptions: DashMap<SubscriptionId, Vec<(String, HookId)>>,
}

impl ThingGateway {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            subscriptions: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn group_name(&self) -> &str {
        self.registry.name()
    }

    fn thing(&self, thing_id: &str) -> GatewayResult<&Arc<Thing>> {
        self.registry
            .find(thing_id)
            .ok_or_else(|| GatewayError::ThingNotFound(thing_id.to_string()))
    }

    /// Descriptions of every thing, in registry order
    pub fn list_things(&self) -> Vec<ThingDescription> {
        self.registry.describe()
    }

    pub fn get_description(&self, thing_id: &str) -> GatewayResult<ThingDescription> {
        Ok(self.thing(thing_id)?.describe())
    }

    pub fn get_property(&self, thing_id: &str, name: &str) -> GatewayResult<serde_json::Value> {
        self.thing(thing_id)?
            .property_value(name)
            .ok_or_else(|| ThingError::NotFound(format!("{}/properties/{}", thing_id, name)).into())
    }

    /// Route an external write to the property. Read-only properties reject
    /// it and keep their value.
    pub fn set_property(
        &self,
        thing_id: &str,
        name: &str,
        value: serde_json::Value,
    ) -> GatewayResult<()> {
        self.thing(thing_id)?
            .set_property(name, value)
            .map_err(|e| {
                debug!(thing_id, property = name, error = %e, "Property write refused");
                e.into()
            })
    }

    /// Invoke `handler` for every event appended to `thing_id`
    pub fn subscribe(
        &self,
        thing_id: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> GatewayResult<SubscriptionId> {
        let thing = self.thing(thing_id)?;
        let hook = thing.on_event_emitted(handler);

        let id = SubscriptionId::new();
        self.subscriptions
            .insert(id, vec![(thing.id().to_string(), hook)]);
        debug!(subscription = %id, thing_id, "Subscribed");
        Ok(id)
    }

    /// Subscribe to every thing whose id matches a glob (`*`, `?`).
    ///
    /// Matching no thing is not an error; the subscription is simply empty.
    pub fn subscribe_matching(
        &self,
        pattern: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let matcher = WildMatch::new(pattern);
        let handler = Arc::new(handler);

        let hooks: Vec<(String, HookId)> = self
            .registry
            .iter()
            .filter(|thing| matcher.matches(thing.id()))
            .map(|thing| {
                let handler = Arc::clone(&handler);
                let hook = thing.on_event_emitted(move |event| handler(event));
                (thing.id().to_string(), hook)
            })
            .collect();

        let id = SubscriptionId::new();
        debug!(subscription = %id, pattern, things = hooks.len(), "Subscribed to pattern");
        self.subscriptions.insert(id, hooks);
        id
    }

    /// Forward matching things' events into a broadcast channel.
    ///
    /// Lagging receivers lose the oldest events; sends with no receiver are
    /// dropped.
    pub fn event_stream(
        &self,
        pattern: &str,
        capacity: usize,
    ) -> (SubscriptionId, broadcast::Receiver<Event>) {
        let (tx, rx) = broadcast::channel(capacity);
        let id = self.subscribe_matching(pattern, move |event| {
            if tx.send(event.clone()).is_err() {
                trace!(event = %event.name, "No stream receivers");
            }
        });
        (id, rx)
    }

    /// Remove every hook the subscription installed. Returns false if the id
    /// is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, hooks)) = self.subscriptions.remove(&id) else {
            return false;
        };

        for (thing_id, hook) in hooks {
            if let Some(thing) = self.registry.find(&thing_id) {
                thing.remove_event_hook(hook);
            }
        }
        debug!(subscription = %id, "Unsubscribed");
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Snapshot of a thing's event log
    pub fn events(&self, thing_id: &str) -> GatewayResult<Vec<Event>> {
        Ok(self.thing(thing_id)?.events())
    }
}

impl fmt::Debug for ThingGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThingGateway")
            .field("group", &self.registry.name())
            .field("things", &self.registry.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use thing_types::{Property, PropertySchema, Value};
    use tokio_test::{assert_err, assert_ok};

    fn sensor(id: &str) -> Arc<Thing> {
        let mut thing = Thing::new(id, id, vec!["MultiLevelSensor".into()], "test sensor");
        let property = Property::new(
            &thing,
            "level",
            Value::shared(1.5),
            PropertySchema::number("LevelProperty", "level").read_only(),
        )
        .unwrap();
        thing.add_property(property).unwrap();
        Arc::new(thing)
    }

    fn gateway() -> ThingGateway {
        let registry =
            Registry::new("Bench", vec![sensor("PD1"), sensor("PD2"), sensor("AUX")]).unwrap();
        ThingGateway::new(Arc::new(registry))
    }

    #[test]
    fn test_lookup_and_errors() {
        let gw = gateway();
        assert_eq!(gw.group_name(), "Bench");

        let ids: Vec<_> = gw.list_things().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["PD1", "PD2", "AUX"]);

        assert_eq!(
            assert_ok!(gw.get_property("PD2", "level")),
            serde_json::json!(1.5)
        );
        assert!(matches!(
            gw.get_description("PD7"),
            Err(GatewayError::ThingNotFound(_))
        ));
        assert!(matches!(
            gw.get_property("PD1", "depth"),
            Err(GatewayError::Thing(ThingError::NotFound(_)))
        ));
    }

    #[test]
    fn test_set_property_rejected() {
        let gw = gateway();
        let err = assert_err!(gw.set_property("PD1", "level", serde_json::json!(9.0)));
        assert!(err.is_write_rejected());
        assert_eq!(
            gw.get_property("PD1", "level").unwrap(),
            serde_json::json!(1.5)
        );
    }

    #[test]
    fn test_subscribe_and_unsubscribe() {
        let gw = gateway();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = gw
            .subscribe("PD1", move |e| sink.lock().push(e.name.clone()))
            .unwrap();

        let pd1 = gw.registry().find("PD1").unwrap();
        pd1.add_event(Event::new("PD1", "GasLeakage", serde_json::json!(true)));
        assert_eq!(*seen.lock(), vec!["GasLeakage"]);

        assert!(gw.unsubscribe(id));
        assert!(!gw.unsubscribe(id));
        pd1.add_event(Event::new("PD1", "GasLeakage", serde_json::json!(true)));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(gw.events("PD1").unwrap().len(), 2);

        assert!(matches!(
            gw.subscribe("nope", |_| {}),
            Err(GatewayError::ThingNotFound(_))
        ));
    }

    #[test]
    fn test_subscribe_matching_glob() {
        let gw = gateway();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let id = gw.subscribe_matching("PD*", move |e| sink.lock().push(e.thing_id.clone()));
        assert_eq!(gw.subscription_count(), 1);

        for thing in gw.registry().iter() {
            thing.add_event(Event::new(thing.id(), "Ping", serde_json::Value::Null));
        }
        assert_eq!(*seen.lock(), vec!["PD1", "PD2"]);

        gw.unsubscribe(id);
        assert_eq!(gw.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_event_stream_receives_events() {
        let gw = gateway();
        let (id, mut rx) = gw.event_stream("AUX", 8);

        let aux = gw.registry().find("AUX").unwrap();
        aux.add_event(Event::new("AUX", "Ping", serde_json::json!(1)));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.thing_id, "AUX");
        assert_eq!(event.data, serde_json::json!(1));

        assert!(gw.unsubscribe(id));
    }
}
