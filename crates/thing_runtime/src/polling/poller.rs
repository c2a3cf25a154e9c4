//! Device poller - the per-thing sampling step

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thing_types::{Event, Property, Thing, ThingError, ThingProperty, ThingResult, Value};
use tracing::{debug, info};

use super::{SensorSource, ThresholdRule};

/// One simulated sensor feeding one property's value
pub struct SensorChannel {
    property: String,
    value: Arc<Value<f64>>,
    source: Box<dyn SensorSource>,
}

impl SensorChannel {
    pub fn new(
        property: impl Into<String>,
        value: Arc<Value<f64>>,
        source: impl SensorSource + 'static,
    ) -> Self {
        Self {
            property: property.into(),
            value,
            source: Box::new(source),
        }
    }

    pub fn boxed(
        property: impl Into<String>,
        value: Arc<Value<f64>>,
        source: Box<dyn SensorSource>,
    ) -> Self {
        Self {
            property: property.into(),
            value,
            source,
        }
    }

    /// Channel feeding `property`'s own value
    pub fn for_property(property: &Property<f64>, source: Box<dyn SensorSource>) -> Self {
        Self::boxed(
            ThingProperty::name(property),
            Arc::clone(property.value()),
            source,
        )
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn value(&self) -> &Arc<Value<f64>> {
        &self.value
    }
}

impl std::fmt::Debug for SensorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorChannel")
            .field("property", &self.property)
            .field("value", &self.value.get())
            .finish()
    }
}

/// What a single tick produced
#[derive(Debug, Clone)]
pub struct TickReport {
    /// 1-based tick number
    pub tick: u64,
    /// (property, reading) in channel order
    pub readings: Vec<(String, f64)>,
    /// Events appended to the thing on this tick
    pub events: Vec<Event>,
}

/// Private state bundle of one thing's poller: the thing handle, the values
/// it writes and the rules it evaluates.
#[derive(Debug)]
pub struct DevicePoller {
    thing: Arc<Thing>,
    channels: Vec<SensorChannel>,
    rules: Vec<ThresholdRule>,
    ticks: AtomicU64,
}

impl DevicePoller {
    /// Every channel must feed the value backing a number property of
    /// `thing`, and every rule must name one of the channels.
    pub fn new(
        thing: Arc<Thing>,
        channels: Vec<SensorChannel>,
        rules: Vec<ThresholdRule>,
    ) -> ThingResult<Self> {
        for channel in &channels {
            let Some(property) = thing.property(&channel.property) else {
                return Err(ThingError::NotFound(format!(
                    "{}/properties/{}",
                    thing.id(),
                    channel.property
                )));
            };

            let backed = property
                .as_any()
                .downcast_ref::<Property<f64>>()
                .is_some_and(|p| Arc::ptr_eq(p.value(), &channel.value));
            if !backed {
                return Err(ThingError::ChannelMismatch {
                    thing: thing.id().to_string(),
                    property: channel.property.clone(),
                });
            }
        }

        for rule in &rules {
            if !channels.iter().any(|c| c.property == rule.property) {
                return Err(ThingError::NotFound(format!(
                    "{}/channels/{}",
                    thing.id(),
                    rule.property
                )));
            }
        }

        Ok(Self {
            thing,
            channels,
            rules,
            ticks: AtomicU64::new(0),
        })
    }

    pub fn thing(&self) -> &Arc<Thing> {
        &self.thing
    }

    pub fn channels(&self) -> &[SensorChannel] {
        &self.channels
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Ticks performed so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn channel(&self, property: &str) -> Option<&SensorChannel> {
        self.channels.iter().find(|c| c.property == property)
    }

    /// Sample every channel, publish the readings, then evaluate the rules.
    ///
    /// Observers run synchronously inside this call.
    pub fn tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let thing_id = self.thing.id();

        let readings: Vec<(String, f64)> = self
            .channels
            .iter()
            .map(|channel| {
                let reading = channel.source.sample();
                debug!(thing_id, property = %channel.property, value = reading, "Setting new reading");
                channel.value.notify_of_external_update(reading);
                (channel.property.clone(), reading)
            })
            .collect();

        let mut events = Vec::new();
        for rule in &self.rules {
            let Some(channel) = self.channel(&rule.property) else {
                continue;
            };
            let reading = channel.value.get();

            if rule.check(reading) {
                let event = Event::new(thing_id, &rule.event, rule.payload.clone());
                info!(
                    thing_id,
                    event = %rule.event,
                    property = %rule.property,
                    value = reading,
                    condition = %rule.condition.description(),
                    "Threshold rule fired"
                );
                self.thing.add_event(event.clone());
                events.push(event);
            }
        }

        TickReport {
            tick,
            readings,
            events,
        }
    }
}
