//! Device Catalog
//!
//! Factories for the four simulated underwater sensors. Each factory builds
//! its own thing, its own values and the poller that owns them; nothing is
//! shared between devices.

use std::sync::Arc;

use thing_runtime::{
    Condition, DevicePoller, RandomSource, SensorChannel, SensorSource, ThresholdRule,
};
use thing_types::{
    EventSchema, Property, PropertySchema, PropertyType, Thing, ThingResult, Value,
};

use crate::config::AlertConfig;

/// Semantic tag shared by every device
pub const MULTI_LEVEL_SENSOR: &str = "MultiLevelSensor";

pub const GAS_LEAKAGE: &str = "GasLeakage";

/// Produces the sensor source for `(thing_id, property)`
pub type SourceFactory = dyn Fn(&str, &str) -> Box<dyn SensorSource> + Send + Sync;

/// Random readings in `[0, 35]` for every channel
pub fn random_sources(_thing_id: &str, _property: &str) -> Box<dyn SensorSource> {
    Box::new(RandomSource::default())
}

/// A constructed device: the shared thing plus the poller that feeds it
#[derive(Debug)]
pub struct Device {
    pub thing: Arc<Thing>,
    pub poller: DevicePoller,
}

/// Collects properties and their sensor channels while a thing is built
struct DeviceBuilder<'a> {
    thing: Thing,
    channels: Vec<SensorChannel>,
    rules: Vec<ThresholdRule>,
    sources: &'a SourceFactory,
}

impl<'a> DeviceBuilder<'a> {
    fn new(id: &str, description: &str, sources: &'a SourceFactory) -> Self {
        Self {
            thing: Thing::new(id, id, vec![MULTI_LEVEL_SENSOR.to_string()], description),
            channels: Vec::new(),
            rules: Vec::new(),
            sources,
        }
    }

    /// Add a read-only number property backed by a simulated sensor
    fn reading(mut self, name: &str, schema: PropertySchema) -> ThingResult<Self> {
        let property = Property::new(&self.thing, name, Value::shared(0.0), schema.read_only())?;
        let source = (self.sources)(self.thing.id(), name);
        let channel = SensorChannel::for_property(&property, source);

        self.thing.add_property(property)?;
        self.channels.push(channel);
        Ok(self)
    }

    fn event(mut self, name: &str, schema: EventSchema) -> ThingResult<Self> {
        self.thing.add_available_event(name, schema)?;
        Ok(self)
    }

    fn rule(mut self, rule: ThresholdRule) -> Self {
        self.rules.push(rule);
        self
    }

    fn build(self) -> ThingResult<Device> {
        let thing = Arc::new(self.thing);
        let poller = DevicePoller::new(Arc::clone(&thing), self.channels, self.rules)?;
        Ok(Device { thing, poller })
    }
}

fn level(title: &str, description: &str) -> PropertySchema {
    PropertySchema::number("LevelProperty", title).with_description(description)
}

fn frequency(title: &str, description: &str) -> PropertySchema {
    PropertySchema::number("FrequencyProperty", title)
        .with_description(description)
        .with_unit("hertz")
}

/// PD1: water chemistry sensor with the gas leakage alert
pub fn pd1(alerts: &AlertConfig, sources: &SourceFactory) -> ThingResult<Device> {
    DeviceBuilder::new("PD1", "Sensor for underwater technology", sources)
        .event(
            GAS_LEAKAGE,
            EventSchema::new(PropertyType::Boolean).with_description("Event for GasLeakage"),
        )?
        .reading(
            "CO2",
            level("CO2", "The current CO2 in %")
                .with_unit("percent")
                .with_bounds(0.0, 100.0),
        )?
        .reading("Gravity", level("Gravity", "The current Gravity in m/s^2"))?
        .reading("pH", level("pH", "The current pH level"))?
        .reading(
            "Temperature",
            PropertySchema::number("TemperatureProperty", "Temperature")
                .with_description("The current temperature in celsius")
                .with_unit("degree celsius"),
        )?
        .reading(
            "Salinity",
            level("Salinity", "The current Salinity in parts per thousand"),
        )?
        .reading("Turbidity", level("Turbidity", "The current Turbidity in FTU"))?
        .rule(
            ThresholdRule::new(
                "CO2",
                Condition::LowLimit {
                    value: alerts.gas_leakage_below,
                },
                GAS_LEAKAGE,
                serde_json::Value::Bool(true),
            )
            .with_mode(alerts.fire_mode),
        )
        .build()
}

/// PD2: acoustic survey and positioning sensor
pub fn pd2(sources: &SourceFactory) -> ThingResult<Device> {
    DeviceBuilder::new("PD2", "Sensor for underwater technology", sources)
        .reading(
            "Acoustic Tomography",
            frequency(
                "Acoustic Tomography",
                "The current Acoustic Tomography in Hertz",
            ),
        )?
        .reading(
            "Geo-Positioning",
            level("Geo-Positioning", "The Geo-Positioning in coordinates"),
        )?
        .reading(
            "Acoustic Environment",
            frequency("Acoustic Environment", "The Acoustic Environment in Hertz"),
        )?
        .reading(
            "Oceanographic Point",
            level("Oceanographic Point", "The Oceanographic Point in coordinates"),
        )?
        .build()
}

/// PD3: acoustic resonance sensor
pub fn pd3(sources: &SourceFactory) -> ThingResult<Device> {
    DeviceBuilder::new("PD3", "Sensor for underwater technology", sources)
        .reading(
            "Acoustic Resonance",
            frequency(
                "Acoustic Resonance",
                "The current Acoustic Resonance in Hertz",
            ),
        )?
        .build()
}

/// PD4: distributed acoustic sensing on a pipeline
pub fn pd4(sources: &SourceFactory) -> ThingResult<Device> {
    DeviceBuilder::new("PD4", "PD4 Sensor for underwater technology", sources)
        .reading(
            "Pipeline Vibrations (DAS)",
            frequency(
                "Pipeline Vibrations (DAS)",
                "The current Pipeline Vibrations in Hertz",
            ),
        )?
        .build()
}

/// Every device, in registry order
pub fn catalog(alerts: &AlertConfig, sources: &SourceFactory) -> ThingResult<Vec<Device>> {
    Ok(vec![
        pd1(alerts, sources)?,
        pd2(sources)?,
        pd3(sources)?,
        pd4(sources)?,
    ])
}
