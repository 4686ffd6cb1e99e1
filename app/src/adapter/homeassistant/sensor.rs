use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::outage::{Event, Health, OutageState};

pub const UNAVAILABLE: &str = "unavailable";
const UNKNOWN: &str = "unknown";
const ATTRIBUTION: &str = "Data provided by Northern Powergrid";

/// Body of `POST /api/states/{entity_id}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub state: String,
    pub attributes: Map<String, Value>,
}

impl EntityState {
    pub fn unavailable() -> Self {
        Self {
            state: UNAVAILABLE.to_owned(),
            attributes: Map::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AreaSensors {
    id: String,
    name: String,
}

impl AreaSensors {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_owned(),
            name: name.to_owned(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn count_entity(&self) -> String {
        format!("sensor.{}_power_cuts", self.id)
    }

    pub fn latest_entity(&self) -> String {
        format!("sensor.{}_latest_power_cut", self.id)
    }

    /// Slots are numbered from 1
    pub fn slot_entity(&self, slot: usize) -> String {
        format!("sensor.{}_power_cut_{}", self.id, slot)
    }

    /// All sensor states of an area. Per-outage slots follow reference order and
    /// only exist for outages currently reported.
    pub fn states(&self, state: &OutageState) -> Vec<(String, EntityState)> {
        let mut result = vec![
            (self.count_entity(), self.count_state(state)),
            (self.latest_entity(), self.latest_state(state)),
        ];

        if let Some(snapshot) = &state.snapshot {
            for (index, event) in snapshot.events.iter().enumerate() {
                let slot = index + 1;
                let mut attributes = event_attributes(event);
                attributes.insert("friendly_name".to_owned(), json!(format!("{} {}", self.name, slot)));
                attributes.insert("icon".to_owned(), json!("mdi:alert"));

                result.push((
                    self.slot_entity(slot),
                    EntityState {
                        state: event.reference.clone(),
                        attributes,
                    },
                ));
            }
        }

        result
    }

    fn count_state(&self, state: &OutageState) -> EntityState {
        let count = state.snapshot.as_ref().map(|s| s.count);

        let mut attributes = Map::new();
        attributes.insert("postcode".to_owned(), json!(state.postcode));
        attributes.insert("friendly_name".to_owned(), json!(self.name));
        attributes.insert("attribution".to_owned(), json!(ATTRIBUTION));
        attributes.insert("health".to_owned(), json!(health_name(&state.health)));
        attributes.insert(
            "icon".to_owned(),
            json!(if count.unwrap_or(0) > 0 { "mdi:flash-off" } else { "mdi:flash" }),
        );
        attributes.insert("unit_of_measurement".to_owned(), json!("outages"));
        if let Some(last_success) = state.last_success {
            attributes.insert("last_success".to_owned(), json!(last_success));
        }
        if let Health::Stale { error } | Health::Failed { error } = &state.health {
            attributes.insert("error".to_owned(), json!(error));
        }

        EntityState {
            state: count.map(|c| c.to_string()).unwrap_or_else(|| UNAVAILABLE.to_owned()),
            attributes,
        }
    }

    fn latest_state(&self, state: &OutageState) -> EntityState {
        let Some(snapshot) = &state.snapshot else {
            return EntityState::unavailable();
        };

        let mut attributes = match &snapshot.latest {
            Some(event) => event_attributes(event),
            None => Map::new(),
        };
        attributes.remove("reference");
        attributes.insert("friendly_name".to_owned(), json!(format!("{} Latest", self.name)));
        attributes.insert("icon".to_owned(), json!("mdi:alert"));

        EntityState {
            state: snapshot
                .latest
                .as_ref()
                .map(|e| e.reference.clone())
                .unwrap_or_else(|| UNKNOWN.to_owned()),
            attributes,
        }
    }
}

/// Payload of the new / resolved outage events
pub fn event_payload(area: &str, postcode: &str, event: &Event) -> Value {
    let mut payload = event_attributes(event);
    payload.insert("area".to_owned(), json!(area));
    payload.insert("postcode".to_owned(), json!(postcode));
    Value::Object(payload)
}

fn event_attributes(event: &Event) -> Map<String, Value> {
    match serde_json::to_value(event) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn health_name(health: &Health) -> &'static str {
    match health {
        Health::Unknown => "unknown",
        Health::Ok => "ok",
        Health::Stale { .. } => "stale",
        Health::Failed { .. } => "failed",
    }
}
