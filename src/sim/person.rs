// SPDX-License-Identifier: MIT

//! The simulated individual
//!
//! A [`Person`] carries named attributes (set by module states or by the
//! population generator), demographic facts, vital signs, symptoms and a
//! handle to its clinical record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use super::record::{ClinicalRecord, HealthRecord};
use super::time::Time;

pub const GENDER: &str = "gender";
pub const RACE: &str = "race";

/// Raw socioeconomic scores, each in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SocioeconomicScores {
    pub education: f64,
    pub income: f64,
    pub occupation: f64,
}

/// Most recent measurement of a vital sign
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VitalSign {
    pub value: f64,
    pub unit: String,
}

/// A simulated individual
pub struct Person {
    pub id: Uuid,
    pub birth: Option<Time>,
    pub deceased: Option<Time>,
    pub ses: Option<SocioeconomicScores>,
    attributes: HashMap<String, Value>,
    vital_signs: HashMap<String, VitalSign>,
    /// symptom -> cause -> level
    symptoms: HashMap<String, HashMap<String, f64>>,
    /// Code of the encounter currently open, if any
    pub current_encounter: Option<String>,
    record: Box<dyn ClinicalRecord>,
}

impl Person {
    pub fn new() -> Self {
        Self::with_record(Box::new(HealthRecord::new()))
    }

    /// Create a person whose facts go to the given record
    pub fn with_record(record: Box<dyn ClinicalRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            birth: None,
            deceased: None,
            ses: None,
            attributes: HashMap::new(),
            vital_signs: HashMap::new(),
            symptoms: HashMap::new(),
            current_encounter: None,
            record,
        }
    }

    /// Set an attribute; `Value::Null` clears it
    pub fn set(&mut self, key: &str, value: Value) {
        if value.is_null() {
            self.attributes.remove(key);
        } else {
            self.attributes.insert(key.to_string(), value);
        }
    }

    /// Get an attribute value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Get a nested attribute value using dot notation (e.g., "labs.a1c")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.attributes.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Attribute as a string, if it is one
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn gender(&self) -> Option<&str> {
        self.get_str(GENDER)
    }

    pub fn race(&self) -> Option<&str> {
        self.get_str(RACE)
    }

    pub fn is_alive(&self, time: Time) -> bool {
        self.deceased.map_or(true, |d| time < d)
    }

    pub fn set_vital_sign(&mut self, name: &str, value: f64, unit: &str) {
        self.vital_signs.insert(
            name.to_string(),
            VitalSign {
                value,
                unit: unit.to_string(),
            },
        );
    }

    pub fn vital_sign(&self, name: &str) -> Option<&VitalSign> {
        self.vital_signs.get(name)
    }

    pub fn set_symptom(&mut self, cause: &str, symptom: &str, level: f64) {
        self.symptoms
            .entry(symptom.to_string())
            .or_default()
            .insert(cause.to_string(), level);
    }

    /// Highest level of a symptom across all causes
    pub fn symptom(&self, symptom: &str) -> f64 {
        self.symptoms
            .get(symptom)
            .map(|causes| causes.values().copied().fold(0.0, f64::max))
            .unwrap_or(0.0)
    }

    pub fn record(&self) -> &dyn ClinicalRecord {
        self.record.as_ref()
    }

    pub fn record_mut(&mut self) -> &mut dyn ClinicalRecord {
        self.record.as_mut()
    }

    /// Attributes as a JSON object (sorted by key)
    pub fn attributes_json(&self) -> Value {
        let mut keys: Vec<&String> = self.attributes.keys().collect();
        keys.sort();
        let map: Map<String, Value> = keys
            .into_iter()
            .map(|k| (k.clone(), self.attributes[k].clone()))
            .collect();
        Value::Object(map)
    }
}

impl Default for Person {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Person {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Person")
            .field("id", &self.id)
            .field("birth", &self.birth)
            .field("deceased", &self.deceased)
            .field("attributes", &self.attributes)
            .field("events", &self.record.events().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_person() {
        let person = Person::new();
        assert!(person.get("anything").is_none());
        assert!(person.gender().is_none());
    }

    #[test]
    fn test_set_and_clear() {
        let mut person = Person::new();
        person.set("Smoker", json!(true));
        assert_eq!(person.get("Smoker"), Some(&json!(true)));

        person.set("Smoker", Value::Null);
        assert!(person.get("Smoker").is_none());
    }

    #[test]
    fn test_get_path() {
        let mut person = Person::new();
        person.set("labs", json!({"a1c": {"value": 6.5}}));

        assert_eq!(person.get_path("labs.a1c.value"), Some(&json!(6.5)));
        assert_eq!(person.get_path("labs.ldl"), None);
    }

    #[test]
    fn test_symptom_takes_max_cause() {
        let mut person = Person::new();
        assert_eq!(person.symptom("PainLevel"), 0.0);

        person.set_symptom("Appendicitis", "PainLevel", 60.0);
        person.set_symptom("Injury", "PainLevel", 30.0);
        assert_eq!(person.symptom("PainLevel"), 60.0);

        person.set_symptom("Appendicitis", "PainLevel", 10.0);
        assert_eq!(person.symptom("PainLevel"), 30.0);
    }

    #[test]
    fn test_attributes_json_is_sorted() {
        let mut person = Person::new();
        person.set("b", json!(2));
        person.set("a", json!(1));
        assert_eq!(
            serde_json::to_string(&person.attributes_json()).unwrap(),
            r#"{"a":1,"b":2}"#
        );
    }
}
