// SPDX-License-Identifier: MIT

//! Population simulator
//!
//! Drives every top-level module for each individual in fixed time steps.
//! Individuals are independent: each gets its own person, contexts and
//! random stream, so they run in parallel on the blocking pool and the
//! results only depend on the master seed and the individual's index.

use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

use super::config::SimulationConfig;
use super::workflow::context::{Context, Status};
use super::workflow::registry::ModuleRegistry;
use crate::sim::person::{GENDER, RACE};
use crate::sim::time::{shift, Time, TimeUnit};
use crate::sim::{
    GmfError, Person, RandomStream, RecordAction, RecordEvent, RecordKind, SocioeconomicScores,
};

const GENDERS: [&str; 2] = ["M", "F"];
const RACES: [&str; 6] = ["white", "black", "asian", "hispanic", "native", "other"];

/// SNOMED-CT "General examination of patient"
pub const WELLNESS_ENCOUNTER_CODE: &str = "162673000";

/// Where one module ended up for one individual
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub status: Status,
    pub states_visited: usize,
}

/// Outcome of simulating one individual
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndividualReport {
    pub index: usize,
    pub id: Option<Uuid>,
    pub seed: u64,
    pub gender: Option<String>,
    pub race: Option<String>,
    pub ses_category: Option<String>,
    pub deceased: Option<Time>,
    pub steps: usize,
    pub record_events: usize,
    pub modules: Vec<ModuleReport>,
    /// Set when the individual's run failed; the other fields are then empty
    pub error: Option<String>,
}

impl IndividualReport {
    fn failed(index: usize, seed: u64, error: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            seed,
            gender: None,
            race: None,
            ses_category: None,
            deceased: None,
            steps: 0,
            record_events: 0,
            modules: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Runs a population through the registered modules
#[derive(Debug, Clone)]
pub struct Simulator {
    registry: ModuleRegistry,
    config: Arc<SimulationConfig>,
}

impl Simulator {
    pub fn new(registry: ModuleRegistry, config: SimulationConfig) -> Self {
        Self {
            registry,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Generate the individual at `index`, born at `start`, and step it
    /// through every top-level module until the configured horizon or death
    pub fn simulate_individual(&self, index: usize, start: Time) -> Result<IndividualReport, GmfError> {
        let mut rng = RandomStream::for_individual(self.config.seed, index as u64);
        let mut person = self.generate_person(start, &mut rng);

        let mut contexts = self
            .registry
            .roots()
            .into_iter()
            .map(|name| {
                self.registry
                    .get(name)
                    .map(|module| Context::new(module, self.registry.clone(), Arc::clone(&self.config)))
                    .ok_or_else(|| GmfError::UnknownModule(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let end = shift(start, f64::from(self.config.years), TimeUnit::Years).ok_or_else(|| {
            GmfError::config(format!(
                "{} years after {} is outside the supported time range",
                self.config.years, start
            ))
        })?;
        let step = Duration::days(i64::from(self.config.time_step_days));
        let wellness_interval = Duration::days(i64::from(self.config.wellness_interval_days.max(1)));
        let mut next_wellness = start + wellness_interval;
        let mut time = start;
        let mut steps = 0;

        while time <= end && person.is_alive(time) {
            steps += 1;
            for context in contexts.iter_mut() {
                context.run(time, &mut person, &mut rng)?;
                if !person.is_alive(time) {
                    break;
                }
            }
            if time >= next_wellness && person.is_alive(time) {
                self.wellness_encounter(&mut contexts, time, &mut person, &mut rng)?;
                next_wellness = next_wellness + wellness_interval;
            }
            if contexts.iter().all(|c| c.status() == &Status::Terminated) {
                break;
            }
            time = time + step;
        }

        log::debug!(
            "Individual {} ({}) done after {} steps{}",
            index,
            person.id,
            steps,
            person
                .deceased
                .map(|d| format!(", deceased {}", d))
                .unwrap_or_default()
        );

        Ok(IndividualReport {
            index,
            id: Some(person.id),
            seed: rng.seed(),
            gender: person.gender().map(str::to_string),
            race: person.race().map(str::to_string),
            ses_category: person
                .ses
                .as_ref()
                .and_then(|s| {
                    let ses = &self.config.socioeconomic_status;
                    ses.classify(ses.score(s))
                })
                .map(|c| c.to_string()),
            deceased: person.deceased,
            steps,
            record_events: person.record().events().len(),
            modules: contexts
                .iter()
                .map(|c| ModuleReport {
                    module: c.module_name().to_string(),
                    status: c.status().clone(),
                    states_visited: c.history().len(),
                })
                .collect(),
            error: None,
        })
    }

    /// Simulate the whole population. Individuals run concurrently; a failed
    /// individual is logged and reported, not fatal to the run.
    pub async fn run(&self, start: Time) -> Vec<IndividualReport> {
        let population = self.config.population;
        log::info!(
            "Simulating {} individuals through {} modules (seed {})",
            population,
            self.registry.roots().len(),
            self.config.seed
        );

        let mut tasks = JoinSet::new();
        for index in 0..population {
            let simulator = self.clone();
            tasks.spawn_blocking(move || {
                let seed = simulator.individual_seed(index);
                guarded(index, seed, || simulator.simulate_individual(index, start))
            });
        }

        let mut reports = Vec::with_capacity(population);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(err) => log::error!("Simulation task did not complete: {}", err),
            }
        }
        reports.sort_by_key(|r| r.index);

        // tasks that were cancelled leave a gap; account for every individual
        if reports.len() < population {
            let mut complete = Vec::with_capacity(population);
            let mut done = reports.into_iter().peekable();
            for index in 0..population {
                match done.next_if(|r| r.index == index) {
                    Some(report) => complete.push(report),
                    None => complete.push(IndividualReport::failed(
                        index,
                        self.individual_seed(index),
                        "simulation task did not complete",
                    )),
                }
            }
            reports = complete;
        }

        let deaths = reports.iter().filter(|r| r.deceased.is_some()).count();
        let failures = reports.iter().filter(|r| r.error.is_some()).count();
        log::info!(
            "Simulated {} individuals: {} deceased, {} failed",
            reports.len(),
            deaths,
            failures
        );
        reports
    }

    fn individual_seed(&self, index: usize) -> u64 {
        RandomStream::for_individual(self.config.seed, index as u64).seed()
    }

    fn generate_person(&self, birth: Time, rng: &mut RandomStream) -> Person {
        let mut person = Person::new();
        person.id = Uuid::from_bytes(rng.bytes16());
        person.birth = Some(birth);
        if let Some(gender) = rng.choose(&GENDERS) {
            person.set(GENDER, json!(gender));
        }
        if let Some(race) = rng.choose(&RACES) {
            person.set(RACE, json!(race));
        }
        person.ses = Some(SocioeconomicScores {
            education: rng.next_unit(),
            income: rng.next_unit(),
            occupation: rng.next_unit(),
        });
        person
    }

    /// Open a wellness encounter, let every waiting context through, close it
    fn wellness_encounter(
        &self,
        contexts: &mut [Context],
        time: Time,
        person: &mut Person,
        rng: &mut RandomStream,
    ) -> Result<(), GmfError> {
        person.record_mut().append(
            RecordEvent::new(
                RecordKind::Encounter,
                RecordAction::Start,
                time,
                WELLNESS_ENCOUNTER_CODE,
            )
            .with("class", "wellness"),
        );
        person.current_encounter = Some(WELLNESS_ENCOUNTER_CODE.to_string());

        for context in contexts.iter_mut() {
            if context.perform_wellness_encounter(time, person, rng)? {
                log::trace!("Wellness encounter released module '{}'", context.module_name());
            }
        }

        if let Some(code) = person.current_encounter.take() {
            person.record_mut().append(RecordEvent::new(
                RecordKind::Encounter,
                RecordAction::Stop,
                time,
                code,
            ));
        }
        Ok(())
    }
}

/// Run one individual, turning an error or a panic into a failed report
fn guarded<F>(index: usize, seed: u64, simulate: F) -> IndividualReport
where
    F: FnOnce() -> Result<IndividualReport, GmfError>,
{
    match panic::catch_unwind(AssertUnwindSafe(simulate)) {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            log::error!("Individual {} failed: {}", index, err);
            IndividualReport::failed(index, seed, err.to_string())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            log::error!("Individual {} panicked: {}", index, message);
            IndividualReport::failed(index, seed, format!("panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmf::workflow::graph::Module;
    use chrono::{TimeZone, Utc};

    fn registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(
            Module::from_document(&json!({"name": "checkups", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Checkup"},
                "Checkup": {"type": "Encounter", "wellness": true, "direct_transition": "Count"},
                "Count": {"type": "Counter", "attribute": "checkups", "action": "increment", "direct_transition": "Checkup"}
            }}))
            .unwrap(),
        );
        registry.register(
            Module::from_document(&json!({"name": "mortality", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Live"},
                "Live": {"type": "Delay", "range": {"low": 20, "high": 60, "unit": "years"}, "direct_transition": "Die"},
                "Die": {"type": "Death", "direct_transition": "Terminal"},
                "Terminal": {"type": "Terminal"}
            }}))
            .unwrap(),
        );
        registry
    }

    fn start() -> Time {
        Utc.with_ymd_and_hms(1950, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_individual_dies_within_range() {
        let simulator = Simulator::new(registry(), SimulationConfig::default());
        let report = simulator.simulate_individual(0, start()).unwrap();

        let deceased = report.deceased.unwrap();
        assert!(deceased >= shift(start(), 20.0, TimeUnit::Years).unwrap());
        assert!(deceased <= shift(start(), 60.0, TimeUnit::Years).unwrap() + Duration::days(7));
        assert_eq!(report.modules.len(), 2);
        assert_eq!(report.modules[1].status, Status::Terminated);
        assert!(report.record_events > 0);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_individual_is_reproducible() {
        let simulator = Simulator::new(registry(), SimulationConfig::default());
        let a = simulator.simulate_individual(3, start()).unwrap();
        let b = simulator.simulate_individual(3, start()).unwrap();
        assert_eq!(a, b);
        let c = simulator.simulate_individual(4, start()).unwrap();
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn test_population_order_and_determinism() {
        let config = SimulationConfig {
            population: 8,
            seed: 42,
            ..SimulationConfig::default()
        };
        let simulator = Simulator::new(registry(), config);

        let first = simulator.run(start()).await;
        let second = simulator.run(start()).await;
        assert_eq!(first.len(), 8);
        assert_eq!(
            first.iter().map(|r| r.index).collect::<Vec<_>>(),
            (0..8).collect::<Vec<_>>()
        );
        assert_eq!(first, second);
        assert_eq!(first[5], simulator.simulate_individual(5, start()).unwrap());
    }

    #[tokio::test]
    async fn test_failed_individual_is_reported() {
        let mut registry = ModuleRegistry::new();
        registry.register(
            Module::from_document(&json!({"name": "broken", "states": {
                "Initial": {"type": "Initial", "direct_transition": "Check"},
                "Check": {
                    "type": "Guard",
                    "allow": {"condition_type": "Vital Sign", "vital_sign": "BMI", "operator": ">", "value": 30},
                    "direct_transition": "Terminal"
                },
                "Terminal": {"type": "Terminal"}
            }}))
            .unwrap(),
        );
        let config = SimulationConfig {
            population: 2,
            ..SimulationConfig::default()
        };
        let reports = Simulator::new(registry, config).run(start()).await;
        assert_eq!(reports.len(), 2);
        assert!(reports
            .iter()
            .all(|r| r.error.as_deref().is_some_and(|e| e.contains("BMI"))));
    }

    fn single(document: serde_json::Value) -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry.register(Module::from_document(&document).unwrap());
        registry
    }

    #[tokio::test]
    async fn test_every_individual_reported_when_some_fail() {
        // women reach a guard on a vital sign nobody records
        let registry = single(json!({"name": "screening", "states": {
            "Initial": {"type": "Initial", "conditional_transition": [
                {"condition": {"condition_type": "Gender", "gender": "F"}, "transition": "Check"},
                {"transition": "Terminal"}
            ]},
            "Check": {
                "type": "Guard",
                "allow": {"condition_type": "Vital Sign", "vital_sign": "BMI", "operator": ">", "value": 30},
                "direct_transition": "Terminal"
            },
            "Terminal": {"type": "Terminal"}
        }}));
        let config = SimulationConfig {
            population: 32,
            seed: 7,
            ..SimulationConfig::default()
        };
        let simulator = Simulator::new(registry, config);
        let reports = simulator.run(start()).await;

        assert_eq!(reports.len(), 32);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.index, i);
            let direct = simulator.simulate_individual(i, start());
            assert_eq!(report.error.is_some(), direct.is_err());
            if report.error.is_some() {
                assert_eq!(report.seed, RandomStream::for_individual(7, i as u64).seed());
                assert!(report.modules.is_empty());
            }
        }
        assert!(reports.iter().any(|r| r.error.is_some()));
        assert!(reports.iter().any(|r| r.error.is_none()));
    }

    #[tokio::test]
    async fn test_delay_beyond_time_range_fails_individual() {
        let registry = single(json!({"name": "forever", "states": {
            "Initial": {"type": "Initial", "direct_transition": "Wait"},
            "Wait": {"type": "Delay", "exact": {"quantity": 1e12, "unit": "days"}, "direct_transition": "Terminal"},
            "Terminal": {"type": "Terminal"}
        }}));
        let config = SimulationConfig {
            population: 3,
            ..SimulationConfig::default()
        };
        let reports = Simulator::new(registry, config).run(start()).await;
        assert_eq!(reports.len(), 3);
        for report in &reports {
            let error = report.error.as_deref().unwrap();
            assert!(error.contains("State 'Wait' failed"), "{}", error);
            assert!(error.contains("outside the supported time range"), "{}", error);
        }
    }

    #[test]
    fn test_guarded_reports_panics() {
        let report = guarded(4, 99, || panic!("record store unavailable"));
        assert_eq!(report.index, 4);
        assert_eq!(report.seed, 99);
        assert_eq!(
            report.error.as_deref(),
            Some("panicked: record store unavailable")
        );

        let report = guarded(1, 5, || Err(GmfError::UnknownModule("missing".into())));
        assert_eq!(report.error.as_deref(), Some("Module 'missing' is not registered"));
    }
}
