// SPDX-License-Identifier: MIT

//! Simulation settings
//!
//! Loaded from a YAML file (`--config` or the `GMF_CONFIG` environment
//! variable). Every field has a default, so a partial file is fine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::sim::{GmfError, SocioeconomicScores};

pub const CONFIG_ENV: &str = "GMF_CONFIG";

/// Top-level simulation settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Master seed; each individual's stream is derived from it
    pub seed: u64,
    /// Number of individuals in a population run
    pub population: usize,
    /// Length of a simulated time step in days
    pub time_step_days: u32,
    /// Years simulated per individual
    pub years: u32,
    /// Days between wellness encounters offered to waiting modules
    pub wellness_interval_days: u32,
    /// Safety limit on states visited within one instant
    pub max_states_per_step: usize,
    pub socioeconomic_status: SesConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            population: 10,
            time_step_days: 7,
            years: 100,
            wellness_interval_days: 365,
            max_states_per_step: 1_000,
            socioeconomic_status: SesConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Load settings from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GmfError> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse settings from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Self, GmfError> {
        let config: SimulationConfig = serde_yaml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load from `GMF_CONFIG` if set, otherwise defaults
    pub fn from_env() -> Result<Self, GmfError> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                log::info!("Loading simulation config from {}", path);
                Self::load(path)
            }
            Err(_) => Ok(Self::default()),
        }
    }

    fn check(&self) -> Result<(), GmfError> {
        if self.time_step_days == 0 {
            return Err(GmfError::config("time_step_days must be at least 1"));
        }
        if self.max_states_per_step == 0 {
            return Err(GmfError::config("max_states_per_step must be at least 1"));
        }
        self.socioeconomic_status.check()
    }
}

/// Socioeconomic status weighting and category bounds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct SesConfig {
    pub weighting: SesWeighting,
    pub categories: SesCategories,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SesWeighting {
    pub education: f64,
    pub income: f64,
    pub occupation: f64,
}

impl Default for SesWeighting {
    fn default() -> Self {
        Self {
            education: 0.5,
            income: 0.3,
            occupation: 0.2,
        }
    }
}

/// `[low, high)` bounds per category; the highest band also includes its upper bound
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SesCategories {
    pub low: [f64; 2],
    pub middle: [f64; 2],
    pub high: [f64; 2],
}

impl Default for SesCategories {
    fn default() -> Self {
        Self {
            low: [0.0, 0.333],
            middle: [0.333, 0.667],
            high: [0.667, 1.0],
        }
    }
}

/// Socioeconomic band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SesCategory {
    Low,
    Middle,
    High,
}

impl FromStr for SesCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(SesCategory::Low),
            "middle" => Ok(SesCategory::Middle),
            "high" => Ok(SesCategory::High),
            other => Err(format!("unknown socioeconomic category '{}'", other)),
        }
    }
}

impl fmt::Display for SesCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SesCategory::Low => write!(f, "Low"),
            SesCategory::Middle => write!(f, "Middle"),
            SesCategory::High => write!(f, "High"),
        }
    }
}

impl SesConfig {
    /// Weighted composite of the three scores
    pub fn score(&self, scores: &SocioeconomicScores) -> f64 {
        let w = &self.weighting;
        w.education * scores.education + w.income * scores.income + w.occupation * scores.occupation
    }

    fn bounds(&self, category: SesCategory) -> [f64; 2] {
        match category {
            SesCategory::Low => self.categories.low,
            SesCategory::Middle => self.categories.middle,
            SesCategory::High => self.categories.high,
        }
    }

    /// Whether a composite score falls in the band
    pub fn in_category(&self, category: SesCategory, score: f64) -> bool {
        let [low, high] = self.bounds(category);
        let top = self.categories.high[1];
        score >= low && (score < high || (high == top && score <= high))
    }

    /// The band a composite score falls in, if any
    pub fn classify(&self, score: f64) -> Option<SesCategory> {
        [SesCategory::Low, SesCategory::Middle, SesCategory::High]
            .into_iter()
            .find(|c| self.in_category(*c, score))
    }

    fn check(&self) -> Result<(), GmfError> {
        let w = &self.weighting;
        if [w.education, w.income, w.occupation].iter().any(|v| *v < 0.0) {
            return Err(GmfError::config("socioeconomic weights must not be negative"));
        }
        for category in [SesCategory::Low, SesCategory::Middle, SesCategory::High] {
            let [low, high] = self.bounds(category);
            if low > high {
                return Err(GmfError::config(format!(
                    "socioeconomic category {} has low bound {} above high bound {}",
                    category, low, high
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ses() -> SesConfig {
        SesConfig::default()
    }

    #[test]
    fn test_classification_bands() {
        let config = ses();
        assert_eq!(config.classify(0.9), Some(SesCategory::High));
        assert_eq!(config.classify(0.5), Some(SesCategory::Middle));
        assert_eq!(config.classify(0.2), Some(SesCategory::Low));
    }

    #[test]
    fn test_bands_are_exclusive() {
        let config = ses();
        for (score, expected) in [
            (0.9, SesCategory::High),
            (0.5, SesCategory::Middle),
            (0.2, SesCategory::Low),
        ] {
            for category in [SesCategory::Low, SesCategory::Middle, SesCategory::High] {
                assert_eq!(config.in_category(category, score), category == expected);
            }
        }
    }

    #[test]
    fn test_half_open_boundaries() {
        let config = ses();
        assert_eq!(config.classify(0.333), Some(SesCategory::Middle));
        assert_eq!(config.classify(0.667), Some(SesCategory::High));
        assert_eq!(config.classify(1.0), Some(SesCategory::High));
        assert_eq!(config.classify(1.2), None);
    }

    #[test]
    fn test_weighted_score() {
        let config = ses();
        let scores = SocioeconomicScores {
            education: 0.75,
            income: 1.0,
            occupation: 0.7,
        };
        assert!((config.score(&scores) - 0.815).abs() < 1e-9);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
seed: 42
socioeconomic_status:
  weighting:
    income: 0.4
"#;
        let config = SimulationConfig::parse_yaml(yaml).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.time_step_days, 7);
        assert_eq!(config.socioeconomic_status.weighting.income, 0.4);
        assert_eq!(config.socioeconomic_status.weighting.education, 0.5);
        assert_eq!(config.socioeconomic_status.categories.low, [0.0, 0.333]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let yaml = "time_step_days: 0\n";
        assert!(SimulationConfig::parse_yaml(yaml).is_err());

        let yaml = r#"
socioeconomic_status:
  categories:
    low: [0.5, 0.1]
"#;
        let err = SimulationConfig::parse_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Low"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("High".parse::<SesCategory>().unwrap(), SesCategory::High);
        assert_eq!("middle".parse::<SesCategory>().unwrap(), SesCategory::Middle);
        assert!("upper".parse::<SesCategory>().is_err());
    }
}
