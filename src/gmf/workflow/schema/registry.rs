// SPDX-License-Identifier: MIT

//! Discriminator-to-metadata registry
//!
//! Built once from the closed variant enums. Polymorphic types are keyed
//! `<Base>::<discriminator>` (`State::Delay`, `Condition::Vital Sign`);
//! fixed types by their bare name (`Code`, `DistributedTransitionOption`).

use once_cell::sync::Lazy;
use std::collections::HashMap;

use super::metadata::TypeMeta;
use crate::gmf::workflow::condition::ConditionType;
use crate::gmf::workflow::graph::module;
use crate::gmf::workflow::state::StateType;
use crate::gmf::workflow::{transition, types};

static REGISTRY: Lazy<HashMap<String, TypeMeta>> = Lazy::new(build);

fn build() -> HashMap<String, TypeMeta> {
    let mut map = HashMap::new();

    for state_type in StateType::ALL {
        map.insert(
            format!("State::{}", state_type.discriminator()),
            state_type.metadata(),
        );
    }
    for condition_type in ConditionType::ALL {
        map.insert(
            format!("Condition::{}", condition_type.discriminator()),
            condition_type.metadata(),
        );
    }

    let fixed = types::metadata()
        .into_iter()
        .chain(transition::metadata())
        .chain(module::metadata());
    for (key, meta) in fixed {
        map.insert(key.to_string(), meta);
    }

    log::debug!("Field metadata registry holds {} types", map.len());
    map
}

/// Metadata of a fixed type
pub fn lookup(key: &str) -> Option<&'static TypeMeta> {
    REGISTRY.get(key)
}

/// Metadata of a polymorphic type by discriminator
pub fn resolve(base: &str, discriminator: &str) -> Option<&'static TypeMeta> {
    REGISTRY.get(&format!("{}::{}", base, discriminator))
}
