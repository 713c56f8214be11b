//! Location registry for the weather source.
//!
//! The built-in locations live in `data/locations.toml`, baked into the
//! binary with [`include_str!`]. Deployments can add or override locations
//! from their config file through [`LocationRegistry::extend`].

use std::collections::BTreeMap;

use divvy_lake_ingest_models::{PartitionError, validate_scope};
use serde::{Deserialize, Serialize};

const BUILTIN_LOCATIONS: &str = include_str!("../data/locations.toml");

#[cfg(test)]
const EXPECTED_LOCATION_COUNT: usize = 2;

/// A named point the weather archive is queried for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Scope name used in partition paths (e.g. `chicago`).
    pub key: String,
    /// Display name written to the `location_name` column.
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Deserialize)]
struct LocationFile {
    locations: Vec<Location>,
}

/// Scope -> [`Location`] lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationRegistry {
    locations: BTreeMap<String, Location>,
}

impl LocationRegistry {
    /// The registry compiled into the binary.
    ///
    /// # Panics
    ///
    /// Panics if the embedded TOML is malformed (caught by the tests below).
    #[must_use]
    pub fn builtin() -> Self {
        let file: LocationFile = toml::de::from_str(BUILTIN_LOCATIONS)
            .unwrap_or_else(|e| panic!("Failed to parse locations.toml: {e}"));
        let mut registry = Self::default();
        for location in file.locations {
            registry.locations.insert(location.key.clone(), location);
        }
        registry
    }

    /// Adds `extra` locations, replacing built-ins with the same key.
    ///
    /// # Errors
    ///
    /// Returns [`PartitionError::InvalidScope`] if a key cannot be used as a
    /// scope.
    pub fn extend(
        &mut self,
        extra: impl IntoIterator<Item = Location>,
    ) -> Result<(), PartitionError> {
        for location in extra {
            validate_scope(&location.key)?;
            self.locations.insert(location.key.clone(), location);
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Location> {
        self.locations.get(key)
    }

    /// Registered keys in ascending order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.locations.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
