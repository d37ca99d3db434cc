use serde::Serialize;
use std::collections::HashMap;
use strum::IntoEnumIterator;
use thiserror::Error;

use super::{is_valid_identifier, normalize_name, BuiltinStatistic, RESERVED_COLUMNS};

/// A single trackable numeric statistic.
///
/// Persistent statistics always default to zero, matching the column default
/// in every backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StatisticType {
    name: String,
    persistent: bool,
    default_value: i32,
    display_name: Option<String>,
}

impl StatisticType {
    pub fn persistent(name: &str) -> Self {
        Self {
            name: normalize_name(name),
            persistent: true,
            default_value: 0,
            display_name: None,
        }
    }

    /// A statistic that only lives in memory, starting from `default_value`.
    pub fn local(name: &str, default_value: i32) -> Self {
        Self {
            name: normalize_name(name),
            persistent: false,
            default_value,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn default_value(&self) -> i32 {
        self.default_value
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Invalid statistic name: {name}")]
    InvalidName { name: String },

    #[error("Statistic name is reserved for the row layout: {name}")]
    Reserved { name: String },

    #[error("Statistic already registered: {name}")]
    Duplicate { name: String },
}

/// The process-wide set of statistics, populated once at startup.
///
/// Iteration follows registration order, which also fixes column order in
/// generated statements.
#[derive(Debug, Default)]
pub struct StatisticRegistry {
    statistics: Vec<StatisticType>,
    index: HashMap<String, usize>,
}

impl StatisticRegistry {
    pub fn builder() -> StatisticRegistryBuilder {
        StatisticRegistryBuilder::default()
    }

    /// Registry containing exactly the [`BuiltinStatistic`] set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        for builtin in BuiltinStatistic::iter() {
            registry.push(builtin.statistic_type());
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<&StatisticType> {
        self.index
            .get(&normalize_name(name))
            .map(|&position| &self.statistics[position])
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatisticType> {
        self.statistics.iter()
    }

    pub fn persistent(&self) -> impl Iterator<Item = &StatisticType> {
        self.statistics.iter().filter(|s| s.is_persistent())
    }

    pub fn len(&self) -> usize {
        self.statistics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statistics.is_empty()
    }

    fn push(&mut self, statistic: StatisticType) {
        self.index
            .insert(statistic.name.clone(), self.statistics.len());
        self.statistics.push(statistic);
    }
}

#[derive(Debug, Default)]
pub struct StatisticRegistryBuilder {
    registry: StatisticRegistry,
}

impl StatisticRegistryBuilder {
    pub fn register(mut self, statistic: StatisticType) -> Result<Self, RegistryError> {
        let name = statistic.name().to_string();
        if !is_valid_identifier(&name) {
            return Err(RegistryError::InvalidName { name });
        }
        if RESERVED_COLUMNS.contains(&name.as_str()) {
            return Err(RegistryError::Reserved { name });
        }
        if self.registry.index.contains_key(&name) {
            return Err(RegistryError::Duplicate { name });
        }

        self.registry.push(statistic);
        Ok(self)
    }

    pub fn with_builtins(self) -> Result<Self, RegistryError> {
        BuiltinStatistic::iter().try_fold(self, |builder, builtin| {
            builder.register(builtin.statistic_type())
        })
    }

    pub fn build(self) -> StatisticRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = StatisticRegistry::with_builtins();
        let kills = registry.get("KILLS").unwrap();
        assert_eq!(kills.name(), "kills");
        assert_eq!(kills.display_name(), "Kills");
    }

    #[test]
    fn test_persistent_filter_skips_local_statistics() {
        let registry = StatisticRegistry::with_builtins();
        assert!(registry.persistent().all(|s| s.is_persistent()));
        assert!(registry.persistent().all(|s| !s.name().starts_with("local_")));
        assert!(registry.len() > registry.persistent().count());
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let registry = StatisticRegistry::builder()
            .register(StatisticType::persistent("wins"))
            .unwrap()
            .register(StatisticType::local("streak", 0))
            .unwrap()
            .register(StatisticType::persistent("losses"))
            .unwrap()
            .build();

        let names: Vec<&str> = registry.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["wins", "streak", "losses"]);
    }

    #[test]
    fn test_rejects_duplicates() {
        let result = StatisticRegistry::builder()
            .register(StatisticType::persistent("wins"))
            .unwrap()
            .register(StatisticType::persistent("Wins"));

        assert_eq!(
            result.err(),
            Some(RegistryError::Duplicate {
                name: "wins".to_string()
            })
        );
    }

    #[test]
    fn test_rejects_reserved_and_invalid_names() {
        let reserved = StatisticRegistry::builder().register(StatisticType::persistent("uuid"));
        assert!(matches!(reserved, Err(RegistryError::Reserved { .. })));

        let invalid =
            StatisticRegistry::builder().register(StatisticType::persistent("kills`; --"));
        assert!(matches!(invalid, Err(RegistryError::InvalidName { .. })));
    }

    #[test]
    fn test_builder_with_builtins_and_custom_statistic() {
        let registry = StatisticRegistry::builder()
            .with_builtins()
            .unwrap()
            .register(StatisticType::persistent("bosses_slain").with_display_name("Bosses"))
            .unwrap()
            .build();

        assert_eq!(registry.get("bosses_slain").unwrap().display_name(), "Bosses");
        assert!(registry.get("kills").is_some());
    }
}
