//! Service catalog: read-only reference data consumed by the matchers.
//!
//! A [`CatalogProvider`] returns the raw scenario list; the funnel turns it
//! into a [`CatalogSnapshot`] which drops inactive scenarios and inactive
//! tags up front, so no matcher can ever see them.

pub mod types;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

pub use types::{ScenarioId, ScenarioRef, ServiceScenario, Tag, Urgency};

/// Errors raised while fetching reference data.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog store unreachable: {0}")]
    Unavailable(String),

    #[error("catalog data malformed: {0}")]
    Malformed(String),
}

/// Read-only source of scenarios joined with their tags.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Fetch the current scenario list. Inactive entries may be included;
    /// the snapshot filters them.
    async fn scenarios(&self) -> Result<Vec<ServiceScenario>, CatalogError>;
}

/// Immutable view of the active catalog for one turn.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    scenarios: BTreeMap<ScenarioId, ServiceScenario>,
}

impl CatalogSnapshot {
    /// Build a snapshot, keeping only active scenarios and their active tags.
    pub fn new(scenarios: impl IntoIterator<Item = ServiceScenario>) -> Self {
        let scenarios = scenarios
            .into_iter()
            .filter(|s| s.active)
            .map(|mut s| {
                s.tags.retain(|t| t.active && !t.name.trim().is_empty());
                (s.id, s)
            })
            .collect();
        Self { scenarios }
    }

    pub fn get(&self, id: ScenarioId) -> Option<&ServiceScenario> {
        self.scenarios.get(&id)
    }

    pub fn contains(&self, id: ScenarioId) -> bool {
        self.scenarios.contains_key(&id)
    }

    /// Active scenarios in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &ServiceScenario> {
        self.scenarios.values()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Look up by catalog code (case-insensitive) or numeric id.
    pub fn resolve(&self, key: &str) -> Option<&ServiceScenario> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        self.scenarios
            .values()
            .find(|s| !s.code.is_empty() && s.code.eq_ignore_ascii_case(key))
            .or_else(|| key.parse::<ScenarioId>().ok().and_then(|id| self.get(id)))
    }

    /// Copy of this snapshot without the given scenarios.
    pub fn excluding(&self, ids: &BTreeSet<ScenarioId>) -> Self {
        if ids.is_empty() {
            return self.clone();
        }
        Self {
            scenarios: self
                .scenarios
                .iter()
                .filter(|(id, _)| !ids.contains(id))
                .map(|(id, s)| (*id, s.clone()))
                .collect(),
        }
    }
}

/// In-memory catalog, also used as a test double for an unreachable store.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    scenarios: RwLock<Vec<ServiceScenario>>,
    unavailable: RwLock<Option<String>>,
}

impl StaticCatalog {
    pub fn new(scenarios: Vec<ServiceScenario>) -> Self {
        Self {
            scenarios: RwLock::new(scenarios),
            unavailable: RwLock::new(None),
        }
    }

    /// Parse a JSON array of scenarios.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let scenarios: Vec<ServiceScenario> =
            serde_json::from_str(json).map_err(|e| CatalogError::Malformed(e.to_string()))?;
        Ok(Self::new(scenarios))
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Replace the scenario list.
    pub fn replace(&self, scenarios: Vec<ServiceScenario>) {
        if let Ok(mut guard) = self.scenarios.write() {
            *guard = scenarios;
        }
    }

    /// Simulate an outage (`Some(reason)`) or restore service (`None`).
    pub fn set_unavailable(&self, reason: Option<&str>) {
        if let Ok(mut guard) = self.unavailable.write() {
            *guard = reason.map(str::to_string);
        }
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn scenarios(&self) -> Result<Vec<ServiceScenario>, CatalogError> {
        if let Some(reason) = self
            .unavailable
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".into()))?
            .clone()
        {
            return Err(CatalogError::Unavailable(reason));
        }
        self.scenarios
            .read()
            .map(|s| s.clone())
            .map_err(|_| CatalogError::Unavailable("lock poisoned".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ServiceScenario> {
        vec![
            ServiceScenario::new(2, "Нет отопления", "Отопление")
                .with_tag(Tag::new("батарея", 1.0))
                .with_tag(Tag::new("радиатор", 1.0).inactive()),
            ServiceScenario::new(1, "Течь крана", "Сантехника").with_tag(Tag::new("кран", 1.0)),
            ServiceScenario::new(3, "Старый сценарий", "Архив").inactive(),
        ]
    }

    #[test]
    fn test_snapshot_drops_inactive_scenarios_and_tags() {
        let snap = CatalogSnapshot::new(sample());
        assert_eq!(snap.len(), 2);
        assert!(!snap.contains(3));
        let heating = snap.get(2).unwrap();
        assert_eq!(heating.tags.len(), 1);
        assert_eq!(heating.tags[0].name, "батарея");
    }

    #[test]
    fn test_snapshot_iterates_in_id_order() {
        let snap = CatalogSnapshot::new(sample());
        let ids: Vec<_> = snap.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_resolve_by_code_or_id() {
        let snap = CatalogSnapshot::new(vec![
            ServiceScenario::new(5, "Течь крана", "Сантехника").with_code("SAN-001-KRN"),
            ServiceScenario::new(6, "Засор", "Сантехника"),
        ]);
        assert_eq!(snap.resolve("san-001-krn").unwrap().id, 5);
        assert_eq!(snap.resolve(" 6 ").unwrap().id, 6);
        assert!(snap.resolve("7").is_none());
        assert!(snap.resolve("").is_none());
    }

    #[test]
    fn test_excluding_removes_ids() {
        let snap = CatalogSnapshot::new(sample());
        let rest = snap.excluding(&BTreeSet::from([1]));
        assert_eq!(rest.len(), 1);
        assert!(rest.contains(2));
        assert_eq!(snap.len(), 2);
    }

    #[tokio::test]
    async fn test_static_catalog_outage() {
        let catalog = StaticCatalog::new(sample());
        assert_eq!(catalog.scenarios().await.unwrap().len(), 3);

        catalog.set_unavailable(Some("connection refused"));
        let err = catalog.scenarios().await.unwrap_err();
        assert!(matches!(err, CatalogError::Unavailable(_)));

        catalog.set_unavailable(None);
        assert!(catalog.scenarios().await.is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let json = r#"[{"id": 7, "scenario_name": "Лифт застрял", "category": "Лифт",
                        "tags": [{"name": "лифт"}]}]"#;
        let catalog = StaticCatalog::from_json(json).unwrap();
        let scenarios = catalog.scenarios.read().unwrap();
        assert!(scenarios[0].active);
        assert_eq!(scenarios[0].tags[0].weight, 1.0);
        assert_eq!(scenarios[0].urgency, Urgency::Normal);
    }
}
