//! Reference data types for the service catalog.
//!
//! The catalog is owned by an external store; the funnel only ever sees
//! read-only snapshots of it.

use serde::{Deserialize, Serialize};

/// Numeric scenario identifier. Ranking ties are broken on ascending id.
pub type ScenarioId = u64;

/// Urgency level attached to a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Planned,
    Normal,
    Urgent,
    Emergency,
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Normal
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planned => write!(f, "planned"),
            Self::Normal => write!(f, "normal"),
            Self::Urgent => write!(f, "urgent"),
            Self::Emergency => write!(f, "emergency"),
        }
    }
}

/// A weighted keyword or phrase attached to a scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    /// Weight coefficient applied to fuzzy similarity (1.0 = neutral).
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_weight() -> f64 {
    1.0
}

fn default_active() -> bool {
    true
}

impl Tag {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
            active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// One dispatchable municipal service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceScenario {
    pub id: ScenarioId,
    /// External scenario code (e.g. `"САН-001-КВ"`), kept for ticket creation.
    #[serde(default)]
    pub code: String,
    pub scenario_name: String,
    pub category: String,
    #[serde(default)]
    pub object_type: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Where the problem is located (apartment, common property, yard).
    #[serde(default)]
    pub localization: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl ServiceScenario {
    pub fn new(id: ScenarioId, scenario_name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id,
            code: String::new(),
            scenario_name: scenario_name.into(),
            category: category.into(),
            object_type: String::new(),
            urgency: Urgency::Normal,
            localization: String::new(),
            active: true,
            tags: Vec::new(),
        }
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_object_type(mut self, object_type: impl Into<String>) -> Self {
        self.object_type = object_type.into();
        self
    }

    pub fn with_localization(mut self, localization: impl Into<String>) -> Self {
        self.localization = localization.into();
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Active tags only.
    pub fn active_tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter().filter(|t| t.active)
    }
}

/// Compact reference to a scenario carried in decisions and memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRef {
    pub id: ScenarioId,
    pub name: String,
    pub category: String,
}

impl From<&ServiceScenario> for ScenarioRef {
    fn from(s: &ServiceScenario) -> Self {
        Self {
            id: s.id,
            name: s.scenario_name.clone(),
            category: s.category.clone(),
        }
    }
}
