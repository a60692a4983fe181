//! Attribute narrowing for turns the scoring stages left undecided.
//!
//! The turn text is read for three coarse attributes: whether something
//! broke or a service is being requested, whether it happened inside a
//! flat or on common property, and which object is named. Each attribute
//! is compared with the scenario's urgency, localization and object type,
//! in that order. A step that would drop every remaining candidate is
//! skipped, so narrowing never empties the list.

use serde::{Deserialize, Serialize};

use super::MatchCandidate;
use crate::catalog::{CatalogSnapshot, ServiceScenario, Urgency};
use crate::text::{normalize, phrase_similarity, words};

/// Object-type similarity that counts as "named in the text".
const OBJECT_MATCH_SIMILARITY: f64 = 0.8;

const INCIDENT_KEYWORDS: &[&str] = &[
    "теч", "тек", "протек", "прорыв", "слома", "сломан", "засор", "забит", "поврежд", "авари",
    "трещин", "отвал", "искрит", "затоп", "не работает", "не горит", "нет света", "нет воды",
    "нет отопления",
];
const REQUEST_KEYWORDS: &[&str] = &[
    "нужн", "прошу", "хочу", "заказ", "справк", "консульт", "подскаж", "установ", "поверк",
    "планов", "можно ли",
];
const INDIVIDUAL_KEYWORDS: &[&str] = &[
    "квартир", "ванн", "кухн", "балкон", "туалет", "комнат", "санузел", "спальн", "прихож",
    "индивидуал",
];
const COMMON_KEYWORDS: &[&str] = &[
    "подъезд", "лифт", "подвал", "крыш", "двор", "чердак", "лестниц", "площадк", "фасад",
    "мусоропровод", "общедомов", "общее имущество", "придомов",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    /// Something broke, leaks or stopped working.
    Incident,
    /// A planned service or information request.
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationKind {
    /// Inside one flat.
    Individual,
    /// Common property of the building or the yard.
    Common,
}

/// Attributes read from the turn text. `None` means undetermined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterProfile {
    pub incident: Option<IncidentKind>,
    pub location: Option<LocationKind>,
    /// Normalized turn text, matched against scenario object types.
    #[serde(skip)]
    text: String,
}

fn keyword_hits(normalized: &str, keywords: &[&str]) -> usize {
    let text_words = words(normalized);
    keywords
        .iter()
        .filter(|k| {
            if k.contains(' ') {
                normalized.contains(*k)
            } else {
                text_words.iter().any(|w| w.starts_with(*k))
            }
        })
        .count()
}

/// Whichever side has strictly more keyword hits.
fn pick<T>(normalized: &str, a: (&[&str], T), b: (&[&str], T)) -> Option<T> {
    let hits_a = keyword_hits(normalized, a.0);
    let hits_b = keyword_hits(normalized, b.0);
    match hits_a.cmp(&hits_b) {
        std::cmp::Ordering::Greater => Some(a.1),
        std::cmp::Ordering::Less => Some(b.1),
        std::cmp::Ordering::Equal => None,
    }
}

pub fn classify_location(normalized: &str) -> Option<LocationKind> {
    pick(
        normalized,
        (INDIVIDUAL_KEYWORDS, LocationKind::Individual),
        (COMMON_KEYWORDS, LocationKind::Common),
    )
}

pub fn classify_incident(normalized: &str) -> Option<IncidentKind> {
    pick(
        normalized,
        (INCIDENT_KEYWORDS, IncidentKind::Incident),
        (REQUEST_KEYWORDS, IncidentKind::Request),
    )
}

impl FilterProfile {
    /// Read the attributes from already normalized text.
    pub fn detect(normalized: &str) -> Self {
        Self {
            incident: classify_incident(normalized),
            location: classify_location(normalized),
            text: normalized.to_string(),
        }
    }

    fn location_fits(&self, scenario: &ServiceScenario) -> bool {
        match self.location {
            Some(wanted) => classify_location(&normalize(&scenario.localization)) == Some(wanted),
            None => true,
        }
    }

    fn incident_fits(&self, scenario: &ServiceScenario) -> bool {
        let planned = scenario.urgency == Urgency::Planned;
        match self.incident {
            Some(IncidentKind::Request) => planned,
            Some(IncidentKind::Incident) => !planned,
            None => true,
        }
    }

    fn object_fits(&self, scenario: &ServiceScenario) -> bool {
        let object = normalize(&scenario.object_type);
        !object.is_empty() && phrase_similarity(&self.text, &object) >= OBJECT_MATCH_SIMILARITY
    }

    /// Keep the candidates whose scenario attributes agree with the
    /// profile, preserving rank order.
    pub fn narrow(&self, candidates: &[MatchCandidate], catalog: &CatalogSnapshot) -> Vec<MatchCandidate> {
        type Check = fn(&FilterProfile, &ServiceScenario) -> bool;
        let steps: [(&str, Check); 3] = [
            ("location", Self::location_fits),
            ("incident", Self::incident_fits),
            ("object", Self::object_fits),
        ];
        let mut pool = candidates.to_vec();
        for (name, fits) in steps {
            if pool.len() < 2 {
                break;
            }
            let kept: Vec<MatchCandidate> = pool
                .iter()
                .filter(|c| catalog.get(c.scenario.id).is_some_and(|s| fits(self, s)))
                .cloned()
                .collect();
            if !kept.is_empty() && kept.len() < pool.len() {
                tracing::debug!(filter = name, before = pool.len(), after = kept.len(), "Candidates narrowed");
                pool = kept;
            }
        }
        pool
    }
}
