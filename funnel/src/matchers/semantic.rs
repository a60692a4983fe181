//! Concept-rule matching.
//!
//! Independent of the tag vocabulary: each [`ConceptRule`] lists word
//! stems that signal a problem domain ("теч", "кран" -> water) and the
//! category/object names it maps to. A rule with `h` stem hits scores
//! `weight * (1 - 0.5^h)` for every scenario whose category, object type
//! or name mentions one of the rule's targets. Mentioning the scenario's
//! object type in the text adds [`OBJECT_BONUS`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{rank, MatchCandidate, MatcherError, Scorer, Stage, TurnText};
use crate::catalog::{CatalogSnapshot, ScenarioRef, ServiceScenario};
use crate::text::{normalize, phrase_similarity, words};

/// Added when the text names the scenario's object type.
pub const OBJECT_BONUS: f64 = 0.1;

/// Minimum object-type phrase similarity that earns the bonus.
const OBJECT_MATCH_SIMILARITY: f64 = 0.8;

/// Maps domain keywords to catalog categories/objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptRule {
    pub concept: String,
    /// Word stems (prefix match) or multi-word phrases (substring match).
    pub keywords: Vec<String>,
    /// Lowercase category/object/scenario-name fragments this concept
    /// points at.
    pub targets: Vec<String>,
    pub weight: f64,
}

impl ConceptRule {
    pub fn new(concept: &str, keywords: &[&str], targets: &[&str], weight: f64) -> Self {
        Self {
            concept: concept.to_string(),
            keywords: keywords.iter().map(|k| normalize(k)).collect(),
            targets: targets.iter().map(|t| normalize(t)).collect(),
            weight,
        }
    }

    /// Same rule with keywords and targets run through [`normalize`].
    /// Rules read from config files arrive as written.
    pub fn normalized(self) -> Self {
        Self {
            keywords: self.keywords.iter().map(|k| normalize(k)).filter(|k| !k.is_empty()).collect(),
            targets: self.targets.iter().map(|t| normalize(t)).filter(|t| !t.is_empty()).collect(),
            ..self
        }
    }

    /// Keywords present in the (normalized) text.
    fn hits<'a>(&'a self, normalized: &str, text_words: &[&str]) -> Vec<&'a str> {
        self.keywords
            .iter()
            .filter(|k| {
                if k.contains(' ') {
                    normalized.contains(k.as_str())
                } else {
                    text_words.iter().any(|w| w.starts_with(k.as_str()))
                }
            })
            .map(String::as_str)
            .collect()
    }

    fn targets_scenario(&self, scenario: &ServiceScenario) -> bool {
        let fields = [
            normalize(&scenario.category),
            normalize(&scenario.object_type),
            normalize(&scenario.scenario_name),
        ];
        self.targets
            .iter()
            .any(|t| fields.iter().any(|f| !f.is_empty() && f.contains(t.as_str())))
    }
}

/// Rules covering the common housing complaint domains.
pub fn default_rules() -> Vec<ConceptRule> {
    vec![
        ConceptRule::new(
            "water",
            &[
                "вод", "теч", "тек", "протек", "прорыв", "утечк", "засор", "канализац", "сантехн",
                "кран", "смесител", "раковин", "унитаз", "труб",
            ],
            &["сантехника", "водоснабжение", "канализация"],
            0.9,
        ),
        ConceptRule::new(
            "electricity",
            &[
                "свет", "электр", "лампоч", "розетк", "провод", "замыкан", "искрит", "щиток",
                "нет света",
            ],
            &["электрика", "электроснабжение", "освещение"],
            0.9,
        ),
        ConceptRule::new(
            "heating",
            &["отоплен", "батаре", "радиатор", "тепл", "холодн", "не греет", "стояк"],
            &["отопление", "теплоснабжение"],
            0.85,
        ),
        ConceptRule::new(
            "elevator",
            &["лифт", "кабин", "застрял"],
            &["лифт"],
            0.95,
        ),
        ConceptRule::new(
            "roof",
            &["крыш", "кровл", "затека", "чердак", "желоб", "водосток", "сосульк"],
            &["кровля", "крыша"],
            0.85,
        ),
        ConceptRule::new(
            "cleaning",
            &["уборк", "мусор", "грязн", "чистк", "вывоз", "контейнер", "убира"],
            &["уборка", "санитарн", "вывоз мусора"],
            0.8,
        ),
        ConceptRule::new(
            "landscape",
            &["дерев", "газон", "куст", "трав", "клумб", "площадк", "скамейк"],
            &["благоустройство", "озеленение"],
            0.7,
        ),
        ConceptRule::new(
            "repair",
            &["ремонт", "двер", "окн", "стен", "потол", "штукатур", "покрас"],
            &["ремонт", "общестроительн"],
            0.75,
        ),
    ]
}

#[derive(Debug, Clone)]
pub struct SemanticMatcher {
    rules: Vec<ConceptRule>,
}

impl Default for SemanticMatcher {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl SemanticMatcher {
    pub fn new(rules: Vec<ConceptRule>) -> Self {
        Self {
            rules: rules.into_iter().map(ConceptRule::normalized).collect(),
        }
    }

    pub fn rules(&self) -> &[ConceptRule] {
        &self.rules
    }

    pub fn score_text(&self, normalized: &str, catalog: &CatalogSnapshot) -> Vec<MatchCandidate> {
        let text_words = words(normalized);
        let fired: Vec<(&ConceptRule, Vec<&str>)> = self
            .rules
            .iter()
            .map(|r| (r, r.hits(normalized, &text_words)))
            .filter(|(_, hits)| !hits.is_empty())
            .collect();
        if fired.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for scenario in catalog.iter() {
            let mut best = 0.0_f64;
            let mut evidence = Vec::new();
            for (rule, hits) in &fired {
                if !rule.targets_scenario(scenario) {
                    continue;
                }
                let score = rule.weight * (1.0 - 0.5_f64.powi(hits.len() as i32));
                if score > best {
                    best = score;
                    evidence = hits.iter().map(|h| format!("{}:{h}", rule.concept)).collect();
                }
            }
            if best <= 0.0 {
                continue;
            }
            let object = normalize(&scenario.object_type);
            if !object.is_empty() && phrase_similarity(normalized, &object) >= OBJECT_MATCH_SIMILARITY {
                best += OBJECT_BONUS;
                evidence.push(format!("object:{object}"));
            }
            candidates.push(MatchCandidate::new(
                ScenarioRef::from(scenario),
                best,
                Stage::Semantic,
                evidence,
            ));
        }
        rank(&mut candidates);
        candidates
    }
}

#[async_trait]
impl Scorer for SemanticMatcher {
    fn stage(&self) -> Stage {
        Stage::Semantic
    }

    async fn score(
        &self,
        turn: &TurnText,
        catalog: &CatalogSnapshot,
    ) -> Result<Vec<MatchCandidate>, MatcherError> {
        Ok(self.score_text(&turn.normalized, catalog))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ServiceScenario, Tag};

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            ServiceScenario::new(10, "Протечка", "Сантехника").with_tag(Tag::new("протечка", 1.0)),
            ServiceScenario::new(11, "Замена смесителя", "Сантехника")
                .with_object_type("Смеситель"),
            ServiceScenario::new(20, "Лифт не работает", "Лифтовое хозяйство"),
            ServiceScenario::new(30, "Нет отопления", "Отопление").inactive(),
        ])
    }

    #[test]
    fn test_paraphrase_maps_to_category_without_tags() {
        let m = SemanticMatcher::default();
        let found = m.score_text(&normalize("Течёт кран"), &catalog());
        let ids: Vec<_> = found.iter().map(|c| c.scenario.id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!((found[0].confidence - 0.675).abs() < 1e-9);
        assert!(found[0].evidence.contains(&"water:кран".to_string()));
    }

    #[test]
    fn test_object_mention_adds_bonus() {
        let m = SemanticMatcher::default();
        let found = m.score_text(&normalize("сломался смеситель, течет"), &catalog());
        assert_eq!(found[0].scenario.id, 11);
        assert!((found[0].confidence - 0.775).abs() < 1e-9);
        assert!(found[0].evidence.iter().any(|e| e == "object:смеситель"));
    }

    #[test]
    fn test_inactive_scenarios_never_returned() {
        let m = SemanticMatcher::default();
        let found = m.score_text(&normalize("батареи холодные"), &catalog());
        assert!(found.is_empty());
    }

    #[test]
    fn test_no_concept_no_candidates() {
        let m = SemanticMatcher::default();
        assert!(m.score_text(&normalize("проблема в подъезде"), &catalog()).is_empty());
    }

    #[test]
    fn test_hand_written_rules_are_normalized() {
        let rule = ConceptRule {
            concept: "water".into(),
            keywords: vec!["Кран".into(), "Течёт".into()],
            targets: vec!["САНТЕХНИКА".into()],
            weight: 0.9,
        };
        let m = SemanticMatcher::new(vec![rule]);
        assert_eq!(m.rules()[0].keywords, vec!["кран", "течет"]);
        let found = m.score_text(&normalize("Течёт кран"), &catalog());
        assert_eq!(found.first().map(|c| c.scenario.id), Some(10));
    }

    #[test]
    fn test_rules_round_trip_through_toml() {
        #[derive(Serialize, Deserialize)]
        struct Wrapper {
            rules: Vec<ConceptRule>,
        }
        let text = toml::to_string(&Wrapper {
            rules: default_rules(),
        })
        .unwrap();
        let back: Wrapper = toml::from_str(&text).unwrap();
        assert_eq!(back.rules, default_rules());
    }
}
