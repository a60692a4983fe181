//! Arbitration prompt construction and response parsing.

use serde::Deserialize;

use crate::catalog::{CatalogSnapshot, ServiceScenario};
use crate::matchers::MatchCandidate;

pub const SYSTEM_PROMPT: &str =
    "Ты - профессиональный диспетчер ЖКХ. Отвечай точно по заданной структуре.";

/// Answer the model gave, before catalog validation.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmVerdict {
    Scenario {
        /// Catalog code or numeric id as written by the model.
        key: String,
        confidence: Option<f64>,
        reason: Option<String>,
    },
    NoneFit {
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unparseable arbitration response: {0}")]
pub struct ParseError(pub String);

fn scenario_key(s: &ServiceScenario) -> String {
    if s.code.is_empty() {
        s.id.to_string()
    } else {
        s.code.clone()
    }
}

/// Build the prompt. Candidates are listed when present; otherwise up to
/// `catalog_limit` catalog entries are offered.
pub fn build_prompt(
    problem: &str,
    candidates: &[MatchCandidate],
    catalog: &CatalogSnapshot,
    max_candidates: usize,
    catalog_limit: usize,
) -> String {
    let mut options = String::new();
    let listed: Vec<&ServiceScenario> = if candidates.is_empty() {
        catalog.iter().take(catalog_limit).collect()
    } else {
        candidates
            .iter()
            .filter_map(|c| catalog.get(c.scenario.id))
            .take(max_candidates)
            .collect()
    };
    for s in &listed {
        options.push_str(&format!(
            "- {}: {} (категория: {})\n",
            scenario_key(s),
            s.scenario_name,
            s.category
        ));
    }
    if listed.is_empty() {
        options.push_str("Нет доступных услуг в каталоге.\n");
    }

    format!(
        "Описание проблемы пользователя: \"{problem}\"\n\n\
         Доступные услуги:\n{options}\n\
         Выбери наиболее подходящую услугу. Ответь в формате:\n\
         СЦЕНАРИЙ: [код услуги]\n\
         НАЗВАНИЕ: [название услуги]\n\
         УВЕРЕННОСТЬ: [0.0-1.0]\n\
         ПРИЧИНА: [краткое обоснование]\n\n\
         Если ни одна услуга не подходит, ответь:\n\
         СЦЕНАРИЙ: NONE\n\
         ПРИЧИНА: [описание почему не подходит]"
    )
}

#[derive(Deserialize)]
struct JsonVerdict {
    #[serde(default)]
    scenario_id: Option<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

fn clean_value(v: &str) -> String {
    v.trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim()
        .to_string()
}

fn parse_confidence(v: &str) -> Option<f64> {
    clean_value(v)
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0))
}

fn is_none_key(key: &str) -> bool {
    let k = key.trim().to_uppercase();
    k.is_empty() || k == "NONE" || k == "NULL"
}

fn parse_json(body: &str) -> Option<LlmVerdict> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    let parsed: JsonVerdict = serde_json::from_str(&body[start..=end]).ok()?;
    let key = match parsed.scenario_id {
        Some(serde_json::Value::String(s)) => s,
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if is_none_key(&key) {
        return Some(LlmVerdict::NoneFit {
            reason: parsed.reason,
        });
    }
    Some(LlmVerdict::Scenario {
        key,
        confidence: parsed.confidence.map(|c| c.clamp(0.0, 1.0)),
        reason: parsed.reason,
    })
}

/// Parse either a JSON object or the `СЦЕНАРИЙ:` line format.
pub fn parse_response(text: &str) -> Result<LlmVerdict, ParseError> {
    let body = text.trim();
    if body.contains('{') {
        if let Some(verdict) = parse_json(body) {
            return Ok(verdict);
        }
    }

    let mut key = None;
    let mut confidence = None;
    let mut reason = None;
    for line in body.lines() {
        let Some((k, v)) = line.split_once(':') else {
            continue;
        };
        match k.trim().trim_start_matches(['-', '*', ' ']).to_uppercase().as_str() {
            "СЦЕНАРИЙ" => key = Some(clean_value(v)),
            "УВЕРЕННОСТЬ" => confidence = parse_confidence(v),
            "ПРИЧИНА" => reason = Some(clean_value(v)).filter(|r| !r.is_empty()),
            _ => {}
        }
    }

    match key {
        Some(k) if is_none_key(&k) => Ok(LlmVerdict::NoneFit { reason }),
        Some(k) => Ok(LlmVerdict::Scenario {
            key: k,
            confidence,
            reason,
        }),
        None if is_none_key(body) => Ok(LlmVerdict::NoneFit { reason: None }),
        None => Err(ParseError(body.chars().take(120).collect())),
    }
}
