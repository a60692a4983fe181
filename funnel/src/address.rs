//! Address fragment and user-name extraction from free-text turns.
//!
//! Users rarely give a full address in one message ("ул. Ленина", then
//! "дом 5", then "кв. 12"). Fragments are extracted per turn and merged
//! into dialog memory without ever erasing a known value.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Address components accumulated over a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFragments {
    pub street: Option<String>,
    pub house: Option<String>,
    pub apartment: Option<String>,
    pub entrance: Option<String>,
}

/// Values treated as "not provided" when merging.
fn is_placeholder(value: &Option<String>) -> bool {
    match value.as_deref().map(str::trim) {
        None => true,
        Some(v) => v.is_empty() || matches!(v, "-" | "?" | "не указан" | "не указано"),
    }
}

impl AddressFragments {
    pub fn is_empty(&self) -> bool {
        self.fields().iter().all(|(_, v)| is_placeholder(v))
    }

    /// Enough to open a ticket: street and house.
    pub fn is_complete(&self) -> bool {
        !is_placeholder(&self.street) && !is_placeholder(&self.house)
    }

    /// Fraction of the four components that are known.
    pub fn completeness(&self) -> f64 {
        let filled = self.fields().iter().filter(|(_, v)| !is_placeholder(v)).count();
        filled as f64 / 4.0
    }

    fn fields(&self) -> [(&'static str, &Option<String>); 4] {
        [
            ("street", &self.street),
            ("house", &self.house),
            ("apartment", &self.apartment),
            ("entrance", &self.entrance),
        ]
    }

    /// Merge `incoming` into `self`. A field is only written when the
    /// current value is absent or a placeholder; known values are never
    /// erased or overwritten. Returns the names of fields that changed.
    pub fn merge_from(&mut self, incoming: &AddressFragments) -> Vec<&'static str> {
        let mut updated = Vec::new();
        let pairs: [(&'static str, &mut Option<String>, &Option<String>); 4] = [
            ("street", &mut self.street, &incoming.street),
            ("house", &mut self.house, &incoming.house),
            ("apartment", &mut self.apartment, &incoming.apartment),
            ("entrance", &mut self.entrance, &incoming.entrance),
        ];
        for (name, current, new) in pairs {
            if is_placeholder(new) {
                continue;
            }
            if is_placeholder(current) {
                *current = new.clone();
                updated.push(name);
            } else if *current != *new {
                tracing::debug!(field = name, kept = ?current, ignored = ?new, "Address field already set");
            }
        }
        updated
    }

    /// Human-readable form, e.g. `ул. Ленина, д. 5, кв. 12`.
    pub fn display_string(&self) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(s) = self.street.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("ул. {}", s));
        }
        if let Some(h) = self.house.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("д. {}", h));
        }
        if let Some(a) = self.apartment.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("кв. {}", a));
        }
        if let Some(e) = self.entrance.as_deref().filter(|s| !s.trim().is_empty()) {
            parts.push(format!("подъезд {}", e));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

static STREET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:\bулиц[аеуы]\b|\bул(?:\.|\b)|\bпроспект\w*|\bпр-т\b|\bпр\.|\bпереул\w*|\bпер\.|\bбульвар\w*|\bбул\.)\s*([а-яa-z][а-яa-z\-]*(?:\s+[а-яa-z][а-яa-z\-]*){0,2})",
    )
    .expect("STREET_RE regex should compile")
});

static HOUSE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bдом\w*|\bд\.?)\s*№?\s*(\d+[а-я]?(?:/\d+)?)")
        .expect("HOUSE_RE regex should compile")
});

static HOUSE_AFTER_STREET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s,]*(\d+[а-я]?(?:/\d+)?)\b").expect("HOUSE_AFTER_STREET_RE regex should compile")
});

static APARTMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bквартир\w*|\bкв\.?)\s*№?\s*(\d+)").expect("APARTMENT_RE regex should compile")
});

static ENTRANCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bподъезд\w*|\bпод\.)\s*№?\s*(\d+)").expect("ENTRANCE_RE regex should compile")
});

static ENTRANCE_ORDINAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d+)\s*-?\s*(?:й|ий|ой|ом|м)?\s+подъезд")
        .expect("ENTRANCE_ORDINAL_RE regex should compile")
});

static NAME_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"меня\s+зовут\s+([а-я]{2,})",
        r"мо[её]\s+имя\s+([а-я]{2,})",
        r"(?:^|[\s,!.])я(?:\s*[-,—]\s*|\s+)([а-я]{3,})\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("NAME_RES regex should compile"))
    .collect()
});

/// Tokens that end a captured street name.
const STREET_STOP_WORDS: &[&str] = &[
    "дом", "д", "кв", "квартира", "квартире", "подъезд", "подъезде", "у", "в", "на", "и", "не",
    "нет", "течет", "сломан", "сломался", "работает",
];

/// Words that follow "я" but are not names.
const NAME_STOP_WORDS: &[&str] = &[
    "живу", "хочу", "снова", "опять", "уже", "тут", "здесь", "жилец", "житель", "собственник",
    "жительница", "пишу", "прошу", "звоню", "сообщаю", "хотел", "хотела", "был", "была",
];

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn prepare(text: &str) -> String {
    text.to_lowercase().replace('ё', "е")
}

/// Extract whichever address components appear in a single turn.
pub fn extract_address(text: &str) -> AddressFragments {
    let lower = prepare(text);
    let mut out = AddressFragments::default();

    if let Some(caps) = STREET_RE.captures(&lower) {
        let raw = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let name: Vec<String> = raw
            .split_whitespace()
            .take_while(|w| !STREET_STOP_WORDS.contains(w))
            .map(capitalize)
            .collect();
        if !name.is_empty() {
            out.street = Some(name.join(" "));
            // "ул. Ленина 5" carries the house number right after the name.
            let consumed = raw
                .split_whitespace()
                .take(name.len())
                .last()
                .and_then(|last| raw.find(last).map(|i| i + last.len()))
                .unwrap_or(raw.len());
            let tail_start = caps.get(1).map(|m| m.start()).unwrap_or(0) + consumed;
            if let Some(h) = HOUSE_AFTER_STREET_RE.captures(&lower[tail_start..]) {
                out.house = h.get(1).map(|m| m.as_str().to_string());
            }
        }
    }

    if let Some(caps) = HOUSE_RE.captures(&lower) {
        out.house = caps.get(1).map(|m| m.as_str().to_string());
    }
    if let Some(caps) = APARTMENT_RE.captures(&lower) {
        out.apartment = caps.get(1).map(|m| m.as_str().to_string());
    }
    out.entrance = ENTRANCE_RE
        .captures(&lower)
        .or_else(|| ENTRANCE_ORDINAL_RE.captures(&lower))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    out
}

/// Extract a self-introduced first name ("меня зовут Елена").
pub fn extract_user_name(text: &str) -> Option<String> {
    let lower = prepare(text);
    NAME_RES.iter().find_map(|re| {
        re.captures(&lower)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|w| !NAME_STOP_WORDS.contains(w))
            .map(capitalize)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_apartment_from_complaint() {
        let a = extract_address("течёт кран в ванной, квартира 15");
        assert_eq!(a.apartment.as_deref(), Some("15"));
        assert!(a.street.is_none());
        assert!(a.house.is_none());
    }

    #[test]
    fn test_extract_full_address() {
        let a = extract_address("ул. Ленина, дом 5, кв. 12, подъезд 2");
        assert_eq!(a.street.as_deref(), Some("Ленина"));
        assert_eq!(a.house.as_deref(), Some("5"));
        assert_eq!(a.apartment.as_deref(), Some("12"));
        assert_eq!(a.entrance.as_deref(), Some("2"));
        assert!(a.is_complete());
    }

    #[test]
    fn test_house_directly_after_street() {
        let a = extract_address("проспект Мира 7/3");
        assert_eq!(a.street.as_deref(), Some("Мира"));
        assert_eq!(a.house.as_deref(), Some("7/3"));
    }

    #[test]
    fn test_multiword_street_stops_at_marker() {
        let a = extract_address("улица Карла Маркса дом 10");
        assert_eq!(a.street.as_deref(), Some("Карла Маркса"));
        assert_eq!(a.house.as_deref(), Some("10"));
    }

    #[test]
    fn test_ordinal_entrance() {
        let a = extract_address("во 2 подъезде не горит свет");
        assert_eq!(a.entrance.as_deref(), Some("2"));
    }

    #[test]
    fn test_no_false_street_from_prefix() {
        let a = extract_address("прошу улучшить уборку");
        assert!(a.street.is_none());
    }

    #[test]
    fn test_merge_never_erases_known_values() {
        let mut memory = AddressFragments {
            street: Some("Ленина".into()),
            ..Default::default()
        };
        let updated = memory.merge_from(&AddressFragments {
            house: Some("5".into()),
            ..Default::default()
        });
        assert_eq!(updated, vec!["house"]);
        assert_eq!(memory.street.as_deref(), Some("Ленина"));

        let updated = memory.merge_from(&AddressFragments::default());
        assert!(updated.is_empty());
        assert_eq!(memory.street.as_deref(), Some("Ленина"));
        assert_eq!(memory.house.as_deref(), Some("5"));
    }

    #[test]
    fn test_merge_replaces_placeholders_only() {
        let mut memory = AddressFragments {
            street: Some("-".into()),
            house: Some("5".into()),
            ..Default::default()
        };
        let updated = memory.merge_from(&AddressFragments {
            street: Some("Мира".into()),
            house: Some("9".into()),
            ..Default::default()
        });
        assert_eq!(updated, vec!["street"]);
        assert_eq!(memory.street.as_deref(), Some("Мира"));
        assert_eq!(memory.house.as_deref(), Some("5"));
    }

    #[test]
    fn test_display_and_completeness() {
        let a = AddressFragments {
            street: Some("Ленина".into()),
            house: Some("5".into()),
            apartment: Some("12".into()),
            entrance: None,
        };
        assert_eq!(a.display_string().as_deref(), Some("ул. Ленина, д. 5, кв. 12"));
        assert!((a.completeness() - 0.75).abs() < f64::EPSILON);
        assert_eq!(AddressFragments::default().display_string(), None);
    }

    #[test]
    fn test_extract_user_name() {
        assert_eq!(extract_user_name("Здравствуйте, меня зовут Елена").as_deref(), Some("Елена"));
        assert_eq!(extract_user_name("Привет, я Владимир").as_deref(), Some("Владимир"));
        assert_eq!(extract_user_name("я живу на Ленина"), None);
        assert_eq!(extract_user_name("не работает лифт"), None);
    }
}
