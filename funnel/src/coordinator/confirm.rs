//! Classification of replies to a confirmation question.
//!
//! "нет" opens both a denial ("нет, не то") and a fresh complaint
//! ("нет света в подъезде"). A reply only counts as a denial when every
//! word in it is a negation or filler; "нет, <описание>" rejects the
//! candidate and carries the description on to the funnel.

use crate::text::{normalize, words};

const AFFIRMATIVE: &[&str] = &[
    "да", "верно", "подтверждаю", "правильно", "ага", "точно", "конечно", "ок", "ok", "yes",
];
const NEGATIONS: &[&str] = &["нет", "не", "неверно", "неправильно", "no"];
/// Words that may accompany a negation without adding information.
const DENIAL_FILLER: &[&str] = &[
    "то", "так", "это", "подходит", "верно", "правильно", "совсем", "вовсе", "вообще", "а", "ну",
    "же", "совершенно", "другое", "другая", "другой", "нет",
];
/// Characters that split "нет" from a following description.
const SEPARATORS: &[char] = &[',', '.', '!', ';', ':', '-', '—', '–'];

/// Short replies only; longer texts are treated as new information.
const MAX_REPLY_WORDS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Affirm,
    Deny,
    /// Denial followed by a new description of the problem.
    Correct(String),
    Other,
}

fn is_denial(normalized: &str) -> bool {
    let w = words(normalized);
    w.iter().any(|x| NEGATIONS.contains(x))
        && w.iter().all(|x| NEGATIONS.contains(x) || DENIAL_FILLER.contains(x))
}

pub fn classify_reply(text: &str) -> Reply {
    let normalized = normalize(text);
    let w = words(&normalized);
    let Some(first) = w.first() else {
        return Reply::Other;
    };
    if is_denial(&normalized) {
        return Reply::Deny;
    }
    if let Some((head, tail)) = text.split_once(SEPARATORS) {
        let tail = tail.trim();
        if is_denial(&normalize(head)) && !normalize(tail).is_empty() {
            return Reply::Correct(tail.to_string());
        }
    }
    if w.len() <= MAX_REPLY_WORDS && AFFIRMATIVE.contains(first) {
        return Reply::Affirm;
    }
    Reply::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_affirmative() {
        assert_eq!(classify_reply("Да"), Reply::Affirm);
        assert_eq!(classify_reply("да, верно!"), Reply::Affirm);
        assert_eq!(classify_reply("Подтверждаю"), Reply::Affirm);
    }

    #[test]
    fn test_negative() {
        assert_eq!(classify_reply("нет"), Reply::Deny);
        assert_eq!(classify_reply("Нет, не то"), Reply::Deny);
        assert_eq!(classify_reply("это не то"), Reply::Deny);
        assert_eq!(classify_reply("не верно"), Reply::Deny);
        assert_eq!(classify_reply("нет, совсем не подходит"), Reply::Deny);
    }

    #[test]
    fn test_complaints_starting_with_net_are_not_denials() {
        assert_eq!(classify_reply("нет воды"), Reply::Other);
        assert_eq!(classify_reply("Нет света в подъезде"), Reply::Other);
        assert_eq!(classify_reply("не работает лифт"), Reply::Other);
    }

    #[test]
    fn test_denial_with_new_description() {
        assert_eq!(
            classify_reply("нет, у нас течет крыша над пятым этажом"),
            Reply::Correct("у нас течет крыша над пятым этажом".into())
        );
        assert_eq!(
            classify_reply("Не то — нет света в подъезде"),
            Reply::Correct("нет света в подъезде".into())
        );
    }

    #[test]
    fn test_other_text() {
        assert_eq!(classify_reply("ул. Ленина, д. 5"), Reply::Other);
        assert_eq!(classify_reply("да, и ещё у соседей тоже течет"), Reply::Other);
        assert_eq!(classify_reply(""), Reply::Other);
    }
}
