//! `{{macro}}` placeholder normalization.
//!
//! Producers vary the whitespace inside the braces (`{{user}}` vs
//! `{{ user }}` vs `{{user }}`).  [`normalize`] rewrites every token to the
//! single canonical spacing `{{token}}`; runs of internal whitespace
//! collapse to one space (`{{random: a,  b}}` → `{{random: a, b}}`).
//! Text outside braces is never touched, and an unterminated `{{` passes
//! through verbatim.
//!
//! `normalize(normalize(x)) == normalize(x)` holds for all inputs (checked
//! by a proptest below).

use crate::model::CharacterData;

/// Rewrite all macro tokens in `text` to canonical spacing.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            // Unterminated token: emit the remainder untouched.
            break;
        };
        out.push_str(&rest[..start]);
        out.push_str("{{");
        out.push_str(&collapse_whitespace(&rest[start + 2..start + 2 + len]));
        out.push_str("}}");
        rest = &rest[start + 2 + len + 2..];
    }
    out.push_str(rest);
    out
}

/// Whitespace-insensitive macro comparison.
pub fn equivalent(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Apply [`normalize`] to every text field of a character, including
/// greetings and book entry content.
pub fn canonicalize_card(data: &mut CharacterData) {
    for field in [
        &mut data.description,
        &mut data.personality,
        &mut data.scenario,
        &mut data.first_mes,
        &mut data.mes_example,
        &mut data.system_prompt,
        &mut data.post_history_instructions,
    ] {
        *field = normalize(field);
    }
    for greeting in &mut data.alternate_greetings {
        *greeting = normalize(greeting);
    }
    if let Some(book) = &mut data.character_book {
        for entry in &mut book.entries {
            entry.content = normalize(&entry.content);
        }
    }
}

fn collapse_whitespace(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut pending_space = false;
    for token in inner.split_whitespace() {
        if pending_space {
            out.push(' ');
        }
        out.push_str(token);
        pending_space = true;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn spacing_variants_are_equivalent() {
        assert_eq!(normalize("Hi {{user}}"), normalize("Hi {{ user }}"));
        assert_eq!(normalize("{{ char }} waves"), "{{char}} waves");
        assert_eq!(normalize("{{random:  a,  b }}"), "{{random: a, b}}");
        assert!(equivalent("Hi {{user}}", "Hi {{ user }}"));
        assert!(!equivalent("Hi {{user}}", "Hi {{char}}"));
    }

    #[test]
    fn text_outside_braces_is_untouched() {
        assert_eq!(normalize("no  macros   here"), "no  macros   here");
        assert_eq!(normalize("{ single } braces {stay}"), "{ single } braces {stay}");
    }

    #[test]
    fn unterminated_token_passes_through() {
        assert_eq!(normalize("broken {{user"), "broken {{user");
        assert_eq!(normalize("{{a}} then {{b"), "{{a}} then {{b");
    }

    #[test]
    fn canonicalize_reaches_book_entries() {
        use crate::model::{BookEntry, CharacterBook};
        let mut data = CharacterData {
            name: "A".into(),
            first_mes: "Hi {{ user }}".into(),
            character_book: Some(CharacterBook {
                entries: vec![BookEntry {
                    content: "{{ char }} remembers".into(),
                    enabled: true,
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        canonicalize_card(&mut data);
        assert_eq!(data.first_mes, "Hi {{user}}");
        assert_eq!(data.character_book.unwrap().entries[0].content, "{{char}} remembers");
    }

    proptest! {
        #[test]
        fn normalize_is_idempotent(s in ".{0,64}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalize_is_idempotent_on_macro_soup(
            s in r"(\{\{ ?(user|char|random: a, b) ?\}\}| |\{|\}|[a-z]){0,32}"
        ) {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }
    }
}
