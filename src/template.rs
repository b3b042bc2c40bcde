//! Placeholder expansion for message templates.
//!
//! A template may contain `{{field}}` tokens that are substituted with the
//! matching column value of the contact being messaged. Unknown fields
//! expand to the empty string; everything outside the token syntax is left
//! verbatim. Expansion is total — it never fails.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Token syntax: double braces around a word-character field name.
fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(\w+)\}\}").expect("valid token regex"))
}

/// Expand every `{{field}}` token in `template` against `fields`.
///
/// Missing or empty fields degrade to the empty string rather than
/// erroring, so a half-filled spreadsheet row still produces a message.
pub fn expand(template: &str, fields: &BTreeMap<String, String>) -> String {
    token_re()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            fields.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_fields() {
        let f = fields(&[("Name", "Alice"), ("City", "Berlin")]);
        assert_eq!(expand("Hi {{Name}} from {{City}}!", &f), "Hi Alice from Berlin!");
    }

    #[test]
    fn unknown_field_becomes_empty() {
        let f = fields(&[("Name", "Alice")]);
        assert_eq!(expand("Hi {{Nickname}}!", &f), "Hi !");
    }

    #[test]
    fn non_token_braces_left_verbatim() {
        let f = fields(&[("Name", "Alice")]);
        assert_eq!(expand("{Name} {{ Name }} {{Na-me}}", &f), "{Name} {{ Name }} {{Na-me}}");
    }

    #[test]
    fn expansion_is_idempotent_without_remaining_tokens() {
        let f = fields(&[("Name", "Alice")]);
        let once = expand("Hi {{Name}}, meet {{Other}}", &f);
        let twice = expand(&once, &f);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_template_stays_empty() {
        assert_eq!(expand("", &BTreeMap::new()), "");
    }

    #[test]
    fn repeated_token_expands_everywhere() {
        let f = fields(&[("Name", "Bo")]);
        assert_eq!(expand("{{Name}} {{Name}}", &f), "Bo Bo");
    }
}
