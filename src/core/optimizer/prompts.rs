//! System prompt template rendering
//!
//! Arms carry `{{ var }}` templates; the caller supplies the values per
//! request. Substituted values are HTML-escaped, unknown variables stay
//! literal, and an allow-list (when present) restricts which variables
//! may be substituted at all.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

static VARIABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("variable pattern"));

/// Render a prompt template with the caller's variables
pub fn render_prompt(
    template: &str,
    variables: &HashMap<String, String>,
    allowed: Option<&[String]>,
) -> String {
    VARIABLE
        .replace_all(template, |captures: &regex::Captures<'_>| {
            let name = &captures[1];
            let permitted = allowed
                .map(|list| list.iter().any(|entry| entry == name))
                .unwrap_or(true);
            match variables.get(name) {
                Some(value) if permitted => html_escape(value),
                _ => captures[0].to_string(),
            }
        })
        .into_owned()
}

fn html_escape(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}
