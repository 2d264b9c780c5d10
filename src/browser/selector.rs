//! Selector machinery: a scored builder for snapshot elements, a
//! normalizer that rewrites LLM-invented pseudo-selectors into ones the
//! driver accepts, and a validator that catches URLs posing as selectors.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// One scored selector candidate. The score table fixes the preference
/// order: ids beat test ids beat names and so on down to a bare tag.
#[derive(Debug, Clone)]
struct Candidate {
    selector: String,
    score: u32,
}

/// ids that appear on every second page and identify nothing.
const COMMON_IDS: &[&str] = &["content", "main", "header", "footer", "nav", "menu"];

/// Layout utility classes that never pin down a single element.
const COMMON_CLASSES: &[&str] = &[
    "container", "wrapper", "row", "col", "btn", "button", "active", "disabled", "hidden",
    "visible", "flex", "grid",
];

fn is_unique_id(id: &str) -> bool {
    let id_lower = id.to_lowercase();
    !id.is_empty() && !COMMON_IDS.contains(&id_lower.as_str())
}

fn is_common_class(class: &str) -> bool {
    let class_lower = class.to_lowercase();
    COMMON_CLASSES.iter().any(|c| class_lower.contains(c))
}

fn escape_xpath(text: &str) -> String {
    text.replace('\'', "\\'").replace('"', "\\\"")
}

fn attr<'a>(element: &'a HashMap<String, String>, key: &str) -> &'a str {
    element.get(key).map(String::as_str).unwrap_or("")
}

fn build_xpath(element: &HashMap<String, String>) -> Option<String> {
    let tag = attr(element, "tag");
    if tag.is_empty() {
        return None;
    }

    let id = attr(element, "id");
    if !id.is_empty() {
        return Some(format!("//{}[@id='{}']", tag, id));
    }

    let text = attr(element, "text");
    if !text.is_empty() && text.len() < 50 {
        return Some(format!("//{}[contains(text(), '{}')]", tag, escape_xpath(text)));
    }

    let aria_label = attr(element, "aria-label");
    if !aria_label.is_empty() {
        return Some(format!("//{}[@aria-label='{}']", tag, escape_xpath(aria_label)));
    }

    None
}

/// Pick the strongest selector for an element described by its attributes.
/// Falls back to `body` when nothing is usable.
pub fn build_smart_selector(element: &HashMap<String, String>) -> String {
    let mut candidates: Vec<Candidate> = Vec::new();

    let id = attr(element, "id");
    if is_unique_id(id) {
        candidates.push(Candidate {
            selector: format!("#{}", id),
            score: 100,
        });
    }

    let data_testid = attr(element, "data-testid");
    if !data_testid.is_empty() {
        candidates.push(Candidate {
            selector: format!("[data-testid='{}']", data_testid),
            score: 95,
        });
    }

    let name = attr(element, "name");
    if !name.is_empty() {
        candidates.push(Candidate {
            selector: format!("[name='{}']", name),
            score: 90,
        });
    }

    let aria_label = attr(element, "aria-label");
    let role = attr(element, "role");
    if !aria_label.is_empty() && !role.is_empty() {
        candidates.push(Candidate {
            selector: format!("[role='{}'][aria-label='{}']", role, aria_label),
            score: 85,
        });
    }

    let tag = attr(element, "tag");
    let class = attr(element, "class");
    if !class.is_empty() && !tag.is_empty() {
        if let Some(first_class) = class.split_whitespace().next() {
            if !is_common_class(first_class) {
                candidates.push(Candidate {
                    selector: format!("{}.{}", tag, first_class),
                    score: 70,
                });
            }
        }
    }

    if let Some(xpath) = build_xpath(element) {
        candidates.push(Candidate {
            selector: xpath,
            score: 60,
        });
    }

    if !tag.is_empty() {
        let nth_child: u32 = attr(element, "nth-child").parse().unwrap_or(0);
        if nth_child > 0 {
            let parent = attr(element, "parent-selector");
            if !parent.is_empty() {
                candidates.push(Candidate {
                    selector: format!("{} > {}:nth-child({})", parent, tag, nth_child),
                    score: 50,
                });
            } else {
                candidates.push(Candidate {
                    selector: format!("{}:nth-child({})", tag, nth_child),
                    score: 40,
                });
            }
        } else {
            candidates.push(Candidate {
                selector: tag.to_string(),
                score: 30,
            });
        }
    }

    candidates
        .into_iter()
        .max_by_key(|c| c.score)
        .map(|c| c.selector)
        .unwrap_or_else(|| "body".to_string())
}

/// Pseudo-classes that legitimately follow a colon; everything else in a
/// "prefix: text" shape is treated as an LLM shorthand for has-text.
const KNOWN_PSEUDO_CLASSES: &[&str] = &[
    ":hover",
    ":focus",
    ":active",
    ":visited",
    ":link",
    ":checked",
    ":disabled",
    ":enabled",
    ":first-child",
    ":last-child",
    ":nth-child",
    ":nth-of-type",
    ":has-text",
    ":has",
    ":not",
    ":contains",
];

static COLON_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([^:]+):\s+(.+)$").unwrap());
static CONTAINS_DOUBLE: Lazy<Regex> = Lazy::new(|| Regex::new(r#":contains\("([^"]*)"\)"#).unwrap());
static CONTAINS_SINGLE: Lazy<Regex> = Lazy::new(|| Regex::new(r":contains\('([^']*)'\)").unwrap());
static CONTAINS_BARE: Lazy<Regex> = Lazy::new(|| Regex::new(r":contains\(([^)]+)\)").unwrap());

/// Rewrite non-standard pseudo-selectors the model likes to produce:
/// jQuery `:contains(...)` and the "button: Some text" shorthand both
/// become `:has-text(...)`. Returns the rewritten selector and whether
/// anything changed.
pub fn normalize_selector(selector: &str) -> (String, bool) {
    if selector.is_empty() {
        return (String::new(), false);
    }

    let mut normalized = selector.to_string();
    let mut changed = false;

    // "tag: Text" → tag:has-text("Text"), unless the colon introduces a
    // real pseudo-class.
    if let Some(captures) = COLON_SPACE.captures(&normalized) {
        let tag_part = captures[1].trim().to_string();
        let text_part = captures[2].trim().to_string();

        let is_known_pseudo = KNOWN_PSEUDO_CLASSES.iter().any(|pseudo| {
            tag_part.ends_with(pseudo) || normalized.contains(&format!("{}(", pseudo))
        });

        if !is_known_pseudo && !tag_part.is_empty() && !text_part.is_empty() {
            let escaped = text_part.replace('"', "\\\"").replace('\'', "\\'");
            normalized = format!("{}:has-text(\"{}\")", tag_part, escaped);
            changed = true;
        }
    }

    if CONTAINS_DOUBLE.is_match(&normalized) {
        normalized = CONTAINS_DOUBLE
            .replace_all(&normalized, |caps: &regex::Captures| {
                let text = caps[1].replace('\\', "\\\\").replace('"', "\\\"");
                format!(":has-text(\"{}\")", text)
            })
            .into_owned();
        changed = true;
    }

    if CONTAINS_SINGLE.is_match(&normalized) {
        normalized = CONTAINS_SINGLE
            .replace_all(&normalized, |caps: &regex::Captures| {
                let text = caps[1].replace('\\', "\\\\").replace('\'', "\\'");
                format!(":has-text('{}')", text)
            })
            .into_owned();
        changed = true;
    }

    // Unquoted :contains(text) — rare but the model produces it.
    if !normalized.contains(":has-text(") && CONTAINS_BARE.is_match(&normalized) {
        normalized = CONTAINS_BARE
            .replace_all(&normalized, |caps: &regex::Captures| {
                format!(":has-text(\"{}\")", caps[1].trim())
            })
            .into_owned();
        changed = true;
    }

    (normalized, changed)
}

/// Reject selectors that are actually URLs — a common model confusion
/// between `click` and `navigate` — and empty selectors.
pub fn validate_selector(selector: &str) -> anyhow::Result<()> {
    if selector.is_empty() {
        anyhow::bail!("selector must not be empty");
    }

    let trimmed = selector.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        anyhow::bail!(
            "selector must not be a URL; use the 'navigate' action to open '{}'",
            selector
        );
    }
    if trimmed.contains("://") {
        anyhow::bail!("selector must not contain a protocol (://): '{}'", selector);
    }

    Ok(())
}
