//! Page-context distillation: reduce a snapshot (or raw HTML) to a short,
//! priority-ordered element list that fits the prompt budget.
//!
//! Pipeline: extract → prioritize → filter invisible → deduplicate →
//! build bounded context → chunk if still over budget.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::traits::{ElementInfo, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ElementPriority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone)]
pub struct PageElement {
    pub tag: String,
    pub text: String,
    pub selector: String,
    pub priority: ElementPriority,
    pub visible: bool,
    pub interactive: bool,
}

const SEMANTIC_TAGS: &[&str] = &["button", "a", "input", "select", "textarea", "nav", "form"];

/// Distill a driver snapshot into prompt context, bounded by `max_tokens`.
pub fn distill_snapshot(snapshot: &PageSnapshot, max_tokens: usize) -> String {
    if snapshot.elements.is_empty() {
        return String::new();
    }

    let mut elements = convert_snapshot_elements(&snapshot.elements);
    prioritize_elements(&mut elements);
    let elements = filter_visible(elements);
    let elements = deduplicate(elements);

    let limited = build_limited_context(&elements, Some(snapshot), max_tokens);
    if limited.len() <= max_tokens {
        return limited;
    }
    chunk_context(&limited, max_tokens)
}

/// Fallback path: distill raw HTML when no snapshot is available.
pub fn distill_html(html: &str, max_tokens: usize) -> String {
    if html.is_empty() {
        return String::new();
    }

    let mut elements = extract_elements(html);
    prioritize_html_elements(&mut elements);
    let elements = filter_visible(elements);
    let elements = deduplicate(elements);

    let limited = build_limited_context(&elements, None, max_tokens);
    if limited.len() <= max_tokens {
        return limited;
    }
    chunk_context(&limited, max_tokens)
}

fn convert_snapshot_elements(snapshot_elements: &[ElementInfo]) -> Vec<PageElement> {
    snapshot_elements
        .iter()
        .map(|el| {
            let priority = if el.priority >= 5 {
                ElementPriority::Critical
            } else if el.priority >= 3 {
                ElementPriority::High
            } else if el.priority >= 1 {
                ElementPriority::Medium
            } else {
                ElementPriority::Low
            };
            PageElement {
                tag: el.tag.clone(),
                text: el.text.clone(),
                selector: el.selector.clone(),
                priority,
                visible: el.visible,
                interactive: el.interactive,
            }
        })
        .collect()
}

/// Snapshot-path priority rules, later rules winning ties: interactive →
/// High; semantic tags at least High; anchors with text → High.
fn prioritize_elements(elements: &mut [PageElement]) {
    for el in elements.iter_mut() {
        if el.interactive {
            el.priority = ElementPriority::High;
        }

        if SEMANTIC_TAGS.iter().any(|tag| el.tag.eq_ignore_ascii_case(tag))
            && el.priority < ElementPriority::High
        {
            el.priority = ElementPriority::High;
        }

        if el.tag == "a" && !el.text.is_empty() {
            el.priority = ElementPriority::High;
        }
    }
}

/// HTML-path priority rules: keyword-bearing text is promoted to Critical
/// since there is no driver-assigned priority to lean on.
fn prioritize_html_elements(elements: &mut [PageElement]) {
    const IMPORTANT_KEYWORDS: &[&str] =
        &["button", "submit", "login", "search", "menu", "nav", "form"];

    for el in elements.iter_mut() {
        if el.interactive {
            el.priority = ElementPriority::High;
        }

        let text_lower = el.text.to_lowercase();
        if IMPORTANT_KEYWORDS.iter().any(|kw| text_lower.contains(kw)) {
            el.priority = ElementPriority::Critical;
        }

        if el.tag == "a" && !el.text.is_empty() {
            el.priority = ElementPriority::High;
        }
    }
}

fn filter_visible(elements: Vec<PageElement>) -> Vec<PageElement> {
    elements.into_iter().filter(|el| el.visible).collect()
}

/// Dedup key is selector + text; empty-text entries are dropped outright.
fn deduplicate(elements: Vec<PageElement>) -> Vec<PageElement> {
    let mut seen = std::collections::HashSet::new();
    elements
        .into_iter()
        .filter(|el| {
            if el.text.is_empty() {
                return false;
            }
            seen.insert(format!("{}:{}", el.selector, el.text))
        })
        .collect()
}

/// Emit header lines (snapshot only), then elements in strict priority
/// order Critical → High → Medium; Low is dropped. The element budget is
/// `max_tokens / 50` lines including headers.
fn build_limited_context(
    elements: &[PageElement],
    snapshot: Option<&PageSnapshot>,
    max_tokens: usize,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(snapshot) = snapshot {
        if !snapshot.title.is_empty() {
            parts.push(format!("Title: {}", snapshot.title));
        }
        if !snapshot.url.is_empty() {
            parts.push(format!("URL: {}", snapshot.url));
        }
        if snapshot.viewport.width > 0.0 && snapshot.viewport.height > 0.0 {
            parts.push(format!(
                "Viewport: {:.0}x{:.0}",
                snapshot.viewport.width, snapshot.viewport.height
            ));
        }
    }

    let max_elements = max_tokens / 50;

    for wanted in [
        ElementPriority::Critical,
        ElementPriority::High,
        ElementPriority::Medium,
    ] {
        for el in elements.iter().filter(|el| el.priority == wanted) {
            if parts.len() >= max_elements {
                break;
            }
            parts.push(format_element(el));
        }
    }

    if let Some(snapshot) = snapshot {
        if !snapshot.accessibility_tree.is_empty() && parts.len() < max_elements {
            parts.push(format!("\nAccessibility Tree:\n{}", snapshot.accessibility_tree));
        }
    }

    parts.join("\n")
}

/// One element line: `<selector>: <text>`, text capped at 100 characters.
/// The selector is composed with the tag so `#id` and `[attr]` selectors
/// stay valid CSS.
fn format_element(el: &PageElement) -> String {
    let text = if el.text.chars().count() > 100 {
        format!("{}...", el.text.chars().take(100).collect::<String>())
    } else {
        el.text.clone()
    };
    let selector = compose_selector(&el.tag, &el.selector);
    format!("{}: {}", selector, text)
}

fn compose_selector(tag: &str, selector: &str) -> String {
    if selector.is_empty() {
        return tag.to_string();
    }
    if selector.contains(tag) {
        return selector.to_string();
    }
    match selector.chars().next() {
        Some('[') | Some('#') | Some('.') | Some(':') => format!("{}{}", tag, selector),
        _ => format!("{}[{}]", tag, selector),
    }
}

/// Last resort when the built context still exceeds the budget: keep the
/// first `max_tokens / 2` whitespace-separated words.
fn chunk_context(context: &str, max_tokens: usize) -> String {
    let words: Vec<&str> = context.split_whitespace().collect();
    let max_words = max_tokens / 2;

    if words.len() <= max_words {
        return context.to_string();
    }
    format!("{}...", words[..max_words].join(" "))
}

static TAG_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"<(\w+)([^>]*?)(?:>|/>)").unwrap());
static ARIA_LABEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"aria-label=["']([^"']+)["']"#).unwrap());
static TITLE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"title=["']([^"']+)["']"#).unwrap());
static ALT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"alt=["']([^"']+)["']"#).unwrap());
static ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"id=["']([^"']+)["']"#).unwrap());
static CLASS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r#"class=["']([^"']+)["']"#).unwrap());

const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea", "form"];

/// Regex scan of open tags in raw HTML. Text comes from aria-label, title
/// or alt, else from the run between the tag and the next `<`.
fn extract_elements(html: &str) -> Vec<PageElement> {
    let mut elements = Vec::new();

    for captures in TAG_REGEX.captures_iter(html) {
        let tag = captures[1].to_lowercase();
        let attrs = captures.get(2).map(|m| m.as_str()).unwrap_or("");
        let full_match = captures.get(0).map(|m| m.as_str()).unwrap_or("");

        let mut text = extract_text_from_attributes(attrs);
        if text.is_empty() {
            text = extract_text_after_tag(html, full_match);
        }

        let is_interactive_tag = INTERACTIVE_TAGS.contains(&tag.as_str());
        if text.is_empty() && !is_interactive_tag {
            continue;
        }

        let selector = build_html_selector(&tag, attrs);
        let interactive =
            is_interactive_tag || attrs.contains("onclick") || attrs.contains("role=");

        elements.push(PageElement {
            tag,
            text,
            selector,
            priority: ElementPriority::Medium,
            visible: true,
            interactive,
        });
    }

    elements
}

fn extract_text_from_attributes(attrs: &str) -> String {
    for regex in [&*ARIA_LABEL_REGEX, &*TITLE_REGEX, &*ALT_REGEX] {
        if let Some(captures) = regex.captures(attrs) {
            return captures[1].to_string();
        }
    }
    String::new()
}

fn extract_text_after_tag(html: &str, tag_match: &str) -> String {
    let Some(idx) = html.find(tag_match) else {
        return String::new();
    };
    let start = idx + tag_match.len();
    if start >= html.len() {
        return String::new();
    }

    let rest = &html[start..];
    let end = rest.find('<').unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

fn build_html_selector(tag: &str, attrs: &str) -> String {
    if let Some(captures) = ID_REGEX.captures(attrs) {
        return format!("#{}", &captures[1]);
    }
    if let Some(captures) = CLASS_REGEX.captures(attrs) {
        if let Some(first_class) = captures[1].split_whitespace().next() {
            return format!("{}.{}", tag, first_class);
        }
    }
    tag.to_string()
}
