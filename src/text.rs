//! Whitespace and DOM text helpers shared by every parser.
//! Scraped markup is whitespace-irregular, so everything is normalized before matching.

use scraper::{ElementRef, Html, Node};

/// Collapse every whitespace run (including NBSP) to one space and trim.
pub fn normalize_space(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for word in s.split(|c: char| c.is_whitespace() || c == '\u{a0}') {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

pub fn parse_html_to_document(html: &str) -> Html {
    Html::parse_document(html)
}

/// Normalized text of an optional element; empty when absent.
/// Text nodes are space-joined so sibling spans never glue together.
pub fn get_text(el: Option<ElementRef<'_>>) -> String {
    el.map(|e| normalize_space(&e.text().collect::<Vec<_>>().join(" ")))
        .unwrap_or_default()
}

/// Normalized text of the element's direct text children only.
pub fn own_text(el: ElementRef<'_>) -> String {
    let raw: String = el
        .children()
        .filter_map(|child| match child.value() {
            Node::Text(t) => Some(&**t),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");
    normalize_space(&raw)
}

pub fn has_letter(s: &str) -> bool {
    s.chars().any(char::is_alphabetic)
}

/// Strict cell number: the whole trimmed cell must be ASCII digits.
/// Annotated cells like "12*" or a dash placeholder yield `None`.
pub fn parse_strict_int(s: &str) -> Option<i64> {
    let t = normalize_space(s);
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    t.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[test]
    fn normalize_collapses_runs_and_trims() {
        assert_eq!(normalize_space("  a \n\t b\u{a0}\u{a0}c  "), "a b c");
        assert_eq!(normalize_space(""), "");
        assert_eq!(normalize_space(" \n "), "");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["  x  y ", "\u{a0}Динамо\n Київ", "a", "", "1 -  2"] {
            let once = normalize_space(s);
            assert_eq!(normalize_space(&once), once);
        }
    }

    #[test]
    fn strict_int_rejects_annotations() {
        assert_eq!(parse_strict_int(" 12 "), Some(12));
        assert_eq!(parse_strict_int("12*"), None);
        assert_eq!(parse_strict_int("—"), None);
        assert_eq!(parse_strict_int("-3"), None);
        assert_eq!(parse_strict_int(""), None);
    }

    #[test]
    fn get_text_is_null_safe() {
        let doc = parse_html_to_document("<p> hello <b>world</b>\n</p>");
        let sel = Selector::parse("p").unwrap();
        assert_eq!(get_text(doc.select(&sel).next()), "hello world");
        let missing = Selector::parse("span").unwrap();
        assert_eq!(get_text(doc.select(&missing).next()), "");
    }

    #[test]
    fn own_text_skips_children() {
        let doc = parse_html_to_document("<div>Календар <span>inner</span> матчів</div>");
        let sel = Selector::parse("div").unwrap();
        let div = doc.select(&sel).next().unwrap();
        assert_eq!(own_text(div), "Календар матчів");
    }
}
