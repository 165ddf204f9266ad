use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

pub const DEFAULT_CONTAINER_CLASS: &str = "blog-body";
pub const DEFAULT_CLOSE_MARKER: &str = "</div>";

static LINE_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").expect("line break pattern is valid"));

/// Pulls the canonical body text out of one rendered document.
pub trait Extractor {
    /// `None` when the document has no body container.
    fn extract(&self, raw_markup: &str) -> Option<String>;
}

/// Matches the first `open ... close` region, non-greedy and across newlines.
#[derive(Debug, Clone)]
pub struct ContainerExtractor {
    open_marker: String,
    close_marker: String,
    pattern: Regex,
}

impl ContainerExtractor {
    pub fn new(open_marker: &str, close_marker: &str) -> Result<Self> {
        if open_marker.trim().is_empty() || close_marker.trim().is_empty() {
            bail!("body container markers must not be empty");
        }
        let source = format!(
            r"(?s){}\s*(.*?)\s*{}",
            regex::escape(open_marker),
            regex::escape(close_marker)
        );
        let pattern = Regex::new(&source)
            .with_context(|| format!("failed to compile container pattern for {open_marker}"))?;
        Ok(Self {
            open_marker: open_marker.to_string(),
            close_marker: close_marker.to_string(),
            pattern,
        })
    }

    /// `<div class="{class}">` ... `</div>`
    pub fn for_class(class: &str) -> Result<Self> {
        let class = class.trim();
        if class.is_empty() {
            bail!("body container class must not be empty");
        }
        Self::new(&open_marker_for_class(class), DEFAULT_CLOSE_MARKER)
    }

    pub fn open_marker(&self) -> &str {
        &self.open_marker
    }

    pub fn close_marker(&self) -> &str {
        &self.close_marker
    }
}

impl Default for ContainerExtractor {
    fn default() -> Self {
        let open = open_marker_for_class(DEFAULT_CONTAINER_CLASS);
        Self::new(&open, DEFAULT_CLOSE_MARKER).expect("default markers compile")
    }
}

impl Extractor for ContainerExtractor {
    fn extract(&self, raw_markup: &str) -> Option<String> {
        let inner = self.pattern.captures(raw_markup)?.get(1)?.as_str();
        let body = normalize_body(inner);
        if body.is_empty() { None } else { Some(body) }
    }
}

pub fn open_marker_for_class(class: &str) -> String {
    format!(r#"<div class="{class}">"#)
}

/// Line-break tags become newlines, then surrounding whitespace is dropped.
pub fn normalize_body(inner: &str) -> String {
    LINE_BREAK_RE.replace_all(inner, "\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_and_normalizes_body_container() {
        let extractor = ContainerExtractor::for_class("body").expect("extractor");
        let markup = r#"<html><div class="body">  Hello<br>World  </div></html>"#;
        assert_eq!(extractor.extract(markup), Some("Hello\nWorld".to_string()));
    }

    #[test]
    fn default_dialect_spans_lines_and_break_variants() {
        let extractor = ContainerExtractor::default();
        let markup = "<header>x</header>\n<div class=\"blog-body\">\n  first line<br/>second<BR />third<br >\n  </div>\n<footer/>";
        assert_eq!(
            extractor.extract(markup),
            Some("first line\nsecond\nthird".to_string())
        );
    }

    #[test]
    fn missing_container_yields_none() {
        let extractor = ContainerExtractor::default();
        assert_eq!(extractor.extract("<div class=\"other\">text</div>"), None);
        assert_eq!(extractor.extract("<div class=\"blog-body\">unterminated"), None);
        assert_eq!(extractor.extract(""), None);
    }

    #[test]
    fn empty_container_yields_none() {
        let extractor = ContainerExtractor::default();
        assert_eq!(extractor.extract("<div class=\"blog-body\">  <br> </div>"), None);
    }

    #[test]
    fn only_first_container_is_taken() {
        let extractor = ContainerExtractor::default();
        let markup = "<div class=\"blog-body\">one</div><div class=\"blog-body\">two</div>";
        assert_eq!(extractor.extract(markup), Some("one".to_string()));
    }

    #[test]
    fn nested_markup_stops_at_first_close_marker() {
        let extractor = ContainerExtractor::default();
        let markup = "<div class=\"blog-body\">intro<div>inner</div>tail</div>";
        assert_eq!(extractor.extract(markup), Some("intro<div>inner".to_string()));
    }

    #[test]
    fn custom_markers_are_matched_literally() {
        let extractor =
            ContainerExtractor::new("<article data-role=\"body\">", "</article>").expect("extractor");
        let markup = "<article data-role=\"body\">a (b) [c]<br>d</article>";
        assert_eq!(extractor.extract(markup), Some("a (b) [c]\nd".to_string()));
        assert_eq!(extractor.open_marker(), "<article data-role=\"body\">");
        assert_eq!(extractor.close_marker(), "</article>");
    }

    #[test]
    fn empty_markers_are_rejected() {
        assert!(ContainerExtractor::new("", "</div>").is_err());
        assert!(ContainerExtractor::for_class("  ").is_err());
    }
}
