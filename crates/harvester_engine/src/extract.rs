use std::sync::LazyLock;

use harvester_core::RawRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap()
});
static MAILTO_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href^='mailto:'], a[href^='MAILTO:']").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("malformed page: {0}")]
    Malformed(String),
}

/// Records found on one page, plus whether the page says it is the last one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    pub records: Vec<RawRecord>,
    pub end_of_pagination: bool,
}

impl Extraction {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            end_of_pagination: false,
        }
    }

    pub fn last_page(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            end_of_pagination: true,
        }
    }
}

/// Per-site extraction rules: raw page content in, records out.
///
/// Implementations are pure and must tolerate missing fields by producing
/// empty values rather than errors.
pub trait RecordExtractor: Send + Sync {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractError>;
}

pub(crate) fn compile_selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|err| ExtractError::InvalidSelector {
        selector: css.to_string(),
        message: err.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSource {
    /// Element text with whitespace collapsed.
    Text,
    /// Value of an attribute.
    Attr(String),
    /// Address of the first `mailto:` link.
    Mailto,
    /// First email address appearing in the element's text.
    EmailInText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRule {
    pub name: String,
    /// Selector relative to the item; `None` reads the item element itself.
    pub selector: Option<String>,
    pub source: FieldSource,
    pub strip_prefix: Option<String>,
}

impl FieldRule {
    pub fn new(name: impl Into<String>, selector: Option<&str>, source: FieldSource) -> Self {
        Self {
            name: name.into(),
            selector: selector.map(str::to_string),
            source,
            strip_prefix: None,
        }
    }

    pub fn text(name: impl Into<String>, selector: &str) -> Self {
        Self::new(name, Some(selector), FieldSource::Text)
    }

    pub fn mailto(name: impl Into<String>) -> Self {
        Self::new(name, None, FieldSource::Mailto)
    }

    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }
}

struct CompiledField {
    rule: FieldRule,
    selector: Option<Selector>,
}

/// CSS-selector driven extractor covering the usual staff-directory layout:
/// one element per person, fields found inside it.
pub struct SelectorExtractor {
    item: Selector,
    fields: Vec<CompiledField>,
    static_fields: Vec<(String, String)>,
    next_page: Option<Selector>,
}

impl SelectorExtractor {
    pub fn new(item_selector: &str, rules: Vec<FieldRule>) -> Result<Self, ExtractError> {
        let item = compile_selector(item_selector)?;
        let fields = rules
            .into_iter()
            .map(|rule| {
                let selector = rule.selector.as_deref().map(compile_selector).transpose()?;
                Ok(CompiledField { rule, selector })
            })
            .collect::<Result<Vec<_>, ExtractError>>()?;
        Ok(Self {
            item,
            fields,
            static_fields: Vec::new(),
            next_page: None,
        })
    }

    /// A constant stamped on every record ahead of the extracted fields.
    pub fn with_static_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_fields.push((name.into(), value.into()));
        self
    }

    /// When set, a page without a match for `css` is the last page.
    pub fn with_next_page_selector(mut self, css: &str) -> Result<Self, ExtractError> {
        self.next_page = Some(compile_selector(css)?);
        Ok(self)
    }

    fn extract_item(&self, item: ElementRef<'_>) -> RawRecord {
        let mut record: RawRecord = self.static_fields.iter().cloned().collect();
        for field in &self.fields {
            let value = read_field(item, field);
            record.set(field.rule.name.clone(), value);
        }
        record
    }
}

impl RecordExtractor for SelectorExtractor {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractError> {
        let doc = Html::parse_document(content);
        let records = doc
            .select(&self.item)
            .map(|item| self.extract_item(item))
            .collect();
        let end_of_pagination = self
            .next_page
            .as_ref()
            .is_some_and(|sel| doc.select(sel).next().is_none());
        Ok(Extraction {
            records,
            end_of_pagination,
        })
    }
}

fn read_field(item: ElementRef<'_>, field: &CompiledField) -> String {
    let raw = match &field.rule.source {
        FieldSource::Mailto => {
            let selector = field.selector.as_ref().unwrap_or(&*MAILTO_SEL);
            item.select(selector)
                .filter_map(|a| a.value().attr("href"))
                .find_map(mailto_address)
                .unwrap_or_default()
        }
        FieldSource::Text => field_element(item, field)
            .map(|el| clean_text(&el.text().collect::<String>()))
            .unwrap_or_default(),
        FieldSource::Attr(name) => field_element(item, field)
            .and_then(|el| el.value().attr(name))
            .map(|v| v.trim().to_string())
            .unwrap_or_default(),
        FieldSource::EmailInText => field_element(item, field)
            .and_then(|el| {
                let text: String = el.text().collect();
                EMAIL_RE.find(&text).map(|m| m.as_str().to_string())
            })
            .unwrap_or_default(),
    };
    match &field.rule.strip_prefix {
        Some(prefix) => raw
            .strip_prefix(prefix.as_str())
            .map(|rest| rest.trim().to_string())
            .unwrap_or(raw),
        None => raw,
    }
}

fn field_element<'a>(item: ElementRef<'a>, field: &CompiledField) -> Option<ElementRef<'a>> {
    match &field.selector {
        Some(sel) => item.select(sel).next(),
        None => Some(item),
    }
}

/// Collapses every whitespace run to one space and trims the ends.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `mailto:a@b.org?subject=x` -> `a@b.org`. Non-mailto hrefs yield `None`.
pub fn mailto_address(href: &str) -> Option<String> {
    let href = href.trim();
    let scheme = href.get(..7)?;
    if !scheme.eq_ignore_ascii_case("mailto:") {
        return None;
    }
    let address = href[7..].split('?').next().unwrap_or("").trim();
    (!address.is_empty()).then(|| address.to_string())
}
