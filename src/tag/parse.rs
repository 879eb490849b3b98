//! Tag-page field extraction.
//!
//! The archive's markup vocabulary is the site's contract, not ours; this
//! module only pulls the handful of scalar fields the registry needs out of a
//! fetched page and forgets the DOM immediately. Selectors target the listbox
//! groups and profile blurb of the tag page layout.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::entity::{TagCategory, TagRecord};

// Hardcoded selectors and patterns, safe to panic at first use.
#[allow(clippy::expect_used)]
mod sel {
    use super::{LazyLock, Regex, Selector};

    pub(super) static FLASH_ERROR: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.flash.error").expect("selector is valid"));
    pub(super) static HEADING: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("h2.heading").expect("selector is valid"));
    pub(super) static PROFILE_BLURB: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.tag.home.profile p").expect("selector is valid"));
    pub(super) static MERGER: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.merger.module p").expect("selector is valid"));
    pub(super) static SYNONYM_ITEMS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.synonym.listbox.group li").expect("selector is valid"));
    pub(super) static PARENT_ITEMS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.parent.listbox.group li").expect("selector is valid"));
    pub(super) static PARENT_IMMEDIATE: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.parent.listbox.group > ul > li > a").expect("selector is valid")
    });
    pub(super) static META_LINKS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.meta.listbox.group a").expect("selector is valid"));
    pub(super) static META_IMMEDIATE: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.meta.listbox.group > ul > li > a").expect("selector is valid")
    });
    pub(super) static SUB_LINKS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("div.sub.listbox.group a").expect("selector is valid"));
    pub(super) static SUB_IMMEDIATE: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.sub.listbox.group > ul > li > a").expect("selector is valid")
    });
    pub(super) static CHILD_GROUPS: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.child.listbox.group div.listbox.group").expect("selector is valid")
    });
    pub(super) static LIST_ITEMS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("li").expect("selector is valid"));

    pub(super) static CATEGORY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"This tag belongs to the (.+) Category\.").expect("pattern is valid")
    });
    pub(super) static MERGED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"has been made a synonym of (.+)\. Works and bookmarks tagged with")
            .expect("pattern is valid")
    });
}

/// Each child-listbox group holds at most this many tags before the site
/// truncates the listing.
pub const CHILD_DISPLAY_LIMIT: usize = 300;

/// Scalar fields extracted from one tag page.
#[derive(Debug, Clone, Default)]
pub struct ParsedTagPage {
    /// Page-level error: 303 for a flash error banner, 404 for a not-found
    /// heading. All other fields are meaningless when this is set.
    pub query_error: Option<u16>,
    pub category: Option<TagCategory>,
    pub canonical: bool,
    pub merged_into: Option<String>,
    pub synonym_names: Vec<String>,
    pub parent_names: Vec<String>,
    pub immediate_parent_names: Vec<String>,
    pub metatag_names: Vec<String>,
    pub immediate_metatag_names: Vec<String>,
    pub subtag_names: Vec<String>,
    pub immediate_subtag_names: Vec<String>,
    pub children_names: BTreeMap<String, Vec<String>>,
}

impl ParsedTagPage {
    /// Whether any child-listbox group hit the display limit, meaning more
    /// children likely exist than the page shows.
    #[must_use]
    pub fn children_truncated(&self) -> bool {
        self.children_names
            .values()
            .any(|names| names.len() >= CHILD_DISPLAY_LIMIT)
    }

    pub(crate) fn into_record(self) -> TagRecord {
        TagRecord {
            category: self.category.unwrap_or(TagCategory::Unknown),
            canonical: self.canonical,
            merged_into: self.merged_into,
            synonym_names: self.synonym_names,
            parent_names: self.parent_names,
            immediate_parent_names: self.immediate_parent_names,
            metatag_names: self.metatag_names,
            immediate_metatag_names: self.immediate_metatag_names,
            subtag_names: self.subtag_names,
            immediate_subtag_names: self.immediate_subtag_names,
            children_names: self.children_names,
            date_queried: Utc::now(),
        }
    }
}

/// Parses a fetched tag page into its scalar fields.
///
/// Structural absences are not errors: a missing listbox simply means the tag
/// has no entries of that relation. Only the flash-error banner and the 404
/// heading mark the page itself as unreadable.
#[must_use]
pub fn parse_tag_page(html: &str) -> ParsedTagPage {
    let document = Html::parse_document(html);

    if let Some(code) = detect_query_error(&document) {
        return ParsedTagPage {
            query_error: Some(code),
            ..ParsedTagPage::default()
        };
    }

    let blurb = document
        .select(&sel::PROFILE_BLURB)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let category = sel::CATEGORY_PATTERN
        .captures(&blurb)
        .map(|caps| TagCategory::from_site_label(&caps[1]));
    // Tag pages still say "common" where the rest of the site says canonical.
    let canonical = blurb.contains("It's a common tag");

    let merged_into = document.select(&sel::MERGER).next().and_then(|p| {
        sel::MERGED_PATTERN
            .captures(&element_text(p))
            .map(|caps| caps[1].to_string())
    });

    ParsedTagPage {
        query_error: None,
        category,
        canonical,
        merged_into,
        synonym_names: collect_texts(&document, &sel::SYNONYM_ITEMS),
        parent_names: collect_texts(&document, &sel::PARENT_ITEMS),
        immediate_parent_names: collect_texts(&document, &sel::PARENT_IMMEDIATE),
        metatag_names: collect_texts(&document, &sel::META_LINKS),
        immediate_metatag_names: collect_texts(&document, &sel::META_IMMEDIATE),
        subtag_names: collect_texts(&document, &sel::SUB_LINKS),
        immediate_subtag_names: collect_texts(&document, &sel::SUB_IMMEDIATE),
        children_names: collect_children(&document),
    }
}

fn detect_query_error(document: &Html) -> Option<u16> {
    if document.select(&sel::FLASH_ERROR).next().is_some() {
        return Some(303);
    }
    let heading = document.select(&sel::HEADING).next().map(element_text)?;
    heading.contains("Error 404").then_some(404)
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn collect_texts(document: &Html, selector: &Selector) -> Vec<String> {
    document
        .select(selector)
        .map(element_text)
        .filter(|text| !text.is_empty())
        .collect()
}

/// Child tags are grouped into per-category listboxes whose class names carry
/// the plural category label (e.g. `characters listbox group`).
fn collect_children(document: &Html) -> BTreeMap<String, Vec<String>> {
    let mut children = BTreeMap::new();
    for group in document.select(&sel::CHILD_GROUPS) {
        let Some(label) = group.value().classes().find(|c| *c != "listbox" && *c != "group")
        else {
            continue;
        };
        let category = TagCategory::from_site_label(&capitalize_singular(label));
        let names: Vec<String> = group
            .select(&sel::LIST_ITEMS)
            .map(element_text)
            .filter(|text| !text.is_empty())
            .collect();
        if !names.is_empty() {
            children.insert(category.as_str().to_string(), names);
        }
    }
    children
}

/// `characters` -> `Character`, `freeforms` -> `Freeform`.
fn capitalize_singular(label: &str) -> String {
    let singular = label.strip_suffix('s').unwrap_or(label);
    let mut chars = singular.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
