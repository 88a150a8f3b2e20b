//! Tag behavior catalogs.
//!
//! `TagDefinition` captures how a tag interacts with the parser: whether it
//! is void, which children implicitly close it, what content type its body
//! has, and so on. The HTML catalog encodes the HTML5 rules; the XML catalog
//! is a single permissive definition used for every name.

use phf::phf_map;

/// How the tokenizer must treat an element's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagContentType {
    /// Content runs to the matching close tag with no markup or entities.
    RawText,
    /// Like raw text, but character references are decoded.
    EscapableRawText,
    /// Content is parsed as markup.
    ParsableData,
}

#[derive(Debug)]
pub struct TagDefinition {
    pub closed_by_children: &'static [&'static str],
    pub content_type: TagContentType,
    /// Per-namespace-prefix content type overrides (`<title>` is parsable
    /// inside `svg`).
    pub prefix_content_type: &'static [(&'static str, TagContentType)],
    pub closed_by_parent: bool,
    pub implicit_namespace_prefix: Option<&'static str>,
    pub is_void: bool,
    pub ignore_first_lf: bool,
    pub can_self_close: bool,
    pub prevent_namespace_inheritance: bool,
}

/// Resolves a tag name to its definition; `html_tag_definition` and
/// `xml_tag_definition` are the provided implementations.
pub type TagDefinitionResolver = fn(&str) -> &'static TagDefinition;

impl TagDefinition {
    pub fn is_closed_by_child(&self, name: &str) -> bool {
        self.is_void
            || self
                .closed_by_children
                .iter()
                .any(|child| child.eq_ignore_ascii_case(name))
    }

    pub fn get_content_type(&self, prefix: Option<&str>) -> TagContentType {
        if let Some(prefix) = prefix {
            for (p, content_type) in self.prefix_content_type {
                if *p == prefix {
                    return *content_type;
                }
            }
        }
        self.content_type
    }
}

const BASE: TagDefinition = TagDefinition {
    closed_by_children: &[],
    content_type: TagContentType::ParsableData,
    prefix_content_type: &[],
    closed_by_parent: false,
    implicit_namespace_prefix: None,
    is_void: false,
    ignore_first_lf: false,
    can_self_close: false,
    prevent_namespace_inheritance: false,
};

/// Unknown tags (custom elements, foreign elements) may self-close.
static DEFAULT_TAG: TagDefinition = TagDefinition { can_self_close: true, ..BASE };

static VOID_TAG: TagDefinition = TagDefinition {
    is_void: true,
    closed_by_parent: true,
    can_self_close: true,
    ..BASE
};

static P_TAG: TagDefinition = TagDefinition {
    closed_by_children: &[
        "address",
        "article",
        "aside",
        "blockquote",
        "div",
        "dl",
        "fieldset",
        "footer",
        "form",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "header",
        "hgroup",
        "hr",
        "main",
        "nav",
        "ol",
        "p",
        "pre",
        "section",
        "table",
        "ul",
    ],
    closed_by_parent: true,
    ..BASE
};

static THEAD_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["tbody", "tfoot"], ..BASE };

static TBODY_TAG: TagDefinition = TagDefinition {
    closed_by_children: &["tbody", "tfoot"],
    closed_by_parent: true,
    ..BASE
};

static TFOOT_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["tbody"], closed_by_parent: true, ..BASE };

static TR_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["tr"], closed_by_parent: true, ..BASE };

static TD_TH_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["td", "th"], closed_by_parent: true, ..BASE };

static SVG_TAG: TagDefinition =
    TagDefinition { implicit_namespace_prefix: Some("svg"), ..BASE };

static FOREIGN_OBJECT_TAG: TagDefinition = TagDefinition {
    implicit_namespace_prefix: Some("svg"),
    prevent_namespace_inheritance: true,
    ..BASE
};

static MATH_TAG: TagDefinition =
    TagDefinition { implicit_namespace_prefix: Some("math"), ..BASE };

static LI_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["li"], closed_by_parent: true, ..BASE };

static DT_TAG: TagDefinition = TagDefinition { closed_by_children: &["dt", "dd"], ..BASE };

static DD_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["dt", "dd"], closed_by_parent: true, ..BASE };

static RB_TAG: TagDefinition = TagDefinition {
    closed_by_children: &["rb", "rt", "rtc", "rp"],
    closed_by_parent: true,
    ..BASE
};

static RTC_TAG: TagDefinition = TagDefinition {
    closed_by_children: &["rb", "rtc", "rp"],
    closed_by_parent: true,
    ..BASE
};

static OPTGROUP_TAG: TagDefinition =
    TagDefinition { closed_by_children: &["optgroup"], closed_by_parent: true, ..BASE };

static OPTION_TAG: TagDefinition = TagDefinition {
    closed_by_children: &["option", "optgroup"],
    closed_by_parent: true,
    ..BASE
};

static PRE_TAG: TagDefinition = TagDefinition { ignore_first_lf: true, ..BASE };

static RAW_TEXT_TAG: TagDefinition =
    TagDefinition { content_type: TagContentType::RawText, ..BASE };

static TITLE_TAG: TagDefinition = TagDefinition {
    content_type: TagContentType::EscapableRawText,
    prefix_content_type: &[("svg", TagContentType::ParsableData)],
    ..BASE
};

static TEXTAREA_TAG: TagDefinition = TagDefinition {
    content_type: TagContentType::EscapableRawText,
    ignore_first_lf: true,
    ..BASE
};

/// Known standard tags that never self-close.
static COMMON_TAG: TagDefinition = BASE;

static HTML_TAG_DEFINITIONS: phf::Map<&'static str, &'static TagDefinition> = phf_map! {
    "base" => &VOID_TAG,
    "meta" => &VOID_TAG,
    "area" => &VOID_TAG,
    "embed" => &VOID_TAG,
    "link" => &VOID_TAG,
    "img" => &VOID_TAG,
    "input" => &VOID_TAG,
    "param" => &VOID_TAG,
    "hr" => &VOID_TAG,
    "br" => &VOID_TAG,
    "source" => &VOID_TAG,
    "track" => &VOID_TAG,
    "wbr" => &VOID_TAG,
    "col" => &VOID_TAG,
    "p" => &P_TAG,
    "thead" => &THEAD_TAG,
    "tbody" => &TBODY_TAG,
    "tfoot" => &TFOOT_TAG,
    "tr" => &TR_TAG,
    "td" => &TD_TH_TAG,
    "th" => &TD_TH_TAG,
    "svg" => &SVG_TAG,
    "foreignObject" => &FOREIGN_OBJECT_TAG,
    "math" => &MATH_TAG,
    "li" => &LI_TAG,
    "dt" => &DT_TAG,
    "dd" => &DD_TAG,
    "rb" => &RB_TAG,
    "rt" => &RB_TAG,
    "rtc" => &RTC_TAG,
    "rp" => &RB_TAG,
    "optgroup" => &OPTGROUP_TAG,
    "option" => &OPTION_TAG,
    "pre" => &PRE_TAG,
    "listing" => &PRE_TAG,
    "style" => &RAW_TEXT_TAG,
    "script" => &RAW_TEXT_TAG,
    "title" => &TITLE_TAG,
    "textarea" => &TEXTAREA_TAG,
    "a" => &COMMON_TAG,
    "abbr" => &COMMON_TAG,
    "address" => &COMMON_TAG,
    "article" => &COMMON_TAG,
    "aside" => &COMMON_TAG,
    "b" => &COMMON_TAG,
    "bdi" => &COMMON_TAG,
    "bdo" => &COMMON_TAG,
    "blockquote" => &COMMON_TAG,
    "body" => &COMMON_TAG,
    "button" => &COMMON_TAG,
    "canvas" => &COMMON_TAG,
    "caption" => &COMMON_TAG,
    "cite" => &COMMON_TAG,
    "code" => &COMMON_TAG,
    "colgroup" => &COMMON_TAG,
    "data" => &COMMON_TAG,
    "datalist" => &COMMON_TAG,
    "del" => &COMMON_TAG,
    "details" => &COMMON_TAG,
    "dfn" => &COMMON_TAG,
    "dialog" => &COMMON_TAG,
    "div" => &COMMON_TAG,
    "dl" => &COMMON_TAG,
    "em" => &COMMON_TAG,
    "fieldset" => &COMMON_TAG,
    "figcaption" => &COMMON_TAG,
    "figure" => &COMMON_TAG,
    "footer" => &COMMON_TAG,
    "form" => &COMMON_TAG,
    "h1" => &COMMON_TAG,
    "h2" => &COMMON_TAG,
    "h3" => &COMMON_TAG,
    "h4" => &COMMON_TAG,
    "h5" => &COMMON_TAG,
    "h6" => &COMMON_TAG,
    "head" => &COMMON_TAG,
    "header" => &COMMON_TAG,
    "hgroup" => &COMMON_TAG,
    "html" => &COMMON_TAG,
    "i" => &COMMON_TAG,
    "iframe" => &COMMON_TAG,
    "ins" => &COMMON_TAG,
    "kbd" => &COMMON_TAG,
    "label" => &COMMON_TAG,
    "legend" => &COMMON_TAG,
    "main" => &COMMON_TAG,
    "map" => &COMMON_TAG,
    "mark" => &COMMON_TAG,
    "menu" => &COMMON_TAG,
    "meter" => &COMMON_TAG,
    "nav" => &COMMON_TAG,
    "noscript" => &COMMON_TAG,
    "object" => &COMMON_TAG,
    "ol" => &COMMON_TAG,
    "output" => &COMMON_TAG,
    "progress" => &COMMON_TAG,
    "q" => &COMMON_TAG,
    "s" => &COMMON_TAG,
    "samp" => &COMMON_TAG,
    "section" => &COMMON_TAG,
    "small" => &COMMON_TAG,
    "span" => &COMMON_TAG,
    "strong" => &COMMON_TAG,
    "sub" => &COMMON_TAG,
    "summary" => &COMMON_TAG,
    "sup" => &COMMON_TAG,
    "table" => &COMMON_TAG,
    "time" => &COMMON_TAG,
    "u" => &COMMON_TAG,
    "ul" => &COMMON_TAG,
    "var" => &COMMON_TAG,
    "video" => &COMMON_TAG,
};

/// Looks up the HTML definition for a tag name, case-sensitively first so
/// that `foreignObject` resolves, then case-insensitively.
pub fn html_tag_definition(tag_name: &str) -> &'static TagDefinition {
    if let Some(definition) = HTML_TAG_DEFINITIONS.get(tag_name) {
        return definition;
    }
    if let Some(definition) = HTML_TAG_DEFINITIONS.get(tag_name.to_ascii_lowercase().as_str()) {
        return definition;
    }
    &DEFAULT_TAG
}

static XML_TAG: TagDefinition = TagDefinition { can_self_close: true, ..BASE };

/// Every XML tag is parsable and self-closable.
pub fn xml_tag_definition(_tag_name: &str) -> &'static TagDefinition {
    &XML_TAG
}

/// Splits a `:namespace:name` string into its namespace and local name.
pub fn split_ns_name(element_name: &str) -> (Option<&str>, &str) {
    let Some(rest) = element_name.strip_prefix(':') else {
        return (None, element_name);
    };
    match rest.find(':') {
        Some(colon) => (Some(&rest[..colon]), &rest[colon + 1..]),
        None => (None, element_name),
    }
}

pub fn get_ns_prefix(full_name: &str) -> Option<&str> {
    split_ns_name(full_name).0
}

pub fn merge_ns_and_name(prefix: &str, local_name: &str) -> String {
    if prefix.is_empty() {
        local_name.to_string()
    } else {
        format!(":{prefix}:{local_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_tags_are_void_and_self_closable() {
        let br = html_tag_definition("br");
        assert!(br.is_void);
        assert!(br.can_self_close);
        assert!(br.closed_by_parent);
    }

    #[test]
    fn void_tags_are_closed_by_any_child() {
        assert!(html_tag_definition("img").is_closed_by_child("div"));
    }

    #[test]
    fn paragraph_is_closed_by_block_children() {
        let p = html_tag_definition("p");
        assert!(p.is_closed_by_child("div"));
        assert!(p.is_closed_by_child("P"));
        assert!(!p.is_closed_by_child("span"));
    }

    #[test]
    fn title_content_type_depends_on_prefix() {
        let title = html_tag_definition("title");
        assert_eq!(title.get_content_type(None), TagContentType::EscapableRawText);
        assert_eq!(title.get_content_type(Some("svg")), TagContentType::ParsableData);
    }

    #[test]
    fn script_and_style_are_raw_text() {
        assert_eq!(
            html_tag_definition("script").get_content_type(None),
            TagContentType::RawText
        );
        assert_eq!(
            html_tag_definition("style").get_content_type(None),
            TagContentType::RawText
        );
    }

    #[test]
    fn lookup_is_case_insensitive_for_known_tags() {
        assert!(!html_tag_definition("DIV").can_self_close);
        assert!(html_tag_definition("foreignObject").prevent_namespace_inheritance);
    }

    #[test]
    fn unknown_tags_use_the_permissive_default() {
        let custom = html_tag_definition("my-element");
        assert!(custom.can_self_close);
        assert!(!custom.is_void);
        assert_eq!(custom.get_content_type(None), TagContentType::ParsableData);
    }

    #[test]
    fn standard_tags_cannot_self_close() {
        assert!(!html_tag_definition("div").can_self_close);
        assert!(!html_tag_definition("span").can_self_close);
    }

    #[test]
    fn xml_definition_is_uniform() {
        let def = xml_tag_definition("anything");
        assert!(def.can_self_close);
        assert!(!def.is_void);
        assert_eq!(def.get_content_type(None), TagContentType::ParsableData);
    }

    #[test]
    fn namespace_helpers_round_trip() {
        assert_eq!(split_ns_name(":svg:title"), (Some("svg"), "title"));
        assert_eq!(split_ns_name("div"), (None, "div"));
        assert_eq!(merge_ns_and_name("svg", "title"), ":svg:title");
        assert_eq!(merge_ns_and_name("", "div"), "div");
        assert_eq!(get_ns_prefix(":math:mi"), Some("math"));
        assert_eq!(get_ns_prefix("mi"), None);
    }
}
