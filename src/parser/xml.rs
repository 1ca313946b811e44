//! Minimal owned element tree over `xml-rs` events, plus the namespace-scoped
//! lookup used by the extractors.

use ::xml::reader::{EventReader, XmlEvent};

use super::ExtractError;

/// Namespace of the traffic data standard schema.
pub const TRAFFIC_NAMESPACE: &str = "http://traffic.transportdata.tw/standard/traffic/schema/";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub namespace: Option<String>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    /// Parses a whole document into its root element.
    pub fn parse(bytes: &[u8]) -> Result<Element, ExtractError> {
        let reader = EventReader::new(bytes);
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;

        for event in reader {
            match event? {
                XmlEvent::StartElement { name, .. } => stack.push(Element {
                    name: name.local_name,
                    namespace: name.namespace,
                    ..Default::default()
                }),
                XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                    if let Some(open) = stack.last_mut() {
                        open.text.push_str(&text);
                    }
                }
                XmlEvent::EndElement { .. } => {
                    if let Some(done) = stack.pop() {
                        match stack.last_mut() {
                            Some(parent) => parent.children.push(done),
                            None => root = Some(done),
                        }
                    }
                }
                _ => {}
            }
        }

        root.ok_or(ExtractError::EmptyDocument)
    }

    fn is_unqualified(&self) -> bool {
        self.namespace.as_deref().is_none_or(str::is_empty)
    }
}

/// Which element names a document uses below its top level.
///
/// Chosen once per document by [`ElementLookup::detect`] and then applied to
/// every station, lane and flow lookup in that document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementLookup {
    Qualified,
    Unqualified,
}

impl ElementLookup {
    /// Looks for namespace-qualified `tags` first, then unqualified ones.
    ///
    /// Returns the scope together with the first tag that has matches, or
    /// `None` when the document holds none of them under either scope.
    pub fn detect<'t>(root: &Element, tags: &[&'t str]) -> Option<(Self, &'t str)> {
        [ElementLookup::Qualified, ElementLookup::Unqualified]
            .into_iter()
            .find_map(|scope| {
                tags.iter()
                    .find(|tag| scope.first_descendant(root, tag).is_some())
                    .map(|tag| (scope, *tag))
            })
    }

    fn other(self) -> Self {
        match self {
            ElementLookup::Qualified => ElementLookup::Unqualified,
            ElementLookup::Unqualified => ElementLookup::Qualified,
        }
    }

    fn matches(self, el: &Element, tag: &str) -> bool {
        el.name == tag
            && match self {
                ElementLookup::Qualified => el.namespace.as_deref() == Some(TRAFFIC_NAMESPACE),
                ElementLookup::Unqualified => el.is_unqualified(),
            }
    }

    pub fn child<'a>(self, parent: &'a Element, tag: &str) -> Option<&'a Element> {
        parent.children.iter().find(|c| self.matches(c, tag))
    }

    /// Trimmed text of a direct child; `None` when the child is absent.
    pub fn child_text<'a>(self, parent: &'a Element, tag: &str) -> Option<&'a str> {
        self.child(parent, tag).map(|c| c.text.trim())
    }

    /// All matching elements below `root`, in document order.
    pub fn descendants<'a>(self, root: &'a Element, tag: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect(root, tag, &mut found);
        found
    }

    pub fn first_descendant<'a>(self, root: &'a Element, tag: &str) -> Option<&'a Element> {
        root.children.iter().find_map(|c| {
            if self.matches(c, tag) {
                Some(c)
            } else {
                self.first_descendant(c, tag)
            }
        })
    }

    /// Document-level text lookup: the top level may use either style.
    pub fn top_level_text<'a>(self, root: &'a Element, tag: &str) -> Option<&'a str> {
        self.first_descendant(root, tag)
            .or_else(|| self.other().first_descendant(root, tag))
            .map(|el| el.text.trim())
    }

    fn collect<'a>(self, el: &'a Element, tag: &str, found: &mut Vec<&'a Element>) {
        for child in &el.children {
            if self.matches(child, tag) {
                found.push(child);
            }
            self.collect(child, tag, found);
        }
    }
}

/// Sensor feeds omit zero-valued fields, so empty or unparseable text reads as 0.
pub fn coerce_f64(text: Option<&str>) -> f64 {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .and_then(|t| t.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

pub fn coerce_i64(text: Option<&str>) -> i64 {
    coerce_f64(text).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUALIFIED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Root xmlns="http://traffic.transportdata.tw/standard/traffic/schema/">
  <UpdateTime>2025-04-01T08:05:00+08:00</UpdateTime>
  <Items><Item><ID>a</ID></Item><Item><ID> b </ID></Item></Items>
</Root>"#;

    const UNQUALIFIED: &str = r#"<Root><Items><Item><ID>a</ID></Item></Items></Root>"#;

    #[test]
    fn test_parse_builds_tree() {
        let root = Element::parse(QUALIFIED.as_bytes()).unwrap();
        assert_eq!(root.name, "Root");
        assert_eq!(root.namespace.as_deref(), Some(TRAFFIC_NAMESPACE));
        assert_eq!(root.children.len(), 2);
    }

    #[test]
    fn test_detect_prefers_qualified() {
        let root = Element::parse(QUALIFIED.as_bytes()).unwrap();
        let (scope, tag) = ElementLookup::detect(&root, &["Item"]).unwrap();
        assert_eq!(scope, ElementLookup::Qualified);
        assert_eq!(tag, "Item");

        let items = scope.descendants(&root, "Item");
        assert_eq!(items.len(), 2);
        assert_eq!(scope.child_text(items[1], "ID"), Some("b"));
        assert!(ElementLookup::Unqualified.descendants(&root, "Item").is_empty());
    }

    #[test]
    fn test_detect_falls_back_to_unqualified() {
        let root = Element::parse(UNQUALIFIED.as_bytes()).unwrap();
        let (scope, _) = ElementLookup::detect(&root, &["Item"]).unwrap();
        assert_eq!(scope, ElementLookup::Unqualified);
        assert_eq!(scope.descendants(&root, "Item").len(), 1);
    }

    #[test]
    fn test_detect_tries_tags_in_order() {
        let root = Element::parse(UNQUALIFIED.as_bytes()).unwrap();
        let (_, tag) = ElementLookup::detect(&root, &["Missing", "Item"]).unwrap();
        assert_eq!(tag, "Item");
        assert!(ElementLookup::detect(&root, &["Missing"]).is_none());
    }

    #[test]
    fn test_top_level_text_accepts_either_style() {
        let root = Element::parse(QUALIFIED.as_bytes()).unwrap();
        assert_eq!(
            ElementLookup::Unqualified.top_level_text(&root, "UpdateTime"),
            Some("2025-04-01T08:05:00+08:00")
        );
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(Element::parse(b"<Root><Open></Root>").is_err());
        assert!(Element::parse(b"").is_err());
    }

    #[test]
    fn test_coercion_defaults_to_zero() {
        assert_eq!(coerce_f64(None), 0.0);
        assert_eq!(coerce_f64(Some("")), 0.0);
        assert_eq!(coerce_f64(Some("  ")), 0.0);
        assert_eq!(coerce_f64(Some("n/a")), 0.0);
        assert_eq!(coerce_f64(Some(" 12.5 ")), 12.5);
        assert_eq!(coerce_i64(Some("7.0")), 7);
        assert_eq!(coerce_i64(Some("-99")), -99);
    }
}
