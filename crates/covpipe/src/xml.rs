//! Minimal element tree for the analysis document
//!
//! Only the subset the coverage tool reads is supported: nested elements with
//! text content. Attributes on input are skipped, mixed content is rejected.

use crate::result::{CovpipeError, CovpipeResult};
use std::fmt::Write;

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const INDENT: &str = "  ";

/// An XML element with either text or child elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: String,
    text: Option<String>,
    children: Vec<Element>,
}

impl Element {
    /// Create an empty element
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Create an element holding text
    #[must_use]
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        let mut element = Self::new(name);
        element.set_text(text);
        element
    }

    /// Append a child and return a handle to it
    pub fn add_element(&mut self, name: impl Into<String>) -> &mut Self {
        self.children.push(Self::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Append an already built child
    pub fn push(&mut self, child: Self) {
        self.children.push(child);
    }

    /// Replace the text content. Empty text is stored as no text.
    pub fn set_text(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        self.text = if text.is_empty() { None } else { Some(text) };
        self
    }

    /// Element name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text content, if any
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Child elements in document order
    #[must_use]
    pub fn children(&self) -> &[Self] {
        &self.children
    }

    /// First child with the given name
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Serialize as a pretty-printed document with an XML declaration
    #[must_use]
    pub fn to_document_string(&self) -> String {
        let mut out = String::from(DECLARATION);
        out.push('\n');
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, depth: usize) {
        let indent = INDENT.repeat(depth);
        match (&self.text, self.children.is_empty()) {
            (None, true) => {
                let _ = writeln!(out, "{indent}<{}/>", self.name);
            }
            (Some(text), true) => {
                let _ = writeln!(
                    out,
                    "{indent}<{name}>{}</{name}>",
                    escape_xml(text),
                    name = self.name
                );
            }
            (text, false) => {
                let _ = writeln!(out, "{indent}<{}>", self.name);
                if let Some(text) = text {
                    let _ = writeln!(out, "{indent}{INDENT}{}", escape_xml(text));
                }
                for child in &self.children {
                    child.write_into(out, depth + 1);
                }
                let _ = writeln!(out, "{indent}</{}>", self.name);
            }
        }
    }
}

/// Parse a document into its root element
pub fn parse(input: &str) -> CovpipeResult<Element> {
    let mut reader = Reader { input, pos: 0 };
    reader.skip_prolog()?;
    let root = reader.element()?;
    reader.skip_misc()?;
    if reader.pos < input.len() {
        return Err(reader.error("unexpected content after root element"));
    }
    Ok(root)
}

/// Escape text for element content
#[must_use]
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Resolve entity and character references
pub fn unescape_xml(s: &str) -> CovpipeResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let end = tail
            .find(';')
            .ok_or_else(|| CovpipeError::document(format!("unterminated entity in '{s}'")))?;
        let entity = &tail[..end];
        let resolved = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => char_reference(entity)
                .ok_or_else(|| CovpipeError::document(format!("unknown entity '&{entity};'")))?,
        };
        out.push(resolved);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn char_reference(entity: &str) -> Option<char> {
    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        entity.strip_prefix('#')?.parse().ok()?
    };
    char::from_u32(code)
}

struct Reader<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Reader<'a> {
    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn error(&self, message: &str) -> CovpipeError {
        CovpipeError::document(format!("{message} at byte {}", self.pos))
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.input.len() - trimmed.len();
    }

    fn skip_past(&mut self, terminator: &str) -> CovpipeResult<()> {
        match self.rest().find(terminator) {
            Some(idx) => {
                self.pos += idx + terminator.len();
                Ok(())
            }
            None => Err(self.error(&format!("missing '{terminator}'"))),
        }
    }

    fn skip_prolog(&mut self) -> CovpipeResult<()> {
        if self.rest().starts_with('\u{feff}') {
            self.pos += '\u{feff}'.len_utf8();
        }
        self.skip_misc()?;
        if self.rest().starts_with("<!DOCTYPE") {
            self.skip_past(">")?;
            self.skip_misc()?;
        }
        Ok(())
    }

    /// Skip whitespace, comments and processing instructions
    fn skip_misc(&mut self) -> CovpipeResult<()> {
        loop {
            self.skip_whitespace();
            if self.rest().starts_with("<?") {
                self.skip_past("?>")?;
            } else if self.rest().starts_with("<!--") {
                self.skip_past("-->")?;
            } else {
                return Ok(());
            }
        }
    }

    fn name(&mut self) -> CovpipeResult<&'a str> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected element name"));
        }
        self.pos += len;
        Ok(&rest[..len])
    }

    fn element(&mut self) -> CovpipeResult<Element> {
        if !self.rest().starts_with('<') {
            return Err(self.error("expected '<'"));
        }
        self.pos += 1;
        let name = self.name()?;
        let mut element = Element::new(name);

        // Attributes are not part of the document shape; skip them.
        let close = self
            .rest()
            .find('>')
            .ok_or_else(|| self.error("unterminated start tag"))?;
        let self_closing = self.rest()[..close].trim_end().ends_with('/');
        self.pos += close + 1;
        if self_closing {
            return Ok(element);
        }

        let mut text = String::new();
        loop {
            let rest = self.rest();
            if rest.is_empty() {
                return Err(self.error(&format!("unclosed element <{name}>")));
            }
            if rest.starts_with("</") {
                self.pos += 2;
                let closing = self.name()?;
                if closing != name {
                    return Err(self.error(&format!(
                        "mismatched closing tag </{closing}> for <{name}>"
                    )));
                }
                self.skip_whitespace();
                if !self.rest().starts_with('>') {
                    return Err(self.error("malformed end tag"));
                }
                self.pos += 1;
                break;
            } else if rest.starts_with("<!--") {
                self.skip_past("-->")?;
            } else if rest.starts_with("<![CDATA[") {
                self.pos += "<![CDATA[".len();
                let end = self
                    .rest()
                    .find("]]>")
                    .ok_or_else(|| self.error("unterminated CDATA section"))?;
                text.push_str(&escape_xml(&self.rest()[..end]));
                self.pos += end + 3;
            } else if rest.starts_with('<') {
                element.push(self.element()?);
            } else {
                let len = rest.find('<').unwrap_or(rest.len());
                text.push_str(&rest[..len]);
                self.pos += len;
            }
        }

        if element.children.is_empty() {
            element.set_text(unescape_xml(&text)?);
        } else if !text.trim().is_empty() {
            return Err(self.error(&format!("mixed content in <{name}>")));
        }
        Ok(element)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sample() -> Element {
        let mut root = Element::new("Root");
        root.add_element("Name").set_text("a < b & c");
        let list = root.add_element("List");
        list.add_element("Item").set_text("one");
        list.add_element("Item").set_text("two");
        root.add_element("Empty");
        root
    }

    mod writer_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_declaration_and_indentation() {
            let xml = sample().to_document_string();
            let expected = r#"<?xml version="1.0" encoding="UTF-8"?>
<Root>
  <Name>a &lt; b &amp; c</Name>
  <List>
    <Item>one</Item>
    <Item>two</Item>
  </List>
  <Empty/>
</Root>
"#;
            assert_eq!(xml, expected);
        }

        #[test]
        fn test_empty_text_is_no_text() {
            let element = Element::with_text("X", "");
            assert_eq!(element.text(), None);
            assert_eq!(element.to_document_string().lines().nth(1), Some("<X/>"));
        }

        #[test]
        fn test_escape_xml_handles_all_special_chars() {
            assert_eq!(escape_xml("&"), "&amp;");
            assert_eq!(escape_xml("<"), "&lt;");
            assert_eq!(escape_xml(">"), "&gt;");
            assert_eq!(escape_xml("\""), "&quot;");
            assert_eq!(escape_xml("'"), "&apos;");
            assert_eq!(escape_xml("plain"), "plain");
        }
    }

    mod parser_tests {
        use super::*;
        use pretty_assertions::assert_eq;

        #[test]
        fn test_round_trip() {
            let original = sample();
            let parsed = parse(&original.to_document_string()).unwrap();
            assert_eq!(parsed, original);
        }

        #[test]
        fn test_text_is_not_trimmed() {
            let parsed = parse("<A><B> spaced </B></A>").unwrap();
            assert_eq!(parsed.child("B").unwrap().text(), Some(" spaced "));
        }

        #[test]
        fn test_open_close_empty_equals_self_closing() {
            let a = parse("<A><B></B></A>").unwrap();
            let b = parse("<A><B/></A>").unwrap();
            assert_eq!(a, b);
        }

        #[test]
        fn test_skips_comments_and_attributes() {
            let parsed = parse(
                "<?xml version=\"1.0\"?>\n<!-- header -->\n<A id=\"1\"><!-- c --><B x='y'>t</B></A>\n",
            )
            .unwrap();
            assert_eq!(parsed.name(), "A");
            assert_eq!(parsed.children().len(), 1);
            assert_eq!(parsed.child("B").unwrap().text(), Some("t"));
        }

        #[test]
        fn test_character_references() {
            let parsed = parse("<A>&#65;&#x42;&quot;</A>").unwrap();
            assert_eq!(parsed.text(), Some("AB\""));
        }

        #[test]
        fn test_cdata() {
            let parsed = parse("<A><![CDATA[<raw> & stuff]]></A>").unwrap();
            assert_eq!(parsed.text(), Some("<raw> & stuff"));
        }

        #[test]
        fn test_mismatched_tag_is_error() {
            assert!(parse("<A><B></A></B>").is_err());
        }

        #[test]
        fn test_unclosed_is_error() {
            assert!(parse("<A><B>text").is_err());
        }

        #[test]
        fn test_mixed_content_is_error() {
            assert!(parse("<A>text<B/></A>").is_err());
        }

        #[test]
        fn test_trailing_garbage_is_error() {
            assert!(parse("<A/><B/>").is_err());
        }

        #[test]
        fn test_unknown_entity_is_error() {
            assert!(parse("<A>&nbsp;</A>").is_err());
        }

        #[test]
        fn test_children_named() {
            let root = sample();
            let list = root.child("List").unwrap();
            assert_eq!(list.children_named("Item").count(), 2);
            assert_eq!(list.children_named("Missing").count(), 0);
        }
    }
}
