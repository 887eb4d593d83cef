//! XML utilities using quick-xml for generating and reading back libvirt
//! domain documents.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;

use crate::error::{Error, Result};

const WHAT: &str = "domain XML";

/// A builder for creating XML documents with quick-xml
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl fmt::Debug for XmlWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlWriter")
            .field("len", &self.writer.get_ref().get_ref().len())
            .finish_non_exhaustive()
    }
}

impl XmlWriter {
    /// Create a new XML writer
    pub fn new() -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<()> {
        self.writer
            .write_event(event)
            .map_err(|e| Error::serialization(WHAT, e))
    }

    /// Start an XML element with attributes
    pub fn start_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.write(Event::Start(elem))
    }

    /// Write a simple element with text content
    pub fn write_text_element(&mut self, name: &str, text: &str) -> Result<()> {
        self.write_text_element_with_attrs(name, text, &[])
    }

    /// Write a simple element with text content and attributes
    pub fn write_text_element_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attributes: &[(&str, &str)],
    ) -> Result<()> {
        self.start_element(name, attributes)?;
        if !text.is_empty() {
            self.write(Event::Text(BytesText::new(text)))?;
        }
        self.end_element(name)
    }

    /// Write a self-closing element with attributes
    pub fn write_empty_element(&mut self, name: &str, attributes: &[(&str, &str)]) -> Result<()> {
        let mut elem = BytesStart::new(name);
        for (key, value) in attributes {
            elem.push_attribute((*key, *value));
        }
        self.write(Event::Empty(elem))
    }

    /// End an XML element
    pub fn end_element(&mut self, name: &str) -> Result<()> {
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// Get the generated XML as a string
    pub fn into_string(self) -> Result<String> {
        let bytes = self.writer.into_inner().into_inner();
        String::from_utf8(bytes).map_err(|e| Error::serialization(WHAT, e))
    }
}

impl Default for XmlWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple DOM node for XML parsing
#[derive(Debug, Clone)]
pub struct XmlNode {
    /// Element name
    pub name: String,
    /// Element attributes
    pub attributes: HashMap<String, String>,
    /// Concatenated text content
    pub text: String,
    /// Child elements in document order
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// Find first element by name (recursive search)
    pub fn find(&self, element_name: &str) -> Option<&XmlNode> {
        if self.name == element_name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(element_name))
    }

    /// Direct children with the given name
    pub fn children_named<'a>(
        &'a self,
        element_name: &'a str,
    ) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == element_name)
    }

    /// First direct child with the given name
    pub fn child(&self, element_name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == element_name)
    }

    /// Value of an attribute
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Get text content of this node
    pub fn text_content(&self) -> &str {
        &self.text
    }
}

fn node_from_start(e: &BytesStart<'_>) -> XmlNode {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .flatten()
        .map(|attr| {
            (
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned()),
            )
        })
        .collect();
    XmlNode {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    }
}

/// Parse XML string into a simple DOM structure
pub fn parse_xml_dom(xml: &str) -> Result<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(node_from_start(&e)),
            Ok(Event::Empty(e)) => {
                let node = node_from_start(&e);
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(node);
                } else if root.is_none() {
                    root = Some(node);
                }
            }
            Ok(Event::End(_)) => {
                if let Some(completed_node) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(completed_node);
                    } else {
                        root = Some(completed_node);
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Ok(text) = e.unescape() {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::serialization(WHAT, e)),
            _ => {}
        }
        buf.clear();
    }

    root.ok_or_else(|| Error::serialization(WHAT, "no root element found"))
}
