//! Decoding of DBGp reply bodies.
//!
//! Every reply is an XML document. The session hands the root element over
//! as an owned attributed-node tree ([`Element`]); the functions here pull
//! the interesting shapes out of it: the init handshake, continuation/status
//! replies, `context_get` property trees and `stack_get` stack records.

use std::collections::HashMap;
use std::fmt::Write as _;

use base64::Engine;

use crate::errors::TransportError;

/// Value shown in place of anything that looks like a credential.
pub const REDACTED_VALUE: &str = "*****";

/// An XML element with its attributes, direct text content and child
/// elements. Namespace prefixes are stripped, so Xdebug's `xdebug:message`
/// shows up under the name `message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: HashMap<String, String>,
    /// Concatenated text and CDATA content of this element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    fn required_attribute(&self, name: &str) -> Result<&str, TransportError> {
        self.attribute(name).ok_or_else(|| {
            TransportError::Protocol(format!(
                "element '{}' is missing the '{name}' attribute",
                self.name
            ))
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |child| child.name == name)
    }

    /// Re-render the tree as indented XML, for showing a raw reply to the
    /// user. Lossy with respect to namespaces and attribute order.
    pub fn to_pretty_xml(&self) -> String {
        let mut out = String::new();
        self.write_pretty(&mut out, 0);
        out
    }

    fn write_pretty(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = write!(out, "{indent}<{}", self.name);
        let mut attributes: Vec<_> = self.attributes.iter().collect();
        attributes.sort();
        for (key, value) in attributes {
            let _ = write!(out, " {key}=\"{}\"", escape_xml(value));
        }

        let text = self.text.trim();
        if self.children.is_empty() && text.is_empty() {
            out.push_str("/>\n");
            return;
        }

        out.push_str(">");
        if !text.is_empty() {
            out.push_str(&escape_xml(text));
        }
        if !self.children.is_empty() {
            out.push('\n');
            for child in &self.children {
                child.write_pretty(out, depth + 1);
            }
            out.push_str(&indent);
        }
        let _ = writeln!(out, "</{}>", self.name);
    }
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Parse a reply body into its root [`Element`].
pub fn parse_document(xml: &str) -> Result<Element, TransportError> {
    let document = roxmltree::Document::parse(xml)
        .map_err(|e| TransportError::Protocol(format!("invalid xml: {e}")))?;
    Ok(convert(document.root_element()))
}

fn convert(node: roxmltree::Node) -> Element {
    let attributes = node
        .attributes()
        .map(|attr| (attr.name().to_string(), attr.value().to_string()))
        .collect();

    let mut text = String::new();
    let mut children = Vec::new();
    for child in node.children() {
        if child.is_element() {
            children.push(convert(child));
        } else if child.is_text() {
            if let Some(t) = child.text() {
                text.push_str(t);
            }
        }
    }

    Element {
        name: node.tag_name().name().to_string(),
        attributes,
        text,
        children,
    }
}

/// The engine's opening handshake.
#[derive(Debug, Clone)]
pub struct InitPacket {
    /// URI of the script the engine stopped in when it connected.
    pub file_uri: String,
}

pub fn decode_init(root: &Element) -> Result<InitPacket, TransportError> {
    Ok(InitPacket {
        file_uri: root.required_attribute("fileuri")?.to_string(),
    })
}

/// Execution status reported on continuation and `status` replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Starting,
    Running,
    Break,
    Stopping,
    Stopped,
    Other(String),
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        match value {
            "starting" => Status::Starting,
            "running" => Status::Running,
            "break" => Status::Break,
            "stopping" => Status::Stopping,
            "stopped" => Status::Stopped,
            other => Status::Other(other.to_string()),
        }
    }
}

impl Status {
    /// The engine has finished the request and is going away.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Stopping | Status::Stopped)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let word = match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Break => "break",
            Status::Stopping => "stopping",
            Status::Stopped => "stopped",
            Status::Other(other) => other,
        };
        f.write_str(word)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakLocation {
    pub file: String,
    pub line: u32,
}

#[derive(Debug, Clone)]
pub struct StatusPacket {
    pub status: Status,
    pub reason: Option<String>,
    /// Where execution paused, taken from the engine's message element. A
    /// break reply without one just has no location to show.
    pub break_location: Option<BreakLocation>,
}

pub fn decode_status(root: &Element) -> Result<StatusPacket, TransportError> {
    let status = Status::from(root.required_attribute("status")?);
    let reason = root.attribute("reason").map(ToString::to_string);

    let break_location = root.children_named("message").find_map(|message| {
        let file = message.attribute("filename")?.to_string();
        let line = message.attribute("lineno")?.parse().ok()?;
        Some(BreakLocation { file, line })
    });

    Ok(StatusPacket {
        status,
        reason,
        break_location,
    })
}

/// One variable (or nested member) as reported by `context_get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Fully qualified name, e.g. `$arr['k']`.
    pub name: String,
    /// Declared DBGp type: int, float, bool, string, array, object, ...
    pub r#type: String,
    /// Decoded scalar value; absent for containers the engine sent no text
    /// for.
    pub value: Option<String>,
    pub children: Vec<Property>,
}

impl Property {
    /// Type-dispatched rendering of the value for every declared DBGp type.
    pub fn display_value(&self) -> String {
        let raw = self.value.as_deref().unwrap_or("");
        match self.r#type.as_str() {
            "uninitialized" => "<uninitialized>".to_string(),
            "null" => "null".to_string(),
            "bool" => if raw == "0" { "false" } else { "true" }.to_string(),
            "string" => format!("\"{raw}\""),
            "array" => format!("array({})", self.children.len()),
            "object" => format!("object({})", self.children.len()),
            "resource" => format!("resource({raw})"),
            _ => raw.to_string(),
        }
    }

    fn render_into(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "{} [{}] = {}",
            self.name,
            self.r#type,
            self.display_value()
        );
        for child in &self.children {
            child.render_into(out);
        }
    }
}

/// Flatten a decoded property forest into the text shown in the context
/// panel, one `name [type] = value` line per node, depth first.
pub fn render_properties(properties: &[Property]) -> String {
    let mut out = String::new();
    for property in properties {
        property.render_into(&mut out);
    }
    out
}

/// Recursively decode the `property` children of `root`.
///
/// Values arrive base64-encoded; if decoding fails the raw text is kept
/// instead. Decoding is best-effort and never fails the whole tree. Nameless
/// properties are dropped.
pub fn decode_property_tree(root: &Element) -> Vec<Property> {
    let mut properties = Vec::new();
    for element in root.children_named("property") {
        let Some(name) = element
            .attribute("fullname")
            .or_else(|| element.attribute("name"))
            .filter(|name| !name.is_empty())
        else {
            continue;
        };

        // children first, so the parent is complete when yielded
        let children = decode_property_tree(element);

        let value = if name.to_lowercase().contains("password") {
            Some(REDACTED_VALUE.to_string())
        } else {
            decode_text(element)
        };

        properties.push(Property {
            name: name.to_string(),
            r#type: element.attribute("type").unwrap_or_default().to_string(),
            value,
            children,
        });
    }
    properties
}

fn decode_text(element: &Element) -> Option<String> {
    let raw = element.text.trim();
    if raw.is_empty() {
        return None;
    }
    match base64::engine::general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            tracing::trace!(%e, "payload not base64, keeping raw text");
            Some(raw.to_string())
        }
    }
}

/// One record from a `stack_get` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEntry {
    pub level: u32,
    pub r#type: String,
    pub r#where: String,
    pub file: String,
    pub line: u32,
}

/// Decode the `stack` children of `root`. Records missing or mangling the
/// level/filename/lineno attributes are skipped, not fatal.
pub fn decode_stack(root: &Element) -> Vec<StackEntry> {
    root.children_named("stack")
        .filter_map(|element| {
            let entry = StackEntry {
                level: element.attribute("level")?.parse().ok()?,
                r#type: element.attribute("type").unwrap_or_default().to_string(),
                r#where: element.attribute("where").unwrap_or_default().to_string(),
                file: element.attribute("filename")?.to_string(),
                line: element.attribute("lineno")?.parse().ok()?,
            };
            Some(entry)
        })
        .collect()
}

/// Render stack records for the stack panel.
pub fn render_stack(entries: &[StackEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(
            out,
            "{level:>3}: {ty:<10} {location:<10} {file}:{line}",
            level = entry.level,
            ty = entry.r#type,
            location = entry.r#where,
            file = entry.file,
            line = entry.line,
        );
    }
    out
}
