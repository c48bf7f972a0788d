//! ---
//! adit_section: "01-core-functionality"
//! adit_subsection: "module"
//! adit_type: "source"
//! adit_scope: "code"
//! adit_description: "Primary orchestration and lifecycle management."
//! adit_version: "v0.0.0-prealpha"
//! adit_owner: "tbd"
//! ---
//! Codec for the XML control frames exchanged with Instances.
//!
//! Outbound commands are single-element documents with a fixed schema, so
//! they are rendered directly; inbound frames go through a real XML parser
//! because Instances are free to send elements this console does not act
//! upon yet.

use std::fmt;

/// A parsed inbound control frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    /// A downstream variable update from an Instance.
    Variable {
        /// Variable identifier.
        id: String,
        /// New value, possibly empty.
        value: String,
    },
    /// A recognised-but-unhandled element. Kept so new Instance builds can
    /// introduce frames without breaking older consoles.
    Unhandled {
        /// Tag name of the root element.
        element: String,
    },
}

/// Error raised when a frame is not a well-formed XML document.
#[derive(Debug)]
pub struct FrameError(String);

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed control frame: {}", self.0)
    }
}

impl std::error::Error for FrameError {}

/// Parse one inbound frame.
pub fn parse_inbound(payload: &str) -> Result<InboundFrame, FrameError> {
    let document = roxmltree::Document::parse(payload).map_err(|err| FrameError(err.to_string()))?;
    let root = document.root_element();

    match root.tag_name().name() {
        "Variable" => {
            let id = root
                .attribute("ID")
                .ok_or_else(|| FrameError("Variable element without ID".to_owned()))?;
            let value = root.text().unwrap_or_default();
            Ok(InboundFrame::Variable {
                id: id.to_owned(),
                value: value.to_owned(),
            })
        }
        other => Ok(InboundFrame::Unhandled {
            element: other.to_owned(),
        }),
    }
}

/// Render the broadcast frame that sets a channel variable on an Instance.
pub fn set_variable_request(variable_id: &str, value: &str) -> String {
    format!(
        "<SetVariableValueRequest ID=\"{}\">{}</SetVariableValueRequest>\r\n",
        escape_attribute(variable_id),
        escape_text(value)
    )
}

/// Render the broadcast frame that triggers a manual messaging rule.
pub fn evaluate_rule_request(rule_id: &str) -> String {
    format!(
        "<EvaluateManualMessagingRuleRequest ID=\"{}\"/>\r\n",
        escape_attribute(rule_id)
    )
}

fn escape_attribute(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn escape_text(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}
