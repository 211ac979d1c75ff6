//! Finds tool call requests embedded in assistant text.
//!
//! The model is asked to write
//!
//! ```text
//! <tool_call>
//! <name>tool_name</name>
//! <arguments>{"key": "value"}</arguments>
//! </tool_call>
//! ```
//!
//! Models drift from that format, so parsing tries a chain of increasingly forgiving
//! strategies and keeps the result of the first one that finds anything.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    /// Parsed JSON arguments, or the raw text as a string when it is not valid JSON
    pub arguments: Value,
}

type Strategy = fn(&str) -> Option<Vec<(String, String)>>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("strict", strict),
    ("whitespace-tolerant", whitespace_tolerant),
    ("lenient", lenient),
];

/// A block delimiter plus the pattern its body has to match in full.
struct BlockFormat {
    block: Regex,
    open: Regex,
    body: Regex,
}

impl BlockFormat {
    fn new(open: &str, close: &str, name: (&str, &str), arguments: (&str, &str)) -> Self {
        let compile = |pattern: String| Regex::new(&pattern).unwrap();
        Self {
            block: compile(format!("(?s){open}(.*?){close}")),
            open: compile(open.to_string()),
            body: compile(format!(
                r"(?s)\A\s*{}([^<]*){}\s*{}(.*){}\s*\z",
                name.0, name.1, arguments.0, arguments.1
            )),
        }
    }

    /// Name and argument text of every well-formed block.
    ///
    /// The lazy block pattern stops at the first closing tag. An unclosed block before a
    /// good one leaves its opening tag inside the body, so only the text after the last
    /// opening tag is matched. Bodies that do not match are dropped.
    fn pairs(&self, text: &str) -> Option<Vec<(String, String)>> {
        let pairs: Vec<_> = self
            .block
            .captures_iter(text)
            .filter_map(|caps| {
                let body = caps.get(1)?.as_str();
                let body = match self.open.find_iter(body).last() {
                    Some(inner) => &body[inner.end()..],
                    None => body,
                };
                let inner = self.body.captures(body)?;
                Some((inner[1].to_string(), inner[2].to_string()))
            })
            .collect();
        (!pairs.is_empty()).then_some(pairs)
    }
}

static STRICT: Lazy<BlockFormat> = Lazy::new(|| {
    BlockFormat::new(
        "<tool_call>",
        "</tool_call>",
        ("<name>", "</name>"),
        ("<arguments>", "</arguments>"),
    )
});

static WHITESPACE_TOLERANT: Lazy<BlockFormat> = Lazy::new(|| {
    BlockFormat::new(
        r"<\s*tool_call\s*>",
        r"<\s*/\s*tool_call\s*>",
        (r"<\s*name\s*>", r"<\s*/\s*name\s*>"),
        (r"<\s*arguments\s*>", r"<\s*/\s*arguments\s*>"),
    )
});

static NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<\s*name\s*>([^<]*)<\s*/\s*name\s*>").unwrap());

static ARGUMENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<\s*arguments\s*>(.*?)<\s*/\s*arguments\s*>").unwrap());

fn strict(text: &str) -> Option<Vec<(String, String)>> {
    STRICT.pairs(text)
}

fn whitespace_tolerant(text: &str) -> Option<Vec<(String, String)>> {
    WHITESPACE_TOLERANT.pairs(text)
}

/// Pairs every `<name>` with the `<arguments>` at the same position, ignoring the
/// surrounding blocks. Only trusted when both counts agree.
fn lenient(text: &str) -> Option<Vec<(String, String)>> {
    let names: Vec<_> = NAME.captures_iter(text).map(|c| c[1].to_string()).collect();
    let arguments: Vec<_> = ARGUMENTS
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    if names.is_empty() || names.len() != arguments.len() {
        return None;
    }
    Some(names.into_iter().zip(arguments).collect())
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Extracts tool calls from `text` in the order they appear.
///
/// An empty result means the reply is final.
pub fn extract_tool_calls(text: &str) -> Vec<ToolInvocation> {
    for (label, strategy) in STRATEGIES {
        if let Some(pairs) = strategy(text) {
            tracing::debug!(strategy = label, count = pairs.len(), "found tool calls");
            return pairs
                .into_iter()
                .map(|(name, arguments)| ToolInvocation {
                    name: name.trim().to_string(),
                    arguments: parse_arguments(arguments.trim()),
                })
                .collect();
        }
    }
    Vec::new()
}
