//! Parameter normalization
//!
//! Parameters arrive as inline JSON text, an `@file` reference, or a piped
//! stream, and leave as one structured value. No schema validation happens
//! here; the server checks arguments against its own input shape.

use std::fmt;
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use crate::error::{Result, ToolshedError};
use crate::value::{StructuredValue, empty_mapping};

/// Where a call's parameters come from
pub enum ParamSource {
    /// Structured text given directly
    Inline(String),
    /// Path to a file holding structured text
    File(PathBuf),
    /// A readable stream, usually stdin
    Stream(Box<dyn Read + Send>),
    /// Already structured
    Value(StructuredValue),
}

impl fmt::Debug for ParamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(text) => f.debug_tuple("Inline").field(text).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
        }
    }
}

impl ParamSource {
    /// Interpret a CLI parameter argument.
    ///
    /// `@path` reads a file, `-` reads stdin, no argument reads stdin when it
    /// is piped and means "no parameters" on a terminal.
    pub fn from_arg(arg: Option<&str>) -> Self {
        match arg {
            Some("-") => Self::Stream(Box::new(std::io::stdin())),
            Some(arg) => match arg.strip_prefix('@') {
                Some(path) => Self::File(PathBuf::from(path)),
                None => Self::Inline(arg.to_string()),
            },
            None if std::io::stdin().is_terminal() => Self::Inline(String::new()),
            None => Self::Stream(Box::new(std::io::stdin())),
        }
    }
}

impl From<StructuredValue> for ParamSource {
    fn from(value: StructuredValue) -> Self {
        Self::Value(value)
    }
}

/// Produce one canonical structured value from a parameter source
pub fn normalize(source: ParamSource) -> Result<StructuredValue> {
    match source {
        ParamSource::Value(value) => Ok(value),
        ParamSource::Inline(text) => parse(&text, "inline parameters"),
        ParamSource::File(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                ToolshedError::ParameterSourceUnavailable(format!("{}: {}", path.display(), e))
            })?;
            parse(&text, &path.display().to_string())
        }
        ParamSource::Stream(mut reader) => {
            let mut text = String::new();
            reader
                .read_to_string(&mut text)
                .map_err(|e| ToolshedError::ParameterSourceUnavailable(format!("stream: {}", e)))?;
            parse(&text, "stream")
        }
    }
}

fn parse(text: &str, origin: &str) -> Result<StructuredValue> {
    if text.trim().is_empty() {
        return Ok(empty_mapping());
    }
    serde_json::from_str(text).map_err(|e| ToolshedError::MalformedParameters(format!("{}: {}", origin, e)))
}
