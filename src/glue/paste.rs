/// Typed paste requests
///
/// The rendering front end hands this module typed requests for glued
/// values; each variant carries its own rendering parameters and resolves
/// through explicit dispatch against the store.
use serde_json::Value;
use thiserror::Error;

use super::GlueStore;
use crate::notebook::Mimebundle;

/// Image MIME types a figure paste accepts, in preference order
const IMAGE_MIMES: [&str; 3] = ["image/svg+xml", "image/png", "image/jpeg"];

#[derive(Debug, Clone)]
pub enum PasteRequest {
    Plain(PlainPaste),
    Text(TextPaste),
    Figure(FigurePaste),
}

/// Paste the raw mimebundle under a key
#[derive(Debug, Clone)]
pub struct PlainPaste {
    pub key: String,
}

/// Paste the plain-text representation, optionally formatted
#[derive(Debug, Clone)]
pub struct TextPaste {
    pub key: String,
    /// Numeric format spec, e.g. `.2f` or `>8.3f`
    pub formatting: Option<String>,
}

impl TextPaste {
    /// Parse role text of the form `key` or `key:format`
    ///
    /// Everything right of the rightmost `:` is the format spec.
    pub fn parse(text: &str) -> Self {
        match text.rsplit_once(':') {
            Some((key, formatting)) => Self {
                key: key.to_string(),
                formatting: Some(formatting.to_string()),
            },
            None => Self {
                key: text.to_string(),
                formatting: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FigureAlign {
    Left,
    Center,
    Right,
}

/// Paste an image representation wrapped in figure parameters
#[derive(Debug, Clone, Default)]
pub struct FigurePaste {
    pub key: String,
    pub width: Option<String>,
    pub classes: Vec<String>,
    pub align: Option<FigureAlign>,
    pub name: Option<String>,
}

#[derive(Debug)]
pub enum PasteOutput {
    /// The full (prefix-stripped) mimebundle
    Bundle(Mimebundle),
    /// A formatted plain-text value
    Text(String),
    /// One image representation plus the figure parameters
    Figure {
        mime: String,
        content: Value,
        width: Option<String>,
        classes: Vec<String>,
        align: Option<FigureAlign>,
        name: Option<String>,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasteError {
    #[error("no glue artifact registered under key '{0}'")]
    KeyNotFound(String),

    #[error("glue artifact '{key}' has no {mime} representation")]
    MimeTypeUnavailable { key: String, mime: String },
}

impl PasteRequest {
    pub fn key(&self) -> &str {
        match self {
            PasteRequest::Plain(paste) => &paste.key,
            PasteRequest::Text(paste) => &paste.key,
            PasteRequest::Figure(paste) => &paste.key,
        }
    }

    /// Resolve this request against the store
    pub fn resolve(&self, store: &GlueStore) -> Result<PasteOutput, PasteError> {
        let entry = store
            .resolve(self.key(), true)
            .ok_or_else(|| PasteError::KeyNotFound(self.key().to_string()))?;

        match self {
            PasteRequest::Plain(_) => Ok(PasteOutput::Bundle(entry.data)),

            PasteRequest::Text(paste) => {
                let value =
                    entry
                        .data
                        .get("text/plain")
                        .ok_or_else(|| PasteError::MimeTypeUnavailable {
                            key: paste.key.clone(),
                            mime: "text/plain".to_string(),
                        })?;
                let text = match value.as_str() {
                    Some(text) => text.trim_matches('\'').to_string(),
                    None => value.to_string(),
                };
                let text = match &paste.formatting {
                    Some(spec) => format_number(&text, spec),
                    None => text,
                };
                Ok(PasteOutput::Text(text))
            }

            PasteRequest::Figure(paste) => {
                for mime in IMAGE_MIMES {
                    if let Some(content) = entry.data.get(mime) {
                        return Ok(PasteOutput::Figure {
                            mime: mime.to_string(),
                            content: content.clone(),
                            width: paste.width.clone(),
                            classes: paste.classes.clone(),
                            align: paste.align,
                            name: paste.name.clone(),
                        });
                    }
                }
                Err(PasteError::MimeTypeUnavailable {
                    key: paste.key.clone(),
                    mime: "image/*".to_string(),
                })
            }
        }
    }
}

/// Numeric format spec subset: `[<|>|^]? width? (.precision)? [f|e]?`
#[derive(Debug, Default)]
struct NumberFormat {
    align: Option<char>,
    width: usize,
    precision: Option<usize>,
    kind: Option<char>,
}

fn parse_format(spec: &str) -> Option<NumberFormat> {
    let mut format = NumberFormat::default();
    let mut rest = spec;

    if let Some(first) = rest.chars().next() {
        if matches!(first, '<' | '>' | '^') {
            format.align = Some(first);
            rest = &rest[1..];
        }
    }

    let width_len = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    if width_len > 0 {
        format.width = rest[..width_len].parse().ok()?;
        rest = &rest[width_len..];
    }

    if let Some(stripped) = rest.strip_prefix('.') {
        let prec_len = stripped.chars().take_while(|c| c.is_ascii_digit()).count();
        if prec_len == 0 {
            return None;
        }
        format.precision = Some(stripped[..prec_len].parse().ok()?);
        rest = &stripped[prec_len..];
    }

    match rest {
        "" => {}
        "f" | "e" => format.kind = rest.chars().next(),
        _ => return None,
    }

    Some(format)
}

/// Apply the format spec when the value is numeric; pass anything else
/// through untouched, including values with an unparseable spec
fn format_number(text: &str, spec: &str) -> String {
    let Ok(value) = text.trim().parse::<f64>() else {
        return text.to_string();
    };
    let Some(format) = parse_format(spec) else {
        return text.to_string();
    };

    let rendered = match (format.kind, format.precision) {
        (Some('e'), Some(precision)) => format!("{value:.precision$e}"),
        (Some('e'), None) => format!("{value:e}"),
        (_, Some(precision)) => format!("{value:.precision$}"),
        (_, None) => format!("{value}"),
    };

    pad(rendered, format.width, format.align.unwrap_or('>'))
}

fn pad(text: String, width: usize, align: char) -> String {
    if text.len() >= width {
        return text;
    }
    let fill = width - text.len();
    match align {
        '<' => format!("{text}{}", " ".repeat(fill)),
        '^' => {
            let left = fill / 2;
            format!("{}{text}{}", " ".repeat(left), " ".repeat(fill - left))
        }
        _ => format!("{}{text}", " ".repeat(fill)),
    }
}
