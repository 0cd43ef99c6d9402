//! Turning type signatures into short, readable labels.

use crate::reflect::TypeSig;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Parenthesized segment: `(` anything without parentheses `)`
fn parenthesized() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^()]+)\)").ok()).as_ref()
}

/// A namespace-qualified type identifier, optionally decorated with array,
/// by-ref or pointer suffixes
fn dotted_identifier() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w`+]*(?:\.[A-Za-z_][\w`+]*)+(?:\[,*\]|\[\*\]|&|\*)*$").ok()
    })
    .as_ref()
}

/// Maps full type names to their aliases
#[derive(Debug, Clone, Copy)]
pub struct SignatureFormatter<'a> {
    aliases: &'a HashMap<String, String>,
}

impl<'a> SignatureFormatter<'a> {
    /// Creates a formatter over an alias table
    pub fn new(aliases: &'a HashMap<String, String>) -> Self {
        Self { aliases }
    }

    /// Returns the alias of `ty` if its full name is in the table,
    /// otherwise its full name unchanged
    pub fn legible_type(&self, ty: &TypeSig) -> String {
        self.legible_name(&ty.to_string())
    }

    /// [`Self::legible_type`] on an already rendered name
    pub fn legible_name(&self, name: &str) -> String {
        self.aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// Strips namespace qualification from type names inside parentheses.
///
/// `"id (System.String)"` becomes `"id (String)"`. Parenthesized text that
/// is not a dotted identifier, such as a generic argument list, is kept.
pub fn clean_strings(text: &str) -> String {
    let (Some(parenthesized), Some(dotted)) = (parenthesized(), dotted_identifier()) else {
        return text.to_string();
    };
    parenthesized
        .replace_all(text, |caps: &Captures<'_>| {
            let inner = &caps[1];
            if dotted.is_match(inner) {
                let last = inner.rsplit('.').next().unwrap_or(inner);
                format!("({})", last)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Removes characters that are not valid in XML 1.0 text (control
/// characters other than tab, LF and CR, surrogates, U+FFFE and U+FFFF)
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|&c| is_valid_char(c)).collect()
}

fn is_valid_char(c: char) -> bool {
    matches!(
        c as u32,
        0x9 | 0xA | 0xD | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x1_0000..=0x10_FFFF
    )
}
