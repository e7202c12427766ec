//! Archive-level attributes
//!
//! Formats expose a flat list of typed fields (a WAD's IWAD/PWAD type,
//! an RFF's version, an EPF's description text). Each carries a
//! `changed` bit that strategies consult during flush instead of
//! hooking every setter.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Value of one archive-level attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    /// Index into [`Attribute::enum_names`].
    Enum(u32),
    Text(String),
    Int(i64),
}

/// One archive-level attribute with its metadata.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: String,
    pub desc: String,
    pub value: AttrValue,
    /// Allowed names for `Enum` values, in order.
    pub enum_names: Vec<String>,
    /// Maximum length for `Text` values; 0 means unlimited.
    pub max_len: usize,
    /// Set when the value changes; strategies clear it once the new
    /// value reaches the on-disk header.
    pub changed: bool,
}

impl Attribute {
    pub fn enumeration(
        name: &str,
        desc: &str,
        names: &[&str],
        value: u32,
    ) -> Self {
        Attribute {
            name: name.to_string(),
            desc: desc.to_string(),
            value: AttrValue::Enum(value),
            enum_names: names.iter().map(|s| s.to_string()).collect(),
            max_len: 0,
            changed: false,
        }
    }

    pub fn text(name: &str, desc: &str, value: String, max_len: usize) -> Self {
        Attribute {
            name: name.to_string(),
            desc: desc.to_string(),
            value: AttrValue::Text(value),
            enum_names: Vec::new(),
            max_len,
            changed: false,
        }
    }

    /// Check that `value` is the right kind and within range for this
    /// attribute.
    pub(crate) fn validate(&self, value: &AttrValue) -> Result<()> {
        match (&self.value, value) {
            (AttrValue::Enum(_), AttrValue::Enum(v)) => {
                if *v as usize >= self.enum_names.len() {
                    return Err(Error::NotSupported(format!(
                        "attribute {:?} has no value {}",
                        self.name, v
                    )));
                }
            }
            (AttrValue::Text(_), AttrValue::Text(t)) => {
                if self.max_len > 0 && t.len() > self.max_len {
                    return Err(Error::FormatLimit(format!(
                        "attribute {:?} is limited to {} bytes",
                        self.name, self.max_len
                    )));
                }
            }
            (AttrValue::Int(_), AttrValue::Int(_)) => {}
            _ => {
                return Err(Error::NotSupported(format!(
                    "wrong value kind for attribute {:?}",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
