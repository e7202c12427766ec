//! Serializable archive summaries for listing tools
//!
//! A read-only snapshot of an archive's metadata (format, attributes,
//! per-entry details) that serializes cleanly to JSON. Front-ends use
//! this for `list`-style output without touching engine internals.

use crate::archive::Archive;
use crate::attribute::AttrValue;
use crate::entry::EntryAttrs;
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct EntrySummary {
    pub name: String,
    pub stored_size: u64,
    pub real_size: u64,
    pub file_type: String,
    pub compressed: bool,
    pub encrypted: bool,
    pub folder: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AttributeSummary {
    pub name: String,
    pub value: AttrValue,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub format: String,
    pub attributes: Vec<AttributeSummary>,
    pub entries: Vec<EntrySummary>,
}

impl ArchiveSummary {
    pub fn capture(archive: &Archive) -> Self {
        ArchiveSummary {
            format: archive.format_code().to_string(),
            attributes: archive
                .attributes()
                .iter()
                .map(|a| AttributeSummary {
                    name: a.name.clone(),
                    value: a.value.clone(),
                })
                .collect(),
            entries: archive
                .files()
                .iter()
                .map(|h| {
                    let e = h.details();
                    EntrySummary {
                        name: e.name.clone(),
                        stored_size: e.stored_size,
                        real_size: e.real_size,
                        file_type: e.file_type.clone(),
                        compressed: e.attrs.contains(EntryAttrs::COMPRESSED),
                        encrypted: e.attrs.contains(EntryAttrs::ENCRYPTED),
                        folder: e.attrs.contains(EntryAttrs::FOLDER),
                    }
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            crate::error::Error::NotSupported(format!("summary serialization failed: {}", e))
        })
    }
}
