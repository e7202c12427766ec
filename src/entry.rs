//! Logical file entries as recorded in an archive's FAT

use bitflags::bitflags;

/// Type string for entries with no recognized category.
pub const FILETYPE_GENERIC: &str = "generic";

bitflags! {
    /// Per-entry attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryAttrs: u8 {
        /// Stored data passes through a compression filter.
        const COMPRESSED = 0x01;
        /// Stored data passes through an encryption filter.
        const ENCRYPTED = 0x02;
        /// Entry's data region is a nested archive.
        const FOLDER = 0x04;
        /// Entry is flagged hidden by the format.
        const HIDDEN = 0x08;
        /// Entry is a placeholder slot with no data.
        const VACANT = 0x10;
    }
}

/// One logical file inside an archive.
///
/// `offset` addresses the entry's whole on-disk record. Formats with an
/// embedded FAT put `header_len` bytes of their own bookkeeping at that
/// offset; the file data follows at `offset + header_len` and runs for
/// `stored_size` bytes. `real_size` is the length after the entry's
/// filter decodes the data, equal to `stored_size` when there is none.
///
/// `index` is the entry's slot in the on-disk FAT and survives
/// reordering of the in-memory file vector; strategies use it to
/// address their FAT records.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub index: u32,
    pub offset: u64,
    pub header_len: u64,
    pub stored_size: u64,
    pub real_size: u64,
    pub name: String,
    pub file_type: String,
    pub attrs: EntryAttrs,
    /// Name of the filter applied when opening this entry, if any.
    pub filter: Option<String>,
    /// Cleared when the entry is removed; held handles stay allocated
    /// but refuse further operations.
    pub valid: bool,
    /// Format-private numeric type code (Monster Bash, Doofus). Kept
    /// verbatim so unknown codes round-trip unchanged.
    pub native_type: Option<u16>,
}

impl FileEntry {
    pub fn new() -> Self {
        FileEntry {
            index: 0,
            offset: 0,
            header_len: 0,
            stored_size: 0,
            real_size: 0,
            name: String::new(),
            file_type: FILETYPE_GENERIC.to_string(),
            attrs: EntryAttrs::empty(),
            filter: None,
            valid: false,
            native_type: None,
        }
    }

    /// End of this entry's record: first byte past its data region.
    pub fn end(&self) -> u64 {
        self.offset + self.header_len + self.stored_size
    }
}

impl Default for FileEntry {
    fn default() -> Self {
        Self::new()
    }
}

/// ASCII case-insensitive filename comparison.
pub(crate) fn name_eq(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().eq_ignore_ascii_case(b.as_bytes())
}
