//! Monster Bash .DAT containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/DAT_Format_(Monster_Bash)>
//!
//! No central FAT: each file carries a 37-byte embedded header of
//! u16 type code, u16 stored size, 31-byte name and u16 decompressed
//! size. A nonzero decompressed size marks LZW-compressed data
//! (`lzw-bash` filter). The numeric type code is surfaced as a
//! synthetic filename extension on load and folded back into the code
//! on save; both size fields are u16, so anything past 65535 bytes is
//! refused outright.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, EntryHandle, FatHooks, HookCtx};
use crate::entry::{EntryAttrs, FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const FIRST_FILE_OFFSET: u64 = 0;
const MAX_FILENAME_LEN: usize = 30;
const NAME_FIELD_LEN: usize = 31;
const EFAT_ENTRY_LEN: u64 = 37;
const MAX_FILE_SIZE: u64 = 0xFFFF;

/// Known type codes and the synthetic extensions they become.
const TYPE_MAP: &[(u16, &str, &str)] = &[
    (0, ".mif", "map/bash-info"),
    (1, ".mbg", "map/bash-bg"),
    (2, ".mfg", "map/bash-fg"),
    (3, ".tbg", "image/bash-tiles-bg"),
    (4, ".tfg", "image/bash-tiles-fg"),
    (5, ".tbn", "image/bash-tiles-fg"),
    (7, ".msp", "map/bash-sprites"),
    (64, ".spr", "image/bash-sprite"),
];

const TYPE_GENERIC: u16 = 32;
const TYPE_SOUND: u16 = 8;

/// Type code for a filename, judged by its extension, plus the name
/// to persist (synthetic extensions are stripped before writing).
fn native_name(name: &str) -> (u16, String) {
    if name.len() >= 4 {
        let ext = name[name.len() - 4..].to_ascii_lowercase();
        for (code, map_ext, _) in TYPE_MAP {
            if ext == *map_ext {
                return (*code, name[..name.len() - 4].to_string());
            }
        }
    }
    (TYPE_GENERIC, name.to_string())
}

pub struct DatBash;

impl Format for DatBash {
    fn code(&self) -> &'static str {
        "dat-bash"
    }

    fn name(&self) -> &'static str {
        "Monster Bash DAT File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dat"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Monster Bash"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        let len = content.len()?;
        content.seek(SeekFrom::Start(0))?;
        let mut pos = 0u64;
        while pos < len {
            if pos + EFAT_ENTRY_LEN > len {
                return Ok(Certainty::DefinitelyNo);
            }
            let _type_code = content.read_u16::<LittleEndian>()?;
            let size = content.read_u16::<LittleEndian>()? as u64;
            let mut name = [0u8; NAME_FIELD_LEN];
            content.read_exact(&mut name)?;
            for &b in name.iter() {
                if b == 0 {
                    break;
                }
                if b < 32 {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
            pos += EFAT_ENTRY_LEN + size;
            if pos > len {
                return Ok(Certainty::DefinitelyNo);
            }
            content.seek(SeekFrom::Start(pos))?;
        }
        // A walk that lands exactly on EOF is almost certainly a
        // Monster Bash container; there is no signature to check.
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        parse(SegmentedStream::open(content)?)
    }

    fn create(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        // An empty Monster Bash archive is an empty file.
        parse(SegmentedStream::open(content)?)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    let len_archive = content.len();
    let mut entries = Vec::new();
    let mut pos = 0u64;
    let mut index = 0u32;
    content.seek_to(0)?;

    while pos < len_archive {
        if pos + EFAT_ENTRY_LEN > len_archive {
            return Err(Error::Truncated("embedded FAT entry cut short".into()));
        }
        let mut e = FileEntry::new();
        e.index = index;
        e.offset = pos;
        e.header_len = EFAT_ENTRY_LEN;
        e.valid = true;

        let type_code = content.read_u16::<LittleEndian>()?;
        e.stored_size = content.read_u16::<LittleEndian>()? as u64;
        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        let expanded = content.read_u16::<LittleEndian>()? as u64;

        if expanded != 0 {
            e.attrs |= EntryAttrs::COMPRESSED;
            e.filter = Some("lzw-bash".to_string());
            e.real_size = expanded;
        } else {
            e.real_size = e.stored_size;
        }

        e.native_type = Some(type_code);
        match TYPE_MAP.iter().find(|(code, _, _)| *code == type_code) {
            Some((_, ext, mime)) => {
                e.name.push_str(ext);
                e.file_type = mime.to_string();
            }
            None => match type_code {
                TYPE_SOUND => e.file_type = "sound/bash".to_string(), // name already carries .snd
                TYPE_GENERIC => e.file_type = FILETYPE_GENERIC.to_string(),
                other => {
                    e.name.push_str(&format!(".{}", other));
                    e.file_type = format!("unknown/bash-{}", other);
                }
            },
        }

        pos += EFAT_ENTRY_LEN + e.stored_size;
        if pos > len_archive {
            return Err(Error::Truncated("file data runs past end of archive".into()));
        }
        content.seek_to(pos)?;
        entries.push(e);
        index += 1;
    }

    debug!(files = entries.len(), "opened Monster Bash archive");
    Ok(Archive::assemble(
        content,
        Box::new(BashHooks),
        ArchiveParts {
            entries,
            attributes: Vec::new(),
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: MAX_FILENAME_LEN,
            format_code: "dat-bash",
        },
    ))
}

fn check_u16_sizes(entry: &FileEntry) -> Result<()> {
    if entry.stored_size > MAX_FILE_SIZE || entry.real_size > MAX_FILE_SIZE {
        return Err(Error::FormatLimit(
            "files in this archive format are limited to 65535 bytes".into(),
        ));
    }
    Ok(())
}

struct BashHooks;

impl FatHooks for BashHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        let (type_code, persisted) = native_name(name);
        ctx.content.seek_to(entry.offset)?;
        ctx.content.write_u16::<LittleEndian>(type_code)?;
        ctx.content.seek_to(entry.offset + 4)?;
        write_fixed_name(ctx.content, &persisted, NAME_FIELD_LEN)
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        check_u16_sizes(entry)?;
        ctx.content.seek_to(entry.offset + 2)?;
        ctx.content
            .write_u16::<LittleEndian>(entry.stored_size as u16)?;
        ctx.content.seek_to(entry.offset + 35)?;
        let expanded = if entry.attrs.contains(EntryAttrs::COMPRESSED) {
            entry.real_size as u16
        } else {
            0
        };
        ctx.content.write_u16::<LittleEndian>(expanded)?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        check_u16_sizes(new_entry)?;
        new_entry.header_len = EFAT_ENTRY_LEN;
        new_entry.name = new_entry.name.to_ascii_uppercase();
        if new_entry.attrs.contains(EntryAttrs::COMPRESSED) {
            new_entry.filter = Some("lzw-bash".to_string());
        }

        ctx.content.seek_to(new_entry.offset)?;
        ctx.content.insert(EFAT_ENTRY_LEN)?;

        // The embedded header just grew the archive; everything at or
        // after this point slides along before the data follows.
        ctx.shift(self, None, new_entry.offset, EFAT_ENTRY_LEN as i64, 0)
    }

    fn post_insert(&mut self, ctx: &mut HookCtx, entry: &EntryHandle) -> Result<()> {
        let snap = entry.details();
        let (type_code, persisted) = native_name(&snap.name);
        entry.0.lock().native_type = Some(type_code);

        let expanded = if snap.attrs.contains(EntryAttrs::COMPRESSED) {
            snap.real_size as u16
        } else {
            0
        };
        ctx.content.seek_to(snap.offset)?;
        ctx.content.write_u16::<LittleEndian>(type_code)?;
        ctx.content
            .write_u16::<LittleEndian>(snap.stored_size as u16)?;
        write_fixed_name(ctx.content, &persisted, NAME_FIELD_LEN)?;
        ctx.content.write_u16::<LittleEndian>(expanded)?;
        Ok(())
    }
}
