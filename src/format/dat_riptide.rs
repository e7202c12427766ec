//! Dr. Riptide .DAT containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/DAT_Format_(Dr._Riptide)>
//!
//! A u16 file count followed by 25-byte FAT records: u32 size, u32
//! timestamp, u32 offset, 13-byte name. The u16 count caps the format
//! at 65535 files.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, FatHooks, HookCtx};
use crate::entry::{FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const FILECOUNT_OFFSET: u64 = 0;
const HEADER_LEN: u64 = 2;
const FAT_OFFSET: u64 = HEADER_LEN;
const NAME_FIELD_LEN: usize = 13;
const MAX_FILENAME_LEN: usize = 12;
const FAT_ENTRY_LEN: u64 = 25;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;
const MAX_FILES: usize = 65535;

fn fat_slot(entry: &FileEntry) -> u64 {
    FAT_OFFSET + entry.index as u64 * FAT_ENTRY_LEN
}

pub struct DatRiptide;

impl Format for DatRiptide {
    fn code(&self) -> &'static str {
        "dat-riptide"
    }

    fn name(&self) -> &'static str {
        "Dr. Riptide DAT Archive"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["dat"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["In Search of Dr. Riptide"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        let len = content.len()?;
        if len < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let num_files = content.read_u16::<LittleEndian>()? as u64;

        // A zero-file archive is exactly the two-byte count.
        if num_files == 0 {
            return Ok(if len == 2 {
                Certainty::DefinitelyYes
            } else {
                Certainty::DefinitelyNo
            });
        }

        let len_fat = num_files * FAT_ENTRY_LEN;
        if len < HEADER_LEN + len_fat {
            return Ok(Certainty::DefinitelyNo);
        }

        for _ in 0..num_files {
            let size = content.read_u32::<LittleEndian>()? as u64;
            let _time = content.read_u32::<LittleEndian>()?;
            let offset = content.read_u32::<LittleEndian>()? as u64;
            let mut name = [0u8; NAME_FIELD_LEN];
            content.read_exact(&mut name)?;

            if offset + size > len {
                return Ok(Certainty::DefinitelyNo);
            }
            if offset != 0 && offset < HEADER_LEN + len_fat {
                return Ok(Certainty::DefinitelyNo);
            }
            if !name.contains(&0) {
                return Ok(Certainty::DefinitelyNo);
            }
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        parse(SegmentedStream::open(content)?)
    }

    fn create(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        let mut stream = SegmentedStream::open(content)?;
        stream.seek_to(0)?;
        stream.insert(HEADER_LEN)?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    if content.len() < HEADER_LEN {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(FILECOUNT_OFFSET)?;
    let num_files = content.read_u16::<LittleEndian>()?;

    let mut entries = Vec::with_capacity(num_files as usize);
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i as u32;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;
        e.stored_size = content.read_u32::<LittleEndian>()? as u64;
        let _last_modified = content.read_u32::<LittleEndian>()?;
        e.offset = content.read_u32::<LittleEndian>()? as u64;
        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        e.real_size = e.stored_size;
        entries.push(e);
    }

    debug!(files = entries.len(), "opened Riptide archive");
    Ok(Archive::assemble(
        content,
        Box::new(RiptideHooks),
        ArchiveParts {
            entries,
            attributes: Vec::new(),
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: MAX_FILENAME_LEN,
            format_code: "dat-riptide",
        },
    ))
}

struct RiptideHooks;

impl RiptideHooks {
    fn write_count(&self, ctx: &mut HookCtx, count: u16) -> Result<()> {
        ctx.content.seek_to(FILECOUNT_OFFSET)?;
        ctx.content.write_u16::<LittleEndian>(count)?;
        Ok(())
    }
}

impl FatHooks for RiptideHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 12)?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_offset(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 8)?;
        ctx.content.write_u32::<LittleEndian>(entry.offset as u32)?;
        Ok(())
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry))?;
        ctx.content
            .write_u32::<LittleEndian>(entry.stored_size as u32)?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        if ctx.entries.len() >= MAX_FILES {
            return Err(Error::FormatLimit(
                "maximum number of files in this archive has been reached".into(),
            ));
        }
        new_entry.header_len = 0;
        new_entry.name = new_entry.name.to_ascii_uppercase();

        ctx.content.seek_to(fat_slot(new_entry))?;
        ctx.content.insert(FAT_ENTRY_LEN)?;

        let count = ctx.entries.len() as u64;
        ctx.shift(
            self,
            None,
            FAT_OFFSET + count * FAT_ENTRY_LEN,
            FAT_ENTRY_LEN as i64,
            0,
        )?;
        new_entry.offset += FAT_ENTRY_LEN;

        // The shift pass above rewrote offsets over the freshly
        // spliced record, so the new entry's fields go in last.
        ctx.content.seek_to(fat_slot(new_entry))?;
        ctx.content
            .write_u32::<LittleEndian>(new_entry.stored_size as u32)?;
        ctx.content.write_u32::<LittleEndian>(0)?; // last-modified time
        ctx.content
            .write_u32::<LittleEndian>(new_entry.offset as u32)?;
        write_fixed_name(ctx.content, &new_entry.name, NAME_FIELD_LEN)?;

        self.write_count(ctx, count as u16 + 1)
    }

    fn pre_remove(&mut self, ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        let count = ctx.entries.len() as u64;
        ctx.shift(
            self,
            None,
            FAT_OFFSET + count * FAT_ENTRY_LEN,
            -(FAT_ENTRY_LEN as i64),
            0,
        )?;
        ctx.content.seek_to(fat_slot(entry))?;
        ctx.content.remove(FAT_ENTRY_LEN)?;
        self.write_count(ctx, count as u16 - 1)
    }
}
