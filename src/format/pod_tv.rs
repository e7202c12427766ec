//! Terminal Velocity .POD containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/POD_Format>
//!
//! u32 file count, an 80-byte description field, then 40-byte FAT
//! records of 32-byte name, u32 size and u32 offset. The description
//! is exposed as a text attribute and written straight into its
//! fixed-width field.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, AttrWrite, FatHooks, HookCtx};
use crate::attribute::{AttrValue, Attribute};
use crate::entry::{FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const DESCRIPTION_OFFSET: u64 = 4;
const DESCRIPTION_LEN: usize = 80;
const FAT_OFFSET: u64 = 84;
const FAT_ENTRY_LEN: u64 = 40;
const NAME_FIELD_LEN: usize = 32;
const FIRST_FILE_OFFSET: u64 = FAT_OFFSET;

fn fat_slot(entry: &FileEntry) -> u64 {
    FAT_OFFSET + entry.index as u64 * FAT_ENTRY_LEN
}

pub struct PodTv;

impl Format for PodTv {
    fn code(&self) -> &'static str {
        "pod-tv"
    }

    fn name(&self) -> &'static str {
        "Terminal Velocity POD File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["pod"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Terminal Velocity"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        let len = content.len()?;
        if len < FAT_OFFSET {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let num_files = content.read_u32::<LittleEndian>()? as u64;

        let mut desc = [0u8; DESCRIPTION_LEN];
        content.read_exact(&mut desc)?;
        for &b in &desc {
            if b != 0 && b < 32 {
                return Ok(Certainty::DefinitelyNo);
            }
        }

        if FAT_OFFSET + num_files * FAT_ENTRY_LEN > len {
            return Ok(Certainty::DefinitelyNo);
        }
        for _ in 0..num_files {
            let mut name = [0u8; NAME_FIELD_LEN];
            content.read_exact(&mut name)?;
            for &b in &name {
                if b == 0 {
                    break;
                }
                if b < 32 {
                    return Ok(Certainty::DefinitelyNo);
                }
            }
            let size = content.read_u32::<LittleEndian>()? as u64;
            let offset = content.read_u32::<LittleEndian>()? as u64;
            if offset + size > len {
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
        stream.insert(FAT_OFFSET)?;
        stream.seek_to(DESCRIPTION_OFFSET)?;
        write_fixed_name(&mut stream, "Empty POD file", DESCRIPTION_LEN)?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    if content.len() < FAT_OFFSET {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(0)?;
    let num_files = content.read_u32::<LittleEndian>()?;
    let description = read_fixed_name(&mut content, DESCRIPTION_LEN)?;

    if FAT_OFFSET + num_files as u64 * FAT_ENTRY_LEN > content.len() {
        return Err(Error::Truncated("FAT runs past end of archive".into()));
    }

    let mut entries = Vec::with_capacity(num_files as usize);
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;
        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        e.stored_size = content.read_u32::<LittleEndian>()? as u64;
        e.offset = content.read_u32::<LittleEndian>()? as u64;
        e.real_size = e.stored_size;
        entries.push(e);
    }

    let attr_desc = Attribute::text("Description", "Description", description, DESCRIPTION_LEN);

    debug!(files = entries.len(), "opened POD archive");
    Ok(Archive::assemble(
        content,
        Box::new(PodHooks),
        ArchiveParts {
            entries,
            attributes: vec![attr_desc],
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: NAME_FIELD_LEN,
            format_code: "pod-tv",
        },
    ))
}

struct PodHooks;

impl PodHooks {
    fn write_count(&self, ctx: &mut HookCtx, count: u32) -> Result<()> {
        ctx.content.seek_to(0)?;
        ctx.content.write_u32::<LittleEndian>(count)?;
        Ok(())
    }
}

impl FatHooks for PodHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry))?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_offset(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 36)?;
        ctx.content.write_u32::<LittleEndian>(entry.offset as u32)?;
        Ok(())
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 32)?;
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
        new_entry.header_len = 0;
        new_entry.offset += FAT_ENTRY_LEN;
        new_entry.name = new_entry.name.to_ascii_uppercase();

        ctx.content.seek_to(fat_slot(new_entry))?;
        ctx.content.insert(FAT_ENTRY_LEN)?;
        write_fixed_name(ctx.content, &new_entry.name, NAME_FIELD_LEN)?;
        ctx.content
            .write_u32::<LittleEndian>(new_entry.stored_size as u32)?;
        ctx.content
            .write_u32::<LittleEndian>(new_entry.offset as u32)?;

        let count = ctx.entries.len() as u64;
        ctx.shift(
            self,
            None,
            FAT_OFFSET + count * FAT_ENTRY_LEN,
            FAT_ENTRY_LEN as i64,
            0,
        )?;
        self.write_count(ctx, count as u32 + 1)
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
        self.write_count(ctx, count as u32 - 1)
    }

    fn attribute(&mut self, ctx: &mut HookCtx, index: usize, value: &AttrValue) -> Result<AttrWrite> {
        debug_assert_eq!(index, 0);
        let AttrValue::Text(desc) = value else {
            return Err(Error::NotSupported("description must be text".into()));
        };
        // The field is fixed-width; shorter text is NUL-padded in
        // place.
        ctx.content.seek_to(DESCRIPTION_OFFSET)?;
        write_fixed_name(ctx.content, desc, DESCRIPTION_LEN)?;
        Ok(AttrWrite::Applied)
    }
}
