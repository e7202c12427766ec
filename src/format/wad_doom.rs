//! Doom .WAD containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/WAD_Format>
//!
//! Twelve-byte header (`IWAD`/`PWAD`, lump count, FAT offset), then a
//! FAT of 16-byte records: u32 offset, u32 size, 8-byte name. The
//! engine keeps the FAT directly after the header with lump data
//! following, and rewrites the lump count on every mutation. The
//! IWAD/PWAD distinction is exposed as an enum attribute and written
//! during flush.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, FatHooks, HookCtx};
use crate::attribute::Attribute;
use crate::entry::{FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const HEADER_LEN: u64 = 12;
const FILECOUNT_OFFSET: u64 = 4;
const FAT_OFFSET: u64 = HEADER_LEN;
const FAT_ENTRY_LEN: u64 = 16;
const NAME_FIELD_LEN: usize = 8;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;
const SAFETY_MAX_FILECOUNT: u32 = 8192;

fn fat_slot(entry: &FileEntry) -> u64 {
    FAT_OFFSET + entry.index as u64 * FAT_ENTRY_LEN
}

pub struct WadDoom;

impl Format for WadDoom {
    fn code(&self) -> &'static str {
        "wad-doom"
    }

    fn name(&self) -> &'static str {
        "Doom WAD File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["wad", "rts"]
    }

    fn games(&self) -> &'static [&'static str] {
        &[
            "Doom",
            "Duke Nukem 3D",
            "Heretic",
            "Hexen",
            "Redneck Rampage",
            "Rise of the Triad",
            "Shadow Warrior",
        ]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        if content.len()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let mut sig = [0u8; 4];
        content.read_exact(&mut sig)?;
        if &sig == b"IWAD" || &sig == b"PWAD" {
            return Ok(Certainty::DefinitelyYes);
        }
        Ok(Certainty::DefinitelyNo)
    }

    fn open(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        parse(SegmentedStream::open(content)?)
    }

    fn create(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        let mut stream = SegmentedStream::open(content)?;
        stream.seek_to(0)?;
        stream.insert(HEADER_LEN)?;
        stream.write_at(0, b"IWAD\x00\x00\x00\x00\x0c\x00\x00\x00")?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    if content.len() < HEADER_LEN {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(0)?;
    let mut sig = [0u8; 4];
    std::io::Read::read_exact(&mut content, &mut sig)?;
    if &sig != b"IWAD" && &sig != b"PWAD" {
        return Err(Error::BadSignature);
    }
    let num_files = content.read_u32::<LittleEndian>()?;
    let off_fat = content.read_u32::<LittleEndian>()? as u64;

    if num_files >= SAFETY_MAX_FILECOUNT {
        return Err(Error::CorruptFat(
            "too many files or corrupted archive".into(),
        ));
    }
    if off_fat + num_files as u64 * FAT_ENTRY_LEN > content.len() {
        return Err(Error::Truncated("FAT runs past end of archive".into()));
    }

    content.seek_to(off_fat)?;
    let mut entries = Vec::with_capacity(num_files as usize);
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i;
        e.offset = content.read_u32::<LittleEndian>()? as u64;
        e.stored_size = content.read_u32::<LittleEndian>()? as u64;
        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        e.real_size = e.stored_size;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;
        entries.push(e);
    }

    let attr_type = Attribute::enumeration(
        "Type",
        "IWAD archives hold a complete game; PWAD archives hold a mod \
         that overrides files of the IWAD it is loaded over.",
        &["IWAD", "PWAD"],
        if sig[0] == b'I' { 0 } else { 1 },
    );

    debug!(files = entries.len(), "opened WAD archive");
    Ok(Archive::assemble(
        content,
        Box::new(WadHooks),
        ArchiveParts {
            entries,
            attributes: vec![attr_type],
            off_first_file: FIRST_FILE_OFFSET,
            // DOS-style names; the on-disk field keeps the first 8
            // bytes.
            len_max_filename: 12,
            format_code: "wad-doom",
        },
    ))
}

struct WadHooks;

impl WadHooks {
    fn write_count(&self, ctx: &mut HookCtx, count: u32) -> Result<()> {
        ctx.content.seek_to(FILECOUNT_OFFSET)?;
        ctx.content.write_u32::<LittleEndian>(count)?;
        Ok(())
    }
}

impl FatHooks for WadHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 8)?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_offset(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry))?;
        ctx.content.write_u32::<LittleEndian>(entry.offset as u32)?;
        Ok(())
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + 4)?;
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
        // The FAT grows by one record ahead of the data, so the new
        // entry lands one slot further along than computed.
        new_entry.offset += FAT_ENTRY_LEN;
        new_entry.name = new_entry.name.to_ascii_uppercase();

        ctx.content.seek_to(fat_slot(new_entry))?;
        ctx.content.insert(FAT_ENTRY_LEN)?;
        ctx.content
            .write_u32::<LittleEndian>(new_entry.offset as u32)?;
        ctx.content
            .write_u32::<LittleEndian>(new_entry.stored_size as u32)?;
        write_fixed_name(ctx.content, &new_entry.name, NAME_FIELD_LEN)?;

        let count = ctx.entries.len() as u64;
        ctx.shift(self, None, FAT_OFFSET + count * FAT_ENTRY_LEN, FAT_ENTRY_LEN as i64, 0)?;
        self.write_count(ctx, count as u32 + 1)
    }

    fn pre_remove(&mut self, ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        // Shift first: the pass writes updated offsets into the FAT,
        // including the record about to be cut.
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

    fn flush(&mut self, ctx: &mut HookCtx) -> Result<()> {
        if ctx.attributes[0].changed {
            let v = match &ctx.attributes[0].value {
                crate::attribute::AttrValue::Enum(0) => b'I',
                crate::attribute::AttrValue::Enum(1) => b'P',
                _ => {
                    return Err(Error::NotSupported("unknown WAD type".into()));
                }
            };
            ctx.content.seek_to(0)?;
            std::io::Write::write_all(ctx.content, &[v])?;
            ctx.attributes[0].changed = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBacking;

    #[test]
    fn test_certainty() {
        let mut iwad = MemoryBacking::from_vec(b"IWAD\x00\x00\x00\x00\x0c\x00\x00\x00".to_vec());
        assert_eq!(
            WadDoom.certainty(&mut iwad).unwrap(),
            Certainty::DefinitelyYes
        );
        let mut pwad = MemoryBacking::from_vec(b"PWAD\x00\x00\x00\x00\x0c\x00\x00\x00".to_vec());
        assert_eq!(
            WadDoom.certainty(&mut pwad).unwrap(),
            Certainty::DefinitelyYes
        );
        let mut other = MemoryBacking::from_vec(b"DWAD\x00\x00\x00\x00\x0c\x00\x00\x00".to_vec());
        assert_eq!(
            WadDoom.certainty(&mut other).unwrap(),
            Certainty::DefinitelyNo
        );
        let mut short = MemoryBacking::from_vec(b"IWAD".to_vec());
        assert_eq!(
            WadDoom.certainty(&mut short).unwrap(),
            Certainty::DefinitelyNo
        );
    }

    #[test]
    fn test_create_empty() {
        let arc = WadDoom
            .create(Box::new(MemoryBacking::new()), &mut SuppData::default())
            .unwrap();
        assert_eq!(arc.files().len(), 0);
        assert_eq!(arc.size(), HEADER_LEN);
    }
}
