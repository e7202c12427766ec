//! Duke Nukem 3D .GRP containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/GRP_Format>
//!
//! Ken Silverman's group format: a 12-byte signature, a u32 file
//! count, then 16-byte FAT records of 12-byte name plus u32 size. No
//! stored offsets; each file's position is the running total of the
//! sizes before it.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, FatHooks, HookCtx};
use crate::entry::{FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const SIGNATURE: &[u8; 12] = b"KenSilverman";
const FILECOUNT_OFFSET: u64 = 12;
const HEADER_LEN: u64 = 16;
const FAT_OFFSET: u64 = HEADER_LEN;
const NAME_FIELD_LEN: usize = 12;
const FAT_ENTRY_LEN: u64 = 16;
const FIRST_FILE_OFFSET: u64 = FAT_OFFSET;
const SAFETY_MAX_FILECOUNT: u32 = 8192;

fn fat_slot(entry: &FileEntry) -> u64 {
    FAT_OFFSET + entry.index as u64 * FAT_ENTRY_LEN
}

pub struct GrpDuke3d;

impl Format for GrpDuke3d {
    fn code(&self) -> &'static str {
        "grp-duke3d"
    }

    fn name(&self) -> &'static str {
        "Duke Nukem 3D Group File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["grp"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Duke Nukem 3D", "Redneck Rampage", "Shadow Warrior"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        if content.len()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let mut sig = [0u8; 12];
        content.read_exact(&mut sig)?;
        if &sig == SIGNATURE {
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
        stream.write_at(0, b"KenSilverman\x00\x00\x00\x00")?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    if content.len() < HEADER_LEN {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(0)?;
    let mut sig = [0u8; 12];
    std::io::Read::read_exact(&mut content, &mut sig)?;
    if &sig != SIGNATURE {
        return Err(Error::BadSignature);
    }
    let num_files = content.read_u32::<LittleEndian>()?;
    if num_files >= SAFETY_MAX_FILECOUNT {
        return Err(Error::CorruptFat(
            "too many files or corrupted archive".into(),
        ));
    }

    let mut entries = Vec::with_capacity(num_files as usize);
    let mut off_next = HEADER_LEN + num_files as u64 * FAT_ENTRY_LEN;
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i;
        e.offset = off_next;
        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        e.stored_size = content.read_u32::<LittleEndian>()? as u64;
        e.real_size = e.stored_size;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;
        off_next += e.stored_size;
        entries.push(e);
    }

    debug!(files = entries.len(), "opened GRP archive");
    Ok(Archive::assemble(
        content,
        Box::new(GrpHooks),
        ArchiveParts {
            entries,
            attributes: Vec::new(),
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: NAME_FIELD_LEN,
            format_code: "grp-duke3d",
        },
    ))
}

struct GrpHooks;

impl GrpHooks {
    fn write_count(&self, ctx: &mut HookCtx, count: u32) -> Result<()> {
        ctx.content.seek_to(FILECOUNT_OFFSET)?;
        ctx.content.write_u32::<LittleEndian>(count)?;
        Ok(())
    }
}

impl FatHooks for GrpHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry))?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(fat_slot(entry) + NAME_FIELD_LEN as u64)?;
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBacking;

    #[test]
    fn test_certainty() {
        let mut good =
            MemoryBacking::from_vec(b"KenSilverman\x00\x00\x00\x00".to_vec());
        assert_eq!(
            GrpDuke3d.certainty(&mut good).unwrap(),
            Certainty::DefinitelyYes
        );
        let mut bad = MemoryBacking::from_vec(b"KenSilberman\x00\x00\x00\x00".to_vec());
        assert_eq!(
            GrpDuke3d.certainty(&mut bad).unwrap(),
            Certainty::DefinitelyNo
        );
    }

    #[test]
    fn test_create_empty() {
        let arc = GrpDuke3d
            .create(Box::new(MemoryBacking::new()), &mut SuppData::default())
            .unwrap();
        assert_eq!(arc.files().len(), 0);
        assert_eq!(arc.size(), HEADER_LEN);
    }
}
