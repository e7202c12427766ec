//! East Point Software .EPF containers (The Lion King and others)
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/EPF_Format>
//!
//! `EPFS` signature and a u32 FAT offset, file data directly after,
//! then a free-form description blob, then the FAT at the end of the
//! archive: 22-byte records of 13-byte name, compression flag, stored
//! size and decompressed size. The file count is the FAT span divided
//! by the record length. The description blob between the last file
//! and the FAT is exposed as a text attribute and resized during
//! flush; the per-entry compression flag selects the `lzw-epfs`
//! filter.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, EntryHandle, FatHooks, HookCtx};
use crate::attribute::{AttrValue, Attribute};
use crate::entry::{EntryAttrs, FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::Backing;
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::debug;

const HEADER_LEN: u64 = 8;
const FAT_OFFSET_POS: u64 = 4;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;
const NAME_FIELD_LEN: usize = 13;
const MAX_FILENAME_LEN: usize = 12;
const FAT_ENTRY_LEN: u64 = 22;

const FLAG_COMPRESSED: u8 = 1;

pub struct EpfLionKing;

impl Format for EpfLionKing {
    fn code(&self) -> &'static str {
        "epf-lionking"
    }

    fn name(&self) -> &'static str {
        "East Point Software EPFS File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["epf"]
    }

    fn games(&self) -> &'static [&'static str] {
        &[
            "Alien Breed Tower Assault",
            "Arcade Pool",
            "Asterix & Obelix",
            "Jungle Book, The",
            "Lion King, The",
            "Overdrive",
            "Project X",
            "Sensible Golf",
            "Smurfs, The",
            "Spirou",
            "Tin Tin in Tibet",
            "Universe",
        ]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        if content.len()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let mut sig = [0u8; 4];
        content.read_exact(&mut sig)?;
        if &sig == b"EPFS" {
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
        stream.write_at(0, b"EPFS")?;
        stream.seek_to(FAT_OFFSET_POS)?;
        stream.write_u32::<LittleEndian>(HEADER_LEN as u32)?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    let len_archive = content.len();
    if len_archive < HEADER_LEN {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(0)?;
    let mut sig = [0u8; 4];
    std::io::Read::read_exact(&mut content, &mut sig)?;
    if &sig != b"EPFS" {
        return Err(Error::BadSignature);
    }
    let off_fat = content.read_u32::<LittleEndian>()? as u64;
    if off_fat < HEADER_LEN || off_fat > len_archive {
        return Err(Error::CorruptFat(
            "header corrupted or file truncated".into(),
        ));
    }
    let len_fat = len_archive - off_fat;
    if len_fat % FAT_ENTRY_LEN != 0 {
        return Err(Error::CorruptFat("FAT length is not a whole table".into()));
    }
    let num_files = len_fat / FAT_ENTRY_LEN;

    content.seek_to(off_fat)?;
    let mut entries = Vec::with_capacity(num_files as usize);
    let mut off_next = FIRST_FILE_OFFSET;
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i as u32;
        e.offset = off_next;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;

        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        let flags = content.read_u8()?;
        e.stored_size = content.read_u32::<LittleEndian>()? as u64;
        e.real_size = content.read_u32::<LittleEndian>()? as u64;

        if flags & FLAG_COMPRESSED != 0 {
            e.attrs |= EntryAttrs::COMPRESSED;
            e.filter = Some("lzw-epfs".to_string());
        }
        off_next += e.stored_size;
        entries.push(e);
    }
    if off_next > off_fat {
        return Err(Error::CorruptFat("file data overlaps FAT".into()));
    }

    // Whatever sits between the last file and the FAT is the archive
    // description.
    let off_desc = off_next;
    let len_desc = off_fat - off_desc;
    let mut desc = vec![0u8; len_desc as usize];
    content.read_at(off_desc, &mut desc)?;
    let attr_desc = Attribute::text(
        "Description",
        "Description",
        String::from_utf8_lossy(&desc).into_owned(),
        0,
    );

    debug!(files = entries.len(), off_fat, "opened EPF archive");
    Ok(Archive::assemble(
        content,
        Box::new(EpfHooks { off_fat }),
        ArchiveParts {
            entries,
            attributes: vec![attr_desc],
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: MAX_FILENAME_LEN,
            format_code: "epf-lionking",
        },
    ))
}

struct EpfHooks {
    off_fat: u64,
}

impl EpfHooks {
    fn fat_slot(&self, entry: &FileEntry) -> u64 {
        self.off_fat + entry.index as u64 * FAT_ENTRY_LEN
    }

    fn write_fat_offset(&self, ctx: &mut HookCtx) -> Result<()> {
        ctx.content.seek_to(FAT_OFFSET_POS)?;
        ctx.content.write_u32::<LittleEndian>(self.off_fat as u32)?;
        Ok(())
    }

    /// First byte past the last file's data: where the description
    /// region starts.
    fn desc_offset(ctx: &HookCtx) -> u64 {
        match ctx.entries.last() {
            Some(last) => last.details().end(),
            None => FIRST_FILE_OFFSET,
        }
    }
}

impl FatHooks for EpfHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(self.fat_slot(entry))?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, delta: i64) -> Result<()> {
        ctx.content.seek_to(self.fat_slot(entry) + 14)?;
        ctx.content
            .write_u32::<LittleEndian>(entry.stored_size as u32)?;
        ctx.content
            .write_u32::<LittleEndian>(entry.real_size as u32)?;

        // The FAT itself moves by however much the data changed.
        self.off_fat = (self.off_fat as i64 + delta) as u64;
        self.write_fat_offset(ctx)
    }

    fn pre_insert(
        &mut self,
        _ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = 0;
        if new_entry.attrs.contains(EntryAttrs::COMPRESSED) {
            new_entry.filter = Some("lzw-epfs".to_string());
        }
        Ok(())
    }

    fn post_insert(&mut self, ctx: &mut HookCtx, entry: &EntryHandle) -> Result<()> {
        let snap = entry.details();
        self.off_fat += snap.stored_size;

        ctx.content
            .seek_to(self.off_fat + snap.index as u64 * FAT_ENTRY_LEN)?;
        ctx.content.insert(FAT_ENTRY_LEN)?;
        let name = snap.name.to_ascii_uppercase();
        entry.0.lock().name = name.clone();
        let flags = if snap.attrs.contains(EntryAttrs::COMPRESSED) {
            FLAG_COMPRESSED
        } else {
            0
        };
        write_fixed_name(ctx.content, &name, NAME_FIELD_LEN)?;
        std::io::Write::write_all(ctx.content, &[flags])?;
        ctx.content
            .write_u32::<LittleEndian>(snap.stored_size as u32)?;
        ctx.content
            .write_u32::<LittleEndian>(snap.real_size as u32)?;

        self.write_fat_offset(ctx)
    }

    fn pre_remove(&mut self, ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        ctx.content.seek_to(self.fat_slot(entry))?;
        ctx.content.remove(FAT_ENTRY_LEN)?;

        self.off_fat -= entry.stored_size;
        self.write_fat_offset(ctx)
    }

    fn flush(&mut self, ctx: &mut HookCtx) -> Result<()> {
        if !ctx.attributes[0].changed {
            return Ok(());
        }
        let AttrValue::Text(desc) = ctx.attributes[0].value.clone() else {
            return Err(Error::NotSupported("description must be text".into()));
        };
        let off_desc = Self::desc_offset(ctx);
        let len_desc = self.off_fat - off_desc;
        let delta = desc.len() as i64 - len_desc as i64;

        ctx.content.seek_to(off_desc)?;
        if delta < 0 {
            ctx.content.remove((-delta) as u64)?;
        } else if delta > 0 {
            ctx.content.insert(delta as u64)?;
        }
        ctx.content.write_at(off_desc, desc.as_bytes())?;

        self.off_fat = (self.off_fat as i64 + delta) as u64;
        self.write_fat_offset(ctx)?;
        ctx.attributes[0].changed = false;
        debug!(off_fat = self.off_fat, "rewrote EPF description");
        Ok(())
    }
}
