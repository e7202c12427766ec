//! Monolith .RFF containers (Blood)
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/RFF_Format>
//!
//! 32-byte header, FAT at the end of the archive. Version 0x301
//! obfuscates the FAT with the rolling XOR keyed by the low byte of
//! the FAT offset, so the strategy keeps a private decrypted copy of
//! the whole table in its own segmented stream and only re-encrypts it
//! back into the container during flush. Filenames are stored as a
//! 3-byte extension followed by an 8-byte base, both NUL-padded; the
//! per-entry encryption flag selects the `xor-blood` filter for file
//! data.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, AttrWrite, EntryHandle, FatHooks, HookCtx};
use crate::attribute::{AttrValue, Attribute};
use crate::entry::{EntryAttrs, FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::filter::xor_blood_apply;
use crate::io::{Backing, MemoryBacking};
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{SeekFrom, Write};
use tracing::debug;

const HEADER_LEN: u64 = 32;
const FATOFFSET_OFFSET: u64 = 8;
const FILECOUNT_OFFSET: u64 = 12;
const FIRST_FILE_OFFSET: u64 = HEADER_LEN;
const FAT_ENTRY_LEN: u64 = 48;
const SAFETY_MAX_FILECOUNT: u32 = 8192;

const FLAG_ENCRYPTED: u8 = 0x10;

const VERSION_PLAIN: u16 = 0x200;
const VERSION_CRYPT: u16 = 0x301;

fn fat_slot(entry: &FileEntry) -> u64 {
    entry.index as u64 * FAT_ENTRY_LEN
}

/// Validate an 8.3 name and split it into base and extension.
fn split_filename(full: &str) -> Result<(String, String)> {
    let bad = || Error::InvalidName("maximum filename length is 8.3 chars".into());
    match full.rfind('.') {
        None => {
            if full.len() > 8 {
                return Err(bad());
            }
            Ok((full.to_string(), String::new()))
        }
        Some(dot) => {
            if full.len() - dot > 4 || dot > 8 {
                return Err(bad());
            }
            Ok((full[..dot].to_string(), full[dot + 1..].to_string()))
        }
    }
}

pub struct RffBlood;

impl Format for RffBlood {
    fn code(&self) -> &'static str {
        "rff-blood"
    }

    fn name(&self) -> &'static str {
        "Monolith Resource File Format"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["rff"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Blood"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        if content.len()? < HEADER_LEN {
            return Ok(Certainty::DefinitelyNo);
        }
        content.seek(SeekFrom::Start(0))?;
        let mut sig = [0u8; 4];
        content.read_exact(&mut sig)?;
        if &sig == b"RFF\x1a" {
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
        stream.write_at(0, b"RFF\x1a")?;
        stream.seek_to(4)?;
        stream.write_u32::<LittleEndian>(VERSION_PLAIN as u32)?;
        stream.write_u32::<LittleEndian>(HEADER_LEN as u32)?;
        stream.write_u32::<LittleEndian>(0)?;
        parse(stream)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    if content.len() < 16 {
        return Err(Error::Truncated("file too short".into()));
    }
    content.seek_to(0)?;
    let mut sig = [0u8; 4];
    std::io::Read::read_exact(&mut content, &mut sig)?;
    if &sig != b"RFF\x1a" {
        return Err(Error::BadSignature);
    }
    let version = content.read_u16::<LittleEndian>()?;
    let _unknown1 = content.read_u16::<LittleEndian>()?;
    let off_fat = content.read_u32::<LittleEndian>()? as u64;
    let num_files = content.read_u32::<LittleEndian>()?;

    if num_files >= SAFETY_MAX_FILECOUNT {
        return Err(Error::CorruptFat(
            "too many files or corrupted archive".into(),
        ));
    }
    let len_fat = num_files as u64 * FAT_ENTRY_LEN;
    if off_fat + len_fat > content.len() {
        return Err(Error::Truncated("FAT runs past end of archive".into()));
    }

    // Pull the whole FAT into a private stream, decrypted when the
    // version obfuscates it.
    let mut fat_bytes = vec![0u8; len_fat as usize];
    content.read_at(off_fat, &mut fat_bytes)?;
    if version >= VERSION_CRYPT {
        xor_blood_apply(&mut fat_bytes, (off_fat & 0xff) as u8);
    }
    let mut fat = SegmentedStream::open(Box::new(MemoryBacking::from_vec(fat_bytes)))?;

    let mut entries = Vec::with_capacity(num_files as usize);
    fat.seek_to(0)?;
    for i in 0..num_files {
        let mut e = FileEntry::new();
        e.index = i;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;

        let mut unknown = [0u8; 16];
        std::io::Read::read_exact(&mut fat, &mut unknown)?;
        e.offset = fat.read_u32::<LittleEndian>()? as u64;
        e.stored_size = fat.read_u32::<LittleEndian>()? as u64;
        let _unknown2 = fat.read_u32::<LittleEndian>()?;
        let _last_modified = fat.read_u32::<LittleEndian>()?;
        let flags = fat.read_u8()?;
        let ext = read_fixed_name(&mut fat, 3)?;
        let base = read_fixed_name(&mut fat, 8)?;
        let _unknown3 = fat.read_u32::<LittleEndian>()?;

        if flags & FLAG_ENCRYPTED != 0 {
            e.attrs |= EntryAttrs::ENCRYPTED;
            e.filter = Some("xor-blood".to_string());
        }
        e.name = format!("{}.{}", base, ext);
        e.real_size = e.stored_size;
        entries.push(e);
    }

    let attr_version = Attribute::enumeration(
        "Version",
        "File version",
        &["v2.0 - no encryption", "v3.1 - selectable encryption"],
        match version {
            VERSION_PLAIN => 0,
            VERSION_CRYPT => 1,
            _ => {
                return Err(Error::CorruptFat(format!(
                    "unknown RFF version 0x{:x}",
                    version
                )));
            }
        },
    );

    debug!(files = entries.len(), version, "opened RFF archive");
    Ok(Archive::assemble(
        content,
        Box::new(RffHooks {
            version,
            fat,
            modified_fat: false,
        }),
        ArchiveParts {
            entries,
            attributes: vec![attr_version],
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: 12,
            format_code: "rff-blood",
        },
    ))
}

struct RffHooks {
    version: u16,
    /// Plaintext copy of the FAT; re-encrypted into the container on
    /// flush.
    fat: SegmentedStream,
    modified_fat: bool,
}

impl RffHooks {
    fn write_count(&self, ctx: &mut HookCtx, count: u32) -> Result<()> {
        ctx.content.seek_to(FILECOUNT_OFFSET)?;
        ctx.content.write_u32::<LittleEndian>(count)?;
        Ok(())
    }
}

impl FatHooks for RffHooks {
    fn update_name(&mut self, _ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        let (base, ext) = split_filename(name)?;
        self.fat.seek_to(fat_slot(entry) + 33)?;
        write_fixed_name(&mut self.fat, &ext, 3)?;
        write_fixed_name(&mut self.fat, &base, 8)?;
        self.modified_fat = true;
        Ok(())
    }

    fn update_offset(&mut self, _ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        self.fat.seek_to(fat_slot(entry) + 16)?;
        self.fat.write_u32::<LittleEndian>(entry.offset as u32)?;
        self.modified_fat = true;
        Ok(())
    }

    fn update_size(&mut self, _ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        self.fat.seek_to(fat_slot(entry) + 20)?;
        self.fat
            .write_u32::<LittleEndian>(entry.stored_size as u32)?;
        self.modified_fat = true;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        _ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        let mut flags = 0u8;
        new_entry.header_len = 0;
        if new_entry.attrs.contains(EntryAttrs::ENCRYPTED) {
            if self.version >= VERSION_CRYPT {
                new_entry.filter = Some("xor-blood".to_string());
                flags |= FLAG_ENCRYPTED;
            } else {
                // this version has no encryption; drop the request
                new_entry.attrs.remove(EntryAttrs::ENCRYPTED);
            }
        }

        new_entry.name = new_entry.name.to_ascii_uppercase();
        let (base, ext) = split_filename(&new_entry.name)?;

        self.fat.seek_to(fat_slot(new_entry))?;
        self.fat.insert(FAT_ENTRY_LEN)?;
        self.fat.write_all(&[0u8; 16])?;
        self.fat
            .write_u32::<LittleEndian>(new_entry.offset as u32)?;
        self.fat
            .write_u32::<LittleEndian>(new_entry.stored_size as u32)?;
        self.fat.write_u32::<LittleEndian>(0)?;
        self.fat.write_u32::<LittleEndian>(0)?; // last-modified time
        self.fat.write_all(&[flags])?;
        write_fixed_name(&mut self.fat, &ext, 3)?;
        write_fixed_name(&mut self.fat, &base, 8)?;
        self.fat.write_u32::<LittleEndian>(0)?;

        self.modified_fat = true;
        Ok(())
    }

    fn post_insert(&mut self, ctx: &mut HookCtx, _entry: &EntryHandle) -> Result<()> {
        let count = ctx.entries.len() as u32;
        self.write_count(ctx, count)
    }

    fn pre_remove(&mut self, _ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        self.fat.seek_to(fat_slot(entry))?;
        self.fat.remove(FAT_ENTRY_LEN)?;
        self.modified_fat = true;
        Ok(())
    }

    fn post_remove(&mut self, ctx: &mut HookCtx, _entry: &FileEntry) -> Result<()> {
        let count = ctx.entries.len() as u32;
        self.write_count(ctx, count)
    }

    fn attribute(&mut self, ctx: &mut HookCtx, index: usize, value: &AttrValue) -> Result<AttrWrite> {
        debug_assert_eq!(index, 0);
        let new_version = match value {
            AttrValue::Enum(0) => VERSION_PLAIN,
            AttrValue::Enum(1) => VERSION_CRYPT,
            _ => return Err(Error::NotSupported("unknown RFF version".into())),
        };
        if new_version < VERSION_CRYPT {
            // Downgrading to a version without encryption is refused
            // while any entry still needs it.
            for e in ctx.entries {
                if e.attrs().contains(EntryAttrs::ENCRYPTED) {
                    return Err(Error::NotSupported(
                        "cannot change to this RFF version while the archive \
                         contains encrypted files"
                            .into(),
                    ));
                }
            }
        }
        self.version = new_version;
        ctx.content.seek_to(4)?;
        ctx.content.write_u16::<LittleEndian>(new_version)?;
        ctx.content.write_u16::<LittleEndian>(0)?;
        Ok(AttrWrite::Applied)
    }

    fn flush(&mut self, ctx: &mut HookCtx) -> Result<()> {
        if !self.modified_fat {
            return Ok(());
        }
        let off_fat = match ctx.entries.last() {
            Some(last) => last.details().end(),
            None => FIRST_FILE_OFFSET,
        };
        let count = ctx.entries.len() as u64;

        ctx.content.seek_to(FATOFFSET_OFFSET)?;
        ctx.content.write_u32::<LittleEndian>(off_fat as u32)?;

        // Grow or cut the tail so the archive ends exactly at the end
        // of the FAT.
        let len_archive = ctx.content.len();
        let off_end_fat = off_fat + count * FAT_ENTRY_LEN;
        let delta = off_end_fat as i64 - len_archive as i64;
        ctx.content.seek_to(off_fat.min(len_archive))?;
        if delta > 0 {
            ctx.content.insert(delta as u64)?;
        } else if delta < 0 {
            ctx.content.remove((-delta) as u64)?;
        }

        let mut fat_bytes = self.fat.read_all()?;
        if self.version >= VERSION_CRYPT {
            xor_blood_apply(&mut fat_bytes, (off_fat & 0xff) as u8);
        }
        ctx.content.write_at(off_fat, &fat_bytes)?;

        self.modified_fat = false;
        debug!(off_fat, files = count, "rewrote RFF FAT");
        Ok(())
    }
}
