//! Stellar 7 .RES containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/RES_Format_(Stellar_7)>
//!
//! A chain of 8-byte embedded headers: 4-byte name, then a u32 whose
//! top bit marks a folder and whose low 31 bits give the length. A
//! folder entry's data region is itself a RES container, opened
//! recursively as a nested archive.

use super::{read_fixed_name, write_fixed_name, Certainty, Format, SuppData};
use crate::archive::{Archive, ArchiveParts, FatHooks, HookCtx};
use crate::entry::{EntryAttrs, FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::{Backing, MemoryBacking};
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::SeekFrom;
use tracing::{debug, warn};

const FIRST_FILE_OFFSET: u64 = 0;
const NAME_FIELD_LEN: usize = 4;
const FAT_ENTRY_LEN: u64 = 8;
const SAFETY_MAX_FILECOUNT: usize = 8192;

const FOLDER_BIT: u32 = 0x8000_0000;

fn size_field(entry: &FileEntry) -> u32 {
    let mut v = entry.stored_size as u32;
    if entry.attrs.contains(EntryAttrs::FOLDER) {
        v |= FOLDER_BIT;
    }
    v
}

pub struct ResStellar7;

impl Format for ResStellar7 {
    fn code(&self) -> &'static str {
        "res-stellar7"
    }

    fn name(&self) -> &'static str {
        "Stellar 7 Resource File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["res"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Stellar 7"]
    }

    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty> {
        let len = content.len()?;
        content.seek(SeekFrom::Start(0))?;
        let mut off_next = 0u64;
        let mut count = 0usize;
        while count < SAFETY_MAX_FILECOUNT && off_next + FAT_ENTRY_LEN <= len {
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
            let folder_size = content.read_u32::<LittleEndian>()?;
            let size = (folder_size & !FOLDER_BIT) as u64;
            off_next += FAT_ENTRY_LEN + size;
            if off_next > len {
                return Ok(Certainty::DefinitelyNo);
            }
            content.seek(SeekFrom::Start(off_next))?;
            count += 1;
        }
        if count == SAFETY_MAX_FILECOUNT {
            return Ok(Certainty::PossiblyYes);
        }
        Ok(Certainty::DefinitelyYes)
    }

    fn open(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        parse(SegmentedStream::open(content)?)
    }

    fn create(&self, content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        // An empty RES archive is an empty file.
        parse(SegmentedStream::open(content)?)
    }
}

fn parse(mut content: SegmentedStream) -> Result<Archive> {
    let len_archive = content.len();
    let mut entries = Vec::new();
    let mut off_next = 0u64;
    let mut index = 0u32;
    content.seek_to(0)?;

    while (index as usize) < SAFETY_MAX_FILECOUNT && off_next + FAT_ENTRY_LEN <= len_archive {
        let mut e = FileEntry::new();
        e.index = index;
        e.offset = off_next;
        e.header_len = FAT_ENTRY_LEN;
        e.file_type = FILETYPE_GENERIC.to_string();
        e.valid = true;

        e.name = read_fixed_name(&mut content, NAME_FIELD_LEN)?;
        let folder_size = content.read_u32::<LittleEndian>()?;
        if folder_size & FOLDER_BIT != 0 {
            e.attrs |= EntryAttrs::FOLDER;
        }
        e.stored_size = (folder_size & !FOLDER_BIT) as u64;
        e.real_size = e.stored_size;

        off_next += FAT_ENTRY_LEN + e.stored_size;
        if off_next > len_archive {
            warn!("RES archive truncated; ignoring trailing entry");
            break;
        }
        content.seek_to(off_next)?;
        entries.push(e);
        index += 1;
    }

    debug!(files = entries.len(), "opened RES archive");
    Ok(Archive::assemble(
        content,
        Box::new(ResHooks),
        ArchiveParts {
            entries,
            attributes: Vec::new(),
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: NAME_FIELD_LEN,
            format_code: "res-stellar7",
        },
    ))
}

struct ResHooks;

impl FatHooks for ResHooks {
    fn update_name(&mut self, ctx: &mut HookCtx, entry: &FileEntry, name: &str) -> Result<()> {
        ctx.content.seek_to(entry.offset)?;
        write_fixed_name(ctx.content, name, NAME_FIELD_LEN)
    }

    fn update_size(&mut self, ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        ctx.content.seek_to(entry.offset + NAME_FIELD_LEN as u64)?;
        ctx.content.write_u32::<LittleEndian>(size_field(entry))?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        new_entry.header_len = FAT_ENTRY_LEN;
        new_entry.name = new_entry.name.to_ascii_uppercase();

        ctx.content.seek_to(new_entry.offset)?;
        ctx.content.insert(FAT_ENTRY_LEN)?;
        write_fixed_name(ctx.content, &new_entry.name, NAME_FIELD_LEN)?;
        ctx.content
            .write_u32::<LittleEndian>(size_field(new_entry))?;

        ctx.shift(self, None, new_entry.offset, FAT_ENTRY_LEN as i64, 0)
    }

    fn open_folder(&self, entry: &FileEntry, data: Vec<u8>) -> Result<Archive> {
        if !entry.attrs.contains(EntryAttrs::FOLDER) {
            return Err(Error::NotSupported(format!(
                "{:?} is not a folder",
                entry.name
            )));
        }
        parse(SegmentedStream::open(Box::new(MemoryBacking::from_vec(
            data,
        )))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res_entry(name: &str, folder: bool, data: &[u8]) -> Vec<u8> {
        let mut v = vec![0u8; NAME_FIELD_LEN];
        v[..name.len()].copy_from_slice(name.as_bytes());
        let mut field = data.len() as u32;
        if folder {
            field |= FOLDER_BIT;
        }
        v.extend_from_slice(&field.to_le_bytes());
        v.extend_from_slice(data);
        v
    }

    #[test]
    fn test_parse_and_folder_bit() {
        let mut v = res_entry("ONE", false, b"plain data here");
        let nested = res_entry("SUB", false, b"nested file dat");
        v.extend(res_entry("DIR", true, &nested));
        let arc = ResStellar7
            .open(
                Box::new(MemoryBacking::from_vec(v)),
                &mut SuppData::default(),
            )
            .unwrap();
        let files = arc.files();
        assert_eq!(files.len(), 2);
        assert!(!files[0].attrs().contains(EntryAttrs::FOLDER));
        assert!(files[1].attrs().contains(EntryAttrs::FOLDER));
    }

    #[test]
    fn test_open_folder_recurses() {
        let nested = res_entry("SUB", false, b"nested file dat");
        let v = res_entry("DIR", true, &nested);
        let mut arc = ResStellar7
            .open(
                Box::new(MemoryBacking::from_vec(v)),
                &mut SuppData::default(),
            )
            .unwrap();
        let dir = arc.find("DIR").unwrap();
        let mut sub = arc.open_folder(&dir).unwrap();
        let inner = sub.find("SUB").unwrap();
        assert_eq!(sub.read_file(&inner).unwrap(), b"nested file dat");
    }

    #[test]
    fn test_open_folder_on_file_rejected() {
        let v = res_entry("ONE", false, b"plain data here");
        let mut arc = ResStellar7
            .open(
                Box::new(MemoryBacking::from_vec(v)),
                &mut SuppData::default(),
            )
            .unwrap();
        let one = arc.find("ONE").unwrap();
        assert!(arc.open_folder(&one).is_err());
    }
}
