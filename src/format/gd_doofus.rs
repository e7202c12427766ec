//! Doofus .G-D containers
//!
//! Layout documented on the ModdingWiki:
//! <http://www.shikadi.net/moddingwiki/Doofus_Game_Data_Format>
//!
//! The archive itself is nothing but concatenated file data; the FAT
//! lives in a fixed-size table inside the game executable, supplied as
//! a supplemental stream. Each 8-byte slot holds a u16 size, a u16
//! type code and four unused bytes; a zero size marks a vacant slot.
//! Inserting consumes a vacant slot from the end of the table and
//! removing splices one back in, so the table never changes length.
//! Creating this format from scratch is refused: there is no way to
//! know where in an executable the table should go.
//!
//! Most type codes have no known meaning; they are carried through
//! verbatim so a round trip never invents semantics.

use super::{Certainty, Format, SuppData, SuppHint, SuppItem};
use crate::archive::{Archive, ArchiveParts, FatHooks, HookCtx};
use crate::entry::{FileEntry, FILETYPE_GENERIC};
use crate::error::{Error, Result};
use crate::io::{Backing, WindowBacking};
use crate::segment::SegmentedStream;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

const FIRST_FILE_OFFSET: u64 = 0;
const FAT_ENTRY_LEN: u64 = 8;

const TYPE_MUSIC_TBSA: u16 = 0x59EE;

/// FAT location keyed by executable size; only one release is known.
fn locate_fat(len_exe: u64) -> Result<(u64, u64)> {
    match len_exe {
        580_994 => Ok((0x015372, 8 * 64)),
        // A bare table is accepted so the format can be exercised
        // without the game binary.
        n if n > 0 && n % FAT_ENTRY_LEN == 0 && n <= 8 * 1024 => Ok((0, n)),
        _ => Err(Error::NotSupported("unknown executable version".into())),
    }
}

fn type_to_mime(code: u16) -> String {
    match code {
        TYPE_MUSIC_TBSA => "music/tbsa".to_string(),
        0x1636 | 0x2376 | 0x3276 | 0x3F2E | 0x3F64 | 0x48BE | 0x43EE => {
            format!("unknown/doofus-{:04x}", code)
        }
        _ => FILETYPE_GENERIC.to_string(),
    }
}

fn mime_to_type(entry: &FileEntry) -> u16 {
    if let Some(code) = entry.native_type {
        return code;
    }
    if entry.file_type == "music/tbsa" {
        return TYPE_MUSIC_TBSA;
    }
    if let Some(hex) = entry.file_type.strip_prefix("unknown/doofus-") {
        if let Ok(code) = u16::from_str_radix(hex, 16) {
            return code;
        }
    }
    0
}

pub struct GdDoofus;

impl Format for GdDoofus {
    fn code(&self) -> &'static str {
        "gd-doofus"
    }

    fn name(&self) -> &'static str {
        "Doofus DAT File"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["g-d"]
    }

    fn games(&self) -> &'static [&'static str] {
        &["Doofus"]
    }

    fn certainty(&self, _content: &mut dyn Backing) -> Result<Certainty> {
        // There is literally no identifying information in this
        // archive format.
        Ok(Certainty::Unsure)
    }

    fn open(&self, content: Box<dyn Backing>, supp: &mut SuppData) -> Result<Archive> {
        let mut exe = supp.fat.take().ok_or_else(|| {
            Error::NotSupported("this format needs the game executable as a FAT stream".into())
        })?;
        let (off_fat, len_fat) = locate_fat(exe.len()?)?;
        let window = WindowBacking::new(exe, off_fat, len_fat)?;
        let fat = SegmentedStream::open(Box::new(window))?;
        parse(SegmentedStream::open(content)?, fat)
    }

    fn create(&self, _content: Box<dyn Backing>, _supp: &mut SuppData) -> Result<Archive> {
        Err(Error::NotSupported(
            "cannot create archives from scratch in this format".into(),
        ))
    }

    fn required_supps(&self, _archive_filename: &str) -> Vec<SuppHint> {
        vec![SuppHint {
            item: SuppItem::Fat,
            filename: "doofus.exe".to_string(),
        }]
    }
}

fn parse(content: SegmentedStream, mut fat: SegmentedStream) -> Result<Archive> {
    let len_archive = content.len();
    let max_files = (fat.len() / FAT_ENTRY_LEN) as usize;
    fat.seek_to(0)?;

    let mut entries = Vec::new();
    let mut offset = 0u64;
    let mut num_files = 0usize;
    for i in 0..max_files {
        let size = fat.read_u16::<LittleEndian>()? as u64;
        let type_code = fat.read_u16::<LittleEndian>()?;
        fat.seek(SeekFrom::Current(4))?;
        if size == 0 {
            continue;
        }

        let mut e = FileEntry::new();
        e.index = i as u32;
        e.offset = offset;
        e.stored_size = size;
        e.real_size = size;
        e.native_type = Some(type_code);
        e.file_type = type_to_mime(type_code);
        e.valid = true;
        offset += size;

        if e.end() > len_archive {
            return Err(Error::CorruptFat(
                "archive has been truncated or FAT is corrupt".into(),
            ));
        }
        entries.push(e);
        num_files += 1;
    }

    debug!(files = num_files, max_files, "opened Doofus archive");
    Ok(Archive::assemble(
        content,
        Box::new(GdHooks {
            fat,
            max_files,
            num_files,
        }),
        ArchiveParts {
            entries,
            attributes: Vec::new(),
            off_first_file: FIRST_FILE_OFFSET,
            len_max_filename: 0,
            format_code: "gd-doofus",
        },
    ))
}

struct GdHooks {
    /// Supplemental FAT window; committed on flush.
    fat: SegmentedStream,
    max_files: usize,
    num_files: usize,
}

impl FatHooks for GdHooks {
    fn update_name(&mut self, _ctx: &mut HookCtx, _entry: &FileEntry, _name: &str) -> Result<()> {
        Err(Error::NotSupported(
            "this archive format does not support filenames".into(),
        ))
    }

    fn update_size(&mut self, _ctx: &mut HookCtx, entry: &FileEntry, _delta: i64) -> Result<()> {
        if entry.stored_size > 0xFFFF {
            return Err(Error::FormatLimit(
                "files in this archive format are limited to 65535 bytes".into(),
            ));
        }
        self.fat
            .seek_to(entry.index as u64 * FAT_ENTRY_LEN)?;
        self.fat
            .write_u16::<LittleEndian>(entry.stored_size as u16)?;
        Ok(())
    }

    fn pre_insert(
        &mut self,
        _ctx: &mut HookCtx,
        _before: Option<&FileEntry>,
        new_entry: &mut FileEntry,
    ) -> Result<()> {
        if self.num_files + 1 >= self.max_files {
            return Err(Error::FormatLimit(
                "maximum number of files reached in this archive format".into(),
            ));
        }
        if new_entry.stored_size > 0xFFFF {
            return Err(Error::FormatLimit(
                "files in this archive format are limited to 65535 bytes".into(),
            ));
        }
        new_entry.header_len = 0;

        // Keep the table length fixed: drop the vacant slot at the end
        // and splice the new record into place.
        let end = self.fat.len();
        self.fat.seek_to(end - FAT_ENTRY_LEN)?;
        self.fat.remove(FAT_ENTRY_LEN)?;

        self.fat
            .seek_to(new_entry.index as u64 * FAT_ENTRY_LEN)?;
        self.fat.insert(FAT_ENTRY_LEN)?;
        self.fat
            .write_u16::<LittleEndian>(new_entry.stored_size as u16)?;
        self.fat
            .write_u16::<LittleEndian>(mime_to_type(new_entry))?;
        self.fat.write_all(&[0u8; 4])?;

        self.num_files += 1;
        Ok(())
    }

    fn pre_remove(&mut self, _ctx: &mut HookCtx, entry: &FileEntry) -> Result<()> {
        self.fat
            .seek_to(entry.index as u64 * FAT_ENTRY_LEN)?;
        self.fat.remove(FAT_ENTRY_LEN)?;

        // Pad the table back to its fixed length with a vacant slot.
        let end = self.fat.len();
        self.fat.seek_to(end)?;
        self.fat.insert(FAT_ENTRY_LEN)?;

        self.num_files -= 1;
        Ok(())
    }

    fn flush(&mut self, _ctx: &mut HookCtx) -> Result<()> {
        self.fat.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBacking;

    fn fat_slot_bytes(size: u16, type_code: u16) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&size.to_le_bytes());
        v.extend_from_slice(&type_code.to_le_bytes());
        v.extend_from_slice(&[0u8; 4]);
        v
    }

    fn small_fat() -> Vec<u8> {
        // four slots: two files, two vacant
        let mut v = fat_slot_bytes(5, 0x59EE);
        v.extend(fat_slot_bytes(3, 0x1636));
        v.extend(fat_slot_bytes(0, 0));
        v.extend(fat_slot_bytes(0, 0));
        v
    }

    #[test]
    fn test_open_requires_supp_fat() {
        let r = GdDoofus.open(
            Box::new(MemoryBacking::from_vec(vec![0u8; 8])),
            &mut SuppData::default(),
        );
        assert!(r.is_err());
    }

    #[test]
    fn test_parse_skips_vacant_slots() {
        let mut supp = SuppData {
            fat: Some(Box::new(MemoryBacking::from_vec(small_fat()))),
        };
        let arc = GdDoofus
            .open(Box::new(MemoryBacking::from_vec(b"AAAAABBB".to_vec())), &mut supp)
            .unwrap();
        let files = arc.files();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].details().file_type, "music/tbsa");
        assert_eq!(files[0].details().native_type, Some(0x59EE));
        assert_eq!(files[1].details().file_type, "unknown/doofus-1636");
        assert_eq!(files[1].stored_size(), 3);
    }

    #[test]
    fn test_create_refused() {
        let r = GdDoofus.create(Box::new(MemoryBacking::new()), &mut SuppData::default());
        assert!(r.is_err());
    }

    #[test]
    fn test_rename_refused() {
        let mut supp = SuppData {
            fat: Some(Box::new(MemoryBacking::from_vec(small_fat()))),
        };
        let mut arc = GdDoofus
            .open(Box::new(MemoryBacking::from_vec(b"AAAAABBB".to_vec())), &mut supp)
            .unwrap();
        let f = arc.files()[0].clone();
        assert!(arc.rename(&f, "newname").is_err());
    }
}
