//! Byte-level tests for the Doom WAD strategy

use retrovault::format::{Format, SuppData, WadDoom};
use retrovault::{AttrValue, EntryAttrs, FILETYPE_GENERIC};
use std::io::{Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;

fn fat_record(offset: u32, size: u32, name: &[u8; 8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&offset.to_le_bytes());
    v.extend_from_slice(&size.to_le_bytes());
    v.extend_from_slice(name);
    v
}

fn initial_wad() -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"IWAD");
    v.extend_from_slice(&2u32.to_le_bytes());
    v.extend_from_slice(&12u32.to_le_bytes());
    v.extend(fat_record(0x2c, 15, b"ONE.DAT\0"));
    v.extend(fat_record(0x3b, 15, b"TWO.DAT\0"));
    v.extend_from_slice(b"This is one.dat");
    v.extend_from_slice(b"This is two.dat");
    v
}

/// Write `bytes` to a temp file and open it as a WAD.
fn open_wad(bytes: &[u8]) -> (NamedTempFile, retrovault::Archive) {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), bytes).unwrap();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let arc = WadDoom
        .open(Box::new(file), &mut SuppData::default())
        .unwrap();
    (tmp, arc)
}

fn flushed_bytes(tmp: NamedTempFile, mut arc: retrovault::Archive) -> Vec<u8> {
    arc.flush().unwrap();
    drop(arc);
    std::fs::read(tmp.path()).unwrap()
}

#[test]
fn test_load_flush_is_identity() {
    let initial = initial_wad();
    let (tmp, arc) = open_wad(&initial);
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_listing() {
    let (_tmp, arc) = open_wad(&initial_wad());
    let files = arc.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name(), "ONE.DAT");
    assert_eq!(files[1].name(), "TWO.DAT");
    assert_eq!(files[0].stored_size(), 15);
    assert!(arc.find("one.dat").is_some()); // case-insensitive
    assert!(arc.find("NOPE.DAT").is_none());
}

#[test]
fn test_rename_truncates_to_field() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let one = arc.find("ONE.DAT").unwrap();
    arc.rename(&one, "THREE.DAT").unwrap();
    assert_eq!(one.name(), "THREE.DAT");

    // header untouched, only the 8-byte name field of entry 0 changes
    let mut expected = initial_wad();
    expected[20..28].copy_from_slice(b"THREE.DA");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_insert_end() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let h = arc
        .insert(None, "THREE.D", 17, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(b"IWAD");
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&12u32.to_le_bytes());
    expected.extend(fat_record(0x3c, 15, b"ONE.DAT\0"));
    expected.extend(fat_record(0x4b, 15, b"TWO.DAT\0"));
    expected.extend(fat_record(0x5a, 17, b"THREE.D\0"));
    expected.extend_from_slice(b"This is one.dat");
    expected.extend_from_slice(b"This is two.dat");
    expected.extend_from_slice(b"This is three.dat");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_insert_before_first() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let one = arc.find("ONE.DAT").unwrap();
    let h = arc
        .insert(Some(&one), "THREE.D", 17, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(b"IWAD");
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&12u32.to_le_bytes());
    expected.extend(fat_record(0x3c, 17, b"THREE.D\0"));
    expected.extend(fat_record(0x4d, 15, b"ONE.DAT\0"));
    expected.extend(fat_record(0x5c, 15, b"TWO.DAT\0"));
    expected.extend_from_slice(b"This is three.dat");
    expected.extend_from_slice(b"This is one.dat");
    expected.extend_from_slice(b"This is two.dat");
    assert_eq!(flushed_bytes(tmp, arc), expected);

    // handles repositioned but still valid
    assert!(one.is_valid());
    assert_eq!(one.details().index, 1);
}

#[test]
fn test_remove_first() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let one = arc.find("ONE.DAT").unwrap();
    arc.remove(&one).unwrap();
    assert!(!one.is_valid());
    assert!(arc.remove(&one).is_err()); // stale handle

    let mut expected = Vec::new();
    expected.extend_from_slice(b"IWAD");
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(&12u32.to_le_bytes());
    expected.extend(fat_record(0x1c, 15, b"TWO.DAT\0"));
    expected.extend_from_slice(b"This is two.dat");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_insert_then_remove_restores_bytes() {
    let initial = initial_wad();
    let (tmp, mut arc) = open_wad(&initial);
    let h = arc
        .insert(None, "THREE.D", 17, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();
    arc.remove(&h).unwrap();
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_resize_larger_and_smaller() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let one = arc.find("ONE.DAT").unwrap();
    arc.resize(&one, 20, 20).unwrap();
    assert_eq!(one.stored_size(), 20);
    let two = arc.find("TWO.DAT").unwrap();
    assert_eq!(two.details().offset, 0x2c + 20);

    arc.resize(&one, 10, 10).unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(b"IWAD");
    expected.extend_from_slice(&2u32.to_le_bytes());
    expected.extend_from_slice(&12u32.to_le_bytes());
    expected.extend(fat_record(0x2c, 10, b"ONE.DAT\0"));
    expected.extend(fat_record(0x36, 15, b"TWO.DAT\0"));
    expected.extend_from_slice(b"This is on");
    expected.extend_from_slice(b"This is two.dat");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_type_attribute_rewrites_signature() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    assert_eq!(arc.attributes()[0].value, AttrValue::Enum(0));
    arc.set_attribute(0, AttrValue::Enum(1)).unwrap();
    assert!(arc.attributes()[0].changed);

    let mut expected = initial_wad();
    expected[0] = b'P';
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_open_view_survives_shifts() {
    let (_tmp, mut arc) = open_wad(&initial_wad());
    let two = arc.find("TWO.DAT").unwrap();
    let mut view = arc.open(&two).unwrap();

    // shuffle the archive around underneath the open view
    let one = arc.find("ONE.DAT").unwrap();
    let h = arc
        .insert(Some(&one), "NEW.DAT", 6, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"newdat").unwrap();
    arc.resize(&one, 25, 25).unwrap();

    let mut data = Vec::new();
    view.read_to_end(&mut data).unwrap();
    assert_eq!(data, b"This is two.dat");

    // writes through the view land on the right bytes
    view.seek(SeekFrom::Start(8)).unwrap();
    view.write_all(b"TWO.DAT").unwrap();
    assert_eq!(arc.read_file(&two).unwrap(), b"This is TWO.DAT");
}

#[test]
fn test_name_too_long_rejected_before_mutation() {
    let (tmp, mut arc) = open_wad(&initial_wad());
    let err = arc.insert(
        None,
        "WAY_TOO_LONG_NAME.DAT",
        4,
        FILETYPE_GENERIC,
        EntryAttrs::empty(),
    );
    assert!(err.is_err());
    assert!(!arc.is_poisoned());
    assert_eq!(flushed_bytes(tmp, arc), initial_wad());
}
