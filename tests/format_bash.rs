//! Byte-level tests for the Monster Bash embedded-FAT strategy

use retrovault::format::{DatBash, Format, SuppData};
use retrovault::{EntryAttrs, FILETYPE_GENERIC};
use tempfile::NamedTempFile;

fn efat_entry(type_code: u16, name: &str, expanded: u16, data: &[u8]) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(&type_code.to_le_bytes());
    v.extend_from_slice(&(data.len() as u16).to_le_bytes());
    let mut field = [0u8; 31];
    field[..name.len()].copy_from_slice(name.as_bytes());
    v.extend_from_slice(&field);
    v.extend_from_slice(&expanded.to_le_bytes());
    v.extend_from_slice(data);
    v
}

fn initial_dat() -> Vec<u8> {
    let mut v = efat_entry(32, "ONE.DAT", 0, b"This is one.dat");
    v.extend(efat_entry(32, "TWO.DAT", 0, b"This is two.dat"));
    v
}

fn open_dat(bytes: &[u8]) -> (NamedTempFile, retrovault::Archive) {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), bytes).unwrap();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let arc = DatBash
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
    let initial = initial_dat();
    let (tmp, arc) = open_dat(&initial);
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_resize_larger_shifts_following_entries() {
    let (tmp, mut arc) = open_dat(&initial_dat());
    let one = arc.find("ONE.DAT").unwrap();
    let two = arc.find("TWO.DAT").unwrap();
    let off_two_before = two.details().offset;

    arc.resize(&one, 20, 20).unwrap();

    // size field becomes 0x14 and the second entry slides along
    assert_eq!(two.details().offset, off_two_before + 5);
    let mut expected = efat_entry(32, "ONE.DAT", 0, b"This is one.dat\0\0\0\0\0");
    expected.extend(efat_entry(32, "TWO.DAT", 0, b"This is two.dat"));
    let bytes = flushed_bytes(tmp, arc);
    assert_eq!(&bytes[2..4], &20u16.to_le_bytes());
    assert_eq!(bytes, expected);
}

#[test]
fn test_insert_mid_with_embedded_header() {
    let (tmp, mut arc) = open_dat(&initial_dat());
    let two = arc.find("TWO.DAT").unwrap();
    let h = arc
        .insert(
            Some(&two),
            "THREE.DAT",
            17,
            FILETYPE_GENERIC,
            EntryAttrs::empty(),
        )
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();

    let mut expected = efat_entry(32, "ONE.DAT", 0, b"This is one.dat");
    expected.extend(efat_entry(32, "THREE.DAT", 0, b"This is three.dat"));
    expected.extend(efat_entry(32, "TWO.DAT", 0, b"This is two.dat"));
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_remove_restores_initial() {
    let initial = initial_dat();
    let (tmp, mut arc) = open_dat(&initial);
    let h = arc
        .insert(None, "THREE.DAT", 17, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();
    arc.remove(&h).unwrap();
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_synthetic_extension_stripped_on_disk() {
    let (tmp, mut arc) = open_dat(&initial_dat());
    let h = arc
        .insert(None, "LEVEL9.MIF", 9, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"info here").unwrap();
    arc.flush().unwrap();
    drop(arc);

    // on disk: type code 0, name without the synthetic extension
    let bytes = std::fs::read(tmp.path()).unwrap();
    let off = initial_dat().len();
    assert_eq!(&bytes[off..off + 2], &0u16.to_le_bytes());
    assert_eq!(&bytes[off + 4..off + 10], b"LEVEL9");
    assert_eq!(bytes[off + 10], 0);

    // and a fresh load synthesizes it back
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let arc = DatBash
        .open(Box::new(file), &mut SuppData::default())
        .unwrap();
    assert!(arc.find("LEVEL9.mif").is_some());
}

#[test]
fn test_u16_size_limit_enforced() {
    let (_tmp, mut arc) = open_dat(&initial_dat());
    let err = arc.insert(
        None,
        "HUGE.BIN",
        65536,
        FILETYPE_GENERIC,
        EntryAttrs::empty(),
    );
    assert!(matches!(err, Err(retrovault::Error::FormatLimit(_))));
    assert_eq!(arc.files().len(), 2);

    let one = arc.find("ONE.DAT").unwrap();
    let err = arc.resize(&one, 70_000, 70_000);
    assert!(matches!(err, Err(retrovault::Error::FormatLimit(_))));
    // the failed resize rolled back
    assert_eq!(one.stored_size(), 15);
    assert!(!arc.is_poisoned());

    // right at the boundary is fine
    arc.resize(&one, 65_535, 65_535).unwrap();
    assert_eq!(one.stored_size(), 65_535);
}

#[test]
fn test_compressed_entry_roundtrip() {
    let (tmp, mut arc) = open_dat(&initial_dat());
    let payload: Vec<u8> = b"bash bash bash bash data "
        .iter()
        .cycle()
        .take(500)
        .copied()
        .collect();
    let h = arc
        .insert(None, "PACKED.BIN", 0, FILETYPE_GENERIC, EntryAttrs::COMPRESSED)
        .unwrap();
    arc.write_file(&h, &payload).unwrap();
    assert_eq!(h.real_size(), 500);
    assert!(h.stored_size() < 500);
    assert_eq!(arc.read_file(&h).unwrap(), payload);
    arc.flush().unwrap();
    drop(arc);

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let mut arc = DatBash
        .open(Box::new(file), &mut SuppData::default())
        .unwrap();
    let h = arc.find("PACKED.BIN").unwrap();
    assert!(h.attrs().contains(EntryAttrs::COMPRESSED));
    assert_eq!(h.real_size(), 500);
    assert_eq!(arc.read_file(&h).unwrap(), payload);
}
