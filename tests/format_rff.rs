//! Byte-level tests for the Blood RFF strategy, v3.1 encrypted
//!
//! The expected byte images are transcriptions of real v3.1
//! containers: the FAT obfuscation keystream and the file-data
//! scrambling have to come out exactly right or Blood itself would
//! reject the archive.

use retrovault::format::{Format, RffBlood, SuppData};
use retrovault::{AttrValue, EntryAttrs, FILETYPE_GENERIC};
use tempfile::NamedTempFile;

// "This is one.dat" / "This is two.dat" / "This is three.dat" after
// the zero-seeded data scramble.
const DATA_ONE: &[u8] = b"Thhr\"kp#kj`+bgs";
const DATA_TWO: &[u8] = b"Thhr\"kp#psj+bgs";
const DATA_THREE: &[u8] = b"Thhr\"kp#plw`c(cf|";

fn header(off_fat: u32, num_files: u32) -> Vec<u8> {
    let mut v = Vec::new();
    v.extend_from_slice(b"RFF\x1a");
    v.extend_from_slice(&0x0301u32.to_le_bytes());
    v.extend_from_slice(&off_fat.to_le_bytes());
    v.extend_from_slice(&num_files.to_le_bytes());
    v.extend_from_slice(&[0u8; 16]);
    v
}

fn initial_rff() -> Vec<u8> {
    let mut v = header(0x3e, 2);
    v.extend_from_slice(DATA_ONE);
    v.extend_from_slice(DATA_TWO);
    v.extend_from_slice(b"\x3E\x3E\x3F\x3F\x40\x40\x41\x41\x42\x42\x43\x43\x44\x44\x45\x45");
    v.extend_from_slice(b"\x66\x46\x47\x47\x47\x48\x49\x49\x4A\x4A\x4B\x4B\x4C\x4C\x4D\x4D");
    v.extend_from_slice(b"\x5E\x0A\x0E\x1B\x1F\x1E\x14\x51\x52\x52\x53\x53\x54\x54\x55\x55");
    v.extend_from_slice(b"\x56\x56\x57\x57\x58\x58\x59\x59\x5A\x5A\x5B\x5B\x5C\x5C\x5D\x5D");
    v.extend_from_slice(b"\x71\x5E\x5F\x5F\x6F\x60\x61\x61\x62\x62\x63\x63\x64\x64\x65\x65");
    v.extend_from_slice(b"\x76\x22\x26\x33\x3C\x3F\x26\x69\x6A\x6A\x6B\x6B\x6C\x6C\x6D\x6D");
    v
}

fn open_rff(bytes: &[u8]) -> (NamedTempFile, retrovault::Archive) {
    let tmp = NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), bytes).unwrap();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let arc = RffBlood
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
fn test_load_decrypts_fat() {
    let (_tmp, mut arc) = open_rff(&initial_rff());
    let files = arc.files();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].name(), "ONE.DAT");
    assert_eq!(files[1].name(), "TWO.DAT");
    assert!(files[0].attrs().contains(EntryAttrs::ENCRYPTED));
    assert_eq!(arc.attributes()[0].value, AttrValue::Enum(1));

    // file data decrypts through the xor-blood filter
    let one = arc.find("ONE.DAT").unwrap();
    assert_eq!(arc.read_file(&one).unwrap(), b"This is one.dat");
}

#[test]
fn test_load_flush_is_identity() {
    let initial = initial_rff();
    let (tmp, arc) = open_rff(&initial);
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_insert_end_encrypted() {
    let (tmp, mut arc) = open_rff(&initial_rff());
    let h = arc
        .insert(
            None,
            "three.dat",
            17,
            FILETYPE_GENERIC,
            EntryAttrs::ENCRYPTED,
        )
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();

    // FAT moves to 0x4f and re-encrypts under the new offset's seed
    let mut expected = header(0x4f, 3);
    expected.extend_from_slice(DATA_ONE);
    expected.extend_from_slice(DATA_TWO);
    expected.extend_from_slice(DATA_THREE);
    expected
        .extend_from_slice(b"\x4F\x4F\x50\x50\x51\x51\x52\x52\x53\x53\x54\x54\x55\x55\x56\x56");
    expected
        .extend_from_slice(b"\x77\x57\x58\x58\x56\x59\x5A\x5A\x5B\x5B\x5C\x5C\x5D\x5D\x5E\x5E");
    expected
        .extend_from_slice(b"\x4F\x1B\x21\x34\x2E\x2F\x27\x62\x63\x63\x64\x64\x65\x65\x66\x66");
    expected
        .extend_from_slice(b"\x67\x67\x68\x68\x69\x69\x6A\x6A\x6B\x6B\x6C\x6C\x6D\x6D\x6E\x6E");
    expected
        .extend_from_slice(b"\x40\x6F\x70\x70\x7E\x71\x72\x72\x73\x73\x74\x74\x75\x75\x76\x76");
    expected
        .extend_from_slice(b"\x67\x33\x39\x2C\x2D\x2E\x35\x7A\x7B\x7B\x7C\x7C\x7D\x7D\x7E\x7E");
    expected
        .extend_from_slice(b"\x7F\x7F\x80\x80\x81\x81\x82\x82\x83\x83\x84\x84\x85\x85\x86\x86");
    expected
        .extend_from_slice(b"\xB9\x87\x88\x88\x98\x89\x8A\x8A\x8B\x8B\x8C\x8C\x8D\x8D\x8E\x8E");
    expected
        .extend_from_slice(b"\x9F\xCB\xD1\xC4\xC5\xD9\xC0\xD7\xD6\x93\x94\x94\x95\x95\x96\x96");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_rename() {
    let (tmp, mut arc) = open_rff(&initial_rff());
    let one = arc.find("ONE.DAT").unwrap();
    arc.rename(&one, "THREE.DAT").unwrap();

    let mut expected = header(0x3e, 2);
    expected.extend_from_slice(DATA_ONE);
    expected.extend_from_slice(DATA_TWO);
    expected
        .extend_from_slice(b"\x3E\x3E\x3F\x3F\x40\x40\x41\x41\x42\x42\x43\x43\x44\x44\x45\x45");
    expected
        .extend_from_slice(b"\x66\x46\x47\x47\x47\x48\x49\x49\x4A\x4A\x4B\x4B\x4C\x4C\x4D\x4D");
    expected
        .extend_from_slice(b"\x5E\x0A\x0E\x1B\x04\x18\x03\x14\x17\x52\x53\x53\x54\x54\x55\x55");
    expected
        .extend_from_slice(b"\x56\x56\x57\x57\x58\x58\x59\x59\x5A\x5A\x5B\x5B\x5C\x5C\x5D\x5D");
    expected
        .extend_from_slice(b"\x71\x5E\x5F\x5F\x6F\x60\x61\x61\x62\x62\x63\x63\x64\x64\x65\x65");
    expected
        .extend_from_slice(b"\x76\x22\x26\x33\x3C\x3F\x26\x69\x6A\x6A\x6B\x6B\x6C\x6C\x6D\x6D");
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_rename_rejects_non_dos_names() {
    let (_tmp, mut arc) = open_rff(&initial_rff());
    let one = arc.find("ONE.DAT").unwrap();
    assert!(arc.rename(&one, "LONGBASENAME").is_err());
    assert!(arc.rename(&one, "NAME.LONG").is_err());
    assert_eq!(one.name(), "ONE.DAT");
    assert!(!arc.is_poisoned());
}

#[test]
fn test_remove_all() {
    let (tmp, mut arc) = open_rff(&initial_rff());
    let one = arc.find("ONE.DAT").unwrap();
    let two = arc.find("TWO.DAT").unwrap();
    arc.remove(&one).unwrap();
    arc.remove(&two).unwrap();

    // just the 32-byte header: FAT offset 0x20, zero files
    let expected = header(0x20, 0);
    assert_eq!(flushed_bytes(tmp, arc), expected);
}

#[test]
fn test_insert_then_remove_restores_bytes() {
    let initial = initial_rff();
    let (tmp, mut arc) = open_rff(&initial);
    let h = arc
        .insert(
            None,
            "three.dat",
            17,
            FILETYPE_GENERIC,
            EntryAttrs::ENCRYPTED,
        )
        .unwrap();
    arc.write_file(&h, b"This is three.dat").unwrap();
    arc.remove(&h).unwrap();
    assert_eq!(flushed_bytes(tmp, arc), initial);
}

#[test]
fn test_version_downgrade_refused_while_encrypted() {
    let (_tmp, mut arc) = open_rff(&initial_rff());
    let err = arc.set_attribute(0, AttrValue::Enum(0));
    assert!(err.is_err());
    assert_eq!(arc.attributes()[0].value, AttrValue::Enum(1));
    assert!(!arc.is_poisoned());
}

#[test]
fn test_plain_v2_roundtrip() {
    // create() makes a v2.0 container: no FAT encryption at all
    let tmp = NamedTempFile::new().unwrap();
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let mut arc = RffBlood
        .create(Box::new(file), &mut SuppData::default())
        .unwrap();
    let h = arc
        .insert(None, "HELLO.TXT", 5, FILETYPE_GENERIC, EntryAttrs::empty())
        .unwrap();
    arc.write_file(&h, b"hello").unwrap();
    arc.flush().unwrap();
    drop(arc);

    let bytes = std::fs::read(tmp.path()).unwrap();
    assert_eq!(&bytes[..4], b"RFF\x1a");
    assert_eq!(&bytes[4..6], &0x0200u16.to_le_bytes());
    // plaintext data and FAT
    assert_eq!(&bytes[0x20..0x25], b"hello");
    assert_eq!(&bytes[0x25 + 33..0x25 + 36], b"TXT");
    assert_eq!(&bytes[0x25 + 36..0x25 + 41], b"HELLO");

    // and it reloads
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(tmp.path())
        .unwrap();
    let mut arc = RffBlood
        .open(Box::new(file), &mut SuppData::default())
        .unwrap();
    let h = arc.find("HELLO.TXT").unwrap();
    assert_eq!(arc.read_file(&h).unwrap(), b"hello");
}
