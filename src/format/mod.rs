//! Format registry: per-container strategies and probe-based open
//!
//! Every supported container implements [`Format`]: a cheap signature
//! check, an `open` that parses the header and FAT into an engine
//! [`Archive`], and a `create` that writes a minimal empty container.
//! [`probe`] tries every registered format against a stream and picks
//! the most confident match, leaving the forced-open decision to the
//! caller for the weaker confidence levels.

mod dat_bash;
mod dat_riptide;
mod epf_lionking;
mod gd_doofus;
mod grp_duke3d;
mod pod_tv;
mod res_stellar7;
mod rff_blood;
mod wad_doom;

pub use dat_bash::DatBash;
pub use dat_riptide::DatRiptide;
pub use epf_lionking::EpfLionKing;
pub use gd_doofus::GdDoofus;
pub use grp_duke3d::GrpDuke3d;
pub use pod_tv::PodTv;
pub use res_stellar7::ResStellar7;
pub use rff_blood::RffBlood;
pub use wad_doom::WadDoom;

use crate::archive::Archive;
use crate::error::Result;
use crate::io::Backing;
use std::io::Write;

/// How confident a signature check is that a stream belongs to a
/// format. `Unsure` and `PossiblyYes` are not errors; the caller
/// decides whether to force-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Certainty {
    DefinitelyYes,
    PossiblyYes,
    Unsure,
    DefinitelyNo,
}

impl Certainty {
    fn weight(self) -> u8 {
        match self {
            Certainty::DefinitelyYes => 3,
            Certainty::PossiblyYes => 2,
            Certainty::Unsure => 1,
            Certainty::DefinitelyNo => 0,
        }
    }
}

/// Kinds of supplemental streams a format may need besides the
/// archive itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppItem {
    /// The FAT lives in a separate stream (typically the game binary).
    Fat,
}

/// Hint returned by [`Format::required_supps`]: which supplemental
/// stream to open and the conventional filename to look for.
#[derive(Debug, Clone)]
pub struct SuppHint {
    pub item: SuppItem,
    pub filename: String,
}

/// Supplemental streams passed into [`Format::open`].
#[derive(Default)]
pub struct SuppData {
    pub fat: Option<Box<dyn Backing>>,
}

/// One container format: identification metadata, a signature check,
/// and the ways into an [`Archive`].
pub trait Format {
    /// Stable machine-readable identifier, e.g. `rff-blood`.
    fn code(&self) -> &'static str;

    /// Human-readable format name.
    fn name(&self) -> &'static str;

    /// Conventional file extensions, lowercase, no dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Games known to ship archives in this format.
    fn games(&self) -> &'static [&'static str];

    /// Classify `content` from its first bytes.
    fn certainty(&self, content: &mut dyn Backing) -> Result<Certainty>;

    /// Parse an existing archive.
    fn open(&self, content: Box<dyn Backing>, supp: &mut SuppData) -> Result<Archive>;

    /// Write a minimal empty archive into `content` and open it.
    fn create(&self, content: Box<dyn Backing>, supp: &mut SuppData) -> Result<Archive>;

    /// Supplemental streams this format needs, with conventional
    /// filenames derived from the archive's own.
    fn required_supps(&self, _archive_filename: &str) -> Vec<SuppHint> {
        Vec::new()
    }
}

/// All built-in formats. Formats that are hard to tell apart from
/// arbitrary data come last so a confident signature elsewhere wins
/// first.
pub fn registry() -> Vec<Box<dyn Format>> {
    vec![
        Box::new(WadDoom),
        Box::new(GrpDuke3d),
        Box::new(RffBlood),
        Box::new(EpfLionKing),
        Box::new(PodTv),
        Box::new(DatRiptide),
        Box::new(ResStellar7),
        Box::new(DatBash),
        Box::new(GdDoofus),
    ]
}

/// Look a format up by its stable code.
pub fn by_code(code: &str) -> Option<Box<dyn Format>> {
    registry().into_iter().find(|f| f.code() == code)
}

/// Try every registered format and return the most confident match.
/// A `DefinitelyYes` wins immediately; otherwise the best of the
/// weaker answers is returned, or `None` when everything said no.
pub fn probe(content: &mut dyn Backing) -> Result<Option<(Box<dyn Format>, Certainty)>> {
    let mut best: Option<(Box<dyn Format>, Certainty)> = None;
    for format in registry() {
        let c = format.certainty(content)?;
        if c == Certainty::DefinitelyYes {
            return Ok(Some((format, c)));
        }
        let better = match &best {
            None => c.weight() > Certainty::DefinitelyNo.weight(),
            Some((_, b)) => c.weight() > b.weight(),
        };
        if better {
            best = Some((format, c));
        }
    }
    Ok(best)
}

/// Read a fixed-width NUL-padded name field.
pub(crate) fn read_fixed_name<R: std::io::Read>(r: &mut R, len: usize) -> Result<String> {
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Write a name into a fixed-width field, NUL-padded and truncated to
/// the field width.
pub(crate) fn write_fixed_name<W: Write>(w: &mut W, name: &str, len: usize) -> Result<()> {
    let mut buf = vec![0u8; len];
    let bytes = name.as_bytes();
    let n = bytes.len().min(len);
    buf[..n].copy_from_slice(&bytes[..n]);
    w.write_all(&buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryBacking;

    #[test]
    fn test_registry_codes_unique() {
        let formats = registry();
        for (i, a) in formats.iter().enumerate() {
            for b in &formats[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_by_code() {
        assert!(by_code("wad-doom").is_some());
        assert!(by_code("zip-pkware").is_none());
    }

    #[test]
    fn test_probe_rejects_noise() {
        // random-looking bytes shouldn't produce a confident match;
        // the best anyone can say is the Doofus strategy's Unsure
        let noise = vec![
            0x81, 0x02, 0x93, 0x04, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
        ];
        let mut content = MemoryBacking::from_vec(noise);
        let hit = probe(&mut content).unwrap();
        if let Some((_, c)) = hit {
            assert_ne!(c, Certainty::DefinitelyYes);
        }
    }

    #[test]
    fn test_fixed_name_roundtrip() {
        let mut buf = Vec::new();
        write_fixed_name(&mut buf, "ONE.DAT", 8).unwrap();
        assert_eq!(buf, b"ONE.DAT\0");
        let name = read_fixed_name(&mut buf.as_slice(), 8).unwrap();
        assert_eq!(name, "ONE.DAT");

        let mut buf = Vec::new();
        write_fixed_name(&mut buf, "THREE.DAT", 8).unwrap();
        assert_eq!(buf, b"THREE.DA");
    }
}
