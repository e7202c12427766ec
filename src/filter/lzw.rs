//! Variable-width LZW codec for the retro compression filters
//!
//! One core implementation parameterized per format variant. Codes are
//! packed MSB-first and grow from `min_width` up to `max_width`; the
//! reserved control codes sit directly above the 256 literals. The
//! Monster Bash variant terminates with an end-of-stream code and
//! freezes the dictionary when full; the EPF variant instead emits a
//! reset code and starts the dictionary over.
//!
//! Encoder and decoder derive the code width from the same quantity
//! (the number of codes allocated before the current one), which keeps
//! the two sides in lockstep across width changes and resets.

use super::{Filter, FilterParams};
use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct LzwParams {
    min_width: u8,
    max_width: u8,
    eof_code: Option<u16>,
    reset_code: Option<u16>,
}

pub struct Lzw {
    name: &'static str,
    params: LzwParams,
}

impl Lzw {
    /// Monster Bash .DAT variant: explicit end-of-stream code, frozen
    /// dictionary once full.
    pub fn bash() -> Self {
        Lzw {
            name: "lzw-bash",
            params: LzwParams {
                min_width: 9,
                max_width: 12,
                eof_code: Some(256),
                reset_code: None,
            },
        }
    }

    /// EPF variant: dictionary reset code, no end marker.
    pub fn epfs() -> Self {
        Lzw {
            name: "lzw-epfs",
            params: LzwParams {
                min_width: 9,
                max_width: 12,
                eof_code: None,
                reset_code: Some(256),
            },
        }
    }

    /// First code index past the literals and reserved control codes.
    fn first_free(&self) -> u16 {
        let p = &self.params;
        256 + p.eof_code.is_some() as u16 + p.reset_code.is_some() as u16
    }

    fn corrupt(&self, msg: &str) -> Error {
        Error::FilterFailed {
            name: self.name.to_string(),
            msg: msg.to_string(),
        }
    }
}

/// Smallest width whose code space holds `n` codes, clamped to the
/// variant's range.
fn needed_width(n: usize, min: u8, max: u8) -> u8 {
    let mut w = min;
    while w < max && (1usize << w) < n {
        w += 1;
    }
    w
}

struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    nbits: u32,
}

impl BitWriter {
    fn new() -> Self {
        BitWriter {
            out: Vec::new(),
            acc: 0,
            nbits: 0,
        }
    }

    fn put(&mut self, code: u16, width: u8) {
        self.acc = (self.acc << width) | code as u32;
        self.nbits += width as u32;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.out.push(((self.acc >> self.nbits) & 0xff) as u8);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            self.out.push(((self.acc << (8 - self.nbits)) & 0xff) as u8);
        }
        self.out
    }
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    acc: u32,
    nbits: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            pos: 0,
            acc: 0,
            nbits: 0,
        }
    }

    fn get(&mut self, width: u8) -> Option<u16> {
        while self.nbits < width as u32 {
            if self.pos >= self.data.len() {
                return None;
            }
            self.acc = (self.acc << 8) | self.data[self.pos] as u32;
            self.pos += 1;
            self.nbits += 8;
        }
        self.nbits -= width as u32;
        Some(((self.acc >> self.nbits) & ((1u32 << width) - 1)) as u16)
    }
}

impl Filter for Lzw {
    fn decode(&self, stored: &[u8], _params: &FilterParams) -> Result<Vec<u8>> {
        let p = self.params;
        let first_free = self.first_free() as usize;
        let mut r = BitReader::new(stored);
        let mut out = Vec::new();

        // literals plus placeholders for the reserved control codes
        let mut table: Vec<Vec<u8>> = (0..first_free)
            .map(|c| if c < 256 { vec![c as u8] } else { Vec::new() })
            .collect();
        let mut prev: Option<u16> = None;

        loop {
            let n = table.len() + prev.is_some() as usize;
            let width = needed_width(n, p.min_width, p.max_width);
            let Some(code) = r.get(width) else { break };

            if p.eof_code == Some(code) {
                break;
            }
            if p.reset_code == Some(code) {
                table.truncate(first_free);
                prev = None;
                continue;
            }

            let seq = if (code as usize) < table.len() {
                if (256..first_free).contains(&(code as usize)) {
                    return Err(self.corrupt("reserved code in data position"));
                }
                table[code as usize].clone()
            } else if code as usize == table.len() {
                // the code being defined right now: cScSc case
                let pv = prev.ok_or_else(|| self.corrupt("forward reference at start"))?;
                let mut s = table[pv as usize].clone();
                s.push(table[pv as usize][0]);
                s
            } else {
                return Err(self.corrupt("code past end of dictionary"));
            };

            if let Some(pv) = prev {
                if table.len() < (1usize << p.max_width) {
                    let mut entry = table[pv as usize].clone();
                    entry.push(seq[0]);
                    table.push(entry);
                }
            }

            out.extend_from_slice(&seq);
            prev = Some(code);
        }
        Ok(out)
    }

    fn encode(&self, real: &[u8], _params: &FilterParams) -> Result<Vec<u8>> {
        let p = self.params;
        let first_free = self.first_free();
        let full = 1usize << p.max_width;
        let mut w = BitWriter::new();
        let mut dict: HashMap<(u16, u8), u16> = HashMap::new();
        let mut next = first_free;
        let mut cur: Option<u16> = None;

        for &b in real {
            let Some(c) = cur else {
                cur = Some(b as u16);
                continue;
            };
            if let Some(&code) = dict.get(&(c, b)) {
                cur = Some(code);
                continue;
            }
            let width = needed_width(next as usize, p.min_width, p.max_width);
            w.put(c, width);
            if (next as usize) < full {
                dict.insert((c, b), next);
                next += 1;
            } else if let Some(reset) = p.reset_code {
                w.put(reset, needed_width(next as usize, p.min_width, p.max_width));
                dict.clear();
                next = first_free;
            }
            // else: dictionary frozen at max size
            cur = Some(b as u16);
        }

        if let Some(c) = cur {
            let width = needed_width(next as usize, p.min_width, p.max_width);
            w.put(c, width);
            if (next as usize) < full {
                next += 1;
            }
        }
        if let Some(eof) = p.eof_code {
            w.put(eof, needed_width(next as usize, p.min_width, p.max_width));
        }
        Ok(w.finish())
    }
}
