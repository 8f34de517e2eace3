use core::fmt;

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::FatError;

pub const SHORT_NAME_LEN: usize = 11;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Raw 11-byte name field, base padded to 8 and extension to 3 with spaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShortName([u8; SHORT_NAME_LEN]);

impl ShortName {
    pub const DOT: ShortName = ShortName(*b".          ");
    pub const DOT_DOT: ShortName = ShortName(*b"..         ");

    pub const fn from_raw(raw: [u8; SHORT_NAME_LEN]) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &[u8; SHORT_NAME_LEN] {
        &self.0
    }

    pub fn new(base: &[u8], ext: &[u8]) -> Option<Self> {
        if base.is_empty() || base.len() > 8 || ext.len() > 3 {
            return None;
        }
        let mut raw = [b' '; SHORT_NAME_LEN];
        raw[..base.len()].copy_from_slice(base);
        raw[8..8 + ext.len()].copy_from_slice(ext);
        Some(Self(raw))
    }

    pub fn base(&self) -> &[u8] {
        trim_end(&self.0[..8])
    }

    pub fn extension(&self) -> &[u8] {
        trim_end(&self.0[8..])
    }

    pub fn is_dot_entry(&self) -> bool {
        *self == Self::DOT || *self == Self::DOT_DOT
    }

    pub fn checksum(&self) -> u8 {
        self.0.iter().fold(0u8, |sum, &b| {
            ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(b)
        })
    }

    /// `BASE.EXT` text, lowering either part as the entry's case flags ask.
    pub fn to_text(&self, lower_base: bool, lower_ext: bool) -> String {
        let mut out = String::with_capacity(12);
        push_part(&mut out, self.base(), lower_base);
        let ext = self.extension();
        if !ext.is_empty() {
            out.push('.');
            push_part(&mut out, ext, lower_ext);
        }
        out
    }

    /// Derives a `XXhhhh~d.EXT` name for `long`, skipping every name `taken` reports.
    pub fn generate<E>(
        long: &str,
        taken: impl Fn(&ShortName) -> bool,
    ) -> Result<ShortName, FatError<E>> {
        let upper = long.trim().to_uppercase();
        let stripped: Vec<char> = upper
            .trim_start_matches('.')
            .chars()
            .filter(|c| *c != ' ')
            .collect();

        let (base, ext) = match stripped.iter().rposition(|c| *c == '.') {
            Some(dot) => (&stripped[..dot], &stripped[dot + 1..]),
            None => (&stripped[..], &[][..]),
        };

        // Inner dots are not 8.3 characters and map to '_' like any other.
        let mut prefix = [b'_'; 2];
        for (slot, c) in prefix.iter_mut().zip(base.iter()) {
            *slot = map_char(*c);
        }
        let ext: Vec<u8> = ext.iter().take(3).map(|c| map_char(*c)).collect();

        // Short extensions stay space padded, never zero padded. The counter is uppercase hex.
        let mut base = [0u8; 8];
        base[..2].copy_from_slice(&prefix);
        base[6] = b'~';
        for tilde in 0..=9u8 {
            base[7] = b'0' + tilde;
            for counter in 0..=0xFFFFu16 {
                for (i, slot) in base[2..6].iter_mut().enumerate() {
                    *slot = HEX[((counter >> (12 - i * 4)) & 0x0F) as usize];
                }
                if let Some(candidate) = ShortName::new(&base, &ext) {
                    if !taken(&candidate) {
                        return Ok(candidate);
                    }
                }
            }
        }
        log::warn!("fat32: short_name_exhausted prefix={:?}", core::str::from_utf8(&prefix));
        Err(FatError::ShortNameExhausted)
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName({:?})", self.to_text(false, false))
    }
}

fn trim_end(raw: &[u8]) -> &[u8] {
    let end = raw.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &raw[..end]
}

fn push_part(out: &mut String, part: &[u8], lower: bool) {
    for &b in part {
        // Bytes above 0x7F are OEM code page; shown as-is through Latin-1.
        let c = b as char;
        out.push(if lower { c.to_ascii_lowercase() } else { c });
    }
}

fn is_valid_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_ascii_uppercase() || "$%'-_@~`!(){}^#&".contains(c)
}

fn map_char(c: char) -> u8 {
    if is_valid_char(c) {
        c as u8
    } else {
        b'_'
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::BTreeSet;

    fn generate(long: &str, taken: &BTreeSet<ShortName>) -> ShortName {
        ShortName::generate::<()>(long, |s| taken.contains(s)).unwrap()
    }

    #[test]
    fn derives_prefix_counter_and_extension() {
        let none = BTreeSet::new();
        assert_eq!(generate("testFile1", &none).to_text(false, false), "TE0000~0");
        assert_eq!(generate("my document.docx", &none).to_text(false, false), "MY0000~0.DOC");
        assert_eq!(generate("...hidden", &none).to_text(false, false), "HI0000~0");
        assert_eq!(generate("a", &none).to_text(false, false), "A_0000~0");
        assert_eq!(generate("é+x.t*t", &none).to_text(false, false), "__0000~0.T_T");
    }

    #[test]
    fn inner_and_leading_dots() {
        let none = BTreeSet::new();
        assert_eq!(generate("a.b.txt", &none).to_text(false, false), "A_0000~0.TXT");
        assert_eq!(generate("x..y", &none).to_text(false, false), "X_0000~0.Y");
        assert_eq!(generate(".a.b", &none).to_text(false, false), "A_0000~0.B");
        assert_eq!(generate("..config.tar.gz", &none).to_text(false, false), "CO0000~0.GZ");
        assert_eq!(generate("name.", &none).to_text(false, false), "NA0000~0");
    }

    #[test]
    fn collisions_advance_counter_then_tilde() {
        let mut taken = BTreeSet::new();
        let first = generate("report.txt", &taken);
        taken.insert(first);
        assert_eq!(generate("Report.TXT", &taken).to_text(false, false), "RE0001~0.TXT");

        let mut full = BTreeSet::new();
        for counter in 0..=0xFFFFu32 {
            let base = alloc::format!("RE{:04X}~0", counter);
            full.insert(ShortName::new(base.as_bytes(), b"TXT").unwrap());
        }
        assert_eq!(generate("report.txt", &full).to_text(false, false), "RE0000~1.TXT");
    }

    #[test]
    fn checksum_matches_reference_value() {
        let name = ShortName::from_raw(*b"README  TXT");
        assert_eq!(name.checksum(), 0x73);
        assert_eq!(name.to_text(true, false), "readme.TXT");
    }

    #[test]
    fn dot_entries() {
        assert!(ShortName::DOT.is_dot_entry());
        assert_eq!(ShortName::DOT_DOT.to_text(false, false), "..");
    }
}
