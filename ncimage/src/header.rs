//! Header, TOC, and section kinds for NCIM images.

/// Leading magic of every image.
pub const MAGIC: &[u8; 4] = b"NCIM";
/// Trailing footer magic following the global CRC.
pub const END_MAGIC: &[u8; 12] = b"NCIM_ENDMARK";
/// Current format version written by this crate.
pub const VERSION: u16 = 1;
/// Header flag: the variable data section is zstd-compressed.
pub const FLAG_ZSTD: u16 = 1 << 1;

pub const HEADER_LEN: usize = 32;
pub const TOC_ENTRY_LEN: usize = 32;
pub const FOOTER_LEN: usize = 16;

/// Enumerates the kinds of sections in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionKind {
    Groups = 1,
    Dims = 2,
    Types = 3,
    Vars = 4,
    Atts = 5,
    VarData = 6,
    /// Arena lengths. Optional; a reader falls back to the largest stored ids.
    Extents = 7,
}

impl SectionKind {
    /// Sections every image carries.
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Groups,
        SectionKind::Dims,
        SectionKind::Types,
        SectionKind::Vars,
        SectionKind::Atts,
        SectionKind::VarData,
    ];

    /// Convert a little‑endian `u16` value into a kind, if recognized.
    pub fn from_u16(v: u16) -> Option<Self> {
        use SectionKind::*;
        Some(match v {
            1 => Groups,
            2 => Dims,
            3 => Types,
            4 => Vars,
            5 => Atts,
            6 => VarData,
            7 => Extents,
            _ => return None,
        })
    }
}

/// Byte span for a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub off: u64,
    pub len: u64,
}

/// Entry in the table of contents mapping a kind to its section.
#[derive(Debug, Clone, Copy)]
pub struct TocEntry {
    pub kind: SectionKind,
    pub section: Section,
    /// Number of records in the section.
    pub count_u32: u32,
    pub crc32_u32: u32, // 0 if absent
}

/// Parsed fixed‑size image header.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub magic: [u8; 4],
    pub version_u16: u16,
    pub flags_u16: u16,
    pub created_unix64: u64,
    pub toc_off_u64: u64,
    pub toc_len_u32: u32,
    pub reserved_u32: u32,
}

fn le_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn le_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn le_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

impl Header {
    /// Parse a header from the first 32 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);
        Some(Header {
            magic,
            version_u16: le_u16(buf, 4),
            flags_u16: le_u16(buf, 6),
            created_unix64: le_u64(buf, 8),
            toc_off_u64: le_u64(buf, 16),
            toc_len_u32: le_u32(buf, 24),
            reserved_u32: le_u32(buf, 28),
        })
    }

    /// Serialize into the first 32 bytes of `buf`.
    pub fn write_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.version_u16.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags_u16.to_le_bytes());
        buf[8..16].copy_from_slice(&self.created_unix64.to_le_bytes());
        buf[16..24].copy_from_slice(&self.toc_off_u64.to_le_bytes());
        buf[24..28].copy_from_slice(&self.toc_len_u32.to_le_bytes());
        buf[28..32].copy_from_slice(&self.reserved_u32.to_le_bytes());
    }

    pub fn is_zstd(&self) -> bool {
        self.flags_u16 & FLAG_ZSTD != 0
    }
}

/// Parse the TOC entries referenced by `hdr`.
pub fn parse_toc(buf: &[u8], hdr: &Header) -> Option<Vec<TocEntry>> {
    let toc_off = hdr.toc_off_u64 as usize;
    let n = hdr.toc_len_u32 as usize;
    let need = toc_off.checked_add(n.checked_mul(TOC_ENTRY_LEN)?)?;
    if need > buf.len() {
        return None;
    }

    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let off = toc_off + i * TOC_ENTRY_LEN;
        let kind = SectionKind::from_u16(le_u16(buf, off))?;
        // reserved_u16 at off+2
        out.push(TocEntry {
            kind,
            section: Section {
                off: le_u64(buf, off + 4),
                len: le_u64(buf, off + 12),
            },
            count_u32: le_u32(buf, off + 20),
            crc32_u32: le_u32(buf, off + 24),
        });
    }
    Some(out)
}

/// Serialize one TOC entry.
pub fn encode_toc_entry(e: &TocEntry) -> [u8; TOC_ENTRY_LEN] {
    let mut ent = [0u8; TOC_ENTRY_LEN];
    ent[0..2].copy_from_slice(&(e.kind as u16).to_le_bytes());
    ent[4..12].copy_from_slice(&e.section.off.to_le_bytes());
    ent[12..20].copy_from_slice(&e.section.len.to_le_bytes());
    ent[20..24].copy_from_slice(&e.count_u32.to_le_bytes());
    ent[24..28].copy_from_slice(&e.crc32_u32.to_le_bytes());
    ent
}

/// True if `section` lies entirely within a buffer of `buf_len` bytes.
pub fn section_in_bounds(buf_len: usize, section: Section) -> bool {
    let start = section.off as usize;
    let len = section.len as usize;
    start <= buf_len && start.saturating_add(len) <= buf_len
}

/// Compute IEEE CRC‑32.
pub fn crc32_ieee(data: &[u8]) -> u32 {
    let mut crc: u32 = 0xFFFF_FFFF;
    for &b in data {
        let mut x = (crc ^ (b as u32)) & 0xFF;
        for _ in 0..8 {
            let lsb = x & 1;
            x >>= 1;
            if lsb != 0 {
                x ^= 0xEDB88320;
            }
        }
        crc = (crc >> 8) ^ x;
    }
    crc ^ 0xFFFF_FFFF
}

/// Parse the optional 16‑byte footer containing the global CRC and magic.
pub fn parse_footer(buf: &[u8]) -> Option<(u32, [u8; 12])> {
    if buf.len() < HEADER_LEN + FOOTER_LEN {
        return None;
    }
    let base = buf.len() - FOOTER_LEN;
    let mut magic = [0u8; 12];
    magic.copy_from_slice(&buf[base + 4..base + FOOTER_LEN]);
    if &magic != END_MAGIC {
        return None;
    }
    Some((le_u32(buf, base), magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_matches_reference_vector() {
        assert_eq!(crc32_ieee(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32_ieee(b""), 0);
    }

    #[test]
    fn header_write_then_parse() {
        let hdr = Header {
            magic: *MAGIC,
            version_u16: VERSION,
            flags_u16: FLAG_ZSTD,
            created_unix64: 1_700_000_000,
            toc_off_u64: 96,
            toc_len_u32: 6,
            reserved_u32: 0,
        };
        let mut buf = [0u8; HEADER_LEN];
        hdr.write_into(&mut buf);
        let back = Header::parse(&buf).unwrap();
        assert_eq!(&back.magic, MAGIC);
        assert!(back.is_zstd());
        assert_eq!(back.toc_off_u64, 96);
        assert_eq!(back.toc_len_u32, 6);
    }

    #[test]
    fn unknown_section_kind_is_rejected() {
        assert_eq!(SectionKind::from_u16(6), Some(SectionKind::VarData));
        assert_eq!(SectionKind::from_u16(7), Some(SectionKind::Extents));
        assert_eq!(SectionKind::from_u16(0), None);
        assert_eq!(SectionKind::from_u16(99), None);
    }
}
