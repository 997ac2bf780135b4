//! Reader for NCIM images: open, validate, and decode records.
//!
//! The primary entry point is [`ImageFile`]. Use it to open an image on disk
//! (or wrap bytes already in memory) and get at the decoded [`Image`].
//!
//! ```no_run
//! use ncimage::ImageFile;
//! use std::path::Path;
//!
//! let f = ImageFile::open(Path::new("example.ncim")).expect("open");
//! for g in &f.image().groups {
//!     println!("group {} ({})", g.name, g.id);
//! }
//! ```

use std::{fmt, fs, path::Path};

use crate::header::{
    END_MAGIC, Header, MAGIC, Section, SectionKind, TocEntry, crc32_ieee, parse_footer, parse_toc,
    section_in_bounds,
};
use crate::records::{
    ArenaExtents, AttRec, DimRec, FieldRec, FilterRec, GroupRec, Image, MemberRec, Payload, StorageRec,
    TypeClassRec, TypeRec, VarDataRec, VarRec,
};

/// Errors that can arise when parsing or validating an image.
#[derive(Debug)]
pub enum ImageError {
    /// Underlying I/O error.
    Io(std::io::Error),
    /// Structural problem with inputs or unsupported feature.
    Invalid(&'static str),
    /// The image failed an integrity or bounds check.
    Corrupt(String),
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Io(e) => write!(f, "{}", e),
            ImageError::Invalid(m) => write!(f, "{}", m),
            ImageError::Corrupt(m) => write!(f, "{}", m),
        }
    }
}
impl std::error::Error for ImageError {}
impl From<std::io::Error> for ImageError {
    fn from(e: std::io::Error) -> Self {
        ImageError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ImageError>;

#[derive(Debug)]
enum Backing {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mmap(memmap2::Mmap),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Owned(v) => v.as_slice(),
            #[cfg(feature = "mmap")]
            Backing::Mmap(m) => &m[..],
        }
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| ImageError::Corrupt("unexpected end of section".into()))?;
        self.pos += 1;
        Ok(b)
    }

    fn uvarint(&mut self) -> Result<u64> {
        let mut v: u64 = 0;
        let mut shift = 0u32;
        loop {
            let b = self.u8()?;
            if shift >= 64 {
                return Err(ImageError::Corrupt("varint overflow".into()));
            }
            v |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
            shift += 7;
        }
    }

    fn u32(&mut self) -> Result<u32> {
        u32::try_from(self.uvarint()?).map_err(|_| ImageError::Corrupt("id exceeds u32".into()))
    }

    fn ivarint(&mut self) -> Result<i64> {
        let z = self.uvarint()?;
        Ok(((z >> 1) as i64) ^ -((z & 1) as i64))
    }

    fn bool(&mut self) -> Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ImageError::Corrupt("bad boolean".into())),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let n = self.uvarint()? as usize;
        let end = self
            .pos
            .checked_add(n)
            .filter(|e| *e <= self.buf.len())
            .ok_or_else(|| ImageError::Corrupt("byte run out of bounds".into()))?;
        let out = self.buf[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    fn string(&mut self) -> Result<String> {
        String::from_utf8(self.bytes()?).map_err(|_| ImageError::Corrupt("invalid utf-8".into()))
    }

    fn opt_u32(&mut self) -> Result<Option<u32>> {
        if self.bool()? {
            Ok(Some(self.u32()?))
        } else {
            Ok(None)
        }
    }

    fn u32s(&mut self) -> Result<Vec<u32>> {
        let n = self.uvarint()? as usize;
        let mut out = Vec::with_capacity(n.min(1024));
        for _ in 0..n {
            out.push(self.u32()?);
        }
        Ok(out)
    }

    fn payload(&mut self) -> Result<Payload> {
        match self.u8()? {
            1 => Ok(Payload::Fixed(self.bytes()?)),
            2 => {
                let n = self.uvarint()? as usize;
                let mut strs = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    strs.push(self.string()?);
                }
                Ok(Payload::Strings(strs))
            }
            3 => {
                let n = self.uvarint()? as usize;
                let mut runs = Vec::with_capacity(n.min(1024));
                for _ in 0..n {
                    runs.push(self.bytes()?);
                }
                Ok(Payload::Vlen(runs))
            }
            _ => Err(ImageError::Corrupt("unknown payload tag".into())),
        }
    }
}

fn decode_group(c: &mut Cursor) -> Result<GroupRec> {
    Ok(GroupRec {
        id: c.u32()?,
        parent: c.opt_u32()?,
        name: c.string()?,
    })
}

fn decode_dim(c: &mut Cursor) -> Result<DimRec> {
    Ok(DimRec {
        id: c.u32()?,
        group: c.u32()?,
        name: c.string()?,
        len: c.uvarint()?,
        unlimited: c.bool()?,
    })
}

fn decode_field(c: &mut Cursor) -> Result<FieldRec> {
    Ok(FieldRec {
        name: c.string()?,
        type_id: c.u32()?,
        offset: c.uvarint()?,
        dims: c.u32s()?,
    })
}

fn decode_type(c: &mut Cursor) -> Result<TypeRec> {
    let id = c.u32()?;
    let group = c.u32()?;
    let name = c.string()?;
    let size = c.uvarint()?;
    let endianness = c.u8()?;
    let class = match c.u8()? {
        1 => {
            let n = c.uvarint()? as usize;
            let mut fields = Vec::with_capacity(n.min(1024));
            for _ in 0..n {
                fields.push(decode_field(c)?);
            }
            TypeClassRec::Compound { fields }
        }
        2 => {
            let base = c.u32()?;
            let n = c.uvarint()? as usize;
            let mut members = Vec::with_capacity(n.min(1024));
            for _ in 0..n {
                members.push(MemberRec {
                    name: c.string()?,
                    value: c.ivarint()?,
                });
            }
            TypeClassRec::Enum { base, members }
        }
        3 => TypeClassRec::Vlen { base: c.u32()? },
        4 => TypeClassRec::Opaque,
        _ => return Err(ImageError::Corrupt("unknown type class".into())),
    };
    Ok(TypeRec {
        id,
        group,
        name,
        size,
        endianness,
        class,
    })
}

fn decode_storage(c: &mut Cursor) -> Result<StorageRec> {
    let contiguous = c.bool()?;
    let n = c.uvarint()? as usize;
    let mut chunksizes = Vec::with_capacity(n.min(64));
    for _ in 0..n {
        chunksizes.push(c.uvarint()?);
    }
    let deflate_level = c.opt_u32()?;
    let shuffle = c.bool()?;
    let fletcher32 = c.bool()?;
    let n = c.uvarint()? as usize;
    let mut filters = Vec::with_capacity(n.min(64));
    for _ in 0..n {
        filters.push(FilterRec {
            id: c.u32()?,
            params: c.u32s()?,
        });
    }
    let endianness = c.u8()?;
    Ok(StorageRec {
        contiguous,
        chunksizes,
        deflate_level,
        shuffle,
        fletcher32,
        filters,
        endianness,
    })
}

fn decode_var(c: &mut Cursor) -> Result<VarRec> {
    let group = c.u32()?;
    let id = c.u32()?;
    let name = c.string()?;
    let type_id = c.u32()?;
    let dimids = c.u32s()?;
    let storage = decode_storage(c)?;
    let no_fill = c.bool()?;
    let fill = if c.bool()? { Some(c.payload()?) } else { None };
    Ok(VarRec {
        group,
        id,
        name,
        type_id,
        dimids,
        storage,
        no_fill,
        fill,
    })
}

fn decode_att(c: &mut Cursor) -> Result<AttRec> {
    Ok(AttRec {
        group: c.u32()?,
        var: c.opt_u32()?,
        id: c.u32()?,
        name: c.string()?,
        type_id: c.u32()?,
        len: c.uvarint()?,
        value: c.payload()?,
    })
}

fn decode_data(c: &mut Cursor) -> Result<VarDataRec> {
    Ok(VarDataRec {
        group: c.u32()?,
        var: c.u32()?,
        bytes: c.bytes()?,
    })
}

fn decode_extents(c: &mut Cursor) -> Result<ArenaExtents> {
    Ok(ArenaExtents {
        groups: c.u32()?,
        dims: c.u32()?,
        types: c.u32()?,
    })
}

fn decode_records<T>(
    buf: &[u8],
    entry: &TocEntry,
    dec: fn(&mut Cursor) -> Result<T>,
) -> Result<Vec<T>> {
    let mut c = Cursor::new(buf);
    let mut out = Vec::with_capacity((entry.count_u32 as usize).min(1 << 16));
    while !c.is_done() {
        out.push(dec(&mut c)?);
    }
    if out.len() != entry.count_u32 as usize {
        return Err(ImageError::Corrupt(format!(
            "section {:?} holds {} records, TOC says {}",
            entry.kind,
            out.len(),
            entry.count_u32
        )));
    }
    Ok(out)
}

fn section_bytes(data: &[u8], s: Section) -> &[u8] {
    let start = s.off as usize;
    &data[start..start + s.len as usize]
}

fn inflate_data_section(raw: &[u8]) -> Result<Vec<u8>> {
    let (enc, body) = raw
        .split_first()
        .ok_or_else(|| ImageError::Corrupt("empty data section".into()))?;
    match enc {
        0 => Ok(body.to_vec()),
        1 => {
            #[cfg(feature = "zstd")]
            {
                zstd::decode_all(body).map_err(|_| ImageError::Corrupt("zstd decode".into()))
            }
            #[cfg(not(feature = "zstd"))]
            {
                Err(ImageError::Invalid("zstd feature not enabled"))
            }
        }
        _ => Err(ImageError::Corrupt("unknown data encoding".into())),
    }
}

/// Validate header, TOC, section bounds and CRCs; returns the parsed header and TOC.
fn validate(data: &[u8]) -> Result<(Header, Vec<TocEntry>)> {
    let header = Header::parse(data).ok_or(ImageError::Invalid("short or invalid header"))?;
    if &header.magic != MAGIC {
        return Err(ImageError::Invalid("bad magic"));
    }
    if header.toc_off_u64 as usize > data.len() {
        return Err(ImageError::Corrupt("TOC offset out of bounds".into()));
    }
    let toc =
        parse_toc(data, &header).ok_or_else(|| ImageError::Corrupt("TOC parse failed".into()))?;
    for e in &toc {
        if !section_in_bounds(data.len(), e.section) {
            return Err(ImageError::Corrupt(format!(
                "section {:?} out of bounds",
                e.kind
            )));
        }
        if e.crc32_u32 != 0 {
            let got = crc32_ieee(section_bytes(data, e.section));
            if got != e.crc32_u32 {
                return Err(ImageError::Corrupt("section CRC mismatch".into()));
            }
        }
    }
    // Validate TOC ordering by offset and detect overlaps
    let mut spans: Vec<(u64, u64)> = toc.iter().map(|e| (e.section.off, e.section.len)).collect();
    spans.sort_by_key(|(off, _)| *off);
    for w in spans.windows(2) {
        let (a_off, a_len) = w[0];
        let (b_off, _b_len) = w[1];
        if a_off + a_len > b_off {
            return Err(ImageError::Corrupt("TOC sections overlap or unsorted".into()));
        }
    }
    // Footer/global CRC
    if let Some((footer_crc, magic)) = parse_footer(data) {
        if &magic != END_MAGIC {
            return Err(ImageError::Corrupt("bad footer magic".into()));
        }
        let got = crc32_ieee(&data[..data.len() - 16]);
        if got != footer_crc {
            return Err(ImageError::Corrupt("global CRC mismatch".into()));
        }
    }
    Ok((header, toc))
}

/// Decode a complete image from bytes.
pub fn decode(data: &[u8]) -> Result<Image> {
    let (_, toc) = validate(data)?;
    decode_validated(data, &toc)
}

fn decode_validated(data: &[u8], toc: &[TocEntry]) -> Result<Image> {
    let need = |k: SectionKind| -> Result<&TocEntry> {
        toc.iter()
            .find(|e| e.kind == k)
            .ok_or(ImageError::Invalid("missing required section"))
    };
    let e = need(SectionKind::Groups)?;
    let groups = decode_records(section_bytes(data, e.section), e, decode_group)?;
    let e = need(SectionKind::Dims)?;
    let dims = decode_records(section_bytes(data, e.section), e, decode_dim)?;
    let e = need(SectionKind::Types)?;
    let types = decode_records(section_bytes(data, e.section), e, decode_type)?;
    let e = need(SectionKind::Vars)?;
    let vars = decode_records(section_bytes(data, e.section), e, decode_var)?;
    let e = need(SectionKind::Atts)?;
    let atts = decode_records(section_bytes(data, e.section), e, decode_att)?;
    let e = need(SectionKind::VarData)?;
    let raw = inflate_data_section(section_bytes(data, e.section))?;
    let vardata = decode_records(&raw, e, decode_data)?;
    let extents = match toc.iter().find(|e| e.kind == SectionKind::Extents) {
        Some(e) => decode_records(section_bytes(data, e.section), e, decode_extents)?
            .into_iter()
            .next(),
        None => None,
    };
    Ok(Image {
        groups,
        dims,
        types,
        vars,
        atts,
        data: vardata,
        extents,
    })
}

/// Opened image. Holds the validated bytes alongside the decoded records.
#[derive(Debug)]
pub struct ImageFile {
    backing: Backing,
    header: Header,
    toc: Vec<TocEntry>,
    image: Image,
}

impl ImageFile {
    /// Open and validate an image from disk.
    ///
    /// Performs bounds checks, TOC validation, and optional section/global CRCs.
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Validate and decode an image that already lives in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let (header, toc) = validate(&data)?;
        let image = decode_validated(&data, &toc)?;
        Ok(Self {
            backing: Backing::Owned(data),
            header,
            toc,
            image,
        })
    }

    #[cfg(feature = "mmap")]
    /// Open and validate an image using `memmap2` for zero‑copy access.
    ///
    /// Enabled with the `mmap` feature.
    pub fn open_mmap(path: &Path) -> Result<Self> {
        use std::fs::File;
        let f = File::open(path)?;
        let mmap = unsafe { memmap2::MmapOptions::new().map(&f) }.map_err(ImageError::Io)?;
        let (header, toc) = validate(&mmap)?;
        let image = decode_validated(&mmap, &toc)?;
        Ok(Self {
            backing: Backing::Mmap(mmap),
            header,
            toc,
            image,
        })
    }

    /// Returns the parsed image header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns the parsed table of contents (TOC).
    pub fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    /// Finds a section by kind and returns its byte span, if present.
    pub fn section(&self, kind: SectionKind) -> Option<Section> {
        self.toc.iter().find(|e| e.kind == kind).map(|e| e.section)
    }

    /// Total size of the image in bytes.
    pub fn len(&self) -> usize {
        self.backing.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn into_image(self) -> Image {
        self.image
    }
}
