use std::fs;
use std::path::Path;

use crate::header::{
    FLAG_ZSTD, HEADER_LEN, Header, MAGIC, Section, SectionKind, TocEntry, VERSION, crc32_ieee,
    encode_toc_entry,
};
use crate::reader::{ImageError, Result};
use crate::records::{
    ArenaExtents, AttRec, DimRec, FieldRec, GroupRec, Image, Payload, StorageRec, TypeClassRec, TypeRec,
    VarDataRec, VarRec,
};

/// Options controlling image emission.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterOptions {
    /// Compress the variable data section using zstd (requires `zstd` feature).
    pub zstd: bool,
    /// Compute and embed per‑section CRCs (TOC) and a global footer CRC.
    pub with_crc: bool,
    /// Creation time stored in the header; 0 keeps output byte-for-byte stable.
    pub created_unix: u64,
}

pub(crate) fn push_uvarint(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let mut b = (v & 0x7f) as u8;
        v >>= 7;
        if v != 0 {
            b |= 0x80;
        }
        out.push(b);
        if v == 0 {
            break;
        }
    }
}

fn push_ivarint(v: i64, out: &mut Vec<u8>) {
    push_uvarint(((v << 1) ^ (v >> 63)) as u64, out);
}

fn push_bool(v: bool, out: &mut Vec<u8>) {
    out.push(v as u8);
}

fn push_bytes(b: &[u8], out: &mut Vec<u8>) {
    push_uvarint(b.len() as u64, out);
    out.extend_from_slice(b);
}

fn push_str(s: &str, out: &mut Vec<u8>) {
    push_bytes(s.as_bytes(), out);
}

fn push_opt_u32(v: Option<u32>, out: &mut Vec<u8>) {
    match v {
        Some(v) => {
            out.push(1);
            push_uvarint(v as u64, out);
        }
        None => out.push(0),
    }
}

fn push_u32s(v: &[u32], out: &mut Vec<u8>) {
    push_uvarint(v.len() as u64, out);
    for x in v {
        push_uvarint(*x as u64, out);
    }
}

fn push_payload(p: &Payload, out: &mut Vec<u8>) {
    out.push(p.tag());
    match p {
        Payload::Fixed(bytes) => push_bytes(bytes, out),
        Payload::Strings(strs) => {
            push_uvarint(strs.len() as u64, out);
            for s in strs {
                push_str(s, out);
            }
        }
        Payload::Vlen(runs) => {
            push_uvarint(runs.len() as u64, out);
            for r in runs {
                push_bytes(r, out);
            }
        }
    }
}

fn encode_group(g: &GroupRec, out: &mut Vec<u8>) {
    push_uvarint(g.id as u64, out);
    push_opt_u32(g.parent, out);
    push_str(&g.name, out);
}

fn encode_dim(d: &DimRec, out: &mut Vec<u8>) {
    push_uvarint(d.id as u64, out);
    push_uvarint(d.group as u64, out);
    push_str(&d.name, out);
    push_uvarint(d.len, out);
    push_bool(d.unlimited, out);
}

fn encode_field(f: &FieldRec, out: &mut Vec<u8>) {
    push_str(&f.name, out);
    push_uvarint(f.type_id as u64, out);
    push_uvarint(f.offset, out);
    push_u32s(&f.dims, out);
}

fn encode_type(t: &TypeRec, out: &mut Vec<u8>) {
    push_uvarint(t.id as u64, out);
    push_uvarint(t.group as u64, out);
    push_str(&t.name, out);
    push_uvarint(t.size, out);
    out.push(t.endianness);
    out.push(t.class.tag());
    match &t.class {
        TypeClassRec::Compound { fields } => {
            push_uvarint(fields.len() as u64, out);
            for f in fields {
                encode_field(f, out);
            }
        }
        TypeClassRec::Enum { base, members } => {
            push_uvarint(*base as u64, out);
            push_uvarint(members.len() as u64, out);
            for m in members {
                push_str(&m.name, out);
                push_ivarint(m.value, out);
            }
        }
        TypeClassRec::Vlen { base } => push_uvarint(*base as u64, out),
        TypeClassRec::Opaque => {}
    }
}

fn encode_storage(s: &StorageRec, out: &mut Vec<u8>) {
    push_bool(s.contiguous, out);
    push_uvarint(s.chunksizes.len() as u64, out);
    for c in &s.chunksizes {
        push_uvarint(*c, out);
    }
    push_opt_u32(s.deflate_level, out);
    push_bool(s.shuffle, out);
    push_bool(s.fletcher32, out);
    push_uvarint(s.filters.len() as u64, out);
    for f in &s.filters {
        push_uvarint(f.id as u64, out);
        push_u32s(&f.params, out);
    }
    out.push(s.endianness);
}

fn encode_var(v: &VarRec, out: &mut Vec<u8>) {
    push_uvarint(v.group as u64, out);
    push_uvarint(v.id as u64, out);
    push_str(&v.name, out);
    push_uvarint(v.type_id as u64, out);
    push_u32s(&v.dimids, out);
    encode_storage(&v.storage, out);
    push_bool(v.no_fill, out);
    match &v.fill {
        Some(p) => {
            out.push(1);
            push_payload(p, out);
        }
        None => out.push(0),
    }
}

fn encode_att(a: &AttRec, out: &mut Vec<u8>) {
    push_uvarint(a.group as u64, out);
    push_opt_u32(a.var, out);
    push_uvarint(a.id as u64, out);
    push_str(&a.name, out);
    push_uvarint(a.type_id as u64, out);
    push_uvarint(a.len, out);
    push_payload(&a.value, out);
}

fn encode_data(d: &VarDataRec, out: &mut Vec<u8>) {
    push_uvarint(d.group as u64, out);
    push_uvarint(d.var as u64, out);
    push_bytes(&d.bytes, out);
}

fn encode_extents(e: &ArenaExtents, out: &mut Vec<u8>) {
    push_uvarint(e.groups as u64, out);
    push_uvarint(e.dims as u64, out);
    push_uvarint(e.types as u64, out);
}

fn encode_section<T>(items: &[T], enc: fn(&T, &mut Vec<u8>)) -> Vec<u8> {
    let mut raw = Vec::new();
    for it in items {
        enc(it, &mut raw);
    }
    raw
}

fn append_section(
    file: &mut Vec<u8>,
    toc: &mut Vec<TocEntry>,
    kind: SectionKind,
    count: usize,
    bytes: &[u8],
) {
    let off = file.len() as u64;
    file.extend_from_slice(bytes);
    toc.push(TocEntry {
        kind,
        section: Section {
            off,
            len: bytes.len() as u64,
        },
        count_u32: count as u32,
        crc32_u32: 0,
    });
}

fn data_section(image: &Image, opts: WriterOptions) -> Result<Vec<u8>> {
    let raw = encode_section(&image.data, encode_data);
    let mut out = Vec::with_capacity(raw.len() + 5);
    if opts.zstd {
        #[cfg(feature = "zstd")]
        {
            out.push(1u8); // enc=ZSTD
            let compressed = zstd::encode_all(&raw[..], 0)
                .map_err(|_| ImageError::Corrupt("zstd encode".into()))?;
            out.extend_from_slice(&compressed);
        }
        #[cfg(not(feature = "zstd"))]
        {
            return Err(ImageError::Invalid("zstd feature not enabled"));
        }
    } else {
        out.push(0u8); // enc=RAW
        out.extend_from_slice(&raw);
    }
    Ok(out)
}

/// Encode an image into an in-memory buffer.
pub fn encode(image: &Image, opts: WriterOptions) -> Result<Vec<u8>> {
    if image.groups.iter().filter(|g| g.parent.is_none()).count() > 1 {
        return Err(ImageError::Invalid("image has more than one root group"));
    }

    let mut file = vec![0u8; HEADER_LEN]; // header placeholder
    let mut toc: Vec<TocEntry> = Vec::new();

    let groups = encode_section(&image.groups, encode_group);
    append_section(&mut file, &mut toc, SectionKind::Groups, image.groups.len(), &groups);
    let dims = encode_section(&image.dims, encode_dim);
    append_section(&mut file, &mut toc, SectionKind::Dims, image.dims.len(), &dims);
    let types = encode_section(&image.types, encode_type);
    append_section(&mut file, &mut toc, SectionKind::Types, image.types.len(), &types);
    let vars = encode_section(&image.vars, encode_var);
    append_section(&mut file, &mut toc, SectionKind::Vars, image.vars.len(), &vars);
    let atts = encode_section(&image.atts, encode_att);
    append_section(&mut file, &mut toc, SectionKind::Atts, image.atts.len(), &atts);
    let data = data_section(image, opts)?;
    append_section(&mut file, &mut toc, SectionKind::VarData, image.data.len(), &data);
    if let Some(extents) = &image.extents {
        let mut raw = Vec::new();
        encode_extents(extents, &mut raw);
        append_section(&mut file, &mut toc, SectionKind::Extents, 1, &raw);
    }

    // TOC
    let toc_off = file.len();
    for e in toc.iter_mut() {
        if opts.with_crc {
            let start = e.section.off as usize;
            let end = start + e.section.len as usize;
            e.crc32_u32 = crc32_ieee(&file[start..end]);
        }
    }
    for e in &toc {
        file.extend_from_slice(&encode_toc_entry(e));
    }

    let mut flags: u16 = 0;
    if opts.zstd {
        flags |= FLAG_ZSTD;
    }
    let header = Header {
        magic: *MAGIC,
        version_u16: VERSION,
        flags_u16: flags,
        created_unix64: opts.created_unix,
        toc_off_u64: toc_off as u64,
        toc_len_u32: toc.len() as u32,
        reserved_u32: 0,
    };
    header.write_into(&mut file[..HEADER_LEN]);

    if opts.with_crc {
        let crc = crc32_ieee(&file[..]);
        file.extend_from_slice(&crc.to_le_bytes());
        file.extend_from_slice(crate::header::END_MAGIC);
    }
    Ok(file)
}

/// Convenience helper to write an image file with defaults.
///
/// - `zstd = false`
/// - `with_crc = true`
pub fn write_file<P: AsRef<Path>>(path: P, image: &Image) -> Result<()> {
    write_file_with_options(
        path,
        image,
        WriterOptions {
            zstd: false,
            with_crc: true,
            created_unix: 0,
        },
    )
}

/// Write an image file with explicit [`WriterOptions`].
pub fn write_file_with_options<P: AsRef<Path>>(
    path: P,
    image: &Image,
    opts: WriterOptions,
) -> Result<()> {
    let file = encode(image, opts)?;
    // Atomic write (best-effort)
    let tmp_path = path.as_ref().with_extension("tmp.ncim");
    fs::write(&tmp_path, &file).map_err(ImageError::Io)?;
    fs::rename(&tmp_path, path).map_err(ImageError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uvarint_encoding_boundaries() {
        let mut out = Vec::new();
        push_uvarint(0, &mut out);
        assert_eq!(out, vec![0]);
        out.clear();
        push_uvarint(127, &mut out);
        assert_eq!(out, vec![0x7f]);
        out.clear();
        push_uvarint(128, &mut out);
        assert_eq!(out, vec![0x80, 0x01]);
    }

    #[test]
    fn two_roots_are_invalid() {
        let image = Image {
            groups: vec![
                GroupRec {
                    id: 0,
                    parent: None,
                    name: "/".into(),
                },
                GroupRec {
                    id: 1,
                    parent: None,
                    name: "/".into(),
                },
            ],
            ..Default::default()
        };
        assert!(encode(&image, WriterOptions::default()).is_err());
    }
}
