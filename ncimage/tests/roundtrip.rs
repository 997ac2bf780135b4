use ncimage::{
    ArenaExtents, AttRec, DimRec, FieldRec, GroupRec, Image, MemberRec, Payload, StorageRec, TypeClassRec,
    TypeRec, VarDataRec, VarRec,
    reader::ImageFile,
    writer::{WriterOptions, encode, write_file},
};

fn sample_image() -> Image {
    Image {
        groups: vec![
            GroupRec {
                id: 0,
                parent: None,
                name: "/".into(),
            },
            GroupRec {
                id: 1,
                parent: Some(0),
                name: "forecast".into(),
            },
        ],
        dims: vec![
            DimRec {
                id: 0,
                group: 0,
                name: "x".into(),
                len: 10,
                unlimited: false,
            },
            DimRec {
                id: 1,
                group: 0,
                name: "time".into(),
                len: 3,
                unlimited: true,
            },
        ],
        types: vec![
            TypeRec {
                id: 32,
                group: 0,
                name: "obs_t".into(),
                size: 12,
                endianness: 0,
                class: TypeClassRec::Compound {
                    fields: vec![
                        FieldRec {
                            name: "temp".into(),
                            type_id: 5,
                            offset: 0,
                            dims: vec![],
                        },
                        FieldRec {
                            name: "when".into(),
                            type_id: 10,
                            offset: 4,
                            dims: vec![],
                        },
                    ],
                },
            },
            TypeRec {
                id: 33,
                group: 0,
                name: "cloud_t".into(),
                size: 1,
                endianness: 0,
                class: TypeClassRec::Enum {
                    base: 7,
                    members: vec![
                        MemberRec {
                            name: "clear".into(),
                            value: 0,
                        },
                        MemberRec {
                            name: "overcast".into(),
                            value: -3,
                        },
                    ],
                },
            },
        ],
        vars: vec![VarRec {
            group: 0,
            id: 0,
            name: "obs".into(),
            type_id: 32,
            dimids: vec![1, 0],
            storage: StorageRec {
                contiguous: false,
                chunksizes: vec![1, 10],
                deflate_level: Some(4),
                shuffle: true,
                fletcher32: false,
                filters: vec![],
                endianness: 0,
            },
            no_fill: false,
            fill: None,
        }],
        atts: vec![
            AttRec {
                group: 0,
                var: None,
                id: 0,
                name: "sky".into(),
                type_id: 33,
                len: 1,
                value: Payload::Fixed(vec![0]),
            },
            AttRec {
                group: 0,
                var: Some(0),
                id: 0,
                name: "units".into(),
                type_id: 12,
                len: 1,
                value: Payload::Strings(vec!["K".into()]),
            },
        ],
        data: vec![VarDataRec {
            group: 0,
            var: 0,
            bytes: vec![1, 2, 3, 4],
        }],
        extents: None,
    }
}

#[test]
fn writer_reader_roundtrip_file() {
    let image = sample_image();
    let mut path = std::env::temp_dir();
    path.push("ncimage_roundtrip.ncim");
    write_file(&path, &image).expect("write");

    let f = ImageFile::open(&path).expect("open");
    assert_eq!(f.image(), &image);
    assert_eq!(f.header().toc_len_u32, 6);

    // helpers see the attached records
    let var_atts = f.image().atts_of(0, Some(0));
    assert_eq!(var_atts.len(), 1);
    assert_eq!(var_atts[0].name, "units");
    assert_eq!(f.image().data_of(0, 0), Some(&[1u8, 2, 3, 4][..]));

    let _ = std::fs::remove_file(&path);
}

#[test]
fn encode_is_deterministic() {
    let image = sample_image();
    let opts = WriterOptions {
        zstd: false,
        with_crc: true,
        created_unix: 0,
    };
    let a = encode(&image, opts).unwrap();
    let b = encode(&image, opts).unwrap();
    assert_eq!(a, b);
}

#[test]
fn in_memory_bytes_roundtrip_without_crc() {
    let image = sample_image();
    let bytes = encode(
        &image,
        WriterOptions {
            zstd: false,
            with_crc: false,
            created_unix: 42,
        },
    )
    .unwrap();
    let f = ImageFile::from_bytes(bytes).expect("decode");
    assert_eq!(f.header().created_unix64, 42);
    assert_eq!(f.into_image(), image);
}

#[test]
fn arena_extents_survive_when_present() {
    let mut image = sample_image();
    image.extents = Some(ArenaExtents {
        groups: 4,
        dims: 9,
        types: 40,
    });
    let bytes = encode(&image, WriterOptions::default()).unwrap();
    let f = ImageFile::from_bytes(bytes).expect("decode");
    assert_eq!(f.header().toc_len_u32, 7);
    assert_eq!(f.image().extents, image.extents);
}
