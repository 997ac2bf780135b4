use ncimage::{
    DimRec, GroupRec, Image,
    reader::{ImageError, ImageFile},
    writer::write_file,
};

#[test]
fn detects_crc_mismatch() {
    let image = Image {
        groups: vec![GroupRec {
            id: 0,
            parent: None,
            name: "/".into(),
        }],
        dims: vec![DimRec {
            id: 0,
            group: 0,
            name: "lat".into(),
            len: 180,
            unlimited: false,
        }],
        ..Default::default()
    };
    let mut path = std::env::temp_dir();
    path.push("ncimage_crc_bad.ncim");
    write_file(&path, &image).unwrap();

    // Corrupt a byte inside the first section (but not the header)
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = 33.min(bytes.len() - 17); // before footer
    bytes[pos] ^= 0xFF; // flip
    std::fs::write(&path, &bytes).unwrap();

    let err = ImageFile::open(&path).unwrap_err();
    let _ = std::fs::remove_file(&path);
    match err {
        ImageError::Corrupt(m) => assert!(m.contains("CRC")),
        _ => panic!("expected CRC mismatch error"),
    }
}
