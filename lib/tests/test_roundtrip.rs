use anyhow::Result;
use ncmeta::types::TypeClass;
use ncmeta::{
    AtomicType, Config, FieldSpec, MemImage, NcFile, NcValues, TypeClassTag, TypeSpec,
};
use tempdir::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Two dimensions (one unlimited), a two-field compound variable, an enum
/// attribute, and a nested group with its own variable.
fn build_fixture(f: &mut NcFile) -> Result<()> {
    let x = f.add_dimension(0, "x", Some(10))?;
    let time = f.add_dimension(0, "time", None)?;
    let obs = f.define_type(
        0,
        "obs_t",
        TypeSpec::Compound {
            size: 8,
            fields: vec![
                FieldSpec::scalar("temp", AtomicType::Float.id(), 0),
                FieldSpec::scalar("count", AtomicType::Int.id(), 4),
            ],
        },
    )?;
    let flag = f.define_type(
        0,
        "flag_t",
        TypeSpec::Enum {
            base: AtomicType::UByte,
            members: vec![("ok".into(), 0), ("suspect".into(), 1), ("bad".into(), 2)],
        },
    )?;
    let v = f.add_variable(0, "obs", obs, &[time, x])?;
    f.put_att_text(0, Some(v), "long_name", "surface observations")?;
    f.put_att(0, None, "quality", flag, NcValues::UByte(vec![0, 2]))?;

    let sub = f.add_group(0, "forecast")?;
    let inner = f.add_group(sub, "surface")?;
    let t2m = f.add_variable(inner, "t2m", AtomicType::Double.id(), &[x])?;
    f.put_att(
        inner,
        Some(t2m),
        "_FillValue",
        AtomicType::Double.id(),
        NcValues::Double(vec![-999.0]),
    )?;
    f.enddef()?;

    let record: Vec<u8> = (0..10u8)
        .flat_map(|i| {
            let mut b = (i as f32 * 0.5).to_le_bytes().to_vec();
            b.extend_from_slice(&(i as i32).to_le_bytes());
            b
        })
        .collect();
    let mut two_records = record.clone();
    two_records.extend_from_slice(&record);
    f.put_var(0, v, NcValues::Raw(two_records))?;
    f.put_var(inner, t2m, NcValues::Double((0..10).map(f64::from).collect()))?;
    Ok(())
}

fn check_fixture(f: &NcFile) -> Result<()> {
    let x = f.find_dim_by_name(0, "x")?;
    let time = f.find_dim_by_name(0, "time")?;
    assert_eq!(f.dim_len(0, x)?, 10);
    assert_eq!(f.dim_len(0, time)?, 2);
    assert!(f.graph().dim(time).unwrap().unlimited);

    let obs = f.find_named_type(0, "obs_t")?;
    assert_eq!(f.type_class(obs)?, TypeClassTag::Compound);
    let info = f.graph().type_info(obs).unwrap();
    assert_eq!(info.size, 8);
    match &info.class {
        TypeClass::Compound { fields } => {
            assert_eq!(fields.names(), vec!["temp", "count"]);
            assert_eq!(fields.get(1).unwrap().offset, 4);
        }
        other => panic!("expected a compound, got {other:?}"),
    }
    // defining group plus the variable
    assert_eq!(info.users(), 1);

    let flag = f.find_named_type(0, "flag_t")?;
    let quality = f.find_att(0, None, "quality")?;
    assert_eq!(quality.type_id, flag);
    assert_eq!(quality.data, NcValues::UByte(vec![0, 2]));

    let v = f.find_var(0, "obs")?;
    let var = f.var(0, v)?;
    assert_eq!(var.dimids, vec![time, x]);
    assert_eq!(
        f.find_att(0, Some(v), "long_name")?.data.as_text().unwrap(),
        "surface observations"
    );
    let NcValues::Raw(bytes) = f.get_var(0, v)? else {
        panic!("compound data comes back raw");
    };
    assert_eq!(bytes.len(), 2 * 10 * 8);
    assert_eq!(&bytes[8..12], &0.5f32.to_le_bytes());

    let inner = f.find_group_by_path("/forecast/surface")?;
    assert_eq!(f.full_name(inner)?, "/forecast/surface");
    let t2m = f.find_var(inner, "t2m")?;
    assert_eq!(
        f.var(inner, t2m)?.fill.value,
        Some(NcValues::Double(vec![-999.0]))
    );
    assert_eq!(
        f.get_var(inner, t2m)?,
        NcValues::Double((0..10).map(f64::from).collect())
    );
    assert!(f.provenance().is_some());
    Ok(())
}

#[test]
fn test_roundtrip_file_backend() -> Result<()> {
    init_logging();
    let dir = TempDir::new("ncmeta")?;
    let path = dir.path().join("fixture.ncim");
    let mut f = NcFile::create(Config::file(&path))?;
    build_fixture(&mut f)?;
    check_fixture(&f)?;
    f.close()?;
    drop(f);

    let ro = Config {
        read_only: true,
        ..Config::file(&path)
    };
    let again = NcFile::open(ro)?;
    check_fixture(&again)?;
    assert!(again.mode().read_only);
    Ok(())
}

#[test]
fn test_roundtrip_memory_backend() -> Result<()> {
    init_logging();
    let mut f = NcFile::create_memio(MemImage::new(0))?;
    build_fixture(&mut f)?;
    let bytes = f.close_memio()?;

    let mut again = NcFile::open_memio(MemImage::from_bytes(bytes), false)?;
    check_fixture(&again)?;

    // a second session keeps appending records
    let v = again.find_var(0, "obs")?;
    again.put_var(0, v, NcValues::Raw(vec![0; 3 * 10 * 8]))?;
    let bytes = again.close_memio()?;
    let last = NcFile::open_memio(MemImage::from_bytes(bytes), true)?;
    let time = last.find_dim_by_name(0, "time")?;
    assert_eq!(last.dim_len(0, time)?, 3);
    Ok(())
}

#[test]
fn test_in_memory_session_persists_on_close() -> Result<()> {
    init_logging();
    let dir = TempDir::new("ncmeta")?;
    let path = dir.path().join("persisted.ncim");
    let config = Config::builder()
        .path(&path)
        .in_memory(true)
        .persist(true)
        .build()?;
    let mut f = NcFile::create(config)?;
    build_fixture(&mut f)?;
    assert!(!path.exists());
    f.close()?;
    assert!(path.exists());

    let ro = Config {
        read_only: true,
        ..Config::file(&path)
    };
    check_fixture(&NcFile::open(ro)?)?;
    Ok(())
}

#[test]
fn test_reopened_entities_are_clean() -> Result<()> {
    let mut f = NcFile::create_memio(MemImage::new(0))?;
    build_fixture(&mut f)?;
    let bytes = f.close_memio()?;
    let f = NcFile::open_memio(MemImage::from_bytes(bytes), true)?;
    assert!(!f.flags().hdirty);
    for g in f.graph().live_groups() {
        assert!(g.created && !g.dirty);
        for v in &g.vars {
            assert!(v.flags.created && !v.flags.dirty && !v.flags.is_new);
        }
    }
    Ok(())
}
