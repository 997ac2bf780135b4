use anyhow::Result;
use ncmeta::{
    AtomicType, CatalogError, Config, FieldSpec, Handle, MemImage, NcFile, NcValues, Registry,
    TypeSpec,
};

#[test]
fn test_dimensions_are_scoped_to_their_subtree() -> Result<()> {
    let mut f = NcFile::create(Config::memory())?;
    let x = f.add_dimension(0, "x", Some(4))?;
    let a = f.add_group(0, "a")?;
    let b = f.add_group(0, "b")?;
    let inner_x = f.add_dimension(a, "x", Some(2))?;

    // nearest definition wins
    assert_eq!(f.find_dim_by_name(a, "x")?, inner_x);
    assert_eq!(f.find_dim_by_name(b, "x")?, x);
    assert_eq!(f.visible_dims(a)?, vec![inner_x, x]);

    f.add_variable(b, "v", AtomicType::Float.id(), &[x])?;
    assert!(matches!(
        f.add_variable(b, "w", AtomicType::Float.id(), &[inner_x]),
        Err(CatalogError::BadDim(_))
    ));
    Ok(())
}

#[test]
fn test_coordinate_variables_follow_names() -> Result<()> {
    let mut f = NcFile::create(Config::memory())?;
    let lat = f.add_dimension(0, "lat", Some(3))?;
    let g = f.add_group(0, "g")?;
    // same name in another group is not a coordinate variable
    f.add_variable(g, "lat", AtomicType::Double.id(), &[lat])?;
    assert_eq!(f.coord_var(lat), None);

    let v = f.add_variable(0, "latitude", AtomicType::Double.id(), &[lat])?;
    assert_eq!(f.coord_var(lat), None);
    f.rename_var(0, v, "lat")?;
    assert_eq!(f.coord_var(lat), Some((0, v)));
    assert!(f.var(0, v)?.flags.became_coord_var);

    f.rename_dim(lat, "y")?;
    assert_eq!(f.coord_var(lat), None);
    assert!(f.var(0, v)?.flags.was_coord_var);

    f.enddef()?;
    let flags = &f.var(0, v)?.flags;
    assert!(!flags.was_coord_var && !flags.became_coord_var);
    Ok(())
}

#[test]
fn test_type_references_are_counted_across_groups() -> Result<()> {
    let mut f = NcFile::create(Config::memory())?;
    let pair = f.define_type(
        0,
        "pair_t",
        TypeSpec::Compound {
            size: 8,
            fields: vec![
                FieldSpec::scalar("lo", AtomicType::Int.id(), 0),
                FieldSpec::scalar("hi", AtomicType::Int.id(), 4),
            ],
        },
    )?;
    let ragged = f.define_type(0, "ragged_t", TypeSpec::Vlen { base: pair })?;
    let g = f.add_group(0, "g")?;
    f.add_variable(g, "p", pair, &[])?;
    f.put_att(g, None, "r", ragged, NcValues::Vlen(vec![vec![0; 8]]))?;

    // the vlen and the variable
    assert_eq!(f.graph().type_info(pair).unwrap().users(), 2);
    assert!(matches!(f.delete_type(pair), Err(CatalogError::TypeInUse(_))));
    assert!(matches!(
        f.insert_compound_field(pair, FieldSpec::scalar("x", AtomicType::Byte.id(), 0)),
        Err(CatalogError::TypeInUse(_))
    ));

    f.delete_att(g, None, "r")?;
    f.delete_type(ragged)?;
    f.delete_var(g, 0)?;
    assert_eq!(f.graph().type_info(pair).unwrap().users(), 0);
    f.delete_type(pair)?;
    assert!(f.find_named_type(g, "pair_t").is_err());
    Ok(())
}

#[test]
fn test_committed_deletes_survive_reopen() -> Result<()> {
    let mut f = NcFile::create_memio(MemImage::new(0))?;
    let t = f.define_type(0, "blob", TypeSpec::Opaque { size: 2 })?;
    let g = f.add_group(0, "scratch")?;
    f.add_dimension(g, "n", Some(1))?;
    f.add_variable(0, "keep", AtomicType::Int.id(), &[])?;
    f.enddef()?;

    f.redef()?;
    f.delete_type(t)?;
    f.delete_group(g)?;
    f.enddef()?;
    let bytes = f.close_memio()?;

    let again = NcFile::open_memio(MemImage::from_bytes(bytes), true)?;
    assert!(again.find_named_type(0, "blob").is_err());
    assert!(again.find_group_by_name(0, "scratch").is_err());
    assert_eq!(again.find_var(0, "keep")?, 0);
    Ok(())
}

#[test]
fn test_registry_routes_edits_by_handle() -> Result<()> {
    let mut reg = Registry::new();
    let h = reg.create(Config::memory())?;
    let sub = {
        let (file, root) = reg.resolve_mut(h)?;
        file.add_group(root, "sub")?
    };
    let sh = reg.group_handle(h, sub)?;
    assert_eq!(sh.file_id(), h.file_id());
    {
        let (file, gid) = reg.resolve_mut(sh)?;
        assert_eq!(gid, sub);
        file.add_dimension(gid, "n", Some(5))?;
        file.enddef()?;
    }
    let (file, _) = reg.resolve(sh)?;
    let n = file.find_dim_by_name(sub, "n")?;
    assert_eq!(file.dim_len(sub, n)?, 5);

    assert!(reg.close(h)?.is_some());
    assert!(matches!(reg.resolve(sh), Err(CatalogError::BadHandle(_))));
    assert!(reg.is_empty());
    assert!(matches!(
        reg.group_handle(Handle::new(h.file_id(), 0), sub),
        Err(CatalogError::BadHandle(_))
    ));
    Ok(())
}

#[test]
fn test_freed_ids_are_not_reissued_after_reopen() -> Result<()> {
    let mut f = NcFile::create_memio(MemImage::new(0))?;
    f.add_dimension(0, "x", Some(2))?;
    let last = f.add_dimension(0, "y", Some(3))?;
    let t = f.define_type(0, "blob", TypeSpec::Opaque { size: 4 })?;
    f.enddef()?;
    f.redef()?;
    f.delete_dim(last)?;
    f.delete_type(t)?;
    f.enddef()?;
    let bytes = f.close_memio()?;

    let mut again = NcFile::open_memio(MemImage::from_bytes(bytes), false)?;
    again.redef()?;
    let fresh = again.add_dimension(0, "z", Some(1))?;
    assert_eq!(fresh, last + 1);
    let fresh_type = again.define_type(0, "blob2", TypeSpec::Opaque { size: 2 })?;
    assert_eq!(fresh_type, t + 1);
    again.enddef()?;
    Ok(())
}

#[test]
fn test_names_are_matched_in_composed_form() -> Result<()> {
    let mut f = NcFile::create_memio(MemImage::new(0))?;
    let g = f.add_group(0, "r\u{e9}gion")?;
    assert!(matches!(
        f.add_group(0, "re\u{301}gion"),
        Err(CatalogError::DuplicateName(_))
    ));
    f.add_variable(g, "\u{c5}ngstr\u{f6}m", AtomicType::Float.id(), &[])?;
    f.enddef()?;
    let bytes = f.close_memio()?;

    let again = NcFile::open_memio(MemImage::from_bytes(bytes), true)?;
    let g = again.find_group_by_name(0, "re\u{301}gion")?;
    assert_eq!(again.find_group(g)?.hdr.name, "r\u{e9}gion");
    assert_eq!(again.find_var(g, "A\u{30a}ngstro\u{308}m")?, 0);
    Ok(())
}
