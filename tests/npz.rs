use cnpz::{
    load_npy, load_npz, load_npz_all, save_npz, save_npz_array, save_npz_dyn, save_npz_iter,
    save_npz_records, Compression, DynSlice, MemoryOrder, NpyArray, NpzReader, ReadNpzError, SaveMode,
    SaveOptions, WriteNpyError, WriteNpyExt, WriteNpzError,
};
use std::{
    fs,
    io::{Read, Write},
};
use tempfile::tempdir;

#[test]
fn entries_accumulate_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.npz");
    let ints: Vec<i32> = (0..12).collect();
    let floats = [0.5f64, 1.5, 2.5];

    save_npz(&path, "ints", &ints, &[3, 4], SaveOptions::new(), Compression::Stored).unwrap();
    save_npz(&path, "floats", &floats, &[3], SaveOptions::append(), Compression::Deflated).unwrap();
    save_npz_records(
        &path,
        "points",
        &["x", "y"],
        [(1.0f32, 2u8), (3.0, 4)],
        &[2],
        SaveOptions::append(),
        Compression::Stored,
    )
    .unwrap();
    save_npz_iter(
        &path,
        "fortran",
        (1..7u32).map(u64::from),
        &[2, 3],
        SaveOptions::append().memory_order(MemoryOrder::Fortran),
        Compression::Deflated,
    )
    .unwrap();

    let arrays = load_npz_all(&path).unwrap();
    assert_eq!(arrays.keys().collect::<Vec<_>>(), ["ints", "floats", "points", "fortran"]);
    assert_eq!(arrays["ints"].shape(), [3, 4]);
    assert_eq!(arrays["ints"].to_vec::<i32>().unwrap(), ints);
    assert_eq!(arrays["floats"].as_slice::<f64>().unwrap(), floats);
    assert_eq!(arrays["points"].column::<u8>("y").unwrap().iter().collect::<Vec<_>>(), [2, 4]);
    assert_eq!(arrays["fortran"].memory_order(), MemoryOrder::Fortran);
    assert_eq!(arrays["fortran"].to_vec::<u64>().unwrap(), [1, 2, 3, 4, 5, 6]);

    let floats_again = load_npz(&path, "floats").unwrap();
    assert_eq!(floats_again, arrays["floats"]);
}

#[test]
fn write_mode_starts_a_new_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fresh.npz");
    save_npz(&path, "old", &[1u8, 2], &[2], SaveOptions::new(), Compression::Stored).unwrap();
    save_npz(&path, "new", &[3u8], &[1], SaveOptions::new(), Compression::Stored).unwrap();

    let mut npz = NpzReader::open(&path).unwrap();
    assert_eq!(npz.names().unwrap(), ["new"]);
    assert!(matches!(load_npz(&path, "old"), Err(ReadNpzError::EntryNotFound(name)) if name == "old"));
}

#[test]
fn append_to_missing_archive_creates_it() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("missing.npz");
    save_npz(&path, "a", &[1i8], &[1], SaveOptions::append(), Compression::Stored).unwrap();
    assert_eq!(load_npz(&path, "a").unwrap().to_vec::<i8>().unwrap(), [1]);
}

#[test]
fn duplicate_names_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dup.npz");
    save_npz(&path, "a", &[1u16, 2], &[2], SaveOptions::new(), Compression::Stored).unwrap();
    let before = fs::read(&path).unwrap();

    let err = save_npz(&path, "a", &[3u16], &[1], SaveOptions::append(), Compression::Stored).unwrap_err();
    assert!(matches!(err, WriteNpzError::DuplicateEntry(name) if name == "a"));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn invalid_entries_leave_archive_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("guarded.npz");
    save_npz(&path, "a", &[1u16, 2], &[2], SaveOptions::new(), Compression::Stored).unwrap();
    let before = fs::read(&path).unwrap();

    let err = save_npz(&path, "b", &[1u16, 2, 3], &[2], SaveOptions::append(), Compression::Stored).unwrap_err();
    assert!(matches!(err, WriteNpzError::Npy(_)));
    assert_eq!(fs::read(&path).unwrap(), before);
}

#[test]
fn unencodable_entry_keeps_existing_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("keep.npz");
    save_npz(&path, "a", &[1u8, 2], &[2], SaveOptions::new(), Compression::Stored).unwrap();
    let before = fs::read(&path).unwrap();

    let err = save_npz(&path, "b", &[0u8], &[1; 25_000], SaveOptions::new(), Compression::Stored).unwrap_err();
    assert!(matches!(err, WriteNpzError::Npy(WriteNpyError::FormatHeader(_))));
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(load_npz(&path, "a").unwrap().to_vec::<u8>().unwrap(), [1, 2]);
}

#[test]
fn entry_bytes_match_npy_encoding() {
    let dir = tempdir().unwrap();
    let npz_path = dir.path().join("pair.npz");
    let npy_path = dir.path().join("pair.npy");
    let array = NpyArray::from_slice(&[1.0f32, -1.0, 0.25], vec![3], MemoryOrder::C).unwrap();

    save_npz_array(&npz_path, "pair", &array, SaveMode::Write, Compression::Deflated).unwrap();
    cnpz::write_npy(&npy_path, &array).unwrap();

    let mut archive = zip::ZipArchive::new(fs::File::open(&npz_path).unwrap()).unwrap();
    assert_eq!(archive.len(), 1);
    let mut entry = archive.by_name("pair.npy").unwrap();
    assert_eq!(entry.compression(), zip::CompressionMethod::Deflated);
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, fs::read(&npy_path).unwrap());
    assert_eq!(load_npy(&npy_path).unwrap(), array);
}

#[test]
fn appended_archive_is_readable_by_zip_crate() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("interop.npz");
    for (i, name) in ["arr_0", "arr_1", "arr_2"].into_iter().enumerate() {
        let options = if i == 0 { SaveOptions::new() } else { SaveOptions::append() };
        let compression = if i % 2 == 0 { Compression::Stored } else { Compression::Deflated };
        save_npz(&path, name, &[i as u32; 10], &[10], options, compression).unwrap();
    }

    let mut archive = zip::ZipArchive::new(fs::File::open(&path).unwrap()).unwrap();
    let names: Vec<_> = archive.file_names().map(str::to_string).collect();
    assert_eq!(names.len(), 3);
    for i in 0..3 {
        let mut entry = archive.by_name(&format!("arr_{i}.npy")).unwrap();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        let mut expected = Vec::new();
        NpyArray::from_slice(&[i as u32; 10], vec![10], MemoryOrder::C)
            .unwrap()
            .write_npy(&mut expected)
            .unwrap();
        assert_eq!(bytes, expected);
    }
}

#[test]
fn archives_from_zip_crate_are_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("foreign.npz");
    let first = NpyArray::from_slice(&[1i64, 2, 3, 4], vec![2, 2], MemoryOrder::C).unwrap();
    let second = NpyArray::from_slice(&[true, false, true], vec![3], MemoryOrder::C).unwrap();
    {
        let mut zip = zip::ZipWriter::new(fs::File::create(&path).unwrap());
        for (name, array, method) in [
            ("first.npy", &first, zip::CompressionMethod::Stored),
            ("second.npy", &second, zip::CompressionMethod::Deflated),
        ] {
            let options = zip::write::SimpleFileOptions::default().compression_method(method);
            zip.start_file(name, options).unwrap();
            let mut bytes = Vec::new();
            array.write_npy(&mut bytes).unwrap();
            zip.write_all(&bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    let arrays = load_npz_all(&path).unwrap();
    assert_eq!(arrays.keys().collect::<Vec<_>>(), ["first", "second"]);
    assert_eq!(arrays["first"], first);
    assert_eq!(arrays["second"], second);

    // Appending rewrites the foreign central directory.
    save_npz(&path, "third", &[9u8], &[1], SaveOptions::append(), Compression::Stored).unwrap();
    let mut npz = NpzReader::open(&path).unwrap();
    assert_eq!(npz.names().unwrap(), ["first", "second", "third"]);
    assert_eq!(npz.by_name("third").unwrap().to_vec::<u8>().unwrap(), [9]);
    assert_eq!(npz.by_name("first").unwrap(), first);
}

#[test]
fn runtime_typed_entries_are_saved() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dyn.npz");
    let data = [1.25f32, 2.5];
    save_npz_dyn(&path, "x", DynSlice::from(&data[..]), &[2], SaveOptions::new(), Compression::Stored).unwrap();
    let array = load_npz(&path, "x").unwrap();
    assert_eq!(array.data_type(), Some(cnpz::DataType::F32));
    assert_eq!(array.as_slice::<f32>().unwrap(), data);
}
