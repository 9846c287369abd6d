//! Integration tests for the container format: write, reopen, read back.

use scenio::container::{EntryKind, IndexedFile, MissingBehaviour, OpenMode};
use scenio::util::DataKind;
use scenio::Error;

use tempfile::NamedTempFile;

#[test]
fn test_end_to_end_float_array() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();

    // Write /a/b with a float array entry.
    {
        let root = IndexedFile::open(path, OpenMode::Write).expect("create container");
        let a = root.create_subdirectory("a").unwrap();
        let b = a.create_subdirectory("b").unwrap();
        b.write_array("data", &[1.0f32, 2.0, 3.0]).unwrap();
        root.commit().unwrap();
    }

    // Reopen read-only and verify.
    let root = IndexedFile::open(path, OpenMode::Read).expect("reopen container");
    let (b, exact) = root.find("a/b").unwrap();
    assert!(exact);
    let entries = b.entry_ids().unwrap();
    assert_eq!(entries, vec!["data".to_string()]);

    let entry = b.entry("data").unwrap();
    assert_eq!(entry.kind(), EntryKind::File);
    assert_eq!(entry.data_kind(), DataKind::FloatArray);
    assert_eq!(entry.array_length(), 3);

    let data: Vec<f32> = b.read_array("data").unwrap();
    assert_eq!(data, vec![1.0, 2.0, 3.0]);
}

#[test]
fn test_index_roundtrip_structure() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();

    {
        let root = IndexedFile::open(path, OpenMode::Write).unwrap();
        for top in ["x", "y", "z"] {
            let dir = root.create_subdirectory(top).unwrap();
            for i in 0..4 {
                let sub = dir.create_subdirectory(&format!("sub{i}")).unwrap();
                sub.write(&format!("v{i}"), &(i as i64)).unwrap();
                sub.write_array("block", &vec![i as f64; 16]).unwrap();
            }
        }
        root.commit().unwrap();
    }

    let root = IndexedFile::open(path, OpenMode::Read).unwrap();
    for top in ["x", "y", "z"] {
        let dir = root.subdirectory(top, MissingBehaviour::Error).unwrap().unwrap();
        for i in 0..4 {
            let sub = dir
                .subdirectory(&format!("sub{i}"), MissingBehaviour::Error)
                .unwrap()
                .unwrap();
            let v: i64 = sub.read(&format!("v{i}")).unwrap();
            assert_eq!(v, i as i64);
            let block: Vec<f64> = sub.read_array("block").unwrap();
            assert_eq!(block, vec![i as f64; 16]);
        }
    }
}

#[test]
fn test_string_dedup_across_locations() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();

    {
        let root = IndexedFile::open(path, OpenMode::Write).unwrap();
        for i in 0..1000 {
            let dir = root.create_subdirectory(&format!("n{i}")).unwrap();
            dir.write("value", &(i as f64)).unwrap();
        }
        root.commit().unwrap();
    }

    let root = IndexedFile::open(path, OpenMode::Read).unwrap();
    // 1000 distinct directory names, plus the root name and the one
    // shared entry name: "value" interned exactly once.
    assert_eq!(root.stats().string_count, 1002);
}

#[test]
fn test_remove_shrinks_file() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path().to_path_buf();

    {
        let root = IndexedFile::open(&path, OpenMode::Write).unwrap();
        root.write_array("bulk", &vec![0.5f64; 8192]).unwrap();
        root.commit().unwrap();
    }
    let full_size = std::fs::metadata(&path).unwrap().len();
    assert!(full_size > 8192 * 8);

    {
        let root = IndexedFile::open(&path, OpenMode::Append).unwrap();
        root.remove("bulk").unwrap();
        root.commit().unwrap();
    }
    let shrunk = std::fs::metadata(&path).unwrap().len();
    assert!(
        shrunk < full_size / 2,
        "expected file to shrink, {full_size} -> {shrunk}"
    );

    let root = IndexedFile::open(&path, OpenMode::Read).unwrap();
    assert!(!root.has_entry("bulk").unwrap());
}

#[test]
fn test_overwrite_replaces_entry() {
    let temp = NamedTempFile::new().expect("temp file");
    let root = IndexedFile::open(temp.path(), OpenMode::Write).unwrap();

    root.write_array("data", &[1i64, 2, 3]).unwrap();
    root.write_array("data", &[9i64]).unwrap();

    let entry = root.entry("data").unwrap();
    assert_eq!(entry.array_length(), 1);
    let data: Vec<i64> = root.read_array("data").unwrap();
    assert_eq!(data, vec![9]);
    root.commit().unwrap();
}

#[test]
fn test_read_only_cursor_rejects_mutation() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();
    {
        let root = IndexedFile::open(path, OpenMode::Write).unwrap();
        root.create_subdirectory("a").unwrap();
        root.commit().unwrap();
    }

    let root = IndexedFile::open(path, OpenMode::Read).unwrap();
    assert!(matches!(
        root.write("x", &1.0f64),
        Err(Error::PermissionDenied { .. })
    ));
    assert!(matches!(
        root.remove("a"),
        Err(Error::PermissionDenied { .. })
    ));
    assert!(matches!(
        root.create_subdirectory("b"),
        Err(Error::PermissionDenied { .. })
    ));
}

#[test]
fn test_type_and_length_validation() {
    let temp = NamedTempFile::new().expect("temp file");
    let root = IndexedFile::open(temp.path(), OpenMode::Write).unwrap();

    root.write("scalar", &1.5f64).unwrap();
    assert!(matches!(
        root.read::<i64>("scalar"),
        Err(Error::TypeMismatch { .. })
    ));

    root.write_array("arr", &[1.0f64, 2.0]).unwrap();
    assert!(matches!(
        root.read_array_expecting::<f64>("arr", Some(3)),
        Err(Error::ArrayLengthMismatch { .. })
    ));
    assert_eq!(
        root.read_array_expecting::<f64>("arr", Some(2)).unwrap(),
        vec![1.0, 2.0]
    );
    root.commit().unwrap();
}

#[test]
fn test_string_entries_roundtrip() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();
    {
        let root = IndexedFile::open(path, OpenMode::Write).unwrap();
        root.write("name", &"hello world".to_string()).unwrap();
        root.write_array(
            "names",
            &["a".to_string(), "".to_string(), "long name".to_string()],
        )
        .unwrap();
        root.commit().unwrap();
    }

    let root = IndexedFile::open(path, OpenMode::Read).unwrap();
    let s: String = root.read("name").unwrap();
    assert_eq!(s, "hello world");
    let v: Vec<String> = root.read_array("names").unwrap();
    assert_eq!(v, vec!["a", "", "long name"]);
}

#[test]
fn test_find_relative_navigation() {
    let temp = NamedTempFile::new().expect("temp file");
    let root = IndexedFile::open(temp.path(), OpenMode::Write).unwrap();
    let a = root.create_subdirectory("a").unwrap();
    a.create_subdirectory("b").unwrap();
    root.create_subdirectory("c").unwrap();

    let (node, exact) = root.find("a/./b/../../c").unwrap();
    assert!(exact);
    assert_eq!(node.current_entry_id().unwrap(), "c");

    let (node, exact) = root.find("a/missing").unwrap();
    assert!(!exact);
    assert_eq!(node.current_entry_id().unwrap(), "a");
    root.commit().unwrap();
}

#[test]
fn test_reset_root_demotes_write_mode() {
    let temp = NamedTempFile::new().expect("temp file");
    let root = IndexedFile::open(temp.path(), OpenMode::Write).unwrap();
    let dup = root.reset_root();
    assert_eq!(dup.open_mode(), OpenMode::Append);
    // Both cursors stay usable against the shared container.
    root.create_subdirectory("from_writer").unwrap();
    assert!(dup.has_entry("from_writer").unwrap());
    root.commit().unwrap();
}

#[test]
fn test_bad_magic_rejected() {
    let temp = NamedTempFile::new().expect("temp file");
    std::fs::write(temp.path(), b"this is not a scenio container at all").unwrap();
    match IndexedFile::open(temp.path(), OpenMode::Read) {
        Err(Error::BadMagic(_)) => {}
        other => panic!("expected BadMagic, got {other:?}"),
    }
}

#[test]
fn test_missing_entry_reported() {
    let temp = NamedTempFile::new().expect("temp file");
    let root = IndexedFile::open(temp.path(), OpenMode::Write).unwrap();
    match root.read::<f64>("nope") {
        Err(Error::NotFound { name, .. }) => assert_eq!(name, "nope"),
        other => panic!("expected NotFound, got {other:?}"),
    }
    root.commit().unwrap();
}

#[test]
fn test_append_reopen_preserves_free_pages() {
    let temp = NamedTempFile::new().expect("temp file");
    let path = temp.path();
    {
        let root = IndexedFile::open(path, OpenMode::Write).unwrap();
        root.write_array("first", &vec![1.0f64; 64]).unwrap();
        root.write_array("second", &vec![2.0f64; 64]).unwrap();
        // Freeing the first block leaves a non-trailing free page.
        root.remove("first").unwrap();
        root.commit().unwrap();
    }

    {
        let root = IndexedFile::open(path, OpenMode::Append).unwrap();
        assert_eq!(root.stats().free_page_count, 1);
        // A same-size write reuses the freed range rather than growing.
        let end_before = root.stats().data_end;
        root.write_array("third", &vec![3.0f64; 64]).unwrap();
        assert_eq!(root.stats().data_end, end_before);
        assert_eq!(root.stats().free_page_count, 0);
        root.commit().unwrap();
    }

    let root = IndexedFile::open(path, OpenMode::Read).unwrap();
    let third: Vec<f64> = root.read_array("third").unwrap();
    assert_eq!(third, vec![3.0; 64]);
    let second: Vec<f64> = root.read_array("second").unwrap();
    assert_eq!(second, vec![2.0; 64]);
}
