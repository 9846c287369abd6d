//! Integration tests for scene linking: mounting one stored scene as a
//! subtree of another, with optional time remapping.

use std::sync::Arc;

use glam::DVec3;
use scenio::scene::{SceneFileCache, TagFilter};
use scenio::util::DMat4;
use scenio::{Error, LinkedScene, Payload, SceneReader, SceneWriter};

use tempfile::NamedTempFile;

fn points(ps: &[(f64, f64, f64)]) -> Payload {
    Payload::Points {
        positions: ps.iter().map(|&(x, y, z)| DVec3::new(x, y, z)).collect(),
    }
}

/// Target scene: /geo holds an animated point cloud and a couple of tags.
fn build_target(path: &std::path::Path) {
    let root = SceneWriter::create(path).unwrap();
    let geo = root.create_child("geo").unwrap();
    geo.write_object(&points(&[(0.0, 0.0, 0.0)]), 0.0).unwrap();
    geo.write_object(&points(&[(4.0, 0.0, 0.0)]), 4.0).unwrap();
    geo.write_tags(&["render"]).unwrap();
    root.finalize().unwrap();
}

#[test]
fn test_link_redirects_reads() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    {
        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        let target = SceneReader::open(target_file.path()).unwrap();
        mount.write_link(&target).unwrap();
        host.finalize().unwrap();
    }

    let host = LinkedScene::open(host_file.path()).unwrap();
    let mount = host.child("mount").unwrap();
    assert!(mount.is_link_boundary());
    // The boundary keeps its hosting-side name.
    assert_eq!(mount.name(), "mount");
    // Children come from the target scene.
    assert_eq!(mount.child_names().unwrap(), vec!["geo".to_string()]);

    let geo = mount.child("geo").unwrap();
    assert!(!geo.is_link_boundary());
    assert!(geo.has_object().unwrap());
    match geo.read_object(0.0).unwrap().as_ref() {
        Payload::Points { positions } => assert_eq!(positions[0], DVec3::ZERO),
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(
        geo.path(),
        vec!["mount".to_string(), "geo".to_string()]
    );
}

#[test]
fn test_link_boundary_keeps_host_placement() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    let host_xform = DMat4::from_translation(DVec3::new(100.0, 0.0, 0.0));
    {
        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        mount.write_transform(&host_xform, 0.0).unwrap();
        let target = SceneReader::open(target_file.path()).unwrap();
        mount.write_link(&target).unwrap();
        host.finalize().unwrap();
    }

    let mount = LinkedScene::open(host_file.path())
        .unwrap()
        .child("mount")
        .unwrap();
    assert!(mount.is_link_boundary());
    // Transform at the boundary comes from the hosting scene.
    let m = mount.read_transform(0.0).unwrap();
    assert!((m.w_axis.x - 100.0).abs() < 1e-12);
    // The copied bound makes the host hierarchy boundable without the
    // target file: the target's animated points span x in [0, 4].
    let b = mount.read_bound(4.0).unwrap();
    assert!((b.max.x - 4.0).abs() < 1e-9);
}

#[test]
fn test_link_name_collision_rejected() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    let host = LinkedScene::create(host_file.path()).unwrap();
    let mut mount = host.create_child("mount").unwrap();
    // The hosting location already has a child named like the target's.
    let geo = mount.create_child("geo").unwrap();
    geo.write_object(&points(&[(0.0, 0.0, 0.0)]), 0.0).unwrap();

    let target = SceneReader::open(target_file.path()).unwrap();
    match mount.write_link(&target) {
        Err(Error::LinkCollision { name, .. }) => assert_eq!(name, "geo"),
        other => panic!("expected LinkCollision, got {other:?}"),
    }
    // Nothing was written: the location is still linkless and writable.
    assert!(!mount.is_link_boundary());
    mount
        .write_attribute("note", &Payload::String("plain".into()), 0.0)
        .unwrap();
    host.finalize().unwrap();
}

#[test]
fn test_link_over_object_rejected() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    let host = LinkedScene::create(host_file.path()).unwrap();
    let mut mount = host.create_child("mount").unwrap();
    mount
        .write_object(&points(&[(0.0, 0.0, 0.0)]), 0.0)
        .unwrap();

    let target = SceneReader::open(target_file.path()).unwrap();
    assert!(matches!(
        mount.write_link(&target),
        Err(Error::LinkBoundary { .. })
    ));
    host.finalize().unwrap();
}

#[test]
fn test_boundary_rejects_objects_and_children() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    let host = LinkedScene::create(host_file.path()).unwrap();
    let mut mount = host.create_child("mount").unwrap();
    let target = SceneReader::open(target_file.path()).unwrap();
    mount.write_link(&target).unwrap();

    assert!(matches!(
        mount.write_object(&points(&[(0.0, 0.0, 0.0)]), 0.0),
        Err(Error::LinkBoundary { .. })
    ));
    assert!(matches!(
        mount.create_child("extra"),
        Err(Error::LinkBoundary { .. })
    ));
    // The reserved attributes cannot be written as ordinary attributes.
    assert!(mount
        .write_attribute(
            scenio::scene::LINK_FILE_ATTRIBUTE,
            &Payload::String("x".into()),
            0.0
        )
        .is_err());
    host.finalize().unwrap();
}

#[test]
fn test_link_time_remap() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    {
        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        let target = SceneReader::open(target_file.path()).unwrap();
        // remap(t) = 2t over the hosting range [0, 2].
        mount.write_time_remapped_link(&target, 0.0, 0.0).unwrap();
        mount.write_time_remapped_link(&target, 4.0, 2.0).unwrap();
        host.finalize().unwrap();
    }

    let target = SceneReader::open(target_file.path()).unwrap();
    let geo = LinkedScene::open(host_file.path())
        .unwrap()
        .child("mount")
        .unwrap()
        .child("geo")
        .unwrap();

    for host_time in [0.0, 0.5, 1.0, 2.0] {
        let through_link = geo.read_object(host_time).unwrap();
        let direct = target
            .scene(&["geo"])
            .unwrap()
            .read_object(host_time * 2.0)
            .unwrap();
        match (through_link.as_ref(), direct.as_ref()) {
            (
                Payload::Points { positions: a },
                Payload::Points { positions: b },
            ) => {
                assert!(
                    (a[0].x - b[0].x).abs() < 1e-12,
                    "host t={host_time}: {} vs {}",
                    a[0].x,
                    b[0].x
                );
            }
            other => panic!("unexpected payloads {other:?}"),
        }
    }
}

#[test]
fn test_broken_link_degrades() {
    let host_file = NamedTempFile::new().expect("temp file");
    let target_path;
    {
        let target_file = NamedTempFile::new().expect("temp file");
        build_target(target_file.path());
        target_path = target_file.path().to_path_buf();

        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        let target = SceneReader::open(&target_path).unwrap();
        mount.write_link(&target).unwrap();
        host.finalize().unwrap();
        // Dropping the temp file deletes the target.
    }
    assert!(!target_path.exists());

    // The hosting scene stays walkable; the broken link resolves to no
    // linked content.
    let host = LinkedScene::open(host_file.path()).unwrap();
    let mount = host.child("mount").unwrap();
    assert!(!mount.is_link_boundary());
    assert!(mount.child_names().unwrap().is_empty());
    assert!(!mount.has_object().unwrap());
    // The copied bound is still served from the hosting side.
    let b = mount.read_bound(4.0).unwrap();
    assert!((b.max.x - 4.0).abs() < 1e-9);
}

#[test]
fn test_link_tag_propagation() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    {
        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        let target = SceneReader::open(target_file.path()).unwrap();
        mount.write_link(&target).unwrap();
        host.finalize().unwrap();
    }

    // Without opening the target file, the host sees the target's tags
    // as descendant tags at (and above) the mount point.
    let host_only = SceneReader::open(host_file.path()).unwrap();
    let mount = host_only.child("mount").unwrap();
    assert!(mount.has_tag("render", TagFilter::DESCENDANT).unwrap());
    assert!(!mount.has_tag("render", TagFilter::LOCAL).unwrap());
    assert!(host_only.has_tag("render", TagFilter::DESCENDANT).unwrap());
    // The reserved link attributes never show up in attribute listings.
    assert!(mount.attribute_names().unwrap().is_empty());
}

#[test]
fn test_shared_file_cache_eviction_keeps_readers_valid() {
    let target_a = NamedTempFile::new().expect("temp file");
    let target_b = NamedTempFile::new().expect("temp file");
    build_target(target_a.path());
    build_target(target_b.path());

    let cache = Arc::new(SceneFileCache::new(1));
    let a = cache.get(target_a.path().to_str().unwrap()).unwrap();
    assert_eq!(cache.len(), 1);
    let _b = cache.get(target_b.path().to_str().unwrap()).unwrap();
    // Capacity 1: target_a was evicted from the lookup table.
    assert_eq!(cache.len(), 1);

    // The evicted reader stays fully usable.
    let geo = a.child("geo").unwrap();
    assert!(geo.has_object().unwrap());

    // A fresh lookup simply reopens the file.
    let a2 = cache.get(target_a.path().to_str().unwrap()).unwrap();
    assert!(a2.child("geo").unwrap().has_object().unwrap());
}

#[test]
fn test_scene_navigation_across_link() {
    let target_file = NamedTempFile::new().expect("temp file");
    build_target(target_file.path());

    let host_file = NamedTempFile::new().expect("temp file");
    {
        let host = LinkedScene::create(host_file.path()).unwrap();
        let mut mount = host.create_child("mount").unwrap();
        let target = SceneReader::open(target_file.path()).unwrap();
        mount.write_link(&target).unwrap();
        host.finalize().unwrap();
    }

    let host = LinkedScene::open(host_file.path()).unwrap();
    let geo = host.scene(&["mount", "geo"]).unwrap();
    assert!(geo.has_object().unwrap());
    assert_eq!(geo.name(), "geo");
}
