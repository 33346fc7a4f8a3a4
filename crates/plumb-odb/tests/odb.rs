//! Object database integration tests.
//!
//! These run the public API against both storage backends:
//! 1. Short id expansion across loose objects and packs
//! 2. Packs indexed to a real git directory and reopened
//! 3. Thin packs whose delta bases live elsewhere in the database

use std::collections::HashMap;
use std::sync::Arc;

use plumb_odb::{
    FsStorage, MemoryStorage, Object, ObjectId, ObjectKind, Odb, OdbError, OdbOptions, PackBuilder,
    PackIndex, Storage,
};

/// Finds three blobs whose ids share the first four hex digits.
fn colliding_blobs() -> Vec<Object> {
    let mut buckets: HashMap<String, Vec<Object>> = HashMap::new();
    for i in 0.. {
        let blob = Object::blob(format!("candidate blob {i}\n").into_bytes());
        let bucket = buckets.entry(blob.id.to_hex()[..4].to_string()).or_default();
        bucket.push(blob);
        if bucket.len() == 3 {
            return bucket.clone();
        }
    }
    unreachable!()
}

fn source_file(n: usize) -> Object {
    let mut body = String::from("fn main() {\n");
    for line in 0..300 {
        body.push_str(&format!("    println!(\"line {line}\");\n"));
    }
    body.push_str(&format!("    // edit {n}\n}}\n"));
    Object::blob(body.into_bytes())
}

#[test]
fn short_id_ambiguity_across_stores() {
    let odb = Odb::new(MemoryStorage::new(), OdbOptions::default());

    let colliding = colliding_blobs();
    let shared = colliding[0].id.to_hex()[..4].to_string();

    // Two loose, one packed.
    odb.loose().write_object(&colliding[0]).unwrap();
    odb.loose().write_object(&colliding[1]).unwrap();
    let mut builder = PackBuilder::new();
    builder.add(colliding[2].clone());
    odb.index_pack(&builder.build().unwrap().data).unwrap();

    let unique = (0..)
        .map(|i| Object::blob(format!("unique blob {i}\n").into_bytes()))
        .find(|o| !o.id.to_hex().starts_with(&shared))
        .unwrap();
    odb.loose().write_object(&unique).unwrap();

    let mut expected: Vec<ObjectId> = colliding.iter().map(|o| o.id).collect();
    expected.sort();

    match odb.expand(&shared).unwrap_err() {
        OdbError::AmbiguousShortOid { prefix, candidates } => {
            assert_eq!(prefix, shared);
            assert_eq!(candidates, expected);
        }
        other => panic!("expected ambiguity, got {other}"),
    }

    assert_eq!(odb.expand(&unique.id.to_hex()[..4]).unwrap(), unique.id);
    assert_eq!(
        odb.expand(&colliding[2].id.to_hex()[..12]).unwrap(),
        colliding[2].id
    );
}

#[test]
fn index_pack_persists_to_git_dir() {
    let dir = tempfile::tempdir().unwrap();
    let objects: Vec<Object> = (0..5).map(source_file).collect();

    let info = {
        let odb = Odb::open(FsStorage::new(dir.path()), OdbOptions::default()).unwrap();
        let mut builder = PackBuilder::new();
        builder.add(objects[0].clone());
        for pair in objects.windows(2) {
            builder.add_delta(&pair[0], pair[1].clone());
        }
        odb.index_pack(&builder.build().unwrap().data).unwrap()
    };

    let pack_dir = dir.path().join("objects").join("pack");
    let idx_bytes = std::fs::read(pack_dir.join(format!("{}.idx", info.name))).unwrap();
    assert!(pack_dir.join(format!("{}.pack", info.name)).exists());

    let index = PackIndex::parse(&idx_bytes).unwrap();
    assert_eq!(index.len(), objects.len());
    assert_eq!(index.pack_checksum(), &info.checksum);

    let odb = Odb::open(FsStorage::new(dir.path()), OdbOptions::default()).unwrap();
    assert_eq!(odb.pack_names(), vec![info.name.clone()]);
    for object in &objects {
        assert_eq!(&odb.read(&object.id).unwrap(), object);
    }
}

#[test]
fn loose_objects_on_disk_match_their_names() {
    let dir = tempfile::tempdir().unwrap();
    let odb = Odb::new(FsStorage::new(dir.path()), OdbOptions::default());
    for i in 0..16 {
        odb.write(ObjectKind::Blob, format!("file {i}").as_bytes())
            .unwrap();
    }

    let ids = odb.loose().list().unwrap();
    assert_eq!(ids.len(), 16);
    for id in ids {
        let hex = id.to_hex();
        let path = dir.path().join("objects").join(&hex[..2]).join(&hex[2..]);
        let raw = std::fs::read(path).unwrap();
        let object = plumb_odb::codec::decode(&raw, None).unwrap();
        assert_eq!(object.id, id);
    }
}

#[test]
fn thin_pack_resolves_against_existing_pack() {
    let storage = Arc::new(MemoryStorage::new());
    let odb = Odb::new(Arc::clone(&storage), OdbOptions::default());
    let (v1, v2, v3) = (source_file(1), source_file(2), source_file(3));

    let mut first = PackBuilder::new();
    first.add(v1.clone());
    odb.index_pack(&first.build().unwrap().data).unwrap();

    // v2 against v1 (in the first pack), v3 against v2 (in this pack).
    let mut thin = PackBuilder::new();
    thin.add_delta(&v2, v3.clone());
    thin.add_delta(&v1, v2.clone());
    let info = odb.index_pack(&thin.build().unwrap().data).unwrap();
    assert_eq!(info.ids, vec![v3.id, v2.id]);

    let reopened = Odb::open(storage, OdbOptions::default()).unwrap();
    assert_eq!(reopened.pack_names().len(), 2);
    assert_eq!(reopened.read(&v3.id).unwrap(), v3);
}

#[test]
fn thin_pack_without_base_is_rejected() {
    let storage = Arc::new(MemoryStorage::new());
    let odb = Odb::new(Arc::clone(&storage), OdbOptions::default());
    let (v1, v2) = (source_file(1), source_file(2));

    let mut thin = PackBuilder::new();
    thin.add_delta(&v1, v2);
    let err = odb.index_pack(&thin.build().unwrap().data).unwrap_err();
    assert!(matches!(err, OdbError::NotFound(id) if id == v1.id));
    assert!(storage.readdir("objects/pack").unwrap().is_empty());
}
