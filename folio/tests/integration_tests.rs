//! Integration tests for folio: codec and reindexer used together the way a
//! storage service drives them.

use folio::prelude::*;
use proptest::prelude::*;
use std::collections::HashMap;

fn settings_codec() -> FieldCodec {
    Settings::from_vars([("FOLIO_ROOT_SECRET", "integration-test-root-secret-0001")])
        .expect("Failed to load settings")
        .into_codec()
}

#[test]
fn test_scenario_uuid_1() {
    let codec = settings_codec();
    let fields = FieldMap::from_pairs([("email", "a@b.com"), ("nom", "Alice")]).unwrap();

    let bundle = codec.encrypt_record(&fields, &RecordId::from("uuid-1")).expect("Encryption failed");

    let decrypted = codec.decrypt_record(&bundle, &RecordId::from("uuid-1")).expect("Decryption failed");
    assert_eq!(decrypted.get("email"), Some("a@b.com"));
    assert_eq!(decrypted.get("nom"), Some("Alice"));

    let result = codec.decrypt_record(&bundle, &RecordId::from("uuid-2"));
    assert!(matches!(result, Err(Error::Integrity { .. })));
}

#[test]
fn test_field_separation() {
    let codec = settings_codec();
    let id = RecordId::from("uuid-1");

    let a = codec.encrypt_record(&FieldMap::from_pairs([("a", "x")]).unwrap(), &id).unwrap();
    let b = codec.encrypt_record(&FieldMap::from_pairs([("b", "x")]).unwrap(), &id).unwrap();

    assert_ne!(a.cipher_by_field["a"], b.cipher_by_field["b"]);

    // Renaming the field breaks authentication.
    let mut moved = a.clone();
    let cipher = moved.cipher_by_field.remove("a").unwrap();
    moved.cipher_by_field.insert("b".to_string(), cipher);
    assert!(matches!(codec.decrypt_record(&moved, &id), Err(Error::Integrity { .. })));
}

#[test]
fn test_record_separation() {
    let codec = settings_codec();
    let fields = FieldMap::from_pairs([("title", "Notes from the lighthouse")]).unwrap();

    let b1 = codec.encrypt_record(&fields, &RecordId::from("uuid-1")).unwrap();
    let b2 = codec.encrypt_record(&fields, &RecordId::from("uuid-2")).unwrap();

    assert_ne!(b1.cipher_by_field, b2.cipher_by_field);
}

#[test]
fn test_bundle_survives_json_storage() {
    let codec = settings_codec();
    let id = RecordId::generate();
    let fields = FieldMap::from_pairs([("body", "Il était une fois…"), ("title", "Conte")]).unwrap();

    let bundle = codec.encrypt_record(&fields, &id).unwrap();
    let stored = serde_json::to_string(&bundle).unwrap();
    let loaded: CipherBundle = serde_json::from_str(&stored).unwrap();

    assert_eq!(codec.decrypt_record(&loaded, &id).unwrap(), fields);
}

#[test]
fn test_encrypted_fragments_in_order() {
    let codec = settings_codec();
    let reindexer = Reindexer::new(MemorySiblingStore::new());
    let document = RecordId::generate();
    let mut bundles: HashMap<RecordId, CipherBundle> = HashMap::new();

    for (text, position) in [("first", 1), ("third", 2), ("second", 2)] {
        let id = RecordId::generate();
        let fields = FieldMap::from_pairs([("content", text)]).unwrap();
        bundles.insert(id.clone(), codec.encrypt_record(&fields, &id).unwrap());
        reindexer.insert(document.as_str(), &id, position).unwrap();
    }

    let texts: Vec<String> = reindexer
        .siblings(document.as_str())
        .unwrap()
        .into_iter()
        .map(|sibling| {
            let fields = codec.decrypt_record(&bundles[&sibling.id], &sibling.id).unwrap();
            fields.get("content").unwrap().to_string()
        })
        .collect();

    assert_eq!(texts, ["first", "second", "third"]);
}

#[test]
fn test_low_level_reindex_within_caller_transaction() {
    let store = MemorySiblingStore::new();
    let reindexer = Reindexer::new(store);

    for name in ["A", "B", "C"] {
        reindexer.insert("doc", &RecordId::from(name), 4).unwrap();
    }

    // A service driving the transaction itself.
    let mut tx = reindexer.store().begin("doc").unwrap();
    let position = insert_at(&mut tx, 2).unwrap();
    tx.insert(&RecordId::from("D"), i64::from(position)).unwrap();
    let removed = remove_at(&mut tx, 1).unwrap();
    tx.commit().unwrap();

    assert_eq!(removed, RecordId::from("A"));
    let order: Vec<String> =
        reindexer.siblings("doc").unwrap().into_iter().map(|s| s.id.to_string()).collect();
    assert_eq!(order, ["D", "B", "C"]);
}

proptest! {
    #[test]
    fn prop_round_trip(
        pairs in proptest::collection::btree_map("[a-z_]{1,12}", ".{0,64}", 0..8),
        id in "[0-9a-f-]{1,36}",
    ) {
        let codec = settings_codec();
        let fields = FieldMap::from_pairs(pairs).unwrap();
        let id = RecordId::new(id);

        let bundle = codec.encrypt_record(&fields, &id).unwrap();
        prop_assert_eq!(codec.decrypt_record(&bundle, &id).unwrap(), fields);
    }

    #[test]
    fn prop_any_ciphertext_bit_flip_is_detected(
        text in ".{1,64}",
        byte in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let codec = settings_codec();
        let id = RecordId::from("uuid-1");
        let fields = FieldMap::from_pairs([("body", text)]).unwrap();
        let mut bundle = codec.encrypt_record(&fields, &id).unwrap();

        let mut raw = hex::decode(&bundle.cipher_by_field["body"]).unwrap();
        let i = byte.index(raw.len());
        raw[i] ^= 1 << bit;
        bundle.cipher_by_field.insert("body".to_string(), hex::encode(raw));

        prop_assert!(
            matches!(codec.decrypt_record(&bundle, &id), Err(Error::Integrity { .. })),
            "tampered ciphertext must not decrypt"
        );
    }
}
