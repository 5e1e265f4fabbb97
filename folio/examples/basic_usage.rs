//! Basic usage example for `Folio`.

use folio::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Folio Basic Usage Example");
    println!("=========================\n");

    // In production the secret comes from FOLIO_ROOT_SECRET via Settings::from_env().
    let codec = FieldCodec::new(RootSecret::generate(), CipherMode::default());
    println!("✓ Codec created with {}\n", codec.cipher_mode());

    let id = RecordId::generate();
    let fields = FieldMap::from_pairs([
        ("email", "alice@example.com"),
        ("nom", "Alice"),
        ("bio", "Writes short stories about lighthouses."),
    ])?;

    println!("Record: {id}");
    for (name, value) in fields.iter() {
        println!("  {name}: {value}");
    }

    let bundle = codec.encrypt_record(&fields, &id)?;
    println!("\nStored columns:");
    println!("  cipher: {}", cipher_columns(&bundle));
    println!("  iv:     {}", bundle.iv_joined);
    println!("  tag:    {}", bundle.tag_joined);

    let decrypted = codec.decrypt_record(&bundle, &id)?;
    assert_eq!(decrypted, fields);
    println!("\n✓ Decrypted and authenticated {} fields", decrypted.len());

    match codec.decrypt_record(&bundle, &RecordId::generate()) {
        Err(err) => println!("✓ Bundle rejected under another record id: {err}"),
        Ok(_) => println!("✗ Bundle unexpectedly opened under another record id"),
    }

    let reindexer = Reindexer::new(MemorySiblingStore::new());
    let document = "document-1";
    for (name, position) in [("A", 1), ("B", 2), ("C", 3), ("D", 2)] {
        reindexer.insert(document, &RecordId::from(name), position)?;
    }
    reindexer.remove(document, 1)?;

    println!("\nFragments of {document}:");
    for sibling in reindexer.siblings(document)? {
        println!("  {} -> {}", sibling.order, sibling.id);
    }

    Ok(())
}

fn cipher_columns(bundle: &CipherBundle) -> String {
    let entries: Vec<String> =
        bundle.cipher_by_field.iter().map(|(name, hex)| format!("{name}={hex}")).collect();
    entries.join(", ")
}
