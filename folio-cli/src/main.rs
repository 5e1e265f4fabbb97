//! `Folio` CLI tool for field encryption and sibling ordering.

#![warn(clippy::pedantic, clippy::nursery)]

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use folio::prelude::*;
use folio_sqlite::SqliteStore;
use secrecy::ExposeSecret;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Folio field encryption and ordering CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new root secret for FOLIO_ROOT_SECRET
    Keygen,
    /// Validate configuration and run an encryption self-test
    Check,
    /// Encrypt fields of a record and print the cipher bundle as JSON
    Encrypt {
        /// Record identifier the bundle is bound to
        #[arg(long)]
        record_id: String,
        /// Fields as name=value pairs
        #[arg(required = true, value_parser = parse_field)]
        fields: Vec<(String, String)>,
        /// Also save the bundle to the database
        #[arg(long)]
        store: bool,
    },
    /// Decrypt a cipher bundle and print the fields as JSON
    Decrypt {
        /// Record identifier the bundle is bound to
        #[arg(long)]
        record_id: String,
        /// Read the bundle JSON from this file instead of stdin
        #[arg(long, conflicts_with = "stored")]
        input: Option<PathBuf>,
        /// Load the bundle from the database
        #[arg(long)]
        stored: bool,
    },
    /// Re-encrypt stored bundles under a new root secret
    Rotate {
        /// Only rotate this record (default: every stored bundle)
        #[arg(long)]
        record_id: Option<String>,
        /// Environment variable holding the new root secret
        #[arg(long)]
        new_secret_env: String,
        /// Cipher for the re-encrypted bundles (default: current cipher)
        #[arg(long)]
        new_cipher_mode: Option<CipherMode>,
    },
    /// Manage sibling orders in the database
    Order {
        #[command(subcommand)]
        command: OrderCommands,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// Insert a record at a position, shifting later siblings up
    Insert {
        /// Parent scope identifier
        scope: String,
        /// Record identifier
        record_id: String,
        /// 1-based target position (past the end appends)
        position: u32,
    },
    /// Remove the record at a position, shifting later siblings down
    Remove {
        /// Parent scope identifier
        scope: String,
        /// 1-based position
        position: u32,
    },
    /// Move the record at one position to another
    Move {
        /// Parent scope identifier
        scope: String,
        /// Current 1-based position
        from: u32,
        /// Target 1-based position
        to: u32,
    },
    /// List siblings of a scope in order
    List {
        /// Parent scope identifier
        scope: String,
    },
}

fn parse_field(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected name=value, got `{s}`"))
}

fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .context("failed to initialise tracing subscriber")
}

fn load_settings() -> Result<Settings> {
    let settings = Settings::from_env().context("failed to load configuration")?;
    init_tracing(&settings.log_level)?;
    Ok(settings)
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn fields_json(fields: &FieldMap) -> serde_json::Value {
    fields
        .iter()
        .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen => keygen(),
        Commands::Check => check(),
        Commands::Encrypt { record_id, fields, store } => encrypt(record_id, fields, store),
        Commands::Decrypt { record_id, input, stored } => decrypt(record_id, input, stored),
        Commands::Rotate { record_id, new_secret_env, new_cipher_mode } => {
            rotate(record_id, &new_secret_env, new_cipher_mode)
        }
        Commands::Order { command } => order(command),
    }
}

fn keygen() -> Result<()> {
    let secret = RootSecret::generate_encoded();
    println!("FOLIO_ROOT_SECRET={}", secret.expose_secret());
    Ok(())
}

fn check() -> Result<()> {
    let settings = load_settings()?;
    println!("cipher mode:   {}", settings.cipher_mode);
    println!("database path: {}", settings.database_path.display());
    println!("log level:     {}", settings.log_level);

    let store = open_store(&settings.database_path)?;
    let stored = store.bundles().context("failed to read stored bundles")?.len();
    println!("stored bundles: {stored}");

    let codec = settings.into_codec();
    let probe_id = RecordId::generate();
    let probe = FieldMap::from_pairs([("probe", "folio self-test")])?;
    let bundle = codec.encrypt_record(&probe, &probe_id).context("self-test encryption failed")?;
    let opened = codec.decrypt_record(&bundle, &probe_id).context("self-test decryption failed")?;
    if opened != probe {
        bail!("self-test round trip returned different fields");
    }

    println!("self-test:     ok");
    Ok(())
}

fn encrypt(record_id: String, fields: Vec<(String, String)>, store: bool) -> Result<()> {
    let settings = load_settings()?;
    let db = store.then(|| open_store(&settings.database_path)).transpose()?;
    let codec = settings.into_codec();

    let record_id = RecordId::new(record_id);
    let fields = FieldMap::from_pairs(fields)?;
    let bundle = codec.encrypt_record(&fields, &record_id).context("encryption failed")?;

    if let Some(db) = db {
        db.save_bundle(&record_id, &bundle).context("failed to save bundle")?;
        info!(record_id = %record_id, "bundle saved");
    }

    println!("{}", serde_json::to_string_pretty(&bundle)?);
    Ok(())
}

fn decrypt(record_id: String, input: Option<PathBuf>, stored: bool) -> Result<()> {
    let settings = load_settings()?;
    let record_id = RecordId::new(record_id);

    let bundle: CipherBundle = if stored {
        open_store(&settings.database_path)?
            .load_bundle(&record_id)
            .context("failed to load bundle")?
            .with_context(|| format!("no bundle stored for record {record_id}"))?
    } else {
        let json = match input {
            Some(path) => fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => {
                let mut json = String::new();
                io::stdin().read_to_string(&mut json).context("failed to read stdin")?;
                json
            }
        };
        serde_json::from_str(&json).context("input is not a cipher bundle")?
    };

    let codec = settings.into_codec();
    let fields = codec
        .decrypt_record(&bundle, &record_id)
        .map_err(|e| {
            warn!(record_id = %record_id, error = %e, "bundle rejected");
            anyhow::anyhow!(e.public_message())
        })
        .context("decryption failed")?;

    println!("{}", serde_json::to_string_pretty(&fields_json(&fields))?);
    Ok(())
}

fn rotate(
    record_id: Option<String>,
    new_secret_env: &str,
    new_cipher_mode: Option<CipherMode>,
) -> Result<()> {
    let settings = load_settings()?;
    let store = open_store(&settings.database_path)?;
    let new_secret = RootSecret::from_env(new_secret_env)?;
    let new_mode = new_cipher_mode.unwrap_or(settings.cipher_mode);
    let current = settings.into_codec();
    let target = FieldCodec::new(new_secret, new_mode);

    let bundles = match record_id {
        Some(id) => {
            let id = RecordId::new(id);
            let bundle = store
                .load_bundle(&id)
                .context("failed to load bundle")?
                .with_context(|| format!("no bundle stored for record {id}"))?;
            vec![(id, bundle)]
        }
        None => store.bundles().context("failed to read stored bundles")?,
    };

    let mut rotated = 0usize;
    let mut failed = 0usize;
    for (id, bundle) in &bundles {
        match current.reseal(bundle, id, &target) {
            Ok(resealed) => {
                store.save_bundle(id, &resealed).context("failed to save bundle")?;
                rotated += 1;
            }
            Err(e) => {
                warn!(record_id = %id, error = %e, "bundle not rotated");
                failed += 1;
            }
        }
    }

    println!("rotated {rotated} bundle(s) to {new_mode}, {failed} failed");
    if failed > 0 {
        bail!("{failed} bundle(s) could not be decrypted with the current secret");
    }
    Ok(())
}

fn order(command: OrderCommands) -> Result<()> {
    let settings = StoreSettings::from_env().context("failed to load configuration")?;
    init_tracing(&settings.log_level)?;
    let reindexer = Reindexer::new(open_store(&settings.database_path)?);

    for line in run_order(&reindexer, command)? {
        println!("{line}");
    }
    Ok(())
}

fn run_order(reindexer: &Reindexer<SqliteStore>, command: OrderCommands) -> Result<Vec<String>> {
    let lines = match command {
        OrderCommands::Insert { scope, record_id, position } => {
            let taken = reindexer.insert(&scope, &RecordId::new(record_id), position)?;
            vec![format!("inserted at {taken}")]
        }
        OrderCommands::Remove { scope, position } => {
            let removed = reindexer.remove(&scope, position)?;
            vec![format!("removed {removed}")]
        }
        OrderCommands::Move { scope, from, to } => {
            let taken = reindexer.move_to(&scope, from, to)?;
            vec![format!("moved to {taken}")]
        }
        OrderCommands::List { scope } => reindexer
            .siblings(&scope)?
            .into_iter()
            .map(|sibling| format!("{}\t{}", sibling.order, sibling.id))
            .collect(),
    };
    Ok(lines)
}
