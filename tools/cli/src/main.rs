//! Enkrypt CLI - Command line interface for sealed containers.
//!
//! Encrypts and decrypts files into the `salt | nonce | ciphertext | tag`
//! container format and stores sealed blobs in a local blob store.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use enkrypt_common::{BlobKey, SensitiveBytes};
use enkrypt_crypto::{decrypt_file, encrypt_file, CodecConfig, KdfParams, ReleasePolicy};
use enkrypt_storage::{create_default_registry, BlobStore, SealedStore};

/// Environment variable consulted before prompting for a password.
const PASSWORD_ENV: &str = "ENKRYPT_PASSWORD";

#[derive(Parser)]
#[command(name = "enkrypt")]
#[command(about = "Enkrypt - Password-based authenticated encryption")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Codec configuration file (JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// KDF preset: "reference", "interactive", "moderate", or "sensitive".
    #[arg(long, global = true)]
    kdf: Option<String>,

    /// Plaintext chunk size in bytes.
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Release plaintext before the tag is verified.
    #[arg(long, global = true)]
    streaming_release: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt a file into a container.
    Encrypt {
        /// File to encrypt.
        input: PathBuf,

        /// Container to write.
        output: PathBuf,
    },

    /// Decrypt a container into a file.
    Decrypt {
        /// Container to decrypt.
        input: PathBuf,

        /// File to write.
        output: PathBuf,
    },

    /// Seal a file and store it under a key.
    Put {
        /// Root directory of the local store.
        #[arg(short, long)]
        root: PathBuf,

        /// Source file.
        source: PathBuf,

        /// Destination key.
        key: String,
    },

    /// Fetch a sealed blob and write its plaintext to a file.
    Get {
        /// Root directory of the local store.
        #[arg(short, long)]
        root: PathBuf,

        /// Key to fetch.
        key: String,

        /// Destination file.
        dest: PathBuf,
    },

    /// Remove blobs.
    Rm {
        /// Root directory of the local store.
        #[arg(short, long)]
        root: PathBuf,

        /// Keys to remove.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// List blobs under a prefix.
    Ls {
        /// Root directory of the local store.
        #[arg(short, long)]
        root: PathBuf,

        /// Key prefix (default: everything).
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print a time-limited URL for a blob.
    Presign {
        /// Root directory of the local store.
        #[arg(short, long)]
        root: PathBuf,

        /// Key to share.
        key: String,

        /// Lifetime of the URL in seconds.
        #[arg(short, long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = build_config(&cli)?;

    match cli.command {
        Commands::Encrypt { input, output } => cmd_encrypt(&input, &output, &config),

        Commands::Decrypt { input, output } => cmd_decrypt(&input, &output, &config),

        Commands::Put { root, source, key } => cmd_put(&root, &source, &key, config).await,

        Commands::Get { root, key, dest } => cmd_get(&root, &key, &dest, config).await,

        Commands::Rm { root, keys } => cmd_rm(&root, &keys).await,

        Commands::Ls { root, prefix } => cmd_ls(&root, &prefix).await,

        Commands::Presign { root, key, ttl } => cmd_presign(&root, &key, ttl).await,

        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "enkrypt", &mut io::stdout());
            Ok(())
        }
    }
}

/// Codec configuration from the config file, overridden by flags.
fn build_config(cli: &Cli) -> Result<CodecConfig> {
    let mut config = match &cli.config {
        Some(path) => CodecConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CodecConfig::default(),
    };

    if let Some(name) = &cli.kdf {
        config = config.with_kdf(KdfParams::preset(name).context("Invalid KDF preset")?);
    }
    if let Some(chunk_size) = cli.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if cli.streaming_release {
        config = config.with_release(ReleasePolicy::Streaming);
    }

    config.validate().context("Invalid codec configuration")?;
    debug!(chunk_size = config.chunk_size, release = ?config.release, "Codec configured");
    Ok(config)
}

/// Password from the environment, or prompt for it securely.
///
/// A prompted password must be entered twice when `confirm` is set.
fn read_password(confirm: bool) -> Result<SensitiveBytes> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        let password = Zeroizing::new(password);
        if password.is_empty() {
            anyhow::bail!("{} is set but empty", PASSWORD_ENV);
        }
        return Ok(SensitiveBytes::from(password.as_str()));
    }

    let password = Zeroizing::new(
        rpassword::prompt_password("Enter password: ").context("Failed to read password")?,
    );
    if password.is_empty() {
        anyhow::bail!("Password cannot be empty");
    }

    if confirm {
        let again = Zeroizing::new(
            rpassword::prompt_password("Confirm password: ").context("Failed to read password")?,
        );
        if *password != *again {
            anyhow::bail!("Passwords do not match");
        }
    }

    Ok(SensitiveBytes::from(password.as_str()))
}

fn parse_key(key: &str) -> Result<BlobKey> {
    BlobKey::parse(key).with_context(|| format!("Invalid key: {}", key))
}

/// Open the local store rooted at `root`.
fn open_store(root: &Path) -> Result<Arc<dyn BlobStore>> {
    let registry = create_default_registry();
    registry
        .resolve("local", json!({ "root": root.to_string_lossy() }))
        .with_context(|| format!("Failed to open store at {}", root.display()))
}

fn open_sealed(root: &Path, config: CodecConfig, confirm: bool) -> Result<SealedStore> {
    let store = open_store(root)?;
    let password = read_password(confirm)?;
    SealedStore::new(store, password, config).context("Failed to set up sealed store")
}

/// Encrypt a file.
fn cmd_encrypt(input: &Path, output: &Path, config: &CodecConfig) -> Result<()> {
    info!("Encrypting {} to {}", input.display(), output.display());

    let password = read_password(true)?;
    let written = encrypt_file(password.as_bytes(), input, output, config)
        .context("Failed to encrypt file")?;

    println!("Encrypted {} ({} bytes)", output.display(), written);
    Ok(())
}

/// Decrypt a file.
fn cmd_decrypt(input: &Path, output: &Path, config: &CodecConfig) -> Result<()> {
    info!("Decrypting {} to {}", input.display(), output.display());

    let password = read_password(false)?;
    let written = decrypt_file(password.as_bytes(), input, output, config)
        .context("Failed to decrypt file")?;

    println!("Decrypted {} ({} bytes)", output.display(), written);
    Ok(())
}

/// Seal a file into the store.
async fn cmd_put(root: &Path, source: &Path, key: &str, config: CodecConfig) -> Result<()> {
    let key = parse_key(key)?;
    info!("Storing {} as {}", source.display(), key);

    let sealed = open_sealed(root, config, true)?;
    let metadata = sealed
        .upload_file(&key, source)
        .await
        .context("Failed to store file")?;

    println!("Stored {} ({} bytes sealed)", metadata.key, metadata.size);
    Ok(())
}

/// Open a sealed blob into a file.
async fn cmd_get(root: &Path, key: &str, dest: &Path, config: CodecConfig) -> Result<()> {
    let key = parse_key(key)?;
    info!("Fetching {} to {}", key, dest.display());

    let sealed = open_sealed(root, config, false)?;
    let written = sealed
        .download_file(&key, dest)
        .await
        .context("Failed to fetch blob")?;

    println!("Wrote {} ({} bytes)", dest.display(), written);
    Ok(())
}

/// Remove blobs from the store.
async fn cmd_rm(root: &Path, keys: &[String]) -> Result<()> {
    let keys = keys
        .iter()
        .map(|k| parse_key(k))
        .collect::<Result<Vec<_>>>()?;

    let store = open_store(root)?;
    let removed = store
        .delete_many(&keys)
        .await
        .context("Failed to remove blobs")?;

    println!("Removed {} of {} blobs", removed, keys.len());
    Ok(())
}

/// List blobs in the store.
async fn cmd_ls(root: &Path, prefix: &str) -> Result<()> {
    let store = open_store(root)?;
    let entries = store.list(prefix).await.context("Failed to list blobs")?;

    if entries.is_empty() {
        println!("No blobs found.");
    } else {
        for entry in entries {
            println!(
                "  {} ({} bytes, {})",
                entry.key,
                entry.size,
                entry.modified.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}

/// Print a presigned URL.
async fn cmd_presign(root: &Path, key: &str, ttl: u64) -> Result<()> {
    let key = parse_key(key)?;
    let store = open_store(root)?;
    let url = store
        .presigned_url(&key, Duration::from_secs(ttl))
        .await
        .context("Failed to presign blob")?;

    println!("{}", url);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "enkrypt",
            "--kdf",
            "interactive",
            "--chunk-size",
            "4096",
            "--streaming-release",
            "ls",
            "--root",
            "/tmp",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.kdf, KdfParams::interactive());
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.release, ReleasePolicy::Streaming);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["enkrypt", "encrypt", "in.txt", "out.bin"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config, CodecConfig::default());
    }

    #[test]
    fn test_bad_preset_rejected() {
        let cli = Cli::parse_from(["enkrypt", "--kdf", "nope", "ls", "--root", "/tmp"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_config_file_then_flags() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("codec.json");
        std::fs::write(&path, r#"{"chunk_size": 128, "release": "streaming"}"#).unwrap();

        let cli = Cli::parse_from([
            "enkrypt",
            "--config",
            path.to_str().unwrap(),
            "--chunk-size",
            "256",
            "ls",
            "--root",
            "/tmp",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.release, ReleasePolicy::Streaming);
    }

    #[test]
    fn test_parse_key() {
        assert!(parse_key("a/b").is_ok());
        assert!(parse_key("../etc").is_err());
    }
}
