//! stfe: Simple Twofish Editor command-line host
//!
//! Commands:
//!   encrypt <input> [-o <output>]  - encrypt a text file into a .twofish document
//!   decrypt <input> [-o <output>]  - decrypt a document to stdout or a file
//!   rekey <file>                   - re-encrypt a document under a new password
//!   digest <file>                  - print the SHA-512 digest of a file
//!   selftest                       - run the Twofish / SHA-512 known-answer tests
//!   config show                    - display current configuration
//!
//! The self-test runs before any command is dispatched; if it fails the
//! process exits with status 255 without touching any file.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use zeroize::Zeroizing;

use stfe_core::config::{expand_tilde, StfeConfig};
use stfe_crypto::{
    decrypt_payload, decrypt_text, encrypt_payload, inspect, selftest, sha512, Enclave,
    PayloadKind,
};

/// Exit status when the crypto self-test fails
const SELFTEST_EXIT_CODE: i32 = 255;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "stfe",
    version,
    about = "Simple Twofish Editor",
    long_about = "stfe: encrypt and decrypt text documents with Twofish-256 and SHA-512 integrity checks"
)]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "STFE_CONFIG",
        default_value = "~/.config/stfe/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "STFE_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "STFE_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt a plaintext file into a document
    ///
    /// An empty input produces an empty document, which needs no password.
    Encrypt {
        /// Plaintext file to read
        input: PathBuf,
        /// Output document (default: input with the configured extension)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Replace an existing output file
        #[arg(long)]
        force: bool,
        /// Password (prompted for when absent)
        #[arg(long, env = "STFE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Decrypt a document
    Decrypt {
        /// Document to read
        input: PathBuf,
        /// Write the text here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Replace an existing output file
        #[arg(long)]
        force: bool,
        /// Password (prompted for when absent)
        #[arg(long, env = "STFE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Change the password of a document in place
    Rekey {
        /// Document to re-encrypt
        file: PathBuf,
        /// Current password (prompted for when absent)
        #[arg(long, env = "STFE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        /// New password (prompted for when absent)
        #[arg(long, env = "STFE_NEW_PASSWORD", hide_env_values = true)]
        new_password: Option<String>,
    },

    /// Print the SHA-512 digest of a file
    Digest {
        /// File to hash
        file: PathBuf,
    },

    /// Run the known-answer self-test and report the result
    Selftest,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = stfe_core::load_config(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    if !config_path.exists() {
        warn!(
            "config file not found: {}  (using defaults)",
            config_path.display()
        );
    }

    if let Err(e) = selftest::verify() {
        error!(error = %e, "refusing to start");
        eprintln!("stfe: {e}");
        std::process::exit(SELFTEST_EXIT_CODE);
    }

    match cli.command {
        Commands::Encrypt { input, output, force, password } => {
            cmd_encrypt(&config, &input, output.as_deref(), force, password)
        }
        Commands::Decrypt { input, output, force, password } => {
            cmd_decrypt(&config, &input, output.as_deref(), force, password)
        }
        Commands::Rekey { file, password, new_password } => {
            cmd_rekey(&config, &file, password, new_password)
        }
        Commands::Digest { file } => cmd_digest(&file),
        Commands::Selftest => cmd_selftest(),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Password and file helpers ─────────────────────────────────────────────────

/// Whether a password unlocks an existing document or protects a new one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PasswordUse {
    Existing,
    New { confirm: bool },
}

/// Use the provided password, or prompt for one on the terminal.
///
/// A new password must be non-empty whatever its source. With `confirm`, a
/// prompted new password is asked twice and both entries must match.
fn obtain_password(
    provided: Option<String>,
    prompt: &str,
    usage: PasswordUse,
) -> Result<SecretString> {
    let prompted = provided.is_none();
    let password = match provided {
        Some(password) => SecretString::from(password),
        None => read_password(&format!("{prompt}: "))?,
    };

    let PasswordUse::New { confirm } = usage else {
        return Ok(password);
    };
    if password.expose_secret().is_empty() {
        anyhow::bail!("password must not be empty");
    }
    if confirm && prompted {
        let again = read_password("Verify password: ")?;
        if password.expose_secret() != again.expose_secret() {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(password)
}

fn read_password(prompt: &str) -> Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(password))
}

/// Refuse to clobber an existing file unless forced or allowed by config.
fn ensure_writable(config: &StfeConfig, path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force && !config.files.overwrite {
        anyhow::bail!(
            "{} already exists. Use --force to replace it.",
            path.display()
        );
    }
    Ok(())
}

/// Replace `path` with `contents` without ever leaving it truncated.
///
/// Writes a `.<name>.tmp` sibling in the same directory, syncs it, then
/// renames it over `path`. On failure the temp file is removed and the
/// previous contents of `path` are untouched.
fn atomic_replace(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .with_context(|| format!("not a file path: {}", path.display()))?;
    let tmp_path = parent.join(format!(".{}.tmp", name.to_string_lossy()));

    let written = std::fs::File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&tmp_path, path));

    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("writing: {}", path.display()));
    }
    Ok(())
}

fn default_output(config: &StfeConfig, input: &Path) -> PathBuf {
    input.with_extension(config.extension())
}

// ── `stfe encrypt` ────────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &StfeConfig,
    input: &Path,
    output: Option<&Path>,
    force: bool,
    password: Option<String>,
) -> Result<()> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output(config, input));
    ensure_writable(config, &output, force)?;

    let plaintext = Zeroizing::new(
        std::fs::read(input).with_context(|| format!("reading: {}", input.display()))?,
    );

    let mut enclave = Enclave::new();
    if !plaintext.is_empty() {
        let password = obtain_password(
            password,
            "Password for encryption",
            PasswordUse::New {
                confirm: config.password.confirm,
            },
        )?;
        enclave.set_password(password.expose_secret().as_bytes());
    }

    let payload = encrypt_payload(&enclave, &plaintext);
    enclave.invalidate();
    let payload = payload.context("encryption failed")?;

    atomic_replace(&output, &payload)?;

    info!(
        input = %input.display(),
        output = %output.display(),
        bytes = payload.len(),
        "document encrypted"
    );
    println!("Encrypted {} → {}", input.display(), output.display());
    Ok(())
}

// ── `stfe decrypt` ────────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &StfeConfig,
    input: &Path,
    output: Option<&Path>,
    force: bool,
    password: Option<String>,
) -> Result<()> {
    if let Some(path) = output {
        ensure_writable(config, path, force)?;
    }

    let payload = std::fs::read(input).with_context(|| format!("reading: {}", input.display()))?;

    // Reject foreign or truncated files before asking for a password
    let kind = inspect(&payload).with_context(|| format!("opening {}", input.display()))?;

    let mut enclave = Enclave::new();
    if kind == PayloadKind::Encrypted {
        let password = obtain_password(password, "Password for decryption", PasswordUse::Existing)?;
        enclave.set_password(password.expose_secret().as_bytes());
    }

    let text = decrypt_text(&enclave, &payload);
    enclave.invalidate();
    let text = Zeroizing::new(text.with_context(|| format!("decrypting {}", input.display()))?);

    match output {
        Some(path) => {
            atomic_replace(path, text.as_bytes())?;
            info!(input = %input.display(), output = %path.display(), "document decrypted");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(text.as_bytes())
                .and_then(|_| stdout.flush())
                .context("writing to stdout")?;
        }
    }
    Ok(())
}

// ── `stfe rekey` ──────────────────────────────────────────────────────────────

fn cmd_rekey(
    config: &StfeConfig,
    file: &Path,
    password: Option<String>,
    new_password: Option<String>,
) -> Result<()> {
    let payload = std::fs::read(file).with_context(|| format!("reading: {}", file.display()))?;
    let kind = inspect(&payload).with_context(|| format!("opening {}", file.display()))?;

    let mut enclave = Enclave::new();
    if kind == PayloadKind::Encrypted {
        let password = obtain_password(password, "Current password", PasswordUse::Existing)?;
        enclave.set_password(password.expose_secret().as_bytes());
    }
    let plaintext = decrypt_payload(&enclave, &payload);
    enclave.invalidate();
    let plaintext =
        Zeroizing::new(plaintext.with_context(|| format!("decrypting {}", file.display()))?);

    if plaintext.is_empty() {
        println!("{} is an empty document, nothing to re-encrypt.", file.display());
        return Ok(());
    }

    let new_password = obtain_password(
        new_password,
        "New password",
        PasswordUse::New {
            confirm: config.password.confirm,
        },
    )?;
    enclave.set_password(new_password.expose_secret().as_bytes());
    let rekeyed = encrypt_payload(&enclave, &plaintext);
    enclave.invalidate();
    let rekeyed = rekeyed.context("encryption failed")?;

    atomic_replace(file, &rekeyed)?;

    info!(file = %file.display(), "document re-encrypted under new password");
    println!("Password changed for {}", file.display());
    Ok(())
}

// ── `stfe digest` ─────────────────────────────────────────────────────────────

fn cmd_digest(file: &Path) -> Result<()> {
    let digest = digest_file(file)?;
    println!("{}  {}", hex::encode(digest), file.display());
    Ok(())
}

/// Hash a file through the incremental interface without reading it whole.
fn digest_file(path: &Path) -> Result<sha512::Digest> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("opening file for hashing: {}", path.display()))?;

    let mut hasher = sha512::Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buf).context("reading for hash")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

// ── `stfe selftest` ───────────────────────────────────────────────────────────

fn cmd_selftest() -> Result<()> {
    selftest::verify().context("self-test")?;
    println!("Self-test passed: Twofish (49-round key feedback), SHA-512 (known digest)");
    Ok(())
}

// ── `stfe config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &StfeConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
