//! kage: multi-recipient file encryption
//!
//! Commands:
//!   keygen [-o keys.txt]                          - generate an X25519 identity
//!   encrypt (-r <recipient> | -R <file> | -p) ... - encrypt stdin or a file
//!   decrypt [-i <identity file>] ...              - decrypt stdin or a file
//!   config show                                   - display the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use kage_core::config::{KageConfig, CONFIG_ENV, IDENTITY_FILE_ENV};
use kage_crypto::{
    scrypt, x25519, AnyIdentity, AnyRecipient, DecryptError, Decryptor, IdentityFile,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "kage",
    version,
    about = "Encrypt files to X25519, SSH, and passphrase recipients"
)]
struct Cli {
    /// Path to kage.toml configuration file (default: ~/.config/kage/kage.toml)
    #[arg(long, short = 'c', env = CONFIG_ENV, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "KAGE_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text); overrides the config file
    #[arg(long, env = "KAGE_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a new X25519 identity
    Keygen {
        /// Write the identity to this file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Encrypt a file (or stdin) to one or more recipients
    Encrypt {
        /// Recipient: an age1... key or an SSH public key line (repeatable)
        #[arg(long, short = 'r')]
        recipient: Vec<String>,
        /// File of recipients, one per line (repeatable)
        #[arg(long = "recipients-file", short = 'R')]
        recipients_file: Vec<PathBuf>,
        /// Encrypt to a passphrase (prompted)
        #[arg(long, short = 'p')]
        passphrase: bool,
        /// ASCII-armor the output
        #[arg(long, short = 'a')]
        armor: bool,
        /// Output path (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Input path (default: stdin)
        input: Option<PathBuf>,
    },

    /// Decrypt a file (or stdin)
    Decrypt {
        /// Identity file (repeatable); see also KAGE_IDENTITY_FILE
        #[arg(long, short = 'i')]
        identity: Vec<PathBuf>,
        /// Output path (default: stdout)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Input path (default: stdin)
        input: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(KageConfig::default_path);
    let config = match &config_path {
        Some(path) => KageConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => KageConfig::default(),
    };

    let level = cli.log.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, format);
    debug!(version = env!("CARGO_PKG_VERSION"), "kage starting");

    match cli.command {
        Commands::Keygen { output } => cmd_keygen(output.as_deref()),
        Commands::Encrypt {
            recipient,
            recipients_file,
            passphrase,
            armor,
            output,
            input,
        } => cmd_encrypt(
            &config,
            &recipient,
            &recipients_file,
            passphrase,
            armor || config.encrypt.armor,
            input.as_deref(),
            output.as_deref(),
        ),
        Commands::Decrypt {
            identity,
            output,
            input,
        } => cmd_decrypt(&config, &identity, input.as_deref(), output.as_deref()),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, config_path.as_deref()),
    }
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("KAGE_LOG").unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries ciphertext/plaintext; logs go to stderr.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Commands ───────────────────────────────────────────────────────────────────

fn cmd_keygen(output: Option<&Path>) -> Result<()> {
    let identity = x25519::Identity::generate();
    let public = identity.to_public();
    let contents = SecretString::from(format!(
        "# public key: {public}\n{}\n",
        identity.to_string().expose_secret()
    ));

    match output {
        Some(path) => {
            let mut file = create_private(path)?;
            file.write_all(contents.expose_secret().as_bytes())
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Public key: {public}");
            info!(path = %path.display(), "identity written");
        }
        None => {
            io::stdout().write_all(contents.expose_secret().as_bytes())?;
        }
    }
    Ok(())
}

fn cmd_encrypt(
    config: &KageConfig,
    recipient_args: &[String],
    recipient_files: &[PathBuf],
    passphrase: bool,
    armor: bool,
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let mut recipients = Vec::new();
    for arg in recipient_args {
        let recipient: AnyRecipient = arg
            .parse()
            .with_context(|| format!("parsing recipient {arg:?}"))?;
        recipients.push(recipient);
    }
    for path in recipient_files {
        let parsed = kage_crypto::read_recipients_file(path)
            .with_context(|| format!("reading recipients file {}", path.display()))?;
        recipients.extend(parsed);
    }
    if passphrase {
        let pass = prompt_new_passphrase()?;
        recipients.push(AnyRecipient::from(
            scrypt::Recipient::new(pass).with_work_factor(config.encrypt.scrypt_work_factor),
        ));
    }
    debug!(recipients = recipients.len(), armor, "encrypting");

    if output.is_none() && !armor && io::stdout().is_terminal() {
        bail!("refusing to write binary ciphertext to a terminal; use --armor or --output");
    }

    if let (Some(input), Some(output)) = (input, output) {
        kage_crypto::encrypt_file(input, output, &recipients, armor)
            .with_context(|| format!("encrypting {}", input.display()))?;
        return Ok(());
    }

    let reader = open_input(input)?;
    let writer = open_output(output)?;
    kage_crypto::encrypt_io(reader, writer, &recipients, armor).inspect_err(|_| {
        remove_partial(output);
    })?;
    Ok(())
}

fn cmd_decrypt(
    config: &KageConfig,
    identity_files: &[PathBuf],
    input: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let decryptor = Decryptor::new(open_input(input)?).context("reading header")?;

    let identities = if decryptor.is_scrypt() {
        let pass = prompt_passphrase("Passphrase: ")?;
        vec![AnyIdentity::from(
            scrypt::Identity::new(pass).with_max_work_factor(config.decrypt.max_work_factor),
        )]
    } else {
        load_identities(config, identity_files)?
    };

    let mut reader = decryptor.decrypt(&identities)?;
    let mut writer = open_output(output)?;
    let result = io::copy(&mut reader, &mut writer)
        .and_then(|n| writer.flush().map(|()| n))
        .map_err(DecryptError::from_io);
    match result {
        Ok(n) => {
            debug!(bytes = n, "decrypted");
            Ok(())
        }
        Err(e) => {
            remove_partial(output);
            Err(e).context("decryption failed")
        }
    }
}

fn cmd_config_show(config: &KageConfig, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        println!("# {}", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

// ── Helpers ────────────────────────────────────────────────────────────────────

/// Identity discovery chain:
///   1. `-i` paths from the command line
///   2. $KAGE_IDENTITY_FILE
///   3. `[identity] path` from kage.toml
///   4. ~/.config/kage/keys.txt
fn load_identities(config: &KageConfig, explicit: &[PathBuf]) -> Result<Vec<AnyIdentity>> {
    let paths: Vec<PathBuf> = if !explicit.is_empty() {
        explicit.to_vec()
    } else if let Some(path) = std::env::var_os(IDENTITY_FILE_ENV).filter(|v| !v.is_empty()) {
        vec![PathBuf::from(path)]
    } else if let Some(path) = &config.identity.path {
        vec![path.clone()]
    } else {
        match KageConfig::default_identity_path().filter(|p| p.exists()) {
            Some(path) => vec![path],
            None => bail!("no identity given: pass --identity or set {IDENTITY_FILE_ENV}"),
        }
    };

    let mut identities = Vec::new();
    for path in &paths {
        let file = IdentityFile::from_file(path)
            .with_context(|| format!("reading identity file {}", path.display()))?;
        debug!(path = %path.display(), count = file.identities().len(), "identity file loaded");
        identities.extend(file.into_identities());
    }
    Ok(identities)
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    Ok(match path {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

fn remove_partial(output: Option<&Path>) {
    if let Some(path) = output {
        let _ = fs::remove_file(path);
    }
}

/// Create a file readable only by the owner; refuses to overwrite.
fn create_private(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .with_context(|| format!("creating {} (it must not already exist)", path.display()))
}

fn prompt_passphrase(prompt: &str) -> Result<SecretString> {
    let pass = rpassword::prompt_password(prompt).context("reading passphrase")?;
    Ok(SecretString::from(pass))
}

fn prompt_new_passphrase() -> Result<SecretString> {
    let first = prompt_passphrase("Passphrase: ")?;
    if first.expose_secret().is_empty() {
        bail!("passphrase must not be empty");
    }
    let second = prompt_passphrase("Confirm passphrase: ")?;
    if first.expose_secret() != second.expose_secret() {
        bail!("passphrases do not match");
    }
    Ok(first)
}
