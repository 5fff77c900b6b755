//! CipherDrop CLI - encrypt, store and share files from the command line.
//!
//! Files are encrypted locally before upload. Share links carry the key in
//! the URL fragment, so whoever holds the link can decrypt, and nobody else.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cipherdrop_app::{AppConfig, AppContext};
use cipherdrop_common::{ContentId, Error, LinkId};
use cipherdrop_share::ShareUrl;

#[derive(Parser)]
#[command(name = "cipherdrop")]
#[command(about = "CipherDrop - Encrypted file storage with expiring share links")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/cipherdrop/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and upload a file.
    Upload {
        /// File to upload.
        #[arg(short, long)]
        file: PathBuf,

        /// MIME type (default: guessed from the extension).
        #[arg(short, long)]
        mime: Option<String>,

        /// Also create a share link.
        #[arg(short, long)]
        share: bool,

        /// Share link lifetime in seconds.
        #[arg(long)]
        ttl: Option<u64>,

        /// Share link redemption limit.
        #[arg(long)]
        max: Option<u32>,
    },

    /// Download and decrypt an uploaded file with the local key.
    Download {
        /// Content identifier.
        #[arg(long)]
        cid: String,

        /// Output file (default: original file name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List uploaded files.
    List,

    /// Delete a file, its key and every share link to it.
    Delete {
        /// Content identifier.
        #[arg(long)]
        cid: String,
    },

    /// Create a share link for an uploaded file.
    Share {
        /// Content identifier.
        #[arg(long)]
        cid: String,

        /// Link lifetime in seconds.
        #[arg(long)]
        ttl: Option<u64>,

        /// Redemption limit.
        #[arg(long)]
        max: Option<u32>,
    },

    /// Redeem a share link and save the decrypted file.
    Open {
        /// Share URL including the #key= fragment.
        url: String,

        /// Output file (default: original file name).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the state of a share link without redeeming it.
    Status {
        /// Link id or share URL.
        link: String,
    },

    /// Revoke a share link.
    Revoke {
        /// Link id or share URL.
        link: String,
    },

    /// Delete all expired share links.
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG overrides the verbosity flag.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    debug!(config = %config_path.display(), "Loaded configuration");

    let ctx = AppContext::open(config).context("Failed to open CipherDrop data")?;

    match cli.command {
        Commands::Upload {
            file,
            mime,
            share,
            ttl,
            max,
        } => cmd_upload(&ctx, &file, mime, share, ttl, max).await,

        Commands::Download { cid, output } => cmd_download(&ctx, &cid, output).await,

        Commands::List => cmd_list(&ctx).await,

        Commands::Delete { cid } => cmd_delete(&ctx, &cid).await,

        Commands::Share { cid, ttl, max } => cmd_share(&ctx, &cid, ttl, max).await,

        Commands::Open { url, output } => cmd_open(&ctx, &url, output).await,

        Commands::Status { link } => cmd_status(&ctx, &link).await,

        Commands::Revoke { link } => cmd_revoke(&ctx, &link).await,

        Commands::Purge => cmd_purge(&ctx).await,
    }
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cipherdrop")
        .join("config.json")
}

/// Attach the user-facing message to a core error.
fn explain(err: Error) -> anyhow::Error {
    let message = err.user_message();
    anyhow::Error::new(err).context(message)
}

fn parse_cid(cid: &str) -> Result<ContentId> {
    ContentId::new(cid).map_err(explain).context("Invalid content identifier")
}

/// Accept either a bare link id or a full share URL.
fn parse_link(link: &str) -> Result<LinkId> {
    if link.contains("://") {
        let url = ShareUrl::parse(link).map_err(explain)?;
        return Ok(*url.id());
    }
    link.parse::<LinkId>().map_err(explain)
}

/// Create `path` for writing, refusing to clobber an existing file.
async fn create_new(path: &Path) -> Result<File> {
    match OpenOptions::new().write(true).create_new(true).open(path).await {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            anyhow::bail!("Refusing to overwrite existing file {}", path.display())
        }
        Err(e) => Err(e).with_context(|| format!("Failed to create {}", path.display())),
    }
}

/// Create a file named after `path`, adding ` (n)` before the extension
/// while the name is taken.
async fn create_unique(path: &Path) -> Result<(PathBuf, File)> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 0..100u32 {
        let candidate = if n == 0 {
            path.to_path_buf()
        } else {
            let name = match &ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            path.with_file_name(name)
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate).await {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to create {}", candidate.display()))
            }
        }
    }
    anyhow::bail!("No free file name next to {}", path.display())
}

async fn write_all(mut file: File, path: &Path, content: &[u8]) -> Result<()> {
    file.write_all(content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Keep only the final path component of a stored file name.
fn safe_file_name(name: &str) -> PathBuf {
    Path::new(name)
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("download.bin"))
}

/// Encrypt and upload a file.
async fn cmd_upload(
    ctx: &AppContext,
    file: &Path,
    mime: Option<String>,
    share: bool,
    ttl: Option<u64>,
    max: Option<u32>,
) -> Result<()> {
    info!("Uploading {}", file.display());

    let content = tokio::fs::read(file)
        .await
        .context("Failed to read source file")?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("Source path has no usable file name")?;
    let mime = mime.unwrap_or_else(|| {
        mime_guess::from_path(file)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    let receipt = ctx
        .files()
        .upload(file_name, &mime, &content)
        .await
        .map_err(explain)
        .context("Failed to upload file")?;

    println!("File uploaded successfully!");
    println!("  CID: {}", receipt.record.cid);
    println!("  Name: {}", receipt.record.file_name);
    println!("  Size: {} bytes", receipt.record.file_size);
    println!("  Type: {}", receipt.record.mime_type);

    if share {
        let issued = ctx
            .share_file(&receipt.record.cid, ttl.map(Duration::from_secs), max)
            .await
            .map_err(explain)
            .context("Failed to create share link")?;
        println!("  Share link: {}", issued.url);
        println!("  Expires: {}", issued.link.expires_at);
    }

    Ok(())
}

/// Download and decrypt a file.
async fn cmd_download(ctx: &AppContext, cid: &str, output: Option<PathBuf>) -> Result<()> {
    let cid = parse_cid(cid)?;
    let (record, content) = ctx
        .files()
        .download(&cid)
        .await
        .map_err(explain)
        .context("Failed to download file")?;

    let dest = output.unwrap_or_else(|| safe_file_name(&record.file_name));
    let file = create_new(&dest).await?;
    write_all(file, &dest, &content).await?;

    println!(
        "File downloaded successfully: {} ({} bytes)",
        dest.display(),
        content.len()
    );
    Ok(())
}

/// List uploaded files.
async fn cmd_list(ctx: &AppContext) -> Result<()> {
    let files = ctx
        .files()
        .list()
        .await
        .map_err(explain)
        .context("Failed to list files")?;

    if files.is_empty() {
        println!("No files uploaded.");
        return Ok(());
    }

    println!("Uploaded files:");
    for file in files {
        println!(
            "  {}  {} ({} bytes, {}, {})",
            file.cid,
            file.file_name,
            file.file_size,
            file.mime_type,
            file.uploaded_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Delete a file.
async fn cmd_delete(ctx: &AppContext, cid: &str) -> Result<()> {
    let cid = parse_cid(cid)?;
    ctx.files()
        .delete(&cid)
        .await
        .map_err(explain)
        .context("Failed to delete file")?;

    println!("File deleted: {}", cid);
    Ok(())
}

/// Create a share link.
async fn cmd_share(ctx: &AppContext, cid: &str, ttl: Option<u64>, max: Option<u32>) -> Result<()> {
    let cid = parse_cid(cid)?;
    let issued = ctx
        .share_file(&cid, ttl.map(Duration::from_secs), max)
        .await
        .map_err(explain)
        .context("Failed to create share link")?;

    println!("{}", issued.url);
    eprintln!(
        "Link {} allows {} access(es) until {}",
        issued.link.id, issued.link.max_access_count, issued.link.expires_at
    );
    Ok(())
}

/// Redeem a share link.
///
/// An explicit output file is created before the link is redeemed, so a
/// taken destination never costs a redemption. Without one, the shared file
/// name is used and a free variant is picked if it is taken.
async fn cmd_open(ctx: &AppContext, url: &str, output: Option<PathBuf>) -> Result<()> {
    let url = ShareUrl::parse(url).map_err(explain)?;
    let reserved = match output {
        Some(path) => {
            let file = create_new(&path).await?;
            Some((path, file))
        }
        None => None,
    };

    let opened = match ctx.links().open(&url).await {
        Ok(opened) => opened,
        Err(e) => {
            if let Some((path, file)) = reserved {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    debug!(path = %path.display(), error = %rm, "Failed to remove reserved output");
                }
            }
            return Err(explain(e)).context("Failed to open share link");
        }
    };

    let (dest, file) = match reserved {
        Some(reserved) => reserved,
        None => create_unique(&safe_file_name(&opened.file_name)).await?,
    };
    write_all(file, &dest, &opened.content).await?;

    println!(
        "Saved {} ({} bytes, {})",
        dest.display(),
        opened.content.len(),
        opened.mime_type
    );
    println!("Remaining accesses: {}", opened.remaining);
    Ok(())
}

/// Show link state.
async fn cmd_status(ctx: &AppContext, link: &str) -> Result<()> {
    let id = parse_link(link)?;
    let status = ctx
        .links()
        .status(&id)
        .await
        .map_err(explain)
        .context("Failed to read share link")?;

    println!("Link {}: {}", id, status.state);
    if let Some(link) = status.link {
        println!("  File: {}", link.file_cid);
        println!("  Accesses: {}/{}", link.access_count, link.max_access_count);
        println!("  Created: {}", link.created_at);
        println!("  Expires: {}", link.expires_at);
    }
    Ok(())
}

/// Revoke a link.
async fn cmd_revoke(ctx: &AppContext, link: &str) -> Result<()> {
    let id = parse_link(link)?;
    ctx.links()
        .revoke(&id)
        .await
        .map_err(explain)
        .context("Failed to revoke share link")?;

    println!("Link revoked: {}", id);
    Ok(())
}

/// Remove expired links.
async fn cmd_purge(ctx: &AppContext) -> Result<()> {
    let removed = ctx
        .links()
        .purge_expired()
        .await
        .map_err(explain)
        .context("Failed to purge share links")?;

    println!("Removed {} expired link(s)", removed);
    Ok(())
}
