//! deployvfs binary
//!
//! Command-line access to the deployment VFS.
//!
//! ## Usage
//!
//! ```bash
//! deployvfs extract app.ear /srv/deploy/app      # unpack, flattening nested archives
//! deployvfs pack ./site site.zip                  # stream a directory as a ZIP
//! deployvfs ls app.ear WEB-INF                    # list inside an archive
//! deployvfs cat app.ear META-INF/MANIFEST.MF      # print one entry
//! deployvfs manifest app.jar                      # print main manifest attributes
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use deployvfs_kernel::vfs::{MountHandle, Vfs, VfsOps, VirtualPath};
use deployvfs_kernel::{ArchiveExtractor, VfsConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where archives are mounted for `ls`, `cat` and `manifest`.
const ARCHIVE_POINT: &str = "/app";

#[derive(Parser, Debug)]
#[command(name = "deployvfs")]
#[command(about = "Mount, extract and stream deployment archives")]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extract archives to a temp directory instead of reading them in place
    #[arg(long, global = true)]
    expanded: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract an archive (or copy a directory) into a target directory
    Extract { source: PathBuf, target: PathBuf },
    /// Write a directory as a ZIP archive
    Pack { dir: PathBuf, out: PathBuf },
    /// List a directory inside an archive
    Ls {
        archive: PathBuf,
        #[arg(default_value = "")]
        path: String,
    },
    /// Print one entry of an archive
    Cat { archive: PathBuf, path: String },
    /// Print the main manifest attributes of an archive
    Manifest { archive: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => VfsConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VfsConfig::default(),
    };

    match args.command {
        Command::Extract { source, target } => {
            let extractor = ArchiveExtractor::new(config.nested());
            tokio::task::spawn_blocking(move || extractor.extract(&source, &target)).await??;
            Ok(())
        }
        Command::Pack { dir, out } => {
            let vfs = Arc::new(Vfs::new(&config)?);
            let handle = vfs.mount_real(&dir, "/pack")?;
            let result = pack(&vfs, &out).await;
            handle.close();
            result
        }
        Command::Ls { archive, path } => {
            let vfs = Vfs::new(&config)?;
            let handle = mount_archive(&vfs, &archive, args.expanded).await?;
            let result = ls(&vfs, &path).await;
            handle.close();
            result
        }
        Command::Cat { archive, path } => {
            let vfs = Vfs::new(&config)?;
            let handle = mount_archive(&vfs, &archive, args.expanded).await?;
            let result = cat(&vfs, &path).await;
            handle.close();
            result
        }
        Command::Manifest { archive } => {
            let vfs = Vfs::new(&config)?;
            let handle = mount_archive(&vfs, &archive, args.expanded).await?;
            let result = manifest(&vfs).await;
            handle.close();
            result
        }
    }
}

async fn mount_archive(vfs: &Vfs, archive: &Path, expanded: bool) -> Result<MountHandle> {
    let handle = if expanded {
        vfs.mount_zip_expanded(archive, ARCHIVE_POINT).await
    } else if archive.is_dir() {
        vfs.mount_real(archive, ARCHIVE_POINT)
    } else {
        vfs.mount_zip(archive, ARCHIVE_POINT)
    };
    handle.with_context(|| format!("mounting {}", archive.display()))
}

fn in_archive(path: &str) -> Result<PathBuf> {
    let full = VirtualPath::new(ARCHIVE_POINT)?.join(path)?;
    if full.relative_to(&VirtualPath::new(ARCHIVE_POINT)?).is_none() {
        bail!("{} is outside the archive", path);
    }
    Ok(PathBuf::from(full.as_str()))
}

async fn pack(vfs: &Arc<Vfs>, out: &Path) -> Result<()> {
    let mut stream = vfs.pack("/pack").await?;
    let mut file = std::io::BufWriter::new(
        std::fs::File::create(out).with_context(|| format!("creating {}", out.display()))?,
    );
    let written = stream.copy_to(&mut file).await?;
    file.flush()?;
    tracing::info!("wrote {} bytes to {}", written, out.display());
    Ok(())
}

async fn ls(vfs: &Vfs, path: &str) -> Result<()> {
    let dir = in_archive(path)?;
    let entries = vfs.readdir(&dir).await?;
    let mut stdout = std::io::stdout().lock();
    for entry in entries {
        let child = dir.join(&entry.name);
        let attr = vfs.getattr(&child).await?;
        if attr.is_dir() {
            writeln!(stdout, "{:>10}  {}/", "-", entry.name)?;
        } else {
            writeln!(stdout, "{:>10}  {}", attr.size, entry.name)?;
        }
    }
    Ok(())
}

async fn cat(vfs: &Vfs, path: &str) -> Result<()> {
    let data = vfs.read_all(&in_archive(path)?).await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data)?;
    stdout.flush()?;
    Ok(())
}

async fn manifest(vfs: &Vfs) -> Result<()> {
    let Some(manifest) = vfs.manifest(ARCHIVE_POINT).await? else {
        bail!("no manifest in archive");
    };
    let mut stdout = std::io::stdout().lock();
    for (name, value) in manifest.main_attributes().iter() {
        writeln!(stdout, "{}: {}", name, value)?;
    }
    Ok(())
}
