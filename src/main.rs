use clap::{Parser, Subcommand};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tqarc::archive::{ArcOptions, Archive, OpenMode};
use tqarc::entry::EntryKind;
use tqarc::format::Format;
use tqarc::store::MemStore;

#[derive(Parser)]
#[command(name = "tqarc", about = "The TQ/TQAE/GD .arc container format CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new archive, optionally packing input files into it
    Create {
        archive: PathBuf,
        /// Format: gd (default, LZ4), tqae (zlib), tq (zlib, legacy)
        #[arg(short, long, default_value = "gd")]
        format: String,
        /// Compression level (zlib 1-9; 0 stores raw; ignored for LZ4)
        #[arg(short, long, default_value = "6")]
        level: u32,
        /// Chunk length in KiB (default 256)
        #[arg(long, default_value = "256")]
        chunk_length: u32,
        /// Reserved directory area in KiB (default 256)
        #[arg(long, default_value = "256")]
        header_area: u32,
        /// Keep entry-name case instead of folding to lowercase
        #[arg(long)]
        preserve_case: bool,
        #[arg(short, long, num_args = 0..)]
        input: Vec<PathBuf>,
    },
    /// Add files to an existing archive (replacing same-named entries)
    Add {
        archive: PathBuf,
        #[arg(short, long, default_value = "6")]
        level: u32,
        /// Store as a single uncompressed-capable range instead of chunks
        #[arg(long)]
        store: bool,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Extract entries (all, or the names given)
    Extract {
        archive: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        names: Vec<String>,
    },
    /// List archive contents
    List {
        archive: PathBuf,
    },
    /// Show archive metadata and layout diagnostics
    Info {
        archive: PathBuf,
        /// Emit machine-readable JSON instead of the table
        #[arg(long)]
        json: bool,
    },
    /// Remove entries by name
    Remove {
        archive: PathBuf,
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
    },
    /// Check every entry payload against its stored Adler-32
    Verify {
        archive: PathBuf,
    },
    /// Re-compress all chunked entries at the given level
    Repack {
        archive: PathBuf,
        #[arg(short, long, default_value = "9")]
        level: u32,
        /// Also convert store entries to chunked form where smaller
        #[arg(long)]
        recompress_store: bool,
    },
    /// Rewrite all entries contiguously, dropping free space and tombstones
    Defrag {
        archive: PathBuf,
    },
    /// Truncate trailing free space without moving data
    Compact {
        archive: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create { archive, format, level, chunk_length, header_area, preserve_case, input } => {
            let opts = ArcOptions {
                format:          Some(parse_format(&format)?),
                level,
                chunk_length:    chunk_length * 1024,
                header_area_len: header_area * 1024,
                preserve_case,
            };
            let mut ar = Archive::open(MemStore::new(), OpenMode::Create, opts)?;
            for path in &input {
                let data = std::fs::read(path)?;
                ar.add_bytes(&entry_name(path)?, EntryKind::Chunked, &data)?;
                println!("  packed  {}", path.display());
            }
            save_archive(ar, &archive)?;
            println!("Created: {}", archive.display());
        }

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { archive, level, store, input } => {
            let mut ar = load_archive(&archive, OpenMode::Update, level)?;
            let kind = if store { EntryKind::Store } else { EntryKind::Chunked };
            for path in &input {
                let data = std::fs::read(path)?;
                ar.replace_bytes(&entry_name(path)?, kind, &data)?;
                println!("  added   {}", path.display());
            }
            save_archive(ar, &archive)?;
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, output_dir, names } => {
            let mut ar = load_archive(&archive, OpenMode::Read, 0)?;
            let targets: Vec<String> = if names.is_empty() {
                ar.entries().map(|e| e.name.clone()).collect()
            } else {
                names
            };
            for name in &targets {
                let data = ar.read_bytes(name)?;
                let dest = output_dir.join(name);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&dest, data)?;
                println!("  extracted  {}", dest.display());
            }
            println!("Extracted {} entr(ies) to {}", targets.len(), output_dir.display());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive } => {
            let ar = load_archive(&archive, OpenMode::Read, 0)?;
            println!("Archive: {}", archive.display());
            println!("{:<40} {:>12} {:>12} {:>7}  {:<8}  Modified",
                     "Name", "Size", "Compressed", "Chunks", "Hash");
            for entry in ar.entries() {
                let when = chrono::DateTime::from_timestamp(entry.timestamp, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{:<40} {:>12} {:>12} {:>7}  {:08x}  {}",
                    entry.name, entry.decompressed_len, entry.compressed_len,
                    entry.chunks.len(), entry.hash, when);
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { archive, json } => {
            let mut ar = load_archive(&archive, OpenMode::Read, 0)?;
            let info = ar.layout_info()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("── .arc Archive ─────────────────────────────────────────");
                println!("  Path               {}", archive.display());
                println!("  Format             {} (v{})", ar.format().name(), ar.format().version());
                println!("  Algorithm          {}", ar.algorithm().name());
                println!("  Chunk length       {} B", ar.chunk_length());
                println!("  Preserve case      {}", ar.preserve_case());
                println!("  Entries            {}", info.entry_count);
                println!("  Removed slots      {}", info.removed_entry_count);
                println!("  Chunks             {} ({} live)", info.chunk_count, info.live_chunk_count);
                println!("  Unordered chunks   {}", info.unordered_chunk_count);
                println!("  Free segments      {} ({} B)", info.free_segment_count, info.free_segment_bytes);
                println!("  Compactable        {}", info.can_compact);
                println!("  Defragmentable     {}", info.can_defragment);
            }
        }

        // ── Remove ───────────────────────────────────────────────────────────
        Commands::Remove { archive, names } => {
            let mut ar = load_archive(&archive, OpenMode::Update, 0)?;
            for name in &names {
                ar.remove(name)?;
                println!("  removed  {}", name);
            }
            save_archive(ar, &archive)?;
        }

        // ── Verify ───────────────────────────────────────────────────────────
        Commands::Verify { archive } => {
            let mut ar = load_archive(&archive, OpenMode::Read, 0)?;
            let names: Vec<String> = ar.entries().map(|e| e.name.clone()).collect();
            let mut failed = 0usize;
            for name in &names {
                if ar.verify_entry(name)? {
                    println!("  ok    {}", name);
                } else {
                    println!("  FAIL  {}", name);
                    failed += 1;
                }
            }
            if failed > 0 {
                return Err(format!("{} of {} entries failed verification", failed, names.len()).into());
            }
            println!("Verified {} entr(ies)", names.len());
        }

        // ── Repack ───────────────────────────────────────────────────────────
        Commands::Repack { archive, level, recompress_store } => {
            let mut ar = load_archive(&archive, OpenMode::Update, level)?;
            ar.repack(level, recompress_store)?;
            ar.defragment()?;
            save_archive(ar, &archive)?;
            println!("Repacked: {}", archive.display());
        }

        // ── Defrag ───────────────────────────────────────────────────────────
        Commands::Defrag { archive } => {
            let mut ar = load_archive(&archive, OpenMode::Update, 0)?;
            ar.defragment()?;
            save_archive(ar, &archive)?;
            println!("Defragmented: {}", archive.display());
        }

        // ── Compact ──────────────────────────────────────────────────────────
        Commands::Compact { archive } => {
            let mut ar = load_archive(&archive, OpenMode::Update, 0)?;
            ar.compact()?;
            save_archive(ar, &archive)?;
            println!("Compacted: {}", archive.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Load the whole container into memory.  Mutations run against the copy
/// and [`save_archive`] replaces the file atomically, so a crash mid-run
/// never leaves a half-written archive behind.
fn load_archive(
    path: &Path,
    mode: OpenMode,
    level: u32,
) -> Result<Archive<MemStore>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let opts = ArcOptions { level, ..Default::default() };
    Ok(Archive::open(MemStore::from(bytes), mode, opts)?)
}

/// Flush to the in-memory store, write it to a sibling temp file and
/// rename over the original.
fn save_archive(archive: Archive<MemStore>, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = archive.close()?;
    let tmp = path.with_extension("arc.tmp");
    {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(store.as_bytes())?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn entry_name(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    Ok(path
        .file_name()
        .ok_or_else(|| format!("not a file path: {}", path.display()))?
        .to_string_lossy()
        .into_owned())
}

fn parse_format(s: &str) -> Result<Format, Box<dyn std::error::Error>> {
    Format::from_name(s).ok_or_else(|| format!("unknown format '{}' (expected tq, tqae or gd)", s).into())
}
