//! prune-scripts: delete orphaned `*.meta.json` files.
//!
//! The extension keeps a `<name>.meta.json` next to every synced
//! `<name>.user.js`. When a script is removed out-of-band its metadata
//! file stays behind; this one-shot tool sweeps them out.

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

/// Remove `*.meta.json` files whose sibling `*.user.js` is gone.
#[derive(Parser, Debug)]
#[command(name = "prune-scripts")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage root to sweep
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// Report what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if !args.path.is_dir() {
        error!("not a directory: {}", args.path.display());
        process::exit(1);
    }

    let mut removed = 0usize;
    if let Err(err) = sweep(&args.path, args.dry_run, &mut removed) {
        error!("sweep failed: {}", err);
        process::exit(1);
    }
    info!(
        "{} orphaned meta file(s) {}",
        removed,
        if args.dry_run { "found" } else { "removed" }
    );
}

fn sweep(dir: &Path, dry_run: bool, removed: &mut usize) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            sweep(&path, dry_run, removed)?;
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".meta.json") else {
            continue;
        };
        let script = dir.join(format!("{}.user.js", stem));
        if script.exists() {
            continue;
        }
        *removed += 1;
        if dry_run {
            info!("would remove {}", path.display());
        } else {
            info!("removing {}", path.display());
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
