//! Clean command - remove cached models

use super::{runtime, CommandResult};
use crate::output;
use clap::Args;
use stanbind::ModelIdentity;
use std::path::Path;

#[derive(Args)]
pub struct CleanArgs {
    /// Only show what would be deleted (dry run)
    #[arg(long)]
    pub dry_run: bool,

    /// Remove a single model instead of the whole cache
    #[arg(short, long)]
    pub model: Option<String>,
}

pub fn execute(args: CleanArgs) -> CommandResult {
    let runtime = runtime()?;
    let cache = runtime.cache();

    if !cache.root().exists() {
        println!("Nothing to clean.");
        return Ok(());
    }

    match &args.model {
        Some(name) => {
            let identity = ModelIdentity::new(name.as_str())?;
            let dir = cache.entry_dir(&identity);
            if !dir.exists() {
                println!("No cached model named '{}'", name);
                return Ok(());
            }
            let label = format!("{} ({})", identity, format_size(dir_size(&dir)?));
            if args.dry_run {
                output::skipping(&format!("{} - dry run", label));
            } else {
                output::removing(&label);
                runtime.delete(&identity)?;
                output::removed(&identity.to_string());
            }
        },
        None => {
            let label = format!("model cache ({})", format_size(dir_size(cache.root())?));
            if args.dry_run {
                output::skipping(&format!("{} - dry run", label));
            } else {
                output::cleaning(&label);
                cache.clear()?;
                output::removed("model cache");
            }
        },
    }

    Ok(())
}

pub(crate) fn dir_size(path: &Path) -> Result<u64, Box<dyn std::error::Error>> {
    let mut size = 0;
    if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                size += dir_size(&path)?;
            } else {
                size += entry.metadata()?.len();
            }
        }
    } else {
        size = std::fs::metadata(path)?.len();
    }
    Ok(size)
}

pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_sizes_with_units() {
        assert_eq!(format_size(12), "12 bytes");
        assert_eq!(format_size(2048), "2.00 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.50 MB");
    }

    #[test]
    fn sums_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), [0u8; 10]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("b"), [0u8; 5]).unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 15);
    }
}
