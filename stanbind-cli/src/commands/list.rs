//! List command - cached models

use super::{runtime, CommandResult};
use crate::commands::clean::{dir_size, format_size};

pub fn execute() -> CommandResult {
    let runtime = runtime()?;
    let cache = runtime.cache();
    let identities = cache.identities()?;

    if identities.is_empty() {
        println!("No cached models in {}", cache.root().display());
        return Ok(());
    }

    for identity in identities {
        let status = if cache.exists(&identity) { "" } else { " (incomplete)" };
        let size = dir_size(&cache.entry_dir(&identity)).unwrap_or(0);
        println!("{:<24} {:>10}{}", identity.name(), format_size(size), status);
    }
    Ok(())
}
