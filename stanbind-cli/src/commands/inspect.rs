//! Inspect command - parameter metadata of a cached model

use super::{cached_identity, load_data, runtime, CommandResult};
use crate::output;
use clap::Args;
use stanbind::ParamNames;
use std::path::PathBuf;

#[derive(Args)]
pub struct InspectArgs {
    /// Model name
    pub name: String,

    /// JSON data file
    #[arg(short, long)]
    pub data: Option<PathBuf>,
}

pub fn execute(args: InspectArgs) -> CommandResult {
    let runtime = runtime()?;
    let identity = cached_identity(&runtime, &args.name)?;
    let data = load_data(args.data.as_deref())?;

    output::heading(&identity.to_string());
    if let Ok(manifest) = runtime.cache().load_manifest(&identity) {
        println!("  module:      {}", manifest.module_file);
        println!("  compiler:    {}", manifest.compiler);
        println!("  source:      sha256:{}", short_digest(&manifest.source_sha256));
    }

    let n_pars = runtime.try_n_pars(&identity, &data)?;
    println!("  parameters:  {}", n_pars);

    for (label, kind) in [
        ("names", ParamNames::Parameters),
        ("constrained", ParamNames::Constrained),
        ("unconstrained", ParamNames::Unconstrained),
    ] {
        let names = runtime.try_param_names(&identity, &data, kind)?;
        println!("  {:<13}{}", format!("{}:", label), names.join(", "));
    }
    Ok(())
}

fn short_digest(digest: &str) -> String {
    digest.chars().take(16).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_digest() {
        assert_eq!(short_digest("ba7816bf8f01cfea414140de5dae2223"), "ba7816bf8f01cfea");
        assert_eq!(short_digest("abc"), "abc");
        assert_eq!(short_digest("ééééééééééééééééé"), "éééééééééééééééé");
    }
}
