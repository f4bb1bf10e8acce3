pub mod clean;
pub mod compile;
pub mod inspect;
pub mod list;
pub mod log_prob;

use stanbind::{Config, ModelData, ModelIdentity, Runtime};
use std::path::Path;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn runtime() -> Result<Runtime, Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    tracing::debug!(cache = %config.cache_dir.display(), debug = config.debug, "loaded configuration");
    Ok(Runtime::new(config))
}

fn load_data(path: Option<&Path>) -> Result<ModelData, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(ModelData::from_file(path)?),
        None => Ok(ModelData::empty()),
    }
}

/// Identity of a model that must already be cached
fn cached_identity(runtime: &Runtime, name: &str) -> Result<ModelIdentity, Box<dyn std::error::Error>> {
    let identity = ModelIdentity::new(name)?;
    if !runtime.exists(&identity) {
        return Err(format!("no cached model named '{}'; run `stanbind compile` first", name).into());
    }
    Ok(identity)
}

fn format_values(values: &[f64]) -> String {
    let parts: Vec<String> = values.iter().map(|v| format!("{}", v)).collect();
    format!("[{}]", parts.join(", "))
}
