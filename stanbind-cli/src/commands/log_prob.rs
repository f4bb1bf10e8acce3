//! Log-prob command - evaluate the log density at a point

use super::{cached_identity, format_values, load_data, runtime, CommandResult};
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct LogProbArgs {
    /// Model name
    pub name: String,

    /// Unconstrained parameter values, comma separated
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true)]
    pub params: Vec<f64>,

    /// JSON data file
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// Leave out the change-of-variables adjustment
    #[arg(long)]
    pub no_jacobian: bool,

    /// Also print the gradient
    #[arg(short, long)]
    pub grad: bool,
}

pub fn execute(args: LogProbArgs) -> CommandResult {
    let runtime = runtime()?;
    let identity = cached_identity(&runtime, &args.name)?;
    let data = load_data(args.data.as_deref())?;
    let jacobian = !args.no_jacobian;

    let lp = runtime.try_log_prob(&identity, &data, &args.params, jacobian)?;
    println!("log_prob: {}", lp);

    if args.grad {
        let grad = runtime.try_log_prob_grad(&identity, &data, &args.params, jacobian)?;
        println!("gradient: {}", format_values(&grad));
    }
    Ok(())
}
