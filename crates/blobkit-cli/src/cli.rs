use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "blobkit",
    about = "Copy and list objects in local, in-memory and cloud blob stores",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Trace id attached to every log line of this invocation
    #[arg(long, global = true)]
    pub trace_id: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy one object into another location
    Copy(CopyArgs),
    /// List object names under a location
    List(ListArgs),
}

#[derive(Args)]
pub struct CopyArgs {
    /// Source object; the last path segment is the object name
    pub source: String,
    /// Destination location (directory or bucket prefix)
    pub destination: String,
}

#[derive(Args)]
pub struct ListArgs {
    pub location: String,
    /// Only names starting with this prefix
    #[arg(short, long, default_value = "")]
    pub prefix: String,
    /// Stop after this many names; negative means no limit
    #[arg(short = 'n', long, default_value = "-1", allow_negative_numbers = true)]
    pub max: i64,
}
