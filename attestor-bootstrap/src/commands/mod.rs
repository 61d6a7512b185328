use clap::Subcommand;

pub mod probe;
pub mod up;

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Launch a pool of attestors and keep it running until interrupted (default)
    Up(up::Args),
    /// Run a single health probe against an attestor endpoint
    Probe(probe::Args),
}
