use clap::{Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "stratus", version, about)]
pub struct Args {
    /// Which template family to build
    #[arg(value_enum)]
    pub builder: Builder,

    /// Path to config.toml (overrides the XDG default)
    #[arg(long, env = "STRATUS_CONFIG")]
    pub config: Option<std::path::PathBuf>,

    /// Write the template JSON to a file instead of stdout
    #[arg(long)]
    pub out: Option<std::path::PathBuf>,

    /// Emit compact single-line JSON
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Builder {
    Network,
    Instance,
    SecurityGroup,
}
