use anyhow::{Context as _, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stratus::cli::{Args, Builder};

fn main() -> Result<()> {
    // Diagnostics go to stderr; stdout carries nothing but template JSON.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let path = stratus::config::locate_config(args.config.as_ref())?;
    let cfg = stratus::Config::load_from_path(&path)?;

    let template = match args.builder {
        Builder::Network => stratus::network::build(cfg.network()?)?,
        Builder::Instance => stratus::instance::build(cfg.instance()?)?,
        Builder::SecurityGroup => stratus::security_group::build(cfg.security_group()?)?,
    };

    let json = if args.compact {
        template.to_json_compact()?
    } else {
        template.to_json()?
    };

    match &args.out {
        Some(out) => std::fs::write(out, &json)
            .with_context(|| format!("failed to write template to {}", out.display()))?,
        None => print!("{json}"),
    }

    Ok(())
}
