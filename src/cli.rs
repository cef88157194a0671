use clap::Parser;
use ratingsync_core::PipelineConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Folds newly submitted travel ratings into the document store.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Pipeline configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level, used when RUST_LOG is not set
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit without running
    #[arg(long)]
    check: bool,
}

pub struct Invocation {
    pub config: PipelineConfig,
    pub check_only: bool,
}

pub fn parse_config() -> Result<Invocation, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = PipelineConfig::load_from_file(&cli.config)?;

    Ok(Invocation {
        config,
        check_only: cli.check,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["ratingsync"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config.json"));
        assert_eq!(cli.log_level, "info");
        assert!(!cli.check);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "ratingsync",
            "--config",
            "/etc/ratingsync.json",
            "-l",
            "debug",
            "--check",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/ratingsync.json"));
        assert_eq!(cli.log_level, "debug");
        assert!(cli.check);
    }
}
