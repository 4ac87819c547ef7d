use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use bucketscan_aws::{S3Settings, S3Storage};
use bucketscan_core::Scanner;

mod config;
use config::FileConfig;

#[derive(Parser, Debug)]
#[command(author, version, about="bucketscan: find S3 buckets exposed through policies and ACLs")]
struct Cli {
    /// Report directory [default: output]
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// YAML config (region, profile, endpoint_url, out)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    region: Option<String>,

    #[arg(long)]
    profile: Option<String>,

    /// Custom S3 endpoint, e.g. LocalStack
    #[arg(long)]
    endpoint_url: Option<String>,

    #[arg(long, value_enum, default_value_t=LogLevel::Info)]
    log_level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
enum LogLevel { Trace, Debug, Info, Warn, Error }

impl From<LogLevel> for Level {
    fn from(l: LogLevel) -> Self {
        match l {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .json()
        .with_span_events(FmtSpan::CLOSE)
        .with_max_level(Level::from(cli.log_level))
        .with_writer(std::io::stderr)
        .init();

    let file = match &cli.config {
        Some(p) => FileConfig::load(p)?,
        None => FileConfig::default(),
    };
    let flags = S3Settings { region: cli.region, profile: cli.profile, endpoint_url: cli.endpoint_url };
    let settings = config::resolve(file, flags, cli.out);

    let scanner = Scanner::new(S3Storage::connect(&settings.s3).await);
    let report = scanner.scan().await;

    let s = report.summary();
    info!(buckets = s.buckets, public_policy = s.public_policy, public_acl = s.public_acl,
          objects_public = s.objects_public, "scan finished");

    bucketscan_report::write_report(&report, &settings.out)?;
    info!(out = %settings.out.display(), "report saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_is_a_full_scan_with_defaults() {
        let cli = Cli::try_parse_from(["bucketscan"]).unwrap();
        assert!(cli.out.is_none() && cli.config.is_none());
        assert_eq!(cli.log_level, LogLevel::Info);
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "bucketscan", "--out", "reports", "--region", "eu-west-1",
            "--endpoint-url", "http://localhost:4566", "--log-level", "debug",
        ]).unwrap();
        assert_eq!(cli.out, Some(PathBuf::from("reports")));
        assert_eq!(cli.endpoint_url.as_deref(), Some("http://localhost:4566"));
        assert_eq!(Level::from(cli.log_level), Level::DEBUG);
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
