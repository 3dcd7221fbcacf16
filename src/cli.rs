use std::convert::TryFrom;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser};
use url::Url;

use hubfetch::checksum::ChecksumAlgorithm;
use hubfetch::source::SourceConfig;
use hubfetch::{ProductInfo, TransferRules};

#[derive(Parser, Debug, Clone)]
#[command(name = "hubfetch", author, version, about = "Adaptive multi-source product downloader", long_about = None)]
pub struct Cli {
    /// Mirror URL(s) serving the product. All act as failover candidates.
    #[arg(value_name = "url", required = true)]
    pub urls: Vec<String>,

    /// Output file
    #[arg(short, long, value_name = "path")]
    pub output: Option<PathBuf>,

    /// Product descriptor JSON file (uuid, filename, declared_size, checksum)
    #[arg(short = 'p', long = "product", value_name = "path", conflicts_with_all = ["size", "checksum"])]
    pub product: Option<PathBuf>,

    /// Declared product size in bytes
    #[arg(long = "size", value_name = "bytes")]
    pub size: Option<u64>,

    /// Expected checksum as algorithm:hex, e.g. sha256:ab12...
    #[arg(long = "checksum", value_name = "algo:hex")]
    pub checksum: Option<String>,

    /// Basic-auth username for the mirrors
    #[arg(short = 'u', long = "username", value_name = "name")]
    pub username: Option<String>,

    /// Basic-auth password for the mirrors
    #[arg(long = "password", value_name = "secret", requires = "username")]
    pub password: Option<String>,

    /// Concurrency cap per mirror
    #[arg(long = "max-download", value_name = "int", default_value_t = 4)]
    pub max_download: usize,

    /// Connect timeout in seconds
    #[arg(long = "timeout", value_name = "secs")]
    pub timeout: Option<u64>,

    /// Maximum retry attempts per source
    #[arg(long = "attempts", value_name = "int", default_value_t = 5)]
    pub attempts: usize,

    /// Bandwidth (bytes/sec) below which a source switch is forced
    #[arg(long = "switch-below", value_name = "bytes_per_sec")]
    pub switch_below: Option<u64>,

    /// Quiet mode
    #[arg(short = 'q', long = "quiet", action = ArgAction::SetTrue, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode
    #[arg(short = 'v', long = "verbose", action = ArgAction::SetTrue)]
    pub verbose: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

/// Everything the binary needs to drive one transfer.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub sources: Vec<SourceConfig>,
    pub product: ProductInfo,
    pub output: PathBuf,
    pub rules: TransferRules,
}

impl TryFrom<Cli> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let mut sources = vec![];
        for url in &cli.urls {
            let parsed = Url::parse(url).with_context(|| format!("invalid URL: {url}"))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(anyhow!("unsupported URL scheme: {}", parsed.scheme()));
            }
            sources.push(SourceConfig {
                url: parsed,
                username: cli.username.clone(),
                password: cli.password.clone(),
                max_download: cli.max_download.max(1),
            });
        }

        let product = match &cli.product {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read product descriptor {path:?}"))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid product descriptor {path:?}"))?
            }
            None => {
                let size = cli
                    .size
                    .ok_or_else(|| anyhow!("either --product or --size is required"))?;
                let filename = filename_from_url(&sources[0].url);
                let mut product = ProductInfo::new(filename, size);
                if let Some(spec) = &cli.checksum {
                    let (name, value) = spec
                        .split_once(':')
                        .ok_or_else(|| anyhow!("checksum must be given as algorithm:hex"))?;
                    let algorithm = ChecksumAlgorithm::parse(name)
                        .with_context(|| format!("invalid checksum {spec:?}"))?;
                    product = product.with_checksum(algorithm, value.to_string());
                }
                product
            }
        };

        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(&product.filename));

        let mut rules = TransferRules {
            max_attempts: cli.attempts.max(1),
            ..TransferRules::default()
        };
        if let Some(secs) = cli.timeout {
            rules.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(threshold) = cli.switch_below {
            rules.degradation_threshold = threshold;
        }

        Ok(RunConfig {
            sources,
            product,
            output,
            rules,
        })
    }
}

fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| {
            segments
                .filter(|s| !s.is_empty())
                .last()
                .map(|s| s.to_string())
        })
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "product.bin".to_string())
}
