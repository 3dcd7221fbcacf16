mod cli;

use std::sync::Arc;

use anyhow::{Context, Result};
use cli::{Cli, RunConfig};
use log::{debug, error, info};

use hubfetch::source::SourceRegistry;
use hubfetch::transfer::MultiSourceStream;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli);

    debug!("CLI arguments: {:?}", cli);
    let config: RunConfig = cli.try_into()?;

    let registry = Arc::new(SourceRegistry::new(config.rules.clone()));
    for source in config.sources {
        registry.create(source);
    }

    let mut stream = MultiSourceStream::new(registry, config.product.clone())?;
    let mut output = tokio::fs::File::create(&config.output)
        .await
        .with_context(|| format!("failed to create {:?}", config.output))?;

    let transferred = stream.copy_to(&mut output).await?;
    output.sync_all().await?;

    info!(
        "downloaded {} ({transferred} bytes) to {:?}",
        config.product.filename, config.output
    );
    Ok(())
}

fn init_logger(cli: &Cli) {
    use env_logger::Env;
    use log::LevelFilter;

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    let level = if cli.quiet {
        LevelFilter::Error
    } else if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    builder.filter_level(level);
    // keep logs quiet unless verbose
    if !cli.verbose {
        builder.format_timestamp_secs();
    }
    let _ = builder.try_init();
}
