use anyhow::Result;
use clap::Parser;
use cmc_discord_bot::{resolve_coin, run_once, supported_coins, Config, RunOptions, USAGE};
use log::error;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Print the webhook payload instead of posting it
    #[arg(long)]
    dry_run: bool,
    /// Coin symbol (BTC, ETH or BAT)
    #[arg(allow_hyphen_values = true)]
    symbols: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let [symbol] = cli.symbols.as_slice() else {
        println!("{USAGE}");
        return Ok(());
    };

    let coins = supported_coins();
    let Some(coin) = resolve_coin(&coins, symbol) else {
        return Ok(());
    };

    let cfg = if cli.dry_run {
        Config::from_env_for_dry_run()?
    } else {
        Config::from_env()?
    };
    let opts = RunOptions {
        dry_run: cli.dry_run,
    };
    run_once(&cfg, coin, &opts).await
}
