// ABOUTME: Entry point for the scripthost-bot binary.
// ABOUTME: Parses CLI flags, sets up logging, and hands off to run().

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(name = "scripthost-bot")]
#[command(about = "Host and supervise user scripts through a Telegram bot")]
struct Cli {
    /// Config file path
    #[arg(short, long, env = "SCRIPTHOST_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log everything at INFO, not just scripthost crates
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; the config file references its variables
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    if cli.verbose {
        scripthost_log::init();
    } else {
        scripthost_log::init_for(&["scripthost_telegram", "scripthost_core"]);
    }

    scripthost_telegram::run(cli.config).await
}
