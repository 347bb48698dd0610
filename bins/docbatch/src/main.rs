mod cmd;

use clap::Parser;
use cmd::config::{Effective, RunArgs};

#[derive(Parser)]
#[command(name = "docbatch", about = "Write a batch of books to MongoDB in one transaction")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, env = "DOCBATCH_LOG_JSON")]
    log_json: bool,

    #[command(flatten)]
    args: RunArgs,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let eff = match Effective::new(&cli.args) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cmd::write::run(&eff).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
