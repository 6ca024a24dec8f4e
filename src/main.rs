use clap::Parser;
use serverless_api::{Cli, run_server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_server(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
