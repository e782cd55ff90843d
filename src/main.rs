use clap::Parser;

use grovefs::cli::{Args, Commands};
use grovefs::commands;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => {
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> grovefs::Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("GROVEFS_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Resolve { path, checkout } => commands::resolve_path(&path, &checkout).await?,
        Commands::Stat { path, checkout } => commands::stat_path(&path, &checkout).await?,
        Commands::EnsureDir { path, checkout } => commands::ensure_dir(&path, &checkout).await?,
        Commands::Parents { checkout } => commands::print_parents(&checkout).await?,
        Commands::ResetParent { commit, checkout } => {
            commands::reset_parent(&commit, &checkout).await?
        }
        Commands::Mount {
            mount_path,
            checkout,
        } => commands::mount_checkout(&checkout, mount_path.as_deref()).await?,
        Commands::Config { action } => commands::handle_config_command(action)?,
    }
    Ok(0)
}
