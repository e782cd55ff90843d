use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "grovefs")]
#[command(about = "Inspect and manipulate a virtual checkout built from a manifest")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every command that opens a checkout.
#[derive(ClapArgs, Debug, Clone)]
pub struct CheckoutArgs {
    #[arg(long, help = "TOML manifest describing the checkout's commit")]
    pub manifest: PathBuf,

    #[arg(
        long,
        help = "Client directory holding the checkout's snapshot (defaults to one named after the manifest)"
    )]
    pub client_dir: Option<PathBuf>,

    #[arg(long, help = "JSON output")]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Follow the symlink at a path and print where it leads")]
    Resolve {
        #[arg(help = "Mount-relative path of the symlink")]
        path: String,
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Print the attributes of a path")]
    Stat {
        #[arg(help = "Mount-relative path")]
        path: String,
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Create every missing directory along a path")]
    EnsureDir {
        #[arg(help = "Mount-relative directory path")]
        path: String,
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Print the checkout's parent commits")]
    Parents {
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Point the checkout at another commit without changing its contents")]
    ResetParent {
        #[arg(help = "Commit hash (up to 40 hex digits)")]
        commit: String,
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Serve the checkout through FUSE until interrupted")]
    Mount {
        #[arg(long, help = "Where to mount (defaults to <client-dir>/mount)")]
        mount_path: Option<PathBuf>,
        #[command(flatten)]
        checkout: CheckoutArgs,
    },
    #[command(about = "Manage configuration")]
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    #[command(about = "Show current configuration values")]
    Show,
    #[command(about = "Show config file path")]
    Path,
}
