use std::path::Path;
use std::sync::Arc;

use crate::cli::CheckoutArgs;
use crate::commands::checkout::{client_dir_for, open_checkout_with};
use crate::config::{load_config, CheckoutConfig};
use crate::error::{GroveError, Result};
use crate::fuse::FuserPrivHelper;
use crate::server::ServerState;

/// Serve the checkout through FUSE until interrupted, then shut it down
/// and unmount.
pub async fn mount_checkout(args: &CheckoutArgs, mount_path: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let client_dir = client_dir_for(args)?;
    let mount_path = mount_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| client_dir.join("mount"));

    let priv_helper = Arc::new(FuserPrivHelper::new(
        tokio::runtime::Handle::current(),
        &config,
    ));
    let server = Arc::new(ServerState::with_system_clock(config));
    let checkout = CheckoutConfig::new(&mount_path, &client_dir);
    let mount = open_checkout_with(&args.manifest, checkout, server, priv_helper.clone()).await?;
    priv_helper.register(&mount);

    mount.start_fuse().await?;
    println!(
        "Mounted {} at {}",
        args.manifest.display(),
        mount_path.display()
    );
    println!("Press Ctrl+C to unmount");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| GroveError::Config(format!("Failed to wait for Ctrl+C: {}", e)))?;
    println!("\nUnmounting FUSE filesystem...");
    mount.shutdown(false, false).await?;
    Ok(())
}
