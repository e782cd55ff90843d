use crate::cli::CheckoutArgs;
use crate::commands::{close_checkout, open_checkout};
use crate::error::Result;

/// Materialize a directory path in the in-memory checkout and report the
/// resulting inode. Nothing is written to the client directory.
pub async fn ensure_dir(path: &str, args: &CheckoutArgs) -> Result<()> {
    let mount = open_checkout(args).await?;
    let (ino, loaded) = {
        let dir = mount.ensure_directory_exists(path).await?;
        (dir.ino(), mount.inode_map().loaded_count())
    };
    close_checkout(mount).await?;

    if args.json {
        let output = serde_json::json!({
            "path": path,
            "ino": ino,
            "loaded_inodes": loaded,
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{} is inode {} ({} inodes loaded)", path, ino, loaded);
    }
    Ok(())
}
