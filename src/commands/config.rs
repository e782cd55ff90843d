use crate::cli::ConfigAction;
use crate::config::{get_clients_dir, get_config_path, load_config};
use crate::error::Result;

pub fn handle_config_command(action: Option<ConfigAction>) -> Result<()> {
    match action {
        Some(ConfigAction::Path) => {
            let config_path = get_config_path()?;
            println!("Config location: {}", config_path.display());
        }
        None | Some(ConfigAction::Show) => {
            let config_path = get_config_path()?;
            let config = load_config()?;
            let (uid, gid) = config.owner.resolve();
            println!("Config file: {}", config_path.display());
            println!();
            println!("Current configuration:");
            println!("  Paths:");
            println!("    clients_dir: {}", get_clients_dir()?.display());
            println!("  Owner:");
            println!("    uid: {}", uid);
            println!("    gid: {}", gid);
            println!("  FUSE:");
            println!("    fs_name: {}", config.get_fs_name());
            println!("    fuse_ttl_secs: {}", config.get_fuse_ttl_secs());
        }
    }
    Ok(())
}
