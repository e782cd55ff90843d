use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::{validate_checkout_name, CheckoutArgs};
use crate::config::{get_clients_dir, load_config, CheckoutConfig};
use crate::error::{GroveError, Result};
use crate::mount::{Mount, MountHandle};
use crate::privhelper::{FuseChannel, PrivHelper};
use crate::server::ServerState;
use crate::store::{Manifest, MemoryBackingStore};

/// The CLI works on checkouts in memory and never attaches them to the
/// kernel.
struct DetachedPrivHelper;

#[async_trait]
impl PrivHelper for DetachedPrivHelper {
    async fn fuse_mount(&self, mount_path: &Path) -> Result<Arc<dyn FuseChannel>> {
        Err(GroveError::MountFailure(format!(
            "{}: the command line tools do not mount checkouts",
            mount_path.display()
        )))
    }

    async fn fuse_unmount(&self, _mount_path: &Path) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn client_dir_for(args: &CheckoutArgs) -> Result<PathBuf> {
    if let Some(dir) = &args.client_dir {
        return Ok(dir.clone());
    }
    let name = args
        .manifest
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| {
            GroveError::Config(format!(
                "cannot derive a checkout name from {}",
                args.manifest.display()
            ))
        })?;
    validate_checkout_name(name)?;
    Ok(get_clients_dir()?.join(name))
}

/// Build the manifest's commit in memory and initialize a mount over it.
///
/// When the client directory already holds a snapshot, the mount resumes
/// from it so earlier `reset-parent` calls are honoured. The working copy's
/// contents always come from the manifest.
pub async fn open_checkout(args: &CheckoutArgs) -> Result<MountHandle> {
    let server = Arc::new(ServerState::with_system_clock(load_config()?));
    let client_dir = client_dir_for(args)?;
    let checkout = CheckoutConfig::new(client_dir.join("mount"), &client_dir);
    open_checkout_with(&args.manifest, checkout, server, Arc::new(DetachedPrivHelper)).await
}

pub async fn open_checkout_with(
    manifest_path: &Path,
    checkout: CheckoutConfig,
    server: Arc<ServerState>,
    priv_helper: Arc<dyn PrivHelper>,
) -> Result<MountHandle> {
    let manifest = Manifest::load(manifest_path)?;
    let store = Arc::new(MemoryBackingStore::new());
    let commit = manifest.populate(&store)?;

    let saved = checkout.parent_commits()?;
    if let Some(parents) = saved {
        for parent in [Some(parents.parent1), parents.parent2].into_iter().flatten() {
            if store.has_commit(&parent) {
                continue;
            }
            let root = store.root_tree_of(&commit).ok_or_else(|| {
                GroveError::Store(format!("manifest commit {} has no root tree", commit))
            })?;
            tracing::debug!(
                "serving saved parent {} with the contents of {}",
                parent,
                manifest_path.display()
            );
            store.put_commit(parent, root, true);
        }
    }

    let mount = Mount::create(checkout, server, store, priv_helper);
    if saved.is_some() {
        mount.initialize_from_config().await?;
    } else {
        mount.initialize(commit, None).await?;
    }
    Ok(mount)
}

/// Shut the mount down once every inode pointer handed out is gone.
pub async fn close_checkout(mount: MountHandle) -> Result<()> {
    mount.shutdown(false, true).await?;
    Ok(())
}
