use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::error::{GroveError, Result};
use crate::fuse::{FuseDispatcher, SessionShared};
use crate::inodes::InodeNumber;
use crate::mount::{Mount, MountHandle};
use crate::privhelper::{FuseChannel, PrivHelper};

/// Channel half of a live `fuser` session.
pub struct FuserChannel {
    shared: Arc<SessionShared>,
    notifier: fuser::Notifier,
}

#[async_trait]
impl FuseChannel for FuserChannel {
    async fn initialize(&self) -> Result<()> {
        self.shared.wait_for_init().await
    }

    fn invalidate_inode(&self, ino: InodeNumber) -> Result<()> {
        tracing::trace!("invalidating kernel cache of inode {}", ino);
        match self.notifier.inval_inode(ino.get(), 0, 0) {
            Ok(()) => Ok(()),
            // The kernel already dropped the inode.
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(()),
            Err(e) => Err(GroveError::Channel(format!(
                "failed to invalidate inode {}: {}",
                ino, e
            ))),
        }
    }
}

/// A mounted session. The `fuser` session lives on its own thread and is
/// unmounted when `stop` is signalled or dropped.
struct Session {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Mounts checkouts in-process through `fuser`.
///
/// A mount must be [registered](FuserPrivHelper::register) before it is
/// started so the session knows which mount to serve.
pub struct FuserPrivHelper {
    runtime: Handle,
    ttl: Duration,
    fs_name: String,
    mounts: Mutex<HashMap<PathBuf, Weak<Mount>>>,
    sessions: Mutex<HashMap<PathBuf, Session>>,
}

impl FuserPrivHelper {
    pub fn new(runtime: Handle, config: &Config) -> Self {
        FuserPrivHelper {
            runtime,
            ttl: Duration::from_secs(config.get_fuse_ttl_secs()),
            fs_name: config.get_fs_name(),
            mounts: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, mount: &MountHandle) {
        self.mounts
            .lock()
            .insert(mount.path().to_path_buf(), mount.downgrade());
    }
}

#[async_trait]
impl PrivHelper for FuserPrivHelper {
    async fn fuse_mount(&self, mount_path: &Path) -> Result<Arc<dyn FuseChannel>> {
        let mount = self.mounts.lock().get(mount_path).cloned().ok_or_else(|| {
            GroveError::MountFailure(format!(
                "no mount registered for {}",
                mount_path.display()
            ))
        })?;
        if self.sessions.lock().contains_key(mount_path) {
            return Err(GroveError::MountFailure(format!(
                "{} is already mounted",
                mount_path.display()
            )));
        }
        std::fs::create_dir_all(mount_path).map_err(|e| {
            GroveError::MountFailure(format!(
                "failed to create mount directory {}: {}",
                mount_path.display(),
                e
            ))
        })?;

        let shared = Arc::new(SessionShared::new());
        let dispatcher =
            FuseDispatcher::new(mount, self.runtime.clone(), self.ttl, Arc::clone(&shared));
        let options = vec![
            fuser::MountOption::FSName(self.fs_name.clone()),
            fuser::MountOption::AutoUnmount,
        ];

        let (status_tx, status_rx) =
            oneshot::channel::<std::result::Result<fuser::Notifier, String>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let path = mount_path.to_path_buf();
        tracing::info!("mounting FUSE filesystem at {}", path.display());
        let thread = std::thread::spawn(move || {
            match fuser::spawn_mount2(dispatcher, &path, &options) {
                Ok(session) => {
                    let _ = status_tx.send(Ok(session.notifier()));
                    // Blocks until unmount is requested or the helper goes away.
                    let _ = stop_rx.recv();
                    drop(session);
                    tracing::info!("FUSE filesystem at {} unmounted", path.display());
                }
                Err(e) => {
                    tracing::error!("FUSE mount error at {}: {}", path.display(), e);
                    let _ = status_tx.send(Err(e.to_string()));
                }
            }
        });

        let notifier = match status_rx.await {
            Ok(Ok(notifier)) => notifier,
            Ok(Err(e)) => {
                return Err(GroveError::MountFailure(format!(
                    "{}: {}",
                    mount_path.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(GroveError::MountFailure(format!(
                    "mount thread for {} exited unexpectedly",
                    mount_path.display()
                )))
            }
        };

        self.sessions.lock().insert(
            mount_path.to_path_buf(),
            Session {
                stop: stop_tx,
                thread,
            },
        );
        Ok(Arc::new(FuserChannel { shared, notifier }))
    }

    async fn fuse_unmount(&self, mount_path: &Path) -> Result<()> {
        let session = self.sessions.lock().remove(mount_path).ok_or_else(|| {
            GroveError::MountFailure(format!("{} is not mounted", mount_path.display()))
        })?;
        let _ = session.stop.send(());
        tokio::task::spawn_blocking(move || session.thread.join())
            .await
            .map_err(|e| GroveError::MountFailure(format!("unmount task failed: {}", e)))?
            .map_err(|_| {
                GroveError::MountFailure(format!(
                    "session thread for {} panicked",
                    mount_path.display()
                ))
            })?;
        self.mounts.lock().remove(mount_path);
        Ok(())
    }
}
