use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::error::{GroveError, Result};
use crate::mount::{Mount, MountState};
use crate::privhelper::FuseChannel;

/// What a completed shutdown hands back.
#[derive(Default)]
pub struct ShutdownResult {
    /// The still-mounted kernel channel, when shutting down for takeover.
    pub channel: Option<Arc<dyn FuseChannel>>,
}

impl fmt::Debug for ShutdownResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownResult")
            .field("channel", &self.channel.is_some())
            .finish()
    }
}

async fn join<T>(task: Result<JoinHandle<Result<T>>>) -> Result<T> {
    task?
        .await
        .map_err(|e| GroveError::InvalidState(format!("mount task failed: {}", e)))?
}

impl Mount {
    /// Attach the mount to the kernel.
    ///
    /// Requires `Initialized`. The attach runs as its own task and finishes
    /// even if the returned future is dropped. On success the mount is
    /// `Running`; any failure leaves it in `FuseError` for good.
    pub fn start_fuse(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let task = self.spawn_start();
        join(task)
    }

    fn spawn_start(&self) -> Result<JoinHandle<Result<()>>> {
        let this = self.arc()?;
        if !self.transition(MountState::Initialized, MountState::Starting) {
            return Err(GroveError::InvalidState(format!(
                "cannot start mount {} in state {}",
                self.path().display(),
                self.state()
            )));
        }
        tracing::info!("starting FUSE for {}", self.path().display());

        Ok(tokio::spawn(async move {
            match this.attach_fuse().await {
                Ok(()) => {
                    if this.transition(MountState::Starting, MountState::Running) {
                        tracing::info!("mount {} is running", this.path().display());
                    } else {
                        // Destroyed while attaching; nobody will shut it down.
                        tracing::info!(
                            "mount {} became {} while starting, unmounting",
                            this.path().display(),
                            this.state()
                        );
                        if this.channel.lock().take().is_some() {
                            this.unmount_best_effort().await;
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("failed to start FUSE for {}: {}", this.path().display(), e);
                    this.channel.lock().take();
                    this.transition(MountState::Starting, MountState::FuseError);
                    Err(e)
                }
            }
        }))
    }

    async fn attach_fuse(&self) -> Result<()> {
        let channel = self.priv_helper.fuse_mount(self.path()).await?;
        *self.channel.lock() = Some(Arc::clone(&channel));
        channel.initialize().await
    }

    /// The kernel channel, once the mount has attached.
    pub fn channel(&self) -> Option<Arc<dyn FuseChannel>> {
        self.channel.lock().clone()
    }

    /// Shut the mount down.
    ///
    /// The state moves to `ShuttingDown` before this returns; the returned
    /// future resolves once every [`InodePtr`](crate::inodes::InodePtr) into
    /// the mount has been dropped, at which point the mount is `ShutDown`.
    ///
    /// With `do_takeover` the kernel mount is left in place and its channel
    /// is returned; otherwise it is unmounted, ignoring errors. A mount that
    /// never attached can only be shut down with `allow_not_started`.
    pub fn shutdown(
        &self,
        do_takeover: bool,
        allow_not_started: bool,
    ) -> impl Future<Output = Result<ShutdownResult>> + Send + 'static {
        let task = self.spawn_shutdown(do_takeover, allow_not_started);
        join(task)
    }

    fn spawn_shutdown(
        &self,
        do_takeover: bool,
        allow_not_started: bool,
    ) -> Result<JoinHandle<Result<ShutdownResult>>> {
        let this = self.arc()?;
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            let allowed = match previous {
                MountState::Running => true,
                MountState::Uninitialized | MountState::Initialized | MountState::FuseError => {
                    allow_not_started
                }
                _ => false,
            };
            if !allowed {
                return Err(GroveError::InvalidState(format!(
                    "cannot shut down mount {} in state {}",
                    self.path().display(),
                    previous
                )));
            }
            *state = MountState::ShuttingDown;
            previous
        };
        tracing::info!(
            "shutting down mount {} (was {}, takeover: {})",
            self.path().display(),
            previous,
            do_takeover
        );

        Ok(tokio::spawn(async move {
            this.finish_shutdown(do_takeover).await
        }))
    }

    async fn finish_shutdown(&self, do_takeover: bool) -> Result<ShutdownResult> {
        self.tracker.wait_for_zero().await;

        let channel = self.channel.lock().take();
        let channel = match channel {
            Some(channel) if do_takeover => Some(channel),
            Some(_) => {
                self.unmount_best_effort().await;
                None
            }
            None => None,
        };
        self.inodes.clear();

        if self.transition(MountState::ShuttingDown, MountState::ShutDown) {
            tracing::info!("mount {} shut down", self.path().display());
        } else {
            tracing::debug!(
                "mount {} finished shutting down in state {}",
                self.path().display(),
                self.state()
            );
        }
        Ok(ShutdownResult { channel })
    }

    async fn unmount_best_effort(&self) {
        if let Err(e) = self.priv_helper.fuse_unmount(self.path()).await {
            tracing::warn!("failed to unmount {}: {}", self.path().display(), e);
        }
    }

    /// Called when the last [`MountHandle`](crate::mount::MountHandle) goes
    /// away. The mount is freed once in-flight start/shutdown tasks finish
    /// and no inode pointers remain.
    pub(super) fn destroy(this: Arc<Mount>) {
        let previous = std::mem::replace(&mut *this.state.lock(), MountState::Destroying);
        tracing::info!(
            "destroying mount {} (was {})",
            this.path().display(),
            previous
        );

        if previous == MountState::Running {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let mount = Arc::clone(&this);
                    runtime.spawn(async move {
                        if mount.channel.lock().take().is_some() {
                            mount.unmount_best_effort().await;
                        }
                    });
                }
                Err(_) => tracing::warn!(
                    "no runtime to unmount {}; leaving the kernel mount in place",
                    this.path().display()
                ),
            }
        }

        let tracker = Arc::clone(&this.tracker);
        tracker.park(this);
    }
}
