//! Kernel adapter: serves a [`Mount`] through `fuser`.
//!
//! Every request is handled on the tokio runtime so inode loads that wait
//! on the backing store never block the FUSE session thread.

mod convert;
mod mounter;

pub use mounter::{FuserChannel, FuserPrivHelper};

use convert::{attr_to_fileattr, SetAttrRequest};
use fuser::{
    Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyEntry, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::error::{GroveError, Result};
use crate::inodes::{Attr, InodeNumber};
use crate::mount::Mount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionPhase {
    Pending,
    Ready,
    Closed,
}

/// Handshake state shared between a session's dispatcher and its channel.
pub(crate) struct SessionShared {
    phase: watch::Sender<SessionPhase>,
}

impl SessionShared {
    pub(crate) fn new() -> Self {
        let (phase, _) = watch::channel(SessionPhase::Pending);
        SessionShared { phase }
    }

    pub(crate) fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    pub(crate) async fn wait_for_init(&self) -> Result<()> {
        let mut phase = self.phase.subscribe();
        let reached = phase
            .wait_for(|p| *p != SessionPhase::Pending)
            .await
            .map(|p| *p)
            .map_err(|_| GroveError::Channel("session dropped before init".to_string()))?;
        match reached {
            SessionPhase::Closed => Err(GroveError::Channel(
                "FUSE device closed before init".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

pub struct FuseDispatcher {
    mount: Weak<Mount>,
    runtime: Handle,
    ttl: Duration,
    shared: Arc<SessionShared>,
}

impl FuseDispatcher {
    pub(crate) fn new(
        mount: Weak<Mount>,
        runtime: Handle,
        ttl: Duration,
        shared: Arc<SessionShared>,
    ) -> Self {
        FuseDispatcher {
            mount,
            runtime,
            ttl,
            shared,
        }
    }

    /// Run `op` against the mount on the runtime and hand its outcome to
    /// `reply`. Requests arriving after the mount is gone fail with EIO.
    fn dispatch<T, F, Fut>(&self, op: F, reply: impl FnOnce(Result<T>) + Send + 'static)
    where
        T: Send + 'static,
        F: FnOnce(Arc<Mount>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let Some(mount) = self.mount.upgrade() else {
            reply(Err(GroveError::Channel("mount is gone".to_string())));
            return;
        };
        self.runtime.spawn(async move {
            reply(op(mount).await);
        });
    }

    fn reply_entry(&self) -> impl FnOnce(Result<Attr>, ReplyEntry) + Send + 'static {
        let ttl = self.ttl;
        move |result, reply| match result {
            Ok(attr) => reply.entry(&ttl, &attr_to_fileattr(&attr), 0),
            Err(e) => reply.error(e.errno()),
        }
    }

    fn reply_attr(&self) -> impl FnOnce(Result<Attr>, ReplyAttr) + Send + 'static {
        let ttl = self.ttl;
        move |result, reply| match result {
            Ok(attr) => reply.attr(&ttl, &attr_to_fileattr(&attr)),
            Err(e) => reply.error(e.errno()),
        }
    }
}

fn utf8_name(name: &OsStr) -> Result<String> {
    name.to_str()
        .map(str::to_string)
        .ok_or_else(|| GroveError::InvalidArgument(format!("{:?} is not valid UTF-8", name)))
}

impl Filesystem for FuseDispatcher {
    fn init(
        &mut self,
        _req: &Request,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        tracing::info!("FUSE session initialized");
        self.shared.set_phase(SessionPhase::Ready);
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!("FUSE session destroyed");
        self.shared.set_phase(SessionPhase::Closed);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        tracing::debug!("lookup(parent={}, name={:?})", parent, name);
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e.errno()),
        };
        let respond = self.reply_entry();
        self.dispatch(
            move |mount| async move {
                let child = mount.fuse_lookup(InodeNumber::new(parent), &name).await?;
                match mount.getattr(&child).await {
                    Ok(attr) => Ok(attr),
                    Err(e) => {
                        mount.fuse_forget(child.ino(), 1);
                        Err(e)
                    }
                }
            },
            move |result| respond(result, reply),
        );
    }

    fn forget(&mut self, _req: &Request, ino: u64, nlookup: u64) {
        if let Some(mount) = self.mount.upgrade() {
            mount.fuse_forget(InodeNumber::new(ino), nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        tracing::trace!("getattr(ino={})", ino);
        let respond = self.reply_attr();
        self.dispatch(
            move |mount| async move {
                let inode = mount.lookup_inode(InodeNumber::new(ino)).await?;
                mount.getattr(&inode).await
            },
            move |result| respond(result, reply),
        );
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let request = SetAttrRequest {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
        };
        let respond = self.reply_attr();
        self.dispatch(
            move |mount| async move {
                let inode = mount.lookup_inode(InodeNumber::new(ino)).await?;
                let desired = request.into_setattr(mount.server_state().clock().now());
                mount.setattr(&inode, &desired).await
            },
            move |result| respond(result, reply),
        );
    }

    fn readlink(&mut self, _req: &Request, ino: u64, reply: ReplyData) {
        self.dispatch(
            move |mount| async move {
                let inode = mount.lookup_inode(InodeNumber::new(ino)).await?;
                mount.readlink(&inode).await
            },
            move |result| match result {
                Ok(target) => reply.data(target.as_bytes()),
                Err(e) => reply.error(e.errno()),
            },
        );
    }

    fn mkdir(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let name = match utf8_name(name) {
            Ok(name) => name,
            Err(e) => return reply.error(e.errno()),
        };
        let respond = self.reply_entry();
        self.dispatch(
            move |mount| async move {
                let parent = mount.lookup_inode(InodeNumber::new(parent)).await?;
                let child = mount.mkdir(&parent, &name, mode & !umask)?;
                child.inc_fuse_refcount();
                mount.getattr(&child).await
            },
            move |result| respond(result, reply),
        );
    }
}
