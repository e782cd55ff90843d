use chrono::{DateTime, Utc};
use std::time::SystemTime;

use crate::cli::CheckoutArgs;
use crate::commands::{close_checkout, open_checkout};
use crate::error::Result;
use crate::inodes::{Attr, InodeType};

pub(crate) fn type_name(kind: InodeType) -> &'static str {
    match kind {
        InodeType::Directory => "directory",
        InodeType::File => "file",
        InodeType::Symlink => "symlink",
    }
}

pub(crate) fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339()
}

pub async fn resolve_path(path: &str, args: &CheckoutArgs) -> Result<()> {
    let mount = open_checkout(args).await?;
    let (resolved, kind) = {
        let link = mount.get_inode(path).await?;
        let target = mount.resolve_symlink(link).await?;
        (mount.path_of(&target)?, target.inode_type())
    };
    close_checkout(mount).await?;

    if args.json {
        let output = serde_json::json!({
            "path": path,
            "resolved": resolved,
            "type": type_name(kind),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{} -> {} ({})", path, resolved, type_name(kind));
    }
    Ok(())
}

fn attr_json(path: &str, attr: &Attr) -> serde_json::Value {
    serde_json::json!({
        "path": path,
        "ino": attr.ino,
        "type": type_name(attr.kind()),
        "mode": format!("{:o}", attr.permissions()),
        "uid": attr.uid,
        "gid": attr.gid,
        "size": attr.size,
        "nlink": attr.nlink,
        "atime": format_time(attr.atime),
        "mtime": format_time(attr.mtime),
        "ctime": format_time(attr.ctime),
    })
}

pub async fn stat_path(path: &str, args: &CheckoutArgs) -> Result<()> {
    let mount = open_checkout(args).await?;
    let attr = {
        let inode = mount.get_inode(path).await?;
        mount.getattr(&inode).await?
    };
    close_checkout(mount).await?;

    if args.json {
        println!("{}", serde_json::to_string(&attr_json(path, &attr))?);
    } else {
        println!("  Path: {}", if path.is_empty() { "." } else { path });
        println!("  Inode: {}  Type: {}", attr.ino, type_name(attr.kind()));
        println!(
            "  Mode: {:o}  Uid: {}  Gid: {}",
            attr.permissions(),
            attr.uid,
            attr.gid
        );
        println!("  Size: {}  Links: {}", attr.size, attr.nlink);
        println!("  Access: {}", format_time(attr.atime));
        println!("  Modify: {}", format_time(attr.mtime));
        println!("  Change: {}", format_time(attr.ctime));
    }
    Ok(())
}
