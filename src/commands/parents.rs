use crate::cli::CheckoutArgs;
use crate::commands::inspect::format_time;
use crate::commands::{close_checkout, open_checkout};
use crate::error::Result;
use crate::hash::Hash;

pub async fn print_parents(args: &CheckoutArgs) -> Result<()> {
    let mount = open_checkout(args).await?;
    let parents = mount.parent_commits()?;
    let checkout_time = mount.last_checkout_time();
    close_checkout(mount).await?;

    if args.json {
        let output = serde_json::json!({
            "parents": parents,
            "last_checkout_time": format_time(checkout_time),
        });
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("parent1: {}", parents.parent1);
        if let Some(parent2) = parents.parent2 {
            println!("parent2: {}", parent2);
        }
        println!("last checkout: {}", format_time(checkout_time));
    }
    Ok(())
}

pub async fn reset_parent(commit: &str, args: &CheckoutArgs) -> Result<()> {
    let commit = Hash::from_partial_hex(commit)?;
    let mount = open_checkout(args).await?;
    mount.reset_parent(commit)?;
    let delta = mount.journal().latest();
    close_checkout(mount).await?;

    match delta {
        Some(delta) if args.json => {
            let output = serde_json::json!({
                "sequence": delta.sequence,
                "from": delta.from_hash,
                "to": delta.to_hash,
                "time": format_time(delta.time),
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        Some(delta) => println!("{} -> {}", delta.from_hash, delta.to_hash),
        None => {}
    }
    Ok(())
}
