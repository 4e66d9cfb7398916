//! `orbitdrop hub` - run the signaling hub.

use std::sync::Arc;

use anyhow::{Context, Result};
use orbitdrop_core::hub::{self, Hub};

use super::{load_config, HubArgs};

pub async fn run(args: HubArgs) -> Result<()> {
    let config = load_config();
    let bind = args.bind.unwrap_or(config.hub.bind_addr);
    let addr = bind
        .parse()
        .with_context(|| format!("invalid bind address '{bind}'"))?;

    println!("Signaling hub on ws://{addr}/ws  (ctrl-c to stop)");

    let hub = Arc::new(Hub::new());
    hub::serve_addr(hub, addr)
        .await
        .context("hub server failed")?;
    Ok(())
}
