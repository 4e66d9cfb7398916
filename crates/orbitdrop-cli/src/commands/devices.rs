//! `orbitdrop devices` - list devices connected to the hub.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use orbitdrop_core::channel::NullChannelFactory;
use orbitdrop_core::client::{Client, ClientEvent};

use super::{load_config, DevicesArgs};

pub async fn run(args: DevicesArgs) -> Result<()> {
    let mut config = load_config();
    if let Some(hub) = args.hub {
        config.network.hub_url = hub;
    }

    let (_client, mut events) = Client::start(&config, Arc::new(NullChannelFactory));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
    let devices = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = tokio::time::sleep_until(deadline) => {
                bail!("no presence list from {} within {}s", config.network.hub_url, args.timeout);
            }
        };
        match event {
            Some(ClientEvent::Presence(devices)) => break devices,
            Some(_) => {}
            None => bail!("client stopped unexpectedly"),
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No other devices connected.");
        return Ok(());
    }

    println!("{:<38} {:<20} {:<8}", "ID", "NAME", "TYPE");
    for device in devices {
        println!(
            "{:<38} {:<20} {:<8}",
            device.id,
            device.name,
            format!("{:?}", device.device_type).to_lowercase()
        );
    }
    Ok(())
}
