//! `orbitdrop send` - send text or a file over the relay path.
//!
//! The CLI has no direct-channel transport, so it talks to peers the way a
//! relay-only topology does: payloads go through the hub, fire-and-forget.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use orbitdrop_core::channel::NullChannelFactory;
use orbitdrop_core::client::{Client, ClientEvent};
use orbitdrop_core::transfer::{TransferEvent, TransferKind, TransferStatus};

use super::{load_config, SendArgs};

pub async fn run(args: SendArgs) -> Result<()> {
    let mut config = load_config();
    if let Some(hub) = args.hub {
        config.network.hub_url = hub;
    }

    let (client, mut events) = Client::start(&config, Arc::new(NullChannelFactory));

    match (&args.text, &args.path) {
        (Some(text), _) => {
            client.send_text_via_relay(args.to.as_str(), text.as_str());
        }
        (None, Some(path)) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let kind = if mime.type_() == "image" {
                TransferKind::Image
            } else {
                TransferKind::File
            };
            client.send_file_via_relay(args.to.as_str(), path, kind);
        }
        (None, None) => bail!("nothing to send: pass a file path or --text"),
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.timeout);
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = tokio::time::sleep_until(deadline) => bail!("send timed out after {}s", args.timeout),
        };
        match event {
            Some(ClientEvent::Transfer(TransferEvent::Updated { patch, .. })) => {
                match patch.status {
                    Some(TransferStatus::Completed) => break,
                    Some(TransferStatus::Failed) => {
                        bail!(patch.error.unwrap_or_else(|| "send failed".to_string()));
                    }
                    _ => {}
                }
            }
            Some(_) => {}
            None => bail!("client stopped unexpectedly"),
        }
    }

    // the hub gives no delivery receipt on the relay path; give the link a
    // moment to flush before the process exits
    tokio::time::sleep(Duration::from_millis(250)).await;
    println!("Sent to {}.", args.to);
    Ok(())
}
