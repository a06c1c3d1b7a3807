use cotton_sonos::{AsyncService, Device, Event, Options};
use futures_util::StreamExt;
use std::error::Error;
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

fn load(path: &Path) -> Vec<Device> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "ignoring saved devices");
        Vec::new()
    })
}

fn show(devices: &[Device]) {
    println!("{} player(s):", devices.len());
    for d in devices {
        println!(
            "  {:<20} {} at {} ({} services)",
            d.group_name,
            d.id,
            d.ip,
            d.services.len()
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!(
        "sonos-watch from {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from("sonos-devices.json"), PathBuf::from);

    let (service, events) =
        AsyncService::start(Options::default(), load(&path)).await?;
    tokio::pin!(events);
    println!("events arrive at {}", service.listen_addr());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            e = events.next() => match e {
                Some(Event::RegistryChanged(devices)) => show(&devices),
                Some(Event::DevicePushedState { device, service, payload }) => {
                    println!(
                        "{} {}: {} bytes",
                        device.group_name,
                        service.as_deref().unwrap_or("?"),
                        payload.len()
                    );
                }
                None => break,
            },
        }
    }

    let devices = service.stop().await;
    std::fs::write(&path, serde_json::to_string_pretty(&devices)?)?;
    println!("saved {} player(s) to {}", devices.len(), path.display());
    Ok(())
}
