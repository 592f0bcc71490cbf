use anyhow::Result;
use fritzapi::{DeviceLocator, DiscoveryOptions, ServiceRegistry};
use fritzsoap::Credentials;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = fritzconfig::get_config();

    // RUST_LOG prend le pas sur log.level
    let level = config.get_log_level()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    tracing::info!("Starting TR-64 discovery example...");

    // Ctrl-C interrompt la découverte et affiche ce qui a été trouvé
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let report = DeviceLocator::with_options(DiscoveryOptions::from_config(&config))
        .with_cancellation(cancel)
        .discover_with_report()
        .await;

    println!("=====================");
    println!("Devices detected : {}", report.devices.len());
    for device in &report.devices {
        println!(
            "- {} ({}) [{}] {}",
            device.friendly_name(),
            device.model_name(),
            device.udn(),
            device.base_url().unwrap_or("-")
        );
    }

    if !report.skipped.is_empty() {
        println!();
        println!("Skipped responders : {}", report.skipped.len());
        for (address, reason) in &report.skipped {
            println!("- {} {:?}", address, reason);
        }
    }
    println!("=====================");

    let Some((username, password)) = config.get_credentials() else {
        println!("No credentials configured (credentials.username), skipping GetInfo");
        return Ok(());
    };

    let registry = ServiceRegistry::default();
    for mut device in report.devices {
        device.set_credentials(Some(Credentials::new(&username, &password)));
        let client = device.service_client(&registry, "DeviceInfo")?;

        match client.call("GetInfo", &[]).await {
            Ok(response) => {
                println!("{}:", device.friendly_name());
                for (name, value) in response.arguments()? {
                    println!("  {} = {}", name, value);
                }
            }
            Err(e) => println!("{}: GetInfo failed: {}", device.friendly_name(), e),
        }
    }

    Ok(())
}
