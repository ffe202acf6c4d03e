use std::time::Duration;

use bond_bridge::{BridgeEndpoint, Controller, Discovery, PushConfig, TokenStatus};

use clap::Parser;

use tracing::{Level, error, info, warn};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bridge host. When omitted, bridges are discovered on the network.
    #[arg(long)]
    host: Option<String>,

    /// Bridge token. When omitted, the token is requested to the bridge.
    #[arg(long, requires = "host")]
    token: Option<String>,

    /// Discovery duration, in seconds.
    #[arg(long, default_value_t = 5)]
    discovery_timeout: u64,

    /// Keep-alive interval of push sessions, in seconds.
    #[arg(long, default_value_t = 90)]
    keep_alive: u64,

    /// Interval between attempts to restart terminated push sessions, in
    /// seconds.
    #[arg(long, default_value_t = 60)]
    reconnect: u64,

    /// Number of state changes buffered before discarding new ones.
    #[arg(long, default_value_t = 64)]
    buffer_size: usize,

    /// Disables IPv6 interfaces during discovery.
    #[arg(long)]
    disable_ipv6: bool,

    /// Network interfaces excluded from discovery.
    #[arg(long = "exclude-interface")]
    excluded_interfaces: Vec<String>,

    /// Prints debug logs.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn discovery(&self) -> Discovery {
        let mut discovery =
            Discovery::default().timeout(Duration::from_secs(self.discovery_timeout));
        if self.disable_ipv6 {
            discovery = discovery.disable_ipv6();
        }
        for interface in &self.excluded_interfaces {
            discovery = discovery.disable_network_interface(interface.as_str());
        }
        discovery
    }
}

async fn register_bridges(cli: &Cli, controller: &mut Controller) -> bond_bridge::Result<()> {
    let Some(host) = &cli.host else {
        for bridge in controller.discover().await? {
            info!("Found bridge `{}` at {}", bridge.bond_id, bridge.host());
            let _ = controller.pair(&bridge).await?;
        }
        return Ok(());
    };

    let token = match &cli.token {
        Some(token) => token.clone(),
        None => match controller.discovery().fetch_bridge_token(host).await? {
            TokenStatus::Token(token) => token,
            TokenStatus::Locked => {
                warn!("Bridge `{host}` is locked: press its button and retry");
                return Ok(());
            }
            TokenStatus::Failed => {
                warn!("Impossible to reach bridge `{host}`");
                return Ok(());
            }
        },
    };

    let _ = controller.add_bridge(BridgeEndpoint::new(host.as_str(), token))?;
    Ok(())
}

async fn print_devices(controller: &Controller) -> bond_bridge::Result<()> {
    for (endpoint, bridge) in controller.bridges() {
        if let Some(info) = bridge.client().bridge_info().await? {
            info!(
                "Bridge `{}`: {} {} firmware {}",
                endpoint.host(),
                info.name.as_deref().unwrap_or("unnamed"),
                info.model.as_deref().unwrap_or("unknown model"),
                info.firmware_version.as_deref().unwrap_or("unknown"),
            );
        }

        let Some(devices) = bridge.client().list_devices().await? else {
            warn!("Impossible to list the devices of `{}`", endpoint.host());
            continue;
        };

        for device in devices.values() {
            info!("{device}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> bond_bridge::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let push = PushConfig::new().keep_alive_interval(Duration::from_secs(cli.keep_alive));
    let mut controller = Controller::new(cli.discovery())
        .push_config(push)
        .state_buffer_size(cli.buffer_size);

    register_bridges(&cli, &mut controller).await?;

    if controller.bridges().next().is_none() {
        warn!("No bridge available");
        return Ok(());
    }

    print_devices(&controller).await?;

    let Some(mut receiver) = controller.take_state_receiver() else {
        return Ok(());
    };
    let _ = controller.start_push_listeners()?;

    let mut reconnect = tokio::time::interval(Duration::from_secs(cli.reconnect));
    reconnect.reset();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!("Impossible to listen for Ctrl-C: {e}");
                }
                break;
            }
            _ = reconnect.tick() => {
                // Replace the push sessions which terminated in the meantime.
                let _ = controller.start_push_listeners()?;
            }
            update = receiver.recv() => {
                let Some(update) = update else {
                    break;
                };
                info!(
                    "[{}] device `{}` -> {}",
                    update.host, update.device_id, update.state
                );
            }
        }
    }

    controller.shutdown().await;

    Ok(())
}
