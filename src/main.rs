use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{debug, error, info};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use lm_switch::config::{load_config, Config, SwitchSettings};
use lm_switch::storage::load_or_create_installation_key;
use lm_switch::{LaMarzoccoClient, PowerSwitch};

#[derive(Parser)]
#[command(name = "lm-switch")]
#[command(about = "Switch a La Marzocco espresso machine on and off through the La Marzocco cloud")]
#[command(version)]
struct Cli {
    /// Path to the configuration file (defaults to ~/.lm-switch.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Username for La Marzocco account
    #[arg(long, env = "LM_USERNAME", global = true)]
    username: Option<String>,

    /// Password for La Marzocco account (optional, will prompt if not provided)
    #[arg(long, env = "LM_PASSWORD", global = true, hide_env_values = true)]
    password: Option<String>,

    /// Serial number of the machine
    #[arg(long, env = "LM_SERIAL", global = true)]
    serial: Option<String>,

    /// Where the installation key is kept (defaults to ~/.lm-switch/installation_key.json)
    #[arg(long, global = true)]
    installation_key_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether the machine is on, in standby, or unknown
    Status,
    /// Turn on the espresso machine (brewing mode)
    On,
    /// Turn off the espresso machine (standby mode)
    Off,
    /// Register this installation's key with the La Marzocco cloud
    Register,
    /// Poll the machine and print its power state until interrupted
    Watch {
        /// Seconds between polls (defaults to the configured interval, 30 if unset)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let overrides = Config {
        username: cli.username,
        password: cli.password,
        serial: cli.serial,
        installation_key_path: cli.installation_key_path,
        poll_interval_seconds: match &cli.command {
            Commands::Watch { interval } => *interval,
            _ => None,
        },
        ..Config::default()
    };
    let mut config = load_config(cli.config.as_deref())?.merge(overrides);

    if config.username.is_some() && config.password.is_none() && std::io::stdin().is_terminal() {
        config.password = Some(rpassword::prompt_password("Password: ")?);
    }

    let settings = config.resolve()?;
    let (switch, registered) = connect(&settings).await?;

    match cli.command {
        Commands::Status => {
            let dashboard = switch.client().get_dashboard(switch.serial()).await?;
            println!("{}", describe_power(dashboard.power()));
        }
        Commands::On => {
            switch.handle_set(true).await?;
            println!("Machine {} turned on.", switch.serial());
        }
        Commands::Off => {
            switch.handle_set(false).await?;
            println!("Machine {} turned off (standby mode).", switch.serial());
        }
        Commands::Register => {
            if !registered {
                switch.client().register_client().await?;
            }
            println!(
                "Installation {} registered.",
                switch.client().installation_id()
            );
        }
        Commands::Watch { .. } => watch_power(switch, &settings).await?,
    }

    Ok(())
}

/// Build the client and switch, registering the installation key if it was
/// just created. Returns whether registration succeeded here.
async fn connect(settings: &SwitchSettings) -> Result<(Arc<PowerSwitch>, bool)> {
    let (key, created) = load_or_create_installation_key(&settings.installation_key_path)?;
    let client = LaMarzoccoClient::new_with_base_url(
        settings.username.as_str(),
        settings.password.as_str(),
        &key,
        settings.base_url.clone(),
    )?;

    let mut registered = false;
    if created {
        info!("Registering installation key with La Marzocco cloud...");
        match client.register_client().await {
            Ok(()) => {
                info!("Installation key registration complete.");
                registered = true;
            }
            Err(e) => error!("Failed to register installation key: {}", e),
        }
    }

    let switch = PowerSwitch::new(
        settings.name.as_str(),
        settings.serial.as_str(),
        Arc::new(client),
    );
    Ok((Arc::new(switch), registered))
}

async fn watch_power(switch: Arc<PowerSwitch>, settings: &SwitchSettings) -> Result<()> {
    let initial = switch.handle_get().await;
    println!("{}: {}", switch.name(), describe_power(Some(initial)));

    let (updates, mut readings) = watch::channel(initial);
    let Some(poller) = switch
        .clone()
        .spawn_polling(settings.poll_interval, updates)
    else {
        return Err(anyhow::anyhow!(
            "Polling is disabled. Set poll_interval_seconds or pass --interval."
        ));
    };

    loop {
        tokio::select! {
            changed = readings.changed() => {
                if changed.is_err() {
                    break;
                }
                let power = *readings.borrow_and_update();
                println!("{}: {}", switch.name(), describe_power(Some(power)));
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("Interrupted, stopping polling");
                break;
            }
        }
    }

    poller.abort();
    Ok(())
}

fn describe_power(power: Option<bool>) -> &'static str {
    match power {
        Some(true) => "On",
        Some(false) => "Standby",
        None => "Unknown",
    }
}
