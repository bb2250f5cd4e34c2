use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

use sshconfig::generate::{self, RunOptions};
use sshconfig::hosts::{load_hosts, HostRegistry};
use sshconfig::network::{load_networks, NetworkRegistry};
use sshconfig::settings::{load_settings, write_ssh_config, Settings};
use sshconfig::discovery;

/// Generate an SSH config file tailored to the current network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding settings.yaml, networks.yaml and hosts.yaml
    #[arg(short = 'C', long)]
    config_dir: Option<PathBuf>,

    /// Use this network instead of detecting it
    #[arg(short, long)]
    network: Option<String>,

    /// Global proxy to route through (a host name or proxy-table entry)
    #[arg(short = 'P', long)]
    proxy: Option<String>,

    /// Comma-separated list of available ports, e.g. 80,443
    #[arg(short, long)]
    ports: Option<String>,

    /// Current location, for location-dependent settings
    #[arg(short, long)]
    location: Option<String>,

    /// Suppress optional output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the SSH config file (the default)
    Create,
    /// Show the generated stanza for one host
    Show {
        /// Host name or alias
        name: String,
    },
    /// List hosts whose names contain a substring
    Find {
        /// Substring to look for
        text: String,
    },
    /// List available proxies, locations, and networks
    Available,
}

/// Everything loaded from the configuration directory.
struct Loaded {
    settings: Settings,
    networks: NetworkRegistry,
    hosts: HostRegistry,
}

fn load(config_dir: &Option<PathBuf>) -> Result<Loaded> {
    let config_dir = match config_dir {
        Some(dir) => dir.clone(),
        None => dirs::config_dir()
            .ok_or_else(|| eyre!("cannot determine the configuration directory"))?
            .join("sshconfig"),
    };
    let settings = load_settings(&config_dir)?;
    let networks = load_networks(&config_dir.join("networks.yaml"))?;
    let hosts = load_hosts(&config_dir.join("hosts.yaml"))?;
    Ok(Loaded {
        settings,
        networks,
        hosts,
    })
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse command-line arguments
    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    let default_level = if args.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    let loaded = load(&args.config_dir)?;
    let options = RunOptions {
        network: args.network.clone(),
        proxy: args.proxy.clone(),
        ports: args.ports.clone(),
        location: args.location.clone(),
    };
    let ctx = generate::select_context(&loaded.networks, &loaded.settings, &options)?;

    match args.command.unwrap_or(Command::Create) {
        Command::Create => {
            println!("{}", generate::summary(&ctx, &loaded.settings));

            // The init command must run before hosts are resolved; it may
            // bring up the very connectivity the generated file relies on.
            if let Some(network) = loaded.networks.find(&ctx.network_name) {
                if let Some(command) = &network.init_command {
                    discovery::run_init_command(&ctx.network_name, command);
                }
            }

            let contents = generate::generate_config(&loaded.hosts, &ctx, &loaded.settings)?;
            let output = loaded.settings.output_path();
            write_ssh_config(&output, &contents)?;
            info!("SSH configuration generated successfully");
        }
        Command::Show { name } => {
            println!("{}", generate::summary(&ctx, &loaded.settings));
            println!();
            let generated = generate::process_hosts(&loaded.hosts, &ctx, &loaded.settings)?;
            match generated.stanza_for(&name) {
                Some(stanza) => println!("{}", stanza),
                None => return Err(eyre!("{}: not found", name)),
            }
        }
        Command::Find { text } => {
            let generated = generate::process_hosts(&loaded.hosts, &ctx, &loaded.settings)?;
            let text = text.to_lowercase();
            for name in generated.names() {
                if name.contains(&text) {
                    println!("{}", name);
                }
            }
        }
        Command::Available => {
            println!("Explicit proxies (you can also use SSH hosts as proxies):");
            for name in loaded.settings.proxies.keys() {
                println!("    {}", name);
            }
            println!();
            println!("Locations:");
            for (name, description) in &loaded.settings.locations {
                println!("    {}: {}", name, description);
            }
            println!();
            println!("Networks:");
            for network in loaded.networks.iter() {
                match &network.description {
                    Some(description) => {
                        println!("    {}: {}", network.canonical_name(), description)
                    }
                    None => println!("    {}", network.canonical_name()),
                }
            }
        }
    }

    Ok(())
}
