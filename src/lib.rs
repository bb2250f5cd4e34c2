//! # sshconfig - Network-aware SSH configuration generator
//!
//! This library generates an SSH client configuration file tailored to the
//! network currently in use. The active network is detected by inspecting
//! ARP-table and connection-manager output for known router identifiers;
//! declaratively defined host entries are then resolved against that network
//! and rendered into SSH configuration stanzas.
//!
//! ## Overview
//!
//! Hosts and networks are described once, in YAML, in a configuration
//! directory. On each run the tool determines where it is, picks the right
//! hostname variant for every host, injects proxy commands where the current
//! network requires them, validates port forwards, filters algorithm
//! preferences against what the local client offers, and writes the result
//! as a single SSH config file.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - `network`: network descriptors, registry, and the network selector
//! - `hosts`: host descriptors, attribute values, and parent inheritance
//! - `resolver`: merges host attributes with the selected network
//! - `forward`: syntax checking for port-forward specifications
//! - `algorithms`: filtering of preferred algorithm lists
//! - `render`: stanza rendering and final file assembly
//! - `discovery`: external identifier discovery (ARP, connection manager)
//! - `settings`: the configuration surface and output file handling
//! - `generate`: high-level orchestration of a run
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use sshconfig::{generate, hosts, network, settings};
//!
//! let config_dir = std::path::Path::new("/home/alice/.config/sshconfig");
//! let cfg = settings::load_settings(config_dir)?;
//! let networks = network::load_networks(&config_dir.join("networks.yaml"))?;
//! let host_registry = hosts::load_hosts(&config_dir.join("hosts.yaml"))?;
//!
//! let ctx = generate::select_context(&networks, &cfg, &Default::default())?;
//! let contents = generate::generate_config(&host_registry, &ctx, &cfg)?;
//! settings::write_ssh_config(&cfg.output_path(), &contents)?;
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Validation failures (malformed forwards, unknown explicit locations) are
//! typed errors that abort the run; lookup problems (unknown networks in a
//! hostname map, missing identity files) are logged warnings; discovery
//! failures degrade to the "unknown" network. The output file is only ever
//! replaced atomically, after every host has been rendered.

pub mod algorithms;
pub mod discovery;
pub mod forward;
pub mod generate;
pub mod hosts;
pub mod network;
pub mod render;
pub mod resolver;
pub mod settings;
