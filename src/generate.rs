//! High-level orchestration: network selection through rendered output.
//!
//! This module coordinates the flow from the loaded registries and the
//! command-line overrides to the final list of rendered stanzas.

use std::collections::BTreeMap;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};

use crate::discovery::{self, DISCOVERY_TIMEOUT};
use crate::hosts::HostRegistry;
use crate::network::{
    select_networks, NetworkContext, NetworkDescriptor, NetworkRegistry, PortList,
};
use crate::render;
use crate::resolver::{self, Variant};
use crate::settings::Settings;

/// Command-line overrides applied on top of the selected network.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub network: Option<String>,
    pub proxy: Option<String>,
    pub ports: Option<String>,
    pub location: Option<String>,
}

/// Select the active network and build the per-run context.
///
/// Identifier discovery is skipped entirely when the network is forced from
/// the command line. A discovery failure or no match degrades to the
/// synthetic unknown network.
pub fn select_context(
    registry: &NetworkRegistry,
    settings: &Settings,
    options: &RunOptions,
) -> Result<NetworkContext> {
    let matches: Vec<&NetworkDescriptor> = match &options.network {
        Some(name) => match registry.find(name) {
            Some(network) => vec![network],
            None => {
                warn!("unknown network '{}', treating as unrecognized", name);
                Vec::new()
            }
        },
        None => {
            let observed = discovery::discover(DISCOVERY_TIMEOUT);
            select_networks(&observed, registry, &settings.preferred_networks)
        }
    };

    let unknown = NetworkDescriptor::unknown();
    let primary = matches.first().copied().unwrap_or(&unknown);
    let mut ctx = NetworkContext::from_selection(primary, &matches, registry);

    let ports = match &options.ports {
        Some(given) => Some(PortList::Csv(given.clone())),
        None => primary.ports.clone(),
    };
    if let Some(ports) = ports {
        ctx.ports
            .set_available(ports.ports().wrap_err("invalid port list")?);
    }

    if let Some(proxy) = &options.proxy {
        ctx.proxy = Some(proxy.clone());
    }

    ctx.location = settings.choose_location(
        options.location.as_deref(),
        primary.location.as_deref(),
    )?;

    Ok(ctx)
}

/// One-line description of the current situation, shown before generating.
pub fn summary(ctx: &NetworkContext, settings: &Settings) -> String {
    let mut parts = vec![format!("Network is {}", ctx.display_name)];
    if let Some(description) = &ctx.description {
        parts.push(format!("({})", description));
    }
    if let Some(location) = &ctx.location {
        let described = settings
            .locations
            .get(location)
            .cloned()
            .unwrap_or_else(|| location.clone());
        parts.push(format!("located near {}", described));
    }
    if let Some(ports) = ctx.ports.available() {
        let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
        parts.push(format!("using port {}", ports.join(" or ")));
    }
    if let Some(proxy) = &ctx.proxy {
        parts.push(format!("proxying through {}", proxy));
    }
    format!("{}.", parts.join(" "))
}

/// The rendered host stanzas plus a name index for `show` and `find`.
#[derive(Debug, Default)]
pub struct GeneratedHosts {
    pub stanzas: Vec<String>,
    by_name: BTreeMap<String, usize>,
}

impl GeneratedHosts {
    fn register(&mut self, name: &str, index: usize) {
        let _ = self.by_name.insert(name.to_string(), index);
    }

    pub fn stanza_for(&self, name: &str) -> Option<&str> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| self.stanzas[i].as_str())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

/// Resolve and render every host against the active network, in
/// registration order: the normal variant first, then the tunnel variant.
pub fn process_hosts(
    hosts: &HostRegistry,
    ctx: &NetworkContext,
    settings: &Settings,
) -> Result<GeneratedHosts> {
    let mut generated = GeneratedHosts::default();
    for host in hosts.iter() {
        for variant in [Variant::Normal, Variant::Tunnel] {
            let attributes = host.effective_attributes(hosts)?;
            let Some(resolved) = resolver::resolve(host, attributes, ctx, settings, variant)?
            else {
                continue;
            };
            let stanzas = render::render(&resolved);

            let primary_index = generated.stanzas.len();
            generated.register(&resolved.name, primary_index);
            for alias in &resolved.aliases {
                generated.register(&alias.to_lowercase(), primary_index);
            }
            for (offset, guest) in resolved.guests.iter().enumerate() {
                generated.register(
                    &format!("{}-{}", resolved.name, guest.name.to_lowercase()),
                    primary_index + 1 + offset,
                );
            }
            generated.stanzas.extend(stanzas);
        }
    }
    info!(
        "Rendered {} stanza(s) for {} host(s)",
        generated.stanzas.len(),
        hosts.len()
    );
    Ok(generated)
}

/// Generate the complete configuration file contents.
pub fn generate_config(
    hosts: &HostRegistry,
    ctx: &NetworkContext,
    settings: &Settings,
) -> Result<String> {
    let generated = process_hosts(hosts, ctx, settings)?;
    Ok(render::assemble(
        settings,
        &ctx.display_name,
        ctx.description.as_deref(),
        &generated.stanzas,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::HostDescriptor;

    #[derive(serde::Deserialize)]
    struct HostsFixture {
        hosts: Vec<HostDescriptor>,
    }

    fn hosts_from_yaml(yaml: &str) -> HostRegistry {
        let parsed: HostsFixture = serde_yaml::from_str(yaml).unwrap();
        HostRegistry::new(parsed.hosts).unwrap()
    }

    #[test]
    fn test_select_context_unknown_fallback() {
        let registry = NetworkRegistry::default();
        let settings = Settings::default();
        let options = RunOptions {
            network: Some("nowhere".to_string()),
            ..RunOptions::default()
        };
        let ctx = select_context(&registry, &settings, &options).unwrap();
        assert_eq!(ctx.network_name, "unknown");
        assert!(ctx.proxy.is_none());
        assert!(ctx.ports.available().is_none());
    }

    #[test]
    fn test_select_context_applies_overrides() {
        let registry = NetworkRegistry::default();
        let mut settings = Settings::default();
        let _ = settings
            .locations
            .insert("home".to_string(), "The apartment".to_string());
        let options = RunOptions {
            network: Some("nowhere".to_string()),
            proxy: Some("bastion".to_string()),
            ports: Some("80,443".to_string()),
            location: Some("home".to_string()),
        };
        let ctx = select_context(&registry, &settings, &options).unwrap();
        assert_eq!(ctx.proxy.as_deref(), Some("bastion"));
        assert_eq!(ctx.ports.available(), Some(&[80, 443][..]));
        assert_eq!(ctx.location.as_deref(), Some("home"));

        let line = summary(&ctx, &settings);
        assert_eq!(
            line,
            "Network is unknown located near The apartment using port 80 or 443 proxying through bastion."
        );
    }

    #[test]
    fn test_process_hosts_renders_both_variants() {
        let hosts = hosts_from_yaml(
            r#"
hosts:
  - name: mail
    attributes:
      hostname: mail.example.com
      localForward:
        - "1025 localhost:25"
"#,
        );
        let registry = NetworkRegistry::default();
        let settings = Settings::default();
        let ctx = NetworkContext::from_selection(
            &NetworkDescriptor::unknown(),
            &[],
            &registry,
        );
        let generated = process_hosts(&hosts, &ctx, &settings).unwrap();
        assert_eq!(generated.stanzas.len(), 2);
        assert!(generated.stanza_for("mail").unwrap().contains("host mail\n"));
        assert!(generated
            .stanza_for("mail-tun")
            .unwrap()
            .contains("LocalForward 1025 localhost:25"));
    }
}
