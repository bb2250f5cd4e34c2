//! The attribute resolver: merges a host's attribute set with the selected
//! network and produces the fields to render.
//!
//! Attributes are claimed (removed from the working set) in a fixed order;
//! whatever is left unclaimed at the end is passed through verbatim. The
//! order matters because the proxy-injection step needs to know how the
//! hostname resolved, and the pass-through step must only see attributes no
//! earlier step understood.

use std::collections::BTreeMap;
use std::path::PathBuf;

use log::warn;

use crate::algorithms::filter_algorithms;
use crate::forward::{self, ForwardError};
use crate::hosts::{AttributeValue, HostDescriptor};
use crate::network::{NetworkContext, DEFAULT_NETWORK_NAME};
use crate::settings::{AlgorithmClass, Settings};

/// Hostname used when the host declares none: whatever name was used to
/// reach this entry.
pub const HOSTNAME_PASSTHROUGH: &str = "%h";
/// Port used when the host declares none.
pub const PORT_PASSTHROUGH: &str = "%p";

/// Suffix appended to the name and aliases of the tunnel variant.
const TUNNEL_SUFFIX: &str = "-tun";

/// Which rendering of a host entry is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// The everyday entry; forwarding attributes are dropped.
    Normal,
    /// The port-forwarding entry; only produced when forwards are declared.
    Tunnel,
}

/// One rendered configuration field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub key: String,
    pub value: String,
    pub note: Option<Vec<String>>,
}

impl Field {
    fn new(key: &str, value: impl Into<String>) -> Self {
        Field {
            key: key.to_string(),
            value: value.into(),
            note: None,
        }
    }

    fn with_note(key: &str, value: impl Into<String>, note: Option<Vec<String>>) -> Self {
        Field {
            key: key.to_string(),
            value: value.into(),
            note,
        }
    }
}

/// A host proxied through the entry being resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct GuestSpec {
    pub name: String,
    pub note: Option<Vec<String>>,
}

/// The fully merged attribute set for one host variant, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedHost {
    pub name: String,
    pub aliases: Vec<String>,
    pub description: Option<String>,
    pub fields: Vec<Field>,
    pub guests: Vec<GuestSpec>,
}

/// Resolution errors. All of these abort the run.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{host}: {source}")]
    Forward {
        host: String,
        #[source]
        source: ForwardError,
    },
    #[error("{host}: attribute '{key}' has an unsupported value type")]
    UnsupportedValue { host: String, key: String },
}

/// An attribute claimed out of the working set, with any note split off.
#[derive(Debug, Clone)]
struct Claimed {
    key: String,
    value: AttributeValue,
    note: Option<Vec<String>>,
}

fn split_note(key: &str, value: AttributeValue) -> Claimed {
    match value {
        AttributeValue::WithNote(noted) => Claimed {
            key: key.to_string(),
            value: *noted.value,
            note: Some(noted.note.lines()),
        },
        value => Claimed {
            key: key.to_string(),
            value,
            note: None,
        },
    }
}

/// The working attribute set. Each attribute can be claimed exactly once;
/// iteration order is the (deterministic) sorted order of the source map.
struct AttributeSet {
    entries: Vec<(String, AttributeValue)>,
}

impl AttributeSet {
    fn new(attributes: BTreeMap<String, AttributeValue>) -> Self {
        AttributeSet {
            entries: attributes.into_iter().collect(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    /// Claim a single-valued attribute.
    fn claim(&mut self, key: &str) -> Option<Claimed> {
        let index = self
            .entries
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))?;
        let (_, value) = self.entries.remove(index);
        Some(split_note(key, value))
    }

    /// Claim a repeatable attribute, yielding one entry per element.
    /// A scalar value is treated as a one-element list.
    fn claim_all(&mut self, key: &str) -> Vec<Claimed> {
        let Some(claimed) = self.claim(key) else {
            return Vec::new();
        };
        match claimed.value {
            AttributeValue::List(values) => values
                .into_iter()
                .map(|v| split_note(key, v))
                .collect(),
            value => vec![Claimed {
                key: key.to_string(),
                value,
                note: claimed.note,
            }],
        }
    }

    fn discard(&mut self, key: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// The attributes no resolution step claimed, in deterministic order.
    /// The internal `guests` attribute and `_`-prefixed keys are skipped.
    fn remaining(self) -> Vec<Claimed> {
        self.entries
            .into_iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("guests") && !k.starts_with('_'))
            .map(|(k, v)| split_note(&k, v))
            .collect()
    }
}

fn scalar_text(host: &str, claimed: &Claimed) -> Result<String, ResolveError> {
    claimed
        .value
        .as_text()
        .ok_or_else(|| ResolveError::UnsupportedValue {
            host: host.to_string(),
            key: claimed.key.clone(),
        })
}

/// Resolve identity file paths against the configuration directory,
/// expanding a leading `~`.
fn identity_path(settings: &Settings, filename: &str) -> PathBuf {
    if let Some(rest) = filename.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let path = PathBuf::from(filename);
    if path.is_absolute() {
        path
    } else {
        settings.config_dir.join(path)
    }
}

/// Resolve one host variant against the active network context.
///
/// Returns `Ok(None)` when the host is skipped for this run: the tunnel
/// variant of a host with no forwards, or a host whose per-network hostname
/// map has no entry for any active network and no default.
pub fn resolve(
    host: &HostDescriptor,
    attributes: BTreeMap<String, AttributeValue>,
    ctx: &NetworkContext,
    settings: &Settings,
    variant: Variant,
) -> Result<Option<ResolvedHost>, ResolveError> {
    let mut attrs = AttributeSet::new(attributes);
    let host_name = host.name.to_lowercase();
    let tunnel = variant == Variant::Tunnel;
    let mut fields: Vec<Field> = Vec::new();

    // 1. Variant gate.
    let mut name = host_name.clone();
    if tunnel {
        if !attrs.contains("localForward")
            && !attrs.contains("remoteForward")
            && !attrs.contains("dynamicForward")
        {
            return Ok(None);
        }
        name.push_str(TUNNEL_SUFFIX);
    } else {
        attrs.discard("localForward");
        attrs.discard("remoteForward");
        attrs.discard("dynamicForward");
    }

    // 2. Description. The descriptor-level field is the usual spelling; an
    // attribute-level entry takes precedence when both are present.
    let description = match attrs.claim("description") {
        Some(claimed) => Some(scalar_text(&host_name, &claimed)?),
        None => host.description.clone(),
    }
    .map(|text| {
        if tunnel {
            format!("{} (with port forwards)", text)
        } else {
            text
        }
    });

    // 3. Aliases: the descriptor-level list plus any attribute-level entries.
    let mut aliases = host.aliases.clone();
    for claimed in attrs.claim_all("aliases") {
        aliases.push(scalar_text(&host_name, &claimed)?);
    }
    if tunnel {
        for alias in &mut aliases {
            alias.push_str(TUNNEL_SUFFIX);
        }
    }

    // 4. User.
    if let Some(claimed) = attrs.claim("user") {
        let user = scalar_text(&host_name, &claimed)?;
        fields.push(Field::with_note("user", user, claimed.note));
    }

    // 5. Hostname.
    let mut hostname = HOSTNAME_PASSTHROUGH.to_string();
    let mut hostname_map_has_primary = false;
    if let Some(claimed) = attrs.claim("hostname") {
        match &claimed.value {
            AttributeValue::PerNetwork(map) => {
                let unknown: Vec<&str> = map
                    .keys()
                    .filter(|k| !ctx.known_networks.contains(&k.to_lowercase()))
                    .map(String::as_str)
                    .collect();
                if !unknown.is_empty() {
                    warn!("{}: uses unknown networks: {}", name, unknown.join(", "));
                }
                hostname_map_has_primary = map
                    .keys()
                    .any(|k| k.eq_ignore_ascii_case(&ctx.network_name));
                let mut chosen = None;
                for network in &ctx.active_networks {
                    if let Some(value) = map
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(network))
                        .map(|(_, v)| v)
                    {
                        chosen = Some(value.clone());
                        break;
                    }
                }
                if chosen.is_none() {
                    chosen = map
                        .iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(DEFAULT_NETWORK_NAME))
                        .map(|(_, v)| v.clone());
                }
                match chosen {
                    Some(value) => {
                        hostname = value.clone();
                        fields.push(Field::with_note("hostname", value, claimed.note));
                    }
                    // No hostname reachable from any active network.
                    None => return Ok(None),
                }
            }
            _ => {
                hostname = scalar_text(&host_name, &claimed)?;
                fields.push(Field::with_note("hostname", hostname.clone(), claimed.note));
            }
        }
    }

    // 6. Port. A list means "these ports, most preferred first"; the first
    // one usable on the current network wins.
    let mut port = PORT_PASSTHROUGH.to_string();
    if let Some(claimed) = attrs.claim("port") {
        let chosen = match &claimed.value {
            AttributeValue::List(values) => {
                let supported: Vec<u16> = values
                    .iter()
                    .map(|v| {
                        v.as_text()
                            .and_then(|t| t.parse::<u16>().ok())
                            .ok_or_else(|| ResolveError::UnsupportedValue {
                                host: host_name.clone(),
                                key: claimed.key.clone(),
                            })
                    })
                    .collect::<Result<_, _>>()?;
                match ctx.ports.choose(&supported) {
                    Some(p) => Some(p.to_string()),
                    None => {
                        warn!(
                            "{}: none of the declared ports are usable on this network",
                            name
                        );
                        supported.first().map(u16::to_string)
                    }
                }
            }
            _ => Some(scalar_text(&host_name, &claimed)?),
        };
        if let Some(value) = chosen {
            port = value.clone();
            fields.push(Field::with_note("port", value, claimed.note));
        }
    }

    // 7. Identity files.
    if let Some(claimed) = attrs.claim("identityFile") {
        let filenames: Vec<String> = match &claimed.value {
            AttributeValue::List(values) => values
                .iter()
                .map(|v| {
                    v.as_text().ok_or_else(|| ResolveError::UnsupportedValue {
                        host: host_name.clone(),
                        key: claimed.key.clone(),
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => vec![scalar_text(&host_name, &claimed)?],
        };
        let mut found = false;
        for filename in filenames {
            let path = identity_path(settings, &filename);
            if path.exists() {
                found = true;
                fields.push(Field::with_note(
                    "identityFile",
                    path.display().to_string(),
                    claimed.note.clone(),
                ));
            }
        }
        if found {
            fields.push(Field::new("identitiesOnly", "yes"));
            fields.push(Field::new("pubkeyAuthentication", "yes"));
        } else {
            warn!("{}: no identity files found", name);
        }
    }

    // 8. Agent forwarding follows trust.
    let trusted = attrs
        .claim("trusted")
        .and_then(|claimed| claimed.value.as_bool())
        .unwrap_or(false);
    fields.push(Field::new("forwardAgent", if trusted { "yes" } else { "no" }));

    // 9. Port forwards.
    let mut forwarding = false;
    for key in ["localForward", "remoteForward"] {
        for claimed in attrs.claim_all(key) {
            let value = scalar_text(&host_name, &claimed)?;
            forward::validate_forward(&value).map_err(|source| ResolveError::Forward {
                host: name.clone(),
                source,
            })?;
            fields.push(Field::with_note(key, value, claimed.note));
            forwarding = true;
        }
    }
    if let Some(claimed) = attrs.claim("dynamicForward") {
        let value = scalar_text(&host_name, &claimed)?;
        forward::validate_dynamic_forward(&value).map_err(|source| ResolveError::Forward {
            host: name.clone(),
            source,
        })?;
        fields.push(Field::with_note("dynamicForward", value, claimed.note));
        forwarding = true;
    }
    if forwarding {
        fields.push(Field::new("exitOnForwardFailure", "yes"));
    }

    // 10. Proxy command.
    if let Some(claimed) = attrs.claim("proxyCommand") {
        let value = scalar_text(&host_name, &claimed)?;
        fields.push(Field::with_note("proxyCommand", value, claimed.note));
    } else if let Some(proxy) = &ctx.proxy {
        // Inject the global proxy unless this host is itself the proxy, or
        // the proxy in use is this network's own and the host is declared
        // directly reachable here (an explicit hostname entry for the
        // active network).
        let is_self = proxy.eq_ignore_ascii_case(&host_name);
        let direct_on_network = ctx
            .network_proxy
            .as_deref()
            .is_some_and(|np| np.eq_ignore_ascii_case(proxy))
            && hostname_map_has_primary;
        if !is_self && !direct_on_network {
            let command = settings
                .proxies
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(proxy))
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| format!("ssh {} -W {}:{}", proxy, hostname, port));
            fields.push(Field::with_note(
                "proxyCommand",
                command,
                Some(vec![format!(
                    "Use {} as global proxy to access {}",
                    proxy, name
                )]),
            ));
        }
    }

    // 11. Algorithm preferences, filtered against what is available. With
    // no availability list configured the attribute passes through verbatim.
    for class in AlgorithmClass::ALL {
        let Some(available) = settings.available(class) else {
            continue;
        };
        if let Some(claimed) = attrs.claim(class.attribute_key()) {
            let preferred = match &claimed.value {
                AttributeValue::List(_) | AttributeValue::Str(_) => match &claimed.value {
                    AttributeValue::List(values) => values
                        .iter()
                        .filter_map(AttributeValue::as_text)
                        .collect::<Vec<_>>()
                        .join(","),
                    _ => scalar_text(&host_name, &claimed)?,
                },
                _ => {
                    return Err(ResolveError::UnsupportedValue {
                        host: host_name.clone(),
                        key: claimed.key.clone(),
                    })
                }
            };
            let preferred: Vec<String> = preferred
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            let fallback = settings
                .fallback(class)
                .map(|spec| spec.names())
                .unwrap_or_default();
            if let Some(filtered) = filter_algorithms(&preferred, &available.names(), &fallback)
            {
                fields.push(Field::with_note(class.attribute_key(), filtered, claimed.note));
            }
        }
    }

    // 12. Guests, before draining the set (normal variant only).
    let guests = if tunnel {
        Vec::new()
    } else {
        attrs
            .claim_all("guests")
            .into_iter()
            .map(|claimed| {
                Ok(GuestSpec {
                    name: scalar_text(&host_name, &claimed)?,
                    note: claimed.note,
                })
            })
            .collect::<Result<Vec<_>, ResolveError>>()?
    };

    // 13. Everything unclaimed passes through verbatim; repeatable values
    // become one field per element.
    for claimed in attrs.remaining() {
        match &claimed.value {
            AttributeValue::List(values) => {
                for value in values {
                    match value.as_text() {
                        Some(text) => {
                            fields.push(Field::with_note(&claimed.key, text, claimed.note.clone()))
                        }
                        None => warn!(
                            "{}: skipping pass-through attribute '{}' with unsupported value",
                            name, claimed.key
                        ),
                    }
                }
            }
            _ => match claimed.value.as_text() {
                Some(text) => fields.push(Field::with_note(&claimed.key, text, claimed.note)),
                None => warn!(
                    "{}: skipping pass-through attribute '{}' with unsupported value",
                    name, claimed.key
                ),
            },
        }
    }

    Ok(Some(ResolvedHost {
        name,
        aliases,
        description,
        fields,
        guests,
    }))
}
