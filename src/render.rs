//! Rendering of resolved hosts into SSH configuration stanzas, and assembly
//! of the final file from its boilerplate sections.

use chrono::Local;
use log::warn;

use crate::resolver::{Field, ResolvedHost};
use crate::settings::Settings;

/// Canonical capitalization for the SSH client settings we may emit.
/// Lookup is by lowercase name; anything not listed is warned about and
/// passed through as written.
const SSH_SETTINGS: [&str; 76] = [
    "AddKeysToAgent",
    "AddressFamily",
    "BatchMode",
    "BindAddress",
    "BindInterface",
    "CanonicalDomains",
    "CanonicalizeFallbackLocal",
    "CanonicalizeHostname",
    "CanonicalizeMaxDots",
    "CertificateFile",
    "CheckHostIP",
    "Ciphers",
    "ClearAllForwardings",
    "Compression",
    "ConnectionAttempts",
    "ConnectTimeout",
    "ControlMaster",
    "ControlPath",
    "ControlPersist",
    "DynamicForward",
    "EnableSSHKeysign",
    "EscapeChar",
    "ExitOnForwardFailure",
    "FingerprintHash",
    "ForwardAgent",
    "ForwardX11",
    "ForwardX11Timeout",
    "ForwardX11Trusted",
    "GatewayPorts",
    "GlobalKnownHostsFile",
    "GSSAPIAuthentication",
    "GSSAPIDelegateCredentials",
    "HashKnownHosts",
    "HostbasedAuthentication",
    "HostbasedKeyTypes",
    "HostKeyAlgorithms",
    "HostKeyAlias",
    "Hostname",
    "IdentitiesOnly",
    "IdentityAgent",
    "IdentityFile",
    "IgnoreUnknown",
    "IPQoS",
    "KbdInteractiveAuthentication",
    "KexAlgorithms",
    "LocalCommand",
    "LocalForward",
    "LogLevel",
    "MACs",
    "NoHostAuthenticationForLocalhost",
    "NumberOfPasswordPrompts",
    "PasswordAuthentication",
    "PermitLocalCommand",
    "PKCS11Provider",
    "Port",
    "PreferredAuthentications",
    "ProxyCommand",
    "ProxyJump",
    "ProxyUseFdpass",
    "PubkeyAcceptedKeyTypes",
    "PubkeyAuthentication",
    "RekeyLimit",
    "RemoteCommand",
    "RemoteForward",
    "RequestTTY",
    "SendEnv",
    "ServerAliveCountMax",
    "ServerAliveInterval",
    "SetEnv",
    "StreamLocalBindMask",
    "StreamLocalBindUnlink",
    "StrictHostKeyChecking",
    "TCPKeepAlive",
    "UserKnownHostsFile",
    "User",
    "VerifyHostKeyDNS",
];

/// Canonicalize an SSH setting name, warning on ones we do not recognize.
fn canonical_setting(key: &str) -> String {
    match SSH_SETTINGS
        .iter()
        .find(|s| s.eq_ignore_ascii_case(key))
    {
        Some(canonical) => (*canonical).to_string(),
        None => {
            warn!("unknown SSH setting: {}", key);
            key.to_string()
        }
    }
}

fn format_field(field: &Field) -> String {
    let mut text = format!("    {} {}", canonical_setting(&field.key), field.value);
    if let Some(note) = &field.note {
        for line in note {
            text.push_str("\n        # ");
            text.push_str(line);
        }
    }
    text
}

fn stanza_header(description: Option<&[String]>, names: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(description) = description {
        for line in description {
            lines.push(format!("# {}", line));
        }
    }
    lines.push(format!("host {}", names));
    lines
}

/// Render a resolved host into its stanzas: the primary stanza followed by
/// one stanza per guest.
pub fn render(resolved: &ResolvedHost) -> Vec<String> {
    let mut stanzas = Vec::new();

    let names = std::iter::once(resolved.name.as_str())
        .chain(resolved.aliases.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ");
    let description = resolved.description.clone().map(|d| vec![d]);
    let mut lines = stanza_header(description.as_deref(), &names);
    lines.extend(resolved.fields.iter().map(format_field));
    stanzas.push(lines.join("\n"));

    for guest in &resolved.guests {
        // Guests are reached by tunnelling through this host; they are
        // assumed to always listen on port 22.
        let full_name = format!("{}-{}", resolved.name, guest.name);
        let mut lines = stanza_header(guest.note.as_deref(), &full_name);
        let overridden = [
            Field {
                key: "hostname".to_string(),
                value: guest.name.clone(),
                note: None,
            },
            Field {
                key: "proxyCommand".to_string(),
                value: format!("ssh {} -W {}:22", resolved.name, guest.name),
                note: Some(vec![format!(
                    "Use {} as a proxy to access {}",
                    resolved.name, guest.name
                )]),
            },
        ];
        let carried = resolved.fields.iter().filter(|f| {
            !f.key.eq_ignore_ascii_case("hostname") && !f.key.eq_ignore_ascii_case("port")
        });
        lines.extend(overridden.iter().map(format_field));
        lines.extend(carried.map(format_field));
        stanzas.push(lines.join("\n"));
    }

    stanzas
}

/// Names of the networks as shown in the generated header.
fn network_banner(display_name: &str, description: Option<&str>) -> String {
    match description {
        Some(description) => format!("{} network -- {}", display_name, description),
        None => format!("{} network", display_name),
    }
}

/// Assemble the final file: header, overrides, host stanzas, defaults.
pub fn assemble(
    settings: &Settings,
    network_display_name: &str,
    network_description: Option<&str>,
    stanzas: &[String],
) -> String {
    let header = format!(
        "\
# SSH configuration file
# Generated for the {network}
# on {time}.
#
# Do not edit this file directly. Instead edit the files in
# {config_dir} and regenerate it with: sshconfig create",
        network = network_banner(network_display_name, network_description),
        time = Local::now().format("%A, %-d %B %Y at %-I:%M:%S %p"),
        config_dir = settings.config_dir.display(),
    );

    let overrides = if settings.overrides.trim().is_empty() {
        String::new()
    } else {
        format!("# Overrides\n{}", settings.overrides.trim_end())
    };

    let hosts = format!("# Hosts\n{}", stanzas.join("\n\n"));

    let mut defaults = String::new();
    if !settings.trusted_hosts.is_empty() {
        // Trusted hosts stay unhashed in known_hosts so they remain usable
        // for hostname completion; everything else should be hashed by the
        // user's defaults.
        defaults.push_str(&format!(
            "host {}\n    HashKnownHosts no\n\n",
            settings.trusted_hosts.join(" ")
        ));
    }
    if !settings.defaults.trim().is_empty() {
        defaults.push_str(settings.defaults.trim_end());
    }
    let defaults = if defaults.is_empty() {
        String::new()
    } else {
        format!("# Defaults\n{}", defaults.trim_end())
    };

    let mut contents = [header.as_str(), overrides.as_str(), hosts.as_str(), defaults.as_str()]
        .iter()
        .filter(|section| !section.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join("\n\n\n");
    contents.push('\n');
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::GuestSpec;

    fn field(key: &str, value: &str) -> Field {
        Field {
            key: key.to_string(),
            value: value.to_string(),
            note: None,
        }
    }

    #[test]
    fn test_primary_stanza_shape() {
        let resolved = ResolvedHost {
            name: "web".to_string(),
            aliases: vec!["www".to_string()],
            description: Some("Web server".to_string()),
            fields: vec![
                field("user", "alice"),
                field("hostname", "web.example.com"),
                Field {
                    key: "port".to_string(),
                    value: "2222".to_string(),
                    note: Some(vec!["nonstandard sshd".to_string()]),
                },
            ],
            guests: Vec::new(),
        };
        let stanzas = render(&resolved);
        assert_eq!(stanzas.len(), 1);
        assert_eq!(
            stanzas[0],
            "\
# Web server
host web www
    User alice
    Hostname web.example.com
    Port 2222
        # nonstandard sshd"
        );
    }

    #[test]
    fn test_guest_stanza() {
        let resolved = ResolvedHost {
            name: "gateway".to_string(),
            aliases: Vec::new(),
            description: None,
            fields: vec![
                field("user", "alice"),
                field("hostname", "gw.example.com"),
                field("port", "2222"),
            ],
            guests: vec![GuestSpec {
                name: "db".to_string(),
                note: Some(vec!["database server".to_string()]),
            }],
        };
        let stanzas = render(&resolved);
        assert_eq!(stanzas.len(), 2);
        let guest = &stanzas[1];
        assert!(guest.starts_with("# database server\nhost gateway-db\n"));
        assert!(guest.contains("    Hostname db\n"));
        assert!(guest.contains("    ProxyCommand ssh gateway -W db:22\n"));
        assert!(guest.contains("        # Use gateway as a proxy to access db"));
        // hostname/port from the parent are not carried through
        assert!(!guest.contains("gw.example.com"));
        assert!(!guest.contains("2222"));
        assert!(guest.contains("    User alice"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let resolved = ResolvedHost {
            name: "web".to_string(),
            aliases: Vec::new(),
            description: None,
            fields: vec![field("hostname", "web.example.com")],
            guests: Vec::new(),
        };
        assert_eq!(render(&resolved), render(&resolved));
    }

    #[test]
    fn test_canonical_setting_names() {
        assert_eq!(canonical_setting("hostname"), "Hostname");
        assert_eq!(canonical_setting("proxycommand"), "ProxyCommand");
        assert_eq!(canonical_setting("macs"), "MACs");
        // unknown settings pass through as written
        assert_eq!(canonical_setting("madeUpSetting"), "madeUpSetting");
    }

    #[test]
    fn test_assemble_sections() {
        let mut settings = Settings::default();
        settings.overrides = "host github.com\n    User git\n".to_string();
        settings.defaults = "host *\n    HashKnownHosts yes\n".to_string();
        settings.trusted_hosts = vec!["web".to_string(), "mail".to_string()];

        let contents = assemble(
            &settings,
            "Home",
            Some("the apartment"),
            &["host web\n    Hostname web.example.com".to_string()],
        );
        assert!(contents.contains("Generated for the Home network -- the apartment"));
        assert!(contents.contains("# Overrides\nhost github.com"));
        assert!(contents.contains("# Hosts\nhost web"));
        assert!(contents.contains("# Defaults\nhost web mail\n    HashKnownHosts no"));
        assert!(contents.contains("host *\n    HashKnownHosts yes"));
        assert!(contents.ends_with('\n'));
    }

    #[test]
    fn test_assemble_skips_empty_sections() {
        let settings = Settings::default();
        let contents = assemble(&settings, "unknown", None, &["host a".to_string()]);
        assert!(!contents.contains("# Overrides"));
        assert!(!contents.contains("# Defaults"));
        assert!(contents.contains("# Hosts\nhost a"));
    }
}
