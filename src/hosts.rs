//! Host registry: declarative descriptions of SSH-reachable targets.
//!
//! Hosts are defined in `hosts.yaml` as attribute bags. A host may declare a
//! `parent` host, in which case it inherits the parent's `user` and
//! `identityFile` attributes and gains a synthesized `proxyCommand` that
//! routes traffic through the parent (the guest-through-bastion topology).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use log::info;

/// Attribute keys a child host inherits from its parent when unset.
const KEYS_TO_INHERIT: [&str; 2] = ["user", "identityfile"];

/// A single attribute value as written in `hosts.yaml`.
///
/// Values are duck-typed in the YAML source; this enum makes each shape an
/// explicit variant so every consumption site handles them deliberately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Plain boolean, rendered as `yes`/`no`.
    Bool(bool),
    /// Plain integer (ports, display numbers).
    Int(i64),
    /// Plain string.
    Str(String),
    /// A value paired with a human-readable note that is rendered as a
    /// comment block under the field.
    WithNote(NotedValue),
    /// Repeatable attribute (forwards, aliases, guests, identity files).
    List(Vec<AttributeValue>),
    /// Network-conditional value: network name to hostname.
    PerNetwork(BTreeMap<String, String>),
}

impl AttributeValue {
    /// Render a scalar variant to its configuration-file text.
    /// Returns `None` for lists and per-network maps.
    pub fn as_text(&self) -> Option<String> {
        match self {
            AttributeValue::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
            AttributeValue::Int(i) => Some(i.to_string()),
            AttributeValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// A value carrying a description, written as `{value: ..., note: ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotedValue {
    pub value: Box<AttributeValue>,
    pub note: Note,
}

/// A note is either a single line or a list of lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Note {
    Line(String),
    Lines(Vec<String>),
}

impl Note {
    pub fn lines(&self) -> Vec<String> {
        match self {
            Note::Line(line) => vec![line.clone()],
            Note::Lines(lines) => lines.clone(),
        }
    }
}

/// Declarative description of one SSH-reachable target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    /// Name of the host to route through (bastion). Inheritance source for
    /// `user` and `identityFile`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl HostDescriptor {
    /// Case-insensitive attribute lookup.
    fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Merge this host's attributes with those inherited from its parent.
    ///
    /// When a parent is declared, the child's `hostname` and `port`
    /// attributes are consumed into the synthesized `proxyCommand` and are
    /// not emitted on their own: the proxy's `-W` destination carries them,
    /// and the entry name is not resolvable outside the bastion anyway.
    pub fn effective_attributes(
        &self,
        registry: &HostRegistry,
    ) -> Result<BTreeMap<String, AttributeValue>, HostError> {
        let Some(parent_name) = &self.parent else {
            return Ok(self.attributes.clone());
        };
        let parent = registry.find(parent_name).ok_or_else(|| HostError::UnknownParent {
            host: self.name.clone(),
            parent: parent_name.clone(),
        })?;

        let mut merged: BTreeMap<String, AttributeValue> = BTreeMap::new();
        for key in KEYS_TO_INHERIT {
            if let Some((k, v)) = parent
                .attributes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
            {
                merged.insert(k.clone(), v.clone());
            }
        }

        // The -W destination uses the declared hostname rather than the ssh
        // entry name: the entry name is not a known host to the proxy when it
        // differs from the real hostname (forwarding entries in particular).
        let hostname = self
            .attribute("hostname")
            .and_then(AttributeValue::as_text)
            .unwrap_or_else(|| self.name.to_lowercase());
        let port = self
            .attribute("port")
            .and_then(AttributeValue::as_text)
            .unwrap_or_else(|| "22".to_string());
        let parent_name = parent.name.to_lowercase();
        merged.insert(
            "proxyCommand".to_string(),
            AttributeValue::WithNote(NotedValue {
                value: Box::new(AttributeValue::Str(format!(
                    "ssh {} -W {}:{}",
                    parent_name, hostname, port
                ))),
                note: Note::Line(format!(
                    "Use {} as a proxy to access {} via port {}",
                    parent_name, hostname, port
                )),
            }),
        );

        for (key, value) in &self.attributes {
            if key.eq_ignore_ascii_case("hostname") || key.eq_ignore_ascii_case("port") {
                continue;
            }
            merged.retain(|k, _| !k.eq_ignore_ascii_case(key));
            merged.insert(key.clone(), value.clone());
        }
        Ok(merged)
    }
}

/// The full set of declared hosts, in registration order.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    hosts: Vec<HostDescriptor>,
}

impl HostRegistry {
    pub fn new(hosts: Vec<HostDescriptor>) -> Result<Self, HostError> {
        let mut seen: Vec<String> = Vec::new();
        for host in &hosts {
            let name = host.name.to_lowercase();
            if seen.contains(&name) {
                return Err(HostError::DuplicateHost(host.name.clone()));
            }
            seen.push(name);
        }
        let registry = HostRegistry { hosts };
        for host in &registry.hosts {
            if let Some(parent) = &host.parent {
                if registry.find(parent).is_none() {
                    return Err(HostError::UnknownParent {
                        host: host.name.clone(),
                        parent: parent.clone(),
                    });
                }
            }
        }
        Ok(registry)
    }

    /// Look up a host by name or alias, case-insensitively.
    pub fn find(&self, name: &str) -> Option<&HostDescriptor> {
        self.hosts.iter().find(|h| {
            h.name.eq_ignore_ascii_case(name)
                || h.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostDescriptor> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Host registry errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("duplicate host name: {0}")]
    DuplicateHost(String),
    #[error("{host}: unknown parent host: {parent}")]
    UnknownParent { host: String, parent: String },
}

#[derive(Debug, Deserialize)]
struct HostsFile {
    #[serde(default)]
    hosts: Vec<HostDescriptor>,
}

/// Load the host registry from `hosts.yaml`.
pub fn load_hosts(path: &Path) -> color_eyre::Result<HostRegistry> {
    info!("Loading hosts from: {:?}", path);
    let file = File::open(path)?;
    let parsed: HostsFile = serde_yaml::from_reader(file)?;
    let registry = HostRegistry::new(parsed.hosts)?;
    info!("Loaded {} host(s)", registry.len());
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_from_yaml(yaml: &str) -> HostRegistry {
        let parsed: HostsFile = serde_yaml::from_str(yaml).unwrap();
        HostRegistry::new(parsed.hosts).unwrap()
    }

    #[test]
    fn test_attribute_value_shapes() {
        let yaml = r#"
hosts:
  - name: mixed
    attributes:
      user: alice
      port: 2222
      trusted: true
      hostname:
        home: 192.168.1.2
        default: mixed.example.com
      localForward:
        - "1025 localhost:25"
      identityFile:
        value: mixed.key
        note: rotated quarterly
"#;
        let registry = registry_from_yaml(yaml);
        let host = registry.find("mixed").unwrap();
        assert_eq!(
            host.attributes.get("user"),
            Some(&AttributeValue::Str("alice".to_string()))
        );
        assert_eq!(host.attributes.get("port"), Some(&AttributeValue::Int(2222)));
        assert_eq!(
            host.attributes.get("trusted"),
            Some(&AttributeValue::Bool(true))
        );
        match host.attributes.get("hostname").unwrap() {
            AttributeValue::PerNetwork(map) => {
                assert_eq!(map.get("home").unwrap(), "192.168.1.2");
                assert_eq!(map.get("default").unwrap(), "mixed.example.com");
            }
            other => panic!("expected per-network hostname, got {:?}", other),
        }
        match host.attributes.get("identityFile").unwrap() {
            AttributeValue::WithNote(noted) => {
                assert_eq!(*noted.value, AttributeValue::Str("mixed.key".to_string()));
                assert_eq!(noted.note.lines(), vec!["rotated quarterly".to_string()]);
            }
            other => panic!("expected noted value, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_host_rejected() {
        let yaml = r#"
hosts:
  - name: web
  - name: WEB
"#;
        let parsed: HostsFile = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            HostRegistry::new(parsed.hosts),
            Err(HostError::DuplicateHost(_))
        ));
    }

    #[test]
    fn test_find_by_alias() {
        let yaml = r#"
hosts:
  - name: mailserver
    aliases: [mail, smtp]
"#;
        let registry = registry_from_yaml(yaml);
        assert!(registry.find("SMTP").is_some());
        assert!(registry.find("pop3").is_none());
    }

    #[test]
    fn test_parent_inheritance() {
        let yaml = r#"
hosts:
  - name: bastion
    attributes:
      user: alice
      identityFile: bastion.key
      hostname: bastion.example.com
  - name: backups
    parent: bastion
    attributes:
      hostname: backups.internal
      port: 2222
"#;
        let registry = registry_from_yaml(yaml);
        let child = registry.find("backups").unwrap();
        let attrs = child.effective_attributes(&registry).unwrap();

        assert_eq!(
            attrs.get("user"),
            Some(&AttributeValue::Str("alice".to_string()))
        );
        assert_eq!(
            attrs.get("identityFile"),
            Some(&AttributeValue::Str("bastion.key".to_string()))
        );
        // hostname/port are consumed into the proxy command
        assert!(!attrs.keys().any(|k| k.eq_ignore_ascii_case("hostname")));
        assert!(!attrs.keys().any(|k| k.eq_ignore_ascii_case("port")));
        match attrs.get("proxyCommand").unwrap() {
            AttributeValue::WithNote(noted) => {
                assert_eq!(
                    *noted.value,
                    AttributeValue::Str("ssh bastion -W backups.internal:2222".to_string())
                );
            }
            other => panic!("expected synthesized proxy command, got {:?}", other),
        }
    }

    #[test]
    fn test_parent_inheritance_does_not_override_explicit() {
        let yaml = r#"
hosts:
  - name: bastion
    attributes:
      user: alice
  - name: backups
    parent: bastion
    attributes:
      user: backup
      proxyCommand: "ssh bastion nc backups 22"
"#;
        let registry = registry_from_yaml(yaml);
        let child = registry.find("backups").unwrap();
        let attrs = child.effective_attributes(&registry).unwrap();
        assert_eq!(
            attrs.get("user"),
            Some(&AttributeValue::Str("backup".to_string()))
        );
        assert_eq!(
            attrs.get("proxyCommand"),
            Some(&AttributeValue::Str("ssh bastion nc backups 22".to_string()))
        );
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let yaml = r#"
hosts:
  - name: orphan
    parent: nobody
"#;
        let parsed: HostsFile = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            HostRegistry::new(parsed.hosts),
            Err(HostError::UnknownParent { .. })
        ));
    }
}
