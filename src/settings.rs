//! The configuration surface: everything consumed from `settings.yaml`.
//!
//! This covers the output file location, the boilerplate defaults/overrides
//! text, the proxy command table, preferred-network ordering, the location
//! name table, and the available/fallback algorithm lists.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::algorithms::AlgorithmSpec;

/// Algorithm classes the resolver filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgorithmClass {
    Ciphers,
    Macs,
    HostKeyAlgorithms,
    KexAlgorithms,
}

impl AlgorithmClass {
    /// The attribute key hosts use for this class.
    pub fn attribute_key(&self) -> &'static str {
        match self {
            AlgorithmClass::Ciphers => "ciphers",
            AlgorithmClass::Macs => "macs",
            AlgorithmClass::HostKeyAlgorithms => "hostKeyAlgorithms",
            AlgorithmClass::KexAlgorithms => "kexAlgorithms",
        }
    }

    pub const ALL: [AlgorithmClass; 4] = [
        AlgorithmClass::Ciphers,
        AlgorithmClass::Macs,
        AlgorithmClass::HostKeyAlgorithms,
        AlgorithmClass::KexAlgorithms,
    ];
}

/// Settings loaded from `settings.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Where the generated SSH configuration is written. Must be absolute.
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    /// Verbatim text appended as the defaults section (typically a `host *`
    /// stanza).
    #[serde(default)]
    pub defaults: String,
    /// Verbatim text emitted before the host stanzas, overriding them.
    #[serde(default)]
    pub overrides: String,
    /// Networks to try first when several match.
    #[serde(default)]
    pub preferred_networks: Vec<String>,
    /// Location tag to description.
    #[serde(default)]
    pub locations: BTreeMap<String, String>,
    /// Named proxy commands usable as a global proxy.
    #[serde(default)]
    pub proxies: BTreeMap<String, String>,
    /// Hosts exempted from known-hosts hashing in the defaults section.
    #[serde(default)]
    pub trusted_hosts: Vec<String>,

    pub available_ciphers: Option<AlgorithmSpec>,
    pub fallback_ciphers: Option<AlgorithmSpec>,
    pub available_macs: Option<AlgorithmSpec>,
    pub fallback_macs: Option<AlgorithmSpec>,
    pub available_host_key_algorithms: Option<AlgorithmSpec>,
    pub fallback_host_key_algorithms: Option<AlgorithmSpec>,
    pub available_kex_algorithms: Option<AlgorithmSpec>,
    pub fallback_kex_algorithms: Option<AlgorithmSpec>,

    /// Directory the settings were loaded from; identity file paths are
    /// resolved against it.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Settings {
    /// Validate the loaded settings.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if let Some(path) = &self.config_file {
            if !path.is_absolute() {
                return Err(SettingsError::RelativeConfigFile(path.clone()));
            }
        }
        Ok(())
    }

    /// The output path, defaulting to `~/.ssh/config`.
    pub fn output_path(&self) -> PathBuf {
        self.config_file.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join("config")
        })
    }

    pub fn available(&self, class: AlgorithmClass) -> Option<&AlgorithmSpec> {
        match class {
            AlgorithmClass::Ciphers => self.available_ciphers.as_ref(),
            AlgorithmClass::Macs => self.available_macs.as_ref(),
            AlgorithmClass::HostKeyAlgorithms => self.available_host_key_algorithms.as_ref(),
            AlgorithmClass::KexAlgorithms => self.available_kex_algorithms.as_ref(),
        }
    }

    pub fn fallback(&self, class: AlgorithmClass) -> Option<&AlgorithmSpec> {
        match class {
            AlgorithmClass::Ciphers => self.fallback_ciphers.as_ref(),
            AlgorithmClass::Macs => self.fallback_macs.as_ref(),
            AlgorithmClass::HostKeyAlgorithms => self.fallback_host_key_algorithms.as_ref(),
            AlgorithmClass::KexAlgorithms => self.fallback_kex_algorithms.as_ref(),
        }
    }

    /// Case-insensitive lookup in the locations table, returning the key as
    /// spelled there.
    fn find_location(&self, name: &str) -> Option<String> {
        self.locations
            .keys()
            .find(|k| k.eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Resolve the effective location tag.
    ///
    /// A location given explicitly must be in the table; one seeded by the
    /// network descriptor is only warned about when unknown.
    pub fn choose_location(
        &self,
        given: Option<&str>,
        from_network: Option<&str>,
    ) -> Result<Option<String>, SettingsError> {
        if let Some(location) = given {
            return match self.find_location(location) {
                Some(key) => Ok(Some(key)),
                None => Err(SettingsError::UnknownLocation {
                    location: location.to_string(),
                    choices: self.locations.keys().cloned().collect(),
                }),
            };
        }
        if let Some(location) = from_network {
            return match self.find_location(location) {
                Some(key) => Ok(Some(key)),
                None => {
                    warn!(
                        "network location '{}' is not in the locations table, ignoring",
                        location
                    );
                    Ok(None)
                }
            };
        }
        Ok(None)
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("path to SSH config file should be absolute: {0:?}")]
    RelativeConfigFile(PathBuf),
    #[error("unknown location '{location}', choose from: {}", choices.join(", "))]
    UnknownLocation {
        location: String,
        choices: Vec<String>,
    },
}

/// Load settings from `settings.yaml` in the config directory. A missing
/// file yields defaults; the tool should still produce a usable config.
pub fn load_settings(config_dir: &Path) -> color_eyre::Result<Settings> {
    let path = config_dir.join("settings.yaml");
    let mut settings = if path.exists() {
        info!("Loading settings from: {:?}", path);
        let file = File::open(&path)?;
        serde_yaml::from_reader(file)?
    } else {
        warn!("No settings file at {:?}, using defaults", path);
        Settings::default()
    };
    settings.config_dir = config_dir.to_path_buf();
    settings.validate()?;
    Ok(settings)
}

/// Atomically replace the generated SSH configuration file.
///
/// The file is written next to its destination and renamed into place, so a
/// failed run never leaves partial output. Mode is 0600: the file can name
/// internal hosts and identity files.
pub fn write_ssh_config(path: &Path, contents: &str) -> color_eyre::Result<()> {
    use std::io::Write;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    temp.persist(path)?;
    info!("Wrote SSH configuration: {:?}", path);
    Ok(())
}
