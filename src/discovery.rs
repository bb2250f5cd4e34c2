//! Identifier discovery: which MAC addresses and connection names are
//! visible right now.
//!
//! All failures here are recoverable. A missing utility, a non-zero exit, or
//! a timeout simply yields no observations and the run degrades to the
//! unknown network.

use regex::Regex;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::network::Observed;

/// How long an external discovery command may run.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

fn mac_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b[0-9a-f]{1,2}(?::[0-9a-f]{1,2}){5}\b").expect("mac pattern is valid")
    })
}

#[derive(Debug, thiserror::Error)]
enum DiscoveryError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("{command} exited with status {status}")]
    Failed { command: String, status: i32 },
}

/// Run a command with a deadline, returning its stdout.
fn run_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, DiscoveryError> {
    let command_name = program.to_string();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| DiscoveryError::Spawn {
            command: command_name.clone(),
            source,
        })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DiscoveryError::Timeout {
                        command: command_name,
                        timeout,
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(source) => {
                return Err(DiscoveryError::Spawn {
                    command: command_name,
                    source,
                })
            }
        }
    }

    let output = child.wait_with_output().map_err(|source| DiscoveryError::Spawn {
        command: command_name.clone(),
        source,
    })?;
    if !output.status.success() {
        return Err(DiscoveryError::Failed {
            command: command_name,
            status: output.status.code().unwrap_or(-1),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Pull the MAC addresses out of `arp -a -n` output, gateway rows first.
/// Gateways are the routers that identify a network, so they should be
/// matched before arbitrary neighbors.
fn parse_arp(output: &str) -> Vec<String> {
    let mut gateway_macs = Vec::new();
    let mut other_macs = Vec::new();
    for row in output.lines() {
        let Some(mac) = mac_pattern().find(row) else {
            continue;
        };
        let mac = mac.as_str().to_lowercase();
        if row.contains("_gateway") {
            gateway_macs.push(mac);
        } else {
            other_macs.push(mac);
        }
    }
    gateway_macs.extend(other_macs);
    gateway_macs
}

/// Gather the observable network identifiers. Never fails; missing
/// utilities or timeouts degrade to empty observations.
pub fn discover(timeout: Duration) -> Observed {
    let macs = match run_with_timeout("arp", &["-a", "-n"], timeout) {
        Ok(output) => parse_arp(&output),
        Err(error) => {
            warn!("ARP discovery failed: {}", error);
            Vec::new()
        }
    };

    let connections = match run_with_timeout(
        "nmcli",
        &["-t", "-f", "NAME", "connection", "show", "--active"],
        timeout,
    ) {
        Ok(output) => output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Err(error) => {
            debug!("connection-manager discovery unavailable: {}", error);
            Vec::new()
        }
    };

    debug!(
        "observed {} MAC address(es), {} active connection(s)",
        macs.len(),
        connections.len()
    );
    Observed { macs, connections }
}

/// Run a network's init command once it has been selected. Failures are
/// warned about, never fatal.
pub fn run_init_command(network_name: &str, command: &str) {
    match run_with_timeout("sh", &["-c", command], DISCOVERY_TIMEOUT) {
        Ok(output) => {
            let output = output.trim_end();
            if !output.is_empty() {
                println!("{}", output);
            }
        }
        Err(error) => warn!("{} network init command failed: {}", network_name, error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arp_orders_gateways_first() {
        let output = "\
printer.lan (192.168.1.42) at 11:22:33:44:55:66 [ether] on wlan0
_gateway (192.168.1.1) at aa:bb:cc:dd:ee:ff [ether] on wlan0
? (192.168.1.77) at <incomplete> on wlan0
";
        let macs = parse_arp(output);
        assert_eq!(
            macs,
            vec!["aa:bb:cc:dd:ee:ff".to_string(), "11:22:33:44:55:66".to_string()]
        );
    }

    #[test]
    fn test_parse_arp_lowercases() {
        let macs = parse_arp("_gateway (10.0.0.1) at AA:BB:CC:DD:EE:FF [ether] on eth0\n");
        assert_eq!(macs, vec!["aa:bb:cc:dd:ee:ff".to_string()]);
    }

    #[test]
    fn test_run_with_timeout_captures_stdout() {
        let output = run_with_timeout("sh", &["-c", "echo hello"], Duration::from_secs(5)).unwrap();
        assert_eq!(output.trim(), "hello");
    }

    #[test]
    fn test_run_with_timeout_reports_failure() {
        let result = run_with_timeout("sh", &["-c", "exit 3"], Duration::from_secs(5));
        assert!(matches!(result, Err(DiscoveryError::Failed { status: 3, .. })));
    }

    #[test]
    fn test_run_with_timeout_times_out() {
        let result = run_with_timeout("sh", &["-c", "sleep 5"], Duration::from_millis(100));
        assert!(matches!(result, Err(DiscoveryError::Timeout { .. })));
    }

    #[test]
    fn test_missing_command_is_recoverable() {
        let observed = Observed::default();
        assert!(observed.macs.is_empty());
        let result = run_with_timeout("definitely-not-a-command", &[], Duration::from_secs(1));
        assert!(matches!(result, Err(DiscoveryError::Spawn { .. })));
    }
}
