//! Syntax checking for SSH port-forward specifications.
//!
//! An invalid forward in the generated file would be silently misinterpreted
//! by the consuming SSH client, so validation failures are fatal to the run.

use regex::Regex;
use std::sync::OnceLock;

/// `forward := [ (ipv4-address | hostname | "*") ":" ] port`, port 1-5 digits.
fn forward_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let ipaddr = r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}";
        let hostname = r"([a-z][\w-]*\.)*[\w-]*[a-z]";
        Regex::new(&format!(
            r"(?i)\A(({ipaddr}|{hostname}|\*):)?\d{{1,5}}\z"
        ))
        .expect("forward pattern is valid")
    })
}

/// Forward specification errors.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid forward (expected '[bind:]port [host:]port'): {0}")]
    InvalidForward(String),
    #[error("invalid dynamic forward (expected '[bind:]port'): {0}")]
    InvalidDynamicForward(String),
}

fn is_forward_spec(token: &str) -> bool {
    forward_pattern().is_match(token)
}

/// Validate a `localForward`/`remoteForward` value: exactly two
/// whitespace-separated specs, a bind spec and a target spec.
pub fn validate_forward(value: &str) -> Result<(), ForwardError> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.len() != 2 || !tokens.iter().all(|t| is_forward_spec(t)) {
        return Err(ForwardError::InvalidForward(value.to_string()));
    }
    Ok(())
}

/// Validate a `dynamicForward` value: a single bind spec, no target.
pub fn validate_dynamic_forward(value: &str) -> Result<(), ForwardError> {
    if !is_forward_spec(value.trim()) {
        return Err(ForwardError::InvalidDynamicForward(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_valid_forwards() {
        assert!(validate_forward("1025 localhost:25").is_ok());
        assert!(validate_forward("192.168.0.1:80 imap.example.com:143").is_ok());
        assert!(validate_forward("*:9999 10.0.0.1:9999").is_ok());
    }

    #[test]
    fn test_rejects_wrong_token_count() {
        assert!(validate_forward("1025").is_err());
        assert!(validate_forward("1025 localhost:25 extra").is_err());
    }

    #[test]
    fn test_rejects_bad_specs() {
        assert!(validate_forward("999999 localhost:25").is_err());
        assert!(validate_forward("1025 not_a_host!:80").is_err());
    }

    #[test]
    fn test_dynamic_forward() {
        assert!(validate_dynamic_forward("9999").is_ok());
        assert!(validate_dynamic_forward("*:9999").is_ok());
        assert!(validate_dynamic_forward("192.168.0.1:80").is_ok());
        assert!(validate_dynamic_forward("localhost:1080").is_ok());
        assert!(validate_dynamic_forward("999999").is_err());
        assert!(validate_dynamic_forward("not_a_host!:80").is_err());
        assert!(validate_dynamic_forward("1080 extra").is_err());
    }
}
