//! Startup argument parsing: `--config <path>` loads a [`Settings`] record;
//! `--version-json` prints a version handshake and exits without starting
//! the server.

use std::path::PathBuf;

use keylime_core::Settings;
use serde::Serialize;

const AGENT_PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct VersionHandshake {
    version: &'static str,
    protocol_version: u32,
}

/// The result of parsing startup arguments.
pub enum StartupAction {
    /// Print the version handshake and exit.
    PrintVersion,
    /// Proceed to serve, using the given settings.
    Serve(Settings),
}

/// Parse `args` (normally `std::env::args().collect()`), loading settings
/// from a `--config <path>` argument if present, or built-in defaults
/// otherwise.
pub fn parse_args(args: &[String]) -> StartupAction {
    if args.iter().any(|arg| arg == "--version-json") {
        return StartupAction::PrintVersion;
    }

    let config_path = find_config_path(args);
    StartupAction::Serve(Settings::load_with_defaults(config_path))
}

/// Serialise the version handshake for `--version-json`.
pub fn version_handshake_json() -> String {
    let handshake = VersionHandshake {
        version: env!("CARGO_PKG_VERSION"),
        protocol_version: AGENT_PROTOCOL_VERSION,
    };
    serde_json::to_string(&handshake).expect("version handshake is always serialisable")
}

fn find_config_path(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_json_flag_short_circuits_config_loading() {
        let args = vec!["keylime-agent".to_string(), "--version-json".to_string()];
        assert!(matches!(parse_args(&args), StartupAction::PrintVersion));
    }

    #[test]
    fn missing_config_flag_falls_back_to_defaults() {
        let args = vec!["keylime-agent".to_string()];
        match parse_args(&args) {
            StartupAction::Serve(settings) => assert_eq!(settings.cloudnode_port, 9002),
            StartupAction::PrintVersion => panic!("unexpected version branch"),
        }
    }

    #[test]
    fn finds_config_path_argument() {
        let args = vec![
            "keylime-agent".to_string(),
            "--config".to_string(),
            "/tmp/settings.toml".to_string(),
        ];
        assert_eq!(find_config_path(&args), Some(PathBuf::from("/tmp/settings.toml")));
    }
}
