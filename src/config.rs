//! Server configuration and the [`Authenticator`] capability.
//!
//! The session state machine and server orchestrator consume configuration
//! only through this module's traits, so alternate authentication backends
//! (LDAP, a file of credentials, a token service) can be dropped in without
//! touching the protocol code.

use std::collections::HashMap;

use clap::Parser;

/// Decides whether USER/PASS authentication is mandatory and validates
/// credentials.
///
/// `has_auth()` is consulted during method selection (RFC 1928 §3): when it
/// returns `true`, `NO AUTH` (0x00) is never an acceptable method even if the
/// client offers it.
pub trait Authenticator: Send + Sync {
    /// Whether username/password authentication is mandatory.
    fn has_auth(&self) -> bool;

    /// Validates a username/password pair. Unknown usernames must return
    /// `false`, not an error.
    fn authenticate(&self, user: &str, pass: &str) -> bool;
}

/// Default in-memory [`Authenticator`] backed by a username → password map.
#[derive(Debug, Default, Clone)]
pub struct StaticAuthenticator {
    credentials: Option<HashMap<String, String>>,
}

impl StaticAuthenticator {
    /// No credentials configured: `NO AUTH` is the only acceptable method.
    pub fn no_auth() -> Self {
        Self { credentials: None }
    }

    /// A single mandatory username/password pair.
    pub fn single(user: impl Into<String>, pass: impl Into<String>) -> Self {
        let mut credentials = HashMap::with_capacity(1);
        credentials.insert(user.into(), pass.into());
        Self {
            credentials: Some(credentials),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn has_auth(&self) -> bool {
        self.credentials.is_some()
    }

    fn authenticate(&self, user: &str, pass: &str) -> bool {
        match &self.credentials {
            Some(creds) => creds.get(user).is_some_and(|expected| expected == pass),
            None => false,
        }
    }
}

const DEFAULT_PORT: u16 = 1080;

/// Command-line surface for the default configuration provider.
#[derive(Debug, Parser)]
#[command(name = "socks5rs", about = "A SOCKS5 proxy server")]
pub struct Cli {
    /// Port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Mandatory USER/PASS username. Requires `--pass`.
    #[arg(long)]
    pub user: Option<String>,

    /// Mandatory USER/PASS password. Requires `--user`.
    #[arg(long)]
    pub pass: Option<String>,

    /// Increase log verbosity (can be repeated).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Resolved server configuration: listen port plus the authenticator to use.
pub struct Config {
    pub port: u16,
    pub authenticator: Box<dyn Authenticator>,
}

impl Config {
    /// Builds a [`Config`] from parsed CLI flags, applying environment
    /// variable overrides per the precedence rule: `SOCKS5_PORT`,
    /// `SOCKS5_USER` + `SOCKS5_PASSWORD` (both required together) take
    /// priority over the CLI when set and non-empty.
    pub fn from_cli(cli: Cli) -> Self {
        let port = std::env::var("SOCKS5_PORT")
            .ok()
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse().ok())
            .unwrap_or(cli.port);

        let env_user = non_empty_env("SOCKS5_USER");
        let env_pass = non_empty_env("SOCKS5_PASSWORD");

        let authenticator: Box<dyn Authenticator> = match (env_user, env_pass) {
            (Some(user), Some(pass)) => Box::new(StaticAuthenticator::single(user, pass)),
            _ => match (cli.user, cli.pass) {
                (Some(user), Some(pass)) => Box::new(StaticAuthenticator::single(user, pass)),
                _ => Box::new(StaticAuthenticator::no_auth()),
            },
        };

        Self { port, authenticator }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_credentials_means_no_auth_only() {
        let auth = StaticAuthenticator::no_auth();
        assert!(!auth.has_auth());
        assert!(!auth.authenticate("anyone", "anything"));
    }

    #[test]
    fn single_credential_validates_exact_match() {
        let auth = StaticAuthenticator::single("alice", "xyzzy");
        assert!(auth.has_auth());
        assert!(auth.authenticate("alice", "xyzzy"));
        assert!(!auth.authenticate("alice", "wrong"));
        assert!(!auth.authenticate("bob", "xyzzy"));
    }
}
