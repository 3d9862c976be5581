//! Login credentials for a remote host

use pulsar_core_interface::{Result, TargetError};
use secrecy::SecretString;
use std::path::PathBuf;

pub const DEFAULT_SSH_PORT: u16 = 22;

/// Environment variable consulted for a non-interactive password
pub const PASSWORD_ENV: &str = "PULSAR_SSH_PASSWORD";

/// How to prove identity to the host
#[derive(Debug, Clone)]
pub enum CredentialSecret {
    /// Password authentication; the only kind that can be reused for escalation
    Password(SecretString),

    /// Public key authentication with private key file
    KeyFile {
        key_path: PathBuf,
        passphrase: Option<SecretString>,
    },

    /// SSH agent authentication
    Agent,

    /// Ask on the terminal when connecting, then behave like `Password`
    Prompt,
}

/// Host, user and secret for one session
///
/// Secrets are wiped from memory when the credential is dropped.
#[derive(Debug, Clone)]
pub struct Credential {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: CredentialSecret,
}

impl Credential {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        secret: CredentialSecret,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            secret,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Parse from a `user@host[:port]` string
    pub fn from_uri(uri: &str, secret: CredentialSecret) -> Result<Self> {
        let invalid = |message: &str| TargetError::Authentication {
            endpoint: uri.to_string(),
            message: message.to_string(),
        };

        let (username, host_port) = uri
            .split_once('@')
            .ok_or_else(|| invalid("URI must be in format user@host[:port]"))?;

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse().map_err(|_| invalid("Invalid port number"))?,
            ),
            None => (host_port, DEFAULT_SSH_PORT),
        };

        let credential = Self::new(host, username, secret).with_port(port);
        credential.validate()?;
        Ok(credential)
    }

    /// `user@host:port`
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    /// Reject credentials that cannot possibly authenticate
    pub fn validate(&self) -> Result<()> {
        let problem = if self.host.trim().is_empty() {
            Some("host is empty")
        } else if self.username.trim().is_empty() {
            Some("username is empty")
        } else if self.port == 0 {
            Some("port must be non-zero")
        } else {
            None
        };

        match problem {
            Some(message) => Err(TargetError::Authentication {
                endpoint: self.endpoint(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// The password a session may reuse for privilege escalation
    pub fn escalation_secret(&self) -> Option<&SecretString> {
        match &self.secret {
            CredentialSecret::Password(password) => Some(password),
            _ => None,
        }
    }

    /// Replace a `Prompt` secret with a password read from the terminal
    ///
    /// Blocks on terminal input, so call it before any progress display
    /// starts, or from a blocking worker. Other secrets pass through as-is.
    pub fn resolve_prompt(mut self) -> Result<Self> {
        if matches!(self.secret, CredentialSecret::Prompt) {
            let password = dialoguer::Password::new()
                .with_prompt(format!("Password for {}", self.endpoint()))
                .allow_empty_password(true)
                .interact()
                .map_err(|e| TargetError::Authentication {
                    endpoint: self.endpoint(),
                    message: format!("could not read password: {}", e),
                })?;
            self.secret = CredentialSecret::Password(SecretString::from(password));
        }
        Ok(self)
    }
}

/// Password from [`PASSWORD_ENV`], when set and non-empty
pub fn password_from_env() -> Option<SecretString> {
    std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

impl CredentialSecret {
    /// Password from the environment, falling back to an interactive prompt
    pub fn password_or_prompt() -> Self {
        match password_from_env() {
            Some(password) => CredentialSecret::Password(password),
            None => CredentialSecret::Prompt,
        }
    }

    /// Short label for logs; never includes secret material
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSecret::Password(_) => "password",
            CredentialSecret::KeyFile { .. } => "key-file",
            CredentialSecret::Agent => "agent",
            CredentialSecret::Prompt => "prompt",
        }
    }
}
