//! Privilege escalation through `sudo -S`
//!
//! The session's password is written once to the command's stdin, never placed
//! on the command line. Output is passed through a [`Redactor`] in case the
//! remote side echoes it back.

use secrecy::{ExposeSecret, SecretString};
use std::borrow::Cow;
use zeroize::Zeroizing;

/// Replacement text for redacted secrets
pub const REDACTED: &str = "********";

/// Quote `s` for a POSIX shell using single quotes
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// A command wrapped for `sudo`, plus the stdin payload that unlocks it
pub struct PrivilegedCommand {
    command: String,
    stdin_payload: Zeroizing<String>,
}

impl PrivilegedCommand {
    /// `sudo -S` reads the password from stdin; `-p ''` silences its prompt
    pub fn wrap(command: &str, secret: &SecretString) -> Self {
        Self {
            command: format!("sudo -S -p '' bash -c {}", shell_quote(command)),
            stdin_payload: Zeroizing::new(format!("{}\n", secret.expose_secret())),
        }
    }

    /// Command line to execute; contains no secret material
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Bytes to write to stdin exactly once, before reading output
    pub fn stdin_payload(&self) -> &[u8] {
        self.stdin_payload.as_bytes()
    }
}

/// Scrubs a secret from output lines
#[derive(Clone, Default)]
pub struct Redactor {
    secret: Option<SecretString>,
}

impl Redactor {
    /// A redactor that passes lines through untouched
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_secret(secret: &SecretString) -> Self {
        let secret = (!secret.expose_secret().is_empty()).then(|| secret.clone());
        Self { secret }
    }

    pub fn redact<'a>(&self, line: &'a str) -> Cow<'a, str> {
        match &self.secret {
            Some(secret) if line.contains(secret.expose_secret()) => {
                Cow::Owned(line.replace(secret.expose_secret(), REDACTED))
            }
            _ => Cow::Borrowed(line),
        }
    }
}
