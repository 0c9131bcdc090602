//! Credential input: password flags, stdin, hex keys and the interactive prompt.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::Result;
use secrecy::{ExposeSecret, SecretBox, SecretString};
use thiserror::Error;

use oxvfs_mount::Credential;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid --key-hex value: {0}")]
    BadKey(#[from] hex::FromHexError),

    #[error("{0}")]
    Input(String),
}

/// Credential flags extracted from the global CLI options.
#[derive(Clone, Default)]
pub struct CredentialOptions {
    pub password: Option<String>,
    pub password_stdin: bool,
    pub key_hex: Option<String>,
}

/// A resolved credential, zeroized on drop.
pub enum Secret {
    Password(SecretString),
    Key(SecretBox<Vec<u8>>),
}

impl Secret {
    pub fn credential(&self) -> Credential<'_> {
        match self {
            Secret::Password(password) => Credential::Password(password.expose_secret()),
            Secret::Key(key) => Credential::Key(key.expose_secret()),
        }
    }
}

impl CredentialOptions {
    /// Resolve the credential using the priority chain:
    /// 1. --key-hex
    /// 2. --password-stdin
    /// 3. --password / OXVFS_PASSWORD
    /// 4. Interactive prompt (asked twice when `confirm` is set)
    pub fn resolve(&self, confirm: bool) -> Result<Secret> {
        if let Some(ref key_hex) = self.key_hex {
            let key = hex::decode(key_hex.trim()).map_err(AuthError::BadKey)?;
            Ok(Secret::Key(SecretBox::new(Box::new(key))))
        } else if self.password_stdin {
            read_password_from_stdin().map(Secret::Password)
        } else if let Some(ref password) = self.password {
            Ok(Secret::Password(SecretString::from(password.clone())))
        } else {
            prompt_password(confirm).map(Secret::Password)
        }
    }
}

/// Read password from stdin (first line only)
fn read_password_from_stdin() -> Result<SecretString> {
    if io::stdin().is_terminal() {
        return Err(AuthError::Input(
            "--password-stdin requires password to be piped in.\n\
             Example: echo \"$SECRET\" | oxvfs --password-stdin ls ~/notes.db /"
                .to_string(),
        )
        .into());
    }

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    password_from_line(line)
}

fn password_from_line(mut line: String) -> Result<SecretString> {
    let trimmed = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(trimmed);
    if line.is_empty() {
        return Err(AuthError::Input("Password from stdin is empty".to_string()).into());
    }
    Ok(SecretString::from(line))
}

/// Prompt on the terminal. Input is not echoed.
fn prompt_password(confirm: bool) -> Result<SecretString> {
    eprint!("Container password: ");
    io::stderr().flush()?;
    let password = SecretString::from(rpassword::read_password()?);
    if password.expose_secret().is_empty() {
        return Err(AuthError::Input("Password cannot be empty".to_string()).into());
    }

    if confirm {
        eprint!("Confirm password: ");
        io::stderr().flush()?;
        let again = SecretString::from(rpassword::read_password()?);
        if again.expose_secret() != password.expose_secret() {
            return Err(AuthError::Input("Passwords do not match".to_string()).into());
        }
    }

    Ok(password)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hex_takes_priority() {
        let opts = CredentialOptions {
            password: Some("ignored".to_string()),
            password_stdin: false,
            key_hex: Some(format!("{}\n", "ab".repeat(32))),
        };
        match opts.resolve(false).unwrap() {
            Secret::Key(key) => assert_eq!(key.expose_secret(), &vec![0xab; 32]),
            Secret::Password(_) => panic!("expected key"),
        }
    }

    #[test]
    fn test_bad_hex_is_auth_error() {
        let opts = CredentialOptions {
            key_hex: Some("zz".to_string()),
            ..Default::default()
        };
        let err = opts.resolve(false).err().unwrap();
        assert!(matches!(err.downcast_ref::<AuthError>(), Some(AuthError::BadKey(_))));
    }

    #[test]
    fn test_password_flag() {
        let opts = CredentialOptions {
            password: Some("hunter2".to_string()),
            ..Default::default()
        };
        let secret = opts.resolve(false).unwrap();
        assert!(matches!(secret.credential(), Credential::Password("hunter2")));
    }

    #[test]
    fn test_password_line_trimming() {
        let password = password_from_line("pass word\r\n".to_string()).unwrap();
        assert_eq!(password.expose_secret(), "pass word");
        assert!(password_from_line("\n".to_string()).is_err());
    }
}
