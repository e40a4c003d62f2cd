//! Identity and recipient files.
//!
//! Both are line-oriented: one key per line, `#` comments and blank lines
//! ignored. An identity file may instead be a single OpenSSH private key.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::KeyError;
use crate::recipient::{AnyIdentity, AnyRecipient};
use crate::ssh;

/// The parsed contents of an identity file.
#[derive(Debug)]
pub struct IdentityFile {
    identities: Vec<AnyIdentity>,
}

fn key_lines(buf: &str) -> impl Iterator<Item = (usize, &str)> {
    buf.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn at_line(line: usize) -> impl FnOnce(KeyError) -> KeyError {
    move |source| KeyError::InvalidLine {
        line,
        source: Box::new(source),
    }
}

impl IdentityFile {
    pub fn from_buffer(buf: &str) -> Result<Self, KeyError> {
        if buf.trim_start().starts_with("-----BEGIN") {
            let identity = ssh::Identity::from_buffer(buf)?;
            return Ok(Self {
                identities: vec![AnyIdentity::Ssh(identity)],
            });
        }

        let identities = key_lines(buf)
            .map(|(line, text)| text.parse::<AnyIdentity>().map_err(at_line(line)))
            .collect::<Result<Vec<_>, _>>()?;
        if identities.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self { identities })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let path = path.as_ref();
        let buf = zeroize::Zeroizing::new(fs::read_to_string(path)?);
        let file = Self::from_buffer(&buf)?;
        debug!(path = %path.display(), count = file.identities.len(), "loaded identity file");
        Ok(file)
    }

    pub fn identities(&self) -> &[AnyIdentity] {
        &self.identities
    }

    pub fn into_identities(self) -> Vec<AnyIdentity> {
        self.identities
    }
}

/// Parse recipients, one per line (`age1...` or an OpenSSH public key line).
pub fn parse_recipients(buf: &str) -> Result<Vec<AnyRecipient>, KeyError> {
    let recipients = key_lines(buf)
        .map(|(line, text)| text.parse::<AnyRecipient>().map_err(at_line(line)))
        .collect::<Result<Vec<_>, _>>()?;
    if recipients.is_empty() {
        return Err(KeyError::Empty);
    }
    Ok(recipients)
}

pub fn read_recipients_file(path: impl AsRef<Path>) -> Result<Vec<AnyRecipient>, KeyError> {
    let path = path.as_ref();
    let recipients = parse_recipients(&fs::read_to_string(path)?)?;
    debug!(path = %path.display(), count = recipients.len(), "loaded recipients file");
    Ok(recipients)
}
