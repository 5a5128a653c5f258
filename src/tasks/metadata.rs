//! # Launch metadata for provisioned instances.
//!
//! Password tasks get a fresh random root password per instance, embedded in a
//! base64 cloud-init script that enables root password login over ssh. Ssh-key
//! tasks pass the authorized key through unchanged.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::tasks::model::{AuthType, GrabTask};

const PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Instance metadata passed to the provider at launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchMetadata {
    /// Base64 cloud-init script setting the root password.
    Password { user_data: String },
    /// Authorized keys content.
    SshKey { authorized_keys: String },
}

impl LaunchMetadata {
    /// Builds metadata for one launch of `task`.
    ///
    /// Returns the metadata and, for password tasks, the generated password
    /// that must be recorded with the instance result.
    ///
    /// # Errors
    /// [`ProviderErrorKind::InvalidRequest`] when an ssh-key task carries no key.
    pub fn for_task(
        task: &GrabTask,
        password_length: usize,
    ) -> Result<(Self, Option<String>), ProviderError> {
        match task.auth_type {
            AuthType::Password => {
                let password = generate_password(password_length);
                let user_data = STANDARD.encode(root_password_script(&password));
                Ok((LaunchMetadata::Password { user_data }, Some(password)))
            }
            AuthType::SshKey => {
                let key = task
                    .ssh_key
                    .as_deref()
                    .filter(|k| !k.trim().is_empty())
                    .ok_or_else(|| {
                        ProviderError::new(
                            ProviderErrorKind::InvalidRequest,
                            "ssh_key auth requires a public key",
                        )
                    })?;
                Ok((
                    LaunchMetadata::SshKey {
                        authorized_keys: key.to_string(),
                    },
                    None,
                ))
            }
        }
    }

    /// Flattens into the provider's metadata key/value map.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        match self {
            LaunchMetadata::Password { user_data } => {
                map.insert("user_data".to_string(), user_data.clone());
            }
            LaunchMetadata::SshKey { authorized_keys } => {
                map.insert("ssh_authorized_keys".to_string(), authorized_keys.clone());
            }
        }
        map
    }
}

/// Generates a random lowercase-alphanumeric password.
pub fn generate_password(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..PASSWORD_ALPHABET.len());
            char::from(PASSWORD_ALPHABET.get(idx).copied().unwrap_or(b'a'))
        })
        .collect()
}

fn root_password_script(password: &str) -> String {
    format!(
        "#!/bin/bash\n\
         echo root:{password} | chpasswd root\n\
         sed -i 's/^#\\?PermitRootLogin.*/PermitRootLogin yes/g' /etc/ssh/sshd_config\n\
         sed -i 's/^#\\?PasswordAuthentication.*/PasswordAuthentication yes/g' /etc/ssh/sshd_config\n\
         rm -rf /etc/ssh/sshd_config.d/* && rm -rf /etc/ssh/ssh_config.d/*\n\
         /etc/init.d/ssh* restart"
    )
}
