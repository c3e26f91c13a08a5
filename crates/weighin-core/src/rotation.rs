//! Credential rotation over a versioned secret store.
//!
//! A rotation writes the new credential as a fresh version first and only
//! then destroys the others. If anything after the write fails, both old
//! and new versions stay live, which is untidy but never leaves the
//! credential without a readable version. The new version is never rolled
//! back.
//!
//! Rotations on one [`CredentialVault`] are serialized by an async mutex.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use weighin_core::CredentialVault;
//! use weighin_core::mock::MemorySecretStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), weighin_core::Error> {
//! let vault = CredentialVault::new(Arc::new(MemorySecretStore::new()), "fitbit-token");
//! vault.rotate(b"first").await?;
//! vault.rotate(b"second").await?;
//! assert_eq!(vault.get().await?, b"second");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::OAuthToken;
use crate::traits::SecretStore;

/// One named credential kept in a [`SecretStore`].
pub struct CredentialVault {
    secrets: Arc<dyn SecretStore>,
    name: String,
    rotation: Mutex<()>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault")
            .field("name", &self.name)
            .finish()
    }
}

impl CredentialVault {
    pub fn new(secrets: Arc<dyn SecretStore>, name: impl Into<String>) -> Self {
        Self {
            secrets,
            name: name.into(),
            rotation: Mutex::new(()),
        }
    }

    /// Name of the credential in the secret store.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Payload of the highest-numbered live version.
    ///
    /// Fails with [`Error::NoCredential`] when no live version exists.
    pub async fn get(&self) -> Result<Vec<u8>> {
        match self.secrets.latest_version(&self.name).await? {
            Some(secret) => {
                debug!("Read {} version {}", self.name, secret.version);
                Ok(secret.payload)
            }
            None => Err(Error::NoCredential(self.name.clone())),
        }
    }

    /// The current token, decoded.
    pub async fn get_token(&self) -> Result<OAuthToken> {
        let payload = self.get().await?;
        Ok(OAuthToken::from_bytes(&payload)?)
    }

    /// Publish `payload` as the new live version and destroy all others.
    ///
    /// Returns the new version number. A failed write is reported as
    /// [`Error::RotationWrite`] and leaves the store unchanged. A failure
    /// while listing or destroying old versions is reported as
    /// [`Error::CleanupIncomplete`]; the new version is live regardless.
    pub async fn rotate(&self, payload: &[u8]) -> Result<i64> {
        let _guard = self.rotation.lock().await;

        let new_version = self
            .secrets
            .add_version(&self.name, payload)
            .await
            .map_err(|e| Error::RotationWrite {
                source: Box::new(e),
            })?;
        info!("Wrote {} version {}", self.name, new_version);

        let cleanup_failed = |e: Error| {
            warn!(
                "Rotation of {} stopped after writing version {}: {}",
                self.name, new_version, e
            );
            Error::CleanupIncomplete {
                new_version,
                source: Box::new(e),
            }
        };

        let live = self
            .secrets
            .list_versions(&self.name, false)
            .await
            .map_err(cleanup_failed)?;

        let mut destroyed = 0;
        for version in live.into_iter().filter(|v| *v != new_version) {
            self.secrets
                .destroy_version(&self.name, version)
                .await
                .map_err(cleanup_failed)?;
            debug!("Destroyed {} version {}", self.name, version);
            destroyed += 1;
        }

        info!(
            "Rotated {} to version {} ({} old versions destroyed)",
            self.name, new_version, destroyed
        );
        Ok(new_version)
    }

    /// Rotate to a new OAuth token.
    pub async fn rotate_token(&self, token: &OAuthToken) -> Result<i64> {
        let payload = token.to_bytes()?;
        self.rotate(&payload).await
    }

    /// First provisioning of the credential from an out-of-band token.
    ///
    /// Goes through the same write-then-destroy path as a rotation, so
    /// re-provisioning retires whatever was there before.
    pub async fn provision(&self, token: &OAuthToken) -> Result<i64> {
        let version = self.rotate_token(token).await?;
        info!("Provisioned {} at version {}", self.name, version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemorySecretStore;

    const NAME: &str = "fitbit-token";

    fn vault() -> (Arc<MemorySecretStore>, CredentialVault) {
        let secrets = Arc::new(MemorySecretStore::new());
        let vault = CredentialVault::new(secrets.clone(), NAME);
        (secrets, vault)
    }

    #[tokio::test]
    async fn test_get_without_credential_fails() {
        let (_, vault) = vault();
        assert!(matches!(vault.get().await, Err(Error::NoCredential(name)) if name == NAME));
    }

    #[tokio::test]
    async fn test_rotate_leaves_one_live_version() {
        let (secrets, vault) = vault();
        secrets.add_version(NAME, b"old-1").await.unwrap();
        secrets.add_version(NAME, b"old-2").await.unwrap();

        let version = vault.rotate(b"new").await.unwrap();

        assert_eq!(version, 3);
        assert_eq!(vault.get().await.unwrap(), b"new");
        assert_eq!(secrets.live_versions(NAME).await, vec![3]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_old_version() {
        let (secrets, vault) = vault();
        secrets.add_version(NAME, b"old").await.unwrap();
        secrets.set_fail_adds(true);

        let err = vault.rotate(b"new").await.unwrap_err();

        assert!(matches!(err, Error::RotationWrite { .. }));
        assert_eq!(vault.get().await.unwrap(), b"old");
        assert_eq!(secrets.destroy_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_new_version_readable() {
        let (secrets, vault) = vault();
        secrets.add_version(NAME, b"old-1").await.unwrap();
        secrets.add_version(NAME, b"old-2").await.unwrap();
        secrets.fail_destroy_of(1).await;

        let err = vault.rotate(b"new").await.unwrap_err();

        assert!(matches!(err, Error::CleanupIncomplete { new_version: 3, .. }));
        assert_eq!(vault.get().await.unwrap(), b"new");
        // Stopped at the first failure: version 2 was never attempted
        assert_eq!(secrets.live_versions(NAME).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failed_list_keeps_new_version_readable() {
        let (secrets, vault) = vault();
        secrets.add_version(NAME, b"old").await.unwrap();
        secrets.set_fail_lists(true);

        let err = vault.rotate(b"new").await.unwrap_err();
        assert!(matches!(err, Error::CleanupIncomplete { .. }));
        assert_eq!(vault.get().await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_concurrent_rotations_leave_one_live_version() {
        let (secrets, vault) = vault();
        let vault = Arc::new(vault);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let vault = vault.clone();
                tokio::spawn(async move { vault.rotate(format!("token-{}", i).as_bytes()).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(secrets.live_versions(NAME).await.len(), 1);
    }

    #[tokio::test]
    async fn test_provision_and_get_token() {
        let (_, vault) = vault();
        let token = OAuthToken::from_bytes(br#"{"access_token":"a","refresh_token":"r"}"#).unwrap();

        assert_eq!(vault.provision(&token).await.unwrap(), 1);
        assert_eq!(vault.get_token().await.unwrap(), token);
    }
}
