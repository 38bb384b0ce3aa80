// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::errors::ForwarderError;
use crate::secrets::SecretStore;
use crate::signer::SinkCredential;
use tracing::debug;

/// Reads the workspace id and shared key from `store`. Called once per
/// invocation; the credential is dropped with the invocation's pipeline.
pub async fn resolve_credential(
    store: &dyn SecretStore,
    workspace_id_secret: &str,
    workspace_key_secret: &str,
) -> Result<SinkCredential, ForwarderError> {
    let (workspace_id, shared_key) = tokio::try_join!(
        store.get(workspace_id_secret),
        store.get(workspace_key_secret)
    )?;
    debug!(
        "SECRETS | Resolved credential for workspace {}",
        workspace_id.trim()
    );
    Ok(SinkCredential::new(workspace_id.trim(), shared_key.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::StaticSecretStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SecretStore for CountingStore {
        async fn get(&self, name: &str) -> Result<String, ForwarderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{name}-value\n"))
        }
    }

    #[tokio::test]
    async fn test_resolve_trims_secret_values() {
        let store = CountingStore {
            calls: AtomicUsize::new(0),
        };
        let credential = resolve_credential(&store, "id", "key").await.unwrap();
        assert_eq!(credential.workspace_id, "id-value");
        assert_eq!(credential.shared_key, "key-value");
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resolve_missing_secret() {
        let store = StaticSecretStore::new([("id", "workspace")]);
        assert!(matches!(
            resolve_credential(&store, "id", "key").await,
            Err(ForwarderError::SecretUnavailable(name)) if name == "key"
        ));
    }
}
