//! Chain-client collaborator: connectivity and broadcast, with bounded
//! timeouts so a dead indexer never wedges the UI thread.

use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{CoreError, Result};
use crate::types::Utxo;
use crate::wallet::Wallet;

pub const UTXO_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);
pub const BROADCAST_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Network-facing contract consumed by the core. Only the call surface is
/// assumed; transport and retry policy live behind the implementation.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn ping(&self) -> bool;

    /// Resolves once a connection is established. May suspend indefinitely;
    /// callers wrap it with a timeout.
    async fn wait_until_connected(&self);

    /// Submit a raw transaction. `Ok(false)` means the node answered and
    /// refused it.
    async fn broadcast(&self, tx_hex: &str) -> Result<bool>;

    /// Fetch the current UTXO set for the wallet's addresses.
    async fn fetch_utxos(&self) -> Result<Vec<Utxo>>;
}

/// Refresh the UTXO snapshot, racing the fetch against a fixed timeout.
/// On timeout or fetch failure the last known snapshot is returned instead
/// of blocking the caller indefinitely.
pub async fn refresh_utxos(
    client: &dyn ChainClient,
    wallet: &dyn Wallet,
    include_frozen: bool,
) -> Vec<Utxo> {
    match tokio::time::timeout(UTXO_REFRESH_TIMEOUT, client.fetch_utxos()).await {
        Ok(Ok(fresh)) => fresh,
        Ok(Err(e)) => {
            log::warn!("utxo refresh failed, using cached snapshot: {e}");
            wallet.list_utxos(include_frozen)
        }
        Err(_) => {
            log::warn!("utxo refresh timed out, using cached snapshot");
            wallet.list_utxos(include_frozen)
        }
    }
}

/// Wait for connectivity, then broadcast. A refusal surfaces as
/// `BroadcastRejected` with the transaction untouched, so the caller can
/// retry without re-signing.
pub async fn broadcast_transaction(client: &dyn ChainClient, tx_hex: &str) -> Result<()> {
    tokio::time::timeout(CONNECT_TIMEOUT, client.wait_until_connected())
        .await
        .map_err(|_| CoreError::NetworkTimeout("wait_until_connected"))?;

    let accepted = match tokio::time::timeout(BROADCAST_TIMEOUT, client.broadcast(tx_hex)).await {
        Ok(result) => result?,
        Err(_) => return Err(CoreError::NetworkTimeout("broadcast")),
    };

    if !accepted {
        return Err(CoreError::BroadcastRejected("transaction refused by node".to_string()));
    }
    log::info!("transaction broadcast accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CosignerThreshold;
    use crate::wallet::test_support::{utxo, MemoryWallet};

    const ADDR: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";

    struct StubClient {
        connected: bool,
        accept: bool,
        utxos: Option<Vec<Utxo>>,
        hang_fetch: bool,
        hang_broadcast: bool,
    }

    #[async_trait]
    impl ChainClient for StubClient {
        async fn ping(&self) -> bool {
            self.connected
        }

        async fn wait_until_connected(&self) {
            if !self.connected {
                // simulate a client that never comes up
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }

        async fn broadcast(&self, _tx_hex: &str) -> Result<bool> {
            if self.hang_broadcast {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(self.accept)
        }

        async fn fetch_utxos(&self) -> Result<Vec<Utxo>> {
            if self.hang_fetch {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.utxos
                .clone()
                .ok_or_else(|| CoreError::NetworkTimeout("fetch_utxos"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_times_out_to_cached_snapshot() {
        let wallet =
            MemoryWallet::new(vec![utxo(0xaa, 0, 10_000, ADDR)], CosignerThreshold::new(2, 3));
        let client = StubClient {
            connected: true,
            accept: true,
            utxos: None,
            hang_fetch: true,
            hang_broadcast: false,
        };

        let utxos = refresh_utxos(&client, &wallet, false).await;
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value_sat, 10_000);
    }

    #[tokio::test]
    async fn test_refresh_prefers_fresh_set() {
        let wallet =
            MemoryWallet::new(vec![utxo(0xaa, 0, 10_000, ADDR)], CosignerThreshold::new(2, 3));
        let client = StubClient {
            connected: true,
            accept: true,
            utxos: Some(vec![utxo(0xbb, 0, 77_000, ADDR)]),
            hang_fetch: false,
            hang_broadcast: false,
        };

        let utxos = refresh_utxos(&client, &wallet, false).await;
        assert_eq!(utxos[0].value_sat, 77_000);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_is_surfaced() {
        let client = StubClient {
            connected: true,
            accept: false,
            utxos: None,
            hang_fetch: false,
            hang_broadcast: false,
        };
        let err = broadcast_transaction(&client, "02000000").await.unwrap_err();
        assert!(matches!(err, CoreError::BroadcastRejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_connect_timeout() {
        let client = StubClient {
            connected: false,
            accept: true,
            utxos: None,
            hang_fetch: false,
            hang_broadcast: false,
        };
        let err = broadcast_transaction(&client, "02000000").await.unwrap_err();
        assert!(matches!(err, CoreError::NetworkTimeout("wait_until_connected")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_hang_times_out() {
        let client = StubClient {
            connected: true,
            accept: true,
            utxos: None,
            hang_fetch: false,
            hang_broadcast: true,
        };
        let err = broadcast_transaction(&client, "02000000").await.unwrap_err();
        assert!(matches!(err, CoreError::NetworkTimeout("broadcast")));
    }
}
