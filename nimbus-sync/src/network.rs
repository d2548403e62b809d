//! Network statistics, polled

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::client::gate::ConsensusGate;
use crate::observable::Observable;
use crate::primitives::NetworkStatistics;

/// Latest network statistics and the derived peer count.
#[derive(Clone, Debug)]
pub struct Network {
    statistics: Observable<NetworkStatistics>,
    peer_count: Observable<u32>,
}

impl Network {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        let statistics = Observable::new(NetworkStatistics::default());
        let peer_count = statistics.map(|statistics| statistics.total_peer_count());
        Self {
            statistics,
            peer_count,
        }
    }

    #[allow(missing_docs)]
    pub fn statistics(&self) -> Observable<NetworkStatistics> {
        self.statistics.clone()
    }

    #[allow(missing_docs)]
    pub fn peer_count(&self) -> Observable<u32> {
        self.peer_count.clone()
    }

    /// Polls the client every `interval` on a new task, starting right after initialization.
    /// Failed polls are logged and skipped. Abort the handle to stop.
    pub fn start_polling(&self, gate: ConsensusGate, interval: Duration) -> JoinHandle<()> {
        let statistics = self.statistics.clone();
        tokio::spawn(async move {
            let client = match gate.initialized().await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!("Network polling not started. {}", e);
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match client.get_network_statistics().await {
                    Ok(latest) => statistics.set(latest),
                    Err(e) => tracing::warn!("Fetching network statistics failed. {}", e),
                }
            }
        })
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{KnownAddressCounts, PeerCounts};
    use crate::test_utils::MockClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn polls_statistics() {
        let mock = Arc::new(MockClient::new());
        mock.set_statistics(NetworkStatistics::from_parts(
            10,
            20,
            PeerCounts {
                total: 4,
                wss: 4,
                ..Default::default()
            },
            KnownAddressCounts::default(),
            0,
        ));
        let network = Network::new();
        assert_eq!(network.peer_count().get(), 0);

        let mut peer_count = network.peer_count().watch();
        let polling = network.start_polling(
            ConsensusGate::new(mock.clone()),
            Duration::from_millis(10),
        );
        peer_count.changed().await.unwrap();
        assert_eq!(*peer_count.borrow(), 4);
        assert_eq!(network.statistics().get().bytes_sent(), 20);

        polling.abort();
    }
}
