//! Purpose: Entry points of the data-access layer: init, shutdown, reads and stats.
//! Exports: `Dal`.
//! Role: Owns the session pool; callers hand in raw request/response buffers.
//! Invariants: One lease serves one call, and a batch leases exactly once.
//! Invariants: A pair's failure lands in its own response buffer and result slot only.
//! Invariants: A session whose node reported shutdown is destroyed, not pooled.
use tracing::{debug, info};

use super::node::{DalConfig, NodeSelector};
use crate::core::client::{Cluster, Connector};
use crate::core::error::{Classification, ERR_CONNECT, Error, ErrorKind};
use crate::core::operation::{PkReadOperation, ReadOutcome};
use crate::core::pool::{Lease, PoolStats, SessionPool, ShutdownReport};
use crate::core::request::RequestBuffer;
use crate::core::response::ResponseBuffer;
use crate::core::schema::SchemaCache;

pub struct Dal<K: Cluster> {
    pool: SessionPool<K>,
}

impl<K: Cluster> Dal<K> {
    /// Connects to the cluster, claiming a free API node id when configured to.
    pub fn init<C>(connector: &C, config: &DalConfig, selector: &mut NodeSelector) -> Result<Self, Error>
    where
        C: Connector<Cluster = K>,
    {
        let node_id = if config.find_available_node_id {
            let nodes = connector
                .api_nodes(&config.connection_string)
                .map_err(|native| Error::native(ERR_CONNECT, native))?;
            Some(selector.select(&nodes)?)
        } else {
            None
        };
        let cluster = connector
            .connect(&config.connection_string, node_id)
            .map_err(|native| Error::native(ERR_CONNECT, native))?;
        if let Some(node_id) = node_id {
            selector.record(node_id);
        }
        info!(
            connection = config.connection_string.as_str(),
            node_id = ?node_id,
            "connected to storage cluster"
        );
        Ok(Self::from_cluster(cluster))
    }

    pub fn from_cluster(cluster: K) -> Self {
        Self {
            pool: SessionPool::new(cluster),
        }
    }

    pub fn cluster(&self) -> &K {
        self.pool.cluster()
    }

    /// Releases pooled sessions; the pool refuses leases afterwards.
    pub fn shutdown(self) -> ShutdownReport {
        self.pool.shutdown()
    }

    pub fn pk_read(&self, request: &[u8], response: &mut [u8]) -> Result<ReadOutcome, Error> {
        let mut lease = self.pool.lease()?;
        let mut cache = SchemaCache::new();
        let result = read_one::<K>(&mut lease, &mut cache, request, response);
        release(lease, node_gone(&result));
        result
    }

    /// Runs each request/response pair in order over a single leased session.
    ///
    /// Only a lease failure or a count mismatch fails the call as a whole.
    pub fn pk_batch_read(
        &self,
        requests: &[&[u8]],
        responses: &mut [&mut [u8]],
    ) -> Result<Vec<Result<ReadOutcome, Error>>, Error> {
        if requests.len() != responses.len() {
            return Err(Error::new(ErrorKind::Client).with_message(format!(
                "batch has {} requests but {} response buffers",
                requests.len(),
                responses.len()
            )));
        }
        let mut lease = self.pool.lease()?;
        let mut cache = SchemaCache::new();
        let results: Vec<_> = requests
            .iter()
            .zip(responses.iter_mut())
            .map(|(request, response)| read_one::<K>(&mut lease, &mut cache, request, response))
            .collect();
        debug!(
            pairs = results.len(),
            failed = results.iter().filter(|result| result.is_err()).count(),
            tables = cache.resolutions(),
            "batch complete"
        );
        let gone = results.iter().any(node_gone);
        release(lease, gone);
        Ok(results)
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }
}

fn read_one<K: Cluster>(
    session: &mut K::Session,
    cache: &mut SchemaCache,
    request: &[u8],
    response: &mut [u8],
) -> Result<ReadOutcome, Error> {
    let mut response = ResponseBuffer::new(response)?;
    let request = match RequestBuffer::new(request) {
        Ok(request) => request,
        Err(err) => {
            response.set_status(err.http_code());
            response.close();
            return Err(err);
        }
    };
    PkReadOperation::new(request, response).perform(session, cache)
}

fn node_gone(result: &Result<ReadOutcome, Error>) -> bool {
    matches!(
        result,
        Err(err) if err
            .native_error()
            .is_some_and(|native| native.classification == Classification::NodeShutdown)
    )
}

fn release<K: Cluster>(lease: Lease<'_, K>, discard: bool) {
    if discard {
        debug!(slot = lease.slot(), "discarding session after node shutdown");
        lease.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::Dal;
    use crate::api::node::{DalConfig, NodeSelector};
    use crate::core::client::{ApiNodeState, NodeStatus};
    use crate::core::error::ErrorKind;
    use crate::core::memory::{MemoryCluster, MemoryConnector};

    fn free_slots(ids: &[u32]) -> Vec<ApiNodeState> {
        ids.iter()
            .map(|&node_id| ApiNodeState {
                node_id,
                status: NodeStatus::NoContact,
            })
            .collect()
    }

    #[test]
    fn init_claims_and_records_a_free_node() {
        let connector = MemoryConnector::new(MemoryCluster::new()).with_api_nodes(free_slots(&[70, 71]));
        let config = DalConfig {
            find_available_node_id: true,
            ..DalConfig::default()
        };
        let mut selector = NodeSelector::new();
        let first = Dal::init(&connector, &config, &mut selector).expect("init");
        assert_eq!(selector.last_connected(), Some(70));
        let second = Dal::init(&connector, &config, &mut selector).expect("init");
        assert_eq!(selector.last_connected(), Some(71));
        first.shutdown();
        second.shutdown();
    }

    #[test]
    fn init_without_node_search_leaves_selector_alone() {
        let connector = MemoryConnector::new(MemoryCluster::new());
        let mut selector = NodeSelector::new();
        let dal = Dal::init(&connector, &DalConfig::default(), &mut selector).expect("init");
        assert_eq!(selector.last_connected(), None);
        assert_eq!(dal.stats().total, 0);
    }

    #[test]
    fn init_fails_on_empty_connection_string() {
        let connector = MemoryConnector::new(MemoryCluster::new());
        let config = DalConfig {
            connection_string: String::new(),
            find_available_node_id: false,
        };
        let err = Dal::init(&connector, &config, &mut NodeSelector::new())
            .err()
            .expect("connect failure");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(err.native_error().is_some());
    }

    #[test]
    fn batch_length_mismatch_is_rejected_before_leasing() {
        let dal = Dal::from_cluster(MemoryCluster::new());
        let mut response = vec![0u8; 64];
        let mut responses = [response.as_mut_slice()];
        let err = dal
            .pk_batch_read(&[], &mut responses)
            .expect_err("mismatch");
        assert_eq!(err.kind(), ErrorKind::Client);
        assert_eq!(dal.stats().created, 0);
    }
}
