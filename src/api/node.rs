//! Purpose: Connection settings and API node id rotation used by `Dal::init`.
//! Exports: `DalConfig`, `NodeSelector`, `DEFAULT_CONNECTION_STRING`.
//! Role: Decides which free API node slot a new cluster connection claims.
//! Invariants: Only slots reported as `NoContact` are ever chosen.
//! Invariants: Rotation restarts from the lowest id only after the highest id was used.
use serde::Deserialize;

use crate::core::client::{ApiNodeState, NodeStatus};
use crate::core::error::{ERR_NO_API_NODE, Error, ErrorKind};

pub const DEFAULT_CONNECTION_STRING: &str = "localhost:1186";

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DalConfig {
    /// Management server address(es) of the storage cluster.
    pub connection_string: String,
    /// Claim an explicit free API node id instead of letting the cluster assign one.
    pub find_available_node_id: bool,
}

impl Default for DalConfig {
    fn default() -> Self {
        Self {
            connection_string: DEFAULT_CONNECTION_STRING.to_string(),
            find_available_node_id: false,
        }
    }
}

/// Remembers the last claimed API node id across successive `init` calls.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NodeSelector {
    last_connected: Option<u32>,
}

impl NodeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_connected(&self) -> Option<u32> {
        self.last_connected
    }

    /// Lowest free node id above the last connected one.
    pub fn select(&self, nodes: &[ApiNodeState]) -> Result<u32, Error> {
        let highest = nodes.iter().map(|node| node.node_id).max();
        let floor = match (self.last_connected, highest) {
            (Some(last), Some(highest)) if last < highest => Some(last),
            _ => None,
        };
        nodes
            .iter()
            .filter(|node| node.status == NodeStatus::NoContact)
            .map(|node| node.node_id)
            .filter(|id| floor.is_none_or(|floor| *id > floor))
            .min()
            .ok_or_else(|| {
                Error::new(ErrorKind::Server).with_message(format!(
                    "{ERR_NO_API_NODE}; {} slots known, last connected {:?}",
                    nodes.len(),
                    self.last_connected
                ))
            })
    }

    pub fn record(&mut self, node_id: u32) {
        self.last_connected = Some(node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::{DalConfig, NodeSelector};
    use crate::core::client::{ApiNodeState, NodeStatus};
    use crate::core::error::ErrorKind;

    fn nodes(states: &[(u32, NodeStatus)]) -> Vec<ApiNodeState> {
        states
            .iter()
            .map(|&(node_id, status)| ApiNodeState { node_id, status })
            .collect()
    }

    #[test]
    fn picks_lowest_free_slot_first() {
        let selector = NodeSelector::new();
        let slots = nodes(&[
            (67, NodeStatus::NoContact),
            (65, NodeStatus::Started),
            (66, NodeStatus::NoContact),
        ]);
        assert_eq!(selector.select(&slots).expect("free"), 66);
    }

    #[test]
    fn rotates_past_the_last_connected_id() {
        let mut selector = NodeSelector::new();
        let slots = nodes(&[
            (65, NodeStatus::NoContact),
            (66, NodeStatus::NoContact),
            (67, NodeStatus::NoContact),
        ]);
        selector.record(65);
        assert_eq!(selector.select(&slots).expect("free"), 66);
        selector.record(67);
        assert_eq!(selector.select(&slots).expect("wrapped"), 65);
    }

    #[test]
    fn no_free_slot_above_last_is_a_server_error() {
        let mut selector = NodeSelector::new();
        selector.record(66);
        let slots = nodes(&[
            (65, NodeStatus::NoContact),
            (66, NodeStatus::Started),
            (67, NodeStatus::Started),
        ]);
        let err = selector.select(&slots).expect_err("none free");
        assert_eq!(err.kind(), ErrorKind::Server);
        assert!(NodeSelector::new().select(&[]).is_err());
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: DalConfig =
            serde_json::from_str(r#"{"findAvailableNodeId":true}"#).expect("config");
        assert!(config.find_available_node_id);
        assert_eq!(config.connection_string, super::DEFAULT_CONNECTION_STRING);
    }
}
