//! Node Registry
//!
//! A fixed-size, append-only collection of restaking sub-accounts. Each
//! node is delegated to at most one external operator at a time and is
//! never destroyed. The registry is pure bookkeeping; external delegation
//! calls are issued by the settlement service around these records.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{unix_now, AssetId, NodeId, OperatorId};

/// Node registry errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node cap reached: {cap}")]
    NodeCapReached { cap: usize },

    #[error("node not found: {0}")]
    NotFound(NodeId),

    #[error("node {node} already delegated to {operator}")]
    AlreadyDelegated { node: NodeId, operator: OperatorId },

    #[error("node {0} is not delegated")]
    NotDelegated(NodeId),
}

/// A restaking sub-account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier, assigned sequentially
    pub id: NodeId,
    /// Current external delegation target, if any
    pub operator: Option<OperatorId>,
    /// Assets this node holds positions in
    pub strategies: HashSet<AssetId>,
    /// Timestamp when the node was created
    pub created_at: u64,
}

/// Append-only registry of nodes, capped at creation time
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
    next_id: Arc<AtomicU64>,
    cap: usize,
}

impl NodeRegistry {
    /// Create an empty registry with the given node cap
    pub fn new(cap: usize) -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            cap,
        }
    }

    /// Create a new node
    pub async fn create(&self) -> Result<NodeId, NodeError> {
        let mut nodes = self.nodes.write().await;

        if nodes.len() >= self.cap {
            return Err(NodeError::NodeCapReached { cap: self.cap });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        nodes.insert(
            id,
            Node {
                id,
                operator: None,
                strategies: HashSet::new(),
                created_at: unix_now(),
            },
        );
        Ok(id)
    }

    /// Get a node by id
    pub async fn get(&self, id: NodeId) -> Result<Node, NodeError> {
        self.nodes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(NodeError::NotFound(id))
    }

    /// Record a delegation. Fails if the node is already delegated.
    pub async fn set_operator(&self, id: NodeId, operator: OperatorId) -> Result<(), NodeError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;

        if let Some(current) = &node.operator {
            return Err(NodeError::AlreadyDelegated {
                node: id,
                operator: current.clone(),
            });
        }

        node.operator = Some(operator);
        Ok(())
    }

    /// Clear a delegation, returning the previous operator
    pub async fn clear_operator(&self, id: NodeId) -> Result<OperatorId, NodeError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;

        node.operator.take().ok_or(NodeError::NotDelegated(id))
    }

    /// Current operator of a node. Fails if undelegated.
    pub async fn operator(&self, id: NodeId) -> Result<OperatorId, NodeError> {
        self.get(id)
            .await?
            .operator
            .ok_or(NodeError::NotDelegated(id))
    }

    /// Record that a node holds a position in an asset
    pub async fn add_strategy(&self, id: NodeId, asset: AssetId) -> Result<(), NodeError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&id).ok_or(NodeError::NotFound(id))?;
        node.strategies.insert(asset);
        Ok(())
    }

    /// All nodes
    pub async fn all(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.nodes.read().await.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    /// Number of nodes
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_up_to_cap() {
        let registry = NodeRegistry::new(2);

        let a = registry.create().await.unwrap();
        let b = registry.create().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.len().await, 2);

        let result = registry.create().await;
        assert!(matches!(result, Err(NodeError::NodeCapReached { cap: 2 })));
    }

    #[tokio::test]
    async fn test_delegation_lifecycle() {
        let registry = NodeRegistry::new(4);
        let id = registry.create().await.unwrap();

        assert!(matches!(
            registry.operator(id).await,
            Err(NodeError::NotDelegated(_))
        ));

        registry.set_operator(id, "op-1".to_string()).await.unwrap();
        assert_eq!(registry.operator(id).await.unwrap(), "op-1");

        // Double delegation is rejected
        let result = registry.set_operator(id, "op-2".to_string()).await;
        assert!(matches!(result, Err(NodeError::AlreadyDelegated { .. })));

        // Undelegate then re-delegate
        let previous = registry.clear_operator(id).await.unwrap();
        assert_eq!(previous, "op-1");
        registry.set_operator(id, "op-2".to_string()).await.unwrap();
        assert_eq!(registry.operator(id).await.unwrap(), "op-2");
    }

    #[tokio::test]
    async fn test_strategies() {
        let registry = NodeRegistry::new(4);
        let id = registry.create().await.unwrap();

        registry.add_strategy(id, "tokA".to_string()).await.unwrap();
        registry.add_strategy(id, "tokA".to_string()).await.unwrap();
        registry.add_strategy(id, "tokB".to_string()).await.unwrap();

        let node = registry.get(id).await.unwrap();
        assert_eq!(node.strategies.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_node() {
        let registry = NodeRegistry::new(4);
        assert!(matches!(registry.get(9).await, Err(NodeError::NotFound(9))));
    }
}
