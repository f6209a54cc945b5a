//! Signal-driven transition graph
//!
//! A small Mealy-style state machine: each node maps a signal to exactly one
//! successor. Transitions are static once the driving loop starts.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Free-form per-node context
pub type NodeContext = HashMap<String, Value>;

/// Graph construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("unknown node: {0}")]
    UnknownNode(String),
    #[error("node already registered: {0}")]
    DuplicateNode(String),
    #[error("node {node} already has a transition on '{signal}'")]
    DuplicateEdge { node: String, signal: String },
}

/// Outcome of feeding a signal to the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<K> {
    /// The current node moved to this target
    Moved(K),
    /// No edge for the signal; current node unchanged
    NoTransition { from: K, signal: String },
    /// No current node has been set
    Uninitialized,
}

#[derive(Debug)]
struct Node<K> {
    transitions: HashMap<String, K>,
    context: NodeContext,
}

impl<K> Node<K> {
    fn new() -> Self {
        Self {
            transitions: HashMap::new(),
            context: NodeContext::new(),
        }
    }
}

/// Transition graph over node identifiers `K`
#[derive(Debug)]
pub struct Graph<K> {
    nodes: HashMap<K, Node<K>>,
    current: Option<K>,
}

impl<K> Default for Graph<K> {
    fn default() -> Self {
        Self {
            nodes: HashMap::new(),
            current: None,
        }
    }
}

impl<K> Graph<K>
where
    K: Clone + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node; the first registered node becomes current
    pub fn add_node(&mut self, id: K) -> Result<(), GraphError> {
        if self.nodes.contains_key(&id) {
            warn!(node = ?id, "Node already registered");
            return Err(GraphError::DuplicateNode(format!("{:?}", id)));
        }

        if self.current.is_none() {
            self.current = Some(id.clone());
        }
        self.nodes.insert(id, Node::new());
        Ok(())
    }

    /// Set the current node. Unknown ids leave the graph untouched.
    pub fn set_start(&mut self, id: &K) -> Result<(), GraphError> {
        if !self.nodes.contains_key(id) {
            warn!(node = ?id, "Cannot start from unknown node");
            return Err(GraphError::UnknownNode(format!("{:?}", id)));
        }

        self.current = Some(id.clone());
        Ok(())
    }

    /// Add `from --signal--> to`. Both endpoints must be registered and the
    /// signal must not already be wired on `from`.
    pub fn add_edge(&mut self, from: &K, signal: impl Into<String>, to: &K) -> Result<(), GraphError> {
        let signal = signal.into();

        if !self.nodes.contains_key(to) {
            warn!(from = ?from, to = ?to, signal = %signal, "Edge target is not a registered node");
            return Err(GraphError::UnknownNode(format!("{:?}", to)));
        }

        let node = match self.nodes.get_mut(from) {
            Some(node) => node,
            None => {
                warn!(from = ?from, to = ?to, signal = %signal, "Edge source is not a registered node");
                return Err(GraphError::UnknownNode(format!("{:?}", from)));
            }
        };

        if node.transitions.contains_key(&signal) {
            warn!(from = ?from, signal = %signal, "Signal already wired on node");
            return Err(GraphError::DuplicateEdge {
                node: format!("{:?}", from),
                signal,
            });
        }

        debug!(from = ?from, to = ?to, signal = %signal, "Added edge");
        node.transitions.insert(signal, to.clone());
        Ok(())
    }

    /// Follow the edge keyed by `signal` from the current node
    pub fn advance(&mut self, signal: &str) -> Transition<K> {
        let Some(current) = self.current.clone() else {
            warn!(signal, "Graph has no current node");
            return Transition::Uninitialized;
        };

        let next = self
            .nodes
            .get(&current)
            .and_then(|node| node.transitions.get(signal))
            .cloned();

        match next {
            Some(target) => {
                info!(from = ?current, to = ?target, signal, "Transition");
                self.current = Some(target.clone());
                Transition::Moved(target)
            }
            None => {
                warn!(from = ?current, signal, available = ?self.signals(&current), "No transition for signal");
                Transition::NoTransition {
                    from: current,
                    signal: signal.to_string(),
                }
            }
        }
    }

    #[cfg(test)]
    pub fn current(&self) -> Option<&K> {
        self.current.as_ref()
    }

    pub fn contains(&self, id: &K) -> bool {
        self.nodes.contains_key(id)
    }

    /// Signals wired on a node
    pub fn signals(&self, id: &K) -> Vec<&str> {
        let mut signals: Vec<&str> = self
            .nodes
            .get(id)
            .map(|n| n.transitions.keys().map(|s| s.as_str()).collect())
            .unwrap_or_default();
        signals.sort_unstable();
        signals
    }

    /// Store a value in the current node's context
    pub fn update_context(&mut self, key: impl Into<String>, value: Value) -> bool {
        let Some(current) = self.current.as_ref() else {
            warn!("No current node to update context");
            return false;
        };

        match self.nodes.get_mut(current) {
            Some(node) => {
                let key = key.into();
                debug!(node = ?current, key = %key, "Updated node context");
                node.context.insert(key, value);
                true
            }
            None => false,
        }
    }

    /// Context of the current node
    pub fn context(&self) -> Option<&NodeContext> {
        self.current
            .as_ref()
            .and_then(|id| self.nodes.get(id))
            .map(|node| &node.context)
    }
}
