//! The dependency-graph arena spec nodes live in.
//!
//! Nodes are indexed by stable integer ids so they can be mutated in place
//! during concretization while other code holds plain indices into the
//! arena. The graph is acyclic by construction: an edge that would close a
//! cycle is rejected when added.

use std::collections::HashMap;

use petgraph::prelude::*;
use serde::{Serialize, Deserialize};

use super::Spec;
use super::DepFlags;

/// Properties of one dependency edge.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DepEdge {
	/// Dependency types this edge represents; empty means "unspecified",
	/// left for concretization to fill from the consumer's recipe.
	pub depflags: DepFlags,
	/// Virtual names the provider satisfies for the consumer.
	pub virtuals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecGraph {
	pub graph: StableDiGraph<Spec, DepEdge>,
	pub root: NodeIndex,
}

impl SpecGraph {
	pub fn new(root: Spec) -> Self {
		let mut graph = StableDiGraph::<Spec, DepEdge>::default();
		let root = graph.add_node(root);
		Self { graph, root }
	}

	pub fn node(&self, index: NodeIndex) -> &Spec {
		&self.graph[index]
	}

	pub fn node_mut(&mut self, index: NodeIndex) -> &mut Spec {
		&mut self.graph[index]
	}

	pub fn root_node(&self) -> &Spec {
		&self.graph[self.root]
	}

	pub fn add_node(&mut self, spec: Spec) -> NodeIndex {
		self.graph.add_node(spec)
	}

	/// Node indices in a breadth-first order from the root, so iteration is
	/// deterministic for callers mutating nodes as they go.
	pub fn traverse(&self) -> Vec<NodeIndex> {
		let mut visited = Vec::<NodeIndex>::with_capacity(self.graph.node_count());
		let mut queue = std::collections::VecDeque::<NodeIndex>::new();
		queue.push_back(self.root);
		while let Some(i) = queue.pop_front() {
			if visited.contains(&i) { continue }
			visited.push(i);
			let mut children: Vec<NodeIndex> = self.graph.neighbors_directed(i, Outgoing).collect();
			children.reverse(); /* petgraph iterates neighbors newest-edge-first */
			for c in children {
				queue.push_back(c);
			}
		}
		visited
	}

	/// Attaches an edge from `consumer` to `provider`.
	///
	/// Rejected when the consumer is already concrete (its dependency set is
	/// sealed) or when the edge would close a cycle.
	pub fn add_edge(&mut self, consumer: NodeIndex, provider: NodeIndex, edge: DepEdge) -> crate::Result<()> {
		if self.graph[consumer].is_node_concrete() {
			return Err(crate::Error::Validation(format!(
				"cannot add a dependency to already concrete spec '{}'",
				self.graph[consumer].name_str()
			)))
		}
		if petgraph::algo::has_path_connecting(&self.graph, provider, consumer, None) {
			return Err(crate::Error::Validation(format!(
				"dependency from '{}' to '{}' would create a cycle",
				self.graph[consumer].name_str(), self.graph[provider].name_str()
			)))
		}
		self.graph.add_edge(consumer, provider, edge);
		Ok(())
	}

	pub fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
		let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(index, Outgoing).collect();
		out.reverse();
		out
	}

	pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
		let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(index, Incoming).collect();
		out.reverse();
		out
	}

	pub fn edge(&self, consumer: NodeIndex, provider: NodeIndex) -> Option<&DepEdge> {
		self.graph.find_edge(consumer, provider).map(|e| &self.graph[e])
	}

	pub fn edge_mut(&mut self, consumer: NodeIndex, provider: NodeIndex) -> Option<&mut DepEdge> {
		self.graph.find_edge(consumer, provider).map(|e| &mut self.graph[e])
	}

	pub fn find_named(&self, name: &str) -> Option<NodeIndex> {
		self.traverse().into_iter().find(|&i| self.graph[i].name.as_deref() == Some(name))
	}

	/// How many nodes carry each package name; the input to duplicate-bound
	/// checks.
	pub fn name_counts(&self) -> HashMap<String, usize> {
		let mut counts = HashMap::new();
		for i in self.traverse() {
			if let Some(name) = &self.graph[i].name {
				*counts.entry(name.clone()).or_insert(0usize) += 1;
			}
		}
		counts
	}

	/// Search order for "nearest relative" lookups: parents breadth-first,
	/// then children breadth-first, then the remainder of the graph, then
	/// the node itself, then the root.
	pub fn relative_search_order(&self, index: NodeIndex) -> Vec<NodeIndex> {
		let mut order = Vec::<NodeIndex>::new();

		let mut queue = std::collections::VecDeque::<NodeIndex>::new();
		for p in self.dependents(index) { queue.push_back(p) }
		while let Some(i) = queue.pop_front() {
			if i == index || order.contains(&i) { continue }
			order.push(i);
			for p in self.dependents(i) { queue.push_back(p) }
		}

		for c in self.dependencies(index) { queue.push_back(c) }
		while let Some(i) = queue.pop_front() {
			if i == index || order.contains(&i) { continue }
			order.push(i);
			for c in self.dependencies(i) { queue.push_back(c) }
		}

		for i in self.traverse() {
			if i != index && !order.contains(&i) {
				order.push(i);
			}
		}

		order.push(index);
		order.push(self.root);
		order
	}

	pub fn is_concrete(&self) -> bool {
		self.traverse().into_iter().all(|i| self.graph[i].is_node_concrete())
	}

	/// Replaces the content of `at` with `other`'s root and grafts the rest
	/// of `other` underneath it, e.g. when a file reference stands in for a
	/// node.
	pub fn merge_graph_at(&mut self, at: NodeIndex, other: &SpecGraph) {
		self.graph[at] = other.graph[other.root].clone();
		let mut mapping = HashMap::<NodeIndex, NodeIndex>::new();
		mapping.insert(other.root, at);
		for i in other.traverse() {
			if i == other.root { continue }
			let copied = self.graph.add_node(other.graph[i].clone());
			mapping.insert(i, copied);
		}
		for e in other.graph.edge_indices() {
			if let Some((a, b)) = other.graph.edge_endpoints(e) {
				self.graph.add_edge(mapping[&a], mapping[&b], other.graph[e].clone());
			}
		}
	}
}

impl std::fmt::Display for SpecGraph {
	/// The canonical literal form: the root's attributes, then every other
	/// node as a `^` dependency in traversal order.
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.graph[self.root])?;
		for i in self.traverse() {
			if i == self.root { continue }
			let edge = self.dependents(i).first()
				.and_then(|&p| self.edge(p, i))
				.cloned()
				.unwrap_or_default();
			if edge.depflags.is_empty() && edge.virtuals.is_empty() {
				write!(f, " ^{}", self.graph[i])?;
			} else {
				write!(f, " ^[")?;
				let mut wrote = false;
				if !edge.depflags.is_empty() {
					write!(f, "deptypes={}", edge.depflags)?;
					wrote = true;
				}
				if !edge.virtuals.is_empty() {
					if wrote { write!(f, " ")? }
					write!(f, "virtuals={}", edge.virtuals.join(","))?;
				}
				write!(f, "] {}", self.graph[i])?;
			}
		}
		Ok(())
	}
}
