//! Turning an abstract spec graph into a concrete one.
//!
//! # Usage
//! 1. Parse a literal with [`crate::spec::parse`] to get abstract [`SpecGraph`]s.
//! 1. Build a [`Context`] and a [`Counter`] over your configuration and
//! registry snapshots; both live for one resolution request.
//! 1. Call [`concretize`] per graph to get a [`ConcreteSpec`] to query,
//! hash and store.
//!
//! The engine resolves heuristically, attribute by attribute, mutating the
//! graph in place until everything is concrete. The counter's duplicate
//! bounds gate the whole process: a graph that violates a bound is
//! rejected before any attribute rule runs, and the bounds stay enforced
//! as dependency expansion grows the graph. [`Counter::possible_packages_facts`]
//! is also the fact source for an external optimizing solver, which this
//! crate treats as opaque.

use petgraph::prelude::NodeIndex;
use serde::{Serialize, Deserialize};

use crate::spec::{DepFlags, Spec, SpecGraph};
use crate::spec::graph::DepEdge;
use crate::spec::record::{self, RecordMap};

pub mod context;
pub use context::Context;
pub use context::ProviderCandidate;

pub mod counter;
pub use counter::Counter;
pub use counter::DuplicateBound;
pub use counter::DuplicateBounds;

pub mod policy;
pub mod abi;

/// These errors end one resolution attempt; nothing is retried and no
/// partial graph survives them.
#[derive(Debug, thiserror::Error)]
pub enum ConcretizeError {
	/// The constraint set admits no known version.
	#[error("no valid version for '{package}' satisfying '{constraint}'")]
	NoValidVersion { package: String, constraint: String },
	/// No configured compiler matches the constraint.
	#[error("no configured compiler satisfies '{constraint}' for '{package}'")]
	UnavailableCompilerVersion { package: String, constraint: String },
	/// Providers exist but none can be built or used externally.
	#[error("no provider of '{0}' can be built or used externally")]
	NoBuild(String),
	/// Nothing provides the requested name at all.
	#[error("nothing provides '{0}'")]
	UnsatisfiableProviderSpec(String),
	/// The graph holds more nodes of one package than its bound allows.
	#[error("package '{0}' occurs {1} times but at most {2} nodes of it may coexist")]
	DuplicateBoundExceeded(String, usize, u32),
	#[error("unknown package '{0}'")]
	UnknownPackage(String),
	/// An attribute survived the fixpoint unresolved.
	#[error("spec '{0}' did not resolve to a concrete node")]
	NotConcrete(String),
}

/// A fully resolved, content-hashed spec graph. Immutable from here on;
/// whatever environment or install record holds it owns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcreteSpec {
	graph: SpecGraph,
	root_hash: String,
}

impl ConcreteSpec {
	pub fn graph(&self) -> &SpecGraph {
		&self.graph
	}

	pub fn root_hash(&self) -> &str {
		&self.root_hash
	}

	/// Flattens into the hash-keyed exchange form.
	pub fn to_records(&self) -> crate::Result<RecordMap> {
		RecordMap::from_graph(&self.graph)
	}
}

impl std::fmt::Display for ConcreteSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.graph)
	}
}

/// Resolves `graph` to a concrete spec against the context's snapshots.
pub fn concretize(graph: SpecGraph, context: &Context, counter: &Counter) -> crate::Result<ConcreteSpec> {
	let mut graph = graph;
	if graph.root_node().name.is_none() && graph.root_node().dag_hash.is_none() {
		return Err(crate::Error::Validation("cannot concretize an anonymous spec".to_string()))
	}

	let bounds = counter.possible_packages_facts();
	bounds.ensure(&graph)?;
	log::debug!("concretizing '{}'", graph.root_node().name_str());

	resolve_hash_references(&mut graph, context)?;

	/* Attribute rules and dependency expansion feed each other (a chosen
	 * version can enable a conditional dependency, a new node needs its
	 * attributes resolved), so iterate to a fixpoint. */
	loop {
		let mut changed = false;
		changed |= expand_dependencies(&mut graph, context, &bounds)?;
		for index in graph.traverse() {
			changed |= policy::resolve_provider(&mut graph, index, context)?;
		}
		for index in graph.traverse() {
			if graph.node(index).is_node_concrete() { continue }
			changed |= policy::resolve_version(&mut graph, index, context)?;
			changed |= policy::resolve_architecture(&mut graph, index, context)?;
			changed |= policy::resolve_variants(&mut graph, index, context)?;
			changed |= policy::resolve_compiler(&mut graph, index, context)?;
		}
		if !changed {
			break
		}
		bounds.ensure(&graph)?;
	}

	for index in graph.traverse() {
		if !graph.node(index).is_node_concrete() {
			return Err(ConcretizeError::NotConcrete(graph.node(index).name_str().to_string()).into())
		}
	}

	assign_hashes(&mut graph)?;
	let root_hash = graph.root_node().content_hash()
		.expect("hashes were just assigned")
		.to_string();
	log::info!("concretized '{}' as {}", graph.root_node().name_str(), root_hash);
	Ok(ConcreteSpec { graph, root_hash })
}

/// Splices installed concrete subgraphs in place of hash-reference nodes.
fn resolve_hash_references(graph: &mut SpecGraph, context: &Context) -> crate::Result<()> {
	for index in graph.traverse() {
		let prefix = match &graph.node(index).dag_hash {
			Some(h) => h.clone(),
			None => continue,
		};
		let (hash, records) = context.registry().lookup_hash(&prefix)
			.ok_or_else(|| crate::Error::Validation(format!("no installed spec matches hash '{}'", prefix)))?;
		let installed = records.graph_from(&hash)?;
		log::debug!("hash '{}' resolved to installed '{}'", prefix, installed.root_node().name_str());
		graph.merge_graph_at(index, &installed);
	}
	Ok(())
}

/// Expands every node's declared dependencies into the graph, reusing
/// existing nodes where the duplicate bounds require it.
fn expand_dependencies(graph: &mut SpecGraph, context: &Context, bounds: &DuplicateBounds) -> crate::Result<bool> {
	let mut changed = false;
	for index in graph.traverse() {
		if graph.node(index).is_node_concrete() { continue }
		let node = graph.node(index).clone();
		let name = match &node.name {
			Some(n) => n.clone(),
			None => continue,
		};
		let recipe = match context.registry().recipe(&name) {
			Some(r) => r.clone(),
			/* Virtuals and unknown names are the provider rule's problem. */
			None => continue,
		};

		for decl in recipe.dependencies_of(&node) {
			let existing_edge = graph.dependencies(index).into_iter().find(|&c| {
				graph.node(c).name.as_deref() == Some(decl.name.as_str())
					|| graph.edge(index, c).map(|e| e.virtuals.iter().any(|v| v == &decl.name)).unwrap_or(false)
			});

			if let Some(child) = existing_edge {
				/* Constraint and deptype updates on an edge we already have. */
				let edge = graph.edge(index, child).expect("edge exists for found child").clone();
				if !edge.depflags.contains(decl.depflags) {
					graph.edge_mut(index, child).expect("edge exists for found child").depflags =
						edge.depflags.union(decl.depflags);
					changed = true;
				}
				let narrowed = graph.node(child).versions.intersect(&decl.constraint);
				if &narrowed != &graph.node(child).versions {
					graph.node_mut(child).versions = narrowed;
					changed = true;
				}
				continue
			}

			let child = dependency_target(graph, bounds, &decl.name, decl.depflags);
			let child = match child {
				Some(existing) => existing,
				None => graph.add_node(Spec::named(&decl.name)),
			};
			{
				let spec = graph.node_mut(child);
				spec.versions = spec.versions.intersect(&decl.constraint);
			}
			propagate_variants(graph, context, index, child);
			graph.add_edge(index, child, DepEdge { depflags: decl.depflags, virtuals: Vec::new() })?;
			log::trace!("expanded dependency '{}' of '{}'", decl.name, name);
			changed = true;
		}
	}
	Ok(changed)
}

/// Picks the node a new dependency edge should land on, honoring the
/// duplicate bound: reuse a role-compatible node when one exists, create a
/// fresh one only while the bound has room.
fn dependency_target(graph: &SpecGraph, bounds: &DuplicateBounds, name: &str, depflags: DepFlags) -> Option<NodeIndex> {
	let existing: Vec<NodeIndex> = graph.traverse().into_iter()
		.filter(|&i| graph.node(i).name.as_deref() == Some(name))
		.collect();
	if existing.is_empty() {
		return None
	}

	let build_only = depflags.intersects(DepFlags::BUILD)
		&& !depflags.intersects(DepFlags::LINK.union(DepFlags::RUN));
	let role_match = existing.iter()
		.find(|&&i| node_is_build_only(graph, i) == build_only);
	if let Some(&found) = role_match {
		return Some(found)
	}

	let bound = bounds.bound_for(name);
	if bound.independent && (existing.len() as u32) < bound.max_dupes {
		/* Room for an independently configured instance. */
		None
	} else {
		existing.first().copied()
	}
}

fn node_is_build_only(graph: &SpecGraph, index: NodeIndex) -> bool {
	let parents = graph.dependents(index);
	if parents.is_empty() {
		return false
	}
	parents.iter().all(|&p| {
		graph.edge(p, index)
			.map(|e| {
				!e.depflags.is_empty()
					&& e.depflags.intersects(DepFlags::BUILD)
					&& !e.depflags.intersects(DepFlags::LINK.union(DepFlags::RUN))
			})
			.unwrap_or(false)
	})
}

/// Pushes a consumer's propagated variants down into a dependency that
/// declares the same variant, keeping the propagate mark so it flows
/// further.
fn propagate_variants(graph: &mut SpecGraph, context: &Context, consumer: NodeIndex, dependency: NodeIndex) {
	let propagated: Vec<(String, crate::spec::Variant)> = graph.node(consumer).variants.iter()
		.filter(|(_, v)| v.propagate)
		.map(|(k, v)| (k.clone(), v.clone()))
		.collect();
	if propagated.is_empty() {
		return
	}
	/* The recipe reference borrows the registry snapshot, not the graph. */
	let recipe = match graph.node(dependency).name.as_deref().and_then(|name| context.registry().recipe(name)) {
		Some(r) => r,
		None => return,
	};
	for (key, variant) in propagated {
		if recipe.declares_variant(&key) && !graph.node(dependency).variants.contains_key(&key) {
			graph.node_mut(dependency).variants.insert(key, variant);
		}
	}
}

/// Content hashes, leaves first so every dependency hash exists before its
/// consumers are digested. Nodes that arrived with a hash keep it.
fn assign_hashes(graph: &mut SpecGraph) -> crate::Result<()> {
	let order = petgraph::algo::toposort(&graph.graph, None)
		.map_err(|_| crate::Error::Validation("dependency graph has a cycle".to_string()))?;
	for index in order.into_iter().rev() {
		if graph.node(index).content_hash().is_some() {
			continue
		}
		let hash = record::node_record(graph, index)?.content_hash()?;
		graph.node_mut(index).assign_hash(hash);
	}
	Ok(())
}
