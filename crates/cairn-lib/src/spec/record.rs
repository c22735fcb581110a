//! The concrete-spec exchange format.
//!
//! A concrete graph travels as a flat map of content hash to node record
//! plus the root hash, so a consumer can rebuild the graph without any
//! registry access. The record JSON is also the hashed form: a node's
//! content hash is the sha256 digest of its serialized record, which pulls
//! in every dependency by hash and therefore covers the whole resolved
//! subtree.

use std::collections::{BTreeMap, HashMap};

use petgraph::prelude::NodeIndex;
use serde::{Serialize, Deserialize};

use super::Spec;
use super::ArchSpec;
use super::CompilerSpec;
use super::DepFlags;
use super::Variant;
use super::VariantValue;
use super::graph::{SpecGraph, DepEdge};
use crate::registry::version::{Version, GitVersion, VersionConstraint};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerRecord {
	pub name: String,
	pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchRecord {
	pub platform: String,
	pub os: String,
	pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRecord {
	pub name: String,
	pub hash: String,
	pub deptypes: Vec<String>,
}

/// One concrete node in exchange form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecRecord {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub namespace: Option<String>,
	pub version: String,
	pub compiler: CompilerRecord,
	pub variants: BTreeMap<String, VariantValue>,
	pub architecture: ArchRecord,
	pub dependencies: Vec<DependencyRecord>,
}

impl SpecRecord {
	/// The deterministic content hash over this record; dependencies enter
	/// by hash, so the digest covers the full resolved subtree.
	pub fn content_hash(&self) -> crate::Result<String> {
		Ok(sha256::digest(serde_json::to_string(self)?))
	}
}

/// A flat hash-keyed map of records describing one concrete graph.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RecordMap {
	pub root: String,
	pub nodes: BTreeMap<String, SpecRecord>,
}

impl RecordMap {
	/// Loads a record map from a `.json` or `.yaml` file.
	pub fn from_path(path: &std::path::Path) -> crate::Result<Self> {
		let data = std::fs::read_to_string(path)?;
		match path.extension().and_then(|e| e.to_str()) {
			Some("json") => Ok(serde_json::from_str(&data)?),
			Some("yaml") => Ok(serde_yaml::from_str(&data)?),
			_ => Err(crate::Error::Validation(format!(
				"unsupported spec file extension on '{}'", path.display()
			))),
		}
	}

	/// Rebuilds the concrete graph rooted at the map's root hash.
	pub fn to_graph(&self) -> crate::Result<SpecGraph> {
		self.graph_from(&self.root)
	}

	/// Rebuilds the concrete graph rooted at `root_hash`, which may be any
	/// node in the map.
	pub fn graph_from(&self, root_hash: &str) -> crate::Result<SpecGraph> {
		let record = self.record(root_hash)?;
		let mut graph = SpecGraph::new(node_spec(root_hash, record));
		let mut built = HashMap::<String, NodeIndex>::new();
		built.insert(root_hash.to_string(), graph.root);
		let mut pending = vec![root_hash.to_string()];
		while let Some(hash) = pending.pop() {
			let index = built[&hash];
			for dep in &self.record(&hash)?.dependencies {
				let child = match built.get(&dep.hash) {
					Some(&i) => i,
					None => {
						let record = self.record(&dep.hash)?;
						let i = graph.add_node(node_spec(&dep.hash, record));
						built.insert(dep.hash.clone(), i);
						pending.push(dep.hash.clone());
						i
					},
				};
				let mut depflags = DepFlags::NONE;
				for name in &dep.deptypes {
					if let Some(flag) = DepFlags::from_name(name) {
						depflags = depflags.union(flag);
					}
				}
				/* Reconstruction bypasses the sealed-consumer check; the
				 * records already describe a finished graph. */
				graph.graph.add_edge(index, child, DepEdge { depflags, virtuals: Vec::new() });
			}
		}
		Ok(graph)
	}

	/// Flattens a fully hashed concrete graph into exchange form.
	pub fn from_graph(graph: &SpecGraph) -> crate::Result<Self> {
		let root = graph.root_node().content_hash()
			.ok_or_else(|| crate::Error::Validation("graph root has no content hash".to_string()))?
			.to_string();
		let mut nodes = BTreeMap::new();
		for index in graph.traverse() {
			let record = node_record(graph, index)?;
			let hash = graph.node(index).content_hash()
				.ok_or_else(|| crate::Error::Validation("node has no content hash".to_string()))?;
			nodes.insert(hash.to_string(), record);
		}
		Ok(RecordMap { root, nodes })
	}

	fn record(&self, hash: &str) -> crate::Result<&SpecRecord> {
		self.nodes.get(hash).ok_or_else(|| crate::Error::Validation(format!(
			"record map has no node for hash '{}'", hash
		)))
	}
}

/// Builds the exchange record for one concrete node whose dependencies are
/// already hashed.
pub fn node_record(graph: &SpecGraph, index: NodeIndex) -> crate::Result<SpecRecord> {
	let node = graph.node(index);
	if !node.is_node_concrete() {
		return Err(crate::Error::Validation(format!(
			"cannot build an exchange record for abstract spec '{}'", node.name_str()
		)))
	}
	let compiler = node.compiler.as_ref().expect("concrete node has a compiler");
	let arch = node.arch.as_ref().expect("concrete node has an architecture");

	let mut dependencies = Vec::new();
	for child in graph.dependencies(index) {
		let hash = graph.node(child).content_hash().ok_or_else(|| crate::Error::Validation(format!(
			"dependency '{}' has not been hashed yet", graph.node(child).name_str()
		)))?;
		let deptypes = graph.edge(index, child)
			.map(|e| e.depflags.names().into_iter().map(String::from).collect())
			.unwrap_or_default();
		dependencies.push(DependencyRecord {
			name: graph.node(child).name_str().to_string(),
			hash: hash.to_string(),
			deptypes,
		});
	}
	/* Insertion order is not part of the content. */
	dependencies.sort_by(|a, b| a.name.cmp(&b.name));

	Ok(SpecRecord {
		name: node.name_str().to_string(),
		namespace: node.namespace.clone(),
		version: node.versions.to_string(),
		compiler: CompilerRecord {
			name: compiler.name.clone(),
			version: compiler.version.to_string(),
		},
		variants: node.variants.iter()
			.map(|(k, v)| (k.clone(), v.value.clone()))
			.collect(),
		architecture: ArchRecord {
			platform: arch.platform.clone().unwrap_or_default(),
			os: arch.os.clone().unwrap_or_default(),
			target: arch.target.clone().unwrap_or_default(),
		},
		dependencies,
	})
}

fn node_spec(hash: &str, record: &SpecRecord) -> Spec {
	let versions = if let Some(rest) = record.version.strip_prefix("git.") {
		let (reference, mapped) = match rest.split_once('=') {
			Some((r, v)) => (r.to_string(), Some(Version::new(v))),
			None => (rest.to_string(), None),
		};
		VersionConstraint::Git(GitVersion { reference, commit: false, mapped })
	} else if let Some((reference, version)) = record.version.split_once('=') {
		VersionConstraint::Git(GitVersion {
			reference: reference.to_string(),
			commit: true,
			mapped: Some(Version::new(version)),
		})
	} else {
		VersionConstraint::exact(Version::new(&record.version))
	};

	let mut compiler = CompilerSpec::new(&record.compiler.name);
	compiler.version = VersionConstraint::exact(Version::new(&record.compiler.version));

	Spec {
		name: Some(record.name.clone()),
		namespace: record.namespace.clone(),
		versions,
		compiler: Some(compiler),
		variants: record.variants.iter()
			.map(|(k, v)| (k.clone(), Variant { value: v.clone(), propagate: false }))
			.collect(),
		arch: Some(ArchSpec {
			platform: Some(record.architecture.platform.clone()),
			os: Some(record.architecture.os.clone()),
			target: Some(record.architecture.target.clone()),
		}),
		dag_hash: None,
		hash: Some(hash.to_string()),
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn concrete(name: &str, version: &str) -> Spec {
		let mut node = Spec::named(name);
		node.versions = VersionConstraint::exact(Version::new(version));
		let mut compiler = CompilerSpec::new("gcc");
		compiler.version = VersionConstraint::exact(Version::new("12.1"));
		node.compiler = Some(compiler);
		node.arch = Some(ArchSpec {
			platform: Some("linux".to_string()),
			os: Some("ubuntu22.04".to_string()),
			target: Some("x86_64_v3".to_string()),
		});
		node
	}

	fn hashed_graph() -> SpecGraph {
		let mut graph = SpecGraph::new(concrete("hdf5", "1.12.2"));
		let dep = graph.add_node(concrete("zlib", "1.2.13"));
		graph.graph.add_edge(graph.root, dep, DepEdge { depflags: DepFlags::LINK, virtuals: Vec::new() });
		let leaf_record = node_record(&graph, dep).unwrap();
		let leaf_hash = leaf_record.content_hash().unwrap();
		graph.node_mut(dep).assign_hash(leaf_hash);
		let root_record = node_record(&graph, graph.root).unwrap();
		let root_hash = root_record.content_hash().unwrap();
		let root = graph.root;
		graph.node_mut(root).assign_hash(root_hash);
		graph
	}

	#[test]
	fn record_round_trip_preserves_structure() {
		let graph = hashed_graph();
		let records = RecordMap::from_graph(&graph).unwrap();
		assert_eq!(records.nodes.len(), 2);

		let rebuilt = records.to_graph().unwrap();
		assert!(rebuilt.is_concrete());
		assert_eq!(rebuilt.root_node().name.as_deref(), Some("hdf5"));
		let deps = rebuilt.dependencies(rebuilt.root);
		assert_eq!(deps.len(), 1);
		assert_eq!(rebuilt.node(deps[0]).name.as_deref(), Some("zlib"));
		assert_eq!(rebuilt.node(deps[0]).content_hash(), graph.node(graph.find_named("zlib").unwrap()).content_hash());
	}

	#[test]
	fn hash_covers_dependencies() {
		let mut one = RecordMap::from_graph(&hashed_graph()).unwrap();
		let root_record = one.nodes.remove(&one.root).unwrap();

		/* Same root content but a different dependency hash must digest differently. */
		let mut altered = root_record.clone();
		altered.dependencies[0].hash = "0".repeat(64);
		assert_ne!(root_record.content_hash().unwrap(), altered.content_hash().unwrap());
	}

	#[test]
	fn abstract_nodes_have_no_record() {
		let graph = SpecGraph::new(Spec::named("zlib"));
		assert!(node_record(&graph, graph.root).is_err());
	}

	#[test]
	fn missing_record_is_a_failure() {
		let mut records = RecordMap::from_graph(&hashed_graph()).unwrap();
		let root = records.root.clone();
		let mut record = records.nodes[&root].clone();
		record.dependencies[0].hash = "f".repeat(64);
		records.nodes.insert(root, record);
		assert!(records.to_graph().is_err());
	}
}
