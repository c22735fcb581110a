//! The spec data model: abstract build requests and their concrete forms.
//!
//! A spec literal such as `hdf5@1.12: +mpi %gcc@12 ^[deptypes=link] zlib@1.2`
//! is parsed into a [`SpecGraph`] whose nodes start out partially
//! constrained. Concretization (see [`crate::concretize`]) collapses every
//! attribute to a single value.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::registry::version::VersionConstraint;

pub mod lexer;
pub mod parser;
pub mod graph;
pub mod record;

pub use graph::SpecGraph;
pub use graph::DepEdge;
pub use parser::parse;

/// Bit-flag set encoding which dependency types an edge represents.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepFlags(u8);

impl DepFlags {
	pub const NONE: DepFlags = DepFlags(0);
	pub const BUILD: DepFlags = DepFlags(1);
	pub const LINK: DepFlags = DepFlags(1 << 1);
	pub const RUN: DepFlags = DepFlags(1 << 2);
	pub const TEST: DepFlags = DepFlags(1 << 3);
	pub const ALL: DepFlags = DepFlags(0b1111);

	pub fn union(self, other: DepFlags) -> DepFlags {
		DepFlags(self.0 | other.0)
	}

	pub fn contains(self, other: DepFlags) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn intersects(self, other: DepFlags) -> bool {
		self.0 & other.0 != 0
	}

	pub fn is_empty(self) -> bool {
		self.0 == 0
	}

	pub fn from_name(name: &str) -> Option<DepFlags> {
		match name {
			"build" => Some(DepFlags::BUILD),
			"link" => Some(DepFlags::LINK),
			"run" => Some(DepFlags::RUN),
			"test" => Some(DepFlags::TEST),
			_ => None,
		}
	}

	pub fn names(self) -> Vec<&'static str> {
		let mut out = Vec::new();
		if self.contains(DepFlags::BUILD) { out.push("build") }
		if self.contains(DepFlags::LINK) { out.push("link") }
		if self.contains(DepFlags::RUN) { out.push("run") }
		if self.contains(DepFlags::TEST) { out.push("test") }
		out
	}
}

impl std::fmt::Display for DepFlags {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.names().join(","))
	}
}

/// The value a variant holds on a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariantValue {
	Bool(bool),
	String(String),
}

impl std::fmt::Display for VariantValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			VariantValue::Bool(b) => write!(f, "{}", b),
			VariantValue::String(s) => write!(f, "{}", s),
		}
	}
}

/// A variant setting on one node; `propagate` pushes the setting down into
/// dependencies that declare the same variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
	pub value: VariantValue,
	pub propagate: bool,
}

impl Variant {
	pub fn new(value: VariantValue) -> Self {
		Variant { value, propagate: false }
	}
}

/// A compiler constraint: a name plus an optional version restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerSpec {
	pub name: String,
	pub version: VersionConstraint,
}

impl CompilerSpec {
	pub fn new(name: &str) -> Self {
		CompilerSpec { name: name.to_string(), version: VersionConstraint::Any }
	}

	pub fn is_concrete(&self) -> bool {
		self.version.is_concrete()
	}
}

impl std::fmt::Display for CompilerSpec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "%{}", self.name)?;
		if !matches!(self.version, VersionConstraint::Any) {
			write!(f, "@{}", self.version)?;
		}
		Ok(())
	}
}

/// Architecture constraint; every part is open until concretized.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchSpec {
	pub platform: Option<String>,
	pub os: Option<String>,
	pub target: Option<String>,
}

impl ArchSpec {
	pub fn is_concrete(&self) -> bool {
		self.platform.is_some() && self.os.is_some() && self.target.is_some()
	}

	pub fn is_empty(&self) -> bool {
		self.platform.is_none() && self.os.is_none() && self.target.is_none()
	}
}

/// One node of a build request.
///
/// Created by the parser with only the attributes the literal mentioned;
/// concretization fills in the rest. A node referencing a previously
/// concretized spec by hash carries `dag_hash` and nothing else.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
	pub name: Option<String>,
	pub namespace: Option<String>,
	pub versions: VersionConstraint,
	pub compiler: Option<CompilerSpec>,
	pub variants: BTreeMap<String, Variant>,
	pub arch: Option<ArchSpec>,
	/// Reference to an already concretized spec, mutually exclusive with
	/// the other attributes.
	pub dag_hash: Option<String>,
	/// Content hash over the resolved subtree; assigned once, after the
	/// node and all its dependencies are concrete.
	pub(crate) hash: Option<String>,
}

impl Spec {
	pub fn named(name: &str) -> Self {
		Spec { name: Some(name.to_string()), ..Default::default() }
	}

	/// The name, or `""` for an anonymous node.
	pub fn name_str(&self) -> &str {
		self.name.as_deref().unwrap_or("")
	}

	pub fn content_hash(&self) -> Option<&str> {
		self.hash.as_deref()
	}

	pub(crate) fn assign_hash(&mut self, hash: String) {
		debug_assert!(self.hash.is_none(), "content hash is immutable once assigned");
		self.hash = Some(hash);
	}

	/// Attribute-level concreteness; the graph checks dependencies.
	pub fn is_node_concrete(&self) -> bool {
		self.name.is_some()
			&& self.versions.is_concrete()
			&& self.compiler.as_ref().map(|c| c.is_concrete()).unwrap_or(false)
			&& self.arch.as_ref().map(|a| a.is_concrete()).unwrap_or(false)
	}

	/// Whether this node satisfies `condition`, an anonymous constraint
	/// spec such as a dependency's `when` clause.
	///
	/// Strict on variants: a variant mentioned by the condition must be
	/// present on the node with an equal value.
	pub fn satisfies(&self, condition: &Spec) -> bool {
		if let Some(name) = &condition.name {
			if self.name.as_ref() != Some(name) { return false }
		}
		if self.versions.intersect(&condition.versions).is_unsatisfiable() {
			return false
		}
		if let Some(cond_compiler) = &condition.compiler {
			match &self.compiler {
				Some(c) if c.name == cond_compiler.name => {
					if c.version.intersect(&cond_compiler.version).is_unsatisfiable() { return false }
				},
				_ => return false,
			}
		}
		for (key, variant) in &condition.variants {
			match self.variants.get(key) {
				Some(v) if v.value == variant.value => {},
				_ => return false,
			}
		}
		if let Some(cond_arch) = &condition.arch {
			let arch = match &self.arch {
				Some(a) => a,
				None => return cond_arch.is_empty(),
			};
			for (ours, wanted) in [
				(&arch.platform, &cond_arch.platform),
				(&arch.os, &cond_arch.os),
				(&arch.target, &cond_arch.target),
			] {
				if wanted.is_some() && ours != wanted { return false }
			}
		}
		true
	}

	/// Narrows this node by another abstract spec's attributes, used when a
	/// dependency declaration lands on an existing node.
	pub fn constrain(&mut self, other: &Spec) {
		self.versions = self.versions.intersect(&other.versions);
		if self.compiler.is_none() {
			self.compiler = other.compiler.clone();
		}
		for (key, variant) in &other.variants {
			self.variants.entry(key.clone()).or_insert_with(|| variant.clone());
		}
		if self.arch.is_none() && other.arch.is_some() {
			self.arch = other.arch.clone();
		}
	}
}

impl std::fmt::Display for Spec {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut parts = Vec::<String>::new();

		let mut head = String::new();
		if let Some(ns) = &self.namespace {
			head.push_str(ns);
			head.push('.');
		}
		if let Some(name) = &self.name {
			head.push_str(name);
		}
		if !matches!(self.versions, VersionConstraint::Any) {
			head.push('@');
			head.push_str(&self.versions.to_string());
		}
		if !head.is_empty() {
			parts.push(head);
		}

		if let Some(compiler) = &self.compiler {
			parts.push(compiler.to_string());
		}

		for (name, variant) in &self.variants {
			match &variant.value {
				VariantValue::Bool(true) => {
					parts.push(format!("{}{}", if variant.propagate { "++" } else { "+" }, name));
				},
				VariantValue::Bool(false) => {
					parts.push(format!("{}{}", if variant.propagate { "~~" } else { "~" }, name));
				},
				VariantValue::String(value) => {
					parts.push(format!("{}{}{}", name, if variant.propagate { "==" } else { "=" }, value));
				},
			}
		}

		if let Some(arch) = &self.arch {
			if let Some(platform) = &arch.platform { parts.push(format!("platform={}", platform)) }
			if let Some(os) = &arch.os { parts.push(format!("os={}", os)) }
			if let Some(target) = &arch.target { parts.push(format!("target={}", target)) }
		}

		if let Some(hash) = &self.dag_hash {
			parts.push(format!("/{}", hash));
		}

		write!(f, "{}", parts.join(" "))
	}
}
