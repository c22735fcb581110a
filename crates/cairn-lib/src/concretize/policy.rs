//! Per-attribute resolution rules.
//!
//! Each rule inspects one node, may collapse one attribute, and reports
//! whether it changed anything. Applying any rule to an already concrete
//! node is a no-op, so the driver can iterate the rule set to a fixpoint.

use std::collections::VecDeque;

use petgraph::prelude::NodeIndex;

use crate::config::{CompilerInstance, ExternalSpec, ResolveOptions};
use crate::registry::iterator::ConstraintMatchesExt;
use crate::registry::version::{Version, VersionConstraint, VersionRange};
use crate::spec::{ArchSpec, CompilerSpec, Spec, SpecGraph, Variant};
use super::ConcretizeError;
use super::abi;
use super::context::{Context, ProviderCandidate};

/// Collapses the node's version constraint to the best known version.
///
/// Preference order: the configured per-package preference list, then the
/// recipe's `preferred` flagged versions, then the highest satisfying
/// version. With no known version left, the boundary of an open range is
/// used as a best effort.
pub fn resolve_version(graph: &mut SpecGraph, index: NodeIndex, context: &Context) -> Result<bool, ConcretizeError> {
	let node = graph.node(index);
	if node.versions.is_concrete() {
		return Ok(false)
	}
	let name = match &node.name {
		Some(n) => n.clone(),
		None => return Err(ConcretizeError::NotConcrete("<anonymous>".to_string())),
	};
	let constraint = node.versions.clone();
	if constraint.is_unsatisfiable() {
		return Err(ConcretizeError::NoValidVersion { package: name, constraint: constraint.to_string() })
	}
	let recipe = context.registry().recipe(&name)
		.ok_or_else(|| ConcretizeError::UnknownPackage(name.clone()))?;
	let satisfying: Vec<_> = recipe.versions.iter()
		.constraint_matches(constraint.clone())
		.collect();

	let mut chosen: Option<Version> = None;
	if let Some(preferences) = context.options().version_preferences.get(&name) {
		chosen = preferences.iter()
			.find(|p| satisfying.iter().any(|d| &&d.version == p))
			.cloned();
	}
	if chosen.is_none() {
		chosen = satisfying.iter().copied()
			.filter(|d| d.preferred)
			.max_by(|a, b| a.version.cmp(&b.version))
			.or_else(|| satisfying.iter().copied().max_by(|a, b| a.version.cmp(&b.version)))
			.map(|d| d.version.clone());
	}
	if chosen.is_none() {
		/* No known version fits; take the boundary of an open range. */
		chosen = constraint.ranges().iter().find_map(|range| match range {
			VersionRange::MinOnly(v) | VersionRange::MaxOnly(v) => Some(v.clone()),
			_ => None,
		});
	}

	match chosen {
		Some(version) => {
			log::trace!("version of '{}' resolved to {}", name, version);
			graph.node_mut(index).versions = VersionConstraint::exact(version);
			Ok(true)
		},
		None => Err(ConcretizeError::NoValidVersion { package: name, constraint: constraint.to_string() }),
	}
}

/// Fills architecture parts from the nearest ancestor that has any, then
/// from the host platform.
pub fn resolve_architecture(graph: &mut SpecGraph, index: NodeIndex, context: &Context) -> Result<bool, ConcretizeError> {
	if graph.node(index).arch.as_ref().map(|a| a.is_concrete()).unwrap_or(false) {
		return Ok(false)
	}

	let mut inherited: Option<ArchSpec> = None;
	let mut visited = Vec::<NodeIndex>::new();
	let mut queue: VecDeque<NodeIndex> = graph.dependents(index).into();
	while let Some(i) = queue.pop_front() {
		if visited.contains(&i) { continue }
		visited.push(i);
		if let Some(arch) = &graph.node(i).arch {
			inherited = Some(arch.clone());
			break
		}
		for parent in graph.dependents(i) {
			queue.push_back(parent);
		}
	}

	let mut arch = graph.node(index).arch.clone().unwrap_or_default();
	if let Some(parent) = inherited {
		if arch.platform.is_none() { arch.platform = parent.platform }
		if arch.os.is_none() { arch.os = parent.os }
		if arch.target.is_none() { arch.target = parent.target }
	}
	if arch.platform.is_none() {
		arch.platform = Some(context.options().platform.name.clone());
	}
	if arch.os.is_none() {
		arch.os = Some(context.options().platform.os.clone());
	}
	if arch.target.is_none() {
		let target = context.candidate_targets().first()
			.map(|m| m.name.to_string())
			.unwrap_or_else(|| context.options().platform.host_target.clone());
		arch.target = Some(target);
	}

	let changed = graph.node(index).arch.as_ref() != Some(&arch);
	graph.node_mut(index).arch = Some(arch);
	Ok(changed)
}

/// Fills every declared variant absent on the node with its default;
/// explicit values are never overwritten.
pub fn resolve_variants(graph: &mut SpecGraph, index: NodeIndex, context: &Context) -> Result<bool, ConcretizeError> {
	let node = graph.node(index);
	let name = match &node.name {
		Some(n) => n.clone(),
		None => return Ok(false),
	};
	let recipe = match context.registry().recipe(&name) {
		Some(r) => r,
		None => return Ok(false),
	};
	let mut missing: Vec<(String, Variant)> = recipe.variants.iter()
		.filter(|(vname, _)| !node.variants.contains_key(*vname))
		.map(|(vname, decl)| (vname.clone(), Variant::new(decl.default.clone())))
		.collect();
	if missing.is_empty() {
		return Ok(false)
	}
	missing.sort_by(|a, b| a.0.cmp(&b.0));
	for (vname, variant) in missing {
		log::trace!("variant '{}' of '{}' defaulted to {}", vname, name, variant.value);
		graph.node_mut(index).variants.insert(vname, variant);
	}
	Ok(true)
}

/// Resolves the node's compiler against the configured inventory.
///
/// A concrete, known compiler is left alone. Otherwise the constraint is
/// the node's own, or the nearest relative's (parents before children,
/// then the remainder of the graph, then the node itself, then the root),
/// and the best match from the per-package-ordered inventory wins.
pub fn resolve_compiler(graph: &mut SpecGraph, index: NodeIndex, context: &Context) -> Result<bool, ConcretizeError> {
	let node = graph.node(index);
	let options = context.options();
	if let Some(compiler) = &node.compiler {
		if compiler.is_concrete() && compiler_is_known(options, compiler) {
			return Ok(false)
		}
	}
	let name = node.name.clone().unwrap_or_default();
	let constraint = node.compiler.clone().or_else(|| {
		graph.relative_search_order(index).into_iter()
			.find_map(|i| graph.node(i).compiler.clone())
	});

	let instance = match &constraint {
		Some(wanted) => ordered_compilers(options, &name).into_iter().find(|instance| {
			instance.spec.name == wanted.name
				&& !instance.spec.version.intersect(&wanted.version).is_unsatisfiable()
		}),
		None => ordered_compilers(options, &name).into_iter().next(),
	};

	match instance {
		Some(instance) => {
			log::trace!("compiler of '{}' resolved to {}", name, instance.spec);
			graph.node_mut(index).compiler = Some(instance.spec.clone());
			Ok(true)
		},
		None => Err(ConcretizeError::UnavailableCompilerVersion {
			package: name,
			constraint: constraint.map(|c| c.to_string()).unwrap_or_else(|| "any".to_string()),
		}),
	}
}

fn compiler_is_known(options: &ResolveOptions, compiler: &CompilerSpec) -> bool {
	options.compilers.iter()
		.any(|instance| instance.spec.name == compiler.name && instance.spec.version == compiler.version)
}

/// The inventory reordered for one package: preferred compiler names
/// first, then the site order.
fn ordered_compilers<'o>(options: &'o ResolveOptions, package: &str) -> Vec<&'o CompilerInstance> {
	let mut out = Vec::<&CompilerInstance>::new();
	if let Some(preferences) = options.compiler_preferences.get(package) {
		for preference in preferences {
			for instance in &options.compilers {
				if &instance.spec.name == preference && !out.iter().any(|x| std::ptr::eq(*x, instance)) {
					out.push(instance);
				}
			}
		}
	}
	for instance in &options.compilers {
		if !out.iter().any(|x| std::ptr::eq(*x, instance)) {
			out.push(instance);
		}
	}
	out
}

/// Replaces a virtual node with its best provider.
///
/// Candidates come pre-ordered from the context; externals only count when
/// a configured external satisfies the request. Ranking compares every
/// candidate's ABI against the nearest relative with a concrete compiler
/// (the root when there is none), strictly first, loosely second; the sort
/// is stable so provider order breaks ties.
pub fn resolve_provider(graph: &mut SpecGraph, index: NodeIndex, context: &Context) -> Result<bool, ConcretizeError> {
	let node = graph.node(index).clone();
	/* Anything without a recipe of its own needs a provider; a name nothing
	 * provides either is an unsatisfiable request. */
	let virtual_name = match &node.name {
		Some(n) if !context.registry().is_known(n) => n.clone(),
		_ => return Ok(false),
	};

	if context.registry().providers_of(&virtual_name).is_empty() {
		return Err(ConcretizeError::UnsatisfiableProviderSpec(virtual_name))
	}
	let mut candidates = context.providers_for(&virtual_name);
	for candidate in candidates.iter_mut() {
		if candidate.external {
			candidate.external = matching_external(context, &candidate.name, &node).is_some();
		}
	}
	candidates.retain(|c| c.buildable || c.external || context.registry().is_package_installed(&c.name));
	if candidates.is_empty() {
		return Err(ConcretizeError::NoBuild(virtual_name))
	}

	let exemplar_index = graph.relative_search_order(index).into_iter()
		.find(|&i| graph.node(i).compiler.as_ref().map(|c| c.is_concrete()).unwrap_or(false))
		.unwrap_or(graph.root);
	let exemplar = graph.node(exemplar_index).clone();

	candidates.sort_by_key(|candidate| {
		let spec = candidate_spec(context, candidate, &node);
		(!abi::strict_compatible(&spec, &exemplar), !abi::loose_compatible(&spec, &exemplar))
	});

	let chosen = candidates.remove(0);
	log::debug!("'{}' provides '{}'", chosen.name, virtual_name);
	{
		let external = if chosen.external {
			matching_external(context, &chosen.name, &node).map(|e| e.spec.clone())
		} else {
			None
		};
		let target = graph.node_mut(index);
		target.name = Some(chosen.name.clone());
		if let Some(external) = external {
			target.constrain(&external);
		}
	}
	for parent in graph.dependents(index) {
		if let Some(edge) = graph.edge_mut(parent, index) {
			if !edge.virtuals.iter().any(|v| v == &virtual_name) {
				edge.virtuals.push(virtual_name.clone());
			}
		}
	}
	Ok(true)
}

fn matching_external<'o>(context: &Context<'o>, name: &str, requested: &Spec) -> Option<&'o ExternalSpec> {
	context.options().externals.get(name)?.iter().find(|external| {
		!external.spec.versions.intersect(&requested.versions).is_unsatisfiable()
	})
}

fn candidate_spec(context: &Context, candidate: &ProviderCandidate, requested: &Spec) -> Spec {
	if candidate.external {
		if let Some(external) = matching_external(context, &candidate.name, requested) {
			return external.spec.clone()
		}
	}
	Spec::named(&candidate.name)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::registry::Registry;
	use crate::registry::Recipe;
	use crate::registry::recipe::{VariantDecl, VersionDecl};

	fn registry() -> Registry {
		let mut registry = Registry::new();
		let mut foo = Recipe::new("foo");
		foo.versions = vec![VersionDecl::new("1.5"), VersionDecl::new("1.3"), VersionDecl::new("1.0")];
		foo.variants.insert("debug".to_string(), VariantDecl::bool(false));
		foo.variants.insert("shared".to_string(), VariantDecl::bool(true));
		registry.add_recipe(foo);

		let mut mpich = Recipe::new("mpich");
		mpich.provides.insert("mpi".to_string());
		mpich.versions = vec![VersionDecl::new("4.1")];
		let mut openmpi = Recipe::new("openmpi");
		openmpi.provides.insert("mpi".to_string());
		openmpi.versions = vec![VersionDecl::new("4.1.5")];
		registry.add_recipe(mpich);
		registry.add_recipe(openmpi);
		registry
	}

	fn options() -> ResolveOptions {
		let mut options = ResolveOptions::default();
		options.compilers = vec![
			CompilerInstance::new("gcc", "12.1"),
			CompilerInstance::new("gcc", "11.3"),
			CompilerInstance::new("clang", "15.0"),
		];
		options
	}

	fn graph_of(literal: &str) -> SpecGraph {
		crate::spec::parser::parse_one(literal).unwrap()
	}

	#[test]
	fn version_picks_highest_in_range() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo@1.2:1.4");
		let root = graph.root;
		assert!(resolve_version(&mut graph, root, &context).unwrap());
		assert_eq!(graph.root_node().versions.concrete_version(), Some(&Version::new("1.3")));
	}

	#[test]
	fn version_prefers_the_preferred_flag_over_highest() {
		let mut registry = registry();
		let mut bar = Recipe::new("bar");
		bar.versions = vec![VersionDecl::new("2.0"), VersionDecl { preferred: true, ..VersionDecl::new("1.8") }];
		registry.add_recipe(bar);
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("bar");
		let root = graph.root;
		resolve_version(&mut graph, root, &context).unwrap();
		assert_eq!(graph.root_node().versions.concrete_version(), Some(&Version::new("1.8")));
	}

	#[test]
	fn version_falls_back_to_open_range_boundary() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo@3.2:");
		let root = graph.root;
		resolve_version(&mut graph, root, &context).unwrap();
		assert_eq!(graph.root_node().versions.concrete_version(), Some(&Version::new("3.2")));
	}

	#[test]
	fn version_fails_on_unsatisfiable_constraint() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo@1.2:1.4");
		let root = graph.root;
		graph.node_mut(graph.root).versions = VersionConstraint::Ranges(vec![]);
		assert!(matches!(
			resolve_version(&mut graph, root, &context),
			Err(ConcretizeError::NoValidVersion { .. })
		));
	}

	#[test]
	fn version_rule_is_idempotent_on_concrete_nodes() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo@1.2:1.4");
		let root = graph.root;
		assert!(resolve_version(&mut graph, root, &context).unwrap());
		assert!(!resolve_version(&mut graph, root, &context).unwrap());
	}

	#[test]
	fn architecture_defaults_to_the_host() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo");
		let root = graph.root;
		assert!(resolve_architecture(&mut graph, root, &context).unwrap());
		let arch = graph.root_node().arch.clone().unwrap();
		assert_eq!(arch.platform.as_deref(), Some("linux"));
		assert_eq!(arch.target.as_deref(), Some("x86_64_v3"));
		assert!(!resolve_architecture(&mut graph, root, &context).unwrap());
	}

	#[test]
	fn architecture_inherits_from_the_nearest_ancestor() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo target=haswell ^bar");
		let bar = graph.find_named("bar").unwrap();
		resolve_architecture(&mut graph, bar, &context).unwrap();
		assert_eq!(graph.node(bar).arch.clone().unwrap().target.as_deref(), Some("haswell"));
	}

	#[test]
	fn variants_fill_declared_defaults_without_overwriting() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo +debug");
		let root_idx = graph.root;
		assert!(resolve_variants(&mut graph, root_idx, &context).unwrap());
		let root = graph.root_node();
		assert_eq!(root.variants["debug"].value, crate::spec::VariantValue::Bool(true));
		assert_eq!(root.variants["shared"].value, crate::spec::VariantValue::Bool(true));
		assert!(!resolve_variants(&mut graph, root_idx, &context).unwrap());
	}

	#[test]
	fn compiler_resolves_own_constraint_against_the_inventory() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo %gcc");
		let root = graph.root;
		assert!(resolve_compiler(&mut graph, root, &context).unwrap());
		let compiler = graph.root_node().compiler.clone().unwrap();
		assert_eq!(compiler.name, "gcc");
		assert_eq!(compiler.version.concrete_version(), Some(&Version::new("12.1")));
		assert!(!resolve_compiler(&mut graph, root, &context).unwrap());
	}

	#[test]
	fn compiler_is_taken_from_the_nearest_relative() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo %clang@15.0 ^bar");
		let bar = graph.find_named("bar").unwrap();
		resolve_compiler(&mut graph, bar, &context).unwrap();
		assert_eq!(graph.node(bar).compiler.clone().unwrap().name, "clang");
	}

	#[test]
	fn compiler_preferences_reorder_the_inventory() {
		let registry = registry();
		let mut options = options();
		options.compiler_preferences.insert("foo".to_string(), vec!["clang".to_string()]);
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo");
		let root = graph.root;
		resolve_compiler(&mut graph, root, &context).unwrap();
		assert_eq!(graph.root_node().compiler.clone().unwrap().name, "clang");
	}

	#[test]
	fn unavailable_compiler_version_fails() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo %gcc@99");
		let root = graph.root;
		assert!(matches!(
			resolve_compiler(&mut graph, root, &context),
			Err(ConcretizeError::UnavailableCompilerVersion { .. })
		));
	}

	#[test]
	fn provider_substitution_records_the_virtual_on_the_edge() {
		let registry = registry();
		let options = options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo ^mpi");
		let mpi = graph.find_named("mpi").unwrap();
		assert!(resolve_provider(&mut graph, mpi, &context).unwrap());
		/* name order is the baseline with no preferences configured */
		assert_eq!(graph.node(mpi).name.as_deref(), Some("mpich"));
		let edge = graph.edge(graph.root, mpi).unwrap();
		assert_eq!(edge.virtuals, vec!["mpi".to_string()]);
		assert!(!resolve_provider(&mut graph, mpi, &context).unwrap());
	}

	#[test]
	fn provider_ranking_prefers_abi_compatible_externals() {
		let registry = registry();
		let mut options = options();
		options.externals.insert("openmpi".to_string(), vec![
			ExternalSpec::from_literal("openmpi@4.1.5 %gcc@12.1", "/opt/openmpi").unwrap(),
		]);
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo %gcc@12.1 ^mpi");
		let mpi = graph.find_named("mpi").unwrap();
		resolve_provider(&mut graph, mpi, &context).unwrap();
		/* the external matches the exemplar's compiler exactly, beating name order */
		assert_eq!(graph.node(mpi).name.as_deref(), Some("openmpi"));
	}

	#[test]
	fn provider_ranking_is_a_stable_sort() {
		let registry = registry();
		let mut options = options();
		options.preferred_providers.insert("mpi".to_string(), vec!["openmpi".to_string(), "mpich".to_string()]);
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo ^mpi");
		let mpi = graph.find_named("mpi").unwrap();
		resolve_provider(&mut graph, mpi, &context).unwrap();
		/* neither candidate ranks on ABI, so configured order survives */
		assert_eq!(graph.node(mpi).name.as_deref(), Some("openmpi"));
	}

	#[test]
	fn missing_providers_fail_each_in_their_own_way() {
		let registry = registry();
		let mut options = options();
		options.buildable.insert("mpich".to_string(), false);
		options.buildable.insert("openmpi".to_string(), false);
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo ^mpi");
		let mpi = graph.find_named("mpi").unwrap();
		assert!(matches!(
			resolve_provider(&mut graph, mpi, &context),
			Err(ConcretizeError::NoBuild(_))
		));

		let options = self::options();
		let context = Context::new(&options, &registry);
		let mut graph = graph_of("foo ^lapack");
		let lapack = graph.find_named("lapack").unwrap();
		/* nothing provides lapack at all */
		assert!(matches!(
			resolve_provider(&mut graph, lapack, &context),
			Err(ConcretizeError::UnsatisfiableProviderSpec(_))
		));
	}
}
