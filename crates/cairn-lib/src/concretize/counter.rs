//! Duplicate-bound calculation.
//!
//! Before any attribute is resolved, the counter walks the registry from
//! the root specs to find every package and virtual that could possibly
//! appear in the graph, then assigns each an upper bound on how many
//! distinct concrete nodes of it may legally coexist. The reachable set is
//! deliberately a superset of any legal concrete dependency set: a `when`
//! condition that later disables a dependency never removes a name from
//! the universe.

use std::cell::{Ref, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::{ResolveOptions, UnifyPolicy};
use crate::registry::Registry;
use crate::spec::{DepFlags, SpecGraph};
use super::ConcretizeError;

const BUILD_TOOLS_TAG: &str = "build-tools";

/// The bound for one package or virtual name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateBound {
	pub max_dupes: u32,
	/// When set, a solver may give each instance its own unification set,
	/// i.e. a fully independent configuration.
	pub independent: bool,
}

impl Default for DuplicateBound {
	fn default() -> Self {
		DuplicateBound { max_dupes: 1, independent: false }
	}
}

/// Bounds for every name the counter saw.
#[derive(Debug, Default, Clone)]
pub struct DuplicateBounds {
	bounds: BTreeMap<String, DuplicateBound>,
}

impl DuplicateBounds {
	pub fn bound_for(&self, name: &str) -> DuplicateBound {
		self.bounds.get(name).copied().unwrap_or_default()
	}

	pub fn insert(&mut self, name: &str, bound: DuplicateBound) {
		self.bounds.insert(name.to_string(), bound);
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &DuplicateBound)> {
		self.bounds.iter()
	}

	/// Rejects a graph that already violates a bound, before any policy
	/// rule gets to look at it.
	pub fn ensure(&self, graph: &SpecGraph) -> Result<(), ConcretizeError> {
		for (name, count) in graph.name_counts() {
			let bound = self.bound_for(&name);
			if count > bound.max_dupes as usize {
				return Err(ConcretizeError::DuplicateBoundExceeded(name, count, bound.max_dupes))
			}
		}
		Ok(())
	}
}

/// Reachability sets shared by the bound policies, memoized on first use.
#[derive(Debug, Default, Clone)]
struct Universe {
	packages: BTreeSet<String>,
	virtuals: BTreeSet<String>,
	link_run: BTreeSet<String>,
	link_run_virtuals: BTreeSet<String>,
	direct_build: BTreeSet<String>,
	direct_build_virtuals: BTreeSet<String>,
	total_build: BTreeSet<String>,
	total_build_virtuals: BTreeSet<String>,
}

pub struct Counter<'a> {
	options: &'a ResolveOptions,
	registry: &'a Registry,
	roots: Vec<String>,
	policy: UnifyPolicy,
	universe: RefCell<Option<Universe>>,
}

impl<'a> Counter<'a> {
	/// The roots are every named node of the request graphs; the policy is
	/// taken from configuration once, at construction.
	pub fn new(options: &'a ResolveOptions, registry: &'a Registry, graphs: &[&SpecGraph]) -> Self {
		let mut roots = Vec::<String>::new();
		for graph in graphs {
			for index in graph.traverse() {
				if let Some(name) = &graph.node(index).name {
					if !roots.contains(name) {
						roots.push(name.clone());
					}
				}
			}
		}
		Counter {
			options,
			registry,
			roots,
			policy: options.unify,
			universe: RefCell::new(None),
		}
	}

	/// Every package name possibly reachable from the roots under the
	/// configured dependency types.
	pub fn possible_dependencies(&self) -> BTreeSet<String> {
		self.universe().packages.clone()
	}

	/// Every virtual name possibly reachable from the roots.
	pub fn possible_virtuals(&self) -> BTreeSet<String> {
		self.universe().virtuals.clone()
	}

	/// The duplicate bound for every reachable package and virtual.
	pub fn possible_packages_facts(&self) -> DuplicateBounds {
		let universe = self.universe();
		let mut facts = DuplicateBounds::default();
		match self.policy {
			UnifyPolicy::NoDuplicates => {
				for name in universe.packages.iter().chain(universe.virtuals.iter()) {
					facts.insert(name, DuplicateBound { max_dupes: 1, independent: false });
				}
			},
			UnifyPolicy::MinimalDuplicates => {
				for name in &universe.packages {
					let duplicable = self.is_build_tool(name)
						&& universe.total_build.contains(name)
						&& !universe.link_run.contains(name);
					facts.insert(name, if duplicable {
						DuplicateBound { max_dupes: 2, independent: true }
					} else {
						DuplicateBound { max_dupes: 1, independent: false }
					});
				}
				for name in &universe.virtuals {
					let duplicable = !universe.link_run_virtuals.contains(name)
						&& self.any_provider_is_build_tool(name);
					facts.insert(name, if duplicable {
						DuplicateBound { max_dupes: 2, independent: true }
					} else {
						DuplicateBound { max_dupes: 1, independent: false }
					});
				}
			},
			UnifyPolicy::FullDuplicates => {
				for name in &universe.packages {
					let count = [&universe.link_run, &universe.direct_build, &universe.total_build]
						.iter()
						.filter(|set| set.contains(name))
						.count()
						.clamp(1, 2) as u32;
					facts.insert(name, DuplicateBound {
						max_dupes: count,
						independent: self.is_build_tool(name),
					});
				}
				for name in &universe.virtuals {
					let count = [&universe.link_run_virtuals, &universe.direct_build_virtuals, &universe.total_build_virtuals]
						.iter()
						.filter(|set| set.contains(name))
						.count()
						.clamp(1, 2) as u32;
					facts.insert(name, DuplicateBound {
						max_dupes: count,
						independent: self.any_provider_is_build_tool(name),
					});
				}
			},
		}
		facts
	}

	fn is_build_tool(&self, name: &str) -> bool {
		self.registry.recipe(name).map(|r| r.is_tagged(BUILD_TOOLS_TAG)).unwrap_or(false)
	}

	fn any_provider_is_build_tool(&self, virtual_name: &str) -> bool {
		self.registry.providers_of(virtual_name).iter().any(|r| r.is_tagged(BUILD_TOOLS_TAG))
	}

	fn universe(&self) -> Ref<'_, Universe> {
		if self.universe.borrow().is_none() {
			let mut universe = Universe::default();

			let (packages, virtuals) = self.reach(self.roots.iter().cloned(), self.options.dependency_types);
			universe.packages = packages;
			universe.virtuals = virtuals;

			let (link_run, link_run_virtuals) = self.reach(self.roots.iter().cloned(), DepFlags::LINK.union(DepFlags::RUN));
			universe.link_run = link_run;
			universe.link_run_virtuals = link_run_virtuals;

			/* Direct build-only dependencies of the link/run sub-graph. */
			for name in &universe.link_run {
				if let Some(recipe) = self.registry.recipe(name) {
					for decl in &recipe.dependencies {
						if !decl.depflags.intersects(DepFlags::BUILD) { continue }
						if decl.depflags.intersects(DepFlags::LINK.union(DepFlags::RUN)) { continue }
						if self.registry.is_virtual(&decl.name) {
							universe.direct_build_virtuals.insert(decl.name.clone());
						} else {
							universe.direct_build.insert(decl.name.clone());
						}
					}
				}
			}

			/* And the build closure of those. */
			let build_seeds: Vec<String> = universe.direct_build.iter()
				.chain(universe.direct_build_virtuals.iter())
				.cloned()
				.collect();
			let (total_build, total_build_virtuals) = self.reach(build_seeds.into_iter(), DepFlags::ALL);
			universe.total_build = total_build;
			universe.total_build_virtuals = total_build_virtuals;

			*self.universe.borrow_mut() = Some(universe);
		}
		Ref::map(self.universe.borrow(), |u| u.as_ref().expect("universe was just memoized"))
	}

	/// Names transitively reachable from `seeds` over dependency
	/// declarations carrying any of `flags`; virtuals expand to all their
	/// providers, `when` conditions are ignored.
	fn reach(&self, seeds: impl Iterator<Item = String>, flags: DepFlags) -> (BTreeSet<String>, BTreeSet<String>) {
		let mut packages = BTreeSet::<String>::new();
		let mut virtuals = BTreeSet::<String>::new();
		let mut queue: VecDeque<String> = seeds.collect();

		while let Some(name) = queue.pop_front() {
			if self.registry.is_virtual(&name) {
				if !virtuals.insert(name.clone()) { continue }
				for provider in self.registry.providers_of(&name) {
					queue.push_back(provider.name.clone());
				}
				continue
			}
			if !packages.insert(name.clone()) { continue }
			if let Some(recipe) = self.registry.recipe(&name) {
				for decl in &recipe.dependencies {
					if decl.depflags.intersects(flags) {
						queue.push_back(decl.name.clone());
					}
				}
			}
		}
		(packages, virtuals)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::registry::Recipe;
	use crate::registry::recipe::DependencyDecl;
	use crate::spec::Spec;

	/// hdf5 -(link)-> mpi (virtual, provided by mpich) and -(build)-> cmake,
	/// cmake -(link)-> curl.
	fn registry() -> Registry {
		let mut registry = Registry::new();

		let mut hdf5 = Recipe::new("hdf5");
		hdf5.dependencies.push(DependencyDecl::new("mpi", DepFlags::LINK));
		hdf5.dependencies.push(DependencyDecl::new("cmake", DepFlags::BUILD));
		registry.add_recipe(hdf5);

		let mut mpich = Recipe::new("mpich");
		mpich.provides.insert("mpi".to_string());
		registry.add_recipe(mpich);

		let mut cmake = Recipe::new("cmake");
		cmake.tags.insert(BUILD_TOOLS_TAG.to_string());
		cmake.dependencies.push(DependencyDecl::new("curl", DepFlags::LINK));
		registry.add_recipe(cmake);

		registry.add_recipe(Recipe::new("curl"));
		registry
	}

	fn counter_for<'a>(options: &'a ResolveOptions, registry: &'a Registry, graph: &SpecGraph) -> Counter<'a> {
		Counter::new(options, registry, &[graph])
	}

	#[test]
	fn universe_is_a_superset_of_reachable_names() {
		let registry = registry();
		let options = ResolveOptions::default();
		let graph = SpecGraph::new(Spec::named("hdf5"));
		let counter = counter_for(&options, &registry, &graph);
		let packages = counter.possible_dependencies();
		for name in ["hdf5", "mpich", "cmake", "curl"] {
			assert!(packages.contains(name), "missing {}", name);
		}
		assert!(counter.possible_virtuals().contains("mpi"));
	}

	#[test]
	fn no_duplicates_bounds_everything_at_one() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.unify = UnifyPolicy::NoDuplicates;
		let graph = SpecGraph::new(Spec::named("hdf5"));
		let counter = counter_for(&options, &registry, &graph);
		let facts = counter.possible_packages_facts();
		assert!(facts.iter().all(|(_, b)| b.max_dupes == 1 && !b.independent));
	}

	#[test]
	fn minimal_duplicates_only_frees_build_tools() {
		let registry = registry();
		let options = ResolveOptions::default();
		let graph = SpecGraph::new(Spec::named("hdf5"));
		let counter = counter_for(&options, &registry, &graph);
		let facts = counter.possible_packages_facts();
		assert_eq!(facts.bound_for("cmake"), DuplicateBound { max_dupes: 2, independent: true });
		assert_eq!(facts.bound_for("hdf5"), DuplicateBound { max_dupes: 1, independent: false });
		/* curl is in the build closure but not tagged */
		assert_eq!(facts.bound_for("curl"), DuplicateBound { max_dupes: 1, independent: false });
	}

	#[test]
	fn full_duplicates_counts_set_memberships() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.unify = UnifyPolicy::FullDuplicates;
		let graph = SpecGraph::new(Spec::named("hdf5"));
		let counter = counter_for(&options, &registry, &graph);
		let facts = counter.possible_packages_facts();
		/* cmake sits in both the direct-build set and its closure */
		assert_eq!(facts.bound_for("cmake").max_dupes, 2);
		assert!(facts.bound_for("cmake").independent);
		assert_eq!(facts.bound_for("hdf5").max_dupes, 1);
	}

	#[test]
	fn bound_violation_is_rejected_before_policies() {
		let registry = registry();
		let options = ResolveOptions::default();
		let mut graph = SpecGraph::new(Spec::named("hdf5"));
		let a = graph.add_node(Spec::named("curl"));
		let b = graph.add_node(Spec::named("curl"));
		graph.add_edge(graph.root, a, Default::default()).unwrap();
		graph.add_edge(graph.root, b, Default::default()).unwrap();

		let counter = counter_for(&options, &registry, &graph);
		let facts = counter.possible_packages_facts();
		assert!(matches!(
			facts.ensure(&graph),
			Err(ConcretizeError::DuplicateBoundExceeded(name, 2, 1)) if name == "curl"
		));
	}
}
