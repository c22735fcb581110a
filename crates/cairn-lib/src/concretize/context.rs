//! The candidate filter over one configuration/registry snapshot.
//!
//! Every lookup is a pure function of the two borrowed snapshots, so the
//! memoization below is valid for the context's whole lifetime. A context
//! is built per resolution request and discarded afterwards; sharing one
//! across concurrent resolutions is fine as long as nobody mutates the
//! snapshots underneath it.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

use crate::config::{ResolveOptions, TargetGranularity};
use crate::platform::{self, Microarch};
use crate::registry::Registry;
use crate::spec::Spec;

/// A concrete package eligible to satisfy a virtual, annotated with how it
/// could enter a graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCandidate {
	pub name: String,
	pub buildable: bool,
	pub external: bool,
}

pub struct Context<'a> {
	options: &'a ResolveOptions,
	registry: &'a Registry,
	virtuals: RefCell<Option<BTreeSet<String>>>,
	providers: RefCell<HashMap<String, Vec<ProviderCandidate>>>,
	targets: RefCell<Option<Vec<&'static Microarch>>>,
	runtime: RefCell<Option<Vec<(String, Vec<String>)>>>,
}

impl<'a> Context<'a> {
	pub fn new(options: &'a ResolveOptions, registry: &'a Registry) -> Self {
		Context {
			options,
			registry,
			virtuals: RefCell::new(None),
			providers: RefCell::new(HashMap::new()),
			targets: RefCell::new(None),
			runtime: RefCell::new(None),
		}
	}

	pub fn options(&self) -> &'a ResolveOptions {
		self.options
	}

	pub fn registry(&self) -> &'a Registry {
		self.registry
	}

	/// Packages tagged `runtime`, with the virtuals each provides.
	pub fn runtime_pkgs(&self) -> Vec<(String, Vec<String>)> {
		if self.runtime.borrow().is_none() {
			let computed = self.registry.packages_with_tag("runtime").into_iter()
				.map(|recipe| {
					let mut provides: Vec<String> = recipe.provides.iter().cloned().collect();
					provides.sort();
					(recipe.name.clone(), provides)
				})
				.collect();
			*self.runtime.borrow_mut() = Some(computed);
		}
		self.runtime.borrow().clone().expect("runtime packages were just memoized")
	}

	pub fn is_virtual(&self, name: &str) -> bool {
		if self.virtuals.borrow().is_none() {
			*self.virtuals.borrow_mut() = Some(self.registry.virtual_names());
		}
		self.virtuals.borrow().as_ref().expect("virtual names were just memoized").contains(name)
	}

	/// Eligible providers of `virtual_name`: configured preferences first,
	/// then the registry's name order, each filtered by the candidate
	/// checks.
	pub fn providers_for(&self, virtual_name: &str) -> Vec<ProviderCandidate> {
		if let Some(cached) = self.providers.borrow().get(virtual_name) {
			return cached.clone()
		}

		let registered: Vec<String> = self.registry.providers_of(virtual_name).iter()
			.map(|r| r.name.clone())
			.collect();
		let mut ordered = Vec::<String>::new();
		if let Some(preferred) = self.options.preferred_providers.get(virtual_name) {
			for name in preferred {
				if registered.contains(name) && !ordered.contains(name) {
					ordered.push(name.clone());
				}
			}
		}
		for name in registered {
			if !ordered.contains(&name) {
				ordered.push(name);
			}
		}

		let candidates: Vec<ProviderCandidate> = ordered.into_iter()
			.filter(|name| self.is_provider_candidate(name, virtual_name))
			.map(|name| {
				let recipe_buildable = self.registry.recipe(&name).map(|r| r.buildable).unwrap_or(false);
				ProviderCandidate {
					buildable: self.options.is_buildable(&name, recipe_buildable),
					external: self.options.has_externals(&name),
					name,
				}
			})
			.collect();
		self.providers.borrow_mut().insert(virtual_name.to_string(), candidates.clone());
		candidates
	}

	/// False when any of the package's declared requirement rules excludes
	/// the current platform or microarchitecture.
	pub fn is_allowed_on_this_platform(&self, name: &str) -> bool {
		let recipe = match self.registry.recipe(name) {
			Some(r) => r,
			None => return true,
		};
		for rule in &recipe.requirements {
			let arch = match &rule.require.arch {
				Some(a) => a,
				None => continue,
			};
			if let Some(platform) = &arch.platform {
				if platform != &self.options.platform.name {
					return false
				}
			}
			if let Some(os) = &arch.os {
				if os != &self.options.platform.os {
					return false
				}
			}
			if let Some(target) = &arch.target {
				let candidates = self.candidate_targets();
				if !candidates.is_empty() && !candidates.iter().any(|m| m.name == target) {
					return false
				}
			}
		}
		true
	}

	/// True when the package could end up in a concrete graph at all:
	/// buildable, available externally, or already installed.
	pub fn can_be_installed(&self, name: &str) -> bool {
		let recipe_buildable = self.registry.recipe(name).map(|r| r.buildable).unwrap_or(false);
		self.options.is_buildable(name, recipe_buildable)
			|| self.options.has_externals(name)
			|| self.registry.is_package_installed(name)
	}

	fn is_provider_candidate(&self, name: &str, virtual_name: &str) -> bool {
		if self.options.providers_only {
			let preferred = self.options.preferred_providers.get(virtual_name);
			if !preferred.map(|list| list.iter().any(|p| p == name)).unwrap_or(false) {
				return false
			}
		}
		self.is_allowed_on_this_platform(name) && self.can_be_installed(name)
	}

	/// True only when the package's configured hard requirements are
	/// provably disjoint from `when_spec`. A fast reject, not a solve:
	/// `false` means "possibly reachable".
	pub fn unreachable(&self, name: &str, when_spec: &Spec) -> bool {
		let requirements = match self.options.requirements.get(name) {
			Some(r) => r,
			None => return false,
		};
		for requirement in requirements {
			if requirement.versions.intersect(&when_spec.versions).is_unsatisfiable() {
				return true
			}
			for (key, variant) in &requirement.variants {
				if let Some(other) = when_spec.variants.get(key) {
					if other.value != variant.value {
						return true
					}
				}
			}
			if let (Some(a), Some(b)) = (&requirement.compiler, &when_spec.compiler) {
				if a.name != b.name {
					return true
				}
			}
		}
		false
	}

	/// Targets a concretized node may use, best first: the host plus its
	/// ancestors, the whole family when host compatibility is waived, or
	/// generic levels only. Empty when the configured host target is
	/// unknown to the lineage table.
	pub fn candidate_targets(&self) -> Vec<&'static Microarch> {
		if self.targets.borrow().is_none() {
			let computed = match platform::microarch(&self.options.platform.host_target) {
				Some(host) => {
					let mut chain = vec![host];
					chain.extend(host.ancestors());
					match self.options.granularity {
						TargetGranularity::Generic => chain.into_iter().filter(|m| m.generic).collect(),
						TargetGranularity::Microarchitectures if !self.options.require_host_compatible => {
							platform::family_members(host.family)
						},
						TargetGranularity::Microarchitectures => chain,
					}
				},
				None => Vec::new(),
			};
			*self.targets.borrow_mut() = Some(computed);
		}
		self.targets.borrow().clone().expect("candidate targets were just memoized")
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::registry::Recipe;
	use crate::registry::recipe::RequirementRule;
	use crate::spec::ArchSpec;

	fn registry() -> Registry {
		let mut registry = Registry::new();
		let mut mpich = Recipe::new("mpich");
		mpich.provides.insert("mpi".to_string());
		let mut openmpi = Recipe::new("openmpi");
		openmpi.provides.insert("mpi".to_string());
		let mut ppc_only = Recipe::new("veclib");
		ppc_only.provides.insert("blas".to_string());
		ppc_only.requirements.push(RequirementRule {
			require: Spec {
				arch: Some(ArchSpec { platform: Some("power-cloud".to_string()), os: None, target: None }),
				..Default::default()
			},
			message: None,
		});
		registry.add_recipe(mpich);
		registry.add_recipe(openmpi);
		registry.add_recipe(ppc_only);
		registry
	}

	#[test]
	fn providers_follow_configured_preference_order() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.preferred_providers.insert("mpi".to_string(), vec!["openmpi".to_string()]);
		let context = Context::new(&options, &registry);
		let names: Vec<String> = context.providers_for("mpi").into_iter().map(|c| c.name).collect();
		assert_eq!(names, vec!["openmpi".to_string(), "mpich".to_string()]);
	}

	#[test]
	fn providers_only_drops_unlisted_candidates() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.providers_only = true;
		options.preferred_providers.insert("mpi".to_string(), vec!["mpich".to_string()]);
		let context = Context::new(&options, &registry);
		let names: Vec<String> = context.providers_for("mpi").into_iter().map(|c| c.name).collect();
		assert_eq!(names, vec!["mpich".to_string()]);
	}

	#[test]
	fn platform_requirements_exclude_packages() {
		let registry = registry();
		let options = ResolveOptions::default();
		let context = Context::new(&options, &registry);
		assert!(!context.is_allowed_on_this_platform("veclib"));
		assert!(context.is_allowed_on_this_platform("mpich"));
	}

	#[test]
	fn unbuildable_without_externals_cannot_be_installed() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.buildable.insert("mpich".to_string(), false);
		let context = Context::new(&options, &registry);
		assert!(!context.can_be_installed("mpich"));
		assert!(context.can_be_installed("openmpi"));
	}

	#[test]
	fn unreachable_requires_provable_disjointness() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		let mut requirement = Spec::default();
		requirement.versions = "2:".parse().unwrap();
		options.requirements.insert("mpich".to_string(), vec![requirement]);
		let context = Context::new(&options, &registry);

		let mut old = Spec::named("mpich");
		old.versions = ":1.9".parse().unwrap();
		assert!(context.unreachable("mpich", &old));

		let mut new = Spec::named("mpich");
		new.versions = "3:".parse().unwrap();
		assert!(!context.unreachable("mpich", &new));
	}

	#[test]
	fn candidate_targets_follow_granularity() {
		let registry = registry();
		let mut options = ResolveOptions::default();
		options.platform.host_target = "skylake".to_string();
		let context = Context::new(&options, &registry);
		let names: Vec<&str> = context.candidate_targets().iter().map(|m| m.name).collect();
		assert_eq!(names, vec!["skylake", "broadwell", "haswell", "x86_64_v2", "x86_64"]);

		options.granularity = TargetGranularity::Generic;
		let context = Context::new(&options, &registry);
		let names: Vec<&str> = context.candidate_targets().iter().map(|m| m.name).collect();
		assert_eq!(names, vec!["x86_64_v2", "x86_64"]);

		options.granularity = TargetGranularity::Microarchitectures;
		options.require_host_compatible = false;
		let context = Context::new(&options, &registry);
		assert!(context.candidate_targets().iter().any(|m| m.name == "icelake"));
	}

	#[test]
	fn virtual_lookup_distinguishes_providers_from_virtuals() {
		let registry = registry();
		let options = ResolveOptions::default();
		let context = Context::new(&options, &registry);
		assert!(context.is_virtual("mpi"));
		assert!(!context.is_virtual("mpich"));
		assert!(context.is_virtual("mpi")); /* memoized path */
	}

	#[test]
	fn runtime_pkgs_lists_tagged_recipes() {
		let mut registry = registry();
		let mut glibc = Recipe::new("glibc");
		glibc.tags.insert("runtime".to_string());
		glibc.provides.insert("libc".to_string());
		registry.add_recipe(glibc);
		let options = ResolveOptions::default();
		let context = Context::new(&options, &registry);
		assert_eq!(context.runtime_pkgs(), vec![("glibc".to_string(), vec!["libc".to_string()])]);
	}
}
