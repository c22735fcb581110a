use cairn::Registry;
use cairn::ResolveOptions;
use cairn::concretize::{concretize, policy, ConcreteSpec, ConcretizeError, Context, Counter};
use cairn::config::UnifyPolicy;
use cairn::registry::version::Version;
use cairn::spec::{DepFlags, Spec, SpecGraph};
use cairn::spec::parser::parse_one;

use cairn_test_utils::{sample_options, sample_registry};

fn resolve_with(literal: &str, options: &ResolveOptions, registry: &Registry) -> cairn::Result<ConcreteSpec> {
	let graph = parse_one(literal)?;
	let context = Context::new(options, registry);
	let counter = Counter::new(options, registry, &[&graph]);
	concretize(graph, &context, &counter)
}

fn resolve(literal: &str) -> cairn::Result<ConcreteSpec> {
	resolve_with(literal, &sample_options(), &sample_registry())
}

#[test]
fn full_resolution_of_a_virtual_using_package() {
	let concrete = resolve("hdf5").unwrap();
	let graph = concrete.graph();
	assert!(graph.is_concrete());

	/* conditional mpi dependency fires off the defaulted +mpi variant */
	let provider = graph.find_named("mpich").expect("mpi resolved to its first provider");
	let edge = graph.edge(graph.root, provider).unwrap();
	assert_eq!(edge.virtuals, vec!["mpi".to_string()]);
	assert_eq!(edge.depflags, DepFlags::LINK);

	let zlib = graph.find_named("zlib").unwrap();
	assert_eq!(graph.node(zlib).versions.concrete_version(), Some(&Version::new("1.3")));

	let cmake = graph.find_named("cmake").unwrap();
	assert_eq!(graph.edge(graph.root, cmake).unwrap().depflags, DepFlags::BUILD);

	let root = graph.root_node();
	assert_eq!(root.compiler.clone().unwrap().name, "gcc");
	assert_eq!(root.arch.clone().unwrap().target.as_deref(), Some("x86_64_v3"));
	assert_eq!(concrete.root_hash(), root.content_hash().unwrap());
}

#[test]
fn version_range_resolves_to_highest_contained_version() {
	let concrete = resolve("foo@1.2:1.4").unwrap();
	assert_eq!(
		concrete.graph().root_node().versions.concrete_version(),
		Some(&Version::new("1.3"))
	);
}

#[test]
fn unsatisfiable_version_range_fails_without_partial_result() {
	let err = resolve("foo@2:3").unwrap_err();
	assert!(matches!(
		err,
		cairn::Error::Concretize(ConcretizeError::NoValidVersion { .. })
	));
}

#[test]
fn disabling_the_variant_disables_the_conditional_dependency() {
	let concrete = resolve("hdf5 ~mpi").unwrap();
	assert!(concrete.graph().find_named("mpich").is_none());
	assert!(concrete.graph().find_named("openmpi").is_none());
}

#[test]
fn propagated_variants_reach_dependencies_that_declare_them() {
	let concrete = resolve("hdf5 ~~shared").unwrap();
	let graph = concrete.graph();
	let zlib = graph.find_named("zlib").unwrap();
	/* zlib defaults to +shared; the propagated setting overrides the default */
	assert_eq!(
		graph.node(zlib).variants["shared"].value,
		cairn::spec::VariantValue::Bool(false)
	);
}

#[test]
fn variant_keys_cover_every_declared_variant() {
	let registry = sample_registry();
	let concrete = resolve("hdf5").unwrap();
	let graph = concrete.graph();
	for index in graph.traverse() {
		let node = graph.node(index);
		let recipe = registry.recipe(node.name_str()).unwrap();
		for declared in recipe.variants.keys() {
			assert!(node.variants.contains_key(declared), "{} lost variant {}", node.name_str(), declared);
		}
	}
}

#[test]
fn no_duplicates_policy_keeps_names_unique() {
	let mut options = sample_options();
	options.unify = UnifyPolicy::NoDuplicates;
	let concrete = resolve_with("hdf5", &options, &sample_registry()).unwrap();
	assert!(concrete.graph().name_counts().values().all(|&count| count == 1));
}

#[test]
fn bound_violations_are_rejected_before_any_policy_runs() {
	let registry = sample_registry();
	let options = sample_options();

	let mut graph = SpecGraph::new(Spec::named("hdf5"));
	let a = graph.add_node(Spec::named("zlib"));
	let b = graph.add_node(Spec::named("zlib"));
	graph.add_edge(graph.root, a, Default::default()).unwrap();
	graph.add_edge(graph.root, b, Default::default()).unwrap();

	let context = Context::new(&options, &registry);
	let counter = Counter::new(&options, &registry, &[&graph]);
	let err = concretize(graph, &context, &counter).unwrap_err();
	assert!(matches!(
		err,
		cairn::Error::Concretize(ConcretizeError::DuplicateBoundExceeded(name, 2, 1)) if name == "zlib"
	));
}

#[test]
fn minimal_duplicates_reserves_duplication_for_build_tools() {
	let registry = sample_registry();
	let options = sample_options();
	let request = parse_one("hdf5").unwrap();
	let counter = Counter::new(&options, &registry, &[&request]);
	let facts = counter.possible_packages_facts();

	/* two cmake nodes are within bounds... */
	let mut tools = SpecGraph::new(Spec::named("hdf5"));
	let a = tools.add_node(Spec::named("cmake"));
	let b = tools.add_node(Spec::named("cmake"));
	tools.add_edge(tools.root, a, Default::default()).unwrap();
	tools.add_edge(tools.root, b, Default::default()).unwrap();
	assert!(facts.ensure(&tools).is_ok());

	/* ...two zlib nodes are not */
	let mut libs = SpecGraph::new(Spec::named("hdf5"));
	let a = libs.add_node(Spec::named("zlib"));
	let b = libs.add_node(Spec::named("zlib"));
	libs.add_edge(libs.root, a, Default::default()).unwrap();
	libs.add_edge(libs.root, b, Default::default()).unwrap();
	assert!(facts.ensure(&libs).is_err());
}

#[test]
fn every_rule_is_a_noop_on_a_concrete_graph() {
	let registry = sample_registry();
	let options = sample_options();
	let context = Context::new(&options, &registry);
	let concrete = resolve("hdf5").unwrap();

	let mut graph = concrete.graph().clone();
	for index in graph.traverse() {
		assert!(!policy::resolve_version(&mut graph, index, &context).unwrap());
		assert!(!policy::resolve_architecture(&mut graph, index, &context).unwrap());
		assert!(!policy::resolve_variants(&mut graph, index, &context).unwrap());
		assert!(!policy::resolve_compiler(&mut graph, index, &context).unwrap());
		assert!(!policy::resolve_provider(&mut graph, index, &context).unwrap());
	}
}

#[test]
fn concrete_specs_round_trip_through_exchange_records() {
	let concrete = resolve("hdf5").unwrap();
	let records = concrete.to_records().unwrap();
	let rebuilt = records.to_graph().unwrap();
	assert!(rebuilt.is_concrete());
	assert_eq!(rebuilt.root_node().content_hash(), Some(concrete.root_hash()));
	assert_eq!(rebuilt.graph.node_count(), concrete.graph().graph.node_count());
}

#[test]
fn hash_references_splice_installed_specs() {
	let concrete = resolve("zlib").unwrap();
	let records = concrete.to_records().unwrap();

	let mut registry = sample_registry();
	registry.register_installed(records);
	let options = sample_options();

	let literal = format!("zlib/{}", &concrete.root_hash()[..12]);
	let reresolved = resolve_with(&literal, &options, &registry).unwrap();
	assert_eq!(reresolved.root_hash(), concrete.root_hash());
}
