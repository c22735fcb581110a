use cairn::spec::DepFlags;
use cairn::spec::parse;
use cairn::spec::parser::parse_one;
use cairn::error::SpecParsingError;

#[test]
fn literals_parse_at_the_engine_boundary() {
	let specs = parse("hdf5@1.12:1.14 +mpi %gcc@12.1 ^[deptypes=build,link] zlib@1.2: ^cmake").unwrap();
	assert_eq!(specs.len(), 1);
	let graph = &specs[0];
	assert_eq!(graph.root_node().name.as_deref(), Some("hdf5"));
	assert_eq!(graph.dependencies(graph.root).len(), 2);

	let zlib = graph.find_named("zlib").unwrap();
	assert_eq!(
		graph.edge(graph.root, zlib).unwrap().depflags,
		DepFlags::BUILD.union(DepFlags::LINK)
	);
}

#[test]
fn every_token_is_consumed_or_the_parse_fails() {
	assert!(parse("foo ^bar ]").is_err());
	assert!(parse("foo @@1.2").is_err());
	assert!(parse("").unwrap().is_empty());
}

#[test]
fn lex_failures_point_at_the_offending_span() {
	let message = parse("foo @@1.2").unwrap_err().to_string();
	assert!(message.contains("foo @@1.2"));
	assert!(message.contains("^^^^^"));
}

#[test]
fn file_reference_replaces_the_node() {
	let registry = cairn_test_utils::sample_registry();
	let options = cairn_test_utils::sample_options();
	let context = cairn::concretize::Context::new(&options, &registry);
	let graph = parse_one("zlib").unwrap();
	let counter = cairn::concretize::Counter::new(&options, &registry, &[&graph]);
	let concrete = cairn::concretize::concretize(graph, &context, &counter).unwrap();
	let records = concrete.to_records().unwrap();

	let path = std::env::temp_dir().join("cairn-file-reference.json");
	std::fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

	let literal = path.display().to_string();
	let loaded = parse_one(&literal).unwrap();
	assert!(loaded.is_concrete());
	assert_eq!(loaded.root_node().name.as_deref(), Some("zlib"));
	assert_eq!(loaded.root_node().content_hash(), Some(concrete.root_hash()));

	/* The loaded node is sealed; new dependencies are redundant. */
	let err = parse(&format!("{} ^cmake", literal)).unwrap_err();
	assert!(matches!(err, cairn::Error::Parse(SpecParsingError::RedundantDependency { .. })));

	std::fs::remove_file(&path).ok();
}

#[test]
fn missing_spec_file_is_a_parse_time_failure() {
	assert!(parse("/tmp/cairn-does-not-exist.json").is_err());
}
