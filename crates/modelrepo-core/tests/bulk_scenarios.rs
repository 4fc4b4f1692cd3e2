//! # Bulk Scenario Tests
//!
//! End-to-end scenarios through `Repository` and its wrappers.
//!
//! ## Fixture
//!
//! ```text
//! root (Folder)
//! ├── child-a (Folder)
//! │   └── grand (Folder)
//! │       └── great (Doc)
//! └── child-b (Doc) --see--> great
//! ```

use modelrepo_core::{
    Bulk, BulkLowLevel, BulkLowLevelWrapper, Classifier, ClassifierRegistry, DepthLimit,
    IdMapping, IdMappingWrapper, LanguageRegistry, Link, MetaPointer, PrimitiveType,
    PropertyValue, ReferenceEntry, RepoError, Repository, RepositoryConfig, ResolverPolicies,
    SerializedChunk, SerializedClassifierInstance, StoreMode, UnavailableNodePolicy,
};
use std::collections::BTreeSet;

// =============================================================================
// FIXTURE
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn mp(key: &str) -> MetaPointer {
    MetaPointer::new("files", "1", key)
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn registry() -> LanguageRegistry {
    LanguageRegistry::new()
        .with(
            Classifier::concept(mp("Folder"))
                .with_property(mp("name"), PrimitiveType::String)
                .with_containment(mp("items")),
        )
        .with(
            Classifier::concept(mp("Doc"))
                .with_property(mp("pages"), PrimitiveType::Integer)
                .with_reference(mp("see")),
        )
}

fn folder(id: &str, parent: Option<&str>, items: &[&str]) -> SerializedClassifierInstance {
    let mut instance = SerializedClassifierInstance::new(id, mp("Folder"));
    instance.parent_id = parent.map(str::to_string);
    instance.set_property_value(mp("name"), Some(id.to_uppercase()));
    if !items.is_empty() {
        instance.add_children(mp("items"), ids(items));
    }
    instance
}

fn doc(id: &str, parent: &str) -> SerializedClassifierInstance {
    SerializedClassifierInstance::new(id, mp("Doc")).with_parent(parent)
}

fn chunk(instances: Vec<SerializedClassifierInstance>) -> SerializedChunk {
    let mut chunk = SerializedChunk::from_instances("2023.1", instances).expect("chunk");
    chunk.populate_used_languages();
    chunk
}

/// The fixture partition, in breadth-first order.
fn fixture() -> SerializedChunk {
    let mut child_b = doc("child-b", "root");
    child_b.set_property_value(mp("pages"), Some("12".into()));
    child_b.add_reference_targets(mp("see"), vec![ReferenceEntry::to("great")]);

    chunk(vec![
        folder("root", None, &["child-a", "child-b"]),
        folder("child-a", Some("root"), &["grand"]),
        child_b,
        folder("grand", Some("child-a"), &["great"]),
        doc("great", "grand"),
    ])
}

fn stored_fixture() -> Repository<modelrepo_core::MemoryStore> {
    init_tracing();
    let repo = Repository::in_memory();
    repo.store_chunk(&fixture(), StoreMode::Replace)
        .expect("store fixture");
    repo
}

fn retrieved_ids(repo: &impl BulkLowLevel, request: &[&str], depth: Option<&str>) -> Vec<String> {
    let response = repo.retrieve(&ids(request), depth);
    assert!(response.is_ok, "{:?}", response.error_message);
    response
        .chunk
        .expect("chunk")
        .instances()
        .iter()
        .map(|i| i.id.clone())
        .collect()
}

// =============================================================================
// RETRIEVE
// =============================================================================

mod retrieve {
    use super::*;

    #[test]
    fn depth_limit_bounds_containment_hops() {
        let repo = stored_fixture();

        assert_eq!(retrieved_ids(&repo, &["root"], Some("0")).len(), 1);
        assert_eq!(retrieved_ids(&repo, &["root"], Some("1")).len(), 3);
        assert_eq!(retrieved_ids(&repo, &["root"], Some("2")).len(), 4);
        assert_eq!(retrieved_ids(&repo, &["root"], Some("3")).len(), 5);
        assert_eq!(retrieved_ids(&repo, &["root"], Some("99")).len(), 5);
        assert_eq!(retrieved_ids(&repo, &["root"], None).len(), 5);
    }

    #[test]
    fn result_is_breadth_first() {
        let repo = stored_fixture();
        assert_eq!(
            retrieved_ids(&repo, &["root"], None),
            ids(&["root", "child-a", "child-b", "grand", "great"])
        );
    }

    #[test]
    fn reference_targets_are_not_followed() {
        let repo = stored_fixture();
        assert_eq!(retrieved_ids(&repo, &["child-b"], None), ids(&["child-b"]));
    }

    #[test]
    fn overlapping_requests_are_deduplicated() {
        let repo = stored_fixture();

        let both = retrieved_ids(&repo, &["root", "child-a", "root"], Some("1"));
        let unique: BTreeSet<_> = both.iter().collect();
        assert_eq!(both.len(), unique.len());
        // child-a's own budget reaches grand.
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn midnode_request_starts_below_the_root() {
        let repo = stored_fixture();

        assert_eq!(
            retrieved_ids(&repo, &["child-a"], Some("1")),
            ids(&["child-a", "grand"])
        );
        assert_eq!(retrieved_ids(&repo, &["child-a"], None).len(), 3);
    }

    #[test]
    fn unknown_ids_are_reported_not_failed() {
        let repo = stored_fixture();
        let response = repo.retrieve(&ids(&["ghost", "grand"]), Some("0"));

        assert!(response.is_ok);
        assert_eq!(response.unknown_node_ids, ids(&["ghost"]));
        assert_eq!(response.chunk.expect("chunk").len(), 1);
    }

    #[test]
    fn invalid_parameters_are_flagged() {
        let repo = stored_fixture();

        let empty = repo.retrieve(&[], None);
        assert!(!empty.is_ok);
        assert!(!empty.is_valid_node_ids);

        for depth in ["", "-1", "a", "1.5"] {
            let response = repo.retrieve(&ids(&["root"]), Some(depth));
            assert!(!response.is_ok, "depth {depth:?} accepted");
            assert!(!response.is_valid_depth_limit);
            assert!(response.chunk.is_none());
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

mod store {
    use super::*;

    #[test]
    fn stored_partition_reads_back_unchanged() {
        let repo = stored_fixture();
        let retrieved = repo
            .retrieve_nodes(&ids(&["root"]), DepthLimit::UNBOUNDED)
            .expect("retrieve")
            .chunk;

        assert_eq!(retrieved, fixture());
    }

    #[test]
    fn replace_drops_unlisted_subtrees() {
        let repo = stored_fixture();
        let outcome = repo
            .store_chunk(
                &chunk(vec![folder("root", None, &["child-b"])]),
                StoreMode::Replace,
            )
            .expect("replace");

        let removed: BTreeSet<_> = outcome.removed.iter().map(String::as_str).collect();
        assert_eq!(removed, BTreeSet::from(["child-a", "grand", "great"]));
        assert_eq!(
            retrieved_ids(&repo, &["root"], None),
            ids(&["root", "child-b"])
        );
        assert!(repo.check_consistency().expect("check").is_successful());
    }

    #[test]
    fn replace_moves_stored_nodes() {
        let repo = stored_fixture();
        // great moves from grand to root.
        repo.store_chunk(
            &chunk(vec![
                folder("root", None, &["child-a", "child-b", "great"]),
                folder("grand", Some("child-a"), &[]),
            ]),
            StoreMode::Replace,
        )
        .expect("move");

        let great = repo
            .retrieve_nodes(&ids(&["great"]), DepthLimit::levels(0))
            .expect("retrieve")
            .chunk;
        assert_eq!(
            great.instances()[0].parent_id.as_deref(),
            Some("root")
        );
        assert_eq!(retrieved_ids(&repo, &["grand"], None), ids(&["grand"]));
        assert!(repo.check_consistency().expect("check").is_successful());
    }

    #[test]
    fn other_partitions_are_untouched() {
        let repo = stored_fixture();
        let other = chunk(vec![folder("other", None, &[])]);
        repo.store_chunk(&other, StoreMode::Replace)
            .expect("store other");

        repo.store_chunk(
            &chunk(vec![folder("root", None, &[])]),
            StoreMode::Replace,
        )
        .expect("replace");

        let partitions = repo.list_partitions().expect("partitions");
        assert_eq!(partitions.len(), 2);
        assert_eq!(
            repo.retrieve_nodes(&ids(&["other"]), DepthLimit::UNBOUNDED)
                .expect("retrieve")
                .chunk,
            other
        );
    }

    #[test]
    fn rejected_store_leaves_store_unchanged() {
        let repo = stored_fixture();
        let mut broken = folder("root", None, &["child-a", "nowhere"]);
        broken.set_property_value(mp("name"), Some("BROKEN".into()));

        let response = repo.store(&chunk(vec![broken]), None);
        assert!(!response.is_ok);
        assert!(!response.is_valid_nodes);
        assert!(response.is_valid_mode);

        assert_eq!(
            repo.retrieve_nodes(&ids(&["root"]), DepthLimit::UNBOUNDED)
                .expect("retrieve")
                .chunk,
            fixture()
        );
    }

    #[test]
    fn listing_a_stored_ancestor_is_rejected() {
        let repo = stored_fixture();
        // root is not in the chunk; great would become its parent.
        let response = repo.store(&chunk(vec![folder("great", Some("grand"), &["root"])]), None);

        assert!(!response.is_ok);
        assert!(!response.is_valid_nodes);
        assert_eq!(
            repo.retrieve_nodes(&ids(&["root"]), DepthLimit::UNBOUNDED)
                .expect("retrieve")
                .chunk,
            fixture()
        );
        assert!(repo.check_consistency().expect("check").is_successful());
    }

    #[test]
    fn append_is_not_supported() {
        let repo = stored_fixture();
        let response = repo.store(&fixture(), Some("append"));

        assert!(!response.is_ok);
        assert!(!response.is_valid_mode);
    }

    #[test]
    fn delete_removes_subtree_and_detaches() {
        let repo = stored_fixture();
        let response = repo.delete(&ids(&["child-a"]));

        assert!(response.is_ok);
        assert!(response.unknown_node_ids.is_empty());
        assert_eq!(
            retrieved_ids(&repo, &["root"], None),
            ids(&["root", "child-b"])
        );
        assert!(repo.check_consistency().expect("check").is_successful());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let repo = stored_fixture();

        std::thread::scope(|scope| {
            for n in 0..4 {
                let repo = &repo;
                scope.spawn(move || {
                    let id = format!("part-{n}");
                    repo.store_chunk(&chunk(vec![folder(&id, None, &[])]), StoreMode::Replace)
                        .expect("store");
                });
                scope.spawn(move || {
                    let seen = retrieved_ids(repo, &["root"], None);
                    assert_eq!(seen.len(), 5);
                });
            }
        });

        assert_eq!(repo.list_partitions().expect("partitions").len(), 5);
    }
}

// =============================================================================
// WRAPPERS
// =============================================================================

mod wrappers {
    use super::*;

    fn mapping() -> IdMapping {
        IdMapping::new([
            ("R", "root"),
            ("A", "child-a"),
            ("B", "child-b"),
            ("G", "grand"),
            ("GG", "great"),
        ])
        .expect("mapping")
    }

    #[test]
    fn id_mapping_is_transparent() {
        let repo = stored_fixture();
        let mapping = mapping();
        let mapped = IdMappingWrapper::new(&repo, &mapping);

        assert_eq!(
            retrieved_ids(&mapped, &["R"], Some("1")),
            ids(&["R", "A", "B"])
        );

        let chunk = mapped.retrieve(&ids(&["B"]), Some("0")).chunk.expect("chunk");
        let b = chunk.get_instance_by_id("B").expect("B");
        assert_eq!(b.parent_id.as_deref(), Some("R"));
        assert_eq!(b.references[0].targets[0].target.as_deref(), Some("GG"));
    }

    #[test]
    fn id_mapping_round_trips_through_store() {
        let repo = Repository::in_memory();
        let mapping = mapping();
        let mapped = IdMappingWrapper::new(&repo, &mapping);

        let external = mapping.chunk_to_external(&fixture()).expect("map");
        assert!(mapped.store(&external, None).is_ok);

        assert_eq!(
            repo.retrieve_nodes(&ids(&["root"]), DepthLimit::UNBOUNDED)
                .expect("retrieve")
                .chunk,
            fixture()
        );
        let back = mapped.retrieve(&ids(&["R"]), None).chunk.expect("chunk");
        assert_eq!(back, external);
    }

    #[test]
    fn high_level_over_mapped_low_level() {
        let repo = stored_fixture();
        let mapping = mapping();
        let bulk = BulkLowLevelWrapper::new(IdMappingWrapper::new(&repo, &mapping));

        assert_eq!(bulk.retrieve(&ids(&["A"]), Some(1)).expect("retrieve").len(), 2);
        assert!(bulk.partitions().expect("partitions").contains_id("R"));

        bulk.delete(&ids(&["G"])).expect("delete");
        assert_eq!(bulk.retrieve(&ids(&["R"]), None).expect("retrieve").len(), 3);

        let err = bulk.retrieve(&[], None).expect_err("empty");
        assert!(matches!(err, RepoError::Bulk(_)));
    }
}

// =============================================================================
// RESOLVER
// =============================================================================

mod resolver {
    use super::*;

    #[test]
    fn retrieved_graph_links_in_chunk_nodes() {
        let repo = stored_fixture();
        let registry = registry();
        let graph = repo
            .retrieve_graph(&ids(&["root"]), DepthLimit::UNBOUNDED, &registry)
            .expect("graph");

        assert_eq!(graph.len(), 5);
        assert_eq!(graph.roots().len(), 1);

        let child_b = graph.get("child-b").expect("child-b");
        assert_eq!(child_b.property(&mp("pages")), Some(&PropertyValue::Integer(12)));
        let see = &child_b.references[0].1[0];
        assert_eq!(see.target, graph.index_of("great").map(Link::Node));
    }

    #[test]
    fn retrieved_graph_keeps_cut_links_external() {
        let repo = stored_fixture();
        let registry = registry();
        let graph = repo
            .retrieve_graph(&ids(&["child-a"]), DepthLimit::levels(0), &registry)
            .expect("graph");

        let child_a = graph.get("child-a").expect("child-a");
        assert_eq!(child_a.parent, Some(Link::External("root".into())));
        assert_eq!(
            child_a.children_of(&mp("items")),
            &[Link::External("grand".into())]
        );
    }

    #[test]
    fn graph_flattens_back_to_the_stored_instances() {
        let repo = stored_fixture();
        let registry = registry();
        let graph = repo
            .retrieve_graph(&ids(&["root"]), DepthLimit::UNBOUNDED, &registry)
            .expect("graph");

        let flattened = repo
            .instantiator(&registry)
            .graph_to_chunk(&graph)
            .expect("flatten");

        let sorted = |chunk: &SerializedChunk| {
            let mut instances = chunk.instances().to_vec();
            instances.sort_by(|a, b| a.id.cmp(&b.id));
            instances
        };
        assert_eq!(sorted(&flattened), sorted(&fixture()));
        assert_eq!(flattened.languages, fixture().languages);
    }

    #[test]
    fn repository_policies_drive_the_instantiator() {
        init_tracing();
        let config = RepositoryConfig {
            policies: ResolverPolicies {
                reference_target: UnavailableNodePolicy::Skip,
                ..ResolverPolicies::default()
            },
            ..RepositoryConfig::default()
        };
        let repo = Repository::with_config(modelrepo_core::MemoryStore::new(), config);
        let registry = registry();

        let mut lonely = doc("lonely", "root");
        lonely.parent_id = None;
        lonely.add_reference_targets(mp("see"), vec![ReferenceEntry::to("missing")]);
        let detached = chunk(vec![lonely]);

        let graph = repo
            .instantiator(&registry)
            .to_graph(&detached)
            .expect("skip dangling target");
        assert!(graph.get("lonely").expect("lonely").references[0].1.is_empty());

        let strict = modelrepo_core::Instantiator::new(&registry);
        assert!(matches!(
            strict.to_graph(&detached),
            Err(RepoError::UnavailableReferenceTarget { .. })
        ));
    }

    #[test]
    fn unknown_classifier_is_rejected() {
        let registry = registry();
        let stranger = SerializedClassifierInstance::new("x", MetaPointer::new("other", "1", "X"));
        let result = modelrepo_core::Instantiator::new(&registry).to_graph(&chunk(vec![stranger]));

        assert!(matches!(result, Err(RepoError::UnknownClassifier(_))));
        assert!(registry.resolve(&mp("Folder")).is_some());
    }
}

// =============================================================================
// IDS
// =============================================================================

#[test]
fn reserved_ids_are_fresh_and_storable() {
    let repo = stored_fixture();
    let reserved = BulkLowLevelWrapper::new(&repo).ids(3).expect("ids");

    assert_eq!(reserved, ids(&["id-1", "id-2", "id-3"]));
    let fresh = chunk(vec![folder(&reserved[0], None, &[])]);
    repo.store_chunk(&fresh, StoreMode::Replace).expect("store");
    assert_eq!(repo.list_partitions().expect("partitions").len(), 2);
}
