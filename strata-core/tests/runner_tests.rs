//! Runner behaviour against the in-process catalog and the memory ledger

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use strata_core::prelude::*;
use strata_core::schema::catalog_shape;

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn id(raw: &str) -> StepId {
    StepId::parse(raw).unwrap()
}

/// Collection with one text field and a unique index on it
fn keyed_collection(name: &str) -> CollectionDescriptor {
    CollectionDescriptor::builder(name)
        .field(FieldDescriptor::text("key").required())
        .index(IndexDefinition::unique(["key"]))
        .build()
        .unwrap()
}

fn create_step(raw: &str, collection: &str) -> Box<dyn Migration> {
    Box::new(
        DeclarativeStep::builder(raw)
            .describe(format!("create {}", collection))
            .create_collection(keyed_collection(collection))
            .build()
            .unwrap(),
    )
}

struct Harness {
    runner: MigrationRunner,
    backend: Arc<CatalogBackend>,
    ledger: Arc<MemoryLedger>,
}

fn harness(steps: Vec<Box<dyn Migration>>) -> Harness {
    init_logs();
    let registry = Arc::new(MigrationRegistry::new(steps).unwrap());
    let backend = Arc::new(CatalogBackend::new());
    let ledger = Arc::new(MemoryLedger::new());
    let runner = MigrationRunner::new(registry, backend.clone(), ledger.clone());
    Harness { runner, backend, ledger }
}

fn abc() -> Harness {
    harness(vec![
        create_step("1000_create_a", "a"),
        create_step("2000_create_b", "b"),
        create_step("3000_create_c", "c"),
    ])
}

async fn ledger_ids(ledger: &MemoryLedger) -> Vec<String> {
    ledger.list_applied().await.unwrap().iter().map(|e| e.step_id.to_string()).collect()
}

fn strings(ids: &[StepId]) -> Vec<String> {
    ids.iter().map(StepId::to_string).collect()
}

/// Step whose forward creates a collection and then fails
struct FailingStep {
    id: StepId,
    partial: CollectionDescriptor,
    backward_calls: AtomicUsize,
}

#[async_trait]
impl Migration for FailingStep {
    fn id(&self) -> &StepId {
        &self.id
    }

    async fn forward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        backend.create_collection(&self.partial).await?;
        Err(MigrationError::Backend("disk full".to_string()))
    }

    async fn backward(&self, _backend: &dyn SchemaBackend) -> MigrationResult<()> {
        self.backward_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== APPLY UP ====================

#[tokio::test]
async fn test_three_steps_apply_in_id_order() {
    let h = abc();

    let applied = h.runner.apply_up(None).await.unwrap();
    assert_eq!(strings(&applied), vec!["1000_create_a", "2000_create_b", "3000_create_c"]);
    assert_eq!(ledger_ids(&h.ledger).await.len(), 3);

    for name in ["a", "b", "c"] {
        let collection = h.backend.find_collection(name).await.unwrap().unwrap();
        assert!(collection.index(&format!("idx_{}_key", name)).unwrap().unique);
    }
}

#[tokio::test]
async fn test_apply_up_twice_is_a_noop() {
    let h = abc();
    h.runner.apply_up(None).await.unwrap();
    let shape = h.backend.shape().await;

    let second = h.runner.apply_up(None).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(h.backend.shape().await, shape);
    assert_eq!(ledger_ids(&h.ledger).await.len(), 3);
}

#[tokio::test]
async fn test_apply_up_to_target_stops_there() {
    let h = abc();

    let applied = h.runner.apply_up(Some(&id("2000_create_b"))).await.unwrap();
    assert_eq!(strings(&applied), vec!["1000_create_a", "2000_create_b"]);
    assert!(h.backend.find_collection("c").await.unwrap().is_none());

    // Target already reached
    assert!(h.runner.apply_up(Some(&id("1000_create_a"))).await.unwrap().is_empty());

    let rest = h.runner.apply_up(None).await.unwrap();
    assert_eq!(strings(&rest), vec!["3000_create_c"]);
}

#[tokio::test]
async fn test_unknown_target_is_rejected_before_any_work() {
    let h = abc();

    let err = h.runner.apply_up(Some(&id("2500_missing"))).await.unwrap_err();
    assert!(matches!(err.source, MigrationError::UnknownStep(_)));
    assert!(err.completed.is_empty() && err.failed_step.is_none());
    assert!(ledger_ids(&h.ledger).await.is_empty());

    let err = h.runner.apply_down(Some(&id("2500_missing"))).await.unwrap_err();
    assert!(matches!(err.source, MigrationError::UnknownStep(_)));
}

#[tokio::test]
async fn test_empty_registry_is_a_noop() {
    let h = harness(Vec::new());
    assert!(h.runner.apply_up(None).await.unwrap().is_empty());
    assert!(h.runner.apply_down(None).await.unwrap().is_empty());
}

// ==================== FAILURES ====================

#[tokio::test]
async fn test_failing_step_is_contained() {
    let h = harness(vec![
        create_step("1000_create_a", "a"),
        Box::new(FailingStep {
            id: id("2000_half_done"),
            partial: keyed_collection("half"),
            backward_calls: AtomicUsize::new(0),
        }) as Box<dyn Migration>,
        create_step("3000_create_c", "c"),
    ]);

    let err = h.runner.apply_up(None).await.unwrap_err();
    assert_eq!(strings(&err.completed), vec!["1000_create_a"]);
    assert_eq!(err.failed_step, Some(id("2000_half_done")));
    assert!(err.to_string().contains("2000_half_done"));
    assert!(matches!(err.source, MigrationError::Backend(ref msg) if msg == "disk full"));

    assert_eq!(ledger_ids(&h.ledger).await, vec!["1000_create_a"]);
    assert!(h.backend.find_collection("a").await.unwrap().is_some());
    // The staged half of the failing step was discarded
    assert!(h.backend.find_collection("half").await.unwrap().is_none());
    assert!(h.backend.find_collection("c").await.unwrap().is_none());
    assert!(!h.backend.in_transaction().await);
}

#[tokio::test]
async fn test_name_conflict_stops_the_batch() {
    let h = harness(vec![create_step("1000_create_a", "a"), create_step("2000_create_b", "b")]);
    h.backend.create_collection(&keyed_collection("B_conflict")).await.unwrap();
    h.backend.rename_collection("B_conflict", "b").await.unwrap();

    let err = h.runner.apply_up(None).await.unwrap_err();
    assert_eq!(strings(&err.completed), vec!["1000_create_a"]);
    assert!(matches!(err.source, MigrationError::NameConflict(ref name) if name == "b"));
    assert_eq!(ledger_ids(&h.ledger).await, vec!["1000_create_a"]);
}

// ==================== APPLY DOWN ====================

#[tokio::test]
async fn test_apply_down_without_target_reverts_one() {
    let h = abc();
    h.runner.apply_up(None).await.unwrap();

    let reverted = h.runner.apply_down(None).await.unwrap();
    assert_eq!(strings(&reverted), vec!["3000_create_c"]);
    assert_eq!(ledger_ids(&h.ledger).await, vec!["1000_create_a", "2000_create_b"]);

    assert!(h.backend.find_collection("c").await.unwrap().is_none());
    for name in ["a", "b"] {
        let collection = h.backend.find_collection(name).await.unwrap().unwrap();
        assert_eq!(collection.indexes().len(), 1);
    }
}

#[tokio::test]
async fn test_apply_down_to_target_reverts_newest_first() {
    let h = abc();
    h.runner.apply_up(None).await.unwrap();

    let reverted = h.runner.apply_down(Some(&id("1000_create_a"))).await.unwrap();
    assert_eq!(strings(&reverted), vec!["3000_create_c", "2000_create_b"]);
    assert_eq!(ledger_ids(&h.ledger).await, vec!["1000_create_a"]);

    assert!(h.runner.apply_down(Some(&id("1000_create_a"))).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_round_trip_restores_shape_and_ledger() {
    let h = harness(vec![
        create_step("1000_create_a", "a"),
        Box::new(
            DeclarativeStep::builder("2000_extend_a")
                .add_field_at("a", FieldDescriptor::number("weight").integer_only(), 0)
                .add_field("a", FieldDescriptor::select("tier", ["gold", "silver"]))
                .create_index("a", IndexDefinition::new(["tier", "weight"]))
                .create_collection(
                    CollectionDescriptor::builder("a_notes")
                        .field(FieldDescriptor::relation("owner", CollectionId::from_name("a")))
                        .field(FieldDescriptor::text("body"))
                        .index(IndexDefinition::new(["owner"]))
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap(),
        ) as Box<dyn Migration>,
    ]);

    h.runner.apply_up(Some(&id("1000_create_a"))).await.unwrap();
    let before = h.backend.shape().await;

    h.runner.apply_up(None).await.unwrap();
    assert_ne!(h.backend.shape().await, before);

    let reverted = h.runner.apply_down(None).await.unwrap();
    assert_eq!(strings(&reverted), vec!["2000_extend_a"]);
    assert_eq!(h.backend.shape().await, before);
    assert!(!h.ledger.is_applied(&id("2000_extend_a")).await.unwrap());
}

#[tokio::test]
async fn test_revert_tolerates_collection_deleted_out_of_band() {
    let h = abc();
    h.runner.apply_up(None).await.unwrap();
    h.backend.delete_collection("c").await.unwrap();

    let reverted = h.runner.apply_down(None).await.unwrap();
    assert_eq!(strings(&reverted), vec!["3000_create_c"]);
    assert!(!h.ledger.is_applied(&id("3000_create_c")).await.unwrap());
}

#[tokio::test]
async fn test_revert_of_unregistered_step_is_an_inconsistency() {
    let h = abc();
    h.runner.apply_up(None).await.unwrap();
    h.ledger.mark_applied(&id("9000_from_elsewhere")).await.unwrap();

    let err = h.runner.apply_down(None).await.unwrap_err();
    assert!(matches!(err.source, MigrationError::LedgerInconsistency(_)));
    assert!(err.completed.is_empty());
    assert_eq!(ledger_ids(&h.ledger).await.len(), 4);
}

#[tokio::test]
async fn test_custom_step_revert_tolerates_missing_objects() {
    struct DropsMissing {
        id: StepId,
    }

    #[async_trait]
    impl Migration for DropsMissing {
        fn id(&self) -> &StepId {
            &self.id
        }
        async fn forward(&self, _backend: &dyn SchemaBackend) -> MigrationResult<()> {
            Ok(())
        }
        async fn backward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
            backend.delete_collection_if_exists("never_created").await
        }
    }

    let h = harness(vec![Box::new(DropsMissing { id: id("1000_custom") }) as Box<dyn Migration>]);
    h.runner.apply_up(None).await.unwrap();
    assert_eq!(strings(&h.runner.apply_down(None).await.unwrap()), vec!["1000_custom"]);
}

/// Custom step whose revert is two operations: drop the index, then the collection
struct CustomDecks {
    id: StepId,
    tolerant: bool,
}

#[async_trait]
impl Migration for CustomDecks {
    fn id(&self) -> &StepId {
        &self.id
    }

    async fn forward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        backend.create_collection(&keyed_collection("decks")).await
    }

    async fn backward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        if self.tolerant {
            backend.drop_index_if_exists("decks", "idx_decks_key").await?;
            backend.delete_collection_if_exists("decks").await
        } else {
            backend.drop_index("decks", "idx_decks_key").await?;
            backend.delete_collection("decks").await
        }
    }
}

#[tokio::test]
async fn test_custom_revert_continues_past_missing_index() {
    let h = harness(vec![
        Box::new(CustomDecks { id: id("1000_custom_decks"), tolerant: true }) as Box<dyn Migration>
    ]);
    h.runner.apply_up(None).await.unwrap();
    h.backend.drop_index("decks", "idx_decks_key").await.unwrap();

    let reverted = h.runner.apply_down(None).await.unwrap();
    assert_eq!(strings(&reverted), vec!["1000_custom_decks"]);
    assert!(h.backend.find_collection("decks").await.unwrap().is_none());
    assert!(ledger_ids(&h.ledger).await.is_empty());
}

#[tokio::test]
async fn test_custom_revert_cut_short_by_not_found_is_a_failure() {
    let h = harness(vec![
        Box::new(CustomDecks { id: id("1000_custom_decks"), tolerant: false }) as Box<dyn Migration>
    ]);
    h.runner.apply_up(None).await.unwrap();
    h.backend.drop_index("decks", "idx_decks_key").await.unwrap();

    let err = h.runner.apply_down(None).await.unwrap_err();
    assert_eq!(err.failed_step, Some(id("1000_custom_decks")));
    assert!(err.source.is_not_found());
    assert!(err.completed.is_empty());

    // Ledger and schema still agree: the step stays applied and decks stays live
    assert_eq!(ledger_ids(&h.ledger).await, vec!["1000_custom_decks"]);
    assert!(h.backend.find_collection("decks").await.unwrap().is_some());
}

// ==================== INSPECTION ====================

#[tokio::test]
async fn test_status_lists_registered_and_stray_steps() {
    let h = abc();
    h.runner.apply_up(Some(&id("1000_create_a"))).await.unwrap();
    h.ledger.mark_applied(&id("500_legacy")).await.unwrap();

    let status = h.runner.status().await.unwrap();
    assert_eq!(status.len(), 4);
    assert!(matches!(status[0].state, StepState::Applied { .. }));
    assert_eq!(status[0].description, "create a");
    assert_eq!(status[1].state, StepState::Pending);
    assert_eq!(status[3].id, id("500_legacy"));
    assert!(matches!(status[3].state, StepState::Unregistered { .. }));
}

#[tokio::test]
async fn test_verify_before_apply_blocks_inconsistent_state() {
    init_logs();
    let registry = Arc::new(
        MigrationRegistry::new(vec![
            create_step("1000_create_a", "a"),
            create_step("2000_create_b", "b"),
        ])
        .unwrap(),
    );
    let backend = Arc::new(CatalogBackend::new());
    let ledger = Arc::new(MemoryLedger::new());
    let runner = MigrationRunner::new(registry, backend.clone(), ledger.clone())
        .with_verify_before_apply(true);

    runner.apply_up(Some(&id("1000_create_a"))).await.unwrap();
    backend.delete_collection("a").await.unwrap();

    let err = runner.apply_up(None).await.unwrap_err();
    assert!(matches!(err.source, MigrationError::LedgerInconsistency(ref issues)
        if issues[0].contains("'a'")));
    assert!(backend.find_collection("b").await.unwrap().is_none());

    // Rolling back stays possible
    runner.apply_down(None).await.unwrap();
    assert!(runner.verify().await.is_ok());
}

#[tokio::test]
async fn test_explicit_backward_override_is_used() {
    let h = harness(vec![Box::new(
        DeclarativeStep::builder("1000_seed")
            .create_collection(keyed_collection("seed"))
            .with_backward(vec![SchemaOperation::RenameCollection {
                from: "seed".into(),
                to: "seed_archived".into(),
            }])
            .build()
            .unwrap(),
    ) as Box<dyn Migration>]);

    h.runner.apply_up(None).await.unwrap();
    h.runner.apply_down(None).await.unwrap();
    let shape = catalog_shape(&h.backend.list_collections().await.unwrap());
    assert!(shape.contains_key("seed_archived"));
}
