use cucumber::{given, then, when};
use strata_core::prelude::*;

use crate::features::world::{StepSpec, StrataWorld};

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

// ==================== SETUP ====================

#[given(expr = "une étape {string} qui crée la collection {string}")]
async fn given_create_step(world: &mut StrataWorld, id: String, collection: String) {
    world.steps.push(StepSpec::Create { id, collection });
}

#[given(expr = "une étape défaillante {string} qui crée la collection {string} avant d'échouer")]
async fn given_failing_step(world: &mut StrataWorld, id: String, collection: String) {
    world.steps.push(StepSpec::Failing { id, collection });
}

#[given(expr = "les étapes {string} ont été appliquées")]
async fn given_applied(world: &mut StrataWorld, ids: String) {
    let applied = world.runner().apply_up(None).await.expect("Failed to apply migrations");
    let applied: Vec<String> = applied.iter().map(ToString::to_string).collect();
    assert_eq!(applied, split_list(&ids));
}

// ==================== EXÉCUTION ====================

#[when("j'applique toutes les migrations")]
async fn when_apply_all(world: &mut StrataWorld) {
    println!("⬆️ Application de toutes les migrations...");
    let result = world.runner().apply_up(None).await;
    world.last_run = Some(result);
}

#[when(expr = "j'applique les migrations jusqu'à {string}")]
async fn when_apply_to(world: &mut StrataWorld, target: String) {
    let target = StepId::parse(&target).expect("identifiant d'étape invalide");
    let result = world.runner().apply_up(Some(&target)).await;
    world.last_run = Some(result);
}

#[when("j'annule la dernière migration")]
async fn when_revert_last(world: &mut StrataWorld) {
    println!("⬇️ Annulation de la dernière migration...");
    let result = world.runner().apply_down(None).await;
    world.last_run = Some(result);
}

#[when(expr = "j'annule les migrations jusqu'à {string}")]
async fn when_revert_to(world: &mut StrataWorld, target: String) {
    let target = StepId::parse(&target).expect("identifiant d'étape invalide");
    let result = world.runner().apply_down(Some(&target)).await;
    world.last_run = Some(result);
}

#[when("je redémarre le moteur")]
async fn when_restart(world: &mut StrataWorld) {
    println!("🔄 Redémarrage du moteur depuis le disque...");
    world.restart();
}

// ==================== VÉRIFICATIONS ====================

#[then(expr = "les étapes traitées sont {string}")]
async fn then_processed(world: &mut StrataWorld, ids: String) {
    assert_eq!(world.last_completed(), split_list(&ids));
}

#[then("aucune étape n'est traitée")]
async fn then_nothing_processed(world: &mut StrataWorld) {
    match &world.last_run {
        Some(Ok(ids)) => assert!(ids.is_empty(), "étapes traitées: {:?}", ids),
        other => panic!("exécution inattendue: {:?}", other),
    }
}

#[then(expr = "l'exécution échoue à l'étape {string}")]
async fn then_run_failed_at(world: &mut StrataWorld, id: String) {
    let Some(Err(err)) = &world.last_run else {
        panic!("l'exécution aurait dû échouer: {:?}", world.last_run);
    };
    let failed = err.failed_step.as_ref().map(ToString::to_string);
    assert_eq!(failed.as_deref(), Some(id.as_str()));
    println!("✅ Échec attendu: {}", err);
}

#[then(expr = "la collection {string} existe")]
async fn then_collection_exists(world: &mut StrataWorld, name: String) {
    let found = world.runner().backend().find_collection(&name).await.expect("lecture catalogue");
    assert!(found.is_some(), "collection {} absente", name);
}

#[then(expr = "la collection {string} n'existe pas")]
async fn then_collection_absent(world: &mut StrataWorld, name: String) {
    let found = world.runner().backend().find_collection(&name).await.expect("lecture catalogue");
    assert!(found.is_none(), "collection {} encore présente", name);
}

#[then(expr = "le journal contient {string}")]
async fn then_ledger_contains(world: &mut StrataWorld, ids: String) {
    let entries = world.runner().ledger().list_applied().await.expect("lecture journal");
    let recorded: Vec<String> = entries.iter().map(|e| e.step_id.to_string()).collect();
    assert_eq!(recorded, split_list(&ids));
}

#[then(expr = "l'étape {string} est en attente")]
async fn then_step_pending(world: &mut StrataWorld, id: String) {
    let status = world.runner().status().await.expect("lecture statut");
    let step = status.iter().find(|s| s.id.to_string() == id).expect("étape inconnue");
    assert!(matches!(step.state, StepState::Pending), "état: {:?}", step.state);
}

#[then(expr = "l'étape {string} est appliquée")]
async fn then_step_applied(world: &mut StrataWorld, id: String) {
    let status = world.runner().status().await.expect("lecture statut");
    let step = status.iter().find(|s| s.id.to_string() == id).expect("étape inconnue");
    assert!(matches!(step.state, StepState::Applied { .. }), "état: {:?}", step.state);
}

#[then("le catalogue est cohérent avec le journal")]
async fn then_consistent(world: &mut StrataWorld) {
    let report = world.runner().check().await.expect("vérification");
    assert!(report.is_consistent(), "incohérences: {:?}", report.issues);
}
