use async_trait::async_trait;
use cucumber::World as CucumberWorld;
use std::sync::Arc;
use strata_core::prelude::*;
use tempfile::TempDir;

/// Étape déclarée dans un scénario, reconstruite à chaque redémarrage du moteur
#[derive(Debug, Clone)]
pub enum StepSpec {
    /// Crée une collection avec un champ `key` indexé unique
    Create { id: String, collection: String },
    /// Crée une collection puis échoue avant la fin
    Failing { id: String, collection: String },
}

/// Étape opaque qui laisse une écriture partielle puis échoue
struct FailingStep {
    id: StepId,
    partial: CollectionDescriptor,
}

#[async_trait]
impl Migration for FailingStep {
    fn id(&self) -> &StepId {
        &self.id
    }

    fn description(&self) -> &str {
        "étape défaillante"
    }

    async fn forward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        backend.create_collection(&self.partial).await?;
        Err(MigrationError::Backend("disque plein".to_string()))
    }

    async fn backward(&self, backend: &dyn SchemaBackend) -> MigrationResult<()> {
        backend.delete_collection(self.partial.id().as_str()).await
    }
}

pub fn keyed_collection(name: &str) -> CollectionDescriptor {
    CollectionDescriptor::builder(name)
        .field(FieldDescriptor::text("key").required())
        .index(IndexDefinition::unique(["key"]))
        .build()
        .expect("collection de test invalide")
}

#[derive(CucumberWorld)]
pub struct StrataWorld {
    pub temp_dir: TempDir,
    pub steps: Vec<StepSpec>,
    pub runner: Option<MigrationRunner>,
    // Résultat de la dernière exécution (étapes traitées ou erreur)
    pub last_run: Option<Result<Vec<StepId>, RunError>>,
}

impl std::fmt::Debug for StrataWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataWorld")
            .field("temp_dir", &self.temp_dir.path())
            .field("steps", &self.steps)
            .field("runner", &self.runner.as_ref().map(|_| "<MigrationRunner>"))
            .field("last_run", &self.last_run)
            .finish()
    }
}

impl Default for StrataWorld {
    fn default() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
            steps: Vec::new(),
            runner: None,
            last_run: None,
        }
    }
}

impl StrataWorld {
    pub fn config(&self) -> StrataConfig {
        let mut config = StrataConfig::default().with_data_dir(self.temp_dir.path());
        config.storage.fsync = false;
        config
    }

    pub fn registry(&self) -> MigrationResult<MigrationRegistry> {
        let mut steps: Vec<Box<dyn Migration>> = Vec::with_capacity(self.steps.len());
        for spec in &self.steps {
            match spec {
                StepSpec::Create { id, collection } => steps.push(Box::new(
                    DeclarativeStep::builder(id)
                        .create_collection(keyed_collection(collection))
                        .build()?,
                )),
                StepSpec::Failing { id, collection } => steps.push(Box::new(FailingStep {
                    id: StepId::parse(id)?,
                    partial: keyed_collection(collection),
                })),
            }
        }
        MigrationRegistry::new(steps)
    }

    /// Runner sur le répertoire du scénario, créé à la première utilisation
    pub fn runner(&mut self) -> &MigrationRunner {
        if self.runner.is_none() {
            let registry = Arc::new(self.registry().expect("Failed to build registry"));
            let runner = MigrationRunner::from_config(&self.config(), registry)
                .expect("Failed to open runner");
            self.runner = Some(runner);
        }
        self.runner.as_ref().expect("runner initialized")
    }

    /// Ferme le ledger et le catalogue puis les rouvre depuis le disque
    pub fn restart(&mut self) {
        self.runner = None;
        let _ = self.runner();
    }

    pub fn last_completed(&self) -> Vec<String> {
        match &self.last_run {
            Some(Ok(ids)) => ids.iter().map(ToString::to_string).collect(),
            Some(Err(err)) => err.completed.iter().map(ToString::to_string).collect(),
            None => Vec::new(),
        }
    }
}
