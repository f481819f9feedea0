use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use semver::Version;
use url::Url;

use stevedore_core::artifact::{ArtifactIdentity, ArtifactState, InertLifecycle, InstallArtifact};
use stevedore_core::deploy::DeployOptions;
use stevedore_core::error::DeployError;
use stevedore_core::events::{FailureKind, FailureSink, NullFailureSink};
use stevedore_core::graph::{ArtifactGraph, NodeHandle};
use stevedore_core::model::{RuntimeArtifactModel, StandardNormalizer};
use stevedore_core::pipeline::{
    CommitStage, CompensatingPipeline, FnStage, InstallEnvironment, Pipeline, PipelineStage,
    UninstallStage, VisitStage,
};
use stevedore_core::storage::ArtifactStore;

struct StubStore(PathBuf);

impl ArtifactStore for StubStore {
    fn artifact_fs(&self) -> &Path {
        &self.0
    }
    fn synchronize(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn roll_back(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn delete(&self) -> anyhow::Result<()> {
        Ok(())
    }
    fn content_hash(&self) -> anyhow::Result<String> {
        Ok(String::new())
    }
}

struct CountingSink(AtomicUsize);

impl FailureSink for CountingSink {
    fn failure(&self, _kind: FailureKind, _error: Option<&DeployError>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn artifact(name: &str) -> Arc<InstallArtifact> {
    Arc::new(InstallArtifact::new(
        ArtifactIdentity::new("bundle", name, Version::new(1, 1, 0)),
        Arc::new(StubStore(PathBuf::from("/nonexistent"))),
        Box::new(InertLifecycle),
    ))
}

struct Fixture {
    graph: Arc<ArtifactGraph>,
    model: Arc<RuntimeArtifactModel>,
    sink: Arc<CountingSink>,
}

impl Fixture {
    fn new() -> Self {
        let graph = Arc::new(ArtifactGraph::new());
        let model = Arc::new(RuntimeArtifactModel::new(
            graph.clone(),
            Arc::new(StandardNormalizer),
        ));
        Self {
            graph,
            model,
            sink: Arc::new(CountingSink(AtomicUsize::new(0))),
        }
    }

    fn env(&self, location: &str) -> InstallEnvironment {
        InstallEnvironment::new(
            self.graph.clone(),
            self.model.clone(),
            self.sink.clone(),
            FailureKind::Install,
            Url::parse(location).expect("test location should parse"),
            DeployOptions::default(),
        )
    }

    fn failures(&self) -> usize {
        self.sink.0.load(Ordering::SeqCst)
    }
}

fn recording(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> impl PipelineStage {
    FnStage::new(name, move |_node: NodeHandle, _env: &InstallEnvironment| {
        log.lock().unwrap().push(name);
        Ok(())
    })
}

fn failing(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> impl PipelineStage {
    FnStage::new(name, move |_node: NodeHandle, _env: &InstallEnvironment| {
        log.lock().unwrap().push(name);
        Err(DeployError::failure("bad manifest"))
    })
}

#[test]
fn stages_run_in_append_order() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("ordered"));
    let env = fixture.env("file:///deploy/ordered");

    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new("install")
        .with_stage(recording("s1", log.clone()))
        .with_stage(recording("s2", log.clone()))
        .with_stage(recording("s3", log.clone()));

    pipeline.process(node, &env).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["s1", "s2", "s3"]);
}

#[test]
fn first_failure_aborts_remaining_stages() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("aborting"));
    let env = fixture.env("file:///deploy/aborting");

    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = Pipeline::new("install")
        .with_stage(recording("s1", log.clone()))
        .with_stage(failing("s2", log.clone()))
        .with_stage(recording("s3", log.clone()));

    let err = pipeline.process(node, &env).unwrap_err();
    assert!(matches!(err, DeployError::DeploymentFailed { .. }));
    assert_eq!(*log.lock().unwrap(), vec!["s1", "s2"]);
}

#[test]
fn compensation_runs_exactly_once_then_rethrows() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("compensated"));
    let env = fixture.env("file:///deploy/compensated");

    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = CompensatingPipeline::new("install", Arc::new(recording("comp", log.clone())))
        .with_stage(recording("s1", log.clone()))
        .with_stage(failing("s2", log.clone()))
        .with_stage(recording("s3", log.clone()));

    let err = pipeline.process(node, &env).unwrap_err();
    assert_eq!(err.to_string(), "bad manifest");
    assert_eq!(*log.lock().unwrap(), vec!["s1", "s2", "comp"]);
    assert_eq!(fixture.failures(), 1);
}

#[test]
fn install_failure_leaves_model_untouched() {
    // Scenario: install bundle.raad1@1.1 via a 3-stage pipeline where the
    // middle stage rejects the manifest.
    let fixture = Fixture::new();
    let root = artifact("bundle.raad1");
    let node = fixture.graph.insert(root.clone());
    let env = fixture.env("file:///deploy/bundle.raad1");

    let compensations = Arc::new(AtomicUsize::new(0));
    let counter = compensations.clone();
    let compensation = FnStage::new("uninstall", move |n: NodeHandle, e: &InstallEnvironment| {
        counter.fetch_add(1, Ordering::SeqCst);
        UninstallStage.process(n, e)
    });

    let pipeline = CompensatingPipeline::new("install", Arc::new(compensation))
        .with_stage(VisitStage::new(
            "install-artifacts",
            |artifact: &InstallArtifact, _env: &InstallEnvironment| artifact.install(),
        ))
        .with_stage(FnStage::new(
            "parse-manifest",
            |_node: NodeHandle, _env: &InstallEnvironment| Err(DeployError::failure("bad manifest")),
        ))
        .with_stage(CommitStage);

    let err = pipeline.process(node, &env).unwrap_err();

    assert_eq!(err.to_string(), "bad manifest");
    assert!(err.is_diagnosed());
    assert_eq!(compensations.load(Ordering::SeqCst), 1);
    assert!(fixture.model.is_empty());
    assert_eq!(fixture.graph.node_count(), 0);
    assert_eq!(root.state(), ArtifactState::Uninstalled);
}

#[test]
fn failed_reinstall_preserves_existing_root() {
    let fixture = Fixture::new();

    let original = artifact("bundle.raad1");
    let original_node = fixture.graph.insert(original.clone());
    fixture
        .model
        .add(
            &Url::parse("file:///deploy/one/bundle.raad1").unwrap(),
            original_node,
        )
        .unwrap();

    // Second node with the same identity; commit must refuse it and the
    // compensation must only unwind the new node.
    let replacement = artifact("bundle.raad1");
    let replacement_node = fixture.graph.insert(replacement);
    let env = fixture.env("file:///deploy/two/bundle.raad1");

    let pipeline =
        CompensatingPipeline::new("install", Arc::new(UninstallStage)).with_stage(CommitStage);
    let err = pipeline.process(replacement_node, &env).unwrap_err();

    assert!(matches!(err, DeployError::DuplicateIdentity { .. }));
    assert_eq!(fixture.model.len(), 1);
    assert!(fixture.graph.contains(original_node));
    assert!(!fixture.graph.contains(replacement_node));
    let kept = fixture.model.get(original.identity()).unwrap();
    assert!(Arc::ptr_eq(&kept, &original));
}

#[test]
fn nested_compensating_pipelines_diagnose_once() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("nested"));
    let env = fixture.env("file:///deploy/nested");

    let log = Arc::new(Mutex::new(Vec::new()));
    let inner = CompensatingPipeline::new("inner", Arc::new(recording("inner-comp", log.clone())))
        .with_stage(failing("boom", log.clone()));
    let outer = CompensatingPipeline::new("outer", Arc::new(recording("outer-comp", log.clone())))
        .with_stage(inner);

    let err = outer.process(node, &env).unwrap_err();

    assert!(err.is_diagnosed());
    // Both layers compensate their own scope, but the failure is reported
    // exactly once.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["boom", "inner-comp", "outer-comp"]
    );
    assert_eq!(fixture.failures(), 1);
}

#[test]
fn compensation_failure_never_masks_the_original_error() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("masked"));
    let env = fixture.env("file:///deploy/masked");

    let broken_compensation = FnStage::new(
        "broken-comp",
        |_node: NodeHandle, _env: &InstallEnvironment| {
            Err(DeployError::failure("compensation exploded"))
        },
    );
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = CompensatingPipeline::new("install", Arc::new(broken_compensation))
        .with_stage(failing("s1", log));

    let err = pipeline.process(node, &env).unwrap_err();
    assert_eq!(err.to_string(), "bad manifest");
}

#[test]
fn pipelines_nest_as_stages() {
    let fixture = Fixture::new();
    let node = fixture.graph.insert(artifact("nesting"));
    let env = fixture.env("file:///deploy/nesting");

    let log = Arc::new(Mutex::new(Vec::new()));
    let inner = Pipeline::new("inner").with_stage(recording("inner-stage", log.clone()));
    let outer = Pipeline::new("outer")
        .with_stage(recording("before", log.clone()))
        .with_stage(inner)
        .with_stage(recording("after", log.clone()));

    outer.process(node, &env).unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec!["before", "inner-stage", "after"]
    );
}

#[test]
fn null_sink_is_quiet() {
    // Smoke check that the default wiring compiles against the trait.
    let sink: Arc<dyn FailureSink> = Arc::new(NullFailureSink);
    sink.failure(FailureKind::Install, None);
}
