//! Local Job Integration Tests
//!
//! Runs complete jobs through `JobOrchestrator` on a `LocalTarget`, using small
//! `sh` scripts in place of the solver.
//!
//! ```bash
//! cargo test --test local_job_test
//! ```

use pulsar::orchestrator::{JobError, JobEvent, JobOrchestrator, JobState, OrchestratorConfig};
use pulsar::{Classification, FileMapping, JobControl, JobManifest, LocalTarget};
use std::path::Path;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

/// Caller-side directory plus a work directory for the target
struct Fixture {
    root: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let root = tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("inputs")).unwrap();
        std::fs::create_dir_all(root.path().join("results")).unwrap();
        Self { root }
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.root.path().join(rel)
    }

    fn target(&self) -> LocalTarget {
        LocalTarget::new(self.path("work"))
    }

    fn write_input(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.path("inputs").join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// A manifest that stages `materials.h5`, runs `command`, and retrieves
    /// `log/output.txt` plus `plots/flux.png`
    fn manifest(&self, command: &str) -> JobManifest {
        let materials = self.write_input("materials.h5", "cross sections");
        JobManifest {
            name: "reactor".to_string(),
            command: command.to_string(),
            escalate: false,
            convergence_log: self.path("results/output.txt"),
            inputs: vec![FileMapping::new(materials, "materials.h5")],
            outputs: vec![
                FileMapping::new("plots/flux.png", self.path("results/flux.png")),
                FileMapping::new("log/output.txt", self.path("results/output.txt")),
            ],
        }
    }
}

/// Shell that fakes a solver run ending at `k`
fn solver_script(k: &str) -> String {
    format!(
        "set -e\n\
         test -f materials.h5\n\
         mkdir -p log plots\n\
         echo 'solver starting'\n\
         echo '[  NORMAL ] Iteration 0: k_eff = 0.912345 res = 1.0E-01' > log/openmoc-run.log\n\
         echo '[  NORMAL ] Iteration 1: k_eff = {} res = 1.0E-05' >> log/openmoc-run.log\n\
         echo png > plots/flux.png\n\
         mv log/openmoc* log/output.txt\n",
        k
    )
}

fn orchestrator() -> JobOrchestrator {
    JobOrchestrator::new(OrchestratorConfig {
        tolerance: 1e-4,
        execute_timeout: Some(Duration::from_secs(30)),
    })
}

fn assert_file(path: &Path) {
    assert!(path.exists(), "expected {} to exist", path.display());
}

#[tokio::test]
async fn test_local_job_classifies_critical() {
    let fx = Fixture::new();
    let manifest = fx.manifest(&solver_script("1.000020"));

    let report = orchestrator()
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    assert!(report.is_done(), "job failed: {:?}", report.failure());
    assert_eq!(
        report.states(),
        vec![
            JobState::Created,
            JobState::Staging,
            JobState::Executing,
            JobState::Retrieving,
            JobState::Classifying,
            JobState::Done,
        ]
    );

    let outcome = report.outcome().unwrap();
    assert_eq!(outcome.classification, Classification::Critical);
    assert!((outcome.final_k - 1.00002).abs() < 1e-9);
    assert_eq!(outcome.record.len(), 2);
    assert_eq!(outcome.command.stdout, vec!["solver starting".to_string()]);

    assert_file(&fx.path("results/output.txt"));
    assert_file(&fx.path("results/flux.png"));
    // Retrieval moves outputs out of the work directory
    assert!(!fx.path("work/log/output.txt").exists());
}

#[tokio::test]
async fn test_local_job_super_critical_and_sub_critical() {
    for (k, expected) in [
        ("1.250000", Classification::SuperCritical),
        ("0.870000", Classification::SubCritical),
    ] {
        let fx = Fixture::new();
        let report = orchestrator()
            .run(&fx.manifest(&solver_script(k)), fx.target(), JobControl::new())
            .await;
        assert_eq!(report.outcome().unwrap().classification, expected);
    }
}

#[tokio::test]
async fn test_non_zero_exit_fails_execution() {
    let fx = Fixture::new();
    let manifest = fx.manifest("echo 'diverged' >&2; exit 3");

    let report = orchestrator()
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    assert_eq!(report.state(), JobState::Failed);
    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Executing);
    assert!(matches!(failure.error, JobError::Execution(_)));

    let (_, stderr) = failure.error.captured_output().unwrap();
    assert_eq!(stderr, ["diverged".to_string()]);

    // Nothing was retrieved
    assert!(!report.states().contains(&JobState::Retrieving));
    assert!(!fx.path("results/output.txt").exists());
}

#[tokio::test]
async fn test_missing_output_fails_retrieval_naming_the_file() {
    let fx = Fixture::new();
    // Produces the log but no flux plot
    let manifest = fx.manifest(
        "mkdir -p log && echo '[  NORMAL ] Iteration 0: k_eff = 1.0 res = 0' > log/output.txt",
    );

    let report = orchestrator()
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Retrieving);
    assert!(matches!(failure.error, JobError::Retrieval(_)));
    let path = failure.error.failing_path().unwrap();
    assert!(path.ends_with("plots/flux.png"), "got {}", path.display());
}

#[tokio::test]
async fn test_missing_input_stops_before_execution() {
    let fx = Fixture::new();
    let mut manifest = fx.manifest("touch ran");
    manifest
        .inputs
        .push(FileMapping::new(fx.path("inputs/missing.py"), "missing.py"));

    let report = orchestrator()
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Staging);
    assert!(failure.error.failing_path().unwrap().ends_with("missing.py"));
    assert!(!fx.path("work/ran").exists());
}

#[tokio::test]
async fn test_log_without_markers_has_no_convergence_data() {
    let fx = Fixture::new();
    let manifest = fx.manifest(
        "mkdir -p log plots && echo png > plots/flux.png && echo 'no markers' > log/output.txt",
    );

    let report = orchestrator()
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Classifying);
    assert!(matches!(failure.error, JobError::NoConvergenceData { .. }));
}

#[tokio::test]
async fn test_timeout_fails_with_partial_output() {
    let fx = Fixture::new();
    let manifest = fx.manifest("echo started; sleep 5; echo finished");
    let orchestrator = JobOrchestrator::new(OrchestratorConfig {
        tolerance: 1e-4,
        execute_timeout: Some(Duration::from_millis(300)),
    });

    let report = orchestrator
        .run(&manifest, fx.target(), JobControl::new())
        .await;

    let failure = report.failure().unwrap();
    assert_eq!(failure.step, JobState::Executing);
    assert!(matches!(failure.error, JobError::Timeout { .. }));
    let (stdout, _) = failure.error.captured_output().unwrap();
    assert_eq!(stdout, ["started".to_string()]);
}

#[tokio::test]
async fn test_spawned_job_streams_events_and_cancels() {
    let fx = Fixture::new();
    let manifest = fx.manifest("echo waiting; sleep 10; echo finished");

    let mut handle = orchestrator().spawn(manifest, fx.target());

    // Cancel once the command has produced output
    while let Some(event) = handle.next_event().await {
        if let JobEvent::Output { line, .. } = event {
            assert_eq!(line.text, "waiting");
            handle.cancel();
            break;
        }
    }
    while handle.next_event().await.is_some() {}

    let report = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("job did not stop after cancel")
        .unwrap();

    assert_eq!(report.state(), JobState::Failed);
    let failure = report.failure().unwrap();
    assert!(failure.is_cancelled());
    assert_eq!(failure.step, JobState::Executing);
}
