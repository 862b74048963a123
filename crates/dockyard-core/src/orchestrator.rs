use crate::environment::EnvironmentManager;
use crate::logsink::{LogFanout, LogObserver};
use crate::observers::{DisplayBuffer, TracingObserver};
use crate::pipeline::{BuildPipeline, BuildReport};
use crate::CoreError;
use dockyard_runtime::{PrivilegeGate, ProcessRunner};
use dockyard_schema::{BuildJob, DockyardConfig};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A Dockerfile directory found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    /// An output exists for this entry already.
    pub built: bool,
}

impl CatalogEntry {
    pub fn status(&self) -> &'static str {
        if self.built {
            "built"
        } else {
            "build"
        }
    }
}

/// One application session: a single environment manager, a build
/// pipeline, and the log fan-out both report through.
///
/// The fan-out starts with a `TracingObserver` (the persistent log) and a
/// `DisplayBuffer` sized from `log.display_budget`.
pub struct Orchestrator {
    config: DockyardConfig,
    log: Arc<LogFanout>,
    display: Arc<DisplayBuffer>,
    manager: EnvironmentManager,
    pipeline: BuildPipeline,
}

impl Orchestrator {
    pub fn new(
        config: DockyardConfig,
        runner: Arc<dyn ProcessRunner>,
        gate: Arc<dyn PrivilegeGate>,
    ) -> Self {
        let log = Arc::new(LogFanout::new());
        let display = Arc::new(DisplayBuffer::new(config.log.display_budget));
        log.register(Arc::new(TracingObserver));
        log.register(Arc::clone(&display) as Arc<dyn LogObserver>);

        let manager = EnvironmentManager::new(
            config.scripts.clone(),
            Arc::clone(&runner),
            gate,
            Arc::clone(&log),
        );
        let pipeline = BuildPipeline::new(
            config.builder.clone(),
            config.packaging.clone(),
            runner,
            Arc::clone(&log),
        );
        debug!("session initialized ({} packaging)", config.packaging.mode);

        Self {
            config,
            log,
            display,
            manager,
            pipeline,
        }
    }

    pub fn config(&self) -> &DockyardConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<LogFanout> {
        &self.log
    }

    pub fn display(&self) -> &DisplayBuffer {
        &self.display
    }

    pub fn manager(&self) -> &EnvironmentManager {
        &self.manager
    }

    pub fn pipeline(&self) -> &BuildPipeline {
        &self.pipeline
    }

    pub async fn setup(&self) -> Result<(), CoreError> {
        self.manager.setup().await
    }

    /// Poll readiness at the configured interval.
    pub async fn wait_ready(&self) {
        self.manager
            .readiness()
            .poll_until_ready(self.config.log.readiness_interval())
            .await;
    }

    pub async fn teardown(&self) -> Result<(), CoreError> {
        self.manager.teardown().await
    }

    /// Provision, build one job, and tear down.
    ///
    /// Teardown is attempted whatever happened before it. The first error
    /// wins; a later teardown error is only logged.
    pub async fn build_session(&self, job: &BuildJob) -> Result<BuildReport, CoreError> {
        let built = match self.setup().await {
            Ok(()) => {
                self.wait_ready().await;
                self.pipeline.build(job).await
            }
            Err(e) => Err(e),
        };
        let torn_down = self.teardown().await;
        let report = built?;
        torn_down?;
        Ok(report)
    }

    pub fn job_for(&self, name: &str) -> Result<BuildJob, CoreError> {
        Ok(BuildJob::for_catalog_entry(&self.config.catalog, name)?)
    }

    /// List catalog entries, sorted by name. A missing catalog directory
    /// is an empty catalog.
    pub fn catalog(&self) -> Result<Vec<CatalogEntry>, CoreError> {
        let root = &self.config.catalog.dockerfiles_dir;
        if !root.is_dir() {
            debug!("catalog directory {} does not exist", root.display());
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let built = self.config.catalog.output_dir.join(&name).exists();
            entries.push(CatalogEntry { name, built });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockyard_runtime::{MockBehavior, MockGate, MockRunner};
    use dockyard_schema::ScriptKind;
    use std::fs;
    use std::path::Path;

    fn config_in(root: &Path) -> DockyardConfig {
        let mut config = DockyardConfig::default();
        config.scripts.dir = root.join("Scripts");
        config.scripts.interpreter = "sh".into();
        config.scripts.interpreter_args = Vec::new();
        config.builder.executable = root.join("bin/buildctl");
        config.packaging.archive_dir = root.join("temp");
        config.catalog.dockerfiles_dir = root.join("Dockerfiles");
        config.catalog.output_dir = root.join("src/Container");
        config.log.readiness_poll_ms = 5;

        fs::create_dir_all(&config.scripts.dir).unwrap();
        for kind in ScriptKind::ALL {
            fs::write(config.scripts.script_path(kind), "exit 0\n").unwrap();
        }
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(&config.builder.executable, "").unwrap();
        let web = config.catalog.dockerfiles_dir.join("web");
        fs::create_dir_all(&web).unwrap();
        fs::write(web.join("Dockerfile"), "FROM scratch\n").unwrap();
        config
    }

    fn session(config: DockyardConfig, runner: &Arc<MockRunner>) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::clone(runner) as Arc<dyn ProcessRunner>,
            Arc::new(MockGate::elevated()),
        )
    }

    #[tokio::test]
    async fn build_session_runs_setup_build_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let runner = Arc::new(MockRunner::new());
        let orch = session(config, &runner);

        let job = orch.job_for("web").unwrap();
        let report = orch.build_session(&job).await.unwrap();
        assert_eq!(report.name, "web");

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].program(), orch.config().builder.executable.as_path());
        assert!(orch.display().text().contains("built successfully"));
    }

    #[tokio::test]
    async fn failed_build_still_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let uninstall = config.scripts.script_path(ScriptKind::Uninstall);
        let runner = Arc::new(
            MockRunner::new().with(&config.builder.executable, MockBehavior::exit(1)),
        );
        let orch = session(config, &runner);

        let job = orch.job_for("web").unwrap();
        let err = orch.build_session(&job).await.unwrap_err();
        assert!(matches!(err, CoreError::BuildFailed { code: 1 }));
        assert!(runner.was_invoked(&uninstall));
    }

    #[tokio::test]
    async fn failed_setup_skips_build_but_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let install = config.scripts.script_path(ScriptKind::InstallRuntime);
        let uninstall = config.scripts.script_path(ScriptKind::Uninstall);
        let builder = config.builder.executable.clone();
        let runner = Arc::new(MockRunner::new().with(&install, MockBehavior::exit(1)));
        let orch = session(config, &runner);

        let job = orch.job_for("web").unwrap();
        let err = orch.build_session(&job).await.unwrap_err();
        assert!(matches!(err, CoreError::NonZeroExit { code: 1, .. }));
        assert!(!runner.was_invoked(&builder));
        assert!(runner.was_invoked(&uninstall));
    }

    #[test]
    fn unknown_catalog_entry_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(MockRunner::new());
        let orch = session(config_in(dir.path()), &runner);
        assert!(orch.job_for("nope").unwrap_err().is_validation());
        assert_eq!(runner.spawn_count(), 0);
    }

    #[test]
    fn catalog_reports_build_status() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::create_dir_all(config.catalog.dockerfiles_dir.join("api")).unwrap();
        fs::write(config.catalog.dockerfiles_dir.join("README"), "").unwrap();
        fs::create_dir_all(&config.catalog.output_dir).unwrap();
        fs::write(config.catalog.output_dir.join("web"), "oci").unwrap();
        let runner = Arc::new(MockRunner::new());
        let orch = session(config, &runner);

        let entries = orch.catalog().unwrap();
        assert_eq!(
            entries,
            vec![
                CatalogEntry {
                    name: "api".to_owned(),
                    built: false
                },
                CatalogEntry {
                    name: "web".to_owned(),
                    built: true
                },
            ]
        );
        assert_eq!(entries[0].status(), "build");
        assert_eq!(entries[1].status(), "built");
    }

    #[test]
    fn missing_catalog_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.catalog.dockerfiles_dir = dir.path().join("absent");
        let runner = Arc::new(MockRunner::new());
        assert!(session(config, &runner).catalog().unwrap().is_empty());
    }
}
