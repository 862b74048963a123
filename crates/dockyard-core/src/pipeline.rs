use crate::concurrency::OutputLock;
use crate::logsink::LogFanout;
use crate::packaging::{packager_for, ContextPackager, PackageReport};
use crate::CoreError;
use dockyard_runtime::ProcessRunner;
use dockyard_schema::{BuildJob, BuilderSection, ExecutionRequest, PackagingSection};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Outcome of a successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub name: String,
    pub archive: PathBuf,
    pub files_packaged: usize,
    pub output: PathBuf,
    pub duration_ms: u64,
}

/// Validates a job, packages its context, and hands it to the image builder.
///
/// Nothing is spawned for a job that fails validation, or when the builder
/// executable is missing.
pub struct BuildPipeline {
    builder: BuilderSection,
    packaging: PackagingSection,
    packager: Arc<dyn ContextPackager>,
    runner: Arc<dyn ProcessRunner>,
    log: Arc<LogFanout>,
}

impl BuildPipeline {
    pub fn new(
        builder: BuilderSection,
        packaging: PackagingSection,
        runner: Arc<dyn ProcessRunner>,
        log: Arc<LogFanout>,
    ) -> Self {
        let packager = packager_for(packaging.mode);
        Self {
            builder,
            packaging,
            packager,
            runner,
            log,
        }
    }

    #[must_use]
    pub fn with_packager(mut self, packager: Arc<dyn ContextPackager>) -> Self {
        self.packager = packager;
        self
    }

    /// Where the packaged context for `name` is written.
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.packaging.archive_dir().join(format!("{name}.tar"))
    }

    /// Run one build. Every failure is reported through the log sink before
    /// it is returned.
    pub async fn build(&self, job: &BuildJob) -> Result<BuildReport, CoreError> {
        self.log.info(format!(
            "Starting build process for container: {}",
            job.name()
        ));
        match self.run_build(job).await {
            Ok(report) => {
                self.log.info(format!(
                    "Container '{}' built successfully. Output path: {}",
                    report.name,
                    report.output.display()
                ));
                Ok(report)
            }
            Err(e) => {
                self.log
                    .error(format!("Error building container '{}': {e}", job.name()));
                Err(e)
            }
        }
    }

    async fn run_build(&self, job: &BuildJob) -> Result<BuildReport, CoreError> {
        let started = Instant::now();
        job.validate()?;
        self.check_builder()?;

        if let Some(parent) = job.output().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // Held across packaging too: the archive path is derived from the name.
        let _lock = if self.packaging.lock_outputs {
            Some(OutputLock::acquire_async(job.output()).await?)
        } else {
            None
        };

        let package = self.package(job).await?;
        self.log.info(format!(
            "Build context packaged at {} ({} files)",
            package.archive.display(),
            package.files
        ));

        let request = ExecutionRequest::new(&self.builder.executable)
            .with_args(builder_args(&self.builder.frontend, job))
            .with_timeout(self.builder.timeout());
        debug!("invoking builder: {}", request.display_command());

        let log = &self.log;
        let result = self
            .runner
            .run(&request, &|line| log.relay(line))
            .await?;

        if result.timed_out {
            return Err(CoreError::Timeout {
                program: self.builder.executable.display().to_string(),
                after: self.builder.timeout().unwrap_or(Duration::ZERO),
            });
        }
        match result.exit_code {
            Some(0) => {}
            Some(code) => return Err(CoreError::BuildFailed { code }),
            None => return Err(CoreError::BuildFailed { code: -1 }),
        }

        Ok(BuildReport {
            name: job.name().to_string(),
            archive: package.archive,
            files_packaged: package.files,
            output: job.output().to_path_buf(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn check_builder(&self) -> Result<(), CoreError> {
        let exe = &self.builder.executable;
        // Bare names are resolved on PATH at spawn time.
        if exe.components().count() > 1 && !exe.is_file() {
            return Err(CoreError::Launch {
                path: exe.clone(),
                reason: "builder executable not found".to_owned(),
            });
        }
        Ok(())
    }

    async fn package(&self, job: &BuildJob) -> Result<PackageReport, CoreError> {
        let packager = Arc::clone(&self.packager);
        let context = job.context().to_path_buf();
        let dest = self.archive_path(job.name());
        tokio::task::spawn_blocking(move || packager.package(&context, &dest))
            .await
            .map_err(|e| CoreError::Packaging(format!("packaging task failed: {e}")))?
    }
}

/// Builder command line for `job`, in fixed order:
/// `build --frontend=<f> --local context=<ctx> --local dockerfile=<df>
/// --output type=oci,name=<name>,dest=<out>`.
pub fn builder_args(frontend: &str, job: &BuildJob) -> Vec<String> {
    vec![
        "build".to_owned(),
        format!("--frontend={frontend}"),
        "--local".to_owned(),
        format!("context={}", display(job.context())),
        "--local".to_owned(),
        format!("dockerfile={}", display(job.dockerfile())),
        "--output".to_owned(),
        format!(
            "type=oci,name={},dest={}",
            job.name(),
            display(job.output())
        ),
    ]
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
