use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "dockyard.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// The three environment scripts, in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    InstallRuntime,
    InstallBuilder,
    Uninstall,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 3] = [
        ScriptKind::InstallRuntime,
        ScriptKind::InstallBuilder,
        ScriptKind::Uninstall,
    ];
}

impl std::fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScriptKind::InstallRuntime => "install-runtime",
            ScriptKind::InstallBuilder => "install-builder",
            ScriptKind::Uninstall => "uninstall",
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DockyardConfig {
    #[serde(default)]
    pub scripts: ScriptsSection,
    #[serde(default)]
    pub builder: BuilderSection,
    #[serde(default)]
    pub packaging: PackagingSection,
    #[serde(default)]
    pub catalog: CatalogSection,
    #[serde(default)]
    pub elevation: ElevationSection,
    #[serde(default)]
    pub log: LogSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ScriptsSection {
    pub dir: PathBuf,
    /// Program the scripts are handed to.
    pub interpreter: PathBuf,
    /// Fixed flags placed between the interpreter and the script path.
    pub interpreter_args: Vec<String>,
    pub install_runtime: String,
    pub install_builder: String,
    pub uninstall: String,
    pub timeout_secs: u64,
}

#[cfg(windows)]
impl Default for ScriptsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("Scripts"),
            interpreter: PathBuf::from("powershell.exe"),
            interpreter_args: ["-ExecutionPolicy", "Bypass", "-File"]
                .map(str::to_owned)
                .to_vec(),
            install_runtime: "install_containerd.ps1".to_owned(),
            install_builder: "install_buildkit.ps1".to_owned(),
            uninstall: "uninstall_buildkit+containerd.ps1".to_owned(),
            timeout_secs: 60,
        }
    }
}

#[cfg(not(windows))]
impl Default for ScriptsSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("Scripts"),
            interpreter: PathBuf::from("sh"),
            interpreter_args: Vec::new(),
            install_runtime: "install_containerd.sh".to_owned(),
            install_builder: "install_buildkit.sh".to_owned(),
            uninstall: "uninstall_buildkit_containerd.sh".to_owned(),
            timeout_secs: 60,
        }
    }
}

impl ScriptsSection {
    pub fn script_path(&self, kind: ScriptKind) -> PathBuf {
        let file = match kind {
            ScriptKind::InstallRuntime => &self.install_runtime,
            ScriptKind::InstallBuilder => &self.install_builder,
            ScriptKind::Uninstall => &self.uninstall,
        };
        self.dir.join(file)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BuilderSection {
    pub executable: PathBuf,
    pub frontend: String,
    /// 0 means the builder may run for as long as it needs.
    pub timeout_secs: u64,
}

impl Default for BuilderSection {
    fn default() -> Self {
        Self {
            executable: default_builder_executable(),
            frontend: "dockerfile.v0".to_owned(),
            timeout_secs: 0,
        }
    }
}

#[cfg(windows)]
fn default_builder_executable() -> PathBuf {
    let program_files =
        std::env::var("ProgramFiles").unwrap_or_else(|_| "C:\\Program Files".to_owned());
    PathBuf::from(program_files).join("buildkit\\bin\\buildctl.exe")
}

#[cfg(not(windows))]
fn default_builder_executable() -> PathBuf {
    PathBuf::from("/usr/local/bin/buildctl")
}

impl BuilderSection {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// How a build context is captured before the builder runs.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PackagingMode {
    /// Newline-delimited list of relative file paths; no file content.
    #[default]
    Manifest,
    /// Content-bearing tar archive.
    Tar,
}

impl std::fmt::Display for PackagingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackagingMode::Manifest => write!(f, "manifest"),
            PackagingMode::Tar => write!(f, "tar"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct PackagingSection {
    pub mode: PackagingMode,
    /// Empty means the OS temp directory.
    pub archive_dir: PathBuf,
    pub lock_outputs: bool,
}

impl Default for PackagingSection {
    fn default() -> Self {
        Self {
            mode: PackagingMode::default(),
            archive_dir: PathBuf::new(),
            lock_outputs: true,
        }
    }
}

impl PackagingSection {
    pub fn archive_dir(&self) -> PathBuf {
        if self.archive_dir.as_os_str().is_empty() {
            std::env::temp_dir()
        } else {
            self.archive_dir.clone()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct CatalogSection {
    pub dockerfiles_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            dockerfiles_dir: PathBuf::from("Dockerfiles"),
            output_dir: PathBuf::from("src/Container"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct ElevationSection {
    /// Escalation program and its flags; the current executable and its
    /// arguments are appended.
    pub command: Vec<String>,
}

impl Default for ElevationSection {
    fn default() -> Self {
        Self {
            command: ["sudo", "--preserve-env=DOCKYARD_LOG,DOCKYARD_ELEVATED,DOCKYARD_CONFIG"]
                .map(str::to_owned)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct LogSection {
    /// Character budget of the display buffer before it is cleared.
    pub display_budget: usize,
    pub readiness_poll_ms: u64,
    /// Directory for the persistent log file; empty disables it.
    pub dir: PathBuf,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            display_budget: 1000,
            readiness_poll_ms: 500,
            dir: PathBuf::new(),
        }
    }
}

impl LogSection {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_ms)
    }

    pub fn log_dir(&self) -> Option<&Path> {
        (!self.dir.as_os_str().is_empty()).then_some(self.dir.as_path())
    }
}

impl DockyardConfig {
    pub fn parse_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_str(&content)
    }

    /// Resolve the active config: explicit path, then `DOCKYARD_CONFIG`,
    /// then `./dockyard.toml`, then built-in defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(path) = std::env::var("DOCKYARD_CONFIG") {
            if !path.is_empty() {
                return Self::load(Path::new(&path));
            }
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::load(local);
        }
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scripts.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scripts.timeout_secs must be greater than zero".to_owned(),
            ));
        }
        if self.scripts.interpreter.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "scripts.interpreter must not be empty".to_owned(),
            ));
        }
        for kind in ScriptKind::ALL {
            let path = self.scripts.script_path(kind);
            if path.file_name().is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{kind} script name must not be empty"
                )));
            }
        }
        if self.builder.executable.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "builder.executable must not be empty".to_owned(),
            ));
        }
        if self.builder.frontend.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "builder.frontend must not be empty".to_owned(),
            ));
        }
        if self.elevation.command.is_empty() {
            return Err(ConfigError::Invalid(
                "elevation.command must name an escalation program".to_owned(),
            ));
        }
        if self.log.display_budget == 0 {
            return Err(ConfigError::Invalid(
                "log.display_budget must be greater than zero".to_owned(),
            ));
        }
        if self.log.readiness_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "log.readiness_poll_ms must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}
