use crate::config::CatalogSection;
use crate::types::ContainerName;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Which part of a [`BuildJob`] failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobField {
    Name,
    Dockerfile,
    Context,
    Output,
}

impl fmt::Display for JobField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobField::Name => "container name",
            JobField::Dockerfile => "dockerfile",
            JobField::Context => "build context",
            JobField::Output => "output path",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: JobField,
    pub reason: String,
}

impl ValidationError {
    fn new(field: JobField, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// One image build: a named Dockerfile, its context tree, and the OCI
/// output destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildJob {
    name: ContainerName,
    dockerfile: PathBuf,
    context: PathBuf,
    output: PathBuf,
}

impl BuildJob {
    /// Construct and validate a job. Fails before anything touches a process.
    pub fn new(
        name: &str,
        dockerfile: impl Into<PathBuf>,
        context: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<Self, ValidationError> {
        let job = Self {
            name: ContainerName::new(name.trim()),
            dockerfile: dockerfile.into(),
            context: context.into(),
            output: output.into(),
        };
        job.validate()?;
        Ok(job)
    }

    /// Derive a job from the catalog layout:
    /// `<dockerfiles_dir>/<name>/Dockerfile`, context `<dockerfiles_dir>/<name>`,
    /// output `<output_dir>/<name>`.
    pub fn for_catalog_entry(catalog: &CatalogSection, name: &str) -> Result<Self, ValidationError> {
        validate_name(name.trim())?;
        let context = catalog.dockerfiles_dir.join(name.trim());
        Self::new(
            name,
            context.join("Dockerfile"),
            context,
            catalog.output_dir.join(name.trim()),
        )
    }

    /// Re-check every field against the filesystem.
    ///
    /// Called again immediately before a build, since the tree may have
    /// changed since construction.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;

        if !self.dockerfile.is_file() {
            return Err(ValidationError::new(
                JobField::Dockerfile,
                format!("no file at {}", self.dockerfile.display()),
            ));
        }
        if !self.context.is_dir() {
            return Err(ValidationError::new(
                JobField::Context,
                format!("no directory at {}", self.context.display()),
            ));
        }
        if self.output.as_os_str().is_empty() {
            return Err(ValidationError::new(JobField::Output, "must not be empty"));
        }
        Ok(())
    }

    pub fn name(&self) -> &ContainerName {
        &self.name
    }

    pub fn dockerfile(&self) -> &Path {
        &self.dockerfile
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

// The name lands inside `type=oci,name=<name>,...` and in the archive file
// name, so separators of either are rejected.
fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::new(JobField::Name, "must not be empty"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || matches!(c, ',' | '=' | '/' | '\\'))
    {
        return Err(ValidationError::new(
            JobField::Name,
            format!("'{name}' contains forbidden character {c:?}"),
        ));
    }
    if name == "." || name == ".." {
        return Err(ValidationError::new(
            JobField::Name,
            format!("'{name}' is not a valid name"),
        ));
    }
    Ok(())
}
