//! Identifier types shared across crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Name of a container image as passed to the builder's OCI output
/// descriptor. Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerName(String);

impl ContainerName {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for ContainerName {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_displays_and_derefs() {
        let name = ContainerName::from("demo");
        assert_eq!(name.to_string(), "demo");
        assert_eq!(name.as_str(), "demo");
        assert!(name.starts_with("de"));
    }

    #[test]
    fn container_name_serializes_as_plain_string() {
        let name = ContainerName::new("sherloq");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"sherloq\"");
        let back: ContainerName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }
}
