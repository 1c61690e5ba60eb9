use log::error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// A named endpoint probed once per cycle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Target {
    pub fn new(name: &str, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Source of the current target list, asked once per cycle.
///
/// Consecutive calls may return overlapping or disjoint sets in any order.
pub trait TargetProvider: Send + Sync {
    fn list_endpoints(&self) -> Vec<Target>;
}

/// A fixed list of targets.
#[derive(Clone, Debug, Default)]
pub struct StaticTargets {
    targets: Vec<Target>,
}

impl StaticTargets {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }
}

impl TargetProvider for StaticTargets {
    fn list_endpoints(&self) -> Vec<Target> {
        self.targets.clone()
    }
}

#[derive(Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: Vec<Target>,
}

/// Targets read from a TOML file (`[[targets]]` tables) on every call.
///
/// When the file cannot be read or parsed the previous list is served again.
#[derive(Debug)]
pub struct FileTargets {
    path: PathBuf,
    last: Mutex<Vec<Target>>,
}

impl FileTargets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: Mutex::new(Vec::new()),
        }
    }

    fn load(path: &Path) -> Result<Vec<Target>> {
        let content = std::fs::read_to_string(path)?;
        let file: TargetsFile = toml::from_str(&content)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        Ok(file.targets)
    }
}

impl TargetProvider for FileTargets {
    fn list_endpoints(&self) -> Vec<Target> {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        match Self::load(&self.path) {
            Ok(targets) => *last = targets,
            Err(err) => error!(
                "Failed to read targets from {}, keeping {} previous targets: {}",
                self.path.display(),
                last.len(),
                err
            ),
        }
        last.clone()
    }
}
