use anyhow::{Context, Result, bail};
use declarative::{BoxedResource, Host};
use hostkit::SshPool;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::schema;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("steward"))
}

/// Default config file location
pub fn default_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("steward.toml"))
}

/// Where ssh keeps its ControlMaster sockets
fn ssh_control_dir() -> Result<PathBuf> {
    let base = dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .context("Could not determine a runtime or cache directory")?;
    Ok(base.join("steward").join("ssh"))
}

// ============================================================================
// Config File
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub verbose: bool,
    pub diff: bool,
    /// Seconds an idle ssh master connection stays open
    pub ssh_control_persist: u64,
    /// Extra `-o` options for every ssh invocation
    pub ssh_options: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verbose: false,
            diff: false,
            ssh_control_persist: 60,
            ssh_options: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,
    /// ssh destination, `user@host`; absent for the local machine
    #[serde(default)]
    pub ssh: Option<String>,
}

/// A parsed steward.toml
///
/// `[settings]` and `[[host]]` are reserved; every other top-level key is a
/// resource kind.
#[derive(Debug)]
pub struct Config {
    pub path: PathBuf,
    pub settings: Settings,
    pub hosts: Vec<HostConfig>,
    resources: toml::Table,
}

impl Config {
    /// Load from `path`, or the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => default_path()?,
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(path, &content)
    }

    pub fn parse(path: PathBuf, content: &str) -> Result<Self> {
        let mut table: toml::Table = toml::from_str(content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?;

        let settings = match table.remove("settings") {
            Some(value) => value.try_into().context("Invalid [settings]")?,
            None => Settings::default(),
        };
        let hosts: Vec<HostConfig> = match table.remove("host") {
            Some(value) => value.try_into().context("Invalid [[host]]")?,
            None => Vec::new(),
        };

        let mut names = HashSet::new();
        for host in &hosts {
            if host.name.is_empty() {
                bail!("A [[host]] entry has an empty name");
            }
            if !names.insert(host.name.as_str()) {
                bail!("Host '{}' is defined twice", host.name);
            }
        }

        Ok(Self {
            path,
            settings,
            hosts,
            resources: table,
        })
    }

    /// Build the declared resources
    pub fn resources(&self) -> Result<Vec<BoxedResource>> {
        schema::parse_resources(&self.resources)
            .with_context(|| format!("Invalid resources in {}", self.path.display()))
    }

    /// Host entries to converge; `only` restricts them by name
    pub fn select(&self, only: &[String]) -> Result<Vec<HostConfig>> {
        let hosts = if self.hosts.is_empty() {
            vec![HostConfig {
                name: "local".to_string(),
                ssh: None,
            }]
        } else {
            self.hosts.clone()
        };

        for name in only {
            if !hosts.iter().any(|h| &h.name == name) {
                bail!("Unknown host '{name}'");
            }
        }
        Ok(hosts
            .into_iter()
            .filter(|h| only.is_empty() || only.contains(&h.name))
            .collect())
    }

    /// Connect the selected hosts
    ///
    /// Remote hosts share one ssh pool.
    pub fn hosts(&self, only: &[String]) -> Result<Vec<Host>> {
        let selected = self.select(only)?;
        let mut pool: Option<Arc<SshPool>> = None;
        let mut hosts = Vec::with_capacity(selected.len());

        for entry in selected {
            let host = match entry.ssh {
                None => Host::local(entry.name),
                Some(target) => {
                    let pool = match &pool {
                        Some(pool) => Arc::clone(pool),
                        None => {
                            let created = Arc::new(self.ssh_pool()?);
                            pool = Some(Arc::clone(&created));
                            created
                        }
                    };
                    Host::remote(entry.name, target, pool)
                }
            };
            hosts.push(host);
        }
        Ok(hosts)
    }

    fn ssh_pool(&self) -> Result<SshPool> {
        let dir = ssh_control_dir()?;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .with_context(|| format!("Could not create {}", dir.display()))?;
        Ok(SshPool::new(dir.to_string_lossy())
            .persist(self.settings.ssh_control_persist)
            .options(self.settings.ssh_options.clone()))
    }
}

// ============================================================================
// Tests
// ============================================================================
