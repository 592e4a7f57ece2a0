//! Target hosts of a run.

use std::fmt;
use std::sync::Arc;

use hostkit::{DryTransport, LocalTransport, RemoteTransport, SessionPool, Transport};

/// Key used for hosts without a connection target
pub const LOCAL_KEY: &str = "local";

/// A configured target: friendly name, how to reach it, and the transport
/// that does the work
#[derive(Clone)]
pub struct Host {
    name: String,
    target: Option<String>,
    transport: Arc<dyn Transport>,
    dry: bool,
}

impl Host {
    /// The machine we are running on
    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, None, Arc::new(LocalTransport::new()))
    }

    /// A machine reached through `pool`
    pub fn remote(
        name: impl Into<String>,
        target: impl Into<String>,
        pool: Arc<dyn SessionPool>,
    ) -> Self {
        let target = target.into();
        let transport = Arc::new(RemoteTransport::new(target.clone(), pool));
        Self::new(name, Some(target), transport)
    }

    /// Any transport; `target` is the connection string for remote hosts
    pub fn new(
        name: impl Into<String>,
        target: Option<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            target,
            transport,
            dry: false,
        }
    }

    /// Same host, with every operation going through a dry-run overlay
    pub fn dry(self) -> Self {
        if self.dry {
            return self;
        }
        Self {
            transport: Arc::new(DryTransport::new(self.transport)),
            dry: true,
            ..self
        }
    }

    /// Namespace for this host's resource keys
    pub fn key(&self) -> &str {
        self.target.as_deref().unwrap_or(LOCAL_KEY)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn is_remote(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_dry(&self) -> bool {
        self.dry
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Namespace `key` for this host
    pub fn scoped(&self, key: &str) -> String {
        format!("{}-{key}", self.key())
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("target", &self.target)
            .field("dry", &self.dry)
            .finish_non_exhaustive()
    }
}
