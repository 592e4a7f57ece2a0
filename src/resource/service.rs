//! Service resource - running and enabled state of a system service
//!
//! Linux hosts are driven through `systemctl`, OpenBSD hosts through `rcctl`.

use anyhow::{Result, bail};
use declarative::{ApplyContext, BoxedResource, Resource, Status};
use hostkit::{Cmd, Transport};
use log::debug;

use super::path_key;
use crate::schema::{FieldSpec, FieldType, Fields, KindSchema, SchemaError};

const FIELDS: &[FieldSpec] = &[
    FieldSpec::new("name", FieldType::String, "service or unit name")
        .required()
        .short_key(),
    FieldSpec::new("running", FieldType::Bool, "whether it should be running").short_value(),
    FieldSpec::new("enabled", FieldType::Bool, "whether it should start at boot"),
    FieldSpec::new(
        "unit_file",
        FieldType::String,
        "path of the unit or rc script, waited for before the service is touched",
    )
    .rename("unit"),
];

pub const SCHEMA: KindSchema = KindSchema {
    name: "service",
    summary: "a system service, started or stopped and enabled or disabled",
    fields: FIELDS,
    build,
};

fn build(fields: &Fields) -> Result<BoxedResource, SchemaError> {
    Ok(Box::new(Service {
        name: fields.require_str("name")?.to_string(),
        running: fields.bool("running"),
        enabled: fields.bool("enabled"),
        unit_file: fields.string("unit_file"),
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Manager {
    Systemd,
    Rcctl,
}

impl Manager {
    fn detect(host: &dyn Transport) -> Result<Self> {
        let info = host.info()?;
        Ok(match info.os.as_str() {
            "openbsd" => Self::Rcctl,
            "linux" => Self::Systemd,
            other => bail!("no service manager known for {other}"),
        })
    }

    fn is_running(self, name: &str) -> Cmd {
        match self {
            Self::Systemd => Cmd::read_only("systemctl", ["is-active", "--quiet", name]),
            Self::Rcctl => Cmd::read_only("rcctl", ["check", name]),
        }
    }

    fn is_enabled(self, name: &str) -> Cmd {
        match self {
            Self::Systemd => Cmd::read_only("systemctl", ["is-enabled", "--quiet", name]),
            Self::Rcctl => Cmd::read_only("rcctl", ["get", name, "status"]),
        }
    }

    fn action(self, action: &str, name: &str) -> Cmd {
        match self {
            Self::Systemd => Cmd::new("systemctl", [action, name]),
            Self::Rcctl => Cmd::new("rcctl", [action, name]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Service {
    pub name: String,
    pub running: Option<bool>,
    pub enabled: Option<bool>,
    pub unit_file: Option<String>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            running: None,
            enabled: None,
            unit_file: None,
        }
    }

    pub fn running(mut self, running: bool) -> Self {
        self.running = Some(running);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}

/// Exit status 0 means yes, anything else no
fn probe(host: &dyn Transport, cmd: &Cmd) -> Result<bool> {
    Ok(host.exec(cmd)?.success())
}

impl Resource for Service {
    fn kind(&self) -> &'static str {
        "service"
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn box_clone(&self) -> BoxedResource {
        Box::new(self.clone())
    }

    fn provides(&self) -> Vec<String> {
        vec![format!("service:{}", self.name)]
    }

    fn after(&self) -> Vec<String> {
        self.unit_file.iter().map(|p| path_key(p)).collect()
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            bail!("name is required");
        }
        if self.running.is_none() && self.enabled.is_none() {
            bail!("at least one of running and enabled must be set");
        }
        Ok(())
    }

    fn apply(&self, ctx: &ApplyContext<'_>) -> Result<Status> {
        let host = ctx.transport();
        let manager = Manager::detect(host)?;
        let mut changed = false;

        if let Some(want) = self.enabled {
            let have = probe(host, &manager.is_enabled(&self.name))?;
            debug!("{}: {} enabled={have}", ctx.host(), self.name);
            if have != want {
                let action = if want { "enable" } else { "disable" };
                host.run(&manager.action(action, &self.name))?;
                changed = true;
            }
        }

        if let Some(want) = self.running {
            let have = probe(host, &manager.is_running(&self.name))?;
            debug!("{}: {} running={have}", ctx.host(), self.name);
            if have != want {
                let action = if want { "start" } else { "stop" };
                host.run(&manager.action(action, &self.name))?;
                changed = true;
            }
        }

        Ok(if changed {
            Status::Modified
        } else {
            Status::Unchanged
        })
    }
}
