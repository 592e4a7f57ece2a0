//! Reachability check before a run starts

use anyhow::{Result, bail};
use declarative::Host;
use log::debug;
use rayon::prelude::*;

/// Ask every host for its info in parallel
///
/// Fails with one error listing every host that could not be reached.
pub fn check(hosts: &[Host]) -> Result<()> {
    let failures: Vec<String> = hosts
        .par_iter()
        .filter_map(|host| match host.transport().info() {
            Ok(info) => {
                debug!("{host}: {} {} ({})", info.os, info.kernel, info.arch);
                None
            }
            Err(e) => Some(format!("{host}: {e}")),
        })
        .collect();

    if !failures.is_empty() {
        bail!("unreachable hosts:\n  {}", failures.join("\n  "));
    }
    Ok(())
}
