//! Graph bookkeeping: which resource provides which key, who waits on whom.
//!
//! Resources are admitted in batches. A batch is checked as a whole and
//! either admitted completely or rejected without changing anything.

use std::collections::{BTreeMap, HashMap};

use log::warn;

use crate::error::{Error, Result};
use crate::types::ResourceId;

/// Registration-time view of one resource instance. All keys are already
/// scoped to the instance's host.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub id: ResourceId,
    pub label: String,
    /// Provided keys, ending with the implicit [`Entry::self_key`]
    pub keys: Vec<String>,
    pub after: Vec<String>,
    pub before: Vec<String>,
    pub deletes: bool,
}

impl Entry {
    /// Key every instance provides implicitly, used for `before`
    pub fn self_key(id: ResourceId) -> String {
        id.to_string()
    }
}

#[derive(Debug, Clone)]
struct Provider {
    id: ResourceId,
    label: String,
    deletes: bool,
}

/// An admitted instance that has not finished
#[derive(Debug, Clone)]
struct Live {
    label: String,
    waits: Vec<String>,
    /// Handed to a worker; its waits can no longer grow
    dispatched: bool,
}

/// What admitting a batch changed
#[derive(Debug, Default)]
pub(crate) struct Admission {
    /// Keys each batch entry waits on, in batch order
    pub waits: Vec<Vec<String>>,
    /// Keys added to instances admitted earlier and not dispatched yet
    pub extended: Vec<(ResourceId, String)>,
}

#[derive(Debug, Default)]
pub(crate) struct Graph {
    /// Every key ever admitted, finished or not
    providers: HashMap<String, Provider>,
    /// Key -> self keys of resources declaring `before` on it
    waiters: HashMap<String, Vec<String>>,
    /// Key -> labels of kept resources naming it in `after`
    dependents: HashMap<String, Vec<String>>,
    live: HashMap<ResourceId, Live>,
}

impl Graph {
    /// Check and admit a batch
    pub fn admit(&mut self, batch: &[Entry]) -> Result<Admission> {
        let batch_providers = self.check_duplicates(batch)?;

        let mut new_waiters: HashMap<&str, Vec<String>> = HashMap::new();
        let mut extended = Vec::new();
        for entry in batch {
            for key in &entry.before {
                let self_key = Entry::self_key(entry.id);
                if let Some(provider) = self.providers.get(key) {
                    match self.live.get(&provider.id) {
                        Some(live) if !live.dispatched => {
                            extended.push((provider.id, self_key.clone()));
                        }
                        _ => warn!(
                            "{} must run before {}, which has already been dispatched",
                            entry.label, provider.label
                        ),
                    }
                }
                new_waiters.entry(key.as_str()).or_default().push(self_key);
            }
        }

        let waits: Vec<Vec<String>> = batch
            .iter()
            .map(|entry| {
                let mut waits = entry.after.clone();
                for key in &entry.keys {
                    let inbound = self
                        .waiters
                        .get(key)
                        .into_iter()
                        .chain(new_waiters.get(key.as_str()))
                        .flatten();
                    waits.extend(inbound.cloned());
                }
                waits.sort();
                waits.dedup();
                waits
            })
            .collect();

        self.check_deletions(batch, &batch_providers)?;
        self.check_cycles(batch, &waits, &extended, &batch_providers)?;

        // Commit
        for (entry, waits) in batch.iter().zip(&waits) {
            for key in &entry.keys {
                self.providers.insert(
                    key.clone(),
                    Provider {
                        id: entry.id,
                        label: entry.label.clone(),
                        deletes: entry.deletes,
                    },
                );
            }
            if !entry.deletes {
                for key in &entry.after {
                    self.dependents
                        .entry(key.clone())
                        .or_default()
                        .push(entry.label.clone());
                }
            }
            self.live.insert(
                entry.id,
                Live {
                    label: entry.label.clone(),
                    waits: waits.clone(),
                    dispatched: false,
                },
            );
        }
        for (id, key) in &extended {
            if let Some(live) = self.live.get_mut(id) {
                live.waits.push(key.clone());
            }
        }
        for (key, self_keys) in new_waiters {
            self.waiters
                .entry(key.to_string())
                .or_default()
                .extend(self_keys);
        }

        Ok(Admission { waits, extended })
    }

    /// Mark an instance as handed to a worker
    pub fn dispatch(&mut self, id: ResourceId) {
        if let Some(live) = self.live.get_mut(&id) {
            live.dispatched = true;
        }
    }

    /// Forget a finished instance for cycle detection
    pub fn finish(&mut self, id: ResourceId) {
        self.live.remove(&id);
    }

    fn check_duplicates<'b>(&self, batch: &'b [Entry]) -> Result<HashMap<&'b str, &'b Entry>> {
        let mut seen: HashMap<&str, &Entry> = HashMap::new();
        for entry in batch {
            for key in &entry.keys {
                if let Some(existing) = self.providers.get(key) {
                    return Err(Error::DuplicateProvider {
                        key: key.clone(),
                        first: existing.label.clone(),
                        second: entry.label.clone(),
                    });
                }
                if let Some(previous) = seen.insert(key.as_str(), entry) {
                    return Err(Error::DuplicateProvider {
                        key: key.clone(),
                        first: previous.label.clone(),
                        second: entry.label.clone(),
                    });
                }
            }
        }
        Ok(seen)
    }

    /// A kept resource must not depend on something being torn down,
    /// whichever of the two was admitted first.
    fn check_deletions(&self, batch: &[Entry], batch_providers: &HashMap<&str, &Entry>) -> Result<()> {
        for entry in batch.iter().filter(|e| !e.deletes) {
            for key in &entry.after {
                let deleter = match batch_providers.get(key.as_str()) {
                    Some(provider) if provider.deletes => Some(provider.label.clone()),
                    Some(_) => None,
                    None => self
                        .providers
                        .get(key)
                        .filter(|p| p.deletes)
                        .map(|p| p.label.clone()),
                };
                if let Some(deleter) = deleter {
                    return Err(Error::DependsOnDeletion {
                        resource: entry.label.clone(),
                        key: key.clone(),
                        deleter,
                    });
                }
            }
        }

        for entry in batch.iter().filter(|e| e.deletes) {
            for key in &entry.keys {
                if let Some(resource) = self.dependents.get(key).and_then(|d| d.first()) {
                    return Err(Error::DependsOnDeletion {
                        resource: resource.clone(),
                        key: key.clone(),
                        deleter: entry.label.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_cycles(
        &self,
        batch: &[Entry],
        waits: &[Vec<String>],
        extended: &[(ResourceId, String)],
        batch_providers: &HashMap<&str, &Entry>,
    ) -> Result<()> {
        let mut nodes: BTreeMap<ResourceId, (String, Vec<String>)> = self
            .live
            .iter()
            .map(|(id, live)| (*id, (live.label.clone(), live.waits.clone())))
            .collect();
        for (id, key) in extended {
            if let Some(node) = nodes.get_mut(id) {
                node.1.push(key.clone());
            }
        }
        for (entry, waits) in batch.iter().zip(waits) {
            nodes.insert(entry.id, (entry.label.clone(), waits.clone()));
        }

        let mut providers: HashMap<&str, ResourceId> = self
            .providers
            .iter()
            .map(|(key, p)| (key.as_str(), p.id))
            .collect();
        providers.extend(batch_providers.iter().map(|(key, e)| (*key, e.id)));

        let mut search = CycleSearch {
            nodes: &nodes,
            providers: &providers,
            state: HashMap::new(),
            stack: Vec::new(),
        };
        for id in nodes.keys() {
            if let Some(chain) = search.visit(*id) {
                return Err(Error::DependencyCycle { chain });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

struct CycleSearch<'a> {
    nodes: &'a BTreeMap<ResourceId, (String, Vec<String>)>,
    providers: &'a HashMap<&'a str, ResourceId>,
    state: HashMap<ResourceId, Mark>,
    stack: Vec<ResourceId>,
}

impl CycleSearch<'_> {
    fn visit(&mut self, id: ResourceId) -> Option<Vec<String>> {
        match self.state.get(&id) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = self.stack.iter().position(|s| *s == id).unwrap_or(0);
                let mut chain: Vec<String> = self.stack[start..]
                    .iter()
                    .map(|s| self.nodes[s].0.clone())
                    .collect();
                chain.push(self.nodes[&id].0.clone());
                return Some(chain);
            }
            None => {}
        }

        self.state.insert(id, Mark::Visiting);
        self.stack.push(id);
        let nodes = self.nodes;
        for key in &nodes[&id].1 {
            let Some(next) = self.providers.get(key.as_str()).copied() else {
                continue;
            };
            if !nodes.contains_key(&next) {
                continue;
            }
            if let Some(chain) = self.visit(next) {
                return Some(chain);
            }
        }
        self.stack.pop();
        self.state.insert(id, Mark::Done);
        None
    }
}
