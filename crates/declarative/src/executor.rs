//! The scheduler - runs every resource instance concurrently behind fences

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::context::{ApplyContext, Reporter};
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::host::Host;
use crate::planner::{Entry, Graph};
use crate::resource::BoxedResource;
use crate::types::{Outcome, Record, Report, ResourceId, RunOptions};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type Declaration = (BoxedResource, &'static Location<'static>);

/// A resource instance bound to one host, ready to run
struct Node {
    id: ResourceId,
    host: Host,
    resource: BoxedResource,
    location: &'static Location<'static>,
    /// Provided keys, scoped, including the implicit self key
    keys: Vec<String>,
    waits: Vec<String>,
}

enum Event {
    Registered,
    Done(Record),
}

#[derive(Default)]
struct State {
    hosts: Option<Vec<Host>>,
    /// Declared before the hosts were known
    declared: Vec<Declaration>,
    /// Registered but not dispatched yet
    pending: Vec<Node>,
    graph: Graph,
    /// Closed fences of unfinished providers
    fences: HashMap<String, Arc<Fence>>,
    /// Per key: `None` if its provider succeeded, the error otherwise
    outcomes: HashMap<String, Option<String>>,
    /// Wakes the driver loop while a run is executing
    wake: Option<mpsc::Sender<Event>>,
}

/// One convergence run over a set of hosts
///
/// Resources are declared with [`Run::declare`], hosts fixed with
/// [`Run::set_hosts`], then [`Run::execute`] applies every resource once per
/// host. Each instance runs on its own thread and only waits for the
/// instances it depends on.
pub struct Run {
    options: RunOptions,
    state: Mutex<State>,
}

impl Run {
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            state: Mutex::new(State::default()),
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Hosts of this run, dry-wrapped if the run is a dry run
    pub fn hosts(&self) -> Vec<Host> {
        self.lock().hosts.clone().unwrap_or_default()
    }

    /// Declare a resource for every host
    ///
    /// Before [`Run::set_hosts`] the resource is queued; afterwards it is
    /// registered immediately.
    #[track_caller]
    pub fn declare(&self, resource: BoxedResource) -> Result<()> {
        let location = Location::caller();
        let hosts = {
            let mut state = self.lock();
            match &state.hosts {
                Some(hosts) => hosts.clone(),
                None => {
                    state.declared.push((resource, location));
                    return Ok(());
                }
            }
        };
        let batch = hosts
            .iter()
            .map(|host| (host.clone(), resource.box_clone(), location))
            .collect();
        self.register(batch)
    }

    /// Fix the hosts and instantiate every queued resource for each of them
    pub fn set_hosts(&self, hosts: Vec<Host>) -> Result<()> {
        let mut seen = HashSet::new();
        for host in &hosts {
            if !seen.insert(host.key().to_string()) {
                return Err(Error::DuplicateHost(host.key().to_string()));
            }
        }
        let hosts: Vec<Host> = if self.options.dry_run {
            hosts.into_iter().map(Host::dry).collect()
        } else {
            hosts
        };

        let declared = {
            let mut state = self.lock();
            if state.hosts.is_some() {
                return Err(Error::HostsAlreadyConfigured);
            }
            state.hosts = Some(hosts.clone());
            std::mem::take(&mut state.declared)
        };

        let batch = declared
            .iter()
            .flat_map(|(resource, location)| {
                hosts
                    .iter()
                    .map(|host| (host.clone(), resource.box_clone(), *location))
            })
            .collect();
        self.register(batch)
    }

    /// Register resources for one host while the run executes
    pub(crate) fn register_for(&self, host: &Host, items: Vec<Declaration>) -> Result<()> {
        let batch = items
            .into_iter()
            .map(|(resource, location)| (host.clone(), resource, location))
            .collect();
        self.register(batch)
    }

    /// Check a batch and add it to the graph; all or nothing
    fn register(&self, batch: Vec<(Host, BoxedResource, &'static Location<'static>)>) -> Result<()> {
        let mut entries = Vec::with_capacity(batch.len());
        let mut nodes = Vec::with_capacity(batch.len());

        for (host, resource, location) in batch {
            let label = format!("[{host}] {resource}");
            resource.validate().map_err(|e| Error::Invalid {
                resource: label.clone(),
                message: format!("{e:#}"),
            })?;

            let id = ResourceId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
            let mut keys: Vec<String> = resource
                .provides()
                .iter()
                .map(|k| host.scoped(k))
                .collect();
            keys.push(Entry::self_key(id));
            let scope = |list: Vec<String>| -> Vec<String> { list.iter().map(|k| host.scoped(k)).collect() };

            entries.push(Entry {
                id,
                label,
                keys: keys.clone(),
                after: scope(resource.after()),
                before: scope(resource.before()),
                deletes: resource.deletes(),
            });
            nodes.push(Node {
                id,
                host,
                resource,
                location,
                keys,
                waits: Vec::new(),
            });
        }

        let mut state = self.lock();
        let admission = state.graph.admit(&entries)?;
        for (id, key) in admission.extended {
            if let Some(node) = state.pending.iter_mut().find(|n| n.id == id) {
                debug!("{} now also waits on {key}", node.id);
                node.waits.push(key);
            }
        }
        for (mut node, waits) in nodes.into_iter().zip(admission.waits) {
            for key in &node.keys {
                state.fences.insert(key.clone(), Arc::new(Fence::new()));
            }
            debug!("registered {} {} waiting on {:?}", node.id, node.resource, waits);
            node.waits = waits;
            state.pending.push(node);
        }
        if let Some(wake) = &state.wake {
            // The driver may be blocked waiting for completions
            let _ = wake.send(Event::Registered);
        }
        Ok(())
    }

    /// Apply every registered resource and wait for all of them
    ///
    /// Individual failures do not abort the run; they are recorded in the
    /// returned [`Report`]. Use [`Report::ensure_success`] for the aggregate
    /// error.
    pub fn execute(&self, reporter: &dyn Reporter) -> Result<Report> {
        let (tx, rx) = mpsc::channel();
        let hosts = {
            let mut state = self.lock();
            let Some(hosts) = state.hosts.clone() else {
                return Err(Error::HostsNotConfigured);
            };
            state.wake = Some(tx.clone());
            hosts
        };

        let mut report = Report {
            dry_run: self.options.dry_run,
            ..Report::default()
        };

        thread::scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                let ready = {
                    let mut state = self.lock();
                    let ready = std::mem::take(&mut state.pending);
                    for node in &ready {
                        state.graph.dispatch(node.id);
                    }
                    ready
                };
                for node in ready {
                    in_flight += 1;
                    let tx = tx.clone();
                    scope.spawn(move || {
                        let record = self.run_node(node, reporter);
                        let _ = tx.send(Event::Done(record));
                    });
                }

                if in_flight == 0 {
                    break;
                }

                // We hold a sender, so recv only fails if every sender is
                // gone, which cannot happen here.
                match rx.recv() {
                    Ok(Event::Registered) => {}
                    Ok(Event::Done(record)) => {
                        in_flight -= 1;
                        reporter.on_item_complete(&record);
                        report.push(record);
                    }
                    Err(_) => break,
                }
            }
        });

        self.lock().wake = None;

        for host in &hosts {
            if let Err(e) = host.transport().cleanup() {
                warn!("{host}: cleanup failed: {e}");
            }
        }

        reporter.on_run_complete(&report);
        Ok(report)
    }

    fn run_node(&self, node: Node, reporter: &dyn Reporter) -> Record {
        let Node {
            id,
            host,
            resource,
            location,
            keys,
            waits,
        } = node;

        // Collect under the lock, wait outside it
        let fences: Vec<Arc<Fence>> = {
            let state = self.lock();
            waits
                .iter()
                .filter_map(|key| state.fences.get(key).cloned())
                .collect()
        };
        for fence in &fences {
            fence.wait();
        }

        let failed_prerequisite = {
            let state = self.lock();
            waits
                .iter()
                .find(|key| matches!(state.outcomes.get(*key), Some(Some(_))))
                .cloned()
        };

        let started = Instant::now();
        let outcome = match failed_prerequisite {
            Some(prerequisite) => {
                debug!("[{host}] {resource}: skipped, {prerequisite} failed");
                Outcome::Skipped { prerequisite }
            }
            None => {
                reporter.on_item_start(&host, &*resource);
                let ctx = ApplyContext::new(self, &host, id);
                match panic::catch_unwind(AssertUnwindSafe(|| resource.apply(&ctx))) {
                    Ok(Ok(status)) => Outcome::Applied(status),
                    Ok(Err(e)) => Outcome::Failed {
                        error: format!("{location} [{host}] {resource}: {e:#}"),
                    },
                    Err(payload) => Outcome::Failed {
                        error: format!(
                            "{location} [{host}] {resource}: panicked: {}",
                            panic_message(payload.as_ref())
                        ),
                    },
                }
            }
        };
        let duration = match outcome {
            Outcome::Skipped { .. } => Duration::ZERO,
            _ => started.elapsed(),
        };

        let error = match &outcome {
            Outcome::Applied(_) => None,
            Outcome::Failed { error } => Some(error.clone()),
            Outcome::Skipped { prerequisite } => Some(format!("prerequisite failed: {prerequisite}")),
        };

        // Record outcomes before anyone can pass the fences
        let opened: Vec<Arc<Fence>> = {
            let mut state = self.lock();
            for key in &keys {
                state.outcomes.insert(key.clone(), error.clone());
            }
            state.graph.finish(id);
            keys.iter().filter_map(|key| state.fences.remove(key)).collect()
        };
        for fence in opened {
            fence.open();
        }

        Record {
            id,
            host: host.name().to_string(),
            kind: resource.kind(),
            name: resource.name(),
            location,
            outcome,
            duration,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Silent;
    use crate::resource::Resource;
    use crate::types::Status;
    use std::fmt;
    use std::sync::atomic::AtomicUsize;

    type Action = Arc<dyn Fn(&ApplyContext<'_>) -> anyhow::Result<Status> + Send + Sync>;

    /// Scriptable resource for exercising the scheduler
    #[derive(Clone)]
    struct Step {
        name: String,
        provides: Vec<String>,
        after: Vec<String>,
        before: Vec<String>,
        deletes: bool,
        action: Action,
    }

    impl fmt::Debug for Step {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Step").field("name", &self.name).finish()
        }
    }

    impl Step {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                provides: Vec::new(),
                after: Vec::new(),
                before: Vec::new(),
                deletes: false,
                action: Arc::new(|_| Ok(Status::Created)),
            }
        }

        fn provides(mut self, key: &str) -> Self {
            self.provides.push(key.to_string());
            self
        }

        fn after(mut self, key: &str) -> Self {
            self.after.push(key.to_string());
            self
        }

        fn before(mut self, key: &str) -> Self {
            self.before.push(key.to_string());
            self
        }

        fn deleting(mut self) -> Self {
            self.deletes = true;
            self
        }

        fn action(
            mut self,
            action: impl Fn(&ApplyContext<'_>) -> anyhow::Result<Status> + Send + Sync + 'static,
        ) -> Self {
            self.action = Arc::new(action);
            self
        }

        fn boxed(self) -> BoxedResource {
            Box::new(self)
        }
    }

    impl Resource for Step {
        fn kind(&self) -> &'static str {
            "step"
        }

        fn name(&self) -> String {
            self.name.clone()
        }

        fn box_clone(&self) -> BoxedResource {
            Box::new(self.clone())
        }

        fn provides(&self) -> Vec<String> {
            self.provides.clone()
        }

        fn after(&self) -> Vec<String> {
            self.after.clone()
        }

        fn before(&self) -> Vec<String> {
            self.before.clone()
        }

        fn deletes(&self) -> bool {
            self.deletes
        }

        fn apply(&self, ctx: &ApplyContext<'_>) -> anyhow::Result<Status> {
            (self.action)(ctx)
        }
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn note(log: &Log, entry: impl Into<String>) {
        log.lock().unwrap().push(entry.into());
    }

    fn position(log: &Log, entry: &str) -> usize {
        let log = log.lock().unwrap();
        log.iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} missing from {log:?}"))
    }

    /// Cheap deterministic pseudo-random delay
    fn jitter(seed: u64) -> Duration {
        let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        Duration::from_micros(x % 400)
    }

    fn local_run() -> Run {
        let run = Run::new(RunOptions::default());
        run.set_hosts(vec![Host::local("local")]).unwrap();
        run
    }

    fn outcome<'a>(report: &'a Report, name: &'a str) -> &'a Outcome {
        &report
            .find(name)
            .next()
            .unwrap_or_else(|| panic!("no record for {name}"))
            .outcome
    }

    #[test]
    fn test_after_waits_for_provider_across_interleavings() {
        for iteration in 0..120u64 {
            let log: Log = Arc::default();
            let run = local_run();

            let l = Arc::clone(&log);
            run.declare(
                Step::new("a")
                    .provides("path:/etc/conf")
                    .action(move |_| {
                        note(&l, "a:start");
                        thread::sleep(jitter(iteration));
                        note(&l, "a:done");
                        Ok(Status::Created)
                    })
                    .boxed(),
            )
            .unwrap();

            let l = Arc::clone(&log);
            run.declare(
                Step::new("b")
                    .after("path:/etc/conf")
                    .action(move |_| {
                        note(&l, "b:start");
                        Ok(Status::Modified)
                    })
                    .boxed(),
            )
            .unwrap();

            for n in 0..4u64 {
                run.declare(
                    Step::new(&format!("noise{n}"))
                        .action(move |_| {
                            thread::sleep(jitter(iteration * 7 + n));
                            Ok(Status::Unchanged)
                        })
                        .boxed(),
                )
                .unwrap();
            }

            let report = run.execute(&Silent).unwrap();
            assert_eq!(report.summary.total(), 6);
            assert!(position(&log, "a:done") < position(&log, "b:start"));
            report.ensure_success().unwrap();
        }
    }

    #[test]
    fn test_failure_skips_dependents_only() {
        let applied = Arc::new(AtomicUsize::new(0));
        let run = local_run();

        run.declare(
            Step::new("c")
                .provides("service:c")
                .action(|_| anyhow::bail!("simulated I/O error"))
                .boxed(),
        )
        .unwrap();
        let count = Arc::clone(&applied);
        run.declare(
            Step::new("d")
                .provides("service:d")
                .after("service:c")
                .action(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(Status::Created)
                })
                .boxed(),
        )
        .unwrap();
        let count = Arc::clone(&applied);
        run.declare(
            Step::new("transitive")
                .after("service:d")
                .action(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(Status::Created)
                })
                .boxed(),
        )
        .unwrap();
        run.declare(Step::new("e").boxed()).unwrap();

        let report = run.execute(&Silent).unwrap();

        assert!(matches!(outcome(&report, "c"), Outcome::Failed { error } if error.contains("simulated I/O error")));
        assert!(matches!(outcome(&report, "d"), Outcome::Skipped { prerequisite } if prerequisite == "local-service:c"));
        assert!(matches!(outcome(&report, "transitive"), Outcome::Skipped { .. }));
        assert_eq!(outcome(&report, "e"), &Outcome::Applied(Status::Created));
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.skipped, 2);
        assert!(matches!(
            report.ensure_success(),
            Err(Error::Failed { failed: 1, skipped: 2 })
        ));
    }

    #[test]
    fn test_errors_carry_location_and_host() {
        let run = local_run();
        run.declare(
            Step::new("broken")
                .action(|_| Err(anyhow::anyhow!("disk full")).map_err(|e| e.context("writing")))
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        let Outcome::Failed { error } = outcome(&report, "broken") else {
            panic!("expected failure");
        };
        assert!(error.contains("executor.rs"), "{error}");
        assert!(error.contains("[local] step broken: writing: disk full"), "{error}");
    }

    #[test]
    fn test_panic_is_a_failure() {
        let run = local_run();
        run.declare(
            Step::new("explodes")
                .provides("k:x")
                .action(|_| panic!("boom"))
                .boxed(),
        )
        .unwrap();
        run.declare(Step::new("after").after("k:x").boxed()).unwrap();

        let report = run.execute(&Silent).unwrap();
        assert!(matches!(outcome(&report, "explodes"), Outcome::Failed { error } if error.contains("panicked: boom")));
        assert!(matches!(outcome(&report, "after"), Outcome::Skipped { .. }));
    }

    #[test]
    fn test_before_orders_teardown() {
        let log: Log = Arc::default();
        let run = local_run();

        let l = Arc::clone(&log);
        run.declare(
            Step::new("group")
                .provides("group:wheel")
                .deleting()
                .action(move |_| {
                    note(&l, "group");
                    Ok(Status::Deleted)
                })
                .boxed(),
        )
        .unwrap();
        let l = Arc::clone(&log);
        run.declare(
            Step::new("user")
                .provides("user:bob")
                .before("group:wheel")
                .deleting()
                .action(move |_| {
                    thread::sleep(Duration::from_millis(20));
                    note(&l, "user");
                    Ok(Status::Deleted)
                })
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        assert_eq!(report.summary.deleted, 2);
        assert!(position(&log, "user") < position(&log, "group"));
    }

    #[test]
    fn test_failed_teardown_blocks_inverted_dependents() {
        let run = local_run();
        run.declare(Step::new("group").provides("group:wheel").deleting().boxed())
            .unwrap();
        run.declare(
            Step::new("user")
                .before("group:wheel")
                .deleting()
                .action(|_| anyhow::bail!("userdel failed"))
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        assert!(matches!(outcome(&report, "group"), Outcome::Skipped { .. }));
    }

    #[test]
    fn test_before_declared_after_provider_orders_teardown() {
        let log: Log = Arc::default();
        let run = local_run();

        // provider first, both while nothing runs yet
        let l = Arc::clone(&log);
        run.declare(
            Step::new("group")
                .provides("group:wheel")
                .deleting()
                .action(move |_| {
                    note(&l, "group");
                    Ok(Status::Deleted)
                })
                .boxed(),
        )
        .unwrap();
        let l = Arc::clone(&log);
        run.declare(
            Step::new("user")
                .before("group:wheel")
                .deleting()
                .action(move |_| {
                    thread::sleep(Duration::from_millis(20));
                    note(&l, "user");
                    Ok(Status::Deleted)
                })
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        report.ensure_success().unwrap();
        assert!(position(&log, "user") < position(&log, "group"));
    }

    #[test]
    fn test_deleted_provider_declared_after_kept_dependent_is_rejected() {
        let run = local_run();
        run.declare(Step::new("user").after("group:wheel").boxed())
            .unwrap();
        let err = run
            .declare(Step::new("group").provides("group:wheel").deleting().boxed())
            .unwrap_err();
        assert!(matches!(err, Error::DependsOnDeletion { ref resource, .. } if resource.contains("user")), "{err}");
    }

    #[test]
    fn test_kept_user_of_deleted_group_is_rejected() {
        let run = Run::new(RunOptions::default());
        run.declare(Step::new("group").provides("group:wheel").deleting().boxed())
            .unwrap();
        run.declare(Step::new("user").after("group:wheel").boxed())
            .unwrap();

        let err = run.set_hosts(vec![Host::local("local")]).unwrap_err();
        assert!(matches!(err, Error::DependsOnDeletion { .. }));
    }

    #[test]
    fn test_duplicate_provider_fails_before_anything_runs() {
        let applied = Arc::new(AtomicUsize::new(0));
        let run = Run::new(RunOptions::default());
        for name in ["first", "second"] {
            let count = Arc::clone(&applied);
            run.declare(
                Step::new(name)
                    .provides("path:/etc/motd")
                    .action(move |_| {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(Status::Created)
                    })
                    .boxed(),
            )
            .unwrap();
        }

        let err = run.set_hosts(vec![Host::local("local")]).unwrap_err();
        assert!(
            matches!(err, Error::DuplicateProvider { ref key, .. } if key == "local-path:/etc/motd"),
            "{err}"
        );
        let report = run.execute(&Silent).unwrap();
        assert_eq!(report.summary.total(), 0);
        assert_eq!(applied.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_duplicate_after_hosts_set() {
        let run = local_run();
        run.declare(Step::new("first").provides("user:bob").boxed())
            .unwrap();
        let err = run
            .declare(Step::new("second").provides("user:bob").boxed())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateProvider { .. }));
    }

    #[test]
    fn test_cycle_rejected_at_build_time() {
        let run = local_run();
        run.declare(Step::new("a").provides("k:a").after("k:b").boxed())
            .unwrap();
        // closing the loop from a later declaration
        let err = run
            .declare(Step::new("b").provides("k:b").after("k:a").boxed())
            .unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }), "{err}");

        let run = Run::new(RunOptions::default());
        run.declare(Step::new("a").provides("k:a").after("k:b").boxed())
            .unwrap();
        run.declare(Step::new("b").provides("k:b").after("k:a").boxed())
            .unwrap();
        let err = run.set_hosts(vec![Host::local("local")]).unwrap_err();
        assert!(matches!(err, Error::DependencyCycle { .. }), "{err}");
    }

    #[test]
    fn test_resources_added_while_running() {
        let log: Log = Arc::default();
        let run = local_run();

        let l = Arc::clone(&log);
        run.declare(
            Step::new("generator")
                .action(move |ctx| {
                    for n in 0..3 {
                        let l = Arc::clone(&l);
                        ctx.add(
                            Step::new(&format!("generated{n}"))
                                .provides(&format!("gen:{n}"))
                                .action(move |_| {
                                    note(&l, format!("generated{n}"));
                                    Ok(Status::Created)
                                })
                                .boxed(),
                        )?;
                    }
                    // the generator finishes first; the run must still wait
                    Ok(Status::Unchanged)
                })
                .boxed(),
        )
        .unwrap();
        let l = Arc::clone(&log);
        run.declare(
            Step::new("slow")
                .action(move |_| {
                    thread::sleep(Duration::from_millis(10));
                    note(&l, "slow");
                    Ok(Status::Unchanged)
                })
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        assert_eq!(report.summary.total(), 5);
        assert_eq!(report.summary.created, 3);
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_invalid_dynamic_add_fails_adder() {
        let run = local_run();
        run.declare(Step::new("owner").provides("k:x").boxed()).unwrap();
        run.declare(
            Step::new("adder")
                .after("k:x")
                .action(|ctx| {
                    ctx.add(Step::new("dup").provides("k:x").boxed())?;
                    Ok(Status::Created)
                })
                .boxed(),
        )
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        assert!(matches!(outcome(&report, "adder"), Outcome::Failed { error } if error.contains("duplicate provider")));
        assert_eq!(report.summary.total(), 2);
    }

    #[test]
    fn test_one_instance_per_host() {
        let run = Run::new(RunOptions::default());
        let hosts: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen = Arc::clone(&hosts);
        run.declare(
            Step::new("motd")
                .provides("path:/etc/motd")
                .action(move |ctx| {
                    seen.lock().unwrap().push(ctx.host().name().to_string());
                    Ok(Status::Created)
                })
                .boxed(),
        )
        .unwrap();

        let transport: Arc<dyn hostkit::Transport> = Arc::new(hostkit::LocalTransport::new());
        run.set_hosts(vec![
            Host::new("web1", Some("root@web1".into()), Arc::clone(&transport)),
            Host::new("web2", Some("root@web2".into()), transport),
        ])
        .unwrap();

        let report = run.execute(&Silent).unwrap();
        assert_eq!(report.summary.created, 2);
        assert_ne!(report.records[0].id, report.records[1].id);
        let mut seen = hosts.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["web1", "web2"]);
    }

    #[test]
    fn test_host_keys_must_be_unique() {
        let run = Run::new(RunOptions::default());
        let err = run
            .set_hosts(vec![Host::local("a"), Host::local("b")])
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateHost(ref key) if key == "local"));
    }

    #[test]
    fn test_hosts_set_once_and_required() {
        let run = Run::new(RunOptions::default());
        assert!(matches!(run.execute(&Silent), Err(Error::HostsNotConfigured)));
        run.set_hosts(vec![Host::local("local")]).unwrap();
        assert!(matches!(
            run.set_hosts(vec![Host::local("local")]),
            Err(Error::HostsAlreadyConfigured)
        ));
    }

    #[test]
    fn test_dry_run_wraps_transport() {
        let dir = tempfile::TempDir::new().unwrap();
        let target = dir.path().join("planned").to_string_lossy().into_owned();

        let run = Run::new(RunOptions {
            dry_run: true,
            ..RunOptions::default()
        });
        let path = target.clone();
        run.declare(
            Step::new("writer")
                .action(move |ctx| {
                    assert!(ctx.dry_run());
                    ctx.transport().write_file(&path, b"x")?;
                    assert!(ctx.transport().exists(&path)?);
                    Ok(Status::Created)
                })
                .boxed(),
        )
        .unwrap();
        run.set_hosts(vec![Host::local("local")]).unwrap();

        let report = run.execute(&Silent).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.summary.created, 1);
        assert!(!std::path::Path::new(&target).exists());
    }

    #[test]
    fn test_validation_rejects_declaration() {
        #[derive(Debug, Clone)]
        struct Bad;

        impl Resource for Bad {
            fn kind(&self) -> &'static str {
                "bad"
            }
            fn name(&self) -> String {
                "bad".into()
            }
            fn box_clone(&self) -> BoxedResource {
                Box::new(self.clone())
            }
            fn validate(&self) -> anyhow::Result<()> {
                anyhow::bail!("path must be absolute")
            }
            fn apply(&self, _ctx: &ApplyContext<'_>) -> anyhow::Result<Status> {
                unreachable!()
            }
        }

        let run = local_run();
        let err = run.declare(Box::new(Bad)).unwrap_err();
        assert_eq!(err.to_string(), "invalid [local] bad bad: path must be absolute");
    }

    #[test]
    fn test_reporter_sees_every_completion() {
        struct Counting(AtomicUsize, AtomicUsize);

        impl Reporter for Counting {
            fn on_item_start(&self, _host: &Host, _resource: &dyn Resource) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn on_item_complete(&self, _record: &Record) {
                self.1.fetch_add(1, Ordering::SeqCst);
            }
        }

        let run = local_run();
        run.declare(Step::new("fails").provides("k:f").action(|_| anyhow::bail!("no")).boxed())
            .unwrap();
        run.declare(Step::new("skipped").after("k:f").boxed()).unwrap();
        run.declare(Step::new("fine").boxed()).unwrap();

        let reporter = Counting(AtomicUsize::new(0), AtomicUsize::new(0));
        run.execute(&reporter).unwrap();
        // skipped resources never start
        assert_eq!(reporter.0.load(Ordering::SeqCst), 2);
        assert_eq!(reporter.1.load(Ordering::SeqCst), 3);
    }
}
