//! Scheduler: dispatches work units onto queues in dependency order.
//!
//! The scheduler owns the dependency graph and a completion channel.
//! Units are admitted in batches that either fully commit or leave the
//! scheduler untouched; a batch that would close a cycle is rejected
//! before anything in it runs.

use crate::core::graph::DepGraph;
use crate::core::unit::{Outcome, UnitId, WorkUnit};
use crate::dispatch::queue::WorkQueue;
use crate::dlog;
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{HashMap, HashSet};

/// Progress reports emitted while the scheduler advances.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    UnitStarted { id: UnitId },
    UnitFinished { id: UnitId, outcome: Outcome },
    AllUnitsFinished,
}

pub struct Scheduler {
    graph: DepGraph,
    units: HashMap<UnitId, WorkUnit>,
    queues: HashMap<UnitId, WorkQueue>,
    finished: HashSet<UnitId>,
    in_flight: HashSet<UnitId>,
    event_tx: Sender<SchedulerEvent>,
    done_tx: Sender<(UnitId, Outcome)>,
    done_rx: Receiver<(UnitId, Outcome)>,
}

impl Scheduler {
    pub fn new(event_tx: Sender<SchedulerEvent>) -> Self {
        let (done_tx, done_rx) = unbounded();
        Self {
            graph: DepGraph::new(),
            units: HashMap::new(),
            queues: HashMap::new(),
            finished: HashSet::new(),
            in_flight: HashSet::new(),
            event_tx,
            done_tx,
            done_rx,
        }
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finished.len()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn unit(&self, id: &UnitId) -> Option<&WorkUnit> {
        self.units.get(id)
    }

    /// Admit a batch of units with its dependency edges, all or nothing.
    ///
    /// Each edge is `(dep, dependent)`: the dependent may not start until
    /// the dep has finished. Edges may reference units admitted earlier.
    /// The batch is rejected whole if any unit was already admitted
    /// somewhere, an edge names an unknown unit, or an edge would close a
    /// cycle.
    pub fn admit(
        &mut self,
        batch: Vec<(WorkUnit, WorkQueue)>,
        edges: &[(UnitId, UnitId)],
    ) -> Result<()> {
        // Validate the shape on a scratch graph before claiming anything.
        let mut staged = self.graph.clone();
        for (unit, _) in &batch {
            if self.units.contains_key(&unit.id()) {
                return Err(Error::AlreadySubmitted { id: unit.id() });
            }
            staged.add_unit(unit.id(), unit.label());
        }
        for (dep, dependent) in edges {
            staged.add_edge(dep, dependent)?;
        }

        // Claim the units. A unit admitted to some other scheduler rolls
        // the whole batch back.
        let mut claimed: Vec<WorkUnit> = Vec::with_capacity(batch.len());
        for (unit, _) in &batch {
            if !unit.try_admit() {
                for prior in &claimed {
                    prior.revert_admission();
                }
                return Err(Error::AlreadySubmitted { id: unit.id() });
            }
            claimed.push(unit.clone());
        }

        dlog!(
            "admitted {} unit(s) with {} dependency edge(s)",
            batch.len(),
            edges.len()
        );
        self.graph = staged;
        for (unit, queue) in batch {
            self.queues.insert(unit.id(), queue);
            self.units.insert(unit.id(), unit);
        }
        Ok(())
    }

    /// Add an edge `(dep, dependent)` between already-admitted units.
    /// Rejected if it would close a cycle or if the dependent already
    /// started.
    pub fn add_dependency(&mut self, dep: &UnitId, dependent: &UnitId) -> Result<()> {
        if self.in_flight.contains(dependent) || self.finished.contains(dependent) {
            return Err(Error::Validation(format!(
                "unit {} already started, its dependencies are frozen",
                dependent.short()
            )));
        }
        self.graph.add_edge(dep, dependent)
    }

    pub fn remove_dependency(&mut self, dep: &UnitId, dependent: &UnitId) -> Result<()> {
        self.graph.remove_edge(dep, dependent)
    }

    /// Dispatch every unit whose dependencies are all finished and that
    /// is not already running or done. Cancelled units are dispatched
    /// too: they finish immediately as `Cancelled`, which is what lets
    /// their dependents proceed.
    ///
    /// Returns how many units were started.
    pub fn dispatch_ready(&mut self) -> Result<usize> {
        let ready: Vec<UnitId> = self
            .graph
            .ready_units(&self.finished)
            .into_iter()
            .filter(|id| !self.in_flight.contains(id))
            .collect();

        let mut started = 0;
        for id in ready {
            let unit = self
                .units
                .get(&id)
                .ok_or(Error::UnitNotFound { id })?
                .clone();
            let queue = self
                .queues
                .get(&id)
                .ok_or(Error::UnitNotFound { id })?
                .clone();

            let done_tx = self.done_tx.clone();
            unit.set_on_finish(Box::new(move |id, outcome| {
                let _ = done_tx.send((id, outcome));
            }));

            let runner = unit.clone();
            queue.submit(move || runner.run())?;
            self.in_flight.insert(id);
            started += 1;
            dlog!("dispatched unit '{}' ({})", unit.label(), id.short());
            let _ = self.event_tx.send(SchedulerEvent::UnitStarted { id });
        }
        Ok(started)
    }

    /// Record a completion previously reported on the done channel.
    pub fn handle_finished(&mut self, id: UnitId, outcome: Outcome) {
        self.in_flight.remove(&id);
        self.finished.insert(id);
        dlog!("unit {} finished: {}", id.short(), outcome);
        let _ = self
            .event_tx
            .send(SchedulerEvent::UnitFinished { id, outcome });
        if !self.graph.is_empty() && self.graph.all_finished(&self.finished) {
            let _ = self.event_tx.send(SchedulerEvent::AllUnitsFinished);
        }
    }

    /// Drive the graph until nothing is running and nothing more can
    /// start. Deferred completions are waited for like any other.
    pub fn run_to_idle(&mut self) -> Result<()> {
        loop {
            self.dispatch_ready()?;
            if self.in_flight.is_empty() {
                return Ok(());
            }
            match self.done_rx.recv() {
                Ok((id, outcome)) => self.handle_finished(id, outcome),
                Err(_) => return Ok(()),
            }
        }
    }

    /// Non-blocking variant of the completion pump: absorb whatever has
    /// finished so far.
    pub fn drain_completions(&mut self) {
        while let Ok((id, outcome)) = self.done_rx.try_recv() {
            self.handle_finished(id, outcome);
        }
    }
}
