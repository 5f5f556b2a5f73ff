//! The herd: population ownership and the poll scheduler.
//!
//! The herd owns every [`Sub`], advances a round-robin cursor over them
//! once per tick, and spawns one bounded task per pollable node. Driving
//! the tick cadence (timer loop, event loop) is the embedder's job; the
//! herd's contract is [`Herd::poll_next_sub`], which reports when a full
//! scan over the population has completed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::{debug, info};

use crate::config::{connection_slots, HerdConfig};
use crate::image::ImageProvider;
use crate::sub::Sub;
use crate::transport::Transport;

/// Shared collaborators and concurrency pools for poll cycles.
///
/// Poll, push, and compute work are gated independently so no single
/// phase can starve the others.
pub(crate) struct CycleContext {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) images: Arc<dyn ImageProvider>,
    pub(crate) poll: Semaphore,
    pub(crate) push: Semaphore,
    pub(crate) compute: Semaphore,
}

struct Members {
    by_name: HashMap<String, Arc<Sub>>,
    /// Stable ordering for the round-robin scan.
    by_index: Vec<Arc<Sub>>,
}

struct ScanState {
    next_sub_to_poll: usize,
    current_scan_start: Instant,
    previous_scan_duration: Option<Duration>,
}

/// The coordinator owning and scheduling all subs.
pub struct Herd {
    members: RwLock<Members>,
    scan: Mutex<ScanState>,
    connection_semaphore: Arc<Semaphore>,
    cycle: Arc<CycleContext>,
}

impl Herd {
    pub fn new(
        config: HerdConfig,
        transport: Arc<dyn Transport>,
        images: Arc<dyn ImageProvider>,
    ) -> Self {
        let cpus = config.cpus();
        let connections = connection_slots(config.file_descriptor_limit);
        info!(
            connections,
            cpus, "sizing herd concurrency pools"
        );
        Self {
            members: RwLock::new(Members {
                by_name: HashMap::new(),
                by_index: Vec::new(),
            }),
            scan: Mutex::new(ScanState {
                next_sub_to_poll: 0,
                current_scan_start: Instant::now(),
                previous_scan_duration: None,
            }),
            connection_semaphore: Arc::new(Semaphore::new(connections)),
            cycle: Arc::new(CycleContext {
                transport,
                images,
                poll: Semaphore::new(cpus * 10),
                push: Semaphore::new(cpus),
                compute: Semaphore::new(cpus),
            }),
        }
    }

    /// Add a node to the population, replacing any node with the same
    /// name.
    pub async fn add_sub(&self, sub: Sub) -> Arc<Sub> {
        let sub = Arc::new(sub);
        let mut members = self.members.write().await;
        if members.by_name.remove(&sub.name).is_some() {
            members.by_index.retain(|s| s.name != sub.name);
        }
        members.by_name.insert(sub.name.clone(), sub.clone());
        members.by_index.push(sub.clone());
        debug!(sub = %sub.name, "added sub");
        sub
    }

    /// Remove a node. Returns false if it was not a member. An in-flight
    /// cycle for the node finishes on its own; it just stops being
    /// scheduled.
    pub async fn remove_sub(&self, name: &str) -> bool {
        let mut members = self.members.write().await;
        if members.by_name.remove(name).is_none() {
            return false;
        }
        members.by_index.retain(|s| s.name != name);
        debug!(sub = %name, "removed sub");
        true
    }

    pub async fn get_sub(&self, name: &str) -> Option<Arc<Sub>> {
        self.members.read().await.by_name.get(name).cloned()
    }

    /// Advance the scan cursor one position, spawning a poll cycle for
    /// the node there unless it is already busy. Returns true when the
    /// cursor wrapped: a full scan over the population just completed.
    pub async fn poll_next_sub(&self) -> bool {
        let sub = {
            let members = self.members.read().await;
            let mut scan = self.scan.lock().await;
            if scan.next_sub_to_poll >= members.by_index.len() {
                scan.next_sub_to_poll = 0;
                scan.previous_scan_duration = Some(scan.current_scan_start.elapsed());
                return true;
            }
            if scan.next_sub_to_poll == 0 {
                scan.current_scan_start = Instant::now();
            }
            let sub = members.by_index[scan.next_sub_to_poll].clone();
            scan.next_sub_to_poll += 1;
            sub
        };
        // Quick lockless check; the spawned task's try_make_busy is the
        // authoritative gate.
        if sub.is_busy() {
            return false;
        }
        let Ok(permit) = self.connection_semaphore.clone().acquire_owned().await else {
            return false;
        };
        let ctx = self.cycle.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if !sub.try_make_busy() {
                return;
            }
            sub.connect_and_poll(&ctx).await;
            sub.make_unbusy();
        });
        false
    }

    /// Count subs matching a predicate, under the read lock. `None`
    /// counts the whole population.
    pub async fn count_selected_subs<F>(&self, select: Option<F>) -> usize
    where
        F: Fn(&Sub) -> bool,
    {
        let members = self.members.read().await;
        match select {
            None => members.by_index.len(),
            Some(select) => members.by_index.iter().filter(|s| select(s)).count(),
        }
    }

    /// Collect subs matching a predicate, under the read lock. `None`
    /// returns the whole population in scan order.
    pub async fn get_selected_subs<F>(&self, select: Option<F>) -> Vec<Arc<Sub>>
    where
        F: Fn(&Sub) -> bool,
    {
        let members = self.members.read().await;
        members
            .by_index
            .iter()
            .filter(|s| select.as_ref().map_or(true, |f| f(s)))
            .cloned()
            .collect()
    }

    /// Duration of the last completed scan, if one has completed.
    pub async fn previous_scan_duration(&self) -> Option<Duration> {
        self.scan.lock().await.previous_scan_duration
    }

    /// Time spent in the scan currently in progress.
    pub async fn current_scan_duration(&self) -> Duration {
        self.scan.lock().await.current_scan_start.elapsed()
    }

    pub async fn sub_count(&self) -> usize {
        self.members.read().await.by_index.len()
    }

    /// Nodes with a cycle currently in flight.
    pub async fn busy_count(&self) -> usize {
        self.count_selected_subs(Some(Sub::is_busy)).await
    }
}
