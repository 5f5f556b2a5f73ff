//! Per-node state and the poll cycle state machine.
//!
//! A [`Sub`] is one managed node. Its busy flag is the single-flight
//! gate: at most one cycle (fetch, reconcile, push) is in flight per node
//! at any time, enforced by an atomic check-and-set. All other mutable
//! fields are eventually-consistent status, owned by whichever cycle
//! currently holds the busy flag and readable by anyone at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use drover_reconcile::reconcile_with_triggers;
use drover_types::FileSystem;

use crate::error::CycleError;
use crate::herd::CycleContext;

/// Eventually-consistent, observable status of a node.
///
/// Readers may observe a cycle's writes in any interleaving; no atomicity
/// across fields is guaranteed or required.
#[derive(Debug, Clone, Default)]
pub struct SubStatus {
    pub last_fetch_error: Option<String>,
    pub last_update_error: Option<String>,
    pub fetch_in_progress: bool,
    pub update_in_progress: bool,
    pub last_update_had_trigger_failures: bool,
    /// Snapshot from the most recent successful fetch, replaced wholesale.
    pub last_snapshot: Option<Arc<FileSystem>>,
    /// Successful fetches so far.
    pub generation_count: u64,
    /// Poll cycles attempted so far.
    pub scan_count: u64,
    /// Last successful contact over the transport.
    pub last_reachable: Option<DateTime<Utc>>,
}

/// One managed node.
pub struct Sub {
    pub name: String,
    pub address: String,
    /// Name of the image this node must converge onto.
    pub required_image: String,
    busy: AtomicBool,
    status: RwLock<SubStatus>,
}

impl Sub {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        required_image: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            required_image: required_image.into(),
            busy: AtomicBool::new(false),
            status: RwLock::new(SubStatus::default()),
        }
    }

    /// Atomic idle-to-busy transition. Returns false if a cycle is
    /// already in flight; this is the authoritative exclusion.
    pub fn try_make_busy(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Unconditional return to idle. Runs on every cycle exit, success or
    /// failure, so the node is pollable again next scan.
    pub fn make_unbusy(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Cheap unsynchronized read for the scheduler's hot path. Best
    /// effort only; [`Sub::try_make_busy`] is the real gate.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    /// Snapshot of the node's current status.
    pub fn status(&self) -> SubStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update_status(&self, mutate: impl FnOnce(&mut SubStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        mutate(&mut status);
    }

    #[cfg(test)]
    pub(crate) fn record_reachable_at(&self, at: DateTime<Utc>) {
        self.update_status(|s| s.last_reachable = Some(at));
    }

    /// Run one full poll cycle. The caller holds the busy flag.
    ///
    /// Failures are recorded on the node and end the cycle; they never
    /// propagate to the scheduler.
    #[instrument(skip(self, ctx), fields(sub = %self.name))]
    pub(crate) async fn connect_and_poll(&self, ctx: &CycleContext) {
        self.update_status(|s| s.scan_count += 1);
        if let Err(error) = self.run_cycle(ctx).await {
            debug!(error = %error, "poll cycle failed");
        }
    }

    async fn run_cycle(&self, ctx: &CycleContext) -> Result<(), CycleError> {
        let snapshot = self.fetch(ctx).await?;

        let image = match ctx.images.get_image(&self.required_image).await {
            Ok(image) => image,
            Err(error) => {
                self.update_status(|s| s.last_update_error = Some(error.to_string()));
                return Err(CycleError::ImageLookup(error));
            }
        };

        // CPU-bound diffing runs under the compute pool so it cannot
        // starve fetch/push work.
        let plan = {
            let Ok(_permit) = ctx.compute.acquire().await else {
                return Ok(());
            };
            match reconcile_with_triggers(
                &snapshot,
                &image.file_system,
                &image.filter,
                &image.triggers,
            ) {
                Ok(plan) => plan,
                Err(error) => {
                    self.update_status(|s| s.last_update_error = Some(error.to_string()));
                    return Err(CycleError::ReconcileInput(error));
                }
            }
        };

        if plan.is_empty() {
            debug!("in sync, nothing to push");
            self.update_status(|s| s.last_update_error = None);
            return Ok(());
        }

        self.push(ctx, &plan).await
    }

    async fn fetch(&self, ctx: &CycleContext) -> Result<Arc<FileSystem>, CycleError> {
        self.update_status(|s| s.fetch_in_progress = true);
        let result = {
            let Ok(_permit) = ctx.poll.acquire().await else {
                self.update_status(|s| s.fetch_in_progress = false);
                return Err(CycleError::Fetch(crate::transport::TransportError::Connection(
                    "poll pool closed".to_string(),
                )));
            };
            ctx.transport.fetch_snapshot(&self.address).await
        };
        match result {
            Ok(mut file_system) => {
                file_system.build_tables();
                let snapshot = Arc::new(file_system);
                self.update_status(|s| {
                    s.fetch_in_progress = false;
                    s.last_fetch_error = None;
                    s.last_reachable = Some(Utc::now());
                    s.generation_count += 1;
                    s.last_snapshot = Some(snapshot.clone());
                });
                Ok(snapshot)
            }
            Err(error) => {
                self.update_status(|s| {
                    s.fetch_in_progress = false;
                    s.last_fetch_error = Some(error.to_string());
                });
                Err(CycleError::Fetch(error))
            }
        }
    }

    async fn push(
        &self,
        ctx: &CycleContext,
        plan: &drover_types::UpdatePlan,
    ) -> Result<(), CycleError> {
        self.update_status(|s| s.update_in_progress = true);
        let result = {
            let Ok(_permit) = ctx.push.acquire().await else {
                self.update_status(|s| s.update_in_progress = false);
                return Ok(());
            };
            ctx.transport.push_plan(&self.address, plan).await
        };
        match result {
            Ok(ack) => {
                self.update_status(|s| {
                    s.update_in_progress = false;
                    s.last_update_error = None;
                    s.last_update_had_trigger_failures = ack.trigger_failures;
                });
                Ok(())
            }
            Err(error) => {
                // The plan is discarded; the push is treated as fully
                // non-applied and the next scan rebuilds it.
                self.update_status(|s| {
                    s.update_in_progress = false;
                    s.last_update_error = Some(error.to_string());
                });
                Err(CycleError::Push(error))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_flag_round_trip() {
        let sub = Sub::new("n0", "n0:6969", "base");
        assert!(!sub.is_busy());
        assert!(sub.try_make_busy());
        assert!(sub.is_busy());
        assert!(!sub.try_make_busy());
        sub.make_unbusy();
        assert!(!sub.is_busy());
        assert!(sub.try_make_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn try_make_busy_is_single_flight() {
        let sub = Arc::new(Sub::new("n0", "n0:6969", "base"));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let sub = sub.clone();
            handles.push(tokio::spawn(async move { sub.try_make_busy() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn status_starts_clean() {
        let sub = Sub::new("n0", "n0:6969", "base");
        let status = sub.status();
        assert!(status.last_fetch_error.is_none());
        assert!(status.last_update_error.is_none());
        assert_eq!(status.generation_count, 0);
        assert!(status.last_snapshot.is_none());
    }
}
