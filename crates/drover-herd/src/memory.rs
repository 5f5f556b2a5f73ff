//! In-memory implementations of the external collaborator traits.
//!
//! Suitable for development and testing; production deployments plug in a
//! real image database and network transport behind the same traits. The
//! memory transport doubles as a scriptable test fixture: snapshots and
//! failures are staged per address, and every delivered plan is recorded.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;

use drover_types::{FileSystem, PathFilter, Trigger, UpdatePlan};

use crate::image::{Image, ImageError, ImageProvider};
use crate::transport::{PushAck, Transport, TransportError};

/// In-memory image provider.
#[derive(Default)]
pub struct MemoryImageProvider {
    images: DashMap<String, Arc<Image>>,
}

impl MemoryImageProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image. Derived tables are (re)built here so served
    /// trees are always ready for reconciliation.
    pub fn insert(
        &self,
        name: impl Into<String>,
        mut file_system: FileSystem,
        filter: PathFilter,
        triggers: Vec<Trigger>,
    ) {
        file_system.build_tables();
        self.images.insert(
            name.into(),
            Arc::new(Image {
                file_system: Arc::new(file_system),
                filter,
                triggers,
            }),
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        self.images.remove(name).is_some()
    }
}

#[async_trait]
impl ImageProvider for MemoryImageProvider {
    async fn get_image(&self, name: &str) -> Result<Arc<Image>, ImageError> {
        self.images
            .get(name)
            .map(|image| image.clone())
            .ok_or_else(|| ImageError::NotFound(name.to_string()))
    }
}

/// In-memory transport: per-address snapshots and scripted failures.
#[derive(Default)]
pub struct MemoryTransport {
    snapshots: DashMap<String, FileSystem>,
    fetch_failures: DashMap<String, TransportError>,
    push_failures: DashMap<String, TransportError>,
    pushed: Mutex<Vec<(String, UpdatePlan)>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage the snapshot an address will report.
    pub fn set_snapshot(&self, address: impl Into<String>, file_system: FileSystem) {
        self.snapshots.insert(address.into(), file_system);
    }

    /// Make fetches from an address fail until cleared.
    pub fn fail_fetch(&self, address: impl Into<String>, error: TransportError) {
        self.fetch_failures.insert(address.into(), error);
    }

    pub fn clear_fetch_failure(&self, address: &str) {
        self.fetch_failures.remove(address);
    }

    /// Make pushes to an address fail until cleared.
    pub fn fail_push(&self, address: impl Into<String>, error: TransportError) {
        self.push_failures.insert(address.into(), error);
    }

    /// Every plan delivered so far, in delivery order.
    pub fn pushed_plans(&self) -> Vec<(String, UpdatePlan)> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch_snapshot(&self, address: &str) -> Result<FileSystem, TransportError> {
        if let Some(error) = self.fetch_failures.get(address) {
            return Err(error.clone());
        }
        self.snapshots
            .get(address)
            .map(|fs| fs.clone())
            .ok_or_else(|| TransportError::Connection(format!("no route to {address}")))
    }

    async fn push_plan(
        &self,
        address: &str,
        plan: &UpdatePlan,
    ) -> Result<PushAck, TransportError> {
        if let Some(error) = self.push_failures.get(address) {
            return Err(error.clone());
        }
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((address.to_string(), plan.clone()));
        Ok(PushAck::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_image_is_not_found() {
        let provider = MemoryImageProvider::new();
        let err = provider.get_image("nope").await.unwrap_err();
        assert!(matches!(err, ImageError::NotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn staged_snapshot_is_served() {
        let transport = MemoryTransport::new();
        transport.set_snapshot("node-1:6969", FileSystem::empty());
        let fs = transport.fetch_snapshot("node-1:6969").await.unwrap();
        assert_eq!(fs.root, drover_types::ROOT_INODE);
    }

    #[tokio::test]
    async fn unknown_address_is_a_connection_error() {
        let transport = MemoryTransport::new();
        let err = transport.fetch_snapshot("unknown:6969").await.unwrap_err();
        assert!(matches!(err, TransportError::Connection(_)));
    }

    #[tokio::test]
    async fn pushes_are_recorded_in_order() {
        let transport = MemoryTransport::new();
        let plan = UpdatePlan {
            paths_to_delete: vec!["/old".into()],
            ..Default::default()
        };
        transport.push_plan("a", &plan).await.unwrap();
        transport.push_plan("b", &plan).await.unwrap();
        let pushed = transport.pushed_plans();
        assert_eq!(pushed.len(), 2);
        assert_eq!(pushed[0].0, "a");
        assert_eq!(pushed[1].0, "b");
    }
}
