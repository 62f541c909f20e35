//! Per-round resource pool tracking occupancy and destruction.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::warn;
use wavekeeper_core::{Placement, ResourceHandle, ResourceId, ResourceState};

#[derive(Clone, Copy, Debug)]
pub(crate) struct PooledResource {
    pub(crate) placement: Placement,
    pub(crate) state: ResourceState,
}

/// Resources produced for one round.
#[derive(Debug, Default)]
pub(crate) struct ResourcePool {
    resources: BTreeMap<ResourceId, PooledResource>,
    destroyed: u32,
}

impl ResourcePool {
    /// Builds a pool from the handles the factory reported ready.
    pub(crate) fn from_handles(handles: Vec<ResourceHandle>) -> Self {
        let mut resources = BTreeMap::new();
        for handle in handles {
            let pooled = PooledResource {
                placement: handle.placement,
                state: ResourceState::Available,
            };
            if resources.insert(handle.id, pooled).is_some() {
                warn!(resource = handle.id.get(), "factory reported a resource twice");
            }
        }
        Self {
            resources,
            destroyed: 0,
        }
    }

    /// Uniform choice among available resources.
    pub(crate) fn pick_free<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<ResourceId> {
        let free: Vec<ResourceId> = self
            .resources
            .iter()
            .filter(|(_, resource)| resource.state == ResourceState::Available)
            .map(|(id, _)| *id)
            .collect();
        if free.is_empty() {
            return None;
        }
        Some(free[rng.gen_range(0..free.len())])
    }

    /// Transitions an available resource to reserved.
    pub(crate) fn reserve(&mut self, id: ResourceId) -> bool {
        self.transition(id, ResourceState::Available, ResourceState::Reserved)
    }

    /// Transitions a reserved resource back to available.
    pub(crate) fn release(&mut self, id: ResourceId) -> bool {
        self.transition(id, ResourceState::Reserved, ResourceState::Available)
    }

    /// Permanently destroys the resource, shrinking the live pool.
    pub(crate) fn destroy(&mut self, id: ResourceId) -> bool {
        match self.resources.get_mut(&id) {
            Some(resource) if resource.state != ResourceState::Destroyed => {
                resource.state = ResourceState::Destroyed;
                self.destroyed = self.destroyed.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn state(&self, id: ResourceId) -> Option<ResourceState> {
        self.resources.get(&id).map(|resource| resource.state)
    }

    /// Resources that were provided to the round.
    pub(crate) fn capacity(&self) -> u32 {
        u32::try_from(self.resources.len()).unwrap_or(u32::MAX)
    }

    /// Resources that are not destroyed.
    pub(crate) fn live(&self) -> u32 {
        self.capacity().saturating_sub(self.destroyed)
    }

    pub(crate) fn destroyed(&self) -> u32 {
        self.destroyed
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ResourceId, PooledResource)> + '_ {
        self.resources.iter().map(|(id, resource)| (*id, *resource))
    }

    fn transition(&mut self, id: ResourceId, from: ResourceState, to: ResourceState) -> bool {
        match self.resources.get_mut(&id) {
            Some(resource) if resource.state == from => {
                resource.state = to;
                true
            }
            _ => false,
        }
    }
}
