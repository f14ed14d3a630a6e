//! Pod IP allocation (spec.md §6). Addresses are drawn uniformly from
//! the pod CIDR with no conflict check and are never recycled, so the
//! allocation strategy is a trait rather than a free function — a real
//! allocator (e.g. one that tracks and recycles leases) can be swapped
//! in later without touching callers.

pub trait PodIpAllocator: Send + Sync {
    fn allocate(&self) -> String;
}

/// Draws an address uniformly from `kube9_types::POD_CIDR`, no conflict
/// check (spec.md §6 "sufficient for simulation").
#[derive(Default)]
pub struct RandomPodIpAllocator;

impl PodIpAllocator for RandomPodIpAllocator {
    fn allocate(&self) -> String {
        use rand::Rng;
        let mut rng = rand::rng();
        let b2 = rng.random_range(0u8..=255);
        let b3 = rng.random_range(0u8..=255);
        format!("10.244.{b2}.{b3}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocated_addresses_stay_within_the_pod_cidr() {
        let allocator = RandomPodIpAllocator;
        for _ in 0..50 {
            let addr = allocator.allocate();
            assert!(addr.starts_with("10.244."));
        }
    }
}
