//! Device groups
//!
//! A [`DeviceGroup`] collects the addresses of every device sharing one
//! identifier, up to a fixed capacity, together with the factory that builds
//! new devices of that kind. Members are stored as addresses; the devices
//! themselves live in the owning module's ordered index.

use heapless::Vec as BoundedVec;

use muxnet_core::{Fqa, MuxnetConfig, MuxnetError, Result};

use crate::device::Device;

/// Maximum members per group
pub const GROUP_CAPACITY: usize = 4;

/// Builds a device of one kind at an address
pub type DeviceFactory = fn(identifier: &str, fqa: Fqa, config: &MuxnetConfig) -> Device;

/// Same-identifier devices, bounded to [`GROUP_CAPACITY`]
#[derive(Clone)]
pub struct DeviceGroup {
    identifier: String,
    members: BoundedVec<Fqa, GROUP_CAPACITY>,
    factory: DeviceFactory,
}

impl DeviceGroup {
    /// Empty group
    pub fn new(identifier: impl Into<String>, factory: DeviceFactory) -> Self {
        Self {
            identifier: identifier.into(),
            members: BoundedVec::new(),
            factory,
        }
    }

    /// Group key
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Member addresses, in insertion order
    pub fn members(&self) -> &[Fqa] {
        &self.members
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Whether another member would exceed the capacity
    pub fn is_full(&self) -> bool {
        self.members.is_full()
    }

    /// Check membership
    pub fn contains(&self, fqa: Fqa) -> bool {
        self.members.contains(&fqa)
    }

    /// Add a member
    ///
    /// Fails without touching existing members if the address is already
    /// present or the group is full.
    pub fn insert(&mut self, fqa: Fqa) -> Result<()> {
        if self.contains(fqa) {
            return Err(MuxnetError::DuplicateAddress(fqa));
        }
        self.members
            .push(fqa)
            .map_err(|_| MuxnetError::GroupFull {
                identifier: self.identifier.clone(),
                capacity: GROUP_CAPACITY,
            })
    }

    /// Remove a member, returning whether it was present
    pub fn remove(&mut self, fqa: Fqa) -> bool {
        match self.members.iter().position(|member| *member == fqa) {
            Some(index) => {
                self.members.remove(index);
                true
            }
            None => false,
        }
    }

    /// Build a new device of this group's kind (not yet a member)
    pub fn create(&self, fqa: Fqa, config: &MuxnetConfig) -> Device {
        (self.factory)(&self.identifier, fqa, config)
    }

    /// Factory used by [`DeviceGroup::create`]
    pub fn factory(&self) -> DeviceFactory {
        self.factory
    }
}

impl std::fmt::Debug for DeviceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceGroup")
            .field("identifier", &self.identifier)
            .field("members", &self.members)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(identifier: &str, fqa: Fqa, _: &MuxnetConfig) -> Device {
        Device::new(fqa, identifier)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut group = DeviceGroup::new("sensor", bare);
        let fqa = Fqa::encode(0, 0, 1, 0x40);

        group.insert(fqa).unwrap();
        assert!(group.contains(fqa));
        assert!(matches!(
            group.insert(fqa),
            Err(MuxnetError::DuplicateAddress(_))
        ));
        assert!(group.remove(fqa));
        assert!(!group.remove(fqa));
        assert!(group.is_empty());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut group = DeviceGroup::new("sensor", bare);
        for address in 0..GROUP_CAPACITY as u8 {
            group.insert(Fqa::encode(0, 0, 1, 0x40 + address)).unwrap();
        }
        assert!(group.is_full());

        let before = group.members().to_vec();
        let result = group.insert(Fqa::encode(0, 0, 2, 0x40));
        assert!(matches!(result, Err(MuxnetError::GroupFull { capacity: 4, .. })));
        assert_eq!(group.members(), before.as_slice());
    }

    #[test]
    fn test_create_uses_factory() {
        let group = DeviceGroup::new("display", bare);
        let device = group.create(Fqa::encode(0, 3, 2, 0x3C), &MuxnetConfig::default());
        assert_eq!(device.identifier(), "display");
        assert_eq!(device.fqa(), Fqa::encode(0, 3, 2, 0x3C));
        assert!(!group.contains(device.fqa()));
    }
}
