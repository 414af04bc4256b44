use crate::devices::PhynDevice;
use std::sync::Arc;

/// Append-only collection of adapters; insertion order is cycle order
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<PhynDevice>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: PhynDevice) -> Arc<PhynDevice> {
        let device = Arc::new(device);
        self.devices.push(device.clone());
        device
    }

    pub fn get(&self, device_id: &str) -> Option<&Arc<PhynDevice>> {
        self.devices
            .iter()
            .find(|device| device.device_id() == device_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<PhynDevice>> {
        self.devices.iter()
    }

    pub fn as_slice(&self) -> &[Arc<PhynDevice>] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
