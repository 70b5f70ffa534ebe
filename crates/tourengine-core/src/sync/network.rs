//! Connectivity reporting

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the device currently reports network connectivity
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// A connectivity flag toggled by the host
#[derive(Debug)]
pub struct NetworkFlag {
    online: AtomicBool,
}

impl NetworkFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for NetworkFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Connectivity for NetworkFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
