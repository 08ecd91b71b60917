use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Answers whether remote calls should be attempted right now.
pub trait ConnectivityProbe {
    fn is_online(&self) -> bool;
}

/// A shared on/off switch. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityFlag {
    online: Arc<AtomicBool>,
}

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityProbe for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

impl<P: ConnectivityProbe + ?Sized> ConnectivityProbe for Arc<P> {
    fn is_online(&self) -> bool {
        (**self).is_online()
    }
}
