//! Process-wide bridge accessor for hosts that want one shared instance.
//!
//! The first successful [`init_global`] wins; later calls return the same
//! bridge. [`shutdown_global`] closes it and allows a fresh initialization.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::BridgeResult;
use crate::orchestration::OrchestrationBridge;

static GLOBAL_BRIDGE: RwLock<Option<Arc<OrchestrationBridge>>> = parking_lot::const_rwlock(None);

/// Initialize the global bridge, or return the one already running
pub fn init_global(config: BridgeConfig) -> BridgeResult<Arc<OrchestrationBridge>> {
    init_global_with(|| OrchestrationBridge::new(config))
}

/// Initialize the global bridge from a custom constructor
pub fn init_global_with<F>(build: F) -> BridgeResult<Arc<OrchestrationBridge>>
where
    F: FnOnce() -> BridgeResult<OrchestrationBridge>,
{
    let mut slot = GLOBAL_BRIDGE.write();
    if let Some(existing) = slot.as_ref() {
        return Ok(Arc::clone(existing));
    }

    let bridge = Arc::new(build()?);
    info!(bridge_id = %bridge.bridge_id(), "🎯 GLOBAL BRIDGE: Initialized");
    *slot = Some(Arc::clone(&bridge));
    Ok(bridge)
}

/// The global bridge, if initialized
pub fn global() -> Option<Arc<OrchestrationBridge>> {
    GLOBAL_BRIDGE.read().clone()
}

/// Close and forget the global bridge; returns false if none was running
pub fn shutdown_global() -> bool {
    let bridge = GLOBAL_BRIDGE.write().take();
    match bridge {
        Some(bridge) => {
            bridge.close();
            info!(bridge_id = %bridge.bridge_id(), "GLOBAL BRIDGE: Shut down");
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_global_lifecycle() {
        let first = init_global(BridgeConfig::default()).unwrap();
        let second = init_global(BridgeConfig::default()).unwrap();
        assert_eq!(first.bridge_id(), second.bridge_id());
        assert_eq!(global().map(|b| b.bridge_id()), Some(first.bridge_id()));

        assert!(shutdown_global());
        assert!(first.is_closed());
        assert!(global().is_none());
        assert!(!shutdown_global());
    }
}
