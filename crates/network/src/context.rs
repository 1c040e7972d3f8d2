//! The typed context threaded through every handler (§9 design note:
//! replaces the teacher's "shared mutable object referenced everywhere"
//! with an explicit, cheaply-cloneable bundle of handles).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use ld_config::SharedSettings;
use ld_core::Mirror;
use ld_store::Store;

use crate::webhook::AlertSink;

/// Cooperative shutdown signal observed by every accept loop and the
/// live-server session loop between iterations (§4.11, §5).
#[derive(Clone, Default)]
pub struct HaltFlag(Arc<AtomicBool>);

impl HaltFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory mirror cache (§9: "keep only the table as source of truth;
/// the in-memory set is a cache rebuilt from the table on startup and on
/// add-mirror/delete-mirror"). Keyed by address.
pub type MirrorCache = Arc<DashMap<String, Mirror>>;

pub fn rebuild_mirror_cache(store: &Store) -> ld_store::Result<MirrorCache> {
    let cache: MirrorCache = Arc::new(DashMap::new());
    for mirror in store.all_mirrors()? {
        cache.insert(mirror.address.clone(), mirror);
    }
    Ok(cache)
}

/// Shared handles passed by value to every listener and handler.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<Store>,
    pub settings: SharedSettings,
    pub mirrors: MirrorCache,
    pub halt: HaltFlag,
    pub alerts: Arc<dyn AlertSink>,
    /// This daemon's own address, used for loop suppression and to exclude
    /// self from broadcast fan-out.
    pub self_address: Arc<str>,
}

impl Context {
    pub fn new(
        store: Arc<Store>,
        settings: SharedSettings,
        mirrors: MirrorCache,
        alerts: Arc<dyn AlertSink>,
        self_address: String,
    ) -> Self {
        Self {
            store,
            settings,
            mirrors,
            halt: HaltFlag::new(),
            alerts,
            self_address: self_address.into(),
        }
    }

    pub fn is_self(&self, addr: &str) -> bool {
        addr == &*self.self_address
    }

    pub fn is_loopback(addr: SocketAddr) -> bool {
        addr.ip().is_loopback()
    }
}
