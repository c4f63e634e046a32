//! Address-level bans and discouragement.
//!
//! Discouragement is the automatic, short-lived outcome of crossing the
//! misbehavior threshold. Bans are explicit operator decisions and may be
//! permanent. Whitelisted addresses are exempt from both.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::error::StorageResult;
use crate::network::constants::{DISCOURAGEMENT_DURATION, MAX_DISCOURAGED};
use crate::time::Clock;

/// A ban on one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanEntry {
    pub create_time: i64,
    /// Unix time the ban lifts; 0 means never
    pub ban_until: i64,
}

impl BanEntry {
    pub fn is_permanent(&self) -> bool {
        self.ban_until == 0
    }

    pub fn is_expired(&self, now: i64) -> bool {
        !self.is_permanent() && now >= self.ban_until
    }
}

/// Persistence for explicit bans. Discouragement is never persisted.
pub trait BanStore: Send + Sync {
    fn load(&self) -> StorageResult<HashMap<String, BanEntry>>;
    fn save(&self, bans: &HashMap<String, BanEntry>) -> StorageResult<()>;
}

/// Keeps bans in memory only.
#[derive(Debug, Default)]
pub struct MemoryBanStore {
    bans: Mutex<HashMap<String, BanEntry>>,
}

impl BanStore for MemoryBanStore {
    fn load(&self) -> StorageResult<HashMap<String, BanEntry>> {
        Ok(self.bans.lock().clone())
    }

    fn save(&self, bans: &HashMap<String, BanEntry>) -> StorageResult<()> {
        *self.bans.lock() = bans.clone();
        Ok(())
    }
}

pub struct BanList {
    banned: Mutex<HashMap<String, BanEntry>>,
    /// Address to discouragement expiry
    discouraged: Mutex<HashMap<String, i64>>,
    whitelist: RwLock<HashSet<String>>,
    store: Option<Arc<dyn BanStore>>,
    clock: Arc<dyn Clock>,
}

impl BanList {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            banned: Mutex::new(HashMap::new()),
            discouraged: Mutex::new(HashMap::new()),
            whitelist: RwLock::new(HashSet::new()),
            store: None,
            clock,
        }
    }

    /// Create a ban list backed by `store`, loading its unexpired bans.
    ///
    /// A store that fails to load is logged and treated as empty.
    pub fn with_store(clock: Arc<dyn Clock>, store: Arc<dyn BanStore>) -> Self {
        let now = clock.now();
        let mut list = Self::new(clock);
        match store.load() {
            Ok(bans) => {
                let total = bans.len();
                let live: HashMap<String, BanEntry> =
                    bans.into_iter().filter(|(_, entry)| !entry.is_expired(now)).collect();
                debug!("Loaded {} bans (skipped {} expired)", live.len(), total - live.len());
                *list.banned.get_mut() = live;
            }
            Err(e) => warn!("Failed to load ban list: {}", e),
        }
        list.store = Some(store);
        list
    }

    fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelist.read().contains(address)
    }

    pub fn add_to_whitelist(&self, address: impl Into<String>) {
        self.whitelist.write().insert(address.into());
    }

    pub fn remove_from_whitelist(&self, address: &str) {
        self.whitelist.write().remove(address);
    }

    /// Ban `address` for `offset_secs`, or permanently when it is zero.
    pub fn ban(&self, address: &str, offset_secs: i64) {
        if self.is_whitelisted(address) {
            info!("Refusing to ban whitelisted address {}", address);
            return;
        }
        let now = self.clock.now();
        let entry = BanEntry {
            create_time: now,
            ban_until: if offset_secs > 0 {
                now + offset_secs
            } else {
                0
            },
        };
        let mut banned = self.banned.lock();
        banned.insert(address.to_string(), entry);
        if entry.is_permanent() {
            warn!("Permanently banned {}", address);
        } else {
            warn!("Banned {} until {} ({}s)", address, entry.ban_until, offset_secs);
        }
        self.persist(&banned);
    }

    pub fn unban(&self, address: &str) {
        let mut banned = self.banned.lock();
        if banned.remove(address).is_some() {
            info!("Unbanned {}", address);
            self.persist(&banned);
        } else {
            trace!("Address {} was not banned", address);
        }
    }

    pub fn is_banned(&self, address: &str) -> bool {
        if self.is_whitelisted(address) {
            return false;
        }
        let now = self.clock.now();
        self.banned.lock().get(address).is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn banned(&self) -> HashMap<String, BanEntry> {
        self.banned.lock().clone()
    }

    /// Discourage `address` for [`DISCOURAGEMENT_DURATION`].
    ///
    /// Past [`MAX_DISCOURAGED`] entries, expired ones are dropped first, then
    /// the entry closest to expiry.
    pub fn discourage(&self, address: &str) {
        if self.is_whitelisted(address) {
            trace!("Skipping discouragement of whitelisted {}", address);
            return;
        }
        let now = self.clock.now();
        let expiry = now + DISCOURAGEMENT_DURATION.as_secs() as i64;

        let mut discouraged = self.discouraged.lock();
        discouraged.insert(address.to_string(), expiry);
        info!("Discouraged {} until {}", address, expiry);

        if discouraged.len() > MAX_DISCOURAGED {
            discouraged.retain(|_, until| now < *until);
        }
        if discouraged.len() > MAX_DISCOURAGED {
            let victim = discouraged
                .iter()
                .min_by_key(|(_, until)| **until)
                .map(|(victim, _)| victim.clone());
            if let Some(victim) = victim {
                trace!("Evicting discouraged entry {} to enforce size cap", victim);
                discouraged.remove(&victim);
            }
        }
    }

    pub fn is_discouraged(&self, address: &str) -> bool {
        if self.is_whitelisted(address) {
            return false;
        }
        let now = self.clock.now();
        self.discouraged.lock().get(address).is_some_and(|until| now < *until)
    }

    pub fn discouraged_count(&self) -> usize {
        self.discouraged.lock().len()
    }

    /// Whether a connection from `address` should be refused.
    pub fn should_refuse(&self, address: &str) -> bool {
        self.is_banned(address) || self.is_discouraged(address)
    }

    /// Drop expired bans and discouragements.
    pub fn sweep_expired(&self) {
        let now = self.clock.now();
        {
            let mut discouraged = self.discouraged.lock();
            let before = discouraged.len();
            discouraged.retain(|_, until| now < *until);
            if discouraged.len() < before {
                debug!("Swept {} expired discouragements", before - discouraged.len());
            }
        }

        let mut banned = self.banned.lock();
        let before = banned.len();
        banned.retain(|_, entry| !entry.is_expired(now));
        if banned.len() < before {
            debug!("Swept {} expired bans", before - banned.len());
            self.persist(&banned);
        }
    }

    pub fn clear(&self) {
        let mut banned = self.banned.lock();
        banned.clear();
        self.discouraged.lock().clear();
        self.persist(&banned);
    }

    fn persist(&self, banned: &HashMap<String, BanEntry>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(banned) {
                warn!("Failed to save ban list: {}", e);
            }
        }
    }
}
