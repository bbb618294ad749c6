//! Per-balance exclusive locks with a bounded wait.
//!
//! A posting holds the lock of every balance it touches from the moment it
//! reads them until its commit returns. Multi-key acquisition is
//! all-or-nothing, so two transfers over the same pair of locations cannot
//! deadlock regardless of direction.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use stockledger_inventory::BalanceKey;

use crate::error::LedgerError;

#[derive(Debug, Default)]
pub struct BalanceLocks {
    held: Mutex<BTreeSet<BalanceKey>>,
    released: Condvar,
}

/// Releases its keys on drop.
#[derive(Debug)]
pub struct BalanceGuard<'a> {
    locks: &'a BalanceLocks,
    keys: Vec<BalanceKey>,
}

impl BalanceGuard<'_> {
    pub fn keys(&self) -> &[BalanceKey] {
        &self.keys
    }
}

impl Drop for BalanceGuard<'_> {
    fn drop(&mut self) {
        // A poisoned table still has to give the keys back.
        let mut held = match self.locks.held.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

impl BalanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every key or none, waiting at most `timeout`.
    pub fn acquire(&self, keys: &[BalanceKey], timeout: Duration) -> Result<BalanceGuard<'_>, LedgerError> {
        let wanted: BTreeSet<BalanceKey> = keys.iter().copied().collect();
        let started = Instant::now();

        let held = self
            .held
            .lock()
            .map_err(|_| LedgerError::Store("balance lock table poisoned".into()))?;
        let (mut held, wait) = self
            .released
            .wait_timeout_while(held, timeout, |held| wanted.iter().any(|k| held.contains(k)))
            .map_err(|_| LedgerError::Store("balance lock table poisoned".into()))?;

        if wait.timed_out() {
            let busy = wanted
                .iter()
                .find(|k| held.contains(k))
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(LedgerError::LockTimeout {
                key: busy,
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }

        held.extend(wanted.iter().copied());
        let waited = started.elapsed();
        if waited > Duration::from_millis(10) {
            debug!(waited_ms = waited.as_millis() as u64, keys = wanted.len(), "balance locks acquired after contention");
        }

        Ok(BalanceGuard {
            locks: self,
            keys: wanted.into_iter().collect(),
        })
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use stockledger_core::{AggregateId, TenantId};
    use stockledger_inventory::LocationId;
    use stockledger_products::{ProductId, StockItem};

    use super::*;

    fn test_key() -> BalanceKey {
        BalanceKey::new(
            TenantId::new(),
            StockItem::standalone(ProductId::new(AggregateId::new())),
            LocationId::new(AggregateId::new()),
        )
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = BalanceLocks::new();
        let key = test_key();
        {
            let guard = locks.acquire(&[key], Duration::from_millis(10)).unwrap();
            assert_eq!(guard.keys(), &[key]);
            assert_eq!(locks.held_count(), 1);
        }
        assert_eq!(locks.held_count(), 0);
        assert!(locks.acquire(&[key], Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn held_key_times_out_as_transient() {
        let locks = BalanceLocks::new();
        let key = test_key();
        let _guard = locks.acquire(&[key], Duration::from_millis(10)).unwrap();

        let err = locks.acquire(&[test_key(), key], Duration::from_millis(20)).unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, LedgerError::LockTimeout { key: k, .. } if k == key.to_string()));
        // Nothing from the failed attempt stays held.
        assert_eq!(locks.held_count(), 1);
    }

    #[test]
    fn disjoint_keys_do_not_block() {
        let locks = BalanceLocks::new();
        let _a = locks.acquire(&[test_key()], Duration::from_millis(10)).unwrap();
        assert!(locks.acquire(&[test_key()], Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn waiter_proceeds_once_released() {
        let locks = Arc::new(BalanceLocks::new());
        let key = test_key();
        let guard = locks.acquire(&[key], Duration::from_millis(10)).unwrap();

        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.acquire(&[key], Duration::from_secs(5)).map(|_| ()).is_ok())
        };
        thread::sleep(Duration::from_millis(30));
        drop(guard);

        assert!(waiter.join().unwrap());
    }
}
