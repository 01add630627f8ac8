use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use tracing::debug;
use wirechan_framing::FramedConnection;

use crate::config::PoolSettings;
use crate::error::{ChannelError, Result};

/// A connection checked out of the pool.
///
/// The holder must hand it back through [`ConnectionPool::give_back`] or
/// [`ConnectionPool::discard`]; the via's active count stays charged
/// until one of the two happens.
#[derive(Debug)]
pub struct PooledConnection {
    pub connection: FramedConnection,
    pub created: Instant,
}

impl PooledConnection {
    pub fn fresh(connection: FramedConnection) -> Self {
        Self {
            connection,
            created: Instant::now(),
        }
    }
}

#[derive(Debug)]
struct IdleConnection {
    connection: FramedConnection,
    created: Instant,
    parked: Instant,
}

#[derive(Debug, Default)]
struct ViaSlot {
    idle: Vec<IdleConnection>,
    active: usize,
}

/// Outbound connection pool, one slot per via.
///
/// Checkout charges the via's active count and blocks while the count
/// is at the configured maximum; the cap is never silently exceeded.
/// Idle connections are reused newest-first and expire by both idle
/// time and total lease time.
#[derive(Debug)]
pub struct ConnectionPool {
    settings: PoolSettings,
    slots: Mutex<HashMap<String, ViaSlot>>,
    returned: Condvar,
}

impl ConnectionPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            settings,
            slots: Mutex::new(HashMap::new()),
            returned: Condvar::new(),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Reserve a connection slot for `via`, blocking until capacity is
    /// available or `deadline` passes.
    ///
    /// `Ok(Some(..))` hands back a reusable idle connection;
    /// `Ok(None)` means the slot is reserved and the caller dials a
    /// fresh connection. Either way the caller now owes the pool a
    /// `give_back` or `discard`.
    pub fn checkout(&self, via: &str, deadline: Instant) -> Result<Option<PooledConnection>> {
        let mut slots = self.slots.lock().expect("connection pool poisoned");
        loop {
            let slot = slots.entry(via.to_owned()).or_default();
            if slot.active < self.settings.max_outbound_per_via {
                slot.active += 1;
                let reusable = self.pop_live_idle(slot);
                debug!(
                    via,
                    active = slot.active,
                    reused = reusable.is_some(),
                    "pool checkout"
                );
                return Ok(reusable);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ChannelError::Timeout(format!(
                    "waiting for a pooled connection to {via}"
                )));
            }
            let (guard, wait) = self
                .returned
                .wait_timeout(slots, deadline - now)
                .expect("connection pool poisoned");
            slots = guard;
            if wait.timed_out() && Instant::now() >= deadline {
                return Err(ChannelError::Timeout(format!(
                    "waiting for a pooled connection to {via}"
                )));
            }
        }
    }

    /// Return a healthy connection for reuse.
    pub fn give_back(&self, via: &str, pooled: PooledConnection) {
        let now = Instant::now();
        let mut slots = self.slots.lock().expect("connection pool poisoned");
        let slot = slots.entry(via.to_owned()).or_default();
        slot.active = slot.active.saturating_sub(1);
        if now.duration_since(pooled.created) < self.settings.lease_timeout {
            slot.idle.push(IdleConnection {
                connection: pooled.connection,
                created: pooled.created,
                parked: now,
            });
            debug!(via, idle = slot.idle.len(), "connection parked for reuse");
        } else {
            debug!(via, "connection lease expired; dropping");
        }
        drop(slots);
        self.returned.notify_one();
    }

    /// Release a slot whose connection is no longer usable.
    pub fn discard(&self, via: &str) {
        let mut slots = self.slots.lock().expect("connection pool poisoned");
        let slot = slots.entry(via.to_owned()).or_default();
        slot.active = slot.active.saturating_sub(1);
        debug!(via, active = slot.active, "connection discarded");
        drop(slots);
        self.returned.notify_one();
    }

    /// Idle connections currently parked for `via`.
    pub fn idle_count(&self, via: &str) -> usize {
        let slots = self.slots.lock().expect("connection pool poisoned");
        slots.get(via).map_or(0, |slot| slot.idle.len())
    }

    /// Newest idle connection still within both expiry windows; stale
    /// entries encountered on the way are dropped.
    fn pop_live_idle(&self, slot: &mut ViaSlot) -> Option<PooledConnection> {
        let now = Instant::now();
        while let Some(candidate) = slot.idle.pop() {
            let idle_ok = now.duration_since(candidate.parked) < self.settings.idle_timeout;
            let lease_ok = now.duration_since(candidate.created) < self.settings.lease_timeout;
            if idle_ok && lease_ok {
                return Some(PooledConnection {
                    connection: candidate.connection,
                    created: candidate.created,
                });
            }
            debug!(
                idle_expired = !idle_ok,
                lease_expired = !lease_ok,
                "dropping stale pooled connection"
            );
        }
        None
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use std::time::Duration;
    use wirechan_transport::NetStream;

    fn test_connection() -> FramedConnection {
        // Pool tests never do I/O; the far end can drop immediately.
        let (a, _b) = UnixStream::pair().unwrap();
        FramedConnection::new(NetStream::from_unix_stream(a), None, None).unwrap()
    }

    fn pool(max: usize) -> ConnectionPool {
        ConnectionPool::new(PoolSettings {
            max_outbound_per_via: max,
            ..PoolSettings::default()
        })
    }

    #[test]
    fn fresh_checkout_reserves_a_slot() {
        let pool = pool(2);
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(pool.checkout("tcp://a:1", deadline).unwrap().is_none());
        assert!(pool.checkout("tcp://a:1", deadline).unwrap().is_none());
    }

    #[test]
    fn checkout_blocks_at_capacity_until_timeout() {
        let pool = pool(1);
        let deadline = Instant::now() + Duration::from_secs(1);
        pool.checkout("tcp://a:1", deadline).unwrap();

        let short = Instant::now() + Duration::from_millis(50);
        let err = pool.checkout("tcp://a:1", short).unwrap_err();
        assert!(matches!(err, ChannelError::Timeout(_)));
    }

    #[test]
    fn capacity_is_per_via() {
        let pool = pool(1);
        let deadline = Instant::now() + Duration::from_secs(1);
        pool.checkout("tcp://a:1", deadline).unwrap();
        // A different via has its own slot and does not block.
        pool.checkout("tcp://b:1", deadline).unwrap();
    }

    #[test]
    fn give_back_unblocks_a_waiter() {
        let pool = std::sync::Arc::new(pool(1));
        let deadline = Instant::now() + Duration::from_secs(5);
        pool.checkout("tcp://a:1", deadline).unwrap();

        let waiter = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(5);
                pool.checkout("tcp://a:1", deadline).map(|c| c.is_some())
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        pool.give_back("tcp://a:1", PooledConnection::fresh(test_connection()));

        // The unblocked waiter gets the parked connection back.
        assert!(waiter.join().unwrap().unwrap());
    }

    #[test]
    fn returned_connection_is_reused() {
        let pool = pool(4);
        let deadline = Instant::now() + Duration::from_secs(1);
        pool.checkout("tcp://a:1", deadline).unwrap();
        pool.give_back("tcp://a:1", PooledConnection::fresh(test_connection()));
        assert_eq!(pool.idle_count("tcp://a:1"), 1);

        let reused = pool.checkout("tcp://a:1", deadline).unwrap();
        assert!(reused.is_some());
        assert_eq!(pool.idle_count("tcp://a:1"), 0);
    }

    #[test]
    fn idle_expiry_drops_parked_connections() {
        let pool = ConnectionPool::new(PoolSettings {
            idle_timeout: Duration::ZERO,
            ..PoolSettings::default()
        });
        let deadline = Instant::now() + Duration::from_secs(1);
        pool.checkout("tcp://a:1", deadline).unwrap();
        pool.give_back("tcp://a:1", PooledConnection::fresh(test_connection()));

        let reused = pool.checkout("tcp://a:1", deadline).unwrap();
        assert!(reused.is_none());
        assert_eq!(pool.idle_count("tcp://a:1"), 0);
    }

    #[test]
    fn discard_releases_capacity_without_parking() {
        let pool = pool(1);
        let deadline = Instant::now() + Duration::from_secs(1);
        pool.checkout("tcp://a:1", deadline).unwrap();
        pool.discard("tcp://a:1");
        assert_eq!(pool.idle_count("tcp://a:1"), 0);
        // Slot is free again.
        pool.checkout("tcp://a:1", deadline).unwrap();
    }
}
