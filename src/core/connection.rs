//! Per-connection context and the per-service online counter.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Unique connection identifier
pub type ConnectionId = u64;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Diagnostic context owned by the task handling one connection
#[derive(Debug)]
pub struct ConnContext {
    id: ConnectionId,
    peer: SocketAddr,
    tags: Vec<(&'static str, String)>,
}

impl ConnContext {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            tags: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Attach a tag; the first value written for a key wins
    pub fn tag(&mut self, key: &'static str, value: impl Into<String>) {
        if self.get(key).is_none() {
            self.tags.push((key, value.into()));
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ConnContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[#{} {}", self.id, self.peer)?;
        for (k, v) in &self.tags {
            write!(f, " {}={}", k, v)?;
        }
        f.write_str("]")
    }
}

/// Admitted players of one service
#[derive(Debug, Default)]
pub struct OnlineCounter {
    count: AtomicUsize,
}

impl OnlineCounter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Count one more player, refusing if `cap` is set and already reached
    ///
    /// The returned guard gives the slot back when dropped.
    pub fn try_acquire(self: &Arc<Self>, cap: Option<usize>) -> Option<OnlineGuard> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match cap {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .ok()?;
        Some(OnlineGuard {
            counter: Arc::clone(self),
        })
    }
}

/// One admitted player; decrements the counter exactly once on drop
#[derive(Debug)]
pub struct OnlineGuard {
    counter: Arc<OnlineCounter>,
}

impl Drop for OnlineGuard {
    fn drop(&mut self) {
        self.counter.count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_context_ids_are_unique() {
        let a = ConnContext::new(peer());
        let b = ConnContext::new(peer());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_context_tags_write_once() {
        let mut ctx = ConnContext::new(peer());
        ctx.tag("player", "Alex");
        ctx.tag("player", "Steve");
        assert_eq!(ctx.get("player"), Some("Alex"));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn test_context_display() {
        let mut ctx = ConnContext::new(peer());
        ctx.tag("player", "Alex");
        let shown = ctx.to_string();
        assert!(shown.starts_with(&format!("[#{} 127.0.0.1:50000", ctx.id())));
        assert!(shown.ends_with(" player=Alex]"));
    }

    #[test]
    fn test_guard_releases_slot() {
        let counter = OnlineCounter::new();
        let guard = counter.try_acquire(None).unwrap();
        assert_eq!(counter.current(), 1);
        drop(guard);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_cap_refuses_when_full() {
        let counter = OnlineCounter::new();
        let first = counter.try_acquire(Some(2)).unwrap();
        let _second = counter.try_acquire(Some(2)).unwrap();
        assert!(counter.try_acquire(Some(2)).is_none());
        assert_eq!(counter.current(), 2);

        drop(first);
        assert!(counter.try_acquire(Some(2)).is_some());
    }

    #[test]
    fn test_zero_cap_refuses_everyone() {
        let counter = OnlineCounter::new();
        assert!(counter.try_acquire(Some(0)).is_none());
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_cap() {
        let counter = OnlineCounter::new();
        let num_threads = 16;
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut handles = vec![];

        for _ in 0..num_threads {
            let counter = Arc::clone(&counter);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                counter.try_acquire(Some(5))
            }));
        }

        let guards: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(guards.len(), 5);
        assert_eq!(counter.current(), 5);

        drop(guards);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let counter = OnlineCounter::new();
        let c = Arc::clone(&counter);
        let res = thread::spawn(move || {
            let _guard = c.try_acquire(None).unwrap();
            panic!("connection task blew up");
        })
        .join();
        assert!(res.is_err());
        assert_eq!(counter.current(), 0);
    }
}
