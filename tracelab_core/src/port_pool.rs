//! Shared pool of local proxy ports.
//!
//! One [`PortPool`] is built by the binary and handed to every capture behind an
//! `Arc`. All state lives behind a single mutex; waiting for a free port happens
//! outside the lock with exponential backoff, bounded by a caller-supplied
//! deadline and cancellation token.
use crate::error::{CoreError, CoreErrorKind};
use log::{debug, warn};
use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 7890..=8010;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 1.75;

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct PortPoolState {
    available: BTreeSet<u16>,
    allocated: HashSet<u16>,
}

#[derive(Debug)]
pub struct PortPool {
    state: Mutex<PortPoolState>,
    initial_backoff: Duration,
    backoff_multiplier: f64,
}

impl Default for PortPool {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl PortPool {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self::with_backoff(range, DEFAULT_INITIAL_BACKOFF, DEFAULT_BACKOFF_MULTIPLIER)
    }

    pub fn with_backoff(
        range: RangeInclusive<u16>,
        initial_backoff: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            state: Mutex::new(PortPoolState {
                available: range.collect(),
                allocated: HashSet::new(),
            }),
            initial_backoff,
            backoff_multiplier: backoff_multiplier.max(1.0),
        }
    }

    /// Takes the lowest free port without waiting.
    pub fn try_acquire(&self) -> Result<Option<u16>, CoreError> {
        let mut state = self.state.lock()?;
        let Some(port) = state.available.pop_first() else {
            return Ok(None);
        };
        state.allocated.insert(port);
        debug!("Port {port} allocated");
        Ok(Some(port))
    }

    /// Blocks until a port is free, the deadline passes or `cancel` fires.
    pub fn acquire(
        &self,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<u16, CoreError> {
        let mut backoff = self.initial_backoff;
        loop {
            if let Some(port) = self.try_acquire()? {
                return Ok(port);
            }
            let mut wait = backoff;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(CoreError::new(
                        CoreErrorKind::PortPoolTimeout,
                        "no port became available before the deadline",
                    ));
                }
                wait = wait.min(remaining);
            }
            warn!("Port pool exhausted, retrying in {:?}", wait);
            wait_or_cancel(wait, cancel)?;
            backoff = backoff.mul_f64(self.backoff_multiplier);
        }
    }

    pub fn release(&self, port: u16) -> Result<(), CoreError> {
        let mut state = self.state.lock()?;
        if !state.allocated.remove(&port) {
            return Err(CoreError::new(
                CoreErrorKind::UnallocatedPort,
                format!("port {port} is not allocated").as_str(),
            ));
        }
        state.available.insert(port);
        debug!("Port {port} released");
        Ok(())
    }

    pub fn available(&self) -> Result<usize, CoreError> {
        Ok(self.state.lock()?.available.len())
    }

    pub fn allocated(&self) -> Result<usize, CoreError> {
        Ok(self.state.lock()?.allocated.len())
    }
}

fn wait_or_cancel(wait: Duration, cancel: &CancellationToken) -> Result<(), CoreError> {
    let until = Instant::now() + wait;
    loop {
        if cancel.is_cancelled() {
            return Err(CoreError::new(
                CoreErrorKind::Cancelled,
                "port acquisition cancelled",
            ));
        }
        let remaining = until.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(());
        }
        std::thread::sleep(remaining.min(CANCEL_CHECK_INTERVAL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn small_pool() -> PortPool {
        PortPool::with_backoff(7890..=7891, Duration::from_millis(10), 1.75)
    }

    #[test]
    fn test_sequential_acquire_distinct() {
        let pool = small_pool();
        let token = CancellationToken::new();
        let a = pool.acquire(None, &token).unwrap();
        let b = pool.acquire(None, &token).unwrap();
        assert_ne!(a, b);
        assert!([7890, 7891].contains(&a));
        assert!([7890, 7891].contains(&b));
        assert_eq!(pool.available().unwrap(), 0);
        assert_eq!(pool.allocated().unwrap(), 2);
    }

    #[test]
    fn test_third_acquire_blocks_until_release() {
        let pool = Arc::new(small_pool());
        let token = CancellationToken::new();
        let a = pool.acquire(None, &token).unwrap();
        let _b = pool.acquire(None, &token).unwrap();

        let pool_local = pool.clone();
        let token_local = token.clone();
        let waiter = thread::spawn(move || {
            pool_local.acquire(Some(Instant::now() + Duration::from_secs(5)), &token_local)
        });
        thread::sleep(Duration::from_millis(150));
        assert!(!waiter.is_finished());
        pool.release(a).unwrap();
        let c = waiter.join().unwrap().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_release_unallocated_fails() {
        let pool = small_pool();
        let err = pool.release(7890).unwrap_err();
        assert!(matches!(err.error_kind, CoreErrorKind::UnallocatedPort));
        let err = pool.release(9999).unwrap_err();
        assert!(matches!(err.error_kind, CoreErrorKind::UnallocatedPort));
    }

    #[test]
    fn test_acquire_release_returns_to_available() {
        let pool = small_pool();
        let token = CancellationToken::new();
        let port = pool.acquire(None, &token).unwrap();
        pool.release(port).unwrap();
        assert_eq!(pool.available().unwrap(), 2);
        assert!(pool.release(port).is_err());
    }

    #[test]
    fn test_acquire_times_out() {
        let pool = small_pool();
        let token = CancellationToken::new();
        pool.acquire(None, &token).unwrap();
        pool.acquire(None, &token).unwrap();
        let err = pool
            .acquire(Some(Instant::now() + Duration::from_millis(60)), &token)
            .unwrap_err();
        assert!(matches!(err.error_kind, CoreErrorKind::PortPoolTimeout));
    }

    #[test]
    fn test_acquire_cancelled() {
        let pool = PortPool::with_backoff(7890..=7890, Duration::from_secs(10), 2.0);
        let token = CancellationToken::new();
        pool.acquire(None, &token).unwrap();
        let token_local = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token_local.cancel();
        });
        let err = pool.acquire(None, &token).unwrap_err();
        canceller.join().unwrap();
        assert!(matches!(err.error_kind, CoreErrorKind::Cancelled));
    }

    #[test]
    fn test_concurrent_acquire_never_duplicates() {
        let pool = Arc::new(PortPool::with_backoff(
            7890..=7893,
            Duration::from_millis(5),
            1.5,
        ));
        let held = Arc::new(Mutex::new(HashSet::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let held = held.clone();
            handles.push(thread::spawn(move || {
                let token = CancellationToken::new();
                for _ in 0..20 {
                    let port = pool.acquire(None, &token).unwrap();
                    assert!(held.lock().unwrap().insert(port));
                    thread::sleep(Duration::from_millis(1));
                    assert!(held.lock().unwrap().remove(&port));
                    pool.release(port).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.available().unwrap(), 4);
    }
}
