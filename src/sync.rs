//! Channel-local concurrency primitives.
//!
//! The ticket lock is a monotonic ticket counter plus `next_serving`,
//! `Acquire`/`Release` ordering throughout. The completion waiter is a
//! spinning counter rather than a blocking semaphore, consistent with
//! every other suspension point in this driver family (`wait_until_ready`,
//! `wait_while_busy` are themselves polled spin loops).

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

/// A ticket spinlock providing mutually exclusive access to channel state.
///
/// Must not be held across any operation that may sleep or block — the
/// channel-command-issue critical section (§4.3 step 5–8) is the only
/// place this type is held across a register write, and that write never
/// blocks.
pub struct TicketLock<T: ?Sized> {
    next_ticket: AtomicUsize,
    next_serving: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for TicketLock<T> {}
unsafe impl<T: ?Sized + Send> Send for TicketLock<T> {}

pub struct TicketLockGuard<'a, T: ?Sized> {
    next_serving: &'a AtomicUsize,
    ticket: usize,
    data: &'a mut T,
}

unsafe impl<T: ?Sized + Sync> Sync for TicketLockGuard<'_, T> {}
unsafe impl<T: ?Sized + Send> Send for TicketLockGuard<'_, T> {}

impl<T> TicketLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            next_serving: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> TicketLock<T> {
    pub fn lock(&self) -> TicketLockGuard<'_, T> {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        while self.next_serving.load(Ordering::Acquire) != ticket {
            spin_loop();
        }
        TicketLockGuard {
            next_serving: &self.next_serving,
            ticket,
            data: unsafe { &mut *self.data.get() },
        }
    }

    pub fn try_lock(&self) -> Option<TicketLockGuard<'_, T>> {
        let result = self.next_ticket.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |ticket| {
                if self.next_serving.load(Ordering::Acquire) == ticket {
                    Some(ticket + 1)
                } else {
                    None
                }
            },
        );
        result.ok().map(|ticket| TicketLockGuard {
            next_serving: &self.next_serving,
            ticket,
            data: unsafe { &mut *self.data.get() },
        })
    }

    pub fn is_locked(&self) -> bool {
        self.next_ticket.load(Ordering::Relaxed) != self.next_serving.load(Ordering::Relaxed)
    }
}

impl<'a, T: ?Sized> Deref for TicketLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data
    }
}

impl<'a, T: ?Sized> DerefMut for TicketLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data
    }
}

impl<'a, T: ?Sized> Drop for TicketLockGuard<'a, T> {
    fn drop(&mut self) {
        self.next_serving.store(self.ticket + 1, Ordering::Release);
    }
}

/// Interrupt-to-waiter handoff. The interrupt handler calls [`post`], the
/// submitter/deferred context calls [`wait`]; both are spin-based so
/// neither requires an OS scheduler.
///
/// [`post`]: CompletionWaiter::post
/// [`wait`]: CompletionWaiter::wait
pub struct CompletionWaiter {
    count: AtomicI32,
}

impl CompletionWaiter {
    pub const fn new() -> Self {
        Self {
            count: AtomicI32::new(0),
        }
    }

    /// Signal one waiter. Called from interrupt context; must not block.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Spin until a signal is available, consuming one.
    ///
    /// `spin_budget` bounds the number of poll iterations before giving up
    /// (the caller is expected to combine this with a wall-clock timeout
    /// check between calls); returns `true` if a signal was consumed.
    pub fn wait(&self, spin_budget: u32) -> bool {
        for _ in 0..spin_budget {
            if self.try_wait() {
                return true;
            }
            spin_loop();
        }
        false
    }

    /// Non-blocking poll; consumes a pending signal if one exists.
    pub fn try_wait(&self) -> bool {
        let mut cur = self.count.load(Ordering::Acquire);
        while cur > 0 {
            match self.count.compare_exchange_weak(
                cur,
                cur - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
        false
    }
}

impl Default for CompletionWaiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Abstracts the monotonic time source used to check suspension-point
/// deadlines (§5), so tests can supply a fake clock instead of wall time.
pub trait Clock {
    /// Opaque monotonic instant.
    type Instant: Copy;

    fn now(&self) -> Self::Instant;
    fn elapsed_millis(&self, since: Self::Instant) -> u64;
}

#[cfg(test)]
pub mod test_clock {
    use super::Clock;
    use core::cell::Cell;

    /// A clock that advances only when [`TestClock::advance`] is called,
    /// for deterministic timeout tests.
    pub struct TestClock {
        now_ms: Cell<u64>,
    }

    impl TestClock {
        pub fn new() -> Self {
            Self { now_ms: Cell::new(0) }
        }

        pub fn advance(&self, ms: u64) {
            self.now_ms.set(self.now_ms.get() + ms);
        }
    }

    impl Clock for TestClock {
        type Instant = u64;

        fn now(&self) -> u64 {
            self.now_ms.get()
        }

        fn elapsed_millis(&self, since: u64) -> u64 {
            self.now_ms.get().saturating_sub(since)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_lock_basic() {
        let lock = TicketLock::new(0u32);
        *lock.lock() = 5;
        assert_eq!(*lock.lock(), 5);
    }

    #[test]
    fn ticket_lock_fifo_order_under_contention() {
        extern crate std;
        use std::sync::Arc;
        use std::thread;
        use std::vec::Vec;

        let lock = Arc::new(TicketLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    *lock.lock() += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 8000);
    }

    #[test]
    fn completion_waiter_post_then_wait() {
        let w = CompletionWaiter::new();
        assert!(!w.try_wait());
        w.post();
        assert!(w.wait(10));
        assert!(!w.try_wait());
    }

    #[test]
    fn completion_waiter_multiple_posts_are_counted() {
        let w = CompletionWaiter::new();
        w.post();
        w.post();
        assert!(w.try_wait());
        assert!(w.try_wait());
        assert!(!w.try_wait());
    }

    #[test]
    fn test_clock_advances_deterministically() {
        let clock = test_clock::TestClock::new();
        let t0 = clock.now();
        clock.advance(42);
        assert_eq!(clock.elapsed_millis(t0), 42);
    }
}
