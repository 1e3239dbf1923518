//! Indexing gate.
//!
//! A reentrant readers/writer gate. Indexing passes are readers and run
//! concurrently; definition administration is the writer and gets the gate
//! exclusively. Writers wait at most a bounded time and then fail with
//! [`DefinitionError::GateTimeout`]. Both roles are held through guards that
//! release on drop, including on error paths.
//!
//! Reentrancy is per thread: a thread holding either role may take further
//! slots of either role. A waiting writer blocks new readers from other
//! threads so it cannot be starved by a stream of short passes.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{DefinitionError, Result};

#[derive(Debug, Default)]
struct GateState {
    /// Owning thread and nesting depth.
    writer: Option<(ThreadId, usize)>,
    /// Reader nesting depth per thread.
    readers: HashMap<ThreadId, usize>,
    waiting_writers: usize,
}

impl GateState {
    fn writer_is(&self, thread: ThreadId) -> bool {
        matches!(self.writer, Some((owner, _)) if owner == thread)
    }

    fn read_by_others(&self, thread: ThreadId) -> bool {
        self.readers.keys().any(|reader| *reader != thread)
    }

    fn writable_by(&self, thread: ThreadId) -> bool {
        self.writer.is_none() && !self.read_by_others(thread)
    }
}

#[derive(Debug)]
pub struct IndexingGate {
    state: Mutex<GateState>,
    changed: Condvar,
    active_passes: AtomicU64,
    administration_timeout: Duration,
}

impl IndexingGate {
    pub fn new(administration_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            active_passes: AtomicU64::new(0),
            administration_timeout,
        }
    }

    pub fn administration_timeout(&self) -> Duration {
        self.administration_timeout
    }

    /// Starts an indexing pass, blocking while another thread administers.
    pub fn enter(&self) -> IndexingGuard<'_> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        loop {
            let reentrant = state.readers.contains_key(&me) || state.writer_is(me);
            if reentrant || (state.writer.is_none() && state.waiting_writers == 0) {
                break;
            }
            self.changed.wait(&mut state);
        }
        *state.readers.entry(me).or_insert(0) += 1;
        self.active_passes.fetch_add(1, Ordering::SeqCst);

        IndexingGuard {
            gate: self,
            _not_send: PhantomData,
        }
    }

    /// Takes the administration role with the configured timeout.
    pub fn administer(&self) -> Result<AdministrationGuard<'_>> {
        self.try_enter(self.administration_timeout)
    }

    /// Takes the administration role, failing after `timeout`.
    ///
    /// A thread that only holds reader slots itself may upgrade.
    pub fn try_enter(&self, timeout: Duration) -> Result<AdministrationGuard<'_>> {
        let me = thread::current().id();
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        if let Some((owner, depth)) = state.writer.as_mut() {
            if *owner == me {
                *depth += 1;
                return Ok(self.administration_guard());
            }
        }

        state.waiting_writers += 1;
        while !state.writable_by(me) {
            log::debug!(
                "Administration waiting for {} indexing pass(es)",
                self.active_passes.load(Ordering::Relaxed)
            );
            if self.changed.wait_until(&mut state, deadline).timed_out()
                && !state.writable_by(me)
            {
                state.waiting_writers -= 1;
                drop(state);
                // Readers held back by this writer may proceed.
                self.changed.notify_all();
                log::warn!(
                    "Gave up waiting {}ms for indexing to finish",
                    timeout.as_millis()
                );
                return Err(DefinitionError::GateTimeout { waited: timeout });
            }
        }
        state.waiting_writers -= 1;
        state.writer = Some((me, 1));

        Ok(self.administration_guard())
    }

    /// Lock-free check for diagnostics.
    pub fn is_indexing_active(&self) -> bool {
        self.active_passes() > 0
    }

    pub fn active_passes(&self) -> u64 {
        self.active_passes.load(Ordering::Acquire)
    }

    fn administration_guard(&self) -> AdministrationGuard<'_> {
        AdministrationGuard {
            gate: self,
            _not_send: PhantomData,
        }
    }

    fn exit_reader(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if let Some(depth) = state.readers.get_mut(&me) {
            *depth -= 1;
            if *depth == 0 {
                state.readers.remove(&me);
            }
        }
        self.active_passes.fetch_sub(1, Ordering::SeqCst);
        drop(state);
        self.changed.notify_all();
    }

    fn exit_writer(&self) {
        let mut state = self.state.lock();
        if let Some((_, depth)) = state.writer.as_mut() {
            *depth -= 1;
            if *depth == 0 {
                state.writer = None;
            }
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// Held for the duration of an indexing pass.
///
/// Not `Send`: slots are tracked per thread and must be released where taken.
#[derive(Debug)]
#[must_use = "the indexing pass ends when the guard is dropped"]
pub struct IndexingGuard<'a> {
    gate: &'a IndexingGate,
    _not_send: PhantomData<*const ()>,
}

impl IndexingGuard<'_> {
    pub fn exit(self) {}
}

impl Drop for IndexingGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_reader();
    }
}

/// Exclusive administration of definitions.
#[derive(Debug)]
#[must_use = "administration ends when the guard is dropped"]
pub struct AdministrationGuard<'a> {
    gate: &'a IndexingGate,
    _not_send: PhantomData<*const ()>,
}

impl AdministrationGuard<'_> {
    pub fn exit(self) {}
}

impl Drop for AdministrationGuard<'_> {
    fn drop(&mut self) {
        self.gate.exit_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn concurrent_passes_are_counted() {
        const PASSES: usize = 4;
        let gate = IndexingGate::new(SHORT);
        let held = Barrier::new(PASSES + 1);
        let release = Barrier::new(PASSES + 1);

        thread::scope(|scope| {
            for _ in 0..PASSES {
                scope.spawn(|| {
                    let _pass = gate.enter();
                    held.wait();
                    release.wait();
                });
            }
            held.wait();
            assert_eq!(gate.active_passes(), PASSES as u64);
            assert!(gate.is_indexing_active());

            let err = gate.try_enter(SHORT).expect_err("readers hold the gate");
            assert!(matches!(err, DefinitionError::GateTimeout { .. }));
            assert!(err.is_retryable());
            release.wait();
        });

        assert!(!gate.is_indexing_active());
        let _admin = gate.try_enter(SHORT).expect("gate is free");
    }

    #[test]
    fn writer_waits_for_passes_to_finish() {
        let gate = IndexingGate::new(Duration::from_secs(10));
        let held = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                let _pass = gate.enter();
                held.wait();
                thread::sleep(Duration::from_millis(30));
            });
            held.wait();
            let started = Instant::now();
            let _admin = gate.administer().expect("acquired after the pass ends");
            assert!(started.elapsed() >= Duration::from_millis(10));
            assert!(!gate.is_indexing_active());
        });
    }

    #[test]
    fn roles_are_reentrant_on_one_thread() {
        let gate = IndexingGate::new(SHORT);

        let pass = gate.enter();
        let nested_pass = gate.enter();
        let admin = gate.try_enter(SHORT).expect("upgrade from own reader slots");
        let nested_admin = gate.try_enter(SHORT).expect("nested writer");
        let pass_in_admin = gate.enter();

        drop(pass_in_admin);
        drop(nested_admin);
        drop(admin);
        nested_pass.exit();
        pass.exit();
        assert!(!gate.is_indexing_active());
    }

    #[test]
    fn readers_wait_while_writer_holds_the_gate() {
        let gate = IndexingGate::new(SHORT);
        let admin = gate.try_enter(SHORT).expect("admin");
        let entered = Barrier::new(2);

        thread::scope(|scope| {
            let reader = scope.spawn(|| {
                entered.wait();
                let _pass = gate.enter();
                gate.active_passes()
            });
            entered.wait();
            thread::sleep(Duration::from_millis(20));
            assert_eq!(gate.active_passes(), 0);
            drop(admin);
            assert_eq!(reader.join().expect("reader thread"), 1);
        });
    }

    #[test]
    fn timed_out_writer_releases_waiting_readers() {
        let gate = IndexingGate::new(SHORT);
        let held = Barrier::new(2);
        let release = Barrier::new(2);

        thread::scope(|scope| {
            scope.spawn(|| {
                let _pass = gate.enter();
                held.wait();
                release.wait();
            });
            held.wait();
            assert!(gate.administer().is_err());
            // A new pass is not held back by the abandoned writer.
            let second = gate.enter();
            assert_eq!(gate.active_passes(), 2);
            drop(second);
            release.wait();
        });
    }
}
