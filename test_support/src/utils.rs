// Common utilities for tests, benches and demos

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const MESSAGE_PREFIX: &str = "hello-";

pub fn format_message(id: u32) -> String {
    format!("{MESSAGE_PREFIX}{id}")
}

pub fn parse_message(message: &str) -> u32 {
    let id_str = message
        .strip_prefix(MESSAGE_PREFIX)
        .unwrap_or_else(|| panic!("bad message: {message}"));
    id_str
        .parse()
        .unwrap_or_else(|e| panic!("bad message: {message}, err: {e:?}"))
}

/// Spin, then yield, then sleep, depending on how many times in a row we've come up empty.
pub fn backoff(pow: &mut u32) {
    if *pow < 6 {
        for _ in 0..(1 << *pow) {
            std::hint::spin_loop();
        }
    } else if *pow < 10 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_micros(50));
    }

    *pow = (*pow + 1).min(10);
}

pub fn check_deadline(deadline: Instant, timeout: Duration) {
    if Instant::now() > deadline {
        panic!("test timed out after {timeout:?}");
    }
}

/// Block until another thread raises `flag`, failing the test after `timeout`.
pub fn wait_for_flag(flag: &AtomicBool, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    let mut backoff_pow = 0;
    while !flag.load(Ordering::Acquire) {
        check_deadline(deadline, timeout);
        backoff(&mut backoff_pow);
    }
}

/// Queue element that counts its clones and can be armed to panic on the next clone.
#[derive(Debug)]
pub struct TrackedItem {
    pub id: u32,
    clones: Arc<AtomicUsize>,
    panic_after: Option<usize>,
}

impl TrackedItem {
    pub fn new(id: u32, clones: &Arc<AtomicUsize>) -> TrackedItem {
        TrackedItem {
            id,
            clones: Arc::clone(clones),
            panic_after: None,
        }
    }

    /// Panic once the shared clone counter has reached `clone_count`.
    pub fn panicking_after(id: u32, clones: &Arc<AtomicUsize>, clone_count: usize) -> TrackedItem {
        TrackedItem {
            id,
            clones: Arc::clone(clones),
            panic_after: Some(clone_count),
        }
    }
}

impl Clone for TrackedItem {
    fn clone(&self) -> Self {
        let seen = self.clones.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.panic_after {
            if seen >= limit {
                panic!("clone of item {} refused", self.id);
            }
        }

        TrackedItem {
            id: self.id,
            clones: Arc::clone(&self.clones),
            panic_after: self.panic_after,
        }
    }
}

impl PartialEq for TrackedItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Queue element whose destructor panics when armed. Clones are never armed.
#[derive(Debug)]
pub struct DropPanicItem {
    pub id: u32,
    armed: bool,
}

impl DropPanicItem {
    pub fn new(id: u32) -> DropPanicItem {
        DropPanicItem { id, armed: false }
    }

    pub fn armed(id: u32) -> DropPanicItem {
        DropPanicItem { id, armed: true }
    }
}

impl Clone for DropPanicItem {
    fn clone(&self) -> Self {
        DropPanicItem::new(self.id)
    }
}

impl PartialEq for DropPanicItem {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Drop for DropPanicItem {
    fn drop(&mut self) {
        // a second panic while unwinding would abort the test binary
        if self.armed && !std::thread::panicking() {
            panic!("drop of item {} refused", self.id);
        }
    }
}
