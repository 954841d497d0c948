use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock `mutex`, taking the guard back even if a previous holder panicked.
pub(crate) fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lock two distinct mutexes in address order and hand the guards back in argument order.
///
/// Every caller that holds two queue locks at once goes through here, so two threads locking
/// the same pair from opposite sides always agree on which lock comes first.
pub(crate) fn lock_pair<'a, S>(
    first: &'a Mutex<S>,
    second: &'a Mutex<S>,
) -> (MutexGuard<'a, S>, MutexGuard<'a, S>) {
    assert!(
        !std::ptr::eq(first, second),
        "lock_pair called with the same mutex twice"
    );

    if lock_rank(first) < lock_rank(second) {
        let first_guard = lock(first);
        let second_guard = lock(second);
        (first_guard, second_guard)
    } else {
        let second_guard = lock(second);
        let first_guard = lock(first);
        (first_guard, second_guard)
    }
}

fn lock_rank<S>(mutex: &Mutex<S>) -> usize {
    mutex as *const Mutex<S> as usize
}
