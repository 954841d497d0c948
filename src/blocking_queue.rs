use std::{
    collections::VecDeque,
    fmt,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tracing::trace;

use crate::utils::{lock, lock_pair};
use crate::{BBQueueError, BBQueuePushError};

/// Capacity used by [`BBQueue::unbounded`]: the queue never reports itself full.
pub const BBQUEUE_UNBOUNDED: usize = usize::MAX;

struct BBQueueState<T> {
    elements: VecDeque<T>,
    capacity: usize,
}

impl<T> BBQueueState<T> {
    fn is_full(&self) -> bool {
        self.elements.len() >= self.capacity
    }
}

/// Bounded FIFO queue backed by a Mutex and a single CondVar.
///
/// Producers block in [`push`](Self::push) while the queue is full and consumers block in
/// [`pop`](Self::pop) while it is empty. Both sides sleep on the same condition variable;
/// waiters are only woken when the queue leaves the empty or the full state, and every
/// waiter re-checks its predicate after waking, so spurious and out-of-order wakeups never
/// reorder or lose elements.
///
/// The queue is shared between threads by reference (`&BBQueue`, usually through an `Arc`
/// or a scoped thread). A blocked thread holds such a reference for as long as it waits, so
/// the queue cannot be dropped out from under a waiter.
///
/// Operations that touch two queues at once ([`copy_from`](Self::copy_from),
/// [`move_from`](Self::move_from)) always take the two locks in a fixed global order, so two
/// queues copied into each other from different threads cannot deadlock.
pub struct BBQueue<T> {
    state: Mutex<BBQueueState<T>>,
    condvar: Condvar,
}

impl<T> BBQueue<T> {
    /// Create an empty queue holding at most `capacity` elements.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of queued elements. Use [`BBQUEUE_UNBOUNDED`] (or
    ///   [`unbounded`](Self::unbounded)) for a queue that never blocks producers.
    ///
    /// # Returns
    /// `Ok(BBQueue)` for any non-zero capacity.
    ///
    /// # Errors
    /// `BBQueueError::InvalidArgs` when `capacity` is zero, since every push would block forever.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::{BBQueue, BBQueueError};
    ///
    /// let queue = BBQueue::<u32>::new(4).unwrap();
    /// assert_eq!(queue.capacity(), 4);
    /// assert!(queue.is_empty());
    ///
    /// assert_eq!(BBQueue::<u32>::new(0).unwrap_err(), BBQueueError::InvalidArgs);
    /// ```
    pub fn new(capacity: usize) -> Result<BBQueue<T>, BBQueueError> {
        if capacity == 0 {
            return Err(BBQueueError::InvalidArgs);
        }

        Ok(BBQueue::from_parts(VecDeque::new(), capacity))
    }

    /// Create an empty queue with no practical bound.
    pub fn unbounded() -> BBQueue<T> {
        BBQueue::from_parts(VecDeque::new(), BBQUEUE_UNBOUNDED)
    }

    fn from_parts(elements: VecDeque<T>, capacity: usize) -> BBQueue<T> {
        debug_assert!(elements.len() <= capacity);
        BBQueue {
            state: Mutex::new(BBQueueState { elements, capacity }),
            condvar: Condvar::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BBQueueState<T>> {
        lock(&self.state)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, BBQueueState<T>>) -> MutexGuard<'a, BBQueueState<T>> {
        self.condvar
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, BBQueueState<T>>,
        timeout: Duration,
    ) -> MutexGuard<'a, BBQueueState<T>> {
        let (guard, _timeout_result) = self
            .condvar
            .wait_timeout(guard, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        guard
    }

    /// Check whether the queue currently holds no elements.
    ///
    /// Blocks only while another thread holds the queue lock; never waits for data.
    pub fn is_empty(&self) -> bool {
        self.lock_state().elements.is_empty()
    }

    /// Check whether the queue is currently at capacity.
    pub fn is_full(&self) -> bool {
        self.lock_state().is_full()
    }

    /// Number of queued elements at the moment of the call.
    pub fn len(&self) -> usize {
        self.lock_state().elements.len()
    }

    /// The configured bound.
    pub fn capacity(&self) -> usize {
        self.lock_state().capacity
    }

    /// Append `value` at the tail, blocking while the queue is full.
    ///
    /// Wakes waiting consumers when the queue goes from empty to non-empty.
    ///
    /// # Arguments
    /// * `value` - Element to enqueue.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::BBQueue;
    ///
    /// let queue = BBQueue::new(2).unwrap();
    /// queue.push("a");
    /// queue.push("b");
    /// assert!(queue.is_full());
    /// ```
    pub fn push(&self, value: T) {
        let mut state = self.lock_state();
        if state.is_full() {
            trace!(capacity = state.capacity, "queue full, producer waiting");
            while state.is_full() {
                state = self.wait(state);
            }
        }

        self.push_locked(&mut state, value);
    }

    /// Append `value` at the tail only if there is room right now.
    ///
    /// # Arguments
    /// * `value` - Element to enqueue.
    ///
    /// # Returns
    /// `Ok(())` once the element is queued.
    ///
    /// # Errors
    /// `BBQueuePushError::OutOfSpace(value)` when the queue is at capacity. The value is handed
    /// back untouched and the queue is unchanged.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::{BBQueue, BBQueuePushError};
    ///
    /// let queue = BBQueue::new(1).unwrap();
    /// assert!(queue.try_push('A').is_ok());
    /// assert_eq!(queue.try_push('B'), Err(BBQueuePushError::OutOfSpace('B')));
    /// ```
    pub fn try_push(&self, value: T) -> Result<(), BBQueuePushError<T>> {
        let mut state = self.lock_state();
        if state.is_full() {
            return Err(BBQueuePushError::OutOfSpace(value));
        }

        self.push_locked(&mut state, value);
        Ok(())
    }

    /// Append `value` at the tail, waiting at most `timeout` for room.
    ///
    /// The deadline is fixed when the call starts; wakeups that find the queue still full do not
    /// extend it.
    ///
    /// # Arguments
    /// * `value` - Element to enqueue.
    /// * `timeout` - Maximum time to wait for space.
    ///
    /// # Errors
    /// `BBQueuePushError::Timeout(value)` when no room appeared before the deadline.
    pub fn timed_wait_push(&self, value: T, timeout: Duration) -> Result<(), BBQueuePushError<T>> {
        let start_time = Instant::now();
        let mut state = self.lock_state();
        while state.is_full() {
            let remaining_timeout = match timeout.checked_sub(start_time.elapsed()) {
                Some(t) if !t.is_zero() => t,
                _ => {
                    trace!(?timeout, "timed out waiting for queue capacity");
                    return Err(BBQueuePushError::Timeout(value));
                }
            };

            state = self.wait_timeout(state, remaining_timeout);
        }

        self.push_locked(&mut state, value);
        Ok(())
    }

    fn push_locked(&self, state: &mut BBQueueState<T>, value: T) {
        debug_assert!(!state.is_full());
        let was_empty = state.elements.is_empty();
        state.elements.push_back(value);

        if was_empty {
            self.condvar.notify_all();
        }
    }

    /// Remove and return the head element, blocking while the queue is empty.
    ///
    /// Wakes waiting producers when the queue goes from full to non-full.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use yep_bbq::BBQueue;
    ///
    /// let queue = Arc::new(BBQueue::new(1).unwrap());
    /// let producer = {
    ///     let queue = Arc::clone(&queue);
    ///     std::thread::spawn(move || {
    ///         queue.push(1);
    ///         queue.push(2);
    ///     })
    /// };
    ///
    /// assert_eq!(queue.pop(), 1);
    /// assert_eq!(queue.pop(), 2);
    /// producer.join().unwrap();
    /// ```
    pub fn pop(&self) -> T {
        let mut state = self.lock_state();
        loop {
            if let Some(value) = self.pop_locked(&mut state) {
                return value;
            }

            trace!("queue empty, consumer waiting");
            state = self.wait(state);
        }
    }

    /// Remove and return the head element only if one is available right now.
    ///
    /// # Returns
    /// `Ok` with the head element.
    ///
    /// # Errors
    /// `BBQueueError::EmptyQueue` when there is nothing to remove.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::{BBQueue, BBQueueError};
    ///
    /// let queue = BBQueue::unbounded();
    /// assert_eq!(queue.try_pop(), Err(BBQueueError::EmptyQueue));
    /// queue.push(3);
    /// assert_eq!(queue.try_pop(), Ok(3));
    /// ```
    pub fn try_pop(&self) -> Result<T, BBQueueError> {
        let mut state = self.lock_state();
        self.pop_locked(&mut state).ok_or(BBQueueError::EmptyQueue)
    }

    /// Remove and return the head element, waiting at most `timeout` for one to arrive.
    ///
    /// The deadline is measured from the start of the call and is not reset by wakeups that
    /// find the queue still empty.
    ///
    /// # Arguments
    /// * `timeout` - Maximum time to wait for data.
    ///
    /// # Returns
    /// `Ok` with the head element as soon as one is available.
    ///
    /// # Errors
    /// `BBQueueError::Timeout` when the queue stayed empty for the whole timeout. Nothing is
    /// removed in that case.
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use yep_bbq::{BBQueue, BBQueueError};
    ///
    /// let queue = BBQueue::<u8>::new(4).unwrap();
    /// let timeout = Duration::from_millis(1);
    /// assert_eq!(queue.timed_wait_pop(timeout), Err(BBQueueError::Timeout));
    ///
    /// queue.push(9);
    /// assert_eq!(queue.timed_wait_pop(timeout), Ok(9));
    /// ```
    pub fn timed_wait_pop(&self, timeout: Duration) -> Result<T, BBQueueError> {
        let start_time = Instant::now();
        let mut state = self.lock_state();
        while state.elements.is_empty() {
            // Recalculate remaining timeout before each wait
            let remaining_timeout = match timeout.checked_sub(start_time.elapsed()) {
                Some(t) if !t.is_zero() => t,
                _ => {
                    trace!(?timeout, "timed out waiting for queue data");
                    return Err(BBQueueError::Timeout);
                }
            };

            state = self.wait_timeout(state, remaining_timeout);
        }

        self.pop_locked(&mut state).ok_or(BBQueueError::Timeout)
    }

    fn pop_locked(&self, state: &mut BBQueueState<T>) -> Option<T> {
        let was_full = state.is_full();
        let value = state.elements.pop_front()?;

        if was_full {
            self.condvar.notify_all();
        }
        Some(value)
    }

    /// Remove every queued element at once, in FIFO order.
    ///
    /// Wakes waiting producers if the queue was full.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.lock_state();
        let was_full = state.is_full();
        let drained: Vec<T> = state.elements.drain(..).collect();

        if was_full && !drained.is_empty() {
            self.condvar.notify_all();
        }
        drained
    }

    /// Consume the queue and return its elements in FIFO order.
    pub fn into_inner(self) -> VecDeque<T> {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .elements
    }

    /// Move the contents and capacity of `src` into a new queue, leaving `src` empty.
    ///
    /// `src` keeps its own capacity and stays usable; producers blocked on a full `src` are woken.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::BBQueue;
    ///
    /// let src = BBQueue::new(3).unwrap();
    /// src.push(1);
    /// src.push(2);
    ///
    /// let dst = BBQueue::take_from(&src);
    /// assert!(src.is_empty());
    /// assert_eq!(dst.capacity(), 3);
    /// assert_eq!(dst.into_inner(), [1, 2]);
    /// ```
    pub fn take_from(src: &BBQueue<T>) -> BBQueue<T> {
        let mut src_state = src.lock_state();
        let src_was_full = src_state.is_full();
        let elements = std::mem::take(&mut src_state.elements);
        let capacity = src_state.capacity;

        if src_was_full {
            src.condvar.notify_all();
        }
        drop(src_state);

        trace!(len = elements.len(), capacity, "moved queue contents into new queue");
        BBQueue::from_parts(elements, capacity)
    }

    /// Replace this queue's contents and capacity with those of `src`, leaving `src` empty.
    ///
    /// Both locks are held for the whole transfer, so no concurrent push or pop on either queue
    /// can interleave with it. Waiters on this queue are woken if it went from empty to
    /// non-empty or from full to non-full; producers blocked on a full `src` are woken as well.
    /// Moving a queue into itself leaves it unchanged.
    ///
    /// # Arguments
    /// * `src` - Queue whose elements and capacity are transferred.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::BBQueue;
    ///
    /// let src = BBQueue::new(2).unwrap();
    /// src.push('x');
    /// let dst = BBQueue::unbounded();
    /// dst.push('o');
    ///
    /// dst.move_from(&src);
    /// assert!(src.is_empty());
    /// assert_eq!(dst.capacity(), 2);
    /// assert_eq!(dst.try_pop(), Ok('x'));
    /// ```
    pub fn move_from(&self, src: &BBQueue<T>) {
        if std::ptr::eq(self, src) {
            return;
        }

        let (mut dst_state, mut src_state) = lock_pair(&self.state, &src.state);
        let src_was_full = src_state.is_full();
        let elements = std::mem::take(&mut src_state.elements);
        let capacity = src_state.capacity;

        if src_was_full {
            src.condvar.notify_all();
        }

        let (displaced, woke) = self.replace_locked(&mut dst_state, elements, capacity);
        trace!(
            len = dst_state.elements.len(),
            capacity,
            woke,
            "moved queue contents"
        );

        // old elements run their destructors outside both locks
        drop(dst_state);
        drop(src_state);
        drop(displaced);
    }

    /// Swap in a new element buffer and capacity, waking waiters whose predicate may now hold.
    ///
    /// Returns the displaced buffer and whether waiters were notified. The displaced elements
    /// must be dropped by the caller once the locks are released: their `Drop` may panic, and
    /// nothing here may unwind between the buffer swap and the capacity update.
    fn replace_locked(
        &self,
        state: &mut BBQueueState<T>,
        elements: VecDeque<T>,
        capacity: usize,
    ) -> (VecDeque<T>, bool) {
        let was_empty = state.elements.is_empty();
        let was_full = state.is_full();

        let displaced = std::mem::replace(&mut state.elements, elements);
        state.capacity = capacity;

        let wake = (was_empty && !state.elements.is_empty()) || (was_full && !state.is_full());
        if wake {
            self.condvar.notify_all();
        }
        (displaced, wake)
    }
}

impl<T: Clone> BBQueue<T> {
    /// Replace this queue's contents and capacity with a copy of `src`.
    ///
    /// The copy reflects `src` at a single instant: both locks are held while it is taken, in
    /// a fixed global order so that two queues copied into each other from different threads
    /// cannot deadlock. Copying a queue into itself leaves it unchanged.
    ///
    /// The elements are cloned before this queue is touched. If a clone panics the panic
    /// propagates and this queue keeps its previous contents; both queues stay usable.
    ///
    /// Waiters on this queue are woken if it went from empty to non-empty or from full to
    /// non-full.
    ///
    /// WARNING: the whole copy runs under both locks and blocks pushes and pops on both
    /// queues until it completes.
    ///
    /// # Arguments
    /// * `src` - Queue to copy from. It is not modified.
    ///
    /// # Examples
    /// ```
    /// use yep_bbq::BBQueue;
    ///
    /// let a = BBQueue::new(4).unwrap();
    /// a.push(1);
    /// a.push(2);
    /// let b = BBQueue::unbounded();
    ///
    /// b.copy_from(&a);
    /// assert_eq!(a.len(), 2);
    /// assert_eq!(b.capacity(), 4);
    /// assert_eq!(b.drain(), vec![1, 2]);
    /// ```
    pub fn copy_from(&self, src: &BBQueue<T>) {
        if std::ptr::eq(self, src) {
            return;
        }

        let (mut dst_state, src_state) = lock_pair(&self.state, &src.state);
        let elements = src_state.elements.clone();
        let capacity = src_state.capacity;

        let (displaced, woke) = self.replace_locked(&mut dst_state, elements, capacity);
        trace!(
            len = dst_state.elements.len(),
            capacity,
            woke,
            "copied queue contents"
        );

        // old elements run their destructors outside both locks
        drop(dst_state);
        drop(src_state);
        drop(displaced);
    }
}

impl<T> Default for BBQueue<T> {
    fn default() -> Self {
        BBQueue::unbounded()
    }
}

impl<T: Clone> Clone for BBQueue<T> {
    /// Snapshot the queue into an independent one with the same capacity.
    ///
    /// Only the source lock is taken; the new queue has no waiters yet.
    fn clone(&self) -> Self {
        let state = self.lock_state();
        BBQueue::from_parts(state.elements.clone(), state.capacity)
    }

    fn clone_from(&mut self, source: &Self) {
        self.copy_from(source);
    }
}

impl<T> fmt::Debug for BBQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("BBQueue")
            .field("len", &state.elements.len())
            .field("capacity", &state.capacity)
            .finish()
    }
}
