#[cfg(test)]
mod multi_thread_tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier, Mutex};
    use std::time::{Duration, Instant};

    use yep_bbq::{BBQueue, BBQueueError};

    use test_support::utils::{backoff, check_deadline, format_message, parse_message};

    #[test]
    /**
     * One producer and one consumer, both using the blocking calls on a small queue so
     * that each side has to sleep on the other many times. Order must be preserved.
     */
    fn simple_produce_consume_test() {
        let capacity = 4;
        let message_count: u32 = 10_000;

        let queue = BBQueue::<String>::new(capacity).unwrap();

        std::thread::scope(|s| {
            // consumer thread
            s.spawn(|| {
                for expected in 0..message_count {
                    let message = queue.pop();
                    assert_eq!(
                        parse_message(&message),
                        expected,
                        "consumed data does not match expected"
                    );
                }
            });

            // producer thread
            s.spawn(|| {
                for id in 0..message_count {
                    queue.push(format_message(id));
                }
            });
        });

        assert!(queue.is_empty());
    }

    #[test]
    /**
     * Multiple producers pushing disjoint ids and multiple consumers popping until the known
     * total is reached. Every id must be received exactly once.
     */
    fn multi_produce_consume_test() {
        let capacity = 16;
        let num_producers: u32 = 4;
        let num_consumers: u32 = 4;
        let per_producer: u32 = 2_500;
        let max_messages = num_producers * per_producer;
        let timeout = Duration::from_secs(30);

        let queue = BBQueue::<String>::new(capacity).unwrap();
        let consumed = AtomicU32::new(0);

        // keep track of received messages
        let received_ids = Mutex::new(HashSet::<u32>::new());
        let sent_ids = Mutex::new(HashSet::<u32>::new());

        let deadline = Instant::now() + timeout;
        std::thread::scope(|s| {
            // start consumers
            for i in 0..num_consumers {
                let builder = std::thread::Builder::new().name(format!("consumer_{i}"));
                let (queue, consumed, received_ids) = (&queue, &consumed, &received_ids);
                builder
                    .spawn_scoped(s, move || {
                        // claim a message before popping so consumers stop at the known total
                        while consumed.fetch_add(1, Ordering::AcqRel) < max_messages {
                            let message = queue.pop();
                            let id = parse_message(&message);
                            assert!(id < max_messages, "received id out of range: {id}");
                            // we should only ever insert unique values
                            assert!(
                                received_ids.lock().unwrap().insert(id),
                                "duplicate message received: {message}"
                            );
                            check_deadline(deadline, timeout);
                        }
                    })
                    .unwrap();
            }

            // start producers, each with its own disjoint id range
            for i in 0..num_producers {
                let builder = std::thread::Builder::new().name(format!("producer_{i}"));
                let (queue, sent_ids) = (&queue, &sent_ids);
                builder
                    .spawn_scoped(s, move || {
                        for id in (i * per_producer)..((i + 1) * per_producer) {
                            queue.push(format_message(id));
                            assert!(
                                sent_ids.lock().unwrap().insert(id),
                                "duplicate message sent: {id}"
                            );
                            check_deadline(deadline, timeout);
                        }
                    })
                    .unwrap();
            }
        });

        assert_eq!(sent_ids.lock().unwrap().len(), max_messages as usize);

        // make sure we got all the messages
        let received_ids = received_ids.lock().unwrap();
        assert_eq!(received_ids.len(), max_messages as usize);
        for i in 0..max_messages {
            assert!(received_ids.contains(&i), "missing received id: {i}");
        }
        assert!(queue.is_empty());
    }

    #[test]
    /**
     * Same accounting as above, but only through the non-blocking calls with backoff.
     * The queue must never report more than `capacity` elements.
     */
    fn try_push_try_pop_never_exceed_capacity() {
        let capacity = 8;
        let num_producers: u32 = 3;
        let num_consumers: u32 = 3;
        let per_producer: u32 = 2_000;
        let max_messages = num_producers * per_producer;
        let timeout = Duration::from_secs(30);

        let queue = BBQueue::new(capacity).unwrap();
        let received = AtomicU32::new(0);
        let received_ids = Mutex::new(HashSet::<u32>::new());

        let deadline = Instant::now() + timeout;
        std::thread::scope(|s| {
            for i in 0..num_consumers {
                let builder = std::thread::Builder::new().name(format!("consumer_{i}"));
                let (queue, received, received_ids) = (&queue, &received, &received_ids);
                builder
                    .spawn_scoped(s, move || {
                        let mut backoff_pow = 0;
                        while received.load(Ordering::Acquire) < max_messages {
                            assert!(queue.len() <= capacity);
                            match queue.try_pop() {
                                Ok(id) => {
                                    assert!(
                                        received_ids.lock().unwrap().insert(id),
                                        "duplicate id received: {id}"
                                    );
                                    received.fetch_add(1, Ordering::AcqRel);
                                    backoff_pow = 0;
                                }
                                Err(BBQueueError::EmptyQueue) => backoff(&mut backoff_pow),
                                Err(e) => panic!("unexpected error when consuming: {e:?}"),
                            }
                            check_deadline(deadline, timeout);
                        }
                    })
                    .unwrap();
            }

            for i in 0..num_producers {
                let builder = std::thread::Builder::new().name(format!("producer_{i}"));
                let queue = &queue;
                builder
                    .spawn_scoped(s, move || {
                        let mut backoff_pow = 0;
                        for id in (i * per_producer)..((i + 1) * per_producer) {
                            let mut value = id;
                            loop {
                                match queue.try_push(value) {
                                    Ok(()) => break,
                                    Err(err) => {
                                        assert!(err.is_out_of_space());
                                        value = err.into_inner();
                                        backoff(&mut backoff_pow);
                                    }
                                }
                                check_deadline(deadline, timeout);
                            }
                            backoff_pow = 0;
                        }
                    })
                    .unwrap();
            }
        });

        assert_eq!(received_ids.lock().unwrap().len(), max_messages as usize);
        assert!(queue.is_empty());
    }

    #[test]
    fn blocked_push_resumes_after_pop() {
        let queue = Arc::new(BBQueue::new(1).unwrap());
        queue.push(1);

        let producer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                queue.push(2);
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        // the producer must still be parked on the full queue
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.pop(), 1);
        producer.join().unwrap();
        assert_eq!(queue.pop(), 2);
    }

    #[test]
    fn timed_wait_pop_returns_promptly_when_data_arrives() {
        let queue = BBQueue::new(4).unwrap();
        let timeout = Duration::from_secs(10);
        let barrier = Barrier::new(2);

        std::thread::scope(|s| {
            s.spawn(|| {
                barrier.wait();
                std::thread::sleep(Duration::from_millis(20));
                queue.push(11u32);
            });

            barrier.wait();
            let start = Instant::now();
            assert_eq!(queue.timed_wait_pop(timeout), Ok(11));
            assert!(
                start.elapsed() < timeout / 2,
                "pop took {:?} after data was pushed",
                start.elapsed()
            );
        });
    }

    #[test]
    fn timed_wait_push_succeeds_once_room_appears() {
        let queue = BBQueue::new(1).unwrap();
        queue.push(0u32);

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                assert_eq!(queue.pop(), 0);
            });

            queue
                .timed_wait_push(1, Duration::from_secs(10))
                .expect("consumer frees a slot");
        });

        assert_eq!(queue.try_pop(), Ok(1));
    }

    #[test]
    /**
     * Many consumers parked on an empty queue, then exactly as many pushes. A single
     * condition variable is shared with producers, so every consumer must still be woken.
     */
    fn all_parked_consumers_are_woken() {
        let num_consumers = 8;
        let queue = BBQueue::new(2).unwrap();
        let received = Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for _ in 0..num_consumers {
                s.spawn(|| {
                    let value = queue.pop();
                    received.lock().unwrap().push(value);
                });
            }

            std::thread::sleep(Duration::from_millis(20));
            for i in 0..num_consumers {
                queue.push(i);
            }
        });

        let mut received = received.into_inner().unwrap();
        received.sort_unstable();
        assert_eq!(received, (0..num_consumers).collect::<Vec<_>>());
    }
}
