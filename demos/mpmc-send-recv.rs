//! A multi-producer, multi-consumer send-recv example using BBQueue
//!
//! Producers split the message ids between them and consumers pop until the total is reached.
//! Every id is checked off exactly once at the end.

use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use test_support::utils::{backoff, format_message, parse_message};
use tracing_subscriber::EnvFilter;
use yep_bbq::{BBQueue, BBQueueError};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A multi-producer, multi-consumer send-recv example using BBQueue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Queue depth (maximum number of queued messages)
    #[arg(short = 'd', long, default_value = "64")]
    queue_depth: usize,

    /// Total number of messages to send
    #[arg(short = 'n', long, default_value = "100000")]
    msg_count: u32,

    /// Timeout in seconds for producer/consumer loops
    #[arg(short = 't', long, default_value = "10")]
    timeout_secs: u64,

    /// Number of producer threads
    #[arg(short = 'p', long, default_value = "2")]
    producer_threads: u16,

    /// Number of consumer threads
    #[arg(short = 'c', long, default_value = "2")]
    consumer_threads: u16,

    /// Use try_push/try_pop with backoff instead of the blocking calls
    #[arg(long, default_value_t = false)]
    non_blocking: bool,

    /// Enable verbose logging (queue tracing events included)
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
}

fn warn_for_thread_counts(args: &Args) {
    let available_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let total_threads = args.producer_threads as usize + args.consumer_threads as usize;

    if total_threads > available_cpus {
        eprintln!(
            "Warning: total thread count ({total_threads}) exceeds available CPUs ({available_cpus})",
        );
    }
}

fn record_min(slot: &Mutex<Option<Instant>>, value: Instant) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none_or(|current| value < current) {
        *guard = Some(value);
    }
}

fn record_max(slot: &Mutex<Option<Instant>>, value: Instant) {
    let mut guard = slot.lock().unwrap();
    if guard.is_none_or(|current| value > current) {
        *guard = Some(value);
    }
}

fn main() {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")),
            )
            .with_thread_names(true)
            .init();
    }

    warn_for_thread_counts(&args);

    println!("Starting mpmc-send-recv test with:");
    println!("  Queue depth: {}", args.queue_depth);
    println!("  Total messages: {}", args.msg_count);
    println!("  Producer threads: {}", args.producer_threads);
    println!("  Consumer threads: {}", args.consumer_threads);
    println!("  Non-blocking: {}", args.non_blocking);

    if args.producer_threads == 0 {
        panic!("At least one producer thread is required");
    }

    if args.consumer_threads == 0 {
        panic!("At least one consumer thread is required");
    }

    let queue = match BBQueue::<String>::new(args.queue_depth) {
        Ok(q) => q,
        Err(e) => panic!("Failed to create queue: err {e:?}"),
    };

    let timeout = Duration::from_secs(args.timeout_secs);
    let consumed_count = AtomicU32::new(0);
    let stop = AtomicBool::new(false);
    let done = AtomicBool::new(false);
    let barrier = Barrier::new(args.producer_threads as usize + args.consumer_threads as usize + 1);
    let received = Mutex::new(vec![false; args.msg_count as usize]);

    let producer_thread_count = args.producer_threads as u32;
    let base_messages_per_thread = args.msg_count / producer_thread_count;
    let extra_messages = args.msg_count % producer_thread_count;

    let earliest_producer_start = Mutex::new(None::<Instant>);
    let latest_consumer_end = Mutex::new(None::<Instant>);

    thread::scope(|s| {
        let mut next_index = 0u32;

        // Timer thread: coordinate start and enforce timeout
        s.spawn(|| {
            barrier.wait();
            let deadline = Instant::now() + timeout;
            while !done.load(Ordering::Relaxed) && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(50));
            }
            if !done.load(Ordering::Relaxed) {
                stop.store(true, Ordering::Relaxed);
            }
        });

        for thread_idx in 0..args.producer_threads as u32 {
            let extra = u32::from(thread_idx < extra_messages);
            let range_start = next_index;
            let range_end = range_start + base_messages_per_thread + extra;
            next_index = range_end;

            let (queue, stop, barrier) = (&queue, &stop, &barrier);
            let earliest_start = &earliest_producer_start;
            let (non_blocking, verbose) = (args.non_blocking, args.verbose);

            thread::Builder::new()
                .name(format!("producer_{thread_idx}"))
                .spawn_scoped(s, move || {
                    let mut backoff_pow = 0;
                    barrier.wait();
                    let thread_start = Instant::now();

                    for id in range_start..range_end {
                        let mut message = format_message(id);
                        loop {
                            if stop.load(Ordering::Relaxed) {
                                panic!("Producer thread {thread_idx} timed out after {timeout:?}");
                            }

                            let result = if non_blocking {
                                queue.try_push(message)
                            } else {
                                queue.timed_wait_push(message, POLL_INTERVAL)
                            };

                            match result {
                                Ok(()) => {
                                    backoff_pow = 0;
                                    break;
                                }
                                Err(err) => {
                                    if err.is_out_of_space() {
                                        backoff(&mut backoff_pow);
                                    }
                                    message = err.into_inner();
                                }
                            }
                        }

                        if verbose {
                            println!("Producer thread {thread_idx} sent message {id}");
                        }
                    }

                    record_min(earliest_start, thread_start);
                })
                .unwrap();
        }

        for thread_idx in 0..args.consumer_threads {
            let (queue, stop, barrier, done) = (&queue, &stop, &barrier, &done);
            let (consumed_count, received) = (&consumed_count, &received);
            let latest_end = &latest_consumer_end;
            let (non_blocking, verbose, msg_count) = (args.non_blocking, args.verbose, args.msg_count);

            thread::Builder::new()
                .name(format!("consumer_{thread_idx}"))
                .spawn_scoped(s, move || {
                    let mut local_received = 0_u32;
                    let mut backoff_pow = 0;
                    barrier.wait();

                    while consumed_count.load(Ordering::Relaxed) < msg_count {
                        if stop.load(Ordering::Relaxed) {
                            panic!("Consumer timed out after {timeout:?} while waiting to receive");
                        }

                        let result = if non_blocking {
                            queue.try_pop()
                        } else {
                            queue.timed_wait_pop(POLL_INTERVAL)
                        };

                        match result {
                            Ok(message) => {
                                let id = parse_message(&message);
                                if consumed_count.fetch_add(1, Ordering::Relaxed) >= msg_count {
                                    panic!("Received more messages than expected");
                                }

                                let mut seen = received.lock().unwrap();
                                if seen[id as usize] {
                                    panic!("Duplicate message index {id} detected");
                                }
                                seen[id as usize] = true;
                                drop(seen);

                                if verbose {
                                    println!("Consumer thread {thread_idx} received {message}");
                                }
                                local_received += 1;
                                backoff_pow = 0;
                            }
                            Err(BBQueueError::EmptyQueue) => backoff(&mut backoff_pow),
                            Err(BBQueueError::Timeout) => {}
                            Err(e) => panic!("Consumer error: {e:?}"),
                        }
                    }

                    if verbose {
                        println!(
                            "Consumer thread {thread_idx} finished after receiving {local_received} messages"
                        );
                    }

                    record_max(latest_end, Instant::now());
                    done.store(true, Ordering::Relaxed);
                })
                .unwrap();
        }
    });

    let earliest_start = *earliest_producer_start.lock().unwrap();
    let latest_end = *latest_consumer_end.lock().unwrap();
    let elapsed = match (earliest_start, latest_end) {
        (Some(start), Some(end)) => end.duration_since(start),
        _ => Duration::default(),
    };
    println!("mpmc-send-recv test finished in {:?} us!", elapsed.as_micros());

    let received = received.into_inner().unwrap();
    if let Some(missing) = received.iter().position(|seen| !seen) {
        panic!("Message index {missing} was never received");
    }
    assert!(queue.is_empty(), "queue should be drained at the end");
}
