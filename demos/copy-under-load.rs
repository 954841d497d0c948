//! Copies and moves between two BBQueues while producers and consumers hammer both of them.
//!
//! One thread copies A into B while another copies B into A, and a third periodically moves
//! the whole contents of one queue into the other. The run finishes once every worker has done
//! its share; a deadlock shows up as the timeout firing.

use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use test_support::utils::backoff;
use tracing_subscriber::EnvFilter;
use yep_bbq::BBQueue;

/// Copy and move between two queues under concurrent push/pop load
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Queue depth of both queues
    #[arg(short = 'd', long, default_value = "128")]
    queue_depth: usize,

    /// Number of copy/move rounds each copier thread performs
    #[arg(short = 'r', long, default_value = "10000")]
    rounds: u64,

    /// Number of push/pop worker threads per queue
    #[arg(short = 'w', long, default_value = "2")]
    workers: u16,

    /// Timeout in seconds before the run is declared stuck
    #[arg(short = 't', long, default_value = "30")]
    timeout_secs: u64,

    /// Enable verbose logging (queue tracing events included)
    #[arg(short = 'v', long, default_value_t = false)]
    verbose: bool,
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

    let a = match BBQueue::<u64>::new(args.queue_depth) {
        Ok(q) => q,
        Err(e) => panic!("Failed to create queue: err {e:?}"),
    };
    let b = a.clone();

    let timeout = Duration::from_secs(args.timeout_secs);
    let deadline = Instant::now() + timeout;
    let copiers_done = AtomicBool::new(false);
    let pushed = AtomicU64::new(0);
    let popped = AtomicU64::new(0);
    let start = Instant::now();

    thread::scope(|s| {
        let mut copiers = Vec::new();
        for (name, dst, src) in [("copy_a_to_b", &b, &a), ("copy_b_to_a", &a, &b)] {
            let rounds = args.rounds;
            copiers.push(
                thread::Builder::new()
                    .name(name.to_string())
                    .spawn_scoped(s, move || {
                        for _ in 0..rounds {
                            dst.copy_from(src);
                            if Instant::now() > deadline {
                                panic!("{name} stuck after {timeout:?}");
                            }
                        }
                    })
                    .unwrap(),
            );
        }

        {
            let (a, b, rounds) = (&a, &b, args.rounds);
            copiers.push(
                thread::Builder::new()
                    .name("mover".to_string())
                    .spawn_scoped(s, move || {
                        for round in 0..rounds {
                            if round % 2 == 0 {
                                a.move_from(b);
                            } else {
                                b.move_from(a);
                            }
                        }
                    })
                    .unwrap(),
            );
        }

        for (queue_name, queue) in [("a", &a), ("b", &b)] {
            for idx in 0..args.workers {
                let (copiers_done, pushed, popped) = (&copiers_done, &pushed, &popped);
                thread::Builder::new()
                    .name(format!("worker_{queue_name}_{idx}"))
                    .spawn_scoped(s, move || {
                        let mut backoff_pow = 0;
                        let mut value = 0u64;
                        while !copiers_done.load(Ordering::Relaxed) {
                            if queue.try_push(value).is_ok() {
                                pushed.fetch_add(1, Ordering::Relaxed);
                                value += 1;
                            }
                            match queue.try_pop() {
                                Ok(_) => {
                                    popped.fetch_add(1, Ordering::Relaxed);
                                    backoff_pow = 0;
                                }
                                Err(_) => backoff(&mut backoff_pow),
                            }
                        }
                    })
                    .unwrap();
            }
        }

        for copier in copiers {
            copier.join().expect("copier thread panicked");
        }
        copiers_done.store(true, Ordering::Relaxed);
    });

    println!(
        "copy-under-load finished in {:?}: {} rounds per copier, {} pushes, {} pops, a holds {}, b holds {}",
        start.elapsed(),
        args.rounds,
        pushed.load(Ordering::Relaxed),
        popped.load(Ordering::Relaxed),
        a.len(),
        b.len()
    );
    assert!(a.len() <= args.queue_depth);
    assert!(b.len() <= args.queue_depth);
}
