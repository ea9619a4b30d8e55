use {
    super::util::*,
    crate::queue::{BlockingQueue, ConcurrentQueue},
    color_eyre::eyre::{bail, ensure},
    std::{
        thread,
        time::{Duration, Instant},
    },
};

#[test]
fn fifo_order_single_consumer() -> TestResult {
    testinit();
    let queue = BlockingQueue::new();
    for i in 0..32 {
        queue.add(i);
    }
    ensure_eq!(queue.len(), 32);
    for i in 0..32 {
        ensure_eq!(queue.try_take(Some(Duration::ZERO)), Some(i));
    }
    ensure_eq!(queue.try_take(Some(Duration::ZERO)), None);
    Ok(())
}

#[test]
fn fifo_order_concurrent_producers() -> TestResult {
    testinit();
    const PRODUCERS: usize = 4;
    const PER_PRODUCER: usize = 128;
    let queue = BlockingQueue::new();
    thread::scope(|scope| {
        for tid in 0..PRODUCERS {
            let queue = &queue;
            scope.spawn(move || {
                for seq in 0..PER_PRODUCER {
                    queue.add((tid, seq));
                }
            });
        }
    });
    // Enqueue commit order is a total order; each producer's elements must come out in the
    // order that producer added them.
    let mut next_seq = [0_usize; PRODUCERS];
    for _ in 0..PRODUCERS * PER_PRODUCER {
        let Some((tid, seq)) = queue.try_take(Some(Duration::ZERO)) else {
            bail!("queue ran dry before all elements were seen");
        };
        ensure_eq!(seq, next_seq[tid], "producer {tid} was reordered");
        next_seq[tid] += 1;
    }
    ensure_eq!(queue.try_take(Some(Duration::ZERO)), None);
    Ok(())
}

#[test]
fn timeout_lower_bound_holds() -> TestResult {
    testinit();
    let queue = BlockingQueue::<()>::new();
    let before = Instant::now();
    ensure_eq!(queue.try_take(Some(Duration::from_millis(50))), None);
    let elapsed = before.elapsed();
    ensure!(elapsed >= Duration::from_millis(50), "returned after only {elapsed:?}");
    ensure!(elapsed < Duration::from_secs(5), "overslept: {elapsed:?}");
    Ok(())
}

#[test]
fn zero_timeout_returns_immediately() -> TestResult {
    testinit();
    let queue = BlockingQueue::<()>::new();
    let before = Instant::now();
    ensure_eq!(queue.try_take(Some(Duration::ZERO)), None);
    ensure!(before.elapsed() < Duration::from_secs(1), "zero-budget take blocked");
    Ok(())
}

#[test]
fn infinite_wait_wakes_on_add() -> TestResult {
    testinit();
    let queue = BlockingQueue::new();
    thread::scope(|scope| {
        let waiter = scope.spawn(|| queue.try_take(None));
        thread::sleep(Duration::from_millis(50));
        queue.add("ping");
        ensure_eq!(waiter.join().unwrap(), Some("ping"));
        Ok(())
    })
}

#[test]
fn no_lost_wakeups() -> TestResult {
    testinit();
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 64;
    let queue = BlockingQueue::new();
    let received = thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let mut got = 0_usize;
            while got < PRODUCERS * PER_PRODUCER {
                if queue.try_take(Some(Duration::from_secs(10))).is_none() {
                    break;
                }
                got += 1;
            }
            got
        });
        for _ in 0..PRODUCERS {
            scope.spawn(|| {
                for i in 0..PER_PRODUCER {
                    queue.add(i);
                }
            });
        }
        consumer.join().unwrap()
    });
    // None lost...
    ensure_eq!(received, PRODUCERS * PER_PRODUCER);
    // ...and none duplicated.
    ensure_eq!(queue.try_take(Some(Duration::ZERO)), None);
    Ok(())
}

#[test]
fn close_wakes_blocked_consumer() -> TestResult {
    testinit();
    let queue = BlockingQueue::<u8>::new();
    thread::scope(|scope| {
        let waiter = scope.spawn(|| queue.try_take(None));
        thread::sleep(Duration::from_millis(100));
        queue.close();
        ensure_eq!(waiter.join().unwrap(), None);
        Ok(())
    })
}

#[test]
fn closed_queue_drains_then_stops_blocking() -> TestResult {
    testinit();
    let queue = BlockingQueue::new();
    queue.add(1);
    queue.close();
    ensure!(queue.is_closed(), "close must mark the queue");
    ensure_eq!(queue.try_take(None), Some(1));
    let before = Instant::now();
    ensure_eq!(queue.try_take(None), None);
    ensure!(before.elapsed() < Duration::from_secs(1), "closed empty queue must not block");
    // Producers are unaffected by closing.
    queue.add(2);
    ensure_eq!(queue.try_take(None), Some(2));
    Ok(())
}

#[test]
fn concurrent_queue_fifo() -> TestResult {
    testinit();
    let queue = ConcurrentQueue::new();
    ensure!(queue.is_empty(), "fresh queue must be empty");
    for i in 0..8 {
        queue.enqueue(i);
    }
    ensure_eq!(queue.len(), 8);
    for i in 0..8 {
        ensure_eq!(queue.try_dequeue(), Some(i));
    }
    ensure_eq!(queue.try_dequeue(), None);
    Ok(())
}

#[test]
fn concurrent_queue_handoff() -> TestResult {
    testinit();
    const COUNT: usize = 256;
    let queue = ConcurrentQueue::new();
    let received = thread::scope(|scope| {
        let consumer = scope.spawn(|| {
            let mut got = 0_usize;
            let deadline = Instant::now() + Duration::from_secs(10);
            while got < COUNT && Instant::now() < deadline {
                match queue.try_dequeue() {
                    Some(_) => got += 1,
                    None => thread::yield_now(),
                }
            }
            got
        });
        scope.spawn(|| {
            for i in 0..COUNT {
                queue.enqueue(i);
            }
        });
        consumer.join().unwrap()
    });
    ensure_eq!(received, COUNT);
    Ok(())
}
