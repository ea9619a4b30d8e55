use {
    super::util::*,
    crate::{CompletionPort, Driver, OperationKind},
    color_eyre::eyre::ensure,
    std::{
        thread,
        time::{Duration, Instant},
    },
};

#[test]
fn signal_roundtrip() -> TestResult {
    testinit();
    let port = CompletionPort::new()?;
    port.signal("shutdown");
    let status = next(&port)?;
    ensure_eq!(status.operation(), OperationKind::Signal);
    ensure_eq!(status.state(), Some(&"shutdown"));
    ensure!(status.socket().is_none(), "signal records are tied to no socket");
    ensure!(status.outcome().is_success(), "signal records carry a success outcome");
    ensure_eq!(status.bytes_transferred(), 0);
    Ok(())
}

#[test]
fn signal_wakes_unbounded_wait() -> TestResult {
    testinit();
    let port = CompletionPort::new()?;
    port.signal("shutdown");
    let before = Instant::now();
    let status = port.wait(None);
    ensure!(before.elapsed() < Duration::from_secs(1), "pre-queued signal must not block");
    ensure_eq!(status.map(|s| s.operation()), Some(OperationKind::Signal));
    Ok(())
}

#[test]
fn empty_wait_times_out() -> TestResult {
    testinit();
    let port = CompletionPort::<()>::new()?;
    let before = Instant::now();
    ensure!(port.wait(Some(Duration::from_millis(50))).is_none(), "nothing was queued");
    let elapsed = before.elapsed();
    ensure!(elapsed >= Duration::from_millis(50), "returned after only {elapsed:?}");
    Ok(())
}

#[test]
fn signals_are_fifo() -> TestResult {
    testinit();
    let port = CompletionPort::new()?;
    for i in 0..10 {
        port.signal(i);
    }
    for i in 0..10 {
        ensure_eq!(next(&port)?.state(), Some(&i));
    }
    Ok(())
}

#[test]
fn batch_drain_takes_what_is_queued() -> TestResult {
    testinit();
    let port = CompletionPort::new()?;
    for i in 0..3 {
        port.signal(i);
    }
    let mut batch = Vec::with_capacity(8);
    let before = Instant::now();
    ensure_eq!(port.wait_many(&mut batch, Some(Duration::from_secs(5))), 3);
    ensure!(
        before.elapsed() < Duration::from_secs(5),
        "the batch must not block once the first record is in hand"
    );
    let states: Vec<i32> = batch.iter().filter_map(|s| s.state().copied()).collect();
    ensure_eq!(states, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn batch_drain_respects_capacity() -> TestResult {
    testinit();
    let port = CompletionPort::new()?;
    for i in 0..5 {
        port.signal(i);
    }
    let mut batch = Vec::with_capacity(2);
    ensure_eq!(port.wait_many(&mut batch, Some(DEADLINE)), 2);
    ensure_eq!(batch.len(), 2);
    batch.clear();
    ensure_eq!(port.wait_many(&mut batch, Some(DEADLINE)), 2);
    batch.clear();
    ensure_eq!(port.wait_many(&mut batch, Some(DEADLINE)), 1);
    Ok(())
}

#[test]
fn batch_drain_times_out_empty_handed() -> TestResult {
    testinit();
    let port = CompletionPort::<()>::new()?;
    let mut batch = Vec::with_capacity(4);
    let before = Instant::now();
    ensure_eq!(port.wait_many(&mut batch, Some(Duration::from_millis(50))), 0);
    ensure!(before.elapsed() >= Duration::from_millis(50), "timed out early");
    ensure!(batch.is_empty(), "nothing must be written on a timeout");
    Ok(())
}

#[test]
fn multiple_consumers_drain_one_port() -> TestResult {
    testinit();
    let port = CompletionPort::<usize>::new()?;
    let mut got: Vec<usize> = thread::scope(|scope| {
        let consumers: Vec<_> = (0..3)
            .map(|_| scope.spawn(|| port.wait(Some(Duration::from_secs(10)))))
            .collect();
        for i in 0..3 {
            port.signal(i);
        }
        consumers
            .into_iter()
            .filter_map(|c| c.join().unwrap())
            .filter_map(|s| s.state().copied())
            .collect()
    });
    got.sort_unstable();
    ensure_eq!(got, vec![0, 1, 2]);
    Ok(())
}

#[test]
fn close_wakes_blocked_consumer_with_a_signal() -> TestResult {
    testinit();
    let port = CompletionPort::<&str>::new()?;
    thread::scope(|scope| {
        let consumer = scope.spawn(|| port.wait(None));
        thread::sleep(Duration::from_millis(100));
        port.close();
        match consumer.join().unwrap() {
            Some(status) => {
                ensure_eq!(status.operation(), OperationKind::Signal);
                ensure!(status.state().is_none(), "close-injected records carry no state");
                ensure!(status.socket().is_none(), "close-injected records carry no socket");
            }
            // The consumer had not blocked yet when the port closed; it then observed the
            // closed queue directly, which is just as prompt.
            None => {}
        }
        TestResult::Ok(())
    })?;
    // Whatever is left over drains without blocking, and then waits stop blocking entirely.
    while port.wait(Some(Duration::ZERO)).is_some() {}
    let before = Instant::now();
    ensure!(port.wait(None).is_none(), "closed empty port must not block");
    ensure!(before.elapsed() < Duration::from_secs(1), "closed empty port must not block");
    Ok(())
}

#[test]
fn ports_construct_with_every_driver() -> TestResult {
    testinit();
    for driver in [Driver::Auto, Driver::Poll, Driver::Threaded] {
        let port = CompletionPort::with_driver(driver)?;
        port.signal(driver);
        ensure_eq!(next(&port)?.state(), Some(&driver));
    }
    Ok(())
}
