use std::{
    cell::{Cell, RefCell},
    ops::ControlFlow,
    rc::Rc,
    time::Duration,
};

use pluvio_zsock::{
    dev_tracing::init_tracing, inproc, Error, MqSocket, PollEvents, PollItem, PollTarget,
    Reactor,
};

#[test]
fn one_shot_timer_fires_once() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    let id = reactor
        .register_timer(Duration::from_millis(2), 1, move |_, _| {
            counter.set(counter.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(fired.get(), 1);
    assert_eq!(reactor.timer_count(), 0);
    assert!(!reactor.cancel_timer(id));
}

#[test]
fn repeating_timer_fires_exactly_n_times() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    reactor
        .register_timer(Duration::from_millis(1), 4, move |_, _| {
            counter.set(counter.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(fired.get(), 4);
    assert_eq!(reactor.timer_count(), 0);
}

#[test]
fn zero_delay_repeating_timer_fires_every_iteration() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    reactor
        .register_timer(Duration::ZERO, 3, move |_, _| {
            counter.set(counter.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(fired.get(), 3);
    assert_eq!(reactor.event_loop().stat().timers_fired(), 3);
}

#[test]
fn timer_cancelling_itself_is_released_after_its_handler() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    reactor
        .register_timer(Duration::from_millis(1), 0, move |reactor, id| {
            counter.set(counter.get() + 1);
            if counter.get() == 2 {
                assert!(reactor.cancel_timer(id));
                // still registered until the handler returns
                assert_eq!(reactor.timer_count(), 1);
            }
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(fired.get(), 2);
    assert_eq!(reactor.timer_count(), 0);
}

#[test]
fn timer_may_cancel_another_timer() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let victim_fired = Rc::new(Cell::new(false));
    let flag = victim_fired.clone();
    let victim = reactor
        .register_timer(Duration::from_millis(50), 1, move |_, _| {
            flag.set(true);
            ControlFlow::Continue(())
        })
        .unwrap();
    reactor
        .register_timer(Duration::from_millis(1), 1, move |reactor, _| {
            assert!(reactor.cancel_timer(victim));
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert!(!victim_fired.get());
    assert_eq!(reactor.timer_count(), 0);
}

#[test]
fn break_cancels_the_run() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    reactor
        .register_timer(Duration::ZERO, 0, move |_, _| {
            counter.set(counter.get() + 1);
            if counter.get() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    let err = reactor.run().unwrap_err();
    assert!(matches!(err, Error::Canceled));
    assert_eq!(fired.get(), 3);
    // the timer survives the cancellation
    assert_eq!(reactor.timer_count(), 1);
}

#[test]
fn ping_messages_arrive_in_order() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (tx, rx) = inproc::pair().unwrap();
    let rx = Rc::new(rx);

    let sent = Cell::new(0);
    reactor
        .register_timer(Duration::from_millis(5), 0, move |_, _| {
            tx.send(format!("PING {}", sent.get())).unwrap();
            sent.set(sent.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let log = received.clone();
    let reader = rx.clone();
    reactor
        .register_reader(rx.clone(), move |_, item| {
            assert!(item.revents().contains(PollEvents::POLLIN));
            let message = reader.recv().unwrap();
            log.borrow_mut().push(String::from_utf8(message).unwrap());
            if log.borrow().len() == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert!(reactor.run().unwrap_err().is_canceled());
    assert_eq!(*received.borrow(), vec!["PING 0", "PING 1", "PING 2"]);
}

#[test]
fn backlog_behind_one_edge_is_drained_without_blocking() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (tx, rx) = inproc::pair().unwrap();
    let rx = Rc::new(rx);
    for n in 0u8..5 {
        tx.send(vec![n]).unwrap();
    }

    let received = Rc::new(RefCell::new(Vec::new()));
    let log = received.clone();
    let reader = rx.clone();
    reactor
        .register_reader(rx.clone(), move |_, _| {
            log.borrow_mut().extend(reader.recv().unwrap());
            if reader.pending() == 0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })
        .unwrap();

    assert!(reactor.run().is_err());
    assert_eq!(*received.borrow(), vec![0, 1, 2, 3, 4]);
    assert_eq!(reactor.event_loop().stat().blocking_waits(), 0);
}

#[test]
fn unregistering_unknown_targets_is_a_noop() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (tx, rx) = inproc::pair().unwrap();
    let (_other_tx, other_rx) = inproc::pair().unwrap();
    let rx = Rc::new(rx);

    let reader = rx.clone();
    reactor
        .register_reader(rx.clone(), move |_, _| {
            reader.recv().unwrap();
            ControlFlow::Break(())
        })
        .unwrap();

    let other: Rc<dyn MqSocket> = Rc::new(other_rx);
    reactor.unregister_reader(&other);
    reactor.unregister_poller(&PollTarget::Fd(12345));
    assert_eq!(reactor.poller_count(), 1);

    tx.send("still here").unwrap();
    assert!(reactor.run().unwrap_err().is_canceled());
}

#[test]
fn poller_may_unregister_itself() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (tx, rx) = inproc::pair().unwrap();
    let rx = Rc::new(rx);
    let target: Rc<dyn MqSocket> = rx.clone();

    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    let reader = rx.clone();
    reactor
        .register_reader(rx.clone(), move |reactor, _| {
            counter.set(counter.get() + 1);
            reader.recv().unwrap();
            reactor.unregister_reader(&target);
            ControlFlow::Continue(())
        })
        .unwrap();
    tx.send("one").unwrap();
    tx.send("two").unwrap();

    // nothing is left to keep the loop alive once the poller is gone
    reactor.run().unwrap();
    assert_eq!(calls.get(), 1);
    assert_eq!(reactor.poller_count(), 0);
    assert_eq!(rx.pending(), 1);
}

#[test]
fn handler_may_register_new_work() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    let log = order.clone();
    reactor
        .register_timer(Duration::from_millis(1), 1, move |reactor, first| {
            log.borrow_mut().push(first.get());
            let log = log.clone();
            let second = reactor
                .register_timer(Duration::from_millis(1), 1, move |_, id| {
                    log.borrow_mut().push(id.get());
                    ControlFlow::Continue(())
                })
                .unwrap();
            assert_eq!(second.get(), first.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(*order.borrow(), vec![1, 2]);
}

#[test]
fn descriptor_poller_reports_readable() {
    init_tracing();
    // SAFETY: plain syscall, checked below
    let fd = unsafe { libc::eventfd(1, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
    assert!(fd >= 0);

    let reactor = Reactor::new().unwrap();
    let seen = Rc::new(Cell::new(PollEvents::EMPTY));
    let out = seen.clone();
    reactor
        .register_poller(PollItem::fd(fd, PollEvents::POLLIN), move |_, item| {
            assert!(matches!(item.target(), PollTarget::Fd(_)));
            out.set(item.revents());
            ControlFlow::Break(())
        })
        .unwrap();

    assert!(reactor.run().unwrap_err().is_canceled());
    assert_eq!(seen.get(), PollEvents::POLLIN);

    reactor.unregister_poller(&PollTarget::Fd(fd));
    assert_eq!(reactor.poller_count(), 0);
    assert!(!reactor.event_loop().alive());
    // SAFETY: closed once, after its poller was removed
    unsafe { libc::close(fd) };
}

#[test]
fn writable_poller_sees_pollout_only() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (tx, _rx) = inproc::pair().unwrap();
    let item = PollItem::socket(Rc::new(tx), PollEvents::POLLOUT);
    let seen = Rc::new(Cell::new(PollEvents::EMPTY));
    let out = seen.clone();
    reactor
        .register_poller(item, move |_, item| {
            assert_eq!(item.events(), PollEvents::POLLOUT);
            out.set(item.revents());
            ControlFlow::Break(())
        })
        .unwrap();

    assert!(reactor.run().is_err());
    assert_eq!(seen.get(), PollEvents::POLLOUT);
}

#[test]
fn run_can_be_resumed_after_cancellation() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    reactor
        .register_timer(Duration::from_millis(1), 2, move |_, _| {
            counter.set(counter.get() + 1);
            ControlFlow::Break(())
        })
        .unwrap();

    assert!(reactor.run().unwrap_err().is_canceled());
    assert_eq!(fired.get(), 1);
    assert!(reactor.run().unwrap_err().is_canceled());
    assert_eq!(fired.get(), 2);
    // the timer is gone, the next run has nothing to do
    reactor.run().unwrap();
}

#[test]
fn out_of_range_timer_delay_is_accepted() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let id = reactor
        .register_timer(Duration::MAX, 1, |_, _| ControlFlow::Break(()))
        .unwrap();
    assert_eq!(reactor.timer_count(), 1);

    reactor.event_loop().run_nowait().unwrap();
    assert_eq!(reactor.timer_count(), 1);
    assert!(reactor.cancel_timer(id));
    assert!(!reactor.event_loop().alive());
}

#[test]
fn handler_may_unregister_a_poller_ready_in_the_same_iteration() {
    init_tracing();
    let reactor = Reactor::new().unwrap();
    let (a_tx, a_rx) = inproc::pair().unwrap();
    let (b_tx, b_rx) = inproc::pair().unwrap();
    let a_rx = Rc::new(a_rx);
    let b_rx: Rc<dyn MqSocket> = Rc::new(b_rx);
    a_tx.send("a").unwrap();
    b_tx.send("b").unwrap();

    let a_calls = Rc::new(Cell::new(0));
    let counter = a_calls.clone();
    let reader = a_rx.clone();
    let me: Rc<dyn MqSocket> = a_rx.clone();
    let other = b_rx.clone();
    reactor
        .register_reader(a_rx.clone(), move |reactor, _| {
            counter.set(counter.get() + 1);
            reader.recv().unwrap();
            reactor.unregister_reader(&other);
            reactor.unregister_reader(&me);
            ControlFlow::Continue(())
        })
        .unwrap();

    let b_calls = Rc::new(Cell::new(0));
    let counter = b_calls.clone();
    reactor
        .register_reader(b_rx.clone(), move |_, _| {
            counter.set(counter.get() + 1);
            ControlFlow::Continue(())
        })
        .unwrap();

    reactor.run().unwrap();
    assert_eq!(a_calls.get(), 1);
    assert_eq!(b_calls.get(), 0);
    assert_eq!(reactor.poller_count(), 0);
}
