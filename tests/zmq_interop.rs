#![cfg(feature = "zmq")]

use std::{cell::RefCell, ops::ControlFlow, rc::Rc, time::Duration};

use pluvio_zsock::{dev_tracing::init_tracing, PollEvents, Reactor};

#[test]
fn pair_socket_pings_arrive_in_order() {
    init_tracing();
    let ctx = zmq::Context::new();
    let rx = ctx.socket(zmq::PAIR).unwrap();
    rx.set_linger(0).unwrap();
    rx.bind("inproc://pluvio-zsock-ping").unwrap();
    let tx = ctx.socket(zmq::PAIR).unwrap();
    tx.set_linger(0).unwrap();
    tx.connect("inproc://pluvio-zsock-ping").unwrap();
    let rx = Rc::new(rx);

    let reactor = Reactor::new().unwrap();
    let mut sent = 0;
    reactor
        .register_timer(Duration::from_millis(5), 0, move |_, _| {
            tx.send(format!("PING {sent}").as_str(), 0).unwrap();
            sent += 1;
            ControlFlow::Continue(())
        })
        .unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let log = received.clone();
    let reader = rx.clone();
    reactor
        .register_reader(rx.clone(), move |_, item| {
            assert!(item.revents().contains(PollEvents::POLLIN));
            let message = reader.recv_bytes(zmq::DONTWAIT).unwrap();
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

    // sockets must go before the context terminates
    drop(reactor);
    drop(rx);
}
