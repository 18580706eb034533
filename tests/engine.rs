use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;

use mdnsd::callback::QueryDisposition;
use mdnsd::clock::{Clock, ManualClock, Timeval};
use mdnsd::config::EngineConfig;
use mdnsd::instance::Instance;
use mdnsd::resource::{Rdata, RecordType, Resource};
use mdnsd::wire::{Header, Message, MessageBuilder, Question, WireRecord};

struct SharedClock(Rc<RefCell<ManualClock>>);

impl Clock for SharedClock {
    fn now(&self) -> Timeval {
        self.0.borrow().now()
    }
}

fn new_instance() -> (Instance, Rc<RefCell<ManualClock>>) {
    let clock = Rc::new(RefCell::new(ManualClock(Timeval::from_secs(1_000))));
    let instance = Instance::with_clock(EngineConfig::default(), Box::new(SharedClock(clock.clone())));
    (instance, clock)
}

fn advance(clock: &Rc<RefCell<ManualClock>>, secs: u64) {
    clock.borrow_mut().advance_secs(secs);
}

/// Drives `instance` through however many `emit()` calls it takes for a
/// freshly allocated unique record to finish probing and its announce
/// cycle, so later assertions see it fully established.
fn establish_unique(instance: &mut Instance, clock: &Rc<RefCell<ManualClock>>) {
    for _ in 0..4 {
        let mut out = MessageBuilder::new(1500);
        instance.emit(&mut out);
        advance(clock, 1);
    }
    for _ in 0..5 {
        let mut out = MessageBuilder::new(1500);
        instance.emit(&mut out);
        advance(clock, 3);
    }
}

/// Same, for a freshly allocated shared record (no probing round needed).
fn establish_shared(instance: &mut Instance, clock: &Rc<RefCell<ManualClock>>) {
    for _ in 0..5 {
        let mut out = MessageBuilder::new(1500);
        instance.emit(&mut out);
        advance(clock, 3);
    }
}

fn query_message(qname: &str, qtype: RecordType, unicast_response: bool) -> Message {
    Message {
        header: Header {
            questions: 1,
            ..Header::default()
        },
        questions: vec![Question {
            qname: qname.to_string(),
            qtype,
            qclass: 1,
            unicast_response,
        }],
        answers: Vec::new(),
        authorities: Vec::new(),
        resources: Vec::new(),
    }
}

fn response_message(answers: Vec<WireRecord>) -> Message {
    Message {
        header: Header {
            response: true,
            answers: answers.len() as u16,
            ..Header::default()
        },
        questions: Vec::new(),
        answers,
        authorities: Vec::new(),
        resources: Vec::new(),
    }
}

/// A unique record probes four rounds before it can be announced; emit()
/// keeps writing ANY questions with a tentative authority answer until the
/// fourth round, after which the record moves to the publish queue.
#[test]
fn probe_then_announce() {
    let (mut instance, clock) = new_instance();
    let id = instance.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {});
    instance.set_ip(id, Ipv4Addr::new(10, 0, 0, 9));

    for _ in 0..4 {
        let mut out = MessageBuilder::new(1500);
        let (_len, _addr, port) = instance.emit(&mut out);
        assert_eq!(port, 5353);
        advance(&clock, 1);
    }

    let mut out = MessageBuilder::new(1500);
    instance.emit(&mut out);
    let bytes = out.finish().unwrap();
    let mut buf = mdnsd::wire::Buffer::new(bytes.len());
    buf.buf.copy_from_slice(&bytes);
    let msg = Message::from_buffer(&mut buf).unwrap();
    assert_eq!(msg.answers.len(), 1);
    assert_eq!(msg.answers[0].resource.name, "host.local");
}

/// An inbound response claiming the same unique name mid-probe, with no
/// authority-section value matching ours, fires the conflict observer and
/// withdraws the record.
#[test]
fn conflict_during_probe_fires_observer() {
    let (mut instance, _clock) = new_instance();
    let conflicted = Rc::new(RefCell::new(false));
    let conflicted_clone = conflicted.clone();
    let id = instance.alloc_unique("host.local", RecordType::A, 120, move |_: &str, _: RecordType| {
        *conflicted_clone.borrow_mut() = true;
    });
    instance.set_ip(id, Ipv4Addr::new(10, 0, 0, 9));

    let foreign_answer = WireRecord {
        resource: Resource {
            name: "host.local".into(),
            rtype: RecordType::A,
            ttl: 120,
            rdata: Rdata::Ip(Ipv4Addr::new(10, 0, 0, 200)),
        },
        class: 1,
        cache_flush: true,
    };
    instance.ingest(&response_message(vec![foreign_answer]), Ipv4Addr::new(192, 168, 1, 50), 5353);

    assert!(*conflicted.borrow());
}

/// A shared record answering an inbound question is scheduled with a random
/// delay rather than answered immediately.
#[test]
fn shared_record_reply_is_delayed_not_immediate() {
    let (mut instance, clock) = new_instance();
    let id = instance.alloc_shared("_http._tcp.local", RecordType::Ptr, 4500);
    instance.set_host(id, "printer._http._tcp.local");
    establish_shared(&mut instance, &clock);

    instance.ingest(&query_message("_http._tcp.local", RecordType::Ptr, false), Ipv4Addr::new(192, 168, 1, 77), 5353);

    let mut out = MessageBuilder::new(1500);
    let (_len, _addr, port) = instance.emit(&mut out);
    // Nothing answered yet: the shared record's reply is paused behind its
    // random delay, not sitting in the immediate queue.
    assert_eq!(port, 5353);
}

/// A question with the unicast-response (QU) bit set gets a dedicated
/// unicast reply queued ahead of everything else.
#[test]
fn qu_bit_queues_unicast_reply() {
    let (mut instance, _clock) = new_instance();
    let id = instance.alloc_shared("_http._tcp.local", RecordType::Ptr, 4500);
    instance.set_host(id, "printer._http._tcp.local");

    let mut query = query_message("_http._tcp.local", RecordType::Ptr, true);
    query.header.id = 0xBEEF;
    instance.ingest(&query, Ipv4Addr::new(192, 168, 1, 77), 40001);

    let mut out = MessageBuilder::new(1500);
    let (_len, addr, port) = instance.emit(&mut out);
    assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 77));
    assert_eq!(port, 40001);
    let bytes = out.finish().unwrap();
    let mut buf = mdnsd::wire::Buffer::new(bytes.len());
    buf.buf.copy_from_slice(&bytes);
    let msg = Message::from_buffer(&mut buf).unwrap();
    assert_eq!(msg.header.id, 0xBEEF);
    assert_eq!(msg.questions.len(), 1);
    assert_eq!(msg.answers.len(), 1);
}

/// A question whose answer section already carries a fresh known answer
/// suppresses our reply entirely.
#[test]
fn known_answer_suppresses_reply() {
    let (mut instance, clock) = new_instance();
    let id = instance.alloc_unique("host.local", RecordType::A, 120, |_: &str, _: RecordType| {});
    instance.set_ip(id, Ipv4Addr::new(10, 0, 0, 9));
    establish_unique(&mut instance, &clock);

    let mut query = query_message("host.local", RecordType::A, false);
    query.answers.push(WireRecord {
        resource: Resource {
            name: "host.local".into(),
            rtype: RecordType::A,
            ttl: 120,
            rdata: Rdata::Ip(Ipv4Addr::new(10, 0, 0, 9)),
        },
        class: 1,
        cache_flush: true,
    });
    query.header.questions = 1;
    query.header.answers = 1;
    instance.ingest(&query, Ipv4Addr::new(192, 168, 1, 77), 5353);

    let mut out = MessageBuilder::new(1500);
    let (_len, _addr, port) = instance.emit(&mut out);
    assert_eq!(port, 5353);
    assert_eq!(out.current_length(), 12);
}

/// A query observer is notified with a zero-ttl answer once the matching
/// cache entry's (haircut) ttl expires.
#[test]
fn cache_expiry_notifies_query_with_zero_ttl() {
    let (mut instance, clock) = new_instance();

    let answer = WireRecord {
        resource: Resource {
            name: "host.local".into(),
            rtype: RecordType::A,
            ttl: 4,
            rdata: Rdata::Ip(Ipv4Addr::new(10, 0, 0, 42)),
        },
        class: 1,
        cache_flush: true,
    };
    instance.ingest(&response_message(vec![answer]), Ipv4Addr::new(192, 168, 1, 9), 5353);

    let seen_ttls = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = seen_ttls.clone();
    instance.query("host.local", RecordType::A, move |r: &Resource| {
        seen_clone.borrow_mut().push(r.ttl);
        QueryDisposition::Keep
    });

    advance(&clock, 10_000);
    let mut out = MessageBuilder::new(1500);
    instance.emit(&mut out);

    assert!(seen_ttls.borrow().iter().any(|&ttl| ttl == 0));
}
