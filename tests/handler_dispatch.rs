//! Descriptor handler registration and dispatch.

mod common;

use common::*;
use std::cell::RefCell;
use std::rc::Rc;
use tasksched::{Condition, DescriptorId, TaskScheduler};

fn logging_handler(
    log: &FiredLog,
    label: &'static str,
) -> impl FnMut(&mut TaskScheduler, Condition) + 'static {
    let log = log.clone();
    move |_, _| log.push(label)
}

#[test]
fn reassigning_a_descriptor_keeps_one_entry() {
    test_phase!("reassigning_a_descriptor_keeps_one_entry");
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    let fd = DescriptorId(5);

    h.scheduler
        .set_background_handling(fd, Condition::READABLE, logging_handler(&log, "first"));
    h.scheduler
        .set_background_handling(fd, Condition::WRITABLE, logging_handler(&log, "second"));
    assert_eq!(h.scheduler.handler_count(), 1);
    assert_eq!(h.scheduler.watched_conditions(fd), Some(Condition::WRITABLE));

    h.lab.inject(fd, Condition::READABLE);
    assert_eq!(h.step(), 0);
    h.lab.inject(fd, Condition::WRITABLE);
    assert_eq!(h.step(), 1);
    assert_eq!(log.entries(), ["second"]);
    test_complete!("reassigning_a_descriptor_keeps_one_entry");
}

#[test]
fn unregistered_readiness_is_ignored() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(1), logging_handler(&log, "fd1"));

    h.lab.set_ready(DescriptorId(99), Condition::READABLE);
    assert_eq!(h.step(), 0);
    assert!(log.entries().is_empty());
}

#[test]
fn handler_can_remove_itself_mid_walk() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    for n in [1, 2, 3] {
        h.lab.set_ready(DescriptorId(n), Condition::READABLE);
    }
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(1), logging_handler(&log, "fd1"));
    let self_removing = log.clone();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(2), move |s, _| {
            self_removing.push("fd2");
            s.disable_background_handling(DescriptorId(2));
        });
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(3), logging_handler(&log, "fd3"));

    // Newest registrations are walked first.
    assert_eq!(h.step(), 3);
    assert_eq!(log.entries(), ["fd3", "fd2", "fd1"]);
    assert_eq!(h.scheduler.handler_count(), 2);

    assert_eq!(h.step(), 2);
    assert_eq!(log.entries(), ["fd3", "fd2", "fd1", "fd3", "fd1"]);
}

#[test]
fn removing_a_later_handler_skips_only_that_handler() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    for n in [1, 2, 3] {
        h.lab.set_ready(DescriptorId(n), Condition::READABLE);
    }
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(1), logging_handler(&log, "fd1"));
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(2), logging_handler(&log, "fd2"));
    let remover = log.clone();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(3), move |s, _| {
            remover.push("fd3");
            s.disable_background_handling(DescriptorId(2));
        });

    assert_eq!(h.step(), 2);
    assert_eq!(log.entries(), ["fd3", "fd1"]);

    assert_eq!(h.step(), 2);
    assert_eq!(log.entries(), ["fd3", "fd1", "fd3", "fd1"]);
}

#[test]
fn one_shot_readiness_survives_removal_of_a_neighbour() {
    test_phase!("one_shot_readiness_survives_removal_of_a_neighbour");
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(1), logging_handler(&log, "fd1"));
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(2), logging_handler(&log, "fd2"));
    let remover = log.clone();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(3), move |s, _| {
            remover.push("fd3");
            s.disable_background_handling(DescriptorId(2));
        });
    for n in [1, 2, 3] {
        h.lab.inject(DescriptorId(n), Condition::READABLE);
    }

    let dispatched: usize = (0..3).map(|_| h.step()).sum();
    assert_with_log!(
        log.entries() == ["fd3", "fd1"],
        "every ready descriptor still registered runs once",
        ["fd3", "fd1"],
        log.entries()
    );
    assert_eq!(dispatched, 2);
    assert_eq!(h.scheduler.handler_count(), 2);
    test_complete!("one_shot_readiness_survives_removal_of_a_neighbour");
}

#[test]
fn handler_registered_mid_walk_waits_for_the_next_step() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    h.lab.set_ready(DescriptorId(1), Condition::READABLE);
    h.lab.set_ready(DescriptorId(2), Condition::READABLE);

    let late = log.clone();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(1), move |s, _| {
            late.push("fd1");
            if s.watched_conditions(DescriptorId(2)).is_none() {
                let inner = late.clone();
                s.turn_on_background_read_handling(DescriptorId(2), move |_, _| {
                    inner.push("fd2");
                });
            }
        });

    assert_eq!(h.step(), 1);
    assert_eq!(log.entries(), ["fd1"]);
    assert_eq!(h.step(), 2);
    assert_eq!(log.entries(), ["fd1", "fd2", "fd1"]);
}

#[test]
fn handler_can_replace_itself() {
    let mut h = LabHarness::new();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let fd = DescriptorId(4);
    h.lab.set_ready(fd, Condition::READABLE | Condition::WRITABLE);

    let sink = Rc::clone(&seen);
    h.scheduler.turn_on_background_read_handling(fd, move |s, ready| {
        sink.borrow_mut().push(("reader", ready));
        let writer_sink = Rc::clone(&sink);
        s.set_background_handling(fd, Condition::WRITABLE, move |_, ready| {
            writer_sink.borrow_mut().push(("writer", ready));
        });
    });

    h.step();
    h.step();
    assert_eq!(
        *seen.borrow(),
        vec![("reader", Condition::READABLE), ("writer", Condition::WRITABLE)]
    );
    assert_eq!(h.scheduler.handler_count(), 1);
}

#[test]
fn moved_handler_follows_the_new_descriptor() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(7), logging_handler(&log, "moved"));

    assert!(h.scheduler.move_socket_handling(DescriptorId(7), DescriptorId(8)));
    assert!(!h.scheduler.move_socket_handling(DescriptorId(7), DescriptorId(9)));
    assert_eq!(h.scheduler.watched_conditions(DescriptorId(7)), None);

    h.lab.inject(DescriptorId(7), Condition::READABLE);
    assert_eq!(h.step(), 0);
    h.lab.inject(DescriptorId(8), Condition::READABLE);
    assert_eq!(h.step(), 1);
    assert_eq!(log.entries(), ["moved"]);
}

#[test]
fn descriptors_run_before_alarms_in_a_step() {
    let mut h = LabHarness::new();
    let log = FiredLog::new();
    h.scheduler.schedule_delayed_task(0, log.task("alarm"));
    h.scheduler
        .turn_on_background_read_handling(DescriptorId(3), logging_handler(&log, "io"));
    h.lab.inject(DescriptorId(3), Condition::READABLE);

    assert_eq!(h.step(), 2);
    assert_eq!(log.entries(), ["io", "alarm"]);
}

#[cfg(unix)]
mod os {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;
    use tasksched::DelayInterval;

    #[test]
    fn socket_readiness_dispatches_handler() {
        init_test_logging();
        let mut scheduler = TaskScheduler::builder().build().expect("os scheduler");
        let (mut reader, mut writer) = UnixStream::pair().expect("socket pair");
        reader.set_nonblocking(true).expect("nonblocking");
        let fd = DescriptorId(reader.as_raw_fd());

        let received = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&received);
        scheduler.turn_on_background_read_handling(fd, move |s, ready| {
            assert!(ready.is_readable());
            let mut buf = [0_u8; 16];
            if let Ok(n) = reader.read(&mut buf) {
                sink.borrow_mut().extend_from_slice(&buf[..n]);
            }
            s.disable_background_handling(fd);
        });

        writer.write_all(b"ping").expect("write");
        let dispatched = scheduler
            .single_step(Some(DelayInterval::SECOND))
            .expect("step");

        assert_eq!(dispatched, 1);
        assert_eq!(received.borrow().as_slice(), b"ping");
        assert_eq!(scheduler.handler_count(), 0);
    }
}
