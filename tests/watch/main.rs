mod common;

mod backstop;
mod classify;

use crate::common::{addr, continuous, session, TestInfo};
use datawatch::sim::ScriptedEngine;
use datawatch::watch::engine::Engine;
use datawatch::watch::mark::WatchMark;
use datawatch::watch::range::Insertion;
use datawatch::watch::{Error, RunOutcome};

const READ_LOOP: &str = r#"
arch = "arm"
text = { start = 0x10000, end = 0x20000 }
base_cycle = 100

[[functions]]
name = "main"
start = 0x10000
end = 0x10100

[[steps]]
pc = 0x10000
text = "mov r0, #0x2000"
registers = { r0 = 0x2000 }

[[steps]]
pc = 0x10004
text = "ldrb r3, [r0]"
accesses = [{ address = 0x2000, size = 1, kind = "load" }]

[[steps]]
pc = 0x10008
text = "cmp r3, #0x47"

[[steps]]
pc = 0x1000c
text = "ldrb r3, [r0, #1]"
accesses = [{ address = 0x2001, size = 1, kind = "load" }]

[[steps]]
pc = 0x10010
text = "cmp r3, #0x45"
"#;

#[test]
fn test_set_range_while_armed() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    assert!(session.watch(&mut engine, false, None).unwrap());
    assert_eq!(engine.breakpoint_count(), 1);

    let insertion = session.set_range(&mut engine, addr(0x2010), 0x8, false);
    assert_eq!(insertion, Insertion::Merged(0));
    assert_eq!(engine.breakpoint_count(), 1);
    assert_bounds!(session, vec![(0x2000, 0x18)]);

    let insertion = session.set_range(&mut engine, addr(0x5000), 0x4, false);
    assert_eq!(insertion, Insertion::Appended(1));
    assert_eq!(engine.breakpoint_count(), 2);

    session.stop_watch(&mut engine, None);
    assert_eq!(engine.breakpoint_count(), 0);
    assert!(!session.is_armed());
}

#[test]
fn test_set_range_absorbs_armed_ranges() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x1000), 0x10, false);
    session.set_range(&mut engine, addr(0x1020), 0x10, false);
    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(engine.breakpoint_count(), 3);

    // union reaches into the second range
    let insertion = session.set_range(&mut engine, addr(0x1008), 0x20, false);
    assert_eq!(insertion, Insertion::Merged(0));
    assert_bounds!(session, vec![(0x1000, 0x30), (0x2000, 0x10)]);
    assert_eq!(engine.breakpoint_count(), 2);
    assert!(session.ranges().get(1).unwrap().handle().is_none());

    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(info.marks().len(), 2);
}

#[test]
fn test_replay_after_rewind() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(info.marks().len(), 2);

    // back to the first read, the second one is seen again
    assert_eq!(session.go_to_mark(&mut engine, 0).unwrap(), 101);
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    let cycles: Vec<u64> = info.origins().iter().map(|o| o.cycle).collect();
    assert_eq!(cycles, vec![101, 103, 103]);

    // from the very start
    engine.skip_to(100).unwrap();
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    let cycles: Vec<u64> = info.origins().iter().map(|o| o.cycle).collect();
    assert_eq!(cycles, vec![101, 103, 103, 101, 103]);
}

#[test]
fn test_watch_without_ranges() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    assert!(!session.watch(&mut engine, false, None).unwrap());
    assert!(!session.is_armed());
    assert_eq!(
        session.run(&mut engine).unwrap(),
        RunOutcome::Exhausted
    );
    assert!(info.marks().is_empty());
}

#[test]
fn test_clear_watches() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    engine.skip_to(102).unwrap();
    session.set_range(&mut engine, addr(0x3000), 0x10, false);
    engine.skip_to(103).unwrap();
    session.set_range(&mut engine, addr(0x4000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(engine.breakpoint_count(), 3);

    session.clear_watches(&mut engine, Some(102));
    assert_bounds!(session, vec![(0x2000, 0x10), (0x3000, 0x10)]);
    assert_eq!(engine.breakpoint_count(), 0);
    assert!(session.would_break_simulation());

    session.clear_watches(&mut engine, None);
    assert!(session.ranges().is_empty());
}

#[test]
fn test_marks_navigation() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    let origins = info.origins();
    assert_eq!(origins.len(), 2);
    assert_eq!(origins[0].cycle, 101);
    assert_eq!(origins[1].cycle, 103);

    assert_eq!(session.go_to_mark(&mut engine, 0).unwrap(), 101);
    assert_eq!(engine.cycles(), 101);
    assert_eq!(engine.pc().unwrap(), addr(0x10004));
    assert!(matches!(
        session.go_to_mark(&mut engine, 5),
        Err(Error::MarkNotFound(5))
    ));

    let function = session.tag_iterator(1).unwrap();
    assert_eq!(function, addr(0x10000));
    assert!(session.user_iterators().is_iterator(addr(0x10000)));

    session.clear_watch_marks();
    assert!(session.watch_marks().is_empty());
    assert!(info.marks().is_empty());
}

#[test]
fn test_tag_iterator_without_symbols() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = datawatch::watch::WatchSessionBuilder::new()
        .with_config(continuous())
        .with_recorder(common::TestRecorder::new(info.clone()))
        .build();

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    session.run(&mut engine).unwrap();
    assert_eq!(info.marks().len(), 2);
    assert!(matches!(session.tag_iterator(0), Err(Error::NoFunctionInfo)));
}

#[test]
fn test_call_marks() {
    let engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.mark_call(&engine, "read FD: 3 count: 16", Some(7));
    session.close(&engine, 3);
    assert_eq!(
        info.marks(),
        vec![
            WatchMark::Call {
                msg: "read FD".to_string()
            },
            WatchMark::Call {
                msg: "closed FD: 3".to_string()
            },
        ]
    );
}

#[test]
fn test_show_cmp_toggle() {
    let mut engine = ScriptedEngine::from_toml(READ_LOOP).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    assert!(session.toggle_show_cmp());
    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, true, None).unwrap();
    assert!(session.config().show_cmp);
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(info.marks().len(), 2);
    assert!(!session.toggle_show_cmp());
}
