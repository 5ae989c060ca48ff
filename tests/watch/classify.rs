use crate::assert_bounds;
use crate::common::{addr, continuous, session, TestInfo};
use datawatch::sim::ScriptedEngine;
use datawatch::watch::config::WatchConfig;
use datawatch::watch::engine::Engine;
use datawatch::watch::mark::{MarkOrigin, WatchMark};
use datawatch::watch::RunOutcome;

const WRITE_THEN_READ: &str = r#"
arch = "arm"
text = { start = 0x10000, end = 0x20000 }
base_cycle = 100

[[steps]]
pc = 0x10000
text = "mov r0, #0x2000"
registers = { r0 = 0x2000 }

[[steps]]
pc = 0x10004
text = "str r2, [r0, #4]"
accesses = [{ address = 0x2004, kind = "store" }]

[[steps]]
pc = 0x10008
text = "ldr r3, [r0, #4]"
accesses = [{ address = 0x2004, kind = "load" }]

[[steps]]
pc = 0x1000c
text = "cmp r3, r2"
"#;

#[test]
fn test_stop_on_write() {
    let mut engine = ScriptedEngine::from_toml(WRITE_THEN_READ).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, WatchConfig::default());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, Some(true)).unwrap();

    let outcome = session.run(&mut engine).unwrap();
    assert_eq!(outcome, RunOutcome::Halted { cycle: 101 });
    assert_eq!(engine.halt_reason(), Some("DataWatch written data"));
    assert_eq!(
        info.marks(),
        vec![WatchMark::DataWrite {
            addr: addr(0x2004),
            start: addr(0x2000),
            length: 0x10,
        }]
    );
    assert_eq!(
        *info.halts.borrow(),
        vec![MarkOrigin {
            cycle: 101,
            ip: addr(0x10004)
        }]
    );

    // range is consumed
    let range = session.ranges().get(0).unwrap();
    assert!(!range.is_active());
    assert!(range.start.is_null());
    assert_eq!(session.find_range(addr(0x2004)), None);
    assert!(!session.is_armed());

    // nothing left to watch, the read goes unnoticed
    assert!(!session.watch(&mut engine, false, None).unwrap());
    assert!(!session.is_armed());
    assert_eq!(engine.breakpoint_count(), 0);
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(info.marks().len(), 1);
    assert_eq!(info.halts.borrow().len(), 1);
}

#[test]
fn test_continuous_write_and_read() {
    let mut engine = ScriptedEngine::from_toml(WRITE_THEN_READ).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();

    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(
        info.marks(),
        vec![
            WatchMark::DataWrite {
                addr: addr(0x2004),
                start: addr(0x2000),
                length: 0x10,
            },
            WatchMark::DataRead {
                addr: addr(0x2004),
                start: addr(0x2000),
                length: 0x10,
                cmp: "cmp r3, r2".to_string(),
            },
        ]
    );
    assert!(info.halts.borrow().is_empty());
    assert_bounds!(session, vec![(0x2000, 0x10)]);
    assert!(session.is_armed());
}

#[test]
fn test_stop_on_read() {
    let mut engine = ScriptedEngine::from_toml(WRITE_THEN_READ).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, WatchConfig::default());

    // write happens before the range exists
    engine.skip_to(101).unwrap();
    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();

    assert_eq!(
        session.run(&mut engine).unwrap(),
        RunOutcome::Halted { cycle: 102 }
    );
    assert_eq!(engine.halt_reason(), Some("DataWatch read data"));
    assert!(matches!(
        info.marks().as_slice(),
        [WatchMark::DataRead { addr: a, cmp, .. }] if *a == addr(0x2004) && cmp == "cmp r3, r2"
    ));
    // read does not consume a range
    assert_bounds!(session, vec![(0x2000, 0x10)]);
    assert_eq!(info.halts.borrow().len(), 1);
}

#[test]
fn test_same_cycle_accesses_coalesced() {
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[steps]]
    pc = 0x10000
    text = "ldrd r2, r3, [r0]"
    accesses = [
        { address = 0x2000, kind = "load" },
        { address = 0x2004, kind = "load" },
    ]

    [[steps]]
    pc = 0x10004
    text = "ldr r4, [r0, #8]"
    accesses = [{ address = 0x2008, kind = "load" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    let origins = info.origins();
    assert_eq!(origins.len(), 2);
    assert_eq!(origins[0].cycle, 0);
    assert_eq!(origins[1].cycle, 1);
    assert!(matches!(
        info.marks()[0],
        WatchMark::DataRead { addr: a, ref cmp, .. } if a == addr(0x2000) && cmp.is_empty()
    ));
}

#[test]
fn test_kernel_read_captures_return_value() {
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[steps]]
    pc = 0x10000
    text = "svc #0"
    registers = { r1 = 0x2000 }

    [[steps]]
    pc = 0xc0001000
    text = "ldr r3, [r1]"
    privilege = "kernel"
    accesses = [{ address = 0x2000, kind = "load" }]

    [[steps]]
    pc = 0xc0008000
    text = "movs pc, lr"
    privilege = "kernel"
    registers = { r0 = 7 }

    [[steps]]
    pc = 0x10004
    text = "ldr r2, [r1, #4]"
    accesses = [{ address = 0x2004, kind = "load" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let config = WatchConfig {
        kernel_return: Some(addr(0xc0008000)),
        ..continuous()
    };
    let mut session = session(&engine, &info, config);

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    let marks = info.marks();
    assert_eq!(marks.len(), 3);
    assert!(matches!(marks[0], WatchMark::DataRead { addr: a, .. } if a == addr(0x2000)));
    assert_eq!(
        marks[1],
        WatchMark::KernelReturn {
            addr: addr(0x2000),
            value: 7
        }
    );
    assert!(matches!(marks[2], WatchMark::DataRead { addr: a, .. } if a == addr(0x2004)));
    assert!(session.is_armed());
}

#[test]
fn test_kernel_read_without_return_point() {
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[steps]]
    pc = 0xc0001000
    text = "ldr r3, [r1]"
    privilege = "kernel"
    accesses = [{ address = 0x2000, kind = "load" }]

    [[steps]]
    pc = 0x10004
    text = "ldr r2, [r1, #4]"
    accesses = [{ address = 0x2004, kind = "load" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    // watching goes on right away
    assert_eq!(info.marks().len(), 2);
    assert!(session.is_armed());
}

#[test]
fn test_kernel_write_ignored() {
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[steps]]
    pc = 0xc0001000
    text = "str r3, [r1]"
    privilege = "kernel"
    accesses = [{ address = 0x2000, kind = "store" }]

    [[steps]]
    pc = 0x10000
    text = "str r2, [r1, #4]"
    accesses = [{ address = 0x2004, kind = "store" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, WatchConfig::default());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();

    // kernel store does not halt and keeps the watch, user store does
    assert_eq!(
        session.run(&mut engine).unwrap(),
        RunOutcome::Halted { cycle: 1 }
    );
    assert_eq!(
        info.marks(),
        vec![WatchMark::DataWrite {
            addr: addr(0x2004),
            start: addr(0x2000),
            length: 0x10,
        }]
    );
}

#[test]
fn test_access_outside_known_code() {
    // no symbols: a stack trace is not available and the access is dropped
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[steps]]
    pc = 0x50000
    text = "ldr r3, [r1]"
    accesses = [{ address = 0x2000, kind = "load" }]

    [[steps]]
    pc = 0x10000
    text = "ldr r2, [r1, #4]"
    accesses = [{ address = 0x2004, kind = "load" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    assert!(matches!(
        info.marks().as_slice(),
        [WatchMark::DataRead { addr: a, .. }] if *a == addr(0x2004)
    ));
    assert!(session.is_armed());
}

#[test]
fn test_library_access_not_mem_function() {
    let scenario = r#"
    arch = "arm"
    text = { start = 0x10000, end = 0x20000 }

    [[functions]]
    name = "atoi"
    start = 0x40000
    end = 0x40100

    [[steps]]
    pc = 0x40000
    text = "ldrb r3, [r0]"
    registers = { lr = 0x10004 }
    accesses = [{ address = 0x2000, size = 1, kind = "load" }]
    "#;
    let mut engine = ScriptedEngine::from_toml(scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, continuous());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);

    // recorded as a plain read
    assert!(matches!(
        info.marks().as_slice(),
        [WatchMark::DataRead { addr: a, .. }] if *a == addr(0x2000)
    ));
    assert!(session.is_armed());
    assert_eq!(engine.breakpoint_count(), 1);
}
