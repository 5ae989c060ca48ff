use crate::common::{addr, continuous, nop_steps, session, TestInfo};
use datawatch::sim::ScriptedEngine;
use datawatch::watch::backstop::{BackstopFire, BackstopTimer, BACKSTOP_HALT_REASON};
use datawatch::watch::config::WatchConfig;
use datawatch::watch::engine::{CycleEventId, Engine, StopReason};
use datawatch::watch::RunOutcome;
use std::cell::Cell;
use std::rc::Rc;

fn idle_program(steps: usize) -> String {
    format!(
        "arch = \"arm\"\ntext = {{ start = 0x10000, end = 0x20000 }}\n\n{}",
        nop_steps(0x10000, steps)
    )
}

fn quick_backstop() -> WatchConfig {
    WatchConfig {
        backstop_cycles: 5,
        ..continuous()
    }
}

#[test]
fn test_backstop_fires_once() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, quick_backstop());

    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    session.set_callback(Box::new(move || counter.set(counter.get() + 1)));

    session.set_range(&mut engine, addr(0x2000), 0x10, true);
    session.watch(&mut engine, false, None).unwrap();
    assert!(session.backstop_enabled());
    assert_eq!(session.backstop_target(), Some(5));

    assert_eq!(
        session.run(&mut engine).unwrap(),
        RunOutcome::Halted { cycle: 5 }
    );
    assert_eq!(engine.halt_reason(), Some(BACKSTOP_HALT_REASON));
    assert_eq!(fired.get(), 1);
    assert_eq!(session.backstop_target(), None);

    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
    assert_eq!(fired.get(), 1);
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn test_backstop_rearmed_by_access() {
    let scenario = format!(
        r#"
arch = "arm"
text = {{ start = 0x10000, end = 0x20000 }}

{}
[[steps]]
pc = 0x1000c
text = "ldr r0, [r1]"
accesses = [{{ address = 0x2000, kind = "load" }}]

{}
"#,
        nop_steps(0x10000, 3),
        nop_steps(0x10010, 10)
    );
    let mut engine = ScriptedEngine::from_toml(&scenario).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, quick_backstop());

    session.set_range(&mut engine, addr(0x2000), 0x10, true);
    session.watch(&mut engine, false, None).unwrap();

    assert_eq!(
        session.run(&mut engine).unwrap(),
        RunOutcome::Halted { cycle: 8 }
    );
    assert_eq!(info.marks().len(), 1);
    assert_eq!(info.origins()[0].cycle, 3);
    // only one event is ever pending
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn test_backstop_off_while_stopping_on_access() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let info = TestInfo::default();
    let mut session = session(
        &engine,
        &info,
        WatchConfig {
            backstop_cycles: 5,
            ..WatchConfig::default()
        },
    );

    session.set_range(&mut engine, addr(0x2000), 0x10, true);
    session.watch(&mut engine, false, Some(true)).unwrap();
    assert_eq!(session.backstop_target(), None);
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
}

#[test]
fn test_backstop_needs_set_range_opt_in() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, quick_backstop());

    session.set_range(&mut engine, addr(0x2000), 0x10, false);
    session.watch(&mut engine, false, None).unwrap();
    assert!(!session.backstop_enabled());
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
}

#[test]
fn test_backstop_cancelled_by_stop_watch() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let info = TestInfo::default();
    let mut session = session(&engine, &info, quick_backstop());

    session.set_range(&mut engine, addr(0x2000), 0x10, true);
    session.watch(&mut engine, false, None).unwrap();
    assert_eq!(engine.pending_events(), 1);

    session.stop_watch(&mut engine, None);
    assert_eq!(engine.pending_events(), 0);
    assert_eq!(session.run(&mut engine).unwrap(), RunOutcome::Exhausted);
}

#[test]
fn test_timer_rearm_replaces_event() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let mut timer = BackstopTimer::default();

    timer.arm(&mut engine, 5).unwrap();
    timer.arm(&mut engine, 8).unwrap();
    assert_eq!(engine.pending_events(), 1);
    assert_eq!(timer.target_cycle(), Some(8));
    assert_eq!(timer.timeout_cycles(), 8);

    timer.cancel(&mut engine);
    timer.cancel(&mut engine);
    assert!(!timer.is_armed());
    assert_eq!(engine.pending_events(), 0);
}

#[test]
fn test_timer_stale_events() {
    let mut engine = ScriptedEngine::from_toml(&idle_program(20)).unwrap();
    let mut timer = BackstopTimer::default();

    assert_eq!(
        timer.fire(&mut engine, CycleEventId(999)),
        BackstopFire::Stale
    );

    timer.arm(&mut engine, 3).unwrap();
    timer.detach();
    let StopReason::CycleEvent(event) = engine.resume().unwrap() else {
        panic!("cycle event expected");
    };
    assert_eq!(engine.cycles(), 3);

    // session is gone, execution must go on
    assert_eq!(timer.fire(&mut engine, event), BackstopFire::Stale);
    assert!(!engine.is_halted());
    assert!(!timer.is_armed());
}
