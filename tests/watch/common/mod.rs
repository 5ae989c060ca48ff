use datawatch::sim::ScriptedEngine;
use datawatch::watch::address::Address;
use datawatch::watch::config::WatchConfig;
use datawatch::watch::mark::{MarkOrigin, ProvenanceRecorder, RecordedMark, WatchMark};
use datawatch::watch::{WatchSession, WatchSessionBuilder};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct TestInfo {
    pub marks: Rc<RefCell<Vec<RecordedMark>>>,
    pub halts: Rc<RefCell<Vec<MarkOrigin>>>,
}

impl TestInfo {
    pub fn marks(&self) -> Vec<WatchMark> {
        self.marks.borrow().iter().map(|m| m.mark.clone()).collect()
    }

    pub fn origins(&self) -> Vec<MarkOrigin> {
        self.marks.borrow().iter().map(|m| m.origin).collect()
    }
}

/// Recorder sharing everything it gets with a test.
#[derive(Default)]
pub struct TestRecorder {
    marks: Vec<RecordedMark>,
    info: TestInfo,
}

impl TestRecorder {
    pub fn new(info: TestInfo) -> Self {
        Self {
            marks: vec![],
            info,
        }
    }
}

impl ProvenanceRecorder for TestRecorder {
    fn record(&mut self, mark: RecordedMark) -> usize {
        self.info.marks.borrow_mut().push(mark.clone());
        self.marks.push(mark);
        self.marks.len() - 1
    }

    fn get(&self, index: usize) -> Option<&RecordedMark> {
        self.marks.get(index)
    }

    fn len(&self) -> usize {
        self.marks.len()
    }

    fn clear(&mut self) {
        self.marks.clear();
        self.info.marks.borrow_mut().clear();
        self.info.halts.borrow_mut().clear();
    }

    fn on_halt(&mut self, origin: MarkOrigin) {
        self.info.halts.borrow_mut().push(origin);
    }
}

pub fn addr(a: u64) -> Address {
    Address::from(a)
}

/// Record and keep going on every access.
pub fn continuous() -> WatchConfig {
    WatchConfig {
        break_simulation: false,
        ..WatchConfig::default()
    }
}

/// Session with symbols of a scripted program.
pub fn session(engine: &ScriptedEngine, info: &TestInfo, config: WatchConfig) -> WatchSession {
    WatchSessionBuilder::new()
        .with_config(config)
        .with_recorder(TestRecorder::new(info.clone()))
        .with_stack_trace(engine.functions().clone())
        .with_function_resolver(engine.functions().clone())
        .with_relocatables(engine.relocatables().clone())
        .build()
}

/// `count` instructions without memory accesses starting at `pc`.
pub fn nop_steps(pc: u64, count: usize) -> String {
    (0..count)
        .map(|i| {
            format!(
                "[[steps]]\npc = {:#x}\ntext = \"nop\"\n\n",
                pc + 4 * i as u64
            )
        })
        .collect()
}

#[macro_export]
macro_rules! assert_bounds {
    ($session:expr, $expected:expr) => {
        let bounds: Vec<(u64, u64)> = $session
            .ranges()
            .active()
            .map(|(_, r)| (r.start.as_u64(), r.length))
            .collect();
        assert_eq!(bounds, $expected);
    };
}
