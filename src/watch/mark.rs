//! Provenance trail: typed facts about how watched data was produced or consumed.

use crate::watch::address::Address;
use std::fmt::{Display, Formatter};

/// Where and when a mark was recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkOrigin {
    pub cycle: u64,
    pub ip: Address,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WatchMark {
    /// Free-form note, e.g. the input call that filled a buffer.
    Call { msg: String },
    /// Watched data read at `addr`.
    DataRead {
        addr: Address,
        start: Address,
        length: u64,
        /// First compare instruction following the read, if any.
        cmp: String,
    },
    /// Watched data overwritten at `addr`.
    DataWrite {
        addr: Address,
        start: Address,
        length: u64,
    },
    Copy {
        src: Address,
        dest: Address,
        count: u64,
        buf_start: Option<Address>,
    },
    Compare {
        /// Compared buffer.
        dest: Address,
        src: Address,
        count: u64,
        buf_start: Option<Address>,
    },
    Fill {
        dest: Address,
        count: Option<u64>,
        buf_start: Option<Address>,
    },
    Iterator {
        function: String,
        src: Address,
        buf_start: Option<Address>,
    },
    /// Kernel returned `value` after reading watched data at `addr`.
    KernelReturn { addr: Address, value: u64 },
}

fn fmt_buf(buf_start: Option<Address>) -> String {
    buf_start.map_or_else(|| "unknown buffer".to_string(), |b| b.to_string())
}

impl Display for WatchMark {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchMark::Call { msg } => f.write_str(msg),
            WatchMark::DataRead {
                addr,
                start,
                length,
                cmp,
            } => {
                let offset = addr.distance_from(*start).unwrap_or_default();
                write!(
                    f,
                    "Read from {addr} offset {offset:4} into {start} (buf size {length:4}) {cmp}"
                )
            }
            WatchMark::DataWrite {
                addr,
                start,
                length,
            } => {
                let offset = addr.distance_from(*start).unwrap_or_default();
                write!(
                    f,
                    "Write to {addr} offset {offset:4} into {start} (buf size {length:4})"
                )
            }
            WatchMark::Copy {
                src,
                dest,
                count,
                buf_start,
            } => write!(
                f,
                "Copy {count} bytes from {src} to {dest} (from {})",
                fmt_buf(*buf_start)
            ),
            WatchMark::Compare {
                dest,
                src,
                count,
                buf_start,
            } => write!(
                f,
                "Compare {count} bytes of {dest} to {src} (from {})",
                fmt_buf(*buf_start)
            ),
            WatchMark::Fill {
                dest,
                count,
                buf_start,
            } => match count {
                Some(count) => write!(f, "Fill {count} bytes at {dest} ({})", fmt_buf(*buf_start)),
                None => write!(f, "Fill at {dest} ({})", fmt_buf(*buf_start)),
            },
            WatchMark::Iterator {
                function,
                src,
                buf_start,
            } => write!(
                f,
                "Iterator {function} over {src} (from {})",
                fmt_buf(*buf_start)
            ),
            WatchMark::KernelReturn { addr, value } => {
                write!(f, "Kernel read {addr}, returned {value:#x}")
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordedMark {
    pub origin: MarkOrigin,
    pub mark: WatchMark,
}

/// Sink for provenance marks. Index returned by [`ProvenanceRecorder::record`] is used
/// later for cycle based navigation.
pub trait ProvenanceRecorder {
    fn record(&mut self, mark: RecordedMark) -> usize;

    fn get(&self, index: usize) -> Option<&RecordedMark>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Called once execution halted on a watched access.
    fn on_halt(&mut self, _origin: MarkOrigin) {}
}

/// In-memory provenance trail.
#[derive(Default, Debug)]
pub struct MarkLog {
    marks: Vec<RecordedMark>,
    halts: Vec<MarkOrigin>,
}

impl MarkLog {
    pub fn marks(&self) -> &[RecordedMark] {
        &self.marks
    }

    /// Points where execution halted on a watched access.
    pub fn halts(&self) -> &[MarkOrigin] {
        &self.halts
    }
}

impl ProvenanceRecorder for MarkLog {
    fn record(&mut self, mark: RecordedMark) -> usize {
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
        self.halts.clear();
    }

    fn on_halt(&mut self, origin: MarkOrigin) {
        self.halts.push(origin);
    }
}
