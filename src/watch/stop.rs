//! Chain of deferred functions invoked exactly once when execution halts.

use crate::watch::error::Error;
use smallvec::SmallVec;

/// Maximum number of stored arguments of a direct stop function.
pub const MAX_STOP_ARGS: usize = 3;

pub type StopArgs = SmallVec<[u64; MAX_STOP_ARGS]>;
pub type DirectFn<C> = Box<dyn FnOnce(&mut C, &[u64])>;
pub type NestedFn<C> = Box<dyn FnOnce(&mut C, Vec<StopFunction<C>>)>;
pub type Cleanup<C> = Box<dyn FnOnce(&mut C)>;

/// Element of a stop chain.
pub enum StopFunction<C> {
    /// Invoked with its own stored arguments.
    Direct {
        fun: DirectFn<C>,
        args: StopArgs,
        match_pid: bool,
    },
    /// Invoked with the rest of a chain, becomes responsible for continuing it.
    Nested { fun: NestedFn<C>, match_pid: bool },
}

impl<C> StopFunction<C> {
    /// Create a direct function with up to [`MAX_STOP_ARGS`] arguments.
    pub fn direct(fun: impl FnOnce(&mut C, &[u64]) + 'static, args: &[u64]) -> Result<Self, Error> {
        if args.len() > MAX_STOP_ARGS {
            return Err(Error::TooManyStopArguments(args.len()));
        }
        Ok(Self::Direct {
            fun: Box::new(fun),
            args: SmallVec::from_slice(args),
            match_pid: false,
        })
    }

    pub fn nested(fun: impl FnOnce(&mut C, Vec<StopFunction<C>>) + 'static) -> Self {
        Self::Nested {
            fun: Box::new(fun),
            match_pid: false,
        }
    }

    /// Skip this function when a halt is attributed to a foreign process.
    pub fn with_match_pid(mut self) -> Self {
        match &mut self {
            StopFunction::Direct { match_pid, .. } | StopFunction::Nested { match_pid, .. } => {
                *match_pid = true
            }
        }
        self
    }

    pub fn match_pid(&self) -> bool {
        match self {
            StopFunction::Direct { match_pid, .. } | StopFunction::Nested { match_pid, .. } => {
                *match_pid
            }
        }
    }

    /// Invoke without a chain. Nested function receives an empty remainder.
    fn invoke(self, cx: &mut C) {
        match self {
            StopFunction::Direct { fun, args, .. } => fun(cx, &args),
            StopFunction::Nested { fun, .. } => fun(cx, vec![]),
        }
    }
}

/// Invoke every function directly, in order. Used by nested functions to finish a chain.
pub fn run_all<C>(cx: &mut C, functions: Vec<StopFunction<C>>) {
    functions.into_iter().for_each(|f| f.invoke(cx));
}

/// Set of actions built for a single intentional halt.
pub struct StopAction<C> {
    cleanup: Option<Cleanup<C>>,
    functions: Vec<StopFunction<C>>,
}

impl<C> StopAction<C> {
    pub fn new(functions: Vec<StopFunction<C>>) -> Self {
        Self {
            cleanup: None,
            functions,
        }
    }

    /// Set an action executed before any function of a chain.
    pub fn with_cleanup(mut self, cleanup: impl FnOnce(&mut C) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Consume an action: run cleanup, then a chain.
    ///
    /// If the first function is nested it gets the rest of the chain and nothing else runs here.
    /// Otherwise the first function and then every remaining one are invoked directly,
    /// remaining functions flagged with `match_pid` are skipped if `wrong_pid` is set.
    pub fn run(self, cx: &mut C, wrong_pid: bool) {
        if let Some(cleanup) = self.cleanup {
            cleanup(cx);
        }

        let mut functions = self.functions.into_iter();
        let Some(first) = functions.next() else {
            return;
        };

        match first {
            StopFunction::Nested { fun, .. } => fun(cx, functions.collect()),
            StopFunction::Direct { fun, args, .. } => {
                fun(cx, &args);
                functions
                    .filter(|f| !(wrong_pid && f.match_pid()))
                    .for_each(|f| f.invoke(cx));
            }
        }
    }
}
