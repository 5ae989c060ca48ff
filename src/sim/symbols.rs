use crate::sim::scenario::{FunctionSymbol, Relocation};
use crate::watch::address::Address;
use crate::watch::engine::Engine;
use crate::watch::oracle::{
    Attribution, FunctionResolver, MemCallSite, MemFunction, Relocatables, StackTraceSource,
};
use crate::watch::register::Register;
use log::debug;
use std::str::FromStr;

/// Function symbols of a scripted program.
///
/// Serves as a function resolver and as a one-frame stack unwinder: a function containing
/// the current pc is the innermost frame, its return address is taken from the link register.
#[derive(Debug, Clone, Default)]
pub struct FunctionTable {
    functions: Vec<FunctionSymbol>,
}

impl FunctionTable {
    pub fn new(functions: Vec<FunctionSymbol>) -> Self {
        Self { functions }
    }

    pub fn find(&self, addr: Address) -> Option<&FunctionSymbol> {
        self.functions
            .iter()
            .find(|f| f.start <= addr && addr < f.end)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&FunctionSymbol> {
        self.functions.iter().find(|f| f.name == name)
    }
}

impl FunctionResolver for FunctionTable {
    fn function_containing(&self, addr: Address) -> Option<Address> {
        self.find(addr).map(|f| f.start)
    }
}

impl StackTraceSource for FunctionTable {
    fn attribute(&mut self, engine: &dyn Engine) -> Attribution {
        let Ok(pc) = engine.pc() else {
            return Attribution::NoStackTrace;
        };
        let Some(function) = self.find(pc) else {
            debug!(target: "sim", "no symbol for {pc}");
            return Attribution::NoStackTrace;
        };

        let kind = match MemFunction::from_str(&function.name) {
            Ok(MemFunction::Other(_)) | Err(_) if function.iterator => {
                MemFunction::Other(function.name.clone())
            }
            Ok(MemFunction::Other(_)) | Err(_) => return Attribution::NotMemFunction,
            Ok(kind) => kind,
        };

        let Ok(lr) = engine.register(Register::Lr) else {
            return Attribution::NoStackTrace;
        };
        Attribution::MemFunction(MemCallSite {
            function: kind,
            return_address: Address::from(lr),
        })
    }
}

/// Collect relocation thunks into lookup table.
pub fn relocatables(relocations: &[Relocation]) -> Relocatables {
    relocations
        .iter()
        .map(|r| (r.address, r.name.clone()))
        .collect()
}
