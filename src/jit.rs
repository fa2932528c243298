use super::error::{Error, ErrorKind};
use super::ir::{BlockId, Function, Inst, Module, Terminator};
use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

const MAX_CALL_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ModuleKey(pub(crate) u32);

/// Takes finished modules and runs the functions they define.
pub(crate) trait Jit {
    type Module;

    fn add_module(&mut self, module: Self::Module) -> Result<ModuleKey, Error>;
    fn remove_module(&mut self, key: ModuleKey);
    /// Calls the nullary function `name` and returns its result.
    fn run_function(&mut self, name: &str) -> Result<f64, Error>;
}

/// Functions the host provides to `extern` declarations.
fn host_function(name: &str) -> Option<fn(&[f64]) -> f64> {
    match name {
        "putchard" => Some(putchard),
        "printd" => Some(printd),
        _ => None,
    }
}

pub(crate) fn putchard(args: &[f64]) -> f64 {
    let c = args.first().cloned().unwrap_or(0.0) as u8 as char;
    let _ = write!(io::stderr(), "{}", c);
    0.0
}

pub(crate) fn printd(args: &[f64]) -> f64 {
    let _ = writeln!(io::stderr(), "{:.6}", args.first().cloned().unwrap_or(0.0));
    0.0
}

fn runtime<T>(msg: String) -> Result<T, Error> {
    Err(ErrorKind::Runtime(msg).into())
}

/// Runs finished modules by walking their IR.
#[derive(Default)]
pub(crate) struct Engine {
    symbols: HashMap<String, Rc<Function>>,
    modules: HashMap<ModuleKey, Vec<String>>,
    next_key: u32,
}

impl Engine {
    pub(crate) fn new() -> Engine {
        Engine::default()
    }

    #[cfg(test)]
    pub(crate) fn lookup(&self, name: &str) -> Option<Rc<Function>> {
        self.symbols.get(name).cloned()
    }

    pub(crate) fn run(&self, name: &str, args: &[f64]) -> Result<f64, Error> {
        self.call(name, args, 0)
    }

    fn call(&self, name: &str, args: &[f64], depth: usize) -> Result<f64, Error> {
        if depth >= MAX_CALL_DEPTH {
            return runtime("call stack exhausted".to_owned());
        }
        if let Some(f) = self.symbols.get(name) {
            if f.params.len() != args.len() {
                return runtime(format!(
                    "{} expects {} arguments, got {}",
                    name,
                    f.params.len(),
                    args.len()
                ));
            }
            return self.execute(f, args, depth);
        }
        match host_function(name) {
            Some(host) => Ok(host(args)),
            None => runtime(format!("unresolved symbol: {}", name)),
        }
    }

    fn execute(&self, f: &Function, args: &[f64], depth: usize) -> Result<f64, Error> {
        let mut values = vec![0.0; f.values.len()];
        values[..args.len()].copy_from_slice(args);
        let mut slots = vec![0.0; f.slots.len()];

        let mut prev = None;
        let mut cur = 0;
        loop {
            let block = &f.blocks[cur];
            for inst in &block.insts {
                match inst {
                    Inst::Const { dst, value } => values[dst.0 as usize] = *value,
                    Inst::Load { dst, slot } => values[dst.0 as usize] = slots[slot.0 as usize],
                    Inst::Store { slot, src } => slots[slot.0 as usize] = values[src.0 as usize],
                    Inst::FAdd { dst, lhs, rhs } => {
                        values[dst.0 as usize] = values[lhs.0 as usize] + values[rhs.0 as usize]
                    }
                    Inst::FSub { dst, lhs, rhs } => {
                        values[dst.0 as usize] = values[lhs.0 as usize] - values[rhs.0 as usize]
                    }
                    Inst::FMul { dst, lhs, rhs } => {
                        values[dst.0 as usize] = values[lhs.0 as usize] * values[rhs.0 as usize]
                    }
                    Inst::UltAsF64 { dst, lhs, rhs } => {
                        let (l, r) = (values[lhs.0 as usize], values[rhs.0 as usize]);
                        let lt = l < r || l.is_nan() || r.is_nan();
                        values[dst.0 as usize] = if lt { 1.0 } else { 0.0 };
                    }
                    Inst::NonZero { dst, src } => {
                        let v = values[src.0 as usize];
                        values[dst.0 as usize] = if v != 0.0 && !v.is_nan() { 1.0 } else { 0.0 };
                    }
                    Inst::Call { dst, callee, args } => {
                        let argv: Vec<f64> = args.iter().map(|a| values[a.0 as usize]).collect();
                        values[dst.0 as usize] = self.call(callee, &argv, depth + 1)?;
                    }
                    Inst::Phi { dst, incoming } => {
                        let from = incoming.iter().find(|(_, b)| Some(*b) == prev);
                        match from {
                            Some((v, _)) => values[dst.0 as usize] = values[v.0 as usize],
                            None => {
                                return runtime(format!(
                                    "{}: phi in '{}' reached from an unknown block",
                                    f.name, block.label
                                ))
                            }
                        }
                    }
                }
            }

            let next = match &block.term {
                Some(Terminator::Ret(v)) => return Ok(values[v.0 as usize]),
                Some(Terminator::Br(dest)) => *dest,
                Some(Terminator::CondBr {
                    cond,
                    then_bb,
                    else_bb,
                }) => {
                    if values[cond.0 as usize] != 0.0 {
                        *then_bb
                    } else {
                        *else_bb
                    }
                }
                None => return runtime(format!("{}: fell off block '{}'", f.name, block.label)),
            };
            prev = Some(BlockId(cur as u32));
            cur = next.0 as usize;
        }
    }
}

impl Jit for Engine {
    type Module = Module;

    /// Makes every function with a body in `module` callable by name.
    fn add_module(&mut self, module: Module) -> Result<ModuleKey, Error> {
        let key = ModuleKey(self.next_key);
        self.next_key += 1;

        let mut names = Vec::new();
        for f in module.functions {
            if f.is_declaration() {
                continue;
            }
            names.push(f.name.clone());
            self.symbols.insert(f.name.clone(), Rc::new(f));
        }
        self.modules.insert(key, names);
        Ok(key)
    }

    fn remove_module(&mut self, key: ModuleKey) {
        if let Some(names) = self.modules.remove(&key) {
            for name in names {
                self.symbols.remove(&name);
            }
        }
    }

    fn run_function(&mut self, name: &str) -> Result<f64, Error> {
        self.run(name, &[])
    }
}
