use super::backend::Backend;
use super::error::{Error, ErrorKind};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ValueId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FuncId(pub(crate) u32);

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Inst {
    Const { dst: ValueId, value: f64 },
    Load { dst: ValueId, slot: SlotId },
    Store { slot: SlotId, src: ValueId },
    FAdd { dst: ValueId, lhs: ValueId, rhs: ValueId },
    FSub { dst: ValueId, lhs: ValueId, rhs: ValueId },
    FMul { dst: ValueId, lhs: ValueId, rhs: ValueId },
    UltAsF64 { dst: ValueId, lhs: ValueId, rhs: ValueId },
    NonZero { dst: ValueId, src: ValueId },
    Call { dst: ValueId, callee: String, args: Vec<ValueId> },
    // SSA join, keyed by predecessor block
    Phi { dst: ValueId, incoming: Vec<(ValueId, BlockId)> },
}

impl Inst {
    pub(crate) fn dst(&self) -> Option<ValueId> {
        match *self {
            Inst::Store { .. } => None,
            Inst::Const { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::FAdd { dst, .. }
            | Inst::FSub { dst, .. }
            | Inst::FMul { dst, .. }
            | Inst::UltAsF64 { dst, .. }
            | Inst::NonZero { dst, .. }
            | Inst::Call { dst, .. }
            | Inst::Phi { dst, .. } => Some(dst),
        }
    }

    fn operands(&self) -> Vec<ValueId> {
        match self {
            Inst::Const { .. } | Inst::Load { .. } => vec![],
            Inst::Store { src, .. } | Inst::NonZero { src, .. } => vec![*src],
            Inst::FAdd { lhs, rhs, .. }
            | Inst::FSub { lhs, rhs, .. }
            | Inst::FMul { lhs, rhs, .. }
            | Inst::UltAsF64 { lhs, rhs, .. } => vec![*lhs, *rhs],
            Inst::Call { args, .. } => args.clone(),
            Inst::Phi { incoming, .. } => incoming.iter().map(|(v, _)| *v).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Terminator {
    Br(BlockId),
    CondBr {
        cond: ValueId,
        then_bb: BlockId,
        else_bb: BlockId,
    },
    Ret(ValueId),
}

impl Terminator {
    fn successors(&self) -> Vec<BlockId> {
        match *self {
            Terminator::Br(dest) => vec![dest],
            Terminator::CondBr {
                then_bb, else_bb, ..
            } => vec![then_bb, else_bb],
            Terminator::Ret(_) => vec![],
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Block {
    pub(crate) label: String,
    pub(crate) insts: Vec<Inst>,
    pub(crate) term: Option<Terminator>,
}

#[derive(Clone, Debug)]
pub(crate) struct Function {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) blocks: Vec<Block>,
    /// Debug name of every value; parameters come first.
    pub(crate) values: Vec<String>,
    pub(crate) slots: Vec<String>,
}

impl Function {
    fn new(name: &str, params: &[String]) -> Function {
        Function {
            name: name.to_owned(),
            params: params.to_vec(),
            blocks: Vec::new(),
            values: params.to_vec(),
            slots: Vec::new(),
        }
    }

    pub(crate) fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    fn predecessors(&self) -> Vec<HashSet<BlockId>> {
        let mut preds = vec![HashSet::new(); self.blocks.len()];
        for (i, b) in self.blocks.iter().enumerate() {
            if let Some(term) = &b.term {
                for succ in term.successors() {
                    if let Some(p) = preds.get_mut(succ.0 as usize) {
                        p.insert(BlockId(i as u32));
                    }
                }
            }
        }
        preds
    }

    fn value_label(&self, v: ValueId) -> String {
        let i = v.0 as usize;
        match self.values.get(i) {
            Some(name) if i < self.params.len() => format!("%{}", name),
            Some(name) if !name.is_empty() => format!("%{}{}", name, i),
            _ => format!("%{}", i),
        }
    }

    fn slot_label(&self, s: SlotId) -> String {
        match self.slots.get(s.0 as usize) {
            Some(name) => format!("%{}.addr{}", name, s.0),
            None => format!("%slot{}", s.0),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Module {
    pub(crate) name: String,
    pub(crate) functions: Vec<Function>,
}

impl Module {
    pub(crate) fn new(name: &str) -> Module {
        Module {
            name: name.to_owned(),
            functions: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Structural checks run on every completed function.
pub(crate) fn verify(f: &Function) -> Result<(), Error> {
    let fail = |msg: String| -> Result<(), Error> {
        Err(ErrorKind::Verify(format!("{}: {}", f.name, msg)).into())
    };

    if f.blocks.is_empty() {
        return fail("function has no body".to_owned());
    }

    let mut defined: HashSet<ValueId> = (0..f.params.len()).map(|i| ValueId(i as u32)).collect();
    for b in &f.blocks {
        for inst in &b.insts {
            if let Some(dst) = inst.dst() {
                if !defined.insert(dst) {
                    return fail(format!("value {} defined twice", f.value_label(dst)));
                }
            }
        }
    }

    let preds = f.predecessors();
    for (i, b) in f.blocks.iter().enumerate() {
        let term = match &b.term {
            Some(term) => term,
            None => return fail(format!("block '{}' has no terminator", b.label)),
        };
        for succ in term.successors() {
            if succ.0 as usize >= f.blocks.len() {
                return fail(format!("block '{}' branches to a missing block", b.label));
            }
        }

        let mut seen_non_phi = false;
        for inst in &b.insts {
            for v in inst.operands() {
                if !defined.contains(&v) {
                    return fail(format!("use of undefined value {}", f.value_label(v)));
                }
            }
            match inst {
                Inst::Phi { incoming, .. } => {
                    if seen_non_phi {
                        return fail(format!("phi not at top of block '{}'", b.label));
                    }
                    for (_, from) in incoming {
                        if !preds[i].contains(from) {
                            return fail(format!(
                                "phi in '{}' names a block that is not a predecessor",
                                b.label
                            ));
                        }
                    }
                }
                Inst::Load { slot, .. } | Inst::Store { slot, .. } => {
                    if slot.0 as usize >= f.slots.len() {
                        return fail(format!("unknown stack slot in '{}'", b.label));
                    }
                    seen_non_phi = true;
                }
                _ => seen_non_phi = true,
            }
        }

        let cond = match term {
            Terminator::CondBr { cond, .. } => Some(*cond),
            Terminator::Ret(v) => Some(*v),
            Terminator::Br(_) => None,
        };
        if let Some(v) = cond {
            if !defined.contains(&v) {
                return fail(format!("use of undefined value {}", f.value_label(v)));
            }
        }
    }

    Ok(())
}

fn fold(inst: &Inst, known: &HashMap<ValueId, f64>) -> Option<f64> {
    let get = |v: &ValueId| known.get(v).cloned();
    match inst {
        Inst::FAdd { lhs, rhs, .. } => Some(get(lhs)? + get(rhs)?),
        Inst::FSub { lhs, rhs, .. } => Some(get(lhs)? - get(rhs)?),
        Inst::FMul { lhs, rhs, .. } => Some(get(lhs)? * get(rhs)?),
        Inst::UltAsF64 { lhs, rhs, .. } => {
            let (l, r) = (get(lhs)?, get(rhs)?);
            // unordered: true when either side is NaN
            Some(if l < r || l.is_nan() || r.is_nan() { 1.0 } else { 0.0 })
        }
        Inst::NonZero { src, .. } => {
            let v = get(src)?;
            Some(if v != 0.0 && !v.is_nan() { 1.0 } else { 0.0 })
        }
        _ => None,
    }
}

/// Constant folding: arithmetic whose operands are all constants becomes a constant.
pub(crate) fn fold_constants(f: &mut Function) {
    let mut known: HashMap<ValueId, f64> = HashMap::new();
    loop {
        let mut changed = false;
        for b in &mut f.blocks {
            for inst in &mut b.insts {
                if let Inst::Const { dst, value } = *inst {
                    known.insert(dst, value);
                    continue;
                }
                if let (Some(dst), Some(value)) = (inst.dst(), fold(inst, &known)) {
                    *inst = Inst::Const { dst, value };
                    known.insert(dst, value);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Emits into an in-memory [`Module`].
pub(crate) struct IrBuilder {
    module: Module,
    func: usize,
    block: BlockId,
}

impl IrBuilder {
    pub(crate) fn new(module_name: &str) -> IrBuilder {
        IrBuilder {
            module: Module::new(module_name),
            func: 0,
            block: BlockId(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn module(&self) -> &Module {
        &self.module
    }

    fn func_mut(&mut self) -> &mut Function {
        &mut self.module.functions[self.func]
    }

    fn new_value(&mut self, name: &str) -> ValueId {
        let f = self.func_mut();
        let id = ValueId(f.values.len() as u32);
        f.values.push(name.to_owned());
        id
    }

    fn emit(&mut self, inst: Inst) {
        let b = self.block.0 as usize;
        self.func_mut().blocks[b].insts.push(inst);
    }

    fn terminate(&mut self, term: Terminator) {
        let b = self.block.0 as usize;
        self.func_mut().blocks[b].term = Some(term);
    }
}

impl Backend for IrBuilder {
    type Value = ValueId;
    type Function = FuncId;
    type Block = (FuncId, BlockId);
    type Slot = SlotId;
    type Module = Module;

    fn get_function(&self, name: &str) -> Option<FuncId> {
        self.module
            .functions
            .iter()
            .position(|f| f.name == name)
            .map(|i| FuncId(i as u32))
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> FuncId {
        if let Some(f) = self.get_function(name) {
            return f;
        }
        self.module.functions.push(Function::new(name, params));
        FuncId(self.module.functions.len() as u32 - 1)
    }

    fn count_params(&self, f: FuncId) -> usize {
        self.module.functions[f.0 as usize].params.len()
    }

    fn param(&self, _f: FuncId, index: usize) -> ValueId {
        ValueId(index as u32)
    }

    fn has_body(&self, f: FuncId) -> bool {
        !self.module.functions[f.0 as usize].is_declaration()
    }

    fn delete_function(&mut self, f: FuncId) {
        self.module.functions.remove(f.0 as usize);
    }

    fn append_block(&mut self, f: FuncId, name: &str) -> (FuncId, BlockId) {
        let blocks = &mut self.module.functions[f.0 as usize].blocks;
        blocks.push(Block {
            label: name.to_owned(),
            insts: Vec::new(),
            term: None,
        });
        (f, BlockId(blocks.len() as u32 - 1))
    }

    fn position_at_end(&mut self, (f, block): (FuncId, BlockId)) {
        self.func = f.0 as usize;
        self.block = block;
    }

    fn insert_block(&self) -> (FuncId, BlockId) {
        (FuncId(self.func as u32), self.block)
    }

    fn build_entry_alloca(&mut self, f: FuncId, name: &str) -> SlotId {
        let slots = &mut self.module.functions[f.0 as usize].slots;
        slots.push(name.to_owned());
        SlotId(slots.len() as u32 - 1)
    }

    fn build_load(&mut self, slot: SlotId, name: &str) -> ValueId {
        let dst = self.new_value(name);
        self.emit(Inst::Load { dst, slot });
        dst
    }

    fn build_store(&mut self, src: ValueId, slot: SlotId) {
        self.emit(Inst::Store { slot, src });
    }

    fn const_f64(&mut self, value: f64) -> ValueId {
        let dst = self.new_value("");
        self.emit(Inst::Const { dst, value });
        dst
    }

    fn build_fadd(&mut self, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        let dst = self.new_value(name);
        self.emit(Inst::FAdd { dst, lhs, rhs });
        dst
    }

    fn build_fsub(&mut self, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        let dst = self.new_value(name);
        self.emit(Inst::FSub { dst, lhs, rhs });
        dst
    }

    fn build_fmul(&mut self, lhs: ValueId, rhs: ValueId, name: &str) -> ValueId {
        let dst = self.new_value(name);
        self.emit(Inst::FMul { dst, lhs, rhs });
        dst
    }

    fn build_ult_as_f64(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dst = self.new_value("booltmp");
        self.emit(Inst::UltAsF64 { dst, lhs, rhs });
        dst
    }

    fn build_nonzero(&mut self, src: ValueId, name: &str) -> ValueId {
        let dst = self.new_value(name);
        self.emit(Inst::NonZero { dst, src });
        dst
    }

    fn build_call(&mut self, f: FuncId, args: &[ValueId], name: &str) -> ValueId {
        let callee = self.module.functions[f.0 as usize].name.clone();
        let dst = self.new_value(name);
        self.emit(Inst::Call {
            dst,
            callee,
            args: args.to_vec(),
        });
        dst
    }

    fn build_cond_br(&mut self, cond: ValueId, then: (FuncId, BlockId), els: (FuncId, BlockId)) {
        self.terminate(Terminator::CondBr {
            cond,
            then_bb: then.1,
            else_bb: els.1,
        });
    }

    fn build_br(&mut self, dest: (FuncId, BlockId)) {
        self.terminate(Terminator::Br(dest.1));
    }

    fn build_phi(&mut self, incoming: &[(ValueId, (FuncId, BlockId))], name: &str) -> ValueId {
        let dst = self.new_value(name);
        let incoming = incoming.iter().map(|&(v, (_, b))| (v, b)).collect();
        let b = self.block.0 as usize;
        let insts = &mut self.func_mut().blocks[b].insts;
        let at = insts
            .iter()
            .take_while(|i| matches!(i, Inst::Phi { .. }))
            .count();
        insts.insert(at, Inst::Phi { dst, incoming });
        dst
    }

    fn build_ret(&mut self, value: ValueId) {
        self.terminate(Terminator::Ret(value));
    }

    fn verify_function(&self, f: FuncId) -> Result<(), Error> {
        verify(&self.module.functions[f.0 as usize])
    }

    fn optimize_function(&mut self, f: FuncId) {
        fold_constants(&mut self.module.functions[f.0 as usize]);
    }

    fn print_function(&self, f: FuncId) -> String {
        self.module.functions[f.0 as usize].to_string()
    }

    fn take_module(&mut self) -> Module {
        let name = self.module.name.clone();
        self.func = 0;
        self.block = BlockId(0);
        std::mem::replace(&mut self.module, Module::new(&name))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("double %{}", p))
            .collect();
        if self.is_declaration() {
            return writeln!(f, "declare double @{}({})", self.name, params.join(", "));
        }

        writeln!(f, "define double @{}({}) {{", self.name, params.join(", "))?;
        for (i, b) in self.blocks.iter().enumerate() {
            writeln!(f, "{}:", b.label)?;
            if i == 0 {
                for s in 0..self.slots.len() {
                    writeln!(f, "  {} = alloca double", self.slot_label(SlotId(s as u32)))?;
                }
            }
            for inst in &b.insts {
                write!(f, "  ")?;
                self.fmt_inst(f, inst)?;
                writeln!(f)?;
            }
            match &b.term {
                Some(Terminator::Br(dest)) => writeln!(f, "  br label %{}", self.block(*dest).label)?,
                Some(Terminator::CondBr {
                    cond,
                    then_bb,
                    else_bb,
                }) => writeln!(
                    f,
                    "  br i1 {}, label %{}, label %{}",
                    self.value_label(*cond),
                    self.block(*then_bb).label,
                    self.block(*else_bb).label
                )?,
                Some(Terminator::Ret(v)) => writeln!(f, "  ret double {}", self.value_label(*v))?,
                None => writeln!(f, "  ; no terminator")?,
            }
        }
        writeln!(f, "}}")
    }
}

impl Function {
    fn fmt_inst(&self, f: &mut fmt::Formatter, inst: &Inst) -> fmt::Result {
        let v = |id: &ValueId| self.value_label(*id);
        match inst {
            Inst::Const { dst, value } => write!(f, "{} = double {:e}", v(dst), value),
            Inst::Load { dst, slot } => write!(f, "{} = load double, {}", v(dst), self.slot_label(*slot)),
            Inst::Store { slot, src } => write!(f, "store double {}, {}", v(src), self.slot_label(*slot)),
            Inst::FAdd { dst, lhs, rhs } => write!(f, "{} = fadd double {}, {}", v(dst), v(lhs), v(rhs)),
            Inst::FSub { dst, lhs, rhs } => write!(f, "{} = fsub double {}, {}", v(dst), v(lhs), v(rhs)),
            Inst::FMul { dst, lhs, rhs } => write!(f, "{} = fmul double {}, {}", v(dst), v(lhs), v(rhs)),
            Inst::UltAsF64 { dst, lhs, rhs } => {
                write!(f, "{} = uitofp (fcmp ult double {}, {})", v(dst), v(lhs), v(rhs))
            }
            Inst::NonZero { dst, src } => write!(f, "{} = fcmp one double {}, 0.0", v(dst), v(src)),
            Inst::Call { dst, callee, args } => {
                let args: Vec<String> = args.iter().map(|a| format!("double {}", v(a))).collect();
                write!(f, "{} = call double @{}({})", v(dst), callee, args.join(", "))
            }
            Inst::Phi { dst, incoming } => {
                let arms: Vec<String> = incoming
                    .iter()
                    .map(|(val, b)| format!("[ {}, %{} ]", v(val), self.block(*b).label))
                    .collect();
                write!(f, "{} = phi double {}", v(dst), arms.join(", "))
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}
