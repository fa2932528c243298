use super::ast::{Expr, Function, Prototype};
use super::backend::Backend;
use super::error::{Error, ErrorKind};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Lowers the AST through a [`Backend`].
///
/// Variables live in stack slots, so the environment maps names to slots
/// rather than values; it is reset for every function.
pub(crate) struct CodeGen<B: Backend> {
    backend: B,
    named_values: HashMap<String, B::Slot>,
    function_protos: HashMap<String, Rc<Prototype>>,
    // names with a body in this or an already handed-off module
    defined: HashSet<String>,
}

impl<B: Backend> CodeGen<B> {
    pub(crate) fn new(backend: B) -> Self {
        CodeGen {
            backend,
            named_values: HashMap::new(),
            function_protos: HashMap::new(),
            defined: HashSet::new(),
        }
    }

    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn take_module(&mut self) -> B::Module {
        self.backend.take_module()
    }

    /// Allows `name` to be defined again, e.g. once an anonymous expression has run.
    pub(crate) fn forget(&mut self, name: &str) {
        self.defined.remove(name);
    }

    /// Finds `name` in the current module, declaring it from its last known prototype if needed.
    fn get_function(&mut self, name: &str) -> Option<B::Function> {
        if let Some(f) = self.backend.get_function(name) {
            return Some(f);
        }
        let proto = self.function_protos.get(name).cloned()?;
        Some(self.codegen_proto(&proto))
    }

    pub(crate) fn codegen_proto(&mut self, proto: &Prototype) -> B::Function {
        self.backend.declare_function(&proto.name, &proto.args)
    }

    /// Rejects `proto` if it disagrees with what is already known about its name.
    ///
    /// Nothing is declared or registered here, so a rejected prototype
    /// leaves the module and the registry as they were.
    fn check_signature(&self, proto: &Prototype) -> Result<(), Error> {
        let known = match self.backend.get_function(&proto.name) {
            Some(f) => Some(self.backend.count_params(f)),
            None => self.function_protos.get(&proto.name).map(|p| p.args.len()),
        };
        match known {
            Some(n) if n != proto.args.len() => {
                Err(ErrorKind::SignatureMismatch(proto.name.clone()).into())
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn codegen_extern(&mut self, proto: Prototype) -> Result<B::Function, Error> {
        self.check_signature(&proto)?;
        let f = self.codegen_proto(&proto);
        self.function_protos.insert(proto.name.clone(), Rc::new(proto));
        Ok(f)
    }

    /// Lowers `e` into the body of `the_function` at the current insertion point.
    fn codegen_expr(&mut self, the_function: B::Function, e: &Expr) -> Result<B::Value, Error> {
        match e {
            Expr::Number(n) => Ok(self.backend.const_f64(*n)),
            Expr::Variable(name) => {
                let slot = *self
                    .named_values
                    .get(name)
                    .ok_or_else(|| ErrorKind::UnknownVariable(name.clone()))?;
                Ok(self.backend.build_load(slot, name))
            }
            Expr::Unary(op, operand) => {
                let operand = self.codegen_expr(the_function, operand)?;
                let f = self
                    .get_function(&format!("unary{}", op))
                    .ok_or(ErrorKind::UnknownUnaryOperator(*op))?;
                Ok(self.backend.build_call(f, &[operand], "unop"))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.codegen_expr(the_function, lhs)?;
                let rhs = self.codegen_expr(the_function, rhs)?;
                match op {
                    '+' => Ok(self.backend.build_fadd(lhs, rhs, "addtmp")),
                    '-' => Ok(self.backend.build_fsub(lhs, rhs, "subtmp")),
                    '*' => Ok(self.backend.build_fmul(lhs, rhs, "multmp")),
                    '<' => Ok(self.backend.build_ult_as_f64(lhs, rhs)),
                    _ => {
                        let f = self
                            .get_function(&format!("binary{}", op))
                            .ok_or(ErrorKind::UnknownBinaryOperator(*op))?;
                        Ok(self.backend.build_call(f, &[lhs, rhs], "binop"))
                    }
                }
            }
            Expr::If(cond, then, els) => {
                let cond = self.codegen_expr(the_function, cond)?;
                let cond = self.backend.build_nonzero(cond, "ifcond");

                let then_bb = self.backend.append_block(the_function, "then");
                let else_bb = self.backend.append_block(the_function, "else");
                let merge_bb = self.backend.append_block(the_function, "ifcont");
                self.backend.build_cond_br(cond, then_bb, else_bb);

                self.backend.position_at_end(then_bb);
                let then_v = self.codegen_expr(the_function, then)?;
                self.backend.build_br(merge_bb);
                // nested control flow may have moved us to another block
                let then_bb = self.backend.insert_block();

                self.backend.position_at_end(else_bb);
                let else_v = self.codegen_expr(the_function, els)?;
                self.backend.build_br(merge_bb);
                let else_bb = self.backend.insert_block();

                self.backend.position_at_end(merge_bb);
                Ok(self
                    .backend
                    .build_phi(&[(then_v, then_bb), (else_v, else_bb)], "iftmp"))
            }
            Expr::For {
                var,
                start,
                end,
                step,
                body,
            } => {
                let alloca = self.backend.build_entry_alloca(the_function, var);
                let start = self.codegen_expr(the_function, start)?;
                self.backend.build_store(start, alloca);

                let loop_bb = self.backend.append_block(the_function, "loop");
                self.backend.build_br(loop_bb);
                self.backend.position_at_end(loop_bb);

                let old_val = self.named_values.insert(var.clone(), alloca);
                let result =
                    self.codegen_loop(the_function, loop_bb, alloca, var, end, step.as_deref(), body);
                match old_val {
                    Some(v) => self.named_values.insert(var.clone(), v),
                    None => self.named_values.remove(var),
                };
                result?;

                Ok(self.backend.const_f64(0.0))
            }
            Expr::Call(callee, args) => {
                let f = self
                    .get_function(callee)
                    .ok_or_else(|| ErrorKind::UnknownFunction(callee.clone()))?;

                let expected = self.backend.count_params(f);
                if expected != args.len() {
                    return Err(ErrorKind::ArgumentCount {
                        expected,
                        found: args.len(),
                    }
                    .into());
                }

                let mut argsv = Vec::with_capacity(args.len());
                for arg in args {
                    argsv.push(self.codegen_expr(the_function, arg)?);
                }
                Ok(self.backend.build_call(f, &argsv, "calltmp"))
            }
        }
    }

    fn codegen_loop(
        &mut self,
        the_function: B::Function,
        loop_bb: B::Block,
        alloca: B::Slot,
        var: &str,
        end: &Expr,
        step: Option<&Expr>,
        body: &Expr,
    ) -> Result<(), Error> {
        self.codegen_expr(the_function, body)?;

        let step = match step {
            Some(step) => self.codegen_expr(the_function, step)?,
            None => self.backend.const_f64(1.0),
        };
        let cur = self.backend.build_load(alloca, var);
        let next = self.backend.build_fadd(cur, step, "nextvar");
        self.backend.build_store(next, alloca);

        let end = self.codegen_expr(the_function, end)?;
        let end = self.backend.build_nonzero(end, "loopcond");

        let after_bb = self.backend.append_block(the_function, "afterloop");
        self.backend.build_cond_br(end, loop_bb, after_bb);
        self.backend.position_at_end(after_bb);
        Ok(())
    }

    pub(crate) fn codegen_func(&mut self, func: &Function) -> Result<B::Function, Error> {
        let proto = Rc::clone(&func.proto);
        let has_body = self
            .backend
            .get_function(&proto.name)
            .map_or(false, |f| self.backend.has_body(f));
        if has_body || self.defined.contains(&proto.name) {
            return Err(ErrorKind::Redefinition(proto.name.clone()).into());
        }
        self.check_signature(&proto)?;

        let previous = self
            .function_protos
            .insert(proto.name.clone(), Rc::clone(&proto));
        let the_function = self.codegen_proto(&proto);

        let entry = self.backend.append_block(the_function, "entry");
        self.backend.position_at_end(entry);

        self.named_values.clear();
        for (i, arg) in proto.args.iter().enumerate() {
            let alloca = self.backend.build_entry_alloca(the_function, arg);
            let value = self.backend.param(the_function, i);
            self.backend.build_store(value, alloca);
            self.named_values.insert(arg.clone(), alloca);
        }

        let result = self
            .codegen_expr(the_function, &func.body)
            .and_then(|ret| {
                self.backend.build_ret(ret);
                self.backend.verify_function(the_function)
            });

        match result {
            Ok(()) => {
                self.backend.optimize_function(the_function);
                self.defined.insert(proto.name.clone());
                Ok(the_function)
            }
            Err(e) => {
                self.backend.delete_function(the_function);
                match previous {
                    Some(p) => self.function_protos.insert(proto.name.clone(), p),
                    None => self.function_protos.remove(&proto.name),
                };
                Err(e)
            }
        }
    }
}
