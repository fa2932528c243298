use llvm_sys::analysis::{LLVMVerifierFailureAction, LLVMVerifyFunction};
use llvm_sys::execution_engine::{self, LLVMExecutionEngineRef, LLVMMCJITCompilerOptions};
use llvm_sys::prelude::*;
use llvm_sys::transforms::{instcombine, scalar, util};
use llvm_sys::{core, target, LLVMRealPredicate};

use super::backend::Backend;
use super::error::{Error, ErrorKind};
use super::jit::{self, Jit, ModuleKey};
use libc::{c_char, c_void};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::mem;
use std::ptr;
use std::rc::Rc;

fn cstr(s: &str) -> CString {
    CString::new(s).unwrap_or_default()
}

/// Copies and frees a string LLVM allocated for us.
unsafe fn take_message(msg: *mut c_char) -> String {
    if msg.is_null() {
        return String::new();
    }
    let s = CStr::from_ptr(msg).to_string_lossy().into_owned();
    core::LLVMDisposeMessage(msg);
    s
}

unsafe fn value_name(v: LLVMValueRef) -> String {
    let mut len = 0;
    let name = core::LLVMGetValueName2(v, &mut len);
    if name.is_null() {
        return String::new();
    }
    CStr::from_ptr(name).to_string_lossy().into_owned()
}

/// An LLVM context shared by the backend, its modules and the JIT.
pub(crate) struct Context(LLVMContextRef);

impl Context {
    pub(crate) fn new() -> Rc<Context> {
        Rc::new(Context(unsafe { core::LLVMContextCreate() }))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { core::LLVMContextDispose(self.0) }
    }
}

/// An owned `LLVMModuleRef`, disposed unless handed to the JIT.
pub(crate) struct LlvmModule {
    raw: LLVMModuleRef,
    _context: Rc<Context>,
}

impl LlvmModule {
    fn new(context: &Rc<Context>, name: &CString) -> LlvmModule {
        LlvmModule {
            raw: unsafe { core::LLVMModuleCreateWithNameInContext(name.as_ptr(), context.0) },
            _context: Rc::clone(context),
        }
    }

    fn into_raw(mut self) -> LLVMModuleRef {
        mem::replace(&mut self.raw, ptr::null_mut())
    }
}

impl fmt::Display for LlvmModule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = unsafe { take_message(core::LLVMPrintModuleToString(self.raw)) };
        f.write_str(&s)
    }
}

impl Drop for LlvmModule {
    fn drop(&mut self) {
        if !self.raw.is_null() {
            unsafe { core::LLVMDisposeModule(self.raw) }
        }
    }
}

unsafe fn pass_manager(module: LLVMModuleRef) -> LLVMPassManagerRef {
    let fpm = core::LLVMCreateFunctionPassManagerForModule(module);
    util::LLVMAddPromoteMemoryToRegisterPass(fpm);
    instcombine::LLVMAddInstructionCombiningPass(fpm);
    scalar::LLVMAddReassociatePass(fpm);
    scalar::LLVMAddGVNPass(fpm);
    scalar::LLVMAddCFGSimplificationPass(fpm);
    core::LLVMInitializeFunctionPassManager(fpm);
    fpm
}

/// Emits LLVM IR through the C API.
pub(crate) struct LlvmBackend {
    context: Rc<Context>,
    name: CString,
    module: LlvmModule,
    builder: LLVMBuilderRef,
    fpm: LLVMPassManagerRef,
    double_type: LLVMTypeRef,
}

impl LlvmBackend {
    pub(crate) fn new(context: &Rc<Context>, module_name: &str) -> LlvmBackend {
        let name = cstr(module_name);
        let module = LlvmModule::new(context, &name);
        unsafe {
            LlvmBackend {
                builder: core::LLVMCreateBuilderInContext(context.0),
                fpm: pass_manager(module.raw),
                double_type: core::LLVMDoubleTypeInContext(context.0),
                context: Rc::clone(context),
                name,
                module,
            }
        }
    }
}

impl Drop for LlvmBackend {
    fn drop(&mut self) {
        unsafe {
            core::LLVMDisposePassManager(self.fpm);
            core::LLVMDisposeBuilder(self.builder);
        }
    }
}

impl Backend for LlvmBackend {
    type Value = LLVMValueRef;
    type Function = LLVMValueRef;
    type Block = LLVMBasicBlockRef;
    type Slot = LLVMValueRef;
    type Module = LlvmModule;

    fn get_function(&self, name: &str) -> Option<LLVMValueRef> {
        let f = unsafe { core::LLVMGetNamedFunction(self.module.raw, cstr(name).as_ptr()) };
        if f.is_null() {
            None
        } else {
            Some(f)
        }
    }

    fn declare_function(&mut self, name: &str, params: &[String]) -> LLVMValueRef {
        if let Some(f) = self.get_function(name) {
            return f;
        }
        unsafe {
            let mut types = vec![self.double_type; params.len()];
            let fn_type = core::LLVMFunctionType(
                self.double_type,
                types.as_mut_ptr(),
                types.len() as u32,
                0,
            );
            let f = core::LLVMAddFunction(self.module.raw, cstr(name).as_ptr(), fn_type);
            for (i, p) in params.iter().enumerate() {
                let arg = core::LLVMGetParam(f, i as u32);
                core::LLVMSetValueName2(arg, p.as_ptr() as *const c_char, p.len());
            }
            f
        }
    }

    fn count_params(&self, f: LLVMValueRef) -> usize {
        unsafe { core::LLVMCountParams(f) as usize }
    }

    fn param(&self, f: LLVMValueRef, index: usize) -> LLVMValueRef {
        unsafe { core::LLVMGetParam(f, index as u32) }
    }

    fn has_body(&self, f: LLVMValueRef) -> bool {
        unsafe { core::LLVMCountBasicBlocks(f) > 0 }
    }

    fn delete_function(&mut self, f: LLVMValueRef) {
        unsafe { core::LLVMDeleteFunction(f) }
    }

    fn append_block(&mut self, f: LLVMValueRef, name: &str) -> LLVMBasicBlockRef {
        unsafe { core::LLVMAppendBasicBlockInContext(self.context.0, f, cstr(name).as_ptr()) }
    }

    fn position_at_end(&mut self, block: LLVMBasicBlockRef) {
        unsafe { core::LLVMPositionBuilderAtEnd(self.builder, block) }
    }

    fn insert_block(&self) -> LLVMBasicBlockRef {
        unsafe { core::LLVMGetInsertBlock(self.builder) }
    }

    fn build_entry_alloca(&mut self, f: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe {
            let tmp = core::LLVMCreateBuilderInContext(self.context.0);
            let entry = core::LLVMGetEntryBasicBlock(f);
            let first = core::LLVMGetFirstInstruction(entry);
            if first.is_null() {
                core::LLVMPositionBuilderAtEnd(tmp, entry);
            } else {
                core::LLVMPositionBuilderBefore(tmp, first);
            }
            let slot = core::LLVMBuildAlloca(tmp, self.double_type, cstr(name).as_ptr());
            core::LLVMDisposeBuilder(tmp);
            slot
        }
    }

    fn build_load(&mut self, slot: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe { core::LLVMBuildLoad(self.builder, slot, cstr(name).as_ptr()) }
    }

    fn build_store(&mut self, value: LLVMValueRef, slot: LLVMValueRef) {
        unsafe {
            core::LLVMBuildStore(self.builder, value, slot);
        }
    }

    fn const_f64(&mut self, n: f64) -> LLVMValueRef {
        unsafe { core::LLVMConstReal(self.double_type, n) }
    }

    fn build_fadd(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe { core::LLVMBuildFAdd(self.builder, lhs, rhs, cstr(name).as_ptr()) }
    }

    fn build_fsub(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe { core::LLVMBuildFSub(self.builder, lhs, rhs, cstr(name).as_ptr()) }
    }

    fn build_fmul(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe { core::LLVMBuildFMul(self.builder, lhs, rhs, cstr(name).as_ptr()) }
    }

    fn build_ult_as_f64(&mut self, lhs: LLVMValueRef, rhs: LLVMValueRef) -> LLVMValueRef {
        unsafe {
            let cmp = core::LLVMBuildFCmp(
                self.builder,
                LLVMRealPredicate::LLVMRealULT,
                lhs,
                rhs,
                b"cmptmp\0".as_ptr() as *const _,
            );
            core::LLVMBuildUIToFP(
                self.builder,
                cmp,
                self.double_type,
                b"booltmp\0".as_ptr() as *const _,
            )
        }
    }

    fn build_nonzero(&mut self, value: LLVMValueRef, name: &str) -> LLVMValueRef {
        unsafe {
            let zero = core::LLVMConstReal(self.double_type, 0.0);
            core::LLVMBuildFCmp(
                self.builder,
                LLVMRealPredicate::LLVMRealONE,
                value,
                zero,
                cstr(name).as_ptr(),
            )
        }
    }

    fn build_call(&mut self, f: LLVMValueRef, args: &[LLVMValueRef], name: &str) -> LLVMValueRef {
        let mut args = args.to_vec();
        unsafe {
            core::LLVMBuildCall(
                self.builder,
                f,
                args.as_mut_ptr(),
                args.len() as u32,
                cstr(name).as_ptr(),
            )
        }
    }

    fn build_cond_br(&mut self, cond: LLVMValueRef, then: LLVMBasicBlockRef, els: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildCondBr(self.builder, cond, then, els);
        }
    }

    fn build_br(&mut self, dest: LLVMBasicBlockRef) {
        unsafe {
            core::LLVMBuildBr(self.builder, dest);
        }
    }

    fn build_phi(&mut self, incoming: &[(LLVMValueRef, LLVMBasicBlockRef)], name: &str) -> LLVMValueRef {
        let (mut values, mut blocks): (Vec<_>, Vec<_>) = incoming.iter().cloned().unzip();
        unsafe {
            let phi = core::LLVMBuildPhi(self.builder, self.double_type, cstr(name).as_ptr());
            core::LLVMAddIncoming(
                phi,
                values.as_mut_ptr(),
                blocks.as_mut_ptr(),
                values.len() as u32,
            );
            phi
        }
    }

    fn build_ret(&mut self, value: LLVMValueRef) {
        unsafe {
            core::LLVMBuildRet(self.builder, value);
        }
    }

    fn verify_function(&self, f: LLVMValueRef) -> Result<(), Error> {
        let broken = unsafe {
            LLVMVerifyFunction(f, LLVMVerifierFailureAction::LLVMReturnStatusAction) != 0
        };
        if broken {
            return Err(ErrorKind::Verify(unsafe { value_name(f) }).into());
        }
        Ok(())
    }

    fn optimize_function(&mut self, f: LLVMValueRef) {
        unsafe {
            core::LLVMRunFunctionPassManager(self.fpm, f);
        }
    }

    fn print_function(&self, f: LLVMValueRef) -> String {
        unsafe { take_message(core::LLVMPrintValueToString(f)) }
    }

    fn take_module(&mut self) -> LlvmModule {
        let fresh = LlvmModule::new(&self.context, &self.name);
        unsafe {
            core::LLVMDisposePassManager(self.fpm);
            self.fpm = pass_manager(fresh.raw);
        }
        mem::replace(&mut self.module, fresh)
    }
}

extern "C" fn putchard(x: f64) -> f64 {
    jit::putchard(&[x])
}

extern "C" fn printd(x: f64) -> f64 {
    jit::printd(&[x])
}

fn host_address(name: &str) -> Option<*mut c_void> {
    match name {
        "putchard" => Some(putchard as extern "C" fn(f64) -> f64 as *mut c_void),
        "printd" => Some(printd as extern "C" fn(f64) -> f64 as *mut c_void),
        _ => None,
    }
}

/// Compiles handed-over modules with MCJIT.
pub(crate) struct LlvmJit {
    engine: LLVMExecutionEngineRef,
    modules: HashMap<ModuleKey, LLVMModuleRef>,
    next_key: u32,
    _context: Rc<Context>,
}

impl LlvmJit {
    pub(crate) fn new(context: &Rc<Context>) -> Result<LlvmJit, Error> {
        unsafe {
            if target::LLVM_InitializeNativeTarget() != 0
                || target::LLVM_InitializeNativeAsmPrinter() != 0
            {
                return Err(ErrorKind::Runtime("couldn't initialize the native target".to_owned()).into());
            }
            execution_engine::LLVMLinkInMCJIT();

            let root = LlvmModule::new(context, &cstr("__jit_root")).into_raw();
            let mut options: LLVMMCJITCompilerOptions = mem::zeroed();
            let size = mem::size_of::<LLVMMCJITCompilerOptions>();
            execution_engine::LLVMInitializeMCJITCompilerOptions(&mut options, size);

            let mut engine = ptr::null_mut();
            let mut err = ptr::null_mut();
            if execution_engine::LLVMCreateMCJITCompilerForModule(
                &mut engine,
                root,
                &mut options,
                size,
                &mut err,
            ) != 0
            {
                core::LLVMDisposeModule(root);
                return Err(ErrorKind::Runtime(take_message(err)).into());
            }

            Ok(LlvmJit {
                engine,
                modules: HashMap::new(),
                next_key: 0,
                _context: Rc::clone(context),
            })
        }
    }
}

impl Jit for LlvmJit {
    type Module = LlvmModule;

    fn add_module(&mut self, module: LlvmModule) -> Result<ModuleKey, Error> {
        let raw = module.into_raw();
        unsafe {
            let mut f = core::LLVMGetFirstFunction(raw);
            while !f.is_null() {
                if core::LLVMIsDeclaration(f) != 0 {
                    if let Some(addr) = host_address(&value_name(f)) {
                        execution_engine::LLVMAddGlobalMapping(self.engine, f, addr);
                    }
                }
                f = core::LLVMGetNextFunction(f);
            }
            execution_engine::LLVMAddModule(self.engine, raw);
        }

        let key = ModuleKey(self.next_key);
        self.next_key += 1;
        self.modules.insert(key, raw);
        Ok(key)
    }

    fn remove_module(&mut self, key: ModuleKey) {
        if let Some(raw) = self.modules.remove(&key) {
            unsafe {
                let mut out = ptr::null_mut();
                let mut err = ptr::null_mut();
                if execution_engine::LLVMRemoveModule(self.engine, raw, &mut out, &mut err) == 0 {
                    core::LLVMDisposeModule(out);
                } else {
                    take_message(err);
                }
            }
        }
    }

    fn run_function(&mut self, name: &str) -> Result<f64, Error> {
        let addr = unsafe { execution_engine::LLVMGetFunctionAddress(self.engine, cstr(name).as_ptr()) };
        if addr == 0 {
            return Err(ErrorKind::Runtime(format!("unresolved symbol: {}", name)).into());
        }
        let f: extern "C" fn() -> f64 = unsafe { mem::transmute(addr as usize) };
        Ok(f())
    }
}

impl Drop for LlvmJit {
    fn drop(&mut self) {
        unsafe { execution_engine::LLVMDisposeExecutionEngine(self.engine) }
    }
}
