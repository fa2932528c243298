use super::error::Error;

/// Everything the code generator needs from an IR emitter.
///
/// All values, parameters and return types are `f64`. Handles are cheap
/// copies owned by the backend; they stay valid until the function or
/// module they belong to is deleted or taken.
pub(crate) trait Backend {
    type Value: Copy;
    type Function: Copy;
    type Block: Copy;
    type Slot: Copy;
    type Module;

    /// Looks a function up in the module being built.
    fn get_function(&self, name: &str) -> Option<Self::Function>;
    /// Declares `name(params...)`, or returns the existing declaration.
    fn declare_function(&mut self, name: &str, params: &[String]) -> Self::Function;
    fn count_params(&self, f: Self::Function) -> usize;
    fn param(&self, f: Self::Function, index: usize) -> Self::Value;
    fn has_body(&self, f: Self::Function) -> bool;
    fn delete_function(&mut self, f: Self::Function);

    fn append_block(&mut self, f: Self::Function, name: &str) -> Self::Block;
    fn position_at_end(&mut self, block: Self::Block);
    fn insert_block(&self) -> Self::Block;

    /// Stack storage placed at the top of `f`'s entry block.
    fn build_entry_alloca(&mut self, f: Self::Function, name: &str) -> Self::Slot;
    fn build_load(&mut self, slot: Self::Slot, name: &str) -> Self::Value;
    fn build_store(&mut self, value: Self::Value, slot: Self::Slot);

    fn const_f64(&mut self, n: f64) -> Self::Value;
    fn build_fadd(&mut self, lhs: Self::Value, rhs: Self::Value, name: &str) -> Self::Value;
    fn build_fsub(&mut self, lhs: Self::Value, rhs: Self::Value, name: &str) -> Self::Value;
    fn build_fmul(&mut self, lhs: Self::Value, rhs: Self::Value, name: &str) -> Self::Value;
    /// Unordered less-than, widened back to 0.0 or 1.0.
    fn build_ult_as_f64(&mut self, lhs: Self::Value, rhs: Self::Value) -> Self::Value;
    /// Branch condition: true when `value` is not 0.0.
    fn build_nonzero(&mut self, value: Self::Value, name: &str) -> Self::Value;
    fn build_call(&mut self, f: Self::Function, args: &[Self::Value], name: &str) -> Self::Value;

    fn build_cond_br(&mut self, cond: Self::Value, then: Self::Block, els: Self::Block);
    fn build_br(&mut self, dest: Self::Block);
    fn build_phi(&mut self, incoming: &[(Self::Value, Self::Block)], name: &str) -> Self::Value;
    fn build_ret(&mut self, value: Self::Value);

    fn verify_function(&self, f: Self::Function) -> Result<(), Error>;
    fn optimize_function(&mut self, f: Self::Function);
    /// Textual IR of `f`, for the driver's dumps.
    fn print_function(&self, f: Self::Function) -> String;

    /// Hands over the module built so far and starts an empty one.
    fn take_module(&mut self) -> Self::Module;
}
