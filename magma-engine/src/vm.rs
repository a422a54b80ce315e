//! The rule virtual machine: a register machine over one-byte op-codes and
//! operands, executing compiled rule programs against the signature.
//!
//! Execution is recursive on the program slice: every bind-then-body op
//! runs the remaining bytes as its body. Stack depth is bounded by program
//! nesting, which the parser bounds at the 256-register scope limit.

use std::sync::Arc;

use tracing::trace;

use magma_asm::{float53, OpCode};
use magma_core::{
    BinaryFunction, BinaryRelation, Carrier, InjectiveFunction, IntersectionIter,
    NullaryFunction, Ob, Signature, SymmetricFunction, UnaryRelation,
};

use crate::context::Context;

/// Granularity of `FOR_BLOCK` / `IF_BLOCK` parallelism.
pub const BLOCK_SIZE: usize = 64;

/// Handle-indexed view of the signature tables, loaded once and shared by
/// all workers.
pub struct VirtualMachine {
    carrier: Arc<Carrier>,
    unary_relations: Vec<Arc<UnaryRelation>>,
    binary_relations: Vec<Arc<BinaryRelation>>,
    nullary_functions: Vec<Arc<NullaryFunction>>,
    injective_functions: Vec<Arc<InjectiveFunction>>,
    binary_functions: Vec<Arc<BinaryFunction>>,
    symmetric_functions: Vec<Arc<SymmetricFunction>>,
}

impl VirtualMachine {
    pub fn load(signature: &Signature) -> Self {
        Self {
            carrier: signature.carrier().clone(),
            unary_relations: signature.unary_relation_tables().to_vec(),
            binary_relations: signature.binary_relation_tables().to_vec(),
            nullary_functions: signature.nullary_function_tables().to_vec(),
            injective_functions: signature.injective_function_tables().to_vec(),
            binary_functions: signature.binary_function_tables().to_vec(),
            symmetric_functions: signature.symmetric_function_tables().to_vec(),
        }
    }

    pub fn carrier(&self) -> &Arc<Carrier> {
        &self.carrier
    }

    pub fn nullary_function(&self, handle: u8) -> &Arc<NullaryFunction> {
        &self.nullary_functions[handle as usize]
    }

    pub fn injective_function(&self, handle: u8) -> &Arc<InjectiveFunction> {
        &self.injective_functions[handle as usize]
    }

    pub fn binary_function(&self, handle: u8) -> &Arc<BinaryFunction> {
        &self.binary_functions[handle as usize]
    }

    pub fn symmetric_function(&self, handle: u8) -> &Arc<SymmetricFunction> {
        &self.symmetric_functions[handle as usize]
    }

    /// Whether a program is block-sharded.
    pub fn is_parallel(code: &[u8]) -> bool {
        code.first() == Some(&OpCode::ForBlock.as_byte())
    }

    /// Runs a program with up to three event arguments bound to the first
    /// ob registers.
    pub fn execute<'a>(&'a self, code: &[u8], args: &[Ob], ctx: &mut Context<'a>) {
        debug_assert!(!Self::is_parallel(code), "program is parallel");
        ctx.clear();
        ctx.obs[..args.len()].copy_from_slice(args);
        self.step(code, ctx);
    }

    /// Runs one shard of a block-sharded program. Only the scheduler calls
    /// this.
    pub fn execute_block<'a>(&'a self, code: &[u8], block: usize, ctx: &mut Context<'a>) {
        debug_assert!(Self::is_parallel(code), "program is not parallel");
        ctx.clear();
        ctx.block = block;
        self.step(code, ctx);
    }

    fn step<'a>(&'a self, code: &[u8], ctx: &mut Context<'a>) {
        let op = OpCode::from_byte(code[0])
            .unwrap_or_else(|| panic!("illegal op-code byte: {}", code[0]));
        ctx.trace += 1;
        trace!(depth = ctx.trace, %op, "step");
        let tail = &code[op.encoded_len()..];
        let item_dim = self.carrier.item_dim();

        match op {
            OpCode::Padding => panic!("executed padding"),

            OpCode::Sequence => {
                let jump = float53(code[1]);
                self.step(tail, ctx);
                self.step(&tail[jump..], ctx);
            }

            // Given arguments are bound by the dispatcher; the head only
            // reserves the registers.
            OpCode::GivenExists
            | OpCode::GivenUnaryRelation
            | OpCode::GivenBinaryRelation
            | OpCode::GivenNullaryFunction
            | OpCode::GivenInjectiveFunction
            | OpCode::GivenBinaryFunction
            | OpCode::GivenSymmetricFunction => {
                self.step(tail, ctx);
            }

            OpCode::LetsUnaryRelation => {
                let rel = &self.unary_relations[code[1] as usize];
                ctx.sets[code[2] as usize] = Some(rel.view());
                self.step(tail, ctx);
            }

            OpCode::LetsBinaryRelationLhs => {
                let rel = &self.binary_relations[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                ctx.sets[code[3] as usize] = Some(rel.lx_view(lhs));
                self.step(tail, ctx);
            }

            OpCode::LetsBinaryRelationRhs => {
                let rel = &self.binary_relations[code[1] as usize];
                let rhs = ctx.obs[code[3] as usize];
                ctx.sets[code[2] as usize] = Some(rel.rx_view(rhs));
                self.step(tail, ctx);
            }

            OpCode::LetsInjectiveFunction => {
                let fun = &self.injective_functions[code[1] as usize];
                ctx.sets[code[2] as usize] = Some(fun.defined_view());
                self.step(tail, ctx);
            }

            OpCode::LetsInjectiveFunctionInverse => {
                let fun = &self.injective_functions[code[1] as usize];
                ctx.sets[code[2] as usize] = Some(fun.inverse_defined_view());
                self.step(tail, ctx);
            }

            OpCode::LetsBinaryFunctionLhs => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                ctx.sets[code[3] as usize] = Some(fun.lx_view(lhs));
                self.step(tail, ctx);
            }

            OpCode::LetsBinaryFunctionRhs => {
                let fun = &self.binary_functions[code[1] as usize];
                let rhs = ctx.obs[code[3] as usize];
                ctx.sets[code[2] as usize] = Some(fun.rx_view(rhs));
                self.step(tail, ctx);
            }

            OpCode::LetsSymmetricFunctionLhs => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                ctx.sets[code[3] as usize] = Some(fun.lx_view(lhs));
                self.step(tail, ctx);
            }

            OpCode::ForNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let iter = IntersectionIter::new(item_dim, [self.carrier.support()], [s1]);
                for ob in iter {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForNegNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let iter =
                    IntersectionIter::new(item_dim, [self.carrier.support()], [s1, s2]);
                for ob in iter {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                for ob in IntersectionIter::new(item_dim, [s1], [s2]) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosNegNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                for ob in IntersectionIter::new(item_dim, [s1], [s2, s3]) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPos => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                for ob in IntersectionIter::new(item_dim, [s1, s2], []) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                for ob in IntersectionIter::new(item_dim, [s1, s2], [s3]) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosNegNeg => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                let s4 = Self::set(ctx, code[5]);
                for ob in IntersectionIter::new(item_dim, [s1, s2], [s3, s4]) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosPos => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                for ob in IntersectionIter::new(item_dim, [s1, s2, s3], []) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosPosPos => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                let s4 = Self::set(ctx, code[5]);
                for ob in IntersectionIter::new(item_dim, [s1, s2, s3, s4], []) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosPosPosPos => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                let s4 = Self::set(ctx, code[5]);
                let s5 = Self::set(ctx, code[6]);
                for ob in IntersectionIter::new(item_dim, [s1, s2, s3, s4, s5], []) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForPosPosPosPosPosPos => {
                let reg = code[1] as usize;
                let s1 = Self::set(ctx, code[2]);
                let s2 = Self::set(ctx, code[3]);
                let s3 = Self::set(ctx, code[4]);
                let s4 = Self::set(ctx, code[5]);
                let s5 = Self::set(ctx, code[6]);
                let s6 = Self::set(ctx, code[7]);
                for ob in IntersectionIter::new(item_dim, [s1, s2, s3, s4, s5, s6], []) {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForAll => {
                let reg = code[1] as usize;
                for ob in self.carrier.iter() {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForUnaryRelation => {
                let rel = &self.unary_relations[code[1] as usize];
                let reg = code[2] as usize;
                for ob in rel.iter() {
                    ctx.obs[reg] = ob;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryRelationLhs => {
                let rel = &self.binary_relations[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let reg = code[3] as usize;
                for rhs in rel.iter_lhs(lhs) {
                    ctx.obs[reg] = rhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryRelationRhs => {
                let rel = &self.binary_relations[code[1] as usize];
                let reg = code[2] as usize;
                let rhs = ctx.obs[code[3] as usize];
                for lhs in rel.iter_rhs(rhs) {
                    ctx.obs[reg] = lhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForNullaryFunction => {
                let fun = &self.nullary_functions[code[1] as usize];
                let found = fun.find();
                if found != 0 {
                    ctx.obs[code[2] as usize] = found;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForInjectiveFunction => {
                let fun = &self.injective_functions[code[1] as usize];
                let key_reg = code[2] as usize;
                let val_reg = code[3] as usize;
                for key in fun.iter() {
                    ctx.obs[key_reg] = key;
                    ctx.obs[val_reg] = fun.find(key);
                    self.step(tail, ctx);
                }
            }

            OpCode::ForInjectiveFunctionKey => {
                let fun = &self.injective_functions[code[1] as usize];
                let key = ctx.obs[code[2] as usize];
                let found = fun.find(key);
                if found != 0 {
                    ctx.obs[code[3] as usize] = found;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForInjectiveFunctionVal => {
                let fun = &self.injective_functions[code[1] as usize];
                let val = ctx.obs[code[3] as usize];
                let found = fun.inverse_find(val);
                if found != 0 {
                    ctx.obs[code[2] as usize] = found;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionLhs => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs_reg = code[3] as usize;
                let val_reg = code[4] as usize;
                for rhs in fun.iter_lhs(lhs) {
                    ctx.obs[rhs_reg] = rhs;
                    ctx.obs[val_reg] = fun.find(lhs, rhs);
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionRhs => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs_reg = code[2] as usize;
                let rhs = ctx.obs[code[3] as usize];
                let val_reg = code[4] as usize;
                for lhs in fun.iter_rhs(rhs) {
                    ctx.obs[lhs_reg] = lhs;
                    ctx.obs[val_reg] = fun.find(lhs, rhs);
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionVal => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs_reg = code[2] as usize;
                let rhs_reg = code[3] as usize;
                let val = ctx.obs[code[4] as usize];
                for (lhs, rhs) in fun.iter_val(val) {
                    ctx.obs[lhs_reg] = lhs;
                    ctx.obs[rhs_reg] = rhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionLhsVal => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs_reg = code[3] as usize;
                let val = ctx.obs[code[4] as usize];
                for rhs in fun.iter_val_lhs(val, lhs) {
                    ctx.obs[rhs_reg] = rhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionRhsVal => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs_reg = code[2] as usize;
                let rhs = ctx.obs[code[3] as usize];
                let val = ctx.obs[code[4] as usize];
                for lhs in fun.iter_val_rhs(val, rhs) {
                    ctx.obs[lhs_reg] = lhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBinaryFunctionLhsRhs => {
                let fun = &self.binary_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs = ctx.obs[code[3] as usize];
                let found = fun.find(lhs, rhs);
                if found != 0 {
                    ctx.obs[code[4] as usize] = found;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForSymmetricFunctionLhs => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs_reg = code[3] as usize;
                let val_reg = code[4] as usize;
                for rhs in fun.iter_lhs(lhs) {
                    ctx.obs[rhs_reg] = rhs;
                    ctx.obs[val_reg] = fun.find(lhs, rhs);
                    self.step(tail, ctx);
                }
            }

            OpCode::ForSymmetricFunctionVal => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let lhs_reg = code[2] as usize;
                let rhs_reg = code[3] as usize;
                let val = ctx.obs[code[4] as usize];
                for (lhs, rhs) in fun.iter_val(val) {
                    ctx.obs[lhs_reg] = lhs;
                    ctx.obs[rhs_reg] = rhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForSymmetricFunctionLhsVal => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs_reg = code[3] as usize;
                let val = ctx.obs[code[4] as usize];
                for rhs in fun.iter_val_lhs(val, lhs) {
                    ctx.obs[rhs_reg] = rhs;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForSymmetricFunctionLhsRhs => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let lhs = ctx.obs[code[2] as usize];
                let rhs = ctx.obs[code[3] as usize];
                let found = fun.find(lhs, rhs);
                if found != 0 {
                    ctx.obs[code[4] as usize] = found;
                    self.step(tail, ctx);
                }
            }

            OpCode::ForBlock => {
                self.step(tail, ctx);
            }

            OpCode::IfBlock => {
                let ob = ctx.obs[code[1] as usize];
                if ob as usize / BLOCK_SIZE == ctx.block {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfEqual => {
                if ctx.obs[code[1] as usize] == ctx.obs[code[2] as usize] {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfUnaryRelation => {
                let rel = &self.unary_relations[code[1] as usize];
                if rel.contains(ctx.obs[code[2] as usize]) {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfBinaryRelation => {
                let rel = &self.binary_relations[code[1] as usize];
                if rel.contains(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]) {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfNullaryFunction => {
                let fun = &self.nullary_functions[code[1] as usize];
                if fun.find() == ctx.obs[code[2] as usize] {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfInjectiveFunction => {
                let fun = &self.injective_functions[code[1] as usize];
                if fun.find(ctx.obs[code[2] as usize]) == ctx.obs[code[3] as usize] {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfBinaryFunction => {
                let fun = &self.binary_functions[code[1] as usize];
                let found =
                    fun.find(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
                if found == ctx.obs[code[4] as usize] {
                    self.step(tail, ctx);
                }
            }

            OpCode::IfSymmetricFunction => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let found =
                    fun.find(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
                if found == ctx.obs[code[4] as usize] {
                    self.step(tail, ctx);
                }
            }

            OpCode::LetNullaryFunction => {
                let fun = &self.nullary_functions[code[1] as usize];
                let val = fun.find();
                debug_assert_ne!(val, 0, "unguarded lookup of undefined value");
                ctx.obs[code[2] as usize] = val;
                self.step(tail, ctx);
            }

            OpCode::LetInjectiveFunction => {
                let fun = &self.injective_functions[code[1] as usize];
                let val = fun.find(ctx.obs[code[2] as usize]);
                debug_assert_ne!(val, 0, "unguarded lookup of undefined value");
                ctx.obs[code[3] as usize] = val;
                self.step(tail, ctx);
            }

            OpCode::LetBinaryFunction => {
                let fun = &self.binary_functions[code[1] as usize];
                let val = fun.find(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
                debug_assert_ne!(val, 0, "unguarded lookup of undefined value");
                ctx.obs[code[4] as usize] = val;
                self.step(tail, ctx);
            }

            OpCode::LetSymmetricFunction => {
                let fun = &self.symmetric_functions[code[1] as usize];
                let val = fun.find(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
                debug_assert_ne!(val, 0, "unguarded lookup of undefined value");
                ctx.obs[code[4] as usize] = val;
                self.step(tail, ctx);
            }

            OpCode::InferEqual => {
                self.carrier
                    .ensure_equal(ctx.obs[code[1] as usize], ctx.obs[code[2] as usize]);
            }

            OpCode::InferUnaryRelation => {
                let rel = &self.unary_relations[code[1] as usize];
                rel.insert(ctx.obs[code[2] as usize]);
            }

            OpCode::InferBinaryRelation => {
                let rel = &self.binary_relations[code[1] as usize];
                rel.insert(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
            }

            OpCode::InferNullaryFunction => {
                let fun = &self.nullary_functions[code[1] as usize];
                fun.insert(ctx.obs[code[2] as usize]);
            }

            OpCode::InferInjectiveFunction => {
                let fun = &self.injective_functions[code[1] as usize];
                fun.insert(ctx.obs[code[2] as usize], ctx.obs[code[3] as usize]);
            }

            OpCode::InferBinaryFunction => {
                let fun = &self.binary_functions[code[1] as usize];
                fun.insert(
                    ctx.obs[code[2] as usize],
                    ctx.obs[code[3] as usize],
                    ctx.obs[code[4] as usize],
                );
            }

            OpCode::InferSymmetricFunction => {
                let fun = &self.symmetric_functions[code[1] as usize];
                fun.insert(
                    ctx.obs[code[2] as usize],
                    ctx.obs[code[3] as usize],
                    ctx.obs[code[4] as usize],
                );
            }

            OpCode::InferNullaryNullary => {
                let fun1 = &self.nullary_functions[code[1] as usize];
                let fun2 = &self.nullary_functions[code[2] as usize];
                let val1 = fun1.find();
                if val1 != 0 {
                    fun2.insert(val1);
                } else {
                    let val2 = fun2.find();
                    if val2 != 0 {
                        fun1.insert(val2);
                    }
                }
            }

            OpCode::InferNullaryInjective => {
                let fun1 = &self.nullary_functions[code[1] as usize];
                let fun2 = &self.injective_functions[code[2] as usize];
                let key2 = ctx.obs[code[3] as usize];
                let val1 = fun1.find();
                if val1 != 0 {
                    fun2.insert(key2, val1);
                } else {
                    let val2 = fun2.find(key2);
                    if val2 != 0 {
                        fun1.insert(val2);
                    }
                }
            }

            OpCode::InferNullaryBinary => {
                let fun1 = &self.nullary_functions[code[1] as usize];
                let fun2 = &self.binary_functions[code[2] as usize];
                let lhs2 = ctx.obs[code[3] as usize];
                let rhs2 = ctx.obs[code[4] as usize];
                let val1 = fun1.find();
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(val2);
                    }
                }
            }

            OpCode::InferNullarySymmetric => {
                let fun1 = &self.nullary_functions[code[1] as usize];
                let fun2 = &self.symmetric_functions[code[2] as usize];
                let lhs2 = ctx.obs[code[3] as usize];
                let rhs2 = ctx.obs[code[4] as usize];
                let val1 = fun1.find();
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(val2);
                    }
                }
            }

            OpCode::InferInjectiveInjective => {
                let fun1 = &self.injective_functions[code[1] as usize];
                let key1 = ctx.obs[code[2] as usize];
                let fun2 = &self.injective_functions[code[3] as usize];
                let key2 = ctx.obs[code[4] as usize];
                let val1 = fun1.find(key1);
                if val1 != 0 {
                    fun2.insert(key2, val1);
                } else {
                    let val2 = fun2.find(key2);
                    if val2 != 0 {
                        fun1.insert(key1, val2);
                    }
                }
            }

            OpCode::InferInjectiveBinary => {
                let fun1 = &self.injective_functions[code[1] as usize];
                let key1 = ctx.obs[code[2] as usize];
                let fun2 = &self.binary_functions[code[3] as usize];
                let lhs2 = ctx.obs[code[4] as usize];
                let rhs2 = ctx.obs[code[5] as usize];
                let val1 = fun1.find(key1);
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(key1, val2);
                    }
                }
            }

            OpCode::InferInjectiveSymmetric => {
                let fun1 = &self.injective_functions[code[1] as usize];
                let key1 = ctx.obs[code[2] as usize];
                let fun2 = &self.symmetric_functions[code[3] as usize];
                let lhs2 = ctx.obs[code[4] as usize];
                let rhs2 = ctx.obs[code[5] as usize];
                let val1 = fun1.find(key1);
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(key1, val2);
                    }
                }
            }

            OpCode::InferBinaryBinary => {
                let fun1 = &self.binary_functions[code[1] as usize];
                let lhs1 = ctx.obs[code[2] as usize];
                let rhs1 = ctx.obs[code[3] as usize];
                let fun2 = &self.binary_functions[code[4] as usize];
                let lhs2 = ctx.obs[code[5] as usize];
                let rhs2 = ctx.obs[code[6] as usize];
                let val1 = fun1.find(lhs1, rhs1);
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(lhs1, rhs1, val2);
                    }
                }
            }

            OpCode::InferBinarySymmetric => {
                let fun1 = &self.binary_functions[code[1] as usize];
                let lhs1 = ctx.obs[code[2] as usize];
                let rhs1 = ctx.obs[code[3] as usize];
                let fun2 = &self.symmetric_functions[code[4] as usize];
                let lhs2 = ctx.obs[code[5] as usize];
                let rhs2 = ctx.obs[code[6] as usize];
                let val1 = fun1.find(lhs1, rhs1);
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(lhs1, rhs1, val2);
                    }
                }
            }

            OpCode::InferSymmetricSymmetric => {
                let fun1 = &self.symmetric_functions[code[1] as usize];
                let lhs1 = ctx.obs[code[2] as usize];
                let rhs1 = ctx.obs[code[3] as usize];
                let fun2 = &self.symmetric_functions[code[4] as usize];
                let lhs2 = ctx.obs[code[5] as usize];
                let rhs2 = ctx.obs[code[6] as usize];
                let val1 = fun1.find(lhs1, rhs1);
                if val1 != 0 {
                    fun2.insert(lhs2, rhs2, val1);
                } else {
                    let val2 = fun2.find(lhs2, rhs2);
                    if val2 != 0 {
                        fun1.insert(lhs1, rhs1, val2);
                    }
                }
            }
        }
        ctx.trace -= 1;
    }

    fn set<'a>(ctx: &Context<'a>, operand: u8) -> magma_core::SetView<'a> {
        ctx.sets[operand as usize].expect("unbound set register")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_asm::ProgramParser;
    use magma_core::{Arity, NullSink};

    fn signature(item_dim: usize) -> Signature {
        let carrier = Arc::new(Carrier::new(item_dim, Arc::new(NullSink)));
        let mut sig = Signature::new(carrier, Arc::new(NullSink));
        sig.declare(Arity::UnaryRelation, "MARK").unwrap();
        sig.declare(Arity::BinaryRelation, "LESS").unwrap();
        sig.declare(Arity::NullaryFunction, "K").unwrap();
        sig.declare(Arity::BinaryFunction, "APP").unwrap();
        sig
    }

    fn compile(sig: &Signature, source: &str) -> Vec<u8> {
        let mut parser = ProgramParser::new(sig);
        let listings = parser.parse(source).unwrap();
        assert_eq!(listings.len(), 1);
        parser.find_program(&listings[0]).to_vec()
    }

    #[test]
    fn for_all_marks_every_ob() {
        let sig = signature(16);
        for _ in 0..5 {
            sig.carrier().try_insert();
        }
        let code = compile(&sig, "FOR_ALL x\nINFER_UNARY_RELATION MARK x\n");
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();
        vm.execute(&code, &[], &mut ctx);
        let mark = sig.unary_relation("MARK").unwrap();
        assert_eq!(mark.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn block_shards_partition_the_ob_space() {
        let sig = signature(200);
        for _ in 0..200 {
            sig.carrier().try_insert();
        }
        let code = compile(
            &sig,
            "FOR_BLOCK\nFOR_ALL x\nIF_BLOCK x\nINFER_UNARY_RELATION MARK x\n",
        );
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();

        vm.execute_block(&code, 1, &mut ctx);
        let mark = sig.unary_relation("MARK").unwrap();
        let seen: Vec<Ob> = mark.iter().collect();
        assert_eq!(seen, (64..128).collect::<Vec<Ob>>());

        for block in [0, 2, 3] {
            vm.execute_block(&code, block, &mut ctx);
        }
        assert_eq!(mark.count_items(), 200);
    }

    #[test]
    fn sequence_runs_both_branches() {
        let sig = signature(16);
        for _ in 0..3 {
            sig.carrier().try_insert();
        }
        // branch one marks obs below 2, branch two marks obs above 2
        let code = compile(
            &sig,
            "SEQUENCE 6\n\
             FOR_NULLARY_FUNCTION K k\n\
             INFER_UNARY_RELATION MARK k\n\
             FOR_ALL x\n\
             INFER_BINARY_RELATION LESS x x\n",
        );
        sig.nullary_function("K").unwrap().insert(2);
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();
        vm.execute(&code, &[], &mut ctx);
        assert!(sig.unary_relation("MARK").unwrap().contains(2));
        let less = sig.binary_relation("LESS").unwrap();
        for ob in 1..=3 {
            assert!(less.contains(ob, ob));
        }
    }

    #[test]
    fn intersection_loops_respect_negation() {
        let sig = signature(16);
        for _ in 0..6 {
            sig.carrier().try_insert();
        }
        let mark = sig.unary_relation("MARK").unwrap();
        mark.raw_insert(2);
        mark.raw_insert(4);
        // everything not in MARK becomes LESS-reflexive
        let code = compile(
            &sig,
            "LETS_UNARY_RELATION MARK m\n\
             FOR_NEG x m\n\
             INFER_BINARY_RELATION LESS x x\n",
        );
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();
        vm.execute(&code, &[], &mut ctx);
        let less = sig.binary_relation("LESS").unwrap();
        for ob in [1, 3, 5, 6] {
            assert!(less.contains(ob, ob));
        }
        for ob in [2, 4] {
            assert!(!less.contains(ob, ob));
        }
    }

    #[test]
    fn infer_equal_of_identical_obs_is_a_no_op() {
        let sig = signature(16);
        for _ in 0..3 {
            sig.carrier().try_insert();
        }
        let code = compile(&sig, "FOR_ALL x\nINFER_EQUAL x x\n");
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();
        vm.execute(&code, &[], &mut ctx);
        assert_eq!(sig.carrier().rep_count(), 3);
    }

    #[test]
    fn infer_binary_binary_transfers_the_defined_side() {
        let sig = signature(16);
        for _ in 0..4 {
            sig.carrier().try_insert();
        }
        let app = sig.binary_function("APP").unwrap();
        app.insert(1, 1, 2);
        app.insert(1, 2, 3);
        // APP(x, APP(x,x)) and APP(APP(x,x), x) must name the same value
        let code = compile(
            &sig,
            "GIVEN_EXISTS x\n\
             LET_BINARY_FUNCTION APP x x probe\n\
             INFER_BINARY_BINARY APP x probe APP probe x\n",
        );
        let vm = VirtualMachine::load(&sig);
        let mut ctx = Context::new();
        vm.execute(&code, &[1], &mut ctx);
        assert_eq!(app.find(1, 2), 3);
        assert_eq!(app.find(2, 1), 3);
    }
}
