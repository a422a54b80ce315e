//! The agenda: sorts compiled rule programs by their triggering event and
//! dispatches events to the matching entry points.
//!
//! A program whose head is a `GIVEN_*` op is truncated past the head and
//! bucketed under the named table's handle; `FOR_BLOCK` programs form the
//! block-sharded cleanup list; everything else is a small cleanup program
//! run once per cleanup cycle.

use std::sync::Arc;

use tracing::{debug, info};

use magma_asm::{Listing, OpCode};
use magma_core::{Handle, Ob, Signature};

use crate::context::Context;
use crate::vm::{VirtualMachine, BLOCK_SIZE};

#[derive(Debug, Clone, Copy)]
struct EntryPoint {
    offset: usize,
    len: usize,
    lineno: usize,
}

pub struct Agenda {
    vm: VirtualMachine,
    code: Arc<[u8]>,
    exists: Vec<EntryPoint>,
    unary_relation: Vec<Vec<EntryPoint>>,
    binary_relation: Vec<Vec<EntryPoint>>,
    nullary_function: Vec<Vec<EntryPoint>>,
    injective_function: Vec<Vec<EntryPoint>>,
    binary_function: Vec<Vec<EntryPoint>>,
    symmetric_function: Vec<Vec<EntryPoint>>,
    cleanup_small: Vec<EntryPoint>,
    cleanup_large: Vec<EntryPoint>,
    block_count: usize,
}

impl Agenda {
    pub fn load(signature: &Signature, code: Arc<[u8]>, listings: &[Listing]) -> Self {
        let vm = VirtualMachine::load(signature);
        let block_count = signature.carrier().item_dim() / BLOCK_SIZE + 1;
        let mut agenda = Self {
            vm,
            code,
            exists: Vec::new(),
            unary_relation: buckets(signature.unary_relation_tables().len()),
            binary_relation: buckets(signature.binary_relation_tables().len()),
            nullary_function: buckets(signature.nullary_function_tables().len()),
            injective_function: buckets(signature.injective_function_tables().len()),
            binary_function: buckets(signature.binary_function_tables().len()),
            symmetric_function: buckets(signature.symmetric_function_tables().len()),
            cleanup_small: Vec::new(),
            cleanup_large: Vec::new(),
            block_count,
        };
        for listing in listings {
            agenda.add_listing(listing);
        }
        agenda.log_stats();
        agenda
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    fn add_listing(&mut self, listing: &Listing) {
        assert!(listing.len > 0, "empty program");
        let head = OpCode::from_byte(self.code[listing.offset]).expect("parsed program");
        let skip = head.encoded_len();
        let truncated = EntryPoint {
            offset: listing.offset + skip,
            len: listing.len - skip,
            lineno: listing.lineno,
        };
        let full = EntryPoint {
            offset: listing.offset,
            len: listing.len,
            lineno: listing.lineno,
        };
        let handle = self
            .code
            .get(listing.offset + 1)
            .map_or(0, |&byte| byte as usize);

        match head {
            OpCode::GivenExists => self.exists.push(truncated),
            OpCode::GivenUnaryRelation => self.unary_relation[handle].push(truncated),
            OpCode::GivenBinaryRelation => self.binary_relation[handle].push(truncated),
            OpCode::GivenNullaryFunction => {
                self.nullary_function[handle].push(truncated)
            }
            OpCode::GivenInjectiveFunction => {
                self.injective_function[handle].push(truncated)
            }
            OpCode::GivenBinaryFunction => self.binary_function[handle].push(truncated),
            OpCode::GivenSymmetricFunction => {
                self.symmetric_function[handle].push(truncated)
            }
            OpCode::ForBlock => self.cleanup_large.push(full),
            _ => self.cleanup_small.push(full),
        }
    }

    fn program(&self, entry: &EntryPoint) -> &[u8] {
        &self.code[entry.offset..entry.offset + entry.len]
    }

    fn run_all<'a>(
        &'a self,
        entries: &[EntryPoint],
        args: &[Ob],
        ctx: &mut Context<'a>,
    ) {
        for entry in entries {
            debug!(lineno = entry.lineno, ?args, "firing rule");
            self.vm.execute(self.program(entry), args, ctx);
        }
    }

    pub fn on_exists<'a>(&'a self, ob: Ob, ctx: &mut Context<'a>) {
        self.run_all(&self.exists, &[ob], ctx);
    }

    pub fn on_unary_relation<'a>(&'a self, handle: Handle, ob: Ob, ctx: &mut Context<'a>) {
        self.run_all(&self.unary_relation[handle as usize], &[ob], ctx);
    }

    pub fn on_binary_relation<'a>(
        &'a self,
        handle: Handle,
        lhs: Ob,
        rhs: Ob,
        ctx: &mut Context<'a>,
    ) {
        self.run_all(&self.binary_relation[handle as usize], &[lhs, rhs], ctx);
    }

    /// Fires nullary-function rules with the value register bound; skips
    /// dispatch when the entry vanished before the task ran.
    pub fn on_nullary_function<'a>(&'a self, handle: Handle, ctx: &mut Context<'a>) {
        let val = self.vm.nullary_function(handle).find();
        if val != 0 {
            self.run_all(&self.nullary_function[handle as usize], &[val], ctx);
        }
    }

    pub fn on_injective_function<'a>(
        &'a self,
        handle: Handle,
        key: Ob,
        ctx: &mut Context<'a>,
    ) {
        let val = self.vm.injective_function(handle).find(key);
        if val != 0 {
            self.run_all(&self.injective_function[handle as usize], &[key, val], ctx);
        }
    }

    pub fn on_binary_function<'a>(
        &'a self,
        handle: Handle,
        lhs: Ob,
        rhs: Ob,
        ctx: &mut Context<'a>,
    ) {
        let val = self.vm.binary_function(handle).find(lhs, rhs);
        if val != 0 {
            self.run_all(
                &self.binary_function[handle as usize],
                &[lhs, rhs, val],
                ctx,
            );
        }
    }

    pub fn on_symmetric_function<'a>(
        &'a self,
        handle: Handle,
        lhs: Ob,
        rhs: Ob,
        ctx: &mut Context<'a>,
    ) {
        let val = self.vm.symmetric_function(handle).find(lhs, rhs);
        if val != 0 {
            self.run_all(
                &self.symmetric_function[handle as usize],
                &[lhs, rhs, val],
                ctx,
            );
        }
    }

    /// Total number of cleanup tasks: small programs run whole, large ones
    /// once per block.
    pub fn cleanup_task_count(&self) -> usize {
        self.cleanup_small.len() + self.cleanup_large.len() * self.block_count
    }

    /// Runs cleanup task `index`: indices below the small count select a
    /// small program, the remainder select a `(large, block)` pair.
    pub fn execute_cleanup<'a>(&'a self, index: usize, ctx: &mut Context<'a>) {
        let small_count = self.cleanup_small.len();
        if index < small_count {
            let entry = &self.cleanup_small[index];
            debug!(index, lineno = entry.lineno, "running small cleanup");
            self.vm.execute(self.program(entry), &[], ctx);
        } else {
            let index = index - small_count;
            let block = index % self.block_count;
            let entry = &self.cleanup_large[index / self.block_count];
            debug!(block, lineno = entry.lineno, "running sharded cleanup");
            self.vm.execute_block(self.program(entry), block, ctx);
        }
    }

    fn log_stats(&self) {
        let event_count = self.exists.len()
            + count(&self.unary_relation)
            + count(&self.binary_relation)
            + count(&self.nullary_function)
            + count(&self.injective_function)
            + count(&self.binary_function)
            + count(&self.symmetric_function);
        info!(
            event_rules = event_count,
            cleanup_small = self.cleanup_small.len(),
            cleanup_large = self.cleanup_large.len(),
            blocks = self.block_count,
            "agenda loaded"
        );
    }
}

fn buckets(len: usize) -> Vec<Vec<EntryPoint>> {
    (0..len).map(|_| Vec::new()).collect()
}

fn count(buckets: &[Vec<EntryPoint>]) -> usize {
    buckets.iter().map(Vec::len).sum()
}
