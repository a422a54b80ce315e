//! The engine: signature plus agenda plus the fixed-point driver.
//!
//! A small pool of OS threads pulls tasks cooperatively. All non-merge
//! work holds the strict rwlock in shared mode; a merge holds it uniquely,
//! which drains the other workers first, so merges execute atomically with
//! respect to everything else. The run ends when every non-sample queue is
//! empty and one full cleanup cycle produced no new facts.

use std::str::SplitWhitespace;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, trace, warn};

use magma_asm::ProgramParser;
use magma_core::{Arity, Ob, Signature};

use crate::agenda::Agenda;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::sampler::Sampler;
use crate::scheduler::{EventQueues, EventTask};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Carrier capacity `N`; fixed for the whole session.
    pub item_dim: usize,
    pub worker_threads: usize,
    pub cleanup_threads: usize,
    pub diffuse_threads: usize,
    /// Seed for the sampling threads.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            item_dim: 511,
            worker_threads: 1,
            cleanup_threads: 1,
            diffuse_threads: 1,
            seed: 0,
        }
    }
}

#[derive(Default)]
struct CleanupCursor {
    index: usize,
    cycle_start_pushes: u64,
    started: bool,
}

pub struct Engine {
    config: EngineConfig,
    signature: Signature,
    queues: Arc<EventQueues>,
    agenda: Option<Agenda>,
    sampler: Option<Sampler>,
    strict: RwLock<()>,
    alive: AtomicBool,
    active: AtomicUsize,
    cleanup: Mutex<CleanupCursor>,
    fatal: Mutex<Option<EngineError>>,
    merge_count: AtomicU64,
    enforce_count: AtomicU64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        assert!(config.worker_threads >= 1, "need at least one worker");
        assert!(config.cleanup_threads >= 1, "need at least one cleanup thread");
        assert!(config.diffuse_threads >= 1, "need at least one diffuse thread");
        let queues = Arc::new(EventQueues::new());
        let carrier = Arc::new(magma_core::Carrier::new(config.item_dim, queues.clone()));
        let signature = Signature::new(carrier, queues.clone());
        Self {
            config,
            signature,
            queues,
            agenda: None,
            sampler: None,
            strict: RwLock::new(()),
            alive: AtomicBool::new(false),
            active: AtomicUsize::new(0),
            cleanup: Mutex::new(CleanupCursor::default()),
            fatal: Mutex::new(None),
            merge_count: AtomicU64::new(0),
            enforce_count: AtomicU64::new(0),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn merge_count(&self) -> u64 {
        self.merge_count.load(Relaxed)
    }

    pub fn enforce_count(&self) -> u64 {
        self.enforce_count.load(Relaxed)
    }

    pub fn cleanup_task_count(&self) -> usize {
        self.agenda.as_ref().map_or(0, Agenda::cleanup_task_count)
    }

    pub fn block_count(&self) -> usize {
        self.agenda.as_ref().map_or(0, Agenda::block_count)
    }

    /// Declares the symbols of a signature file and routes `LESS` / `NLESS`
    /// events to the order queues.
    pub fn declare_signature(&mut self, source: &str) -> Result<()> {
        self.signature.declare_all(source)?;
        self.queues.set_order_handles(
            self.signature.handle_of(Arity::BinaryRelation, "LESS"),
            self.signature.handle_of(Arity::BinaryRelation, "NLESS"),
        );
        Ok(())
    }

    /// Parses compiled rule listings and loads the agenda.
    pub fn load_programs(&mut self, source: &str) -> Result<()> {
        let mut parser = ProgramParser::new(&self.signature);
        let listings = parser.parse(source)?;
        let code: Arc<[u8]> = parser.into_data().into();
        self.agenda = Some(Agenda::load(&self.signature, code, &listings));
        Ok(())
    }

    /// Loads sampling weights: one `<weight> <name>` per line.
    pub fn set_language(&mut self, source: &str) -> Result<()> {
        self.sampler = Some(Sampler::from_language(&self.signature, source)?);
        Ok(())
    }

    /// Gives every undefined nullary function a fresh ob.
    pub fn seed_nullary_functions(&self) -> Result<()> {
        let carrier = self.signature.carrier();
        for (name, fun) in self.signature.nullary_functions() {
            if !fun.defined() {
                let val = carrier.try_insert().ok_or(EngineError::Full)?;
                debug!(name, val, "seeding nullary function");
                fun.insert(val);
            }
        }
        Ok(())
    }

    /// Assumes every core-fact expression in `source`, one per line, `#`
    /// comments skipped. Runs in the load phase, before the scheduler.
    pub fn assume_all(&self, source: &str) -> Result<()> {
        for (index, line) in source.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.assume(line, index + 1)?;
        }
        Ok(())
    }

    /// Assumes one fact: `EQUAL <term> <term>`, or `<relation> <term>
    /// [<term>]` with terms in prefix notation.
    pub fn assume(&self, expression: &str, lineno: usize) -> Result<()> {
        debug!(expression, "assuming fact");
        let mut terms = TermReader {
            signature: &self.signature,
            tokens: expression.split_whitespace(),
            lineno,
        };
        let head = terms.next_token()?.to_owned();
        if head == "EQUAL" {
            let lhs = terms.parse_term()?;
            let rhs = terms.parse_term()?;
            terms.finish()?;
            self.signature.carrier().ensure_equal(lhs, rhs);
        } else if let Some(rel) = self.signature.unary_relation(&head) {
            let key = terms.parse_term()?;
            terms.finish()?;
            rel.insert(key);
        } else if let Some(rel) = self.signature.binary_relation(&head) {
            let lhs = terms.parse_term()?;
            let rhs = terms.parse_term()?;
            terms.finish()?;
            rel.insert(lhs, rhs);
        } else {
            return Err(EngineError::BadFact {
                lineno,
                reason: format!("bad relation type: {head}"),
            });
        }
        Ok(())
    }

    /// Drives the structure to a fixed point. Returns the fatal error when
    /// the session found an inconsistency.
    pub fn grow(&self) -> Result<()> {
        let agenda = self.agenda.as_ref().expect("programs loaded before grow");
        *self.cleanup.lock() = CleanupCursor::default();
        self.alive.store(true, Relaxed);
        info!(
            workers = self.config.worker_threads,
            cleanup = self.config.cleanup_threads,
            diffuse = self.config.diffuse_threads,
            "growing to fixed point"
        );

        std::thread::scope(|scope| {
            for index in 0..self.config.worker_threads {
                scope.spawn(move || self.work_loop(agenda, index as u64));
            }
            for _ in 0..self.config.cleanup_threads {
                scope.spawn(|| self.cleanup_loop(agenda));
            }
            for index in 0..self.config.diffuse_threads {
                scope.spawn(move || self.diffuse_loop(index as u64));
            }
        });

        info!(
            merges = self.merge_count(),
            enforcements = self.enforce_count(),
            obs = self.signature.carrier().item_count(),
            "reached fixed point"
        );
        match self.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Validates every invariant; panics on violation, returns the
    /// inconsistency witness as an error.
    pub fn validate(&self) -> Result<()> {
        self.signature.validate();
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Relaxed)
    }

    fn shutdown(&self) {
        self.alive.store(false, Relaxed);
        self.queues.wake_all();
    }

    fn fail(&self, err: EngineError) {
        warn!(%err, "fatal error, terminating session");
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.shutdown();
    }

    fn work_loop(&self, agenda: &Agenda, index: u64) {
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(index));
        while self.is_alive() {
            if self.try_merge() {
                continue;
            }
            if self.try_event(agenda, &mut ctx) {
                continue;
            }
            if self.try_cleanup(agenda, &mut ctx) {
                continue;
            }
            if self.try_sample(&mut rng) {
                continue;
            }
            self.queues.idle_wait(Duration::from_millis(10));
        }
    }

    fn cleanup_loop(&self, agenda: &Agenda) {
        let mut ctx = Context::new();
        while self.is_alive() {
            if !self.try_cleanup(agenda, &mut ctx) {
                self.queues.idle_wait(Duration::from_millis(10));
            }
        }
    }

    fn diffuse_loop(&self, index: u64) {
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(0x5eed ^ index));
        while self.is_alive() {
            if !self.try_sample(&mut rng) {
                self.queues.idle_wait(Duration::from_millis(10));
            }
        }
    }

    /// Executes one pending merge under the unique strict lock.
    fn try_merge(&self) -> bool {
        self.active.fetch_add(1, Relaxed);
        let Some(dep) = self.queues.pop_merge() else {
            self.active.fetch_sub(1, Relaxed);
            return false;
        };
        {
            let _unique = self.strict.write();
            if let Err(err) = self.execute_merge(dep) {
                self.fail(err);
            }
        }
        self.active.fetch_sub(1, Relaxed);
        true
    }

    fn execute_merge(&self, dep: Ob) -> Result<()> {
        let carrier = self.signature.carrier();
        let rep = carrier.find(dep);
        debug_assert!(rep < dep, "ill-formed merge: {dep}, {rep}");
        if let Some(nless) = self.signature.binary_relation("NLESS") {
            if nless.contains(dep, rep) || nless.contains(rep, dep) {
                return Err(EngineError::Inconsistent { lhs: rep, rhs: dep });
            }
        }
        trace!(dep, rep, "merging");
        self.signature.unsafe_merge(dep);
        carrier.unsafe_remove(dep);
        self.queues.cancel_referencing(dep);
        self.merge_count.fetch_add(1, Relaxed);
        Ok(())
    }

    /// Executes one pending event task under the shared strict lock.
    fn try_event<'e>(&'e self, agenda: &'e Agenda, ctx: &mut Context<'e>) -> bool {
        self.active.fetch_add(1, Relaxed);
        let _shared = self.strict.read();
        let Some(task) = self.queues.pop_event() else {
            self.active.fetch_sub(1, Relaxed);
            return false;
        };
        match task {
            EventTask::Exists(ob) => agenda.on_exists(ob, ctx),
            EventTask::UnaryRelation(handle, ob) => {
                agenda.on_unary_relation(handle, ob, ctx)
            }
            EventTask::PositiveOrder(handle, lhs, rhs)
            | EventTask::NegativeOrder(handle, lhs, rhs)
            | EventTask::BinaryRelation(handle, lhs, rhs) => {
                agenda.on_binary_relation(handle, lhs, rhs, ctx)
            }
            EventTask::NullaryFunction(handle) => agenda.on_nullary_function(handle, ctx),
            EventTask::InjectiveFunction(handle, key) => {
                agenda.on_injective_function(handle, key, ctx)
            }
            EventTask::BinaryFunction(handle, lhs, rhs) => {
                agenda.on_binary_function(handle, lhs, rhs, ctx)
            }
            EventTask::SymmetricFunction(handle, lhs, rhs) => {
                agenda.on_symmetric_function(handle, lhs, rhs, ctx)
            }
        }
        self.enforce_count.fetch_add(1, Relaxed);
        self.active.fetch_sub(1, Relaxed);
        true
    }

    /// Executes one cleanup task under the shared strict lock; detects the
    /// fixed point at cleanup-cycle boundaries.
    fn try_cleanup<'e>(&'e self, agenda: &'e Agenda, ctx: &mut Context<'e>) -> bool {
        let _shared = self.strict.read();
        let Some(index) = self.next_cleanup_index(agenda) else {
            return false;
        };
        agenda.execute_cleanup(index, ctx);
        self.active.fetch_sub(1, Relaxed);
        true
    }

    fn next_cleanup_index(&self, agenda: &Agenda) -> Option<usize> {
        let task_count = agenda.cleanup_task_count();
        let mut cursor = self.cleanup.lock();
        if !self.is_alive() {
            return None;
        }
        if cursor.index == 0 {
            let pushes = self.queues.pushes();
            let quiescent = cursor.started
                && pushes == cursor.cycle_start_pushes
                && self.queues.all_empty()
                && self.active.load(Relaxed) == 0;
            if quiescent {
                debug!("cleanup cycle produced no new facts; saturated");
                self.shutdown();
                return None;
            }
            cursor.started = true;
            cursor.cycle_start_pushes = pushes;
            if task_count == 0 {
                return None;
            }
        }
        let index = cursor.index;
        cursor.index = (cursor.index + 1) % task_count;
        // counted while the handed-out task is outstanding, under the
        // cursor lock, so the quiescence check cannot miss it
        self.active.fetch_add(1, Relaxed);
        Some(index)
    }

    /// Attempts one random insertion under the shared strict lock; a full
    /// carrier quietly stops producing obs.
    fn try_sample(&self, rng: &mut StdRng) -> bool {
        let Some(sampler) = &self.sampler else {
            return false;
        };
        if self.signature.carrier().is_full() {
            return false;
        }
        self.active.fetch_add(1, Relaxed);
        {
            let _shared = self.strict.read();
            sampler.try_insert_random(rng);
        }
        self.active.fetch_sub(1, Relaxed);
        true
    }
}

/// Prefix-notation term reader used by the load-facts phase: every drawn
/// symbol finds its tuple in the structure or inserts a fresh ob recording
/// the defining equation.
struct TermReader<'a> {
    signature: &'a Signature,
    tokens: SplitWhitespace<'a>,
    lineno: usize,
}

impl TermReader<'_> {
    fn bad(&self, reason: impl Into<String>) -> EngineError {
        EngineError::BadFact {
            lineno: self.lineno,
            reason: reason.into(),
        }
    }

    fn next_token(&mut self) -> Result<&str> {
        self.tokens
            .next()
            .ok_or_else(|| EngineError::BadFact {
                lineno: self.lineno,
                reason: "truncated expression".to_owned(),
            })
    }

    fn fresh_ob(&self) -> Result<Ob> {
        self.signature
            .carrier()
            .try_insert()
            .ok_or(EngineError::Full)
    }

    fn parse_term(&mut self) -> Result<Ob> {
        let token = self.next_token()?.to_owned();
        if let Some(fun) = self.signature.nullary_function(&token) {
            let mut val = fun.find();
            if val == 0 {
                val = self.fresh_ob()?;
                fun.insert(val);
            }
            return Ok(self.signature.carrier().find(val));
        }
        if let Some(fun) = self.signature.injective_function(&token) {
            let key = self.parse_term()?;
            let mut val = fun.find(key);
            if val == 0 {
                val = self.fresh_ob()?;
                fun.insert(key, val);
            }
            return Ok(self.signature.carrier().find(val));
        }
        if let Some(fun) = self.signature.binary_function(&token) {
            let lhs = self.parse_term()?;
            let rhs = self.parse_term()?;
            let mut val = fun.find(lhs, rhs);
            if val == 0 {
                val = self.fresh_ob()?;
                fun.insert(lhs, rhs, val);
            }
            return Ok(self.signature.carrier().find(val));
        }
        if let Some(fun) = self.signature.symmetric_function(&token) {
            let lhs = self.parse_term()?;
            let rhs = self.parse_term()?;
            let mut val = fun.find(lhs, rhs);
            if val == 0 {
                val = self.fresh_ob()?;
                fun.insert(lhs, rhs, val);
            }
            return Ok(self.signature.carrier().find(val));
        }
        Err(self.bad(format!("unknown symbol: {token}")))
    }

    fn finish(&mut self) -> Result<()> {
        match self.tokens.next() {
            None => Ok(()),
            Some(extra) => Err(self.bad(format!("trailing tokens: {extra}"))),
        }
    }
}
