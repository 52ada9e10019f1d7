use std::sync::Mutex;

use rquickjs::{Context, Runtime};

use crate::error::ScriptError;

const PRELUDE_JS: &str = include_str!("prelude.js");

/// A context plus how many scripts it has run since creation.
pub struct PooledContext {
    pub context: Context,
    uses: u32,
}

/// Fixed-size pool of ready-to-use QuickJS contexts, mutex-guarded free
/// list (spec.md §4.5: "contexts are pooled for performance"). `rquickjs`'s
/// `parallel` feature makes `Context` `Send`, so a context can cross a
/// `spawn_blocking` boundary and be handed back when the script finishes.
pub struct ContextPool {
    runtime: Runtime,
    free: Mutex<Vec<PooledContext>>,
    recycle_after: u32,
}

impl ContextPool {
    /// # Errors
    ///
    /// Returns an error if the underlying QuickJS runtime or any of the
    /// initial pooled contexts fail to initialise.
    pub fn new(size: usize, recycle_after: u32, memory_limit_bytes: usize, max_stack_size_bytes: usize) -> Result<Self, ScriptError> {
        let runtime = Runtime::new().map_err(|source| ScriptError::Interpreter {
            message: source.to_string(),
        })?;
        runtime.set_memory_limit(memory_limit_bytes);
        runtime.set_max_stack_size(max_stack_size_bytes);

        let mut free = Vec::with_capacity(size.max(1));
        for _ in 0..size.max(1) {
            free.push(fresh_context(&runtime)?);
        }

        Ok(Self {
            runtime,
            free: Mutex::new(free),
            recycle_after: recycle_after.max(1),
        })
    }

    /// Takes a context out of the free list, blocking other callers of the
    /// same pool out of that slot until it is returned via `release`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError::PoolExhausted` if every context is already
    /// checked out.
    pub fn acquire(&self) -> Result<PooledContext, ScriptError> {
        self.free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop()
            .ok_or(ScriptError::PoolExhausted)
    }

    /// Installs (or clears, with `None`) the runtime-wide interrupt
    /// callback QuickJS polls between bytecode instructions. The sandbox
    /// uses this to enforce the per-script wall-clock deadline from
    /// spec.md §4.5 — `rquickjs` exposes no per-`Context` variant, so the
    /// handler is swapped in immediately before `eval` and cleared right
    /// after, while the pool's single mutex keeps that window exclusive.
    pub fn set_interrupt_handler(&self, handler: Option<Box<dyn FnMut() -> bool + Send + 'static>>) {
        self.runtime.set_interrupt_handler(handler);
    }

    /// Returns a context to the pool. Past `recycle_after` uses the context
    /// is dropped and replaced with a freshly built one — QuickJS exposes
    /// no externally triggerable incremental GC, so a full rebuild is the
    /// closest available substitute for "recycled after a forced GC".
    pub fn release(&self, mut pooled: PooledContext) {
        pooled.uses += 1;
        if pooled.uses >= self.recycle_after {
            if let Ok(fresh) = fresh_context(&self.runtime) {
                pooled = fresh;
            }
        }
        self.free
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(pooled);
    }
}

fn fresh_context(runtime: &Runtime) -> Result<PooledContext, ScriptError> {
    let context = Context::full(runtime).map_err(|source| ScriptError::Interpreter {
        message: source.to_string(),
    })?;
    context.with(|ctx| ctx.eval::<(), _>(PRELUDE_JS)).map_err(|source| ScriptError::Interpreter {
        message: source.to_string(),
    })?;
    Ok(PooledContext { context, uses: 0 })
}
