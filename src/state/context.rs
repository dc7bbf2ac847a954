//! Per-evaluation bookkeeping: the reference stack, the active loop context
//! and the resolve cache.
//!
//! Every piece of state installed here is undone by a guard on drop, so an
//! error (or a panic unwinding through a getter) never leaves a frame, a loop
//! context or a cache behind.

use crate::error::{Result, StateError};
use crate::hash::FastHashMap;
use crate::path::PathInfo;
use crate::reference::{RefKey, StatePropertyRef};
use serde_json::Value;
use std::cell::RefCell;

pub(crate) struct EvalContext {
    stack: RefCell<Vec<StatePropertyRef>>,
    loop_context: RefCell<Option<StatePropertyRef>>,
    cache: RefCell<Option<FastHashMap<RefKey, Value>>>,
    cache_enabled: bool,
    max_depth: usize,
}

impl EvalContext {
    pub(crate) fn new(cache_enabled: bool, max_depth: usize) -> Self {
        Self {
            stack: RefCell::new(Vec::new()),
            loop_context: RefCell::new(None),
            cache: RefCell::new(None),
            cache_enabled,
            max_depth,
        }
    }

    /// Push `reference` as the one being evaluated.
    pub(crate) fn push(&self, reference: &StatePropertyRef) -> Result<FrameGuard<'_>> {
        let mut stack = self.stack.borrow_mut();
        if stack.len() >= self.max_depth {
            return Err(StateError::ResolveDepthExceeded {
                pattern: reference.pattern().to_owned(),
            });
        }
        stack.push(reference.clone());
        Ok(FrameGuard { ctx: self })
    }

    /// Path of the innermost reference being evaluated.
    pub(crate) fn current_info(&self) -> Option<&'static PathInfo> {
        self.stack.borrow().last().map(StatePropertyRef::info)
    }

    /// Innermost first.
    pub(crate) fn frames(&self) -> Vec<StatePropertyRef> {
        self.stack.borrow().iter().rev().cloned().collect()
    }

    pub(crate) fn loop_context(&self) -> Option<StatePropertyRef> {
        self.loop_context.borrow().clone()
    }

    pub(crate) fn enter_loop(&self, reference: StatePropertyRef) -> Result<LoopGuard<'_>> {
        let mut slot = self.loop_context.borrow_mut();
        if slot.is_some() {
            return Err(StateError::AlreadyInLoopContext);
        }
        *slot = Some(reference);
        Ok(LoopGuard { ctx: self })
    }

    /// Install a fresh cache for the duration of the guard.
    ///
    /// A no-op when caching is disabled.
    pub(crate) fn install_cache(&self) -> CacheGuard<'_> {
        let fresh = self.cache_enabled.then(FastHashMap::default);
        let previous = self.cache.replace(fresh);
        CacheGuard {
            ctx: self,
            previous: Some(previous),
        }
    }

    pub(crate) fn cached(&self, reference: &StatePropertyRef) -> Option<Value> {
        self.cache
            .borrow()
            .as_ref()
            .and_then(|cache| cache.get(&reference.key()))
            .cloned()
    }

    pub(crate) fn store(&self, reference: &StatePropertyRef, value: &Value) {
        if let Some(cache) = self.cache.borrow_mut().as_mut() {
            cache.insert(reference.key(), value.clone());
        }
    }

    /// Forget cached values after a write, keeping the cache installed.
    pub(crate) fn invalidate(&self) {
        if let Some(cache) = self.cache.borrow_mut().as_mut() {
            cache.clear();
        }
    }

    pub(crate) fn has_cache(&self) -> bool {
        self.cache.borrow().is_some()
    }
}

pub(crate) struct FrameGuard<'a> {
    ctx: &'a EvalContext,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.ctx.stack.borrow_mut().pop();
    }
}

pub(crate) struct LoopGuard<'a> {
    ctx: &'a EvalContext,
}

impl Drop for LoopGuard<'_> {
    fn drop(&mut self) {
        *self.ctx.loop_context.borrow_mut() = None;
    }
}

pub(crate) struct CacheGuard<'a> {
    ctx: &'a EvalContext,
    previous: Option<Option<FastHashMap<RefKey, Value>>>,
}

impl Drop for CacheGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.ctx.cache.borrow_mut() = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn title() -> StatePropertyRef {
        StatePropertyRef::parse("title", None).unwrap()
    }

    #[test]
    fn frames_pop_on_drop() {
        let ctx = EvalContext::new(true, 4);
        {
            let _outer = ctx.push(&title()).unwrap();
            assert_eq!(ctx.current_info().map(PathInfo::pattern), Some("title"));
        }
        assert!(ctx.current_info().is_none());
    }

    #[test]
    fn depth_is_bounded() {
        let ctx = EvalContext::new(true, 2);
        let _a = ctx.push(&title()).unwrap();
        let _b = ctx.push(&title()).unwrap();
        assert!(matches!(
            ctx.push(&title()),
            Err(StateError::ResolveDepthExceeded { .. })
        ));
    }

    #[test]
    fn loop_context_is_not_reentrant() {
        let ctx = EvalContext::new(true, 4);
        {
            let _guard = ctx.enter_loop(title()).unwrap();
            assert!(matches!(
                ctx.enter_loop(title()),
                Err(StateError::AlreadyInLoopContext)
            ));
            assert!(ctx.loop_context().is_some());
        }
        assert!(ctx.loop_context().is_none());
    }

    #[test]
    fn nested_caches_restore_the_outer_one() {
        let ctx = EvalContext::new(true, 4);
        let r = title();
        let _outer = ctx.install_cache();
        ctx.store(&r, &Value::from(1));
        {
            let _inner = ctx.install_cache();
            assert!(ctx.cached(&r).is_none());
            ctx.store(&r, &Value::from(2));
        }
        assert_eq!(ctx.cached(&r), Some(Value::from(1)));
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let ctx = EvalContext::new(false, 4);
        let _guard = ctx.install_cache();
        ctx.store(&title(), &Value::Null);
        assert!(!ctx.has_cache());
        assert!(ctx.cached(&title()).is_none());
    }
}
