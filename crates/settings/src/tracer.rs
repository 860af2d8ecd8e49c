//! Execution tracer
//!
//! Lua gives no native stack trace for faults crossing the API boundary, so
//! the tracer observes the VM through a debug hook while a chunk runs:
//! frame-enter records the current source/line and pushes the scope name,
//! frame-exit pops it, and every executed line overwrites the "last trace"
//! location. When execution faults, the raw error is enriched with the last
//! frame and last trace locations recorded here.

use crate::Error;
use mlua::{DebugEvent, HookTriggers, Lua, VmState};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A source location recovered from the debug hook
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceLocation {
    /// Chunk name the VM was executing
    pub source: String,
    /// Enclosing scope (function name, or "main" for the chunk body)
    pub scope: String,
    /// Source line (1-indexed, 0 when unknown)
    pub line: u32,
}

impl fmt::Display for TraceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in {}", self.source, self.line, self.scope)
    }
}

/// Tracer lifecycle for one executing unit
#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum Phase {
    #[default]
    Idle,
    Tracing,
    Clean,
    Faulted,
}

#[derive(Default)]
struct TraceState {
    phase: Phase,
    frame_source: String,
    frame_line: u32,
    scope_stack: Vec<String>,
    last_trace: TraceLocation,
}

impl TraceState {
    fn current_scope(&self) -> String {
        self.scope_stack
            .last()
            .cloned()
            .unwrap_or_else(|| "main".to_string())
    }
}

/// Observes script execution through the Lua debug hook
#[derive(Default)]
pub struct ExecutionTracer {
    state: Rc<RefCell<TraceState>>,
}

impl ExecutionTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the debug hook and reset per-unit state
    ///
    /// Fails when the hook cannot be installed; execution must not proceed
    /// untraced.
    pub fn attach(&self, lua: &Lua) -> mlua::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            *state = TraceState::default();
            state.phase = Phase::Tracing;
        }

        let state = Rc::clone(&self.state);
        lua.set_hook(
            HookTriggers::ON_CALLS | HookTriggers::ON_RETURNS | HookTriggers::EVERY_LINE,
            move |_lua, debug| {
                let mut st = state.borrow_mut();
                let line = debug.current_line().unwrap_or(0) as u32;
                match debug.event() {
                    DebugEvent::Call => {
                        let source = debug
                            .source()
                            .short_src
                            .map(|s| s.to_string())
                            .unwrap_or_default();
                        let scope = debug
                            .names()
                            .name
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "main".to_string());
                        st.frame_source = source;
                        st.frame_line = line;
                        st.scope_stack.push(scope);
                    }
                    DebugEvent::TailCall => {
                        // A tail call replaces the running frame and gets no
                        // matching return event
                        let scope = debug
                            .names()
                            .name
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "main".to_string());
                        st.frame_line = line;
                        match st.scope_stack.last_mut() {
                            Some(top) => *top = scope,
                            None => st.scope_stack.push(scope),
                        }
                    }
                    DebugEvent::Ret => {
                        st.scope_stack.pop();
                        if st.scope_stack.is_empty() && st.phase == Phase::Tracing {
                            st.phase = Phase::Clean;
                        }
                    }
                    DebugEvent::Line => {
                        let source = debug
                            .source()
                            .short_src
                            .map(|s| s.to_string())
                            .unwrap_or_default();
                        let scope = st.current_scope();
                        st.last_trace = TraceLocation {
                            source,
                            scope,
                            line,
                        };
                    }
                    _ => {}
                }
                Ok(VmState::Continue)
            },
        )?;
        Ok(())
    }

    /// Remove the debug hook
    pub fn detach(&self, lua: &Lua) {
        lua.remove_hook();
    }

    /// Last recorded frame-enter location
    pub fn last_frame(&self) -> TraceLocation {
        let state = self.state.borrow();
        TraceLocation {
            source: state.frame_source.clone(),
            scope: state.current_scope(),
            line: state.frame_line,
        }
    }

    /// Last executed line
    pub fn last_trace(&self) -> TraceLocation {
        self.state.borrow().last_trace.clone()
    }

    /// Compose the enriched runtime fault for an execution error
    ///
    /// The enriched fault supersedes the raw Lua error for all callers.
    pub fn enrich(&self, cause: &mlua::Error) -> Error {
        let mut state = self.state.borrow_mut();
        state.phase = Phase::Faulted;
        drop(state);

        let last_frame = self.last_frame();
        let last_trace = self.last_trace();
        let message = format!(
            "{} (scope {}, trace line before unwind: {})",
            cause, last_frame.scope, last_trace.line
        );
        Error::ScriptRuntime {
            message,
            last_frame,
            last_trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_run_records_trace() {
        let lua = Lua::new();
        let tracer = ExecutionTracer::new();
        tracer.attach(&lua).unwrap();

        lua.load("x = 1\ny = 2\nz = x + y").exec().unwrap();
        tracer.detach(&lua);

        let trace = tracer.last_trace();
        assert_eq!(trace.line, 3);
    }

    #[test]
    fn test_fault_is_enriched_with_locations() {
        let lua = Lua::new();
        let tracer = ExecutionTracer::new();
        tracer.attach(&lua).unwrap();

        let err = lua
            .load("function boom()\n  error(\"kaput\")\nend\nboom()")
            .exec()
            .unwrap_err();
        tracer.detach(&lua);

        let enriched = tracer.enrich(&err);
        match enriched {
            Error::ScriptRuntime {
                message,
                last_trace,
                ..
            } => {
                assert!(message.contains("kaput"));
                assert_eq!(last_trace.line, 2);
            }
            other => panic!("expected ScriptRuntime, got {other:?}"),
        }
    }

    #[test]
    fn test_scope_stack_balances() {
        let lua = Lua::new();
        let tracer = ExecutionTracer::new();
        tracer.attach(&lua).unwrap();

        lua.load("function inner() return 1 end\nfunction outer() return inner() end\nouter()")
            .exec()
            .unwrap();
        tracer.detach(&lua);

        // After the chunk returns the stack must be empty again
        assert!(tracer.state.borrow().scope_stack.is_empty());
    }
}
