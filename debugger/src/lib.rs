//! High level DBGp debugger: session lifecycle, breakpoint bookkeeping and
//! the continuation state machine, driven through a narrow editor boundary.
mod breakpoints;
mod debugger;
mod host;
mod internals;
pub(crate) mod state;
mod types;

pub use breakpoints::BreakpointStore;
pub use debugger::Debugger;
pub use host::{EditorHost, PANEL_CONTEXT, PANEL_EXECUTE, PANEL_STACK, PANEL_STATUS};
pub use state::{DebuggerState, Event};
pub use types::Continuation;
