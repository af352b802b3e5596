use transport::responses::BreakLocation;

/// Where the debug session currently is.
///
/// `Idle` is "no session at all"; `Listening` is waiting for an engine to
/// connect back; `Terminated` is a finished request whose session is being
/// recycled into a fresh listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebuggerState {
    Idle,
    Listening,
    Running,
    Paused {
        /// Absent when the engine reported a break with no message element:
        /// there is nothing to display, but the pause is real.
        location: Option<BreakLocation>,
    },
    Terminated,
}

/// State changes broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Idle,
    Listening,
    Running,
    Paused { location: Option<BreakLocation> },
    Terminated,
}

impl<'a> From<&'a DebuggerState> for Event {
    fn from(value: &'a DebuggerState) -> Self {
        match value {
            DebuggerState::Idle => Event::Idle,
            DebuggerState::Listening => Event::Listening,
            DebuggerState::Running => Event::Running,
            DebuggerState::Paused { location } => Event::Paused {
                location: location.clone(),
            },
            DebuggerState::Terminated => Event::Terminated,
        }
    }
}
