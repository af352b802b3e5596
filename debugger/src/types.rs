use std::str::FromStr;

/// A DBGp continuation command: resumes or ends execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuation {
    Run,
    StepInto,
    StepOver,
    StepOut,
    Stop,
    Detach,
}

impl Continuation {
    pub const ALL: [Continuation; 6] = [
        Continuation::Run,
        Continuation::StepInto,
        Continuation::StepOver,
        Continuation::StepOut,
        Continuation::Stop,
        Continuation::Detach,
    ];

    /// The wire verb for this continuation.
    pub fn verb(&self) -> &'static str {
        match self {
            Continuation::Run => "run",
            Continuation::StepInto => "step_into",
            Continuation::StepOver => "step_over",
            Continuation::StepOut => "step_out",
            Continuation::Stop => "stop",
            Continuation::Detach => "detach",
        }
    }
}

impl FromStr for Continuation {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|continuation| continuation.verb() == s)
            .ok_or_else(|| eyre::eyre!("invalid continuation command {s}"))
    }
}
