use std::sync::{Arc, Mutex};
use std::thread;

use eyre::Result;

use transport::{ListenOutcome, ProtocolSession, SessionController, DEFAULT_DBGP_PORT};

use crate::{
    host::EditorHost,
    internals::{DebuggerInternals, Followup},
    state::{DebuggerState, Event},
    types::Continuation,
};

/// The debugger facade handed to the editor integration.
///
/// Cheap to clone; all clones share one state machine. The accept-and-first-
/// reply chain runs on a dedicated worker thread per session since both can
/// block indefinitely; everything triggered by a user action afterwards runs
/// synchronously on the calling thread, one send/receive pair at a time.
#[derive(Clone)]
pub struct Debugger {
    internals: Arc<Mutex<DebuggerInternals>>,
    rx: crossbeam_channel::Receiver<Event>,
    // held outside the internals lock so a stuck listen/receive can be
    // aborted while the worker owns that lock
    controller: Arc<Mutex<Option<SessionController>>>,
}

impl Debugger {
    pub fn new(host: Box<dyn EditorHost>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let _ = tx.send(Event::Idle);

        Self {
            internals: Arc::new(Mutex::new(DebuggerInternals::new(host, tx))),
            rx,
            controller: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to state-change events.
    pub fn events(&self) -> crossbeam_channel::Receiver<Event> {
        self.rx.clone()
    }

    pub fn state(&self) -> DebuggerState {
        self.internals.lock().unwrap().state.clone()
    }

    /// Start listening for an engine connection.
    ///
    /// The port comes from the host's `port` setting, falling back to the
    /// protocol default. Rejected while a session already exists.
    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<()> {
        let port = {
            let mut internals = self.internals.lock().unwrap();
            if internals.session.is_some()
                || matches!(internals.state, DebuggerState::Listening)
            {
                eyre::bail!("a debug session is already active");
            }

            let port = internals
                .host
                .read_config("port")
                .and_then(|value| value.parse().ok())
                .unwrap_or(DEFAULT_DBGP_PORT);
            internals.set_state(DebuggerState::Listening);
            port
        };

        let session = ProtocolSession::new();
        *self.controller.lock().unwrap() = Some(session.controller());

        let this = self.clone();
        thread::spawn(move || this.accept_loop(session, port));
        Ok(())
    }

    // Worker entry point: block in accept, then drive the connection up to
    // its first pause or completion.
    fn accept_loop(&self, mut session: ProtocolSession, port: u16) {
        match session.listen(port) {
            Ok(ListenOutcome::Connected) => {
                let followup = {
                    let mut internals = self.internals.lock().unwrap();
                    internals.session = Some(session);
                    internals.set_state(DebuggerState::Running);
                    internals.on_connected()
                };
                self.handle_followup(followup);
            }
            Ok(ListenOutcome::Cancelled) => {
                tracing::debug!("listen cancelled before any engine connected");
                self.internals
                    .lock()
                    .unwrap()
                    .set_state(DebuggerState::Idle);
            }
            Err(e) => {
                let report = eyre::Report::new(e);
                self.internals.lock().unwrap().fail(&report);
            }
        }
    }

    /// Issue a continuation command. On a break the current line marker is
    /// set and context/stack are fetched and shown; on engine termination
    /// the session is recycled into a fresh listen.
    #[tracing::instrument(skip(self))]
    pub fn continuation(&self, continuation: Continuation) {
        let followup = self
            .internals
            .lock()
            .unwrap()
            .continue_with(continuation);
        self.handle_followup(followup);
    }

    fn handle_followup(&self, followup: Result<Followup>) {
        match followup {
            Ok(Followup::Nothing) => {}
            Ok(Followup::Relisten) => {
                {
                    let mut internals = self.internals.lock().unwrap();
                    internals.teardown();
                    internals.status_message(
                        "Page finished executing. Reload to continue debugging.",
                    );
                }
                self.controller.lock().unwrap().take();
                if let Err(e) = self.start() {
                    tracing::warn!(error = %e, "could not restart listener");
                }
            }
            Err(e) => {
                self.controller.lock().unwrap().take();
                self.internals.lock().unwrap().fail(&e);
            }
        }
    }

    /// Toggle the breakpoint on (file, line); returns whether it is set
    /// afterwards.
    pub fn toggle_breakpoint(&self, file_uri: &str, line: u32) -> Result<bool> {
        let mut internals = self.internals.lock().unwrap();
        match internals.toggle_breakpoint(file_uri, line) {
            Ok(now_set) => Ok(now_set),
            Err(e) => {
                internals.fail(&e);
                Err(eyre::eyre!("toggling breakpoint failed"))
            }
        }
    }

    /// Remove every breakpoint in every file.
    pub fn clear_all_breakpoints(&self) -> Result<()> {
        let mut internals = self.internals.lock().unwrap();
        if let Err(e) = internals.clear_all_breakpoints() {
            internals.fail(&e);
            eyre::bail!("clearing breakpoints failed");
        }
        Ok(())
    }

    /// Ask the engine for its execution status and surface it to the user.
    pub fn status(&self) {
        let mut internals = self.internals.lock().unwrap();
        if let Err(e) = internals.query_status() {
            internals.fail(&e);
        }
    }

    /// Prompt for an arbitrary DBGp command and show the raw reply.
    pub fn execute_raw(&self) {
        let mut internals = self.internals.lock().unwrap();
        if let Err(e) = internals.execute_raw() {
            internals.fail(&e);
        }
    }

    /// Inspection text for a variable from the current paused context.
    pub fn inspect(&self, variable: &str) -> Option<String> {
        self.internals.lock().unwrap().inspect(variable)
    }

    /// Stop debugging entirely: cancel a pending listen or close the live
    /// session. Breakpoints are retained for the next run.
    #[tracing::instrument(skip(self))]
    pub fn stop_debugging(&self) {
        // shut the socket first: a worker blocked in accept or receive is
        // holding the internals lock and will only release it once the
        // socket operation fails
        if let Some(controller) = self.controller.lock().unwrap().take() {
            controller.disconnect();
        }

        let mut internals = self.internals.lock().unwrap();
        internals.teardown();
        internals.set_state(DebuggerState::Idle);
    }
}
