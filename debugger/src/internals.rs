use std::collections::HashMap;
use std::fmt::Write as _;

use dbgp_codec::Command;
use eyre::Result;
use transport::{
    responses::{self, Status},
    ProtocolSession,
};

use crate::{
    breakpoints::BreakpointStore,
    host::{EditorHost, PANEL_CONTEXT, PANEL_EXECUTE, PANEL_STACK, PANEL_STATUS},
    state::{DebuggerState, Event},
    types::Continuation,
};

/// What the caller has to do once a continuation reply has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Followup {
    Nothing,
    /// The engine finished the request: tear the session down and start a
    /// fresh listen so the next one can be caught.
    Relisten,
}

pub(crate) struct DebuggerInternals {
    pub(crate) state: DebuggerState,
    pub(crate) session: Option<ProtocolSession>,
    pub(crate) breakpoints: BreakpointStore,
    pub(crate) host: Box<dyn EditorHost>,
    publisher: crossbeam_channel::Sender<Event>,

    // variable name -> (type, rendered value), for the inspection panel
    context_cache: HashMap<String, (String, String)>,
}

impl DebuggerInternals {
    pub(crate) fn new(
        host: Box<dyn EditorHost>,
        publisher: crossbeam_channel::Sender<Event>,
    ) -> Self {
        Self {
            state: DebuggerState::Idle,
            session: None,
            breakpoints: BreakpointStore::new(),
            host,
            publisher,
            context_cache: HashMap::new(),
        }
    }

    pub(crate) fn set_state(&mut self, new_state: DebuggerState) {
        let event = Event::from(&new_state);
        self.state = new_state;
        let _ = self.publisher.send(event);
    }

    pub(crate) fn status_message(&self, text: &str) {
        self.host.show_text(PANEL_STATUS, text);
    }

    /// A freshly accepted connection: read the engine's handshake, replay
    /// every stored breakpoint, then let the script run.
    #[tracing::instrument(skip(self))]
    pub(crate) fn on_connected(&mut self) -> Result<Followup> {
        let init = {
            let session = self.session.as_mut().ok_or_else(no_session)?;
            responses::decode_init(&session.receive()?)?
        };
        tracing::debug!(file_uri = %init.file_uri, "engine handshake");

        self.status_message("Connected");
        self.host.open_or_focus(&init.file_uri);

        let session = self.session.as_mut().ok_or_else(no_session)?;
        self.breakpoints.replay_all(session)?;

        self.continue_with(Continuation::Run)
    }

    /// Send one continuation command and interpret the status reply.
    #[tracing::instrument(skip(self))]
    pub(crate) fn continue_with(&mut self, continuation: Continuation) -> Result<Followup> {
        self.host.clear_current_line();
        self.context_cache.clear();

        let session = self.session.as_mut().ok_or_else(no_session)?;
        let outcome = session
            .request(&Command::new(continuation.verb()))
            .and_then(|reply| responses::decode_status(&reply));
        let packet = match outcome {
            Ok(packet) => packet,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "ignoring malformed continuation reply");
                self.status_message(&format!("unexpected engine reply: {e}"));
                return Ok(Followup::Nothing);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(status = %packet.status, "continuation reply");

        if let Some(location) = &packet.break_location {
            self.status_message("breakpoint");
            self.host.open_or_focus(&location.file);
            self.host.set_current_line(&location.file, location.line);
        }

        match packet.status {
            Status::Break => {
                self.set_state(DebuggerState::Paused {
                    location: packet.break_location.clone(),
                });
                self.fetch_context()?;
                self.fetch_stack()?;
                Ok(Followup::Nothing)
            }
            status if status.is_terminal() => {
                self.set_state(DebuggerState::Terminated);
                Ok(Followup::Relisten)
            }
            _ => {
                self.set_state(DebuggerState::Running);
                Ok(Followup::Nothing)
            }
        }
    }

    /// Retrieve and display the paused frame's variables. A reply that does
    /// not decode is skipped, it must not kill the session.
    fn fetch_context(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        let reply = match session.request(&Command::new("context_get")) {
            Ok(reply) => reply,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "skipping context retrieval");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let properties = responses::decode_property_tree(&reply);
        cache_properties(&mut self.context_cache, &properties);
        self.host
            .show_text(PANEL_CONTEXT, &responses::render_properties(&properties));
        Ok(())
    }

    /// Retrieve and display the call stack, with the same isolation as
    /// [`Self::fetch_context`].
    fn fetch_stack(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        let reply = match session.request(&Command::new("stack_get")) {
            Ok(reply) => reply,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "skipping stack retrieval");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let stack = responses::decode_stack(&reply);
        self.host
            .show_text(PANEL_STACK, &responses::render_stack(&stack));
        Ok(())
    }

    pub(crate) fn toggle_breakpoint(&mut self, file_uri: &str, line: u32) -> Result<bool> {
        let now_set = self
            .breakpoints
            .toggle(file_uri, line, self.session.as_mut())?;
        self.host
            .render_breakpoint_markers(file_uri, &self.breakpoints.lines_for(file_uri));
        Ok(now_set)
    }

    pub(crate) fn clear_all_breakpoints(&mut self) -> Result<()> {
        let files = self.breakpoints.files();
        self.breakpoints.clear_all(self.session.as_mut())?;
        for file_uri in files {
            self.host.render_breakpoint_markers(&file_uri, &[]);
        }
        Ok(())
    }

    /// `status` command: one request/reply pair, result shown to the user.
    /// A reply that does not decode is reported and dropped, like the
    /// break-time fetches.
    pub(crate) fn query_status(&mut self) -> Result<()> {
        let session = self.session.as_mut().ok_or_else(no_session)?;
        let outcome = session
            .request(&Command::new("status"))
            .and_then(|reply| responses::decode_status(&reply));
        let packet = match outcome {
            Ok(packet) => packet,
            Err(e) if !e.is_fatal() => {
                tracing::warn!(error = %e, "ignoring malformed status reply");
                self.status_message(&format!("unexpected engine reply: {e}"));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let reason = packet.reason.unwrap_or_default();
        self.status_message(&format!("{reason}: {}", packet.status));
        Ok(())
    }

    /// Free-form command facility: prompt, send verbatim, show the reply.
    pub(crate) fn execute_raw(&mut self) -> Result<()> {
        let Some(input) = self.host.prompt_for_text("Execute") else {
            return Ok(());
        };
        let input = input.trim();
        if input.is_empty() {
            return Ok(());
        }

        let command = match input.split_once(' ') {
            Some((verb, rest)) => Command::new(verb).flag(rest),
            None => Command::new(input),
        };

        let session = self.session.as_mut().ok_or_else(no_session)?;
        let reply = session.request(&command)?;
        self.host.show_text(PANEL_EXECUTE, &reply.to_pretty_xml());
        Ok(())
    }

    /// Formatted inspection text for a variable from the cached context, the
    /// way the inspect panel wants it. Array and object members are grouped
    /// under their parent.
    pub(crate) fn inspect(&self, variable: &str) -> Option<String> {
        let name = if variable.starts_with('$') {
            variable.to_string()
        } else {
            format!("${variable}")
        };
        let (kind, value) = self.context_cache.get(&name)?;

        let mut out = String::new();
        if kind == "array" || kind == "object" {
            let mut members: Vec<_> = self
                .context_cache
                .iter()
                .filter(|(key, _)| key.starts_with(&name))
                .collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            for (key, (member_kind, member_value)) in members {
                let _ = writeln!(out, "{key} ({member_kind}) = {member_value}");
            }
        } else {
            let _ = writeln!(out, "{name} ({kind}) = {value}");
        }
        Some(out)
    }

    /// Close the session (if any) and clear the paused marker. Breakpoints
    /// are kept for the next run.
    pub(crate) fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.context_cache.clear();
        self.host.clear_current_line();
    }

    /// Terminal failure path: one readable message, then back to Idle.
    pub(crate) fn fail(&mut self, error: &eyre::Report) {
        tracing::warn!(%error, "debug session failed");
        self.status_message(&format!("debugger error: {error}"));
        self.teardown();
        self.set_state(DebuggerState::Idle);
    }
}

fn no_session() -> eyre::Report {
    eyre::eyre!("no active debug session")
}

fn cache_properties(
    cache: &mut HashMap<String, (String, String)>,
    properties: &[responses::Property],
) {
    for property in properties {
        cache.insert(
            property.name.clone(),
            (property.r#type.clone(), property.display_value()),
        );
        cache_properties(cache, &property.children);
    }
}
