use std::collections::{BTreeMap, HashMap};

use dbgp_codec::Command;
use eyre::Result;
use transport::{types::BreakpointId, ProtocolSession};

/// Per source file, the lines carrying breakpoints and the engine-assigned
/// id for each, once acknowledged.
///
/// Breakpoints exist from the moment the user toggles them, whether or not a
/// session is live; they only carry an id while connected, and engine ids
/// are not stable across connections, so every new session gets the whole
/// set replayed.
#[derive(Debug, Default)]
pub struct BreakpointStore {
    files: HashMap<String, BTreeMap<u32, Option<BreakpointId>>>,
}

impl BreakpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of breakpoints across every file.
    pub fn len(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(BTreeMap::is_empty)
    }

    /// Every file currently tracking at least one breakpoint.
    pub fn files(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|(_, lines)| !lines.is_empty())
            .map(|(file_uri, _)| file_uri.clone())
            .collect()
    }

    /// The breakpointed lines for `file_uri`, in order. Feeds the host's
    /// marker rendering.
    pub fn lines_for(&self, file_uri: &str) -> Vec<u32> {
        self.files
            .get(file_uri)
            .map(|lines| lines.keys().copied().collect())
            .unwrap_or_default()
    }

    /// The live engine id for a breakpoint, if it has one.
    pub fn id_of(&self, file_uri: &str, line: u32) -> Option<&BreakpointId> {
        self.files.get(file_uri)?.get(&line)?.as_ref()
    }

    /// Add or remove the breakpoint on (file, line). Returns whether the
    /// breakpoint is set after the call.
    ///
    /// While a session is connected the engine is told immediately: one
    /// `breakpoint_set` when adding (recording the returned id), one
    /// `breakpoint_remove` when removing.
    #[tracing::instrument(skip(self, session))]
    pub fn toggle(
        &mut self,
        file_uri: &str,
        line: u32,
        session: Option<&mut ProtocolSession>,
    ) -> Result<bool> {
        let lines = self.files.entry(file_uri.to_string()).or_default();

        if let Some(id) = lines.remove(&line) {
            tracing::debug!("removing breakpoint");
            if let (Some(session), Some(id)) = (session, id) {
                if session.is_connected() {
                    session.request(&Command::new("breakpoint_remove").option("d", id))?;
                }
            }
            return Ok(false);
        }

        tracing::debug!("adding breakpoint");
        let id = match session {
            Some(session) if session.is_connected() => submit(session, file_uri, line)?,
            _ => None,
        };
        lines.insert(line, id);
        Ok(true)
    }

    /// Re-submit every stored breakpoint to a freshly connected session,
    /// overwriting any stale ids. Returns how many were replayed.
    pub fn replay_all(&mut self, session: &mut ProtocolSession) -> Result<usize> {
        let mut replayed = 0;
        for (file_uri, lines) in &mut self.files {
            for (line, id_slot) in lines.iter_mut() {
                *id_slot = submit(session, file_uri, *line)?;
                replayed += 1;
            }
        }
        tracing::debug!(replayed, "replayed breakpoints");
        Ok(replayed)
    }

    /// Remove every breakpoint in every file, telling the engine about each
    /// live one while connected.
    pub fn clear_all(&mut self, session: Option<&mut ProtocolSession>) -> Result<()> {
        if let Some(session) = session {
            if session.is_connected() {
                for lines in self.files.values() {
                    for id in lines.values().flatten() {
                        session.request(&Command::new("breakpoint_remove").option("d", id))?;
                    }
                }
            }
        }
        self.files.clear();
        Ok(())
    }
}

fn submit(
    session: &mut ProtocolSession,
    file_uri: &str,
    line: u32,
) -> Result<Option<BreakpointId>> {
    let reply = session.request(
        &Command::new("breakpoint_set")
            .option("t", "line")
            .option("f", file_uri)
            .option("n", line),
    )?;
    Ok(reply.attribute("id").map(ToString::to_string))
}
