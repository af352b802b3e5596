/// Panel the decoded variables land in after a break.
pub const PANEL_CONTEXT: &str = "context";
/// Panel the formatted call stack lands in after a break.
pub const PANEL_STACK: &str = "stack";
/// One-line status messages.
pub const PANEL_STATUS: &str = "status";
/// Raw replies from the free-form execute facility.
pub const PANEL_EXECUTE: &str = "execute";

/// The editor surface the debugger calls into.
///
/// This is the whole boundary: the core never depends on any particular
/// rendering technology, it only asks the host to open files, mark lines and
/// display text. Implementations must be callable from the session worker
/// thread.
pub trait EditorHost: Send {
    /// Open `file_uri` or bring its existing view to the front.
    fn open_or_focus(&self, file_uri: &str);

    /// Mark the line execution is paused on.
    fn set_current_line(&self, file_uri: &str, line: u32);

    fn clear_current_line(&self);

    /// Replace the breakpoint markers shown for `file_uri`.
    fn render_breakpoint_markers(&self, file_uri: &str, lines: &[u32]);

    /// Put `text` into the named output panel, replacing its contents.
    fn show_text(&self, panel: &str, text: &str);

    /// Ask the user for a line of input. `None` means cancelled.
    fn prompt_for_text(&self, title: &str) -> Option<String>;

    /// Look a configuration value up in the host's settings.
    fn read_config(&self, key: &str) -> Option<String>;
}
