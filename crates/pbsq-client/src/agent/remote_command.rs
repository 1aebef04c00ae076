pub use pbsq_core::template::shell_quote;

/// Builds a command line that will be interpreted by a remote shell.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    parts: Vec<String>,
}

impl RemoteCommand {
    pub fn new(program: &str) -> Self {
        Self {
            parts: vec![program.to_string()],
        }
    }

    pub fn arg(mut self, arg: &str) -> Self {
        self.parts.push(shell_quote(arg));
        self
    }

    /// Appends text verbatim so the remote shell can expand it, e.g. `~/.sos/tasks`.
    pub fn raw(mut self, text: &str) -> Self {
        self.parts.push(text.to_string());
        self
    }

    pub fn to_shell_string(&self) -> String {
        self.parts.join(" ")
    }
}
