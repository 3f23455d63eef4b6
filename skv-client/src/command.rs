//! Owned commands queued by transactions and pipelines.

/// One store command: the command name followed by its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<Vec<u8>>,
}

impl Command {
    /// Starts a command with the given name, e.g. `Command::new("SET")`.
    pub fn new(name: impl AsRef<[u8]>) -> Self {
        Command {
            args: vec![name.as_ref().to_vec()],
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(arg.as_ref().to_vec());
        self
    }

    /// Appends an integer argument in its decimal form.
    pub fn arg_int(self, value: i64) -> Self {
        self.arg(value.to_string())
    }

    /// Appends every argument of the iterator.
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args.extend(args.into_iter().map(|arg| arg.as_ref().to_vec()));
        self
    }

    /// Command name as sent.
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Borrowed view used by the encoder.
    pub fn as_args(&self) -> Vec<&[u8]> {
        self.args.iter().map(Vec::as_slice).collect()
    }
}
