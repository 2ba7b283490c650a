use std::fmt::Display;
use std::sync::Mutex;

/// Severity of a build diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warning,
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Info => write!(f, "info"),
            Level::Warning => write!(f, "warning"),
        }
    }
}

/// Sink for the diagnostics a bundle build emits along the way: specifiers
/// kept as runtime imports, names treated as host globals, deconfliction
/// renames. A build only ever reports; it never reads the sink back.
pub trait Logger {
    fn diagnostic(&self, level: Level, message: &str);

    fn info(&self, message: impl AsRef<str>) {
        self.diagnostic(Level::Info, message.as_ref());
    }

    fn warn(&self, message: impl AsRef<str>) {
        self.diagnostic(Level::Warning, message.as_ref());
    }
}

impl<T: Logger> Logger for &T {
    fn diagnostic(&self, level: Level, message: &str) {
        (*self).diagnostic(level, message);
    }
}

/// Prints diagnostics to stderr, keeping stdout free for generated code.
#[derive(Debug, Default)]
pub struct StderrLogger;

impl StderrLogger {
    pub fn new() -> Self {
        StderrLogger
    }
}

impl Logger for StderrLogger {
    fn diagnostic(&self, level: Level, message: &str) {
        eprintln!("{level}: {message}");
    }
}

/// Discards every diagnostic.
#[derive(Debug, Default)]
pub struct NullLogger;

impl NullLogger {
    pub fn new() -> Self {
        NullLogger
    }
}

impl Logger for NullLogger {
    fn diagnostic(&self, _: Level, _: &str) {}
}

/// Records diagnostics in memory so tests can assert on what a build
/// reported without consuming the logger.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .expect("the diagnostic log should not be poisoned")
            .clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|(level, _)| *level == Level::Warning)
            .map(|(_, message)| message)
            .collect()
    }
}

impl Logger for RecordingLogger {
    fn diagnostic(&self, level: Level, message: &str) {
        self.entries
            .lock()
            .expect("the diagnostic log should not be poisoned")
            .push((level, message.to_string()));
    }
}
