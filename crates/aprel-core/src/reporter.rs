//! Reporter trait for dependency injection
//!
//! This trait allows pipeline stages to report progress and status without
//! being coupled to a specific terminal implementation.

use aprel_schema::Diagnostic;

pub trait Reporter: Send + Sync {
    /// Indicates a new stage has started (e.g. "Build", "Verify").
    fn section(&self, title: &str);

    /// A unit of work inside the current stage (e.g. "Build release for macos").
    fn step(&self, msg: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Surface the captured output of a command to the operator.
    fn diagnostic(&self, diagnostic: &Diagnostic);

    /// Display a final summary of multiple operations.
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn step(&self, msg: &str) {
        (**self).step(msg);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn diagnostic(&self, diagnostic: &Diagnostic) {
        (**self).diagnostic(diagnostic);
    }
    fn summary(&self, count: usize, action: &str, elapsed_secs: f64) {
        (**self).summary(count, action, elapsed_secs);
    }
}

/// A no-op reporter for silent operations (e.g., tests).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn step(&self, _: &str) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
    fn diagnostic(&self, _: &Diagnostic) {}
    fn summary(&self, _: usize, _: &str, _: f64) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Reporter;
    use aprel_schema::Diagnostic;
    use std::sync::Mutex;

    /// Records every message, tagged with its kind.
    #[derive(Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) events: Mutex<Vec<(String, String)>>,
    }

    impl RecordingReporter {
        fn push(&self, kind: &str, msg: &str) {
            self.events
                .lock()
                .unwrap()
                .push((kind.to_string(), msg.to_string()));
        }

        pub(crate) fn count(&self, kind: &str) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| k == kind)
                .count()
        }
    }

    impl Reporter for RecordingReporter {
        fn section(&self, title: &str) {
            self.push("section", title);
        }
        fn step(&self, msg: &str) {
            self.push("step", msg);
        }
        fn info(&self, msg: &str) {
            self.push("info", msg);
        }
        fn success(&self, msg: &str) {
            self.push("success", msg);
        }
        fn warning(&self, msg: &str) {
            self.push("warning", msg);
        }
        fn error(&self, msg: &str) {
            self.push("error", msg);
        }
        fn diagnostic(&self, diagnostic: &Diagnostic) {
            self.push("diagnostic", &diagnostic.command);
        }
        fn summary(&self, count: usize, action: &str, _: f64) {
            self.push("summary", &format!("{count} {action}"));
        }
    }
}
