use std::time::Duration;

/// Default number of unchanged lines kept around each change.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// Bytes inspected for NUL when deciding whether content is binary.
/// Same window git uses.
pub const DEFAULT_BINARY_PROBE_BYTES: usize = 8000;

/// Runtime settings for a repository session.
#[derive(Debug, Clone)]
pub struct Config {
    pub context_lines: usize,
    pub binary_probe_bytes: usize,
    /// Upper bound for the blocking I/O worker pool.
    pub io_threads: usize,
    pub watch_debounce: Duration,
    /// Glob patterns, relative to the work tree, the watcher never reports.
    pub ignore_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_lines: DEFAULT_CONTEXT_LINES,
            binary_probe_bytes: DEFAULT_BINARY_PROBE_BYTES,
            io_threads: 4,
            watch_debounce: Duration::from_millis(200),
            ignore_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Compile `ignore_patterns`, skipping (and logging) invalid ones.
    pub fn compiled_ignore_patterns(&self) -> Vec<glob::Pattern> {
        self.ignore_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("invalid ignore pattern '{}': {}", p, e);
                    None
                }
            })
            .collect()
    }
}
