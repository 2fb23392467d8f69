//! Indentation-aware transcript logger.
//!
//! The narrator is the human-readable side of the pipeline's logging: every
//! stage describes what it is doing through nested scopes, and the resulting
//! transcript is mirrored to the console and to per-run log files.
//!
//! ```ignore
//! let narrator = Narrator::console();
//! let _scope = narrator.enter("Generating examples:");
//! narrator.write("Found 2 example(s)");
//! // prints "Generating examples:\n  Found 2 example(s)\n"
//! ```
//!
//! A `Narrator` is a cheap handle around shared state. Clones write into the
//! same transcript, which is what lets a process runner's output readers
//! narrate from background tasks while the owning scope is still open.
//! Independent runs should each construct their own narrator.

use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};

const DEFAULT_PADDING: &str = "  ";

struct SinkEntry {
    id: u64,
    sink: Box<dyn Write + Send>,
}

struct NarratorState {
    level: usize,
    at_line_start: bool,
    verbose: bool,
    padding: String,
    sinks: Vec<SinkEntry>,
    next_sink_id: u64,
}

/// Shared handle to a hierarchical transcript.
#[derive(Clone)]
pub struct Narrator {
    state: Arc<Mutex<NarratorState>>,
}

impl std::fmt::Debug for Narrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Narrator")
            .field("level", &state.level)
            .field("verbose", &state.verbose)
            .field("sinks", &state.sinks.len())
            .finish()
    }
}

impl Narrator {
    /// Narrator without any attached sink. Output is discarded until a sink
    /// is attached with [`Narrator::with_sink`].
    pub fn silent() -> Self {
        Self {
            state: Arc::new(Mutex::new(NarratorState {
                level: 0,
                at_line_start: true,
                verbose: true,
                padding: DEFAULT_PADDING.to_string(),
                sinks: Vec::new(),
                next_sink_id: 0,
            })),
        }
    }

    /// Narrator that writes to stdout for its whole lifetime.
    pub fn console() -> Self {
        let narrator = Self::silent();
        narrator.attach(Box::new(std::io::stdout()));
        narrator
    }

    /// Replace the per-level indentation string.
    pub fn with_padding(self, padding: impl Into<String>) -> Self {
        self.lock().padding = padding.into();
        self
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.lock().level
    }

    pub fn is_verbose(&self) -> bool {
        self.lock().verbose
    }

    /// Write `label` at the current depth, then indent everything written
    /// until the returned guard is dropped.
    pub fn enter(&self, label: impl AsRef<str>) -> ScopeGuard {
        self.write(label);
        self.lock().level += 1;
        ScopeGuard {
            narrator: self.clone(),
        }
    }

    /// Write a full line.
    pub fn write(&self, text: impl AsRef<str>) {
        self.emit(text.as_ref(), "\n");
    }

    /// Write text without terminating the line.
    pub fn write_inline(&self, text: impl AsRef<str>) {
        self.emit(text.as_ref(), "");
    }

    /// Write `content` as an indented block below `label`.
    pub fn write_block(&self, label: impl AsRef<str>, content: impl AsRef<str>) {
        let _scope = self.enter(label);
        self.write(content);
    }

    /// Override verbosity until the guard is dropped. Quiet scopes discard
    /// every write, including scope labels.
    pub fn with_verbose(&self, verbose: bool) -> VerbosityGuard {
        let previous = {
            let mut state = self.lock();
            std::mem::replace(&mut state.verbose, verbose)
        };
        VerbosityGuard {
            narrator: self.clone(),
            previous,
        }
    }

    /// Mirror all writes into `sink` until the guard is dropped.
    pub fn with_sink(&self, sink: impl Write + Send + 'static) -> SinkGuard {
        let id = self.attach(Box::new(sink));
        SinkGuard {
            narrator: self.clone(),
            id,
        }
    }

    fn attach(&self, sink: Box<dyn Write + Send>) -> u64 {
        let mut state = self.lock();
        let id = state.next_sink_id;
        state.next_sink_id += 1;
        state.sinks.push(SinkEntry { id, sink });
        id
    }

    fn emit(&self, text: &str, end: &str) {
        let mut state = self.lock();
        if !state.verbose {
            return;
        }
        let pad = state.padding.repeat(state.level);
        let newline_pad = format!("\n{pad}");
        let mut text = format!("{text}{end}");
        if state.at_line_start {
            state.at_line_start = false;
            text.insert_str(0, &pad);
        }
        let text = match text.strip_suffix('\n') {
            Some(body) => {
                state.at_line_start = true;
                format!("{}\n", body.replace('\n', &newline_pad))
            }
            None => text.replace('\n', &newline_pad),
        };
        for entry in state.sinks.iter_mut() {
            // A broken sink must not take the pipeline down with it.
            let _ = entry.sink.write_all(text.as_bytes());
            let _ = entry.sink.flush();
        }
    }

    fn lock(&self) -> MutexGuard<'_, NarratorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Closes a narrator scope on drop.
#[must_use = "the scope closes as soon as the guard is dropped"]
pub struct ScopeGuard {
    narrator: Narrator,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let mut state = self.narrator.lock();
        state.level = state.level.saturating_sub(1);
    }
}

/// Restores the previous verbosity on drop.
#[must_use = "verbosity is restored as soon as the guard is dropped"]
pub struct VerbosityGuard {
    narrator: Narrator,
    previous: bool,
}

impl Drop for VerbosityGuard {
    fn drop(&mut self) {
        self.narrator.lock().verbose = self.previous;
    }
}

/// Detaches a sink on drop.
#[must_use = "the sink is detached as soon as the guard is dropped"]
pub struct SinkGuard {
    narrator: Narrator,
    id: u64,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let mut state = self.narrator.lock();
        if let Some(pos) = state.sinks.iter().position(|entry| entry.id == self.id) {
            let mut entry = state.sinks.remove(pos);
            let _ = entry.sink.flush();
        }
    }
}

/// In-memory sink, mostly useful for inspecting transcripts in tests.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = self.bytes.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrator_with_buffer() -> (Narrator, SharedBuffer, SinkGuard) {
        let narrator = Narrator::silent();
        let buffer = SharedBuffer::new();
        let guard = narrator.with_sink(buffer.clone());
        (narrator, buffer, guard)
    }

    #[test]
    fn test_nested_scopes_indent() {
        let (narrator, buffer, _sink) = narrator_with_buffer();
        {
            let _outer = narrator.enter("outer:");
            narrator.write("one");
            {
                let _inner = narrator.enter("inner:");
                narrator.write("two");
            }
            narrator.write("three");
        }
        narrator.write("four");

        assert_eq!(
            buffer.contents(),
            "outer:\n  one\n  inner:\n    two\n  three\nfour\n"
        );
        assert_eq!(narrator.depth(), 0);
    }

    #[test]
    fn test_multiline_text_reindented() {
        let (narrator, buffer, _sink) = narrator_with_buffer();
        let _scope = narrator.enter("block:");
        narrator.write("a\nb\nc");
        assert_eq!(buffer.contents(), "block:\n  a\n  b\n  c\n");
    }

    #[test]
    fn test_inline_writes_indent_once_per_line() {
        let (narrator, buffer, _sink) = narrator_with_buffer();
        let _scope = narrator.enter("scope:");
        narrator.write_inline("Waiting: ");
        narrator.write_inline("still ");
        narrator.write("done");
        narrator.write_inline("x\n");
        narrator.write("y");
        assert_eq!(
            buffer.contents(),
            "scope:\n  Waiting: still done\n  x\n  y\n"
        );
    }

    #[test]
    fn test_quiet_scope_discards_and_restores() {
        let (narrator, buffer, _sink) = narrator_with_buffer();
        {
            let _quiet = narrator.with_verbose(false);
            narrator.write("hidden");
            {
                let _loud = narrator.with_verbose(true);
                narrator.write("shown");
            }
            assert!(!narrator.is_verbose());
            narrator.write("hidden again");
        }
        assert!(narrator.is_verbose());
        narrator.write("visible");
        assert_eq!(buffer.contents(), "shown\nvisible\n");
    }

    #[test]
    fn test_sinks_fan_out_and_detach() {
        let narrator = Narrator::silent();
        let first = SharedBuffer::new();
        let second = SharedBuffer::new();
        let _first_guard = narrator.with_sink(first.clone());
        {
            let _second_guard = narrator.with_sink(second.clone());
            narrator.write("both");
        }
        narrator.write("first only");

        assert_eq!(first.contents(), "both\nfirst only\n");
        assert_eq!(second.contents(), "both\n");
    }

    #[test]
    fn test_scope_closes_on_early_return() {
        fn failing(narrator: &Narrator) -> Result<(), ()> {
            let _scope = narrator.enter("work:");
            Err(())
        }
        let narrator = Narrator::silent();
        assert!(failing(&narrator).is_err());
        assert_eq!(narrator.depth(), 0);
    }

    #[test]
    fn test_custom_padding() {
        let narrator = Narrator::silent().with_padding("--");
        let buffer = SharedBuffer::new();
        let _sink = narrator.with_sink(buffer.clone());
        let _scope = narrator.enter("a");
        narrator.write("b");
        assert_eq!(buffer.contents(), "a\n--b\n");
    }

    #[test]
    fn test_concurrent_writers_keep_lines_whole() {
        let (narrator, buffer, _sink) = narrator_with_buffer();
        let _scope = narrator.enter("threads:");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let narrator = narrator.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        narrator.write(format!("t{i}-{j}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let contents = buffer.contents();
        let lines: Vec<_> = contents.lines().skip(1).collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l.starts_with("  t") && !l[2..].contains(' ')));
    }
}
