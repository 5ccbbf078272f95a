//! Call-site attribution
//!
//! Maps a query event onto the stack frames that belong to the application
//! under measurement. Frames arrive from a [`FrameSource`] in
//! innermost-to-outermost order; [`attribute`] keeps the ones whose file
//! passes the inclusion filter. The instrumentation's own source files are
//! never kept: the hook itself sits on every stack, and counting it would
//! add one spurious hit to every ranking.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Cap on frames taken from a single capture (prevents runaway stacks).
const MAX_FRAMES: usize = 128;

/// Source files of the instrumentation itself.
const SELF_FILES: [&str; 2] = [file!(), crate::interceptor::SOURCE_FILE];

/// One raw frame as supplied by the host runtime's stack introspection.
/// Symbolication is best-effort, so every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub function: Option<String>,
    pub function_start_line: Option<u32>,
}

/// One call site within application code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct StackFrame {
    /// Canonical path of the source file.
    pub file: String,
    /// Line of the call, 1-based.
    pub line: u32,
    /// Name of the enclosing function.
    pub function: String,
    /// Line where the enclosing function starts.
    pub function_start_line: u32,
}

/// Supplies the full call stack at the moment a query completed.
pub trait FrameSource {
    /// Raw frames, innermost first.
    fn capture(&self) -> Vec<RawFrame>;
}

impl<T: FrameSource> FrameSource for &T {
    fn capture(&self) -> Vec<RawFrame> {
        (**self).capture()
    }
}

/// Live in-process capture via the `backtrace` crate.
#[derive(Debug, Default)]
pub struct BacktraceSource;

impl FrameSource for BacktraceSource {
    fn capture(&self) -> Vec<RawFrame> {
        let bt = backtrace::Backtrace::new();
        let mut raw = Vec::new();
        for frame in bt.frames() {
            for symbol in frame.symbols() {
                raw.push(RawFrame {
                    file: symbol
                        .filename()
                        .map(|path| path.to_string_lossy().into_owned()),
                    line: symbol.lineno(),
                    function: symbol.name().map(|name| name.to_string()),
                    function_start_line: symbol.addr().and_then(entry_line),
                });
            }
        }
        raw
    }
}

/// Line of a function's first instruction, resolved by symbolizing the
/// start address reported for the frame. The in-process counterpart of a
/// debugger's "function declared at" lookup.
fn entry_line(addr: *mut std::ffi::c_void) -> Option<u32> {
    let mut line = None;
    backtrace::resolve(addr, |symbol| {
        if line.is_none() {
            line = symbol.lineno();
        }
    });
    line
}

/// Inclusion policy: which files belong to the application under
/// measurement.
pub struct FrameFilter {
    policy: IncludePolicy,
}

enum IncludePolicy {
    /// Plain path-prefix test against the application root. No symlink
    /// resolution and no trailing-separator handling, matching how a
    /// developer points the tool at a checkout.
    PathPrefix(PathBuf),
    /// Caller-supplied predicate.
    Predicate(Box<dyn Fn(&Path) -> bool + Send + Sync>),
}

impl fmt::Debug for FrameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.policy {
            IncludePolicy::PathPrefix(root) => {
                f.debug_tuple("FrameFilter::PathPrefix").field(root).finish()
            }
            IncludePolicy::Predicate(_) => f.debug_tuple("FrameFilter::Predicate").finish(),
        }
    }
}

impl FrameFilter {
    /// Include files under the given application root directory.
    pub fn app_root(root: impl Into<PathBuf>) -> Self {
        Self {
            policy: IncludePolicy::PathPrefix(root.into()),
        }
    }

    /// Default policy: the application root is the current working
    /// directory of the measurement run.
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::app_root(std::env::current_dir()?))
    }

    /// Replace the inclusion policy with an arbitrary predicate. The
    /// instrumentation's own files stay excluded regardless.
    pub fn with_predicate(predicate: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        Self {
            policy: IncludePolicy::Predicate(Box::new(predicate)),
        }
    }

    /// Whether a frame in `file` should be attributed to the application.
    pub fn includes(&self, file: &Path) -> bool {
        if is_own_file(file) {
            return false;
        }
        match &self.policy {
            IncludePolicy::PathPrefix(root) => file.starts_with(root),
            IncludePolicy::Predicate(predicate) => predicate(file),
        }
    }
}

fn is_own_file(file: &Path) -> bool {
    SELF_FILES.iter().any(|own| file.ends_with(own))
}

/// Keep the application's frames out of a raw stack, in order.
///
/// Frames without a resolved file or line cannot be attributed and are
/// dropped. A frame whose function entry line could not be resolved falls
/// back to the call line.
pub fn attribute(raw_frames: &[RawFrame], filter: &FrameFilter) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for raw in raw_frames.iter().take(MAX_FRAMES) {
        let (Some(file), Some(line)) = (raw.file.as_deref(), raw.line) else {
            continue;
        };
        if line == 0 || !filter.includes(Path::new(file)) {
            continue;
        }
        frames.push(StackFrame {
            file: file.to_string(),
            line,
            function: raw
                .function
                .clone()
                .unwrap_or_else(|| "<unknown>".to_string()),
            function_start_line: raw.function_start_line.filter(|&start| start > 0).unwrap_or(line),
        });
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(file: &str, line: u32, function: &str, start: u32) -> RawFrame {
        RawFrame {
            file: Some(file.to_string()),
            line: Some(line),
            function: Some(function.to_string()),
            function_start_line: Some(start),
        }
    }

    #[test]
    fn test_attribute_keeps_frames_under_app_root() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[
                raw("/srv/app/src/views.rs", 40, "list_users", 30),
                raw("/usr/lib/orm/src/query.rs", 900, "execute", 880),
                raw("/srv/app/src/main.rs", 12, "main", 8),
            ],
            &filter,
        );
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].file, "/srv/app/src/views.rs");
        assert_eq!(frames[1].file, "/srv/app/src/main.rs");
    }

    #[test]
    fn test_attribute_preserves_order() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[
                raw("/srv/app/a.rs", 1, "inner", 1),
                raw("/srv/app/b.rs", 2, "outer", 1),
            ],
            &filter,
        );
        assert_eq!(frames[0].function, "inner");
        assert_eq!(frames[1].function, "outer");
    }

    #[test]
    fn test_attribute_drops_unresolved_frames() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[
                RawFrame::default(),
                RawFrame {
                    file: Some("/srv/app/a.rs".to_string()),
                    line: None,
                    ..RawFrame::default()
                },
            ],
            &filter,
        );
        assert!(frames.is_empty());
    }

    #[test]
    fn test_attribute_excludes_own_files_even_under_root() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[
                raw("/srv/app/src/interceptor.rs", 50, "on_query", 40),
                raw("/srv/app/src/callsite.rs", 10, "attribute", 5),
                raw("/srv/app/src/views.rs", 7, "list_users", 3),
            ],
            &filter,
        );
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].file, "/srv/app/src/views.rs");
    }

    #[test]
    fn test_attribute_unknown_function_name() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[RawFrame {
                file: Some("/srv/app/a.rs".to_string()),
                line: Some(3),
                function: None,
                function_start_line: None,
            }],
            &filter,
        );
        assert_eq!(frames[0].function, "<unknown>");
    }

    #[test]
    fn test_attribute_start_line_falls_back_to_call_line() {
        let filter = FrameFilter::app_root("/srv/app");
        let frames = attribute(
            &[RawFrame {
                file: Some("/srv/app/a.rs".to_string()),
                line: Some(17),
                function: Some("f".to_string()),
                function_start_line: None,
            }],
            &filter,
        );
        assert_eq!(frames[0].function_start_line, 17);
    }

    #[test]
    fn test_predicate_filter() {
        let filter = FrameFilter::with_predicate(|path| {
            path.extension().is_some_and(|ext| ext == "rs")
        });
        assert!(filter.includes(Path::new("/anywhere/x.rs")));
        assert!(!filter.includes(Path::new("/anywhere/x.py")));
    }

    #[test]
    fn test_predicate_filter_cannot_readmit_own_files() {
        let filter = FrameFilter::with_predicate(|_| true);
        assert!(!filter.includes(Path::new("/srv/app/src/callsite.rs")));
        assert!(!filter.includes(Path::new("/srv/app/src/interceptor.rs")));
    }

    #[test]
    fn test_attribute_caps_frame_count() {
        let filter = FrameFilter::app_root("/srv/app");
        let raw_frames: Vec<_> = (0..MAX_FRAMES + 50)
            .map(|i| raw("/srv/app/deep.rs", i as u32 + 1, "recurse", 1))
            .collect();
        let frames = attribute(&raw_frames, &filter);
        assert_eq!(frames.len(), MAX_FRAMES);
    }

    #[test]
    fn test_backtrace_source_captures_something() {
        let raw_frames = BacktraceSource.capture();
        assert!(!raw_frames.is_empty());
    }

    #[test]
    fn test_raw_frame_roundtrips_through_json() {
        let frame = raw("/srv/app/a.rs", 10, "f", 5);
        let json = serde_json::to_string(&frame).unwrap();
        let back: RawFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
