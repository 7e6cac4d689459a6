//! Terminal logging with colored module prefixes and progress bars.
//!
//! Engine phases log under a fixed set of prefixes: `cache`, `detect`,
//! `plan`, `render`, `build`, plus `warn` and `error` for degraded paths.
//! Embedders that report through [`BuildReport`](crate::BuildReport)
//! instead can silence the terminal with [`set_quiet`].
//!
//! # Example
//!
//! ```ignore
//! log!("plan"; "{} direct, {} cascaded", direct, cascaded);
//!
//! let progress = ProgressBars::new(&[("render", tasks.len())]);
//! progress.inc(0);
//! progress.finish();
//! ```

use colored::{ColoredString, Colorize};
use crossterm::{
    cursor, execute,
    terminal::{Clear, ClearType, size},
};
use parking_lot::Mutex;
use std::{
    io::{Write, stdout},
    sync::{
        OnceLock,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

/// Cached terminal width (fetched once on first use)
static TERMINAL_WIDTH: OnceLock<u16> = OnceLock::new();

/// Rows currently reserved by live progress bars
static BAR_ROWS: AtomicUsize = AtomicUsize::new(0);

static QUIET: AtomicBool = AtomicBool::new(false);

// ============================================================================
// Layout Constants
// ============================================================================
//
// Progress bar format: "[render] [████░░░░] 42/100"
//                       ^------^ ^-------^ ^----^
//                       prefix   bar       count

/// Brackets around the module name plus the space after: "[" "]" " "
const PREFIX_OVERHEAD: usize = 3;
/// " []" around the bar plus the space before the count
const BAR_OVERHEAD: usize = 4;
const MIN_BAR_WIDTH: usize = 10;
const MAX_BAR_WIDTH: usize = 40;

#[inline]
const fn prefix_len(module_len: usize) -> usize {
    module_len + PREFIX_OVERHEAD
}

/// Falls back to 120 columns when not attached to a terminal.
fn terminal_width() -> usize {
    *TERMINAL_WIDTH.get_or_init(|| size().map(|(w, _)| w).unwrap_or(120)) as usize
}

/// Suppress all terminal output from the engine.
pub fn set_quiet(quiet: bool) {
    QUIET.store(quiet, Ordering::Relaxed);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

// ============================================================================
// Log Macro
// ============================================================================

/// Log a message with a colored module prefix.
///
/// # Usage
/// ```ignore
/// log!("module"; "message with {} formatting", args);
/// ```
#[macro_export]
macro_rules! log {
    ($module:expr; $($arg:tt)*) => {{
        $crate::logger::log($module, &format!($($arg)*))
    }};
}

/// Log a message with a colored module prefix.
///
/// Single-line messages are truncated to the terminal width. Live progress
/// bars are redrawn below the message.
#[allow(clippy::cast_possible_truncation)] // bar rows are always few
pub fn log(module: &str, message: &str) {
    if is_quiet() {
        return;
    }
    let prefix = colorize_prefix(module);
    let mut stdout = stdout().lock();

    let rows = BAR_ROWS.load(Ordering::SeqCst);
    if rows > 0 {
        execute!(stdout, cursor::MoveUp(rows as u16)).ok();
        execute!(stdout, Clear(ClearType::FromCursorDown)).ok();
    }

    let message = if message.contains('\n') {
        message
    } else {
        truncate_str(message, terminal_width().saturating_sub(prefix_len(module.len())))
    };
    writeln!(stdout, "{prefix} {message}").ok();

    for _ in 0..rows {
        writeln!(stdout).ok();
    }
    stdout.flush().ok();
}

fn colorize_prefix(module: &str) -> ColoredString {
    let prefix = format!("[{module}]");
    match module.to_ascii_lowercase().as_str() {
        "cache" => prefix.bright_blue().bold(),
        "detect" | "plan" => prefix.bright_cyan().bold(),
        "render" | "build" => prefix.bright_green().bold(),
        "warn" => prefix.bright_magenta().bold(),
        "error" => prefix.bright_red().bold(),
        _ => prefix.bright_yellow().bold(),
    }
}

/// Truncate to at most `max_len` bytes on a UTF-8 boundary.
#[inline]
fn truncate_str(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ============================================================================
// Progress Bars
// ============================================================================

/// One progress bar per module, each on its own terminal row.
///
/// Rows update in place with cursor movement. Updates from render workers
/// are serialized through a lock so rows never interleave.
pub struct ProgressBars {
    bars: Vec<Bar>,
    lock: Mutex<()>,
}

struct Bar {
    prefix: ColoredString,
    prefix_len: usize,
    total: usize,
    current: AtomicUsize,
    row: usize,
}

impl ProgressBars {
    /// Reserve one row per `(module, total)` pair.
    pub fn new(modules: &[(&'static str, usize)]) -> Self {
        if !is_quiet() {
            let mut stdout = stdout().lock();
            for _ in modules {
                writeln!(stdout).ok();
            }
            stdout.flush().ok();
            BAR_ROWS.store(modules.len(), Ordering::SeqCst);
        }

        let bars = modules
            .iter()
            .enumerate()
            .map(|(row, (module, total))| Bar {
                prefix: colorize_prefix(module),
                prefix_len: prefix_len(module.len()),
                total: *total,
                current: AtomicUsize::new(0),
                row,
            })
            .collect();

        Self {
            bars,
            lock: Mutex::new(()),
        }
    }

    /// Like [`new`](Self::new), skipping empty modules.
    ///
    /// Returns `None` when there is at most one item overall.
    pub fn new_filtered(modules: &[(&'static str, usize)]) -> Option<Self> {
        let modules: Vec<_> = modules.iter().filter(|(_, n)| *n > 0).copied().collect();
        let total: usize = modules.iter().map(|(_, n)| n).sum();
        (total > 1).then(|| Self::new(&modules))
    }

    /// Increment the bar at `index` (creation order).
    #[inline]
    pub fn inc(&self, index: usize) {
        if let Some(bar) = self.bars.get(index) {
            let current = bar.current.fetch_add(1, Ordering::Relaxed) + 1;
            self.draw(bar, current);
        }
    }

    /// Items counted so far on the bar at `index`.
    pub fn count(&self, index: usize) -> usize {
        self.bars
            .get(index)
            .map_or(0, |bar| bar.current.load(Ordering::Relaxed))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn draw(&self, bar: &Bar, current: usize) {
        if is_quiet() {
            return;
        }
        let _guard = self.lock.lock();

        let count = format!("{current}/{}", bar.total);
        let overhead = bar.prefix_len + BAR_OVERHEAD + count.len();
        let width = terminal_width()
            .saturating_sub(overhead)
            .clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH);
        let filled = (current * width).checked_div(bar.total).unwrap_or(0).min(width);
        let line = "█".repeat(filled) + &"░".repeat(width - filled);

        let mut stdout = stdout().lock();
        let up = (self.bars.len() - bar.row) as u16;
        execute!(stdout, cursor::MoveUp(up), Clear(ClearType::CurrentLine)).ok();
        write!(stdout, "{} [{line}] {count}", bar.prefix).ok();
        execute!(stdout, cursor::MoveDown(up)).ok();
        write!(stdout, "\r").ok();
        stdout.flush().ok();
    }

    /// Erase every bar row.
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(&self) {
        if BAR_ROWS.swap(0, Ordering::SeqCst) == 0 {
            return;
        }
        let _guard = self.lock.lock();
        let mut stdout = stdout().lock();
        let rows = self.bars.len() as u16;

        execute!(stdout, cursor::MoveUp(rows)).ok();
        for _ in &self.bars {
            execute!(stdout, Clear(ClearType::CurrentLine), cursor::MoveDown(1)).ok();
        }
        execute!(stdout, cursor::MoveUp(rows)).ok();
        stdout.flush().ok();
    }
}

impl Drop for ProgressBars {
    fn drop(&mut self) {
        self.finish();
    }
}
