//! Progress reporting and display.
//!
//! A trait-based abstraction keeps the pipeline decoupled from display
//! concerns: an interactive bar on a TTY, plain stderr lines otherwise,
//! and a no-op reporter for tests. Row completions arrive in whatever
//! order the workers finish, so every backend only counts and prints;
//! nothing depends on ordering.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use console::style;

/// Phase of the overall run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    LoadingInput,
    ValidatingSchema,
    Uploading,
    Archiving,
    Completed,
    Failed(String),
}

fn phase_message(phase: &Phase) -> String {
    match phase {
        Phase::LoadingInput => "reading input".to_owned(),
        Phase::ValidatingSchema => "checking columns against the database".to_owned(),
        Phase::Uploading => "uploading rows".to_owned(),
        Phase::Archiving => "archiving entries".to_owned(),
        Phase::Completed => format!("{}", style("done").green()),
        Phase::Failed(err) => format!("{} {err}", style("failed:").red().bold()),
    }
}

/// Progress reporter trait - implement this for different display backends.
pub trait ProgressReporter: Send + Sync {
    /// Set the overall phase.
    fn set_phase(&self, phase: Phase);

    /// Announce how many rows the run will process.
    fn register_rows(&self, total: usize);

    /// One row finished successfully, with any warnings it collected.
    fn row_succeeded(&self, label: &str, warnings: &[String]);

    /// One row failed.
    fn row_failed(&self, label: &str, error: &str);

    /// Log an informational message.
    fn log_info(&self, message: &str);

    /// Log a warning message.
    fn log_warn(&self, message: &str);

    /// Log an error message.
    fn log_error(&self, message: &str);

    /// Finish and clean up the display.
    fn finish(&self);
}

/// A no-op reporter for when progress display is disabled.
pub struct NullReporter;

impl ProgressReporter for NullReporter {
    fn set_phase(&self, _phase: Phase) {}
    fn register_rows(&self, _total: usize) {}
    fn row_succeeded(&self, _label: &str, _warnings: &[String]) {}
    fn row_failed(&self, _label: &str, _error: &str) {}
    fn log_info(&self, _message: &str) {}
    fn log_warn(&self, _message: &str) {}
    fn log_error(&self, _message: &str) {}
    fn finish(&self) {}
}

/// Running totals shared by the display backends.
struct Tally {
    total: usize,
    succeeded: usize,
    failed: usize,
    warnings: usize,
    started: Instant,
}

impl Tally {
    fn new() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            warnings: 0,
            started: Instant::now(),
        }
    }

    /// One line, only mentioning what actually happened:
    /// `12 rows: 11 uploaded, 1 failed, 3 warnings (took 4.2s)`
    fn summary(&self) -> String {
        let mut line = format!(
            "{} rows: {} uploaded",
            self.total,
            style(self.succeeded).green()
        );
        if self.failed > 0 {
            line.push_str(&format!(", {} failed", style(self.failed).red()));
        }
        if self.warnings > 0 {
            line.push_str(&format!(", {} warnings", style(self.warnings).yellow()));
        }
        line.push_str(&format!(
            " (took {:.1}s)",
            self.started.elapsed().as_secs_f64()
        ));
        line
    }
}

/// Plain stderr lines, for piped or redirected output.
pub struct SimpleReporter {
    tally: RwLock<Tally>,
}

impl SimpleReporter {
    pub fn new() -> Self {
        Self {
            tally: RwLock::new(Tally::new()),
        }
    }
}

impl Default for SimpleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for SimpleReporter {
    fn set_phase(&self, phase: Phase) {
        eprintln!("{}", phase_message(&phase));
    }

    fn register_rows(&self, total: usize) {
        self.tally.write().unwrap().total = total;
        eprintln!("  {total} rows to process");
    }

    fn row_succeeded(&self, label: &str, warnings: &[String]) {
        let mut tally = self.tally.write().unwrap();
        tally.succeeded += 1;
        tally.warnings += warnings.len();
        drop(tally);
        for warning in warnings {
            eprintln!("  {label}: {warning}");
        }
    }

    fn row_failed(&self, label: &str, error: &str) {
        self.tally.write().unwrap().failed += 1;
        eprintln!("  {label} failed: {error}");
    }

    fn log_info(&self, message: &str) {
        eprintln!("{message}");
    }

    fn log_warn(&self, message: &str) {
        eprintln!("warning: {message}");
    }

    fn log_error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    fn finish(&self) {
        eprintln!("{}", self.tally.read().unwrap().summary());
    }
}

/// Interactive reporter with a progress bar (for TTY). Failures and
/// warnings print above the bar as the workers finish.
pub struct FancyReporter {
    multi: indicatif::MultiProgress,
    bar: RwLock<Option<indicatif::ProgressBar>>,
    tally: RwLock<Tally>,
}

impl FancyReporter {
    pub fn new() -> Self {
        Self {
            multi: indicatif::MultiProgress::new(),
            bar: RwLock::new(None),
            tally: RwLock::new(Tally::new()),
        }
    }

    fn tick(&self) {
        if let Some(bar) = self.bar.read().unwrap().as_ref() {
            bar.inc(1);
        }
    }

    fn println(&self, line: String) {
        self.multi.println(line).ok();
    }
}

impl Default for FancyReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for FancyReporter {
    fn set_phase(&self, phase: Phase) {
        self.println(phase_message(&phase));
    }

    fn register_rows(&self, total: usize) {
        self.tally.write().unwrap().total = total;
        let bar = self.multi.add(indicatif::ProgressBar::new(total as u64));
        bar.set_style(
            indicatif::ProgressStyle::with_template("  {pos}/{len} [{bar:32}] {elapsed}")
                .expect("static template is valid")
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        *self.bar.write().unwrap() = Some(bar);
    }

    fn row_succeeded(&self, label: &str, warnings: &[String]) {
        {
            let mut tally = self.tally.write().unwrap();
            tally.succeeded += 1;
            tally.warnings += warnings.len();
        }
        for warning in warnings {
            self.println(format!("  {} {label}: {warning}", style("warn").yellow()));
        }
        self.tick();
    }

    fn row_failed(&self, label: &str, error: &str) {
        self.tally.write().unwrap().failed += 1;
        self.println(format!("  {} {label}: {error}", style("fail").red()));
        self.tick();
    }

    fn log_info(&self, message: &str) {
        self.println(message.to_owned());
    }

    fn log_warn(&self, message: &str) {
        self.println(format!("{} {message}", style("warn").yellow()));
    }

    fn log_error(&self, message: &str) {
        self.println(format!("{} {message}", style("error").red()));
    }

    fn finish(&self) {
        if let Some(bar) = self.bar.write().unwrap().take() {
            bar.finish_and_clear();
        }
        eprintln!("{}", self.tally.read().unwrap().summary());
    }
}

/// Pick a display backend: the bar needs a terminal on stderr, anything
/// else gets plain lines.
pub fn create_reporter() -> Arc<dyn ProgressReporter> {
    let interactive = console::Term::stderr().is_term();
    if interactive {
        Arc::new(FancyReporter::new())
    } else {
        Arc::new(SimpleReporter::new())
    }
}
