use crate::state::LaunchStep;
use crate::ui::icons::{CHECK, CLOCK, CROSS, LINK, RESUME, ROCKET, RUNNING, SKIP, WARN};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Terminal UI for one launch, rendered as a single `indicatif` step bar.
///
/// Step lines are printed above the bar so they stay in the scrollback once the
/// bar is cleared.
pub struct LaunchUI {
    bar: ProgressBar,
    verbose: bool,
}

impl LaunchUI {
    /// Create the bar sized to the number of planned steps.
    pub fn new(total_steps: u64, verbose: bool) -> Self {
        let bar_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {spinner} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let bar = ProgressBar::new(total_steps);
        bar.set_style(bar_style);
        bar.set_prefix("Launch");

        Self { bar, verbose }
    }

    /// Hidden UI, for `--json` output and tests.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            verbose: false,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.bar.is_hidden() {
            return;
        }
        self.bar.println(msg.as_ref());
    }

    pub fn banner(&self, shop_id: &str, launch_id: &str, mode: &str, resume_count: u32) {
        self.print_line(format!(
            "{}Launch shop {} ({} mode)",
            ROCKET,
            style(shop_id).bold(),
            style(mode).cyan()
        ));
        self.print_line(format!("   {} {}", style("Launch ID:").dim(), launch_id));
        if resume_count > 0 {
            self.print_line(format!(
                "   {}Resuming (attempt {})",
                RESUME,
                style(resume_count).yellow()
            ));
        }
    }

    pub fn start_step(&self, step: LaunchStep) {
        self.bar.set_message(format!("{}", style(step.as_str()).yellow()));
        self.bar.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!("  {}{}", RUNNING, style(step.as_str()).dim()));
        }
    }

    pub fn step_succeeded(&self, step: LaunchStep, duration_ms: u64) {
        self.bar.inc(1);
        self.print_line(format!(
            "  {}{} {}",
            CHECK,
            step,
            style(format!("({})", format_ms(duration_ms))).dim()
        ));
    }

    pub fn step_skipped(&self, step: LaunchStep, reason: &str) {
        self.bar.inc(1);
        self.print_line(format!("  {}{} {}", SKIP, step, style(format!("({})", reason)).dim()));
    }

    pub fn step_failed(&self, step: LaunchStep, error: &str) {
        self.print_line(format!("  {}{} {}", CROSS, style(step).red().bold(), error));
    }

    /// A post-deploy step that failed without halting the launch.
    pub fn step_degraded(&self, step: LaunchStep, error: &str) {
        self.bar.inc(1);
        self.print_line(format!("  {}{} {}", WARN, style(step).yellow(), error));
    }

    pub fn warning(&self, msg: &str) {
        self.print_line(format!("    {}{}", WARN, style(msg).yellow()));
    }

    pub fn message(&self, msg: &str) {
        self.print_line(format!("    {}", msg));
    }

    /// Print multi-line text (gate report, plan) as-is.
    pub fn block(&self, text: &str) {
        for line in text.lines() {
            self.print_line(line);
        }
    }

    pub fn finish(&self, success: bool, deploy_url: Option<&str>, elapsed_ms: u64) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
        if success {
            self.print_line_direct(format!(
                "{}Launch complete {}",
                CHECK,
                style(format!("{}{}", CLOCK, format_ms(elapsed_ms))).dim()
            ));
            if let Some(url) = deploy_url {
                self.print_line_direct(format!("   {}{}", LINK, style(url).cyan().underlined()));
            }
        } else {
            self.print_line_direct(format!("{}Launch failed", CROSS));
        }
    }

    fn print_line_direct(&self, msg: String) {
        if !self.bar.is_hidden() {
            eprintln!("{}", msg);
        }
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}s", secs)
    } else {
        format!("{}ms", ms)
    }
}
