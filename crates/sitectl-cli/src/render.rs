use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use sitectl_core::{ActionPlan, Warning};
use sitectl_installer::{BatchReport, RunMetadata};
use sitectl_upgrade::{AddonUpgradeReport, Preflight, RunReport, UpgradePhase};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum UiMode {
    Plain,
    Interactive,
}

pub(crate) fn current_output_style() -> OutputStyle {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty());
    if no_color || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
    mode: UiMode,
}

pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self {
            style,
            mode: ui_mode_from_style(style),
        }
    }

    pub(crate) fn current() -> Self {
        Self::from_style(current_output_style())
    }

    pub(crate) fn style(self) -> OutputStyle {
        self.style
    }

    pub(crate) fn print_status(self, status: &str, message: &str) {
        println!("{}", render_status_line(self.style, status, message));
    }

    pub(crate) fn print_section(self, title: &str) {
        if let Some(line) = render_section_header(self.mode, title) {
            println!();
            let rendered = match self.style {
                OutputStyle::Plain => line,
                OutputStyle::Rich => colorize(section_style(), &line),
            };
            println!("{rendered}");
        }
    }

    pub(crate) fn start_progress(self, label: &str, total: u64) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(total.max(1));
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<12} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
            ) {
                progress_bar.set_style(
                    style
                        .tick_chars(progress_tick_chars(label))
                        .progress_chars("=>-"),
                );
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        TerminalProgress {
            style: self.style,
            label: label.to_string(),
            total,
            current: 0,
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }
}

impl TerminalProgress {
    pub(crate) fn set(&mut self, current: u64) {
        self.current = current.min(self.total);

        let Some(progress_bar) = &self.progress_bar else {
            return;
        };

        let safe_total = self.total.max(1);
        progress_bar.set_length(safe_total);
        progress_bar.set_position(self.current.min(safe_total));
    }

    /// Prints above the bar so it is not overwritten.
    pub(crate) fn println(&self, line: &str) {
        match &self.progress_bar {
            Some(progress_bar) => progress_bar.println(line),
            None => println!("{line}"),
        }
    }

    pub(crate) fn finish_success(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };

        progress_bar.finish_and_clear();
        if let Some(line) = render_progress_line(
            self.style,
            &self.label,
            self.current,
            self.total,
            Some(self.started_at.elapsed()),
        ) {
            println!("{line}");
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn progress_tick_chars(label: &str) -> &'static str {
    match label {
        "add" => ".oO@* ",
        "upgrade" => "-=~* ",
        "update" => "<^>v ",
        "remove" => "\\|/- ",
        _ => "|/-\\ ",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn ui_mode_from_style(style: OutputStyle) -> UiMode {
    match style {
        OutputStyle::Plain => UiMode::Plain,
        OutputStyle::Rich => UiMode::Interactive,
    }
}

fn render_section_header(mode: UiMode, title: &str) -> Option<String> {
    match mode {
        UiMode::Plain => None,
        UiMode::Interactive => Some(format!("== {title} ==")),
    }
}

fn render_progress_line(
    style: OutputStyle,
    label: &str,
    current: u64,
    total: u64,
    elapsed: Option<Duration>,
) -> Option<String> {
    if style == OutputStyle::Plain {
        return None;
    }

    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    let percent = (bounded_current * 100) / safe_total;
    let counts = format!("{}/{}", HumanCount(current), HumanCount(total));
    let suffix = elapsed
        .map(|value| format!(" complete in {}", format_elapsed(value)))
        .unwrap_or_default();

    Some(format!(
        "{} [{}] {:>3}% {}{}",
        colorize(progress_label_style(), label),
        colorize(progress_bar_style(), &bar),
        percent,
        counts,
        suffix
    ))
}

pub(crate) fn format_plan_lines(plan: &ActionPlan) -> Vec<String> {
    if plan.is_empty() {
        return vec!["nothing to do".to_string()];
    }
    plan.ordered()
        .into_iter()
        .map(|request| format!("{} {}", request.action, request.full_name))
        .collect()
}

pub(crate) fn format_warning_lines(style: OutputStyle, warnings: &[Warning]) -> Vec<String> {
    warnings
        .iter()
        .map(|warning| {
            render_status_line(
                style,
                "warn",
                &format!("{}: {}", warning.kind.as_str(), warning.message),
            )
        })
        .collect()
}

pub(crate) fn format_batch_summary(report: &BatchReport) -> String {
    format!(
        "added={} removed={} updated={} failed={}",
        report.added, report.removed, report.updated, report.failed
    )
}

pub(crate) fn format_run_report_lines(
    operation: &str,
    report: &RunReport,
    style: OutputStyle,
) -> Vec<String> {
    let ctx = &report.context;
    let mut lines = Vec::new();
    let target = format!(
        "{} {} -> {} {}",
        ctx.old_repository, ctx.old_branch, ctx.new_repository, ctx.new_branch
    );
    match &report.failure {
        None => lines.push(render_status_line(
            style,
            "ok",
            &format!("{operation} completed: {target}"),
        )),
        Some(failure) if failure.is_cancellation() => lines.push(render_status_line(
            style,
            "warn",
            &format!("{operation} {failure}"),
        )),
        Some(failure) => lines.push(render_status_line(
            style,
            "fail",
            &format!("{operation} failed in phase {}: {failure}", previous_phase(report)),
        )),
    }

    let phases = ctx
        .phases
        .iter()
        .map(|phase| phase.as_str())
        .collect::<Vec<_>>();
    if !phases.is_empty() {
        lines.push(format!("phases: {}", phases.join(" > ")));
    }
    if report.actions.total() > 0 {
        lines.push(format!("addons: {}", format_batch_summary(&report.actions)));
    }
    if !report.held_back.is_empty() {
        lines.push(format!("held back: {}", report.held_back.join(", ")));
    }
    lines.extend(format_warning_lines(style, &ctx.warnings));
    if let Some(run_id) = &report.run_id {
        lines.push(format!("run: {run_id}"));
    }
    lines
}

/// The last working phase a failed run reached.
fn previous_phase(report: &RunReport) -> &'static str {
    report
        .context
        .phases
        .iter()
        .rev()
        .find(|phase| !matches!(phase, UpgradePhase::Failed | UpgradePhase::Unblocked))
        .map(|phase| phase.as_str())
        .unwrap_or("idle")
}

pub(crate) fn format_preflight_lines(preflight: &Preflight, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    if preflight.unavailable.is_empty() && preflight.unknown_on_disk.is_empty() {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("every installed addon is available for branch {}", preflight.branch),
        ));
    }
    for full_name in &preflight.unavailable {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("{full_name} has no release for branch {}", preflight.branch),
        ));
    }
    for full_name in &preflight.unknown_on_disk {
        lines.push(render_status_line(
            style,
            "warn",
            &format!("{full_name} is on disk but unknown to the catalog"),
        ));
    }
    lines.extend(format_warning_lines(style, &preflight.warnings));
    lines
}

pub(crate) fn format_addon_upgrade_lines(
    report: &AddonUpgradeReport,
    style: OutputStyle,
) -> Vec<String> {
    let status = if report.actions.failed == 0 { "ok" } else { "warn" };
    let mut lines = vec![render_status_line(
        style,
        status,
        &format!(
            "addons upgraded for branch {}: {}",
            report.branch,
            format_batch_summary(&report.actions)
        ),
    )];
    lines.extend(format_warning_lines(style, &report.warnings));
    lines
}

pub(crate) fn format_run_list_lines(runs: &[RunMetadata]) -> Vec<String> {
    if runs.is_empty() {
        return vec!["no recorded runs".to_string()];
    }
    runs.iter()
        .map(|run| {
            let branches = match (&run.from_branch, &run.to_branch) {
                (Some(from), Some(to)) if from != to => format!(" {from} -> {to}"),
                (Some(from), _) => format!(" {from}"),
                (None, Some(to)) => format!(" -> {to}"),
                (None, None) => String::new(),
            };
            format!(
                "{} {} {}{}",
                run.run_id, run.operation, run.status, branches
            )
        })
        .collect()
}
