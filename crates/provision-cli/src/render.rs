use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use provision_core::Status;
use provision_engine::ProgressMonitor;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn output_style(force_plain: bool) -> OutputStyle {
    if force_plain || !std::io::stdout().is_terminal() {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TerminalRenderer {
    style: OutputStyle,
}

/// Progress monitor backed by an `indicatif` bar in rich mode and silent in
/// plain mode.
pub(crate) struct TerminalProgress {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalRenderer {
    pub(crate) fn from_style(style: OutputStyle) -> Self {
        Self { style }
    }

    pub(crate) fn print_status(self, badge: &str, message: &str) {
        println!("{}", render_status_line(self.style, badge, message));
    }

    pub(crate) fn print_lines(self, lines: &[String]) {
        for line in lines {
            println!("{line}");
        }
    }

    pub(crate) fn status_lines(self, status: &Status) -> Vec<String> {
        let mut lines = Vec::new();
        render_status_tree(self.style, status, 0, &mut lines);
        if lines.is_empty() {
            lines.push(render_status_line(
                self.style,
                status.severity().as_str(),
                "completed",
            ));
        }
        lines
    }

    pub(crate) fn start_progress(self, label: &str) -> TerminalProgress {
        let progress_bar = if self.style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new(1);
            if let Ok(style) = ProgressStyle::with_template(
                "{spinner:.cyan.bold} {msg:<24} [{bar:20.cyan/blue}] {percent:>3}% {elapsed_precise}",
            ) {
                progress_bar.set_style(style.progress_chars("=>-"));
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
            progress_bar,
            started_at: Instant::now(),
        }
    }
}

impl TerminalProgress {
    /// Clears the bar and returns the summary line to print, if any.
    pub(crate) fn finish(mut self) -> Option<String> {
        let progress_bar = self.progress_bar.take()?;
        let position = progress_bar.position();
        let length = progress_bar.length().unwrap_or(position);
        progress_bar.finish_and_clear();
        render_progress_line(
            self.style,
            &self.label,
            position,
            length,
            Some(self.started_at.elapsed()),
        )
    }
}

impl ProgressMonitor for TerminalProgress {
    fn begin(&self, _task: &str, total_work: u64) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_length(total_work.max(1));
            progress_bar.set_position(0);
        }
    }

    fn worked(&self, work: u64) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.inc(work);
        }
    }

    fn set_message(&self, message: &str) {
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(message.to_string());
        }
    }
}

pub(crate) fn render_status_line(style: OutputStyle, badge: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => format!("{badge}: {message}"),
        OutputStyle::Rich => format!(
            "{} {message}",
            colorize(badge_style(badge), &format!("[{}]", badge.to_ascii_uppercase()))
        ),
    }
}

/// One line per status node, indented by depth. Unlabelled containers are
/// folded into their parent.
pub(crate) fn render_status_tree(
    style: OutputStyle,
    status: &Status,
    depth: usize,
    lines: &mut Vec<String>,
) {
    let labelled = !status.source().is_empty() || !status.message().is_empty();
    if labelled {
        let text = match (status.source(), status.message()) {
            ("", message) => message.to_string(),
            (source, "") => source.to_string(),
            (source, message) => format!("{source}: {message}"),
        };
        lines.push(format!(
            "{}{}",
            "  ".repeat(depth),
            render_status_line(style, status.severity().as_str(), &text)
        ));
    }
    let child_depth = if labelled { depth + 1 } else { depth };
    for child in status.children() {
        render_status_tree(style, child, child_depth, lines);
    }
}

fn badge_style(badge: &str) -> Style {
    let color = match badge {
        "ok" => AnsiColor::BrightGreen,
        "info" => AnsiColor::BrightBlue,
        "warning" => AnsiColor::BrightYellow,
        _ => AnsiColor::BrightRed,
    };
    Style::new()
        .fg_color(Some(color.into()))
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

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

pub(crate) fn render_progress_line(
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
