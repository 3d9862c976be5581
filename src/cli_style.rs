/*!
 * Pulsar CLI Style System
 *
 * Styling utilities for terminal output: themed text, status messages and
 * the job summary table.
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use console::{style, StyledObject};
use pulsar_core_convergence::Classification;

use crate::orchestrator::{JobReport, JobState};

// ============================================================================
// THEME COLORS
// ============================================================================

/// Brand colors for consistent styling
pub struct Theme;

impl Theme {
    /// Primary accent color (cyan/blue)
    pub fn primary<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan()
    }

    /// Success color (green)
    pub fn success<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).green()
    }

    /// Warning color (yellow)
    pub fn warning<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).yellow()
    }

    /// Error color (red)
    pub fn error<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).red()
    }

    /// Muted/secondary text (dim)
    pub fn muted<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).dim()
    }

    /// Header style (bold cyan)
    pub fn header<D: std::fmt::Display>(text: D) -> StyledObject<D> {
        style(text).cyan().bold()
    }
}

// ============================================================================
// ICONS
// ============================================================================

/// Unicode icons for visual feedback
pub struct Icons;

impl Icons {
    pub const SUCCESS: &'static str = "✓";
    pub const ERROR: &'static str = "✗";
    pub const WARNING: &'static str = "⚠";
    pub const INFO: &'static str = "ℹ";
    pub const RUNNING: &'static str = "◐";
    pub const ARROW_RIGHT: &'static str = "→";
    pub const ATOM: &'static str = "⚛";
}

// ============================================================================
// SECTIONS AND TABLES
// ============================================================================

/// Draw a section header with a line
pub fn section_header(title: &str) {
    let line_len = 50 - title.len().min(40);
    println!(
        "\n{} {}",
        Theme::header(title),
        Theme::muted("─".repeat(line_len))
    );
}

/// Create a styled data table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Table color for a verdict
fn classification_color(classification: Classification) -> Color {
    match classification {
        Classification::Critical => Color::Green,
        Classification::SubCritical => Color::Blue,
        Classification::SuperCritical => Color::Red,
    }
}

/// Summary of a finished job
pub fn job_summary_table(report: &JobReport) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        Cell::new(format!("{} Job Summary", Icons::ATOM))
            .fg(Color::Cyan)
            .add_attribute(Attribute::Bold),
        Cell::new(""),
    ]);

    table.add_row(vec![Cell::new("Job"), Cell::new(report.id.to_string())]);
    table.add_row(vec![Cell::new("Target"), Cell::new(&report.target)]);
    table.add_row(vec![
        Cell::new("Duration"),
        Cell::new(format_duration(report.elapsed().as_secs_f64())),
    ]);

    let state_cell = match report.state() {
        JobState::Done => Cell::new(format!("{} done", Icons::SUCCESS)).fg(Color::Green),
        state => Cell::new(format!("{} {}", Icons::ERROR, state)).fg(Color::Red),
    };
    table.add_row(vec![Cell::new("State"), state_cell]);

    match &report.result {
        Ok(outcome) => {
            table.add_row(vec![
                Cell::new("Iterations"),
                Cell::new(outcome.record.len().to_string()),
            ]);
            table.add_row(vec![
                Cell::new("Final k_eff"),
                Cell::new(format!("{:.6}", outcome.final_k)).add_attribute(Attribute::Bold),
            ]);
            table.add_row(vec![
                Cell::new("Verdict"),
                Cell::new(outcome.classification.to_string())
                    .fg(classification_color(outcome.classification))
                    .add_attribute(Attribute::Bold),
            ]);
            for artifact in &outcome.artifacts {
                table.add_row(vec![
                    Cell::new("Artifact"),
                    Cell::new(artifact.display().to_string()).fg(Color::DarkGrey),
                ]);
            }
        }
        Err(failure) => {
            table.add_row(vec![
                Cell::new("Failed while"),
                Cell::new(failure.step.to_string()).fg(Color::Yellow),
            ]);
            table.add_row(vec![
                Cell::new("Reason"),
                Cell::new(failure.error.to_string()).fg(Color::Red),
            ]);
        }
    }

    table
}

/// One-line verdict for a classification
pub fn verdict_line(classification: Classification, k: f64) -> String {
    let label = match classification {
        Classification::Critical => Theme::success(classification.to_string()),
        Classification::SubCritical => Theme::primary(classification.to_string()),
        Classification::SuperCritical => Theme::error(classification.to_string()),
    };
    format!("{} {} (k_eff = {:.6})", Icons::ATOM, label, k)
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Format duration into human-readable string
pub fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining = secs % 60.0;
        format!("{}m {:.0}s", mins, remaining)
    } else {
        let hours = (secs / 3600.0).floor();
        let mins = ((secs % 3600.0) / 60.0).floor();
        format!("{}h {}m", hours, mins)
    }
}

/// Print a styled error message with optional suggestion
pub fn print_error(message: &str, suggestion: Option<&str>) {
    eprintln!(
        "\n{} {}",
        Theme::error(format!("{} Error:", Icons::ERROR)),
        message
    );

    if let Some(hint) = suggestion {
        eprintln!(
            "  {} {}",
            Theme::muted(Icons::ARROW_RIGHT),
            Theme::muted(hint)
        );
    }
    eprintln!();
}

/// Print a styled warning message
pub fn print_warning(message: &str) {
    eprintln!(
        "{} {}",
        Theme::warning(Icons::WARNING.to_string()),
        Theme::warning(message)
    );
}

/// Print a styled success message
pub fn print_success(message: &str) {
    println!(
        "{} {}",
        Theme::success(Icons::SUCCESS.to_string()),
        Theme::success(message)
    );
}

/// Print a styled info message
pub fn print_info(message: &str) {
    println!("{} {}", Theme::primary(Icons::INFO.to_string()), message);
}
