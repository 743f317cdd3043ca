//! Run summary rendering.

use colored::Colorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::orchestrator::{RunReport, StepOutcome};

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "STEP")]
    step: String,
    #[tabled(rename = "RESULT")]
    result: String,
    #[tabled(rename = "DETAILS")]
    details: String,
}

fn colored_label(outcome: &StepOutcome) -> String {
    let label = outcome.label();
    match outcome {
        StepOutcome::Succeeded => label.green().to_string(),
        StepOutcome::Skipped(_) => label.dimmed().to_string(),
        StepOutcome::Tolerated(_) => label.yellow().to_string(),
        StepOutcome::Failed(_) => label.red().to_string(),
    }
}

/// Render the per-step table of a run.
pub fn render_report(report: &RunReport) -> String {
    let rows: Vec<StepRow> = report
        .steps
        .iter()
        .map(|record| StepRow {
            step: record.name.to_string(),
            result: colored_label(&record.outcome),
            details: record.outcome.detail().to_string(),
        })
        .collect();

    let mut table = Table::new(rows);
    apply_table_style(&mut table);
    table.to_string()
}

/// Print the per-step table and a one-line verdict.
pub fn print_report(report: &RunReport, dry_run: bool) {
    println!();
    let title = if dry_run {
        "Post-upgrade tasks (dry run):"
    } else {
        "Post-upgrade tasks:"
    };
    println!("{}", title.bold());
    println!("{}", render_report(report));
    println!();

    let failed = report.count("Failed");
    if report.errors.is_empty() {
        println!(
            "  {} All {} steps completed",
            "✓".green(),
            report.steps.len()
        );
    } else {
        println!(
            "  {} {} of {} steps failed",
            "✗".red(),
            failed.to_string().red(),
            report.steps.len()
        );
        for message in report.errors.messages() {
            println!("    - {}", message);
        }
    }
}

/// kubectl-style formatting: no borders, no separators, 2-space column gap.
fn apply_table_style(table: &mut Table) {
    use tabled::settings::object::Columns;
    use tabled::settings::themes::Theme;
    use tabled::settings::{Modify, Padding};

    let mut theme = Theme::from_style(Style::empty());
    theme.remove_horizontal_lines();
    table.with(theme);
    table.with(Modify::new(Columns::new(..)).with(Padding::new(0, 2, 0, 0)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::StepRecord;

    fn sample_report() -> RunReport {
        let mut report = RunReport::default();
        report.steps.push(StepRecord {
            name: "upload-config",
            outcome: StepOutcome::Succeeded,
        });
        report.steps.push(StepRecord {
            name: "dns-migration",
            outcome: StepOutcome::Skipped("dry run".to_string()),
        });
        report.steps.push(StepRecord {
            name: "proxy-addon",
            outcome: StepOutcome::Failed("error ensuring the proxy addon: boom".to_string()),
        });
        report
    }

    #[test]
    fn test_render_report_lists_every_step() {
        colored::control::set_override(false);
        let rendered = render_report(&sample_report());

        assert!(rendered.contains("STEP"));
        assert!(rendered.contains("upload-config"));
        assert!(rendered.contains("Skipped"));
        assert!(rendered.contains("dry run"));
        assert!(rendered.contains("error ensuring the proxy addon: boom"));
        assert_eq!(rendered.lines().count(), 4);
    }

    #[test]
    fn test_report_counts() {
        let report = sample_report();
        assert_eq!(report.count("Failed"), 1);
        assert_eq!(report.count("Succeeded"), 1);
    }
}
