use std::fmt::Write;

use serde::Serialize;

use crate::classify::{classify, LicenseCategory};
use crate::model::{
    AlternativeTool, CommercialRestrictions, CompanyInfo, KbData, KbDetail, KnowledgeBaseEntry,
    LicenseInfo, Provenance, Report, ReportId, ScanTask, TaskStatus,
};
use crate::reconcile::{KbAction, KbDirective};
use crate::tracker::{TaskCounts, UNSPECIFIED_FAILURE};

/// Format styles supported by the renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Destination for what the poll loop wants shown.
///
/// `tasks` is called once per tick with the tracker snapshot; `report` once
/// per freshly fetched report.
pub trait RenderSink: Send + Sync {
    fn tasks(&self, tasks: &[ScanTask]);
    fn report(&self, report: &Report, directive: &KbDirective);
}

/// Render the task progress view.
pub fn render_tasks(tasks: &[ScanTask], format: OutputFormat) -> anyhow::Result<String> {
    let counts = TaskCounts::tally(tasks);
    match format {
        OutputFormat::Human => render_tasks_human(tasks, counts),
        OutputFormat::Json => Ok(serde_json::to_string(&JsonTasks { counts, tasks })?),
    }
}

fn render_tasks_human(tasks: &[ScanTask], counts: TaskCounts) -> anyhow::Result<String> {
    let mut out = String::new();
    writeln!(
        out,
        "Scan progress: {} completed, {} failed, {} pending",
        counts.completed, counts.failed, counts.pending
    )?;
    for task in tasks {
        let mut line = format!(
            "  {:<11} {}",
            format!("[{}]", task.status),
            sanitize(&task.tool_name)
        );
        match task.status {
            TaskStatus::Completed => {
                if let Some(report_id) = task.report_id {
                    write!(line, " (report #{report_id})")?;
                }
            }
            TaskStatus::Failed => {
                let reason = task.error.as_deref().unwrap_or(UNSPECIFIED_FAILURE);
                write!(line, ": {}", sanitize(reason))?;
            }
            TaskStatus::Pending => {
                if let Some(progress) = task.progress {
                    write!(line, " {:.0}%", progress * 100.0)?;
                }
                if let Some(step) = task.current_step.as_deref().filter(|s| !s.trim().is_empty()) {
                    write!(line, " {}", sanitize(step))?;
                }
            }
        }
        writeln!(out, "{line}")?;
    }
    Ok(out)
}

/// Render one compliance report together with its knowledge-base block.
///
/// JSON output is a single line so streamed reports stay line-delimited.
pub fn render_report(
    report: &Report,
    directive: &KbDirective,
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Human => render_report_human(report, directive),
        OutputFormat::Json => Ok(serde_json::to_string(&JsonReport {
            report_id: report.report_id(),
            tool_name: report.tool_name(),
            provenance: report.data_source.provenance(),
            license_category: classify(report.license_info.license_type.as_deref()),
            report,
            knowledge_base: directive,
        })?),
    }
}

/// Banner line printed above a streamed report.
pub fn report_heading(report: &Report) -> String {
    format!("== {} ==", sanitize(report.tool_name()))
}

fn render_report_human(report: &Report, directive: &KbDirective) -> anyhow::Result<String> {
    let mut out = String::new();
    match report.report_id() {
        Some(id) => writeln!(out, "Report #{id}: {}", sanitize(report.tool_name()))?,
        None => writeln!(out, "Report: {}", sanitize(report.tool_name()))?,
    }
    writeln!(
        out,
        "Data source: {}",
        report.data_source.provenance().label()
    )?;

    write_license(&mut out, &report.license_info)?;
    write_company(&mut out, &report.company_info)?;
    write_restrictions(&mut out, &report.commercial_restrictions)?;
    write_alternatives(&mut out, &report.alternative_tools)?;
    write_directive(&mut out, directive)?;
    Ok(out)
}

fn write_license(out: &mut String, license: &LicenseInfo) -> anyhow::Result<()> {
    let category = classify(license.license_type.as_deref());
    match license.license_type.as_deref() {
        Some(kind) if category != LicenseCategory::None => {
            writeln!(out, "License: {} [{category}]", sanitize(kind))?
        }
        _ => writeln!(out, "License: unknown")?,
    }
    optional_line(out, "  Version", license.license_version.as_deref())?;
    optional_line(out, "  Mode", license.license_mode.as_deref())?;
    Ok(())
}

fn write_company(out: &mut String, company: &CompanyInfo) -> anyhow::Result<()> {
    writeln!(
        out,
        "Company: {}",
        company
            .company_name
            .as_deref()
            .map(sanitize)
            .unwrap_or_else(|| "unknown".into())
    )?;
    optional_line(out, "  Country", company.company_country.as_deref())?;
    optional_line(out, "  Headquarters", company.company_headquarters.as_deref())?;
    if let Some(flag) = company.china_office {
        writeln!(out, "  China office: {}", yes_no(flag))?;
    }
    Ok(())
}

fn write_restrictions(out: &mut String, terms: &CommercialRestrictions) -> anyhow::Result<()> {
    writeln!(out, "Commercial use:")?;
    if let Some(flag) = terms.commercial_license_required {
        writeln!(out, "  License required: {}", yes_no(flag))?;
    }
    if let Some(flag) = terms.free_for_commercial {
        writeln!(out, "  Free for commercial use: {}", yes_no(flag))?;
    }
    optional_line(out, "  Restrictions", terms.restrictions.as_deref())?;
    optional_line(out, "  User limit", terms.user_limit.as_deref())?;
    optional_line(out, "  Feature restrictions", terms.feature_restrictions.as_deref())?;
    Ok(())
}

fn write_alternatives(out: &mut String, alternatives: &[AlternativeTool]) -> anyhow::Result<()> {
    if alternatives.is_empty() {
        return Ok(());
    }
    writeln!(out, "Alternatives:")?;
    for alternative in alternatives {
        let name = alternative.name.as_deref().unwrap_or("unnamed");
        let mut line = format!("  - {}", sanitize(name));
        let tags: Vec<String> = [alternative.kind.as_deref(), alternative.license.as_deref()]
            .into_iter()
            .flatten()
            .filter(|tag| !tag.trim().is_empty())
            .map(sanitize)
            .collect();
        if !tags.is_empty() {
            write!(line, " ({})", tags.join(", "))?;
        }
        if let Some(use_case) = alternative.use_case.as_deref() {
            write!(line, ": {}", sanitize(use_case))?;
        }
        writeln!(out, "{line}")?;
    }
    Ok(())
}

fn write_directive(out: &mut String, directive: &KbDirective) -> anyhow::Result<()> {
    match directive {
        KbDirective::None => {}
        KbDirective::PendingCreation { actions } => {
            writeln!(out, "Knowledge base: no entry for this tool yet")?;
            write_actions(out, actions)?;
        }
        KbDirective::Diff {
            summary,
            changes,
            total_changes,
            truncated,
            actions,
        } => {
            writeln!(out, "Knowledge base: {}", sanitize(summary))?;
            if changes.is_empty() {
                writeln!(out, "  No significant differences from the stored entry")?;
            }
            for change in changes {
                writeln!(
                    out,
                    "  - {}: {} -> {}",
                    sanitize(&change.label),
                    sanitize(&change.old),
                    sanitize(&change.new)
                )?;
            }
            if *truncated {
                writeln!(out, "  ... and {} more", total_changes - changes.len())?;
            }
            write_actions(out, actions)?;
        }
    }
    Ok(())
}

fn write_actions(out: &mut String, actions: &[KbAction]) -> anyhow::Result<()> {
    if actions.is_empty() {
        return Ok(());
    }
    let labels: Vec<String> = actions
        .iter()
        .map(|action| format!("[{}] {}", action.kind, action.kind.prompt()))
        .collect();
    writeln!(out, "Actions: {}", labels.join("  "))?;
    Ok(())
}

/// Render the knowledge-base listing, marking the selected entry.
pub fn render_kb_list(
    entries: &[&KnowledgeBaseEntry],
    selected: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => {
            let rows: Vec<JsonKbRow<'_>> = entries
                .iter()
                .map(|entry| JsonKbRow {
                    tool_name: &entry.tool_name,
                    license_category: classify(entry.data.license_type.as_deref()),
                    data: &entry.data,
                })
                .collect();
            Ok(serde_json::to_string_pretty(&JsonKbList {
                total: rows.len(),
                selected,
                entries: rows,
            })?)
        }
        OutputFormat::Human => {
            let mut out = String::new();
            if entries.is_empty() {
                writeln!(out, "No knowledge-base entries match.")?;
                return Ok(out);
            }
            writeln!(out, "{} entries", entries.len())?;
            for entry in entries {
                let marker = if selected == Some(entry.tool_name.as_str()) {
                    '>'
                } else {
                    ' '
                };
                let license = entry.data.license_type.as_deref();
                let mut line = format!(
                    "{marker} {:<28} {}",
                    sanitize(&entry.tool_name),
                    classify(license)
                );
                if let Some(license) = license {
                    write!(line, " ({})", sanitize(license))?;
                }
                if let Some(updated_at) = entry.data.updated_at.as_deref() {
                    write!(line, " updated {}", sanitize(updated_at))?;
                }
                writeln!(out, "{line}")?;
            }
            Ok(out)
        }
    }
}

/// Render the display-oriented detail view of one knowledge-base entry.
pub fn render_kb_detail(detail: &KbDetail, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string_pretty(detail)?);
    }
    let mut out = String::new();
    writeln!(out, "{}", sanitize(&detail.tool_name))?;
    write_license(&mut out, &detail.license_info)?;
    write_company(&mut out, &detail.company_info)?;
    write_restrictions(&mut out, &detail.commercial_restrictions)?;
    write_alternatives(&mut out, &detail.alternative_tools)?;
    optional_line(&mut out, "Source", detail.source.as_deref())?;
    optional_line(&mut out, "Updated at", detail.updated_at.as_deref())?;
    optional_line(&mut out, "Updated by", detail.updated_by.as_deref())?;
    Ok(out)
}

/// Render a knowledge-base entry's raw data, including unmodelled fields.
pub fn render_kb_entry(entry: &KnowledgeBaseEntry) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(entry)?)
}

fn optional_line(out: &mut String, label: &str, value: Option<&str>) -> anyhow::Result<()> {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        writeln!(out, "{label}: {}", sanitize(value))?;
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Replace control characters so backend text cannot move the cursor or
/// inject escape sequences into the terminal.
pub fn sanitize(input: &str) -> String {
    input
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

#[derive(Serialize)]
struct JsonTasks<'a> {
    counts: TaskCounts,
    tasks: &'a [ScanTask],
}

#[derive(Serialize)]
struct JsonReport<'a> {
    report_id: Option<ReportId>,
    tool_name: &'a str,
    provenance: Provenance,
    license_category: LicenseCategory,
    report: &'a Report,
    knowledge_base: &'a KbDirective,
}

#[derive(Serialize)]
struct JsonKbList<'a> {
    total: usize,
    selected: Option<&'a str>,
    entries: Vec<JsonKbRow<'a>>,
}

#[derive(Serialize)]
struct JsonKbRow<'a> {
    tool_name: &'a str,
    license_category: LicenseCategory,
    data: &'a KbData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolId;
    use crate::reconcile::present;
    use serde_json::json;

    fn sample_tasks() -> Vec<ScanTask> {
        let mut done = ScanTask::pending(ToolId(1), "ToolA");
        done.status = TaskStatus::Completed;
        done.report_id = Some(ReportId(10));
        let mut failed = ScanTask::pending(ToolId(2), "ToolB");
        failed.status = TaskStatus::Failed;
        failed.error = Some("upstream\ntimeout".into());
        let mut running = ScanTask::pending(ToolId(3), "ToolC");
        running.progress = Some(0.4);
        running.current_step = Some("fetching terms".into());
        vec![done, failed, running]
    }

    fn sample_report() -> Report {
        serde_json::from_value(json!({
            "tool": {"id": 1, "name": "Postman"},
            "data_source": {"ai_analysis": true, "knowledge_base": true},
            "license_info": {"license_type": "Proprietary", "license_mode": "subscription"},
            "company_info": {"company_name": "Postman Inc.", "china_office": false},
            "commercial_restrictions": {"commercial_license_required": true, "user_limit": "3 users"},
            "alternative_tools": [{"name": "Insomnia", "type": "open source", "license": "MIT", "use_case": "API testing"}],
            "compliance_report": {"id": 12},
            "knowledge_base_update": {
                "available": true,
                "action": "diff_available",
                "has_changes": true,
                "change_count": 6,
                "changes": [
                    {"field": "user_limit", "field_label": "User limit", "old_value": "5 users", "new_value": "3 users"}
                ]
            }
        }))
        .unwrap()
    }

    #[test]
    fn task_view_snapshot() {
        let output = render_tasks(&sample_tasks(), OutputFormat::Human).unwrap();
        insta::assert_snapshot!(output, @r###"
        Scan progress: 1 completed, 1 failed, 1 pending
          [completed] ToolA (report #10)
          [failed]    ToolB: upstream timeout
          [pending]   ToolC 40% fetching terms
        "###);
    }

    #[test]
    fn task_view_json_carries_counts() {
        let output = render_tasks(&sample_tasks(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["counts"]["completed"], json!(1));
        assert_eq!(value["tasks"][0]["report_id"], json!(10));
        assert_eq!(value["tasks"][1]["status"], json!("failed"));
    }

    #[test]
    fn human_report_lists_sections_and_actions() {
        let report = sample_report();
        let directive = present(&report);
        let output = render_report(&report, &directive, OutputFormat::Human).unwrap();
        assert!(output.starts_with("Report #12: Postman\n"));
        assert!(output.contains("Data source: mixed (AI analysis + knowledge base)"));
        assert!(output.contains("License: Proprietary [commercial]"));
        assert!(output.contains("  China office: no"));
        assert!(output.contains("  - Insomnia (open source, MIT): API testing"));
        assert!(output.contains("  - User limit: 5 users -> 3 users"));
        assert!(output.contains("  ... and 5 more"));
        assert!(output.contains("[update] Update knowledge base"));
    }

    #[test]
    fn json_report_embeds_directive() {
        let report = sample_report();
        let directive = present(&report);
        let output = render_report(&report, &directive, OutputFormat::Json).unwrap();
        assert_eq!(output.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["report_id"], json!(12));
        assert_eq!(value["license_category"], json!("commercial"));
        assert_eq!(value["provenance"], json!("mixed"));
        assert_eq!(value["knowledge_base"]["state"], json!("diff"));
        assert_eq!(value["knowledge_base"]["total_changes"], json!(6));
    }

    #[test]
    fn kb_list_marks_selection() {
        let entries = vec![
            KnowledgeBaseEntry {
                tool_name: "Jira".into(),
                data: serde_json::from_value(json!({"license_type": "Commercial"})).unwrap(),
            },
            KnowledgeBaseEntry {
                tool_name: "VS Code".into(),
                data: serde_json::from_value(json!({"license_type": "MIT"})).unwrap(),
            },
        ];
        let refs: Vec<_> = entries.iter().collect();
        let output = render_kb_list(&refs, Some("VS Code"), OutputFormat::Human).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "2 entries");
        assert!(lines[1].starts_with("  Jira"));
        assert!(lines[1].contains("commercial (Commercial)"));
        assert!(lines[2].starts_with("> VS Code"));
        assert!(lines[2].contains("open (MIT)"));

        let empty = render_kb_list(&[], None, OutputFormat::Human).unwrap();
        assert_eq!(empty, "No knowledge-base entries match.\n");
    }

    #[test]
    fn unchanged_diff_says_so() {
        let mut report = sample_report();
        report.knowledge_base_update = serde_json::from_value(json!({
            "available": true,
            "action": "diff_available",
            "has_changes": false,
            "changes": []
        }))
        .unwrap();
        let directive = present(&report);
        let output = render_report(&report, &directive, OutputFormat::Human).unwrap();
        assert!(output.contains("Knowledge base: 0 difference(s) found\n"));
        assert!(output.contains("  No significant differences from the stored entry\n"));
        assert!(!output.contains("[update]"));
    }

    #[test]
    fn heading_escapes_tool_name() {
        let report: Report =
            serde_json::from_value(json!({"tool": {"name": "x\u{1b}[2J"}})).unwrap();
        assert_eq!(report_heading(&report), "== x [2J ==");
    }

    #[test]
    fn sanitize_strips_control_characters() {
        assert_eq!(sanitize("a\u{1b}[31mb\r\nc"), "a [31mb  c");
    }
}
