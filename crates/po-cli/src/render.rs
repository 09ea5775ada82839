//! Plain-text rendering of deployment API results.

use std::fmt::Write as _;

use po_core::models::{
    ActionResult, CleanupReport, ContainerStats, ContainerSummary, DeployOutcome,
    DeploymentListing, Project, StatusReport,
};
use po_core::services::stack_registry::STACKS;

/// `1h 02m`, `3m 05s` or `42s`.
pub fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| format!("{v:.1}%"))
}

/// Render rows as left-aligned columns separated by two spaces.
fn table(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let header: Vec<String> = header.iter().map(|h| h.to_string()).collect();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            let _ = write!(line, "{cell:<width$}  ", width = widths[i]);
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

pub fn render_failure<T>(result: &ActionResult<T>) -> String {
    format!("error [{}]: {}", result.status_code, result.message)
}

pub fn render_outcome(message: &str, outcome: &DeployOutcome) -> String {
    let mut out = format!("{message}\n");
    let _ = writeln!(out, "  deployment: {}", outcome.deployment_id);
    let _ = writeln!(out, "  status:     {}", outcome.status);
    if let Some(port) = outcome.port {
        let _ = writeln!(out, "  port:       {port}");
    }
    if let Some(url) = &outcome.url {
        let _ = writeln!(out, "  url:        {url}");
    }
    out
}

pub fn render_status(report: &StatusReport) -> String {
    let ContainerStats {
        cpu_percent,
        memory_percent,
        uptime_secs,
    } = &report.stats;
    let mut out = format!(
        "deployment {}: {} ({})\n",
        report.deployment_id, report.status, report.health
    );
    if let Some(url) = &report.url {
        let _ = writeln!(out, "  url:     {url}");
    }
    let _ = writeln!(out, "  cpu:     {}", percent(*cpu_percent));
    let _ = writeln!(out, "  memory:  {}", percent(*memory_percent));
    let uptime = uptime_secs.map_or_else(|| "unknown".to_string(), format_uptime);
    let _ = writeln!(out, "  uptime:  {uptime}");
    if let Some(error) = &report.last_error {
        let _ = writeln!(out, "  error:   {}", error.lines().next().unwrap_or_default());
    }
    out
}

pub fn render_listing(listings: &[DeploymentListing]) -> String {
    if listings.is_empty() {
        return "no deployments\n".to_string();
    }
    let rows = listings
        .iter()
        .map(|l| {
            vec![
                l.id.to_string(),
                l.project_id.to_string(),
                l.name.clone(),
                l.status.to_string(),
                l.url.clone().unwrap_or_default(),
            ]
        })
        .collect();
    table(&["ID", "PROJECT", "NAME", "STATUS", "URL"], rows)
}

pub fn render_running(containers: &[ContainerSummary]) -> String {
    if containers.is_empty() {
        return "no running containers\n".to_string();
    }
    let rows = containers
        .iter()
        .map(|c| {
            let ports = c
                .host_ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",");
            vec![
                c.id.chars().take(12).collect(),
                c.name.clone(),
                c.image.clone(),
                ports,
            ]
        })
        .collect();
    table(&["CONTAINER", "NAME", "IMAGE", "PORTS"], rows)
}

pub fn render_projects(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "no projects\n".to_string();
    }
    let rows = projects
        .iter()
        .map(|p| {
            vec![
                p.id.to_string(),
                p.name.clone(),
                p.stack_label.clone(),
                p.files.len().to_string(),
            ]
        })
        .collect();
    table(&["ID", "NAME", "STACK", "FILES"], rows)
}

pub fn render_cleanup(report: &CleanupReport) -> String {
    let verb = if report.dry_run {
        "would remove"
    } else {
        "removed"
    };
    let mut out = format!(
        "{verb} {} container(s), {} image(s), {} file(s), {} record(s)\n",
        report.removed_containers,
        report.removed_images,
        report.removed_files,
        report.removed_records
    );
    for error in &report.errors {
        let _ = writeln!(out, "  failed: {error}");
    }
    out
}

pub fn render_stacks() -> String {
    let rows = STACKS
        .iter()
        .map(|s| {
            vec![
                s.aliases.first().copied().unwrap_or_default().to_string(),
                s.display_name.to_string(),
                s.container_port.to_string(),
                s.required_files.join(", "),
            ]
        })
        .collect();
    table(&["LABEL", "STACK", "PORT", "REQUIRED FILES"], rows)
}
