//! Terminal renderer: prints each diff as text lines or one JSON object.

use std::io::Write;

use scrub_core::{CategoryCode, Diff, EventRecord, Projection, RenderedEvent, Renderer, Style};
use serde_json::json;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Human-readable label for a category.
pub fn category_label(category: CategoryCode) -> &'static str {
    match category {
        CategoryCode::VerbalCooperation => "Verbal Cooperation",
        CategoryCode::MaterialCooperation => "Material Cooperation",
        CategoryCode::VerbalConflict => "Verbal Conflict",
        CategoryCode::MaterialConflict => "Material Conflict",
    }
}

fn style_name(style: Style) -> &'static str {
    match style {
        Style::Selected => "selected",
        Style::Dimmed => "dimmed",
    }
}

/// Style word for the text output; masked records carry a `+hl` suffix.
fn text_style(event: &RenderedEvent) -> String {
    let name = style_name(event.style);
    if event.highlighted {
        format!("{name}+hl")
    } else {
        name.to_string()
    }
}

/// Hover text for one event.
pub fn tooltip(record: &EventRecord) -> String {
    format!(
        "Global Event ID: {}\nActor 1: {}\nActor 2: {}\nAction: {}",
        record.id,
        record.actor1.as_deref().unwrap_or("-"),
        record.actor2.as_deref().unwrap_or("-"),
        category_label(record.category),
    )
}

pub struct CliRenderer<W> {
    format: OutputFormat,
    out: W,
}

impl CliRenderer<std::io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, std::io::stdout())
    }
}

impl<W: Write> CliRenderer<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self { format, out }
    }

    fn write_text(&mut self, diff: &Diff, projection: &dyn Projection) -> std::io::Result<()> {
        let (enter, update, exit) = diff.counts();
        writeln!(self.out, "render enter={enter} update={update} exit={exit}")?;
        for e in &diff.enter {
            let (x, y) = projection.project(e.record.long, e.record.lat);
            writeln!(
                self.out,
                "+ {} {} {} ({x:.1}, {y:.1})",
                e.id(),
                e.record.category.code(),
                text_style(e),
            )?;
        }
        for e in &diff.exit {
            writeln!(self.out, "- {}", e.id())?;
        }
        Ok(())
    }

    fn write_json(&mut self, diff: &Diff, projection: &dyn Projection) -> std::io::Result<()> {
        let placed = |events: &[RenderedEvent]| -> Vec<serde_json::Value> {
            events
                .iter()
                .map(|e| {
                    let (x, y) = projection.project(e.record.long, e.record.lat);
                    json!({
                        "id": e.id().0,
                        "category": e.record.category.code(),
                        "style": style_name(e.style),
                        "highlighted": e.highlighted,
                        "x": x,
                        "y": y,
                        "tooltip": tooltip(&e.record),
                    })
                })
                .collect()
        };
        let line = json!({
            "enter": placed(&diff.enter),
            "update": placed(&diff.update),
            "exit": diff.exit.iter().map(|e| e.id().0).collect::<Vec<_>>(),
        });
        writeln!(self.out, "{line}")
    }
}

impl<W: Write + Send> Renderer for CliRenderer<W> {
    fn render(&mut self, diff: &Diff, projection: &dyn Projection) {
        let written = match self.format {
            OutputFormat::Text => self.write_text(diff, projection),
            OutputFormat::Json => self.write_json(diff, projection),
        };
        if let Err(e) = written.and_then(|()| self.out.flush()) {
            tracing::warn!(error = %e, "failed to write render output");
        }
    }
}
