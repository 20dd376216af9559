//! Interactive driver: one command per stdin line, one render per change.
//!
//! Stands in for the browser's buttons, checkboxes, and event clicks.
//! `next` advances the cursor (replaying anything stepped back over
//! first), `back` pops the newest timestamp, and a failed fetch is retried by
//! the following `next`.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use scrub_core::{
    CategoryCode, ControllerConfig, Direction, EventId, MaskPredicate, OverlayController,
    OverlayError, StepOutcome, SelectionState, TemporalCursor, Timestamp,
};
use scrub_store::{EventsBroker, ScrubConfig, Storage};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::projection::FittedProjection;
use crate::render::{CliRenderer, OutputFormat};

type Controller = OverlayController<Arc<EventsBroker<Storage>>, CliRenderer<std::io::Stdout>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Next,
    Back,
    Mask,
    Focus(EventId),
    Toggle(CategoryCode),
    Reset,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> std::result::Result<Self, String> {
        let mut words = line.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let arg = words.next();
        let command = match (verb, arg) {
            ("next" | "n", None) => Command::Next,
            ("back" | "b", None) => Command::Back,
            ("mask" | "m", None) => Command::Mask,
            ("reset", None) => Command::Reset,
            ("status", None) => Command::Status,
            ("quit" | "q" | "exit", None) => Command::Quit,
            ("focus", Some(id)) => Command::Focus(EventId(
                id.parse().map_err(|_| format!("invalid event id '{id}'"))?,
            )),
            ("toggle", Some(code)) => {
                let code: u8 = code.parse().map_err(|_| format!("invalid category '{code}'"))?;
                Command::Toggle(CategoryCode::from_code(code).map_err(|e| e.to_string())?)
            }
            _ => return Err(format!("unknown command '{}'", line.trim())),
        };
        if words.next().is_some() {
            return Err(format!("too many arguments: '{}'", line.trim()));
        }
        Ok(command)
    }
}

struct Session {
    controller: Arc<Controller>,
    selection: SelectionState,
    cursor: TemporalCursor,
    /// Timestamps popped by `back`, newest last; replayed before the cursor advances.
    redo: Vec<Timestamp>,
    /// A timestamp whose fetch failed; the next `next` retries it.
    retry: Option<Timestamp>,
    format: OutputFormat,
}

impl Session {
    fn notice(&self, message: &str) {
        match self.format {
            OutputFormat::Text => println!("{message}"),
            OutputFormat::Json => println!("{}", serde_json::json!({ "notice": message })),
        }
    }

    async fn next(&mut self) {
        let Some(timestamp) = self
            .retry
            .take()
            .or_else(|| self.redo.pop())
            .or_else(|| self.cursor.next())
        else {
            self.notice("end of sequence");
            return;
        };

        match self.controller.step(timestamp.clone(), Direction::Forward).await {
            Ok(StepOutcome::Rendered(_) | StepOutcome::Underflow) => {}
            Ok(StepOutcome::Discarded) => self.notice(&format!("load for {timestamp} discarded")),
            Err(OverlayError::Fetch(e)) => {
                tracing::warn!(%timestamp, error = %e, "step failed; will retry");
                self.notice(&format!("error: failed to load {timestamp}: {e}"));
                self.retry = Some(timestamp);
            }
            Err(e) => self.notice(&format!("error: {e}")),
        }
    }

    fn back(&mut self) {
        let newest = self.controller.window().last().cloned();
        match self.controller.step_back() {
            Ok(StepOutcome::Rendered(_)) => {
                if let Some(ts) = newest {
                    self.redo.push(ts);
                }
            }
            Ok(StepOutcome::Underflow) => self.notice("window is empty"),
            Ok(StepOutcome::Discarded) => {}
            Err(e) => self.notice(&format!("error: {e}")),
        }
    }

    fn mask(&self, predicate: MaskPredicate) {
        match self.controller.toggle_mask_with(predicate) {
            Ok(Some(_)) => {}
            Ok(None) => self.notice("nothing to mask"),
            Err(e) => self.notice(&format!("error: {e}")),
        }
    }

    fn reset(&mut self, config: &ScrubConfig) {
        self.controller.reset();
        self.cursor = config.cursor();
        self.redo.clear();
        self.retry = None;
    }

    fn status(&self) {
        let upcoming = self
            .retry
            .as_ref()
            .or(self.redo.last())
            .map(Timestamp::to_string)
            .or_else(|| self.cursor.clone().next().map(|ts| ts.to_string()))
            .unwrap_or_else(|| "end".to_string());
        let selected: Vec<String> = self
            .selection
            .current()
            .iter()
            .map(|c| c.code().to_string())
            .collect();
        self.notice(&format!(
            "state={:?} window={} aggregate={} rendered={} selected=[{}] next={upcoming}",
            self.controller.state(),
            self.controller.window().len(),
            self.controller.aggregate().len(),
            self.controller.rendered().len(),
            selected.join(","),
        ));
    }
}

pub async fn run(config: &ScrubConfig, format: OutputFormat, canvas: (f64, f64)) -> Result<()> {
    let broker = crate::open_broker(config);

    let controller = OverlayController::new(Arc::clone(&broker), CliRenderer::stdout(format))
        .with_config(ControllerConfig {
            strict_cache: config.strict_cache,
        })
        .with_span(tracing::info_span!("overlay", root = %config.data_root));
    let controller = Arc::new(controller);

    match broker.load_map_outline().await {
        Ok(outline) => match outline.bounds {
            Some(bounds) => {
                let (width, height) = canvas;
                controller.set_projection(Arc::new(FittedProjection::fit(&bounds, width, height)));
            }
            None => tracing::warn!("map outline has no coordinates; rendering unprojected"),
        },
        Err(e) => tracing::warn!(error = %e, "map outline unavailable; rendering unprojected"),
    }

    let mut selection = SelectionState::new();
    let listener = Arc::clone(&controller);
    selection.on_change(move |set| {
        listener.on_selection_changed(set);
    });

    let mut session = Session {
        controller,
        selection,
        cursor: config.cursor(),
        redo: Vec::new(),
        retry: None,
        format,
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                session.notice(&e);
                continue;
            }
        };
        tracing::debug!(?command, "command");
        match command {
            Command::Next => session.next().await,
            Command::Back => session.back(),
            Command::Mask => session.mask(MaskPredicate::Selection),
            Command::Focus(id) => session.mask(MaskPredicate::Related(id)),
            Command::Toggle(category) => {
                let on = session.selection.toggle(category);
                session.notice(&format!("{category} {}", if on { "on" } else { "off" }));
            }
            Command::Reset => session.reset(config),
            Command::Status => session.status(),
            Command::Quit => break,
        }
    }
    Ok(())
}
