//! Desktop adapters backed by external helper commands.
//!
//! Each operation is a configured argv template (see
//! [`DesktopConfig`](crate::io::config::DesktopConfig)) rendered with minijinja
//! and spawned directly, without a shell, on the blocking thread pool.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use minijinja::{Environment, Value as TemplateValue, context};
use regex::Regex;
use tracing::{debug, info, instrument};

use crate::core::action::ScrollDirection;
use crate::error::{ActuationError, ConfigError, PerceptionError};
use crate::io::actuation::{Actuator, PointerProbe};
use crate::io::config::{DesktopConfig, LayoutConfig};
use crate::io::perception::{ScreenSource, Screenshot};
use crate::io::process::run_argv_checked;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
/// Output cap for commands whose stdout is not an image.
const SMALL_OUTPUT_LIMIT: usize = 64 * 1024;

/// Render every element of `template` with `ctx`.
fn render_argv(
    env: &Environment<'static>,
    template: &[String],
    ctx: &TemplateValue,
) -> Result<Vec<String>> {
    template
        .iter()
        .map(|part| {
            env.render_str(part, ctx)
                .with_context(|| format!("render argument {part:?}"))
        })
        .collect()
}

async fn spawn_argv(argv: Vec<String>, timeout: Duration, limit: usize) -> Result<Vec<u8>> {
    debug!(?argv, "desktop command");
    tokio::task::spawn_blocking(move || run_argv_checked(&argv, timeout, limit))
        .await
        .context("join desktop command")?
}

fn window_ctx(layout: &LayoutConfig) -> TemplateValue {
    context! {
        window_title => layout.window_title.clone(),
        width => layout.window_width,
        height => layout.window_height,
    }
}

/// Captures the target window by running the configured capture command and
/// reading PNG bytes from its stdout.
pub struct CommandScreenSource {
    env: Environment<'static>,
    argv: Vec<String>,
    ctx: TemplateValue,
    timeout: Duration,
    limit: usize,
}

impl CommandScreenSource {
    pub fn new(desktop: &DesktopConfig, layout: &LayoutConfig) -> Self {
        Self {
            env: Environment::new(),
            argv: desktop.capture.clone(),
            ctx: window_ctx(layout),
            timeout: desktop.command_timeout(),
            limit: desktop.capture_limit_bytes,
        }
    }
}

#[async_trait]
impl ScreenSource for CommandScreenSource {
    #[instrument(skip_all)]
    async fn capture(&self) -> Result<Screenshot, PerceptionError> {
        let capture_err = |err: anyhow::Error| PerceptionError::Capture(format!("{err:#}"));
        let argv = render_argv(&self.env, &self.argv, &self.ctx).map_err(capture_err)?;
        let png = spawn_argv(argv, self.timeout, self.limit)
            .await
            .map_err(capture_err)?;
        if !png.starts_with(PNG_SIGNATURE) {
            return Err(PerceptionError::Capture(format!(
                "capture command did not produce a PNG ({} bytes)",
                png.len()
            )));
        }
        debug!(bytes = png.len(), "captured screen");
        Ok(Screenshot::new(png))
    }
}

/// Injects input through helper commands such as `xdotool`.
pub struct CommandActuator {
    env: Environment<'static>,
    desktop: DesktopConfig,
    window: TemplateValue,
    pointer_pattern: Regex,
}

impl CommandActuator {
    pub fn new(desktop: &DesktopConfig, layout: &LayoutConfig) -> Result<Self, ConfigError> {
        let pointer_pattern = Regex::new(&desktop.pointer_pattern)
            .map_err(|err| ConfigError::Invalid(format!("desktop.pointer_pattern: {err}")))?;
        Ok(Self {
            env: Environment::new(),
            desktop: desktop.clone(),
            window: window_ctx(layout),
            pointer_pattern,
        })
    }

    async fn run(
        &self,
        template: &[String],
        ctx: &TemplateValue,
    ) -> Result<Vec<u8>, ActuationError> {
        let argv = render_argv(&self.env, template, ctx)
            .map_err(|err| ActuationError::Command(format!("{err:#}")))?;
        spawn_argv(argv, self.desktop.command_timeout(), SMALL_OUTPUT_LIMIT)
            .await
            .map_err(|err| ActuationError::Command(format!("{err:#}")))
    }
}

/// Wheel button and repeat count for a scroll of `magnitude` pixels.
fn scroll_clicks(direction: ScrollDirection, magnitude: u32) -> (u8, u32) {
    let button = match direction {
        ScrollDirection::Up => 4,
        ScrollDirection::Down => 5,
    };
    (button, (magnitude / 100).max(1))
}

fn parse_pointer(pattern: &Regex, output: &str) -> Option<(i32, i32)> {
    let caps = pattern.captures(output)?;
    let x = caps.get(1)?.as_str().parse().ok()?;
    let y = caps.get(2)?.as_str().parse().ok()?;
    Some((x, y))
}

#[async_trait]
impl Actuator for CommandActuator {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        self.run(&self.desktop.click, &context! { x, y }).await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), ActuationError> {
        self.run(&self.desktop.type_text, &context! { text }).await?;
        Ok(())
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: u32,
    ) -> Result<(), ActuationError> {
        let (button, amount) = scroll_clicks(direction, magnitude);
        let ctx = context! { direction => direction.as_str(), button, amount };
        self.run(&self.desktop.scroll, &ctx).await?;
        Ok(())
    }

    async fn normalize_environment(&self) -> Result<(), ActuationError> {
        self.run(&self.desktop.normalize, &self.window).await?;
        Ok(())
    }
}

#[async_trait]
impl PointerProbe for CommandActuator {
    async fn pointer_position(&self) -> Result<(i32, i32), ActuationError> {
        let out = self.run(&self.desktop.pointer, &context! {}).await?;
        let text = String::from_utf8_lossy(&out);
        parse_pointer(&self.pointer_pattern, &text).ok_or_else(|| {
            ActuationError::Command(format!("unrecognized pointer output: {}", text.trim()))
        })
    }
}

/// Logs actions instead of performing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunActuator;

#[async_trait]
impl Actuator for DryRunActuator {
    async fn point_click(&self, x: i32, y: i32) -> Result<(), ActuationError> {
        info!(x, y, "dry-run: click");
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), ActuationError> {
        info!(chars = text.chars().count(), "dry-run: type");
        Ok(())
    }

    async fn scroll(
        &self,
        direction: ScrollDirection,
        magnitude: u32,
    ) -> Result<(), ActuationError> {
        info!(direction = direction.as_str(), magnitude, "dry-run: scroll");
        Ok(())
    }

    async fn normalize_environment(&self) -> Result<(), ActuationError> {
        debug!("dry-run: normalize window");
        Ok(())
    }
}
