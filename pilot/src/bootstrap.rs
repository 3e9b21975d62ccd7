//! Wire live collaborators from a loaded [`PilotConfig`].

use tracing::{info, warn};

use crate::dispatch::DispatchSettings;
use crate::error::{ConfigError, PilotError};
use crate::io::actuation::{Actuator, SafetyInterlock};
use crate::io::config::{PilotConfig, PlanningMode};
use crate::io::desktop::{CommandActuator, CommandScreenSource, DryRunActuator};
use crate::io::llm::ChatClient;
use crate::io::perception::{Perception, VisionPerception};
use crate::io::planning::{LlmPlanner, ObservePlanner, Planner};
use crate::io::prompt::PromptLibrary;
use crate::orchestrator::Orchestrator;

pub type BoxedPerception = Box<dyn Perception>;
pub type BoxedActuator = Box<dyn Actuator>;
pub type BoxedPlanner = Box<dyn Planner>;
pub type LiveOrchestrator = Orchestrator<BoxedPerception, BoxedActuator, BoxedPlanner>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Log actions instead of injecting input.
    pub dry_run: bool,
}

/// Built-in prompts, with overrides from `prompts_dir` when configured.
pub fn load_prompts(config: &PilotConfig) -> Result<PromptLibrary, PilotError> {
    let prompts = match &config.prompts_dir {
        Some(dir) => PromptLibrary::with_overrides(dir)?,
        None => PromptLibrary::builtin(),
    };
    Ok(prompts)
}

fn chat_client(config: &PilotConfig) -> Result<ChatClient, PilotError> {
    let key = config.api_key()?;
    ChatClient::new(&config.api, key, config.limits.call_timeout())
        .map_err(|err| ConfigError::Invalid(format!("http client: {err}")).into())
}

/// The configured planning strategy. Only the model-backed planner needs an
/// API key.
pub fn build_planner(
    config: &PilotConfig,
    prompts: &PromptLibrary,
) -> Result<BoxedPlanner, PilotError> {
    Ok(match config.planning.mode {
        PlanningMode::Observe => Box::new(ObservePlanner),
        PlanningMode::Llm => Box::new(LlmPlanner::new(chat_client(config)?, prompts.clone())),
    })
}

pub fn build_actuator(
    config: &PilotConfig,
    options: BuildOptions,
) -> Result<BoxedActuator, PilotError> {
    if options.dry_run {
        info!("dry run: actions are logged, not performed");
        return Ok(Box::new(DryRunActuator));
    }
    let actuator = CommandActuator::new(&config.desktop, &config.layout)?;
    if config.safety.enabled {
        Ok(Box::new(SafetyInterlock::new(
            actuator,
            config.safety.threshold_px,
        )))
    } else {
        warn!("safety interlock disabled");
        Ok(Box::new(actuator))
    }
}

/// Everything `pilot run` needs. Fails on a missing API key, a bad prompt
/// override or an invalid desktop setting, before any input is injected.
pub fn build_orchestrator(
    config: &PilotConfig,
    options: BuildOptions,
) -> Result<LiveOrchestrator, PilotError> {
    config.validate()?;
    let prompts = load_prompts(config)?;
    let client = chat_client(config)?;
    let source = CommandScreenSource::new(&config.desktop, &config.layout);
    let perception: BoxedPerception =
        Box::new(VisionPerception::new(source, client, prompts.clone()));
    let actuator = build_actuator(config, options)?;
    let planner = build_planner(config, &prompts)?;
    Ok(Orchestrator::new(
        perception,
        actuator,
        planner,
        prompts,
        DispatchSettings::from_config(config),
    ))
}
