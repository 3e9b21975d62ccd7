//! Step dispatch: resolve a scheduled step into its action and run it against
//! the perception, actuation and planning collaborators.
//!
//! Handlers never catch collaborator errors. Anything they raise propagates to
//! the orchestration loop, which fails the task.

use std::time::Duration;

use minijinja::context;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ActionDefaults, NavTarget, ScrollDirection, StepAction};
use crate::core::budget::bounded;
use crate::core::expansion::suggested_steps;
use crate::core::params::{Params, number_as_i32};
use crate::core::types::{ProtoStep, StepRecord};
use crate::error::{ActuationError, PerceptionError, PlanningError, StepError};
use crate::io::actuation::Actuator;
use crate::io::config::{LayoutConfig, PacingConfig, PilotConfig, Point};
use crate::io::perception::{Perception, Screenshot};
use crate::io::planning::Planner;
use crate::io::prompt::{self, PromptLibrary};

/// Everything handlers need besides the collaborators.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub layout: LayoutConfig,
    pub pacing: PacingConfig,
    /// Upper bound for each individual collaborator call.
    pub call_timeout: Duration,
    pub defaults: ActionDefaults,
    /// Scroll distance between two feed items.
    pub feed_scroll_magnitude: u32,
}

impl DispatchSettings {
    pub fn from_config(config: &PilotConfig) -> Self {
        Self {
            layout: config.layout.clone(),
            pacing: config.pacing.clone(),
            call_timeout: config.limits.call_timeout(),
            defaults: config.limits.action_defaults(),
            feed_scroll_magnitude: config.limits.feed_scroll_magnitude,
        }
    }
}

/// What a successfully handled step produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutcome {
    /// Recorded as the step's `result`.
    pub result: Option<Value>,
    /// Follow-up steps to run immediately after this one.
    pub suggestions: Vec<ProtoStep>,
}

impl StepOutcome {
    fn empty() -> Self {
        Self::default()
    }

    fn with_result(result: Value) -> Self {
        Self {
            result: Some(result),
            suggestions: Vec::new(),
        }
    }
}

/// Runs steps against borrowed collaborators.
pub struct Dispatcher<'a, P, A, L> {
    perception: &'a P,
    actuator: &'a A,
    planner: &'a L,
    prompts: &'a PromptLibrary,
    settings: &'a DispatchSettings,
}

#[derive(Debug, Serialize)]
struct UnreadChat {
    name: String,
    x: i32,
    y: i32,
}

impl<'a, P: Perception, A: Actuator, L: Planner> Dispatcher<'a, P, A, L> {
    pub fn new(
        perception: &'a P,
        actuator: &'a A,
        planner: &'a L,
        prompts: &'a PromptLibrary,
        settings: &'a DispatchSettings,
    ) -> Self {
        Self {
            perception,
            actuator,
            planner,
            prompts,
            settings,
        }
    }

    /// Put the target window into its known position before a step.
    pub async fn normalize_environment(&self) -> Result<(), StepError> {
        bounded(
            "normalize_environment",
            self.settings.call_timeout,
            self.actuator.normalize_environment(),
            ActuationError::Timeout,
        )
        .await?;
        Ok(())
    }

    /// Execute one step.
    #[instrument(skip_all, fields(step_id = %step.id, step_type = %step.kind))]
    pub async fn dispatch(&self, step: &StepRecord) -> Result<StepOutcome, StepError> {
        match StepAction::from_step(step, &self.settings.defaults) {
            StepAction::SearchContact { name } => self.search_contact(name.as_deref()).await,
            StepAction::EnterChat => {
                self.click(self.settings.layout.search_result_first).await?;
                Ok(StepOutcome::empty())
            }
            StepAction::TypeText { content } => {
                self.click(self.settings.layout.chat_input).await?;
                if let Some(content) = content {
                    self.type_text(&content).await?;
                }
                Ok(StepOutcome::empty())
            }
            StepAction::ClickSend => {
                self.click(self.settings.layout.send_button).await?;
                Ok(StepOutcome::empty())
            }
            StepAction::NavigateTo { target } => self.navigate_to(target.as_deref()).await,
            StepAction::BrowseFeed { count } => self.browse_feed(count).await,
            StepAction::CheckUnread { limit } => self.check_unread(limit).await,
            StepAction::ExtractConversation => {
                let result = self.observe(prompt::EXTRACT_CHAT, context! {}).await?;
                info!(records = %result, "extracted chat records");
                Ok(StepOutcome::with_result(result))
            }
            StepAction::VerifySent => {
                let result = self.observe(prompt::VERIFY_SENT, context! {}).await?;
                info!(verdict = %result, "sent message check");
                Ok(StepOutcome::with_result(result))
            }
            StepAction::Analyze { instruction } => self.analyze(&instruction).await,
            StepAction::Plan { goal } => self.plan(&goal).await,
            StepAction::PointClick { point } => {
                match point {
                    Some((x, y)) => self.click_at(x, y).await?,
                    None => debug!("point click without coordinates; skipping"),
                }
                Ok(StepOutcome::empty())
            }
            StepAction::TypeLiteral { text } => {
                match text {
                    Some(text) => self.type_text(&text).await?,
                    None => debug!("input without text; skipping"),
                }
                Ok(StepOutcome::empty())
            }
            StepAction::Scroll {
                direction,
                magnitude,
            } => {
                match direction {
                    Some(direction) => self.scroll(direction, magnitude).await?,
                    None => debug!("scroll without direction; skipping"),
                }
                Ok(StepOutcome::empty())
            }
            StepAction::Unrecognized { kind, params } => {
                self.unrecognized(&kind, params.as_ref()).await
            }
        }
    }

    async fn search_contact(&self, name: Option<&str>) -> Result<StepOutcome, StepError> {
        self.click(self.settings.layout.search_bar).await?;
        if let Some(name) = name {
            self.type_text(name).await?;
        }
        self.pause(self.settings.pacing.search_delay_ms).await;

        let verdict = self
            .observe(prompt::VERIFY_SEARCH, context! { name => name.unwrap_or("") })
            .await?;
        info!(verdict = %verdict, "search verification");
        Ok(StepOutcome::with_result(verdict))
    }

    async fn navigate_to(&self, target: Option<&str>) -> Result<StepOutcome, StepError> {
        match target.and_then(NavTarget::parse) {
            Some(tab) => {
                self.click(self.settings.layout.nav_point(tab)).await?;
            }
            None => warn!(target = ?target, "unknown navigation target"),
        }
        Ok(StepOutcome::empty())
    }

    async fn browse_feed(&self, count: u32) -> Result<StepOutcome, StepError> {
        info!(count, "browsing feed");
        let mut items = Vec::new();
        for index in 0..count {
            let analysis = self.observe(prompt::ANALYZE_FEED, context! {}).await?;
            debug!(item = index + 1, analysis = %analysis, "feed item analysed");
            items.push(analysis);
            self.pause(self.settings.pacing.feed_read_delay_ms).await;

            self.scroll(ScrollDirection::Down, self.settings.feed_scroll_magnitude)
                .await?;
            self.pause(self.settings.pacing.scroll_render_delay_ms).await;
        }
        Ok(StepOutcome::with_result(json!({ "items": items })))
    }

    async fn check_unread(&self, limit: u32) -> Result<StepOutcome, StepError> {
        let overview = self.observe(prompt::FIND_UNREAD, context! {}).await?;
        let chats = unread_chats(&overview);
        info!(found = chats.len(), limit, "unread chats");

        let mut read = Vec::new();
        for chat in chats.into_iter().take(limit as usize) {
            info!(name = %chat.name, x = chat.x, y = chat.y, "reading chat");
            self.click_at(chat.x, chat.y).await?;
            self.pause(self.settings.pacing.page_load_delay_ms).await;
            let content = self.observe(prompt::EXTRACT_CHAT, context! {}).await?;
            read.push(json!({ "chat": chat, "content": content }));
        }
        Ok(StepOutcome::with_result(json!({
            "unread": overview,
            "read": read,
        })))
    }

    async fn analyze(&self, instruction: &str) -> Result<StepOutcome, StepError> {
        info!(instruction, "analyzing screen");
        let shot = self.capture().await?;
        let result = self.ask(&shot, instruction, None).await?;
        let suggestions = suggested_steps(&result);
        if !suggestions.is_empty() {
            info!(count = suggestions.len(), "oracle suggested follow-up steps");
        }
        Ok(StepOutcome {
            result: Some(result),
            suggestions,
        })
    }

    async fn plan(&self, goal: &str) -> Result<StepOutcome, StepError> {
        let steps = bounded(
            "plan",
            self.settings.call_timeout,
            self.planner.plan(goal),
            PlanningError::Timeout,
        )
        .await?;
        info!(count = steps.len(), "planned follow-up steps");
        Ok(StepOutcome {
            result: Some(json!({ "planned": steps.len() })),
            suggestions: steps,
        })
    }

    async fn unrecognized(
        &self,
        kind: &str,
        params: Option<&Map<String, Value>>,
    ) -> Result<StepOutcome, StepError> {
        match Params::new(kind, params).point() {
            Some((x, y)) => {
                warn!(step_type = kind, x, y, "unknown step type; treating as a click");
                self.click_at(x, y).await?;
            }
            None => warn!(step_type = kind, "unknown step type; skipping"),
        }
        Ok(StepOutcome::empty())
    }

    /// Capture the screen and ask the oracle with the named prompt.
    async fn observe<S: Serialize>(&self, template: &str, ctx: S) -> Result<Value, StepError> {
        let prompt = self.prompts.render(template, ctx)?;
        let shot = self.capture().await?;
        self.ask(&shot, "", Some(&prompt)).await
    }

    async fn capture(&self) -> Result<Screenshot, StepError> {
        let shot = bounded(
            "capture",
            self.settings.call_timeout,
            self.perception.capture(),
            PerceptionError::Timeout,
        )
        .await?;
        Ok(shot)
    }

    async fn ask(
        &self,
        shot: &Screenshot,
        instruction: &str,
        override_prompt: Option<&str>,
    ) -> Result<Value, StepError> {
        let result = bounded(
            "analyze",
            self.settings.call_timeout,
            self.perception.analyze(shot, instruction, override_prompt),
            PerceptionError::Timeout,
        )
        .await?;
        Ok(result)
    }

    async fn click(&self, point: Point) -> Result<(), StepError> {
        self.click_at(point.x, point.y).await
    }

    async fn click_at(&self, x: i32, y: i32) -> Result<(), StepError> {
        bounded(
            "point_click",
            self.settings.call_timeout,
            self.actuator.point_click(x, y),
            ActuationError::Timeout,
        )
        .await?;
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<(), StepError> {
        bounded(
            "type_text",
            self.settings.call_timeout,
            self.actuator.type_text(text),
            ActuationError::Timeout,
        )
        .await?;
        Ok(())
    }

    async fn scroll(&self, direction: ScrollDirection, magnitude: u32) -> Result<(), StepError> {
        bounded(
            "scroll",
            self.settings.call_timeout,
            self.actuator.scroll(direction, magnitude),
            ActuationError::Timeout,
        )
        .await?;
        Ok(())
    }

    async fn pause(&self, millis: u64) {
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

/// Entries of `unreadChats` that carry a position; malformed ones are skipped.
fn unread_chats(overview: &Value) -> Vec<UnreadChat> {
    let Some(entries) = overview.get("unreadChats") else {
        return Vec::new();
    };
    let Some(entries) = entries.as_array() else {
        warn!(got = %entries, "unreadChats is not a list; ignoring");
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let x = entry.get("x").and_then(number_as_i32);
            let y = entry.get("y").and_then(number_as_i32);
            let (Some(x), Some(y)) = (x, y) else {
                warn!(entry = %entry, "skipping unread chat without coordinates");
                return None;
            };
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            Some(UnreadChat { name, x, y })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProtoStep;
    use crate::test_support::{
        Actuation, RecordingActuator, ScriptedPerception, ScriptedPlanner, proto, test_settings,
    };

    fn step(kind: &str, params: Value) -> StepRecord {
        StepRecord::schedule(proto(kind, params))
    }

    struct Rig {
        perception: ScriptedPerception,
        actuator: RecordingActuator,
        planner: ScriptedPlanner,
        prompts: PromptLibrary,
        settings: DispatchSettings,
    }

    impl Rig {
        fn new(replies: Vec<Value>) -> Self {
            Self {
                perception: ScriptedPerception::new(replies),
                actuator: RecordingActuator::new(),
                planner: ScriptedPlanner::default(),
                prompts: PromptLibrary::builtin(),
                settings: test_settings(),
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_, ScriptedPerception, RecordingActuator, ScriptedPlanner> {
            Dispatcher::new(
                &self.perception,
                &self.actuator,
                &self.planner,
                &self.prompts,
                &self.settings,
            )
        }
    }

    #[tokio::test]
    async fn search_contact_clicks_types_and_verifies() {
        let rig = Rig::new(vec![json!({"found": true})]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("search_contact", json!({"name": "Li Lei"})))
            .await
            .expect("dispatch");

        let bar = rig.settings.layout.search_bar;
        assert_eq!(
            rig.actuator.actions(),
            vec![
                Actuation::Click { x: bar.x, y: bar.y },
                Actuation::Type("Li Lei".to_string()),
            ]
        );
        assert_eq!(outcome.result, Some(json!({"found": true})));
        let calls = rig.perception.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].override_prompt.as_deref().unwrap().contains("\"Li Lei\""));
    }

    #[tokio::test]
    async fn type_text_focuses_input_first() {
        let rig = Rig::new(vec![]);
        rig.dispatcher()
            .dispatch(&step("type_text", json!({"content": "hello"})))
            .await
            .expect("dispatch");
        let input = rig.settings.layout.chat_input;
        assert_eq!(
            rig.actuator.actions(),
            vec![
                Actuation::Click {
                    x: input.x,
                    y: input.y
                },
                Actuation::Type("hello".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn navigate_to_unknown_target_is_a_no_op() {
        let rig = Rig::new(vec![]);
        rig.dispatcher()
            .dispatch(&step("navigate_to", json!({"target": "settings"})))
            .await
            .expect("dispatch");
        assert!(rig.actuator.actions().is_empty());

        rig.dispatcher()
            .dispatch(&step("navigate_to", json!({"target": "moments"})))
            .await
            .expect("dispatch");
        let moments = rig.settings.layout.nav_moments;
        assert_eq!(
            rig.actuator.actions(),
            vec![Actuation::Click {
                x: moments.x,
                y: moments.y
            }]
        );
    }

    #[tokio::test]
    async fn browse_feed_analyzes_then_scrolls_each_item() {
        let rig = Rig::new(vec![json!({"post": 1}), json!({"post": 2})]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("browse_moments", json!({"count": 2})))
            .await
            .expect("dispatch");

        assert_eq!(
            rig.actuator.actions(),
            vec![
                Actuation::Scroll(ScrollDirection::Down, 1000),
                Actuation::Scroll(ScrollDirection::Down, 1000),
            ]
        );
        assert_eq!(
            outcome.result,
            Some(json!({"items": [{"post": 1}, {"post": 2}]}))
        );
    }

    #[tokio::test]
    async fn check_unread_reads_up_to_limit_and_skips_malformed() {
        let rig = Rig::new(vec![
            json!({"unreadChats": [
                {"name": "A", "x": 10, "y": 20},
                {"name": "broken"},
                {"name": "B", "x": 30.6, "y": 40},
                {"name": "C", "x": 50, "y": 60}
            ]}),
            json!({"messages": ["hi"]}),
            json!({"messages": ["yo"]}),
        ]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("check_new_messages", json!({"limit": 2})))
            .await
            .expect("dispatch");

        assert_eq!(
            rig.actuator.actions(),
            vec![
                Actuation::Click { x: 10, y: 20 },
                Actuation::Click { x: 31, y: 40 },
            ]
        );
        let result = outcome.result.unwrap();
        assert_eq!(result["read"].as_array().unwrap().len(), 2);
        assert_eq!(result["read"][1]["content"], json!({"messages": ["yo"]}));
        assert_eq!(result["read"][0]["chat"]["name"], json!("A"));
    }

    #[tokio::test]
    async fn analyze_returns_suggestions_without_inserting() {
        let rig = Rig::new(vec![json!({
            "uiState": "chat_list",
            "action_suggestion": {"steps": [
                {"action": "tap", "coordinate": [5, 6]},
                {"action": "END"}
            ]}
        })]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("analyze", json!({"instruction": "open chat"})))
            .await
            .expect("dispatch");

        assert_eq!(outcome.suggestions.len(), 1);
        assert_eq!(outcome.suggestions[0].kind, "tap");
        let calls = rig.perception.calls();
        assert_eq!(calls[0].instruction, "open chat");
        assert!(calls[0].override_prompt.is_none());
        assert!(rig.actuator.actions().is_empty());
    }

    #[tokio::test]
    async fn plan_step_yields_planner_output_as_suggestions() {
        let mut rig = Rig::new(vec![]);
        rig.planner = ScriptedPlanner::new(vec![ProtoStep::new("click_send", "send it")]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("plan", json!({"goal": "send"})))
            .await
            .expect("dispatch");
        assert_eq!(outcome.suggestions, vec![ProtoStep::new("click_send", "send it")]);
        assert_eq!(rig.planner.goals(), vec!["send".to_string()]);
    }

    #[tokio::test]
    async fn primitives_without_required_params_do_nothing() {
        let rig = Rig::new(vec![]);
        let dispatcher = rig.dispatcher();
        dispatcher.dispatch(&step("tap", json!({"x": 1}))).await.expect("tap");
        dispatcher.dispatch(&step("input", json!({}))).await.expect("input");
        dispatcher
            .dispatch(&step("scroll", json!({"direction": "sideways"})))
            .await
            .expect("scroll");
        assert!(rig.actuator.actions().is_empty());
    }

    #[tokio::test]
    async fn scroll_uses_default_magnitude() {
        let rig = Rig::new(vec![]);
        rig.dispatcher()
            .dispatch(&step("scroll", json!({"direction": "UP"})))
            .await
            .expect("scroll");
        assert_eq!(
            rig.actuator.actions(),
            vec![Actuation::Scroll(ScrollDirection::Up, 500)]
        );
    }

    #[tokio::test]
    async fn unrecognized_type_with_point_clicks_once() {
        let rig = Rig::new(vec![]);
        rig.dispatcher()
            .dispatch(&step("long_press", json!({"x": 10, "y": 20})))
            .await
            .expect("dispatch");
        assert_eq!(
            rig.actuator.actions(),
            vec![Actuation::Click { x: 10, y: 20 }]
        );
    }

    #[tokio::test]
    async fn unrecognized_type_without_point_is_benign() {
        let rig = Rig::new(vec![]);
        let outcome = rig
            .dispatcher()
            .dispatch(&step("wave", json!({"x": "10", "y": "20"})))
            .await
            .expect("dispatch");
        assert_eq!(outcome, StepOutcome::default());
        assert!(rig.actuator.actions().is_empty());
    }

    #[tokio::test]
    async fn actuation_errors_propagate() {
        let rig = Rig::new(vec![]);
        rig.actuator.fail_next_click("display gone");
        let err = rig
            .dispatcher()
            .dispatch(&step("click_send", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "actuation");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_perception_times_out() {
        let mut rig = Rig::new(vec![json!({})]);
        rig.perception = ScriptedPerception::new(vec![json!({})])
            .with_delay(rig.settings.call_timeout + Duration::from_secs(1));
        let err = rig
            .dispatcher()
            .dispatch(&step("check_sent_messages", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StepError::Perception(PerceptionError::Timeout(_))
        ));
    }
}
