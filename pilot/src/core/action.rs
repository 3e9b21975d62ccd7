//! Closed set of step actions understood by the dispatcher.
//!
//! A step's `type` string is resolved once into a [`StepAction`]. Anything not
//! in the registry becomes [`StepAction::Unrecognized`] with its raw payload so
//! the dispatcher can log it and, when it carries coordinates, degrade it into
//! a plain point-click.

use serde_json::{Map, Value};

use super::params::Params;
use super::types::StepRecord;

pub const SEARCH_CONTACT: &str = "search_contact";
pub const ENTER_CHAT: &str = "enter_chat";
pub const TYPE_TEXT: &str = "type_text";
pub const CLICK_SEND: &str = "click_send";
pub const NAVIGATE_TO: &str = "navigate_to";
pub const BROWSE_MOMENTS: &str = "browse_moments";
pub const CHECK_NEW_MESSAGES: &str = "check_new_messages";
pub const GET_CONTACT_CHAT_RECORDS: &str = "get_contact_chat_records";
pub const CHECK_SENT_MESSAGES: &str = "check_sent_messages";
pub const ANALYZE: &str = "analyze";
pub const PLAN: &str = "plan";
pub const TAP: &str = "tap";
pub const POINT_CLICK: &str = "pointClick";
pub const INPUT: &str = "input";
pub const SCROLL: &str = "scroll";

/// Sentinel action the oracle uses to say "nothing more to do".
pub const END: &str = "END";

/// True for the type tags that denote a raw point-click.
pub fn is_point_click(kind: &str) -> bool {
    kind == TAP || kind == POINT_CLICK
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "up" => Some(ScrollDirection::Up),
            "down" => Some(ScrollDirection::Down),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

/// Named navigation tab of the target application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavTarget {
    Chat,
    Contacts,
    Moments,
    Favorites,
}

impl NavTarget {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "chat" => Some(NavTarget::Chat),
            "contacts" => Some(NavTarget::Contacts),
            "moments" => Some(NavTarget::Moments),
            "favorites" => Some(NavTarget::Favorites),
            _ => None,
        }
    }
}

/// Defaults applied when a step omits an optional numeric parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDefaults {
    pub browse_count: u32,
    pub unread_limit: u32,
    pub scroll_magnitude: u32,
}

impl Default for ActionDefaults {
    fn default() -> Self {
        Self {
            browse_count: 3,
            unread_limit: 5,
            scroll_magnitude: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    SearchContact { name: Option<String> },
    EnterChat,
    TypeText { content: Option<String> },
    ClickSend,
    /// `target` keeps the raw string so an unknown tab can be reported.
    NavigateTo { target: Option<String> },
    BrowseFeed { count: u32 },
    CheckUnread { limit: u32 },
    ExtractConversation,
    VerifySent,
    Analyze { instruction: String },
    Plan { goal: String },
    PointClick { point: Option<(i32, i32)> },
    TypeLiteral { text: Option<String> },
    /// `direction` is `None` when absent or unparseable; the step is then a no-op.
    Scroll {
        direction: Option<ScrollDirection>,
        magnitude: u32,
    },
    Unrecognized {
        kind: String,
        params: Option<Map<String, Value>>,
    },
}

impl StepAction {
    /// Resolve a scheduled step into its typed action.
    pub fn from_step(step: &StepRecord, defaults: &ActionDefaults) -> Self {
        let params = Params::new(&step.kind, step.params.as_ref());
        match step.kind.as_str() {
            SEARCH_CONTACT => StepAction::SearchContact {
                name: params.string("name"),
            },
            ENTER_CHAT => StepAction::EnterChat,
            TYPE_TEXT => StepAction::TypeText {
                content: params.string("content"),
            },
            CLICK_SEND => StepAction::ClickSend,
            NAVIGATE_TO => StepAction::NavigateTo {
                target: params.string("target"),
            },
            BROWSE_MOMENTS => StepAction::BrowseFeed {
                count: params.count("count").unwrap_or(defaults.browse_count),
            },
            CHECK_NEW_MESSAGES => StepAction::CheckUnread {
                limit: params.count("limit").unwrap_or(defaults.unread_limit),
            },
            GET_CONTACT_CHAT_RECORDS => StepAction::ExtractConversation,
            CHECK_SENT_MESSAGES => StepAction::VerifySent,
            ANALYZE => StepAction::Analyze {
                instruction: params
                    .string("instruction")
                    .unwrap_or_else(|| step.description.clone()),
            },
            PLAN => StepAction::Plan {
                goal: params
                    .string("goal")
                    .unwrap_or_else(|| step.description.clone()),
            },
            TAP | POINT_CLICK => StepAction::PointClick {
                point: params.point(),
            },
            INPUT => StepAction::TypeLiteral {
                text: params.string("text"),
            },
            SCROLL => StepAction::Scroll {
                direction: params
                    .string("direction")
                    .and_then(|raw| ScrollDirection::parse(&raw)),
                magnitude: params
                    .count("magnitude")
                    .unwrap_or(defaults.scroll_magnitude),
            },
            other => StepAction::Unrecognized {
                kind: other.to_string(),
                params: step.params.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ProtoStep;
    use serde_json::json;

    fn step(kind: &str, params: Value) -> StepRecord {
        let mut proto = ProtoStep::new(kind, format!("{kind} description"));
        if let Value::Object(map) = params {
            proto = proto.with_params(map);
        }
        StepRecord::schedule(proto)
    }

    #[test]
    fn resolves_registered_types() {
        let defaults = ActionDefaults::default();
        assert_eq!(
            StepAction::from_step(&step("search_contact", json!({"name": "Li"})), &defaults),
            StepAction::SearchContact {
                name: Some("Li".to_string())
            }
        );
        assert_eq!(
            StepAction::from_step(&step("pointClick", json!({"x": 1, "y": 2})), &defaults),
            StepAction::PointClick {
                point: Some((1, 2))
            }
        );
    }

    #[test]
    fn applies_defaults_for_missing_counts() {
        let defaults = ActionDefaults::default();
        assert_eq!(
            StepAction::from_step(&step("browse_moments", Value::Null), &defaults),
            StepAction::BrowseFeed { count: 3 }
        );
        assert_eq!(
            StepAction::from_step(&step("scroll", json!({"direction": "DOWN"})), &defaults),
            StepAction::Scroll {
                direction: Some(ScrollDirection::Down),
                magnitude: 500
            }
        );
    }

    #[test]
    fn analyze_falls_back_to_description() {
        let action = StepAction::from_step(&step("analyze", Value::Null), &ActionDefaults::default());
        assert_eq!(
            action,
            StepAction::Analyze {
                instruction: "analyze description".to_string()
            }
        );
    }

    #[test]
    fn unknown_types_keep_raw_payload() {
        let action = StepAction::from_step(
            &step("long_press", json!({"x": 3})),
            &ActionDefaults::default(),
        );
        match action {
            StepAction::Unrecognized { kind, params } => {
                assert_eq!(kind, "long_press");
                assert_eq!(params.unwrap()["x"], json!(3));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }
}
