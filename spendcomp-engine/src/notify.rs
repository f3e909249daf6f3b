use crate::competition::CompetitionId;
use async_trait::async_trait;
use parking_lot::Mutex;
use spendcomp_core::ChatId;

/// Callback actions carried by chat buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Setup(CompetitionId),
    Duration { minutes: u32, id: CompetitionId },
    Start(CompetitionId),
}

impl Action {
    pub fn token(&self) -> String {
        match self {
            Action::Setup(id) => format!("setup:{}", id),
            Action::Duration { minutes, id } => format!("time:{}:{}", minutes, id),
            Action::Start(id) => format!("start:{}", id),
        }
    }

    pub fn parse(token: &str) -> Option<Action> {
        let mut parts = token.splitn(3, ':');
        let kind = parts.next()?;
        match kind {
            "setup" => parts
                .next()
                .filter(|id| !id.is_empty())
                .map(|id| Action::Setup(id.into())),
            "start" => parts
                .next()
                .filter(|id| !id.is_empty())
                .map(|id| Action::Start(id.into())),
            "time" => {
                let minutes = parts.next()?.parse().ok()?;
                let id = parts.next().filter(|id| !id.is_empty())?;
                Some(Action::Duration {
                    minutes,
                    id: id.into(),
                })
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
    pub buttons: Vec<Button>,
}

impl OutboundMessage {
    pub fn text(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn with_button(mut self, label: impl Into<String>, action: Action) -> Self {
        self.buttons.push(Button {
            label: label.into(),
            action,
        });
        self
    }
}

/// Outbound side of the chat transport, used for messages that are not a
/// direct reply to an incoming command.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: OutboundMessage) -> spendcomp_core::Result<()>;
}

/// Keeps every message in memory.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: OutboundMessage) -> spendcomp_core::Result<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}
