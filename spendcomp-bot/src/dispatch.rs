use crate::telegram::{CallbackQuery, Message, Update};
use chrono::{DateTime, Utc};
use spendcomp_core::ChatId;
use spendcomp_engine::{
    Action, ActivateOutcome, ChatKind, CompetitionError, CompetitionId, CompetitionSummary,
    DurationOutcome, Invoker, LifecycleController, OutboundMessage, SetupOutcome,
};
use std::sync::Arc;

const HELP: &str = "XRP Spending Competition Bot\n\n\
    Use /comp rTOKEN_ADDRESS in a group to create a new competition!\n\n\
    /status <id> - show a competition\n\
    /comps - list competitions (admin)\n\
    /startcomp <id> - start a funded competition (admin)\n\
    /cancel <id> - cancel a competition (admin)";

const INTERNAL_ERROR: &str = "Something went wrong on our side. Please try again later.";

/// A request to the chat transport produced while handling an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(OutboundMessage),
    Edit {
        message_id: i64,
        message: OutboundMessage,
    },
    Answer {
        callback_id: String,
        text: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Comp(Option<String>),
    StartComp(Option<String>),
    Cancel(Option<String>),
    Status(Option<String>),
    Comps,
}

/// Parses a bot command. Commands addressed to another bot (`/cmd@other`)
/// and unknown commands yield `None`.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<Command> {
    let mut words = text.split_whitespace();
    let head = words.next()?.strip_prefix('/')?;
    let arg = words.next().map(str::to_string);

    let name = match head.split_once('@') {
        Some((name, target)) => {
            if bot_username.map_or(true, |me| !me.eq_ignore_ascii_case(target)) {
                return None;
            }
            name
        }
        None => head,
    };

    match name {
        "start" | "help" => Some(Command::Start),
        "comp" => Some(Command::Comp(arg)),
        "startcomp" => Some(Command::StartComp(arg)),
        "cancel" => Some(Command::Cancel(arg)),
        "status" => Some(Command::Status(arg)),
        "comps" => Some(Command::Comps),
        _ => None,
    }
}

/// Chat text for a failed operation. Internal failures are logged and
/// replaced with a generic message.
pub fn error_text(err: &CompetitionError) -> String {
    if err.is_user_facing() {
        err.to_string()
    } else {
        tracing::error!("Operation failed: {}", err);
        INTERNAL_ERROR.to_string()
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

pub fn format_summary(summary: &CompetitionSummary) -> String {
    let mut lines = vec![
        format!("Competition {}", summary.id),
        format!("Issuer: {}", summary.issuer),
        format!("Phase: {}", summary.phase),
    ];
    if let Some(minutes) = summary.duration_minutes {
        lines.push(format!("Duration: {} minutes", minutes));
    }
    if let (Some(address), Some(tag)) = (&summary.wallet_address, summary.dest_tag) {
        lines.push(format!("Prize wallet: {}", address));
        lines.push(format!("Tag: {}", tag));
    }
    lines.push(format!("Pool: {} XRP", summary.pool_amount));
    if summary.participants > 0 {
        lines.push(format!("Participants: {}", summary.participants));
    }
    lines.push(format!("Created: {}", format_time(summary.created_at)));
    if let Some(deadline) = summary.deposit_deadline {
        lines.push(format!("Deposit deadline: {}", format_time(deadline)));
    }
    if let Some(funded_at) = summary.funded_at {
        lines.push(format!("Funded: {}", format_time(funded_at)));
    }
    if let Some(started_at) = summary.started_at {
        lines.push(format!("Started: {}", format_time(started_at)));
    }
    if let Some(ends_at) = summary.ends_at {
        lines.push(format!("Ends at: {}", format_time(ends_at)));
    }
    if let Some(reason) = &summary.close_reason {
        lines.push(format!("Closed: {}", reason));
    }
    lines.join("\n")
}

/// Turns incoming updates into transport effects.
#[derive(Clone)]
pub struct Dispatcher {
    controller: LifecycleController,
    bot_username: Option<Arc<str>>,
}

impl Dispatcher {
    pub fn new(controller: LifecycleController, bot_username: Option<String>) -> Self {
        Self {
            controller,
            bot_username: bot_username.map(Arc::from),
        }
    }

    pub async fn handle(&self, update: &Update) -> Vec<Effect> {
        if let Some(query) = &update.callback_query {
            return self.handle_callback(query).await;
        }
        if let Some(message) = &update.message {
            return self.handle_message(message).await;
        }
        Vec::new()
    }

    async fn handle_message(&self, message: &Message) -> Vec<Effect> {
        let (Some(text), Some(from)) = (&message.text, &message.from) else {
            return Vec::new();
        };
        let Some(command) = parse_command(text, self.bot_username.as_deref()) else {
            return Vec::new();
        };

        let invoker = Invoker {
            user_id: from.id,
            chat_id: message.chat.id,
            chat_kind: message.chat.chat_kind(),
        };
        tracing::debug!("Command {:?} from user {}", command, invoker.user_id);

        let reply = |text: String| Effect::Send(OutboundMessage::text(invoker.chat_id, text));

        match command {
            Command::Start => vec![reply(HELP.to_string())],
            Command::Comp(issuer) => match self.controller.create(&invoker, issuer.as_deref()).await
            {
                Ok(created) => vec![Effect::Send(
                    OutboundMessage::text(
                        created.group_id,
                        format!(
                            "New competition created for issuer:\n{}\n\n\
                             Click the button below to continue setup in private.",
                            created.issuer
                        ),
                    )
                    .with_button("Setup Competition (private)", Action::Setup(created.id)),
                )],
                Err(e) => vec![reply(error_text(&e))],
            },
            Command::StartComp(id) => {
                let Some(id) = id else {
                    return vec![reply("Usage: /startcomp <competition id>".to_string())];
                };
                self.start_effects(&invoker, &CompetitionId::from(id.as_str()))
                    .await
                    .unwrap_or_else(|e| vec![reply(error_text(&e))])
            }
            Command::Cancel(id) => {
                let Some(id) = id else {
                    return vec![reply("Usage: /cancel <competition id>".to_string())];
                };
                let id = CompetitionId::from(id.as_str());
                match self.controller.abandon(&invoker, &id, "cancelled by admin").await {
                    Ok(abandoned) => {
                        let text = format!("Competition {} cancelled.", abandoned.id);
                        let mut effects = vec![reply(text.clone())];
                        if abandoned.group_id != invoker.chat_id {
                            effects.push(Effect::Send(OutboundMessage::text(
                                abandoned.group_id,
                                text,
                            )));
                        }
                        effects
                    }
                    Err(e) => vec![reply(error_text(&e))],
                }
            }
            Command::Status(id) => {
                let Some(id) = id else {
                    return vec![reply("Usage: /status <competition id>".to_string())];
                };
                match self.controller.status(&CompetitionId::from(id.as_str())).await {
                    Ok(summary) => vec![reply(format_summary(&summary))],
                    Err(e) => vec![reply(error_text(&e))],
                }
            }
            Command::Comps => {
                if !self.controller.is_admin(invoker.user_id) {
                    return vec![reply(error_text(&CompetitionError::unauthorized(
                        "Only admin can use this command!",
                    )))];
                }
                let summaries = self.controller.list().await;
                if summaries.is_empty() {
                    return vec![reply("No competitions tracked.".to_string())];
                }
                let lines: Vec<String> = summaries
                    .iter()
                    .map(|s| format!("{} [{}] {} - {} XRP", s.id, s.phase, s.issuer, s.pool_amount))
                    .collect();
                vec![reply(lines.join("\n"))]
            }
        }
    }

    async fn start_effects(
        &self,
        invoker: &Invoker,
        id: &CompetitionId,
    ) -> spendcomp_engine::Result<Vec<Effect>> {
        match self.controller.activate(invoker, id).await? {
            ActivateOutcome::Started {
                id,
                group_id,
                issuer,
                ends_at,
            } => Ok(vec![
                Effect::Send(OutboundMessage::text(
                    invoker.chat_id,
                    format!("Competition {} started.", id),
                )),
                Effect::Send(OutboundMessage::text(
                    group_id,
                    format!(
                        "The spending competition for {} has started!\nEnds at {}.",
                        issuer,
                        format_time(ends_at)
                    ),
                )),
            ]),
            ActivateOutcome::AlreadyStarted { id, phase } => Ok(vec![Effect::Send(
                OutboundMessage::text(
                    invoker.chat_id,
                    format!("Competition {} is already {}.", id, phase),
                ),
            )]),
        }
    }

    /// Every callback yields exactly one `Answer` effect, first.
    async fn handle_callback(&self, query: &CallbackQuery) -> Vec<Effect> {
        let (chat_id, chat_kind, message_id) = match &query.message {
            Some(message) => (message.chat.id, message.chat.chat_kind(), Some(message.message_id)),
            None => (query.from.id, ChatKind::Private, None),
        };
        let invoker = Invoker {
            user_id: query.from.id,
            chat_id,
            chat_kind,
        };

        let Some(action) = query.data.as_deref().and_then(Action::parse) else {
            tracing::warn!("Unknown callback data {:?}", query.data);
            return vec![answer(query, Some("Unknown action".to_string()))];
        };

        let (toast, mut effects) = match self.run_action(&invoker, message_id, action).await {
            Ok(result) => result,
            Err(e) => {
                let text = error_text(&e);
                (
                    Some(text.clone()),
                    vec![Effect::Send(OutboundMessage::text(chat_id, text))],
                )
            }
        };

        effects.insert(0, answer(query, toast));
        effects
    }

    async fn run_action(
        &self,
        invoker: &Invoker,
        message_id: Option<i64>,
        action: Action,
    ) -> spendcomp_engine::Result<(Option<String>, Vec<Effect>)> {
        let edit_or_send = |text: String| match message_id {
            Some(message_id) => Effect::Edit {
                message_id,
                message: OutboundMessage::text(invoker.chat_id, text),
            },
            None => Effect::Send(OutboundMessage::text(invoker.chat_id, text)),
        };

        match action {
            Action::Setup(id) => match self.controller.begin_setup(invoker, &id).await? {
                SetupOutcome::Prompted { id, durations } => {
                    let menu = durations.into_iter().fold(
                        OutboundMessage::text(
                            private_chat(invoker),
                            format!("Choose competition duration for {}:", id),
                        ),
                        |menu, minutes| {
                            menu.with_button(
                                format!("{} minutes", minutes),
                                Action::Duration {
                                    minutes,
                                    id: id.clone(),
                                },
                            )
                        },
                    );
                    Ok((
                        None,
                        vec![
                            Effect::Send(menu),
                            edit_or_send("Setup sent to your private chat!".to_string()),
                        ],
                    ))
                }
                SetupOutcome::AlreadyConfigured { id, phase } => Ok((
                    Some(format!("Competition {} is already configured ({}).", id, phase)),
                    Vec::new(),
                )),
            },
            Action::Duration { minutes, id } => {
                match self.controller.select_duration(invoker, &id, minutes).await? {
                    DurationOutcome::Bound(binding) => Ok((
                        None,
                        vec![edit_or_send(format!(
                            "Competition ready!\n\n\
                             Duration: {} minutes\n\
                             Send at least {} XRP to the prize wallet (tag required):\n\n\
                             Address: {}\n\
                             Tag: {}\n\n\
                             Deposit window closes at {}.\n\
                             The START button appears as soon as the deposit is confirmed.",
                            binding.minutes,
                            binding.threshold,
                            binding.address,
                            binding.dest_tag,
                            format_time(binding.deposit_deadline)
                        ))],
                    )),
                    DurationOutcome::AlreadyConfigured { id, phase } => Ok((
                        Some(format!("Competition {} is already configured ({}).", id, phase)),
                        Vec::new(),
                    )),
                }
            }
            Action::Start(id) => Ok((None, self.start_effects(invoker, &id).await?)),
        }
    }
}

fn private_chat(invoker: &Invoker) -> ChatId {
    invoker.user_id
}

fn answer(query: &CallbackQuery, text: Option<String>) -> Effect {
    Effect::Answer {
        callback_id: query.id.clone(),
        text,
    }
}
