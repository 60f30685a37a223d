use super::{ReactionType, Update};

/// Inbound events the bot acts on, decoded once from raw updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Message(MessageEvent),
    Reaction(ReactionEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub chat_id: String,
    pub message_id: i64,
    pub text: String,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub chat_id: String,
    pub message_id: i64,
    /// Emojis present now that were not present before.
    pub added: Vec<String>,
}

/// `None` for anything the bot does not handle (edits, stickers, removed reactions, ...).
pub fn decode(update: Update) -> Option<InboundEvent> {
    if let Some(message) = update.message {
        let text = message.text.filter(|t| !t.trim().is_empty())?;
        return Some(InboundEvent::Message(MessageEvent {
            chat_id: message.chat.id.to_string(),
            message_id: message.message_id,
            text,
            sender: message
                .from
                .map(|u| u.username.unwrap_or_else(|| u.id.to_string())),
        }));
    }

    if let Some(reaction) = update.message_reaction {
        let old: Vec<&str> = reaction.old_reaction.iter().filter_map(emoji).collect();
        let added: Vec<String> = reaction
            .new_reaction
            .iter()
            .filter_map(emoji)
            .filter(|e| !old.contains(e))
            .map(str::to_string)
            .collect();
        if added.is_empty() {
            return None;
        }
        return Some(InboundEvent::Reaction(ReactionEvent {
            chat_id: reaction.chat.id.to_string(),
            message_id: reaction.message_id,
            added,
        }));
    }

    None
}

fn emoji(reaction: &ReactionType) -> Option<&str> {
    match reaction {
        ReactionType::Emoji { emoji } => Some(emoji.as_str()),
        _ => None,
    }
}
