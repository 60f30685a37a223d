/// Slash commands understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Digest,
    /// Raw argument; validated by the settings service.
    SetTime(String),
    SetCount(String),
    Tags,
    Stats,
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/digest - send a digest now
/settime HH:MM - daily digest time
/setcount N - articles per digest (1-50)
/tags - your strongest topics
/stats - what has been sent and liked
React with 👍 ❤ 🔥 on an article to see more like it.";

impl Command {
    /// `None` when the text is not a command at all.
    pub fn parse(text: &str) -> Option<Command> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (head, arg) = match rest.split_once(char::is_whitespace) {
            Some((head, arg)) => (head, arg.trim()),
            None => (rest, ""),
        };
        // `/digest@my_bot` in group chats
        let name = head.split('@').next().unwrap_or(head).to_lowercase();

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "digest" => Command::Digest,
            "settime" => Command::SetTime(arg.to_string()),
            "setcount" => Command::SetCount(arg.to_string()),
            "tags" => Command::Tags,
            "stats" => Command::Stats,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}
