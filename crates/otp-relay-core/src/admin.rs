//! Admin command surface: parse chat commands and run them against the store.
//!
//! Parsing produces a validated [`AdminCommand`] before anything touches the store.
//! Replies are Telegram HTML; every piece of user-supplied text is escaped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::{
    config::check_link_url,
    domain::{Destination, DestinationId, UserId},
    errors::Error,
    fanout::ButtonDefaults,
    formatting::escape_html,
    store::{destinations_or_empty, ConfigStore, DestinationPatch},
    worker::WorkerStatus,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Help,
    Id,
    /// `None` id means the chat the command was sent in.
    Add {
        id: Option<DestinationId>,
        button: Option<(String, String)>,
    },
    Remove(DestinationId),
    List,
    SetButton {
        id: DestinationId,
        label: String,
        url: String,
    },
    ClearButton(DestinationId),
    Enable(DestinationId),
    Disable(DestinationId),
    AddAdmin(UserId),
    RemoveAdmin(UserId),
    Admins,
    Status,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("not a command")]
    NotACommand,

    #[error("unknown command: /{0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unbalanced quote in arguments")]
    UnbalancedQuote,

    #[error("invalid destination id: {0}")]
    InvalidDestination(String),

    #[error("invalid user id: {0}")]
    InvalidUser(String),

    #[error("invalid button url: {0}")]
    InvalidUrl(String),
}

impl AdminCommand {
    /// Parse `/cmd[@bot] args...`. Double-quoted arguments may contain spaces.
    pub fn parse(text: &str) -> std::result::Result<Self, CommandParseError> {
        let text = text.trim();
        let Some(rest) = text.strip_prefix('/') else {
            return Err(CommandParseError::NotACommand);
        };

        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args),
            None => (rest, ""),
        };
        // Telegram may send `/cmd@botname arg1 ...`
        let name = head.split('@').next().unwrap_or("").to_lowercase();
        let args = tokenize(args)?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let cmd = match name.as_str() {
            "start" | "help" => AdminCommand::Help,
            "id" => AdminCommand::Id,
            "add" => match args.as_slice() {
                [] => AdminCommand::Add { id: None, button: None },
                [id] => AdminCommand::Add {
                    id: Some(destination(id)?),
                    button: None,
                },
                [label, url] => AdminCommand::Add {
                    id: None,
                    button: Some(button(label, url)?),
                },
                [id, label, url] => AdminCommand::Add {
                    id: Some(destination(id)?),
                    button: Some(button(label, url)?),
                },
                _ => return Err(CommandParseError::Usage(ADD_USAGE)),
            },
            "remove" => AdminCommand::Remove(single_destination(&args, "/remove <id>")?),
            "list" => AdminCommand::List,
            "setbutton" => match args.as_slice() {
                [id, label, url] => {
                    let (label, url) = button(label, url)?;
                    AdminCommand::SetButton {
                        id: destination(id)?,
                        label,
                        url,
                    }
                }
                _ => return Err(CommandParseError::Usage(SETBUTTON_USAGE)),
            },
            "clearbutton" => {
                AdminCommand::ClearButton(single_destination(&args, "/clearbutton <id>")?)
            }
            "enable" => AdminCommand::Enable(single_destination(&args, "/enable <id>")?),
            "disable" => AdminCommand::Disable(single_destination(&args, "/disable <id>")?),
            "addadmin" => AdminCommand::AddAdmin(single_user(&args, "/addadmin <user_id>")?),
            "removeadmin" => {
                AdminCommand::RemoveAdmin(single_user(&args, "/removeadmin <user_id>")?)
            }
            "admins" => AdminCommand::Admins,
            "status" | "stats" => AdminCommand::Status,
            other => return Err(CommandParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }

    fn owner_only(&self) -> bool {
        matches!(self, AdminCommand::AddAdmin(_) | AdminCommand::RemoveAdmin(_))
    }
}

const ADD_USAGE: &str = "/add [id] [\"label\" url]";
const SETBUTTON_USAGE: &str = "/setbutton <id> \"label\" <url>";

/// Split on whitespace, keeping `"quoted text"` together. Accepts the curly quotes
/// mobile keyboards substitute for `"`.
fn tokenize(args: &str) -> std::result::Result<Vec<String>, CommandParseError> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut had_quotes = false;

    for c in args.chars() {
        match c {
            '"' | '\u{201C}' | '\u{201D}' => {
                in_quotes = !in_quotes;
                had_quotes = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() || had_quotes {
                    out.push(std::mem::take(&mut cur));
                }
                had_quotes = false;
            }
            c => cur.push(c),
        }
    }
    if in_quotes {
        return Err(CommandParseError::UnbalancedQuote);
    }
    if !cur.is_empty() || had_quotes {
        out.push(cur);
    }
    Ok(out)
}

fn destination(raw: &str) -> std::result::Result<DestinationId, CommandParseError> {
    let id = DestinationId::parse(raw)
        .map_err(|_| CommandParseError::InvalidDestination(raw.to_string()))?;
    let s = id.as_str();
    let numeric = s.parse::<i64>().is_ok();
    let channel = s.len() > 1 && s.starts_with('@');
    if !numeric && !channel {
        return Err(CommandParseError::InvalidDestination(raw.to_string()));
    }
    Ok(id)
}

fn single_destination(
    args: &[&str],
    usage: &'static str,
) -> std::result::Result<DestinationId, CommandParseError> {
    match args {
        [id] => destination(id),
        _ => Err(CommandParseError::Usage(usage)),
    }
}

fn single_user(args: &[&str], usage: &'static str) -> std::result::Result<UserId, CommandParseError> {
    match args {
        [raw] => raw
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| CommandParseError::InvalidUser(raw.to_string())),
        _ => Err(CommandParseError::Usage(usage)),
    }
}

fn button(label: &str, url: &str) -> std::result::Result<(String, String), CommandParseError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(CommandParseError::Usage(SETBUTTON_USAGE));
    }
    check_link_url(url)
        .map_err(|reason| CommandParseError::InvalidUrl(format!("{url} {reason}")))?;
    Ok((label.to_string(), url.trim().to_string()))
}

const HELP: &str = "🤖 <b>OTP Relay</b>\n\n\
<b>Destinations</b>\n\
/add [id] [\"label\" url] - Add a destination (no id = this chat)\n\
/remove &lt;id&gt; - Remove a destination\n\
/list - List destinations and counters\n\
/setbutton &lt;id&gt; \"label\" &lt;url&gt; - Set the button\n\
/clearbutton &lt;id&gt; - Use the default button\n\
/enable &lt;id&gt;, /disable &lt;id&gt; - Toggle forwarding\n\n\
<b>Admins</b>\n\
/admins - List admins\n\
/addadmin &lt;user_id&gt; - Owner only\n\
/removeadmin &lt;user_id&gt; - Owner only\n\n\
/status - Worker status\n\
/id - Show chat and user ids";

const STORAGE_FAILURE: &str = "❌ Storage is unavailable right now. Try again later.";

/// What happened when the bot was added to a chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Discovery {
    Added,
    /// Already configured; left untouched so admin-set buttons survive.
    AlreadyKnown,
    Unauthorized,
    Failed,
}

/// Runs admin commands against the injected store.
pub struct AdminConsole {
    store: Arc<dyn ConfigStore>,
    status: Arc<WorkerStatus>,
    defaults: ButtonDefaults,
}

impl AdminConsole {
    pub fn new(store: Arc<dyn ConfigStore>, status: Arc<WorkerStatus>, defaults: ButtonDefaults) -> Self {
        Self {
            store,
            status,
            defaults,
        }
    }

    /// Handle raw message text. `None` means "stay silent": not a command, an unknown
    /// command, or a malformed command from someone who is not an admin.
    pub async fn handle(&self, caller: UserId, chat: &DestinationId, text: &str) -> Option<String> {
        match AdminCommand::parse(text) {
            Ok(cmd) => Some(self.execute(caller, chat, cmd).await),
            Err(CommandParseError::NotACommand | CommandParseError::Unknown(_)) => None,
            Err(e) => {
                if !self.store.is_authorized(caller).await {
                    return None;
                }
                Some(format!("⚠️ {}", escape_html(&e.to_string())))
            }
        }
    }

    pub async fn execute(&self, caller: UserId, chat: &DestinationId, cmd: AdminCommand) -> String {
        if cmd == AdminCommand::Id {
            return id_reply(caller, chat);
        }
        if !self.store.is_authorized(caller).await {
            warn!(user = %caller, "unauthorized admin command");
            return "⛔ You are not authorized to use this bot.".to_string();
        }
        if cmd.owner_only() && caller != self.store.owner() {
            return "⛔ Only the owner can manage admins.".to_string();
        }

        match self.run(caller, chat, cmd).await {
            Ok(reply) => reply,
            Err(Error::Validation(m) | Error::Forbidden(m)) => format!("⚠️ {}", escape_html(&m)),
            Err(e) => {
                warn!(user = %caller, error = %e, "admin command failed");
                STORAGE_FAILURE.to_string()
            }
        }
    }

    async fn run(&self, caller: UserId, chat: &DestinationId, cmd: AdminCommand) -> Result<String> {
        match cmd {
            AdminCommand::Help => Ok(HELP.to_string()),
            AdminCommand::Id => Ok(id_reply(caller, chat)),

            AdminCommand::Add { id, button } => {
                let id = id.unwrap_or_else(|| chat.clone());
                let patch = DestinationPatch {
                    button: button.map(Some),
                    enabled: Some(true),
                };
                if !self.store.update_destination(&id, &patch).await? {
                    let mut dest = Destination::new(id.clone());
                    patch.apply(&mut dest);
                    if !self.store.insert_destination(dest).await? {
                        // Created by another writer in between.
                        self.store.update_destination(&id, &patch).await?;
                    }
                }
                info!(user = %caller, destination = %id, "destination saved");
                Ok(format!("✅ Destination <code>{}</code> saved.", escape_html(id.as_str())))
            }

            AdminCommand::Remove(id) => {
                let removed = self.store.remove_destination(&id).await?;
                let id = escape_html(id.as_str());
                if removed {
                    info!(user = %caller, destination = %id, "destination removed");
                    Ok(format!("🗑 Destination <code>{id}</code> removed."))
                } else {
                    Ok(format!("Destination <code>{id}</code> was not configured."))
                }
            }

            AdminCommand::List => Ok(self.render_list().await),

            AdminCommand::SetButton { id, label, url } => {
                let patch = DestinationPatch {
                    button: Some(Some((label, url))),
                    ..Default::default()
                };
                self.edit(&id, patch).await
            }
            AdminCommand::ClearButton(id) => {
                let patch = DestinationPatch {
                    button: Some(None),
                    ..Default::default()
                };
                self.edit(&id, patch).await
            }
            AdminCommand::Enable(id) => {
                let patch = DestinationPatch {
                    enabled: Some(true),
                    ..Default::default()
                };
                self.edit(&id, patch).await
            }
            AdminCommand::Disable(id) => {
                let patch = DestinationPatch {
                    enabled: Some(false),
                    ..Default::default()
                };
                self.edit(&id, patch).await
            }

            AdminCommand::AddAdmin(user) => {
                if user == self.store.owner() {
                    return Ok("That user is the owner.".to_string());
                }
                self.store.add_admin(user).await?;
                info!(owner = %caller, admin = %user, "admin added");
                Ok(format!("✅ <code>{user}</code> is now an admin."))
            }
            AdminCommand::RemoveAdmin(user) => {
                if self.store.remove_admin(user).await? {
                    info!(owner = %caller, admin = %user, "admin removed");
                    Ok(format!("🗑 <code>{user}</code> is no longer an admin."))
                } else {
                    Ok(format!("<code>{user}</code> was not an admin."))
                }
            }
            AdminCommand::Admins => {
                let owner = self.store.owner();
                let admins = match self.store.list_admins().await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "admin roster unavailable");
                        vec![owner]
                    }
                };
                let mut lines = vec!["👥 <b>Admins</b>".to_string()];
                for a in admins {
                    let tag = if a == owner { " (owner)" } else { "" };
                    lines.push(format!("• <code>{a}</code>{tag}"));
                }
                Ok(lines.join("\n"))
            }

            AdminCommand::Status => Ok(self.render_status().await),
        }
    }

    /// The bot was added to `chat` by `adder`. Authorized additions register the chat
    /// as an enabled destination unless it is already configured.
    pub async fn on_added_to_chat(
        &self,
        adder: UserId,
        chat: DestinationId,
        title: Option<String>,
    ) -> Discovery {
        if !self.store.is_authorized(adder).await {
            info!(user = %adder, destination = %chat, "added to chat by non-admin, ignoring");
            return Discovery::Unauthorized;
        }
        match self.register_discovered(&chat, title).await {
            Ok(outcome) => {
                info!(user = %adder, destination = %chat, ?outcome, "chat membership discovered");
                outcome
            }
            Err(e) => {
                warn!(destination = %chat, error = %e, "failed to register discovered chat");
                Discovery::Failed
            }
        }
    }

    async fn register_discovered(&self, chat: &DestinationId, title: Option<String>) -> Result<Discovery> {
        let dest = Destination::new(chat.clone()).with_title(title);
        if self.store.insert_destination(dest).await? {
            Ok(Discovery::Added)
        } else {
            Ok(Discovery::AlreadyKnown)
        }
    }

    /// Patch one existing destination. A destination removed meanwhile stays removed.
    async fn edit(&self, id: &DestinationId, patch: DestinationPatch) -> Result<String> {
        if !self.store.update_destination(id, &patch).await? {
            return Err(Error::Validation(format!(
                "destination {id} is not configured, /add it first"
            )));
        }
        Ok(format!("✅ Destination <code>{}</code> updated.", escape_html(id.as_str())))
    }

    async fn render_list(&self) -> String {
        let dests = destinations_or_empty(self.store.as_ref()).await;
        if dests.is_empty() {
            return "📭 No destinations configured.".to_string();
        }

        let mut lines = vec![format!("📋 <b>Destinations ({})</b>", dests.len())];
        for d in &dests {
            let state = if d.enabled { "🟢" } else { "⚪" };
            let title = d
                .title
                .as_deref()
                .map(|t| format!(" {}", escape_html(t)))
                .unwrap_or_default();
            lines.push(format!(
                "\n{state} <code>{}</code>{title}\n   Sent: {}",
                escape_html(d.id.as_str()),
                d.message_count
            ));
            match self.defaults.resolve(d) {
                Some(b) => lines.push(format!(
                    "   Button: {} → {}",
                    escape_html(&b.label),
                    escape_html(&b.url)
                )),
                None => lines.push("   Button: none".to_string()),
            }
        }
        lines.join("\n")
    }

    async fn render_status(&self) -> String {
        let st = self.status.snapshot().await;
        let dests = destinations_or_empty(self.store.as_ref()).await;
        let enabled = dests.iter().filter(|d| d.enabled).count();
        let total_sent: u64 = dests.iter().map(|d| d.message_count).sum();

        let mut lines = vec!["📊 <b>Relay Status</b>\n".to_string()];
        lines.push(format!("Worker: {:?}", st.phase));
        if let Some(started) = st.started_at {
            let up = (Utc::now() - started).num_seconds();
            lines.push(format!("Uptime: {}", format_duration(up)));
        }
        lines.push(format!("Cycles: {}", st.cycles));
        lines.push(format!(
            "Events: {} seen, {} forwarded, {} duplicates, {} filtered",
            st.events_seen, st.events_forwarded, st.duplicates_skipped, st.filtered_out
        ));
        if let Some(at) = st.last_forwarded_at {
            lines.push(format!("Last forward: {}", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        if let Some(last) = &st.last_delivery {
            lines.push(format!(
                "Last delivery: {}/{} ok, {} failed",
                last.delivered, last.attempted, last.failed
            ));
        }
        lines.push(format!(
            "\nDestinations: {} ({} enabled)\nTotal sent: {}",
            dests.len(),
            enabled,
            total_sent
        ));
        lines.join("\n")
    }
}

fn id_reply(caller: UserId, chat: &DestinationId) -> String {
    format!(
        "🆔 Chat: <code>{}</code>\n👤 You: <code>{caller}</code>",
        escape_html(chat.as_str())
    )
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        return format!("{hours}h {mins}m {secs}s");
    }
    if mins > 0 {
        return format!("{mins}m {secs}s");
    }
    format!("{secs}s")
}
