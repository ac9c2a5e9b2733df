// ABOUTME: Parses and executes the bot's slash commands.
// ABOUTME: Script management for approved users plus owner-only approval administration.

use crate::bridge::HostState;
use crate::error::Result;
use chrono::Duration;
use scripthost_core::admission::format_expiry;
use scripthost_core::{
    parse_duration, AdmissionError, NameResolver, PauseOutcome, ScriptListing, ScriptStatus,
    SupervisorError, Uid, UserId,
};
use tracing::info;

/// A duration argument as typed and as parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurationArg {
    pub raw: String,
    pub value: Duration,
}

/// Parsed command from a `/command args` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// /help, /start, /menu
    Help,
    /// /scripts: list the caller's scripts
    Scripts,
    /// /host <name>: caption of an uploaded script document
    Host(String),
    Pause(Uid),
    Restart(Uid),
    /// /terminate <uid>: stop and permanently delete
    Terminate(Uid),
    Rename(Uid, String),
    Approve {
        user_id: UserId,
        duration: DurationArg,
        max_scripts: u32,
    },
    Revoke(UserId),
    RenewTime {
        user_id: UserId,
        duration: DurationArg,
    },
    RenewQuota {
        user_id: UserId,
        max_scripts: u32,
    },
    /// /approved: list approvals
    Approved,
    /// /user_scripts <user>: list another user's scripts
    UserScripts(UserId),
    /// Recognized command with bad arguments, carrying the reason.
    Invalid(String),
    /// Unknown command with the unrecognized text.
    Unknown(String),
}

impl Command {
    /// Parse command text with the leading `/` already stripped.
    pub fn parse(text: &str) -> Command {
        let text = text.trim();
        if text.is_empty() {
            return Command::Help;
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        // Group chats address commands as /name@botname
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match name.as_str() {
            "help" | "start" | "menu" => Command::Help,
            "scripts" => Command::Scripts,
            "approved" => Command::Approved,
            "host" => {
                if rest.is_empty() {
                    Command::Invalid(
                        "host requires a name (send the script as a document captioned /host <name>)"
                            .to_string(),
                    )
                } else {
                    Command::Host(rest.to_string())
                }
            }
            "pause" => parse_uid(&args, "pause").map_or_else(|e| e, Command::Pause),
            "restart" => parse_uid(&args, "restart").map_or_else(|e| e, Command::Restart),
            "terminate" => parse_uid(&args, "terminate").map_or_else(|e| e, Command::Terminate),
            "rename" => match rest.split_once(char::is_whitespace) {
                Some((uid, new_name)) if !new_name.trim().is_empty() => match Uid::parse(uid) {
                    Ok(uid) => Command::Rename(uid, new_name.trim().to_string()),
                    Err(e) => Command::Invalid(e.to_string()),
                },
                _ => Command::Invalid("rename requires a uid and a new name".to_string()),
            },
            "approve" => {
                if args.len() != 3 {
                    return Command::Invalid(
                        "approve requires <user-id> <duration> <max-scripts>, e.g. /approve 123456789 7d 2"
                            .to_string(),
                    );
                }
                match (
                    parse_user_id(args[0]),
                    parse_duration_arg(args[1]),
                    parse_max_scripts(args[2]),
                ) {
                    (Ok(user_id), Ok(duration), Ok(max_scripts)) => Command::Approve {
                        user_id,
                        duration,
                        max_scripts,
                    },
                    (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => e,
                }
            }
            "revoke" => match args.as_slice() {
                [user] => parse_user_id(user).map_or_else(|e| e, Command::Revoke),
                _ => Command::Invalid("revoke requires a user id".to_string()),
            },
            "renew_time" => match args.as_slice() {
                [user, duration] => match (parse_user_id(user), parse_duration_arg(duration)) {
                    (Ok(user_id), Ok(duration)) => Command::RenewTime { user_id, duration },
                    (Err(e), _) | (_, Err(e)) => e,
                },
                _ => Command::Invalid(
                    "renew_time requires <user-id> <duration>, e.g. /renew_time 123456789 2w"
                        .to_string(),
                ),
            },
            "renew_quota" => match args.as_slice() {
                [user, max] => match (parse_user_id(user), parse_max_scripts(max)) {
                    (Ok(user_id), Ok(max_scripts)) => Command::RenewQuota {
                        user_id,
                        max_scripts,
                    },
                    (Err(e), _) | (_, Err(e)) => e,
                },
                _ => Command::Invalid("renew_quota requires <user-id> <max-scripts>".to_string()),
            },
            "user_scripts" => match args.as_slice() {
                [user] => parse_user_id(user).map_or_else(|e| e, Command::UserScripts),
                _ => Command::Invalid("user_scripts requires a user id".to_string()),
            },
            other => Command::Unknown(other.to_string()),
        }
    }

    /// Parse from raw message text that includes the `/` prefix.
    pub fn from_message(text: &str) -> Option<Command> {
        let rest = text.trim().strip_prefix('/')?;
        Some(Self::parse(rest))
    }

    /// Commands only the owner may run.
    pub fn is_owner_only(&self) -> bool {
        matches!(
            self,
            Command::Approve { .. }
                | Command::Revoke(_)
                | Command::RenewTime { .. }
                | Command::RenewQuota { .. }
                | Command::Approved
                | Command::UserScripts(_)
        )
    }
}

fn parse_uid(args: &[&str], command: &str) -> std::result::Result<Uid, Command> {
    match args {
        [uid] => Uid::parse(uid).map_err(|e| Command::Invalid(e.to_string())),
        _ => Err(Command::Invalid(format!("{command} requires a script uid"))),
    }
}

fn parse_user_id(raw: &str) -> std::result::Result<UserId, Command> {
    match raw.parse::<UserId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(Command::Invalid(format!("Invalid user id: {raw}"))),
    }
}

fn parse_duration_arg(raw: &str) -> std::result::Result<DurationArg, Command> {
    parse_duration(raw)
        .map(|value| DurationArg {
            raw: raw.to_string(),
            value,
        })
        .ok_or_else(|| {
            Command::Invalid(format!(
                "Invalid duration {raw:?}. Use m, h, d or w (e.g. 30m, 7h, 3d, 1w)"
            ))
        })
}

fn parse_max_scripts(raw: &str) -> std::result::Result<u32, Command> {
    match raw.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Command::Invalid(
            "Max scripts must be a positive number".to_string(),
        )),
    }
}

/// Context required for executing commands.
pub struct CommandContext<'a> {
    pub state: &'a mut HostState,
    pub user_id: UserId,
    pub resolver: &'a dyn NameResolver,
    /// Bytes of the document the command was attached to
    pub upload: Option<Vec<u8>>,
}

/// Execute a command and return the reply, if any. Start results are
/// delivered by the supervisor's notifier, so some commands reply nothing.
pub async fn execute_command(command: Command, ctx: CommandContext<'_>) -> Result<Option<String>> {
    let CommandContext {
        state,
        user_id,
        resolver,
        upload,
    } = ctx;
    let is_owner = state.admission.is_owner(user_id);

    if command.is_owner_only() && !is_owner {
        info!(user_id, ?command, "Ignoring owner-only command");
        return Ok(None);
    }

    match command {
        Command::Help => Ok(Some(help_text(is_owner))),

        Command::Scripts => {
            let listing = state.supervisor.list(user_id).await?;
            Ok(Some(format_listing("Your Saved Scripts", &listing)))
        }

        Command::Host(name) => {
            let Some(contents) = upload else {
                return Ok(Some(
                    "Send the script as a document with the caption /host <name>.".to_string(),
                ));
            };
            match state
                .admission
                .admit_new_script(user_id, state.supervisor.registry())
            {
                Ok(()) => {}
                Err(AdmissionError::QuotaExceeded {
                    hosted,
                    max_scripts,
                    ..
                }) => {
                    return Ok(Some(format!(
                        "❌ Hosting Limit Reached!\nYou are currently hosting {hosted} scripts (Limit: {max_scripts}). \
                         Terminate an existing script before hosting a new one."
                    )));
                }
                Err(e) => return Err(e.into()),
            }

            match state.supervisor.host(user_id, &name, &contents, false).await {
                Ok((uid, _)) => {
                    info!(user_id, uid = %uid, "Hosted script from upload");
                    Ok(None)
                }
                Err(SupervisorError::EmptyName) => {
                    Ok(Some("File name cannot be empty. Provide a name.".to_string()))
                }
                Err(e) if e.reported_by_start() => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        Command::Pause(uid) => {
            let Some(name) = display_name(state, user_id, &uid) else {
                return Ok(Some(not_found(&uid)));
            };
            match state.supervisor.pause(user_id, &uid).await {
                Ok(PauseOutcome::Paused) => Ok(Some(format!(
                    "⏸️ Successfully Paused!\n\nScript {name} ({uid}) has been stopped temporarily."
                ))),
                Ok(PauseOutcome::PausedUntracked) => Ok(Some(format!(
                    "⚠️ Script {name} ({uid}) was marked as Running but was not found in active processes. \
                     Status updated to Paused."
                ))),
                Err(SupervisorError::NotRunning { .. }) => Ok(Some(format!(
                    "ℹ️ Script {name} ({uid}) is already Paused, Stopped or in an Error state."
                ))),
                Err(e) => Err(e.into()),
            }
        }

        Command::Restart(uid) => {
            let Some(name) = display_name(state, user_id, &uid) else {
                return Ok(Some(not_found(&uid)));
            };
            match state.supervisor.restart(user_id, &uid, false).await {
                Ok(_) => Ok(None),
                Err(SupervisorError::UnknownStatusOnRestart { status, .. }) => Ok(Some(format!(
                    "❌ Script {name} ({uid}) is in an unknown state: {status}. Cannot restart."
                ))),
                Err(e) if e.reported_by_start() => Ok(None),
                Err(e) => Err(e.into()),
            }
        }

        Command::Terminate(uid) => {
            if display_name(state, user_id, &uid).is_none() {
                return Ok(Some(not_found(&uid)));
            }
            let record = state.supervisor.terminate_and_delete(user_id, &uid).await?;
            Ok(Some(format!(
                "🗑️ Successfully Terminated!\n\nScript {} ({uid}) has been stopped, and the file has been \
                 permanently deleted from the host.",
                record.display_name
            )))
        }

        Command::Rename(uid, new_name) => {
            if display_name(state, user_id, &uid).is_none() {
                return Ok(Some(not_found(&uid)));
            }
            state.supervisor.rename(user_id, &uid, &new_name)?;
            Ok(Some(format!(
                "✅ Success! File {uid}'s name has been updated to '{}'.",
                new_name.trim()
            )))
        }

        Command::Approve {
            user_id: target,
            duration,
            max_scripts,
        } => match state
            .admission
            .approve(target, duration.value, max_scripts, resolver)
            .await
        {
            Ok(record) => Ok(Some(format!(
                "✅ {} ({target}) approved successfully!\nExpires: {}\nMax Scripts: {}",
                record.name,
                format_expiry(record.expires_at()),
                record.max_scripts
            ))),
            Err(AdmissionError::OwnerImmutable) => {
                Ok(Some("ℹ️ No need to approve the owner.".to_string()))
            }
            Err(e) => Err(e.into()),
        },

        Command::Revoke(target) => {
            match state.admission.revoke(target, &mut state.supervisor).await {
                Ok(revocation) => Ok(Some(format!(
                    "🗑️ {} ({target}) access revoked.\n{} script(s) have been terminated and deleted.",
                    revocation.name, revocation.terminated
                ))),
                Err(AdmissionError::OwnerImmutable) => {
                    Ok(Some("Cannot unapprove the owner.".to_string()))
                }
                Err(AdmissionError::NotApproved(_)) => {
                    Ok(Some(format!("❌ User ID {target} was not approved.")))
                }
                Err(e) => Err(e.into()),
            }
        }

        Command::RenewTime {
            user_id: target,
            duration,
        } => match state.admission.renew_time(target, duration.value) {
            Ok(record) => Ok(Some(format!(
                "✅ Time Access Renewed!\n\nAccess for {} ({target}) extended by {}.\nNew Expiry: {}",
                record.name,
                duration.raw,
                format_expiry(record.expires_at())
            ))),
            Err(AdmissionError::NotApproved(_)) => Ok(Some(not_approved(target))),
            Err(e) => Err(e.into()),
        },

        Command::RenewQuota {
            user_id: target,
            max_scripts,
        } => {
            let hosted = state.supervisor.registry().hosted_count(target);
            match state.admission.renew_quota(target, max_scripts, hosted) {
                Ok(record) => Ok(Some(format!(
                    "✅ Script Access Renewed!\n\nMax Scripts limit for {} ({target}) updated to {}.",
                    record.name, record.max_scripts
                ))),
                Err(AdmissionError::QuotaBelowHosted { hosted, .. }) => Ok(Some(format!(
                    "❌ Cannot set Max Scripts to {max_scripts}. User is currently hosting {hosted} scripts. \
                     Limit must be {hosted} or more."
                ))),
                Err(AdmissionError::NotApproved(_)) => Ok(Some(not_approved(target))),
                Err(e) => Err(e.into()),
            }
        }

        Command::Approved => {
            let mut entries = state.admission.approvals();
            if entries.is_empty() {
                return Ok(Some("ℹ️ No users are currently approved.".to_string()));
            }
            entries.sort_by(|a, b| a.record.expiry.total_cmp(&b.record.expiry));

            let mut response = String::from("📑 Approved Users:\n\n");
            for (i, entry) in entries.iter().enumerate() {
                let status = if entry.expired {
                    "🔴 Expired".to_string()
                } else {
                    format!("✅ Expires: {}", format_expiry(entry.record.expires_at()))
                };
                response.push_str(&format!(
                    "{}. {} ({})\n   Scripts Limit: {} | {}\n",
                    i + 1,
                    entry.record.name,
                    entry.user_id,
                    entry.record.max_scripts,
                    status
                ));
            }
            Ok(Some(response))
        }

        Command::UserScripts(target) => {
            let name = state
                .admission
                .approval(target)
                .map(|record| record.name.clone())
                .unwrap_or_else(|| format!("User {target}"));
            let listing = state.supervisor.list(target).await?;
            Ok(Some(format_listing(
                &format!("{name}'s Saved Scripts"),
                &listing,
            )))
        }

        Command::Invalid(reason) => Ok(Some(format!("❌ {reason}"))),

        Command::Unknown(cmd) => Ok(Some(format!(
            "❓ Unknown command: {cmd}\nUse /help for available commands."
        ))),
    }
}

fn display_name(state: &HostState, user_id: UserId, uid: &Uid) -> Option<String> {
    state
        .supervisor
        .registry()
        .script(user_id, uid)
        .map(|record| record.display_name.clone())
}

fn not_found(uid: &Uid) -> String {
    format!("❌ UID {uid} was not found in your saved scripts.")
}

fn not_approved(user_id: UserId) -> String {
    format!("❌ User ID {user_id} is not currently approved.")
}

fn status_icon(entry: &ScriptListing) -> &'static str {
    if entry.live {
        return "🟢";
    }
    match entry.status {
        ScriptStatus::Running => "🟢",
        ScriptStatus::Paused => "⏸️",
        _ => "⚪",
    }
}

/// Render a script listing under a title.
pub fn format_listing(title: &str, listing: &[ScriptListing]) -> String {
    let mut text = format!("📑 {title}:\n\n");
    if listing.is_empty() {
        text.push_str("No files are currently saved or hosted.");
        return text;
    }
    for entry in listing {
        text.push_str(&format!(
            "{} {} | {} ({})\n",
            status_icon(entry),
            entry.uid,
            entry.display_name,
            entry.status
        ));
    }
    text
}

fn help_text(is_owner: bool) -> String {
    let mut text = String::from(
        "📖 Script Host Commands:\n\n\
         • Send a script as a document captioned /host <name> to host it\n\
         • /scripts - List your scripts\n\
         • /pause <uid> - Stop a script temporarily\n\
         • /restart <uid> - Restart or resume a script\n\
         • /terminate <uid> - Stop and permanently delete a script\n\
         • /rename <uid> <name> - Change a script's display name\n\
         • /help - Show this help message\n",
    );
    if is_owner {
        text.push_str(
            "\n👑 Owner Commands:\n\n\
             • /approve <user-id> <duration> <max-scripts> - Grant access (e.g. 7d 2)\n\
             • /revoke <user-id> - Remove access and delete all their scripts\n\
             • /renew_time <user-id> <duration> - Extend access\n\
             • /renew_quota <user-id> <max-scripts> - Change the script limit\n\
             • /approved - List approved users\n\
             • /user_scripts <user-id> - List a user's scripts\n",
        );
    }
    text
}
