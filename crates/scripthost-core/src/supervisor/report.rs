// ABOUTME: User-facing notice texts for supervisor outcomes.
// ABOUTME: Kept apart from the process logic so front ends and tests share the wording.

use crate::notify::Notice;
use crate::uid::Uid;

/// Shown when a script exits without printing anything.
pub const NO_OUTPUT: &str = "No output.";

pub(crate) fn file_missing(display_name: &str, uid: &Uid) -> Notice {
    Notice::text(format!(
        "❌ FATAL ERROR: File Not Found!\n\n\
         Could not find the file for {display_name} ({uid}).\n\
         This record is corrupt. Terminate this UID and host the file again."
    ))
}

pub(crate) fn already_tracked(display_name: &str, uid: &Uid) -> Notice {
    Notice::text(format!(
        "Error: Script {display_name} ({uid}) is already being tracked as Running."
    ))
}

pub(crate) fn spawn_failed(display_name: &str, uid: &Uid, reason: &str) -> Notice {
    Notice::with_main_keyboard(format!(
        "❌ An unexpected error occurred while running {display_name} ({uid}):\n{reason}"
    ))
}

pub(crate) fn execution_failed(display_name: &str, uid: &Uid, output: &str) -> Notice {
    Notice::with_main_keyboard(format!(
        "❌ Execution Failed!\n\n\
         Project {display_name} ({uid}) failed immediately upon start.\n\n\
         Error Output:\n{}",
        or_no_output(output)
    ))
}

pub(crate) fn execution_complete(display_name: &str, uid: &Uid, output: &str) -> Notice {
    Notice::with_main_keyboard(format!(
        "✅ Execution Complete!\n\n\
         Project {display_name} ({uid}) started and finished successfully.\n\n\
         Final Output:\n{}",
        or_no_output(output)
    ))
}

pub(crate) fn started(display_name: &str, uid: &Uid, initial_output: &str) -> Notice {
    let mut text = format!(
        "🚀 Started Successfully!\n\nProject {display_name} ({uid}) is now Running.\n\n"
    );
    if initial_output.is_empty() {
        text.push_str("Your bot is now online.");
    } else {
        text.push_str("Initial Output:\n");
        text.push_str(initial_output);
    }
    Notice::with_main_keyboard(text)
}

pub(crate) fn restarting_live(display_name: &str, uid: &Uid) -> Notice {
    Notice::text(format!(
        "🔄 Restarting Running script: {display_name} ({uid})..."
    ))
}

pub(crate) fn restarting_recovered(display_name: &str, uid: &Uid) -> Notice {
    Notice::text(format!(
        "▶️ Restarting previously running script: {display_name} ({uid})..."
    ))
}

pub(crate) fn starting(display_name: &str, uid: &Uid) -> Notice {
    Notice::text(format!("▶️ Starting script: {display_name} ({uid})..."))
}

/// Output text, or the placeholder when there was none.
pub fn or_no_output(output: &str) -> &str {
    if output.is_empty() {
        NO_OUTPUT
    } else {
        output
    }
}
