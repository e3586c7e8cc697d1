mod blocker;
mod executor;
mod fs_utils;
mod hooks;
mod layout;
mod process;
mod request;
mod runs;
mod site_files;

pub use blocker::{BlockKind, FileBlocker, SiteBlocker};
pub use executor::{
    ActionOutcome, AddonExecutor, AddonHooks, AddonTarget, BatchReport, CodeStore, HookOutput,
};
pub use hooks::{CommandHooks, GitCodeStore};
pub use layout::SiteLayout;
pub use process::{run_captured, run_streaming, CapturedOutput, CommandTemplate};
pub use request::{render_action_request, write_action_request};
pub use runs::{
    active_run, append_run_journal_entry, claim_active_run, clear_active_run,
    current_unix_timestamp, list_runs, read_run_journal, read_run_metadata, update_run_status,
    write_run_metadata, ActiveRun, RunJournal, RunJournalEntry, RunMetadata,
};
pub use site_files::{LocalSiteFiles, SiteFiles};

#[cfg(test)]
mod tests;
