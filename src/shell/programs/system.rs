//! Persistence and filesystem maintenance: save, fsck

use crate::kernel::users::ROOT;
use crate::shell::context::{CommandContext, CommandOutput, CommandResult};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::registry::{CommandSpec, Handler};
use crate::vfs::{SaveOutcome, fsck};
use futures::FutureExt;
use futures::future::LocalBoxFuture;

pub fn commands() -> Vec<CommandSpec> {
    vec![CommandSpec::new("save", "write all state to storage", Handler::Async(save)).args(0, Some(0))]
}

/// Loaded on first use of `fsck`
pub fn fsck_commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("fsck", "check the filesystem for inconsistencies", Handler::Sync(run_fsck))
            .usage("fsck [-r|--repair]")
            .flags([FlagDef::switch("repair", Some('r'))])
            .args(0, Some(0)),
    ]
}

fn save(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let outcome = ctx
            .deps
            .save()
            .await
            .map_err(|e| ExecError::io(e.to_string()))?;
        let text = match outcome {
            SaveOutcome::Saved => "State saved",
            SaveOutcome::Queued => "Save queued behind a running save",
        };
        Ok(CommandOutput::text(text))
    }
    .boxed_local()
}

fn run_fsck(ctx: &mut CommandContext) -> CommandResult {
    let repair = ctx.flag("repair");
    if repair && ctx.user != ROOT {
        return Err(ExecError::bad_args("Permission denied").with_suggestion("Run 'fsck --repair' as root (su root)"));
    }

    let report = {
        let users = ctx.deps.users.borrow();
        let user_exists = |name: &str| users.user_exists(name);
        let group_exists = |name: &str| users.group_exists(name);
        fsck::check(&mut ctx.deps.fs.borrow_mut(), &user_exists, &group_exists, repair)
    };

    let mut lines: Vec<String> = report.issues.iter().map(ToString::to_string).collect();
    lines.push(format!(
        "{} nodes checked, {} issues found, {} repaired",
        report.scanned,
        report.issues.len(),
        report.repaired
    ));
    let unresolved = report.issues.len() > report.repaired;
    log::info!(
        "fsck: {} issues, {} repaired",
        report.issues.len(),
        report.repaired
    );

    let out = CommandOutput::text(lines.join("\n")).with_code(if unresolved { 1 } else { 0 });
    Ok(if report.repaired > 0 { out.modified() } else { out })
}
