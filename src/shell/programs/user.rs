//! Accounts and sessions: whoami, su, logout, login, user and group administration

use super::require_root;
use crate::kernel::users::{ROOT, SessionError};
use crate::shell::context::{CommandContext, CommandOutput, CommandResult};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::modal::ModalRequest;
use crate::shell::registry::{CommandSpec, CompletionKind, Handler};
use crate::vfs::{Access, DeleteOptions, Vfs};
use futures::FutureExt;
use futures::future::LocalBoxFuture;

pub fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("whoami", "print the current user", Handler::Sync(whoami)).args(0, Some(0)),
        CommandSpec::new("su", "start a session as another user", Handler::Async(su))
            .usage("su [USER]")
            .args(0, Some(1))
            .complete(CompletionKind::Users),
        CommandSpec::new("logout", "return to the previous session", Handler::Sync(logout)).args(0, Some(0)),
        CommandSpec::new("login", "replace all sessions with a new login", Handler::Async(login))
            .usage("login USER")
            .args(1, Some(1))
            .complete(CompletionKind::Users),
        CommandSpec::new("useradd", "create a user", Handler::Sync(useradd))
            .usage("useradd [-p PASSWORD] [-g GROUP] USER")
            .flags([FlagDef::value("password", Some('p')), FlagDef::value("group", Some('g'))])
            .args(1, Some(1)),
        CommandSpec::new("userdel", "delete a user", Handler::Sync(userdel))
            .usage("userdel [-r] USER")
            .flags([FlagDef::switch("remove", Some('r'))])
            .args(1, Some(1))
            .complete(CompletionKind::Users),
        CommandSpec::new("passwd", "change a password", Handler::Async(passwd))
            .usage("passwd [USER]")
            .args(0, Some(1))
            .complete(CompletionKind::Users),
        CommandSpec::new("groupadd", "create a group", Handler::Sync(groupadd))
            .usage("groupadd GROUP")
            .args(1, Some(1)),
        CommandSpec::new("groupdel", "delete a group", Handler::Sync(groupdel))
            .usage("groupdel GROUP")
            .args(1, Some(1)),
        CommandSpec::new("usermod", "change group membership", Handler::Sync(usermod))
            .usage("usermod [-g GROUP] [-a] [-G GROUP,...] USER")
            .flags([
                FlagDef::value("gid", Some('g')),
                FlagDef::value("groups", Some('G')),
                FlagDef::switch("append", Some('a')),
            ])
            .args(1, Some(1))
            .complete(CompletionKind::Users),
        CommandSpec::new("groups", "print group memberships", Handler::Sync(groups))
            .usage("groups [USER]")
            .args(0, Some(1))
            .complete(CompletionKind::Users),
    ]
}

fn whoami(ctx: &mut CommandContext) -> CommandResult {
    Ok(CommandOutput::text(ctx.user.clone()))
}

async fn ask(ctx: &CommandContext, prompt: &str) -> Result<String, ExecError> {
    let answer = ctx.deps.modal.prompt(ModalRequest::obscured(prompt)).await;
    ctx.control().check()?;
    answer
        .value()
        .map(str::to_string)
        .ok_or_else(ExecError::cancelled)
}

/// Root never needs a password, and neither does a passwordless account
async fn authorize(ctx: &CommandContext, target: &str) -> Result<(), ExecError> {
    let needs_password = {
        let users = ctx.deps.users.borrow();
        if !users.user_exists(target) {
            return Err(SessionError::UserNotFound(target.to_string()).into());
        }
        ctx.user != ROOT && users.has_password(target)
    };
    if needs_password {
        let password = ask(ctx, "Password:").await?;
        ctx.deps.users.borrow().authenticate(target, &password)?;
    }
    Ok(())
}

/// Home directory of `user`, created on first login
fn prepare_home(ctx: &CommandContext, user: &str) -> String {
    let group = ctx
        .deps
        .users
        .borrow()
        .get_user(user)
        .map(|u| u.primary_group.clone())
        .unwrap_or_else(|| user.to_string());
    ctx.deps.fs.borrow_mut().ensure_home(user, &group);
    Vfs::home_of(user)
}

fn su(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let target = ctx.args.first().cloned().unwrap_or_else(|| ROOT.to_string());
        authorize(ctx, &target).await?;
        let home = prepare_home(ctx, &target);
        ctx.deps.sessions.borrow_mut().push(&target, &home);
        log::info!("{} switched to {}", ctx.user, target);
        Ok(CommandOutput::empty().modified())
    }
    .boxed_local()
}

fn logout(ctx: &mut CommandContext) -> CommandResult {
    let mut sessions = ctx.deps.sessions.borrow_mut();
    let restored = sessions.pop()?;
    log::info!("{} logged out, back to {}", ctx.user, restored.user());
    Ok(CommandOutput::empty().modified())
}

fn login(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let target = ctx.args[0].clone();
        authorize(ctx, &target).await?;
        let home = prepare_home(ctx, &target);
        ctx.deps.sessions.borrow_mut().replace(&target, &home);
        log::info!("login: {}", target);
        Ok(CommandOutput::empty().modified())
    }
    .boxed_local()
}

fn useradd(ctx: &mut CommandContext) -> CommandResult {
    require_root(ctx)?;
    let name = &ctx.args[0];
    let group = {
        let mut users = ctx.deps.users.borrow_mut();
        users.add_user(name, ctx.flags.value("password"), ctx.flags.value("group"))?;
        users
            .get_user(name)
            .map(|u| u.primary_group.clone())
            .unwrap_or_else(|| name.clone())
    };
    ctx.deps.fs.borrow_mut().ensure_home(name, &group);
    Ok(CommandOutput::empty().modified())
}

fn userdel(ctx: &mut CommandContext) -> CommandResult {
    require_root(ctx)?;
    let name = ctx.args[0].clone();
    if ctx.deps.sessions.borrow().users().contains(&name.as_str()) {
        return Err(ExecError::bad_args(format!("user '{}' is currently logged in", name)));
    }
    ctx.deps.users.borrow_mut().remove_user(&name)?;
    ctx.deps.sessions.borrow_mut().forget(&name);
    if ctx.flag("remove") {
        let opts = DeleteOptions {
            recursive: true,
            force: true,
        };
        ctx.deps
            .fs
            .borrow_mut()
            .delete(&Vfs::home_of(&name), opts, &Access::root())?;
    }
    Ok(CommandOutput::empty().modified())
}

fn passwd(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let target = ctx.args.first().cloned().unwrap_or_else(|| ctx.user.clone());
        let is_root = ctx.user == ROOT;
        if target != ctx.user && !is_root {
            return Err(ExecError::bad_args("Permission denied")
                .with_suggestion("Only root may change another user's password"));
        }
        let needs_current = {
            let users = ctx.deps.users.borrow();
            if !users.user_exists(&target) {
                return Err(SessionError::UserNotFound(target).into());
            }
            !is_root && users.has_password(&target)
        };
        if needs_current {
            let current = ask(ctx, "Current password:").await?;
            ctx.deps.users.borrow().authenticate(&target, &current)?;
        }

        let new = ask(ctx, "New password:").await?;
        let again = ask(ctx, "Retype new password:").await?;
        if new != again {
            return Err(ExecError::bad_args("passwords do not match"));
        }
        let password = Some(new.as_str()).filter(|p| !p.is_empty());
        ctx.deps.users.borrow_mut().set_password(&target, password)?;
        Ok(CommandOutput::text("password updated successfully").modified())
    }
    .boxed_local()
}

fn groupadd(ctx: &mut CommandContext) -> CommandResult {
    require_root(ctx)?;
    ctx.deps.users.borrow_mut().add_group(&ctx.args[0])?;
    Ok(CommandOutput::empty().modified())
}

fn groupdel(ctx: &mut CommandContext) -> CommandResult {
    require_root(ctx)?;
    ctx.deps.users.borrow_mut().remove_group(&ctx.args[0])?;
    Ok(CommandOutput::empty().modified())
}

fn usermod(ctx: &mut CommandContext) -> CommandResult {
    require_root(ctx)?;
    let name = &ctx.args[0];
    let primary = ctx.flags.value("gid");
    let extra = ctx.flags.value("groups");
    if primary.is_none() && extra.is_none() {
        return Err(ExecError::bad_args("no changes requested")
            .with_suggestion("Usage: usermod [-g GROUP] [-a] [-G GROUP,...] USER"));
    }

    let mut users = ctx.deps.users.borrow_mut();
    if !users.user_exists(name) {
        return Err(SessionError::UserNotFound(name.clone()).into());
    }
    if let Some(group) = primary {
        users.set_primary_group(name, group)?;
    }
    if let Some(list) = extra {
        let wanted: Vec<&str> = list.split(',').filter(|g| !g.is_empty()).collect();
        if let Some(missing) = wanted.iter().find(|g| !users.group_exists(g)) {
            return Err(SessionError::GroupNotFound(missing.to_string()).into());
        }
        if !ctx.flag("append") {
            let keep = users.get_user(name).map(|u| u.primary_group.clone());
            for group in users.groups_of(name) {
                if Some(&group) != keep.as_ref() && !wanted.contains(&group.as_str()) {
                    users.remove_from_group(name, &group)?;
                }
            }
        }
        for group in wanted {
            users.add_to_group(name, group)?;
        }
    }
    Ok(CommandOutput::empty().modified())
}

fn groups(ctx: &mut CommandContext) -> CommandResult {
    let name = ctx.args.first().cloned().unwrap_or_else(|| ctx.user.clone());
    let users = ctx.deps.users.borrow();
    if !users.user_exists(&name) {
        return Err(SessionError::UserNotFound(name).into());
    }
    Ok(CommandOutput::text(users.groups_of(&name).join(" ")))
}

#[cfg(test)]
mod tests {
    use crate::shell::modal::ModalAnswer;
    use crate::shell::programs::testing::harness;

    fn value(s: &str) -> ModalAnswer {
        ModalAnswer::Value(s.to_string())
    }

    #[test]
    fn test_su_and_logout_restore_session() {
        let mut h = harness();
        h.code("cd /tmp");
        assert_eq!(h.code("su"), 0);
        assert_eq!(h.out("whoami"), "root");
        assert_eq!(h.out("pwd"), "/root");
        assert_eq!(h.code("logout"), 0);
        assert_eq!(h.out("whoami"), "Guest");
        assert_eq!(h.out("pwd"), "/tmp");
        let (code, err) = h.err("logout");
        assert_eq!(code, 1);
        assert!(err.contains("no session to return to"));
    }

    #[test]
    fn test_su_prompts_for_password() {
        let mut h = harness();
        h.code("su; useradd -p secret alice; logout");
        h.modal.push(value("wrong"));
        let (code, err) = h.err("su alice");
        assert_eq!(code, 1);
        assert!(err.contains("Authentication failed"));
        h.modal.push(value("secret"));
        assert_eq!(h.code("su alice"), 0);
        assert_eq!(h.out("whoami"), "alice");
        assert_eq!(h.out("pwd"), "/home/alice");
        assert_eq!(h.modal.requests().len(), 2);
    }

    #[test]
    fn test_root_su_never_prompts() {
        let mut h = harness();
        h.code("su; useradd -p secret bob");
        assert_eq!(h.code("su bob"), 0);
        assert_eq!(h.out("whoami"), "bob");
        assert!(h.modal.requests().is_empty());
    }

    #[test]
    fn test_login_replaces_stack() {
        let mut h = harness();
        h.code("su");
        assert_eq!(h.code("login Guest"), 0);
        assert_eq!(h.out("whoami"), "Guest");
        assert_eq!(h.err("logout").0, 1);
    }

    #[test]
    fn test_account_admin_requires_root() {
        let mut h = harness();
        let (code, err) = h.err("useradd carol");
        assert_eq!(code, 1);
        assert!(err.contains("Permission denied"));
        assert!(err.contains("su root"));
    }

    #[test]
    fn test_user_and_group_lifecycle() {
        let mut h = harness();
        h.code("su");
        assert_eq!(h.code("useradd dave"), 0);
        assert_eq!(h.out("ls /home"), "Guest\ndave");
        assert_eq!(h.code("groupadd staff"), 0);
        assert_eq!(h.code("usermod -a -G staff dave"), 0);
        assert_eq!(h.out("groups dave"), "dave staff");
        assert_eq!(h.err("groupdel dave").0, 1);
        assert_eq!(h.code("userdel -r dave"), 0);
        assert_eq!(h.out("ls /home"), "Guest");
        assert_eq!(h.err("groups dave").0, 1);
    }

    #[test]
    fn test_userdel_refuses_logged_in_user() {
        let mut h = harness();
        h.code("su");
        let (code, err) = h.err("userdel Guest");
        assert_eq!(code, 1);
        assert!(err.contains("logged in"));
    }

    #[test]
    fn test_passwd_sets_and_checks_current() {
        let mut h = harness();
        h.modal.push(value("pw1"));
        h.modal.push(value("pw1"));
        assert_eq!(h.out("passwd"), "password updated successfully");

        h.modal.push(value("bad"));
        let (code, err) = h.err("passwd");
        assert_eq!(code, 1);
        assert!(err.contains("Authentication failed"));

        h.modal.push(value("pw1"));
        h.modal.push(value("a"));
        h.modal.push(value("b"));
        let (code, err) = h.err("passwd");
        assert_eq!(code, 1);
        assert!(err.contains("do not match"));

        let users = h.kernel.deps().users.clone();
        assert!(users.borrow().authenticate("Guest", "pw1").is_ok());
    }

    #[test]
    fn test_passwd_other_user_needs_root() {
        let mut h = harness();
        assert_eq!(h.err("passwd root").0, 1);
        assert!(h.modal.requests().is_empty());
    }
}
