//! Job control and messaging: ps, jobs, kill, sleep, post_message, read_messages

use super::finish;
use crate::kernel::jobs::JobId;
use crate::kernel::msgqueue::{MailboxKey, recv};
use crate::kernel::signal::Signal;
use crate::shell::context::{CommandContext, CommandOutput, CommandResult};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::registry::{CommandSpec, Handler};
use futures::FutureExt;
use futures::future::LocalBoxFuture;

pub fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("ps", "report background jobs", Handler::Sync(ps))
            .usage("ps [-a]")
            .flags([FlagDef::switch("all", Some('a'))])
            .args(0, Some(0)),
        CommandSpec::new("jobs", "list jobs and forget finished ones", Handler::Sync(jobs)).args(0, Some(0)),
        CommandSpec::new("kill", "send a signal to a job", Handler::Sync(kill))
            .usage("kill [-SIGNAL] ID... | kill -l")
            .raw(),
        CommandSpec::new("sleep", "wait for a number of seconds", Handler::Async(sleep))
            .usage("sleep SECONDS")
            .args(1, Some(1)),
        CommandSpec::new("post_message", "queue a message for a job or channel", Handler::Sync(post_message))
            .usage("post_message TARGET MESSAGE...")
            .args(2, None)
            .raw(),
        CommandSpec::new("read_messages", "read queued messages", Handler::Async(read_messages))
            .usage("read_messages [-a] [-w] TARGET")
            .flags([FlagDef::switch("all", Some('a')), FlagDef::switch("wait", Some('w'))])
            .args(1, Some(1)),
    ]
}

fn ps(ctx: &mut CommandContext) -> CommandResult {
    let table = ctx.deps.jobs.borrow();
    let jobs = if ctx.flag("all") { table.list() } else { table.active() };
    let mut lines = vec!["  PID STAT COMMAND".to_string()];
    lines.extend(
        jobs.iter()
            .map(|job| format!("{:>5} {:<4} {}", job.id, job.status.code(), job.command)),
    );
    Ok(CommandOutput::text(lines.join("\n")))
}

fn jobs(ctx: &mut CommandContext) -> CommandResult {
    let mut table = ctx.deps.jobs.borrow_mut();
    let lines: Vec<String> = table
        .list()
        .iter()
        .map(|job| match job.exit_code {
            Some(code) if code != 0 => format!("[{}]  {} ({})  {}", job.id, job.status, code, job.command),
            _ => format!("[{}]  {}  {}", job.id, job.status, job.command),
        })
        .collect();
    table.reap();
    Ok(CommandOutput::text(lines.join("\n")))
}

/// `%3` and `3` both name job 3
fn parse_job_id(arg: &str) -> Option<JobId> {
    arg.strip_prefix('%').unwrap_or(arg).parse().ok()
}

fn kill(ctx: &mut CommandContext) -> CommandResult {
    let mut args = ctx.args.as_slice();
    if args.first().is_some_and(|a| a == "-l") {
        let names = [
            Signal::SIGINT,
            Signal::SIGKILL,
            Signal::SIGTERM,
            Signal::SIGCONT,
            Signal::SIGSTOP,
        ]
        .iter()
        .map(|s| format!("{:>2}) {}", s.num(), s))
        .collect::<Vec<_>>();
        return Ok(CommandOutput::text(names.join("\n")));
    }

    let mut signal = Signal::SIGTERM;
    if let Some(first) = args.first()
        && let Some(name) = first.strip_prefix('-')
    {
        signal = Signal::parse(name).ok_or_else(|| {
            ExecError::bad_args(format!("{}: invalid signal specification", name)).with_suggestion("Use kill -l to list signals")
        })?;
        args = &args[1..];
    }
    if args.is_empty() {
        return Err(ExecError::bad_args("missing operand").with_suggestion("Usage: kill [-SIGNAL] ID..."));
    }

    let mut failed = false;
    for arg in args {
        let Some(id) = parse_job_id(arg) else {
            ctx.warn(format!("{}: arguments must be job ids", arg));
            failed = true;
            continue;
        };
        let sent = ctx.deps.jobs.borrow_mut().signal(id, signal, &ctx.user);
        if let Err(e) = sent {
            ctx.warn(e);
            failed = true;
        }
    }
    Ok(finish(String::new(), failed))
}

fn sleep(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let raw = &ctx.args[0];
        let seconds: f64 = raw
            .parse()
            .ok()
            .filter(|s: &f64| s.is_finite() && *s >= 0.0)
            .ok_or_else(|| ExecError::bad_args(format!("invalid time interval '{}'", raw)))?;
        let timer = ctx.deps.timers.sleep(seconds * 1000.0);
        ctx.control().guard(timer).await?;
        Ok(CommandOutput::empty())
    }
    .boxed_local()
}

fn post_message(ctx: &mut CommandContext) -> CommandResult {
    let key = MailboxKey::parse(&ctx.args[0]);
    let payload = ctx.args[1..].join(" ");
    ctx.deps
        .bus
        .borrow_mut()
        .post(key, payload)
        .map_err(|e| ExecError::io(e.to_string()))?;
    Ok(CommandOutput::empty())
}

fn read_messages(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let key = MailboxKey::parse(&ctx.args[0]);
        let mut messages = if ctx.flag("all") {
            ctx.deps.bus.borrow_mut().read_all(&key)
        } else {
            ctx.deps.bus.borrow_mut().try_read(&key).into_iter().collect()
        };
        if messages.is_empty() && ctx.flag("wait") {
            let next = recv(&ctx.deps.bus, key);
            messages.push(ctx.control().guard(next).await?);
        }
        let code = if messages.is_empty() { 1 } else { 0 };
        Ok(CommandOutput::text(messages.join("\n")).with_code(code))
    }
    .boxed_local()
}
