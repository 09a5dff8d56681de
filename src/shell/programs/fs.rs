//! Filesystem commands
//!
//! - `ls`, `cat`, `readlink`, `du`: reading
//! - `mkdir`, `touch`, `rm`, `cp`, `mv`, `ln`: mutation

use super::finish;
use crate::shell::context::{CommandContext, CommandOutput, CommandResult};
use crate::shell::error::ExecError;
use crate::shell::flags::FlagDef;
use crate::shell::modal::ModalRequest;
use crate::shell::registry::{ArgRange, CommandSpec, CompletionKind, Handler, PathRule};
use crate::vfs::{DeleteOptions, FsError, NodeKind, Stat, Vfs};
use futures::FutureExt;
use futures::future::LocalBoxFuture;

pub fn commands() -> Vec<CommandSpec> {
    vec![
        CommandSpec::new("ls", "list directory contents", Handler::Sync(ls))
            .usage("ls [-la] [PATH]...")
            .flags([FlagDef::switch("long", Some('l')), FlagDef::switch("all", Some('a'))])
            .path(PathRule::new(ArgRange::All))
            .complete(CompletionKind::Paths),
        CommandSpec::new("cat", "concatenate files", Handler::Sync(cat))
            .usage("cat [FILE]...")
            .complete(CompletionKind::Paths),
        CommandSpec::new("mkdir", "create directories", Handler::Sync(mkdir))
            .usage("mkdir [-p] DIR...")
            .flags([FlagDef::switch("parents", Some('p'))])
            .args(1, None)
            .complete(CompletionKind::Paths),
        CommandSpec::new("touch", "create files or update their time", Handler::Sync(touch))
            .usage("touch FILE...")
            .args(1, None)
            .complete(CompletionKind::Paths),
        CommandSpec::new("rm", "remove files and directories", Handler::Async(rm))
            .usage("rm [-rfi] PATH...")
            .flags([
                FlagDef::switch("recursive", Some('r')),
                FlagDef::switch("Recursive", Some('R')),
                FlagDef::switch("force", Some('f')),
                FlagDef::switch("interactive", Some('i')),
            ])
            .args(1, None)
            .complete(CompletionKind::Paths),
        CommandSpec::new("cp", "copy files and directories", Handler::Sync(cp))
            .usage("cp [-r] SOURCE... DEST")
            .flags([
                FlagDef::switch("recursive", Some('r')),
                FlagDef::switch("Recursive", Some('R')),
            ])
            .args(2, None)
            .path(PathRule::new(ArgRange::AllButLast))
            .complete(CompletionKind::Paths),
        CommandSpec::new("mv", "move or rename", Handler::Sync(mv))
            .usage("mv SOURCE... DEST")
            .args(2, None)
            .path(PathRule::new(ArgRange::AllButLast))
            .complete(CompletionKind::Paths),
        CommandSpec::new("ln", "create symbolic links", Handler::Sync(ln))
            .usage("ln -s TARGET LINK")
            .flags([FlagDef::switch("symbolic", Some('s'))])
            .args(2, Some(2))
            .complete(CompletionKind::Paths),
        CommandSpec::new("readlink", "print a symbolic link's target", Handler::Sync(readlink))
            .usage("readlink LINK")
            .args(1, Some(1))
            .complete(CompletionKind::Paths),
        CommandSpec::new("du", "estimate space usage", Handler::Sync(du))
            .usage("du [-s] [PATH]...")
            .flags([FlagDef::switch("summarize", Some('s'))])
            .path(PathRule::new(ArgRange::All))
            .complete(CompletionKind::Paths),
    ]
}

fn recursive(ctx: &CommandContext) -> bool {
    ctx.flag("recursive") || ctx.flag("Recursive")
}

fn type_char(kind: NodeKind) -> char {
    match kind {
        NodeKind::Directory => 'd',
        NodeKind::Symlink => 'l',
        NodeKind::File => '-',
    }
}

fn long_line(stat: &Stat) -> String {
    let mut line = format!(
        "{}{} {:<8} {:<8} {:>6} {} {}",
        type_char(stat.kind),
        Vfs::format_mode_string(stat.meta.mode),
        stat.meta.owner,
        stat.meta.group,
        stat.size,
        stat.meta.mtime.format("%b %e %H:%M"),
        stat.name
    );
    if let Some(target) = &stat.target {
        line.push_str(" -> ");
        line.push_str(target);
    }
    line
}

fn ls(ctx: &mut CommandContext) -> CommandResult {
    if ctx.args.is_empty() {
        ctx.args.push(".".to_string());
    }
    let access = ctx.access()?;
    let fs = ctx.deps.fs.borrow();
    let (long, all) = (ctx.flag("long"), ctx.flag("all"));
    let render = |stat: &Stat| if long { long_line(stat) } else { stat.name.clone() };

    let mut blocks = Vec::new();
    let mut failed = false;
    let many = ctx.args.len() > 1;
    for arg in &ctx.args {
        let stat = fs.stat(arg, &access, false)?;
        let is_dir = stat.kind == NodeKind::Directory
            || (stat.kind == NodeKind::Symlink
                && fs.stat(arg, &access, true).is_ok_and(|s| s.kind == NodeKind::Directory));
        if !is_dir {
            let mut stat = stat;
            stat.name = arg.clone();
            blocks.push(render(&stat));
            continue;
        }
        match fs.list_dir(arg, &access) {
            Ok(entries) => {
                let lines: Vec<String> = entries
                    .iter()
                    .filter(|e| all || !e.name.starts_with('.'))
                    .map(&render)
                    .collect();
                let body = lines.join("\n");
                blocks.push(if many { format!("{}:\n{}", arg, body) } else { body });
            }
            Err(e) => {
                ctx.warn(format!("cannot open directory {}", e));
                failed = true;
            }
        }
    }
    let blocks: Vec<String> = blocks.into_iter().filter(|b| !b.is_empty()).collect();
    Ok(finish(blocks.join(if many { "\n\n" } else { "\n" }), failed))
}

fn cat(ctx: &mut CommandContext) -> CommandResult {
    let mut out = String::new();
    let mut failed = false;
    for item in ctx.input_stream(0)? {
        if item.success {
            out.push_str(&item.content);
        } else {
            ctx.warn(&item.content);
            failed = true;
        }
    }
    Ok(finish(out, failed))
}

fn mkdir(ctx: &mut CommandContext) -> CommandResult {
    let access = ctx.access()?;
    let parents = ctx.flag("parents");
    let mut failed = false;
    for dir in &ctx.args {
        let made = ctx.deps.fs.borrow_mut().create_directory(dir, parents, &access);
        if let Err(e) = made {
            ctx.warn(format!("cannot create directory {}", e));
            failed = true;
        }
    }
    Ok(finish(String::new(), failed).modified())
}

fn touch(ctx: &mut CommandContext) -> CommandResult {
    let access = ctx.access()?;
    let mut failed = false;
    for file in &ctx.args {
        let touched = ctx.deps.fs.borrow_mut().touch(file, &access);
        if let Err(e) = touched {
            ctx.warn(format!("cannot touch {}", e));
            failed = true;
        }
    }
    Ok(finish(String::new(), failed).modified())
}

fn rm(ctx: &mut CommandContext) -> LocalBoxFuture<'_, CommandResult> {
    async move {
        let access = ctx.access()?;
        let opts = DeleteOptions {
            recursive: recursive(ctx),
            force: ctx.flag("force"),
        };
        let interactive = ctx.flag("interactive") && !opts.force;

        for path in ctx.args.clone() {
            if interactive {
                let answer = ctx
                    .deps
                    .modal
                    .prompt(ModalRequest::confirm(format!("rm: remove '{}'?", path)))
                    .await;
                ctx.control().check()?;
                if !answer.is_confirmed() {
                    continue;
                }
            }
            let removed = ctx.deps.fs.borrow_mut().delete(&path, opts, &access);
            match removed {
                Ok(()) => {}
                Err(e @ FsError::IsADirectory { .. }) => {
                    return Err(ExecError::from(e).with_suggestion("Use the -r or -R flag"));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(CommandOutput::empty().modified())
    }
    .boxed_local()
}

fn cp(ctx: &mut CommandContext) -> CommandResult {
    let access = ctx.access()?;
    let deep = recursive(ctx);
    let Some((dest, sources)) = ctx.args.split_last() else {
        return Err(ExecError::bad_args("missing operand"));
    };
    let mut fs = ctx.deps.fs.borrow_mut();
    for src in sources {
        match fs.copy(src, dest, deep, &access) {
            Ok(()) => {}
            Err(e @ FsError::IsADirectory { .. }) => {
                return Err(ExecError::from(e).with_suggestion("Use the -r flag to copy directories"));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(CommandOutput::empty().modified())
}

fn mv(ctx: &mut CommandContext) -> CommandResult {
    let access = ctx.access()?;
    let Some((dest, sources)) = ctx.args.split_last() else {
        return Err(ExecError::bad_args("missing operand"));
    };
    let mut fs = ctx.deps.fs.borrow_mut();
    for src in sources {
        fs.rename(src, dest, &access)?;
    }
    Ok(CommandOutput::empty().modified())
}

fn ln(ctx: &mut CommandContext) -> CommandResult {
    if !ctx.flag("symbolic") {
        return Err(ExecError::bad_args("hard links are not supported").with_suggestion("Use ln -s TARGET LINK"));
    }
    let access = ctx.access()?;
    ctx.deps
        .fs
        .borrow_mut()
        .create_symlink(&ctx.args[0], &ctx.args[1], &access)?;
    Ok(CommandOutput::empty().modified())
}

fn readlink(ctx: &mut CommandContext) -> CommandResult {
    let access = ctx.access()?;
    let target = ctx.deps.fs.borrow().read_link(&ctx.args[0], &access)?;
    Ok(CommandOutput::text(target))
}

fn du(ctx: &mut CommandContext) -> CommandResult {
    if ctx.args.is_empty() {
        ctx.args.push(".".to_string());
    }
    let access = ctx.access()?;
    let fs = ctx.deps.fs.borrow();
    let summarize = ctx.flag("summarize");
    let mut lines = Vec::new();
    for (i, arg) in ctx.args.iter().enumerate() {
        let Some(canonical) = ctx.path(i) else { continue };
        let total = fs.node_size(arg, &access)?;
        if !summarize && let Some(node) = fs.get_node(canonical) {
            let mut dirs = Vec::new();
            node.walk(canonical, &mut |path, n| {
                if n.is_dir() && path != canonical {
                    dirs.push(format!("{}\t{}", n.size(), path));
                }
            });
            dirs.sort();
            lines.extend(dirs);
        }
        lines.push(format!("{}\t{}", total, arg));
    }
    Ok(CommandOutput::text(lines.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::modal::ModalAnswer;
    use crate::shell::programs::testing::harness;

    #[test]
    fn test_type_char() {
        assert_eq!(type_char(NodeKind::Directory), 'd');
        assert_eq!(type_char(NodeKind::Symlink), 'l');
        assert_eq!(type_char(NodeKind::File), '-');
    }

    #[test]
    fn test_ls_hides_dotfiles_unless_all() {
        let mut h = harness();
        h.code("touch .hidden visible");
        assert_eq!(h.out("ls"), "visible");
        assert_eq!(h.out("ls -a"), ".hidden\nvisible");
    }

    #[test]
    fn test_ls_long_format() {
        let mut h = harness();
        h.code("echo hi > f");
        let out = h.out("ls -l f");
        assert!(out.starts_with("-rw-r--r-- Guest"), "{}", out);
        assert!(out.ends_with(" f"));
    }

    #[test]
    fn test_ls_symlink_shows_target() {
        let mut h = harness();
        h.code("ln -s /tmp link");
        let out = h.out("ls -l");
        assert!(out.contains("link -> /tmp"), "{}", out);
        assert_eq!(h.out("readlink link"), "/tmp");
    }

    #[test]
    fn test_cat_multiple_and_missing() {
        let mut h = harness();
        h.code("echo a > x; echo b > y");
        assert_eq!(h.out("cat x y"), "a\nb");
        let (code, err) = h.err("cat x nope");
        assert_eq!(code, 1);
        assert!(err.contains("nope: No such file or directory"), "{}", err);
    }

    #[test]
    fn test_cat_reads_stdin_only_without_files() {
        let mut h = harness();
        h.code("echo file > f");
        assert_eq!(h.out("echo piped | cat"), "piped");
        assert_eq!(h.out("echo piped | cat f"), "file");
        assert_eq!(h.out("echo piped | grep pip"), "piped");
        assert_eq!(h.out("echo piped | grep fil f"), "file");
    }

    #[test]
    fn test_mkdir_parents_and_exists() {
        let mut h = harness();
        assert_eq!(h.code("mkdir -p a/b/c"), 0);
        assert_eq!(h.out("ls a/b"), "c");
        let (code, err) = h.err("mkdir a");
        assert_eq!(code, 1);
        assert!(err.contains("File exists"), "{}", err);
    }

    #[test]
    fn test_rm_directory_needs_flag() {
        let mut h = harness();
        h.code("mkdir d; touch d/f");
        let (code, err) = h.err("rm d");
        assert_eq!(code, 1);
        assert!(err.contains("Is a directory"));
        assert!(err.contains("Use the -r or -R flag"));
        assert_eq!(h.code("rm -R d"), 0);
        assert_eq!(h.out("ls"), "");
    }

    #[test]
    fn test_rm_interactive_asks() {
        let mut h = harness();
        h.code("touch keep gone");
        h.modal.push(ModalAnswer::Cancelled);
        h.modal.push(ModalAnswer::Confirmed);
        assert_eq!(h.code("rm -i keep gone"), 0);
        assert_eq!(h.out("ls"), "keep");
        assert_eq!(h.modal.requests().len(), 2);
    }

    #[test]
    fn test_cp_and_mv() {
        let mut h = harness();
        h.code("echo data > a; mkdir dir");
        assert_eq!(h.code("cp a b"), 0);
        assert_eq!(h.code("mv b dir"), 0);
        assert_eq!(h.out("cat dir/b"), "data");
        assert_eq!(h.err("cp dir other").0, 1);
        assert_eq!(h.code("cp -r dir other"), 0);
        assert_eq!(h.out("ls other"), "b");
    }

    #[test]
    fn test_ln_requires_symbolic() {
        let mut h = harness();
        let (code, err) = h.err("ln a b");
        assert_eq!(code, 1);
        assert!(err.contains("hard links are not supported"));
    }

    #[test]
    fn test_du_summarize() {
        let mut h = harness();
        h.code("mkdir d; echo 12345 > d/f");
        assert_eq!(h.out("du -s d"), "6\td");
    }
}
