//! Integration tests for the websh shell core
//!
//! Each test boots its own kernel over in-memory storage and drives it the
//! way a host would: `run_line` for whole lines, `submit` + `tick` where a
//! test needs to step through a suspended command.

use futures::executor::block_on;
use std::rc::Rc;
use websh::config::ShellConfig;
use websh::kernel::Kernel;
use websh::kernel::storage::MemoryStorage;
use websh::shell::modal::ModalChannel;
use websh::shell::parser::{NoGlob, parse_line};
use websh::shell::{BufferSink, HostModal, ModalAnswer, ScriptedModal};
use websh::vfs::Access;

struct Shell {
    kernel: Kernel,
    sink: Rc<BufferSink>,
    storage: Rc<MemoryStorage>,
}

impl Shell {
    fn boot_with(storage: Rc<MemoryStorage>, modal: Rc<dyn ModalChannel>) -> Self {
        let sink = Rc::new(BufferSink::new());
        let kernel = block_on(Kernel::boot(
            ShellConfig::default(),
            storage.clone(),
            sink.clone(),
            modal,
        ))
        .expect("boot");
        Shell { kernel, sink, storage }
    }

    fn new() -> Self {
        Self::boot_with(Rc::new(MemoryStorage::new()), Rc::new(ScriptedModal::new()))
    }

    /// Run a line; returns (exit code, stdout, stderr)
    fn run(&mut self, line: &str) -> (i32, String, String) {
        self.sink.reset();
        let code = self.kernel.run_line(line);
        (code, self.sink.stdout_text(), self.sink.stderr_text())
    }

    fn out(&mut self, line: &str) -> String {
        self.run(line).1
    }

    fn file(&self, path: &str) -> Option<String> {
        self.kernel.deps().fs.borrow().read_file(path, &Access::root()).ok()
    }
}

// ============ Scenarios ============

#[test]
fn test_redirect_then_cat() {
    let mut sh = Shell::new();
    let (code, out, _) = sh.run("echo hello > /tmp/a && cat /tmp/a");
    assert_eq!(code, 0);
    assert_eq!(out, "hello");
    assert_eq!(sh.file("/tmp/a").as_deref(), Some("hello\n"));
}

#[test]
fn test_mkdir_touch_ls_chain() {
    let mut sh = Shell::new();
    let out = sh.out("mkdir -p /home/Guest/d && touch /home/Guest/d/f && ls /home/Guest/d");
    assert!(out.lines().any(|l| l == "f"), "{}", out);
}

#[test]
fn test_quoting_preserves_spaces() {
    let mut sh = Shell::new();
    assert_eq!(sh.out(r#"echo "a b" 'c  d' unquoted"#), "a b c  d unquoted");
}

#[test]
fn test_failed_and_skips_but_semicolon_continues() {
    let mut sh = Shell::new();
    assert_eq!(sh.out("false && echo X; echo Y"), "Y");
}

#[test]
fn test_owner_can_chmod_but_then_cannot_read() {
    let mut sh = Shell::new();
    sh.run("touch /home/Guest/x");
    let (code, _, err) = sh.run("chmod 000 /home/Guest/x && cat /home/Guest/x");
    assert_ne!(code, 0);
    assert!(err.contains("Permission denied"), "{}", err);
    assert!(sh.out("ls -l /home/Guest/x").starts_with("----------"));
}

#[test]
fn test_background_jobs_get_increasing_ids() {
    let mut sh = Shell::new();
    assert_eq!(sh.out("sleep 30 &"), "[1] 1");
    assert_eq!(sh.out("sleep 40 &"), "[2] 2");
    let out = sh.out("ps");
    let rows: Vec<&str> = out.lines().skip(1).collect();
    assert_eq!(rows, vec!["    1 R    sleep 30", "    2 R    sleep 40"]);
}

#[test]
fn test_unmatched_glob_is_passed_literally() {
    let mut sh = Shell::new();
    let (code, _, err) = sh.run("ls *.nomatch");
    assert_eq!(code, 1);
    assert!(err.contains("*.nomatch: No such file or directory"), "{}", err);
}

// ============ Invariants ============

#[test]
fn test_lexing_and_parsing_are_total() {
    let inputs = [
        "",
        "echo \"unterminated",
        "echo 'open",
        "| leading",
        "a &&",
        "a || || b",
        "cat <",
        "echo $(",
        "echo `x",
        "&&&",
        ";;",
        "echo \\",
        "> > >",
    ];
    for input in inputs {
        let _ = parse_line(input, &NoGlob);
    }

    let mut sh = Shell::new();
    let (code, _, err) = sh.run("echo \"unterminated");
    assert_eq!(code, 2);
    assert!(!err.is_empty());
    assert_eq!(sh.run("a &&").0, 2);
    assert_eq!(sh.out("echo still alive"), "still alive");
}

#[test]
fn test_unmatched_glob_stays_one_argument() {
    let mut sh = Shell::new();
    assert_eq!(sh.out("echo *.none ?x"), "*.none ?x");
    sh.run("touch a1 a2 b1");
    assert_eq!(sh.out("echo a*"), "a1 a2");
    assert_eq!(sh.out("echo 'a*'"), "a*");
}

#[test]
fn test_pipeline_matches_temp_files() {
    let mut sh = Shell::new();
    sh.run("echo cherry > fruit; echo apple >> fruit; echo banana >> fruit");
    let piped = sh.out("cat fruit | sort | head -n 2");
    sh.run("cat fruit > t1 && sort < t1 > t2 && head -n 2 < t2 > t3");
    assert_eq!(piped, "apple\nbanana");
    assert_eq!(sh.file("/home/Guest/t3").as_deref(), Some("apple\nbanana\n"));
}

#[test]
fn test_overwrite_and_append() {
    let mut sh = Shell::new();
    sh.run("echo X > f; echo Y >> f");
    assert_eq!(sh.file("/home/Guest/f").as_deref(), Some("X\nY\n"));
    sh.run("echo X > f; echo Y > f");
    assert_eq!(sh.file("/home/Guest/f").as_deref(), Some("Y\n"));
}

#[test]
fn test_append_to_directory_is_an_io_error() {
    let mut sh = Shell::new();
    let (code, _, err) = sh.run("echo X >> /tmp");
    assert_eq!(code, 1);
    assert_eq!(err, "echo: /tmp: Is a directory");
}

#[test]
fn test_redirect_into_read_only_directory_is_denied() {
    let mut sh = Shell::new();
    sh.run("su; mkdir /tmp/ro; touch /tmp/ro/f; chown Guest /tmp/ro/f; chmod 555 /tmp/ro; logout");

    let (code, _, err) = sh.run("echo x > /tmp/ro/f");
    assert_eq!(code, 1);
    assert!(err.contains("Permission denied"), "{}", err);
    assert_eq!(sh.run("echo x >> /tmp/ro/f").0, 1);
    assert_eq!(sh.file("/tmp/ro/f").as_deref(), Some(""));
    assert_eq!(sh.run("touch /tmp/ro/new").0, 1);

    sh.run("su");
    assert_eq!(sh.run("echo by-root > /tmp/ro/f").0, 0);
    assert_eq!(sh.file("/tmp/ro/f").as_deref(), Some("by-root\n"));
}

#[test]
fn test_redirect_through_dangling_symlink_fails() {
    let mut sh = Shell::new();
    sh.run("ln -s /nowhere/out broken");
    let (code, _, err) = sh.run("echo x > broken");
    assert_eq!(code, 1);
    assert!(!err.is_empty());
    assert!(sh.file("/nowhere/out").is_none());
}

#[test]
fn test_short_circuit_never_runs_skipped_commands() {
    let mut sh = Shell::new();
    sh.run("false && touch skipped1");
    sh.run("true || touch skipped2");
    sh.run("false || true && touch ran");
    assert!(sh.file("/home/Guest/skipped1").is_none());
    assert!(sh.file("/home/Guest/skipped2").is_none());
    assert!(sh.file("/home/Guest/ran").is_some());
    assert_eq!(sh.out("false || true && echo C"), "C");
}

#[test]
fn test_permissions_by_class_and_root_bypass() {
    let mut sh = Shell::new();
    let (code, _, err) = sh.run("echo x > /etc/motd");
    assert_eq!(code, 1);
    assert!(err.contains("Permission denied"), "{}", err);

    sh.run("su; touch /tmp/g; chgrp Guest /tmp/g; chmod 060 /tmp/g; logout");
    assert_eq!(sh.run("echo via-group > /tmp/g").0, 0);
    sh.run("su; chmod 600 /tmp/g; logout");
    assert_eq!(sh.run("echo denied > /tmp/g").0, 1);

    sh.run("su");
    sh.run("chmod 000 /tmp/g");
    assert_eq!(sh.out("cat /tmp/g"), "via-group");
}

#[test]
fn test_chmod_on_symlink_keeps_target_mode() {
    let mut sh = Shell::new();
    sh.run("echo data > target; ln -s target link; chmod 600 link");
    assert!(sh.out("ls -l target").starts_with("-rw-r--r--"));
    assert!(sh.out("ls -l link").starts_with("lrw-------"));
    assert_eq!(sh.out("cat link"), "data");
}

#[test]
fn test_session_stack_restores_each_level() {
    let mut sh = Shell::new();
    sh.run("export LEVEL=guest");
    sh.run("cd /tmp");
    sh.run("su root");
    sh.run("export LEVEL=root");
    sh.run("su Guest");
    assert_eq!(sh.out("whoami"), "Guest");
    assert_eq!(sh.out("pwd"), "/home/Guest");
    sh.run("logout");
    assert_eq!(sh.out("whoami"), "root");
    assert_eq!(sh.out("echo $LEVEL"), "root");
    sh.run("logout");
    assert_eq!(sh.out("whoami"), "Guest");
    assert_eq!(sh.out("pwd"), "/tmp");
    assert_eq!(sh.out("echo $LEVEL"), "guest");
    let history = sh.out("history");
    assert!(history.contains("su root"));
    assert!(!history.contains("export LEVEL=root"));
}

#[test]
fn test_save_and_reload_round_trip() {
    let mut sh = Shell::new();
    sh.run("mkdir -p docs/notes; echo body > docs/notes/a.txt; chmod 640 docs/notes/a.txt");
    sh.run("ln -s docs/notes/a.txt shortcut; alias ll='ls -l'; export EDITOR=vi");
    sh.run("su; useradd -p pw erin; groupadd staff; usermod -a -G staff erin; logout");
    sh.kernel.save().expect("save");

    let storage = Rc::new(MemoryStorage::from_snapshot(sh.storage.snapshot()));
    let mut reloaded = Shell::boot_with(storage, Rc::new(ScriptedModal::new()));

    assert_eq!(
        *sh.kernel.deps().fs.borrow().root(),
        *reloaded.kernel.deps().fs.borrow().root()
    );
    {
        let before = sh.kernel.deps().users.borrow();
        let after = reloaded.kernel.deps().users.borrow();
        assert_eq!(before.users_table(), after.users_table());
        assert_eq!(before.groups_table(), after.groups_table());
        assert!(after.authenticate("erin", "pw").is_ok());
    }
    assert_eq!(reloaded.out("cat shortcut"), "body");
    assert_eq!(reloaded.out("echo $EDITOR"), "vi");
    assert!(reloaded.out("ll docs/notes").starts_with("-rw-r-----"));
}

#[test]
fn test_autosave_after_modifying_line() {
    let mut sh = Shell::new();
    let before = sh.storage.write_count();
    sh.run("echo keep > /tmp/k");
    assert!(sh.storage.write_count() > before);
    let fs_data = sh.storage.peek("websh_fs_data").expect("fs saved");
    assert!(fs_data.contains("keep"));
    assert!(sh.storage.peek("websh_ai_config").is_none());
}

#[test]
fn test_kill_cancels_background_job() {
    let mut sh = Shell::new();
    sh.run("sleep 100 &");
    assert_eq!(sh.run("kill %1").0, 0);
    sh.kernel.settle();
    {
        let jobs = sh.kernel.deps().jobs.borrow();
        let job = jobs.get(1).expect("job 1");
        assert_eq!(job.status.to_string(), "Done");
        assert_eq!(job.exit_code, Some(130));
    }
    assert!(sh.out("jobs").contains("[1]  Done (130)"));
    assert_eq!(sh.out("jobs"), "");
}

// ============ Host Driving ============

#[test]
fn test_host_modal_suspends_until_answered() {
    let modal = Rc::new(HostModal::new());
    let mut sh = Shell::boot_with(Rc::new(MemoryStorage::new()), modal.clone());
    sh.run("touch doomed");

    assert!(sh.kernel.submit("rm -i doomed"));
    assert_eq!(sh.kernel.tick(0.0), None);
    assert!(sh.kernel.is_busy());
    assert!(!sh.kernel.submit("echo too early"));
    let pending = modal.pending().expect("modal request");
    assert_eq!(pending.lines, vec!["rm: remove 'doomed'?".to_string()]);

    assert!(modal.respond(ModalAnswer::Confirmed));
    assert_eq!(sh.kernel.tick(0.0), Some(0));
    assert!(sh.file("/home/Guest/doomed").is_none());
}

#[test]
fn test_interrupt_cancels_foreground_line() {
    let mut sh = Shell::new();
    assert!(sh.kernel.submit("sleep 100; touch /tmp/after"));
    assert_eq!(sh.kernel.tick(0.0), None);
    assert!(sh.kernel.interrupt());
    assert_eq!(sh.kernel.tick(0.0), Some(130));
    assert!(sh.file("/tmp/after").is_none());
}

#[test]
fn test_timers_follow_host_clock() {
    let mut sh = Shell::new();
    assert!(sh.kernel.submit("sleep 2 && echo woke"));
    assert_eq!(sh.kernel.tick(0.0), None);
    assert_eq!(sh.kernel.tick(1000.0), None);
    assert_eq!(sh.kernel.tick(2000.0), Some(0));
    assert!(sh.sink.stdout_text().contains("woke"));
}

#[test]
fn test_prompt_tracks_user_and_cwd() {
    let mut sh = Shell::new();
    assert_eq!(sh.kernel.prompt(), "Guest@websh:~$ ");
    sh.run("mkdir sub; cd sub");
    assert_eq!(sh.kernel.prompt(), "Guest@websh:~/sub$ ");
    sh.run("cd /tmp");
    assert_eq!(sh.kernel.prompt(), "Guest@websh:/tmp$ ");
    sh.run("su");
    assert_eq!(sh.kernel.prompt(), "root@websh:~# ");
}

#[test]
fn test_unknown_command_exits_127() {
    let mut sh = Shell::new();
    let (code, _, err) = sh.run("frobnicate");
    assert_eq!(code, 127);
    assert!(err.starts_with("frobnicate: command not found"), "{}", err);
    assert_eq!(sh.out("echo $?"), "127");
}
