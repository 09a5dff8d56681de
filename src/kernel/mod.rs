//! The kernel - boot, shared state and task driving
//!
//! The kernel owns everything a command may touch (filesystem, user
//! database, sessions, jobs, message bus, clock) and hands it to the shell as
//! one cloneable [`Deps`] bundle. It also owns the task executor: the
//! foreground line and every background job are tasks on it.
//!
//! Hosts drive it either synchronously with [`Kernel::run_line`], or
//! incrementally with [`Kernel::submit`] and [`Kernel::tick`] from an
//! animation frame.

pub mod executor;
pub mod jobs;
pub mod msgqueue;
pub mod session;
pub mod signal;
pub mod storage;
pub mod timer;
pub mod users;

pub use executor::{Executor, Spawner, TaskId};

use crate::config::ShellConfig;
use crate::shell::completion::{Completer, Completion};
use crate::shell::context::ExecOptions;
use crate::shell::error::{EXIT_CANCELLED, EXIT_FAILURE, ExecError};
use crate::shell::executor::run_line;
use crate::shell::io::OutputSink;
use crate::shell::modal::ModalChannel;
use crate::shell::programs;
use crate::shell::registry::CommandRegistry;
use crate::vfs::{Access, Persister, SaveOutcome, Vfs};
use futures::channel::oneshot;
use jobs::JobTable;
use msgqueue::MessageBus;
use serde::de::DeserializeOwned;
use session::SessionManager;
use signal::JobControl;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use storage::{Storage, StorageError, StorageKeys};
use thiserror::Error;
use timer::Timers;
use users::{ROOT, UserDb, UserRecord};

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("cannot boot: {0}")]
    Corrupt(String),
}

/// Everything a command can reach
#[derive(Clone)]
pub struct Deps {
    pub fs: Rc<RefCell<Vfs>>,
    pub users: Rc<RefCell<UserDb>>,
    pub sessions: Rc<RefCell<SessionManager>>,
    pub registry: Rc<CommandRegistry>,
    pub sink: Rc<dyn OutputSink>,
    pub modal: Rc<dyn ModalChannel>,
    pub storage: Rc<dyn Storage>,
    pub keys: StorageKeys,
    pub jobs: Rc<RefCell<JobTable>>,
    pub bus: Rc<RefCell<MessageBus>>,
    pub timers: Timers,
    pub persister: Rc<Persister>,
    pub config: Rc<ShellConfig>,
    pub spawner: Spawner,
    save_requested: Rc<Cell<bool>>,
}

impl std::fmt::Debug for Deps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deps")
            .field("user", &self.current_user())
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Deps {
    pub fn current_user(&self) -> String {
        self.sessions.borrow().current().user().to_string()
    }

    pub fn cwd(&self) -> String {
        self.sessions.borrow().current().cwd().to_string()
    }

    /// Credentials and cwd of the current session
    pub fn access(&self) -> Result<Access, ExecError> {
        let (user, cwd) = {
            let sessions = self.sessions.borrow();
            let current = sessions.current();
            (current.user().to_string(), current.cwd().to_string())
        };
        let cred = self.users.borrow().credentials(&user)?;
        Ok(Access::new(cwd, cred))
    }

    pub fn request_save(&self) {
        self.save_requested.set(true);
    }

    pub fn needs_save(&self) -> bool {
        self.save_requested.get()
            || self.fs.borrow().is_dirty()
            || self.users.borrow().is_dirty()
            || self.sessions.borrow().is_dirty()
    }

    /// Serialize the current state into the six persisted keys and mark it clean
    fn snapshot(&self) -> Result<Vec<(String, String)>, StorageError> {
        fn encode<T: serde::Serialize>(key: String, value: &T) -> Result<(String, String), StorageError> {
            let json = serde_json::to_string(value).map_err(|e| StorageError::corrupt(&key, e))?;
            Ok((key, json))
        }

        let fs_json = self
            .fs
            .borrow()
            .to_json()
            .map_err(|e| StorageError::corrupt(&self.keys.fs_data(), e))?;
        let entries = {
            let users = self.users.borrow();
            let sessions = self.sessions.borrow();
            vec![
                encode(self.keys.credentials(), users.users_table())?,
                encode(self.keys.groups(), users.groups_table())?,
                (self.keys.fs_data(), fs_json),
                encode(self.keys.aliases(), &sessions.aliases_table())?,
                encode(self.keys.environment(), &sessions.environment_table())?,
                encode(self.keys.history(), &sessions.history_table())?,
            ]
        };

        self.fs.borrow_mut().mark_clean();
        self.users.borrow_mut().mark_clean();
        self.sessions.borrow_mut().mark_clean();
        self.save_requested.set(false);
        Ok(entries)
    }

    /// Flush state to storage. Requests made while a save is running
    /// coalesce into one follow-up write.
    pub async fn save(&self) -> Result<SaveOutcome, StorageError> {
        let result = self
            .persister
            .save(self.storage.as_ref(), || self.snapshot())
            .await;
        if result.is_err() {
            // try again after the next line
            self.fs.borrow_mut().mark_dirty();
            self.save_requested.set(true);
        }
        result
    }
}

fn load<T: DeserializeOwned>(key: &str, raw: Option<String>) -> Result<Option<T>, StorageError> {
    raw.map(|data| serde_json::from_str(&data).map_err(|e| StorageError::corrupt(key, e)))
        .transpose()
}

/// Per-user tables degrade to empty instead of failing the boot
fn load_or_default<T: DeserializeOwned + Default>(key: &str, raw: Option<String>) -> T {
    match load(key, raw) {
        Ok(value) => value.unwrap_or_default(),
        Err(e) => {
            log::warn!("{}; starting with defaults", e);
            T::default()
        }
    }
}

/// The line the terminal is waiting on
struct Foreground {
    control: JobControl,
    done: oneshot::Receiver<i32>,
}

pub struct Kernel {
    deps: Deps,
    executor: Executor,
    completer: Completer,
    foreground: Option<Foreground>,
}

impl Kernel {
    /// Load state from `storage` (or create a fresh installation) and
    /// register the built-in commands
    pub async fn boot(
        config: ShellConfig,
        storage: Rc<dyn Storage>,
        sink: Rc<dyn OutputSink>,
        modal: Rc<dyn ModalChannel>,
    ) -> Result<Kernel, BootError> {
        let keys = StorageKeys::new(&config.storage_prefix);

        let credentials: Option<BTreeMap<String, UserRecord>> =
            load(&keys.credentials(), storage.get(&keys.credentials()).await?)?;
        let groups: Option<BTreeMap<String, Vec<String>>> =
            load(&keys.groups(), storage.get(&keys.groups()).await?)?;
        let mut users = match (credentials, groups) {
            (None, None) => UserDb::new(),
            (users, groups) => UserDb::from_tables(users.unwrap_or_default(), groups.unwrap_or_default()),
        };

        let mut fs = match storage.get(&keys.fs_data()).await? {
            Some(data) => Vfs::from_json(&data).map_err(|e| BootError::Corrupt(e.to_string()))?,
            None => {
                log::debug!("no filesystem image, creating the default layout");
                Vfs::with_default_layout(&config.default_user)
            }
        };
        fs.set_max_symlink_depth(config.max_symlink_depth);

        let user = config.default_user.clone();
        if !users.user_exists(&user) {
            users
                .add_user(&user, None, None)
                .map_err(|e| BootError::Corrupt(e.to_string()))?;
        }
        let group = users
            .get_user(&user)
            .map_or_else(|| user.clone(), |r| r.primary_group.clone());
        fs.ensure_home(&user, &group);

        let aliases = load_or_default(&keys.aliases(), storage.get(&keys.aliases()).await?);
        let env = load_or_default(&keys.environment(), storage.get(&keys.environment()).await?);
        let history = load_or_default(&keys.history(), storage.get(&keys.history()).await?);
        let sessions = SessionManager::from_tables(&user, &Vfs::home_of(&user), aliases, env, history);

        let registry = CommandRegistry::new();
        programs::register_all(&registry);

        let executor = Executor::new();
        let deps = Deps {
            fs: Rc::new(RefCell::new(fs)),
            users: Rc::new(RefCell::new(users)),
            sessions: Rc::new(RefCell::new(sessions)),
            registry: Rc::new(registry),
            sink,
            modal,
            storage,
            keys,
            jobs: Rc::new(RefCell::new(JobTable::new())),
            bus: Rc::new(RefCell::new(MessageBus::new())),
            timers: Timers::new(),
            persister: Rc::new(Persister::new()),
            config: Rc::new(config),
            spawner: executor.spawner(),
            save_requested: Rc::new(Cell::new(false)),
        };
        log::info!("booted as {}", user);

        let kernel = Kernel {
            deps,
            executor,
            completer: Completer::new(),
            foreground: None,
        };
        kernel.deps.sink.set_prompt(&kernel.prompt());
        Ok(kernel)
    }

    pub fn deps(&self) -> &Deps {
        &self.deps
    }

    /// `user@host:cwd$ `, `#` for root, `~` for the home directory
    pub fn prompt(&self) -> String {
        let sessions = self.deps.sessions.borrow();
        let session = sessions.current();
        let (cwd, home) = (session.cwd(), session.home());
        let shown = if cwd == home {
            "~".to_string()
        } else if let Some(rest) = cwd.strip_prefix(home)
            && rest.starts_with('/')
        {
            format!("~{}", rest)
        } else {
            cwd.to_string()
        };
        let sigil = if session.user() == ROOT { '#' } else { '$' };
        format!("{}@{}:{}{} ", session.user(), self.deps.config.hostname, shown, sigil)
    }

    pub fn is_busy(&self) -> bool {
        self.foreground.is_some()
    }

    /// Start a foreground line. Returns false while another one is running.
    pub fn submit(&mut self, line: &str) -> bool {
        if self.foreground.is_some() {
            return false;
        }
        self.completer.reset();
        let control = JobControl::new();
        let (tx, rx) = oneshot::channel();
        let opts = ExecOptions {
            control: control.clone(),
            ..ExecOptions::interactive()
        };
        let deps = self.deps.clone();
        let line = line.to_string();
        self.executor.spawn(async move {
            let code = run_line(deps, line, opts).await;
            let _ = tx.send(code);
        });
        self.foreground = Some(Foreground { control, done: rx });
        true
    }

    /// Advance the clock to `now_ms` and run whatever became ready.
    /// Returns the exit code once the foreground line finishes.
    pub fn tick(&mut self, now_ms: f64) -> Option<i32> {
        self.deps.timers.advance(now_ms);
        self.executor.run_until_stalled();
        self.poll_foreground()
    }

    /// Run a line to completion, fast-forwarding the virtual clock while
    /// only timers are pending. A line blocked on anything else is cancelled.
    pub fn run_line(&mut self, line: &str) -> i32 {
        if !self.submit(line) {
            self.deps.sink.stderr("websh: a command is already running");
            return EXIT_FAILURE;
        }
        loop {
            self.executor.run_until_stalled();
            if let Some(code) = self.poll_foreground() {
                return code;
            }
            if self.deps.timers.advance_to_next() {
                continue;
            }
            log::warn!("foreground line is blocked with nothing to wait for; cancelling");
            self.interrupt();
            self.executor.run_until_stalled();
            return self.poll_foreground().unwrap_or_else(|| {
                self.foreground = None;
                EXIT_CANCELLED
            });
        }
    }

    /// Ctrl+C: cancel the foreground line
    pub fn interrupt(&mut self) -> bool {
        match &self.foreground {
            Some(fg) => {
                fg.control.cancel();
                true
            }
            None => false,
        }
    }

    /// Run background work until every job finishes or only external
    /// events could make progress
    pub fn settle(&mut self) {
        loop {
            self.executor.run_until_stalled();
            self.poll_foreground();
            if !self.executor.has_tasks() || !self.deps.timers.advance_to_next() {
                return;
            }
        }
    }

    pub fn complete(&mut self, input: &str, cursor: usize) -> Completion {
        self.completer.complete(&self.deps, input, cursor)
    }

    /// Save now, driving the executor until the write settles
    pub fn save(&mut self) -> Result<SaveOutcome, StorageError> {
        let (tx, mut rx) = oneshot::channel();
        let deps = self.deps.clone();
        self.executor.spawn(async move {
            let _ = tx.send(deps.save().await);
        });
        self.executor.run_until_stalled();
        match rx.try_recv() {
            Ok(Some(result)) => result,
            _ => Ok(SaveOutcome::Queued),
        }
    }

    fn poll_foreground(&mut self) -> Option<i32> {
        let fg = self.foreground.as_mut()?;
        let code = match fg.done.try_recv() {
            Ok(Some(code)) => code,
            Ok(None) => return None,
            Err(_) => EXIT_FAILURE,
        };
        self.foreground = None;
        self.finish_line();
        Some(code)
    }

    /// Autosave and refresh the prompt
    fn finish_line(&mut self) {
        if self.deps.config.autosave && self.deps.needs_save() {
            let deps = self.deps.clone();
            self.executor.spawn(async move {
                if let Err(e) = deps.save().await {
                    deps.sink.stderr(&format!("websh: save failed: {}", e));
                }
            });
            self.executor.run_until_stalled();
        }
        self.deps.sink.set_prompt(&self.prompt());
    }
}
