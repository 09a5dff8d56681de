//! websh CLI - the shell in a native terminal
//!
//! Run with: cargo run --bin websh-cli -- [--config shell.json] [--state FILE] [-c LINE]...
//! Log verbosity follows RUST_LOG (default `warn`).

#[cfg(not(target_arch = "wasm32"))]
mod cli {
    use clap::Parser;
    use futures::executor::block_on;
    use std::path::PathBuf;
    use std::process::ExitCode;
    use std::rc::Rc;
    use thiserror::Error;
    use websh::config::{ConfigError, ShellConfig};
    use websh::kernel::storage::StorageError;
    use websh::kernel::{BootError, Kernel};
    use websh::platform::native::{FileStorage, STATE_FILE, StdinModal, TerminalSink, run_repl};

    #[derive(Debug, Parser)]
    #[command(name = "websh-cli", version, about = "Run the websh shell in a terminal")]
    struct Cli {
        /// Shell configuration (camelCase JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Where state is persisted
        #[arg(long, default_value = STATE_FILE)]
        state: PathBuf,
        /// Run these lines in order and exit instead of prompting
        #[arg(short = 'c', long = "command")]
        commands: Vec<String>,
    }

    #[derive(Debug, Error)]
    enum CliError {
        #[error("cannot read {}: {source}", path.display())]
        ReadConfig { path: PathBuf, source: std::io::Error },
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Storage(#[from] StorageError),
        #[error(transparent)]
        Boot(#[from] BootError),
    }

    fn load_config(path: Option<&PathBuf>) -> Result<ShellConfig, CliError> {
        let Some(path) = path else {
            return Ok(ShellConfig::default());
        };
        let data = std::fs::read_to_string(path).map_err(|source| CliError::ReadConfig {
            path: path.clone(),
            source,
        })?;
        Ok(ShellConfig::from_json(&data)?)
    }

    fn run(cli: Cli) -> Result<i32, CliError> {
        let config = load_config(cli.config.as_ref())?;
        let storage = Rc::new(FileStorage::open(&cli.state)?);
        log::info!("state file: {}", storage.path().display());
        let sink = Rc::new(TerminalSink::new());
        let mut kernel = block_on(Kernel::boot(config, storage, sink.clone(), Rc::new(StdinModal)))?;

        let code = if cli.commands.is_empty() {
            println!("websh {} - type 'help' for commands, 'exit' to quit", env!("CARGO_PKG_VERSION"));
            run_repl(&mut kernel, &sink);
            0
        } else {
            cli.commands.iter().fold(0, |_, line| kernel.run_line(line))
        };
        kernel.save()?;
        Ok(code)
    }

    pub fn main() -> ExitCode {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
        match run(Cli::parse()) {
            Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            Err(e) => {
                eprintln!("websh-cli: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    cli::main()
}

#[cfg(target_arch = "wasm32")]
fn main() {}
