use std::process;

use anyhow::Result;
use clap::Parser;
use nix::{
    sys::signal::{kill, Signal},
    unistd::{daemon, Pid},
};
use tokio::runtime;

use crate::{
    core::{
        self,
        args::{self, ArgsParser, RunArgs},
        commands,
        config::Config,
        shutdown::Shutdown,
    },
    misc::DirPath,
};

const PID_FILE: &str = "daemon.lock";

pub fn stage0_delegate() -> Result<()> {
    let args = ArgsParser::parse();
    match args {
        ArgsParser {
            cmd: args::Cmd::Run { args },
        } => stage1_daemon(args),
        ArgsParser {
            cmd: args::Cmd::Kill { config },
        } => {
            let _guard = core::init_logging_no_file("info")?;
            let cfg = core::config::open_blocking(&config)?;
            let run_dir = DirPath::new(cfg.directory.run.clone());
            run_dir.ensure_exists_blocking()?;
            let pid_file = run_dir.path(PID_FILE);
            if !pid_file.try_exists()? {
                warn!("No known clima daemon is currently running, exiting with no-op");
                return Ok(());
            }
            let pid_txt = std::fs::read_to_string(pid_file)?;
            let pid = pid_txt
                .trim()
                .parse::<u32>()
                .map_err(|e| anyhow!("failed to parse PID: {e:?}"))?;
            info!("Killing process {pid} - sending SIGINT (ctrl+c) to allow for gracefull shutdown\nThe PID file will only be removed when the server has exited");
            kill(Pid::from_raw(pid.try_into()?), Some(Signal::SIGINT))?;
            Ok(())
        }
        other => {
            let _guard = core::init_logging_no_file("info")?;
            let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
            runtime.block_on(commands::delegate(other))
        }
    }
}

pub fn stage1_daemon(args: RunArgs) -> Result<()> {
    if args.daemonize && args.no_safeguards {
        eprintln!("ERROR: --no-safeguards and --daemonize are incompatable!");
        bail!("Invalid Arguments");
    }
    println!("Reading configuration from {:?}", args.config);
    if !args.config.exists() {
        bail!("Configuration file does not exist!");
    }
    let cfg = {
        let buf = std::fs::read_to_string(&args.config)?;
        core::config::from_str(&buf)?
    };

    let data_dir = DirPath::new(cfg.directory.data.clone());
    data_dir.ensure_exists_blocking()?;
    let run_dir = DirPath::new(cfg.directory.run.clone());
    run_dir.ensure_exists_blocking()?;
    let log_dir = DirPath::new(run_dir.path("log"));
    log_dir.ensure_exists_blocking()?;

    let pid_file = run_dir.path(PID_FILE);
    if pid_file.try_exists()? && !args.no_safeguards {
        println!("ERROR: A server is already running, refusing to start!");
        println!("     | If this is incorrect, remove the `{PID_FILE}` file and try again");
        bail!("Server already started");
    }

    if args.daemonize {
        println!("Forking!");
        daemon(true, true)?;
    }

    println!("Init logging");
    let guard = core::init_logging_with_file(run_dir.path("log"), &cfg.log.level)?;
    if args.no_safeguards {
        warn!("Running in no-safeguard testing mode: this is NOT what you want for production use");
        if pid_file.try_exists()? {
            warn!("A PID file exists, continuing anyway (--no-safeguards mode)");
        }
    } else {
        debug!("Writing PID file {:?}", pid_file);
        std::fs::write(&pid_file, format!("{}", process::id()).as_bytes())?;
    }
    let no_safeguards = args.no_safeguards;

    let result = std::panic::catch_unwind(move || stage2_async(cfg, data_dir));

    if !no_safeguards {
        debug!("Deleting PID file {:?}", pid_file);
        std::fs::remove_file(&pid_file)?;
    }
    match result {
        Ok(inner) => {
            drop(guard);
            inner
        }
        Err(err) => {
            error!("Main thread panic! - stuff is likely messed up: {err:?}");
            bail!("Main thread panic!");
        }
    }
}

pub fn stage2_async(cfg: Config, data_dir: DirPath) -> Result<()> {
    debug!("Launching async runtime");
    let runtime = runtime::Builder::new_multi_thread().enable_all().build()?;
    let mut shutdown = Shutdown::new();
    runtime.block_on(async {
        let result = crate::async_main(cfg, &mut shutdown, data_dir).await;
        if let Err(e) = &result {
            error!("Main task exited with error: {e:?}");
        }
        shutdown.trigger_shutdown();
        info!("shut down - waiting for tasks to stop");
        shutdown.wait_for_completion().await;
        result
    })
}
