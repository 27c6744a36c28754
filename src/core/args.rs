use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "clima", about = "ingest weather observations over two transports")]
pub struct ArgsParser {
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// run the gateway, writers, consumers and store
    Run {
        #[command(flatten)]
        args: RunArgs,
    },
    /// kill the currently running clima daemon (if there is one)
    Kill {
        #[arg(long, short, help = "config filepath")]
        config: PathBuf,
    },
    /// submit one observation to a running gateway
    Publish {
        #[command(flatten)]
        args: PublishArgs,
    },
    /// print the records held in a store snapshot
    Dump {
        #[arg(long, short, help = "store snapshot file (usually <data>/store.json)")]
        file: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[arg(long, short, help = "config filepath")]
    pub config: PathBuf,
    #[arg(
        long,
        help = "Start and then immedietally fork, running in the background untill killed with `clima kill`"
    )]
    pub daemonize: bool,
    #[arg(
        long,
        help = "do not write a PID file, do not check for a PID file (incompatable with --daemonize)"
    )]
    pub no_safeguards: bool,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    #[arg(
        long,
        short,
        default_value = "http://127.0.0.1:8080/publicar",
        help = "gateway endpoint"
    )]
    pub url: String,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long, default_value = "")]
    pub country: String,
    #[arg(long, default_value = "")]
    pub weather: String,
}
