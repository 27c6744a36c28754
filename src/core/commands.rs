use anyhow::Result;

use crate::core::args::{ArgsParser, Cmd};

pub mod dump;
pub mod publish;

pub async fn delegate(args: ArgsParser) -> Result<()> {
    match args.cmd {
        Cmd::Publish { args } => publish::main(args).await,
        Cmd::Dump { file } => dump::main(&file).await,
        // handled earlier
        Cmd::Kill { .. } | Cmd::Run { .. } => unreachable!(),
    }
}
