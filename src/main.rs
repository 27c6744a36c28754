#[macro_use]
extern crate async_trait;
#[macro_use]
extern crate tracing;
#[macro_use]
extern crate anyhow;

use std::sync::Arc;

use anyhow::Result;

mod broker;
mod consumer;
mod core;
mod gateway;
mod misc;
mod pipeline;
mod store;
mod transport;
mod writer;


use crate::{
    core::{config::Config, shutdown::Shutdown},
    misc::DirPath,
    pipeline::{Listeners, Pipeline},
    store::MemoryStore,
};

fn main() -> Result<()> {
    core::rt::stage0_delegate()
}

async fn async_main(cfg: Config, shutdown: &mut Shutdown, data_dir: DirPath) -> Result<()> {
    // trap the ctrl+c signal, will only start listening later in the main loop
    core::shutdown::util::trap_ctrl_c(shutdown.handle()).await;

    info!("Loading store");
    let store = Arc::new(MemoryStore::open(data_dir.path("store.json")).await?);

    let listeners = Listeners::bind(&cfg).await?;
    let pipeline = Pipeline::start(&cfg, listeners, store.clone(), shutdown).await?;
    tokio::spawn(core::autosave::autosave(
        store.clone(),
        cfg.store.autosave(),
        shutdown.handle(),
    ));
    info!(
        "clima is running: gateway on {}, kafka writer on {}, rabbit writer on {}",
        cfg.gateway.listen, cfg.kafka.listen, cfg.rabbit.listen
    );

    let mut handle = shutdown.handle();
    handle.wait_for_shutdown().await;
    drop(handle);

    info!("waiting for consumers to finish");
    pipeline.drain().await;
    info!("saving store");
    store.sync().await?;
    Ok(())
}
