//! The writer services: one per transport, each owning a broker adapter and answering
//! `Publish` requests from the gateway

use std::{io::ErrorKind, sync::Arc};

use anyhow::Result;
use relay::{rpc_recv, rpc_send, Reply, Request, RpcError};
use tokio::{
    net::{TcpListener, TcpStream},
    select, spawn,
};

use crate::{
    core::shutdown::{Shutdown, ShutdownHandle},
    transport::TransportClient,
};

/// Accept connections on `listener` until shutdown, serving requests with `client`
pub async fn serve(
    listener: TcpListener,
    client: Arc<dyn TransportClient>,
    mut handle: ShutdownHandle,
) -> Result<()> {
    let transport = client.transport();
    let mut shutdown_conns = Shutdown::new();
    info!("{transport} writer listening on {:?}", listener.local_addr()?);
    let res = async {
        loop {
            select! {
                _ = handle.wait_for_shutdown() => break,
                res = listener.accept() => {
                    let (sock, addr) = res?;
                    trace!("{transport} writer: new connection from {addr:?}");
                    let client = client.clone();
                    let handle = shutdown_conns.handle();
                    spawn(async move {
                        if let Err(e) = connection(sock, client, handle).await {
                            error!("{transport} writer connection {addr:?} exited with error: {e:?}");
                        }
                    });
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;
    drop(listener);
    shutdown_conns.trigger_shutdown();
    shutdown_conns.wait_for_completion().await;
    info!("{transport} writer stopped");
    res
}

/// serve requests on one connection, until the peer hangs up
async fn connection(
    mut sock: TcpStream,
    client: Arc<dyn TransportClient>,
    mut handle: ShutdownHandle,
) -> Result<(), RpcError> {
    loop {
        let req = select! {
            _ = handle.wait_for_shutdown() => return Ok(()),
            req = rpc_recv::<Request>(&mut sock) => match req {
                Ok(req) => req,
                Err(RpcError::IO(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        let reply = match req {
            Request::Publish(record) => match client.publish(&record).await {
                Ok(outcome) => {
                    info!(
                        "[{}] {}: success={} ({})",
                        client.transport(),
                        record.country,
                        outcome.success,
                        outcome.info
                    );
                    Reply::Outcome(outcome)
                }
                Err(e) => {
                    error!("[{}] could not publish {record:?}: {e}", client.transport());
                    Reply::Error(e.to_string())
                }
            },
        };
        rpc_send(&mut sock, &reply).await?;
    }
}
