use std::{net::SocketAddr, time::Duration};

use relay::{rpc_recv, rpc_send, Observation, Outcome, Reply, Request};
use tokio::{net::TcpStream, time::timeout};

use super::{Transport, TransportClient, TransportError};

/// Reaches a writer service over the network.
///
/// Every publish dials a new connection, and closes it once the reply is read.
#[derive(Debug, Clone)]
pub struct RpcTransport {
    transport: Transport,
    addr: SocketAddr,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl RpcTransport {
    pub fn new(
        transport: Transport,
        addr: SocketAddr,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            addr,
            connect_timeout,
            call_timeout,
        }
    }

    async fn call(&self, mut conn: TcpStream, record: &Observation) -> Result<Reply, TransportError> {
        rpc_send(&mut conn, &Request::Publish(record.clone())).await?;
        Ok(rpc_recv::<Reply>(&mut conn).await?)
    }
}

#[async_trait]
impl TransportClient for RpcTransport {
    fn transport(&self) -> Transport {
        self.transport
    }

    #[instrument(skip(self, record), fields(transport = %self.transport, addr = %self.addr))]
    async fn publish(&self, record: &Observation) -> Result<Outcome, TransportError> {
        let conn = match timeout(self.connect_timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    addr: self.addr,
                    source,
                })
            }
            Err(_) => return Err(TransportError::Timeout("connect")),
        };
        let reply = timeout(self.call_timeout, self.call(conn, record))
            .await
            .map_err(|_| TransportError::Timeout("publish call"))??;
        match reply {
            Reply::Outcome(outcome) => {
                debug!(success = outcome.success, "writer replied: {}", outcome.info);
                Ok(outcome)
            }
            Reply::Error(e) => Err(TransportError::Remote(e)),
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use relay::{rpc_recv, rpc_send, Observation, Outcome, Reply, Request};
    use tokio::net::TcpListener;

    use super::RpcTransport;
    use crate::transport::{Transport, TransportClient, TransportError};

    fn client(addr: std::net::SocketAddr) -> RpcTransport {
        RpcTransport::new(
            Transport::Kafka,
            addr,
            Duration::from_secs(1),
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn one_connection_per_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut seen = vec![];
            for _ in 0..2 {
                let (mut conn, _) = listener.accept().await.unwrap();
                let Request::Publish(obs) = rpc_recv::<Request>(&mut conn).await.unwrap();
                seen.push(obs.country.clone());
                rpc_send(&mut conn, &Reply::Outcome(Outcome::ok(obs.country)))
                    .await
                    .unwrap();
            }
            seen
        });
        let client = client(addr);
        let a = client
            .publish(&Observation::new("", "Guatemala", ""))
            .await
            .unwrap();
        let b = client
            .publish(&Observation::new("", "Peru", ""))
            .await
            .unwrap();
        assert_eq!(a, Outcome::ok("Guatemala"));
        assert_eq!(b, Outcome::ok("Peru"));
        assert_eq!(server.await.unwrap(), vec!["Guatemala", "Peru"]);
    }

    #[tokio::test]
    async fn refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = client(addr)
            .publish(&Observation::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn remote_error_and_hangup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let _: Request = rpc_recv(&mut conn).await.unwrap();
            rpc_send(&mut conn, &Reply::Error("broker closed".into()))
                .await
                .unwrap();
            // the second caller is hung up on without a reply
            let (conn, _) = listener.accept().await.unwrap();
            drop(conn);
        });
        let client = client(addr);
        assert!(matches!(
            client.publish(&Observation::default()).await,
            Err(TransportError::Remote(e)) if e == "broker closed"
        ));
        assert!(matches!(
            client.publish(&Observation::default()).await,
            Err(TransportError::Rpc(_))
        ));
    }
}
