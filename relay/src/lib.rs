//! the observation record, and the request/response protocol spoken between the gateway
//! and the writer services.
//!
//! frames are json, prefixed with their length as a big endian u64

#[macro_use]
extern crate serde;
#[macro_use]
extern crate thiserror;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{self, AsyncReadExt, AsyncWriteExt};

/// largest frame `rpc_recv` will accept
pub const MAX_FRAME_LEN: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("IO Operation failed {0}")]
    IO(#[from] io::Error),
    #[error("Serialize/Deserialize failed {0}")]
    Serde(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the maximum of {MAX_FRAME_LEN}")]
    FrameTooLarge(u64),
}

/// One weather observation.
///
/// All fields are opaque, missing fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Observation {
    pub description: String,
    pub country: String,
    pub weather: String,
}

impl Observation {
    pub fn new(
        description: impl Into<String>,
        country: impl Into<String>,
        weather: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            country: country.into(),
            weather: weather.into(),
        }
    }

    /// the json payload carried by both transports
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

/// Result of publishing to one transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub info: String,
}

impl Outcome {
    pub fn ok(info: impl Into<String>) -> Self {
        Self {
            success: true,
            info: info.into(),
        }
    }

    pub fn failed(info: impl Into<String>) -> Self {
        Self {
            success: false,
            info: info.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Publish(Observation),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Outcome(Outcome),
    /// the writer could not attempt the publish at all
    Error(String),
}

/// Write a frame to a stream.
///
/// Receive it with `rpc_recv`
pub async fn rpc_send<T: Serialize>(
    socket: &mut (impl AsyncWriteExt + Unpin),
    packet: &T,
) -> Result<(), RpcError> {
    let serialized = serde_json::to_vec(packet)?;
    let len_bytes = (serialized.len() as u64).to_be_bytes();
    socket.write_all(&len_bytes).await?;
    socket.write_all(&serialized).await?;
    socket.flush().await?;
    Ok(())
}

/// Reads a frame from `socket`
///
/// this will only work if *every previous frame received was correct*
/// or if the stream was 'reset', as in no bytes from previous frames are left over
pub async fn rpc_recv<T: DeserializeOwned>(
    socket: &mut (impl AsyncReadExt + Unpin),
) -> Result<T, RpcError> {
    let mut buf = [0u8; 8]; //u64
    socket.read_exact(&mut buf).await?;
    let amnt = u64::from_be_bytes(buf);
    if amnt > MAX_FRAME_LEN {
        return Err(RpcError::FrameTooLarge(amnt));
    }
    let mut buf = vec![0u8; amnt as _];
    socket.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let obs = Observation::new("lluvia fuerte", "Costa Rica", "rain");
        let payload = obs.to_payload().unwrap();
        assert_eq!(Observation::from_payload(&payload).unwrap(), obs);
    }

    #[test]
    fn payload_keys() {
        let payload = Observation::new("a", "b", "c").to_payload().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert_eq!(obj["description"], "a");
        assert_eq!(obj["country"], "b");
        assert_eq!(obj["weather"], "c");
    }

    #[test]
    fn missing_fields_are_empty() {
        let obs = Observation::from_payload(br#"{"country":"Guatemala"}"#).unwrap();
        assert_eq!(obs, Observation::new("", "Guatemala", ""));
    }

    #[tokio::test]
    async fn frames_over_a_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let req = Request::Publish(Observation::new("nublado", "Japón", "clouds"));
        rpc_send(&mut a, &req).await.unwrap();
        rpc_send(&mut a, &Reply::Outcome(Outcome::ok("done")))
            .await
            .unwrap();
        assert_eq!(rpc_recv::<Request>(&mut b).await.unwrap(), req);
        assert_eq!(
            rpc_recv::<Reply>(&mut b).await.unwrap(),
            Reply::Outcome(Outcome::ok("done"))
        );
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN + 1).to_be_bytes()).await.unwrap();
        match rpc_recv::<Request>(&mut b).await {
            Err(RpcError::FrameTooLarge(n)) => assert_eq!(n, MAX_FRAME_LEN + 1),
            other => panic!("expected FrameTooLarge, got {other:?}"),
        }
    }
}
