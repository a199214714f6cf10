//! Command wire protocol
//!
//! Requests and responses are prost messages carried over a
//! length-delimited framed channel on the command port: a big-endian u32
//! length prefix followed by the encoded record.

use bytes::BytesMut;
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::coordinator::records::{Node, PartitionsTable};

/// Upper bound on a single frame. A partitions table for a large fleet is
/// well under this; anything bigger is a corrupt or hostile peer.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum CmdType {
    Join = 0,
    Ping = 1,
    Pull = 2,
    Init = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    NotLeader = 1,
    Invalid = 2,
    Internal = 3,
}

/// What a PING caller should do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum PingHint {
    Ok = 0,
    /// The endpoint has no liveness entry; it must JOIN again.
    Rejoin = 1,
    /// The caller's epoch is behind; it should PULL.
    StaleEpoch = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct JoinRequest {
    #[prost(message, required, tag = "1")]
    pub node: Node,
}

#[derive(Clone, PartialEq, Message)]
pub struct PingRequest {
    #[prost(message, required, tag = "1")]
    pub node: Node,
    /// Last epoch the caller has seen.
    #[prost(int64, tag = "2")]
    pub epoch: i64,
}

#[derive(Clone, PartialEq, Message)]
pub struct InitRequest {
    #[prost(uint32, tag = "1")]
    pub num: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct MetaRequest {
    #[prost(enumeration = "CmdType", tag = "1")]
    pub cmd: i32,
    #[prost(message, optional, tag = "2")]
    pub join: Option<JoinRequest>,
    #[prost(message, optional, tag = "3")]
    pub ping: Option<PingRequest>,
    #[prost(message, optional, tag = "4")]
    pub init: Option<InitRequest>,
}

impl MetaRequest {
    pub fn join(node: Node) -> Self {
        Self {
            cmd: CmdType::Join as i32,
            join: Some(JoinRequest { node }),
            ..Default::default()
        }
    }

    pub fn ping(node: Node, epoch: i64) -> Self {
        Self {
            cmd: CmdType::Ping as i32,
            ping: Some(PingRequest { node, epoch }),
            ..Default::default()
        }
    }

    pub fn pull() -> Self {
        Self {
            cmd: CmdType::Pull as i32,
            ..Default::default()
        }
    }

    pub fn init(num: u32) -> Self {
        Self {
            cmd: CmdType::Init as i32,
            init: Some(InitRequest { num }),
            ..Default::default()
        }
    }

    /// Commands that mutate state and must execute on the leader.
    pub fn is_write(&self) -> bool {
        self.cmd == CmdType::Join as i32 || self.cmd == CmdType::Init as i32
    }
}

#[derive(Clone, PartialEq, Message)]
pub struct MetaResponse {
    #[prost(enumeration = "CmdType", tag = "1")]
    pub cmd: i32,
    #[prost(enumeration = "StatusCode", tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub msg: String,
    /// Current cluster epoch, set on JOIN and PING responses.
    #[prost(int64, tag = "4")]
    pub epoch: i64,
    #[prost(enumeration = "PingHint", tag = "5")]
    pub hint: i32,
    /// Partitions table, set on PULL responses.
    #[prost(message, optional, tag = "6")]
    pub table: Option<PartitionsTable>,
    /// Hint at the current leader, set on NOT_LEADER responses when known.
    #[prost(message, optional, tag = "7")]
    pub leader: Option<Node>,
}

impl MetaResponse {
    pub fn ok(cmd: i32) -> Self {
        Self {
            cmd,
            code: StatusCode::Ok as i32,
            ..Default::default()
        }
    }

    pub fn error(cmd: i32, code: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            cmd,
            code: code as i32,
            msg: msg.into(),
            ..Default::default()
        }
    }

    pub fn not_leader(cmd: i32, leader: Option<Node>) -> Self {
        Self {
            cmd,
            code: StatusCode::NotLeader as i32,
            msg: "not leader".to_string(),
            leader,
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok as i32
    }
}

/// Write one length-prefixed frame.
pub async fn write_frame<W, M>(writer: &mut W, msg: &M) -> crate::Result<()>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let body = msg.encode_to_vec();
    if body.len() > MAX_FRAME_LEN {
        return Err(crate::Error::Internal(format!(
            "frame too large: {} bytes",
            body.len()
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame and decode it.
pub async fn read_frame<R, M>(reader: &mut R) -> crate::Result<M>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(crate::Error::Corruption(format!(
            "frame length {} exceeds limit",
            len
        )));
    }
    let mut body = BytesMut::zeroed(len);
    reader.read_exact(&mut body[..]).await?;
    Ok(M::decode(body.freeze())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let req = MetaRequest::ping(Node::new("10.0.0.1", 5000), 3);

        let mut buf = Vec::new();
        write_frame(&mut buf, &req).await.unwrap();

        let decoded: MetaRequest = read_frame(&mut buf.as_slice()).await.unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.ping.unwrap().epoch, 3);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        // A forged header claiming a huge body must be rejected before
        // any allocation.
        let mut buf = Vec::new();
        tokio::io::AsyncWriteExt::write_u32(&mut buf, (MAX_FRAME_LEN + 1) as u32)
            .await
            .unwrap();
        let err = read_frame::<_, MetaRequest>(&mut buf.as_slice())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Corruption(_)));
    }

    #[test]
    fn test_write_flags() {
        assert!(MetaRequest::join(Node::new("a", 1)).is_write());
        assert!(MetaRequest::init(4).is_write());
        assert!(!MetaRequest::ping(Node::new("a", 1), 0).is_write());
        assert!(!MetaRequest::pull().is_write());
    }

    #[test]
    fn test_response_constructors() {
        let resp = MetaResponse::not_leader(CmdType::Join as i32, Some(Node::new("10.0.0.5", 9200)));
        assert!(!resp.is_ok());
        assert_eq!(resp.code, StatusCode::NotLeader as i32);
        assert_eq!(resp.leader.unwrap().port, 9200);
    }
}
