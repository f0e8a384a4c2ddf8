//! Networking primitives.
//!
//! Goals:
//! - One reliable (TCP) stream per observer carrying everything: handshake,
//!   spawns, replicated field batches and remote calls.
//! - Keep serialization explicit and versionable.
//!
//! Frames are a big-endian `u32` length followed by a JSON payload.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{
    ecs::{EntityId, EntityKind},
    math::Vec3,
    participant::ParticipantId,
    rpc::RemoteCall,
    sync::FieldUpdate,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 2;

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
        name: String,
    },
    Welcome {
        participant: ParticipantId,
        character: EntityId,
    },

    // ─── Entity lifecycle ───
    EntitySpawn(EntitySpawn),
    EntityDelete {
        id: EntityId,
    },

    // ─── Replication ───
    /// Host -> observer: a batch of changed fields.
    Replicate(Vec<FieldUpdate>),
    /// Either direction; the receiving channel filters by direction.
    Call(RemoteCall),

    // ─── Gameplay ───
    /// Observer -> host: movement input for a given tick.
    PlayerCommand(PlayerCommand),

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Entity spawn packet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntitySpawn {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Vec3,
    /// Local forward axis (doors swing relative to it).
    pub forward: Vec3,
}

/// Observer input for one tick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerCommand {
    pub tick: u32,
    /// Desired movement in world space, units per tick.
    pub wish: Vec3,
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    anyhow::ensure!(
        payload.len() <= MAX_FRAME_LEN,
        "frame too large: {} bytes",
        payload.len()
    );
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame too large: {len} bytes");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    decode_from_bytes(&payload)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    pub fn peer_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    /// Splits into independently owned halves so a reader task can run
    /// alongside the tick loop's writes.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (r, w) = self.stream.into_split();
        (ReliableReader { half: r }, ReliableWriter { half: w })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    half: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    half: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.half, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rpc::HostCall,
        sync::{Field, SyncTarget, SyncValue},
    };

    #[tokio::test]
    async fn frames_survive_a_byte_stream() -> anyhow::Result<()> {
        let (mut a, mut b) = tokio::io::duplex(256);
        let batch = NetMsg::Replicate(vec![FieldUpdate {
            target: SyncTarget::Entity(EntityId(3)),
            field: Field::TargetAngle,
            value: SyncValue::Float(-90.0),
        }]);
        let call = NetMsg::Call(RemoteCall::ToHost(HostCall::RequestToggleDoor {
            actor: EntityId(1),
            interaction_vector: Vec3::FORWARD,
        }));

        write_frame(&mut a, &batch).await?;
        write_frame(&mut a, &call).await?;
        assert_eq!(read_frame(&mut b).await?, batch);
        assert_eq!(read_frame(&mut b).await?, call);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_frame_is_refused() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes())
            .await
            .unwrap();
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn oversized_frame_is_not_written() {
        let (mut a, _b) = tokio::io::duplex(64);
        let huge = NetMsg::Replicate(vec![FieldUpdate {
            target: SyncTarget::Session,
            field: Field::TeamScores,
            value: SyncValue::Scores(vec![0; MAX_FRAME_LEN / 2 + 1]),
        }]);
        assert!(write_frame(&mut a, &huge).await.is_err());
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_from_bytes(b"{not json").is_err());
    }
}
