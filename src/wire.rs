// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Framing for the kick socket.
//!
//! A frame is a big-endian `u32` length prefix followed by the body:
//! method id (1 byte), payload length (big-endian `u32`), payload.
//! The reply mirrors the request method; an empty payload means success
//! and a single code byte carries an error.

use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::error::Error;
use crate::error::Result;

pub const METHOD_KICK: u8 = 1;

/// Reply code: the daemon has no live throttle engine.
pub const CODE_KSM_MISSING: u8 = 1;

const HEADER_LEN: usize = 1 + 4;

// A kick carries no payload; anything this large is a confused peer.
const MAX_BODY_LEN: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub method: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn kick_request() -> Self {
        Self {
            method: METHOD_KICK,
            payload: Vec::new(),
        }
    }

    pub fn reply_ok(method: u8) -> Self {
        Self {
            method,
            payload: Vec::new(),
        }
    }

    pub fn reply_error(method: u8, code: u8) -> Self {
        Self {
            method,
            payload: vec![code],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = HEADER_LEN + self.payload.len();
        let mut buf = Vec::with_capacity(4 + body_len);
        buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        buf.push(self.method);
        buf.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < HEADER_LEN {
            return Err(Error::Protocol(format!("truncated frame: {} bytes", body.len())));
        }

        let method = body[0];
        let payload_len =
            u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
        if payload_len != body.len() - HEADER_LEN {
            return Err(Error::Protocol(format!(
                "payload length {} does not match frame body {}",
                payload_len,
                body.len()
            )));
        }

        Ok(Self {
            method,
            payload: body[HEADER_LEN..].to_vec(),
        })
    }

    /// Interpret this frame as an RPC reply.
    pub fn into_reply(self) -> Result<()> {
        match self.payload.as_slice() {
            [] => Ok(()),
            [CODE_KSM_MISSING] => Err(Error::KsmMissing),
            [code] => Err(Error::Protocol(format!("unknown reply code {}", code))),
            _ => Err(Error::Protocol("oversize reply payload".to_string())),
        }
    }
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    writer.write_all(&frame.encode()).await?;
    Ok(())
}

pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Frame> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await?;
    let body_len = u32::from_be_bytes(len) as usize;
    if body_len < HEADER_LEN || body_len > MAX_BODY_LEN {
        return Err(Error::Protocol(format!("bad frame length {}", body_len)));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    Frame::decode(&body)
}
