//! Bridges `Frame` to the raw `Bytes` a `swarmlink_transport::Channel`
//! carries. The channel already owns length-prefix framing (TCP) or
//! datagram boundaries (UDP/relay); this module only does the CBOR
//! encode/decode step on top.

use crate::{errors::Result, frame::Frame};
use bytes::Bytes;
use swarmlink_transport::Channel;

pub async fn send_frame(channel: &dyn Channel, frame: &Frame) -> Result<()> {
    let bytes = frame.to_cbor()?;
    channel.send(Bytes::from(bytes)).await?;
    Ok(())
}

pub async fn recv_frame(channel: &dyn Channel) -> Result<Frame> {
    let bytes = channel.recv().await?;
    Ok(Frame::from_cbor(&bytes)?)
}
