//! Transport-level behavior over real sockets.

use crate::common::{TestFixture, flush, recv_frames};
use anyhow::{Context, Result};
use proptest::prelude::*;
use ptmux::protocol::{self, MsgType};
use ptmux::transport::{
    Buffer, Channel, FrameHeader, HEADER_SIZE, compose, drain_frames,
};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixStream;

#[test]
fn test_attach_handshake_reaches_ready() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let _channel = fixture.attach()?;
    assert_eq!(fixture.server.client_count(), 1);
    Ok(())
}

#[test]
fn test_descriptor_rides_its_frame_through_the_socket() -> Result<()> {
    let (mut sender, mut receiver) = Channel::pair()?;

    let mut file = tempfile::tempfile()?;
    writeln!(file, "shared")?;
    let fd: OwnedFd = file.as_fd().try_clone_to_owned()?;

    compose(&mut sender, MsgType::IdentifyStdin.as_u32(), 1, 0, Some(fd), &[])?;
    flush(&mut sender)?;

    let frames = recv_frames(&mut receiver, 1)?;
    let received = frames
        .into_iter()
        .next()
        .and_then(|f| f.fd)
        .context("descriptor arrived")?;

    // Same open file description: the received fd sees the sender's write.
    let mut clone = std::fs::File::from(received);
    clone.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    clone.read_to_string(&mut contents)?;
    assert_eq!(contents, "shared\n");
    Ok(())
}

#[test]
fn test_at_most_one_descriptor_per_send() -> Result<()> {
    let (mut sender, mut receiver) = Channel::pair()?;

    for _ in 0..2 {
        let file = tempfile::tempfile()?;
        let fd: OwnedFd = file.as_fd().try_clone_to_owned()?;
        compose(&mut sender, MsgType::IdentifyStdin.as_u32(), 1, 0, Some(fd), &[])?;
    }

    // The first send stops before the second descriptor-carrying buffer.
    sender.send()?;
    let first = recv_frames(&mut receiver, 1)?;
    assert_eq!(first.len(), 1);
    assert!(first[0].fd.is_some());

    flush(&mut sender)?;
    let second = recv_frames(&mut receiver, 1)?;
    assert_eq!(second.len(), 1);
    assert!(second[0].fd.is_some());
    Ok(())
}

#[test]
fn test_malformed_length_kills_the_connection() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;
    assert_eq!(fixture.server.client_count(), 1);

    // Declared length below the header size is unrecoverable.
    let rogue = FrameHeader {
        msg_type: MsgType::Command.as_u32(),
        length: 3,
        flags: 0,
        peer_id: 0,
        origin_id: 1,
    };
    let mut raw = raw_stream(&channel)?;
    raw.write_all(&rogue.encode())?;
    raw.flush()?;

    fixture.pump(2)?;

    // The server says why before it hangs up.
    let frames = recv_frames(&mut channel, 1)?;
    let exit = frames
        .iter()
        .find(|f| f.header.msg_type == MsgType::Exit.as_u32())
        .context("exit frame")?;
    assert_eq!(
        protocol::decode_reason(&exit.payload),
        Some("framing error".to_string())
    );

    fixture.pump(1)?;
    assert_eq!(fixture.server.client_count(), 0);
    Ok(())
}

#[test]
fn test_undeclared_descriptor_is_dropped_not_wedging_the_channel() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // A valid command frame carrying a descriptor it never declared.
    let argv = vec!["refresh-client".to_string()];
    let bytes = frame_bytes(MsgType::Command.as_u32(), &protocol::encode_command(&argv));
    let mut buf = Buffer::dynamic(bytes.len(), bytes.len())?;
    buf.set(&bytes)?;
    let file = tempfile::tempfile()?;
    buf.attach_fd(file.as_fd().try_clone_to_owned()?);
    channel.enqueue(buf);
    flush(&mut channel)?;
    fixture.pump(2)?;

    // The frame itself was applied.
    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::Output.as_u32())
    );

    // The stray descriptor was closed, so later traffic still flows.
    fixture.command(&mut channel, &["refresh-client"])?;
    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::Output.as_u32())
    );
    assert_eq!(fixture.server.client_count(), 1);
    Ok(())
}

fn raw_stream(channel: &Channel) -> Result<UnixStream> {
    let fd = channel.socket_fd().try_clone_to_owned()?;
    let stream = UnixStream::from(fd);
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn frame_bytes(msg_type: u32, payload: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        msg_type,
        length: u16::try_from(HEADER_SIZE + payload.len()).unwrap_or(u16::MAX),
        flags: 0,
        peer_id: 0,
        origin_id: 42,
    };
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Frames reassemble identically however the byte stream is fragmented.
    #[test]
    fn prop_reassembly_survives_fragmentation(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..6),
        chunk in 1usize..64,
    ) {
        let (writer, reader) = UnixStream::pair().unwrap();
        let mut writer = writer;
        let mut channel = Channel::new(reader).unwrap();

        let mut stream_bytes = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            let msg_type = 200 + u32::try_from(i % 4).unwrap();
            stream_bytes.extend_from_slice(&frame_bytes(msg_type, payload));
        }

        let mut received = Vec::new();
        for piece in stream_bytes.chunks(chunk) {
            writer.write_all(piece).unwrap();
            writer.flush().unwrap();
            loop {
                match channel.recv() {
                    Ok(_) => break,
                    Err(err) if err.is_backpressure() => {
                        std::thread::sleep(std::time::Duration::from_millis(1));
                    }
                    Err(err) => panic!("recv: {err}"),
                }
            }
            received.extend(drain_frames(&mut channel).unwrap());
        }

        prop_assert_eq!(received.len(), payloads.len());
        for (frame, payload) in received.iter().zip(&payloads) {
            prop_assert_eq!(&frame.payload, payload);
            prop_assert_eq!(frame.header.origin_id, 42);
        }
    }
}
