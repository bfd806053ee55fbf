//! Resize coalescing and redraw deferral observed from a client.

use crate::common::{TestFixture, flush, recv_frames};
use anyhow::Result;
use ptmux::protocol::MsgType;
use ptmux::transport::Frame;
use std::time::Duration;

fn redraw_count(frames: &[Frame]) -> usize {
    frames
        .iter()
        .filter(|f| f.header.msg_type == MsgType::Output.as_u32())
        .count()
}

#[test]
fn test_resize_burst_collapses_to_one_redraw() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // All three requests land in one loop iteration, before the resize
    // tick fires.
    fixture.queue_command(&mut channel, &["resize-pane", "-t", "0", "90", "24"])?;
    fixture.queue_command(&mut channel, &["resize-pane", "-t", "0", "100", "24"])?;
    fixture.queue_command(&mut channel, &["resize-pane", "-t", "0", "120", "40"])?;
    flush(&mut channel)?;
    fixture.pump(1)?;

    // Resize tick, then the redraw flush.
    std::thread::sleep(Duration::from_millis(15));
    fixture.pump(3)?;

    let frames = recv_frames(&mut channel, 1)?;
    assert_eq!(redraw_count(&frames), 1, "burst applies once");
    Ok(())
}

#[test]
fn test_net_noop_resize_still_notifies_twice() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // Pane 0 starts at 40x23 (an 80x24 client split in half above the
    // status line). A -> B -> A must surface as two transitions.
    fixture.queue_command(&mut channel, &["resize-pane", "-t", "0", "100", "30"])?;
    fixture.queue_command(&mut channel, &["resize-pane", "-t", "0", "40", "23"])?;
    flush(&mut channel)?;
    fixture.pump(1)?;

    std::thread::sleep(Duration::from_millis(15));
    fixture.pump(3)?;
    let first = recv_frames(&mut channel, 1)?;
    assert_eq!(redraw_count(&first), 1, "first transition applies");

    // The return trip stays queued and applies on the next tick.
    std::thread::sleep(Duration::from_millis(15));
    fixture.pump(3)?;
    let second = recv_frames(&mut channel, 1)?;
    assert_eq!(redraw_count(&second), 1, "return transition applies");
    Ok(())
}

#[test]
fn test_refresh_defers_behind_queued_output() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // Two refreshes in one command list: the first queues output, the
    // second finds the queue busy and defers; both surface eventually as
    // redraw frames.
    fixture.command(
        &mut channel,
        &["bind-key", "q", "refresh-client", ";", "refresh-client"],
    )?;

    let key = ptmux::keys::parse_key("q")?;
    let payload = ptmux::protocol::encode_key(&key)?;
    ptmux::transport::compose(&mut channel, MsgType::KeyInput.as_u32(), 0, 0, None, &payload)?;
    flush(&mut channel)?;
    fixture.pump(2)?;

    std::thread::sleep(Duration::from_millis(15));
    fixture.pump(3)?;
    let frames = recv_frames(&mut channel, 2)?;
    assert!(redraw_count(&frames) >= 2);
    Ok(())
}
