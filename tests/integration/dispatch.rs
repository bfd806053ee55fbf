//! End-to-end key dispatch through the server.

use crate::common::{TestFixture, flush, recv_frames};
use anyhow::Result;
use ptmux::keys::{Key, parse_key};
use ptmux::protocol::{self, MsgType};
use ptmux::transport::{Channel, compose};

fn send_key(fixture: &mut TestFixture, channel: &mut Channel, spec: &str) -> Result<()> {
    let key: Key = parse_key(spec)?;
    let payload = protocol::encode_key(&key)?;
    compose(channel, MsgType::KeyInput.as_u32(), 0, 0, None, &payload)?;
    flush(channel)?;
    fixture.pump(2)?;
    Ok(())
}

#[test]
fn test_prefix_then_detach_binding() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // Default prefix table binds d to detach-client.
    send_key(&mut fixture, &mut channel, "C-b")?;
    send_key(&mut fixture, &mut channel, "d")?;

    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::Detach.as_u32())
    );
    // The queued detach drained, so the client is gone.
    fixture.pump(1)?;
    assert_eq!(fixture.server.client_count(), 0);
    Ok(())
}

#[test]
fn test_bound_key_fires_after_bind_command() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    fixture.command(&mut channel, &["bind-key", "z", "refresh-client"])?;
    send_key(&mut fixture, &mut channel, "z")?;
    fixture.pump(1)?;

    // refresh-client produces a whole-client redraw frame.
    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::Output.as_u32() && f.payload.is_empty())
    );
    Ok(())
}

#[test]
fn test_switch_table_binding_lands_in_the_target_table() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    fixture.command(
        &mut channel,
        &["bind-key", "-T", "prefix", "w", "switch-table", "work"],
    )?;
    fixture.command(&mut channel, &["bind-key", "-T", "work", "q", "refresh-client"])?;

    // The switch must survive the post-match return to root.
    send_key(&mut fixture, &mut channel, "C-b")?;
    send_key(&mut fixture, &mut channel, "w")?;
    send_key(&mut fixture, &mut channel, "q")?;
    fixture.pump(1)?;

    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::Output.as_u32() && f.payload.is_empty())
    );
    Ok(())
}

#[test]
fn test_unbound_key_produces_no_frames() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    send_key(&mut fixture, &mut channel, "x")?;
    let frames = recv_frames(&mut channel, 1)?;
    assert!(frames.is_empty(), "forwarded keys go to the pane, not back");
    Ok(())
}

#[test]
fn test_list_keys_reports_bindings() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    fixture.command(&mut channel, &["list-keys", "-T", "prefix"])?;
    fixture.pump(1)?;

    let frames = recv_frames(&mut channel, 1)?;
    let lines: Vec<String> = frames
        .iter()
        .filter(|f| f.header.msg_type == MsgType::StatusMessage.as_u32())
        .map(|f| String::from_utf8_lossy(&f.payload).into_owned())
        .collect();
    assert!(!lines.is_empty());
    assert!(
        lines
            .iter()
            .any(|line| line.contains("-T prefix d detach-client"))
    );
    Ok(())
}

#[test]
fn test_unknown_command_reports_status_not_disconnect() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    fixture.command(&mut channel, &["explode-pane"])?;
    fixture.pump(1)?;

    let frames = recv_frames(&mut channel, 1)?;
    assert!(
        frames
            .iter()
            .any(|f| f.header.msg_type == MsgType::StatusMessage.as_u32())
    );
    assert_eq!(fixture.server.client_count(), 1);
    Ok(())
}

#[test]
fn test_repeat_window_expires_back_to_root() -> Result<()> {
    let mut fixture = TestFixture::new()?;
    let mut channel = fixture.attach()?;

    // Up in the prefix table is repeat-eligible (resize-pane).
    send_key(&mut fixture, &mut channel, "C-b")?;
    send_key(&mut fixture, &mut channel, "Up")?;

    // Within the window the same key fires without the prefix; resize
    // requests coalesce, so wait out both the resize tick and the repeat
    // window.
    send_key(&mut fixture, &mut channel, "Up")?;
    std::thread::sleep(std::time::Duration::from_millis(80));
    fixture.pump(4)?;

    // After expiry the key no longer resolves in the prefix table.
    send_key(&mut fixture, &mut channel, "Up")?;
    fixture.pump(2)?;
    assert_eq!(fixture.server.client_count(), 1);
    Ok(())
}
