//! Tests for the packet channel

use std::time::Duration;

use sonde_protocol::{AppMessage, Channel, ChannelError, CheckerMessage, DecisionPoint};

#[test]
fn test_pair_preserves_message_boundaries()
{
    let (checker, app) = Channel::pair().unwrap();

    app.send(&AppMessage::Ready { pid: 42, heap_table: 0x1000 }).unwrap();
    app.send(&AppMessage::Waiting {
        point: DecisionPoint::new(3, "send"),
    })
    .unwrap();

    assert_eq!(
        checker.receive::<AppMessage>().unwrap(),
        AppMessage::Ready { pid: 42, heap_table: 0x1000 }
    );
    assert_eq!(
        checker.receive::<AppMessage>().unwrap(),
        AppMessage::Waiting {
            point: DecisionPoint::new(3, "send")
        }
    );
}

#[test]
fn test_commands_flow_back()
{
    let (checker, app) = Channel::pair().unwrap();
    checker.send(&CheckerMessage::Terminate).unwrap();
    assert_eq!(app.receive::<CheckerMessage>().unwrap(), CheckerMessage::Terminate);
}

#[test]
fn test_receive_after_peer_drop_reports_closed()
{
    let (checker, app) = Channel::pair().unwrap();
    drop(app);
    let err = checker.receive::<AppMessage>().unwrap_err();
    assert!(err.is_closed());
}

#[test]
fn test_send_after_peer_drop_reports_closed()
{
    let (checker, app) = Channel::pair().unwrap();
    drop(app);
    let err = checker.send(&CheckerMessage::Continue).unwrap_err();
    assert!(matches!(err, ChannelError::Closed));
}

#[test]
fn test_wait_readable()
{
    let (checker, app) = Channel::pair().unwrap();
    assert!(!checker.wait_readable(Some(Duration::from_millis(10))).unwrap());

    app.send(&AppMessage::Finished).unwrap();
    assert!(checker.wait_readable(Some(Duration::from_millis(10))).unwrap());
    assert_eq!(checker.receive::<AppMessage>().unwrap(), AppMessage::Finished);

    drop(app);
    assert!(checker.wait_readable(Some(Duration::from_millis(10))).unwrap());
}

#[test]
fn test_from_raw_rejects_closed_descriptor()
{
    assert!(matches!(Channel::from_raw(-1), Err(ChannelError::MissingEndpoint(_))));
}
