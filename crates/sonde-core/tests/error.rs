//! Tests for error handling

use sonde_core::error::{ExitCause, SondeError, SondeResult};
use sonde_core::types::Address;
use sonde_protocol::ChannelError;

#[test]
fn test_exit_cause_display()
{
    assert_eq!(ExitCause::Exited(3).to_string(), "exited with status 3");
    assert_eq!(
        ExitCause::Signaled {
            signal: 11,
            core_dumped: true
        }
        .to_string(),
        "crashed with signal 11 (core dumped)"
    );
    assert_eq!(ExitCause::Killed.to_string(), "killed by the checker");
}

#[test]
fn test_only_signals_are_crashes()
{
    assert!(ExitCause::Signaled {
        signal: 6,
        core_dumped: false
    }
    .is_crash());
    assert!(!ExitCause::Exited(1).is_crash());
    assert!(!ExitCause::Killed.is_crash());
}

#[test]
fn test_sonde_error_display()
{
    let error = SondeError::NotMapped {
        address: Address::from(0x1000),
        len: 8,
    };
    assert_eq!(error.to_string(), "address range 0x0000000000001000 (+8 bytes) is not mapped");

    let error = SondeError::ProcessGone(ExitCause::Exited(0));
    assert_eq!(error.to_string(), "process is gone: exited with status 0");
    assert!(error.is_process_gone());

    let error = SondeError::MalformedImage {
        object: "libfoo.so".to_string(),
        reason: "bad magic".to_string(),
    };
    let message = error.to_string();
    assert!(message.contains("libfoo.so") && message.contains("bad magic"));
    assert!(!error.is_process_gone());

    let error = SondeError::NoApplicableLocation {
        pc: Address::from(0x4010),
    };
    assert!(error.to_string().contains("0x0000000000004010"));

    let error = SondeError::Deadlock("unset future".to_string());
    assert!(error.to_string().contains("deadlock"));
}

#[test]
fn test_conversions()
{
    let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
    let error: SondeError = io.into();
    assert!(matches!(error, SondeError::Io(_)));
    assert!(error.to_string().contains("missing file"));

    let error: SondeError = ChannelError::Closed.into();
    assert!(matches!(error, SondeError::Channel(ChannelError::Closed)));
    assert_eq!(error.to_string(), "control channel error: control channel closed by peer");
}

#[test]
fn test_result_alias()
{
    fn lookup(found: bool) -> SondeResult<u32>
    {
        if found {
            Ok(1)
        } else {
            Err(SondeError::NotFound("symbol `main`".to_string()))
        }
    }

    assert_eq!(lookup(true).unwrap(), 1);
    assert_eq!(lookup(false).unwrap_err().to_string(), "not found: symbol `main`");
}
