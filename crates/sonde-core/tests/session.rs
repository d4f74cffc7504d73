//! Tests for the checker session against forked checked programs

#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sonde_core::error::{ExitCause, SondeError};
use sonde_core::inferior::Inferior;
use sonde_core::platform::linux::LinuxProcess;
use sonde_core::session::{Session, StepOutcome};
use sonde_core::types::{ProcessId, ProcessStatus};
use sonde_protocol::app::Client;
use sonde_protocol::{Channel, ChannelError, CheckerMessage, DecisionPoint};

const TRACEME_REFUSED: i32 = 126;
const POLL: Duration = Duration::from_millis(5);

/// Descriptor of the checked end, read by the child after fork.
static CHILD_FD: AtomicI32 = AtomicI32::new(-1);
static FORK_LOCK: Mutex<()> = Mutex::new(());

fn connect() -> Result<Client, ChannelError>
{
    Ok(Client::new(Channel::from_raw(CHILD_FD.load(Ordering::SeqCst))?))
}

fn exit_with(result: Result<(), ChannelError>) -> !
{
    let code = if result.is_ok() { 0 } else { 1 };
    unsafe { libc::_exit(code) }
}

fn two_decisions() -> !
{
    exit_with((|| {
        let client = connect()?;
        if client.ready()? == CheckerMessage::Terminate {
            return Ok(());
        }
        for id in 0..2 {
            if client.decision(DecisionPoint::new(id, format!("tick {id}")))? == CheckerMessage::Terminate {
                return Ok(());
            }
        }
        client.finished()
    })())
}

fn crash_after_ready() -> !
{
    let result = connect().and_then(|client| client.ready());
    if result.is_ok() {
        unsafe {
            libc::signal(libc::SIGSEGV, libc::SIG_DFL);
            libc::raise(libc::SIGSEGV);
        }
    }
    exit_with(result.map(|_| ()))
}

/// Fork a traced child holding the checked end of a fresh channel.
fn spawn_session(body: fn() -> !) -> Option<Session>
{
    let _lock = FORK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let (checker, checked) = Channel::pair().unwrap();
    CHILD_FD.store(checked.raw_fd(), Ordering::SeqCst);

    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");
    if pid == 0 {
        unsafe {
            let null = std::ptr::null_mut::<libc::c_void>();
            if libc::ptrace(libc::PTRACE_TRACEME, 0, null, null) == -1 {
                libc::_exit(TRACEME_REFUSED);
            }
            libc::raise(libc::SIGSTOP);
        }
        body();
    }
    drop(checked);

    match LinuxProcess::from_traced_child(ProcessId(pid as u32)) {
        Ok(process) => Some(Session::new(process, checker, POLL)),
        Err(SondeError::ProcessGone(ExitCause::Exited(TRACEME_REFUSED))) => {
            eprintln!("ptrace is not permitted here; skipping");
            None
        }
        Err(error) => panic!("failed to adopt traced child: {error}"),
    }
}

#[test]
fn test_steps_through_every_decision_point()
{
    let Some(mut session) = spawn_session(two_decisions) else {
        return;
    };

    let handshake = session.handshake().unwrap();
    assert_eq!(ProcessId(handshake.pid), session.process().pid());
    assert_eq!(session.handshake_info(), Some(handshake));

    assert_eq!(
        session.step().unwrap(),
        StepOutcome::Decision(DecisionPoint::new(0, "tick 0"))
    );
    assert_eq!(
        session.step().unwrap(),
        StepOutcome::Decision(DecisionPoint::new(1, "tick 1"))
    );
    assert_eq!(session.step().unwrap(), StepOutcome::Terminated(ExitCause::Exited(0)));

    // Termination is reported once
    assert!(matches!(
        session.step(),
        Err(SondeError::ProcessGone(ExitCause::Exited(0)))
    ));
}

#[test]
fn test_step_performs_the_handshake_when_needed()
{
    let Some(mut session) = spawn_session(two_decisions) else {
        return;
    };
    assert!(matches!(session.step().unwrap(), StepOutcome::Decision(point) if point.id == 0));
    assert!(session.handshake_info().is_some());
}

#[test]
fn test_terminate_at_a_decision_point()
{
    let Some(mut session) = spawn_session(two_decisions) else {
        return;
    };
    assert!(matches!(session.step().unwrap(), StepOutcome::Decision(_)));
    assert_eq!(session.terminate().unwrap(), ExitCause::Exited(0));
    assert!(session.step().unwrap_err().is_process_gone());
}

#[test]
fn test_crash_is_reported_as_termination()
{
    let Some(mut session) = spawn_session(crash_after_ready) else {
        return;
    };
    session.handshake().unwrap();

    let cause = match session.step().unwrap() {
        StepOutcome::Terminated(cause) => cause,
        other => panic!("expected termination, got {other:?}"),
    };
    assert!(cause.is_crash(), "unexpected cause: {cause}");
    assert!(matches!(cause, ExitCause::Signaled { signal, .. } if signal == libc::SIGSEGV));

    assert_eq!(session.process().status(), ProcessStatus::Gone(cause));
    assert!(matches!(session.step(), Err(SondeError::ProcessGone(found)) if found == cause));
}

#[test]
fn test_kill_handle_ends_the_session()
{
    let Some(mut session) = spawn_session(two_decisions) else {
        return;
    };
    assert!(matches!(session.step().unwrap(), StepOutcome::Decision(_)));

    session.kill_handle().kill().unwrap();
    assert_eq!(session.kill().unwrap(), ExitCause::Killed);
    assert!(matches!(session.step(), Err(SondeError::ProcessGone(ExitCause::Killed))));
}
