//! `sonde run`: drive one execution of a checked program.
//!
//! Every decision point is snapshotted and added to the visited-state set.
//! When the program crashes, the decisions that led there and the stack at
//! the last decision point are printed as the counterexample.

use sonde_core::error::ExitCause;
use sonde_core::session::{Session, StepOutcome};
use sonde_core::snapshot::{
    compare, CaptureOptions, CompareMode, Comparison, Snapshot, SnapshotId, SnapshotManager, StateStore,
};
use sonde_core::unwind::StackWalker;
use sonde_protocol::DecisionPoint;
use sonde_utils::{CompareSetting, SondeConfig};
use tracing::{debug, info, warn};

use crate::CliResult;

const MAX_FRAMES: usize = 64;

/// Run `program` until it exits, crashes or reaches the state limit.
pub fn run(program: &str, args: &[String], config: &SondeConfig, show_diffs: bool) -> CliResult<ExitCause>
{
    let mode = compare_mode(config.compare);
    let mut session = Session::launch(program, args, config.poll_interval)?;

    let kill = session.kill_handle();
    ctrlc::set_handler(move || {
        if let Err(error) = kill.kill() {
            warn!(%error, "failed to kill checked process");
        }
    })?;

    let handshake = session.handshake()?;
    match handshake.heap_table {
        Some(table) => println!("Checked process {} ready (heap table at {table})", handshake.pid),
        None => println!("Checked process {} ready (no heap table)", handshake.pid),
    }

    let mut manager = SnapshotManager::new(CaptureOptions {
        capture_stack: config.capture_stack,
        stack_red_zone: config.stack_red_zone,
    });
    let mut store = StateStore::new(mode);
    let mut decisions: Vec<DecisionPoint> = Vec::new();
    let mut last_state: Option<SnapshotId> = None;

    let cause = loop {
        let point = match session.step()? {
            StepOutcome::Decision(point) => point,
            StepOutcome::Terminated(cause) => break cause,
        };

        let snapshot = manager.capture(session.process_mut())?;
        let changes = match (show_diffs, last_state.and_then(|id| store.get(id))) {
            (true, Some(previous)) => Some(compare(previous, &snapshot, mode)),
            _ => None,
        };
        let fingerprint = snapshot.fingerprint();
        let bytes = snapshot.byte_size();
        let visit = store.insert(snapshot);

        println!(
            "[{:>4}] {} `{}` -> state {} {} ({} bytes, {})",
            decisions.len(),
            point.id,
            point.label,
            visit.id(),
            if visit.is_new() { "new" } else { "seen" },
            bytes,
            fingerprint
        );
        if let Some(changes) = changes {
            print_changes(&changes);
        }

        decisions.push(point);
        last_state = Some(visit.id());

        if config.max_states.is_some_and(|max| store.len() >= max) {
            info!(states = store.len(), "state limit reached, terminating");
            break session.terminate()?;
        }
    };

    println!(
        "\nChecked process {cause} after {} decision point(s); {} distinct state(s)",
        decisions.len(),
        store.len()
    );

    if cause.is_crash() {
        print_counterexample(&decisions, last_state.and_then(|id| store.get(id)).map(|s| &**s));
    }
    Ok(cause)
}

fn compare_mode(setting: CompareSetting) -> CompareMode
{
    match setting {
        CompareSetting::Fast => CompareMode::Fast,
        CompareSetting::Exhaustive => CompareMode::Exhaustive,
    }
}

fn print_changes(changes: &Comparison)
{
    match changes {
        Comparison::Equal => println!("       unchanged"),
        Comparison::Different(diffs) => {
            for diff in diffs {
                println!("       {:?} {} - {} ({} bytes)", diff.kind, diff.start, diff.end(), diff.len);
            }
        }
    }
}

fn print_counterexample(decisions: &[DecisionPoint], last: Option<&Snapshot>)
{
    println!("\nCounterexample:");
    for (step, point) in decisions.iter().enumerate() {
        println!("  {step:>4}: {} `{}`", point.id, point.label);
    }

    let Some(snapshot) = last else {
        println!("  (crashed before the first decision point)");
        return;
    };

    println!("\nStack at the last decision point:");
    let walker = StackWalker::new(snapshot.layout(), snapshot);
    match walker.walk(snapshot.registers(), MAX_FRAMES) {
        Ok(frames) => {
            for frame in frames {
                println!("  {frame}");
            }
        }
        Err(error) => {
            debug!(%error, "stack walk failed");
            println!("  (unavailable: {error})");
        }
    }
}
