//! Position machine invariants under sequential and concurrent use.

use snipebot::domain::position::PositionContext;
use snipebot::domain::state::position::{
    PositionState, PositionStateMachine, PositionTrigger, TransitionOutcome,
};
use std::sync::Arc;

fn monitoring(entry: f64, amount: f64) -> PositionStateMachine {
    let machine = PositionStateMachine::new(PositionContext::new("p1", "T1", entry, amount));
    machine.transition(PositionTrigger::PositionOpened).unwrap();
    machine
}

/// Happy path: profit exit with final PnL written atomically at close.
#[test]
fn test_buy_to_exit_lifecycle() {
    let machine = monitoring(0.1, 1000.0);

    assert!(machine.update_price(0.11));
    assert!(machine.update_price(0.16));
    let ctx = machine.context();
    assert!((ctx.pnl_percent.unwrap() - 60.0).abs() < 1e-9);

    machine
        .transition(PositionTrigger::ExitConditionMet {
            reason: "profit target".into(),
        })
        .unwrap();
    machine.transition(PositionTrigger::ExitApproved).unwrap();
    machine.transition(PositionTrigger::ExitCompleted).unwrap();

    assert_eq!(machine.state(), PositionState::Closed);
    let ctx = machine.context();
    assert_eq!(ctx.exit_reason.as_deref(), Some("profit target"));
    assert!(ctx.exit_timestamp.is_some());
    assert!((ctx.pnl_percent.unwrap() - 60.0).abs() < 1e-9);
    assert!((ctx.pnl_usd.unwrap() - 60.0).abs() < 1e-9);
}

/// Every observed state stays within the allowed set for random-ish
/// trigger sequences, and rejected triggers never move the machine.
#[test]
fn test_observed_states_stay_in_allowed_set() {
    let triggers = [
        PositionTrigger::PositionOpened,
        PositionTrigger::ExitConditionMet {
            reason: "x".into(),
        },
        PositionTrigger::ExitApproved,
        PositionTrigger::ExitRejected,
        PositionTrigger::PauseRequested,
        PositionTrigger::ResumeRequested,
        PositionTrigger::ManualExitRequested,
        PositionTrigger::RecoveryCompleted,
        PositionTrigger::ExitCompleted,
    ];
    let machine = monitoring(0.1, 100.0);
    for i in 0..500 {
        let trigger = triggers[(i * 7 + 3) % triggers.len()].clone();
        let before = machine.state();
        let result = machine.transition(trigger);
        let after = machine.state();
        if result.is_err() {
            assert_eq!(before, after, "rejected trigger moved the machine");
        }
        // State is always one of the named seven.
        let _ = PositionState::from_u8(after.as_u8());
        if after == PositionState::Closed {
            break;
        }
    }
}

/// Property: CLOSED is reached at most once; a second EXIT_COMPLETED
/// fails without mutation.
#[test]
fn test_closed_exactly_once() {
    let machine = monitoring(0.1, 1000.0);
    machine.update_price(0.2);
    machine
        .transition(PositionTrigger::ManualExitRequested)
        .unwrap();
    machine.transition(PositionTrigger::ExitApproved).unwrap();
    machine.transition(PositionTrigger::ExitCompleted).unwrap();

    let frozen = machine.context();
    let history_len = machine.history().len();

    assert!(machine.transition(PositionTrigger::ExitCompleted).is_err());
    let after = machine.context();
    assert_eq!(frozen.exit_timestamp, after.exit_timestamp);
    assert_eq!(frozen.pnl_usd, after.pnl_usd);
    assert_eq!(machine.history().len(), history_len);
}

/// S5: invalid prices never mutate context, history or state.
#[test]
fn test_invalid_prices_rejected() {
    let machine = monitoring(0.1, 1000.0);
    machine.update_price(0.12);
    let before = machine.context();
    let history_before = machine.history().len();

    for bad in [-1.0, 0.0, f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        assert!(!machine.update_price(bad), "price {bad} must be rejected");
    }

    let after = machine.context();
    assert_eq!(before.current_price, after.current_price);
    assert_eq!(before.pnl_percent, after.pnl_percent);
    assert_eq!(before.pnl_usd, after.pnl_usd);
    assert_eq!(before.last_price_update, after.last_price_update);
    assert_eq!(machine.history().len(), history_before);
    assert_eq!(machine.state(), PositionState::Monitoring);
}

/// Property: after N effective transitions the history holds
/// min(N+1, 50) records (the +1 is the creation entry).
#[test]
fn test_history_bound_formula() {
    let machine = PositionStateMachine::new(PositionContext::new("p1", "T1", 0.1, 100.0));
    assert_eq!(machine.history().len(), 1);

    machine.transition(PositionTrigger::PositionOpened).unwrap();
    assert_eq!(machine.history().len(), 2);

    let mut transitions = 1usize;
    for _ in 0..40 {
        machine.transition(PositionTrigger::PauseRequested).unwrap();
        machine.transition(PositionTrigger::ResumeRequested).unwrap();
        transitions += 2;
        assert_eq!(machine.history().len(), (transitions + 1).min(50));
    }
    assert_eq!(machine.history().len(), 50);
}

/// S4: a manual exit racing a 25 % price drop. The exit wins exactly
/// once, the context carries the updated price, and history shows one
/// MONITORING→EXIT_PENDING edge.
#[test]
fn test_concurrent_exit_and_price_update() {
    for _ in 0..300 {
        let machine = Arc::new(monitoring(0.2, 500.0));
        machine.update_price(0.2);

        let m1 = Arc::clone(&machine);
        let price_thread = std::thread::spawn(move || m1.update_price(0.15));
        let m2 = Arc::clone(&machine);
        let exit_thread =
            std::thread::spawn(move || m2.transition(PositionTrigger::ManualExitRequested));

        assert!(price_thread.join().unwrap());
        let outcome = exit_thread.join().unwrap().unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Changed(PositionState::ExitPending)
        );

        let ctx = machine.context();
        assert_eq!(ctx.current_price, Some(0.15));
        assert!((ctx.pnl_percent.unwrap() + 25.0).abs() < 1e-9);
        assert!((ctx.pnl_usd.unwrap() + 25.0).abs() < 1e-9);

        let edges: Vec<_> = machine
            .history()
            .into_iter()
            .filter(|r| r.from == "MONITORING" && r.to == "EXIT_PENDING")
            .collect();
        assert_eq!(edges.len(), 1);
    }
}

/// Property 2: a reader that sees CLOSED sees the final PnL quadruple
/// consistent with the last accepted price.
#[test]
fn test_close_freezes_consistent_pnl() {
    for _ in 0..200 {
        let machine = Arc::new(monitoring(0.1, 1000.0));
        machine
            .transition(PositionTrigger::ManualExitRequested)
            .unwrap();
        machine.transition(PositionTrigger::ExitApproved).unwrap();

        let m1 = Arc::clone(&machine);
        let closer = std::thread::spawn(move || {
            m1.transition(PositionTrigger::ExitCompleted).unwrap();
        });
        let m2 = Arc::clone(&machine);
        let ticker = std::thread::spawn(move || {
            for price in [0.12, 0.14, 0.16] {
                m2.update_price(price);
            }
        });
        closer.join().unwrap();
        ticker.join().unwrap();

        assert_eq!(machine.state(), PositionState::Closed);
        let ctx = machine.context();
        // Whatever the last accepted price was, the stored PnL pair must
        // be derived from it.
        if let Some(price) = ctx.current_price {
            let expected_pct = (price - 0.1) / 0.1 * 100.0;
            let expected_usd = (price - 0.1) * 1000.0;
            assert!((ctx.pnl_percent.unwrap() - expected_pct).abs() < 1e-9);
            assert!((ctx.pnl_usd.unwrap() - expected_usd).abs() < 1e-9);
        }
    }
}

/// Transitions racing each other: exactly one effective winner per edge.
#[test]
fn test_transition_race_single_winner() {
    for _ in 0..300 {
        let machine = Arc::new(monitoring(0.1, 100.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&machine);
                std::thread::spawn(move || m.transition(PositionTrigger::PauseRequested))
            })
            .collect();
        let effective = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Ok(TransitionOutcome::Changed(_))))
            .count();
        assert_eq!(effective, 1);
        assert_eq!(machine.state(), PositionState::Paused);
    }
}
