use std::cell::Cell;
use std::path::PathBuf;
use std::time::Duration;

use proptest::prelude::*;
use recompress::{AlgorithmId, RecompressError, RetryOutcome, RetrySupervisor};

fn timeout_err() -> RecompressError {
    RecompressError::AdapterTimeout {
        algorithm: AlgorithmId::Gmix,
        input: PathBuf::from("container.bin"),
        timeout_secs: 0,
        output: String::new(),
    }
}

#[test]
fn always_timing_out_exhausts_after_max_attempts() {
    let calls = Cell::new(0);
    let outcome = RetrySupervisor::default()
        .run::<(), _>(Duration::from_secs(100), |_, _| {
            calls.set(calls.get() + 1);
            Err(timeout_err())
        })
        .unwrap();
    assert_eq!(calls.get(), 6);
    assert_eq!(
        outcome,
        RetryOutcome::Exhausted {
            attempts: 6,
            last_timeout: Duration::from_secs(3200),
        }
    );
}

#[test]
fn hard_failure_propagates_on_first_attempt() {
    let calls = Cell::new(0);
    let err = RetrySupervisor::default()
        .run::<(), _>(Duration::from_secs(1), |_, _| {
            calls.set(calls.get() + 1);
            Err(RecompressError::Config("boom".into()))
        })
        .unwrap_err();
    assert!(matches!(err, RecompressError::Config(_)));
    assert_eq!(calls.get(), 1);
}

#[test]
fn exhausted_converts_to_fatal_error() {
    let outcome: RetryOutcome<()> = RetryOutcome::Exhausted {
        attempts: 6,
        last_timeout: Duration::from_secs(64),
    };
    match outcome.into_result(7) {
        Err(RecompressError::RetriesExhausted {
            copies: 7,
            attempts: 6,
            last_timeout_secs: 64,
        }) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

proptest! {
    #[test]
    fn success_on_attempt_k_doubles_budget_k_minus_one_times(
        k in 1u32..=6,
        initial in 1u64..100_000,
    ) {
        let seen = std::cell::RefCell::new(Vec::new());
        let outcome = RetrySupervisor::default()
            .run(Duration::from_secs(initial), |timeout, attempt| {
                seen.borrow_mut().push((attempt, timeout));
                if attempt < k { Err(timeout_err()) } else { Ok(attempt) }
            })
            .unwrap();
        let expected = Duration::from_secs(initial * 2u64.pow(k - 1));
        prop_assert_eq!(
            outcome,
            RetryOutcome::Succeeded { value: k, attempts: k, timeout: expected }
        );
        let seen = seen.into_inner();
        prop_assert_eq!(seen.len() as u32, k);
        for (i, (attempt, timeout)) in seen.iter().enumerate() {
            prop_assert_eq!(*attempt, i as u32 + 1);
            prop_assert_eq!(*timeout, Duration::from_secs(initial << i));
        }
    }
}
