//! Property tests checking the WAL against a reference model.

use proptest::prelude::*;
use segwal_testkit::prelude::*;
use segwal_core::{LogEntry, WalError};

fn check_matches_model(wal: &segwal_core::Wal, model: &LogModel) -> Result<(), TestCaseError> {
    prop_assert_eq!(wal.first_index().unwrap(), model.first_index());
    prop_assert_eq!(wal.last_index().unwrap(), model.last_index());
    prop_assert!(model.first_index() <= model.last_index());

    for expected in model.entries() {
        let got = wal.get_log(expected.index).unwrap();
        prop_assert_eq!(got, expected);
    }
    let last = model.last_index();
    prop_assert!(wal.get_log(last + 1).unwrap_err().is_not_found());
    if model.first_index() > 1 {
        prop_assert!(wal.get_log(model.first_index() - 1).unwrap_err().is_not_found());
    }
    Ok(())
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn memory_wal_follows_model(ops in wal_op_sequence_strategy(1, 30)) {
        let mut test_wal = TestWal::memory(2048);
        let mut model = LogModel::new();

        for op in &ops {
            if !model.apply(&test_wal, op).unwrap() {
                test_wal = test_wal.reopen();
            }
            check_matches_model(&test_wal, &model)?;
        }
    }

    #[test]
    fn file_wal_follows_model(ops in wal_op_sequence_strategy(1, 20)) {
        let mut test_wal = TestWal::file(2048);
        let mut model = LogModel::new();

        for op in &ops {
            if !model.apply(&test_wal, op).unwrap() {
                test_wal = test_wal.reopen();
            }
        }
        check_matches_model(&test_wal, &model)?;

        let test_wal = test_wal.reopen();
        check_matches_model(&test_wal, &model)?;
    }

    #[test]
    fn rejected_batch_leaves_log_unchanged(
        count in 1u64..40,
        gap in 2u64..10,
    ) {
        let test_wal = TestWal::memory(2048);
        let written = entries(1..=count, 64);
        test_wal.store_logs(&written).unwrap();

        let skipping = vec![entry(count + gap, 64)];
        let err = test_wal.store_logs(&skipping).unwrap_err();
        prop_assert!(matches!(err, WalError::NonMonotonic { .. }), "{:?}", err);

        let mut broken: Vec<LogEntry> = entries(count + 1..=count + 3, 64);
        broken[2].index += gap;
        prop_assert!(test_wal.store_logs(&broken).is_err());

        assert_log_eq(&test_wal, &written);
    }

    #[test]
    fn generated_entries_round_trip(
        batch in (1usize..20).prop_flat_map(|n| {
            (1..=n as u64).map(entry_strategy).collect::<Vec<_>>()
        })
    ) {
        let test_wal = TestWal::memory(2048);
        test_wal.store_logs(&batch).unwrap();
        let test_wal = test_wal.reopen();
        assert_log_eq(&test_wal, &batch);
    }

    #[test]
    fn purge_then_append_continues(count in 1u64..60, restart in prop::option::of(1u64..500)) {
        let test_wal = TestWal::memory(2048);
        test_wal.store_logs(&entries(1..=count, 80)).unwrap();
        test_wal.delete_range(1, count).unwrap();
        prop_assert_eq!(test_wal.first_index().unwrap(), 0);
        prop_assert_eq!(test_wal.last_index().unwrap(), 0);

        let start = restart.unwrap_or(count + 1);
        let next = entries(start..=start + 4, 80);
        test_wal.store_logs(&next).unwrap();
        assert_log_eq(&test_wal, &next);
    }
}
