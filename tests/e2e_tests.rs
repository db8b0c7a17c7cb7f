//! End-to-end replay tests
//!
//! These tests validate the complete webhook reconciliation pipeline using
//! predefined fixtures. Each test:
//! 1. Loads seed.csv from a fixture directory into a fresh ledger
//! 2. Replays every webhook in events.jsonl
//! 3. Waits for background fee and notification work
//! 4. Compares the card CSV output with expected.csv
//!
//! Test fixtures are located in tests/fixtures/ and cover:
//! - Issuance completion and payment fees
//! - Decline fee verification (provider charged vs. not charged)
//! - Failed issuances, terminations and rejected webhooks

#[cfg(test)]
mod tests {
    use card_issuance_engine::config::EngineConfig;
    use card_issuance_engine::replay::{run_replay, ReplayOptions, ReplaySummary};
    use rstest::rstest;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// Decline verification delay used by the fixtures
    ///
    /// Provider charges following a decline must land before verification.
    const DECLINE_DELAY: Duration = Duration::from_millis(300);

    fn options(fixture_name: &str) -> ReplayOptions {
        let fixture_dir = PathBuf::from(format!("tests/fixtures/{}", fixture_name));
        ReplayOptions {
            events: fixture_dir.join("events.jsonl"),
            seed: fixture_dir.join("seed.csv"),
            fee_schedule: None,
            decline_delay: Some(DECLINE_DELAY),
        }
    }

    /// Run a fixture and compare the output with expected.csv
    ///
    /// # Arguments
    ///
    /// * `fixture_name` - Name of the fixture directory (e.g., "decline_verification")
    ///
    /// # Returns
    ///
    /// The replay summary, for further assertions
    ///
    /// # Panics
    ///
    /// Panics if fixture files cannot be read or the output doesn't match
    async fn run_test_fixture(fixture_name: &str) -> ReplaySummary {
        let options = options(fixture_name);
        let expected_path = format!("tests/fixtures/{}/expected.csv", fixture_name);

        assert!(options.seed.exists(), "Seed file not found: {}", options.seed.display());
        assert!(options.events.exists(), "Events file not found: {}", options.events.display());
        assert!(Path::new(&expected_path).exists(), "Expected file not found: {}", expected_path);

        let mut output = Vec::new();
        let summary = run_replay(&options, &EngineConfig::default(), &mut output)
            .await
            .unwrap_or_else(|e| panic!("Failed to replay {}: {}", fixture_name, e));

        let actual_output = String::from_utf8(output).expect("Output is not UTF-8");
        let expected_output = fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", expected_path, e));

        assert_eq!(
            actual_output, expected_output,
            "\n\nOutput mismatch for fixture: {}\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name, actual_output, expected_output
        );
        summary
    }

    #[rstest]
    #[case::issuance_and_payments("issuance_and_payments", 7, 6, 1, 0, 0)]
    #[case::decline_verification("decline_verification", 6, 5, 1, 0, 0)]
    #[case::failures_and_termination("failures_and_termination", 11, 6, 1, 1, 3)]
    #[tokio::test]
    async fn test_fixtures(
        #[case] fixture: &str,
        #[case] events: usize,
        #[case] applied: usize,
        #[case] duplicates: usize,
        #[case] ignored: usize,
        #[case] rejected: usize,
    ) {
        let summary = run_test_fixture(fixture).await;

        assert_eq!(summary.events, events);
        assert_eq!(summary.applied, applied);
        assert_eq!(summary.duplicates, duplicates);
        assert_eq!(summary.ignored, ignored);
        assert_eq!(summary.rejected, rejected);
        assert_eq!(summary.delivered, 0);
    }

    #[tokio::test]
    async fn test_missing_events_file_is_an_error() {
        let mut options = options("issuance_and_payments");
        options.events = PathBuf::from("tests/fixtures/does_not_exist.jsonl");

        let mut output = Vec::new();
        let result = run_replay(&options, &EngineConfig::default(), &mut output).await;

        assert!(result.is_err());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn test_custom_fee_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let schedule = dir.path().join("fees.csv");
        fs::write(
            &schedule,
            "kind,min,max,fee_type,value\n\
             issuance,0,,fixed,1.00\n\
             payment_success,0,,fixed,1.00\n\
             payment_failure,0,,fixed,0.50\n",
        )
        .unwrap();

        let mut options = options("issuance_and_payments");
        options.fee_schedule = Some(schedule);

        let mut output = Vec::new();
        run_replay(&options, &EngineConfig::default(), &mut output)
            .await
            .unwrap();

        // 50 - 20 - 1.00 + 5 and 200 + 50 - 150 - 1.00 - 1
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "external_id,reference,status,balance,currency\n\
             ext-001,iss-001,ACTIVE,34.00,USD\n\
             ext-100,seed-ext-100,ACTIVE,98.00,USD\n"
        );
    }
}
