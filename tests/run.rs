//! Integration tests for the `run` command.
use gridmarket::cli::{RunOpts, handle_run_command};
use gridmarket::log::is_logger_initialised;
use gridmarket::settings::Settings;
use std::path::PathBuf;
use tempfile::tempdir;

/// Get the path to the example model.
fn get_model_dir() -> PathBuf {
    PathBuf::from("demos/three_node")
}

/// An integration test for the `run` command.
#[test]
fn test_handle_run_command() {
    unsafe { std::env::set_var("GRIDMARKET_LOG_LEVEL", "off") };
    assert!(!is_logger_initialised());

    {
        // Save results to non-existent directory to check that directory creation works
        let tempdir = tempdir().unwrap();
        let output_dir = tempdir.path().join("results");
        let opts = RunOpts {
            output_dir: Some(output_dir.clone()),
            ..Default::default()
        };
        handle_run_command(&get_model_dir(), &opts, Some(Settings::default())).unwrap();
        assert!(is_logger_initialised());

        assert!(output_dir.join("metadata.toml").is_file());
        for horizon in ["1-12", "13-24"] {
            let horizon_dir = output_dir.join("three_node").join(horizon);
            for file_name in ["generation.csv", "balance.csv", "line_flow.csv", "prices.csv"] {
                assert!(
                    horizon_dir.join(file_name).is_file(),
                    "{file_name} missing for {horizon}"
                );
            }
        }
    }

    // Second time will fail because the logging is already initialised
    let opts = RunOpts {
        output_dir: Some(tempdir().unwrap().path().to_path_buf()),
        ..Default::default()
    };
    assert_eq!(
        handle_run_command(&get_model_dir(), &opts, Some(Settings::default()))
            .unwrap_err()
            .chain()
            .next()
            .unwrap()
            .to_string(),
        "Failed to initialise logging."
    );
}
