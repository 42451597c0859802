//! Unit tests for CLI commands

use crate::cli::{run, Cli, Commands};
use clap::Parser;

#[test]
fn test_serve_defaults() {
    let cli = Cli::try_parse_from(["machwire", "serve"]).unwrap();
    match cli.command {
        Commands::Serve { addr, workers, .. } => {
            assert_eq!(addr, "0.0.0.0:8080");
            assert_eq!(workers, None);
        }
        Commands::Routes { .. } => panic!("Expected Serve command"),
    }
}

#[test]
fn test_serve_with_flags() {
    let cli = Cli::try_parse_from([
        "machwire",
        "serve",
        "--addr",
        "127.0.0.1:9000",
        "--config",
        "config/config.yaml",
        "--workers",
        "4",
    ])
    .unwrap();
    match cli.command {
        Commands::Serve {
            addr,
            config,
            workers,
        } => {
            assert_eq!(addr, "127.0.0.1:9000");
            assert_eq!(config.unwrap().to_string_lossy(), "config/config.yaml");
            assert_eq!(workers, Some(4));
        }
        Commands::Routes { .. } => panic!("Expected Serve command"),
    }
}

#[test]
fn test_invalid_workers_rejected() {
    assert!(Cli::try_parse_from(["machwire", "serve", "--workers", "many"]).is_err());
}

#[test]
fn test_routes_command_runs() {
    let cli = Cli::try_parse_from(["machwire", "routes"]).unwrap();
    run(cli).unwrap();
}
