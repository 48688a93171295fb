use std::net::TcpListener;
use std::thread;
use symsearch::config::{Options, Parallelism, RunSettings, SearchConfig};
use symsearch::data::Dataset;
use symsearch::engines::search::{distributed, equation_search, StopReason};
use symsearch::SearchError;

fn dataset() -> Dataset {
    let x: Vec<f64> = (0..25).map(|i| i as f64 * 0.25).collect();
    let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
    Dataset::from_columns(vec![x], y).unwrap()
}

fn config() -> SearchConfig {
    let mut config = SearchConfig::default();
    config.population.populations = 4;
    config.population.population_size = 16;
    config.population.niterations = 2;
    config.population.ncycles_per_iteration = 10;
    config.population.maxsize = 8;
    config.population.tournament_selection_n = 4;
    config.migration.topn = 4;
    config.runtime.save_to_file = false;
    config.runtime.verbosity = Some(0);
    config
}

/// Start an in-process worker listening on an ephemeral port.
fn spawn_worker() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    thread::spawn(move || {
        let _ = distributed::serve_listener(listener);
    });
    addr
}

#[test]
fn test_search_over_tcp_workers() {
    let addresses = vec![spawn_worker(), spawn_worker()];
    let settings = RunSettings {
        parallelism: Some(Parallelism::Distributed),
        worker_addresses: Some(addresses),
        ..Default::default()
    };
    let outcome = equation_search(&[dataset()], Options::new(config()).unwrap(), settings).unwrap();
    assert_eq!(outcome.stop_reason, StopReason::CyclesExhausted);
    assert!(!outcome.halls_of_fame[0].is_empty());
    for pair in outcome.dominating()[0].windows(2) {
        assert!(pair[1].loss < pair[0].loss);
    }
}

#[test]
fn test_unreachable_worker_is_fatal() {
    // Bind then drop to get a port with nothing listening.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };
    let settings = RunSettings {
        parallelism: Some(Parallelism::Distributed),
        worker_addresses: Some(vec![addr]),
        ..Default::default()
    };
    let result = equation_search(&[dataset()], Options::new(config()).unwrap(), settings);
    assert!(matches!(result, Err(SearchError::Worker(_))));
}

#[test]
fn test_workers_rejected_outside_distributed_mode() {
    let settings = RunSettings {
        parallelism: Some(Parallelism::Concurrent),
        workers: Some(2),
        ..Default::default()
    };
    let result = equation_search(&[dataset()], Options::new(config()).unwrap(), settings);
    assert!(matches!(result, Err(SearchError::Configuration(_))));
}
