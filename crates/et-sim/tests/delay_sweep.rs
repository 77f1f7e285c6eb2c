//! Full delay-sweep runs against the simulated bench.

use et_core::config::{BenchConfig, CollectionStrategy, EngineKind, LookUpTableConfig, ShapingConfig};
use et_core::error::EtError;
use et_core::run::{EnvelopeTrackingRun, RunOutcome};
use et_sim::{SimBenchConfig, SimInstruments};

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn bench_config(steps: usize, step_size_s: f64, strategy: CollectionStrategy) -> BenchConfig {
    let mut cfg = BenchConfig::default();
    cfg.rf.resource_name = "rf".to_string();
    cfg.envelope.resource_name = "env".to_string();
    cfg.sweep.number_of_steps = steps;
    cfg.sweep.step_size_s = Some(step_size_s);
    cfg.sweep.strategy = strategy;
    cfg
}

fn quiet() -> SimBenchConfig {
    SimBenchConfig {
        noise_db: 0.0,
        edge_period_ms: 5,
        ..Default::default()
    }
}

fn run(config: BenchConfig, sim: &mut SimInstruments) -> RunOutcome {
    let waveform = sim.waveform();
    let run = EnvelopeTrackingRun::new(config).unwrap();
    run.execute(sim.bench(), &[waveform])
}

fn count(journal: &[String], entry: &str) -> usize {
    journal.iter().filter(|e| *e == entry).count()
}

#[test]
fn test_five_steps_map_names_to_delays() {
    for strategy in [CollectionStrategy::Sequential, CollectionStrategy::Overlapped] {
        let config = bench_config(5, 1e-9, strategy);
        let mut sim = SimInstruments::new(&config, SimBenchConfig::default()).unwrap();
        let outcome = run(config, &mut sim);

        assert!(outcome.is_ok(), "{strategy}: {:?}", outcome.error);
        let report = &outcome.report;
        assert!(report.is_complete());
        assert_eq!(report.rows.len(), 5);
        for (i, row) in report.rows.iter().enumerate() {
            let name = format!("r{i}");
            assert_eq!(row.result_name, name);
            assert!(approx_eq(row.delay_s, i as f64 * 1e-9, 1e-15));
            // Step i was acquired with the RF generator at i steps of delay
            let captured = sim.sim.captured_delay_s(&name).unwrap();
            assert!(approx_eq(captured, i as f64 * 1e-9, 1e-15), "{strategy} {name}");
            // Analysis lag costs exactly one retry per result
            assert_eq!(sim.sim.fetch_attempts(&name), 2);
        }
    }
}

#[test]
fn test_single_step_collects_primer() {
    for strategy in [CollectionStrategy::Sequential, CollectionStrategy::Overlapped] {
        let config = bench_config(1, 1e-9, strategy);
        let mut sim = SimInstruments::new(&config, quiet()).unwrap();
        let outcome = run(config, &mut sim);

        assert!(outcome.is_ok());
        assert_eq!(outcome.report.rows.len(), 1);
        assert_eq!(outcome.report.rows[0].result_name, "r0");
        assert_eq!(sim.sim.captured_delay_s("r0"), Some(0.0));
        // No delay adjustment after synchronization
        let delays = sim
            .sim
            .journal()
            .iter()
            .filter(|e| e.starts_with("rf delay"))
            .count();
        assert_eq!(delays, 1);
    }
}

#[test]
fn test_overlapped_matches_sequential() {
    let seq_config = bench_config(24, 2e-9, CollectionStrategy::Sequential);
    let ovl_config = bench_config(24, 2e-9, CollectionStrategy::Overlapped);
    let mut seq_sim = SimInstruments::new(&seq_config, SimBenchConfig::default()).unwrap();
    let mut ovl_sim = SimInstruments::new(&ovl_config, SimBenchConfig::default()).unwrap();

    let seq = run(seq_config, &mut seq_sim);
    let ovl = run(ovl_config, &mut ovl_sim);

    assert!(seq.is_ok() && ovl.is_ok());
    assert_eq!(seq.report.rows, ovl.report.rows);
    assert_eq!(ovl.report.strategy, CollectionStrategy::Overlapped);
}

#[test]
fn test_single_not_ready_is_retried() {
    let config = bench_config(4, 1e-9, CollectionStrategy::Sequential);
    let mut sim = SimInstruments::new(
        &config,
        SimBenchConfig {
            analysis_lag_fetches: 0,
            ..quiet()
        },
    )
    .unwrap();
    sim.sim.not_ready_responses("r2", 1);

    let outcome = run(config, &mut sim);
    assert!(outcome.is_ok());
    assert_eq!(outcome.report.rows.len(), 4);
    assert_eq!(sim.sim.fetch_attempts("r1"), 1);
    assert_eq!(sim.sim.fetch_attempts("r2"), 2);
}

#[test]
fn test_second_not_ready_aborts_with_partial_results() {
    for strategy in [CollectionStrategy::Sequential, CollectionStrategy::Overlapped] {
        let config = bench_config(6, 1e-9, strategy);
        let mut sim = SimInstruments::new(&config, quiet()).unwrap();
        sim.sim.not_ready_responses("r2", 2);

        let outcome = run(config, &mut sim);
        assert!(matches!(
            outcome.error,
            Some(EtError::TransientNotReady { ref result_name }) if result_name == "r2"
        ));
        let names: Vec<_> = outcome
            .report
            .rows
            .iter()
            .map(|r| r.result_name.as_str())
            .collect();
        assert_eq!(names, vec!["r0", "r1"], "{strategy}");
        assert!(outcome.report.error.is_some());
        assert_eq!(sim.sim.fetch_attempts("r2"), 2);
        assert_eq!(sim.sim.fetch_attempts("r3"), 0);
    }
}

#[test]
fn test_fatal_driver_error_still_tears_down() {
    let config = bench_config(5, 1e-9, CollectionStrategy::Overlapped);
    let mut sim = SimInstruments::new(&config, quiet()).unwrap();
    sim.sim.fail_fetch("r1", -200_077);

    let outcome = run(config, &mut sim);
    assert!(matches!(outcome.error, Some(EtError::Driver { code: -200_077, .. })));
    assert_eq!(outcome.report.rows.len(), 1);

    let journal = sim.sim.journal();
    let tail: Vec<_> = journal[journal.len() - 6..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            "env abort",
            "rf abort",
            "env close",
            "rf close",
            "analyzer dispose nr",
            "analyzer close",
        ]
    );
    assert!(sim.rf.is_closed() && sim.envelope.is_closed());
}

#[test]
fn test_stalled_acquisition_times_out() {
    let config = bench_config(6, 1e-9, CollectionStrategy::Sequential);
    let mut sim = SimInstruments::new(&config, quiet()).unwrap();
    sim.sim.stall_acquisition("r0");

    let outcome = run(config, &mut sim);
    let err = outcome.error.unwrap();
    assert!(err.is_timeout(), "{err}");
    // Sequential collection never started
    assert!(outcome.report.rows.is_empty());
    assert_eq!(count(&sim.sim.journal(), "analyzer close"), 1);
}

#[test]
fn test_best_step_near_optimum() {
    let config = bench_config(20, 4e-9, CollectionStrategy::Sequential);
    let sim_config = quiet();
    let optimum_step = (sim_config.optimum_delay_s / 4e-9).round() as usize;
    let mut sim = SimInstruments::new(&config, sim_config).unwrap();

    let outcome = run(config, &mut sim);
    assert!(outcome.is_ok());
    let best = outcome.report.best_step().unwrap();
    assert_eq!(best.index, optimum_step);
    assert!(best.upper_relative_db > best.lower_relative_db);
}

#[test]
fn test_spectrum_engine_with_lookup_table() {
    let mut config = bench_config(3, 1e-9, CollectionStrategy::Sequential);
    config.analyzer.engine = EngineKind::SpectrumAnalysis;
    config.envelope.shaping = ShapingConfig::LookupTable(LookUpTableConfig {
        dut_average_input_power_dbm: 0.0,
        table: vec![(-30.0, 1.5), (0.0, 3.5)],
    });
    let mut sim = SimInstruments::new(&config, quiet()).unwrap();

    let outcome = run(config, &mut sim);
    assert!(outcome.is_ok(), "{:?}", outcome.error);
    assert_eq!(outcome.report.rows.len(), 3);
    assert_eq!(count(&sim.sim.journal(), "analyzer configure specan"), 1);
}

#[test]
fn test_engine_mismatch_fails_setup() {
    let config = bench_config(3, 1e-9, CollectionStrategy::Sequential);
    let mut engine_config = config.clone();
    engine_config.analyzer.engine = EngineKind::SpectrumAnalysis;
    // Session built for the spectrum engine, run configured for NR
    let mut sim = SimInstruments::new(&engine_config, quiet()).unwrap();

    let outcome = run(config, &mut sim);
    assert!(matches!(outcome.error, Some(EtError::Config(_))));
    assert!(outcome.report.rows.is_empty());
    assert!(!sim.sim.journal().iter().any(|e| e.starts_with("analyzer initiate")));
    assert!(sim.rf.is_closed());
}
