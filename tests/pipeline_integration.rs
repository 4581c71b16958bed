//! End-to-end pipeline tests over a file-backed SQLite artifact store.
//!
//! Logs are imported as CSV blobs under their window keys, exactly as the
//! `import-logs` command stores them, and every stage reads them back
//! through the store.

use chrono::NaiveDate;
use liquidity_forecast::forecast::artifacts::{ModelTag, PERFORMANCE_KEY};
use liquidity_forecast::forecast::export::performance_to_csv;
use liquidity_forecast::forecast::{
    generate_dated_dataset, generate_rolling_dataset, infer_multi, infer_single,
    predict_with_walk_forward, train_single_window, BacktestEvaluator, FakeClock,
    InferenceOutput, LogEvent, LogTable, LogWindow, Lookback, PerformanceRecord, PipelineConfig,
    PipelineContext, PipelineError, SqliteBlobStore, WalkForwardTrainer,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TOKENS: [&str; 4] = ["USDC", "DAI", "USDT", "WETH"];

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
}

/// Eight pools whose activity shifts from day to day.
fn day_logs(day: u32) -> LogTable {
    let mut events = Vec::new();
    for j in 0..8u64 {
        let count = 1 + (j * (day as u64 + 1)) % 7;
        for k in 0..count {
            events.push(LogEvent {
                transaction_id: format!("0x{}{:02}{:02}", day, j, k),
                contract_address: format!("0xpool{}", j),
                input_token: TOKENS[(j % 4) as usize].to_string(),
                output_token: TOKENS[((j + 1) % 4) as usize].to_string(),
                block_number: day as u64 * 10_000 + j * 100 + k,
            });
        }
    }
    LogTable::new(events)
}

fn config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.forest.n_estimators = 20;
    config.backtest.blocks_per_day = 10_000;
    config.backtest.segments = 5;
    config.backtest.top_k = 3;
    config
}

fn open(path: &Path) -> PipelineContext {
    let store = SqliteBlobStore::new(path, Duration::from_secs(5)).unwrap();
    PipelineContext::offline(config(), Arc::new(store), Arc::new(FakeClock::new(0)))
}

fn import(ctx: &PipelineContext, window: LogWindow, table: &LogTable) {
    ctx.artifacts
        .put(&window.storage_key(), table.to_csv().as_bytes())
        .unwrap();
}

fn seeded(path: &Path) -> PipelineContext {
    let ctx = open(path);
    let days: Vec<LogTable> = (1..=5).map(day_logs).collect();
    for (i, table) in days.iter().enumerate() {
        import(&ctx, LogWindow::Day(date(i as u32 + 1)), table);
    }
    import(&ctx, LogWindow::Rolling(Lookback::OneDay), &days[4]);
    import(
        &ctx,
        LogWindow::Rolling(Lookback::ThreeDays),
        &LogTable::concat(&days[2..]),
    );
    import(
        &ctx,
        LogWindow::Rolling(Lookback::OneWeek),
        &LogTable::concat(&days),
    );
    ctx
}

#[test]
fn test_train_and_ensemble_with_default_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    let dated = generate_dated_dataset(&ctx, date(1), date(3)).unwrap();
    assert!(dated.rows > 0);
    assert!(dated.skipped_days.is_empty());

    // No rolling dataset yet, so the default model comes from the dated one
    let default = train_single_window(&ctx, None).unwrap();
    assert_eq!(default.model_key, ModelTag::Default.model_key());
    assert!(default.dataset_key.contains("dated"));

    generate_rolling_dataset(&ctx, Lookback::ThreeDays, None).unwrap();
    let three_day = train_single_window(&ctx, Some(Lookback::ThreeDays)).unwrap();
    assert!(three_day.dataset_key.ends_with("rolling_training_dataset_3d.csv"));

    let output = infer_multi(&ctx, &["1D".to_string(), "3D".to_string()], 5, false).unwrap();
    assert_eq!(output.models, vec!["1D", "3D"]);
    assert_eq!(output.ranked.len(), 8);
    assert_eq!(output.top.len(), 5);
    assert_eq!(
        output.top[0].contributing_windows(),
        "1D(40%)*fallback + 3D(35%)"
    );
    let snapshot = ctx.artifacts.get_text(&output.predictions_key).unwrap().unwrap();
    assert_eq!(snapshot.lines().count(), 9);

    let scores: Vec<f64> = output.ranked.iter().map(|r| r.combined_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
}

#[test]
fn test_single_inference_requires_model() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    let err = infer_single(&ctx, Lookback::OneWeek, 5, true).unwrap_err();
    assert!(matches!(err, PipelineError::ArtifactNotFound(_)));
    assert!(err.to_string().contains("train a model first"));
}

#[test]
fn test_training_without_dataset_asks_to_generate() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    let err = train_single_window(&ctx, Some(Lookback::OneDay)).unwrap_err();
    assert!(err.to_string().contains("generate"));
}

#[test]
fn test_filtered_inference_keeps_only_allowed_pools() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));
    generate_rolling_dataset(&ctx, Lookback::ThreeDays, None).unwrap();
    train_single_window(&ctx, Some(Lookback::ThreeDays)).unwrap();

    let output = infer_single(&ctx, Lookback::ThreeDays, 8, true).unwrap();
    // WETH is not on the allow-list; pools 2, 3, 6 and 7 touch it
    assert!(!output.top.is_empty());
    for r in &output.top {
        assert!(!r.all_tokens.iter().any(|t| t == "WETH"), "{}", r.contract_address);
    }
}

#[test]
fn test_walk_forward_then_predict_with_best_model() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    let report = WalkForwardTrainer::new(&ctx, 1).run(date(1), date(5)).unwrap();
    assert!(!report.cycles.is_empty());
    // Day 5 has no validation day
    assert!(report.skipped.iter().any(|s| s.date == date(5)));
    for cycle in &report.cycles {
        assert!(cycle
            .training_days
            .iter()
            .all(|d| *d < cycle.record.validation_date));
    }
    assert!(ctx.artifacts.exists(PERFORMANCE_KEY).unwrap());

    let output = predict_with_walk_forward(&ctx, 3, None).unwrap();
    assert_eq!(output.top.len(), 3);
    assert!(output.models[0].starts_with("day_"));

    let explicit = predict_with_walk_forward(&ctx, 3, Some(1)).unwrap();
    assert_eq!(explicit.models, vec!["day_001"]);

    let missing = predict_with_walk_forward(&ctx, 3, Some(99)).unwrap_err();
    assert!(matches!(missing, PipelineError::ArtifactNotFound(_)));
}

fn assert_scored_by(ctx: &PipelineContext, output: &InferenceOutput, model_key: &str) {
    let model = ctx.artifacts.load_model_key(model_key).unwrap();
    let current = ctx.window_features(LogWindow::Rolling(Lookback::OneDay)).unwrap();
    let scores = model.score(&current.vectors);
    for r in &output.ranked {
        let i = current
            .vectors
            .iter()
            .position(|fv| fv.contract_address == r.contract_address)
            .unwrap();
        assert!((r.combined_score - scores[i]).abs() < 1e-12, "{}", r.contract_address);
    }
}

#[test]
fn test_best_model_is_pinned_by_training_date() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    // Two runs, each numbering its first cycle as day 1
    let first = WalkForwardTrainer::new(&ctx, 1).run(date(1), date(1)).unwrap();
    let second = WalkForwardTrainer::new(&ctx, 1).run(date(3), date(3)).unwrap();
    assert_eq!(first.cycles[0].record.day, 1);
    assert_eq!(second.cycles[0].record.day, 1);
    assert_ne!(first.cycles[0].model_key, second.cycles[0].model_key);

    // The earlier run's day 1 holds the best F1, not the latest day-1 model
    let scored = |record: &PerformanceRecord, f1: f64| PerformanceRecord {
        f1_score: f1,
        labeled_validation_samples: record.labeled_validation_samples.max(1),
        ..record.clone()
    };
    let history = vec![
        scored(&first.cycles[0].record, 0.9),
        scored(&second.cycles[0].record, 0.1),
    ];
    ctx.artifacts
        .put(PERFORMANCE_KEY, performance_to_csv(&history).as_bytes())
        .unwrap();

    let output = predict_with_walk_forward(&ctx, 3, None).unwrap();
    assert_eq!(output.models, vec!["day_001"]);
    assert_scored_by(&ctx, &output, &first.cycles[0].model_key);

    // An explicit day with several models takes the latest training date
    let explicit = predict_with_walk_forward(&ctx, 3, Some(1)).unwrap();
    assert_scored_by(&ctx, &explicit, &second.cycles[0].model_key);
}

#[test]
fn test_reopened_store_reproduces_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.db");
    let first = {
        let ctx = seeded(&path);
        generate_rolling_dataset(&ctx, Lookback::ThreeDays, None).unwrap();
        train_single_window(&ctx, Some(Lookback::ThreeDays)).unwrap();
        infer_single(&ctx, Lookback::ThreeDays, 8, false).unwrap()
    };

    let reopened = open(&path);
    let second = infer_single(&reopened, Lookback::ThreeDays, 8, false).unwrap();
    let scores = |o: &InferenceOutput| -> Vec<(String, f64)> {
        o.ranked
            .iter()
            .map(|r| (r.contract_address.clone(), r.combined_score))
            .collect()
    };
    assert_eq!(scores(&first), scores(&second));
}

#[test]
fn test_backtest_over_rolling_week() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = seeded(&dir.path().join("pipeline.db"));

    let logs = ctx.fetch(LogWindow::Rolling(Lookback::OneWeek)).unwrap();
    let report = BacktestEvaluator::from_context(&ctx).run(&logs).unwrap();

    assert!(!report.segments.is_empty());
    for s in &report.segments {
        assert!(s.segment >= 1 && s.segment < 4);
        assert!((0.0..=1.0).contains(&s.precision_at_k));
    }
    let mean = report.mean_precision().unwrap();
    assert!((0.0..=1.0).contains(&mean));
}

#[test]
fn test_missing_log_window() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = open(&dir.path().join("pipeline.db"));
    let err = ctx.fetch(LogWindow::Day(date(9))).unwrap_err();
    assert!(err.is_skippable());
}
