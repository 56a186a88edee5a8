//! Model inference for uploaded CSVs
//!
//! A [`ServiceContext`] is loaded once at startup and only read afterwards.
//! Each request borrows it through an [`InferenceService`].

use burn::backend::NdArray;
use burn::tensor::backend::Backend;

use crate::data::{GoalBatcher, Table};
use crate::features::{ScalerState, Window};
use crate::model::GoalLstm;
use crate::predict::report::{Page, PredictionReport};
use crate::training::{CheckpointStore, RunSummary};
use crate::{Config, GoalError, Result};

/// Backend used for serving. Not autodiff, so dropout is always off.
pub type ServeBackend = NdArray<f32>;

/// Anything that maps feature windows to raw goal estimates
pub trait GoalRegressor {
    /// Features per row the regressor expects
    fn input_width(&self) -> usize;

    fn predict(&self, windows: &[Window]) -> Result<Vec<f32>>;
}

/// [`GoalLstm`] behind the [`GoalRegressor`] seam
pub struct LstmRegressor<B: Backend> {
    model: GoalLstm<B>,
    batcher: GoalBatcher<B>,
}

impl<B: Backend> LstmRegressor<B> {
    pub fn new(model: GoalLstm<B>, device: B::Device) -> Self {
        LstmRegressor {
            model,
            batcher: GoalBatcher::new(device),
        }
    }
}

impl<B: Backend> GoalRegressor for LstmRegressor<B> {
    fn input_width(&self) -> usize {
        self.model.input_size()
    }

    fn predict(&self, windows: &[Window]) -> Result<Vec<f32>> {
        if windows.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&[Vec<f32>]> = windows.iter().map(|w| w.as_slice()).collect();
        let output = self.model.forward(self.batcher.windows_tensor(&refs));
        output
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| GoalError::Training(format!("failed to read predictions: {:?}", e)))
    }
}

/// Round half away from zero. No clamping, so negative goals pass through.
pub fn round_goal(value: f32) -> i64 {
    value.round() as i64
}

/// Everything a request needs, fixed for the process lifetime
pub struct ServiceContext<R: GoalRegressor> {
    regressor: R,
    scaler: ScalerState,
    label_column: String,
    prediction_column: String,
    run: Option<RunSummary>,
}

impl ServiceContext<LstmRegressor<ServeBackend>> {
    /// Load a committed run, the latest one unless `run_id` is given
    pub fn load(config: &Config, run_id: Option<&str>) -> Result<Self> {
        let store = CheckpointStore::new(&config.data.checkpoint_dir);
        let summary = store.resolve(run_id)?;

        if summary.input_size != config.model.input_size {
            return Err(GoalError::Config(format!(
                "run {} was trained on {} features but the model is configured for {}",
                summary.run_id, summary.input_size, config.model.input_size
            )));
        }

        let device = Default::default();
        let model: GoalLstm<ServeBackend> = store.load_model(&summary, &device)?;
        let scaler = store.load_scaler(&summary)?;
        log::info!(
            "Loaded run {} ({} layers, hidden {})",
            summary.run_id,
            summary.num_layers,
            summary.hidden_size
        );

        let mut context = Self::new(
            LstmRegressor::new(model, device),
            scaler,
            &config.service.label_column,
            &config.service.prediction_column,
        )?;
        context.run = Some(summary);
        Ok(context)
    }
}

impl<R: GoalRegressor> ServiceContext<R> {
    /// The scaler must produce exactly the width the regressor consumes
    pub fn new(
        regressor: R,
        scaler: ScalerState,
        label_column: &str,
        prediction_column: &str,
    ) -> Result<Self> {
        if scaler.width() != regressor.input_width() {
            return Err(GoalError::Config(format!(
                "scaler was fitted on {} features but the model expects {}",
                scaler.width(),
                regressor.input_width()
            )));
        }
        Ok(ServiceContext {
            regressor,
            scaler,
            label_column: label_column.to_string(),
            prediction_column: prediction_column.to_string(),
            run: None,
        })
    }

    pub fn run(&self) -> Option<&RunSummary> {
        self.run.as_ref()
    }

    pub fn input_width(&self) -> usize {
        self.regressor.input_width()
    }

    pub fn service(&self) -> InferenceService<'_, R> {
        InferenceService { context: self }
    }
}

/// Per-request handler over a shared context
pub struct InferenceService<'a, R: GoalRegressor> {
    context: &'a ServiceContext<R>,
}

impl<R: GoalRegressor> InferenceService<'_, R> {
    /// Predict goals for every row of an uploaded CSV
    pub fn predict_csv(&self, bytes: &[u8]) -> Result<PredictionReport> {
        let table = Table::from_bytes(bytes)?;
        self.predict_table(table)
    }

    pub fn predict_table(&self, table: Table) -> Result<PredictionReport> {
        let ctx = self.context;
        let features = table.without_column(&ctx.label_column);

        let expected = ctx.regressor.input_width();
        if features.width() != expected {
            return Err(GoalError::Validation {
                expected,
                actual: features.width(),
            });
        }

        let rows = features.to_matrix()?;
        let scaled = ctx.scaler.transform(&rows)?;
        let windows: Vec<Window> = scaled.into_iter().map(|row| vec![row]).collect();

        let raw = ctx.regressor.predict(&windows)?;
        if raw.len() != windows.len() {
            return Err(GoalError::Training(format!(
                "model returned {} predictions for {} rows",
                raw.len(),
                windows.len()
            )));
        }
        if let Some(i) = raw.iter().position(|v| !v.is_finite()) {
            return Err(GoalError::Training(format!(
                "model produced a non-finite prediction for row {}",
                i + 1
            )));
        }
        let predictions: Vec<i64> = raw.into_iter().map(round_goal).collect();
        log::debug!("Predicted {} rows", predictions.len());

        let values: Vec<String> = predictions.iter().map(|p| p.to_string()).collect();
        let table = table.with_column(&ctx.prediction_column, &values)?;
        Ok(PredictionReport { table, predictions })
    }

    /// Render a request to a page. Errors become the page's message.
    pub fn handle(&self, bytes: &[u8]) -> Page {
        match self.predict_csv(bytes) {
            Ok(report) => Page::results(report),
            Err(e) => {
                if e.is_request_error() {
                    log::warn!("Rejected upload: {}", e);
                } else {
                    log::error!("Prediction failed: {}", e);
                }
                Page::error(error_message(&e))
            }
        }
    }
}

fn error_message(err: &GoalError) -> String {
    match err {
        GoalError::Validation { .. } => err.to_string(),
        GoalError::Data(msg) => format!("CSV processing error: {}", msg),
        e if e.is_request_error() => format!("CSV processing error: {}", e),
        other => format!("Prediction failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use crate::data::TrainingBundle;
    use crate::features::SequenceSample;
    use crate::model::GoalLstmConfig;
    use crate::training::run_training;
    use crate::{LABEL_COLUMN, PREDICTION_COLUMN};

    /// Sums each window's last row and counts calls
    struct SumRegressor {
        width: usize,
        calls: Cell<usize>,
    }

    impl SumRegressor {
        fn new(width: usize) -> Self {
            SumRegressor {
                width,
                calls: Cell::new(0),
            }
        }
    }

    impl GoalRegressor for SumRegressor {
        fn input_width(&self) -> usize {
            self.width
        }

        fn predict(&self, windows: &[Window]) -> Result<Vec<f32>> {
            self.calls.set(self.calls.get() + 1);
            Ok(windows
                .iter()
                .map(|w| w.last().map(|r| r.iter().sum::<f32>()).unwrap_or(0.0))
                .collect())
        }
    }

    /// Returns NaN for every row
    struct NanRegressor;

    impl GoalRegressor for NanRegressor {
        fn input_width(&self) -> usize {
            2
        }

        fn predict(&self, windows: &[Window]) -> Result<Vec<f32>> {
            Ok(vec![f32::NAN; windows.len()])
        }
    }

    /// Scaler that leaves values unchanged: mean 0, std 1
    fn identity_scaler(width: usize) -> ScalerState {
        ScalerState {
            means: vec![0.0; width],
            stds: vec![1.0; width],
            n_samples: 1,
        }
    }

    fn context(width: usize) -> ServiceContext<SumRegressor> {
        ServiceContext::new(
            SumRegressor::new(width),
            identity_scaler(width),
            LABEL_COLUMN,
            PREDICTION_COLUMN,
        )
        .unwrap()
    }

    #[test]
    fn test_round_half_away_from_zero() {
        let cases = [
            (2.5, 3),
            (3.5, 4),
            (-2.5, -3),
            (0.5, 1),
            (-0.5, -1),
            (1.4, 1),
            (-0.4, 0),
            (-1.6, -2),
        ];
        for (value, expected) in cases {
            assert_eq!(round_goal(value), expected, "rounding {}", value);
        }
    }

    #[test]
    fn test_predictions_appended_and_label_kept() {
        let ctx = context(2);
        let csv = "a,b,Actual_Team_Goals\n1,1.5,3\n-2,-1,0\n";
        let report = ctx.service().predict_csv(csv.as_bytes()).unwrap();

        assert_eq!(report.predictions, vec![3, -3]);
        assert_eq!(
            report.table.headers(),
            &["a", "b", "Actual_Team_Goals", "Predicted_Team_Goals"]
        );
        assert_eq!(report.table.rows()[1][3], "-3");
    }

    #[test]
    fn test_label_column_optional() {
        let ctx = context(2);
        let report = ctx.service().predict_csv(b"a,b\n1,1\n").unwrap();
        assert_eq!(report.predictions, vec![2]);
    }

    #[test]
    fn test_wrong_width_rejected_before_inference() {
        let ctx = context(3);
        let err = ctx
            .service()
            .predict_csv(b"a,b,Actual_Team_Goals\n1,2,3\n")
            .unwrap_err();

        assert!(matches!(
            err,
            GoalError::Validation {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(ctx.regressor.calls.get(), 0);
    }

    #[test]
    fn test_handle_reports_errors_as_messages() {
        let ctx = context(2);
        let service = ctx.service();

        let page = service.handle(b"a\n1\n");
        assert_eq!(
            page.error.as_deref(),
            Some("Got 1 features; model expects 2. Please upload a CSV with the correct columns.")
        );
        assert!(page.report.is_none());

        let page = service.handle(b"a,b\n1,x\n");
        let message = page.error.unwrap();
        assert!(message.starts_with("CSV processing error: "), "{}", message);
        assert!(message.contains("column 'b'"));

        let page = service.handle(b"");
        assert!(page.error.unwrap().starts_with("CSV processing error: "));
    }

    #[test]
    fn test_non_finite_cells_are_csv_errors() {
        let ctx = context(2);
        let page = ctx.service().handle(b"a,b\nNaN,1\n");
        let message = page.error.unwrap();
        assert!(message.starts_with("CSV processing error: "), "{}", message);
        assert!(message.contains("row 1, column 'a'"), "{}", message);
        assert!(page.report.is_none());

        let err = ctx.service().predict_csv(b"a,b\n1,inf\n").unwrap_err();
        assert!(matches!(err, GoalError::Data(_)), "{:?}", err);
        assert_eq!(ctx.regressor.calls.get(), 0);
    }

    #[test]
    fn test_non_finite_output_not_rounded() {
        let ctx =
            ServiceContext::new(NanRegressor, identity_scaler(2), LABEL_COLUMN, PREDICTION_COLUMN)
                .unwrap();
        let err = ctx.service().predict_csv(b"a,b\n1,2\n").unwrap_err();
        assert!(matches!(err, GoalError::Training(_)), "{:?}", err);

        let page = ctx.service().handle(b"a,b\n1,2\n");
        assert!(page.error.unwrap().starts_with("Prediction failed: "));
        assert!(page.report.is_none());
    }

    #[test]
    fn test_handle_success_has_histogram() {
        let ctx = context(2);
        let page = ctx.service().handle(b"a,b\n1,1\n0,0\n");
        assert!(page.error.is_none());
        assert!(page.histogram.is_some());
        assert_eq!(page.report.unwrap().predictions, vec![2, 0]);
    }

    #[test]
    fn test_scaler_width_mismatch_is_config_error() {
        let result = ServiceContext::new(
            SumRegressor::new(3),
            identity_scaler(2),
            LABEL_COLUMN,
            PREDICTION_COLUMN,
        );
        assert!(matches!(result, Err(GoalError::Config(_))));
    }

    #[test]
    fn test_lstm_regressor_one_output_per_row() {
        let device = Default::default();
        let config = GoalLstmConfig {
            input_size: 4,
            hidden_size: 8,
            num_layers: 2,
            dropout: 0.2,
        };
        let regressor = LstmRegressor::new(GoalLstm::<ServeBackend>::new(&device, config), device);
        let windows: Vec<Window> = (0..5).map(|i| vec![vec![i as f32; 4]]).collect();

        let first = regressor.predict(&windows).unwrap();
        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|v| v.is_finite()));
        assert_eq!(first, regressor.predict(&windows).unwrap());
        assert!(regressor.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_load_without_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data.checkpoint_dir = dir.path().to_string_lossy().to_string();
        let result = ServiceContext::load(&config, None);
        assert!(matches!(result, Err(GoalError::NoCheckpoint(_))));
    }

    fn small_run_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data.checkpoint_dir = dir.to_string_lossy().to_string();
        config.model.hidden_size = 8;
        config.training.epochs = 1;
        config.training.batch_size = 8;
        config
    }

    fn upload_csv(rows: usize) -> String {
        let mut headers: Vec<String> = (0..crate::INPUT_SIZE).map(|i| format!("f{}", i)).collect();
        headers.push(LABEL_COLUMN.to_string());
        let mut csv = headers.join(",");
        csv.push('\n');
        for r in 0..rows {
            let cells: Vec<String> = (0..=crate::INPUT_SIZE)
                .map(|c| ((r * 7 + c) % 5).to_string())
                .collect();
            csv.push_str(&cells.join(","));
            csv.push('\n');
        }
        csv
    }

    #[test]
    fn test_load_committed_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_run_config(dir.path());
        let samples: Vec<SequenceSample> = (0..24)
            .map(|i| {
                let row = (0..crate::INPUT_SIZE).map(|c| ((i + c) % 6) as f32).collect();
                SequenceSample::single(row, (i % 4) as f32)
            })
            .collect();
        let (train, val) = samples.split_at(18);
        let bundle = TrainingBundle::from_samples(train.to_vec(), Some(val.to_vec()));
        let summary = run_training(&config, &bundle, None).unwrap();

        let ctx = ServiceContext::load(&config, None).unwrap();
        assert_eq!(ctx.run().map(|r| r.run_id.as_str()), Some(summary.run_id.as_str()));
        assert_eq!(ctx.input_width(), crate::INPUT_SIZE);

        let report = ctx.service().predict_csv(upload_csv(3).as_bytes()).unwrap();
        assert_eq!(report.predictions.len(), 3);
        assert_eq!(report.table.width(), crate::INPUT_SIZE + 2);

        let named = ServiceContext::load(&config, Some(&summary.run_id)).unwrap();
        assert_eq!(named.run(), ctx.run());

        // Startup refuses a run trained for another width
        let mut narrow = config.clone();
        narrow.model.input_size = crate::INPUT_SIZE - 1;
        let result = ServiceContext::load(&narrow, None);
        assert!(matches!(result, Err(GoalError::Config(_))));
    }
}
