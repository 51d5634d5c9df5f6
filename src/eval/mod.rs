//! Metrics, tuning and the evaluation harness.

pub mod harness;
pub mod metrics;
pub mod report;
pub mod tuner;

pub use harness::{EvalSettings, Evaluator};
pub use metrics::{MetricAccumulator, MetricName, MetricSample, MetricSummary, MetricsAtK};
pub use report::{EvaluationReport, MissCase, QueryRow};
pub use tuner::{tune, TuningGrid, TuningOutcome};
