// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MeshQuote Analysis
//!
//! Adaptive complexity analysis of 3D printing models. Small models are read
//! directly, large STL/OBJ files are streamed in batches with early
//! stopping, and large 3MF/G-code files are sampled. Results carry a
//! complexity score, print time and cost estimates, and can be priced with a
//! [`QuotationCalculator`].
//!
//! ```rust,ignore
//! use meshquote_analysis::{AnalysisConfig, ModelAnalyzer, ModelRef};
//!
//! let analyzer = ModelAnalyzer::new(AnalysisConfig::default());
//! let result = analyzer.analyze(&ModelRef::new("part.stl"), true)?;
//! println!("score {:.1}, {} min", result.complexity_score, result.estimated_print_time_minutes);
//! ```

pub mod config;
pub mod early_stop;
pub mod error;
pub mod estimate;
pub mod metrics;
pub mod model;
pub mod optimizer;
pub mod quotation;
pub mod result;
pub mod sampler;
pub mod scoring;

pub use config::AnalysisConfig;
pub use early_stop::{EarlyStopMonitor, PartialResult, StopReason};
pub use error::{AnalysisError, Result};
pub use estimate::{estimate_from_metadata, estimate_from_polygons};
pub use metrics::{AccumulatedMetrics, Dimensions, ModelMetrics};
pub use model::{validate_model, ModelInfo, ModelMetadata, ModelRef};
pub use optimizer::{
    analyze_stream, AnalysisProgress, KnownTotal, ModelAnalyzer, StreamOutcome, TriangleSource,
};
pub use quotation::{
    Quotation, QuotationCalculator, QuotationError, QuotationParams, StandardCalculator,
};
pub use result::{AnalysisResult, PerformanceMetrics, SamplingInfo, Strategy};
pub use sampler::{combine_samples, sample_count};

pub use meshquote_core::FileType;
