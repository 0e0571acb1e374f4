//! Structural inspection of document collections: type trees, value
//! statistics, and search-index mapping derivation.
//!
//! Pure and synchronous: this crate only walks already-loaded
//! documents in memory, so it does not depend on `tokio` or any store
//! trait beyond the `Document` type itself.

mod error;
mod kind;
mod report;
mod stats;
mod tree;

pub use error::InspectError;
pub use kind::Kind;
pub use report::{Inspector, ReportMode};
pub use stats::Stats;
pub use tree::TypeNode;

#[cfg(test)]
mod tests {
    use super::*;
    use hub_models::Document;
    use serde_json::json;

    fn doc(v: serde_json::Value) -> Document {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn deepstats_report_includes_mean() {
        let docs = vec![
            doc(json!({"_id": "a", "v": 2})),
            doc(json!({"_id": "b", "v": 4})),
        ];
        let (report, errors) = Inspector::inspect(&docs, ReportMode::DeepStats);
        assert!(errors.is_empty());
        assert_eq!(report["v"]["mean"], json!(3.0));
    }

    #[test]
    fn rejects_non_finite_values_across_the_whole_batch() {
        let docs = vec![doc(json!({"_id": "a", "v": f64::INFINITY}))];
        let (_, errors) = Inspector::inspect(&docs, ReportMode::Type);
        assert_eq!(errors.len(), 1);
    }
}
