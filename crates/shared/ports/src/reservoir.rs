/// Port for a statistical reservoir of scalar samples
///
/// Used for latency reporting; implementations decide the retention window.
pub trait Reservoir: Send + Sync {
    /// Record a sample
    fn push(&self, value: f64);

    /// Mean of the retained samples
    fn average(&self) -> Option<f64>;

    /// Percentile in [0, 100] of the retained samples
    fn percentile(&self, percentile: f64) -> Option<f64>;
}
