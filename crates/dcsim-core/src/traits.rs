//! Core traits for dcsim
//!
//! Randomness enters the engine through `FluctuationSource` only. The
//! simulator never reaches for a thread-local or global generator, so a run is
//! fully determined by its descriptor and the source it was handed.

/// Source of fluctuation factors
pub trait FluctuationSource: Send {
    /// Draw a factor uniformly from `[-percent / 100, +percent / 100]`.
    ///
    /// `percent` is already clamped to `[0, 100]` by the caller. A zero
    /// percent must return `0.0` without consuming randomness.
    fn factor(&mut self, percent: f64) -> f64;

    /// Name used in logs
    fn name(&self) -> &str;
}

impl<S: FluctuationSource + ?Sized> FluctuationSource for Box<S> {
    fn factor(&mut self, percent: f64) -> f64 {
        (**self).factor(percent)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
