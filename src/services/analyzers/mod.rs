//! The five parallel frame analyzers (C3-C7).

pub mod onset;
pub mod pitch_a;
pub mod pitch_b;
pub mod spectral;
pub mod volume;

pub use onset::OnsetClient;
pub use pitch_a::PitchAAnalyzer;
pub use pitch_b::PitchBAnalyzer;
pub use spectral::SpectralAnalyzer;
