//! Mock-cube orchestration: configuration, reference data, the synthesis
//! pipeline and its final masking step, plus seeded synthetic inputs.

pub mod builder;
pub mod config;
pub mod mask;
pub mod reference;
pub mod synthetic;

pub use builder::{MockCube, MockCubeBuilder, MockReport, ModelSpectrum};
pub use config::{MockConfig, DEFAULT_MEDIAN_FILL_WINDOW};
pub use mask::{apply_mask, MaskSummary};
pub use reference::{InMemoryReferenceSource, ReferenceCube, ReferenceSource, VelocityMap};
pub use synthetic::{SyntheticScene, SyntheticSetup};
