//! Photometric collaborators: dust attenuation and band fluxes

pub mod extinction;
pub mod flux_scale;

pub use extinction::{ExtinctionLaw, TabulatedExtinction};
pub use flux_scale::{flux_ratio, replace_unusable_band_flux, BandPhotometry, BoxcarBand, FluxScale};
