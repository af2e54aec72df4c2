//! Numeric primitives shared by aggregation and the simulation harness.
//!
//! - [`norms`] - L2 norm computations
//! - [`weighted`] - sample-weighted means of scalars

pub mod norms;
pub mod weighted;

pub use norms::{l2_norm, l2_norm_sq};
pub use weighted::weighted_mean;
