//! Declarative YAML configuration
//!
//! Calibration recipes name the layers to quantize and the arguments for
//! each of their slots.
//!
//! # Example
//!
//! ```yaml
//! scheme:
//!   targets: ["re:.*proj", lm_head]
//!   weights:
//!     num_bits: 4
//!     symmetric: false
//!     strategy: group
//!     group_size: 128
//!     observer: minmax
//!     observer_kwargs:
//!       averaging_constant: 1.0
//! force_zero_point: true
//! ```

mod cli;
mod load;
mod schema;
mod validate;

#[cfg(test)]
mod tests;


pub use cli::{
    parse_args, CalibrateArgs, Cli, Command, HeaderArgs, InspectArgs, OutputFormat, ValidateArgs,
};
pub use load::{load_recipe, parse_recipe};
pub use schema::CalibrationRecipe;
pub use validate::{validate_recipe, ValidationError};
