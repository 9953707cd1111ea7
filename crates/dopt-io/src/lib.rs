//! # dopt-io: Result Files & Measurement Tables
//!
//! - [`dymola`]: writer and reader for the Dymola textual trajectory format
//!   (`#1` / `Atrajectory`), the interchange format for optimization results.
//!   [`ResultDymolaTextual`] implements [`dopt_core::TrajectorySource`], so a
//!   stored result can initialize a new transcription.
//! - [`measurements`]: `time,<name>...` CSV tables loaded into
//!   [`dopt_core::MeasurementData`] for parameter estimation.
//!
//! ```rust,no_run
//! use dopt_io::{load_measurements, ResultDymolaTextual};
//!
//! fn main() -> Result<(), dopt_io::ResultFileError> {
//!     let previous = ResultDymolaTextual::from_path("vdp_result.txt")?;
//!     let (t, x1) = previous.variable_data("x1")?;
//!     println!("{} points, final x1 = {:?}", t.len(), x1.last());
//!
//!     let data = load_measurements("measured.csv")?;
//!     println!("measured: {:?}", data.names());
//!     Ok(())
//! }
//! ```

pub mod dymola;
pub mod error;
pub mod measurements;

pub use dymola::{write_result, write_result_file, ResultDymolaTextual, WriteOptions};
pub use error::{ResultFileError, ResultFileResult};
pub use measurements::{load_measurements, read_measurements};
