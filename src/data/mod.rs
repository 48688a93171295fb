pub mod connectors;
pub mod dataset;
pub mod units;

pub use connectors::CsvConnector;
pub use dataset::Dataset;
pub use units::{Dimensions, Quantity, Unit};
