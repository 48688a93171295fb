use crate::data::dataset::Dataset;
use crate::data::units::Unit;
use crate::error::{Result, SearchError};
use polars::prelude::*;
use std::path::Path;

pub struct CsvConnector;

impl CsvConnector {
    /// Load CSV file into DataFrame
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
            .finish()
            .map_err(|e| SearchError::Dataset(format!("Failed to read CSV: {}", e)))?;

        Ok(df)
    }

    /// Load a CSV file as a dataset. Every column other than `target_column`
    /// becomes a feature, in file order.
    pub fn load_dataset<P: AsRef<Path>>(
        path: P,
        target_column: &str,
        feature_units: Option<&[String]>,
        target_units: Option<&str>,
    ) -> Result<Dataset> {
        let df = Self::load(&path)?;

        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        if !names.iter().any(|n| n == target_column) {
            return Err(SearchError::Dataset(format!(
                "Target column '{}' not found in {:?}",
                target_column, names
            )));
        }

        let feature_names: Vec<String> = names.iter().filter(|n| *n != target_column).cloned().collect();
        let mut features = Vec::with_capacity(feature_names.len());
        for name in &feature_names {
            features.push(Self::numeric_column(&df, name)?);
        }
        let targets = Self::numeric_column(&df, target_column)?;

        let feature_units = feature_units
            .map(|units| units.iter().map(|u| Unit::parse(u)).collect::<Result<Vec<_>>>())
            .transpose()?;
        let target_units = target_units.map(Unit::parse).transpose()?;

        log::info!(
            "Loaded {} rows, {} features from {}",
            df.height(),
            feature_names.len(),
            path.as_ref().display()
        );

        Dataset::from_columns(features, targets)?
            .with_feature_names(feature_names)?
            .with_units(feature_units, target_units)
    }

    fn numeric_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
        let column = df.column(name)?;
        if !matches!(
            column.dtype(),
            DataType::Float64 | DataType::Float32 | DataType::Int64 | DataType::Int32 | DataType::UInt64 | DataType::UInt32
        ) {
            return Err(SearchError::Dataset(format!(
                "Column '{}' must be numeric, found {:?}",
                name,
                column.dtype()
            )));
        }
        let cast = column.cast(&DataType::Float64)?;
        let values = cast.f64()?;
        if values.null_count() > 0 {
            return Err(SearchError::Dataset(format!(
                "Column '{}' has {} null values",
                name,
                values.null_count()
            )));
        }
        Ok(values.into_no_null_iter().collect())
    }
}
