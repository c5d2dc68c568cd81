//! Min-max feature scaling with persisted parameters

use crate::data::FeatureTable;
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// Observed range of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnRange {
    pub min: f64,
    pub max: f64,
}

impl ColumnRange {
    /// Scale one value into the fitted range.
    pub fn scale(&self, value: f64) -> f64 {
        if self.max > self.min {
            (value - self.min) / (self.max - self.min)
        } else {
            0.0
        }
    }
}

/// Per-column scaling parameters, serialized as `{column: {min, max}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScalerParams {
    columns: BTreeMap<String, ColumnRange>,
}

impl ScalerParams {
    pub fn get(&self, column: &str) -> Option<&ColumnRange> {
        self.columns.get(column)
    }

    pub fn insert(&mut self, column: impl Into<String>, range: ColumnRange) {
        self.columns.insert(column.into(), range);
    }

    /// Column names in sorted order
    pub fn columns(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Write as pretty JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::ArtifactNotFound(path.display().to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// What `apply` does with a feature column that has no stored parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MissingParamPolicy {
    /// Fail with a configuration mismatch
    #[default]
    Reject,
    /// Copy the column unscaled and log a warning
    PassThrough,
}

/// Fits and reapplies min-max scaling
#[derive(Debug, Clone, Default)]
pub struct Scaler {
    policy: MissingParamPolicy,
}

impl Scaler {
    pub fn new(policy: MissingParamPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> MissingParamPolicy {
        self.policy
    }

    /// Compute parameters for `columns` and return the scaled table.
    ///
    /// Columns not listed are copied unchanged. A column whose maximum
    /// equals its minimum becomes all zeros.
    pub fn fit(&self, table: &FeatureTable, columns: &[String]) -> Result<(FeatureTable, ScalerParams)> {
        if table.is_empty() {
            return Err(ForecastError::DataValidation(
                "Cannot fit scaler on an empty table".to_string(),
            ));
        }

        let mut params = ScalerParams::default();
        let mut scaled = table.clone();
        for name in columns {
            let values = table.column(name)?;
            let range = ColumnRange {
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            };
            scaled.set_column(name, values.iter().map(|v| range.scale(*v)).collect())?;
            params.insert(name.clone(), range);
        }
        Ok((scaled, params))
    }

    /// Scale every feature column of `table` with stored parameters.
    ///
    /// `ds` and `y` are never scaled. Parameters are never recomputed.
    pub fn apply(&self, table: &FeatureTable, params: &ScalerParams) -> Result<FeatureTable> {
        let mut scaled = table.clone();
        for name in table.feature_columns() {
            match params.get(&name) {
                Some(range) => {
                    let values = table.column(&name)?;
                    scaled.set_column(&name, values.iter().map(|v| range.scale(*v)).collect())?;
                }
                None => match self.policy {
                    MissingParamPolicy::Reject => {
                        return Err(ForecastError::ConfigurationMismatch(format!(
                            "No scaling parameters for column '{}'",
                            name
                        )));
                    }
                    MissingParamPolicy::PassThrough => {
                        warn!(column = %name, "No scaling parameters found, leaving column unscaled");
                    }
                },
            }
        }
        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_range_scale() {
        let range = ColumnRange { min: 2.0, max: 6.0 };
        assert_eq!(range.scale(4.0), 0.5);
        assert_eq!(range.scale(2.0), 0.0);

        let flat = ColumnRange { min: 3.0, max: 3.0 };
        assert_eq!(flat.scale(3.0), 0.0);
        assert_eq!(flat.scale(100.0), 0.0);
    }

    #[test]
    fn test_params_json_layout() {
        let mut params = ScalerParams::default();
        params.insert("ctr", ColumnRange { min: 0.0, max: 1.0 });
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["ctr"]["min"], 0.0);
        assert_eq!(json["ctr"]["max"], 1.0);
    }
}
