//! Dataset Profiler
//!
//! Summarises a polars `DataFrame` into the compact statistical description
//! that every pipeline injects into its strategy prompt. The profile is
//! deterministic: all random draws use a fixed seed, so the same frame and
//! sample size always render to the same text.

use crate::config::{EXAMPLE_VALUE_LIMIT, SAMPLE_SEED, TOP_VALUE_LIMIT};
use crate::error::{AutoprocessError, Result};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::ser::{Serialize, Serializer};

/// One sampled row, in dataset column order.
pub type SampleRow = Vec<(String, serde_json::Value)>;

/// Read-only snapshot of a dataset, built once per pipeline invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DatasetProfile {
    #[serde(serialize_with = "serialize_columns")]
    pub columns: Vec<ColumnProfile>,
    #[serde(serialize_with = "serialize_correlation")]
    pub correlation: Vec<CorrelationRow>,
    pub num_rows: usize,
    pub num_columns: usize,
    #[serde(serialize_with = "serialize_rows")]
    pub sample_rows: Vec<SampleRow>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ColumnProfile {
    #[serde(skip)]
    pub name: String,
    pub dtype: String,
    pub missing_pct: f64,
    pub unique_count: usize,
    pub example_values: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub numeric: Option<NumericSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_distribution: Option<ValueDistribution>,
}

/// Statistics for integer, float and boolean columns. `None` means undefined.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NumericSummary {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub skew: Option<f64>,
}

/// Most frequent values of a string or categorical column.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ValueDistribution {
    pub top_values: Vec<String>,
    pub percentages: Vec<f64>,
}

/// Pearson coefficients of one numeric column against every numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRow {
    pub column: String,
    pub coefficients: Vec<(String, Option<f64>)>,
}

impl DatasetProfile {
    /// Compact JSON used as prompt context.
    pub fn to_prompt_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Closest existing column name for a name that is not in the dataset.
    pub fn suggest_column(&self, name: &str) -> Option<&str> {
        if self.has_column(name) {
            return None;
        }
        let wanted = name.to_lowercase();
        self.columns
            .iter()
            .map(|c| (c.name.as_str(), strsim::jaro_winkler(&wanted, &c.name.to_lowercase())))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name)
    }
}

/// Build a profile of `df` with up to `sample_size` whole rows.
///
/// The frame is only read. Sample size is clamped to the row count.
pub fn profile_dataset(df: &DataFrame, sample_size: usize) -> Result<DatasetProfile> {
    let mut columns = Vec::with_capacity(df.width());
    let mut numeric_columns: Vec<Series> = Vec::new();

    for series in df.get_columns() {
        let series = normalized(series)?;
        let numeric = numeric_view(&series)?;

        columns.push(profile_column(&series, numeric.as_ref())?);
        if let Some(values) = numeric {
            numeric_columns.push(values);
        }
    }

    let sample_rows = sample_rows(df, sample_size)?;

    Ok(DatasetProfile {
        columns,
        correlation: correlation_table(&numeric_columns)?,
        num_rows: df.height(),
        num_columns: df.width(),
        sample_rows,
    })
}

fn profile_column(series: &Series, numeric: Option<&Series>) -> Result<ColumnProfile> {
    let len = series.len();
    let missing = series.null_count();
    let missing_pct = if len == 0 {
        0.0
    } else {
        round_to(missing as f64 / len as f64 * 100.0, 1)
    };

    let present = series.drop_nulls();
    let unique_count = present.n_unique()?;

    let example_values = seeded_indices(present.len(), EXAMPLE_VALUE_LIMIT)
        .into_iter()
        .map(|idx| present.get(idx).map(any_value_to_json))
        .collect::<PolarsResult<Vec<_>>>()?;

    let value_distribution = if matches!(series.dtype(), DataType::String) {
        Some(value_distribution(series)?)
    } else {
        None
    };

    Ok(ColumnProfile {
        name: series.name().to_string(),
        dtype: series.dtype().to_string(),
        missing_pct,
        unique_count,
        example_values,
        numeric: numeric.map(numeric_summary).transpose()?,
        value_distribution,
    })
}

/// Categorical columns are profiled through their string values, and NaN
/// counts as missing in float columns.
fn normalized(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::Categorical(..) => Ok(series.cast(&DataType::String)?),
        DataType::Float32 => {
            let floats = series.f32()?;
            Ok(floats.set(&floats.is_nan(), None)?.into_series())
        }
        DataType::Float64 => {
            let floats = series.f64()?;
            Ok(floats.set(&floats.is_nan(), None)?.into_series())
        }
        _ => Ok(series.clone()),
    }
}

/// Integer, float and boolean columns as `f64`. Booleans become 0/1.
fn numeric_view(series: &Series) -> Result<Option<Series>> {
    let dtype = series.dtype();
    if dtype.is_numeric() || matches!(dtype, DataType::Boolean) {
        Ok(Some(series.cast(&DataType::Float64)?))
    } else {
        Ok(None)
    }
}

fn numeric_summary(values: &Series) -> Result<NumericSummary> {
    let n = values.len() - values.null_count();

    let std = if n >= 2 { values.std(1) } else { None };
    let skew = if n >= 3 { sample_skew(values, n)? } else { None };

    Ok(NumericSummary {
        min: rounded(values.min::<f64>()?, 2),
        max: rounded(values.max::<f64>()?, 2),
        mean: rounded(values.mean(), 2),
        std: rounded(std, 2),
        skew: rounded(skew, 2),
    })
}

/// Adjusted Fisher-Pearson coefficient over `n` present values. A constant
/// column has zero skew.
fn sample_skew(values: &Series, n: usize) -> Result<Option<f64>> {
    let Some(biased) = values.skew(true)? else {
        return Ok(None);
    };
    if biased.is_nan() {
        return Ok(Some(0.0));
    }
    let n = n as f64;
    Ok(Some((n * (n - 1.0)).sqrt() / (n - 2.0) * biased))
}

fn value_distribution(series: &Series) -> Result<ValueDistribution> {
    let total = series.len() - series.null_count();
    let values = series.clone().with_name("value");

    // Stable grouping and sort: ties keep first-appearance order.
    let counts = DataFrame::new(vec![values])?
        .lazy()
        .filter(col("value").is_not_null())
        .group_by_stable([col("value")])
        .agg([len().alias("count")])
        .sort_by_exprs(
            [col("count")],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )
        .limit(TOP_VALUE_LIMIT as IdxSize)
        .collect()?;

    let top_values = counts
        .column("value")?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    let percentages = counts
        .column("count")?
        .u32()?
        .into_iter()
        .flatten()
        .map(|count| round_to(count as f64 / total as f64 * 100.0, 1))
        .collect();

    Ok(ValueDistribution {
        top_values,
        percentages,
    })
}

/// Pairwise Pearson coefficients over pairwise-complete observations.
fn correlation_table(numeric_columns: &[Series]) -> Result<Vec<CorrelationRow>> {
    let width = numeric_columns.len();
    if width == 0 {
        return Ok(Vec::new());
    }

    // Positional names keep arbitrary column names out of expression parsing.
    let frame = DataFrame::new(
        numeric_columns
            .iter()
            .enumerate()
            .map(|(i, s)| s.clone().with_name(&format!("c{}", i)))
            .collect(),
    )?;
    let pairs: Vec<(usize, usize)> = (0..width)
        .flat_map(|i| (i..width).map(move |j| (i, j)))
        .collect();
    let coefficients = frame
        .lazy()
        .select(
            pairs
                .iter()
                .map(|(i, j)| {
                    pearson_corr(col(&format!("c{}", i)), col(&format!("c{}", j)), 1)
                        .alias(&format!("r{}_{}", i, j))
                })
                .collect::<Vec<_>>(),
        )
        .collect()?;

    let mut matrix = vec![vec![None; width]; width];
    for (i, j) in pairs {
        let r = coefficients
            .column(&format!("r{}_{}", i, j))?
            .f64()?
            .get(0)
            .filter(|r| r.is_finite())
            .map(|r| round_to(r.clamp(-1.0, 1.0), 2));
        matrix[i][j] = r;
        matrix[j][i] = r;
    }

    Ok(numeric_columns
        .iter()
        .zip(matrix)
        .map(|(series, row)| CorrelationRow {
            column: series.name().to_string(),
            coefficients: numeric_columns
                .iter()
                .map(|other| other.name().to_string())
                .zip(row)
                .collect(),
        })
        .collect())
}

fn sample_rows(df: &DataFrame, sample_size: usize) -> Result<Vec<SampleRow>> {
    let columns = df
        .get_columns()
        .iter()
        .map(normalized)
        .collect::<Result<Vec<_>>>()?;

    seeded_indices(df.height(), sample_size)
        .into_iter()
        .map(|row_idx| {
            columns
                .iter()
                .map(|series| {
                    let value = series.get(row_idx).map_err(|e| {
                        AutoprocessError::Profiling(format!(
                            "failed to read row {} of column {}: {}",
                            row_idx,
                            series.name(),
                            e
                        ))
                    })?;
                    Ok((series.name().to_string(), any_value_to_json(value)))
                })
                .collect::<Result<SampleRow>>()
        })
        .collect()
}

/// Up to `amount` distinct indices below `len`, drawn with the fixed seed.
fn seeded_indices(len: usize, amount: usize) -> Vec<usize> {
    let amount = amount.min(len);
    if amount == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(SAMPLE_SEED);
    index::sample(&mut rng, len, amount).into_vec()
}

fn any_value_to_json(value: AnyValue<'_>) -> serde_json::Value {
    match value {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(b),
        AnyValue::String(s) => serde_json::Value::String(s.to_string()),
        AnyValue::StringOwned(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int16(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int32(i) => serde_json::Value::Number(i.into()),
        AnyValue::Int64(i) => serde_json::Value::Number(i.into()),
        AnyValue::UInt8(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt16(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt32(u) => serde_json::Value::Number(u.into()),
        AnyValue::UInt64(u) => serde_json::Value::Number(u.into()),
        AnyValue::Float32(f) => float_to_json(f as f64),
        AnyValue::Float64(f) => float_to_json(f),
        other => serde_json::Value::String(other.to_string()),
    }
}

fn float_to_json(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

/// Undefined and non-finite statistics become `None`.
fn rounded(value: Option<f64>, digits: i32) -> Option<f64> {
    value.filter(|v| v.is_finite()).map(|v| round_to(v, digits))
}

/// Round half away from zero; never yields negative zero.
fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor + 0.0
}

struct OrderedMap<'a, V>(&'a [(String, V)]);

impl<V: Serialize> Serialize for OrderedMap<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

fn serialize_columns<S: Serializer>(
    columns: &[ColumnProfile],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(columns.iter().map(|c| (&c.name, c)))
}

fn serialize_correlation<S: Serializer>(
    rows: &[CorrelationRow],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(rows.iter().map(|r| (&r.column, OrderedMap(r.coefficients.as_slice()))))
}

fn serialize_rows<S: Serializer>(
    rows: &[SampleRow],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(rows.iter().map(|r| OrderedMap(r.as_slice())))
}
