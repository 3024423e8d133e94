//! Row sources: four row shapes reduced to "ordered cell values of the next row".

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::{AnyValue, DataFrame, TimeUnit};

use crate::spec::{EnumCellValue, EnumShapeKind, SpecColumnDecl, XlsxStreamError};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01.
const N_DAYS_CE_TO_UNIX_EPOCH: i32 = 719_163;

////////////////////////////////////////////////////////////////////////////////
// #region SourceTraits

/// Forward-only cursor with a field list fixed up front.
pub trait RowCursor {
    /// Field names in positional order.
    fn field_names(&self) -> Vec<String>;

    /// Total row count when the cursor knows it.
    fn row_count(&self) -> Option<usize> {
        None
    }

    /// Next row, `Ok(None)` once exhausted.
    fn fetch_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError>;
}

/// Typed record whose columns are known from its type.
pub trait SheetRecord {
    /// Columns of the record type. Used when the sequence is empty.
    fn declared_columns() -> Vec<SpecColumnDecl>;

    /// Columns of this instance.
    fn columns(&self) -> Vec<SpecColumnDecl> {
        Self::declared_columns()
    }

    /// Value for a column key.
    fn cell_value(&self, key: &str) -> EnumCellValue;
}

/// Untyped key/value row.
pub trait RecordMap {
    /// Keys in column order.
    fn keys(&self) -> Vec<String>;

    /// Value for `key`, `None` when the key is missing.
    fn lookup(&self, key: &str) -> Option<EnumCellValue>;
}

impl RecordMap for BTreeMap<String, EnumCellValue> {
    fn keys(&self) -> Vec<String> {
        BTreeMap::keys(self).cloned().collect()
    }

    fn lookup(&self, key: &str) -> Option<EnumCellValue> {
        self.get(key).cloned()
    }
}

/// Unordered; keys are sorted so column order is stable.
impl RecordMap for HashMap<String, EnumCellValue> {
    fn keys(&self) -> Vec<String> {
        let mut l_keys: Vec<String> = HashMap::keys(self).cloned().collect();
        l_keys.sort();
        l_keys
    }

    fn lookup(&self, key: &str) -> Option<EnumCellValue> {
        self.get(key).cloned()
    }
}

impl RecordMap for Vec<(String, EnumCellValue)> {
    fn keys(&self) -> Vec<String> {
        self.iter().map(|(c_key, _)| c_key.clone()).collect()
    }

    fn lookup(&self, key: &str) -> Option<EnumCellValue> {
        self.iter()
            .find(|(c_key, _)| c_key == key)
            .map(|(_, value)| value.clone())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Adapters

pub struct CursorAdapter<'a> {
    cursor: Box<dyn RowCursor + 'a>,
    l_columns: Vec<SpecColumnDecl>,
}

impl CursorAdapter<'_> {
    fn next_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
        let Some(l_values) = self.cursor.fetch_row()? else {
            return Ok(None);
        };
        if l_values.len() != self.l_columns.len() {
            return Err(XlsxStreamError::InvalidInput(format!(
                "cursor row has {} values but {} fields",
                l_values.len(),
                self.l_columns.len()
            )));
        }
        Ok(Some(l_values))
    }
}

pub struct RecordAdapter<'a> {
    l_columns: Vec<SpecColumnDecl>,
    n_rows: Option<usize>,
    rows: Box<dyn Iterator<Item = Vec<EnumCellValue>> + 'a>,
}

type BoxedMapRows<'a> =
    Box<dyn Iterator<Item = Result<Box<dyn RecordMap + 'a>, XlsxStreamError>> + 'a>;

pub struct MapAdapter<'a> {
    l_columns: Vec<SpecColumnDecl>,
    n_rows: Option<usize>,
    maps: BoxedMapRows<'a>,
}

impl MapAdapter<'_> {
    fn next_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
        let Some(map) = self.maps.next().transpose()? else {
            return Ok(None);
        };
        Ok(Some(
            self.l_columns
                .iter()
                .map(|col| map.lookup(&col.key).unwrap_or(EnumCellValue::None))
                .collect(),
        ))
    }
}

pub struct GridAdapter<'a> {
    df: &'a DataFrame,
    l_columns: Vec<SpecColumnDecl>,
    n_row_next: usize,
}

impl GridAdapter<'_> {
    fn next_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
        if self.n_row_next >= self.df.height() {
            return Ok(None);
        }
        let l_values = self
            .df
            .get_columns()
            .iter()
            .map(|col| Ok(derive_cell_value_from_any_value(col.get(self.n_row_next)?)))
            .collect::<Result<Vec<_>, XlsxStreamError>>()?;
        self.n_row_next += 1;
        Ok(Some(l_values))
    }
}

enum EnumRowAdapter<'a> {
    Cursor(CursorAdapter<'a>),
    Records(RecordAdapter<'a>),
    Maps(MapAdapter<'a>),
    Grid(GridAdapter<'a>),
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowSource

/// Caller-facing row source.
pub enum RowSource<'a> {
    /// A recognized shape.
    Handle(RowSourceHandle<'a>),
    /// Input of an unrecognized shape, by type name.
    Unsupported(String),
    /// The source failed before its columns could be resolved.
    Failed(XlsxStreamError),
}

impl<'a> RowSource<'a> {
    /// Pull rows from a cursor.
    pub fn from_cursor(cursor: impl RowCursor + 'a) -> Self {
        let l_columns = cursor
            .field_names()
            .into_iter()
            .map(SpecColumnDecl::new)
            .collect();
        Self::from_adapter(EnumRowAdapter::Cursor(CursorAdapter {
            cursor: Box::new(cursor),
            l_columns,
        }))
    }

    /// Typed records. Columns come from the first record, or from the
    /// record type when the sequence is empty.
    pub fn from_records<I, R>(records: I) -> Self
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: 'a,
        R: SheetRecord + 'a,
    {
        let mut it_records = records.into_iter();
        let n_rows = derive_exact_len(&it_records);
        let record_first = it_records.next();
        let l_columns = match &record_first {
            Some(record) => record.columns(),
            None => R::declared_columns(),
        };

        let l_keys: Vec<String> = l_columns.iter().map(|col| col.key.clone()).collect();
        let rows = record_first.into_iter().chain(it_records).map(move |record| {
            l_keys
                .iter()
                .map(|c_key| record.cell_value(c_key))
                .collect::<Vec<_>>()
        });

        Self::from_adapter(EnumRowAdapter::Records(RecordAdapter {
            l_columns,
            n_rows,
            rows: Box::new(rows),
        }))
    }

    /// Key/value rows. Columns are the keys of the first row.
    pub fn from_maps<I, M>(maps: I) -> Self
    where
        I: IntoIterator<Item = M>,
        I::IntoIter: 'a,
        M: RecordMap + 'a,
    {
        Self::try_from_maps(maps.into_iter().map(Ok::<M, XlsxStreamError>))
    }

    /// Key/value rows pulled lazily from a fallible producer.
    ///
    /// An error on the first row fails the source; later errors surface
    /// from [`RowSourceHandle::next_row`] when that row is pulled.
    pub fn try_from_maps<I, M>(maps: I) -> Self
    where
        I: IntoIterator<Item = Result<M, XlsxStreamError>>,
        I::IntoIter: 'a,
        M: RecordMap + 'a,
    {
        let mut it_maps = maps.into_iter();
        let n_rows = derive_exact_len(&it_maps);
        let map_first = match it_maps.next().transpose() {
            Ok(map_first) => map_first,
            Err(err) => return Self::Failed(err),
        };
        let l_columns = map_first
            .as_ref()
            .map(|map| map.keys().into_iter().map(SpecColumnDecl::new).collect())
            .unwrap_or_default();

        let maps = map_first.map(Ok).into_iter().chain(it_maps).map(|res_map| {
            res_map.map(|map| Box::new(map) as Box<dyn RecordMap + 'a>)
        });

        Self::from_adapter(EnumRowAdapter::Maps(MapAdapter {
            l_columns,
            n_rows,
            maps: Box::new(maps),
        }))
    }

    /// Rows of a polars DataFrame.
    pub fn from_dataframe(df: &'a DataFrame) -> Self {
        let l_columns = df
            .get_column_names_str()
            .into_iter()
            .map(SpecColumnDecl::new)
            .collect();
        Self::from_adapter(EnumRowAdapter::Grid(GridAdapter {
            df,
            l_columns,
            n_row_next: 0,
        }))
    }

    /// Input that matches none of the supported shapes.
    pub fn unsupported(type_name: impl Into<String>) -> Self {
        Self::Unsupported(type_name.into())
    }

    /// Take the handle, failing for unsupported input.
    pub fn into_handle(self) -> Result<RowSourceHandle<'a>, XlsxStreamError> {
        match self {
            Self::Handle(handle) => Ok(handle),
            Self::Unsupported(type_name) => Err(XlsxStreamError::UnsupportedSourceShape(type_name)),
            Self::Failed(err) => Err(err),
        }
    }

    fn from_adapter(adapter: EnumRowAdapter<'a>) -> Self {
        Self::Handle(RowSourceHandle {
            adapter,
            q_rows_materialized: None,
        })
    }
}

/// Exclusively owned row iterator for one sheet build.
pub struct RowSourceHandle<'a> {
    adapter: EnumRowAdapter<'a>,
    q_rows_materialized: Option<VecDeque<Vec<EnumCellValue>>>,
}

impl RowSourceHandle<'_> {
    pub fn shape_kind(&self) -> EnumShapeKind {
        match &self.adapter {
            EnumRowAdapter::Cursor(_) => EnumShapeKind::Cursor,
            EnumRowAdapter::Records(_) => EnumShapeKind::GenericRecord,
            EnumRowAdapter::Maps(_) => EnumShapeKind::Map,
            EnumRowAdapter::Grid(_) => EnumShapeKind::TabularGrid,
        }
    }

    /// Columns declared by the source, in positional order.
    pub fn columns(&self) -> &[SpecColumnDecl] {
        match &self.adapter {
            EnumRowAdapter::Cursor(adapter) => &adapter.l_columns,
            EnumRowAdapter::Records(adapter) => &adapter.l_columns,
            EnumRowAdapter::Maps(adapter) => &adapter.l_columns,
            EnumRowAdapter::Grid(adapter) => &adapter.l_columns,
        }
    }

    /// Remaining row count, when known without consuming the source.
    pub fn row_count(&self) -> Option<usize> {
        if let Some(q_rows) = &self.q_rows_materialized {
            return Some(q_rows.len());
        }
        match &self.adapter {
            EnumRowAdapter::Cursor(adapter) => adapter.cursor.row_count(),
            EnumRowAdapter::Records(adapter) => adapter.n_rows,
            EnumRowAdapter::Maps(adapter) => adapter.n_rows,
            EnumRowAdapter::Grid(adapter) => Some(adapter.df.height() - adapter.n_row_next),
        }
    }

    /// Use `columns` when the source itself resolved none (untyped and empty).
    ///
    /// Returns whether the declared columns were taken.
    pub fn apply_declared_columns(&mut self, columns: &[SpecColumnDecl]) -> bool {
        let l_columns = match &mut self.adapter {
            EnumRowAdapter::Cursor(adapter) => &mut adapter.l_columns,
            EnumRowAdapter::Maps(adapter) => &mut adapter.l_columns,
            EnumRowAdapter::Records(_) | EnumRowAdapter::Grid(_) => return false,
        };
        if !l_columns.is_empty() {
            return false;
        }
        *l_columns = columns.to_vec();
        true
    }

    /// Drain the source into memory so the row count becomes known.
    pub fn materialize(&mut self) -> Result<usize, XlsxStreamError> {
        if self.q_rows_materialized.is_none() {
            let mut q_rows = VecDeque::new();
            while let Some(l_values) = self.next_row()? {
                q_rows.push_back(l_values);
            }
            self.q_rows_materialized = Some(q_rows);
        }
        Ok(self.q_rows_materialized.as_ref().map_or(0, VecDeque::len))
    }

    /// Ordered values of the next row.
    pub fn next_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
        if let Some(q_rows) = &mut self.q_rows_materialized {
            return Ok(q_rows.pop_front());
        }
        match &mut self.adapter {
            EnumRowAdapter::Cursor(adapter) => adapter.next_row(),
            EnumRowAdapter::Records(adapter) => Ok(adapter.rows.next()),
            EnumRowAdapter::Maps(adapter) => adapter.next_row(),
            EnumRowAdapter::Grid(adapter) => adapter.next_row(),
        }
    }
}

fn derive_exact_len<I: Iterator>(it: &I) -> Option<usize> {
    match it.size_hint() {
        (n_lo, Some(n_hi)) if n_lo == n_hi => Some(n_lo),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PolarsValues

fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Boolean(val),
        AnyValue::UInt8(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt16(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt32(val) => EnumCellValue::Integer(val as i64),
        AnyValue::UInt64(val) => match i64::try_from(val) {
            Ok(n) => EnumCellValue::Integer(n),
            Err(_) => EnumCellValue::Float(val as f64),
        },
        AnyValue::Int8(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int16(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int32(val) => EnumCellValue::Integer(val as i64),
        AnyValue::Int64(val) => EnumCellValue::Integer(val),
        AnyValue::Int128(val) => match i64::try_from(val) {
            Ok(n) => EnumCellValue::Integer(n),
            Err(_) => EnumCellValue::Float(val as f64),
        },
        AnyValue::Float32(val) => EnumCellValue::Float(val as f64),
        AnyValue::Float64(val) => EnumCellValue::Float(val),
        AnyValue::Date(n_days) => derive_date_from_epoch_days(n_days),
        AnyValue::Datetime(n_ts, time_unit, _) | AnyValue::DatetimeOwned(n_ts, time_unit, _) => {
            derive_datetime_from_timestamp(n_ts, time_unit)
        }
        AnyValue::Binary(_) | AnyValue::BinaryOwned(_) | AnyValue::List(_) => {
            EnumCellValue::Opaque {
                type_name: value.dtype().to_string(),
                text: None,
            }
        }
        _ => EnumCellValue::Opaque {
            type_name: value.dtype().to_string(),
            text: Some(value.to_string()),
        },
    }
}

fn derive_date_from_epoch_days(n_days: i32) -> EnumCellValue {
    n_days
        .checked_add(N_DAYS_CE_TO_UNIX_EPOCH)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .map_or_else(
            || EnumCellValue::Opaque {
                type_name: "date".to_string(),
                text: Some(n_days.to_string()),
            },
            EnumCellValue::Date,
        )
}

/// Timestamps are rendered as UTC wall-clock time. A column time zone, when set,
/// is not applied.
fn derive_datetime_from_timestamp(n_ts: i64, time_unit: TimeUnit) -> EnumCellValue {
    let dt: Option<NaiveDateTime> = match time_unit {
        TimeUnit::Nanoseconds => Some(DateTime::from_timestamp_nanos(n_ts)),
        TimeUnit::Microseconds => DateTime::from_timestamp_micros(n_ts),
        TimeUnit::Milliseconds => DateTime::from_timestamp_millis(n_ts),
    }
    .map(|dt| dt.naive_utc());
    dt.map_or_else(
        || EnumCellValue::Opaque {
            type_name: "datetime".to_string(),
            text: Some(n_ts.to_string()),
        },
        EnumCellValue::DateTime,
    )
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
