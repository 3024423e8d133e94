//! Shared XLSX streaming specification models, options and errors.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::conf::N_SIZE_BUFFER_DEFAULT;

////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Failure of a sheet or document build.
#[derive(Debug, Error)]
pub enum XlsxStreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
    /// A cell value has no encoding rule and no string fallback.
    #[error("unsupported cell value type: {type_name}")]
    UnsupportedValueType { type_name: String },
    /// The row source is neither a cursor, a record sequence, a grid nor a map sequence.
    #[error("unsupported row source shape: {0}")]
    UnsupportedSourceShape(String),
    /// Patch bytes do not fit into the reserved window.
    #[error("patch of {len} bytes overflows reserved window of {width} bytes")]
    PatchOverflow { len: usize, width: usize },
    /// The reserved window was already forwarded to the sink.
    #[error("reserved window at offset {offset} was already flushed")]
    AlreadyFlushed { offset: u64 },
    /// No reservation starts at the given offset.
    #[error("no reserved window at offset {offset}")]
    PatchOutOfRange { offset: u64 },
    /// The caller cancelled the build through its [`SpecCancelToken`].
    #[error("sheet build cancelled")]
    Cancelled,
    #[error("{0}")]
    InvalidInput(String),
    /// An earlier sheet failed and the document can no longer be completed.
    #[error("document writer is poisoned by an earlier failure")]
    Poisoned,
}

impl XlsxStreamError {
    /// Whether this error is a cancellation rather than a data or I/O failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Cooperative cancellation flag shared between the caller and a running build.
#[derive(Debug, Clone, Default)]
pub struct SpecCancelToken {
    flag: Arc<AtomicBool>,
}

impl SpecCancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next write/flush.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Fail with [`XlsxStreamError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<(), XlsxStreamError> {
        if self.is_cancelled() {
            return Err(XlsxStreamError::Cancelled);
        }
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Runtime cell value pulled from a row source.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumCellValue {
    /// Missing/blank value.
    None,
    /// Text value.
    String(String),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time of day.
    DateTime(NaiveDateTime),
    /// Pre-quoted text, already XML-safe; emitted verbatim.
    Escaped(String),
    /// Value of a type the codec has no rule for, with an optional string rendering.
    Opaque {
        /// Concrete runtime type name.
        type_name: String,
        /// String fallback; `None` makes the value unsupported.
        text: Option<String>,
    },
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for EnumCellValue {
    fn from(value: i32) -> Self {
        Self::Integer(value as i64)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<NaiveDate> for EnumCellValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for EnumCellValue {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl<T> From<Option<T>> for EnumCellValue
where
    T: Into<EnumCellValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// Value category passed to the style table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumValueKind {
    /// Absent value rendered as an empty styled cell.
    Null,
    /// Text, including stringified fallbacks.
    Text,
    /// Integer or floating-point number.
    Number,
    /// Boolean.
    Boolean,
    /// Date or date-time serial.
    DateTime,
    /// Header cell.
    Header,
}

/// Cell type discriminator (`t` attribute); numbers carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumCellTypeCode {
    /// String value stored in `<x:v>`.
    Str,
    /// Boolean value (`0`/`1`).
    Boolean,
}

impl EnumCellTypeCode {
    /// Attribute text for this type code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Str => "str",
            Self::Boolean => "b",
        }
    }
}

/// Encoded cell: style id, type discriminator and serialized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCellEncoding {
    /// `s` attribute.
    pub style_id: u32,
    /// `t` attribute; `None` for numeric values.
    pub type_code: Option<EnumCellTypeCode>,
    /// XML-safe `<x:v>` text. Empty for null cells.
    pub text: String,
    /// Null cell: emitted without a value element.
    pub if_empty: bool,
}

/// Transient positioned cell, produced and rendered immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCellRecord {
    /// 1-based row index.
    pub row: usize,
    /// 1-based column index.
    pub col: usize,
    /// Encoded content.
    pub encoding: SpecCellEncoding,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnSpecification

/// Row source shape resolved for a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumShapeKind {
    /// Forward-only cursor with a fixed field list.
    Cursor,
    /// Sequence of typed records.
    GenericRecord,
    /// Sequence of key/value maps.
    Map,
    /// Tabular grid with known height and width.
    TabularGrid,
}

impl EnumShapeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::GenericRecord => "generic_record",
            Self::Map => "map",
            Self::TabularGrid => "tabular_grid",
        }
    }
}

/// Column declaration from a source or a caller override.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecColumnDecl {
    /// Source key (field, member or map key).
    pub key: String,
    /// Display name for the header cell.
    pub name: Option<String>,
    /// Column width in character units.
    pub width: Option<f64>,
    /// Explicit number format code.
    pub format: Option<String>,
    /// Skip cell emission while keeping the column slot.
    pub if_ignore: bool,
}

impl SpecColumnDecl {
    /// Declare a column by key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Set the header display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the column width.
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    /// Set an explicit number format code.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Mark the column as ignored.
    pub fn ignored(mut self) -> Self {
        self.if_ignore = true;
        self
    }
}

/// Resolved column; `order_index` is fixed for the whole sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecColumnInfo {
    /// Source key used by the value accessor.
    pub key: String,
    /// 1-based positional index.
    pub order_index: usize,
    /// Header text.
    pub display_name: String,
    /// Width in character units.
    pub width: Option<f64>,
    /// Explicit number format code.
    pub explicit_format: Option<String>,
    /// Skip cell emission.
    pub if_ignored: bool,
}

/// Per-sheet mutable build state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSheetBuildState {
    /// 1-based index of the next row to emit.
    pub row_current: usize,
    /// 1-based index of the next cell within the current row.
    pub col_current: usize,
    /// Last emitted row index (header included).
    pub row_max: usize,
    /// Column count, fixed before the first row.
    pub col_max: usize,
    /// Offset of the reserved dimension window, if any.
    pub offset_dimension_patch: Option<u64>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WriteOptions

/// Text replacement policy for non-finite floats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecXlsxValuePolicy {
    /// Replacement text for NaN.
    pub nan_str: String,
    /// Replacement text for positive infinity.
    pub posinf_str: String,
    /// Replacement text for negative infinity.
    pub neginf_str: String,
}

impl Default for SpecXlsxValuePolicy {
    fn default() -> Self {
        Self {
            nan_str: "NaN".to_string(),
            posinf_str: "Inf".to_string(),
            neginf_str: "-Inf".to_string(),
        }
    }
}

/// Document-wide streaming options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecXlsxStreamOptions {
    /// Emit an empty styled cell for absent values instead of omitting it.
    pub if_emit_null_cells: bool,
    /// Stream sources of unknown length through a reserved dimension window.
    /// When disabled such sources are materialized first so the dimension is exact.
    pub if_fast_mode: bool,
    /// Emit `<x:autoFilter>` over the used range.
    pub if_auto_filter: bool,
    /// Emit a header row with the column display names.
    pub if_print_header: bool,
    /// Bytes buffered before forwarding to the archive entry.
    pub size_buffer: usize,
    /// Non-finite float replacement text.
    pub value_policy: SpecXlsxValuePolicy,
    /// Attach an (empty) drawing part to each sheet.
    pub if_emit_drawing: bool,
}

impl Default for SpecXlsxStreamOptions {
    fn default() -> Self {
        Self {
            if_emit_null_cells: false,
            if_fast_mode: true,
            if_auto_filter: false,
            if_print_header: true,
            size_buffer: N_SIZE_BUFFER_DEFAULT,
            value_policy: SpecXlsxValuePolicy::default(),
            if_emit_drawing: true,
        }
    }
}

/// Per-sheet call options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecSheetWriteOptions {
    /// Per-column overrides matched by key.
    pub columns_override: Vec<SpecColumnDecl>,
    /// Columns used when an untyped source is empty.
    pub columns_declared: Option<Vec<SpecColumnDecl>>,
    /// Override document-level header behavior.
    pub if_print_header: Option<bool>,
    /// Override document-level auto-filter behavior.
    pub if_auto_filter: Option<bool>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// How the dimension of a sheet was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumDimensionMode {
    /// Row count known up front; written once.
    Exact,
    /// Row count unknown; rows were collected first, then written once.
    Materialized,
    /// Row count unknown; a reserved window was patched at the end.
    Patched,
    /// No columns resolved; the fixed empty worksheet was written.
    Empty,
}

impl EnumDimensionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Materialized => "materialized",
            Self::Patched => "patched",
            Self::Empty => "empty",
        }
    }
}

/// Per-sheet write report.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSheetReport {
    /// Final unique sheet name.
    pub sheet_name: String,
    /// Archive entry path.
    pub sheet_path: String,
    /// Resolved row source shape.
    pub shape_kind: EnumShapeKind,
    /// Data rows written (header excluded).
    pub n_rows_data: usize,
    /// Column slots written (ignored columns included).
    pub n_cols: usize,
    /// Dimension reference.
    pub dimension: String,
    /// Dimension production mode.
    pub mode: EnumDimensionMode,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecSheetReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
