//! `sheetkit_io_xlsx` v1:
//! Streaming XLSX worksheet serializer.
//!
//! Module layout:
//! - `conf`    : constants and default presets
//! - `spec`    : specs/models/options/errors
//! - `util`    : pure helper functions
//! - `patch`   : buffered writer with one retroactive patch window
//! - `schema`  : column schema resolution
//! - `codec`   : cell value encoding and cell markup
//! - `source`  : row source adapters (cursor, records, maps, DataFrame)
//! - `style`   : style table and `styles.xml`
//! - `archive` : zip package and content-type registry
//! - `sheet`   : worksheet assembly
//! - `writer`  : workbook-level streaming writer
pub mod archive;
pub mod codec;
pub mod conf;
pub mod patch;
pub mod schema;
pub mod sheet;
pub mod source;
pub mod spec;
pub mod style;
pub mod util;
pub mod writer;

pub use archive::{ArchivePackage, ZipPackage};
pub use conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_SIZE_BUFFER_DEFAULT,
    TUP_EXCEL_ILLEGAL, derive_default_sheet_write_options, derive_default_stream_options,
};
pub use patch::{BufferedPatchWriter, EnumDimensionSlot};
pub use schema::{SpecColumnResolution, resolve_columns};
pub use sheet::{SpecSheetContext, SpecSheetOutcome, build_sheet};
pub use source::{RecordMap, RowCursor, RowSource, RowSourceHandle, SheetRecord};
pub use spec::{
    EnumCellTypeCode, EnumCellValue, EnumDimensionMode, EnumShapeKind, EnumValueKind,
    SpecCancelToken, SpecCellEncoding, SpecColumnDecl, SpecColumnInfo, SpecSheetReport,
    SpecSheetWriteOptions, SpecXlsxStreamOptions, SpecXlsxValuePolicy, XlsxStreamError,
};
pub use style::{DefaultStyleTable, StyleTable};
pub use util::{convert_nan_inf_to_str, derive_dimension_ref, sanitize_sheet_name};
pub use writer::XlsxStreamWriter;
