//! XLSX streaming constants and default preset factories.

use crate::spec::{SpecSheetWriteOptions, SpecXlsxStreamOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Default in-memory buffer size before bytes are forwarded to the archive entry.
pub const N_SIZE_BUFFER_DEFAULT: usize = 512 * 1024;

/// Widest possible dimension reference (`A1:XFD1048576`).
pub const C_DIMENSION_REF_MAX: &str = "A1:XFD1048576";

////////////////////////////////////////////////////////////////////////////////
// #region StyleIds

/// `cellXfs` index used by header cells.
pub const N_STYLE_ID_HEADER: u32 = 1;
/// `cellXfs` index used by ordinary body cells.
pub const N_STYLE_ID_GENERAL: u32 = 2;
/// `cellXfs` index with the built-in short date format (numFmtId 14).
pub const N_STYLE_ID_DATE: u32 = 3;
/// First `cellXfs` index allocated to explicit column formats.
pub const N_STYLE_ID_CUSTOM_BASE: u32 = 5;
/// Custom number formats are numbered from `N_NUMFMT_ID_CUSTOM_BASE + 1`.
pub const N_NUMFMT_ID_CUSTOM_BASE: u32 = 166;
/// Built-in number format id for short dates.
pub const N_NUMFMT_ID_DATE: u32 = 14;

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PackageConstants

/// SpreadsheetML main namespace.
pub const C_NS_SPREADSHEETML: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
/// Office document relationships namespace.
pub const C_NS_RELATIONSHIPS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
/// Package relationships namespace.
pub const C_NS_PACKAGE_RELATIONSHIPS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";
/// Package content types namespace.
pub const C_NS_CONTENT_TYPES: &str = "http://schemas.openxmlformats.org/package/2006/content-types";
/// Spreadsheet drawing namespace.
pub const C_NS_SPREADSHEET_DRAWING: &str =
    "http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing";
/// DrawingML main namespace.
pub const C_NS_DRAWINGML: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";

/// Relationship type of a worksheet part.
pub const C_REL_TYPE_WORKSHEET: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
/// Relationship type of the styles part.
pub const C_REL_TYPE_STYLES: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles";
/// Relationship type of the workbook part.
pub const C_REL_TYPE_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
/// Relationship type of a drawing part.
pub const C_REL_TYPE_DRAWING: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing";

/// MIME type of a worksheet part.
pub const C_MIME_WORKSHEET: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";
/// MIME type of the workbook part.
pub const C_MIME_WORKBOOK: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
/// MIME type of the styles part.
pub const C_MIME_STYLES: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml";
/// MIME type of a drawing part.
pub const C_MIME_DRAWING: &str = "application/vnd.openxmlformats-officedocument.drawing+xml";
/// MIME type of relationship parts.
pub const C_MIME_RELATIONSHIPS: &str = "application/vnd.openxmlformats-package.relationships+xml";

// #endregion
////////////////////////////////////////////////////////////////////////////////

/// Build default document-level stream options.
pub fn derive_default_stream_options() -> SpecXlsxStreamOptions {
    SpecXlsxStreamOptions::default()
}

/// Build default per-sheet write options.
pub fn derive_default_sheet_write_options() -> SpecSheetWriteOptions {
    SpecSheetWriteOptions::default()
}
