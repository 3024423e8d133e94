//! Stateless helper utilities used by the streaming serializer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use rust_xlsxwriter::utility::column_number_to_name;

use crate::conf::{
    N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL,
};
use crate::spec::{SpecXlsxValuePolicy, XlsxStreamError};

////////////////////////////////////////////////////////////////////////////////
// #region CellReferences

/// Column letters for a 1-based column index (`1 -> A`, `27 -> AA`).
pub fn derive_column_letters(col_1based: usize) -> Result<String, XlsxStreamError> {
    Ok(column_number_to_name(cast_col_num(col_1based)?))
}

/// Cell reference for 1-based row/column indices (`(4, 2) -> B4`).
pub fn derive_cell_ref(row_1based: usize, col_1based: usize) -> Result<String, XlsxStreamError> {
    validate_row_num(row_1based)?;
    Ok(format!("{}{row_1based}", derive_column_letters(col_1based)?))
}

/// Used-range reference for a sheet of `n_rows` x `n_cols` starting at `A1`.
///
/// An empty or single-cell range collapses to `A1`.
pub fn derive_dimension_ref(n_rows: usize, n_cols: usize) -> Result<String, XlsxStreamError> {
    if n_rows == 0 || n_cols == 0 || (n_rows == 1 && n_cols == 1) {
        return Ok("A1".to_string());
    }
    Ok(format!("A1:{}", derive_cell_ref(n_rows, n_cols)?))
}

fn cast_col_num(col_1based: usize) -> Result<u16, XlsxStreamError> {
    if col_1based == 0 || col_1based > N_NCOLS_EXCEL_MAX {
        return Err(XlsxStreamError::InvalidInput(format!(
            "column index out of range: {col_1based}"
        )));
    }
    u16::try_from(col_1based - 1)
        .map_err(|_| XlsxStreamError::InvalidInput(format!("column index overflow: {col_1based}")))
}

fn validate_row_num(row_1based: usize) -> Result<(), XlsxStreamError> {
    if row_1based == 0 || row_1based > N_NROWS_EXCEL_MAX {
        return Err(XlsxStreamError::InvalidInput(format!(
            "row index out of range: {row_1based} (Excel limit is {N_NROWS_EXCEL_MAX})"
        )));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TextEncoding

/// Escape text for element content.
///
/// Control characters that XML 1.0 cannot carry are written as `_xHHHH_`.
pub fn escape_xml_text(text: &str) -> String {
    let c_text = if text
        .chars()
        .any(|chr| chr < '\u{20}' && !matches!(chr, '\t' | '\n' | '\r'))
    {
        let mut c_encoded = String::with_capacity(text.len() + 8);
        for chr in text.chars() {
            if chr < '\u{20}' && !matches!(chr, '\t' | '\n' | '\r') {
                c_encoded.push_str(&format!("_x{:04X}_", chr as u32));
            } else {
                c_encoded.push(chr);
            }
        }
        c_encoded
    } else {
        text.to_string()
    };

    quick_xml::escape::escape(c_text.as_str()).into_owned()
}

/// Whether text needs `xml:space="preserve"` to keep edge spaces.
pub fn needs_space_preserve(text: &str) -> bool {
    text.starts_with(' ') || text.ends_with(' ')
}

/// Culture-invariant decimal rendering; shortest text that parses back to `x`.
pub fn format_excel_number(x: f64) -> String {
    x.to_string()
}

/// Return policy text for `NaN`/`Inf`, or `None` for finite values.
pub fn convert_nan_inf_to_str(x: f64, value_policy: &SpecXlsxValuePolicy) -> Option<String> {
    if x.is_nan() {
        return Some(value_policy.nan_str.clone());
    }
    if x.is_infinite() {
        return Some(if x.is_sign_positive() {
            value_policy.posinf_str.clone()
        } else {
            value_policy.neginf_str.clone()
        });
    }
    None
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SerialDates

fn derive_serial_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Excel serial day number (days since 1899-12-30, fraction = time of day).
pub fn derive_excel_serial_from_datetime(value: &NaiveDateTime) -> f64 {
    let delta = *value - derive_serial_epoch();
    let n_ms = delta.num_milliseconds();
    n_ms as f64 / 86_400_000.0
}

/// Excel serial day number of a calendar date.
pub fn derive_excel_serial_from_date(value: &NaiveDate) -> f64 {
    (*value - derive_serial_epoch().date()).num_days() as f64
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnUtils

/// Validate that `columns` has no duplicated keys.
pub fn validate_unique_columns(columns: &[String]) -> Result<(), XlsxStreamError> {
    if columns.len() == columns.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in columns.iter().enumerate() {
        dict_pos.entry(c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter_map(|(c_name, l_pos)| {
            if l_pos.len() > 1 {
                Some(format!(
                    "{c_name:?} x{} at indices {:?}",
                    l_pos.len(),
                    l_pos
                ))
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(XlsxStreamError::InvalidInput(format!(
        "Duplicate column keys detected: {c_msg}"
    )))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().trim_matches('\'').to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Create suffixed sheet name (`base_2`, `base_3`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, part_idx_1based: usize) -> String {
    let c_sheet_name_suffix = format!("_{part_idx_1based}");
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name
        .chars()
        .take(usize::max(1, n_len_base_name_max))
        .collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_dimension_ref_covers_empty_single_and_ranges() {
        assert_eq!(derive_dimension_ref(0, 0).unwrap(), "A1");
        assert_eq!(derive_dimension_ref(0, 3).unwrap(), "A1");
        assert_eq!(derive_dimension_ref(1, 1).unwrap(), "A1");
        assert_eq!(derive_dimension_ref(1, 3).unwrap(), "A1:C1");
        assert_eq!(derive_dimension_ref(4, 4).unwrap(), "A1:D4");
        assert_eq!(derive_dimension_ref(10, 28).unwrap(), "A1:AB10");
    }

    #[test]
    fn test_derive_cell_ref_rejects_out_of_range_indices() {
        assert_eq!(derive_cell_ref(4, 2).unwrap(), "B4");
        assert!(derive_cell_ref(0, 1).is_err());
        assert!(derive_cell_ref(1, N_NCOLS_EXCEL_MAX + 1).is_err());
        assert!(derive_cell_ref(N_NROWS_EXCEL_MAX + 1, 1).is_err());
    }

    #[test]
    fn test_escape_xml_text_escapes_entities_and_control_chars() {
        assert_eq!(escape_xml_text("a<b & c>"), "a&lt;b &amp; c&gt;");
        assert_eq!(escape_xml_text("x\u{1}y"), "x_x0001_y");
        assert_eq!(escape_xml_text("tab\tkept"), "tab\tkept");
    }

    #[test]
    fn test_needs_space_preserve_only_for_edge_spaces() {
        assert!(needs_space_preserve(" lead"));
        assert!(needs_space_preserve("trail "));
        assert!(!needs_space_preserve("in side"));
        assert!(!needs_space_preserve(""));
    }

    #[test]
    fn test_excel_serial_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(derive_excel_serial_from_date(&date), 45292.0);

        let dt = date.and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(derive_excel_serial_from_datetime(&dt), 45292.5);
    }

    #[test]
    fn test_sanitize_and_identifier_respect_length_cap() {
        assert_eq!(sanitize_sheet_name("a/b:c", "_"), "a_b_c");
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet");

        let c_long = "x".repeat(40);
        assert_eq!(sanitize_sheet_name(&c_long, "_").len(), N_LEN_EXCEL_SHEET_NAME_MAX);
        assert_eq!(
            create_sheet_identifier(&c_long, 12).len(),
            N_LEN_EXCEL_SHEET_NAME_MAX
        );
    }

    #[test]
    fn test_validate_unique_columns_reports_positions() {
        let l_cols = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = validate_unique_columns(&l_cols).unwrap_err();
        assert!(err.to_string().contains("\"a\" x2 at indices [0, 2]"));
    }
}
