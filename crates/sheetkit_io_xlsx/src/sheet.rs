//! Worksheet assembly: one row source -> one `xl/worksheets/sheetN.xml` body.
//!
//! Flow: dimension -> `<x:cols>` -> header row -> body rows -> auto-filter ->
//! drawing. The dimension is either known before the first row or patched in
//! after the last one; see [`BufferedPatchWriter::open_dimension`].

use std::io::Write;

use tracing::{debug, info_span};

use crate::codec::{encode_cell, encode_header, render_cell_xml};
use crate::conf::{C_NS_RELATIONSHIPS, C_NS_SPREADSHEETML, N_NROWS_EXCEL_MAX};
use crate::patch::{BufferedPatchWriter, EnumDimensionSlot};
use crate::source::RowSourceHandle;
use crate::spec::{
    EnumCellValue, EnumDimensionMode, SpecCancelToken, SpecCellRecord, SpecColumnInfo,
    SpecSheetBuildState, SpecXlsxStreamOptions, XlsxStreamError,
};
use crate::style::StyleTable;
use crate::util::{derive_dimension_ref, format_excel_number};

const C_XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

/// Everything a sheet build needs besides the sink and the rows.
pub struct SpecSheetContext<'c> {
    pub options: &'c SpecXlsxStreamOptions,
    pub columns: &'c [SpecColumnInfo],
    pub styles: &'c dyn StyleTable,
    pub if_print_header: bool,
    pub if_auto_filter: bool,
    /// Relationship id of the sheet drawing, e.g. `drawing1`.
    pub drawing_rel_id: Option<&'c str>,
    pub cancel: &'c SpecCancelToken,
}

/// Result of one sheet build.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecSheetOutcome {
    pub state: SpecSheetBuildState,
    pub mode: EnumDimensionMode,
    pub dimension: String,
}

impl SpecSheetOutcome {
    /// Data rows written, header excluded.
    pub fn n_rows_data(&self, if_print_header: bool) -> usize {
        self.state
            .row_max
            .saturating_sub(usize::from(if_print_header && self.mode != EnumDimensionMode::Empty))
    }
}

/// Stream `source` into `sink` as worksheet markup.
///
/// On error the sink holds a partial sheet and must be discarded.
pub fn build_sheet<W: Write>(
    sink: W,
    source: &mut RowSourceHandle<'_>,
    ctx: &SpecSheetContext<'_>,
) -> Result<SpecSheetOutcome, XlsxStreamError> {
    let n_cols = ctx.columns.len();
    let _span = info_span!("build_sheet", shape = ?source.shape_kind(), n_cols).entered();
    let mut writer = BufferedPatchWriter::new(sink, ctx.options.size_buffer, ctx.cancel.clone());

    if n_cols == 0 {
        writer.write_str(C_XML_DECLARATION)?;
        writer.write_str(&format!(
            "<x:worksheet xmlns:x=\"{C_NS_SPREADSHEETML}\"><x:dimension ref=\"A1\"/><x:sheetData></x:sheetData></x:worksheet>"
        ))?;
        writer.finish()?;
        debug!("no columns resolved; wrote empty worksheet");
        return Ok(SpecSheetOutcome {
            state: SpecSheetBuildState::default(),
            mode: EnumDimensionMode::Empty,
            dimension: "A1".to_string(),
        });
    }

    let n_rows_header = usize::from(ctx.if_print_header);
    let (n_rows_known, mode) = match source.row_count() {
        Some(n_rows) => (Some(n_rows), EnumDimensionMode::Exact),
        None if ctx.options.if_fast_mode => (None, EnumDimensionMode::Patched),
        None => (Some(source.materialize()?), EnumDimensionMode::Materialized),
    };
    debug!(?mode, rows = ?n_rows_known, "dimension mode selected");

    let c_dimension_known = n_rows_known
        .map(|n_rows| derive_dimension_ref(n_rows_header + n_rows, n_cols))
        .transpose()?;

    writer.write_str(C_XML_DECLARATION)?;
    writer.write_str(&format!(
        "<x:worksheet xmlns:r=\"{C_NS_RELATIONSHIPS}\" xmlns:x=\"{C_NS_SPREADSHEETML}\">"
    ))?;
    let slot = writer.open_dimension(c_dimension_known.as_deref())?;

    let mut state = SpecSheetBuildState {
        row_current: 1,
        col_current: 1,
        row_max: 0,
        col_max: n_cols,
        offset_dimension_patch: match slot {
            EnumDimensionSlot::Reserved { offset, .. } => Some(offset),
            EnumDimensionSlot::Exact => None,
        },
    };

    write_column_widths(&mut writer, ctx.columns)?;
    writer.write_str("<x:sheetData>")?;
    if ctx.if_print_header {
        write_header_row(&mut writer, &mut state, ctx)?;
    }
    while let Some(l_values) = source.next_row()? {
        write_body_row(&mut writer, &mut state, &l_values, ctx)?;
    }
    state.row_max = state.row_current - 1;
    writer.write_str("</x:sheetData>")?;

    let c_dimension = derive_dimension_ref(state.row_max, n_cols)?;
    if let Some(c_known) = &c_dimension_known {
        if *c_known != c_dimension {
            return Err(XlsxStreamError::InvalidInput(format!(
                "row source announced dimension {c_known} but produced {c_dimension}"
            )));
        }
    }

    if ctx.if_auto_filter {
        writer.write_str(&format!("<x:autoFilter ref=\"{c_dimension}\" />"))?;
    }
    if let Some(c_rel_id) = ctx.drawing_rel_id {
        writer.write_str(&format!("<x:drawing r:id=\"{c_rel_id}\"/>"))?;
    }
    writer.write_str("</x:worksheet>")?;

    writer.close_dimension(slot, &c_dimension)?;
    writer.finish()?;
    debug!(rows = state.row_max, dimension = %c_dimension, "sheet body written");

    Ok(SpecSheetOutcome {
        state,
        mode,
        dimension: c_dimension,
    })
}

fn write_column_widths<W: Write>(
    writer: &mut BufferedPatchWriter<W>,
    columns: &[SpecColumnInfo],
) -> Result<(), XlsxStreamError> {
    let l_widths: Vec<(usize, f64)> = columns
        .iter()
        .filter(|col| !col.if_ignored)
        .filter_map(|col| col.width.map(|width| (col.order_index, width)))
        .collect();
    if l_widths.is_empty() {
        return Ok(());
    }

    writer.write_str("<x:cols>")?;
    for (n_idx, width) in l_widths {
        writer.write_str(&format!(
            "<x:col min=\"{n_idx}\" max=\"{n_idx}\" width=\"{}\" customWidth=\"1\" />",
            format_excel_number(width)
        ))?;
    }
    writer.write_str("</x:cols>")
}

fn write_header_row<W: Write>(
    writer: &mut BufferedPatchWriter<W>,
    state: &mut SpecSheetBuildState,
    ctx: &SpecSheetContext<'_>,
) -> Result<(), XlsxStreamError> {
    writer.write_str(&format!("<x:row r=\"{}\">", state.row_current))?;
    for col in ctx.columns {
        state.col_current = col.order_index;
        if col.if_ignored {
            continue;
        }
        let record = SpecCellRecord {
            row: state.row_current,
            col: state.col_current,
            encoding: encode_header(&col.display_name, ctx.styles),
        };
        writer.write_str(&render_cell_xml(&record)?)?;
    }
    writer.write_str("</x:row>")?;
    state.row_current += 1;
    Ok(())
}

fn write_body_row<W: Write>(
    writer: &mut BufferedPatchWriter<W>,
    state: &mut SpecSheetBuildState,
    values: &[EnumCellValue],
    ctx: &SpecSheetContext<'_>,
) -> Result<(), XlsxStreamError> {
    if state.row_current > N_NROWS_EXCEL_MAX {
        return Err(XlsxStreamError::InvalidInput(format!(
            "sheet exceeds Excel row limit {N_NROWS_EXCEL_MAX}"
        )));
    }
    if values.len() != ctx.columns.len() {
        return Err(XlsxStreamError::InvalidInput(format!(
            "row {} has {} values for {} columns",
            state.row_current,
            values.len(),
            ctx.columns.len()
        )));
    }

    writer.write_str(&format!("<x:row r=\"{}\">", state.row_current))?;
    for (col, value) in ctx.columns.iter().zip(values) {
        state.col_current = col.order_index;
        if col.if_ignored {
            continue;
        }
        let Some(encoding) = encode_cell(value, Some(col), ctx.styles, ctx.options)? else {
            continue;
        };
        let record = SpecCellRecord {
            row: state.row_current,
            col: state.col_current,
            encoding,
        };
        writer.write_str(&render_cell_xml(&record)?)?;
    }
    writer.write_str("</x:row>")?;
    state.row_current += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::schema::resolve_columns;
    use crate::source::RowSource;
    use crate::spec::SpecColumnDecl;
    use crate::style::DefaultStyleTable;

    type Row = Vec<(String, EnumCellValue)>;

    fn create_rows(n_rows: usize) -> Vec<Row> {
        (0..n_rows)
            .map(|n_idx| {
                vec![
                    ("id".to_string(), EnumCellValue::Integer(n_idx as i64 + 1)),
                    ("name".to_string(), EnumCellValue::from(format!("n{n_idx}"))),
                    ("ok".to_string(), EnumCellValue::Boolean(n_idx % 2 == 0)),
                ]
            })
            .collect()
    }

    fn build(
        source: RowSource<'_>,
        options: &SpecXlsxStreamOptions,
        overrides: &[SpecColumnDecl],
        declared: Option<&[SpecColumnDecl]>,
    ) -> Result<(String, SpecSheetOutcome), XlsxStreamError> {
        let mut handle = source.into_handle()?;
        if let Some(l_declared) = declared {
            handle.apply_declared_columns(l_declared);
        }
        let mut styles = DefaultStyleTable::new();
        let resolution = resolve_columns(handle.columns(), overrides, &mut styles)?;
        let cancel = SpecCancelToken::new();
        let ctx = SpecSheetContext {
            options,
            columns: &resolution.columns,
            styles: &styles,
            if_print_header: options.if_print_header,
            if_auto_filter: options.if_auto_filter,
            drawing_rel_id: None,
            cancel: &cancel,
        };
        let mut v_out = Vec::new();
        let outcome = build_sheet(&mut v_out, &mut handle, &ctx)?;
        Ok((String::from_utf8(v_out).unwrap(), outcome))
    }

    #[test]
    fn test_exact_mode_markup() {
        let options = SpecXlsxStreamOptions {
            if_auto_filter: true,
            ..Default::default()
        };
        let overrides = vec![SpecColumnDecl::new("name").with_width(18.5)];
        let (c_xml, outcome) =
            build(RowSource::from_maps(create_rows(1)), &options, &overrides, None).unwrap();

        let c_expected = concat!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
            "<x:worksheet xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" ",
            "xmlns:x=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
            "<x:dimension ref=\"A1:C2\"/>",
            "<x:cols><x:col min=\"2\" max=\"2\" width=\"18.5\" customWidth=\"1\" /></x:cols>",
            "<x:sheetData>",
            "<x:row r=\"1\">",
            "<x:c r=\"A1\" t=\"str\" s=\"1\"><x:v>id</x:v></x:c>",
            "<x:c r=\"B1\" t=\"str\" s=\"1\"><x:v>name</x:v></x:c>",
            "<x:c r=\"C1\" t=\"str\" s=\"1\"><x:v>ok</x:v></x:c>",
            "</x:row>",
            "<x:row r=\"2\">",
            "<x:c r=\"A2\" s=\"2\"><x:v>1</x:v></x:c>",
            "<x:c r=\"B2\" t=\"str\" s=\"2\"><x:v>n0</x:v></x:c>",
            "<x:c r=\"C2\" t=\"b\" s=\"2\"><x:v>1</x:v></x:c>",
            "</x:row>",
            "</x:sheetData>",
            "<x:autoFilter ref=\"A1:C2\" />",
            "</x:worksheet>",
        );
        assert_eq!(c_xml, c_expected);
        assert_eq!(outcome.mode, EnumDimensionMode::Exact);
        assert_eq!(outcome.state.offset_dimension_patch, None);
        assert_eq!(outcome.n_rows_data(true), 1);
    }

    #[test]
    fn test_patched_and_materialized_match_exact_bytes() {
        let options_fast = SpecXlsxStreamOptions {
            size_buffer: 16,
            ..Default::default()
        };
        let options_slow = SpecXlsxStreamOptions {
            if_fast_mode: false,
            ..options_fast.clone()
        };

        let (c_exact, outcome_exact) =
            build(RowSource::from_maps(create_rows(40)), &options_fast, &[], None).unwrap();
        // `filter` hides the exact length from the adapter.
        let (c_patched, outcome_patched) = build(
            RowSource::from_maps(create_rows(40).into_iter().filter(|_| true)),
            &options_fast,
            &[],
            None,
        )
        .unwrap();
        let (c_materialized, outcome_materialized) = build(
            RowSource::from_maps(create_rows(40).into_iter().filter(|_| true)),
            &options_slow,
            &[],
            None,
        )
        .unwrap();

        assert_eq!(outcome_exact.mode, EnumDimensionMode::Exact);
        assert_eq!(outcome_patched.mode, EnumDimensionMode::Patched);
        assert!(outcome_patched.state.offset_dimension_patch.is_some());
        assert_eq!(outcome_materialized.mode, EnumDimensionMode::Materialized);
        assert_eq!(outcome_patched.dimension, "A1:C41");
        assert_eq!(c_patched, c_exact);
        assert_eq!(c_materialized, c_exact);
    }

    #[test]
    fn test_ignored_column_keeps_positions() {
        let overrides = vec![SpecColumnDecl::new("name").ignored()];
        let (c_xml, outcome) = build(
            RowSource::from_maps(create_rows(1)),
            &SpecXlsxStreamOptions::default(),
            &overrides,
            None,
        )
        .unwrap();

        assert!(c_xml.contains("<x:c r=\"C1\" t=\"str\" s=\"1\"><x:v>ok</x:v></x:c>"));
        assert!(c_xml.contains("<x:c r=\"C2\" t=\"b\" s=\"2\"><x:v>1</x:v></x:c>"));
        assert!(!c_xml.contains("r=\"B2\""));
        assert_eq!(outcome.dimension, "A1:C2");
    }

    #[test]
    fn test_zero_rows_with_and_without_header() {
        let l_declared = vec![
            SpecColumnDecl::new("a"),
            SpecColumnDecl::new("b"),
            SpecColumnDecl::new("c"),
        ];

        let (c_xml, outcome) = build(
            RowSource::from_maps(Vec::<Row>::new()),
            &SpecXlsxStreamOptions::default(),
            &[],
            Some(l_declared.as_slice()),
        )
        .unwrap();
        assert_eq!(outcome.dimension, "A1:C1");
        assert!(c_xml.contains("<x:row r=\"1\">"));
        assert!(!c_xml.contains("<x:row r=\"2\">"));

        let options = SpecXlsxStreamOptions {
            if_print_header: false,
            ..Default::default()
        };
        let (c_xml, outcome) = build(
            RowSource::from_maps(Vec::<Row>::new()),
            &options,
            &[],
            Some(l_declared.as_slice()),
        )
        .unwrap();
        assert_eq!(outcome.dimension, "A1");
        assert!(c_xml.contains("<x:dimension ref=\"A1\"/><x:sheetData></x:sheetData>"));
    }

    #[test]
    fn test_untyped_empty_source_writes_empty_worksheet() {
        let (c_xml, outcome) = build(
            RowSource::from_maps(Vec::<Row>::new()),
            &SpecXlsxStreamOptions::default(),
            &[],
            None,
        )
        .unwrap();
        assert_eq!(outcome.mode, EnumDimensionMode::Empty);
        assert_eq!(
            c_xml,
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><x:worksheet xmlns:x=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><x:dimension ref=\"A1\"/><x:sheetData></x:sheetData></x:worksheet>"
        );
    }

    #[test]
    fn test_unsupported_value_fails_build() {
        let l_rows: Vec<Row> = vec![vec![(
            "blob".to_string(),
            EnumCellValue::Opaque {
                type_name: "Binary".to_string(),
                text: None,
            },
        )]];
        let err = build(
            RowSource::from_maps(l_rows),
            &SpecXlsxStreamOptions::default(),
            &[],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, XlsxStreamError::UnsupportedValueType { ref type_name } if type_name == "Binary"));
    }

    struct AnnouncingCursor {
        n_rows_announced: usize,
        n_rows_produced: usize,
        n_next: usize,
    }

    impl crate::source::RowCursor for AnnouncingCursor {
        fn field_names(&self) -> Vec<String> {
            vec!["n".to_string(), "label".to_string()]
        }

        fn row_count(&self) -> Option<usize> {
            Some(self.n_rows_announced)
        }

        fn fetch_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
            if self.n_next >= self.n_rows_produced {
                return Ok(None);
            }
            self.n_next += 1;
            Ok(Some(vec![
                EnumCellValue::Integer(self.n_next as i64),
                EnumCellValue::from("x"),
            ]))
        }
    }

    fn build_announcing(
        n_rows_announced: usize,
        n_rows_produced: usize,
    ) -> Result<(String, SpecSheetOutcome), XlsxStreamError> {
        build(
            RowSource::from_cursor(AnnouncingCursor {
                n_rows_announced,
                n_rows_produced,
                n_next: 0,
            }),
            &SpecXlsxStreamOptions::default(),
            &[],
            None,
        )
    }

    #[test]
    fn test_exact_mode_rejects_fewer_rows_than_announced() {
        let err = build_announcing(5, 3).unwrap_err();
        assert!(matches!(
            err,
            XlsxStreamError::InvalidInput(ref c) if c.contains("A1:B6") && c.contains("A1:B4")
        ));
    }

    #[test]
    fn test_exact_mode_rejects_more_rows_than_announced() {
        let err = build_announcing(5, 7).unwrap_err();
        assert!(matches!(
            err,
            XlsxStreamError::InvalidInput(ref c) if c.contains("A1:B6") && c.contains("A1:B8")
        ));
    }

    #[test]
    fn test_exact_mode_accepts_matching_count() {
        let (c_xml, outcome) = build_announcing(5, 5).unwrap();
        assert_eq!(outcome.mode, EnumDimensionMode::Exact);
        assert_eq!(outcome.n_rows_data(true), 5);
        assert!(c_xml.contains("<x:dimension ref=\"A1:B6\"/>"));
    }

    #[test]
    fn test_cancelled_build_surfaces_cancelled() {
        let mut handle = RowSource::from_maps(create_rows(3)).into_handle().unwrap();
        let mut styles = DefaultStyleTable::new();
        let resolution = resolve_columns(handle.columns(), &[], &mut styles).unwrap();
        let cancel = SpecCancelToken::new();
        cancel.cancel();
        let options = SpecXlsxStreamOptions::default();
        let ctx = SpecSheetContext {
            options: &options,
            columns: &resolution.columns,
            styles: &styles,
            if_print_header: true,
            if_auto_filter: false,
            drawing_rel_id: Some("drawing1"),
            cancel: &cancel,
        };

        let err = build_sheet(Vec::new(), &mut handle, &ctx).unwrap_err();
        assert!(err.is_cancelled());
    }
}
