//! Streaming workbook writer: sheets are serialized one at a time straight into the zip package.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::{Path, PathBuf};

use polars::prelude::{DataFrame, IpcReader, SerReader};
use quick_xml::escape::escape;
use tracing::{debug, warn};

use crate::archive::{ArchivePackage, ZipPackage};
use crate::conf::{
    C_MIME_DRAWING, C_MIME_STYLES, C_MIME_WORKBOOK, C_MIME_WORKSHEET, C_NS_DRAWINGML,
    C_NS_PACKAGE_RELATIONSHIPS, C_NS_RELATIONSHIPS, C_NS_SPREADSHEET_DRAWING,
    C_NS_SPREADSHEETML, C_REL_TYPE_DRAWING, C_REL_TYPE_OFFICE_DOCUMENT, C_REL_TYPE_STYLES,
    C_REL_TYPE_WORKSHEET,
};
use crate::schema::resolve_columns;
use crate::sheet::{SpecSheetContext, build_sheet};
use crate::source::RowSource;
use crate::spec::{
    EnumCellValue, SpecCancelToken, SpecSheetReport, SpecSheetWriteOptions,
    SpecXlsxStreamOptions, XlsxStreamError,
};
use crate::style::DefaultStyleTable;
use crate::util::{create_sheet_identifier, sanitize_sheet_name};

const C_XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>";

#[derive(Debug, Clone)]
struct SpecSheetEntry {
    sheet_name: String,
    n_sheet_id: usize,
    if_drawing: bool,
}

/// Stateful workbook writer over a seekable sink.
///
/// Worksheets are streamed as they are written; workbook-level parts
/// (workbook, styles, relationships, content types) are written by
/// [`Self::finish`].
pub struct XlsxStreamWriter<W: Write + Seek> {
    package: ZipPackage<W>,
    path_file_out: Option<PathBuf>,
    options: SpecXlsxStreamOptions,
    styles: DefaultStyleTable,
    cancel: SpecCancelToken,
    l_sheets: Vec<SpecSheetEntry>,
    set_sheet_names_existing: BTreeSet<String>,
    l_reports: Vec<SpecSheetReport>,
    if_poisoned: bool,
}

impl XlsxStreamWriter<BufWriter<File>> {
    /// Create `path` and write the workbook into it.
    ///
    /// The file is removed again when the writer is aborted or poisoned.
    pub fn create(
        path: impl AsRef<Path>,
        options: SpecXlsxStreamOptions,
    ) -> Result<Self, XlsxStreamError> {
        let path_file_out = path.as_ref().to_path_buf();
        let file = File::create(&path_file_out)?;
        let mut writer = Self::new(BufWriter::new(file), options);
        writer.path_file_out = Some(path_file_out);
        Ok(writer)
    }
}

impl<W: Write + Seek> XlsxStreamWriter<W> {
    pub fn new(sink: W, options: SpecXlsxStreamOptions) -> Self {
        Self {
            package: ZipPackage::new(sink),
            path_file_out: None,
            options,
            styles: DefaultStyleTable::new(),
            cancel: SpecCancelToken::new(),
            l_sheets: Vec::new(),
            set_sheet_names_existing: BTreeSet::new(),
            l_reports: Vec::new(),
            if_poisoned: false,
        }
    }

    /// Replace the cancellation token observed by every sheet build.
    pub fn with_cancel_token(mut self, cancel: SpecCancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels the running and all later sheet builds.
    pub fn cancel_token(&self) -> SpecCancelToken {
        self.cancel.clone()
    }

    /// Output file path, when writing to a file.
    pub fn file_out(&self) -> Option<String> {
        self.path_file_out
            .as_ref()
            .map(|path| path.to_string_lossy().to_string())
    }

    /// Per-sheet reports in write order.
    pub fn reports(&self) -> &[SpecSheetReport] {
        &self.l_reports
    }

    /// Whether an earlier failure made the document unfinishable.
    pub fn is_poisoned(&self) -> bool {
        self.if_poisoned
    }

    /// Stream one sheet.
    ///
    /// Any failure poisons the writer. The partially written worksheet entry
    /// is dropped from the archive; the document can then only be aborted.
    pub fn write_sheet(
        &mut self,
        source: RowSource<'_>,
        sheet_name: &str,
        options: &SpecSheetWriteOptions,
    ) -> Result<SpecSheetReport, XlsxStreamError> {
        if self.if_poisoned {
            return Err(XlsxStreamError::Poisoned);
        }
        match self.write_sheet_inner(source, sheet_name, options) {
            Ok(report) => Ok(report),
            Err(err) => {
                if err.is_cancelled() {
                    debug!(sheet_name, "sheet build cancelled");
                } else {
                    warn!(sheet_name, error = %err, "sheet build failed");
                }
                match self.package.abort_entry() {
                    Ok(Some(c_path)) => debug!(path = %c_path, "dropped partial sheet entry"),
                    Ok(None) => {}
                    Err(err_abort) => {
                        warn!(sheet_name, error = %err_abort, "failed to drop partial sheet entry")
                    }
                }
                self.if_poisoned = true;
                Err(err)
            }
        }
    }

    /// Stream several sheets in order.
    pub fn write_sheets<'s, I, S>(
        &mut self,
        sheets: I,
        options: &SpecSheetWriteOptions,
    ) -> Result<Vec<SpecSheetReport>, XlsxStreamError>
    where
        I: IntoIterator<Item = (S, RowSource<'s>)>,
        S: AsRef<str>,
    {
        sheets
            .into_iter()
            .map(|(sheet_name, source)| self.write_sheet(source, sheet_name.as_ref(), options))
            .collect()
    }

    /// Stream one sheet from a Polars IPC payload.
    pub fn write_sheet_from_ipc_bytes(
        &mut self,
        v_ipc_df: &[u8],
        sheet_name: &str,
        options: &SpecSheetWriteOptions,
    ) -> Result<SpecSheetReport, XlsxStreamError> {
        if self.if_poisoned {
            return Err(XlsxStreamError::Poisoned);
        }
        let df_data = derive_dataframe_from_ipc_bytes(v_ipc_df)?;
        self.write_sheet(RowSource::from_dataframe(&df_data), sheet_name, options)
    }

    /// Write the workbook-level parts and close the package.
    ///
    /// A poisoned writer is aborted instead and reports [`XlsxStreamError::Poisoned`].
    pub fn finish(mut self) -> Result<W, XlsxStreamError> {
        if self.if_poisoned {
            self.abort()?;
            return Err(XlsxStreamError::Poisoned);
        }
        if self.l_sheets.is_empty() {
            self.write_sheet(
                RowSource::from_maps(Vec::<Vec<(String, EnumCellValue)>>::new()),
                "Sheet1",
                &SpecSheetWriteOptions::default(),
            )?;
        }
        self.cancel.check()?;

        for entry in &self.l_sheets {
            if !entry.if_drawing {
                continue;
            }
            let c_path_drawing = format!("xl/drawings/drawing{}.xml", entry.n_sheet_id);
            self.package
                .write_entry(&c_path_drawing, render_drawing_xml().as_bytes())?;
            self.package
                .register_content_type(&c_path_drawing, C_MIME_DRAWING);
            self.package.write_entry(
                &format!("xl/worksheets/_rels/sheet{}.xml.rels", entry.n_sheet_id),
                render_sheet_rels_xml(entry.n_sheet_id).as_bytes(),
            )?;
        }

        self.package
            .write_entry("xl/workbook.xml", render_workbook_xml(&self.l_sheets).as_bytes())?;
        self.package
            .register_content_type("xl/workbook.xml", C_MIME_WORKBOOK);
        self.package.write_entry(
            "xl/_rels/workbook.xml.rels",
            render_workbook_rels_xml(&self.l_sheets).as_bytes(),
        )?;
        self.package
            .write_entry("xl/styles.xml", self.styles.render_styles_xml().as_bytes())?;
        self.package
            .register_content_type("xl/styles.xml", C_MIME_STYLES);
        self.package
            .write_entry("_rels/.rels", render_root_rels_xml().as_bytes())?;
        let c_content_types = self.package.render_content_types_xml();
        self.package
            .write_entry("[Content_Types].xml", c_content_types.as_bytes())?;

        debug!(n_sheets = self.l_sheets.len(), "workbook package finished");
        self.package.finish()
    }

    /// Drop the package and remove the output file, if any.
    pub fn abort(self) -> Result<(), XlsxStreamError> {
        let Self {
            package,
            path_file_out,
            ..
        } = self;
        drop(package);
        if let Some(path) = path_file_out {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed partial workbook"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    fn write_sheet_inner(
        &mut self,
        source: RowSource<'_>,
        sheet_name: &str,
        options: &SpecSheetWriteOptions,
    ) -> Result<SpecSheetReport, XlsxStreamError> {
        let mut handle = source.into_handle()?;
        let mut l_warnings = Vec::new();

        let c_name_clean = sanitize_sheet_name(sheet_name, "_");
        if c_name_clean != sheet_name {
            l_warnings.push(format!(
                "sheet name {sheet_name:?} sanitized to {c_name_clean:?}"
            ));
        }
        let c_name_final = self.derive_unique_sheet_name(&c_name_clean);
        if c_name_final != c_name_clean {
            l_warnings.push(format!(
                "sheet name {c_name_clean:?} already used; renamed to {c_name_final:?}"
            ));
        }

        if let Some(l_declared) = &options.columns_declared {
            if handle.apply_declared_columns(l_declared) {
                debug!(n_cols = l_declared.len(), "using caller-declared columns");
            }
        }
        let resolution =
            resolve_columns(handle.columns(), &options.columns_override, &mut self.styles)?;
        l_warnings.extend(resolution.warnings);

        let n_sheet_id = self.l_sheets.len() + 1;
        let c_path_sheet = format!("xl/worksheets/sheet{n_sheet_id}.xml");
        let c_rel_drawing = format!("drawing{n_sheet_id}");
        let if_drawing = self.options.if_emit_drawing && !resolution.columns.is_empty();
        let if_print_header = options
            .if_print_header
            .unwrap_or(self.options.if_print_header);
        let if_auto_filter = options
            .if_auto_filter
            .unwrap_or(self.options.if_auto_filter);

        let ctx = SpecSheetContext {
            options: &self.options,
            columns: &resolution.columns,
            styles: &self.styles,
            if_print_header,
            if_auto_filter,
            drawing_rel_id: if_drawing.then_some(c_rel_drawing.as_str()),
            cancel: &self.cancel,
        };
        let sink = self.package.create_entry(&c_path_sheet)?;
        let outcome = build_sheet(sink, &mut handle, &ctx)?;
        self.package.commit_entry();
        self.package
            .register_content_type(&c_path_sheet, C_MIME_WORKSHEET);

        self.l_sheets.push(SpecSheetEntry {
            sheet_name: c_name_final.clone(),
            n_sheet_id,
            if_drawing,
        });

        let mut report = SpecSheetReport {
            sheet_name: c_name_final,
            sheet_path: c_path_sheet,
            shape_kind: handle.shape_kind(),
            n_rows_data: outcome.n_rows_data(if_print_header),
            n_cols: outcome.state.col_max,
            dimension: outcome.dimension,
            mode: outcome.mode,
            warnings: Vec::new(),
        };
        for c_warning in l_warnings {
            warn!(sheet_name = %report.sheet_name, "{c_warning}");
            report.warn(c_warning);
        }
        self.l_reports.push(report.clone());
        Ok(report)
    }

    /// Excel compares sheet names case-insensitively.
    fn derive_unique_sheet_name(&mut self, name: &str) -> String {
        if self.set_sheet_names_existing.insert(name.to_lowercase()) {
            return name.to_string();
        }

        let mut n_idx = 2usize;
        loop {
            let c_candidate = create_sheet_identifier(name, n_idx);
            if self.set_sheet_names_existing.insert(c_candidate.to_lowercase()) {
                return c_candidate;
            }
            n_idx += 1;
        }
    }
}

fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame, XlsxStreamError> {
    Ok(IpcReader::new(Cursor::new(v_ipc_df)).finish()?)
}

////////////////////////////////////////////////////////////////////////////////
// #region PackageParts

fn render_workbook_xml(l_sheets: &[SpecSheetEntry]) -> String {
    let mut c_xml = String::from(C_XML_DECLARATION);
    c_xml.push_str(&format!(
        "<x:workbook xmlns:r=\"{C_NS_RELATIONSHIPS}\" xmlns:x=\"{C_NS_SPREADSHEETML}\"><x:sheets>"
    ));
    for entry in l_sheets {
        c_xml.push_str(&format!(
            "<x:sheet name=\"{}\" sheetId=\"{}\" r:id=\"R{}\"/>",
            escape(entry.sheet_name.as_str()),
            entry.n_sheet_id,
            entry.n_sheet_id
        ));
    }
    c_xml.push_str("</x:sheets></x:workbook>");
    c_xml
}

fn render_workbook_rels_xml(l_sheets: &[SpecSheetEntry]) -> String {
    let mut c_xml = String::from(C_XML_DECLARATION);
    c_xml.push_str(&format!("<Relationships xmlns=\"{C_NS_PACKAGE_RELATIONSHIPS}\">"));
    for entry in l_sheets {
        c_xml.push_str(&format!(
            "<Relationship Type=\"{C_REL_TYPE_WORKSHEET}\" Target=\"/xl/worksheets/sheet{}.xml\" Id=\"R{}\"/>",
            entry.n_sheet_id, entry.n_sheet_id
        ));
    }
    c_xml.push_str(&format!(
        "<Relationship Type=\"{C_REL_TYPE_STYLES}\" Target=\"/xl/styles.xml\" Id=\"Rstyles\"/>"
    ));
    c_xml.push_str("</Relationships>");
    c_xml
}

fn render_root_rels_xml() -> String {
    format!(
        "{C_XML_DECLARATION}<Relationships xmlns=\"{C_NS_PACKAGE_RELATIONSHIPS}\"><Relationship Type=\"{C_REL_TYPE_OFFICE_DOCUMENT}\" Target=\"xl/workbook.xml\" Id=\"Rworkbook\"/></Relationships>"
    )
}

fn render_sheet_rels_xml(n_sheet_id: usize) -> String {
    format!(
        "{C_XML_DECLARATION}<Relationships xmlns=\"{C_NS_PACKAGE_RELATIONSHIPS}\"><Relationship Type=\"{C_REL_TYPE_DRAWING}\" Target=\"../drawings/drawing{n_sheet_id}.xml\" Id=\"drawing{n_sheet_id}\"/></Relationships>"
    )
}

fn render_drawing_xml() -> String {
    format!(
        "{C_XML_DECLARATION}<xdr:wsDr xmlns:a=\"{C_NS_DRAWINGML}\" xmlns:xdr=\"{C_NS_SPREADSHEET_DRAWING}\"></xdr:wsDr>"
    )
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
