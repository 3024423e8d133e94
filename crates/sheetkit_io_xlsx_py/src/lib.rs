use std::cell::RefCell;
use std::fs::File;
use std::io::BufWriter;
use std::rc::Rc;

use chrono::NaiveDate;
use pyo3::create_exception;
use pyo3::exceptions::{PyException, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{
    PyAny, PyBool, PyByteArray, PyBytes, PyDict, PyFloat, PyInt, PyIterator, PyList, PyString,
    PyTuple,
};
use sheetkit_io_xlsx::conf::{N_SIZE_BUFFER_DEFAULT, derive_default_sheet_write_options};
use sheetkit_io_xlsx::{
    EnumCellValue, RowCursor, RowSource, SpecColumnDecl, SpecSheetReport, SpecSheetWriteOptions,
    SpecXlsxStreamOptions, SpecXlsxValuePolicy, XlsxStreamError,
    XlsxStreamWriter as RsXlsxStreamWriter,
};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "sheetkit.xlsx.stream_writer.v1";
const C_BRIDGE_TRANSPORT: &str = "ipc_bytes";

create_exception!(_sheetkit_io_xlsx_rs, SheetkitXlsxError, PyException);
create_exception!(_sheetkit_io_xlsx_rs, UnsupportedValueTypeError, SheetkitXlsxError);
create_exception!(_sheetkit_io_xlsx_rs, UnsupportedSourceShapeError, SheetkitXlsxError);
create_exception!(_sheetkit_io_xlsx_rs, SheetBuildCancelledError, SheetkitXlsxError);

type RsFileWriter = RsXlsxStreamWriter<BufWriter<File>>;

#[pyclass(name = "XlsxStreamWriter")]
struct PyXlsxStreamWriter {
    #[pyo3(get)]
    file_out: String,
    inner: Option<RsFileWriter>,
    l_reports: Vec<SpecSheetReport>,
}

#[pymethods]
impl PyXlsxStreamWriter {
    #[new]
    #[pyo3(signature = (
        file_out,
        if_emit_null_cells = false,
        if_fast_mode = true,
        if_auto_filter = false,
        if_print_header = true,
        size_buffer = N_SIZE_BUFFER_DEFAULT,
        value_policy = None,
        if_emit_drawing = true
    ))]
    #[allow(clippy::too_many_arguments)]
    fn new(
        file_out: String,
        if_emit_null_cells: bool,
        if_fast_mode: bool,
        if_auto_filter: bool,
        if_print_header: bool,
        size_buffer: usize,
        value_policy: Option<&Bound<'_, PyAny>>,
        if_emit_drawing: bool,
    ) -> PyResult<Self> {
        let cfg_options = SpecXlsxStreamOptions {
            if_emit_null_cells,
            if_fast_mode,
            if_auto_filter,
            if_print_header,
            size_buffer,
            value_policy: parse_spec_value_policy(value_policy)?,
            if_emit_drawing,
        };
        let inner = RsFileWriter::create(&file_out, cfg_options).map_err(convert_stream_error)?;
        Ok(Self {
            file_out,
            inner: Some(inner),
            l_reports: Vec::new(),
        })
    }

    fn __enter__(slf: PyRefMut<'_, Self>) -> PyRefMut<'_, Self> {
        slf
    }

    /// Finish on a clean exit; abort (remove the partial file) when an exception is propagating.
    #[pyo3(signature = (exc_type=None, _exc=None, _tb=None))]
    fn __exit__(
        &mut self,
        exc_type: Option<&Bound<'_, PyAny>>,
        _exc: Option<&Bound<'_, PyAny>>,
        _tb: Option<&Bound<'_, PyAny>>,
    ) -> PyResult<()> {
        if exc_type.is_some_and(|obj| !obj.is_none()) {
            return self.abort();
        }
        self.close()
    }

    /// Write workbook parts and close the file. Idempotent.
    fn close(&mut self) -> PyResult<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };
        self.l_reports = inner.reports().to_vec();
        inner.finish().map_err(convert_stream_error)?;
        Ok(())
    }

    /// Discard the workbook and remove the output file. Idempotent.
    fn abort(&mut self) -> PyResult<()> {
        let Some(inner) = self.inner.take() else {
            return Ok(());
        };
        self.l_reports = inner.reports().to_vec();
        inner.abort().map_err(convert_stream_error)
    }

    fn report(&self, py: Python<'_>) -> PyResult<Py<PyAny>> {
        let l_reports = match &self.inner {
            Some(inner) => inner.reports(),
            None => self.l_reports.as_slice(),
        };

        let mut l_report_obj = Vec::with_capacity(l_reports.len());
        for report in l_reports {
            l_report_obj.push(create_report_dict(py, report)?);
        }
        let tup_report = PyTuple::new(py, l_report_obj)?;
        Ok(tup_report.into_any().unbind())
    }

    /// Stream one sheet.
    ///
    /// `rows` is a polars DataFrame, an iterable of dicts, or an iterable of
    /// sequences (then `columns` names the fields).
    #[pyo3(signature = (
        rows,
        sheet_name,
        columns = None,
        columns_override = None,
        if_print_header = None,
        if_auto_filter = None
    ))]
    fn write_sheet<'py>(
        mut slf: PyRefMut<'py, Self>,
        py: Python<'py>,
        rows: &Bound<'py, PyAny>,
        sheet_name: &str,
        columns: Option<Vec<String>>,
        columns_override: Option<&Bound<'py, PyAny>>,
        if_print_header: Option<bool>,
        if_auto_filter: Option<bool>,
    ) -> PyResult<PyRefMut<'py, Self>> {
        let mut cfg_sheet_options = derive_default_sheet_write_options();
        cfg_sheet_options.columns_override = parse_column_decls(columns_override)?;
        cfg_sheet_options.columns_declared = columns
            .as_ref()
            .map(|l_names| l_names.iter().map(SpecColumnDecl::new).collect());
        cfg_sheet_options.if_print_header = if_print_header;
        cfg_sheet_options.if_auto_filter = if_auto_filter;

        let inner = slf
            .inner
            .as_mut()
            .ok_or_else(|| SheetkitXlsxError::new_err("Cannot write after close()."))?;

        if is_polars_dataframe(py, rows)? {
            let v_ipc_df = derive_ipc_bytes_from_dataframe(rows)?;
            inner
                .write_sheet_from_ipc_bytes(&v_ipc_df, sheet_name, &cfg_sheet_options)
                .map_err(convert_stream_error)?;
            return Ok(slf);
        }

        let slot_err: Rc<RefCell<Option<PyErr>>> = Rc::new(RefCell::new(None));
        let source = derive_row_source(py, rows, columns, &slot_err)?;
        let res_write = inner.write_sheet(source, sheet_name, &cfg_sheet_options);
        if let Some(err) = slot_err.borrow_mut().take() {
            return Err(err);
        }
        res_write.map_err(convert_stream_error)?;
        Ok(slf)
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region RowSources

/// Cursor over a Python iterator of sequences. Holds the GIL for its lifetime.
struct PyRowCursor<'py> {
    iter: Bound<'py, PyIterator>,
    item_first: Option<Bound<'py, PyAny>>,
    l_fields: Vec<String>,
    n_rows: Option<usize>,
    converter: PyValueConverter<'py>,
    slot_err: Rc<RefCell<Option<PyErr>>>,
}

impl PyRowCursor<'_> {
    fn fetch_row_py(&mut self) -> PyResult<Option<Vec<EnumCellValue>>> {
        let item = match self.item_first.take() {
            Some(item) => item,
            None => match self.iter.next() {
                Some(res_item) => res_item?,
                None => return Ok(None),
            },
        };
        if item.is_instance_of::<PyString>() || item.is_instance_of::<PyDict>() {
            return Err(PyValueError::new_err(format!(
                "Expected a sequence row, got {}.",
                item.get_type().name()?
            )));
        }

        let mut l_values = Vec::with_capacity(self.l_fields.len());
        for obj in item.try_iter()? {
            l_values.push(self.converter.convert(&obj?)?);
        }
        Ok(Some(l_values))
    }
}

impl RowCursor for PyRowCursor<'_> {
    fn field_names(&self) -> Vec<String> {
        self.l_fields.clone()
    }

    fn row_count(&self) -> Option<usize> {
        self.n_rows
    }

    fn fetch_row(&mut self) -> Result<Option<Vec<EnumCellValue>>, XlsxStreamError> {
        self.fetch_row_py().map_err(|err| {
            let c_msg = err.to_string();
            *self.slot_err.borrow_mut() = Some(err);
            XlsxStreamError::InvalidInput(c_msg)
        })
    }
}

/// Dict rows converted one at a time as the sheet build pulls them.
struct PyDictRows<'py> {
    iter: Bound<'py, PyIterator>,
    map_first: Option<Vec<(String, EnumCellValue)>>,
    n_rows_left: Option<usize>,
    converter: PyValueConverter<'py>,
    slot_err: Rc<RefCell<Option<PyErr>>>,
}

impl PyDictRows<'_> {
    fn next_map_py(&mut self) -> PyResult<Option<Vec<(String, EnumCellValue)>>> {
        if let Some(map_first) = self.map_first.take() {
            return Ok(Some(map_first));
        }
        let Some(res_item) = self.iter.next() else {
            return Ok(None);
        };
        let item = res_item?;
        let dict_row = item.downcast::<PyDict>().map_err(|_| {
            PyValueError::new_err("All rows must be dicts when the first row is a dict.")
        })?;
        Ok(Some(self.converter.convert_dict(dict_row)?))
    }
}

impl Iterator for PyDictRows<'_> {
    type Item = Result<Vec<(String, EnumCellValue)>, XlsxStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_map_py() {
            Ok(Some(map)) => {
                self.n_rows_left = self.n_rows_left.map(|n| n.saturating_sub(1));
                Some(Ok(map))
            }
            Ok(None) => None,
            Err(err) => {
                let c_msg = err.to_string();
                *self.slot_err.borrow_mut() = Some(err);
                Some(Err(XlsxStreamError::InvalidInput(c_msg)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.n_rows_left {
            Some(n_rows) => (n_rows, Some(n_rows)),
            None => (0, None),
        }
    }
}

fn derive_row_source<'py>(
    py: Python<'py>,
    rows: &Bound<'py, PyAny>,
    columns: Option<Vec<String>>,
    slot_err: &Rc<RefCell<Option<PyErr>>>,
) -> PyResult<RowSource<'py>> {
    let c_type_name = rows.get_type().name()?.to_string();
    if rows.is_instance_of::<PyString>()
        || rows.is_instance_of::<PyBytes>()
        || rows.is_instance_of::<PyDict>()
    {
        return Ok(RowSource::unsupported(c_type_name));
    }
    let Ok(mut iter) = rows.try_iter() else {
        return Ok(RowSource::unsupported(c_type_name));
    };

    let converter = PyValueConverter::new(py)?;
    let item_first = iter.next().transpose()?;
    let n_rows = if rows.hasattr("__len__")? {
        Some(rows.len()?)
    } else {
        None
    };

    if let Some(item) = &item_first {
        if let Ok(dict_first) = item.downcast::<PyDict>() {
            let map_first = converter.convert_dict(dict_first)?;
            return Ok(RowSource::try_from_maps(PyDictRows {
                iter,
                map_first: Some(map_first),
                n_rows_left: n_rows,
                converter,
                slot_err: Rc::clone(slot_err),
            }));
        }
        if item.is_instance_of::<PyString>() || !item.hasattr("__iter__")? {
            return Ok(RowSource::unsupported(format!(
                "{c_type_name}[{}]",
                item.get_type().name()?
            )));
        }
    }

    let Some(l_fields) = columns else {
        if item_first.is_none() {
            return Ok(RowSource::from_maps(Vec::<Vec<(String, EnumCellValue)>>::new()));
        }
        return Err(PyValueError::new_err(
            "`columns` is required when rows are sequences.",
        ));
    };

    Ok(RowSource::from_cursor(PyRowCursor {
        iter,
        item_first,
        l_fields,
        n_rows,
        converter,
        slot_err: Rc::clone(slot_err),
    }))
}

struct PyValueConverter<'py> {
    cls_datetime: Bound<'py, PyAny>,
    cls_date: Bound<'py, PyAny>,
}

impl<'py> PyValueConverter<'py> {
    fn new(py: Python<'py>) -> PyResult<Self> {
        let module_datetime = py.import("datetime")?;
        Ok(Self {
            cls_datetime: module_datetime.getattr("datetime")?,
            cls_date: module_datetime.getattr("date")?,
        })
    }

    fn convert(&self, obj: &Bound<'py, PyAny>) -> PyResult<EnumCellValue> {
        if obj.is_none() {
            return Ok(EnumCellValue::None);
        }
        if obj.is_instance_of::<PyBool>() {
            return Ok(EnumCellValue::Boolean(obj.extract()?));
        }
        if obj.is_instance_of::<PyInt>() {
            return Ok(match obj.extract::<i64>() {
                Ok(n) => EnumCellValue::Integer(n),
                Err(_) => EnumCellValue::Float(obj.extract::<f64>()?),
            });
        }
        if obj.is_instance_of::<PyFloat>() {
            return Ok(EnumCellValue::Float(obj.extract()?));
        }
        if obj.is_instance_of::<PyString>() {
            return Ok(EnumCellValue::String(obj.extract()?));
        }
        // `datetime` subclasses `date`; check it first.
        if obj.is_instance(&self.cls_datetime)? {
            let date = derive_naive_date(obj)?;
            let dt = date
                .and_hms_micro_opt(
                    obj.getattr("hour")?.extract()?,
                    obj.getattr("minute")?.extract()?,
                    obj.getattr("second")?.extract()?,
                    obj.getattr("microsecond")?.extract()?,
                )
                .ok_or_else(|| PyValueError::new_err(format!("Invalid datetime: {obj}")))?;
            return Ok(EnumCellValue::DateTime(dt));
        }
        if obj.is_instance(&self.cls_date)? {
            return Ok(EnumCellValue::Date(derive_naive_date(obj)?));
        }

        let c_type_name = obj.get_type().name()?.to_string();
        if obj.is_instance_of::<PyBytes>() || obj.is_instance_of::<PyByteArray>() {
            return Ok(EnumCellValue::Opaque {
                type_name: c_type_name,
                text: None,
            });
        }
        Ok(EnumCellValue::Opaque {
            type_name: c_type_name,
            text: Some(obj.str()?.to_string()),
        })
    }

    fn convert_dict(&self, dict_row: &Bound<'py, PyDict>) -> PyResult<Vec<(String, EnumCellValue)>> {
        let mut l_pairs = Vec::with_capacity(dict_row.len());
        for (key, value) in dict_row.iter() {
            l_pairs.push((key.str()?.to_string(), self.convert(&value)?));
        }
        Ok(l_pairs)
    }
}

fn derive_naive_date(obj: &Bound<'_, PyAny>) -> PyResult<NaiveDate> {
    NaiveDate::from_ymd_opt(
        obj.getattr("year")?.extract()?,
        obj.getattr("month")?.extract()?,
        obj.getattr("day")?.extract()?,
    )
    .ok_or_else(|| PyValueError::new_err(format!("Invalid date: {obj}")))
}

fn is_polars_dataframe(py: Python<'_>, obj: &Bound<'_, PyAny>) -> PyResult<bool> {
    let Ok(module_polars) = py.import("polars") else {
        return Ok(false);
    };
    let cls_dataframe = module_polars.getattr("DataFrame")?;
    obj.is_instance(&cls_dataframe)
}

fn derive_ipc_bytes_from_dataframe(df: &Bound<'_, PyAny>) -> PyResult<Vec<u8>> {
    let obj_buffer = df.call_method1("write_ipc", (Option::<String>::None,))?;
    let v_bytes = obj_buffer
        .call_method0("getvalue")?
        .downcast_into::<PyBytes>()?;
    Ok(v_bytes.as_bytes().to_vec())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Options

fn parse_spec_value_policy(obj: Option<&Bound<'_, PyAny>>) -> PyResult<SpecXlsxValuePolicy> {
    let mut value_policy = SpecXlsxValuePolicy::default();
    let Some(obj) = obj else {
        return Ok(value_policy);
    };
    if obj.is_none() {
        return Ok(value_policy);
    }

    if let Some(v) = extract_optional_field::<String>(obj, "nan_str")? {
        value_policy.nan_str = v;
    }
    if let Some(v) = extract_optional_field::<String>(obj, "posinf_str")? {
        value_policy.posinf_str = v;
    }
    if let Some(v) = extract_optional_field::<String>(obj, "neginf_str")? {
        value_policy.neginf_str = v;
    }
    Ok(value_policy)
}

fn parse_column_decls(obj: Option<&Bound<'_, PyAny>>) -> PyResult<Vec<SpecColumnDecl>> {
    let Some(obj) = obj else {
        return Ok(Vec::new());
    };
    if obj.is_none() {
        return Ok(Vec::new());
    }

    let mut l_decls = Vec::new();
    for res_item in obj.try_iter()? {
        let item = res_item?;
        let key = extract_optional_field::<String>(&item, "key")?
            .ok_or_else(|| PyValueError::new_err("Column override requires `key`."))?;
        l_decls.push(SpecColumnDecl {
            key,
            name: extract_optional_field::<String>(&item, "name")?,
            width: extract_optional_field::<f64>(&item, "width")?,
            format: extract_optional_field::<String>(&item, "format")?,
            if_ignore: extract_optional_field::<bool>(&item, "if_ignore")?.unwrap_or(false),
        });
    }
    Ok(l_decls)
}

/// Read `field` from a dict key or an object attribute.
fn extract_optional_field<T>(obj: &Bound<'_, PyAny>, field: &str) -> PyResult<Option<T>>
where
    for<'a> T: FromPyObject<'a>,
{
    let val = if let Ok(dict_obj) = obj.downcast::<PyDict>() {
        match dict_obj.get_item(field)? {
            Some(val) => val,
            None => return Ok(None),
        }
    } else {
        if !obj.hasattr(field)? {
            return Ok(None);
        }
        obj.getattr(field)?
    };
    if val.is_none() {
        return Ok(None);
    }
    Ok(Some(val.extract::<T>()?))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

fn create_report_dict(py: Python<'_>, report: &SpecSheetReport) -> PyResult<Py<PyAny>> {
    let dict_report = PyDict::new(py);
    dict_report.set_item("sheet_name", &report.sheet_name)?;
    dict_report.set_item("sheet_path", &report.sheet_path)?;
    dict_report.set_item("shape_kind", report.shape_kind.as_str())?;
    dict_report.set_item("n_rows_data", report.n_rows_data)?;
    dict_report.set_item("n_cols", report.n_cols)?;
    dict_report.set_item("dimension", &report.dimension)?;
    dict_report.set_item("mode", report.mode.as_str())?;
    dict_report.set_item("warnings", PyList::new(py, &report.warnings)?)?;
    Ok(dict_report.into_any().unbind())
}

fn convert_stream_error(err: XlsxStreamError) -> PyErr {
    match err {
        XlsxStreamError::UnsupportedValueType { .. } => {
            UnsupportedValueTypeError::new_err(err.to_string())
        }
        XlsxStreamError::UnsupportedSourceShape(_) => {
            UnsupportedSourceShapeError::new_err(err.to_string())
        }
        XlsxStreamError::Cancelled => SheetBuildCancelledError::new_err(err.to_string()),
        XlsxStreamError::InvalidInput(_) => PyValueError::new_err(err.to_string()),
        _ => SheetkitXlsxError::new_err(err.to_string()),
    }
}

#[pymodule]
fn _sheetkit_io_xlsx_rs(py: Python<'_>, module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyXlsxStreamWriter>()?;
    module.add("SheetkitXlsxError", py.get_type::<SheetkitXlsxError>())?;
    module.add(
        "UnsupportedValueTypeError",
        py.get_type::<UnsupportedValueTypeError>(),
    )?;
    module.add(
        "UnsupportedSourceShapeError",
        py.get_type::<UnsupportedSourceShapeError>(),
    )?;
    module.add(
        "SheetBuildCancelledError",
        py.get_type::<SheetBuildCancelledError>(),
    )?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}
