//! Cell value codec: runtime value -> style id, type code and `<x:v>` text,
//! plus the markup of a single positioned cell.

use crate::spec::{
    EnumCellTypeCode, EnumCellValue, EnumValueKind, SpecCellEncoding, SpecCellRecord,
    SpecColumnInfo, SpecXlsxStreamOptions, XlsxStreamError,
};
use crate::style::StyleTable;
use crate::util::{
    convert_nan_inf_to_str, derive_cell_ref, derive_excel_serial_from_date,
    derive_excel_serial_from_datetime, escape_xml_text, format_excel_number,
    needs_space_preserve,
};

/// Encode one body value.
///
/// Returns `Ok(None)` for an absent value when null cells are not emitted,
/// so the cell is left out of the row.
pub fn encode_cell(
    value: &EnumCellValue,
    column: Option<&SpecColumnInfo>,
    styles: &dyn StyleTable,
    options: &SpecXlsxStreamOptions,
) -> Result<Option<SpecCellEncoding>, XlsxStreamError> {
    let c_format = column.and_then(|col| col.explicit_format.as_deref());
    let (kind, c_text) = match value {
        EnumCellValue::None => {
            if !options.if_emit_null_cells {
                return Ok(None);
            }
            let (n_style, _) = styles.style_for(EnumValueKind::Null, c_format);
            return Ok(Some(SpecCellEncoding {
                style_id: n_style,
                type_code: None,
                text: String::new(),
                if_empty: true,
            }));
        }
        EnumCellValue::Integer(n) => (EnumValueKind::Number, n.to_string()),
        EnumCellValue::Float(x) => match convert_nan_inf_to_str(*x, &options.value_policy) {
            Some(c_policy) => (EnumValueKind::Text, escape_xml_text(&c_policy)),
            None => (EnumValueKind::Number, format_excel_number(*x)),
        },
        EnumCellValue::Boolean(b) => (EnumValueKind::Boolean, if *b { "1" } else { "0" }.to_string()),
        EnumCellValue::Date(date) => (
            EnumValueKind::DateTime,
            format_excel_number(derive_excel_serial_from_date(date)),
        ),
        EnumCellValue::DateTime(dt) => (
            EnumValueKind::DateTime,
            format_excel_number(derive_excel_serial_from_datetime(dt)),
        ),
        EnumCellValue::String(c_value) => (EnumValueKind::Text, escape_xml_text(c_value)),
        EnumCellValue::Escaped(c_value) => (EnumValueKind::Text, c_value.clone()),
        EnumCellValue::Opaque { type_name, text } => match text {
            Some(c_value) => (EnumValueKind::Text, escape_xml_text(c_value)),
            None => {
                return Err(XlsxStreamError::UnsupportedValueType {
                    type_name: type_name.clone(),
                });
            }
        },
    };

    let (n_style, type_code) = styles.style_for(kind, c_format);
    Ok(Some(SpecCellEncoding {
        style_id: n_style,
        type_code,
        text: c_text,
        if_empty: false,
    }))
}

/// Encode a header cell for `display_name`.
pub fn encode_header(display_name: &str, styles: &dyn StyleTable) -> SpecCellEncoding {
    let (n_style, type_code) = styles.style_for(EnumValueKind::Header, None);
    SpecCellEncoding {
        style_id: n_style,
        type_code,
        text: escape_xml_text(display_name),
        if_empty: false,
    }
}

/// Render `<x:c …>` for a positioned cell.
pub fn render_cell_xml(record: &SpecCellRecord) -> Result<String, XlsxStreamError> {
    let c_ref = derive_cell_ref(record.row, record.col)?;
    let encoding = &record.encoding;
    if encoding.if_empty {
        return Ok(format!("<x:c r=\"{c_ref}\" s=\"{}\"></x:c>", encoding.style_id));
    }

    let c_type = encoding
        .type_code
        .map(|code| format!(" t=\"{}\"", code.as_str()))
        .unwrap_or_default();
    let c_space = if encoding.type_code == Some(EnumCellTypeCode::Str)
        && needs_space_preserve(&encoding.text)
    {
        " xml:space=\"preserve\""
    } else {
        ""
    };
    Ok(format!(
        "<x:c r=\"{c_ref}\"{c_type} s=\"{}\"{c_space}><x:v>{}</x:v></x:c>",
        encoding.style_id, encoding.text
    ))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::conf::{N_STYLE_ID_DATE, N_STYLE_ID_GENERAL, N_STYLE_ID_HEADER};
    use crate::style::DefaultStyleTable;

    fn encode(value: EnumCellValue) -> Result<Option<SpecCellEncoding>, XlsxStreamError> {
        encode_cell(
            &value,
            None,
            &DefaultStyleTable::new(),
            &SpecXlsxStreamOptions::default(),
        )
    }

    fn render(row: usize, col: usize, encoding: SpecCellEncoding) -> String {
        render_cell_xml(&SpecCellRecord { row, col, encoding }).unwrap()
    }

    #[test]
    fn test_null_is_omitted_unless_enabled() {
        assert_eq!(encode(EnumCellValue::None).unwrap(), None);

        let options = SpecXlsxStreamOptions {
            if_emit_null_cells: true,
            ..Default::default()
        };
        let encoding = encode_cell(&EnumCellValue::None, None, &DefaultStyleTable::new(), &options)
            .unwrap()
            .unwrap();
        assert!(encoding.if_empty);
        assert_eq!(render(2, 2, encoding), "<x:c r=\"B2\" s=\"2\"></x:c>");
    }

    #[test]
    fn test_numbers_and_booleans() {
        let encoding = encode(EnumCellValue::Integer(-42)).unwrap().unwrap();
        assert_eq!(encoding.type_code, None);
        assert_eq!(encoding.text, "-42");
        assert_eq!(render(3, 1, encoding), "<x:c r=\"A3\" s=\"2\"><x:v>-42</x:v></x:c>");

        let encoding = encode(EnumCellValue::Boolean(true)).unwrap().unwrap();
        assert_eq!(render(1, 4, encoding), "<x:c r=\"D1\" t=\"b\" s=\"2\"><x:v>1</x:v></x:c>");
        assert_eq!(encode(EnumCellValue::Boolean(false)).unwrap().unwrap().text, "0");
    }

    #[test]
    fn test_non_finite_floats_follow_policy() {
        let encoding = encode(EnumCellValue::Float(f64::NAN)).unwrap().unwrap();
        assert_eq!(encoding.type_code, Some(EnumCellTypeCode::Str));
        assert_eq!(encoding.text, "NaN");
        assert_eq!(encode(EnumCellValue::Float(f64::NEG_INFINITY)).unwrap().unwrap().text, "-Inf");
    }

    #[test]
    fn test_dates_use_serial_and_date_style() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let encoding = encode(EnumCellValue::Date(date)).unwrap().unwrap();
        assert_eq!(encoding.style_id, N_STYLE_ID_DATE);
        assert_eq!(encoding.text, "45292");

        let dt = date.and_hms_opt(6, 0, 0).unwrap();
        assert_eq!(encode(EnumCellValue::DateTime(dt)).unwrap().unwrap().text, "45292.25");
    }

    #[test]
    fn test_strings_escape_and_preserve_edge_spaces() {
        let encoding = encode(EnumCellValue::from(" a<b ")).unwrap().unwrap();
        assert_eq!(
            render(2, 1, encoding),
            "<x:c r=\"A2\" t=\"str\" s=\"2\" xml:space=\"preserve\"><x:v> a&lt;b </x:v></x:c>"
        );

        let encoding = encode(EnumCellValue::from("a b")).unwrap().unwrap();
        assert_eq!(
            render(2, 1, encoding),
            "<x:c r=\"A2\" t=\"str\" s=\"2\"><x:v>a b</x:v></x:c>"
        );
    }

    #[test]
    fn test_escaped_text_is_verbatim() {
        let encoding = encode(EnumCellValue::Escaped("a&amp;b".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(encoding.text, "a&amp;b");
    }

    #[test]
    fn test_opaque_value_uses_fallback_or_fails() {
        let encoding = encode(EnumCellValue::Opaque {
            type_name: "Uuid".to_string(),
            text: Some("0f0e".to_string()),
        })
        .unwrap()
        .unwrap();
        assert_eq!(encoding.text, "0f0e");

        let err = encode(EnumCellValue::Opaque {
            type_name: "Blob".to_string(),
            text: None,
        })
        .unwrap_err();
        assert!(matches!(err, XlsxStreamError::UnsupportedValueType { ref type_name } if type_name == "Blob"));
        assert!(err.to_string().contains("Blob"));
    }

    #[test]
    fn test_header_cell() {
        let encoding = encode_header("Amount & Fee", &DefaultStyleTable::new());
        assert_eq!(encoding.style_id, N_STYLE_ID_HEADER);
        assert_eq!(
            render(1, 2, encoding),
            "<x:c r=\"B1\" t=\"str\" s=\"1\"><x:v>Amount &amp; Fee</x:v></x:c>"
        );
    }

    #[test]
    fn test_column_format_selects_custom_style() {
        let mut styles = DefaultStyleTable::new();
        let n_style = crate::style::StyleTable::register_format(&mut styles, "0.000");
        let column = SpecColumnInfo {
            key: "x".to_string(),
            order_index: 1,
            display_name: "x".to_string(),
            width: None,
            explicit_format: Some("0.000".to_string()),
            if_ignored: false,
        };
        let encoding = encode_cell(
            &EnumCellValue::Float(1.5),
            Some(&column),
            &styles,
            &SpecXlsxStreamOptions::default(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(encoding.style_id, n_style);
        assert_ne!(encoding.style_id, N_STYLE_ID_GENERAL);
    }

    proptest! {
        #[test]
        fn prop_finite_floats_round_trip(x in any::<f64>().prop_filter("finite", |x| x.is_finite())) {
            let encoding = encode(EnumCellValue::Float(x)).unwrap().unwrap();
            prop_assert!(!encoding.text.contains(','));
            prop_assert_eq!(encoding.text.parse::<f64>().unwrap(), x);
        }

        #[test]
        fn prop_integers_round_trip(n in any::<i64>()) {
            let encoding = encode(EnumCellValue::Integer(n)).unwrap().unwrap();
            prop_assert_eq!(encoding.text.parse::<i64>().unwrap(), n);
        }
    }
}
