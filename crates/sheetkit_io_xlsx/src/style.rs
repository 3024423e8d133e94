//! Document-level style table: value kind + explicit format -> `cellXfs` index.

use std::collections::HashMap;

use crate::conf::{
    C_NS_SPREADSHEETML, N_NUMFMT_ID_CUSTOM_BASE, N_NUMFMT_ID_DATE, N_STYLE_ID_CUSTOM_BASE,
    N_STYLE_ID_DATE, N_STYLE_ID_GENERAL, N_STYLE_ID_HEADER,
};
use crate::spec::{EnumCellTypeCode, EnumValueKind};

/// Style lookup used by the cell codec.
///
/// `style_for` must be idempotent: equal inputs map to the same style id for
/// the whole document.
pub trait StyleTable {
    /// Style id and type discriminator for a value kind and optional format code.
    fn style_for(
        &self,
        kind: EnumValueKind,
        explicit_format: Option<&str>,
    ) -> (u32, Option<EnumCellTypeCode>);

    /// Intern a number format code and return its style id.
    fn register_format(&mut self, format_code: &str) -> u32;
}

/// Built-in style sheet plus interned custom number formats.
#[derive(Debug, Clone, Default)]
pub struct DefaultStyleTable {
    l_formats: Vec<String>,
    dict_style_ids: HashMap<String, u32>,
}

impl DefaultStyleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interned format codes in registration order.
    pub fn formats(&self) -> &[String] {
        &self.l_formats
    }

    /// Render `xl/styles.xml`.
    pub fn render_styles_xml(&self) -> String {
        let mut c_xml = String::with_capacity(2048);
        c_xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        c_xml.push_str(&format!("<x:styleSheet xmlns:x=\"{C_NS_SPREADSHEETML}\">"));

        if !self.l_formats.is_empty() {
            c_xml.push_str(&format!("<x:numFmts count=\"{}\">", self.l_formats.len()));
            for (n_idx, c_code) in self.l_formats.iter().enumerate() {
                c_xml.push_str(&format!(
                    "<x:numFmt numFmtId=\"{}\" formatCode=\"{}\"/>",
                    derive_numfmt_id(n_idx),
                    quick_xml::escape::escape(c_code.as_str())
                ));
            }
            c_xml.push_str("</x:numFmts>");
        }

        c_xml.push_str(concat!(
            "<x:fonts count=\"2\">",
            "<x:font><x:sz val=\"11\"/><x:color rgb=\"FF000000\"/><x:name val=\"Calibri\"/><x:family val=\"2\"/></x:font>",
            "<x:font><x:b/><x:sz val=\"11\"/><x:color rgb=\"FF000000\"/><x:name val=\"Calibri\"/><x:family val=\"2\"/></x:font>",
            "</x:fonts>",
            "<x:fills count=\"3\">",
            "<x:fill><x:patternFill patternType=\"none\"/></x:fill>",
            "<x:fill><x:patternFill patternType=\"gray125\"/></x:fill>",
            "<x:fill><x:patternFill patternType=\"solid\"><x:fgColor rgb=\"FFD9E1F2\"/></x:patternFill></x:fill>",
            "</x:fills>",
            "<x:borders count=\"2\">",
            "<x:border><x:left/><x:right/><x:top/><x:bottom/><x:diagonal/></x:border>",
            "<x:border>",
            "<x:left style=\"thin\"><x:color rgb=\"FF000000\"/></x:left>",
            "<x:right style=\"thin\"><x:color rgb=\"FF000000\"/></x:right>",
            "<x:top style=\"thin\"><x:color rgb=\"FF000000\"/></x:top>",
            "<x:bottom style=\"thin\"><x:color rgb=\"FF000000\"/></x:bottom>",
            "<x:diagonal/>",
            "</x:border>",
            "</x:borders>",
            "<x:cellStyleXfs count=\"1\"><x:xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/></x:cellStyleXfs>",
        ));

        let n_xfs = N_STYLE_ID_CUSTOM_BASE as usize + self.l_formats.len();
        c_xml.push_str(&format!("<x:cellXfs count=\"{n_xfs}\">"));
        c_xml.push_str(concat!(
            "<x:xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\" xfId=\"0\"/>",
            "<x:xf numFmtId=\"0\" fontId=\"1\" fillId=\"2\" borderId=\"1\" xfId=\"0\" applyFill=\"1\" applyBorder=\"1\"/>",
            "<x:xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyBorder=\"1\"/>",
        ));
        c_xml.push_str(&format!(
            "<x:xf numFmtId=\"{N_NUMFMT_ID_DATE}\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\"/>"
        ));
        c_xml.push_str(
            "<x:xf numFmtId=\"49\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\"/>",
        );
        for n_idx in 0..self.l_formats.len() {
            c_xml.push_str(&format!(
                "<x:xf numFmtId=\"{}\" fontId=\"0\" fillId=\"0\" borderId=\"1\" xfId=\"0\" applyNumberFormat=\"1\" applyBorder=\"1\"/>",
                derive_numfmt_id(n_idx)
            ));
        }
        c_xml.push_str("</x:cellXfs>");

        c_xml.push_str("<x:cellStyles count=\"1\"><x:cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/></x:cellStyles>");
        c_xml.push_str("</x:styleSheet>");
        c_xml
    }
}

impl StyleTable for DefaultStyleTable {
    fn style_for(
        &self,
        kind: EnumValueKind,
        explicit_format: Option<&str>,
    ) -> (u32, Option<EnumCellTypeCode>) {
        let n_style_fmt = explicit_format.and_then(|c_code| self.dict_style_ids.get(c_code).copied());
        match kind {
            EnumValueKind::Header => (N_STYLE_ID_HEADER, Some(EnumCellTypeCode::Str)),
            EnumValueKind::Null => (n_style_fmt.unwrap_or(N_STYLE_ID_GENERAL), None),
            EnumValueKind::Text => (
                n_style_fmt.unwrap_or(N_STYLE_ID_GENERAL),
                Some(EnumCellTypeCode::Str),
            ),
            EnumValueKind::Number => (n_style_fmt.unwrap_or(N_STYLE_ID_GENERAL), None),
            EnumValueKind::Boolean => (
                n_style_fmt.unwrap_or(N_STYLE_ID_GENERAL),
                Some(EnumCellTypeCode::Boolean),
            ),
            EnumValueKind::DateTime => (n_style_fmt.unwrap_or(N_STYLE_ID_DATE), None),
        }
    }

    fn register_format(&mut self, format_code: &str) -> u32 {
        if let Some(n_style) = self.dict_style_ids.get(format_code) {
            return *n_style;
        }
        let n_style = N_STYLE_ID_CUSTOM_BASE + self.l_formats.len() as u32;
        self.l_formats.push(format_code.to_string());
        self.dict_style_ids.insert(format_code.to_string(), n_style);
        n_style
    }
}

fn derive_numfmt_id(idx_format: usize) -> u32 {
    N_NUMFMT_ID_CUSTOM_BASE + 1 + idx_format as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_style_for_builtin_kinds() {
        let styles = DefaultStyleTable::new();
        assert_eq!(
            styles.style_for(EnumValueKind::Header, None),
            (N_STYLE_ID_HEADER, Some(EnumCellTypeCode::Str))
        );
        assert_eq!(
            styles.style_for(EnumValueKind::Number, None),
            (N_STYLE_ID_GENERAL, None)
        );
        assert_eq!(
            styles.style_for(EnumValueKind::Boolean, None),
            (N_STYLE_ID_GENERAL, Some(EnumCellTypeCode::Boolean))
        );
        assert_eq!(
            styles.style_for(EnumValueKind::DateTime, None),
            (N_STYLE_ID_DATE, None)
        );
    }

    #[test]
    fn test_register_format_is_interned() {
        let mut styles = DefaultStyleTable::new();
        let n_first = styles.register_format("0.00%");
        let n_second = styles.register_format("yyyy-mm-dd");
        assert_eq!(n_first, N_STYLE_ID_CUSTOM_BASE);
        assert_eq!(n_second, N_STYLE_ID_CUSTOM_BASE + 1);
        assert_eq!(styles.register_format("0.00%"), n_first);
        assert_eq!(styles.formats().len(), 2);

        assert_eq!(
            styles.style_for(EnumValueKind::DateTime, Some("yyyy-mm-dd")),
            (n_second, None)
        );
        // Unregistered codes fall back to the kind default.
        assert_eq!(
            styles.style_for(EnumValueKind::Number, Some("#,##0")),
            (N_STYLE_ID_GENERAL, None)
        );
    }

    #[test]
    fn test_render_styles_xml_lists_custom_formats() {
        let mut styles = DefaultStyleTable::new();
        styles.register_format("0.0\"x\"");
        let c_xml = styles.render_styles_xml();

        assert!(c_xml.contains("<x:numFmts count=\"1\">"));
        assert!(c_xml.contains("<x:numFmt numFmtId=\"167\" formatCode=\"0.0&quot;x&quot;\"/>"));
        assert!(c_xml.contains("<x:cellXfs count=\"6\">"));
        assert!(c_xml.ends_with("</x:styleSheet>"));
    }
}
