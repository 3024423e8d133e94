//! Column schema resolution: declared columns + caller overrides -> ordered [`SpecColumnInfo`].

use std::collections::{BTreeSet, HashMap};

use crate::conf::N_NCOLS_EXCEL_MAX;
use crate::spec::{SpecColumnDecl, SpecColumnInfo, XlsxStreamError};
use crate::style::StyleTable;
use crate::util::{derive_column_letters, validate_unique_columns};

/// Resolved columns plus non-fatal findings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecColumnResolution {
    pub columns: Vec<SpecColumnInfo>,
    pub warnings: Vec<String>,
}

/// Resolve the ordered column list of a sheet.
///
/// Column order follows `declared`. Ignored columns keep their slot.
/// Explicit formats are registered with `styles` here so every style id is
/// fixed before the first row is emitted.
pub fn resolve_columns(
    declared: &[SpecColumnDecl],
    overrides: &[SpecColumnDecl],
    styles: &mut dyn StyleTable,
) -> Result<SpecColumnResolution, XlsxStreamError> {
    if declared.len() > N_NCOLS_EXCEL_MAX {
        return Err(XlsxStreamError::InvalidInput(format!(
            "column count {} exceeds Excel limit {N_NCOLS_EXCEL_MAX}",
            declared.len()
        )));
    }

    let l_keys_declared: Vec<String> = declared
        .iter()
        .filter(|decl| !decl.key.is_empty())
        .map(|decl| decl.key.clone())
        .collect();
    validate_unique_columns(&l_keys_declared)?;

    let l_keys_override: Vec<String> = overrides.iter().map(|decl| decl.key.clone()).collect();
    validate_unique_columns(&l_keys_override)?;

    let dict_overrides: HashMap<&str, &SpecColumnDecl> = overrides
        .iter()
        .map(|decl| (decl.key.as_str(), decl))
        .collect();

    let mut resolution = SpecColumnResolution::default();
    for (n_idx, decl) in declared.iter().enumerate() {
        let n_order = n_idx + 1;
        let decl_override = dict_overrides.get(decl.key.as_str()).copied();

        let c_display_name = match decl_override.and_then(|ov| ov.name.clone()) {
            Some(c_name) => c_name,
            None => match (&decl.name, decl.key.is_empty()) {
                (Some(c_name), _) => c_name.clone(),
                (None, false) => decl.key.clone(),
                (None, true) => derive_column_letters(n_order)?,
            },
        };
        let explicit_format = decl_override
            .and_then(|ov| ov.format.clone())
            .or_else(|| decl.format.clone());
        if let Some(c_code) = &explicit_format {
            styles.register_format(c_code);
        }

        resolution.columns.push(SpecColumnInfo {
            key: decl.key.clone(),
            order_index: n_order,
            display_name: c_display_name,
            width: decl_override.and_then(|ov| ov.width).or(decl.width),
            explicit_format,
            if_ignored: decl.if_ignore || decl_override.is_some_and(|ov| ov.if_ignore),
        });
    }

    let set_keys: BTreeSet<&str> = declared.iter().map(|decl| decl.key.as_str()).collect();
    for decl in overrides {
        if !set_keys.contains(decl.key.as_str()) {
            resolution.warnings.push(format!(
                "column override {:?} matches no source column; ignored",
                decl.key
            ));
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::N_STYLE_ID_CUSTOM_BASE;
    use crate::spec::EnumValueKind;
    use crate::style::DefaultStyleTable;

    #[test]
    fn test_name_precedence_override_then_declared_then_letter() {
        let l_declared = vec![
            SpecColumnDecl::new("id").with_name("Identifier"),
            SpecColumnDecl::new("amount"),
            SpecColumnDecl::new(""),
        ];
        let l_overrides = vec![SpecColumnDecl::new("id").with_name("ID")];
        let mut styles = DefaultStyleTable::new();

        let resolution = resolve_columns(&l_declared, &l_overrides, &mut styles).unwrap();
        let l_names: Vec<&str> = resolution
            .columns
            .iter()
            .map(|col| col.display_name.as_str())
            .collect();
        assert_eq!(l_names, vec!["ID", "amount", "C"]);
        assert!(resolution.warnings.is_empty());
    }

    #[test]
    fn test_ignored_column_keeps_order_slot() {
        let l_declared = vec![
            SpecColumnDecl::new("a"),
            SpecColumnDecl::new("b"),
            SpecColumnDecl::new("c"),
        ];
        let l_overrides = vec![SpecColumnDecl::new("b").ignored()];
        let mut styles = DefaultStyleTable::new();

        let resolution = resolve_columns(&l_declared, &l_overrides, &mut styles).unwrap();
        assert_eq!(resolution.columns.len(), 3);
        assert!(resolution.columns[1].if_ignored);
        assert_eq!(resolution.columns[2].order_index, 3);
    }

    #[test]
    fn test_formats_are_registered_and_widths_merged() {
        let l_declared = vec![
            SpecColumnDecl::new("when").with_width(12.0),
            SpecColumnDecl::new("ratio").with_format("0.00%"),
        ];
        let l_overrides = vec![SpecColumnDecl::new("when")
            .with_format("yyyy-mm-dd")
            .with_width(20.0)];
        let mut styles = DefaultStyleTable::new();

        let resolution = resolve_columns(&l_declared, &l_overrides, &mut styles).unwrap();
        assert_eq!(resolution.columns[0].width, Some(20.0));
        assert_eq!(
            resolution.columns[0].explicit_format.as_deref(),
            Some("yyyy-mm-dd")
        );
        assert_eq!(
            styles.style_for(EnumValueKind::DateTime, Some("yyyy-mm-dd")).0,
            N_STYLE_ID_CUSTOM_BASE
        );
        assert_eq!(
            styles.style_for(EnumValueKind::Number, Some("0.00%")).0,
            N_STYLE_ID_CUSTOM_BASE + 1
        );
    }

    #[test]
    fn test_duplicate_keys_fail_and_unknown_overrides_warn() {
        let mut styles = DefaultStyleTable::new();
        let l_dup = vec![SpecColumnDecl::new("a"), SpecColumnDecl::new("a")];
        assert!(matches!(
            resolve_columns(&l_dup, &[], &mut styles),
            Err(XlsxStreamError::InvalidInput(_))
        ));

        let resolution = resolve_columns(
            &[SpecColumnDecl::new("a")],
            &[SpecColumnDecl::new("zzz").with_name("Z")],
            &mut styles,
        )
        .unwrap();
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("\"zzz\""));
    }
}
