use crate::error::{CoreError, CoreResult};
use crate::types::{Category, RfaType};

/// Validate an RFA submission's category against the site's category list.
/// Inactive codes are rejected the same way as unknown ones.
pub fn validate(categories: &[Category], code: &str, rfa_type: RfaType) -> CoreResult<()> {
    let category = categories
        .iter()
        .find(|c| c.category_code == code && c.active)
        .ok_or_else(|| CoreError::NotFound(format!("category {}", code)))?;

    if !category.rfa_types.contains(&rfa_type) {
        return Err(CoreError::Validation(format!(
            "category {} does not accept {} documents",
            code,
            rfa_type.as_str()
        )));
    }
    Ok(())
}

/// Categories in display order, inactive ones filtered out.
pub fn display_order(mut categories: Vec<Category>) -> Vec<Category> {
    categories.retain(|c| c.active);
    categories.sort_by_key(|c| c.sequence);
    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(code: &str, rfa_types: Vec<RfaType>, sequence: i32, active: bool) -> Category {
        Category {
            site_id: "site-1".to_string(),
            category_code: code.to_string(),
            category_name: code.to_string(),
            rfa_types,
            sequence,
            active,
        }
    }

    #[test]
    fn known_active_category_with_matching_type_passes() {
        let cats = vec![category("STR", vec![RfaType::Shop, RfaType::Gen], 1, true)];
        assert!(validate(&cats, "STR", RfaType::Shop).is_ok());
    }

    #[test]
    fn unknown_and_inactive_codes_reject() {
        let cats = vec![category("STR", vec![RfaType::Shop], 1, false)];
        assert!(matches!(validate(&cats, "STR", RfaType::Shop), Err(CoreError::NotFound(_))));
        assert!(matches!(validate(&cats, "ARC", RfaType::Shop), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn type_mismatch_rejects() {
        let cats = vec![category("STR", vec![RfaType::Shop], 1, true)];
        assert!(matches!(
            validate(&cats, "STR", RfaType::Mat),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn display_order_sorts_and_filters() {
        let cats = vec![
            category("B", vec![RfaType::Shop], 2, true),
            category("A", vec![RfaType::Shop], 1, true),
            category("C", vec![RfaType::Shop], 0, false),
        ];
        let ordered = display_order(cats);
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].category_code, "A");
        assert_eq!(ordered[1].category_code, "B");
    }
}
