use std::collections::BTreeMap;

use super::filter::resolve_field;
use super::types::{FilterOrderInfo, SortDirection};
use crate::config::QueryConfig;
use crate::schema::EntityDescriptor;

pub struct FilterOrder;

impl FilterOrder {
    /// Order clauses from either `sorter` or `orderBy`/`orderType`.
    ///
    /// Fields are allow-listed against the schema; if nothing valid remains
    /// the configured default sort applies.
    pub fn from_params(
        params: &BTreeMap<String, String>,
        entity: &EntityDescriptor,
        config: &QueryConfig,
        related: bool,
    ) -> Vec<FilterOrderInfo> {
        let requested = match params.get("sorter").filter(|s| !s.is_empty()) {
            // e.g. sorter=createdAt_desc,user.email_ascending
            Some(sorter) => sorter
                .split(',')
                .filter_map(|token| Self::parse_sorter_token(token, config))
                .collect::<Vec<_>>(),
            None => {
                let field = params
                    .get("orderBy")
                    .filter(|s| !s.is_empty())
                    .map(String::as_str)
                    .unwrap_or(config.default_sort.as_str());
                let sort = Self::direction(params.get("orderType").map(String::as_str), config);
                vec![(field.to_string(), sort)]
            }
        };

        let mut order: Vec<FilterOrderInfo> = requested
            .into_iter()
            .filter_map(|(path, sort)| match resolve_field(entity, &path, related) {
                Some((field, _)) => Some(FilterOrderInfo { field, sort }),
                None => {
                    tracing::debug!("Dropping unknown sort field '{}' on {}", path, entity.name);
                    None
                }
            })
            .collect();

        if order.is_empty() {
            if let Some((field, _)) = resolve_field(entity, &config.default_sort, false) {
                order.push(FilterOrderInfo { field, sort: config.default_order });
            }
        }
        order
    }

    /// `field_direction`; the direction is the text after the last underscore
    fn parse_sorter_token(token: &str, config: &QueryConfig) -> Option<(String, SortDirection)> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        match token.rsplit_once('_') {
            Some((field, dir)) => Some((field.to_string(), Self::direction(Some(dir), config))),
            None => Some((token.to_string(), config.default_order)),
        }
    }

    /// Map a direction token, falling back to the configured default
    pub fn direction(token: Option<&str>, config: &QueryConfig) -> SortDirection {
        token.and_then(SortDirection::parse).unwrap_or(config.default_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::employee;
    use crate::filter::FieldRef;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn order(pairs: &[(&str, &str)], related: bool) -> Vec<FilterOrderInfo> {
        FilterOrder::from_params(&params(pairs), employee::descriptor(), &QueryConfig::default(), related)
    }

    #[test]
    fn sorter_asc_and_numeric_one_are_identical() {
        let a = order(&[("sorter", "employeeName_asc")], false);
        let b = order(&[("sorter", "employeeName_1")], false);
        assert_eq!(a, b);
        assert_eq!(a[0].sort, SortDirection::Asc);
        assert_eq!(a[0].field, FieldRef::column("employeeName"));
    }

    #[test]
    fn every_direction_token_maps() {
        let config = QueryConfig::default();
        for token in ["asc", "ascending", "ascend", "1"] {
            assert_eq!(FilterOrder::direction(Some(token), &config), SortDirection::Asc, "{}", token);
        }
        for token in ["desc", "descending", "descend", "-1"] {
            assert_eq!(FilterOrder::direction(Some(token), &config), SortDirection::Desc, "{}", token);
        }
    }

    #[test]
    fn unrecognized_direction_uses_default() {
        let config = QueryConfig { default_order: SortDirection::Asc, ..QueryConfig::default() };
        assert_eq!(FilterOrder::direction(Some("sideways"), &config), SortDirection::Asc);
        // case-sensitive
        assert_eq!(FilterOrder::direction(Some("ASC"), &QueryConfig::default()), SortDirection::Desc);
        assert_eq!(FilterOrder::direction(None, &QueryConfig::default()), SortDirection::Desc);
    }

    #[test]
    fn sorter_supports_multiple_fields_and_related_paths() {
        let order = order(&[("sorter", "employeeCode_desc,user.email_ascending")], true);
        assert_eq!(order.len(), 2);
        assert_eq!(order[0].field, FieldRef::column("employeeCode"));
        assert_eq!(order[0].sort, SortDirection::Desc);
        assert_eq!(order[1].field, FieldRef::related("user", "email"));
        assert_eq!(order[1].sort, SortDirection::Asc);
    }

    #[test]
    fn related_sort_is_dropped_when_relations_are_not_included() {
        let order = order(&[("sorter", "user.email_asc")], false);
        assert_eq!(order, vec![FilterOrderInfo { field: FieldRef::column("createdAt"), sort: SortDirection::Desc }]);
    }

    #[test]
    fn order_by_and_order_type() {
        let order = order(&[("orderBy", "employeeName"), ("orderType", "asc")], false);
        assert_eq!(order, vec![FilterOrderInfo { field: FieldRef::column("employeeName"), sort: SortDirection::Asc }]);
    }

    #[test]
    fn unknown_sort_field_falls_back_to_default() {
        let order = order(&[("orderBy", "password; DROP TABLE employee"), ("orderType", "asc")], false);
        assert_eq!(order, vec![FilterOrderInfo { field: FieldRef::column("createdAt"), sort: SortDirection::Desc }]);
    }
}
