use std::collections::BTreeMap;

use serde_json::Value;

use super::filter_order::FilterOrder;
use super::types::{FieldRef, Pagination, Predicate, QueryPlan};
use crate::config::QueryConfig;
use crate::schema::{EntityDescriptor, FieldDef, FieldKind};

/// Query parameters that steer paging, sorting and searching. They never
/// become field conditions even if a schema happens to share the name.
pub const RESERVED_PARAMS: &[&str] = &[
    "pageIndex",
    "page",
    "currentPage",
    "pageSize",
    "sorter",
    "orderBy",
    "orderType",
    "keyword",
    "skipInclude",
];

/// Compiles raw query-string parameters into a [`QueryPlan`], using the
/// entity's schema as an allow-list. Unknown fields are dropped silently.
pub struct Filter<'a> {
    entity: &'a EntityDescriptor,
    config: &'a QueryConfig,
}

impl<'a> Filter<'a> {
    pub fn new(entity: &'a EntityDescriptor, config: &'a QueryConfig) -> Self {
        Self { entity, config }
    }

    /// Build the plan for a list request.
    ///
    /// Relations are included (and searchable) only for `skipInclude=false`.
    pub fn compile(&self, params: &BTreeMap<String, String>) -> QueryPlan {
        let include = Self::include_requested(params, false);
        let related = include && self.config.related_search;

        let pagination = self.pagination(params, related);
        let (conditions, or_conditions) = self.conditions(params, related);

        let mut plan = QueryPlan::new().paginate(&pagination);
        plan.conditions = conditions;
        plan.or_conditions = or_conditions;
        if include {
            plan.include = self.entity.relations.clone();
        }

        if crate::is_development!() {
            tracing::debug!(
                "Compiled {} plan: {} conditions, {} keyword terms, {} order, limit {:?} offset {:?}",
                self.entity.name,
                plan.conditions.len(),
                plan.or_conditions.len(),
                plan.order.len(),
                plan.limit,
                plan.offset
            );
        }
        plan
    }

    /// Read `skipInclude`, falling back to the caller's default
    pub fn include_requested(params: &BTreeMap<String, String>, default: bool) -> bool {
        match params.get("skipInclude").map(String::as_str) {
            Some("true") => false,
            Some("false") => true,
            _ => default,
        }
    }

    pub fn pagination(&self, params: &BTreeMap<String, String>, related: bool) -> Pagination {
        let raw_index = ["pageIndex", "page", "currentPage"]
            .iter()
            .filter_map(|key| params.get(*key))
            .find(|v| !v.is_empty());

        let page_index = raw_index
            .and_then(|v| parse_integer(v))
            .filter(|n| *n >= 1)
            .unwrap_or(self.config.default_page_index);

        let page_size = match params.get("pageSize").and_then(|v| parse_integer(v)) {
            Some(n) if n > self.config.max_page_size => {
                tracing::debug!("Page size {} exceeds max {}, clamping", n, self.config.max_page_size);
                self.config.max_page_size
            }
            Some(n) if n >= 1 => n,
            _ => self.config.default_page_size,
        };

        let (page_index, offset) = match page_size.checked_mul(page_index - 1) {
            Some(offset) => (page_index, offset),
            None => {
                tracing::debug!("Page index {} overflows the offset, using default", page_index);
                let index = self.config.default_page_index;
                (index, page_size.saturating_mul(index - 1))
            }
        };

        Pagination {
            page_index,
            page_size,
            limit: page_size,
            offset,
            order: FilterOrder::from_params(params, self.entity, self.config, related),
        }
    }

    /// Field conditions (AND) and keyword conditions (OR)
    pub fn conditions(
        &self,
        params: &BTreeMap<String, String>,
        related: bool,
    ) -> (Vec<Predicate>, Vec<Predicate>) {
        let mut or_conditions = Vec::new();
        if let Some(keyword) = params.get("keyword").filter(|k| !k.is_empty()) {
            or_conditions = self.keyword_conditions(keyword, related);
        }

        let mut conditions = Vec::new();
        for (key, raw) in params {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                continue;
            }
            match resolve_field(self.entity, key, related) {
                Some((field, def)) => conditions.push(field_condition(field, def, raw)),
                None => tracing::debug!("Ignoring unknown filter '{}' on {}", key, self.entity.name),
            }
        }

        (conditions, or_conditions)
    }

    fn keyword_conditions(&self, keyword: &str, related: bool) -> Vec<Predicate> {
        let mut out: Vec<Predicate> = self
            .entity
            .schema
            .searchable_fields()
            .map(|f| Predicate::Contains(FieldRef::column(f.name), keyword.to_string()))
            .collect();

        if related {
            for relation in &self.entity.relations {
                let target = relation.target();
                out.extend(target.schema.searchable_fields().map(|f| {
                    Predicate::Contains(FieldRef::related(relation.alias, f.name), keyword.to_string())
                }));
            }
        }
        out
    }
}

/// Resolve a parameter name to a primary column, or to `alias.field` on a
/// declared relation when related filtering is enabled.
pub(crate) fn resolve_field<'e>(
    entity: &'e EntityDescriptor,
    path: &str,
    related: bool,
) -> Option<(FieldRef, &'e FieldDef)> {
    if let Some(def) = entity.schema.field(path) {
        return Some((FieldRef::column(def.name), def));
    }
    if !related {
        return None;
    }
    let (alias, field) = path.split_once('.')?;
    let relation = entity.relation(alias)?;
    let def = relation.target().schema.field(field)?;
    Some((FieldRef::related(relation.alias, def.name), def))
}

/// Type-directed condition for one raw parameter value
fn field_condition(field: FieldRef, def: &FieldDef, raw: &str) -> Predicate {
    match def.kind {
        FieldKind::String => {
            if def.prefers_substring_match() {
                Predicate::Contains(field, raw.to_string())
            } else {
                Predicate::Eq(field, Value::String(raw.to_string()))
            }
        }
        FieldKind::Text => Predicate::Contains(field, raw.to_string()),
        FieldKind::Boolean => Predicate::Eq(field, Value::Bool(raw == "true" || raw == "1")),
        FieldKind::Numeric | FieldKind::Date | FieldKind::Reference | FieldKind::Json => {
            Predicate::Eq(field, Value::String(raw.to_string()))
        }
    }
}

/// Numeric-looking input truncated to an integer ("2.5" -> 2); `None` otherwise
fn parse_integer(raw: &str) -> Option<i64> {
    let n = raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())?;
    Some(n.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{employee, user};
    use crate::filter::SortDirection;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn compile(entity: &EntityDescriptor, pairs: &[(&str, &str)]) -> QueryPlan {
        Filter::new(entity, &QueryConfig::default()).compile(&params(pairs))
    }

    #[test]
    fn defaults_apply_without_parameters() {
        let plan = compile(employee::descriptor(), &[]);
        assert_eq!(plan.limit, Some(30));
        assert_eq!(plan.offset, Some(0));
        assert_eq!(plan.order.len(), 1);
        assert_eq!(plan.order[0].field, FieldRef::column("createdAt"));
        assert_eq!(plan.order[0].sort, SortDirection::Desc);
        assert!(plan.conditions.is_empty());
        assert!(plan.or_conditions.is_empty());
        assert!(plan.include.is_empty());
    }

    #[test]
    fn offset_follows_page_index() {
        let config = QueryConfig::default();
        let filter = Filter::new(employee::descriptor(), &config);
        for (index, size) in [(1, 10), (2, 10), (7, 3), (3, 400)] {
            let p = filter.pagination(
                &params(&[("pageIndex", &index.to_string()), ("pageSize", &size.to_string())]),
                false,
            );
            assert_eq!(p.limit, size);
            assert_eq!(p.offset, size * (index - 1));
        }
    }

    #[test]
    fn page_aliases_are_checked_in_order() {
        let config = QueryConfig::default();
        let filter = Filter::new(employee::descriptor(), &config);
        let p = filter.pagination(&params(&[("page", "3"), ("currentPage", "5")]), false);
        assert_eq!(p.page_index, 3);
        let p = filter.pagination(&params(&[("pageIndex", ""), ("currentPage", "5")]), false);
        assert_eq!(p.page_index, 5);
    }

    #[test]
    fn non_numeric_page_values_fall_back() {
        let config = QueryConfig::default();
        let filter = Filter::new(employee::descriptor(), &config);
        let p = filter.pagination(&params(&[("pageIndex", "abc"), ("pageSize", "lots")]), false);
        assert_eq!(p.page_index, 1);
        assert_eq!(p.page_size, 30);
        let p = filter.pagination(&params(&[("pageIndex", "0"), ("pageSize", "-4")]), false);
        assert_eq!(p.page_index, 1);
        assert_eq!(p.page_size, 30);
        let p = filter.pagination(&params(&[("pageIndex", "2.7")]), false);
        assert_eq!(p.page_index, 2);
    }

    #[test]
    fn overflowing_page_index_falls_back() {
        let config = QueryConfig::default();
        let filter = Filter::new(employee::descriptor(), &config);
        let p = filter.pagination(&params(&[("pageIndex", "99999999999999999999"), ("pageSize", "30")]), false);
        assert_eq!(p.page_index, 1);
        assert_eq!(p.offset, 0);
        assert_eq!(p.limit, 30);
    }

    #[test]
    fn page_size_is_clamped_to_max() {
        let config = QueryConfig { max_page_size: 50, ..QueryConfig::default() };
        let filter = Filter::new(employee::descriptor(), &config);
        let p = filter.pagination(&params(&[("pageSize", "5000")]), false);
        assert_eq!(p.page_size, 50);
        assert_eq!(p.limit, 50);
    }

    #[test]
    fn name_like_strings_use_substring_match() {
        let plan = compile(employee::descriptor(), &[("employeeName", "Lim")]);
        assert_eq!(plan.conditions, vec![Predicate::contains("employeeName", "Lim")]);
    }

    #[test]
    fn short_strings_and_references_use_exact_match() {
        let plan = compile(user::descriptor(), &[("employeeId", "abc")]);
        assert_eq!(plan.conditions, vec![Predicate::eq("employeeId", "abc")]);
    }

    #[test]
    fn long_strings_use_substring_match() {
        // email is string(128)
        let plan = compile(user::descriptor(), &[("email", "example.com")]);
        assert_eq!(plan.conditions, vec![Predicate::contains("email", "example.com")]);
    }

    #[test]
    fn boolean_coercion() {
        for (raw, expected) in [("true", true), ("1", true), ("false", false), ("yes", false), ("0", false)] {
            let plan = compile(user::descriptor(), &[("isActive", raw)]);
            assert_eq!(plan.conditions, vec![Predicate::eq("isActive", expected)], "{}", raw);
        }
    }

    #[test]
    fn dates_pass_through_as_exact_strings() {
        let plan = compile(user::descriptor(), &[("lastLoginDate", "2020-03-08")]);
        assert_eq!(plan.conditions, vec![Predicate::eq("lastLoginDate", "2020-03-08")]);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let plan = compile(employee::descriptor(), &[("password", "x"), ("1=1; --", "y")]);
        assert!(plan.conditions.is_empty());
    }

    #[test]
    fn reserved_parameters_never_become_conditions() {
        let plan = compile(employee::descriptor(), &[("pageSize", "5"), ("orderBy", "employeeName"), ("skipInclude", "true")]);
        assert!(plan.conditions.is_empty());
    }

    #[test]
    fn keyword_searches_every_textual_primary_field() {
        let plan = compile(employee::descriptor(), &[("keyword", "foo")]);
        assert_eq!(
            plan.or_conditions,
            vec![Predicate::contains("employeeCode", "foo"), Predicate::contains("employeeName", "foo")]
        );
    }

    #[test]
    fn keyword_reaches_relations_only_when_included() {
        let plan = compile(employee::descriptor(), &[("keyword", "foo"), ("skipInclude", "false")]);
        assert!(plan.or_conditions.contains(&Predicate::Contains(FieldRef::related("user", "email"), "foo".into())));
        assert!(plan.or_conditions.contains(&Predicate::Contains(FieldRef::related("user", "profilePicture"), "foo".into())));
        assert!(!plan
            .or_conditions
            .iter()
            .any(|p| matches!(p, Predicate::Contains(FieldRef::Related { field, .. }, _) if field == "id")));
        assert_eq!(plan.include.len(), 1);
    }

    #[test]
    fn related_filters_route_to_relation_schema() {
        let plan = compile(user::descriptor(), &[("employee.employeeName", "Lim"), ("skipInclude", "false")]);
        assert_eq!(
            plan.conditions,
            vec![Predicate::Contains(FieldRef::related("employee", "employeeName"), "Lim".into())]
        );

        let plan = compile(user::descriptor(), &[("employee.employeeName", "Lim")]);
        assert!(plan.conditions.is_empty());

        let plan = compile(user::descriptor(), &[("employee.salary", "1"), ("skipInclude", "false")]);
        assert!(plan.conditions.is_empty());
    }

    #[test]
    fn related_search_can_be_disabled_by_config() {
        let config = QueryConfig { related_search: false, ..QueryConfig::default() };
        let plan = Filter::new(user::descriptor(), &config)
            .compile(&params(&[("employee.employeeName", "Lim"), ("skipInclude", "false")]));
        assert!(plan.conditions.is_empty());
        assert_eq!(plan.include.len(), 1);
    }

    #[test]
    fn e2e_example_plan() {
        let plan = compile(
            employee::descriptor(),
            &[("pageSize", "5"), ("orderBy", "employeeName"), ("orderType", "asc"), ("employeeName", "Lim")],
        );
        assert_eq!(plan.limit, Some(5));
        assert_eq!(plan.offset, Some(0));
        assert_eq!(plan.order[0].field, FieldRef::column("employeeName"));
        assert_eq!(plan.order[0].sort, SortDirection::Asc);
        assert_eq!(plan.conditions, vec![Predicate::contains("employeeName", "Lim")]);
    }
}
