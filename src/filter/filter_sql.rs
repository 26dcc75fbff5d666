use super::error::FilterError;
use super::filter_where::{qualified, quote_ident, FilterWhere, Scope};
use super::types::{Predicate, QueryPlan, SqlResult};
use crate::schema::EntityDescriptor;

/// Statement builder for one entity's table.
///
/// Row-returning statements wrap the inner select in `row_to_json` so the
/// storage layer reads every entity the same way.
pub struct FilterSql<'a> {
    entity: &'a EntityDescriptor,
    table_ref: String,
}

impl<'a> FilterSql<'a> {
    pub fn new(entity: &'a EntityDescriptor) -> Result<Self, FilterError> {
        let table_ref = quote_ident(entity.table)
            .map_err(|_| FilterError::InvalidTableName(format!("Invalid table name format: {}", entity.table)))?;
        Ok(Self { entity, table_ref })
    }

    fn scope(&self) -> Scope<'_> {
        Scope { entity: self.entity, table_ref: &self.table_ref }
    }

    pub fn to_sql(&self, plan: &QueryPlan) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let inner = self.select_body(plan, &mut fw, true)?;
        Ok(SqlResult {
            query: format!("SELECT row_to_json(t) AS row FROM ({}) t", inner),
            params: fw.into_params(),
        })
    }

    /// Total rows matching the plan, ignoring limit, offset and order
    pub fn to_count_sql(&self, plan: &QueryPlan) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let query = if plan.group_by.is_empty() && !plan.distinct {
            let where_clause = self.where_clause(plan, &mut fw)?;
            format!("SELECT COUNT(*) AS count FROM {} WHERE {}", self.table_ref, where_clause)
        } else {
            let inner = self.select_body(plan, &mut fw, false)?;
            format!("SELECT COUNT(*) AS count FROM ({}) c", inner)
        };
        Ok(SqlResult { query, params: fw.into_params() })
    }

    pub fn to_delete_sql(&self, predicate: &Predicate) -> Result<SqlResult, FilterError> {
        let mut fw = FilterWhere::new();
        let where_clause = fw.generate(predicate, self.scope())?;
        Ok(SqlResult {
            query: format!("DELETE FROM {} WHERE {}", self.table_ref, where_clause),
            params: fw.into_params(),
        })
    }

    fn where_clause(&self, plan: &QueryPlan, fw: &mut FilterWhere) -> Result<String, FilterError> {
        let mut parts = vec![fw.generate(&plan.predicate(), self.scope())?];
        for relation in plan.include.iter().filter(|r| r.required) {
            parts.push(fw.exists_related(relation, self.scope())?);
        }
        Ok(parts.join(" AND "))
    }

    fn select_body(&self, plan: &QueryPlan, fw: &mut FilterWhere, paged: bool) -> Result<String, FilterError> {
        let columns = match &plan.attributes {
            Some(attrs) if !attrs.is_empty() => attrs
                .iter()
                .map(|a| qualified(self.scope(), a))
                .collect::<Result<Vec<_>, _>>()?
                .join(", "),
            _ => format!("{}.*", self.table_ref),
        };
        let where_clause = self.where_clause(plan, fw)?;

        let mut sql = vec![
            format!("SELECT {}{}", if plan.distinct { "DISTINCT " } else { "" }, columns),
            format!("FROM {}", self.table_ref),
            format!("WHERE {}", where_clause),
        ];
        if !plan.group_by.is_empty() {
            let group = plan
                .group_by
                .iter()
                .map(|g| qualified(self.scope(), g))
                .collect::<Result<Vec<_>, _>>()?;
            sql.push(format!("GROUP BY {}", group.join(", ")));
        }
        if paged {
            let order = fw.order_clause(&plan.order, self.scope())?;
            if !order.is_empty() {
                sql.push(order);
            }
            sql.push(build_limit_clause(plan.limit, plan.offset)?);
        }
        Ok(sql.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" "))
    }
}

fn build_limit_clause(limit: Option<i64>, offset: Option<i64>) -> Result<String, FilterError> {
    if let Some(l) = limit.filter(|l| *l < 0) {
        return Err(FilterError::InvalidLimit(l.to_string()));
    }
    if let Some(o) = offset.filter(|o| *o < 0) {
        return Err(FilterError::InvalidOffset(o.to_string()));
    }
    Ok(match (limit, offset) {
        (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
        (Some(l), None) => format!("LIMIT {}", l),
        (None, Some(o)) => format!("OFFSET {}", o),
        (None, None) => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{employee, user};
    use crate::filter::{FieldRef, SortDirection};
    use crate::schema::not_deleted;

    #[test]
    fn select_with_paging_and_order() {
        let plan = QueryPlan::new()
            .with_condition(not_deleted())
            .with_order(FieldRef::column("createdAt"), SortDirection::Desc)
            .with_limit(30, 0);
        let sql = FilterSql::new(employee::descriptor()).unwrap().to_sql(&plan).unwrap();
        assert_eq!(
            sql.query,
            "SELECT row_to_json(t) AS row FROM (SELECT \"employee\".* FROM \"employee\" \
             WHERE \"employee\".\"isDeleted\" IS NOT TRUE ORDER BY \"employee\".\"createdAt\" DESC \
             LIMIT 30 OFFSET 0) t"
        );
        assert!(sql.params.is_empty());
    }

    #[test]
    fn required_include_adds_exists() {
        let entity = user::descriptor();
        let plan = QueryPlan::new().with_include(entity.relations.clone());
        let sql = FilterSql::new(entity).unwrap().to_count_sql(&plan).unwrap();
        assert!(sql.query.starts_with("SELECT COUNT(*) AS count FROM \"user\" WHERE TRUE AND EXISTS"));
    }

    #[test]
    fn grouped_count_wraps_select() {
        let plan = QueryPlan::new()
            .with_attributes(Some(vec!["employeeName".into()]))
            .with_group_by(vec!["employeeName".into()])
            .with_limit(10, 0);
        let sql = FilterSql::new(employee::descriptor()).unwrap().to_count_sql(&plan).unwrap();
        assert_eq!(
            sql.query,
            "SELECT COUNT(*) AS count FROM (SELECT \"employee\".\"employeeName\" FROM \"employee\" \
             WHERE TRUE GROUP BY \"employee\".\"employeeName\") c"
        );
    }

    #[test]
    fn negative_limit_is_rejected() {
        let plan = QueryPlan::new().with_limit(-1, 0);
        assert!(FilterSql::new(employee::descriptor()).unwrap().to_sql(&plan).is_err());
    }
}
