use serde_json::Value;

use super::error::FilterError;
use super::types::{FieldRef, FilterOrderInfo, Predicate};
use crate::schema::{EntityDescriptor, FieldKind, RelationDescriptor};

/// Renders predicate trees into parameterized PostgreSQL.
///
/// Every identifier is checked against the owning schema and quoted; every
/// value becomes a `$n` parameter.
pub struct FilterWhere {
    param_values: Vec<Value>,
    alias_seq: usize,
}

/// Table reference a predicate is rendered against
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub entity: &'a EntityDescriptor,
    pub table_ref: &'a str,
}

impl Default for FilterWhere {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterWhere {
    pub fn new() -> Self {
        Self { param_values: vec![], alias_seq: 0 }
    }

    pub fn params(&self) -> &[Value] {
        &self.param_values
    }

    pub fn into_params(self) -> Vec<Value> {
        self.param_values
    }

    /// Bind a value and return its placeholder
    pub fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        format!("${}", self.param_values.len())
    }

    pub fn generate(&mut self, predicate: &Predicate, scope: Scope<'_>) -> Result<String, FilterError> {
        match predicate {
            Predicate::And(items) => self.combine(items, " AND ", "TRUE", scope),
            Predicate::Or(items) => self.combine(items, " OR ", "FALSE", scope),
            Predicate::Eq(field, value) => self.field_condition(field, scope, |this, column, kind| {
                Ok(match value {
                    Value::Null => format!("{} IS NULL", column),
                    Value::Bool(b) => format!("{} = {}", column, this.param(Value::Bool(*b))),
                    Value::String(_) if !matches!(kind, FieldKind::String | FieldKind::Text | FieldKind::Reference) => {
                        format!("{}::text = {}", column, this.param(value.clone()))
                    }
                    _ => format!("{} = {}", column, this.param(value.clone())),
                })
            }),
            Predicate::In(field, keys) => self.field_condition(field, scope, |this, column, _| {
                let keys = Value::Array(keys.iter().cloned().map(Value::String).collect());
                Ok(format!("{}::text = ANY({})", column, this.param(keys)))
            }),
            Predicate::NotTrue(field) => {
                self.field_condition(field, scope, |_, column, _| Ok(format!("{} IS NOT TRUE", column)))
            }
            Predicate::Contains(field, needle) => self.field_condition(field, scope, |this, column, _| {
                let pattern = format!("%{}%", escape_like(needle));
                Ok(format!("{}::text ILIKE {}", column, this.param(Value::String(pattern))))
            }),
        }
    }

    /// `EXISTS` check used for required relations
    pub fn exists_related(
        &mut self,
        relation: &RelationDescriptor,
        scope: Scope<'_>,
    ) -> Result<String, FilterError> {
        let (from, join) = self.join_clause(relation, scope)?;
        Ok(format!("EXISTS (SELECT 1 FROM {} WHERE {})", from, join))
    }

    pub fn order_clause(&mut self, order: &[FilterOrderInfo], scope: Scope<'_>) -> Result<String, FilterError> {
        if order.is_empty() {
            return Ok(String::new());
        }
        let mut parts = Vec::with_capacity(order.len());
        for info in order {
            let expr = match &info.field {
                FieldRef::Column(name) => qualified(scope, name)?,
                FieldRef::Related { alias, field } => {
                    let relation = scope
                        .entity
                        .relation(alias)
                        .ok_or_else(|| FilterError::UnknownRelation(alias.clone()))?;
                    let (from, join) = self.join_clause(relation, scope)?;
                    let target = relation.target();
                    let inner_ref = from_alias(&from);
                    let column = qualified(Scope { entity: target, table_ref: &inner_ref }, field)?;
                    format!(
                        "(SELECT {col} FROM {from} WHERE {join} ORDER BY {col} {dir} LIMIT 1)",
                        col = column,
                        from = from,
                        join = join,
                        dir = info.sort.to_sql()
                    )
                }
            };
            parts.push(format!("{} {}", expr, info.sort.to_sql()));
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }

    fn combine(
        &mut self,
        items: &[Predicate],
        joiner: &str,
        empty: &str,
        scope: Scope<'_>,
    ) -> Result<String, FilterError> {
        let parts = items
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| self.generate(p, scope))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(match parts.len() {
            0 => empty.to_string(),
            1 => parts.into_iter().next().unwrap_or_default(),
            _ => format!("({})", parts.join(joiner)),
        })
    }

    /// Render a condition on a primary column, or wrap it in `EXISTS` for a related one
    fn field_condition<F>(&mut self, field: &FieldRef, scope: Scope<'_>, render: F) -> Result<String, FilterError>
    where
        F: FnOnce(&mut Self, String, FieldKind) -> Result<String, FilterError>,
    {
        match field {
            FieldRef::Column(name) => {
                let kind = scope
                    .entity
                    .schema
                    .field(name)
                    .map(|f| f.kind)
                    .ok_or_else(|| FilterError::InvalidColumn(name.clone()))?;
                let column = qualified(scope, name)?;
                render(self, column, kind)
            }
            FieldRef::Related { alias, field } => {
                let relation = scope
                    .entity
                    .relation(alias)
                    .ok_or_else(|| FilterError::UnknownRelation(alias.clone()))?;
                let target = relation.target();
                let kind = target
                    .schema
                    .field(field)
                    .map(|f| f.kind)
                    .ok_or_else(|| FilterError::InvalidColumn(format!("{}.{}", alias, field)))?;
                let (from, join) = self.join_clause(relation, scope)?;
                let inner_ref = from_alias(&from);
                let column = qualified(Scope { entity: target, table_ref: &inner_ref }, field)?;
                let condition = render(self, column, kind)?;
                Ok(format!("EXISTS (SELECT 1 FROM {} WHERE {} AND {})", from, join, condition))
            }
        }
    }

    /// `FROM` fragment and join condition (plus extra filter) for a relation
    fn join_clause(
        &mut self,
        relation: &RelationDescriptor,
        scope: Scope<'_>,
    ) -> Result<(String, String), FilterError> {
        let target = relation.target();
        self.alias_seq += 1;
        let alias = format!("r{}", self.alias_seq);
        let inner_ref = quote_ident(&alias)?;
        let inner = Scope { entity: target, table_ref: &inner_ref };

        let from = format!("{} AS {}", quote_ident(target.table)?, inner_ref);
        let mut join = format!(
            "{}::text = {}::text",
            qualified(inner, relation.foreign_key)?,
            qualified(scope, relation.local_key)?
        );
        if let Some(extra) = &relation.extra_filter {
            let extra_sql = self.generate(extra, inner)?;
            join = format!("{} AND {}", join, extra_sql);
        }
        Ok((from, join))
    }
}

/// The alias part of a `"table" AS "rN"` fragment
fn from_alias(from: &str) -> String {
    from.rsplit(" AS ").next().unwrap_or(from).to_string()
}

/// `"table"."column"`, rejecting columns the schema does not declare
pub fn qualified(scope: Scope<'_>, column: &str) -> Result<String, FilterError> {
    if !scope.entity.schema.contains(column) {
        return Err(FilterError::InvalidColumn(format!("{}.{}", scope.entity.name, column)));
    }
    Ok(format!("{}.{}", scope.table_ref, quote_ident(column)?))
}

/// Quote an identifier after checking it is a plain `[A-Za-z_][A-Za-z0-9_]*` name
pub fn quote_ident(name: &str) -> Result<String, FilterError> {
    let mut chars = name.chars();
    let valid_start = chars.next().map(|c| c.is_ascii_alphabetic() || c == '_').unwrap_or(false);
    if !valid_start || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FilterError::InvalidColumn(format!("Invalid identifier format: {}", name)));
    }
    Ok(format!("\"{}\"", name))
}

/// Escape LIKE metacharacters so user input only ever matches literally
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{employee, user};
    use crate::filter::SortDirection;
    use serde_json::json;

    fn render(entity: &EntityDescriptor, predicate: &Predicate) -> (String, Vec<Value>) {
        let mut fw = FilterWhere::new();
        let table_ref = quote_ident(entity.table).unwrap();
        let sql = fw.generate(predicate, Scope { entity, table_ref: &table_ref }).unwrap();
        (sql, fw.into_params())
    }

    #[test]
    fn values_are_parameterized() {
        let (sql, params) = render(
            employee::descriptor(),
            &Predicate::And(vec![
                Predicate::eq("employeeCode", "E1' OR 1=1 --"),
                Predicate::not_true("isDeleted"),
            ]),
        );
        assert_eq!(
            sql,
            "(\"employee\".\"employeeCode\" = $1 AND \"employee\".\"isDeleted\" IS NOT TRUE)"
        );
        assert_eq!(params, vec![json!("E1' OR 1=1 --")]);
    }

    #[test]
    fn contains_escapes_wildcards() {
        let (sql, params) = render(employee::descriptor(), &Predicate::contains("employeeName", "50%_off"));
        assert_eq!(sql, "\"employee\".\"employeeName\"::text ILIKE $1");
        assert_eq!(params, vec![json!("%50\\%\\_off%")]);
    }

    #[test]
    fn non_text_exact_match_compares_as_text() {
        let (sql, _) = render(user::descriptor(), &Predicate::eq("lastLoginDate", "2020-03-08"));
        assert_eq!(sql, "\"user\".\"lastLoginDate\"::text = $1");
        let (sql, params) = render(user::descriptor(), &Predicate::eq("isActive", true));
        assert_eq!(sql, "\"user\".\"isActive\" = $1");
        assert_eq!(params, vec![json!(true)]);
    }

    #[test]
    fn or_group_and_empty_groups() {
        let (sql, _) = render(
            employee::descriptor(),
            &Predicate::Or(vec![Predicate::contains("employeeCode", "a"), Predicate::contains("employeeName", "a")]),
        );
        assert!(sql.starts_with('(') && sql.contains(" OR "));
        assert_eq!(render(employee::descriptor(), &Predicate::And(vec![])).0, "TRUE");
        assert_eq!(render(employee::descriptor(), &Predicate::Or(vec![])).0, "FALSE");
    }

    #[test]
    fn related_condition_becomes_exists_with_extra_filter() {
        let (sql, params) = render(
            user::descriptor(),
            &Predicate::Contains(FieldRef::related("employee", "employeeName"), "Lim".into()),
        );
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"employee\" AS \"r1\" WHERE \"r1\".\"id\"::text = \"user\".\"employeeId\"::text \
             AND \"r1\".\"isDeleted\" IS NOT TRUE AND \"r1\".\"employeeName\"::text ILIKE $1)"
        );
        assert_eq!(params, vec![json!("%Lim%")]);
    }

    #[test]
    fn key_sets_bind_one_array() {
        let (sql, params) = render(user::descriptor(), &Predicate::one_of("employeeId", vec!["a".into(), "b".into()]));
        assert_eq!(sql, "\"user\".\"employeeId\"::text = ANY($1)");
        assert_eq!(params, vec![json!(["a", "b"])]);
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let mut fw = FilterWhere::new();
        let entity = employee::descriptor();
        let err = fw
            .generate(&Predicate::eq("nope", "x"), Scope { entity, table_ref: "\"employee\"" })
            .unwrap_err();
        assert!(matches!(err, FilterError::InvalidColumn(_)));
        assert!(quote_ident("a\"; DROP").is_err());
        assert!(quote_ident("1abc").is_err());
    }

    #[test]
    fn order_by_related_uses_scalar_subquery() {
        let mut fw = FilterWhere::new();
        let entity = employee::descriptor();
        let sql = fw
            .order_clause(
                &[
                    FilterOrderInfo { field: FieldRef::column("employeeName"), sort: SortDirection::Asc },
                    FilterOrderInfo { field: FieldRef::related("user", "email"), sort: SortDirection::Desc },
                ],
                Scope { entity, table_ref: "\"employee\"" },
            )
            .unwrap();
        assert!(sql.starts_with("ORDER BY \"employee\".\"employeeName\" ASC, (SELECT \"r1\".\"email\" FROM \"user\" AS \"r1\""));
        assert!(sql.ends_with("LIMIT 1) DESC"));
    }
}
