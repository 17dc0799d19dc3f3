//! SQL generation for parsed list queries using SeaQuery.

use sea_query::{
    Alias, Expr, ExprTrait, Order, PostgresQueryBuilder, Query, SelectStatement, SimpleExpr, Value,
};

use super::{Direction, Filter, FilterOp, FilterValue, ListQuery};

/// Builds `SELECT row_to_json(t) FROM (...) t` for a [`ListQuery`].
pub struct ListQueryBuilder<'a> {
    table: &'static str,
    query: &'a ListQuery,
    conditions: Vec<SimpleExpr>,
}

impl<'a> ListQueryBuilder<'a> {
    pub fn new(table: &'static str, query: &'a ListQuery) -> Self {
        Self {
            table,
            query,
            conditions: Vec::new(),
        }
    }

    /// Add a condition that applies regardless of client filters.
    pub fn with_condition(mut self, condition: SimpleExpr) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Column reference qualified by the builder's table.
    pub fn column(&self, column: &'static str) -> SimpleExpr {
        Expr::col((Alias::new(self.table), Alias::new(column))).into()
    }

    /// Build the page query. Each row is one JSON object keyed by field name.
    pub fn build(&self) -> String {
        let mut select = Query::select();
        self.add_projection(&mut select);
        select.from(Alias::new(self.table));

        for condition in &self.conditions {
            select.and_where(condition.clone());
        }
        for filter in &self.query.filters {
            select.and_where(self.filter_condition(filter));
        }

        self.add_sorts(&mut select);
        select.limit(self.query.limit);
        select.offset(self.query.offset());

        let inner = select.to_string(PostgresQueryBuilder);
        format!("SELECT row_to_json(t) FROM ({inner}) t")
    }

    fn add_projection(&self, select: &mut SelectStatement) {
        for field in &self.query.fields {
            select.expr_as(self.column(field.column), Alias::new(field.name));
        }
    }

    fn add_sorts(&self, select: &mut SelectStatement) {
        for (field, direction) in &self.query.sort {
            let order = match direction {
                Direction::Asc => Order::Asc,
                Direction::Desc => Order::Desc,
            };
            select.order_by((Alias::new(self.table), Alias::new(field.column)), order);
        }
        // stable pagination across equal sort keys
        select.order_by((Alias::new(self.table), Alias::new("id")), Order::Asc);
    }

    fn filter_condition(&self, filter: &Filter) -> SimpleExpr {
        let col = self.column(filter.field.column);
        let mut values = filter.values.iter().map(to_value);

        match filter.op {
            FilterOp::Eq if filter.values.len() > 1 => col.is_in(values.collect::<Vec<_>>()),
            op => {
                let Some(value) = values.next() else {
                    return Expr::cust("FALSE");
                };
                match op {
                    FilterOp::Eq => col.eq(value),
                    FilterOp::Gt => col.gt(value),
                    FilterOp::Gte => col.gte(value),
                    FilterOp::Lt => col.lt(value),
                    FilterOp::Lte => col.lte(value),
                }
            }
        }
    }
}

fn to_value(value: &FilterValue) -> Value {
    match value {
        FilterValue::Number(n) => Value::from(*n),
        FilterValue::Text(s) => Value::from(s.clone()),
    }
}
