use rusqlite::types::Value;

use super::{Column, Compiled, Predicate, Statement, Table};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn keyword(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Selected expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Column(Column),
    /// `COUNT(*)`
    Count,
    Max(Column),
    Min(Column),
}

impl Projection {
    fn render(&self) -> String {
        match self {
            Projection::Column(col) => col.qualified(),
            Projection::Count => "COUNT(*)".to_string(),
            Projection::Max(col) => format!("MAX({})", col.qualified()),
            Projection::Min(col) => format!("MIN({})", col.qualified()),
        }
    }
}

impl From<Column> for Projection {
    fn from(col: Column) -> Self {
        Projection::Column(col)
    }
}

#[derive(Debug, Clone)]
struct LeftJoin {
    table: Table,
    left: Column,
    right: Column,
}

/// SELECT over one table, optionally left-joined to a second
#[derive(Debug, Clone)]
pub struct Select {
    table: Table,
    join: Option<LeftJoin>,
    projection: Vec<Projection>,
    filter: Option<Predicate>,
    order: Vec<(Column, Order)>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl Select {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            join: None,
            projection: Vec::new(),
            filter: None,
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// `LEFT JOIN table ON left = right`
    pub fn left_join(mut self, table: Table, left: Column, right: Column) -> Self {
        self.join = Some(LeftJoin { table, left, right });
        self
    }

    pub fn columns<I, P>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Projection>,
    {
        self.projection.extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.projection.push(projection);
        self
    }

    /// Adds a filter, AND-ed with any existing one
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, column: Column, order: Order) -> Self {
        self.order.push((column, order));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub(crate) fn compile_into(&self, sql: &mut String, params: &mut Vec<Value>) {
        sql.push_str("SELECT ");
        if self.projection.is_empty() {
            sql.push_str(&format!("{}.*", self.table.name()));
        } else {
            let cols: Vec<String> = self.projection.iter().map(Projection::render).collect();
            sql.push_str(&cols.join(", "));
        }

        sql.push_str(" FROM ");
        sql.push_str(self.table.name());

        if let Some(join) = &self.join {
            sql.push_str(&format!(
                " LEFT JOIN {} ON {} = {}",
                join.table.name(),
                join.left.qualified(),
                join.right.qualified()
            ));
        }

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.compile_into(sql, params);
        }

        if !self.order.is_empty() {
            let terms: Vec<String> = self
                .order
                .iter()
                .map(|(col, order)| format!("{} {}", col.qualified(), order.keyword()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }

        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::Integer(limit));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::Integer(offset));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                params.push(Value::Integer(offset));
            }
            (None, None) => {}
        }
    }
}

impl Statement for Select {
    fn compile(&self) -> Result<Compiled> {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.compile_into(&mut sql, &mut params);
        Ok(Compiled { sql, params })
    }
}

/// INSERT of one row
#[derive(Debug, Clone)]
pub struct Insert {
    table: Table,
    values: Vec<(Column, Value)>,
}

impl Insert {
    pub fn into(table: Table) -> Self {
        Self {
            table,
            values: Vec::new(),
        }
    }

    pub fn value(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.values.push((column, value.into()));
        self
    }
}

impl Statement for Insert {
    fn compile(&self) -> Result<Compiled> {
        if self.values.is_empty() {
            return Ok(Compiled {
                sql: format!("INSERT INTO {} DEFAULT VALUES", self.table.name()),
                params: Vec::new(),
            });
        }

        let names: Vec<&str> = self.values.iter().map(|(col, _)| col.name).collect();
        let marks = vec!["?"; self.values.len()].join(", ");

        Ok(Compiled {
            sql: format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table.name(),
                names.join(", "),
                marks
            ),
            params: self.values.iter().map(|(_, v)| v.clone()).collect(),
        })
    }
}

/// UPDATE of the rows matching a filter
#[derive(Debug, Clone)]
pub struct Update {
    table: Table,
    set: Vec<(Column, Value)>,
    filter: Option<Predicate>,
}

impl Update {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            set: Vec::new(),
            filter: None,
        }
    }

    pub fn set(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.set.push((column, value.into()));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }
}

impl Statement for Update {
    fn compile(&self) -> Result<Compiled> {
        if self.set.is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "UPDATE of {} without assignments",
                self.table.name()
            )));
        }

        let assignments: Vec<String> = self
            .set
            .iter()
            .map(|(col, _)| format!("{} = ?", col.name))
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            self.table.name(),
            assignments.join(", ")
        );
        let mut params: Vec<Value> = self.set.iter().map(|(_, v)| v.clone()).collect();

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.compile_into(&mut sql, &mut params);
        }

        Ok(Compiled { sql, params })
    }
}

/// DELETE of the rows matching a filter
#[derive(Debug, Clone)]
pub struct Delete {
    table: Table,
    filter: Option<Predicate>,
}

impl Delete {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filter: None,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }
}

impl Statement for Delete {
    fn compile(&self) -> Result<Compiled> {
        let mut sql = format!("DELETE FROM {}", self.table.name());
        let mut params = Vec::new();

        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            filter.compile_into(&mut sql, &mut params);
        }

        Ok(Compiled { sql, params })
    }
}
