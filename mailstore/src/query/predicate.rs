use rusqlite::types::Value;

use super::statement::Select;
use super::{messages, Column};
use crate::model::Flag;

/// Filter expression. Leaves bind their operands as parameters.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(Column, Value),
    Ne(Column, Value),
    IsNull(Column),
    NotNull(Column),
    /// Placeholder message rows only
    Empty,
    /// Rows carrying content
    NotEmpty,
    /// Message has (or lacks) the flag
    Flag(Flag, bool),
    /// Column value strictly below the bound
    Before(Column, i64),
    /// Column value strictly above the bound
    After(Column, i64),
    In(Column, Vec<Value>),
    InSelect(Column, Box<Select>),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: Column, value: impl Into<Value>) -> Self {
        Predicate::Eq(column, value.into())
    }

    pub fn ne(column: Column, value: impl Into<Value>) -> Self {
        Predicate::Ne(column, value.into())
    }

    pub fn is_in<I, V>(column: Column, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::In(column, values.into_iter().map(Into::into).collect())
    }

    pub fn in_select(column: Column, select: Select) -> Self {
        Predicate::InSelect(column, Box::new(select))
    }

    /// Conjunction, flattening nested ANDs
    pub fn and(self, other: Predicate) -> Self {
        let mut parts = match self {
            Predicate::And(parts) => parts,
            single => vec![single],
        };
        match other {
            Predicate::And(more) => parts.extend(more),
            single => parts.push(single),
        }
        Predicate::And(parts)
    }

    pub(crate) fn compile_into(&self, sql: &mut String, params: &mut Vec<Value>) {
        match self {
            Predicate::Eq(col, value) => {
                sql.push_str(&col.qualified());
                sql.push_str(" = ?");
                params.push(value.clone());
            }
            Predicate::Ne(col, value) => {
                sql.push_str(&col.qualified());
                sql.push_str(" != ?");
                params.push(value.clone());
            }
            Predicate::IsNull(col) => {
                sql.push_str(&col.qualified());
                sql.push_str(" IS NULL");
            }
            Predicate::NotNull(col) => {
                sql.push_str(&col.qualified());
                sql.push_str(" IS NOT NULL");
            }
            Predicate::Empty => {
                sql.push_str(&messages::EMPTY.qualified());
                sql.push_str(" = ?");
                params.push(Value::Integer(1));
            }
            Predicate::NotEmpty => {
                sql.push_str(&messages::EMPTY.qualified());
                sql.push_str(" = ?");
                params.push(Value::Integer(0));
            }
            Predicate::Flag(flag, value) => match flag.column_name() {
                Some(name) => {
                    sql.push_str(&Column::new(messages::FLAGS.table, name).qualified());
                    sql.push_str(" = ?");
                    params.push(Value::Integer(i64::from(*value)));
                }
                None => {
                    // Extra flags live in a comma-separated list
                    let flags = messages::FLAGS.qualified();
                    if *value {
                        sql.push_str(&format!("(',' || {} || ',') LIKE ?", flags));
                    } else {
                        sql.push_str(&format!(
                            "({} IS NULL OR (',' || {} || ',') NOT LIKE ?)",
                            flags, flags
                        ));
                    }
                    params.push(Value::Text(format!("%,{},%", flag.as_str())));
                }
            },
            Predicate::Before(col, bound) => {
                sql.push_str(&col.qualified());
                sql.push_str(" < ?");
                params.push(Value::Integer(*bound));
            }
            Predicate::After(col, bound) => {
                sql.push_str(&col.qualified());
                sql.push_str(" > ?");
                params.push(Value::Integer(*bound));
            }
            Predicate::In(col, values) => {
                if values.is_empty() {
                    sql.push_str("0");
                    return;
                }
                sql.push_str(&col.qualified());
                sql.push_str(" IN (");
                sql.push_str(&vec!["?"; values.len()].join(", "));
                sql.push(')');
                params.extend(values.iter().cloned());
            }
            Predicate::InSelect(col, select) => {
                sql.push_str(&col.qualified());
                sql.push_str(" IN (");
                select.compile_into(sql, params);
                sql.push(')');
            }
            Predicate::And(parts) => {
                if parts.is_empty() {
                    sql.push_str("1");
                    return;
                }
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(" AND ");
                    }
                    sql.push('(');
                    part.compile_into(sql, params);
                    sql.push(')');
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Table;

    fn compile(predicate: &Predicate) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        predicate.compile_into(&mut sql, &mut params);
        (sql, params)
    }

    #[test]
    fn test_and_flattens() {
        let p = Predicate::eq(messages::FOLDER_ID, 1i64)
            .and(Predicate::NotEmpty)
            .and(Predicate::Flag(Flag::Seen, false));
        let (sql, params) = compile(&p);

        assert_eq!(
            sql,
            "(messages.folder_id = ?) AND (messages.empty = ?) AND (messages.read = ?)"
        );
        assert_eq!(
            params,
            vec![Value::Integer(1), Value::Integer(0), Value::Integer(0)]
        );
    }

    #[test]
    fn test_values_never_interpolated() {
        let hostile = "x'); DROP TABLE messages; --".to_string();
        let (sql, params) = compile(&Predicate::eq(messages::UID, hostile.clone()));

        assert!(!sql.contains("DROP"));
        assert_eq!(params, vec![Value::Text(hostile)]);
    }

    #[test]
    fn test_empty_in_is_false() {
        let (sql, params) = compile(&Predicate::is_in(messages::UID, Vec::<String>::new()));
        assert_eq!(sql, "0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_extra_flag_uses_list_match() {
        let (sql, params) = compile(&Predicate::Flag(Flag::XDownloadedFull, true));
        assert!(sql.contains("LIKE ?"));
        assert_eq!(params, vec![Value::Text("%,X_DOWNLOADED_FULL,%".into())]);
    }

    #[test]
    fn test_in_select() {
        let sub = Select::from(Table::Messages)
            .columns([messages::ID])
            .filter(Predicate::eq(messages::FOLDER_ID, 7i64));
        let (sql, params) = compile(&Predicate::in_select(
            crate::query::threads::MESSAGE_ID,
            sub,
        ));

        assert_eq!(
            sql,
            "threads.message_id IN (SELECT messages.id FROM messages WHERE messages.folder_id = ?)"
        );
        assert_eq!(params, vec![Value::Integer(7)]);
    }
}
