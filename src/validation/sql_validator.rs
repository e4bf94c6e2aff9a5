use sqlparser::ast::Statement;
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

use crate::api::middleware::AppError;
use crate::services::sql_builder::SqlDialect;

/// Guards generated SQL before it reaches a SQL data source
pub struct SqlValidator;

impl SqlValidator {
    fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
        match dialect {
            SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
            SqlDialect::MySql => Box::new(MySqlDialect {}),
            SqlDialect::Generic => Box::new(GenericDialect {}),
        }
    }

    fn parse(sql: &str, dialect: SqlDialect) -> Result<Vec<Statement>, AppError> {
        let parser_dialect = Self::parser_dialect(dialect);
        let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
            .map_err(|e| AppError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        if statements.is_empty() {
            return Err(AppError::InvalidSql("Empty SQL query".to_string()));
        }
        Ok(statements)
    }

    /// Reject anything that is not a single read-only query
    pub fn validate_select_only(sql: &str, dialect: SqlDialect) -> Result<(), AppError> {
        let statements = Self::parse(sql, dialect)?;

        if statements.len() > 1 {
            return Err(AppError::InvalidSql(
                "Multiple statements are not allowed. Submit a single SELECT query.".to_string(),
            ));
        }

        match &statements[0] {
            Statement::Query(_) => Ok(()),
            other => {
                let rendered = other.to_string();
                let keyword = rendered.split_whitespace().next().unwrap_or("Unknown").to_uppercase();
                Err(AppError::InvalidSql(format!(
                    "{} statements are not allowed. Only SELECT queries are permitted.",
                    keyword
                )))
            }
        }
    }

    fn check_limit_in_statement(stmt: &Statement) -> bool {
        match stmt {
            Statement::Query(query) => query.limit_clause.is_some() || query.fetch.is_some(),
            _ => false,
        }
    }

    /// The statement without trailing semicolons, whitespace or comments
    fn statement_body(sql: &str, dialect: SqlDialect) -> Result<&str, AppError> {
        let parser_dialect = Self::parser_dialect(dialect);
        let tokens = Tokenizer::new(parser_dialect.as_ref(), sql)
            .tokenize_with_location()
            .map_err(|e| AppError::InvalidSql(format!("SQL parsing error: {}", e)))?;

        let last = tokens
            .iter()
            .rev()
            .find(|t| !matches!(t.token, Token::Whitespace(_) | Token::SemiColon | Token::EOF));
        Ok(match last {
            Some(last) => sql[..byte_offset(sql, last.span.end)].trim_end(),
            None => sql.trim(),
        })
    }

    /// Append `LIMIT n` when the statement has no row cap of its own
    pub fn ensure_limit(sql: &str, dialect: SqlDialect, default_limit: u64) -> Result<(String, bool), AppError> {
        let statements = Self::parse(sql, dialect)?;

        if Self::check_limit_in_statement(&statements[0]) {
            return Ok((sql.to_string(), false));
        }

        let body = Self::statement_body(sql, dialect)?;
        Ok((format!("{} LIMIT {}", body.trim_start(), default_limit), true))
    }

    /// Validate SELECT-only and ensure a LIMIT; returns the SQL to run and
    /// whether a LIMIT was added
    pub fn validate_and_prepare(sql: &str, dialect: SqlDialect, default_limit: u64) -> Result<(String, bool), AppError> {
        Self::validate_select_only(sql, dialect)?;
        Self::ensure_limit(sql, dialect, default_limit)
    }
}

/// Byte index of a 1-based tokenizer location; the end of `sql` when past it
fn byte_offset(sql: &str, location: Location) -> usize {
    let (mut line, mut column) = (1u64, 1u64);
    for (idx, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return idx;
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    sql.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_select_only() {
        assert!(SqlValidator::validate_select_only("SELECT * FROM users", SqlDialect::Postgres).is_ok());
        assert!(SqlValidator::validate_select_only("INSERT INTO users VALUES (1)", SqlDialect::Postgres).is_err());
        assert!(SqlValidator::validate_select_only("UPDATE users SET name = 'x'", SqlDialect::MySql).is_err());
        assert!(SqlValidator::validate_select_only("DELETE FROM users", SqlDialect::Generic).is_err());
        assert!(SqlValidator::validate_select_only("DROP TABLE users", SqlDialect::Postgres).is_err());
    }

    #[test]
    fn test_rejects_stacked_statements() {
        let result = SqlValidator::validate_select_only("SELECT 1; DELETE FROM users", SqlDialect::Postgres);
        assert!(matches!(result, Err(AppError::InvalidSql(_))));
    }

    #[test]
    fn test_error_names_statement_kind() {
        let err = SqlValidator::validate_select_only("DELETE FROM users", SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("DELETE"));
    }

    #[test]
    fn test_mysql_backticks_parse_with_mysql_dialect() {
        let sql = "SELECT `order id` FROM `orders` LIMIT 5";
        assert!(SqlValidator::validate_select_only(sql, SqlDialect::MySql).is_ok());
    }

    #[test]
    fn test_ensure_limit() {
        let (sql, added) = SqlValidator::ensure_limit("SELECT * FROM users;", SqlDialect::Postgres, 1000).unwrap();
        assert_eq!(sql, "SELECT * FROM users LIMIT 1000");
        assert!(added);

        let (sql, added) = SqlValidator::ensure_limit("SELECT * FROM users LIMIT 100", SqlDialect::Postgres, 1000).unwrap();
        assert_eq!(sql, "SELECT * FROM users LIMIT 100");
        assert!(!added);
    }

    #[test]
    fn test_limit_detection_ignores_identifiers_and_comments() {
        let (sql, added) = SqlValidator::validate_and_prepare("SELECT * FROM table_limit", SqlDialect::Postgres, 1000).unwrap();
        assert!(sql.ends_with("LIMIT 1000"));
        assert!(added);

        let (_, added) = SqlValidator::validate_and_prepare("SELECT limit_value FROM users", SqlDialect::Postgres, 1000).unwrap();
        assert!(added);

        let (_, added) = SqlValidator::validate_and_prepare("SELECT * FROM users /* LIMIT */", SqlDialect::Postgres, 1000).unwrap();
        assert!(added);

        let (_, added) = SqlValidator::validate_and_prepare("SELECT * FROM users LIMIT 100 OFFSET 10", SqlDialect::Postgres, 1000).unwrap();
        assert!(!added);
    }

    #[test]
    fn test_limit_goes_before_trailing_comments() {
        let (sql, added) =
            SqlValidator::validate_and_prepare("SELECT * FROM users -- active only", SqlDialect::Postgres, 1000).unwrap();
        assert!(added);
        assert_eq!(sql, "SELECT * FROM users LIMIT 1000");

        let (sql, _) = SqlValidator::validate_and_prepare(
            "SELECT name\nFROM users; -- newest first\n/* trailing */\n",
            SqlDialect::MySql,
            50,
        )
        .unwrap();
        assert_eq!(sql, "SELECT name\nFROM users LIMIT 50");

        let (sql, _) =
            SqlValidator::validate_and_prepare("SELECT 'café' AS drink FROM menu;", SqlDialect::Postgres, 10).unwrap();
        assert_eq!(sql, "SELECT 'café' AS drink FROM menu LIMIT 10");
        assert!(SqlValidator::validate_select_only(&sql, SqlDialect::Postgres).is_ok());
    }

    #[test]
    fn test_metric_sql_passes_validation() {
        let sql = "SELECT date_trunc('month', created_at) AS bucket, SUM(total) AS value FROM orders \
                   GROUP BY date_trunc('month', created_at) ORDER BY bucket DESC LIMIT 12;";
        let (prepared, added) = SqlValidator::validate_and_prepare(sql, SqlDialect::Postgres, 1000).unwrap();
        assert_eq!(prepared, sql);
        assert!(!added);
    }
}
