//! Recursive-descent parser for the SQL dialect: the statement shapes of the
//! surface grammar, document and array literals, backtick identifiers, and
//! positional/named parameters.

use quill_document::{Path, PathSegment, Value, ValueType};
use thiserror::Error;

use crate::sql::ast::{
    DeleteStatement, FieldDef, InsertSource, InsertStatement, OrderBy, Projection,
    SelectStatement, Statement, UpdateStatement,
};
use crate::sql::expr::{BinaryOperator, Expr, Function, UnaryOperator};
use crate::sql::lexer::{tokenize, SpannedToken, Token};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{msg} at byte {pos}")]
pub struct ParseError {
    pub msg: String,
    pub pos: usize,
}

impl ParseError {
    pub fn new(msg: impl Into<String>, pos: usize) -> Self {
        ParseError {
            msg: msg.into(),
            pos,
        }
    }
}

/// Parse a `;`-separated sequence of statements.
pub fn parse(input: &str) -> Result<Vec<Statement>, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        input,
        tokens,
        at: 0,
        positional: 0,
    };
    let mut statements = Vec::new();
    loop {
        while parser.eat(&Token::Semicolon) {}
        if parser.peek() == &Token::Eof {
            break;
        }
        statements.push(parser.parse_statement()?);
        if !parser.eat(&Token::Semicolon) && parser.peek() != &Token::Eof {
            return Err(parser.error("expected `;` or end of input"));
        }
    }
    Ok(statements)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<SpannedToken>,
    at: usize,
    /// Running `?` counter: positional parameters are numbered in order of
    /// appearance across the whole input.
    positional: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.at].token
    }

    fn pos(&self) -> usize {
        self.tokens[self.at].start
    }

    fn prev_end(&self) -> usize {
        self.tokens[self.at.saturating_sub(1)].end
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.at].token.clone();
        if self.at + 1 < self.tokens.len() {
            self.at += 1;
        }
        token
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError::new(msg, self.pos())
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected `{kw}`")))
        }
    }

    fn parse_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn parse_path(&mut self) -> Result<Path, ParseError> {
        let mut path = Path::default();
        path.push(PathSegment::Field(self.parse_ident("a field path")?));
        while self.eat(&Token::Dot) {
            match self.peek().clone() {
                Token::Ident(name) => {
                    self.advance();
                    path.push(PathSegment::Field(name));
                }
                Token::Integer(idx) if idx >= 0 => {
                    self.advance();
                    path.push(PathSegment::Index(idx as usize));
                }
                _ => return Err(self.error("expected a field name or array index")),
            }
        }
        Ok(path)
    }

    fn parse_u64(&mut self, what: &str) -> Result<u64, ParseError> {
        match self.peek().clone() {
            Token::Integer(n) if n >= 0 => {
                self.advance();
                Ok(n as u64)
            }
            _ => Err(self.error(format!("expected a non-negative integer {what}"))),
        }
    }

    // --- statements -----------------------------------------------------

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("CREATE") {
            return self.parse_create();
        }
        if self.eat_keyword("DROP") {
            return self.parse_drop();
        }
        if self.eat_keyword("INSERT") {
            return self.parse_insert();
        }
        if self.at_keyword("SELECT") {
            return Ok(Statement::Select(self.parse_select()?));
        }
        if self.eat_keyword("UPDATE") {
            return self.parse_update();
        }
        if self.eat_keyword("DELETE") {
            return self.parse_delete();
        }
        if self.eat_keyword("REINDEX") {
            let target = match self.peek().clone() {
                Token::Ident(name) => {
                    self.advance();
                    Some(name)
                }
                _ => None,
            };
            return Ok(Statement::ReIndex { target });
        }
        if self.eat_keyword("BEGIN") {
            self.eat_keyword("TRANSACTION");
            return Ok(Statement::Begin);
        }
        if self.eat_keyword("COMMIT") {
            return Ok(Statement::Commit);
        }
        if self.eat_keyword("ROLLBACK") {
            return Ok(Statement::Rollback);
        }
        Err(self.error("expected a statement"))
    }

    fn parse_create(&mut self) -> Result<Statement, ParseError> {
        let unique = self.eat_keyword("UNIQUE");
        if unique || self.at_keyword("INDEX") {
            self.expect_keyword("INDEX")?;
            let if_not_exists = self.parse_if_not_exists()?;
            let name = self.parse_ident("an index name")?;
            self.expect_keyword("ON")?;
            let table = self.parse_ident("a table name")?;
            self.expect(&Token::LParen, "`(`")?;
            let path = self.parse_path()?;
            self.expect(&Token::RParen, "`)`")?;
            return Ok(Statement::CreateIndex {
                name,
                if_not_exists,
                table,
                path,
                unique,
            });
        }

        self.expect_keyword("TABLE")?;
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.parse_ident("a table name")?;
        let mut fields = Vec::new();
        if self.eat(&Token::LParen) {
            loop {
                fields.push(self.parse_field_def()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "`)`")?;
        }
        Ok(Statement::CreateTable {
            name,
            if_not_exists,
            fields,
        })
    }

    fn parse_if_not_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("NOT")?;
            self.expect_keyword("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_field_def(&mut self) -> Result<FieldDef, ParseError> {
        let path = self.parse_path()?;
        let typ = self.parse_type()?;
        let mut def = FieldDef {
            path,
            typ,
            not_null: false,
            primary_key: false,
            default: None,
        };
        loop {
            if self.eat_keyword("NOT") {
                self.expect_keyword("NULL")?;
                def.not_null = true;
            } else if self.eat_keyword("PRIMARY") {
                self.expect_keyword("KEY")?;
                def.primary_key = true;
            } else if self.eat_keyword("DEFAULT") {
                def.default = Some(self.parse_expr()?);
            } else {
                break;
            }
        }
        Ok(def)
    }

    /// Type names and their aliases; `VARCHAR(n)` / `CHARACTER(n)` lengths
    /// are accepted and ignored.
    fn parse_type(&mut self) -> Result<Option<ValueType>, ParseError> {
        let Token::Ident(word) = self.peek().clone() else {
            return Ok(None);
        };
        let typ = match word.to_ascii_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => ValueType::Bool,
            "INTEGER" | "INT" | "INT2" | "INT8" | "TINYINT" | "SMALLINT" | "MEDIUMINT"
            | "BIGINT" => ValueType::Integer,
            "DOUBLE" | "REAL" => {
                self.advance();
                if word.eq_ignore_ascii_case("DOUBLE") {
                    self.eat_keyword("PRECISION");
                }
                return Ok(Some(ValueType::Double));
            }
            "BLOB" | "BYTES" => ValueType::Blob,
            "TEXT" => ValueType::Text,
            "VARCHAR" | "CHARACTER" => {
                self.advance();
                self.expect(&Token::LParen, "`(`")?;
                self.parse_u64("length")?;
                self.expect(&Token::RParen, "`)`")?;
                return Ok(Some(ValueType::Text));
            }
            "ARRAY" => ValueType::Array,
            "DOCUMENT" => ValueType::Document,
            _ => return Ok(None),
        };
        self.advance();
        Ok(Some(typ))
    }

    fn parse_drop(&mut self) -> Result<Statement, ParseError> {
        if self.eat_keyword("TABLE") {
            let if_exists = self.parse_if_exists()?;
            let name = self.parse_ident("a table name")?;
            Ok(Statement::DropTable { name, if_exists })
        } else if self.eat_keyword("INDEX") {
            let if_exists = self.parse_if_exists()?;
            let name = self.parse_ident("an index name")?;
            Ok(Statement::DropIndex { name, if_exists })
        } else {
            Err(self.error("expected `TABLE` or `INDEX`"))
        }
    }

    fn parse_if_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_insert(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword("INTO")?;
        let table = self.parse_ident("a table name")?;

        let mut fields = None;
        if self.eat(&Token::LParen) {
            let mut list = Vec::new();
            loop {
                list.push(self.parse_path()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen, "`)`")?;
            fields = Some(list);
        }

        let source = if self.eat_keyword("VALUES") {
            if self.peek() == &Token::LParen {
                let mut rows = Vec::new();
                loop {
                    self.expect(&Token::LParen, "`(`")?;
                    let mut row = Vec::new();
                    loop {
                        row.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "`)`")?;
                    rows.push(row);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                InsertSource::Rows(rows)
            } else {
                let mut docs = Vec::new();
                loop {
                    docs.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                InsertSource::Documents(docs)
            }
        } else if self.at_keyword("SELECT") {
            InsertSource::Select(Box::new(self.parse_select()?))
        } else {
            return Err(self.error("expected `VALUES` or `SELECT`"));
        };

        Ok(Statement::Insert(InsertStatement {
            table,
            fields,
            source,
        }))
    }

    fn parse_select(&mut self) -> Result<SelectStatement, ParseError> {
        self.expect_keyword("SELECT")?;

        let mut projections = Vec::new();
        loop {
            if self.eat(&Token::Star) {
                projections.push(Projection::Wildcard);
            } else {
                let start = self.pos();
                let expr = self.parse_expr()?;
                let name = self.input[start..self.prev_end()].trim().to_owned();
                projections.push(Projection::Expr { expr, name });
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }

        self.expect_keyword("FROM")?;
        let table = self.parse_ident("a table name")?;

        let filter = if self.eat_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let order_by = if self.eat_keyword("ORDER") {
            self.expect_keyword("BY")?;
            let path = self.parse_path()?;
            let descending = if self.eat_keyword("DESC") {
                true
            } else {
                self.eat_keyword("ASC");
                false
            };
            Some(OrderBy { path, descending })
        } else {
            None
        };

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.parse_u64("for LIMIT")?)
        } else {
            None
        };
        let offset = if self.eat_keyword("OFFSET") {
            Some(self.parse_u64("for OFFSET")?)
        } else {
            None
        };

        Ok(SelectStatement {
            projections,
            table,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_update(&mut self) -> Result<Statement, ParseError> {
        let table = self.parse_ident("a table name")?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let path = self.parse_path()?;
            self.expect(&Token::Eq, "`=`")?;
            assignments.push((path, self.parse_expr()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let filter = if self.eat_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Update(UpdateStatement {
            table,
            assignments,
            filter,
        }))
    }

    fn parse_delete(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword("FROM")?;
        let table = self.parse_ident("a table name")?;
        let filter = if self.eat_keyword("WHERE") {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Statement::Delete(DeleteStatement { table, filter }))
    }

    // --- expressions ----------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("OR") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOperator::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("AND") {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(Box::new(lhs), BinaryOperator::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOperator::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOperator::Eq,
                Token::Neq => BinaryOperator::Neq,
                Token::Lt => BinaryOperator::Lt,
                Token::Lte => BinaryOperator::Lte,
                Token::Gt => BinaryOperator::Gt,
                Token::Gte => BinaryOperator::Gte,
                _ => {
                    if self.eat_keyword("IN") {
                        let rhs = self.parse_additive()?;
                        lhs = Expr::In(Box::new(lhs), Box::new(rhs));
                        continue;
                    }
                    if self.eat_keyword("IS") {
                        let negated = self.eat_keyword("NOT");
                        self.expect_keyword("NULL")?;
                        lhs = Expr::IsNull {
                            expr: Box::new(lhs),
                            negated,
                        };
                        continue;
                    }
                    break;
                }
            };
            self.advance();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                Token::Percent => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            // Fold a negated numeric literal.
            return Ok(match inner {
                Expr::Literal(Value::Integer(i)) if i != i64::MIN => {
                    Expr::Literal(Value::Integer(-i))
                }
                Expr::Literal(Value::Double(d)) => Expr::Literal(Value::Double(-d)),
                other => Expr::Unary(UnaryOperator::Neg, Box::new(other)),
            });
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Integer(i) => {
                self.advance();
                Ok(Expr::Literal(Value::Integer(i)))
            }
            Token::Double(d) => {
                self.advance();
                Ok(Expr::Literal(Value::Double(d)))
            }
            Token::String(s) => {
                self.advance();
                Ok(Expr::Literal(Value::Text(s)))
            }
            Token::Positional => {
                self.advance();
                let idx = self.positional;
                self.positional += 1;
                Ok(Expr::Positional(idx))
            }
            Token::Named(name) => {
                self.advance();
                Ok(Expr::Named(name))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                    }
                    self.expect(&Token::RBracket, "`]`")?;
                }
                Ok(Expr::List(items))
            }
            Token::LBrace => self.parse_document_literal(),
            Token::Ident(word) => {
                if word.eq_ignore_ascii_case("TRUE") {
                    self.advance();
                    return Ok(Expr::Literal(Value::Bool(true)));
                }
                if word.eq_ignore_ascii_case("FALSE") {
                    self.advance();
                    return Ok(Expr::Literal(Value::Bool(false)));
                }
                if word.eq_ignore_ascii_case("NULL") {
                    self.advance();
                    return Ok(Expr::Literal(Value::Null));
                }
                if self.tokens[self.at + 1].token == Token::LParen {
                    return self.parse_function(&word);
                }
                Ok(Expr::Path(self.parse_path()?))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn parse_document_literal(&mut self) -> Result<Expr, ParseError> {
        self.expect(&Token::LBrace, "`{`")?;
        let mut fields = Vec::new();
        if !self.eat(&Token::RBrace) {
            loop {
                let name = match self.peek().clone() {
                    Token::Ident(name) => {
                        self.advance();
                        name
                    }
                    Token::String(name) => {
                        self.advance();
                        name
                    }
                    _ => return Err(self.error("expected a field name")),
                };
                self.expect(&Token::Colon, "`:`")?;
                fields.push((name, self.parse_expr()?));
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RBrace, "`}`")?;
        }
        Ok(Expr::DocumentLiteral(fields))
    }

    fn parse_function(&mut self, name: &str) -> Result<Expr, ParseError> {
        let pos = self.pos();
        self.advance(); // name
        self.expect(&Token::LParen, "`(`")?;
        let func = match name.to_ascii_lowercase().as_str() {
            "pk" => Function::Pk,
            "count" => {
                self.expect(&Token::Star, "`*`")?;
                Function::Count
            }
            "sum" => Function::Sum(self.parse_path()?),
            "min" => Function::Min(self.parse_path()?),
            "max" => Function::Max(self.parse_path()?),
            "avg" => Function::Avg(self.parse_path()?),
            other => {
                return Err(ParseError::new(format!("unknown function `{other}`"), pos));
            }
        };
        self.expect(&Token::RParen, "`)`")?;
        Ok(Expr::Call(func))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Statement {
        let mut statements = parse(input).unwrap();
        assert_eq!(statements.len(), 1, "expected one statement");
        statements.pop().unwrap()
    }

    #[test]
    fn create_table_with_fields() {
        let stmt = one(
            "CREATE TABLE IF NOT EXISTS test (foo INTEGER PRIMARY KEY, s.b TEXT NOT NULL, \
             score DOUBLE PRECISION DEFAULT 1.5, tag VARCHAR(64))",
        );
        let Statement::CreateTable {
            name,
            if_not_exists,
            fields,
        } = stmt
        else {
            panic!("expected CREATE TABLE");
        };
        assert_eq!(name, "test");
        assert!(if_not_exists);
        assert_eq!(fields.len(), 4);
        assert!(fields[0].primary_key);
        assert_eq!(fields[0].typ, Some(ValueType::Integer));
        assert_eq!(fields[1].path.to_string(), "s.b");
        assert!(fields[1].not_null);
        assert_eq!(fields[2].default, Some(Expr::Literal(Value::Double(1.5))));
        assert_eq!(fields[3].typ, Some(ValueType::Text));
    }

    #[test]
    fn create_unique_index() {
        let stmt = one("CREATE UNIQUE INDEX idx_a ON test (a.b)");
        assert_eq!(
            stmt,
            Statement::CreateIndex {
                name: "idx_a".into(),
                if_not_exists: false,
                table: "test".into(),
                path: "a.b".into(),
                unique: true,
            }
        );
    }

    #[test]
    fn insert_forms() {
        let stmt = one("INSERT INTO test (a, `foo bar`) VALUES ('c', ?), ('d', $x)");
        let Statement::Insert(insert) = stmt else {
            panic!();
        };
        assert_eq!(insert.fields.as_ref().unwrap()[1].to_string(), "foo bar");
        let InsertSource::Rows(rows) = &insert.source else {
            panic!();
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], Expr::Positional(0));
        assert_eq!(rows[1][1], Expr::Named("x".into()));

        let stmt = one("INSERT INTO test VALUES {a: 'a', b: 2.3, c: 1 = 1}, {d: [1, 2]}");
        let Statement::Insert(insert) = stmt else {
            panic!();
        };
        let InsertSource::Documents(docs) = &insert.source else {
            panic!();
        };
        assert_eq!(docs.len(), 2);

        let stmt = one("INSERT INTO foo SELECT * FROM bar");
        let Statement::Insert(insert) = stmt else {
            panic!();
        };
        assert!(matches!(insert.source, InsertSource::Select(_)));
    }

    #[test]
    fn select_clauses() {
        let stmt = one(
            "SELECT pk(), *, a + 1 FROM test WHERE a >= 2 AND b = 'x' \
             ORDER BY a DESC LIMIT 10 OFFSET 5",
        );
        let Statement::Select(select) = stmt else {
            panic!();
        };
        assert_eq!(select.projections.len(), 3);
        assert!(matches!(
            &select.projections[0],
            Projection::Expr { name, .. } if name == "pk()"
        ));
        assert!(matches!(select.projections[1], Projection::Wildcard));
        assert!(matches!(
            &select.projections[2],
            Projection::Expr { name, .. } if name == "a + 1"
        ));
        assert!(select.filter.is_some());
        let order = select.order_by.unwrap();
        assert_eq!(order.path.to_string(), "a");
        assert!(order.descending);
        assert_eq!(select.limit, Some(10));
        assert_eq!(select.offset, Some(5));
    }

    #[test]
    fn update_and_delete() {
        let stmt = one("UPDATE test SET a.b = a.b + 1, c = NULL WHERE c IS NOT NULL");
        let Statement::Update(update) = stmt else {
            panic!();
        };
        assert_eq!(update.assignments.len(), 2);
        assert!(update.filter.is_some());

        let stmt = one("DELETE FROM test WHERE a IN [1, 2, 3]");
        let Statement::Delete(delete) = stmt else {
            panic!();
        };
        assert!(matches!(delete.filter, Some(Expr::In(_, _))));
    }

    #[test]
    fn reindex_and_transactions() {
        assert_eq!(one("REINDEX"), Statement::ReIndex { target: None });
        assert_eq!(
            one("REINDEX idx_a"),
            Statement::ReIndex {
                target: Some("idx_a".into())
            }
        );
        assert_eq!(one("BEGIN TRANSACTION"), Statement::Begin);
        assert_eq!(one("COMMIT"), Statement::Commit);
        assert_eq!(one("ROLLBACK"), Statement::Rollback);
    }

    #[test]
    fn multiple_statements_share_positional_numbering() {
        let statements = parse("SELECT ? FROM a; SELECT ? FROM b").unwrap();
        let exprs: Vec<_> = statements
            .iter()
            .map(|s| {
                let Statement::Select(s) = s else { panic!() };
                let Projection::Expr { expr, .. } = &s.projections[0] else {
                    panic!()
                };
                expr.clone()
            })
            .collect();
        assert_eq!(exprs, [Expr::Positional(0), Expr::Positional(1)]);
    }

    #[test]
    fn precedence() {
        let Statement::Select(select) = one("SELECT a + b * 2 FROM t") else {
            panic!();
        };
        let Projection::Expr { expr, .. } = &select.projections[0] else {
            panic!();
        };
        assert_eq!(
            expr.to_string(),
            "a + b * 2",
        );
        let Expr::Binary(_, BinaryOperator::Add, rhs) = expr else {
            panic!("expected + at the root, got {expr:?}");
        };
        assert!(matches!(**rhs, Expr::Binary(_, BinaryOperator::Mul, _)));
    }

    #[test]
    fn parse_errors_have_positions() {
        // `FROM` parses as a path, so the error lands on the missing clause.
        let err = parse("SELECT FROM").unwrap_err();
        assert_eq!(err.pos, 11);
        assert!(parse("INSERT INTO t").is_err());
        assert!(parse("CREATE TABLE").is_err());
        assert!(parse("SELECT nosuch(1) FROM t").is_err());
    }
}
