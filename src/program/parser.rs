//! Recursive-descent parser for rule text.
//!
//! Grammar:
//!
//! ```text
//! layer      := statement* EOF
//! statement  := decl | clause
//! decl       := 'Decl' IDENT '(' [VAR (',' VAR)*] ')' ['bound' '[' NAME (',' NAME)* ']'] ['exclusive'] '.'
//! clause     := ['@' 'priority' '(' INT ')'] atom [':-' item (',' item)*] '.'
//! item       := atom | term cmp term
//! atom       := IDENT '(' [term (',' term)*] ')'
//! term       := VAR | '_' | NAME | STRING | INT | FLOAT
//! ```
//!
//! Failures are reported in the `mismatched input '<tok>' expecting <what>`
//! form and abort the parse.

use crate::fact::{Fact, Value};
use crate::provenance::Provenance;

use super::ast::{
    ArgType, Atom, BodyItem, Clause, CompareOp, Comparison, Layer, Position, PredicateDecl,
    Statement, Term,
};
use super::error::{DiagnosticCode, SourceDiagnostic};
use super::lexer::{Token, TokenKind, tokenize};

type ParseResult<T> = std::result::Result<T, SourceDiagnostic>;

/// Parse a whole layer.
pub fn parse_layer(text: &str, layer: Layer) -> ParseResult<Vec<Statement>> {
    let mut parser = Parser::new(text, layer)?;
    parser.statements()
}

/// Parse a hot-load candidate: exactly one clause, no declarations.
pub fn parse_candidate(text: &str) -> ParseResult<Clause> {
    let mut parser = Parser::new(text, Layer::Learned)?;
    let eof = parser.eof_position();
    let statements = parser.statements()?;

    let mut clauses = Vec::with_capacity(1);
    for statement in statements {
        match statement {
            Statement::Decl(decl) => {
                return Err(SourceDiagnostic::semantic(
                    Layer::Learned,
                    decl.position,
                    DiagnosticCode::DeclarationNotAllowed,
                    format!(
                        "declaration of '{}' is not allowed in a learned rule",
                        decl.name
                    ),
                ));
            }
            Statement::Clause(clause) => clauses.push(clause),
        }
    }

    match clauses.len() {
        0 => Err(SourceDiagnostic::syntax(
            Layer::Learned,
            eof,
            "IDENT",
            "mismatched input '<EOF>' expecting IDENT",
        )),
        1 => Ok(clauses.remove(0)),
        n => Err(SourceDiagnostic::semantic(
            Layer::Learned,
            clauses[1].position,
            DiagnosticCode::CandidateShape,
            format!("candidate must contain exactly one clause, found {n}"),
        )),
    }
}

/// Parse a fact-only text (e.g. a session profile) into session facts.
pub fn parse_facts(text: &str) -> ParseResult<Vec<Fact>> {
    let mut parser = Parser::new(text, Layer::Session)?;
    let statements = parser.statements()?;

    let mut facts = Vec::with_capacity(statements.len());
    for statement in statements {
        let clause = match statement {
            Statement::Clause(clause) => clause,
            Statement::Decl(decl) => {
                return Err(SourceDiagnostic::semantic(
                    Layer::Session,
                    decl.position,
                    DiagnosticCode::DeclarationNotAllowed,
                    format!("declaration of '{}' is not allowed in a fact file", decl.name),
                ));
            }
        };
        if !clause.is_fact() {
            return Err(SourceDiagnostic::syntax(
                Layer::Session,
                clause.position,
                "'.'",
                format!("rule for '{}' found where only facts are allowed", clause.head.predicate),
            ));
        }
        facts.push(ground_fact(&clause.head, Layer::Session)?);
    }
    Ok(facts)
}

/// Convert a ground atom into a fact.
pub(crate) fn ground_fact(atom: &Atom, layer: Layer) -> ParseResult<Fact> {
    let mut args = Vec::with_capacity(atom.args.len());
    for term in &atom.args {
        match term {
            Term::Const(value) => args.push(value.clone()),
            Term::Var(_) | Term::Wildcard => {
                return Err(SourceDiagnostic::semantic(
                    layer,
                    atom.position,
                    DiagnosticCode::UnboundVariable,
                    format!("fact '{atom}' must not contain variables"),
                ));
            }
        }
    }
    Ok(Fact::new(atom.predicate.clone(), args).with_provenance(Provenance::for_layer(layer)))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    layer: Layer,
}

impl Parser {
    fn new(text: &str, layer: Layer) -> ParseResult<Self> {
        Ok(Self {
            tokens: tokenize(text, layer)?,
            pos: 0,
            layer,
        })
    }

    fn eof_position(&self) -> Position {
        self.tokens
            .last()
            .map(|t| t.position)
            .unwrap_or_else(|| Position::new(1, 0))
    }

    fn peek(&self) -> &Token {
        // The token stream always ends in Eof and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(word) if word == keyword)
    }

    fn mismatched(&self, expected: &str) -> SourceDiagnostic {
        let token = self.peek();
        SourceDiagnostic::syntax(
            self.layer,
            token.position,
            expected,
            format!(
                "mismatched input {} expecting {expected}",
                token.display_text()
            ),
        )
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.mismatched(expected))
        }
    }

    fn statements(&mut self) -> ParseResult<Vec<Statement>> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            let statement = if self.check(&TokenKind::Decl) {
                Statement::Decl(self.decl()?)
            } else {
                Statement::Clause(self.clause()?)
            };
            statements.push(statement);
        }
        Ok(statements)
    }

    fn decl(&mut self) -> ParseResult<PredicateDecl> {
        let position = self.advance().position;
        let name = match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            _ => return Err(self.mismatched("IDENT")),
        };

        self.expect(TokenKind::LParen, "'('")?;
        let mut arg_names = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                match self.peek().kind.clone() {
                    TokenKind::Variable(v) => {
                        self.advance();
                        arg_names.push(v);
                    }
                    _ => return Err(self.mismatched("VARIABLE")),
                }
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "{',', ')'}")?;

        let arg_types = if self.check_keyword("bound") {
            let bound_at = self.advance().position;
            let types = self.bound_list()?;
            if types.len() != arg_names.len() {
                return Err(SourceDiagnostic::semantic(
                    self.layer,
                    bound_at,
                    DiagnosticCode::ArityMismatch,
                    format!(
                        "bound list of '{name}' has {} types for {} arguments",
                        types.len(),
                        arg_names.len()
                    ),
                ));
            }
            types
        } else {
            vec![ArgType::Any; arg_names.len()]
        };

        let exclusive = if self.check_keyword("exclusive") {
            self.advance();
            true
        } else {
            false
        };

        self.expect(TokenKind::Dot, "'.'")?;
        Ok(PredicateDecl {
            name,
            arg_names,
            arg_types,
            exclusive,
            layer: self.layer,
            position,
        })
    }

    fn bound_list(&mut self) -> ParseResult<Vec<ArgType>> {
        self.expect(TokenKind::LBracket, "'['")?;
        let mut types = Vec::new();
        if !self.check(&TokenKind::RBracket) {
            loop {
                let token = self.peek().clone();
                match &token.kind {
                    TokenKind::Name(n) => match ArgType::from_constant(n) {
                        Some(t) => {
                            self.advance();
                            types.push(t);
                        }
                        None => {
                            return Err(SourceDiagnostic::syntax(
                                self.layer,
                                token.position,
                                "type constant",
                                format!(
                                    "unknown type '{n}', expecting one of /any, /name, /string, /number, /float"
                                ),
                            ));
                        }
                    },
                    _ => return Err(self.mismatched("type constant")),
                }
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RBracket, "{',', ']'}")?;
        Ok(types)
    }

    fn clause(&mut self) -> ParseResult<Clause> {
        let position = self.peek().position;
        let mut priority = 0;
        if self.check(&TokenKind::At) {
            self.advance();
            if !self.check_keyword("priority") {
                return Err(self.mismatched("'priority'"));
            }
            self.advance();
            self.expect(TokenKind::LParen, "'('")?;
            priority = match self.peek().kind {
                TokenKind::Int(n) => n,
                _ => return Err(self.mismatched("INT")),
            };
            self.advance();
            self.expect(TokenKind::RParen, "')'")?;
        }

        let head = self.atom()?;
        let mut body = Vec::new();
        if self.check(&TokenKind::Implies) {
            self.advance();
            loop {
                body.push(self.body_item()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(TokenKind::Dot, "{',', '.'}")?;
        } else {
            self.expect(TokenKind::Dot, "{'.', ':-'}")?;
        }

        Ok(Clause {
            head,
            body,
            priority,
            layer: self.layer,
            position,
        })
    }

    fn atom(&mut self) -> ParseResult<Atom> {
        let token = self.peek().clone();
        let predicate = match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                name
            }
            _ => return Err(self.mismatched("IDENT")),
        };

        self.expect(TokenKind::LParen, "'('")?;
        let mut args = Vec::new();
        if self.check(&TokenKind::RParen) {
            self.advance();
        } else {
            loop {
                args.push(self.term()?);
                if self.check(&TokenKind::Comma) {
                    self.advance();
                } else if self.check(&TokenKind::RParen) {
                    self.advance();
                    break;
                } else {
                    return Err(self.mismatched("{',', ')'}"));
                }
            }
        }

        Ok(Atom {
            predicate,
            args,
            position: token.position,
        })
    }

    fn body_item(&mut self) -> ParseResult<BodyItem> {
        let kind = self.peek().kind.clone();
        match kind {
            TokenKind::Ident(_) => self.atom().map(BodyItem::Atom),
            ref k if k.starts_term() => self.comparison().map(BodyItem::Compare),
            // Input cut off after `:-` or `,`: report the argument list the
            // missing atom needs.
            TokenKind::Eof => Err(self.mismatched("'('")),
            _ => Err(self.mismatched("IDENT")),
        }
    }

    fn comparison(&mut self) -> ParseResult<Comparison> {
        let position = self.peek().position;
        let left = self.term()?;
        let op = match self.peek().kind {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            _ => return Err(self.mismatched("comparison operator")),
        };
        self.advance();
        let right = self.term()?;
        Ok(Comparison {
            op,
            left,
            right,
            position,
        })
    }

    fn term(&mut self) -> ParseResult<Term> {
        let term = match &self.peek().kind {
            TokenKind::Variable(v) => Term::Var(v.clone()),
            TokenKind::Wildcard => Term::Wildcard,
            TokenKind::Name(n) => Term::Const(Value::Name(n.clone())),
            TokenKind::Str(s) => Term::Const(Value::Str(s.clone())),
            TokenKind::Int(i) => Term::Const(Value::Int(*i)),
            TokenKind::Float(x) => Term::Const(Value::Float(*x)),
            _ => return Err(self.mismatched("term")),
        };
        self.advance();
        Ok(term)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_clause(text: &str) -> Clause {
        match parse_layer(text, Layer::Policy).unwrap().remove(0) {
            Statement::Clause(c) => c,
            Statement::Decl(d) => panic!("expected clause, got {d:?}"),
        }
    }

    #[test]
    fn parses_declaration() {
        let statements =
            parse_layer("Decl next_action(A) bound [/name] exclusive.", Layer::Schema).unwrap();
        let Statement::Decl(decl) = &statements[0] else {
            panic!("expected declaration");
        };
        assert_eq!(decl.name, "next_action");
        assert_eq!(decl.arg_types, vec![ArgType::Name]);
        assert!(decl.exclusive);
        assert_eq!(decl.layer, Layer::Schema);
    }

    #[test]
    fn declaration_without_bound_is_any() {
        let statements = parse_layer("Decl edge(From, To).", Layer::Schema).unwrap();
        let Statement::Decl(decl) = &statements[0] else {
            panic!("expected declaration");
        };
        assert_eq!(decl.arg_types, vec![ArgType::Any, ArgType::Any]);
        assert!(!decl.exclusive);
    }

    #[test]
    fn parses_rule_with_priority_and_comparison() {
        let clause =
            one_clause("@priority(-2) big(F) :- file_size(F, N), N >= 1000, F != \"tmp\".");
        assert_eq!(clause.priority, -2);
        assert_eq!(clause.body.len(), 3);
        assert_eq!(clause.body_atoms().count(), 1);
        assert_eq!(clause.comparisons().count(), 2);
    }

    #[test]
    fn parses_zero_arity_and_fact() {
        let clause = one_clause("ready().");
        assert!(clause.is_fact());
        assert!(clause.head.args.is_empty());
    }

    #[test]
    fn truncated_body_reports_missing_argument_list() {
        let err = parse_layer("is_safe(X) :- ", Layer::Learned).unwrap_err();
        assert_eq!(err.to_string(), "1:14 mismatched input '<EOF>' expecting '('");
        assert_eq!(err.expected.as_deref(), Some("'('"));
    }

    #[test]
    fn missing_terminator() {
        let err = parse_layer("a(1)\nb(2).", Layer::Policy).unwrap_err();
        assert_eq!(err.to_string(), "2:0 mismatched input 'b' expecting {'.', ':-'}");
    }

    #[test]
    fn bound_arity_mismatch_is_semantic() {
        let err = parse_layer("Decl p(A, B) bound [/name].", Layer::Schema).unwrap_err();
        assert_eq!(err.code, DiagnosticCode::ArityMismatch);
    }

    #[test]
    fn unknown_type_constant() {
        let err = parse_layer("Decl p(A) bound [/date].", Layer::Schema).unwrap_err();
        assert!(err.message.starts_with("unknown type '/date'"));
    }

    #[test]
    fn candidate_rules() {
        assert!(parse_candidate("is_safe(X) :- has_flag(X, /reviewed).").is_ok());

        let empty = parse_candidate("").unwrap_err();
        assert_eq!(empty.to_string(), "1:0 mismatched input '<EOF>' expecting IDENT");
        assert!(empty.code.is_syntax());

        let two = parse_candidate("a(1). b(2).").unwrap_err();
        assert_eq!(two.code, DiagnosticCode::CandidateShape);

        let decl = parse_candidate("Decl x(A).").unwrap_err();
        assert_eq!(decl.code, DiagnosticCode::DeclarationNotAllowed);
    }

    #[test]
    fn fact_files() {
        let facts = parse_facts("# profile\nuser_pref(/style, \"terse\").\nbudget(5).").unwrap();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0].provenance, Provenance::Session);
        assert_eq!(facts[1].args, vec![Value::Int(5)]);

        let err = parse_facts("a(X).").unwrap_err();
        assert_eq!(err.code, DiagnosticCode::UnboundVariable);

        let err = parse_facts("a(1) :- b(1).").unwrap_err();
        assert!(err.code.is_syntax());
    }
}
