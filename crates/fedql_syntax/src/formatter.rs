//! Canonical formatting for parsed queries.
//!
//! The formatter emits one block per line group with indented qualifiers.
//! Formatting is canonical: formatting the parse of formatted output yields
//! the same text, and reparsing formatted output yields an equivalent query.

use crate::ast::*;
use fedql_core::{ChainLink, Value};

/// Code formatter for query documents.
#[derive(Debug, Default)]
pub struct Formatter {
    output: String,
}

/// Formats a document with the canonical style.
#[must_use]
pub fn format_document(document: &QueryDocument) -> String {
    Formatter::default().format(document)
}

impl Formatter {
    /// Formats a document.
    pub fn format(mut self, document: &QueryDocument) -> String {
        for use_clause in &document.uses {
            self.format_use(use_clause);
            self.output.push('\n');
        }

        for (i, block) in document.blocks.iter().enumerate() {
            if i > 0 || !document.uses.is_empty() {
                self.output.push('\n');
            }
            self.format_block(block);
        }

        self.output
    }

    fn format_use(&mut self, use_clause: &UseClause) {
        self.output.push_str("use ");
        self.output.push_str(use_clause.key.as_str());
        self.output.push(' ');
        match &use_clause.value {
            UseValue::Int(i) => self.output.push_str(&i.to_string()),
            UseValue::String(s) => {
                self.output.push('"');
                self.output.push_str(s);
                self.output.push('"');
            }
        }
    }

    fn format_block(&mut self, block: &Block) {
        self.output.push_str(block.method.as_str());
        self.output.push(' ');
        self.output.push_str(&block.resource);

        if let Some(alias) = &block.alias {
            self.output.push_str(" as ");
            self.output.push_str(alias);
        }

        if !block.in_path.is_empty() {
            self.output.push_str(" in ");
            self.output.push_str(&block.in_path.join("."));
        }
        self.output.push('\n');

        for qualifier in &block.qualifiers {
            self.output.push_str("  ");
            self.format_qualifier(qualifier);
            self.output.push('\n');
        }
    }

    fn format_qualifier(&mut self, qualifier: &Qualifier) {
        match qualifier {
            Qualifier::With(with) => self.format_with(with),
            Qualifier::Only(filters) => self.format_only(filters),
            Qualifier::Headers(items) => self.format_headers(items),
            Qualifier::Hidden => self.output.push_str("hidden"),
            Qualifier::IgnoreErrors => self.output.push_str("ignore-errors"),
            Qualifier::Timeout(v) => {
                self.output.push_str("timeout ");
                self.format_var_or_int(v);
            }
            Qualifier::MaxAge(v) => {
                self.output.push_str("max-age ");
                self.format_var_or_int(v);
            }
            Qualifier::SMaxAge(v) => {
                self.output.push_str("s-max-age ");
                self.format_var_or_int(v);
            }
        }
    }

    fn format_with(&mut self, with: &WithQualifier) {
        self.output.push_str("with ");

        let mut first = true;
        if let Some(body) = &with.body {
            self.output.push('$');
            self.output.push_str(&body.target);
            self.format_encoder(body.encoder);
            first = false;
        }

        for item in &with.items {
            if !first {
                self.output.push_str(", ");
            }
            first = false;
            self.output.push_str(&item.key.join("."));
            self.output.push_str(" = ");
            self.format_value(&item.value);
            self.format_encoder(item.encoder);
        }
    }

    fn format_encoder(&mut self, encoder: Option<Encoder>) {
        if let Some(encoder) = encoder {
            self.output.push_str(" -> ");
            self.output.push_str(encoder.as_str());
        }
    }

    fn format_only(&mut self, filters: &[FilterItem]) {
        self.output.push_str("only ");
        for (i, filter) in filters.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(&filter.path.join("."));
            if let Some(pattern) = &filter.matches {
                self.output.push_str(" -> matches(\"");
                self.output.push_str(pattern);
                self.output.push_str("\")");
            }
        }
    }

    fn format_headers(&mut self, items: &[HeaderItem]) {
        self.output.push_str("headers ");
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.output.push_str(", ");
            }
            self.output.push_str(&item.name);
            self.output.push_str(" = ");
            match &item.value {
                HeaderValue::Literal(s) => {
                    self.output.push('"');
                    self.output.push_str(s);
                    self.output.push('"');
                }
                HeaderValue::Variable(v) => {
                    self.output.push('$');
                    self.output.push_str(v);
                }
            }
        }
    }

    fn format_var_or_int(&mut self, value: &VarOrInt) {
        match value {
            VarOrInt::Int(i) => self.output.push_str(&i.to_string()),
            VarOrInt::Variable(v) => {
                self.output.push('$');
                self.output.push_str(v);
            }
        }
    }

    fn format_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.output.push_str("null"),
            Value::Bool(b) => self.output.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => self.output.push_str(&i.to_string()),
            Value::Float(f) => {
                // Keep the decimal point so the literal re-lexes as a float.
                if f.fract() == 0.0 && f.is_finite() {
                    self.output.push_str(&format!("{f:.1}"));
                } else {
                    self.output.push_str(&f.to_string());
                }
            }
            Value::String(s) => {
                self.output.push('"');
                self.output.push_str(s);
                self.output.push('"');
            }
            Value::List(items) => {
                self.output.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    self.format_value(item);
                }
                self.output.push(']');
            }
            Value::Object(entries) => {
                self.output.push('{');
                for (i, (key, entry)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.output.push_str(", ");
                    }
                    if is_plain_key(key) {
                        self.output.push_str(key);
                    } else {
                        self.output.push('"');
                        self.output.push_str(key);
                        self.output.push('"');
                    }
                    self.output.push_str(": ");
                    self.format_value(entry);
                }
                self.output.push('}');
            }
            Value::Variable(name) => {
                self.output.push('$');
                self.output.push_str(name);
            }
            Value::Chain(links) => {
                for (i, link) in links.iter().enumerate() {
                    if i > 0 {
                        self.output.push('.');
                    }
                    match link {
                        ChainLink::Key(k) => self.output.push_str(k),
                        ChainLink::Var(v) => {
                            self.output.push('$');
                            self.output.push_str(v);
                        }
                    }
                }
            }
        }
    }
}

/// True if a key lexes as a bare identifier.
fn is_plain_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    fn roundtrip(source: &str) -> String {
        let doc = parse_query(source).expect("source must parse");
        format_document(&doc)
    }

    #[test]
    fn test_format_is_idempotent() {
        let sources = [
            "from hero",
            "use max-age 600\nuse timeout 50\nfrom hero as h in a.b",
            r#"from hero with id = [1, 2], name = "A" -> base64 only name, id"#,
            "from sidekick with id = hero.sidekickId timeout 100 hidden ignore-errors",
            r#"to hero with $payload -> json headers Authorization = "t" X-Id = $id"#,
        ];

        for source in sources {
            let once = roundtrip(source);
            let twice = roundtrip(&once);
            assert_eq!(once, twice, "formatting not canonical for: {source}");
        }
    }

    #[test]
    fn test_float_keeps_decimal_point() {
        let formatted = roundtrip("from hero with score = 2.0");
        assert!(formatted.contains("2.0"), "got: {formatted}");
    }

    #[test]
    fn test_matches_filter_formats() {
        let formatted = roundtrip(r#"from hero only stats.health -> matches("\d+")"#);
        assert!(formatted.contains(r#"matches("\d+")"#), "got: {formatted}");
    }
}
