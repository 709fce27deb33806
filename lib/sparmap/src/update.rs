//! Translation of a [`Transaction`] into SPARQL 1.1 Update text.

use crate::error::StoreError;
use crate::model::{GraphSelector, Position, Transaction, Triple, WILDCARD_IRI};
use std::fmt::Write;
use tracing::debug;

/// Compiles a transaction into a single SPARQL Update request.
///
/// The delete commands always come first, followed by one `INSERT DATA` command.
///
/// ```
/// use sparmap::model::{Transaction, Triple};
/// use sparmap::update::compile_transaction;
///
/// let transaction = Transaction::new()
///     .with_delete_pattern(Triple::new("http://example.com/s", "http://example.com/p", "http://example.com/o1"))
///     .with_insert(Triple::new("http://example.com/s", "http://example.com/p", "http://example.com/o2"));
/// assert_eq!(
///     compile_transaction(&transaction)?,
///     "DELETE DATA {\n  <http://example.com/s> <http://example.com/p> <http://example.com/o1> .\n};\nINSERT DATA {\n  <http://example.com/s> <http://example.com/p> <http://example.com/o2> .\n}\n"
/// );
/// # Result::<_, sparmap::StoreError>::Ok(())
/// ```
pub fn compile_transaction(transaction: &Transaction) -> Result<String, StoreError> {
    if !transaction.existence_preconditions.is_empty() {
        return Err(StoreError::UnsupportedOperation(
            "SPARQL update stores do not support conditional updates".into(),
        ));
    }
    if !transaction.nonexistence_preconditions.is_empty() {
        // Key properties generate these; they are dropped so that plain SPARQL endpoints keep working
        debug!(
            count = transaction.nonexistence_preconditions.len(),
            "ignoring non-existence preconditions"
        );
    }
    for triple in &transaction.inserts {
        validate_insert(triple)?;
    }
    let update_graph = transaction.update_graph.as_deref();
    let mut writer = UpdateWriter::default();
    writer.write_delete_patterns(&transaction.delete_patterns, update_graph);
    writer.write_inserts(&transaction.inserts, update_graph);
    Ok(writer.finish())
}

/// Formats the `INSERT DATA` command for the given triples.
///
/// Triples without an explicit graph go to `default_graph`, or to the store default graph if it is `None`.
pub fn format_inserts(inserts: &[Triple], default_graph: Option<&str>) -> String {
    let mut writer = UpdateWriter::default();
    writer.write_inserts(inserts, default_graph);
    writer.finish()
}

/// Formats the delete commands for the given patterns.
pub fn format_delete_patterns(delete_patterns: &[Triple], update_graph: Option<&str>) -> String {
    let mut writer = UpdateWriter::default();
    writer.write_delete_patterns(delete_patterns, update_graph);
    writer.finish()
}

fn validate_insert(triple: &Triple) -> Result<(), StoreError> {
    let reason = if triple.has_wildcard() {
        "inserted triples can't contain wildcards"
    } else if triple.graph == GraphSelector::Any {
        "inserted triples must target a single graph"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidInsert {
        triple: Box::new(triple.clone()),
        reason,
    })
}

/// Output buffer of one compilation, together with its wildcard variable counter.
#[derive(Default)]
struct UpdateWriter {
    buffer: String,
    next_variable: usize,
}

impl UpdateWriter {
    fn finish(self) -> String {
        self.buffer
    }

    fn write_delete_patterns(&mut self, patterns: &[Triple], update_graph: Option<&str>) {
        let targeted_grounded = patterns
            .iter()
            .filter(|p| p.is_graph_targeted() && p.is_grounded())
            .collect::<Vec<_>>();
        if !targeted_grounded.is_empty() {
            self.buffer.push_str("DELETE DATA {\n");
            for (graph, group) in group_by_graph(&targeted_grounded) {
                // Only named graphs end up in this bucket
                let graph = graph.unwrap_or_default();
                let _ = writeln!(self.buffer, "GRAPH <{graph}> {{");
                for triple in group {
                    write_triple(&mut self.buffer, triple);
                }
                self.buffer.push_str("}\n");
            }
            self.buffer.push_str("};\n");
        }

        for pattern in patterns
            .iter()
            .filter(|p| p.is_graph_targeted() && !p.is_grounded())
        {
            let graph = pattern.graph.as_named().unwrap_or_default();
            let formatted = self.format_delete_pattern(pattern);
            let _ = writeln!(
                self.buffer,
                "WITH <{graph}> DELETE {{{formatted} }} WHERE {{{formatted} }};"
            );
        }

        let untargeted_grounded = patterns
            .iter()
            .filter(|p| !p.is_graph_targeted() && p.is_grounded())
            .collect::<Vec<_>>();
        if !untargeted_grounded.is_empty() {
            self.buffer.push_str("DELETE DATA {\n");
            for triple in &untargeted_grounded {
                write_triple(&mut self.buffer, triple);
            }
            // The triple may live either in the default graph or in the update graph
            if let Some(update_graph) = update_graph {
                let _ = writeln!(self.buffer, "GRAPH <{update_graph}> {{");
                for triple in &untargeted_grounded {
                    write_triple(&mut self.buffer, triple);
                }
                self.buffer.push_str("}\n");
            }
            self.buffer.push_str("};\n");
        }

        for pattern in patterns
            .iter()
            .filter(|p| !p.is_graph_targeted() && !p.is_grounded())
        {
            let formatted = self.format_delete_pattern(pattern);
            let command = format!("DELETE {{{formatted} }} WHERE {{{formatted} }};");
            self.buffer.push_str(&command);
            self.buffer.push('\n');
            if let Some(update_graph) = update_graph {
                let _ = writeln!(self.buffer, "WITH <{update_graph}> {command}");
            }
        }
    }

    fn write_inserts(&mut self, inserts: &[Triple], default_graph: Option<&str>) {
        self.buffer.push_str("INSERT DATA {\n");
        let inserts = inserts.iter().collect::<Vec<_>>();
        for (graph, group) in group_by_graph(&inserts) {
            let target = graph.or(default_graph);
            if let Some(target) = target {
                let _ = writeln!(self.buffer, "GRAPH <{target}> {{");
            }
            for triple in group {
                write_triple(&mut self.buffer, triple);
            }
            if target.is_some() {
                self.buffer.push_str("}\n");
            }
        }
        self.buffer.push_str("}\n");
    }

    /// Formats ` s p o .` with a fresh variable for each wildcard.
    fn format_delete_pattern(&mut self, pattern: &Triple) -> String {
        let subject = self.format_pattern_item(&pattern.subject);
        let predicate = self.format_pattern_item(&pattern.predicate);
        let object = match &pattern.object {
            Position::Concrete(value) if pattern.is_literal => format_literal(
                value,
                pattern.data_type.as_deref(),
                pattern.lang_code.as_deref(),
            ),
            object => self.format_pattern_item(object),
        };
        format!(" {subject} {predicate} {object} .")
    }

    fn format_pattern_item(&mut self, position: &Position) -> String {
        match position {
            Position::Concrete(iri) => format!("<{iri}>"),
            Position::Wildcard => {
                let variable = format!("?d{}", self.next_variable);
                self.next_variable += 1;
                variable
            }
        }
    }
}

/// Groups the triples by their graph, keeping the order of first appearance.
fn group_by_graph<'a>(triples: &[&'a Triple]) -> Vec<(Option<&'a str>, Vec<&'a Triple>)> {
    let mut groups: Vec<(Option<&'a str>, Vec<&'a Triple>)> = Vec::new();
    for triple in triples {
        let key = triple.graph.as_named();
        if let Some((_, group)) = groups.iter_mut().find(|(k, _)| *k == key) {
            group.push(triple);
        } else {
            groups.push((key, vec![triple]));
        }
    }
    groups
}

/// Writes `  <s> <p> o .` followed by a new line.
fn write_triple(buffer: &mut String, triple: &Triple) {
    let _ = write!(
        buffer,
        "  {} {} ",
        format_resource(&triple.subject),
        format_resource(&triple.predicate)
    );
    match &triple.object {
        Position::Concrete(value) if triple.is_literal => buffer.push_str(&format_literal(
            value,
            triple.data_type.as_deref(),
            triple.lang_code.as_deref(),
        )),
        object => buffer.push_str(&format_resource(object)),
    }
    buffer.push_str(" .\n");
}

fn format_resource(position: &Position) -> String {
    format!("<{}>", position.as_concrete().unwrap_or(WILDCARD_IRI))
}

/// Formats a literal: the quoted lexical value, then `^^<data_type>`, then `@lang_code`.
///
/// Both suffixes are written when both are given.
///
/// ```
/// use sparmap::update::format_literal;
///
/// assert_eq!(format_literal("chat", None, Some("fr")), "\"chat\"@fr");
/// assert_eq!(
///     format_literal("1", Some("http://www.w3.org/2001/XMLSchema#integer"), None),
///     "\"1\"^^<http://www.w3.org/2001/XMLSchema#integer>"
/// );
/// assert_eq!(format_literal("say \"hi\"", None, None), "\"say \\\"hi\\\"\"");
/// ```
pub fn format_literal(value: &str, data_type: Option<&str>, lang_code: Option<&str>) -> String {
    let mut output = String::with_capacity(value.len() + 2);
    output.push('"');
    escape_string_into(value, &mut output);
    output.push('"');
    if let Some(data_type) = data_type {
        let _ = write!(output, "^^<{data_type}>");
    }
    if let Some(lang_code) = lang_code {
        output.push('@');
        output.push_str(lang_code);
    }
    output
}

/// Escapes the characters a SPARQL double-quoted string can't contain verbatim.
pub(crate) fn escape_string_into(value: &str, output: &mut String) {
    for c in value.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c => output.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: &str = "http://example.com/s1";
    const S2: &str = "http://example.com/s2";
    const P1: &str = "http://example.com/p1";
    const P2: &str = "http://example.com/p2";
    const O1: &str = "http://example.com/o1";
    const O2: &str = "http://example.com/o2";
    const G1: &str = "http://example.com/g1";
    const G2: &str = "http://example.com/g2";
    const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";

    #[test]
    fn literal_suffixes() {
        assert_eq!(format_literal("v", None, None), "\"v\"");
        assert_eq!(
            format_literal("5", Some(XSD_INTEGER), None),
            format!("\"5\"^^<{XSD_INTEGER}>")
        );
        assert_eq!(format_literal("v", None, Some("en-GB")), "\"v\"@en-GB");
        assert_eq!(
            format_literal("v", Some(XSD_INTEGER), Some("en")),
            format!("\"v\"^^<{XSD_INTEGER}>@en")
        );
    }

    #[test]
    fn literal_escaping() {
        assert_eq!(
            format_literal("a\\b \"c\"\nd\re\tf", None, None),
            "\"a\\\\b \\\"c\\\"\\nd\\re\\tf\""
        );
    }

    #[test]
    fn replace_single_value() {
        let transaction = Transaction::new()
            .with_delete_pattern(Triple::new("S1", "P1", "O1"))
            .with_insert(Triple::new("S1", "P1", "O2"));
        assert_eq!(
            compile_transaction(&transaction).unwrap(),
            "DELETE DATA {\n  <S1> <P1> <O1> .\n};\nINSERT DATA {\n  <S1> <P1> <O2> .\n}\n"
        );
    }

    #[test]
    fn existence_preconditions_are_rejected() {
        let transaction =
            Transaction::new().with_existence_precondition(Triple::new(S1, P1, O1));
        assert!(matches!(
            compile_transaction(&transaction),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn nonexistence_preconditions_are_ignored() {
        let transaction = Transaction::new()
            .with_nonexistence_precondition(Triple::new(S1, P1, Position::Wildcard))
            .with_insert(Triple::new(S1, P1, O1));
        assert_eq!(
            compile_transaction(&transaction).unwrap(),
            format!("INSERT DATA {{\n  <{S1}> <{P1}> <{O1}> .\n}}\n")
        );
    }

    #[test]
    fn wildcard_inserts_are_rejected() {
        let transaction = Transaction::new().with_insert(Triple::new(S1, Position::Wildcard, O1));
        assert!(matches!(
            compile_transaction(&transaction),
            Err(StoreError::InvalidInsert { .. })
        ));
        let transaction = Transaction::new().with_insert(Triple::new(S1, P1, O1).in_any_graph());
        assert!(matches!(
            compile_transaction(&transaction),
            Err(StoreError::InvalidInsert { .. })
        ));
    }

    #[test]
    fn each_delete_bucket_has_its_own_fragment() {
        let patterns = [
            Triple::new(S1, P1, O1).in_graph(G1),
            Triple::new(S1, P2, Position::Wildcard).in_graph(G2),
            Triple::new(S2, P1, O2),
            Triple::new(S2, Position::Wildcard, Position::Wildcard),
        ];
        assert_eq!(
            format_delete_patterns(&patterns, None),
            format!(
                "DELETE DATA {{\nGRAPH <{G1}> {{\n  <{S1}> <{P1}> <{O1}> .\n}}\n}};\n\
                 WITH <{G2}> DELETE {{ <{S1}> <{P2}> ?d0 . }} WHERE {{ <{S1}> <{P2}> ?d0 . }};\n\
                 DELETE DATA {{\n  <{S2}> <{P1}> <{O2}> .\n}};\n\
                 DELETE {{ <{S2}> ?d1 ?d2 . }} WHERE {{ <{S2}> ?d1 ?d2 . }};\n"
            )
        );
    }

    #[test]
    fn targeted_grounded_deletes_are_grouped_by_graph() {
        let patterns = [
            Triple::new(S1, P1, O1).in_graph(G1),
            Triple::new(S1, P1, O1).in_graph(G2),
            Triple::new(S2, P2, O2).in_graph(G1),
        ];
        assert_eq!(
            format_delete_patterns(&patterns, Some("http://example.com/update")),
            format!(
                "DELETE DATA {{\n\
                 GRAPH <{G1}> {{\n  <{S1}> <{P1}> <{O1}> .\n  <{S2}> <{P2}> <{O2}> .\n}}\n\
                 GRAPH <{G2}> {{\n  <{S1}> <{P1}> <{O1}> .\n}}\n\
                 }};\n"
            )
        );
    }

    #[test]
    fn untargeted_deletes_also_apply_to_update_graph() {
        let update_graph = "http://example.com/update";
        let patterns = [
            Triple::new(S1, P1, O1),
            Triple::new(S1, P2, Position::Wildcard),
        ];
        assert_eq!(
            format_delete_patterns(&patterns, Some(update_graph)),
            format!(
                "DELETE DATA {{\n  <{S1}> <{P1}> <{O1}> .\nGRAPH <{update_graph}> {{\n  <{S1}> <{P1}> <{O1}> .\n}}\n}};\n\
                 DELETE {{ <{S1}> <{P2}> ?d0 . }} WHERE {{ <{S1}> <{P2}> ?d0 . }};\n\
                 WITH <{update_graph}> DELETE {{ <{S1}> <{P2}> ?d0 . }} WHERE {{ <{S1}> <{P2}> ?d0 . }};\n"
            )
        );
    }

    #[test]
    fn any_graph_patterns_are_untargeted() {
        let patterns = [Triple::new(S1, P1, Position::Wildcard).in_any_graph()];
        assert_eq!(
            format_delete_patterns(&patterns, None),
            format!("DELETE {{ <{S1}> <{P1}> ?d0 . }} WHERE {{ <{S1}> <{P1}> ?d0 . }};\n")
        );
    }

    #[test]
    fn wildcard_subject_counts_as_grounded() {
        let patterns = [Triple::new(Position::Wildcard, P1, O1)];
        assert_eq!(
            format_delete_patterns(&patterns, None),
            format!("DELETE DATA {{\n  <{WILDCARD_IRI}> <{P1}> <{O1}> .\n}};\n")
        );
    }

    #[test]
    fn wildcard_variables_never_collide() {
        let patterns = [
            Triple::new(S1, Position::Wildcard, Position::Wildcard),
            Triple::new(S2, P1, Position::Wildcard).in_graph(G1),
            Triple::new(Position::Wildcard, P2, Position::Wildcard),
            Triple::new(S1, Position::Wildcard, Position::Wildcard).in_graph(G2),
        ];
        let output = format_delete_patterns(&patterns, None);
        for i in 0..7 {
            assert!(output.contains(&format!("?d{i} ")), "?d{i} missing in {output}");
        }
        assert!(!output.contains("?d7"));
        // Each statement reuses its own variables in DELETE and WHERE only
        for statement in output.lines() {
            let variables = statement
                .split_whitespace()
                .filter(|t| t.starts_with("?d"))
                .collect::<Vec<_>>();
            let (delete, r#where) = variables.split_at(variables.len() / 2);
            assert_eq!(delete, r#where);
        }
    }

    #[test]
    fn literal_delete_patterns() {
        let patterns = [
            Triple::literal(S1, P1, "Alice").with_lang_code("en"),
            Triple::literal(S1, Position::Wildcard, "42").with_data_type(XSD_INTEGER),
        ];
        assert_eq!(
            format_delete_patterns(&patterns, None),
            format!(
                "DELETE DATA {{\n  <{S1}> <{P1}> \"Alice\"@en .\n}};\n\
                 DELETE {{ <{S1}> ?d0 \"42\"^^<{XSD_INTEGER}> . }} WHERE {{ <{S1}> ?d0 \"42\"^^<{XSD_INTEGER}> . }};\n"
            )
        );
    }

    #[test]
    fn inserts_are_grouped_by_graph() {
        let inserts = [
            Triple::new(S1, P1, O1),
            Triple::new(S1, P1, O2).in_graph(G1),
            Triple::literal(S2, P2, "x"),
        ];
        assert_eq!(
            format_inserts(&inserts, None),
            format!(
                "INSERT DATA {{\n  <{S1}> <{P1}> <{O1}> .\n  <{S2}> <{P2}> \"x\" .\n\
                 GRAPH <{G1}> {{\n  <{S1}> <{P1}> <{O2}> .\n}}\n}}\n"
            )
        );
        assert_eq!(
            format_inserts(&inserts, Some(G2)),
            format!(
                "INSERT DATA {{\nGRAPH <{G2}> {{\n  <{S1}> <{P1}> <{O1}> .\n  <{S2}> <{P2}> \"x\" .\n}}\n\
                 GRAPH <{G1}> {{\n  <{S1}> <{P1}> <{O2}> .\n}}\n}}\n"
            )
        );
    }

    #[test]
    fn inserts_formatting_is_deterministic() {
        let inserts = [
            Triple::new(S1, P1, O1).in_graph(G2),
            Triple::new(S2, P1, O1).in_graph(G1),
            Triple::literal(S1, P2, "v").with_data_type(XSD_INTEGER),
            Triple::new(S1, P2, O2).in_graph(G2),
        ];
        assert_eq!(format_inserts(&inserts, Some(G1)), format_inserts(&inserts, Some(G1)));
    }

    #[test]
    fn empty_transaction_only_inserts_nothing() {
        assert_eq!(
            compile_transaction(&Transaction::new()).unwrap(),
            "INSERT DATA {\n}\n"
        );
    }
}
