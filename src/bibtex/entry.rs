//! Parsed BibTeX records and their canonical text form.

use std::fmt;

/// One piece of a field value. Pieces are joined with `#` in BibTeX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValuePart {
    /// Text from a `{...}` or `"..."` literal, without its delimiters.
    Literal(String),

    /// A bare number such as `2020`.
    Number(String),

    /// A bare macro name such as `jan`.
    Macro(String),
}

impl fmt::Display for ValuePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePart::Literal(s) => write!(f, "{{{}}}", s),
            ValuePart::Number(s) | ValuePart::Macro(s) => f.write_str(s),
        }
    }
}

/// A field value: one or more concatenated parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub parts: Vec<ValuePart>,
}

impl FieldValue {
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ValuePart::Literal(text.into())],
        }
    }

    /// Returns the value with delimiters removed and parts concatenated.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                ValuePart::Literal(s) | ValuePart::Number(s) | ValuePart::Macro(s) => s.as_str(),
            })
            .collect()
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(" # ")?;
            }
            write!(f, "{}", part)?;
        }
        Ok(())
    }
}

/// A complete BibTeX record.
///
/// The `Display` form is the canonical single-line reconstruction that the
/// store keeps and `SHOW` returns:
///
/// ```
/// use btd::bibtex::{BibtexEntry, FieldValue};
///
/// let entry = BibtexEntry {
///     kind: "article".to_string(),
///     key: "k1".to_string(),
///     fields: vec![("title".to_string(), FieldValue::literal("On Things"))],
/// };
/// assert_eq!(entry.to_string(), "@article{k1, title = {On Things}}");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibtexEntry {
    /// Entry type, lower case (`article`, `book`, ...).
    pub kind: String,

    /// Citation key.
    pub key: String,

    /// Fields in input order; names are lower case.
    pub fields: Vec<(String, FieldValue)>,
}

impl BibtexEntry {
    /// Looks up a field by (lower case) name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

impl fmt::Display for BibtexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}{{{}", self.kind, self.key)?;
        for (name, value) in &self.fields {
            write!(f, ", {} = {}", name, value)?;
        }
        f.write_str("}")
    }
}

/// Required fields per entry type. Inner slices are alternatives: any one
/// of them satisfies the requirement.
pub(crate) fn required_fields(kind: &str) -> Option<&'static [&'static [&'static str]]> {
    let fields: &'static [&'static [&'static str]] = match kind {
        "article" => &[&["author"], &["title"], &["journal"], &["year"]],
        "book" => &[&["author", "editor"], &["title"], &["publisher"], &["year"]],
        "booklet" => &[&["title"]],
        "inbook" => &[
            &["author", "editor"],
            &["title"],
            &["chapter", "pages"],
            &["publisher"],
            &["year"],
        ],
        "incollection" => &[
            &["author"],
            &["title"],
            &["booktitle"],
            &["publisher"],
            &["year"],
        ],
        "inproceedings" | "conference" => &[&["author"], &["title"], &["booktitle"], &["year"]],
        "manual" => &[&["title"]],
        "mastersthesis" | "phdthesis" => &[&["author"], &["title"], &["school"], &["year"]],
        "misc" => &[],
        "proceedings" => &[&["title"], &["year"]],
        "techreport" => &[&["author"], &["title"], &["institution"], &["year"]],
        "unpublished" => &[&["author"], &["title"], &["note"]],
        _ => return None,
    };
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BibtexEntry {
        BibtexEntry {
            kind: "article".to_string(),
            key: "knuth84".to_string(),
            fields: vec![
                ("author".to_string(), FieldValue::literal("Donald {E.} Knuth")),
                (
                    "month".to_string(),
                    FieldValue {
                        parts: vec![
                            ValuePart::Macro("jan".to_string()),
                            ValuePart::Literal("~1".to_string()),
                        ],
                    },
                ),
                (
                    "year".to_string(),
                    FieldValue {
                        parts: vec![ValuePart::Number("1984".to_string())],
                    },
                ),
            ],
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(
            entry().to_string(),
            "@article{knuth84, author = {Donald {E.} Knuth}, month = jan # {~1}, year = 1984}"
        );
    }

    #[test]
    fn test_display_without_fields() {
        let e = BibtexEntry {
            kind: "misc".to_string(),
            key: "x".to_string(),
            fields: vec![],
        };
        assert_eq!(e.to_string(), "@misc{x}");
    }

    #[test]
    fn test_field_lookup() {
        let e = entry();
        assert_eq!(e.field("year").map(FieldValue::text).as_deref(), Some("1984"));
        assert_eq!(e.field("month").map(FieldValue::text).as_deref(), Some("jan~1"));
        assert!(!e.has_field("title"));
    }

    #[test]
    fn test_required_fields() {
        assert!(required_fields("article").is_some());
        assert_eq!(required_fields("misc").map(|r| r.len()), Some(0));
        assert!(required_fields("recipe").is_none());
    }
}
