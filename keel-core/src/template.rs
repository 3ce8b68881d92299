//! `${{ ... }}` templates
//!
//! Step env values and action inputs may reference secrets, environment
//! variables and fields of the triggering event:
//!
//! ```text
//! ${{ secrets.REGISTRY_TOKEN }}
//! ${{ env.IMAGE }}:${{ event.sha }}
//! ```
//!
//! Templates are parsed once when the definition is loaded and rendered per
//! step by the runner.

use std::fmt;
use thiserror::Error;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated '${{{{' expression")]
    Unterminated,

    #[error("empty expression")]
    Empty,

    #[error("unknown context '{0}' (expected secrets, env or event)")]
    UnknownContext(String),

    #[error("invalid name '{0}'")]
    InvalidName(String),

    #[error("unknown event field '{0}'")]
    UnknownEventField(String),

    #[error("'{0}' could not be resolved")]
    Unresolved(String),
}

/// Field of the triggering event usable in templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Kind,
    Ref,
    Branch,
    Tag,
    Sha,
    Repository,
}

impl EventField {
    fn parse(name: &str) -> Result<Self, TemplateError> {
        match name {
            "kind" => Ok(EventField::Kind),
            "ref" => Ok(EventField::Ref),
            "branch" => Ok(EventField::Branch),
            "tag" => Ok(EventField::Tag),
            "sha" => Ok(EventField::Sha),
            "repository" => Ok(EventField::Repository),
            other => Err(TemplateError::UnknownEventField(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventField::Kind => "kind",
            EventField::Ref => "ref",
            EventField::Branch => "branch",
            EventField::Tag => "tag",
            EventField::Sha => "sha",
            EventField::Repository => "repository",
        }
    }
}

/// What an expression points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Secret(String),
    Env(String),
    Event(EventField),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Secret(name) => write!(f, "secrets.{}", name),
            Reference::Env(name) => write!(f, "env.{}", name),
            Reference::Event(field) => write!(f, "event.{}", field.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Expr(Reference),
}

/// A parsed template string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or(TemplateError::Unterminated)?;
            segments.push(Segment::Expr(parse_expression(&after_open[..end])?));

            rest = &after_open[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self { segments })
    }

    /// All references in order of appearance
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Expr(reference) => Some(reference),
            Segment::Literal(_) => None,
        })
    }

    /// Names of the secrets this template references
    pub fn secrets(&self) -> impl Iterator<Item = &str> {
        self.references().filter_map(|reference| match reference {
            Reference::Secret(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.references().next().is_none()
    }

    /// Renders the template, asking `resolve` for every reference
    ///
    /// Fails on the first reference `resolve` cannot answer.
    pub fn render<F>(&self, mut resolve: F) -> Result<String, TemplateError>
    where
        F: FnMut(&Reference) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(reference) => {
                    let value = resolve(reference)
                        .ok_or_else(|| TemplateError::Unresolved(reference.to_string()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

fn parse_expression(expr: &str) -> Result<Reference, TemplateError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(TemplateError::Empty);
    }

    let (context, name) = expr
        .split_once('.')
        .ok_or_else(|| TemplateError::UnknownContext(expr.to_string()))?;

    match context {
        "secrets" => Ok(Reference::Secret(valid_name(name)?)),
        "env" => Ok(Reference::Env(valid_name(name)?)),
        "event" => Ok(Reference::Event(EventField::parse(name)?)),
        other => Err(TemplateError::UnknownContext(other.to_string())),
    }
}

fn valid_name(name: &str) -> Result<String, TemplateError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        _ => false,
    };

    if valid {
        Ok(name.to_string())
    } else {
        Err(TemplateError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_template() {
        let template = Template::parse("docker build .").unwrap();
        assert!(template.is_literal());
        assert_eq!(template.render(|_| None).unwrap(), "docker build .");
    }

    #[test]
    fn test_mixed_template() {
        let template = Template::parse("${{ env.IMAGE }}:${{event.sha}}-x").unwrap();
        let refs: Vec<_> = template.references().cloned().collect();
        assert_eq!(
            refs,
            vec![
                Reference::Env("IMAGE".to_string()),
                Reference::Event(EventField::Sha)
            ]
        );

        let rendered = template
            .render(|reference| match reference {
                Reference::Env(_) => Some("quay.io/org/img".to_string()),
                Reference::Event(EventField::Sha) => Some("abc123".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(rendered, "quay.io/org/img:abc123-x");
    }

    #[test]
    fn test_secret_references() {
        let template = Template::parse("${{ secrets.TOKEN }} ${{ secrets.OTHER_ONE }}").unwrap();
        let secrets: Vec<_> = template.secrets().collect();
        assert_eq!(secrets, vec!["TOKEN", "OTHER_ONE"]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Template::parse("${{ env.X "),
            Err(TemplateError::Unterminated)
        );
        assert_eq!(Template::parse("${{ }}"), Err(TemplateError::Empty));
        assert_eq!(
            Template::parse("${{ vars.X }}"),
            Err(TemplateError::UnknownContext("vars".to_string()))
        );
        assert_eq!(
            Template::parse("${{ secrets.1abc }}"),
            Err(TemplateError::InvalidName("1abc".to_string()))
        );
        assert_eq!(
            Template::parse("${{ event.author }}"),
            Err(TemplateError::UnknownEventField("author".to_string()))
        );
    }

    #[test]
    fn test_render_unresolved() {
        let template = Template::parse("${{ secrets.MISSING }}").unwrap();
        assert_eq!(
            template.render(|_| None),
            Err(TemplateError::Unresolved("secrets.MISSING".to_string()))
        );
    }
}
