use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unclosed '{{{{' in template '{template}'")]
    Unclosed { template: String },

    #[error("unsupported expression '{expr}' in template '{template}', expected '{{{{ .name }}}}'")]
    UnsupportedExpression { expr: String, template: String },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A compiled `{{ .name }}` template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open.find("}}").ok_or_else(|| TemplateError::Unclosed {
                template: template.to_string(),
            })?;

            let expr = after_open[..close].trim();
            let name = expr
                .strip_prefix('.')
                .filter(|name| is_field_name(name))
                .ok_or_else(|| TemplateError::UnsupportedExpression {
                    expr: expr.to_string(),
                    template: template.to_string(),
                })?;
            segments.push(Segment::Field(name.to_string()));

            rest = &after_open[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    /// Template that renders a single field
    pub fn field(name: &str) -> Self {
        Self {
            source: format!("{{{{ .{} }}}}", name),
            segments: vec![Segment::Field(name.to_string())],
        }
    }

    /// Render using `lookup`; unknown fields render as the empty string
    pub fn render<'a, F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(lookup(name).unwrap_or("")),
            }
        }
        out
    }

    /// Field names referenced by this template, in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_fields_and_literals() {
        let template = Template::parse("[{{ .level }}] {{.service}}: {{ .message }}").unwrap();
        let ctx = values(&[("level", "INFO"), ("service", "bot"), ("message", "hello")]);
        let rendered = template.render(|name| ctx.get(name).map(String::as_str));
        assert_eq!(rendered, "[INFO] bot: hello");
        assert_eq!(template.fields().collect::<Vec<_>>(), ["level", "service", "message"]);
    }

    #[test]
    fn test_missing_field_renders_empty() {
        let template = Template::parse("pair={{ .trading_pair }};").unwrap();
        let rendered = template.render(|_| None);
        assert_eq!(rendered, "pair=;");
    }

    #[test]
    fn test_plain_text_template() {
        let template = Template::parse("true").unwrap();
        assert_eq!(template.render(|_| None), "true");
        assert_eq!(template.fields().count(), 0);
    }

    #[test]
    fn test_unclosed_template() {
        assert!(matches!(
            Template::parse("{{ .level"),
            Err(TemplateError::Unclosed { .. })
        ));
    }

    #[test]
    fn test_unsupported_expression() {
        assert!(matches!(
            Template::parse("{{ if .level }}x{{ end }}"),
            Err(TemplateError::UnsupportedExpression { .. })
        ));
        assert!(matches!(
            Template::parse("{{ level }}"),
            Err(TemplateError::UnsupportedExpression { .. })
        ));
    }
}
