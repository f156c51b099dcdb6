//! Template rendering with Handlebars.
//!
//! A template is a pure function from typed props to an [`EmailLayout`]. The
//! layout is then rendered twice, once through the HTML shell and once
//! through the plain-text shell, so both views always carry the same content.

pub mod builtin;

use crate::error::TemplateRenderError;
use handlebars::Handlebars;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

const HTML_LAYOUT: &str = "layout_html";
const TEXT_LAYOUT: &str = "layout_text";

/// Call-to-action button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Action {
    pub label: String,
    pub url: String,
}

/// Label/value row, e.g. booking date or location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    pub label: String,
    pub value: String,
}

/// Content of one email, independent of its HTML or text presentation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EmailLayout {
    pub subject: String,
    pub preheader: Option<String>,
    pub heading: String,
    pub paragraphs: Vec<String>,
    pub details: Vec<Detail>,
    pub action: Option<Action>,
    pub footer: Option<String>,
}

impl EmailLayout {
    pub fn new(subject: impl Into<String>, heading: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            heading: heading.into(),
            ..Default::default()
        }
    }

    pub fn preheader(mut self, preheader: impl Into<String>) -> Self {
        self.preheader = Some(preheader.into());
        self
    }

    pub fn paragraph(mut self, paragraph: impl Into<String>) -> Self {
        self.paragraphs.push(paragraph.into());
        self
    }

    pub fn detail(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.push(Detail {
            label: label.into(),
            value: value.into(),
        });
        self
    }

    pub fn action(mut self, label: impl Into<String>, url: impl Into<String>) -> Self {
        self.action = Some(Action {
            label: label.into(),
            url: url.into(),
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}

/// Rendered subject and bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Template id → renderer lookup.
pub trait TemplateRegistry: Send + Sync {
    fn render(&self, template_id: &str, props: &Value)
    -> Result<RenderedTemplate, TemplateRenderError>;

    fn has_template(&self, template_id: &str) -> bool;

    fn template_ids(&self) -> Vec<String>;
}

type LayoutFn = Arc<dyn Fn(&Value) -> Result<EmailLayout, TemplateRenderError> + Send + Sync>;

/// Wrap a typed layout function so it accepts raw JSON props.
pub fn typed<P, F>(template_id: &str, build: F) -> LayoutFn
where
    P: DeserializeOwned,
    F: Fn(P) -> EmailLayout + Send + Sync + 'static,
{
    let template_id = template_id.to_string();
    Arc::new(move |props: &Value| {
        let props = P::deserialize(props).map_err(|e| TemplateRenderError::InvalidProps {
            template: template_id.clone(),
            details: e.to_string(),
        })?;
        Ok(build(props))
    })
}

/// Handlebars-backed template registry with the built-in templates loaded.
pub struct HandlebarsTemplateRegistry {
    handlebars: Handlebars<'static>,
    templates: BTreeMap<String, LayoutFn>,
}

impl HandlebarsTemplateRegistry {
    pub fn new() -> Result<Self, TemplateRenderError> {
        let mut handlebars = Handlebars::new();
        handlebars
            .register_template_string(HTML_LAYOUT, include_str!("layout.html.hbs"))
            .map_err(|e| TemplateRenderError::Render(e.to_string()))?;
        handlebars
            .register_template_string(TEXT_LAYOUT, include_str!("layout.txt.hbs"))
            .map_err(|e| TemplateRenderError::Render(e.to_string()))?;

        let mut registry = Self {
            handlebars,
            templates: BTreeMap::new(),
        };
        builtin::register_all(&mut registry);
        Ok(registry)
    }

    /// Add or replace a template.
    pub fn register<P, F>(&mut self, template_id: &str, build: F)
    where
        P: DeserializeOwned,
        F: Fn(P) -> EmailLayout + Send + Sync + 'static,
    {
        self.templates
            .insert(template_id.to_string(), typed(template_id, build));
    }

    /// Render a layout directly, bypassing the id lookup.
    pub fn render_layout(&self, layout: &EmailLayout) -> Result<RenderedTemplate, TemplateRenderError> {
        Ok(RenderedTemplate {
            subject: layout.subject.clone(),
            html: self.handlebars.render(HTML_LAYOUT, layout)?,
            text: self.handlebars.render(TEXT_LAYOUT, layout)?,
        })
    }
}

impl TemplateRegistry for HandlebarsTemplateRegistry {
    fn render(&self, template_id: &str, props: &Value) -> Result<RenderedTemplate, TemplateRenderError> {
        let build = self
            .templates
            .get(template_id)
            .ok_or_else(|| TemplateRenderError::UnknownTemplate(template_id.to_string()))?;
        self.render_layout(&build(props)?)
    }

    fn has_template(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    fn template_ids(&self) -> Vec<String> {
        self.templates.keys().cloned().collect()
    }
}

impl fmt::Debug for HandlebarsTemplateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlebarsTemplateRegistry")
            .field("templates", &self.templates.keys().collect::<Vec<_>>())
            .finish()
    }
}
