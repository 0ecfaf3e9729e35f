//! Mount configuration.
use crate::{
    directive::{DirectiveRegistry, Loader},
    dom::{Document, NodeId},
    error::ConfigError,
    filter::FilterRegistry,
    include::{DocumentTemplates, TemplateSource},
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, rc::Rc};

/// What is bound automatically on elements matching a tag selector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TagConfig {
    /// Attributes bound as text.
    pub attributes: Vec<String>,
    /// Attributes bound as booleans.
    pub booleans: Vec<String>,
    /// The attribute bound two-way to the control value.
    pub value: Option<String>,
}

impl TagConfig {
    fn merge(&mut self, other: &TagConfig) {
        for a in &other.attributes {
            if !self.attributes.contains(a) {
                self.attributes.push(a.clone());
            }
        }
        for b in &other.booleans {
            if !self.booleans.contains(b) {
                self.booleans.push(b.clone());
            }
        }
        if other.value.is_some() {
            self.value = other.value.clone();
        }
    }

    /// Returns whether an attribute with this name is bound on matching elements.
    pub fn binds(&self, name: &str) -> bool {
        self.attributes.iter().any(|a| a == name)
            || self.booleans.iter().any(|b| b == name)
            || self.value.as_deref() == Some(name)
    }
}

/// Options, loadable from JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Attribute holding the directive list.
    pub attribute_fn: String,
    /// Attribute holding a template reference (`url#id`).
    #[serde(alias = "attributeSrc")]
    pub attribute_include: String,
    /// Prefix marking an attribute binding (`:href="…"`).
    pub attribute_prefix: String,
    /// Tag selector (`*`, `input`, `input[type=checkbox]`) to bindings.
    pub parse: IndexMap<String, TagConfig>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn tag(attributes: &[&str], booleans: &[&str], value: Option<&str>) -> TagConfig {
    TagConfig {
        attributes: strings(attributes),
        booleans: strings(booleans),
        value: value.map(str::to_string),
    }
}

impl Default for Options {
    fn default() -> Self {
        let control = &["disabled", "required", "readonly"];
        let mut parse = IndexMap::new();
        parse.insert(
            "*".to_string(),
            tag(
                &["id", "title", "name", "href", "src", "alt", "for", "type", "role", "style", "placeholder"],
                &["hidden"],
                None,
            ),
        );
        parse.insert("input".to_string(), tag(&["min", "max", "step"], control, Some("value")));
        // checkables bind `checked` two-way; their markup `value` stays literal
        parse.insert("input[type=checkbox]".to_string(), tag(&[], &[], Some("checked")));
        parse.insert("input[type=radio]".to_string(), tag(&[], &[], Some("checked")));
        parse.insert("textarea".to_string(), tag(&[], control, Some("value")));
        parse.insert("select".to_string(), tag(&[], &["disabled", "required", "multiple"], Some("value")));
        parse.insert("option".to_string(), tag(&["value", "label"], &["selected", "disabled"], None));
        parse.insert("button".to_string(), tag(&[], &["disabled"], None));
        parse.insert("details".to_string(), tag(&[], &["open"], None));
        Options {
            attribute_fn: "fn".to_string(),
            attribute_include: "include".to_string(),
            attribute_prefix: ":".to_string(),
            parse,
        }
    }
}

impl Options {
    /// The bindings of an element: `*`, then its tag, then `tag[type=…]`.
    pub fn tag_config(&self, doc: &Document, node: NodeId) -> TagConfig {
        let mut config = TagConfig::default();
        let Some(tag) = doc.tag(node) else { return config };
        if let Some(c) = self.parse.get("*") {
            config.merge(c);
        }
        if let Some(c) = self.parse.get(&tag) {
            config.merge(c);
        }
        if let Some(ty) = doc.attribute(node, "type") {
            let selector = format!("{tag}[type={}]", ty.to_ascii_lowercase());
            if let Some(c) = self.parse.get(&selector) {
                config.merge(c);
            }
        }
        config
    }
}

/// Everything a mount needs besides the document: options and the registries.
#[derive(Clone)]
pub struct Config {
    pub options: Options,
    pub filters: Rc<FilterRegistry>,
    pub directives: Rc<DirectiveRegistry>,
    pub loader: Option<Rc<dyn Loader>>,
    pub templates: Rc<dyn TemplateSource>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("options", &self.options)
            .field("filters", &self.filters)
            .field("directives", &self.directives)
            .field("loader", &self.loader.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(Options::default())
    }
}

impl Config {
    /// A configuration with the built-in filters and directives.
    pub fn new(options: Options) -> Config {
        Config {
            options,
            filters: Rc::new(FilterRegistry::with_builtins()),
            directives: Rc::new(DirectiveRegistry::with_builtins()),
            loader: None,
            templates: Rc::new(DocumentTemplates),
        }
    }

    /// Reads the options from JSON. Missing options keep their defaults.
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        let options: Options = serde_json::from_str(json)?;
        Ok(Config::new(options))
    }

    pub fn with_filters(mut self, filters: FilterRegistry) -> Config {
        self.filters = Rc::new(filters);
        self
    }

    pub fn with_directives(mut self, directives: DirectiveRegistry) -> Config {
        self.directives = Rc::new(directives);
        self
    }

    pub fn with_loader(mut self, loader: Rc<dyn Loader>) -> Config {
        self.loader = Some(loader);
        self
    }

    pub fn with_templates(mut self, templates: Rc<dyn TemplateSource>) -> Config {
        self.templates = templates;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_json() {
        let config = Config::from_json(r#"{ "attributeSrc": "src", "attributePrefix": "bind-" }"#).unwrap();
        assert_eq!(config.options.attribute_include, "src");
        assert_eq!(config.options.attribute_prefix, "bind-");
        assert_eq!(config.options.attribute_fn, "fn");
        assert!(config.options.parse.contains_key("input[type=checkbox]"));
        assert!(Config::from_json("{ \"attributeFn\": 3 }").is_err());
    }

    #[test]
    fn tag_lookup_merges_selectors() {
        let doc = Document::new();
        let input = doc.create_element("input");
        doc.set_attribute(input, "type", "Checkbox");
        let c = Options::default().tag_config(&doc, input);
        assert!(c.binds("title"));
        assert!(!c.booleans.contains(&"checked".to_string()));
        assert!(c.booleans.contains(&"disabled".to_string()));
        assert_eq!(c.value.as_deref(), Some("checked"));
        assert!(!c.binds("value"));
        let div = doc.create_element("div");
        let c = Options::default().tag_config(&doc, div);
        assert!(!c.binds("value"));
    }
}
