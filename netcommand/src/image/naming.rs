//! Firmware image filename conventions.

use regex::Regex;

/// Default template, e.g. `routeros-arm64-7.10.2.npk`.
pub const STANDARD_TEMPLATE: &str = "{prefix}{model}-{platform}-{version}.{suffix}";

/// How a driver names its firmware images.
///
/// A template may use the placeholders `{prefix}`, `{model}`,
/// `{platform}`, `{version}` and `{suffix}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageNaming {
    template: String,
    prefix: String,
    model: String,
    suffix: String,
}

impl ImageNaming {
    /// Standard `{prefix}{model}-{platform}-{version}.{suffix}` naming.
    pub fn standard(model: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            template: STANDARD_TEMPLATE.to_string(),
            prefix: String::new(),
            model: model.into(),
            suffix: suffix.into(),
        }
    }

    /// Naming from a custom template.
    pub fn template(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            prefix: String::new(),
            model: String::new(),
            suffix: String::new(),
        }
    }

    /// Set the prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The same convention for another package of the model.
    pub fn for_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }

    /// Expected filename for a platform and version.
    pub fn filename(&self, platform: &str, version: &str) -> String {
        self.render(platform, version)
    }

    /// Version embedded in `filename`, if the filename follows this naming
    /// for `platform`.
    pub fn parse_version(&self, filename: &str, platform: &str) -> Option<String> {
        let pattern = self.version_pattern(platform)?;
        pattern
            .captures(filename)
            .and_then(|caps| caps.name("version"))
            .map(|m| m.as_str().to_string())
    }

    fn render(&self, platform: &str, version: &str) -> String {
        self.template
            .replace("{prefix}", &self.prefix)
            .replace("{model}", &self.model)
            .replace("{platform}", platform)
            .replace("{version}", version)
            .replace("{suffix}", &self.suffix)
    }

    fn version_pattern(&self, platform: &str) -> Option<Regex> {
        // Render with a marker, escape everything, then put the capture back.
        const MARKER: &str = "\u{0}VERSION\u{0}";
        let rendered = self.render(platform, MARKER);
        if !rendered.contains(MARKER) {
            return None;
        }
        let escaped = regex::escape(&rendered).replacen(
            &regex::escape(MARKER),
            r"(?P<version>[0-9][0-9A-Za-z._-]*?)",
            1,
        );
        Regex::new(&format!("^{escaped}$")).ok()
    }
}
