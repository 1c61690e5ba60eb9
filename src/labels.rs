use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::metrics::{lock, EventMetrics};
use crate::target::Target;

/// Extra label attached to every exported record.
///
/// The value is a template that may reference the target: `@target.name@`,
/// `@target.ip@`, `@target.port@` and `@target.label.<key>@`. Templates are
/// expanded per target by [`AdditionalLabel::update_for_target`] ahead of export.
#[derive(Debug)]
pub struct AdditionalLabel {
    key: String,
    template: String,
    values: Mutex<HashMap<String, String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AdditionalLabelConfig {
    pub key: String,
    pub value: String,
}

impl From<&AdditionalLabelConfig> for AdditionalLabel {
    fn from(config: &AdditionalLabelConfig) -> Self {
        Self::new(&config.key, &config.value)
    }
}

impl AdditionalLabel {
    pub fn new(key: &str, template: &str) -> Self {
        Self {
            key: key.into(),
            template: template.into(),
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn update_for_target(&self, target: &Target, resolved_addr: &str, port: u16) {
        let value = expand(&self.template, target, resolved_addr, port);
        lock(&self.values).insert(target.name.clone(), value);
    }

    /// Value computed for `target_name` by the last update, if any.
    pub fn value_for(&self, target_name: &str) -> Option<String> {
        lock(&self.values).get(target_name).cloned()
    }

    /// Sets the label on `em` when a value is known for `target_name`.
    pub fn apply(&self, target_name: &str, em: &mut EventMetrics) {
        if let Some(value) = self.value_for(target_name) {
            em.set_label(&self.key, &value);
        }
    }

    pub fn forget(&self, target_name: &str) {
        lock(&self.values).remove(target_name);
    }
}

const LABEL_PREFIX: &str = "target.label.";

/// Substitutes placeholders in one pass over `template`. Substituted values are
/// copied as is and never scanned again.
fn expand(template: &str, target: &Target, resolved_addr: &str, port: u16) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('@') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(len) = after.find('@') else {
            rest = &rest[start..];
            break;
        };
        match placeholder(&after[..len], target, resolved_addr, port) {
            Some(value) => {
                out.push_str(&value);
                rest = &after[len + 1..];
            }
            None => {
                // the closing '@' may open the next placeholder
                out.push('@');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn placeholder(name: &str, target: &Target, resolved_addr: &str, port: u16) -> Option<String> {
    match name {
        "target.name" => Some(target.name.clone()),
        "target.ip" => Some(resolved_addr.to_string()),
        "target.port" => Some(port.to_string()),
        _ => name
            .strip_prefix(LABEL_PREFIX)
            .map(|key| target.label(key).unwrap_or_default().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::net::{IpAddr, Ipv4Addr};

    fn target() -> Target {
        Target::new("gw", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_label("rack", "r12")
            .with_label("zone", "eu")
    }

    #[test]
    fn test_expand() {
        let t = target();
        assert_eq!(expand("static", &t, "10.0.0.1", 0), "static");
        assert_eq!(
            expand("@target.name@/@target.ip@:@target.port@", &t, "10.0.0.1", 0),
            "gw/10.0.0.1:0"
        );
        assert_eq!(
            expand("@target.label.zone@-@target.label.rack@", &t, "", 0),
            "eu-r12"
        );
        assert_eq!(expand("x@target.label.missing@y", &t, "", 0), "xy");
        assert_eq!(expand("@target.label.open", &t, "", 0), "@target.label.open");
        assert_eq!(expand("a@b@target.name@", &t, "", 0), "a@bgw");
        assert_eq!(expand("user@@target.name@", &t, "", 0), "user@gw");
    }

    #[test]
    fn test_substituted_values_are_not_expanded_again() {
        let t = Target::new("@target.ip@", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .with_label("zone", "@target.label.zone@")
            .with_label("rack", "@target.label.zone@");
        assert_eq!(
            expand("@target.label.zone@", &t, "10.0.0.1", 0),
            "@target.label.zone@"
        );
        assert_eq!(
            expand("@target.label.rack@/@target.name@", &t, "10.0.0.1", 0),
            "@target.label.zone@/@target.ip@"
        );

        let label = AdditionalLabel::new("zone", "@target.label.zone@");
        label.update_for_target(&t, "10.0.0.1", 0);
        assert_eq!(
            label.value_for("@target.ip@").as_deref(),
            Some("@target.label.zone@")
        );
    }

    #[test]
    fn test_apply_per_target() {
        let label = AdditionalLabel::from(&AdditionalLabelConfig {
            key: "rack".into(),
            value: "@target.label.rack@".into(),
        });
        let t = target();
        let mut em = EventMetrics::new(Utc::now()).add_label("dst", "gw");

        label.apply("gw", &mut em);
        assert_eq!(em.label("rack"), None);

        label.update_for_target(&t, "10.0.0.1", 0);
        label.apply("gw", &mut em);
        assert_eq!(em.label("rack"), Some("r12"));
        assert_eq!(label.key(), "rack");

        label.forget("gw");
        assert_eq!(label.value_for("gw"), None);
    }
}
