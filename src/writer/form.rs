//! Resource files referenced from Qt Designer forms.

use std::path::{Path, PathBuf};

use crate::paths::absolute_from;

pub trait FormResources: Send + Sync {
    /// Absolute paths of the `.qrc` files `form` refers to.
    fn form_resources(&self, form: &Path) -> Vec<PathBuf>;
}

/// Reads `<iconset resource=…>` and `<include location=…>` from the form XML.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlFormResources;

impl FormResources for XmlFormResources {
    fn form_resources(&self, form: &Path) -> Vec<PathBuf> {
        let text = match std::fs::read_to_string(form) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(target: "writer", "cannot read form {}: {e}", form.display());
                return Vec::new();
            }
        };
        let form_dir = form.parent().unwrap_or(Path::new(""));
        resources_in(&text, form_dir)
    }
}

fn resources_in(text: &str, form_dir: &Path) -> Vec<PathBuf> {
    let document = match roxmltree::Document::parse(text) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::debug!(target: "writer", "malformed form: {e}");
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for node in document.descendants().filter(|n| n.is_element()) {
        let reference = match node.tag_name().name() {
            "iconset" => node.attribute("resource"),
            "include" => node.attribute("location"),
            _ => None,
        };
        if let Some(reference) = reference.filter(|r| !r.is_empty()) {
            let path = absolute_from(form_dir, Path::new(reference));
            if !found.contains(&path) {
                found.push(path);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_from_form_xml() {
        let form = r#"<?xml version="1.0" encoding="UTF-8"?>
<ui version="4.0">
 <widget class="QDialog" name="Dialog">
  <property name="windowIcon">
   <iconset resource="../res/icons.qrc">:/icons/app.png</iconset>
  </property>
 </widget>
 <resources>
  <include location="../res/icons.qrc"/>
  <include location="extra.qrc"/>
 </resources>
</ui>"#;
        let found = resources_in(form, Path::new("/p/forms"));
        assert_eq!(
            found,
            vec![PathBuf::from("/p/res/icons.qrc"), PathBuf::from("/p/forms/extra.qrc")]
        );
    }

    #[test]
    fn test_malformed_form_yields_nothing() {
        assert!(resources_in("<ui><widget>", Path::new("/p")).is_empty());
    }
}
