//! Group recipe text.
//!
//! A group recipe lists its members as `NAME=VERSION` specs (or bare names for
//! members not published yet). With no members it falls back to the latest
//! packages on the build label.

/// A group recipe about to be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTemplate {
    pub name: String,
    pub version: String,
    pub members: Vec<String>,
}

impl GroupTemplate {
    pub fn new(name: impl Into<String>, version: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            members,
        }
    }

    /// `group-foo-packages` becomes `GroupFooPackages`.
    pub fn class_name(&self) -> String {
        self.name
            .split('-')
            .filter(|word| !word.is_empty())
            .map(capitalize)
            .collect()
    }

    /// Renders the recipe text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("\nclass {}(GroupSetRecipe):\n", self.class_name()));
        out.push_str(&format!("    name = '{}'\n", self.name));
        out.push_str(&format!("    version = '{}'\n\n", self.version));
        out.push_str("    def setup(r):\n");
        out.push_str("        r.dumpAll()\n\n");
        out.push_str("        local = r.Repository(r.cfg.buildLabel, r.flavor)\n\n");
        if self.members.is_empty() {
            out.push_str("        pkgs = local.latestPackages()\n\n");
        } else {
            let members: Vec<String> = self.members.iter().map(|m| format!("'{}'", m)).collect();
            out.push_str("        pkgs = local.find(\n");
            out.push_str(&format!("                {}\n", members.join(",\n                ")));
            out.push_str("                )\n\n");
        }
        out.push_str("        r.Group(pkgs, checkPathConflicts=False, scripts=None)\n");
        out
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_name() {
        let template = GroupTemplate::new("group-foo-packages", "1", vec![]);
        assert_eq!(template.class_name(), "GroupFooPackages");
    }

    #[test]
    fn test_render_with_members() {
        let template = GroupTemplate::new(
            "group-widget",
            "2026.10.19_1200.00",
            vec!["pkgA=/l@n:t/1.0-1".to_string(), "pkgB".to_string()],
        );
        let recipe = template.render();
        assert!(recipe.contains("class GroupWidget(GroupSetRecipe):"));
        assert!(recipe.contains("version = '2026.10.19_1200.00'"));
        assert!(recipe.contains("'pkgA=/l@n:t/1.0-1',\n                'pkgB'"));
        assert!(!recipe.contains("latestPackages"));
    }

    #[test]
    fn test_render_without_members_uses_latest() {
        let recipe = GroupTemplate::new("group-widget", "1", vec![]).render();
        assert!(recipe.contains("local.latestPackages()"));
    }
}
