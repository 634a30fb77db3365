//! Versioned source templates. Each one pairs a body with a preamble that
//! neutralizes host-facing primitives before any submitted code runs.

use crate::core::error::EngineError;

pub const PREAMBLE: &str = "{{PREAMBLE}}";
pub const USER_CODE: &str = "{{USER_CODE}}";
pub const TESTS: &str = "{{TESTS}}";

#[derive(Debug, PartialEq, Eq)]
pub struct Template {
    pub name: &'static str,
    body: &'static str,
    preamble: &'static str,
}

static TEMPLATES: &[Template] = &[
    Template {
        name: "python.v1",
        body: include_str!("../../assets/templates/python.v1.py"),
        preamble: include_str!("../../assets/templates/python.v1.preamble.py"),
    },
    Template {
        name: "nodejs.v1",
        body: include_str!("../../assets/templates/nodejs.v1.js"),
        preamble: include_str!("../../assets/templates/nodejs.v1.preamble.js"),
    },
    Template {
        name: "rust-tests.v1",
        body: include_str!("../../assets/templates/rust-tests.v1.rs"),
        preamble: include_str!("../../assets/templates/rust-tests.v1.preamble.rs"),
    },
];

impl Template {
    pub fn get(name: &str) -> Result<&'static Template, EngineError> {
        TEMPLATES
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::UnknownTemplate(name.to_string()))
    }

    /// Wraps submitted code. The preamble goes in first so that it runs
    /// before the submission.
    pub fn render(&self, user_code: &str) -> String {
        self.render_with(&[(USER_CODE, user_code)])
    }

    /// Fills the preamble and the given placeholders. Substituted text is
    /// never scanned for placeholders again.
    pub fn render_with(&self, fields: &[(&str, &str)]) -> String {
        let mut fields = fields.to_vec();
        fields.push((PREAMBLE, self.preamble));

        let mut rendered = String::with_capacity(self.body.len());
        let mut rest = self.body;
        while let Some((pos, key, value)) = fields
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
            .min_by_key(|(pos, _, _)| *pos)
        {
            rendered.push_str(&rest[..pos]);
            rendered.push_str(value);
            rest = &rest[pos + key.len()..];
        }
        rendered.push_str(rest);
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_templates() {
        for name in ["python.v1", "nodejs.v1", "rust-tests.v1"] {
            assert_eq!(Template::get(name).unwrap().name, name);
        }
        assert!(matches!(
            Template::get("python.v0"),
            Err(EngineError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_preamble_precedes_user_code() {
        let rendered = Template::get("python.v1").unwrap().render("print('Hello')");

        let preamble_at = rendered.find("__judge_blocked").unwrap();
        let user_at = rendered.find("print('Hello')").unwrap();
        assert!(preamble_at < user_at);
        assert!(!rendered.contains(PREAMBLE));
        assert!(!rendered.contains(USER_CODE));
    }

    #[test]
    fn test_substituted_code_is_not_rescanned() {
        let rendered = Template::get("nodejs.v1")
            .unwrap()
            .render("console.log('{{PREAMBLE}}');");

        assert!(rendered.ends_with("console.log('{{PREAMBLE}}');\n"));
        assert_eq!(rendered.matches("blockedModules").count(), 2);
    }

    #[test]
    fn test_preambles_guard_the_module_loaders() {
        let python = Template::get("python.v1").unwrap().render("");
        assert!(python.contains("__judge_builtins.__import__ = "));
        assert!(python.contains("__judge_importlib.reload = __judge_blocked"));
        assert!(python.contains("\"posix\", \"nt\", \"importlib\", \"_imp\""));

        let node = Template::get("nodejs.v1").unwrap().render("");
        assert!(node.contains("Object.defineProperty(Module, '_load'"));
        assert!(node.contains("writable: false"));
    }

    #[test]
    fn test_rust_tests_template() {
        let rendered = Template::get("rust-tests.v1")
            .unwrap()
            .render_with(&[(TESTS, "#[test]\nfn judge_test_001() {}\n")]);

        assert!(rendered.contains("use solution::*;"));
        assert!(rendered.contains("fn judge_test_001()"));
        assert!(rendered.starts_with("#![allow"));
    }
}
