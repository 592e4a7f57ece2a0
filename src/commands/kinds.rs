//! `kinds` - print the resource-kind registry

use colored::Colorize;

use crate::schema::{FieldSpec, KINDS, Role};
use crate::ui;

pub fn run() {
    for kind in KINDS {
        ui::header(kind.name);
        println!("  {}", kind.summary);
        for field in kind.fields {
            println!("    {}", describe(field));
        }
    }
}

/// One-line description: name, type, flags and doc
fn describe(field: &FieldSpec) -> String {
    let mut flags = Vec::new();
    if field.required {
        flags.push("required".to_string());
    }
    if let Some(default) = field.default {
        flags.push(format!("default {}", default.render()));
    }
    match field.role {
        Role::ShortKey => flags.push("short key".to_string()),
        Role::ShortValue => flags.push("short value".to_string()),
        Role::Plain => {}
    }
    if let Some(rename) = field.rename {
        flags.push(format!("alias {rename}"));
    }

    let flags = if flags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", flags.join(", "))
    };
    format!(
        "{:<10} {}{}  {}",
        field.name,
        field.ty.as_str().cyan(),
        flags.dimmed(),
        field.doc
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::lookup;

    fn field(kind: &str, name: &str) -> &'static FieldSpec {
        lookup(kind)
            .unwrap()
            .fields
            .iter()
            .find(|f| f.name == name)
            .unwrap()
    }

    #[test]
    fn test_describe() {
        colored::control::set_override(false);
        assert_eq!(
            describe(field("dir", "mode")),
            "mode       mode [default 0755]  permission bits"
        );
        let path = describe(field("file", "path"));
        assert!(path.contains("[required, short key]"), "{path}");
        let owner = describe(field("file", "owner"));
        assert!(owner.contains("alias user"), "{owner}");
    }
}
