//! Project and boilerplate generation for `pod new` and `pod add`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn write_new(path: &Path, content: &str) -> io::Result<()> {
    if path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)
}

fn pascal_case(name: &str) -> String {
    name.split(|c: char| c == '-' || c == '_' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROJECT SCAFFOLD
// ═══════════════════════════════════════════════════════════════════════════════

/// Scaffold a new project directory under `base`.
pub fn create_project(name: &str, base: &Path) -> io::Result<PathBuf> {
    let root = base.join(name);
    if root.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("directory {} already exists", root.display()),
        ));
    }

    write_new(
        &root.join("package.json"),
        &format!(
            r#"{{
  "name": "{name}",
  "private": true,
  "scripts": {{
    "dev": "pod dev"
  }},
  "dependencies": {{
    "esbuild": "^0.21.0"
  }}
}}
"#
        ),
    )?;

    write_new(
        &root.join("pod.config.json"),
        &format!(
            r#"{{
  "name": "{name}",
  "srcDir": "src",
  "outDir": ".pod/out"
}}
"#
        ),
    )?;

    write_new(
        &root.join("src/macros/site.ts"),
        r#"// Compile-time macros. Exports ending in `$` run during the build
// and their results are inlined into the output.
export const buildStamp$ = (prefix: string, ctx: any) => {
  return ctx.ast.string(prefix + "-" + ctx.binding);
};
"#,
    )?;

    write_new(
        &root.join("src/pages/index.tsx"),
        r#""use public";
import { buildStamp$ } from "../macros/site";

const stamp = buildStamp$("home");

export default function IndexPage() {
  return (
    <main>
      <h1>Welcome</h1>
      <p>{stamp}</p>
    </main>
  );
}
"#,
    )?;

    write_new(
        &root.join("src/components/Hello.tsx"),
        &component_template("Hello"),
    )?;

    write_new(
        &root.join("pod.deploy.yml"),
        &format!(
            r#"name: {name}
version: 0.1.0
targets:
  production:
    host: example.com
    user: deploy
    keyPath: ~/.ssh/id_ed25519
    deployPath: /srv/${{name}}
    operations:
      - ensure: swap
        size: 2G
      - action: sync
        name: upload
        source: ./.pod/out
      - verify: http
        name: health
        url: https://example.com/
  workstation:
    type: local
    operations:
      - action: command
        name: build
        command: echo nothing to do
"#
        ),
    )?;

    write_new(&root.join(".gitignore"), ".pod/\nnode_modules/\n")?;

    Ok(root)
}

// ═══════════════════════════════════════════════════════════════════════════════
// BOILERPLATE
// ═══════════════════════════════════════════════════════════════════════════════

fn component_template(name: &str) -> String {
    format!(
        r#""use interactive";

export default function {name}() {{
  return <div class="{lower}">{name}</div>;
}}
"#,
        name = name,
        lower = name.to_lowercase()
    )
}

/// `pod add c <name>`: a component file under `src/components`.
pub fn add_component(name: &str, base: &Path) -> io::Result<PathBuf> {
    let component = pascal_case(name);
    let path = base
        .join("src/components")
        .join(format!("{}.tsx", component));
    write_new(&path, &component_template(&component))?;
    Ok(path)
}

/// `pod add f <name>`: a feature directory with an entry module and a view.
pub fn add_feature(name: &str, base: &Path) -> io::Result<PathBuf> {
    let feature_dir = base.join("src/features").join(name);
    let view = pascal_case(name);
    write_new(
        &feature_dir.join("index.ts"),
        &format!(
            "export {{ default as {view}View }} from \"./{view}View\";\n",
            view = view
        ),
    )?;
    write_new(
        &feature_dir.join(format!("{}View.tsx", view)),
        &component_template(&format!("{}View", view)),
    )?;
    Ok(feature_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pascal_case() {
        assert_eq!(pascal_case("hero-section"), "HeroSection");
        assert_eq!(pascal_case("nav_bar"), "NavBar");
        assert_eq!(pascal_case("Card"), "Card");
    }

    #[test]
    fn test_create_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = create_project("shop", dir.path()).unwrap();
        assert!(root.join("package.json").is_file());
        assert!(root.join("pod.deploy.yml").is_file());
        assert!(root.join("src/pages/index.tsx").is_file());

        // Refuses to scaffold over an existing directory.
        assert!(create_project("shop", dir.path()).is_err());
    }

    #[test]
    fn test_scaffolded_page_carries_directive() {
        let dir = tempfile::tempdir().unwrap();
        let root = create_project("shop", dir.path()).unwrap();
        let page = fs::read_to_string(root.join("src/pages/index.tsx")).unwrap();
        assert!(page.starts_with("\"use public\";"));
    }

    #[test]
    fn test_add_component_and_feature() {
        let dir = tempfile::tempdir().unwrap();
        let component = add_component("hero-section", dir.path()).unwrap();
        assert!(component.ends_with("src/components/HeroSection.tsx"));

        let feature = add_feature("checkout", dir.path()).unwrap();
        assert!(feature.join("index.ts").is_file());
        assert!(feature.join("CheckoutView.tsx").is_file());

        // Existing files are not overwritten.
        assert!(add_component("hero-section", dir.path()).is_err());
    }
}
