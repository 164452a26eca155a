//! Container file generation for `pod dockerize <env>`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

fn project_name(base: &Path) -> String {
    let config = base.join("pod.config.json");
    if let Ok(text) = fs::read_to_string(config) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
            if let Some(name) = value["name"].as_str() {
                return name.to_string();
            }
        }
    }
    base.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "app".to_string())
}

/// Emit Dockerfile, compose file, and dockerignore for the given
/// environment. Returns the written paths.
pub fn generate(env: &str, base: &Path) -> io::Result<Vec<PathBuf>> {
    let name = project_name(base);
    let production = env == "production";
    let node_env = if production { "production" } else { env };
    let port = if production { 80 } else { 3000 };

    let dockerfile = base.join("Dockerfile");
    fs::write(
        &dockerfile,
        format!(
            r#"FROM node:20-alpine AS build
WORKDIR /app
COPY package.json ./
RUN npm install
COPY . .
RUN npx pod dev

FROM node:20-alpine
WORKDIR /app
ENV NODE_ENV={node_env}
COPY --from=build /app/.pod/out ./out
COPY --from=build /app/package.json ./
EXPOSE {port}
CMD ["node", "out/server.js"]
"#
        ),
    )?;

    let compose = base.join(format!("docker-compose.{}.yml", env));
    fs::write(
        &compose,
        format!(
            r#"services:
  {name}:
    build: .
    image: {name}:{env}
    restart: unless-stopped
    environment:
      NODE_ENV: {node_env}
    ports:
      - "{port}:{port}"
"#
        ),
    )?;

    let dockerignore = base.join(".dockerignore");
    fs::write(&dockerignore, "node_modules/\n.pod/\n.git/\n")?;

    Ok(vec![dockerfile, compose, dockerignore])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_container_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pod.config.json"),
            r#"{ "name": "shop" }"#,
        )
        .unwrap();

        let written = generate("production", dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let dockerfile = fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(dockerfile.contains("NODE_ENV=production"));
        assert!(dockerfile.contains("EXPOSE 80"));

        let compose =
            fs::read_to_string(dir.path().join("docker-compose.production.yml")).unwrap();
        assert!(compose.contains("image: shop:production"));
    }

    #[test]
    fn test_non_production_env_uses_dev_port() {
        let dir = tempfile::tempdir().unwrap();
        generate("staging", dir.path()).unwrap();
        let dockerfile = fs::read_to_string(dir.path().join("Dockerfile")).unwrap();
        assert!(dockerfile.contains("EXPOSE 3000"));
        assert!(dockerfile.contains("NODE_ENV=staging"));
    }
}
