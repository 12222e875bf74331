//! Environment recipes for the three sandbox kinds.
//!
//! Pure formatting: a [`Recipe`] is a deterministic Dockerfile plus the
//! metadata the lifecycle manager needs to run it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Port used by the service kind when none is given.
pub const DEFAULT_SERVICE_PORT: u16 = 8000;

/// Port served by the content kind.
pub const CONTENT_PORT: u16 = 80;

/// Standard port of the database engine.
pub const DATABASE_PORT: u16 = 5432;

/// Kind of sandbox environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxKind {
    /// Interpreted service running a single entrypoint file.
    InterpretedService,
    /// Static web server serving the workspace as its root.
    ContentServer,
    /// Relational database engine.
    RelationalDatabase,
}

/// A rendered environment recipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    pub kind: SandboxKind,
    /// Port exposed by the image and published on the host.
    pub port: u16,
    /// Directory inside the container where the workspace is mounted read-only.
    pub workdir: Option<String>,
    /// Dockerfile text.
    pub dockerfile: String,
}

/// Renders the recipe for `kind`.
///
/// For the database kind, `dependencies` carries the superuser name and
/// password in that order.
pub fn render(
    kind: SandboxKind,
    entrypoint: &str,
    dependencies: &[String],
    port: Option<u16>,
) -> Recipe {
    match kind {
        SandboxKind::InterpretedService => {
            let port = port.filter(|p| *p != 0).unwrap_or(DEFAULT_SERVICE_PORT);
            let mut dockerfile = String::new();
            dockerfile.push_str("FROM python:3.9-slim\n");
            dockerfile.push_str("WORKDIR /app\n");
            dockerfile.push_str("COPY . /app\n");
            dockerfile.push_str(&format!("EXPOSE {}\n", port));
            dockerfile.push_str("RUN pip install --no-cache-dir wheel\n");
            if !dependencies.is_empty() {
                dockerfile.push_str(&format!(
                    "RUN pip install --no-cache-dir {}\n",
                    dependencies.join(" ")
                ));
            }
            dockerfile.push_str(&format!("CMD [\"python\", \"{}\"]\n", entrypoint));

            Recipe {
                kind,
                port,
                workdir: Some("/app".to_string()),
                dockerfile,
            }
        }
        SandboxKind::ContentServer => {
            let port = port.unwrap_or(CONTENT_PORT);
            let dockerfile = format!(
                "FROM nginx:alpine\n\
                 COPY . /usr/share/nginx/html\n\
                 EXPOSE {}\n\
                 CMD [\"nginx\", \"-g\", \"daemon off;\"]\n",
                port
            );

            Recipe {
                kind,
                port,
                workdir: Some("/usr/share/nginx/html".to_string()),
                dockerfile,
            }
        }
        SandboxKind::RelationalDatabase => {
            let user = dependencies.first().map(String::as_str).unwrap_or("postgres");
            let password = dependencies.get(1).map(String::as_str).unwrap_or("postgres");
            let dockerfile = format!(
                "FROM postgres:latest\n\
                 ENV POSTGRES_USER={}\n\
                 ENV POSTGRES_PASSWORD={}\n\
                 EXPOSE {}\n\
                 CMD [\"postgres\"]\n",
                user, password, DATABASE_PORT
            );

            // The engine needs a writable data directory, so nothing is mounted.
            Recipe {
                kind,
                port: DATABASE_PORT,
                workdir: None,
                dockerfile,
            }
        }
    }
}

/// Collects top-level module names imported by a script.
pub fn infer_dependencies(script: &str) -> BTreeSet<String> {
    script
        .lines()
        .filter_map(|line| {
            line.strip_prefix("import ")
                .or_else(|| line.strip_prefix("from "))
        })
        .filter_map(|rest| {
            let module: String = rest
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            let starts_ok = module
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
            starts_ok.then_some(module)
        })
        .collect()
}

/// Finds the first nonzero `port=NNNN` in a script.
pub fn infer_port(script: &str) -> u16 {
    for line in script.lines() {
        let mut rest = line;
        while let Some(idx) = rest.find("port=") {
            let after = &rest[idx + "port=".len()..];
            let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
            match digits.parse::<u16>() {
                Ok(port) if port != 0 => return port,
                _ => {}
            }
            rest = after;
        }
    }
    DEFAULT_SERVICE_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_recipe_installs_dependencies_and_runs_entrypoint() {
        let deps = vec!["fastapi".to_string(), "uvicorn".to_string()];
        let recipe = render(SandboxKind::InterpretedService, "index.py", &deps, Some(8080));

        assert_eq!(recipe.port, 8080);
        assert_eq!(recipe.workdir.as_deref(), Some("/app"));
        assert!(recipe.dockerfile.starts_with("FROM python:3.9-slim\n"));
        assert!(recipe.dockerfile.contains("EXPOSE 8080\n"));
        assert!(recipe
            .dockerfile
            .contains("RUN pip install --no-cache-dir fastapi uvicorn\n"));
        assert!(recipe.dockerfile.ends_with("CMD [\"python\", \"index.py\"]\n"));
    }

    #[test]
    fn service_recipe_falls_back_to_default_port() {
        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], None);

        assert_eq!(recipe.port, 8000);
        assert!(recipe.dockerfile.contains("EXPOSE 8000\n"));
        // No empty install line when nothing is listed.
        assert_eq!(recipe.dockerfile.matches("pip install").count(), 1);

        let recipe = render(SandboxKind::InterpretedService, "index.py", &[], Some(0));
        assert_eq!(recipe.port, 8000);
        assert!(recipe.dockerfile.contains("EXPOSE 8000\n"));
    }

    #[test]
    fn content_recipe_serves_workspace_on_port_80() {
        let recipe = render(SandboxKind::ContentServer, "index.html", &[], None);

        assert_eq!(recipe.port, 80);
        assert!(recipe.dockerfile.starts_with("FROM nginx:alpine\n"));
        assert!(recipe.dockerfile.contains("COPY . /usr/share/nginx/html\n"));
    }

    #[test]
    fn database_recipe_uses_credentials_from_dependencies() {
        let creds = vec!["user".to_string(), "admin".to_string()];
        let recipe = render(SandboxKind::RelationalDatabase, "INFO.md", &creds, Some(1234));

        assert_eq!(recipe.port, 5432);
        assert!(recipe.workdir.is_none());
        assert!(recipe.dockerfile.contains("ENV POSTGRES_USER=user\n"));
        assert!(recipe.dockerfile.contains("ENV POSTGRES_PASSWORD=admin\n"));
        assert!(recipe.dockerfile.contains("EXPOSE 5432\n"));
    }

    #[test]
    fn render_is_deterministic() {
        let deps = vec!["asyncpg".to_string()];
        assert_eq!(
            render(SandboxKind::InterpretedService, "index.py", &deps, None),
            render(SandboxKind::InterpretedService, "index.py", &deps, None)
        );
    }

    #[test]
    fn infer_dependencies_reads_import_lines() {
        let script = "import os\nfrom fastapi import FastAPI\nimport uvicorn\n    import nested\nfrom . import local\n";
        let deps = infer_dependencies(script);

        let expected: BTreeSet<String> = ["fastapi", "os", "uvicorn"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(deps, expected);
    }

    #[test]
    fn infer_port_finds_first_assignment() {
        let script = "app = FastAPI()\nuvicorn.run(app, host=\"0.0.0.0\", port=8081)\n";
        assert_eq!(infer_port(script), 8081);
        assert_eq!(infer_port("print('hello')"), 8000);
        assert_eq!(infer_port("run(port=0)\nrun(port=9090)"), 9090);
        assert_eq!(infer_port("run(port=0)"), 8000);
    }
}
