// recipe.rs — deterministic build recipes per framework label.
//
// Each label maps to a container recipe (base image, install steps, fixed
// listen port 8080, entrypoint), an optional default python dependency
// manifest injected when the archive carried none, and the runtime launch
// command. Output depends only on the label + manifest flag.

use crate::classifier::Framework;

/// Fixed listen port for every deployed service.
pub const LISTEN_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Recipe {
    /// Container recipe injected over the extracted archive (overwrites any
    /// Dockerfile the archive shipped).
    pub dockerfile: String,
    /// Injected as requirements.txt when the label is python and the
    /// archive had no dependency manifest.
    pub default_dependency_manifest: Option<&'static str>,
    /// The command the runtime ultimately executes.
    pub launch_command: &'static str,
}

/// Build the recipe for a framework label.
///
/// `has_dependency_manifest` controls default-manifest injection only; the
/// container recipe itself is identical either way.
pub fn for_framework(framework: Framework, has_dependency_manifest: bool) -> Recipe {
    let (dockerfile, default_manifest, launch_command) = match framework {
        Framework::Streamlit | Framework::Unknown => (
            python_dockerfile(
                "streamlit run app.py --server.port=8080 --server.address=0.0.0.0 --server.headless=true",
            ),
            "streamlit\n",
            "streamlit run app.py --server.port=8080 --server.address=0.0.0.0 --server.headless=true",
        ),
        Framework::Gradio => (
            format!(
                "{}ENV GRADIO_SERVER_NAME=0.0.0.0 GRADIO_SERVER_PORT=8080\nCMD [\"python\", \"app.py\"]\n",
                python_preamble()
            ),
            "gradio\n",
            "python app.py",
        ),
        Framework::Flask => (
            python_dockerfile("gunicorn --bind 0.0.0.0:8080 --workers 2 app:app"),
            "flask\ngunicorn\n",
            "gunicorn --bind 0.0.0.0:8080 --workers 2 app:app",
        ),
        Framework::Fastapi => (
            python_dockerfile("uvicorn main:app --host 0.0.0.0 --port 8080"),
            "fastapi\nuvicorn[standard]\n",
            "uvicorn main:app --host 0.0.0.0 --port 8080",
        ),
        Framework::Express => (
            "FROM node:20-slim\n\
             WORKDIR /app\n\
             COPY package*.json ./\n\
             RUN npm install --omit=dev\n\
             COPY . .\n\
             ENV PORT=8080\n\
             EXPOSE 8080\n\
             CMD [\"node\", \"index.js\"]\n"
                .to_string(),
            "",
            "node index.js",
        ),
        Framework::React => (
            "FROM node:20-slim\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN npm install && npm run build && npm install -g serve\n\
             EXPOSE 8080\n\
             CMD [\"serve\", \"-s\", \"dist\", \"-l\", \"8080\"]\n"
                .to_string(),
            "",
            "serve -s dist -l 8080",
        ),
        Framework::Nextjs => (
            "FROM node:20-slim\n\
             WORKDIR /app\n\
             COPY . .\n\
             RUN npm install && npm run build\n\
             ENV PORT=8080\n\
             EXPOSE 8080\n\
             CMD [\"npm\", \"start\", \"--\", \"-p\", \"8080\"]\n"
                .to_string(),
            "",
            "npm start -- -p 8080",
        ),
        Framework::Static => (
            "FROM nginx:alpine\n\
             COPY . /usr/share/nginx/html\n\
             RUN sed -i 's/listen       80;/listen 8080;/' /etc/nginx/conf.d/default.conf\n\
             EXPOSE 8080\n"
                .to_string(),
            "",
            "nginx -g 'daemon off;'",
        ),
    };

    let default_dependency_manifest = if framework.is_python()
        || framework == Framework::Unknown
    {
        (!has_dependency_manifest && !default_manifest.is_empty()).then_some(default_manifest)
    } else {
        None
    };

    Recipe {
        dockerfile,
        default_dependency_manifest,
        launch_command,
    }
}

fn python_preamble() -> String {
    "FROM python:3.11-slim\n\
     WORKDIR /app\n\
     COPY . .\n\
     RUN pip install --no-cache-dir -r requirements.txt\n\
     EXPOSE 8080\n"
        .to_string()
}

fn python_dockerfile(cmd: &str) -> String {
    let cmd_json: Vec<String> = cmd.split(' ').map(|part| format!("\"{part}\"")).collect();
    format!("{}CMD [{}]\n", python_preamble(), cmd_json.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Framework; 9] = [
        Framework::Streamlit,
        Framework::Gradio,
        Framework::Flask,
        Framework::Fastapi,
        Framework::React,
        Framework::Nextjs,
        Framework::Express,
        Framework::Static,
        Framework::Unknown,
    ];

    #[test]
    fn every_recipe_listens_on_8080() {
        for fw in ALL {
            let recipe = for_framework(fw, true);
            assert!(recipe.dockerfile.contains("8080"), "{fw} missing port");
        }
    }

    #[test]
    fn recipes_are_deterministic() {
        for fw in ALL {
            assert_eq!(
                for_framework(fw, false).dockerfile,
                for_framework(fw, false).dockerfile
            );
        }
    }

    #[test]
    fn python_labels_get_default_manifest_only_when_missing() {
        for fw in [
            Framework::Streamlit,
            Framework::Gradio,
            Framework::Flask,
            Framework::Fastapi,
        ] {
            assert!(for_framework(fw, false).default_dependency_manifest.is_some());
            assert!(for_framework(fw, true).default_dependency_manifest.is_none());
        }
    }

    #[test]
    fn node_labels_never_get_a_python_manifest() {
        for fw in [Framework::React, Framework::Nextjs, Framework::Express, Framework::Static] {
            assert!(for_framework(fw, false).default_dependency_manifest.is_none());
        }
    }

    #[test]
    fn flask_uses_gunicorn() {
        let recipe = for_framework(Framework::Flask, true);
        assert!(recipe.dockerfile.contains("gunicorn"));
    }
}
