//! Static table of supported stacks.
//!
//! Each entry pairs the stack's required files and internal port with pure
//! template functions for its Dockerfile and its minimal fallback app.
//! Adding a stack means adding one [`StackDescriptor`] to [`STACKS`].

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StackKind {
    ViteReact,
    ViteVue,
    ViteSvelte,
    NextJs,
    StaticHtml,
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(descriptor(*self).display_name)
    }
}

/// Stack used when a label is not recognised.
pub const DEFAULT_STACK: StackKind = StackKind::ViteReact;

pub struct StackDescriptor {
    pub kind: StackKind,
    pub display_name: &'static str,
    /// Normalised labels (lowercase, no separators) that resolve to this stack.
    pub aliases: &'static [&'static str],
    pub required_files: &'static [&'static str],
    pub container_port: u16,
    pub dockerfile: fn() -> String,
    /// Minimal app that builds and serves a placeholder page.
    pub fallback_files: fn(project_name: &str) -> Vec<(&'static str, String)>,
}

impl fmt::Debug for StackDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackDescriptor")
            .field("kind", &self.kind)
            .field("required_files", &self.required_files)
            .field("container_port", &self.container_port)
            .finish()
    }
}

pub const DOCKERFILE: &str = "Dockerfile";

pub static STACKS: [StackDescriptor; 5] = [
    StackDescriptor {
        kind: StackKind::ViteReact,
        display_name: "Vite + React",
        aliases: &["vitereact", "vite", "react", "reactvite", "vitereactts", "reactts"],
        required_files: &["package.json", "index.html", DOCKERFILE],
        container_port: 80,
        dockerfile: vite_dockerfile,
        fallback_files: react_fallback,
    },
    StackDescriptor {
        kind: StackKind::ViteVue,
        display_name: "Vite + Vue",
        aliases: &["vitevue", "vue", "vuevite", "vue3", "vitevuets"],
        required_files: &["package.json", "index.html", DOCKERFILE],
        container_port: 80,
        dockerfile: vite_dockerfile,
        fallback_files: vue_fallback,
    },
    StackDescriptor {
        kind: StackKind::ViteSvelte,
        display_name: "Vite + Svelte",
        aliases: &["vitesvelte", "svelte", "sveltevite"],
        required_files: &["package.json", "index.html", DOCKERFILE],
        container_port: 80,
        dockerfile: vite_dockerfile,
        fallback_files: svelte_fallback,
    },
    StackDescriptor {
        kind: StackKind::NextJs,
        display_name: "Next.js",
        aliases: &["nextjs", "next", "nextreact", "reactnext", "nextjsreact"],
        required_files: &["package.json", DOCKERFILE],
        container_port: 3000,
        dockerfile: next_dockerfile,
        fallback_files: next_fallback,
    },
    StackDescriptor {
        kind: StackKind::StaticHtml,
        display_name: "Static HTML",
        aliases: &["static", "statichtml", "html", "plainhtml", "htmlcss", "htmlcssjs"],
        required_files: &["index.html", DOCKERFILE],
        container_port: 80,
        dockerfile: static_dockerfile,
        fallback_files: static_fallback,
    },
];

static SEPARATORS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase the label and drop every separator, so `"Vite + React"`,
/// `"vite-react"` and `"vite_react"` all become `"vitereact"`.
pub fn normalize_label(label: &str) -> String {
    SEPARATORS_RE
        .replace_all(&label.to_lowercase(), "")
        .into_owned()
}

/// Resolve a stack label. Unknown labels resolve to [`DEFAULT_STACK`] so a
/// generation result is always deployable.
pub fn resolve_stack(label: &str) -> &'static StackDescriptor {
    let normalized = normalize_label(label);
    STACKS
        .iter()
        .find(|s| s.aliases.contains(&normalized.as_str()))
        .unwrap_or_else(|| {
            tracing::debug!(label, "unrecognised stack label, using default");
            descriptor(DEFAULT_STACK)
        })
}

pub fn descriptor(kind: StackKind) -> &'static StackDescriptor {
    match kind {
        StackKind::ViteReact => &STACKS[0],
        StackKind::ViteVue => &STACKS[1],
        StackKind::ViteSvelte => &STACKS[2],
        StackKind::NextJs => &STACKS[3],
        StackKind::StaticHtml => &STACKS[4],
    }
}

// ─── Dockerfiles ───────────────────────────────────────────────────────

fn vite_dockerfile() -> String {
    r#"FROM node:20-alpine AS build
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
RUN npm run build

FROM nginx:alpine
COPY --from=build /app/dist /usr/share/nginx/html
EXPOSE 80
CMD ["nginx", "-g", "daemon off;"]
"#
    .to_string()
}

fn next_dockerfile() -> String {
    r#"FROM node:20-alpine
WORKDIR /app
COPY package*.json ./
RUN npm install
COPY . .
RUN npm run build
ENV NODE_ENV=production
ENV PORT=3000
EXPOSE 3000
CMD ["npm", "start"]
"#
    .to_string()
}

fn static_dockerfile() -> String {
    r#"FROM nginx:alpine
COPY . /usr/share/nginx/html
EXPOSE 80
CMD ["nginx", "-g", "daemon off;"]
"#
    .to_string()
}

// ─── Fallback apps ─────────────────────────────────────────────────────

fn package_name(project_name: &str) -> String {
    let name: String = project_name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let name = name.trim_matches('-').to_string();
    if name.is_empty() {
        "preview-app".to_string()
    } else {
        name
    }
}

fn vite_package_json(project_name: &str, dependencies: &str, dev_dependencies: &str) -> String {
    format!(
        r#"{{
  "name": "{}",
  "private": true,
  "version": "0.0.0",
  "type": "module",
  "scripts": {{
    "dev": "vite",
    "build": "vite build",
    "preview": "vite preview"
  }},
  "dependencies": {{
{dependencies}
  }},
  "devDependencies": {{
{dev_dependencies}
  }}
}}
"#,
        package_name(project_name)
    )
}

/// Entity-encode text placed inside HTML, JSX, Vue or Svelte markup. Braces
/// are encoded too since every template dialect treats them as expressions.
fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            c => out.push(c),
        }
    }
    out
}

fn vite_index_html(project_name: &str, entry: &str) -> String {
    let title = escape_markup(project_name);
    format!(
        r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>{title}</title>
  </head>
  <body>
    <div id="app"></div>
    <script type="module" src="{entry}"></script>
  </body>
</html>
"#
    )
}

fn placeholder_message(project_name: &str) -> String {
    format!(
        "{} is being prepared. This is a placeholder page.",
        escape_markup(project_name)
    )
}

fn react_fallback(project_name: &str) -> Vec<(&'static str, String)> {
    let message = placeholder_message(project_name);
    vec![
        (
            "package.json",
            vite_package_json(
                project_name,
                "    \"react\": \"^18.3.1\",\n    \"react-dom\": \"^18.3.1\"",
                "    \"@vitejs/plugin-react\": \"^4.3.1\",\n    \"vite\": \"^5.4.0\"",
            ),
        ),
        ("index.html", vite_index_html(project_name, "/src/main.jsx")),
        (
            "vite.config.js",
            "import { defineConfig } from 'vite';\nimport react from '@vitejs/plugin-react';\n\nexport default defineConfig({ plugins: [react()] });\n".to_string(),
        ),
        (
            "src/main.jsx",
            format!(
                "import React from 'react';\nimport {{ createRoot }} from 'react-dom/client';\n\nfunction App() {{\n  return <main><h1>{message}</h1></main>;\n}}\n\ncreateRoot(document.getElementById('app')).render(<App />);\n"
            ),
        ),
    ]
}

fn vue_fallback(project_name: &str) -> Vec<(&'static str, String)> {
    let message = placeholder_message(project_name);
    vec![
        (
            "package.json",
            vite_package_json(
                project_name,
                "    \"vue\": \"^3.4.0\"",
                "    \"@vitejs/plugin-vue\": \"^5.1.0\",\n    \"vite\": \"^5.4.0\"",
            ),
        ),
        ("index.html", vite_index_html(project_name, "/src/main.js")),
        (
            "vite.config.js",
            "import { defineConfig } from 'vite';\nimport vue from '@vitejs/plugin-vue';\n\nexport default defineConfig({ plugins: [vue()] });\n".to_string(),
        ),
        (
            "src/main.js",
            "import { createApp } from 'vue';\nimport App from './App.vue';\n\ncreateApp(App).mount('#app');\n".to_string(),
        ),
        (
            "src/App.vue",
            format!("<template>\n  <main><h1>{message}</h1></main>\n</template>\n"),
        ),
    ]
}

fn svelte_fallback(project_name: &str) -> Vec<(&'static str, String)> {
    let message = placeholder_message(project_name);
    vec![
        (
            "package.json",
            vite_package_json(
                project_name,
                "",
                "    \"@sveltejs/vite-plugin-svelte\": \"^3.1.0\",\n    \"svelte\": \"^4.2.0\",\n    \"vite\": \"^5.4.0\"",
            ),
        ),
        ("index.html", vite_index_html(project_name, "/src/main.js")),
        (
            "vite.config.js",
            "import { defineConfig } from 'vite';\nimport { svelte } from '@sveltejs/vite-plugin-svelte';\n\nexport default defineConfig({ plugins: [svelte()] });\n".to_string(),
        ),
        (
            "src/main.js",
            "import App from './App.svelte';\n\nconst app = new App({ target: document.getElementById('app') });\n\nexport default app;\n".to_string(),
        ),
        ("src/App.svelte", format!("<main><h1>{message}</h1></main>\n")),
    ]
}

fn next_fallback(project_name: &str) -> Vec<(&'static str, String)> {
    let message = placeholder_message(project_name);
    vec![
        (
            "package.json",
            format!(
                r#"{{
  "name": "{}",
  "private": true,
  "version": "0.0.0",
  "scripts": {{
    "dev": "next dev",
    "build": "next build",
    "start": "next start -p ${{PORT:-3000}}"
  }},
  "dependencies": {{
    "next": "^14.2.0",
    "react": "^18.3.1",
    "react-dom": "^18.3.1"
  }}
}}
"#,
                package_name(project_name)
            ),
        ),
        (
            "pages/index.js",
            format!("export default function Home() {{\n  return <main><h1>{message}</h1></main>;\n}}\n"),
        ),
    ]
}

fn static_fallback(project_name: &str) -> Vec<(&'static str, String)> {
    let message = placeholder_message(project_name);
    let title = escape_markup(project_name);
    vec![(
        "index.html",
        format!(
            "<!doctype html>\n<html lang=\"en\">\n  <head>\n    <meta charset=\"UTF-8\" />\n    <title>{title}</title>\n  </head>\n  <body>\n    <h1>{message}</h1>\n  </body>\n</html>\n"
        ),
    )]
}
