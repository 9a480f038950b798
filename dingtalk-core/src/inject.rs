//! Bootstrap script that connects a page to the chii bridge, and the two
//! ways of getting it into the page.

use std::sync::OnceLock;

/// DOM id of the injected chii `<script>` element.
pub const MARKER_ID: &str = "__dingtalk_chii_target";

const CLIENT_MODULE_TEMPLATE: &str = r#"const MARKER_ID = "__MARKER_ID__";

function injectChiiTarget() {
  if (document.getElementById(MARKER_ID)) {
    return;
  }
  const script = document.createElement("script");
  script.id = MARKER_ID;
  script.src = "__TARGET_SRC__";
__EMBEDDED__  document.body.appendChild(script);
}

injectChiiTarget();

const hot = import.meta.hot || (typeof module !== "undefined" && module.hot);
if (hot) {
  hot.accept(() => {
    const previous = document.getElementById(MARKER_ID);
    if (previous) {
      previous.remove();
    }
    injectChiiTarget();
  });
}
"#;

/// Source of the bootstrap module served at the client asset path.
pub fn client_module_code(proxy_prefix: &str, embedded: bool) -> String {
    let embedded_line = if embedded {
        "  script.setAttribute(\"embedded\", \"true\");\n"
    } else {
        ""
    };

    CLIENT_MODULE_TEMPLATE
        .replace("__MARKER_ID__", MARKER_ID)
        .replace("__TARGET_SRC__", &format!("{}/target.js", proxy_prefix))
        .replace("__EMBEDDED__", embedded_line)
}

pub fn html_tag(client_path: &str) -> String {
    format!(r#"<script type="module" src="{}"></script>"#, client_path)
}

/// Inserts the bootstrap tag before the last `</body>`.
///
/// Documents that already carry the exact tag are returned unchanged.
/// Without a closing body tag the script is appended at the end.
pub fn inject_html(html: &str, client_path: &str) -> Option<String> {
    let tag = html_tag(client_path);
    if html.contains(&tag) {
        return None;
    }

    let lowered = html.to_ascii_lowercase();
    let mut patched = String::with_capacity(html.len() + tag.len() + 1);
    match lowered.rfind("</body>") {
        Some(index) => {
            patched.push_str(&html[..index]);
            patched.push_str(&tag);
            patched.push('\n');
            patched.push_str(&html[index..]);
        }
        None => {
            patched.push_str(html);
            patched.push('\n');
            patched.push_str(&tag);
        }
    }
    Some(patched)
}

pub fn module_import(client_path: &str) -> String {
    // Dynamic import so the line is valid in classic scripts as well as modules
    format!("import(\"{}\");\n", client_path)
}

/// Prepends the bootstrap import to a module unless it is already there.
pub fn inject_module(source: &str, client_path: &str) -> Option<String> {
    let import = module_import(client_path);
    if source.starts_with(&import) {
        return None;
    }
    Some(format!("{}{}", import, source))
}

const SCRIPT_EXTENSIONS: &[&str] = &[".js", ".mjs", ".cjs", ".jsx", ".ts", ".mts", ".tsx", ".vue"];

const LIBRARY_MARKERS: &[&str] = &[
    "/node_modules/",
    "/.vite/",
    "/@vite/",
    "/@id/",
    "/@fs/",
    "/__webpack_hmr",
    ".hot-update.",
    "chunk-vendors",
    "vendors~",
];

/// Whether `path` looks like application code rather than a dependency,
/// a bundler runtime chunk or a hot-update patch.
pub fn is_application_module(path: &str) -> bool {
    if !SCRIPT_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }
    !LIBRARY_MARKERS.iter().any(|marker| path.contains(marker))
}

/// Remembers which module received the bootstrap import.
///
/// The first application module served becomes the entry for the lifetime of
/// the process; later modules are left alone so the bridge client is loaded
/// once per page.
#[derive(Debug, Default)]
pub struct ModuleEntry {
    entry: OnceLock<String>,
}

impl ModuleEntry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when `path` is (or has just become) the injection entry.
    pub fn claim(&self, path: &str) -> bool {
        if !is_application_module(path) {
            return false;
        }
        self.entry.get_or_init(|| path.to_string()) == path
    }

    pub fn get(&self) -> Option<&str> {
        self.entry.get().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIENT: &str = "/abcd1234/__chii_client.js";

    #[test]
    fn test_client_module_points_at_proxy() {
        let code = client_module_code("/abcd1234/__chii_proxy", false);
        assert!(code.contains(r#"script.src = "/abcd1234/__chii_proxy/target.js";"#));
        assert!(code.contains(MARKER_ID));
        assert!(code.contains("hot.accept"));
        assert!(!code.contains("embedded"));
    }

    #[test]
    fn test_client_module_embedded() {
        let code = client_module_code("/abcd1234/__chii_proxy", true);
        assert!(code.contains(r#"script.setAttribute("embedded", "true");"#));
    }

    #[test]
    fn test_inject_html_before_body_close() {
        let html = "<html><body><div id=\"app\"></div></body></html>";
        let patched = inject_html(html, CLIENT).unwrap();
        let tag_at = patched.find(&html_tag(CLIENT)).unwrap();
        assert!(tag_at < patched.find("</body>").unwrap());
        assert!(patched.ends_with("</body></html>"));
    }

    #[test]
    fn test_inject_html_is_idempotent() {
        let html = "<html><BODY><p>hi</p></BODY></html>";
        let once = inject_html(html, CLIENT).unwrap();
        assert!(inject_html(&once, CLIENT).is_none());
        assert_eq!(once.matches(&html_tag(CLIENT)).count(), 1);
    }

    #[test]
    fn test_inject_html_without_body() {
        let patched = inject_html("<p>fragment</p>", CLIENT).unwrap();
        assert!(patched.ends_with(&html_tag(CLIENT)));
    }

    #[test]
    fn test_inject_html_uses_last_body_close() {
        let html = "<body><script>const s = '</body>';</script></body>";
        let patched = inject_html(html, CLIENT).unwrap();
        assert!(patched.ends_with(&format!("{}\n</body>", html_tag(CLIENT))));
    }

    #[test]
    fn test_inject_module_once() {
        let source = "import { createApp } from 'vue';\n";
        let patched = inject_module(source, CLIENT).unwrap();
        assert!(patched.starts_with(&module_import(CLIENT)));
        assert!(patched.ends_with(source));
        assert!(inject_module(&patched, CLIENT).is_none());
    }

    #[test]
    fn test_application_module_detection() {
        assert!(is_application_module("/src/main.ts"));
        assert!(is_application_module("/js/app.js"));
        assert!(!is_application_module("/node_modules/vue/dist/vue.js"));
        assert!(!is_application_module("/node_modules/.vite/deps/vue.js"));
        assert!(!is_application_module("/@vite/client"));
        assert!(!is_application_module("/main.3f2a.hot-update.js"));
        assert!(!is_application_module("/js/chunk-vendors.js"));
        assert!(!is_application_module("/js/vendors~main.chunk.js"));
        assert!(!is_application_module("/css/app.css"));
        assert!(!is_application_module("/js/app.js.map"));
    }

    #[test]
    fn test_module_entry_claimed_once() {
        let entry = ModuleEntry::new();
        assert!(!entry.claim("/node_modules/lib.js"));
        assert!(!entry.claim("/js/chunk-vendors.js"));
        assert_eq!(entry.get(), None);

        assert!(entry.claim("/src/main.ts"));
        assert!(entry.claim("/src/main.ts"));
        assert!(!entry.claim("/src/other.ts"));
        assert_eq!(entry.get(), Some("/src/main.ts"));
    }
}
