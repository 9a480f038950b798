//! Page listing the debug targets attached to the bridge.
//!
//! The page itself fetches `<proxy prefix>/targets` in the browser every time
//! it is shown, so the list is never cached. The same list can also be
//! rendered server-side for clients without JavaScript.

use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Deserialize;
use uuid::Uuid;

pub const EMPTY_PLACEHOLDER: &str = "No debug targets available.";
pub const FAILED_PLACEHOLDER: &str = "Failed to load debug targets.";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugTarget {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetList {
    #[serde(default)]
    pub targets: Vec<DebugTarget>,
}

/// Random token for the devtools websocket path, so repeated opens do not
/// reuse a cached front-end connection.
pub fn session_token() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_string()
}

pub fn devtools_url(bridge_port: u16, target_id: &str, token: &str) -> String {
    format!(
        "http://localhost:{port}/front_end/chii_app.html?ws=localhost:{port}/client/{token}?target={target}&rtc=false",
        port = bridge_port,
        token = token,
        target = urlencoding::encode(target_id),
    )
}

/// `<li>` items for the given targets, or the empty placeholder.
pub fn render_target_items(targets: &[DebugTarget], bridge_port: u16) -> String {
    if targets.is_empty() {
        return format!("<li>{}</li>", EMPTY_PLACEHOLDER);
    }

    targets
        .iter()
        .map(|target| {
            let link = devtools_url(bridge_port, &target.id, &session_token());
            format!(
                "<li><div><strong>{}</strong></div><div>URL: {}</div><div>UA: <code>{}</code></div><a href=\"{}\" target=\"_blank\" class=\"button\">Open devtools</a></li>",
                encode_text(&target.title),
                encode_text(target.url.as_deref().unwrap_or("")),
                encode_text(target.user_agent.as_deref().unwrap_or("unknown")),
                encode_double_quoted_attribute(&link),
            )
        })
        .collect()
}

pub fn render_failed_item() -> String {
    format!("<li>{}</li>", FAILED_PLACEHOLDER)
}

const PICKER_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>DevTools Targets</title>
  <style>
    body { font-family: sans-serif; padding: 2em; }
    ul { padding: 0; }
    li { margin-bottom: 1.2em; list-style: none; line-height: 1.5; }
    a.button {
      display: inline-block;
      background: #409eff;
      color: #fff;
      padding: 0.2em 0.5em;
      text-decoration: none;
      border-radius: 4px;
      margin-top: 0.5em;
      font-size: 14px;
    }
    a.button:hover { background: #66b1ff; }
    #refresh { margin-bottom: 1.5em; }
  </style>
</head>
<body>
  <h2>Available DevTools targets</h2>
  <button id="refresh">Refresh</button>
  <noscript><p><a href="__LIST_PATH__">Show targets without JavaScript</a></p></noscript>
  <ul id="target-list">
    <li>Loading...</li>
  </ul>
  <script>
    const BRIDGE_PORT = __BRIDGE_PORT__;

    function escapeHtml(value) {
      return String(value)
        .replace(/&/g, "&amp;")
        .replace(/</g, "&lt;")
        .replace(/>/g, "&gt;")
        .replace(/"/g, "&quot;")
        .replace(/'/g, "&#39;");
    }

    function devtoolsUrl(targetId) {
      const token = Math.random().toString(36).substring(2, 8);
      return "http://localhost:" + BRIDGE_PORT + "/front_end/chii_app.html?ws=localhost:" + BRIDGE_PORT
        + "/client/" + token + "?target=" + encodeURIComponent(targetId) + "&rtc=false";
    }

    async function fetchTargets() {
      const list = document.getElementById("target-list");
      list.innerHTML = "<li>Loading...</li>";
      try {
        const resp = await fetch("__PROXY_PREFIX__/targets", { cache: "no-store" });
        const data = await resp.json();
        const targets = data.targets || [];
        if (targets.length === 0) {
          list.innerHTML = "<li>__EMPTY__</li>";
          return;
        }
        list.innerHTML = "";
        for (const target of targets) {
          const item = document.createElement("li");
          item.innerHTML =
            "<div><strong>" + escapeHtml(target.title || "") + "</strong></div>" +
            "<div>URL: " + escapeHtml(target.url || "") + "</div>" +
            "<div>UA: <code>" + escapeHtml(target.userAgent || "unknown") + "</code></div>" +
            "<a href=\"" + escapeHtml(devtoolsUrl(target.id)) + "\" target=\"_blank\" class=\"button\">Open devtools</a>";
          list.appendChild(item);
        }
      } catch (e) {
        list.innerHTML = "<li>__FAILED__</li>";
      }
    }

    document.getElementById("refresh").onclick = fetchTargets;
    document.addEventListener("visibilitychange", () => {
      if (document.visibilityState === "visible") {
        fetchTargets();
      }
    });
    window.onload = fetchTargets;
  </script>
</body>
</html>
"#;

pub fn render_picker_page(bridge_port: u16, proxy_prefix: &str, list_path: &str) -> String {
    PICKER_TEMPLATE
        .replace("__BRIDGE_PORT__", &bridge_port.to_string())
        .replace("__PROXY_PREFIX__", proxy_prefix)
        .replace("__LIST_PATH__", list_path)
        .replace("__EMPTY__", EMPTY_PLACEHOLDER)
        .replace("__FAILED__", FAILED_PLACEHOLDER)
}

/// Standalone document wrapping server-rendered list items.
pub fn render_list_document(items: &str, picker_path: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>DevTools Targets</title></head>\n<body>\n<h2>Available DevTools targets</h2>\n<p><a href=\"{}\">Back</a></p>\n<ul id=\"target-list\">{}</ul>\n</body>\n</html>\n",
        picker_path, items
    )
}
