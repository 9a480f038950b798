//! Dev-server hosts the gateway can sit in front of.
//!
//! Each host only decides two things: which injection strategy reaches the
//! page, and which port its dev server listens on by default. Everything
//! else (proxy, picker, deep link) is identical across hosts.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    #[default]
    Vite,
    Webpack,
    Rspack,
    Nuxt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionStrategy {
    /// Patch served HTML before `</body>`.
    Html,
    /// Prepend a bootstrap import to the first application module.
    ModuleGraph,
}

impl HostKind {
    pub fn injection_strategy(self) -> InjectionStrategy {
        match self {
            // Nuxt renders HTML on the server; the render step is where the tag goes
            HostKind::Vite | HostKind::Nuxt => InjectionStrategy::Html,
            HostKind::Webpack | HostKind::Rspack => InjectionStrategy::ModuleGraph,
        }
    }

    pub fn default_dev_port(self) -> u16 {
        match self {
            HostKind::Vite => 5173,
            HostKind::Webpack | HostKind::Rspack => 8080,
            HostKind::Nuxt => 3000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HostKind::Vite => "vite",
            HostKind::Webpack => "webpack",
            HostKind::Rspack => "rspack",
            HostKind::Nuxt => "nuxt",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vite" => Ok(HostKind::Vite),
            "webpack" | "vue-cli" => Ok(HostKind::Webpack),
            "rspack" | "rsbuild" => Ok(HostKind::Rspack),
            "nuxt" => Ok(HostKind::Nuxt),
            other => Err(format!(
                "unknown host `{}` (expected vite, webpack, rspack or nuxt)",
                other
            )),
        }
    }
}
