//! Sitemap generation.
//!
//! Reads only cached fields, so proxied outputs are never materialized.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
//!   <url>
//!     <loc>https://example.com/posts/a/</loc>
//!     <lastmod>2025-01-01</lastmod>
//!   </url>
//! </urlset>
//! ```

use crate::{
    log,
    output::{OutputSet, OutputView},
};
use anyhow::{Context, Result};
use std::{fmt::Write as _, fs, path::Path};

const SITEMAP_NS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Write `sitemap.xml` for every output in `outputs` to `path`.
pub fn write_sitemap(outputs: &OutputSet, base_url: &str, path: &Path) -> Result<()> {
    let xml = Sitemap::from_outputs(outputs, base_url).into_xml();
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    fs::write(path, xml).with_context(|| format!("Failed to write sitemap to {}", path.display()))?;
    log!("build"; "sitemap: {} urls", outputs.len());
    Ok(())
}

pub struct Sitemap {
    urls: Vec<UrlEntry>,
}

struct UrlEntry {
    loc: String,
    /// `YYYY-MM-DD`
    lastmod: Option<String>,
}

impl Sitemap {
    pub fn from_outputs(outputs: &OutputSet, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let urls = outputs
            .iter()
            .map(|output| UrlEntry {
                loc: absolute_url(base, output.url()),
                lastmod: output.date().and_then(ymd),
            })
            .collect();
        Self { urls }
    }

    pub fn into_xml(self) -> String {
        let mut xml = String::with_capacity(64 + self.urls.len() * 96);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(xml, r#"<urlset xmlns="{SITEMAP_NS}">"#);
        for entry in self.urls {
            xml.push_str("  <url>\n");
            let _ = writeln!(xml, "    <loc>{}</loc>", escape_xml(&entry.loc));
            if let Some(lastmod) = entry.lastmod {
                let _ = writeln!(xml, "    <lastmod>{lastmod}</lastmod>");
            }
            xml.push_str("  </url>\n");
        }
        xml.push_str("</urlset>\n");
        xml
    }
}

fn absolute_url(base: &str, url: &str) -> String {
    if url.contains("://") {
        url.to_owned()
    } else {
        format!("{base}/{}", url.trim_start_matches('/'))
    }
}

/// Date prefix of an ISO-8601 timestamp, if it looks like one.
fn ymd(date: &str) -> Option<String> {
    let day = date.get(..10)?;
    let bytes = day.as_bytes();
    let shape = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| if i == 4 || i == 7 { *b == b'-' } else { b.is_ascii_digit() });
    shape.then(|| day.to_owned())
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
