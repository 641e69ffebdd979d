//! Document assembler: builds one self-contained HTML document from an
//! outline, its resolved styles and the layout engine assets.
//!
//! Per-node colors and stroke widths are resolved here on the host and
//! attached to each node's payload. The bootstrap script inside the document
//! only reads those values back as data, so nothing executable crosses the
//! host/context boundary except the static scripts themselves.

use crate::assets::{AssetBundle, AssetRef};
use crate::style::StyleConfig;
use crate::tree::Node;
use crate::watcher::WatchSettings;
use crate::{Result, Size};
use log::debug;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

const FONT_STACK: &str = "'Noto Sans SC', 'Microsoft YaHei', 'SimHei', 'SimSun', 'Arial', sans-serif";

const HEAD_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>
{{FONT_FACES}}
body,
#mindmap {
  width: {{WIDTH}}px;
  height: {{HEIGHT}}px;
  margin: 0;
  padding: 0;
  overflow: hidden;
  font-family: {{FONT_STACK}};
}
.markmap-link {
  fill: none;
  stroke-width: 2px;
  stroke-opacity: 0.8;
}
.markmap-node > circle {
  stroke-width: 2px;
  stroke: #fff;
  filter: drop-shadow(0 2px 4px rgba(0,0,0,0.1));
}
.markmap-node > text {
  font-family: {{FONT_STACK}};
  font-weight: 500;
  font-size: 14px;
}
svg text {
  font-family: {{FONT_STACK}};
}
{{FEATURE_CSS}}
</style>
</head>
<body>
<svg id="mindmap"></svg>
"#;

const BOOTSTRAP_TEMPLATE: &str = r#"(function () {
  var layout = {{LAYOUT}};
  var fallback = {{FALLBACK}};
  var data = {{DATA}};
  var svg = document.getElementById('mindmap');
  try {
    var Markmap = window.markmap && window.markmap.Markmap;
    if (!Markmap) { throw new Error('markmap-view runtime is missing'); }
    var options = Object.assign({}, layout, {
      color: function (node) { return (node.payload && node.payload.color) || fallback.color; },
      lineWidth: function (node) { return (node.payload && node.payload.lineWidth) || fallback.lineWidth; }
    });
    var mm = Markmap.create(svg, options);
    window.__mindmapWatch(svg);
    Promise.resolve(mm.setData(data))
      .then(function () { return mm.fit(); })
      .catch(window.__mindmapFail);
  } catch (err) {
    window.__mindmapFail(err);
  }
})();"#;

/// An assembled, ready-to-load document
#[derive(Debug, Clone)]
pub struct Document {
    pub html: String,
    /// Hex SHA-256 of `html`, for correlating renders in logs
    pub fingerprint: String,
    pub node_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Fallback {
    color: &'static str,
    line_width: f64,
}

/// Mark every node with children as unfolded
pub fn expand_all(root: &mut Node) {
    root.walk_mut(&mut |node| {
        if node.has_children() {
            node.payload.fold = Some(false);
        }
    });
}

/// Resolve each node's color and stroke width into its payload
pub fn apply_styles(root: &mut Node, style: &StyleConfig) {
    root.walk_mut(&mut |node| {
        let color = style.color(node);
        let width = style.line_width(node);
        node.payload.color = Some(color.to_string());
        node.payload.line_width = Some(width);
    });
}

/// Build the document for `root`.
///
/// `refs` lists the static resources to embed, in order; scripts are looked
/// up in `bundle`.
pub fn assemble(
    mut root: Node,
    refs: &[AssetRef],
    bundle: &AssetBundle,
    style: &StyleConfig,
    size: Size,
    watch: &WatchSettings,
) -> Result<Document> {
    expand_all(&mut root);
    apply_styles(&mut root, style);
    let node_count = root.node_count();

    let mut feature_css = Vec::new();
    let mut scripts = Vec::new();
    for asset in refs {
        match asset {
            AssetRef::Style(css) => feature_css.push(*css),
            AssetRef::Script(name) => scripts.push(bundle.script(name)?),
        }
    }

    let mut font_faces = bundle.font_face_css();
    if font_faces.is_empty() {
        font_faces.push_str("/* system fonts only */");
    }
    let mut html = HEAD_TEMPLATE
        .replace("{{WIDTH}}", &size.width.to_string())
        .replace("{{HEIGHT}}", &size.height.to_string())
        .replace("{{FONT_STACK}}", &font_stack(bundle))
        .replace("{{FEATURE_CSS}}", &feature_css.join("\n"))
        .replace("{{FONT_FACES}}", &font_faces);

    push_script(&mut html, &watch.context_script());
    for source in scripts {
        push_script(&mut html, source);
    }
    push_script(&mut html, &bootstrap(&root, style)?);
    html.push_str("</body>\n</html>\n");

    let fingerprint = hex::encode(Sha256::digest(html.as_bytes()));
    debug!(
        "Assembled document {} ({} nodes, {} bytes)",
        &fingerprint[..12],
        node_count,
        html.len()
    );
    Ok(Document {
        html,
        fingerprint,
        node_count,
    })
}

fn bootstrap(root: &Node, style: &StyleConfig) -> Result<String> {
    let fallback = Fallback {
        color: style.fallback_color(),
        line_width: style.line_width.base,
    };
    let layout = script_json(&style.layout)?;
    let fallback = script_json(&fallback)?;
    let data = script_json(root)?;
    // data goes in last so node content never meets a template token
    Ok(BOOTSTRAP_TEMPLATE
        .replace("{{LAYOUT}}", &layout)
        .replace("{{FALLBACK}}", &fallback)
        .replace("{{DATA}}", &data))
}

/// JSON safe to embed inside a `<script>` element
pub fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let json = serde_json::to_string(value)
        .map_err(|e| crate::Error::RenderError(format!("failed to serialize document data: {}", e)))?;
    Ok(json.replace('<', "\\u003c"))
}

fn push_script(html: &mut String, source: &str) {
    html.push_str("<script>\n");
    html.push_str(&neutralize_script_end(source));
    html.push_str("\n</script>\n");
}

/// Rewrite `</script` (any case) so inline code cannot close its element
fn neutralize_script_end(source: &str) -> Cow<'_, str> {
    const NEEDLE: &str = "</script";
    let lower = source.to_ascii_lowercase();
    if !lower.contains(NEEDLE) {
        return Cow::Borrowed(source);
    }
    let mut out = String::with_capacity(source.len() + 8);
    let mut last = 0;
    for (idx, _) in lower.match_indices(NEEDLE) {
        out.push_str(&source[last..idx]);
        out.push_str("<\\/");
        last = idx + 2;
    }
    out.push_str(&source[last..]);
    Cow::Owned(out)
}

fn font_stack(bundle: &AssetBundle) -> String {
    let mut families: Vec<String> = Vec::new();
    for font in bundle.fonts() {
        let quoted = font.quoted_family();
        if !families.contains(&quoted) {
            families.push(quoted);
        }
    }
    families.push(FONT_STACK.to_string());
    families.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{assets_for, EmbeddedFont, D3_SCRIPT, MARKMAP_VIEW_SCRIPT};
    use crate::tree::Feature;
    use std::collections::BTreeSet;

    fn bundle() -> AssetBundle {
        AssetBundle::from_scripts([
            (D3_SCRIPT, "window.d3 = {};"),
            (MARKMAP_VIEW_SCRIPT, "window.markmap = { Markmap: {} };"),
        ])
    }

    fn tree() -> Node {
        let mut root = Node::new("A").with_children(vec![
            Node::new("B").with_children(vec![Node::new("C")]),
            Node::new("D"),
        ]);
        root.assign_positions();
        root
    }

    fn build(root: Node) -> Document {
        assemble(
            root,
            &assets_for(&BTreeSet::new()),
            &bundle(),
            &StyleConfig::default(),
            Size { width: 800, height: 600 },
            &WatchSettings::default(),
        )
        .unwrap()
    }

    #[test]
    fn expand_all_unfolds_only_parents() {
        let mut root = tree();
        expand_all(&mut root);
        assert_eq!(root.payload.fold, Some(false));
        assert_eq!(root.children[0].payload.fold, Some(false));
        assert_eq!(root.children[0].children[0].payload.fold, None);
        assert_eq!(root.children[1].payload.fold, None);
    }

    #[test]
    fn styles_are_resolved_on_the_host() {
        let style = StyleConfig::default();
        let mut root = tree();
        apply_styles(&mut root, &style);
        root.walk(&mut |n| {
            assert_eq!(n.payload.color.as_deref(), Some(style.color(n)));
            assert_eq!(n.payload.line_width, Some(style.line_width(n)));
        });
        // same top-level branch, same color
        assert_eq!(root.children[0].payload.color, root.children[0].children[0].payload.color);
    }

    #[test]
    fn document_embeds_data_not_functions() {
        let doc = build(tree());
        assert!(doc.html.contains(r##""color":"#"##));
        assert!(doc.html.contains(r#""lineWidth":4.0"#));
        assert!(doc.html.contains(r#""spacingHorizontal":150"#));
        assert!(doc.html.contains("width: 800px;"));
        assert!(doc.html.contains("height: 600px;"));
        assert!(!doc.html.contains("{{"));
        assert!(!doc.html.contains("fonts.googleapis.com"));
        assert_eq!(doc.node_count, 4);
    }

    #[test]
    fn scripts_load_in_order() {
        let doc = build(tree());
        let watcher = doc.html.find("__mindmapWatch = function").unwrap();
        let d3 = doc.html.find("window.d3 = {};").unwrap();
        let view = doc.html.find("window.markmap = { Markmap: {} };").unwrap();
        let boot = doc.html.find("Markmap.create(svg, options)").unwrap();
        assert!(watcher < d3 && d3 < view && view < boot);
    }

    #[test]
    fn node_content_cannot_break_out_of_the_script() {
        let mut root = Node::new("x</script><script>alert(1)</script>{{DATA}}");
        root.assign_positions();
        let doc = build(root);
        assert_eq!(doc.html.matches("</script>").count(), 4);
        assert!(doc.html.contains("\\u003c/script>"));
        assert!(doc.html.contains("{{DATA}}"));
    }

    #[test]
    fn inline_script_end_tags_are_neutralized() {
        assert_eq!(neutralize_script_end("a</SCRIPT>b</script>"), "a<\\/SCRIPT>b<\\/script>");
        assert!(matches!(neutralize_script_end("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = build(tree());
        let b = build(tree());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);

        let mut other = Node::new("Z");
        other.assign_positions();
        assert_ne!(build(other).fingerprint, a.fingerprint);
    }

    #[test]
    fn feature_styles_and_fonts_are_inlined() {
        let features: BTreeSet<_> = [Feature::Checkbox].into_iter().collect();
        let bundle = bundle().with_font(EmbeddedFont::from_bytes("NotoSansSC", "woff2", b"abc").unwrap());
        let doc = assemble(
            tree(),
            &assets_for(&features),
            &bundle,
            &StyleConfig::default(),
            Size::default(),
            &WatchSettings::default(),
        )
        .unwrap();
        assert!(doc.html.contains(".mm-checkbox"));
        assert!(doc.html.contains("@font-face { font-family: 'NotoSansSC'"));
        assert!(doc.html.contains("font-family: 'NotoSansSC', 'Noto Sans SC'"));
    }

    #[test]
    fn missing_script_asset_fails() {
        let err = assemble(
            tree(),
            &assets_for(&BTreeSet::new()),
            &AssetBundle::default(),
            &StyleConfig::default(),
            Size::default(),
            &WatchSettings::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
    }
}
