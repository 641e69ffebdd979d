//! Static assets embedded into every assembled document: the layout engine
//! scripts, per-feature stylesheets and optional local fonts.
//!
//! Nothing here is fetched at render time. Scripts are read once from an
//! asset directory (see `fetch_assets` to populate one) and shared by all
//! render calls.

use crate::tree::Feature;
use crate::{Error, Result};
use base64::Engine as Base64Engine;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

/// d3 runtime required by the layout engine
pub const D3_SCRIPT: &str = "d3.min.js";
/// markmap-view browser bundle (exposes `window.markmap.Markmap`)
pub const MARKMAP_VIEW_SCRIPT: &str = "markmap-view.js";
/// Subdirectory scanned for font files
pub const FONTS_DIR: &str = "fonts";

const REQUIRED_SCRIPTS: [&str; 2] = [D3_SCRIPT, MARKMAP_VIEW_SCRIPT];

const CHECKBOX_CSS: &str = ".mm-checkbox { margin-right: 0.3em; font-family: sans-serif; }";
const CODE_BLOCK_CSS: &str = "\
.markmap-foreign pre { margin: 0; padding: 4px 6px; border-radius: 4px; background: #f6f8fa; }
.markmap-foreign code { font-family: 'SFMono-Regular', Menlo, Consolas, monospace; font-size: 0.9em; }";

/// A static resource the layout engine needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRef {
    /// Script file looked up in the asset bundle by name
    Script(&'static str),
    /// Built-in stylesheet text
    Style(&'static str),
}

/// Static resources for a set of outline features.
///
/// The engine scripts always come first, in load order.
pub fn assets_for(features: &BTreeSet<Feature>) -> Vec<AssetRef> {
    let mut refs: Vec<AssetRef> = REQUIRED_SCRIPTS.into_iter().map(AssetRef::Script).collect();
    for feature in features {
        refs.push(AssetRef::Style(match feature {
            Feature::Checkbox => CHECKBOX_CSS,
            Feature::CodeBlock => CODE_BLOCK_CSS,
        }));
    }
    refs
}

/// A font file inlined as a `data:` URL
#[derive(Debug, Clone)]
pub struct EmbeddedFont {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
    format: &'static str,
    mime: &'static str,
    data_b64: String,
}

impl EmbeddedFont {
    /// Build a font from a file named `<stem>.<extension>`.
    ///
    /// A trailing weight or style word in the stem (`NotoSans-Bold`,
    /// `Inter-SemiBoldItalic`) becomes the face's weight and style, so all
    /// variants share one family.
    pub fn from_file(stem: &str, extension: &str, bytes: &[u8]) -> Option<Self> {
        let (family, weight, italic) = split_variant(stem);
        let mut font = Self::from_bytes(family, extension, bytes)?;
        font.weight = weight;
        font.italic = italic;
        Some(font)
    }

    pub fn from_bytes(family: impl Into<String>, extension: &str, bytes: &[u8]) -> Option<Self> {
        let (format, mime) = match extension.to_ascii_lowercase().as_str() {
            "woff2" => ("woff2", "font/woff2"),
            "woff" => ("woff", "font/woff"),
            "ttf" => ("truetype", "font/ttf"),
            "otf" => ("opentype", "font/otf"),
            _ => return None,
        };
        Some(Self {
            family: family.into(),
            weight: 400,
            italic: false,
            format,
            mime,
            data_b64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }

    /// Family name as a single-quoted CSS string
    pub fn quoted_family(&self) -> String {
        let mut out = String::with_capacity(self.family.len() + 2);
        out.push('\'');
        for c in self.family.chars() {
            match c {
                '\'' | '\\' => {
                    out.push('\\');
                    out.push(c);
                }
                c if c.is_control() => {}
                c => out.push(c),
            }
        }
        out.push('\'');
        out
    }

    pub fn font_face_css(&self) -> String {
        format!(
            "@font-face {{ font-family: {}; src: url(data:{};base64,{}) format('{}'); font-weight: {}; font-style: {}; font-display: block; }}",
            self.quoted_family(),
            self.mime,
            self.data_b64,
            self.format,
            self.weight,
            if self.italic { "italic" } else { "normal" }
        )
    }
}

const WEIGHTS: &[(&str, u16)] = &[
    ("extralight", 200),
    ("ultralight", 200),
    ("semibold", 600),
    ("demibold", 600),
    ("extrabold", 800),
    ("ultrabold", 800),
    ("regular", 400),
    ("normal", 400),
    ("medium", 500),
    ("light", 300),
    ("black", 900),
    ("heavy", 900),
    ("thin", 100),
    ("bold", 700),
    ("", 400),
];

/// `Family-Variant` into family, weight and italic; unknown variants stay
/// part of the family name
fn split_variant(stem: &str) -> (&str, u16, bool) {
    let Some((family, variant)) = stem.rsplit_once('-') else {
        return (stem, 400, false);
    };
    let lower = variant.to_ascii_lowercase();
    let (rest, italic) = match lower.strip_suffix("italic").or_else(|| lower.strip_suffix("oblique")) {
        Some(rest) => (rest, true),
        None => (lower.as_str(), false),
    };
    match WEIGHTS.iter().find(|(name, _)| *name == rest) {
        Some(&(_, weight)) if !family.is_empty() => (family, weight, italic),
        _ => (stem, 400, false),
    }
}

/// Loaded static assets, shared read-only across render calls
#[derive(Debug, Clone, Default)]
pub struct AssetBundle {
    scripts: BTreeMap<String, String>,
    fonts: Vec<EmbeddedFont>,
}

impl AssetBundle {
    /// Load the engine scripts and any fonts from `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut scripts = BTreeMap::new();
        for name in REQUIRED_SCRIPTS {
            let path = dir.join(name);
            let source = fs::read_to_string(&path).map_err(|e| {
                Error::AssetError(format!(
                    "cannot read {} ({}); run `mindmap-render fetch-assets --dir {}` first",
                    path.display(),
                    e,
                    dir.display()
                ))
            })?;
            scripts.insert(name.to_string(), source);
        }

        let fonts = load_fonts(&dir.join(FONTS_DIR))?;
        debug!(
            "Loaded {} scripts and {} fonts from {}",
            scripts.len(),
            fonts.len(),
            dir.display()
        );
        Ok(Self { scripts, fonts })
    }

    /// Build a bundle from in-memory script sources
    pub fn from_scripts<I, K, V>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            scripts: scripts.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            fonts: Vec::new(),
        }
    }

    pub fn with_font(mut self, font: EmbeddedFont) -> Self {
        self.fonts.push(font);
        self
    }

    pub fn script(&self, name: &str) -> Result<&str> {
        self.scripts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::AssetError(format!("script asset '{}' is not loaded", name)))
    }

    pub fn fonts(&self) -> &[EmbeddedFont] {
        &self.fonts
    }

    pub fn font_face_css(&self) -> String {
        self.fonts
            .iter()
            .map(EmbeddedFont::font_face_css)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn load_fonts(dir: &Path) -> Result<Vec<EmbeddedFont>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::AssetError(format!("cannot list {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut fonts = Vec::new();
    for path in paths {
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let bytes = fs::read(&path)
            .map_err(|e| Error::AssetError(format!("cannot read {}: {}", path.display(), e)))?;
        match EmbeddedFont::from_file(stem, ext, &bytes) {
            Some(font) => fonts.push(font),
            None => warn!("Ignoring non-font file {}", path.display()),
        }
    }
    Ok(fonts)
}

/// Where an asset file is downloaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSource {
    pub file_name: String,
    pub url: String,
}

/// Pinned upstream locations of the engine scripts
pub fn default_sources() -> Vec<AssetSource> {
    vec![
        AssetSource {
            file_name: D3_SCRIPT.to_string(),
            url: "https://unpkg.com/d3@7/dist/d3.min.js".to_string(),
        },
        AssetSource {
            file_name: MARKMAP_VIEW_SCRIPT.to_string(),
            url: "https://unpkg.com/markmap-view@0.18.12/dist/browser/index.js".to_string(),
        },
    ]
}

/// Download `sources` into `dir`, returning the written paths
#[cfg(feature = "fetch")]
pub fn fetch_assets(dir: &Path, sources: &[AssetSource]) -> Result<Vec<PathBuf>> {
    use reqwest::blocking::Client;
    use std::time::Duration;

    fs::create_dir_all(dir)
        .map_err(|e| Error::AssetError(format!("cannot create {}: {}", dir.display(), e)))?;

    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| Error::AssetError(format!("Failed to build HTTP client: {}", e)))?;

    let mut written = Vec::with_capacity(sources.len());
    for source in sources {
        log::info!("Downloading {} -> {}", source.url, source.file_name);
        let body = client
            .get(&source.url)
            .send()
            .and_then(|res| res.error_for_status())
            .and_then(|res| res.bytes())
            .map_err(|e| Error::AssetError(format!("download of {} failed: {}", source.url, e)))?;

        let path = dir.join(&source.file_name);
        fs::write(&path, &body).map_err(|e| Error::OutputError {
            path: path.clone(),
            source: e,
        })?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_scripts(dir: &Path) {
        fs::write(dir.join(D3_SCRIPT), "window.d3 = {};").unwrap();
        fs::write(dir.join(MARKMAP_VIEW_SCRIPT), "window.markmap = {};").unwrap();
    }

    #[test]
    fn engine_scripts_always_come_first() {
        let refs = assets_for(&BTreeSet::new());
        assert_eq!(refs, vec![AssetRef::Script(D3_SCRIPT), AssetRef::Script(MARKMAP_VIEW_SCRIPT)]);

        let features: BTreeSet<_> = [Feature::CodeBlock, Feature::Checkbox].into_iter().collect();
        let refs = assets_for(&features);
        assert_eq!(refs.len(), 4);
        assert!(matches!(refs[2], AssetRef::Style(css) if css.contains("mm-checkbox")));
    }

    #[test]
    fn load_reads_scripts_and_fonts() {
        let dir = tempfile::tempdir().unwrap();
        write_scripts(dir.path());
        fs::create_dir(dir.path().join(FONTS_DIR)).unwrap();
        fs::write(dir.path().join(FONTS_DIR).join("NotoSans.woff2"), [0u8, 1, 2, 3]).unwrap();
        fs::write(dir.path().join(FONTS_DIR).join("README.txt"), "not a font").unwrap();

        let bundle = AssetBundle::load(dir.path()).unwrap();
        assert_eq!(bundle.script(D3_SCRIPT).unwrap(), "window.d3 = {};");
        assert_eq!(bundle.fonts().len(), 1);
        assert_eq!(bundle.fonts()[0].family, "NotoSans");

        let css = bundle.font_face_css();
        assert!(css.contains("font-family: 'NotoSans'"));
        assert!(css.contains("data:font/woff2;base64,AAECAw=="));
        assert!(css.contains("format('woff2')"));
    }

    #[test]
    fn weight_variants_share_one_family() {
        let dir = tempfile::tempdir().unwrap();
        write_scripts(dir.path());
        let fonts = dir.path().join(FONTS_DIR);
        fs::create_dir(&fonts).unwrap();
        for name in ["Inter-Regular.woff2", "Inter-SemiBoldItalic.woff2", "Noto-Sans.ttf"] {
            fs::write(fonts.join(name), [0u8]).unwrap();
        }

        let bundle = AssetBundle::load(dir.path()).unwrap();
        let faces: Vec<(&str, u16, bool)> = bundle
            .fonts()
            .iter()
            .map(|f| (f.family.as_str(), f.weight, f.italic))
            .collect();
        assert_eq!(
            faces,
            vec![("Inter", 400, false), ("Inter", 600, true), ("Noto-Sans", 400, false)]
        );
        assert!(bundle.font_face_css().contains("font-weight: 600; font-style: italic;"));
    }

    #[test]
    fn family_names_are_escaped_in_css() {
        let font = EmbeddedFont::from_bytes("O'Brien\\Sans\n", "woff", &[0u8]).unwrap();
        assert_eq!(font.quoted_family(), r"'O\'Brien\\Sans'");
        assert!(font.font_face_css().starts_with(r"@font-face { font-family: 'O\'Brien\\Sans';"));
    }

    #[test]
    fn missing_script_is_an_asset_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(D3_SCRIPT), "").unwrap();

        let err = AssetBundle::load(dir.path()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Config);
        assert!(err.to_string().contains(MARKMAP_VIEW_SCRIPT));
        assert!(err.to_string().contains("fetch-assets"));
    }

    #[test]
    fn unknown_font_extension_is_rejected() {
        assert!(EmbeddedFont::from_bytes("x", "png", b"").is_none());
        assert!(EmbeddedFont::from_bytes("x", "TTF", b"").is_some());
    }
}
