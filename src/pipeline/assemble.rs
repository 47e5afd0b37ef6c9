//! Document assembly: final HTML, intermediate file, converter hand-off.
//!
//! Canvas bodies often carry double-escaped text (`&amp;aacute;` and
//! friends) that survives one parse as a literal `&aacute;`. Text nodes are
//! decoded once more before the fragment is serialised, so the converter
//! sees `á` and not the entity name. Markup is never decoded, only text.

use crate::config::HarvestConfig;
use crate::error::HarvestError;
use crate::markup::{Fragment, Node};
use crate::tools::DocumentConverter;
use htmlentity::entity::{decode, ICodedDataTrait};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffix appended to the course stem to name the converted document.
pub const OUTPUT_SUFFIX: &str = "_tablas.docx";

/// The final HTML of one course, persisted to the intermediate file.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub html: String,
    /// Intermediate file holding `html`.
    pub path: PathBuf,
}

/// Persists the course document and hands it to the converter.
pub struct DocumentAssembler<'a> {
    config: &'a HarvestConfig,
    converter: &'a dyn DocumentConverter,
}

impl<'a> DocumentAssembler<'a> {
    pub fn new(config: &'a HarvestConfig, converter: &'a dyn DocumentConverter) -> Self {
        Self { config, converter }
    }

    /// Render `fragment` and write it to the intermediate file.
    pub async fn assemble(&self, fragment: Fragment) -> Result<AssembledDocument, HarvestError> {
        let html = render(fragment, self.config.flatten_line_breaks);
        let path = self.config.intermediate_file.clone();
        write_atomic(&path, &html).await?;
        debug!("Wrote {} bytes to {}", html.len(), path.display());
        Ok(AssembledDocument { html, path })
    }

    /// Convert `doc` into `<output_dir>/<stem>_tablas.docx`.
    pub async fn hand_off(
        &self,
        doc: &AssembledDocument,
        stem: &str,
    ) -> Result<PathBuf, HarvestError> {
        let output_dir = &self.config.output_dir;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| HarvestError::OutputWriteFailed {
                path: output_dir.clone(),
                source: e,
            })?;

        let output = output_dir.join(format!("{stem}{OUTPUT_SUFFIX}"));
        self.converter.convert(&doc.path, &output).await?;
        info!("Converted {} → {}", doc.path.display(), output.display());
        Ok(output)
    }
}

/// Decode residual entities in text and serialise.
///
/// With `flatten_line_breaks`, every `br` becomes a single space.
pub fn render(fragment: Fragment, flatten_line_breaks: bool) -> String {
    let nodes = decode_nodes(fragment.into_nodes(), flatten_line_breaks);
    Fragment::from_nodes(nodes).to_html()
}

fn decode_nodes(nodes: Vec<Node>, flatten: bool) -> Vec<Node> {
    nodes
        .into_iter()
        .map(|node| match node {
            Node::Text(text) => Node::Text(decode_text(text)),
            Node::Element(el) if flatten && el.is("br") => Node::Text(" ".into()),
            Node::Element(mut el) => {
                let children = std::mem::take(&mut el.children);
                el.children = decode_nodes(children, flatten);
                Node::Element(el)
            }
            other => other,
        })
        .collect()
}

fn decode_text(text: String) -> String {
    if !text.contains('&') {
        return text;
    }
    match decode(text.as_bytes()).to_string() {
        Ok(decoded) => decoded,
        Err(e) => {
            warn!("Entity decoding failed, keeping text as-is: {}", e);
            text
        }
    }
}

/// Write via a sibling temp file and rename, so a crash never leaves a half-written file.
async fn write_atomic(path: &Path, contents: &str) -> Result<(), HarvestError> {
    let write_err = |e: std::io::Error| HarvestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("html.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConverter {
        calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    #[async_trait]
    impl DocumentConverter for RecordingConverter {
        async fn convert(&self, html: &Path, output: &Path) -> Result<(), HarvestError> {
            self.calls
                .lock()
                .unwrap()
                .push((html.to_path_buf(), output.to_path_buf()));
            tokio::fs::write(output, b"PK")
                .await
                .map_err(|e| HarvestError::Internal(e.to_string()))
        }
    }

    struct FailingConverter;

    #[async_trait]
    impl DocumentConverter for FailingConverter {
        async fn convert(&self, _html: &Path, output: &Path) -> Result<(), HarvestError> {
            Err(HarvestError::Conversion {
                output: output.to_path_buf(),
                detail: "pandoc: unknown reader".into(),
            })
        }
    }

    fn config(dir: &Path) -> HarvestConfig {
        HarvestConfig::builder()
            .intermediate_file(dir.join("tablas.html"))
            .output_dir(dir.join("table_results"))
            .build()
            .unwrap()
    }

    #[test]
    fn double_escaped_text_is_decoded_once() {
        let fragment = Fragment::parse("<p>Poblaci&amp;oacute;n &amp;gt; 5</p>");
        assert_eq!(fragment.text(), "Poblaci&oacute;n &gt; 5");
        assert_eq!(render(fragment, false), "<p>Población &gt; 5</p>");
    }

    #[test]
    fn plain_markup_is_unchanged() {
        let html = "<table><tbody><tr><td>a &amp; b</td></tr></tbody></table>";
        assert_eq!(render(Fragment::parse(html), false), html);
    }

    #[test]
    fn line_breaks_flatten_only_when_asked() {
        let html = "<td>uno<br>dos</td>";
        let fragment = Fragment::parse("<table><tbody><tr><td>uno<br>dos</td></tr></tbody></table>");
        assert!(render(fragment.clone(), false).contains(html));
        assert!(render(fragment, true).contains("<td>uno dos</td>"));
    }

    #[tokio::test]
    async fn assemble_writes_intermediate_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let converter = RecordingConverter::default();
        let assembler = DocumentAssembler::new(&config, &converter);

        let doc = assembler
            .assemble(Fragment::parse("<p>hola</p>"))
            .await
            .unwrap();
        assert_eq!(doc.path, dir.path().join("tablas.html"));
        assert_eq!(std::fs::read_to_string(&doc.path).unwrap(), "<p>hola</p>");
        assert!(!dir.path().join("tablas.html.tmp").exists());
    }

    #[tokio::test]
    async fn hand_off_names_output_after_stem() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let converter = RecordingConverter::default();
        let assembler = DocumentAssembler::new(&config, &converter);

        let doc = assembler.assemble(Fragment::parse("<p>x</p>")).await.unwrap();
        let out = assembler.hand_off(&doc, "MAT_101").await.unwrap();

        assert_eq!(out, dir.path().join("table_results").join("MAT_101_tablas.docx"));
        assert!(out.exists());
        let calls = converter.calls.lock().unwrap();
        assert_eq!(calls.as_slice(), &[(doc.path.clone(), out.clone())]);
    }

    #[tokio::test]
    async fn converter_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let assembler = DocumentAssembler::new(&config, &FailingConverter);

        let doc = assembler.assemble(Fragment::parse("<p>x</p>")).await.unwrap();
        let err = assembler.hand_off(&doc, "42").await.unwrap_err();
        assert!(matches!(err, HarvestError::Conversion { .. }), "got: {err:?}");
    }
}
