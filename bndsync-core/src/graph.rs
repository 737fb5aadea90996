//! Build graph view extracted from the rendered diagram.
//!
//! Every clickable node of the SVG is an anchor whose `xlink:title` carries
//! the target to build.

use std::sync::LazyLock;

use regex::Regex;

static ANCHOR_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a\b[^>]*?\bxlink:title\s*=\s*"([^"]*)""#).expect("valid anchor regex")
});

static ANCHOR_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+xlink:href\s*=\s*"[^"]*""#).expect("valid href regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphView {
    pub fname: String,
    pub svg: String,
    pub targets: Vec<String>,
}

impl GraphView {
    pub fn from_markup(fname: &str, svg: &str) -> Self {
        let mut targets: Vec<String> = Vec::new();
        for cap in ANCHOR_TITLE.captures_iter(svg) {
            let target = unescape_xml(&cap[1]);
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        Self {
            fname: fname.to_string(),
            svg: svg.to_string(),
            targets,
        }
    }

    /// The markup with link targets removed, so a click only triggers a build
    pub fn interactive_svg(&self) -> String {
        ANCHOR_HREF.replace_all(&self.svg, "").into_owned()
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVG: &str = r#"<svg><g id="node1"><a xlink:href="build" xlink:title="build"><text>build</text></a></g>
<g id="node2"><a xlink:href="x" xlink:title="data/font.o"><text>font</text></a></g>
<g id="node3"><a xlink:title="build"><text>again</text></a></g></svg>"#;

    #[test]
    fn test_targets_in_document_order() {
        let view = GraphView::from_markup("bndbuild.yml", SVG);
        assert_eq!(view.targets, vec!["build", "data/font.o"]);
        assert!(view.has_target("data/font.o"));
        assert!(!view.has_target("clean"));
    }

    #[test]
    fn test_interactive_svg_drops_hrefs() {
        let view = GraphView::from_markup("bndbuild.yml", SVG);
        let svg = view.interactive_svg();
        assert!(!svg.contains("xlink:href"));
        assert!(svg.contains(r#"xlink:title="build""#));
    }

    #[test]
    fn test_escaped_titles() {
        let view = GraphView::from_markup("f", r#"<a xlink:title="a&amp;b">"#);
        assert_eq!(view.targets, vec!["a&b"]);
    }
}
