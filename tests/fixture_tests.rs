//! Fixture runner: parses every tests/fixtures/*.html template and compares
//! a rendered outline of the tree (and errors) against the matching
//! .expected file.
//!
//! Run with: cargo test --test fixture_tests

use libtest_mimic::{Arguments, Failed, Trial};
use std::fs;
use std::path::{Path, PathBuf};
use templar::{Node, ParseOptions, ParseResult};

fn main() {
    let args = Arguments::from_args();

    let pattern = format!("{}/tests/fixtures/*.html", env!("CARGO_MANIFEST_DIR"));
    let mut trials = Vec::new();
    for entry in glob::glob(&pattern).expect("valid glob pattern") {
        let path: PathBuf = entry.expect("readable fixture path");
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("fixture")
            .to_string();
        trials.push(Trial::test(name, move || run_fixture(&path)));
    }
    trials.sort_by(|a, b| a.name().cmp(b.name()));

    libtest_mimic::run(&args, trials).exit();
}

fn run_fixture(path: &Path) -> Result<(), Failed> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    // The trailing newline of the fixture file is not part of the template.
    let source = raw.trim_end_matches('\n');

    let expected_path = path.with_extension("expected");
    let expected = fs::read_to_string(&expected_path)
        .map_err(|e| format!("failed to read {}: {e}", expected_path.display()))?;

    let options = ParseOptions {
        tokenize_expansion_forms: true,
        selectorless_enabled: true,
        ..ParseOptions::default()
    };
    let result = templar::parse(source, &path.display().to_string(), &options);
    let actual = render(&result);

    if actual.trim_end() != expected.trim_end() {
        return Err(format!(
            "fixture mismatch for {}\n{}",
            path.display(),
            pretty_assertions::StrComparison::new(expected.trim_end(), actual.trim_end()),
        )
        .into());
    }
    Ok(())
}

/// One line per node, children indented two spaces, errors at the end.
fn render(result: &ParseResult) -> String {
    let mut out = String::new();
    for node in &result.root_nodes {
        render_node(node, 0, &mut out);
    }
    for error in &result.errors {
        out.push_str(&format!("error: {}\n", error.message));
    }
    out
}

fn render_node(node: &Node, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match node {
        Node::Element(el) => {
            out.push_str(&format!("{pad}element {:?}", el.name));
            if el.is_self_closing {
                out.push_str(" (self-closing)");
            }
            out.push('\n');
            for attr in &el.attributes {
                out.push_str(&format!("{pad}  attribute {:?}={:?}\n", attr.name, attr.value));
            }
            for directive in &el.directives {
                out.push_str(&format!("{pad}  directive {:?}\n", directive.name));
                for attr in &directive.attributes {
                    out.push_str(&format!("{pad}    attribute {:?}={:?}\n", attr.name, attr.value));
                }
            }
            for child in &el.children {
                render_node(child, depth + 1, out);
            }
        }
        Node::Component(component) => {
            out.push_str(&format!("{pad}component {:?}", component.full_name));
            if component.is_self_closing {
                out.push_str(" (self-closing)");
            }
            out.push('\n');
            for attr in &component.attributes {
                out.push_str(&format!("{pad}  attribute {:?}={:?}\n", attr.name, attr.value));
            }
            for directive in &component.directives {
                out.push_str(&format!("{pad}  directive {:?}\n", directive.name));
                for attr in &directive.attributes {
                    out.push_str(&format!("{pad}    attribute {:?}={:?}\n", attr.name, attr.value));
                }
            }
            for child in &component.children {
                render_node(child, depth + 1, out);
            }
        }
        Node::Text(text) => out.push_str(&format!("{pad}text {:?}\n", text.value)),
        Node::Comment(comment) => out.push_str(&format!("{pad}comment {:?}\n", comment.value)),
        Node::Expansion(expansion) => {
            out.push_str(&format!(
                "{pad}expansion {:?} {:?}\n",
                expansion.switch_value, expansion.expansion_type
            ));
            for case in &expansion.cases {
                out.push_str(&format!("{pad}  case {:?}\n", case.value));
                for child in &case.expression {
                    render_node(child, depth + 2, out);
                }
            }
        }
        Node::Block(block) => {
            out.push_str(&format!("{pad}block {:?}\n", block.name));
            for param in &block.parameters {
                out.push_str(&format!("{pad}  parameter {:?}\n", param.expression));
            }
            for child in &block.children {
                render_node(child, depth + 1, out);
            }
        }
        Node::LetDeclaration(decl) => {
            out.push_str(&format!("{pad}let {:?} = {:?}\n", decl.name, decl.value));
        }
    }
}
