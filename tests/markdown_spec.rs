use serde::Deserialize;
use std::fs;
use treemark::{Node, parse};

#[derive(Debug, Deserialize)]
struct SpecTest {
    markdown: String,
    tree: serde_json::Value,
    example: u32,
    section: String,
}

#[test]
fn markdown_spec_tests() {
    let test_data = fs::read_to_string("tests/data/tests.json").expect("Failed to read tests.json");
    let tests: Vec<SpecTest> =
        serde_json::from_str(&test_data).expect("Failed to parse tests.json");

    let mut failures = Vec::new();
    for test in &tests {
        let (root, errors) = parse(&test.markdown);
        let actual = serde_json::to_value(&root).expect("Failed to serialize tree");

        if !errors.is_empty() {
            failures.push(format!(
                "example {} ({}): unexpected errors {:?}",
                test.example, test.section, errors
            ));
            continue;
        }
        if actual != test.tree {
            failures.push(format!(
                "example {} ({}):\n  input: {:?}\n  expected: {}\n  got: {}",
                test.example, test.section, test.markdown, test.tree, actual
            ));
        }
    }

    assert!(
        failures.is_empty(),
        "{} of {} spec cases failed:\n{}",
        failures.len(),
        tests.len(),
        failures.join("\n")
    );
}

#[test]
fn parse_is_total_on_odd_inputs() {
    let inputs = [
        "\u{0}",
        "\u{FEFF}plain",
        "[",
        "![",
        "*_*_~~``",
        "][)(",
        "> > > > >",
        "`unterminated",
        "<not <html>",
        "&#xFFFFFFF;",
        "\\",
        "- \n- \n- ",
        "|\n|",
        "1)\n2)",
        "~~~\n~~\n",
    ];
    for input in inputs {
        let (root, errors) = parse(input);
        assert!(matches!(root, Node::Document(_)), "input {:?}", input);
        assert!(errors.is_empty(), "input {:?} gave {:?}", input, errors);
    }
}

#[test]
fn parse_is_structurally_deterministic() {
    let source = "# h *em*\n\n> quote\n> more\n\n- [ ] task\n- plain\n\n| a | b |\n| - | - |\n| 1 | 2 |\n\n[ref]\n\n[ref]: /url (title)\n";
    let (first, _) = parse(source);
    let (second, _) = parse(source);
    assert_eq!(first, second);
}

#[test]
fn deeply_nested_containers_stay_linear() {
    let mut source = String::new();
    for depth in 0..200 {
        for _ in 0..depth % 16 {
            source.push_str("> ");
        }
        source.push_str("text\n");
    }
    let (root, errors) = parse(&source);
    assert!(matches!(root, Node::Document(_)));
    assert!(errors.is_empty());
}

#[test]
fn adversarial_delimiter_runs_terminate() {
    let source = "*".repeat(4000);
    let (root, errors) = parse(&source);
    assert!(matches!(root, Node::Document(_)));
    assert!(errors.is_empty());

    let source = "**a** ".repeat(1500);
    let (root, _) = parse(&source);
    assert!(matches!(root, Node::Document(_)));
}
