#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
use pyo3::prelude::*;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod ast;
mod classify;
pub mod config;
mod converter;
pub mod dialect;
mod diff;
pub mod error;
pub mod expr;
mod parser;
mod printer;
mod renpy;
mod reverse;
pub mod types;

pub use ast::{Document, Node};
pub use config::Config;
pub use converter::ConverterState;
pub use dialect::Dialect;
pub use renpy::RenpyState;
pub use error::{ConfigError, Error, ParseError, ParseErrorKind};
pub use types::{Category, Divergence, FidelityReport};

/// Parses a screenplay-dialect script.
pub fn parse_source(text: &str) -> Result<Document, ParseError> {
    parser::parse(text)
}

/// Parses a Twee/SugarCube story with the default configuration.
pub fn parse_target(text: &str) -> Result<Document, ParseError> {
    reverse::parse(text, &Config::default())
}

pub fn parse_target_with(text: &str, config: &Config) -> Result<Document, ParseError> {
    reverse::parse(text, config)
}

pub fn to_target(doc: &Document) -> String {
    ConverterState::new().convert(doc)
}

pub fn to_target_with(doc: &Document, config: &Config) -> String {
    ConverterState::with_config(config).convert(doc)
}

pub fn to_source(doc: &Document) -> String {
    printer::print(doc)
}

pub fn to_renpy(doc: &Document) -> String {
    RenpyState::new().convert(doc)
}

/// Reads `text` as `from` and writes it as `to`.
pub fn convert(text: &str, from: Dialect, to: Dialect, config: &Config) -> Result<String, Error> {
    let doc = match from {
        Dialect::Fflow => parser::parse(text)?,
        Dialect::Twee => reverse::parse(text, config)?,
        Dialect::Renpy => return Err(Error::WriteOnlyDialect(from)),
    };
    Ok(match to {
        Dialect::Fflow => printer::print(&doc),
        Dialect::Twee => to_target_with(&doc, config),
        Dialect::Renpy => to_renpy(&doc),
    })
}

pub fn diff(original: &Document, roundtrip: &Document) -> Vec<Divergence> {
    diff::diff(original, roundtrip)
}

/// Source text to target text and back, reporting everything that did not
/// survive the trip.
pub fn roundtrip(text: &str, config: &Config) -> Result<FidelityReport, ParseError> {
    let original = parser::parse(text)?;
    let target = to_target_with(&original, config);
    let back = reverse::parse(&target, config)?;
    Ok(FidelityReport::new(diff::diff(&original, &back)))
}

/// Rewrites a script so that every variable reference carries `$`.
pub fn normalize_source(text: &str) -> Result<String, ParseError> {
    let doc = parser::parse(text)?;
    Ok(printer::print(&doc.with_prefixed_variables()))
}

fn load_config(config_json: Option<&str>) -> Result<Config, Error> {
    match config_json {
        Some(json) if !json.trim().is_empty() => Ok(Config::from_json(json)?),
        _ => Ok(Config::default()),
    }
}

/// Source text in, target text out.
pub fn convert_source_text(text: &str, config_json: Option<&str>) -> Result<String, Error> {
    let config = load_config(config_json)?;
    Ok(to_target_with(&parser::parse(text)?, &config))
}

/// Target text in, source text out.
pub fn convert_target_text(text: &str, config_json: Option<&str>) -> Result<String, Error> {
    let config = load_config(config_json)?;
    Ok(printer::print(&reverse::parse(text, &config)?))
}

/// Dialects named by name or file extension.
pub fn convert_text(
    text: &str,
    from: &str,
    to: &str,
    config_json: Option<&str>,
) -> Result<String, Error> {
    let config = load_config(config_json)?;
    convert(text, Dialect::lookup(from)?, Dialect::lookup(to)?, &config)
}

pub fn parse_source_json(text: &str) -> Result<String, Error> {
    Ok(serde_json::to_string_pretty(&parser::parse(text)?)?)
}

pub fn parse_target_json(text: &str, config_json: Option<&str>) -> Result<String, Error> {
    let config = load_config(config_json)?;
    Ok(serde_json::to_string_pretty(&reverse::parse(text, &config)?)?)
}

/// Serialized document in, target text out.
pub fn document_json_to_target(doc_json: &str, config_json: Option<&str>) -> Result<String, Error> {
    let config = load_config(config_json)?;
    let doc: Document = serde_json::from_str(doc_json)?;
    Ok(to_target_with(&doc, &config))
}

pub fn roundtrip_json(text: &str, config_json: Option<&str>) -> Result<String, Error> {
    let config = load_config(config_json)?;
    Ok(roundtrip(text, &config)?.to_json()?)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
fn to_py_err(e: Error) -> PyErr {
    match e {
        Error::Json(e) => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(e.to_string()),
        other => PyErr::new::<pyo3::exceptions::PyValueError, _>(other.to_string()),
    }
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, config_json=None))]
fn to_target_text(text: String, config_json: Option<String>) -> PyResult<String> {
    convert_source_text(&text, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, config_json=None))]
fn to_source_text(text: String, config_json: Option<String>) -> PyResult<String> {
    convert_target_text(&text, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(name = "convert", signature = (text, from_dialect, to_dialect, config_json=None))]
fn convert_between(
    text: String,
    from_dialect: String,
    to_dialect: String,
    config_json: Option<String>,
) -> PyResult<String> {
    convert_text(&text, &from_dialect, &to_dialect, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
fn parse_source_text(text: String) -> PyResult<String> {
    parse_source_json(&text).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, config_json=None))]
fn parse_target_text(text: String, config_json: Option<String>) -> PyResult<String> {
    parse_target_json(&text, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (doc_json, config_json=None))]
fn document_to_target(doc_json: String, config_json: Option<String>) -> PyResult<String> {
    document_json_to_target(&doc_json, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
#[pyo3(signature = (text, config_json=None))]
fn roundtrip_report(text: String, config_json: Option<String>) -> PyResult<String> {
    roundtrip_json(&text, config_json.as_deref()).map_err(to_py_err)
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
fn normalize_source_text(text: String) -> PyResult<String> {
    normalize_source(&text).map_err(|e| to_py_err(e.into()))
}

#[cfg(target_arch = "wasm32")]
fn to_js_err(e: Error) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn to_target_wasm(text: &str, config_json: Option<String>) -> Result<String, JsValue> {
    convert_source_text(text, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn to_source_wasm(text: &str, config_json: Option<String>) -> Result<String, JsValue> {
    convert_target_text(text, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn convert_wasm(
    text: &str,
    from_dialect: &str,
    to_dialect: &str,
    config_json: Option<String>,
) -> Result<String, JsValue> {
    convert_text(text, from_dialect, to_dialect, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn parse_source_wasm(text: &str) -> Result<String, JsValue> {
    parse_source_json(text).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn parse_target_wasm(text: &str, config_json: Option<String>) -> Result<String, JsValue> {
    parse_target_json(text, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn document_to_target_wasm(doc_json: &str, config_json: Option<String>) -> Result<String, JsValue> {
    document_json_to_target(doc_json, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn roundtrip_wasm(text: &str, config_json: Option<String>) -> Result<String, JsValue> {
    roundtrip_json(text, config_json.as_deref()).map_err(to_js_err)
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn normalize_source_wasm(text: &str) -> Result<String, JsValue> {
    normalize_source(text).map_err(|e| to_js_err(e.into()))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pymodule]
fn fflow_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(to_target_text, m)?)?;
    m.add_function(wrap_pyfunction!(to_source_text, m)?)?;
    m.add_function(wrap_pyfunction!(convert_between, m)?)?;
    m.add_function(wrap_pyfunction!(parse_source_text, m)?)?;
    m.add_function(wrap_pyfunction!(parse_target_text, m)?)?;
    m.add_function(wrap_pyfunction!(document_to_target, m)?)?;
    m.add_function(wrap_pyfunction!(roundtrip_report, m)?)?;
    m.add_function(wrap_pyfunction!(normalize_source_text, m)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decision, InlineChoice, Jump};
    use std::fs;
    use std::path::Path;

    fn fixture(name: &str) -> String {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()))
    }

    fn init_logger() {
        let _ = pretty_env_logger::try_init();
    }

    fn print_line_mismatch(got: &str, expected: &str) {
        for (i, (a, b)) in got.lines().zip(expected.lines()).enumerate() {
            if a != b {
                println!("Mismatch at line {}", i + 1);
                println!("Got: {a:?}");
                println!("Exp: {b:?}");
                break;
            }
        }
    }

    #[test]
    fn test_forward_fixture() {
        init_logger();
        let doc = parse_source(&fixture("goblin_road.fflow")).expect("fixture parses");
        let out = to_target(&doc);
        let golden = fixture("goblin_road.twee");
        if out != golden {
            print_line_mismatch(&out, &golden);
            assert_eq!(out, golden, "Mismatch in fixture goblin_road.twee");
        }
    }

    #[test]
    fn test_roundtrip_fixture_report() {
        init_logger();
        let report = roundtrip(&fixture("goblin_road.fflow"), &Config::default()).unwrap();
        let got: Vec<serde_json::Value> = report
            .divergences
            .iter()
            .map(|d| serde_json::json!({ "category": d.category, "location": d.location }))
            .collect();
        let golden: serde_json::Value =
            serde_json::from_str(&fixture("goblin_road.report.json")).expect("Invalid report JSON");
        assert_eq!(serde_json::Value::Array(got), golden, "{report}");
    }

    #[test]
    fn test_reverse_fixture() {
        init_logger();
        let doc = parse_target(&fixture("tavern.twee")).expect("fixture parses");
        let out = to_source(&doc);
        let golden = fixture("tavern.fflow");
        if out != golden {
            print_line_mismatch(&out, &golden);
            assert_eq!(out, golden, "Mismatch in fixture tavern.fflow");
        }
        assert!(parse_source(&out).is_ok());
    }

    #[test]
    fn test_renpy_fixture() {
        init_logger();
        let out = convert_text(&fixture("goblin_road.fflow"), "fflow", ".rpy", None).unwrap();
        let golden = fixture("goblin_road.rpy");
        if out != golden {
            print_line_mismatch(&out, &golden);
            assert_eq!(out, golden, "Mismatch in fixture goblin_road.rpy");
        }
    }

    #[test]
    fn test_convert_between_dialects() {
        init_logger();
        let twee = convert_text(&fixture("goblin_road.fflow"), ".fflow", "twee", None).unwrap();
        assert_eq!(twee, fixture("goblin_road.twee"));

        let rpy = convert_text(":: Start [prologue]\n[[Continue|Hall]]\n\n:: Hall\nQuiet.\n", "tw", "renpy", None).unwrap();
        assert_eq!(rpy, "label start:\n    jump hall\n\nlabel hall:\n    \"Quiet.\"\n    return\n");

        assert!(matches!(
            convert_text("label start:\n", "rpy", "fflow", None),
            Err(Error::WriteOnlyDialect(Dialect::Renpy))
        ));
        assert!(matches!(
            convert_text("x", "ink", "twee", None),
            Err(Error::UnknownDialect(_))
        ));
    }

    #[test]
    fn test_raw_lines_and_bracketed_labels_roundtrip() {
        init_logger();
        let report = roundtrip("~ nonsense here\n! DANCE: now\n", &Config::default()).unwrap();
        assert!(report.is_clean(), "{report}");

        let report = roundtrip("# Fight [1]\n\nSteel.\n", &Config::default()).unwrap();
        assert!(report.is_clean(), "{report}");
    }

    #[test]
    fn test_inline_choice_is_lossless() {
        init_logger();
        let source = "# Hall\n\nDoors everywhere.\n[Open the red door|#Hall]\n";
        let original = parse_source(source).unwrap();
        let back = parse_target(&to_target(&original)).unwrap();
        assert!(back.nodes.contains(&Node::InlineChoice(InlineChoice {
            label: "Open the red door".to_string(),
            target: "Hall".to_string(),
        })));
        assert!(diff(&original, &back).is_empty());
    }

    #[test]
    fn test_inline_jump_roundtrips_as_one_jump() {
        init_logger();
        let source = "# GAME_OVER\n\nThe door slams shut -> #GAME_OVER\n";
        let original = parse_source(source).unwrap();
        let jumps = original
            .nodes
            .iter()
            .filter(|n| matches!(n, Node::Jump(_)))
            .count();
        assert_eq!(jumps, 1);
        let back = parse_target(&to_target(&original)).unwrap();
        assert_eq!(
            back.nodes[1],
            Node::Jump(Jump {
                display: Some("The door slams shut".to_string()),
                target: "GAME_OVER".to_string(),
            })
        );
        assert!(roundtrip(source, &Config::default()).unwrap().is_clean());
    }

    #[test]
    fn test_missing_prefix_is_one_variable_formatting() {
        init_logger();
        let report = roundtrip("(IF: player.hp <= 0)\nYou fall.\n(END)\n", &Config::default()).unwrap();
        assert_eq!(report.divergences.len(), 1, "{report}");
        assert_eq!(report.divergences[0].category, Category::VariableFormatting);
        assert_eq!(report.divergences[0].location, "[0].branches[0].condition");
    }

    #[test]
    fn test_described_options_collapse() {
        init_logger();
        let source = "? What do you do?\n+ [Fight] Draw your sword. -> #Fight\n+ [Flee] Run for the trees. -> #Flee\n\n# Fight\n\nSteel.\n\n# Flee\n\nLeaves.\n";
        let target = convert_source_text(source, None).unwrap();
        assert!(!target.contains("Draw your sword."));
        assert!(!target.contains("Run for the trees."));

        let report = roundtrip(source, &Config::default()).unwrap();
        assert_eq!(report.count(Category::DecisionCollapsed), 1, "{report}");
        assert_eq!(report.divergences.len(), 1, "{report}");
    }

    #[test]
    fn test_unterminated_if_reports_opening_line() {
        init_logger();
        let err = parse_source("Start.\n(IF: torch)\nLight.\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, ParseErrorKind::UnterminatedBlock { .. }));
        assert!(roundtrip("Start.\n(IF: torch)\nLight.\n", &Config::default()).is_err());
    }

    #[test]
    fn test_continue_synonyms_follow_config() {
        init_logger();
        let config = Config::from_json(r#"{"continue_labels": ["Weiter"]}"#).unwrap();
        let doc = parse_target_with(":: Start [prologue]\n[[Weiter|Ende]]\n", &config).unwrap();
        assert_eq!(
            doc.nodes,
            vec![Node::Jump(Jump {
                display: None,
                target: "Ende".to_string(),
            })]
        );
        let doc = parse_target(":: Start [prologue]\n[[Continue|Ende]]\n").unwrap();
        assert!(matches!(&doc.nodes[0], Node::Jump(Jump { display: None, .. })));

        let out = to_target_with(&doc, &config);
        assert!(out.contains("[[Weiter|Ende]]"));
    }

    #[test]
    fn test_unprompted_decision_survives() {
        init_logger();
        let source = "+ [Left] -> #Left\n+ [Right] -> #Right\n\n# Left\n\nL.\n\n# Right\n\nR.\n";
        let report = roundtrip(source, &Config::default()).unwrap();
        assert!(report.is_clean(), "{report}");
        let back = parse_target(&to_target(&parse_source(source).unwrap())).unwrap();
        assert!(matches!(&back.nodes[0], Node::Decision(Decision { prompt, .. }) if prompt.is_empty()));
    }

    #[test]
    fn test_normalize_source() {
        init_logger();
        let out = normalize_source("~ gold += bonus\n(IF: gold > 10 and not $cursed)\nRich.\n(END)\n").unwrap();
        assert_eq!(
            out,
            "~ $gold += $bonus\n(IF: $gold > 10 and not $cursed)\n    Rich.\n\n(END)\n"
        );
    }

    #[test]
    fn test_json_surface() {
        init_logger();
        let ast = parse_source_json("-> #END\n").unwrap();
        let value: serde_json::Value = serde_json::from_str(&ast).unwrap();
        assert_eq!(value["nodes"][0]["node"], "jump");

        let target = document_json_to_target(&ast, None).unwrap();
        assert_eq!(target, ":: Start [prologue]\n[[Continue|END]]\n");

        let report: serde_json::Value =
            serde_json::from_str(&roundtrip_json("-> #END\n", None).unwrap()).unwrap();
        assert_eq!(report["clean"], true);

        assert!(matches!(
            convert_source_text("x", Some("{\"continue_labels\": []}")),
            Err(Error::Config(ConfigError::NoContinueLabels))
        ));
        assert!(matches!(
            convert_target_text(":: A\n<</if>>\n", None),
            Err(Error::Parse(_))
        ));
        let parsed: serde_json::Value =
            serde_json::from_str(&parse_target_json(":: A\nHi.\n", None).unwrap()).unwrap();
        assert_eq!(parsed["nodes"][0]["node"], "section_heading");
    }
}
