use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cxxfront::{
    AnalysisError, AnalysisOptions, Ast, AstVisitor, BuildStamp, CxxRule, Driver, LayeredConfig,
    NodeId, NodeKind, ParseOptions, SideTable, SourceReader, TokenKind,
};

fn reader(files: &[(&str, &str)]) -> SourceReader {
    let map: HashMap<PathBuf, String> = files
        .iter()
        .map(|(path, text)| (PathBuf::from(path), text.to_string()))
        .collect();
    Arc::new(move |p: &Path| map.get(p).cloned())
}

fn values(tokens: &[cxxfront::Token]) -> Vec<&str> {
    tokens
        .iter()
        .filter(|t| t.kind != TokenKind::Eof)
        .map(|t| t.value.as_str())
        .collect()
}

#[derive(Default)]
struct FunctionLines {
    depth: usize,
    lines: Vec<usize>,
    depths: SideTable<usize>,
}

impl AstVisitor<CxxRule> for FunctionLines {
    fn subscribed_to(&self, kind: &NodeKind<CxxRule>) -> bool {
        *kind == NodeKind::Rule(CxxRule::FunctionDefinition)
    }

    fn visit_node(&mut self, ast: &Ast<CxxRule>, id: NodeId) {
        self.depths.insert(id, self.depth);
        self.depth += 1;
        self.lines.push(ast.line(id));
    }

    fn leave_node(&mut self, _ast: &Ast<CxxRule>, _id: NodeId) {
        self.depth -= 1;
    }
}

#[test]
fn configuration_drives_preprocessing_and_parsing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = LayeredConfig::from_json(
        r#"{
            "global": { "defines": ["USE_FAST=1"], "include_directories": ["inc"] },
            "units": { "src/main.c": { "defines": ["UNIT_ONLY"] } }
        }"#,
    )
    .unwrap();
    let files = reader(&[
        (
            "src/main.c",
            "#include <fast.h>\n#if USE_FAST && defined(UNIT_ONLY)\n\
             int fast(void) { return SPEED; }\n#else\nint slow;\n#endif\n",
        ),
        ("inc/fast.h", "#pragma once\n#define SPEED 9\n"),
    ]);
    let driver = Driver::new(config, AnalysisOptions::default())
        .unwrap()
        .with_reader(files);

    let unit = driver.analyze_file(Path::new("src/main.c")).unwrap();
    assert!(unit.diagnostics.is_empty(), "{:?}", unit.diagnostics);
    assert_eq!(unit.included_files, vec![PathBuf::from("inc/fast.h")]);
    assert_eq!(
        values(&unit.tokens),
        ["int", "fast", "(", "void", ")", "{", "return", "9", ";", "}"]
    );
    let ast = unit.ast.unwrap();
    assert_eq!(ast.collect(NodeKind::Rule(CxxRule::FunctionDefinition)).len(), 1);
}

#[test]
fn quoted_include_uses_the_including_directory_only() {
    let files = reader(&[
        ("lib/a.c", "#include \"a.h\"\n#include <a.h>\nint v = A;\n"),
        ("lib/a.h", "#define A 1\n"),
    ]);
    let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default())
        .unwrap()
        .with_reader(files);
    let unit = driver.analyze_file(Path::new("lib/a.c")).unwrap();
    assert_eq!(unit.included_files, vec![PathBuf::from("lib/a.h")]);
    assert_eq!(unit.diagnostics.len(), 1);
    assert!(unit.diagnostics[0].message.contains("a.h"));
    assert_eq!(values(&unit.tokens), ["int", "v", "=", "1", ";"]);
}

#[test]
fn visitor_walks_function_definitions() {
    let source = "struct P { int x; };\n\nint get(struct P *p) {\n  return p->x;\n}\n\n\
                  void set(struct P *p, int v) {\n  p->x = v;\n}\n";
    let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default()).unwrap();
    let unit = driver.analyze_source(Path::new("p.c"), source).unwrap();
    let ast = unit.ast.unwrap();

    let mut visitor = FunctionLines::default();
    ast.visit(&mut visitor);
    assert_eq!(visitor.lines, [3, 7]);
    assert_eq!(visitor.depth, 0);
    assert_eq!(visitor.depths.len(), 2);
    assert!(visitor.depths.get(ast.root()).is_none());
}

#[test]
fn recovery_keeps_the_rest_of_the_file() {
    let source = "int ok1;\nint broken = = 3;\nint ok2;\nvoid f(void) {\n  x = ;\n  y = 2;\n}\n";
    let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default()).unwrap();
    let unit = driver.analyze_source(Path::new("r.c"), source).unwrap();
    let lines: Vec<Option<usize>> = unit.diagnostics.iter().map(|d| d.line).collect();
    assert_eq!(lines, [Some(2), Some(5)]);
    let ast = unit.ast.unwrap();
    assert_eq!(ast.collect(NodeKind::Recovered).len(), 2);
    assert_eq!(ast.collect(NodeKind::Rule(CxxRule::FunctionDefinition)).len(), 1);
}

#[test]
fn strict_batch_reports_each_file() {
    let files = reader(&[("a.c", "int a;\n"), ("b.c", "int b = ;\n")]);
    let options = AnalysisOptions {
        parse: ParseOptions::strict(),
        ..AnalysisOptions::default()
    };
    let driver = Driver::new(LayeredConfig::new(), options).unwrap().with_reader(files);
    let results = driver
        .analyze_batch(&[PathBuf::from("a.c"), PathBuf::from("b.c"), PathBuf::from("c.c")])
        .unwrap();
    assert!(results[0].as_ref().unwrap().is_parsed());
    let rejected = results[1].as_ref().unwrap();
    assert!(!rejected.is_parsed());
    assert_eq!(
        rejected.first_error().unwrap().to_string(),
        "b.c:1: error: Parse error at line 1: unexpected ';'"
    );
    assert!(matches!(results[2], Err(AnalysisError::Preprocess(_))));
}

#[test]
fn build_stamp_fixes_date_and_time() {
    let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default())
        .unwrap()
        .with_build_stamp(BuildStamp::from_unix(0));
    let unit = driver
        .analyze_source(Path::new("d.c"), "const char *d = __DATE__;\nconst char *t = __TIME__;\n")
        .unwrap();
    let strings: Vec<&str> = unit
        .tokens
        .iter()
        .filter(|t| t.kind == TokenKind::String)
        .map(|t| t.value.as_str())
        .collect();
    assert_eq!(strings, ["\"Jan  1 1970\"", "\"00:00:00\""]);
}

#[test]
fn memo_table_avoids_repeated_work() {
    let driver = Driver::new(LayeredConfig::new(), AnalysisOptions::default()).unwrap();
    let unit = driver
        .analyze_source(Path::new("m.cpp"), "int a = b < c;\nvector<int> v;\n")
        .unwrap();
    assert!(unit.is_parsed());
    assert!(unit.diagnostics.is_empty());
    assert!(unit.stats.memo_hits > 0);
    assert!(unit.stats.backtracks > 0);
}
